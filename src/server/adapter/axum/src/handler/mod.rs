/* src/server/adapter/axum/src/handler/mod.rs */

mod document;
mod server_fn;

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use axum::routing::get;
use trellis_server::{ResponseBody, StartError, StartParts};

use crate::error::AxumError;

pub(crate) type AppState = Arc<StartParts>;

pub(crate) fn build_router(parts: StartParts) -> Router {
  let route = format!("{}/{{*id}}", parts.config.server_fn.base.trim_end_matches('/'));
  Router::new()
    .route(&route, get(server_fn::handle_server_fn).post(server_fn::handle_server_fn))
    .fallback(get(document::handle_document))
    .with_state(Arc::new(parts))
}

/// Full bodies are sent at once; framed bodies stream as they settle.
fn into_response<'a>(
  status: u16,
  headers: impl IntoIterator<Item = (&'a str, &'a str)>,
  body: ResponseBody,
) -> Result<Response, AxumError> {
  let mut builder =
    Response::builder().status(StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR));
  for (name, value) in headers {
    let value = HeaderValue::from_str(value).map_err(|e| StartError::internal(e.to_string()))?;
    builder = builder.header(name, value);
  }
  let body = match body {
    ResponseBody::Full(bytes) => Body::from(bytes),
    ResponseBody::Framed(stream) => Body::from_stream(stream),
  };
  builder.body(body).map_err(|e| AxumError(StartError::internal(e.to_string())))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
  headers.get(name).and_then(|v| v.to_str().ok())
}
