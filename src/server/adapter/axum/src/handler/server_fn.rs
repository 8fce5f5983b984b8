/* src/server/adapter/axum/src/handler/server_fn.rs */

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method as HttpMethod, Uri};
use axum::response::Response;
use trellis_server::transport::PAYLOAD_MODE_HEADER;
use trellis_server::{Method, PayloadMode, ServerFnRequest, StartError};

use super::{AppState, header_str, into_response};
use crate::error::AxumError;

pub(super) async fn handle_server_fn(
  State(state): State<AppState>,
  Path(id): Path<String>,
  method: HttpMethod,
  uri: Uri,
  headers: HeaderMap,
  body: Bytes,
) -> Result<Response, AxumError> {
  let method = match method {
    HttpMethod::GET => Method::Get,
    HttpMethod::POST => Method::Post,
    other => return Err(StartError::validation(format!("unsupported method {other}")).into()),
  };
  let mode = match header_str(&headers, PAYLOAD_MODE_HEADER) {
    Some(raw) => {
      PayloadMode::parse(raw).ok_or_else(|| StartError::validation(format!("unknown payload mode '{raw}'")))?
    }
    None => PayloadMode::Payload,
  };
  let req = ServerFnRequest {
    method,
    function_id: id,
    mode,
    query: uri.query().map(str::to_string),
    content_type: header_str(&headers, "content-type").map(str::to_string),
    body,
  };
  let resp = trellis_server::handle_server_fn(&state, req).await;
  let headers = resp.headers();
  into_response(resp.status, headers, resp.body)
}
