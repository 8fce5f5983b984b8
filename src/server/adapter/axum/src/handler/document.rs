/* src/server/adapter/axum/src/handler/document.rs */

use axum::extract::State;
use axum::http::{HeaderMap, Uri};
use axum::response::Response;
use trellis_server::{DocumentRequest, render_document};

use super::{AppState, into_response};
use crate::error::AxumError;

/// Every GET outside the server-function prefix renders a document.
pub(super) async fn handle_document(
  State(state): State<AppState>,
  uri: Uri,
  headers: HeaderMap,
) -> Result<Response, AxumError> {
  let href = uri.path_and_query().map_or("/", |pq| pq.as_str()).to_string();
  let headers = headers
    .iter()
    .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
    .collect();
  let doc = render_document(&state, DocumentRequest { href, headers }).await;
  let headers: Vec<(&str, &str)> = doc.headers.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
  into_response(doc.status, headers, doc.body)
}
