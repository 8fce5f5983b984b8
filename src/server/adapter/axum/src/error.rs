/* src/server/adapter/axum/src/error.rs */

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use trellis_server::transport::RESPONSE_HEADER;
use trellis_server::{ResponseKind, StartError};

/// Newtype wrapper to implement `IntoResponse` for `StartError`. The body and
/// the `x-trellis-response` header match server-function error responses.
#[derive(Debug)]
pub struct AxumError(pub StartError);

impl IntoResponse for AxumError {
  fn into_response(self) -> Response {
    let status = StatusCode::from_u16(self.0.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut resp = (status, axum::Json(self.0.to_json())).into_response();
    resp.headers_mut().insert(RESPONSE_HEADER, HeaderValue::from_static(ResponseKind::Error.as_str()));
    resp
  }
}

impl From<StartError> for AxumError {
  fn from(err: StartError) -> Self {
    Self(err)
  }
}

#[cfg(test)]
mod tests {
  use trellis_server::transport::CONTENT_TYPE_JSON;

  use super::*;

  #[test]
  fn status_and_headers_follow_the_error() {
    let resp = AxumError(StartError::forbidden("nope")).into_response();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(resp.headers()[RESPONSE_HEADER], "error");
    assert_eq!(resp.headers()["content-type"], CONTENT_TYPE_JSON);
  }

  #[test]
  fn out_of_range_status_becomes_500() {
    let resp = AxumError(StartError::new("WEIRD", "x", 42)).into_response();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
  }
}
