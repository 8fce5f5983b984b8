/* src/server/core/rust/src/errors.rs */

use std::fmt;

use thiserror::Error;
use trellis_router::{NotFound, Redirect, RouteError, Value};

/// Error carried across the server-function boundary as `code/message/status`.
#[derive(Debug, Clone, PartialEq)]
pub struct StartError {
  code: String,
  message: String,
  status: u16,
}

fn default_status(code: &str) -> u16 {
  match code {
    "VALIDATION_ERROR" => 400,
    "UNAUTHORIZED" => 401,
    "FORBIDDEN" => 403,
    "NOT_FOUND" => 404,
    "INTERNAL_ERROR" | "MIDDLEWARE_ERROR" => 500,
    _ => 500,
  }
}

impl StartError {
  pub fn new(code: impl Into<String>, message: impl Into<String>, status: u16) -> Self {
    Self { code: code.into(), message: message.into(), status }
  }

  pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
    let code = code.into();
    let status = default_status(&code);
    Self { code, message: message.into(), status }
  }

  pub fn validation(msg: impl Into<String>) -> Self {
    Self::with_code("VALIDATION_ERROR", msg)
  }

  pub fn not_found(msg: impl Into<String>) -> Self {
    Self::with_code("NOT_FOUND", msg)
  }

  pub fn internal(msg: impl Into<String>) -> Self {
    Self::with_code("INTERNAL_ERROR", msg)
  }

  pub fn unauthorized(msg: impl Into<String>) -> Self {
    Self::with_code("UNAUTHORIZED", msg)
  }

  pub fn forbidden(msg: impl Into<String>) -> Self {
    Self::with_code("FORBIDDEN", msg)
  }

  /// A middleware failed partway through the chain.
  pub fn middleware(msg: impl Into<String>) -> Self {
    Self::with_code("MIDDLEWARE_ERROR", msg)
  }

  pub fn code(&self) -> &str {
    &self.code
  }

  pub fn message(&self) -> &str {
    &self.message
  }

  pub fn status(&self) -> u16 {
    self.status
  }

  pub fn to_json(&self) -> serde_json::Value {
    serde_json::json!({ "code": self.code, "message": self.message, "status": self.status })
  }

  /// Inverse of [`to_json`](Self::to_json); missing fields fall back to an internal error.
  pub fn from_json(value: &serde_json::Value) -> Self {
    let code = value.get("code").and_then(serde_json::Value::as_str).unwrap_or("INTERNAL_ERROR");
    let message = value.get("message").and_then(serde_json::Value::as_str).unwrap_or_default();
    let status = value
      .get("status")
      .and_then(serde_json::Value::as_u64)
      .and_then(|s| u16::try_from(s).ok())
      .unwrap_or_else(|| default_status(code));
    Self::new(code, message, status)
  }
}

impl fmt::Display for StartError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}", self.code, self.message)
  }
}

impl std::error::Error for StartError {}

/// How a server function or one of its middleware stopped. Redirects and
/// not-found are signals for the caller's router, not failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServerFnError {
  #[error("redirect to {}", .0.target())]
  Redirect(Redirect),
  #[error("not found")]
  NotFound(NotFound),
  #[error(transparent)]
  Failed(#[from] StartError),
}

impl ServerFnError {
  pub fn redirect(to: impl Into<String>) -> Self {
    Self::Redirect(Redirect::to(to))
  }

  pub fn not_found() -> Self {
    Self::NotFound(NotFound::default())
  }

  /// Signal form understood by the navigation engine. Failures become loader errors.
  pub fn into_route_error(self) -> RouteError {
    match self {
      Self::Redirect(r) => RouteError::Redirect(r),
      Self::NotFound(n) => RouteError::NotFound(n),
      Self::Failed(err) => RouteError::Loader(trellis_router::LoaderError::with_value(
        err.to_string(),
        Value::from(err.to_json()),
      )),
    }
  }
}

impl From<RouteError> for ServerFnError {
  fn from(err: RouteError) -> Self {
    match err {
      RouteError::Redirect(r) => Self::Redirect(r),
      RouteError::NotFound(n) => Self::NotFound(n),
      RouteError::Validation(v) => Self::Failed(StartError::validation(v.to_string())),
      RouteError::Loader(l) => Self::Failed(StartError::internal(l.message)),
    }
  }
}
