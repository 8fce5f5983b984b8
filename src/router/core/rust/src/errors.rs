/* src/router/core/rust/src/errors.rs */

use thiserror::Error;

use crate::value::Value;

/// Everything a `beforeLoad`, `loader`, `context` or search validator may fail with.
///
/// `Redirect` and `NotFound` are control-flow signals: the navigation engine
/// consumes them and they never reach a match as an ordinary error.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum RouteError {
  #[error("redirect to {}", .0.target())]
  Redirect(Redirect),
  #[error("not found")]
  NotFound(NotFound),
  #[error(transparent)]
  Validation(#[from] ValidationError),
  #[error(transparent)]
  Loader(#[from] LoaderError),
}

impl RouteError {
  pub fn redirect(to: impl Into<String>) -> Self {
    RouteError::Redirect(Redirect::to(to))
  }

  pub fn not_found() -> Self {
    RouteError::NotFound(NotFound::default())
  }

  pub fn loader(message: impl Into<String>) -> Self {
    RouteError::Loader(LoaderError::new(message))
  }

  pub fn is_signal(&self) -> bool {
    matches!(self, RouteError::Redirect(_) | RouteError::NotFound(_))
  }

  /// Plain value form carried on the wire and in dehydrated state.
  pub fn to_value(&self) -> Value {
    match self {
      RouteError::Redirect(r) => Value::object([
        ("kind", Value::from("redirect")),
        ("href", Value::from(r.target())),
        ("statusCode", Value::from(i64::from(r.status_code))),
      ]),
      RouteError::NotFound(n) => Value::object([
        ("kind", Value::from("notFound")),
        ("routeId", n.route_id.clone().map_or(Value::Null, Value::from)),
        ("data", n.data.clone()),
      ]),
      RouteError::Validation(v) => Value::object([
        ("kind", Value::from("validation")),
        ("routeId", Value::from(v.route_id.clone())),
        ("message", Value::from(v.message.clone())),
      ]),
      RouteError::Loader(l) => Value::object([
        ("kind", Value::from("loader")),
        ("message", Value::from(l.message.clone())),
        ("value", l.value.clone()),
      ]),
    }
  }

  /// Inverse of `to_value`. Unknown shapes become a loader error carrying the value.
  pub fn from_value(value: &Value) -> Self {
    let text = |key: &str| value.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
    match value.get("kind").and_then(Value::as_str) {
      Some("redirect") => RouteError::Redirect(Redirect::href(text("href"))),
      Some("notFound") => RouteError::NotFound(NotFound {
        route_id: value.get("routeId").and_then(Value::as_str).map(str::to_string),
        data: value.get("data").cloned().unwrap_or_default(),
      }),
      Some("validation") => {
        RouteError::Validation(ValidationError { route_id: text("routeId"), message: text("message") })
      }
      Some("loader") => RouteError::Loader(LoaderError {
        message: text("message"),
        value: value.get("value").cloned().unwrap_or_default(),
      }),
      _ => RouteError::Loader(LoaderError { message: "unknown error".to_string(), value: value.clone() }),
    }
  }
}

/// Navigation target carried by a redirect signal.
#[derive(Clone, Debug, PartialEq)]
pub struct Redirect {
  /// Router-relative destination (resolved like `navigate({ to })`).
  pub to: Option<String>,
  /// Absolute or external destination. Takes precedence over `to`.
  pub href: Option<String>,
  pub replace: bool,
  pub reload_document: bool,
  pub status_code: u16,
}

impl Redirect {
  pub fn to(to: impl Into<String>) -> Self {
    Self { to: Some(to.into()), href: None, replace: true, reload_document: false, status_code: 307 }
  }

  pub fn href(href: impl Into<String>) -> Self {
    Self { to: None, href: Some(href.into()), replace: true, reload_document: false, status_code: 307 }
  }

  pub fn reload_document(mut self) -> Self {
    self.reload_document = true;
    self
  }

  pub fn status(mut self, code: u16) -> Self {
    self.status_code = code;
    self
  }

  pub fn target(&self) -> &str {
    self.href.as_deref().or(self.to.as_deref()).unwrap_or("/")
  }

  pub fn is_external(&self) -> bool {
    is_external_href(self.target())
  }
}

/// Whether `target` leaves this application (has a scheme or is protocol-relative).
pub fn is_external_href(target: &str) -> bool {
  target.starts_with("//")
    || target.split_once("://").is_some_and(|(scheme, _)| {
      !scheme.is_empty() && scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-')
    })
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NotFound {
  /// Route that should render the not-found state. Defaults to the throwing match.
  pub route_id: Option<String>,
  pub data: Value,
}

#[derive(Clone, Debug, Error, PartialEq)]
#[error("invalid search params for {route_id}: {message}")]
pub struct ValidationError {
  pub route_id: String,
  pub message: String,
}

/// Arbitrary failure raised by user code, with the original value attached.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("{message}")]
pub struct LoaderError {
  pub message: String,
  pub value: Value,
}

impl LoaderError {
  pub fn new(message: impl Into<String>) -> Self {
    Self { message: message.into(), value: Value::Null }
  }

  pub fn with_value(message: impl Into<String>, value: Value) -> Self {
    Self { message: message.into(), value }
  }

  pub fn from_error<E: std::error::Error>(err: &E) -> Self {
    Self::new(err.to_string())
  }
}

/// Configuration problems detected while building a route tree.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteTreeError {
  #[error("duplicate routes found with id: {0}")]
  DuplicateId(String),
  #[error("conflicting routes found with full path: {path} ({first} and {second})")]
  DuplicateFullPath { path: String, first: String, second: String },
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn redirect_defaults() {
    let r = Redirect::to("/login");
    assert_eq!(r.status_code, 307);
    assert!(r.replace);
    assert!(!r.is_external());
    assert_eq!(r.target(), "/login");
  }

  #[test]
  fn external_targets() {
    assert!(Redirect::href("https://example.com/a").is_external());
    assert!(Redirect::href("//cdn.example.com").is_external());
    assert!(!Redirect::href("/local?next=https://x").is_external());
  }

  #[test]
  fn signals_are_flagged() {
    assert!(RouteError::redirect("/").is_signal());
    assert!(RouteError::not_found().is_signal());
    assert!(!RouteError::loader("boom").is_signal());
  }

  #[test]
  fn value_form_round_trips() {
    let errors = [
      RouteError::loader("boom"),
      RouteError::Validation(ValidationError { route_id: "/a".into(), message: "bad".into() }),
      RouteError::NotFound(NotFound { route_id: Some("/a".into()), data: Value::from("x") }),
    ];
    for err in errors {
      let back = RouteError::from_value(&err.to_value());
      assert_eq!(back.to_value(), err.to_value());
    }
  }

  #[test]
  fn display_messages() {
    assert_eq!(RouteError::loader("boom").to_string(), "boom");
    assert_eq!(RouteError::redirect("/x").to_string(), "redirect to /x");
  }
}
