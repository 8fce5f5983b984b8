/* src/router/serializer/rust/src/error.rs */

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SerializationError {
  /// The input ended while a declared frame was only partly buffered.
  #[error("stream ended inside a frame: expected {expected} payload bytes, received {received}")]
  Truncated { expected: usize, received: usize },
  #[error("malformed frame header: {0}")]
  MalformedHeader(String),
  #[error("frame of {size} bytes exceeds the {limit} byte limit")]
  FrameTooLarge { size: usize, limit: usize },
  #[error("reader buffered {size} bytes, over the {limit} byte limit")]
  BufferExceeded { size: usize, limit: usize },
  #[error("frame payload is not valid UTF-8")]
  InvalidUtf8,
  #[error(transparent)]
  Json(#[from] serde_json::Error),
  #[error("no adapter registered for type `{0}`")]
  UnknownType(String),
  #[error("reference {0} does not point at a decoded value")]
  DanglingReference(u32),
  #[error("chunk belongs to scope `{found}`, reader is bound to `{expected}`")]
  ScopeMismatch { expected: String, found: String },
  #[error("no pending value with id {0}")]
  UnknownDeferred(u32),
  #[error("adapter `{key}`: {message}")]
  Adapter { key: String, message: String },
  #[error("adapter key `{0}` is registered more than once or is reserved")]
  DuplicateAdapter(String),
  #[error("malformed payload: {0}")]
  Malformed(String),
  #[error("input stream failed: {0}")]
  Io(String),
}

impl SerializationError {
  pub(crate) fn adapter(key: &str, message: impl Into<String>) -> Self {
    Self::Adapter { key: key.to_string(), message: message.into() }
  }

  pub(crate) fn malformed(message: impl Into<String>) -> Self {
    Self::Malformed(message.into())
  }
}
