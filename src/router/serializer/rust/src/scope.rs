/* src/router/serializer/rust/src/scope.rs */

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use futures_util::stream;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use trellis_router::{Deferred, DeferredResult, RawStream, StreamHint, Value};

use crate::adapter::AdapterRegistry;
use crate::error::SerializationError;

/// One unit of the wire protocol. The first chunk of a scope carries the
/// value; later chunks settle the deferred values and raw streams it holds.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub(crate) enum Chunk {
  Value { scope: String, value: serde_json::Value },
  Resolve { scope: String, id: u32, value: serde_json::Value },
  Reject { scope: String, id: u32, error: serde_json::Value },
  StreamChunk { scope: String, id: u32, data: serde_json::Value },
  StreamEnd { scope: String, id: u32 },
  StreamError { scope: String, id: u32, error: String },
}

impl Chunk {
  fn scope(&self) -> &str {
    match self {
      Chunk::Value { scope, .. }
      | Chunk::Resolve { scope, .. }
      | Chunk::Reject { scope, .. }
      | Chunk::StreamChunk { scope, .. }
      | Chunk::StreamEnd { scope, .. }
      | Chunk::StreamError { scope, .. } => scope,
    }
  }
}

pub(crate) fn hint_name(hint: StreamHint) -> &'static str {
  match hint {
    StreamHint::Binary => "binary",
    StreamHint::Text => "text",
  }
}

pub(crate) fn parse_hint(name: &str) -> StreamHint {
  if name == "text" { StreamHint::Text } else { StreamHint::Binary }
}

/// Byte chunk as wire JSON: binary streams are always base64, text streams
/// are plain strings unless a chunk is not valid UTF-8.
fn encode_bytes(hint: StreamHint, bytes: &[u8]) -> serde_json::Value {
  if hint == StreamHint::Text
    && let Ok(text) = std::str::from_utf8(bytes)
  {
    return serde_json::Value::String(text.to_string());
  }
  serde_json::json!({ "$b64": BASE64.encode(bytes) })
}

fn decode_bytes(data: &serde_json::Value) -> Result<Bytes, SerializationError> {
  match data {
    serde_json::Value::String(text) => Ok(Bytes::from(text.clone())),
    other => {
      let encoded = other
        .get("$b64")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| SerializationError::malformed("stream chunk data must be a string or {\"$b64\"}"))?;
      BASE64.decode(encoded).map(Bytes::from).map_err(|e| SerializationError::malformed(e.to_string()))
    }
  }
}

/// A deferred value or raw stream found while encoding, waiting to be
/// settled by follow-up chunks.
pub(crate) enum Pending {
  Deferred(u32, Deferred),
  Stream(u32, RawStream),
}

/// Server side of one serialization scope (one render or one response).
///
/// Containers and opaque values get sequential reference ids on first
/// encounter; the table lives as long as the scope so later chunks can refer
/// back to values sent earlier.
pub struct EncodeScope {
  pub(crate) id: String,
  pub(crate) registry: Arc<AdapterRegistry>,
  pub(crate) refs: HashMap<usize, u32>,
  /// Keeps referenced containers alive so their addresses stay unique.
  pub(crate) retained: Vec<Value>,
  pub(crate) deferreds: Vec<(u32, Deferred)>,
  pub(crate) streams: Vec<(u32, RawStream)>,
  pub(crate) next_pending: u32,
  pub(crate) pending: Vec<Pending>,
}

impl EncodeScope {
  pub fn new(id: impl Into<String>, registry: Arc<AdapterRegistry>) -> Self {
    Self {
      id: id.into(),
      registry,
      refs: HashMap::new(),
      retained: Vec::new(),
      deferreds: Vec::new(),
      streams: Vec::new(),
      next_pending: 0,
      pending: Vec::new(),
    }
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  /// Whether deferred values or raw streams still need follow-up chunks.
  pub fn has_pending(&self) -> bool {
    !self.pending.is_empty()
  }

  /// Encode `value` as the scope's value chunk.
  pub fn encode_chunk(&mut self, value: &Value) -> Result<String, SerializationError> {
    let value = self.encode(value)?;
    Ok(serde_json::to_string(&Chunk::Value { scope: self.id.clone(), value })?)
  }

  pub(crate) fn take_pending(&mut self) -> Vec<Pending> {
    std::mem::take(&mut self.pending)
  }

  pub(crate) fn settle_chunk(&mut self, id: u32, result: &DeferredResult) -> Result<String, SerializationError> {
    let scope = self.id.clone();
    let chunk = match result {
      Ok(value) => Chunk::Resolve { scope, id, value: self.encode(value)? },
      Err(error) => Chunk::Reject { scope, id, error: self.encode(error)? },
    };
    Ok(serde_json::to_string(&chunk)?)
  }

  pub(crate) fn stream_chunk(&self, id: u32, hint: StreamHint, bytes: &[u8]) -> Result<String, SerializationError> {
    let chunk = Chunk::StreamChunk { scope: self.id.clone(), id, data: encode_bytes(hint, bytes) };
    Ok(serde_json::to_string(&chunk)?)
  }

  pub(crate) fn stream_end_chunk(&self, id: u32) -> Result<String, SerializationError> {
    Ok(serde_json::to_string(&Chunk::StreamEnd { scope: self.id.clone(), id })?)
  }

  pub(crate) fn stream_error_chunk(&self, id: u32, message: &str) -> Result<String, SerializationError> {
    let chunk = Chunk::StreamError { scope: self.id.clone(), id, error: message.to_string() };
    Ok(serde_json::to_string(&chunk)?)
  }
}

pub(crate) struct PromiseSlot {
  pub(crate) deferred: Deferred,
  pub(crate) sender: Option<oneshot::Sender<DeferredResult>>,
}

pub(crate) struct StreamSlot {
  pub(crate) stream: RawStream,
  pub(crate) sender: Option<mpsc::UnboundedSender<Result<Bytes, String>>>,
}

/// Client side of one serialization scope (one hydration pass).
pub struct DecodeScope {
  pub(crate) id: String,
  pub(crate) registry: Arc<AdapterRegistry>,
  pub(crate) slots: Vec<Option<Value>>,
  pub(crate) promises: HashMap<u32, PromiseSlot>,
  pub(crate) streams: HashMap<u32, StreamSlot>,
}

impl DecodeScope {
  pub fn new(id: impl Into<String>, registry: Arc<AdapterRegistry>) -> Self {
    Self { id: id.into(), registry, slots: Vec::new(), promises: HashMap::new(), streams: HashMap::new() }
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  /// Apply one chunk. Returns the decoded value for a value chunk and `None`
  /// for chunks that settle earlier placeholders.
  pub fn apply_chunk(&mut self, text: &str) -> Result<Option<Value>, SerializationError> {
    let chunk: Chunk = serde_json::from_str(text)?;
    if chunk.scope() != self.id {
      return Err(SerializationError::ScopeMismatch {
        expected: self.id.clone(),
        found: chunk.scope().to_string(),
      });
    }
    match chunk {
      Chunk::Value { value, .. } => return self.decode(&value).map(Some),
      Chunk::Resolve { id, value, .. } => {
        let value = self.decode(&value)?;
        self.settle(id, Ok(value))?;
      }
      Chunk::Reject { id, error, .. } => {
        let error = self.decode(&error)?;
        self.settle(id, Err(error))?;
      }
      Chunk::StreamChunk { id, data, .. } => {
        let bytes = decode_bytes(&data)?;
        let sender = self.open_stream(id)?;
        // a dropped receiver means the consumer lost interest
        let _ = sender.send(Ok(bytes));
      }
      Chunk::StreamEnd { id, .. } => {
        self.open_stream(id)?;
        self.close_stream(id);
      }
      Chunk::StreamError { id, error, .. } => {
        let _ = self.open_stream(id)?.send(Err(error));
        self.close_stream(id);
      }
    }
    Ok(None)
  }

  /// Number of deferred values and streams still waiting for chunks.
  pub fn unsettled(&self) -> usize {
    self.promises.values().filter(|p| p.sender.is_some()).count()
      + self.streams.values().filter(|s| s.sender.is_some()).count()
  }

  /// Close every unsettled placeholder: deferred values reject and streams end.
  pub fn finish(&mut self) {
    let open = self.unsettled();
    if open > 0 {
      tracing::debug!(scope = %self.id, open, "closing unsettled values");
    }
    for slot in self.promises.values_mut() {
      slot.sender = None;
    }
    for slot in self.streams.values_mut() {
      slot.sender = None;
    }
  }

  fn settle(&mut self, id: u32, result: DeferredResult) -> Result<(), SerializationError> {
    let sender = self
      .promises
      .get_mut(&id)
      .and_then(|slot| slot.sender.take())
      .ok_or(SerializationError::UnknownDeferred(id))?;
    let _ = sender.send(result);
    Ok(())
  }

  fn open_stream(&self, id: u32) -> Result<&mpsc::UnboundedSender<Result<Bytes, String>>, SerializationError> {
    self
      .streams
      .get(&id)
      .and_then(|slot| slot.sender.as_ref())
      .ok_or(SerializationError::UnknownDeferred(id))
  }

  fn close_stream(&mut self, id: u32) {
    if let Some(slot) = self.streams.get_mut(&id) {
      slot.sender = None;
    }
  }

  /// Placeholder for a value that settles in a later chunk.
  pub(crate) fn promise(&mut self, id: u32) -> Value {
    let slot = self.promises.entry(id).or_insert_with(|| {
      let (sender, receiver) = oneshot::channel();
      let deferred = Deferred::new(async move {
        receiver.await.unwrap_or_else(|_| Err(Value::from("stream closed before the value settled")))
      });
      PromiseSlot { deferred, sender: Some(sender) }
    });
    Value::Deferred(slot.deferred.clone())
  }

  pub(crate) fn raw_stream(&mut self, id: u32, hint: StreamHint) -> Value {
    let slot = self.streams.entry(id).or_insert_with(|| {
      let (sender, receiver) = mpsc::unbounded_channel();
      let source = stream::unfold(receiver, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) });
      StreamSlot { stream: RawStream::new(hint, source), sender: Some(sender) }
    });
    Value::Stream(slot.stream.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn chunk_kinds_use_kebab_case_tags() {
    let chunk = Chunk::StreamEnd { scope: "s".into(), id: 3 };
    assert_eq!(serde_json::to_string(&chunk).unwrap(), r#"{"kind":"stream-end","scope":"s","id":3}"#);
  }

  #[test]
  fn binary_hint_is_always_base64() {
    assert_eq!(encode_bytes(StreamHint::Binary, b"hi"), serde_json::json!({ "$b64": "aGk=" }));
    assert_eq!(encode_bytes(StreamHint::Text, b"hi"), serde_json::json!("hi"));
    assert_eq!(encode_bytes(StreamHint::Text, &[0xff, 0xfe]), serde_json::json!({ "$b64": "//4=" }));
  }

  #[test]
  fn byte_payloads_decode_from_either_form() {
    assert_eq!(decode_bytes(&serde_json::json!("hi")).unwrap(), Bytes::from_static(b"hi"));
    assert_eq!(decode_bytes(&serde_json::json!({ "$b64": "//4=" })).unwrap(), Bytes::from_static(&[0xff, 0xfe]));
    assert!(decode_bytes(&serde_json::json!({ "$b64": "***" })).is_err());
    assert!(decode_bytes(&serde_json::json!(7)).is_err());
  }

  #[test]
  fn chunks_for_another_scope_are_rejected() {
    let mut scope = DecodeScope::new("a", Arc::new(AdapterRegistry::default()));
    let err = scope.apply_chunk(r#"{"kind":"value","scope":"b","value":1}"#).unwrap_err();
    assert!(matches!(err, SerializationError::ScopeMismatch { .. }));
  }

  #[tokio::test]
  async fn unknown_and_unsettled_promises() {
    let mut scope = DecodeScope::new("a", Arc::new(AdapterRegistry::default()));
    let err = scope.apply_chunk(r#"{"kind":"resolve","scope":"a","id":9,"value":null}"#).unwrap_err();
    assert!(matches!(err, SerializationError::UnknownDeferred(9)));

    let Value::Deferred(deferred) = scope.promise(0) else { panic!("expected a deferred placeholder") };
    assert_eq!(scope.unsettled(), 1);
    scope.finish();
    assert!(deferred.settled().await.is_err());
  }
}
