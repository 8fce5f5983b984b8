/* src/router/serializer/rust/src/stream.rs */

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use futures_core::Stream;
use futures_util::stream::{self, SelectAll};
use futures_util::StreamExt;
use trellis_router::{BoxFuture, BoxStream, DeferredResult, StreamHint, Value};

use crate::adapter::AdapterRegistry;
use crate::error::SerializationError;
use crate::scope::{DecodeScope, EncodeScope, Pending};

pub type ChunkStream = BoxStream<Result<String, SerializationError>>;

/// Entry point bound to one adapter registry. Each call to [`serialize`]
/// or [`encode_scope`] starts a fresh reference table.
///
/// [`serialize`]: Serializer::serialize
/// [`encode_scope`]: Serializer::encode_scope
#[derive(Clone, Default)]
pub struct Serializer {
  registry: Arc<AdapterRegistry>,
}

impl Serializer {
  pub fn new(registry: AdapterRegistry) -> Self {
    Self { registry: Arc::new(registry) }
  }

  pub fn registry(&self) -> &Arc<AdapterRegistry> {
    &self.registry
  }

  pub fn encode_scope(&self, scope_id: impl Into<String>) -> EncodeScope {
    EncodeScope::new(scope_id, Arc::clone(&self.registry))
  }

  pub fn decode_scope(&self, scope_id: impl Into<String>) -> DecodeScope {
    DecodeScope::new(scope_id, Arc::clone(&self.registry))
  }

  /// The value chunk followed by one chunk per settled deferred value or
  /// raw-stream event, in settlement order.
  pub fn serialize(&self, value: &Value, scope_id: &str) -> ChunkStream {
    let mut scope = self.encode_scope(scope_id);
    match scope.encode_chunk(value) {
      Ok(first) => Box::pin(stream::once(async move { Ok(first) }).chain(follow_ups(scope))),
      Err(err) => Box::pin(stream::once(async move { Err(err) })),
    }
  }
}

enum Event {
  Settled(u32, DeferredResult),
  Chunk(u32, StreamHint, Result<Bytes, String>),
  End(u32),
}

fn watch(pending: Pending) -> BoxStream<Event> {
  match pending {
    Pending::Deferred(id, deferred) => {
      Box::pin(stream::once(async move { Event::Settled(id, deferred.settled().await) }))
    }
    Pending::Stream(id, raw) => {
      let hint = raw.hint();
      match raw.take() {
        Some(source) => Box::pin(
          source
            .map(move |item| Event::Chunk(id, hint, item))
            .chain(stream::once(async move { Event::End(id) })),
        ),
        None => Box::pin(stream::iter([Event::Chunk(id, hint, Err("stream was already consumed".into()))])),
      }
    }
  }
}

struct FollowUps {
  scope: EncodeScope,
  watched: SelectAll<BoxStream<Event>>,
  closed: HashSet<u32>,
}

/// Chunks that settle everything `scope` has handed out placeholders for.
/// Values discovered while encoding a settled result are picked up too.
pub fn follow_ups(mut scope: EncodeScope) -> ChunkStream {
  let mut watched = SelectAll::new();
  for pending in scope.take_pending() {
    watched.push(watch(pending));
  }
  let state = FollowUps { scope, watched, closed: HashSet::new() };
  Box::pin(stream::unfold(state, |mut state| async move {
    loop {
      let chunk = match state.watched.next().await? {
        Event::Settled(id, result) => state.scope.settle_chunk(id, &result),
        Event::Chunk(id, _, _) | Event::End(id) if state.closed.contains(&id) => continue,
        Event::Chunk(id, hint, Ok(bytes)) => state.scope.stream_chunk(id, hint, &bytes),
        Event::Chunk(id, _, Err(message)) => {
          state.closed.insert(id);
          state.scope.stream_error_chunk(id, &message)
        }
        Event::End(id) => {
          state.closed.insert(id);
          state.scope.stream_end_chunk(id)
        }
      };
      for pending in state.scope.take_pending() {
        state.watched.push(watch(pending));
      }
      return Some((chunk, state));
    }
  }))
}

/// A decoded value plus the task that keeps feeding its placeholders.
/// Deferred values and streams inside `value` only settle while `pump`
/// is being polled.
pub struct Hydration {
  pub value: Value,
  pub pump: BoxFuture<Result<(), SerializationError>>,
}

/// Read the value chunk from `chunks`, then hand back the remaining chunks as
/// a pump future.
pub async fn deserialize<S>(mut scope: DecodeScope, chunks: S) -> Result<Hydration, SerializationError>
where
  S: Stream<Item = Result<String, SerializationError>> + Send + 'static,
{
  let mut chunks = Box::pin(chunks);
  let value = loop {
    let Some(text) = chunks.next().await else {
      return Err(SerializationError::malformed("stream ended before the value chunk"));
    };
    if let Some(value) = scope.apply_chunk(&text?)? {
      break value;
    }
  };
  let pump: BoxFuture<Result<(), SerializationError>> = Box::pin(async move {
    while let Some(text) = chunks.next().await {
      let applied = text.and_then(|text| scope.apply_chunk(&text));
      match applied {
        Ok(Some(_)) => tracing::debug!(scope = %scope.id(), "ignoring extra value chunk"),
        Ok(None) => {}
        Err(err) => {
          tracing::warn!(scope = %scope.id(), error = %err, "serialized stream failed");
          scope.finish();
          return Err(err);
        }
      }
    }
    scope.finish();
    Ok(())
  });
  Ok(Hydration { value, pump })
}
