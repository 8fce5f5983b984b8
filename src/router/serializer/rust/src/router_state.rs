/* src/router/serializer/rust/src/router_state.rs */

//! Shipping dehydrated router state through a serialization scope.

use futures_core::Stream;
use trellis_router::{BoxFuture, DehydratedRouter, Router};

use crate::error::SerializationError;
use crate::scope::{DecodeScope, EncodeScope};
use crate::stream::deserialize;

/// Encode the router's committed matches as the value chunk of `scope`.
/// Deferred loader data stays pending in the scope; drain it with
/// [`follow_ups`](crate::stream::follow_ups).
pub fn dehydrate_router(router: &Router, scope: &mut EncodeScope) -> Result<String, SerializationError> {
  let dehydrated = router.dehydrate();
  tracing::debug!(scope = %scope.id(), href = %dehydrated.href, matches = dehydrated.matches.len(), "dehydrating router");
  scope.encode_chunk(&dehydrated.to_value())
}

/// Apply the value chunk produced by [`dehydrate_router`] and install it.
pub fn hydrate_router(router: &Router, scope: &mut DecodeScope, chunk: &str) -> Result<(), SerializationError> {
  let value = scope
    .apply_chunk(chunk)?
    .ok_or_else(|| SerializationError::malformed("expected the router state chunk"))?;
  install(router, &value)
}

/// Hydrate from a whole chunk stream. The returned pump settles deferred
/// loader data as the remaining chunks arrive.
pub async fn hydrate_router_stream<S>(
  router: &Router,
  scope: DecodeScope,
  chunks: S,
) -> Result<BoxFuture<Result<(), SerializationError>>, SerializationError>
where
  S: Stream<Item = Result<String, SerializationError>> + Send + 'static,
{
  let hydration = deserialize(scope, chunks).await?;
  install(router, &hydration.value)?;
  Ok(hydration.pump)
}

fn install(router: &Router, value: &trellis_router::Value) -> Result<(), SerializationError> {
  let dehydrated = DehydratedRouter::from_value(value)
    .ok_or_else(|| SerializationError::malformed("value is not a dehydrated router"))?;
  router.hydrate(dehydrated);
  Ok(())
}
