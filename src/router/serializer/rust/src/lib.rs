/* src/router/serializer/rust/src/lib.rs */

pub mod adapter;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod router_state;
pub mod scope;
pub mod stream;

// Public API re-exports
pub use adapter::{
  AdapterRegistry, AdapterRegistryBuilder, Date, FormData, Headers, RegExp, SerializationAdapter, TypedAdapter,
  ValueMap, ValueSet,
};
pub use error::SerializationError;
pub use frame::{FrameDecoder, FrameLimits, encode_frame, frame_stream, read_frames};
pub use router_state::{dehydrate_router, hydrate_router, hydrate_router_stream};
pub use scope::{DecodeScope, EncodeScope};
pub use stream::{ChunkStream, Hydration, Serializer, deserialize, follow_ups};
