/* src/router/core/rust/src/lib.rs */

pub mod actions;
pub mod dehydrate;
pub mod errors;
pub mod history;
pub mod location;
pub mod matches;
pub mod navigation;
pub mod path;
pub mod route;
pub mod scroll;
pub mod store;
pub mod tree;
pub mod value;

use std::future::Future;
use std::pin::Pin;

use futures_core::Stream;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

// Public API re-exports
pub use actions::{
  Action, ActionClient, ActionError, ActionState, Clock, Submission, SubmissionStatus, SystemClock,
};
pub use dehydrate::{DehydratedMatch, DehydratedRouter};
pub use errors::{
  LoaderError, NotFound, Redirect, RouteError, RouteTreeError, ValidationError, is_external_href,
};
pub use history::{History, HistoryEntry, MemoryHistory};
pub use location::{Location, SearchUpdate};
pub use matches::{Match, MatchStatus, Params};
pub use navigation::{
  NavigateOptions, NavigationOutcome, Router, RouterEvent, RouterEventKind, RouterOptions,
};
pub use path::TrailingSlash;
pub use route::{BeforeLoadCtx, ContextCtx, LoadCause, LoaderCtx, Route, RouteNode, SsrMode};
pub use scroll::{ScrollAction, ScrollIntoViewOptions, ScrollPosition, ScrollRestoration, Viewport};
pub use store::{RouterState, RouterStatus, Store, StructuralShare, Subscription};
pub use tree::{MatchedRoutes, RouteTree};
pub use value::{
  Deferred, DeferredResult, Map, Opaque, RawStream, StreamHint, Value, opaque_eq, replace_equal_deep,
};
