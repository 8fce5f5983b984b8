/* src/server/core/rust/src/lib.rs */

pub mod config;
pub mod dispatch;
pub mod errors;
pub mod fetcher;
pub mod middleware;
pub mod server;
pub mod server_fn;
pub mod ssr;
pub mod transport;

// Re-exports for ergonomic use
pub use config::{StartConfig, TrailingSlashSetting, load_config};
pub use dispatch::handle_server_fn;
pub use errors::{ServerFnError, StartError};
pub use fetcher::{Fetch, FetchRequest, InProcessFetch, ServerFnClient};
pub use middleware::{
  Method, Middleware, MiddlewareBuilder, Next, NextOptions, Stage, StageCtx, StageOutput, StageResult, execute,
  flatten,
};
pub use server::{StartParts, StartServer};
pub use server_fn::{ServerFnCtx, ServerFnDef, ServerFnRef, ServerFnRegistry};
pub use ssr::{DocumentRequest, DocumentResponse, render_document};
pub use transport::{
  CallOutput, FetchedResponse, PayloadMode, ResponseBody, ResponseKind, ServerFnRequest, ServerFnResponse,
};
pub use trellis_macros::server_fn;
pub use trellis_router::{BoxFuture, BoxStream, Value};
pub use trellis_serializer::{AdapterRegistry, Serializer};
pub use {trellis_injector, trellis_router, trellis_serializer};

#[cfg(test)]
extern crate self as trellis_server;

#[cfg(test)]
mod tests {
  use super::*;

  #[server_fn(name = "add_one", method = "GET")]
  async fn add_one(ctx: ServerFnCtx) -> Result<Value, ServerFnError> {
    let n = ctx.data.as_f64().ok_or_else(|| StartError::validation("expected a number"))?;
    Ok(Value::from(n + 1.0))
  }

  #[server_fn]
  async fn whoami(ctx: ServerFnCtx) -> Result<Value, ServerFnError> {
    Ok(ctx.context.get("user").cloned().unwrap_or_default())
  }

  #[tokio::test]
  async fn attribute_builds_definitions() {
    let def = add_one_server_fn();
    assert_eq!(def.id, "add_one");
    assert_eq!(def.method, Method::Get);
    let ctx = ServerFnCtx { data: Value::from(1.0), context: Value::empty_object(), method: Method::Get };
    assert_eq!((def.handler)(ctx).await, Ok(Value::from(2.0)));

    let def = whoami_server_fn();
    assert_eq!(def.name, "whoami");
    assert_eq!(def.method, Method::Post);
    let err = (add_one_server_fn().handler)(ServerFnCtx {
      data: Value::from("x"),
      context: Value::empty_object(),
      method: Method::Get,
    })
    .await
    .unwrap_err();
    assert_eq!(err, ServerFnError::Failed(StartError::validation("expected a number")));
  }
}
