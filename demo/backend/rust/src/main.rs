/* demo/backend/rust/src/main.rs */

mod routes;
mod server_fns;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use trellis_server::{Middleware, NextOptions, StartConfig, StartServer, Value, load_config};
use trellis_server_axum::IntoAxumRouter;

use server_fns::get_user::get_user_server_fn;
use server_fns::greet::greet_server_fn;

static REQUESTS: AtomicU64 = AtomicU64::new(0);

/// Tags every request with a sequential id in its context.
fn request_id() -> Middleware {
  Middleware::builder("requestId")
    .server(|ctx, next| async move {
      let id = REQUESTS.fetch_add(1, Ordering::Relaxed);
      tracing::debug!(target_id = %ctx.target, request_id = id, "request");
      let context = Value::object([("requestId", Value::from(id.to_string()))]);
      next.run_with(ctx, NextOptions::default().context(context)).await
    })
    .build()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  tracing_subscriber::registry()
    .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
    .with(tracing_subscriber::fmt::layer())
    .init();

  let config_path = Path::new("trellis.toml");
  let config = if config_path.exists() { load_config(config_path)? } else { StartConfig::default() };

  StartServer::new(routes::tree()?)
    .config(config)
    .request_middleware(request_id())
    .server_fn(greet_server_fn())
    .server_fn(get_user_server_fn())
    .serve("0.0.0.0:3000")
    .await
}
