/* src/server/adapter/axum/src/lib.rs */

mod error;
mod handler;

pub use error::AxumError;
/// Re-export trellis-server core for convenience
pub use trellis_server;
use trellis_server::{StartError, StartParts, StartServer};

/// Extension trait that converts a `StartServer` into an Axum router.
pub trait IntoAxumRouter {
  fn into_axum_router(self) -> Result<axum::Router, StartError>;
  fn serve(
    self,
    addr: &str,
  ) -> impl std::future::Future<Output = Result<(), Box<dyn std::error::Error>>> + Send;
}

impl IntoAxumRouter for StartServer {
  fn into_axum_router(self) -> Result<axum::Router, StartError> {
    self.into_parts().map(handler::build_router)
  }

  async fn serve(self, addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    self.into_parts()?.serve(addr).await
  }
}

impl IntoAxumRouter for StartParts {
  fn into_axum_router(self) -> Result<axum::Router, StartError> {
    Ok(handler::build_router(self))
  }

  async fn serve(self, addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let server_fns = self.server_fns.len();
    let router = handler::build_router(self);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, server_fns, "Trellis server running on http://localhost:{}", local_addr.port());
    axum::serve(listener, router).await?;
    Ok(())
  }
}
