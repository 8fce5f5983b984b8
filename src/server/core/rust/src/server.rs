/* src/server/core/rust/src/server.rs */

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use trellis_router::{RouteTree, RouterOptions};
use trellis_serializer::{AdapterRegistry, Serializer};

use crate::config::StartConfig;
use crate::errors::StartError;
use crate::middleware::Middleware;
use crate::server_fn::{ServerFnDef, ServerFnRegistry};

const DEFAULT_SHELL: &str = "<!DOCTYPE html><html><head></head><body><div id=\"app\"></div></body></html>";

/// Framework-agnostic parts extracted from [`StartServer`].
/// Adapter crates consume this to build framework-specific routers.
pub struct StartParts {
  pub tree: Arc<RouteTree>,
  pub router_options: RouterOptions,
  pub config: StartConfig,
  pub server_fns: ServerFnRegistry,
  /// Runs for every document request and every server-function call.
  pub request_middleware: Vec<Middleware>,
  /// Runs for every server-function call, before the function's own.
  pub function_middleware: Vec<Middleware>,
  /// Keyed by route id.
  pub route_middleware: HashMap<String, Vec<Middleware>>,
  pub serializer: Serializer,
  pub shell: String,
  requests: AtomicU64,
}

impl StartParts {
  /// Fresh serializer scope id for one document request.
  pub fn next_scope_id(&self) -> String {
    format!("req-{}", self.requests.fetch_add(1, Ordering::Relaxed))
  }

  pub fn route_middleware_for<'a>(&'a self, route_ids: impl IntoIterator<Item = &'a str>) -> Vec<&'a [Middleware]> {
    route_ids
      .into_iter()
      .filter_map(|id| self.route_middleware.get(id))
      .map(Vec::as_slice)
      .collect()
  }

  /// Router options with the `[router]` config section applied.
  pub fn server_router_options(&self) -> RouterOptions {
    RouterOptions { is_server: true, ..self.config.router_options(self.router_options.clone()) }
  }
}

pub struct StartServer {
  tree: Arc<RouteTree>,
  router_options: RouterOptions,
  config: StartConfig,
  server_fns: Vec<ServerFnDef>,
  request_middleware: Vec<Middleware>,
  function_middleware: Vec<Middleware>,
  route_middleware: HashMap<String, Vec<Middleware>>,
  adapters: Option<AdapterRegistry>,
  shell: String,
}

impl StartServer {
  pub fn new(tree: Arc<RouteTree>) -> Self {
    Self {
      tree,
      router_options: RouterOptions::default(),
      config: StartConfig::default(),
      server_fns: Vec::new(),
      request_middleware: Vec::new(),
      function_middleware: Vec::new(),
      route_middleware: HashMap::new(),
      adapters: None,
      shell: DEFAULT_SHELL.to_string(),
    }
  }

  pub fn router_options(mut self, options: RouterOptions) -> Self {
    self.router_options = options;
    self
  }

  pub fn config(mut self, config: StartConfig) -> Self {
    self.config = config;
    self
  }

  pub fn server_fn(mut self, def: ServerFnDef) -> Self {
    self.server_fns.push(def);
    self
  }

  pub fn request_middleware(mut self, middleware: Middleware) -> Self {
    self.request_middleware.push(middleware);
    self
  }

  pub fn function_middleware(mut self, middleware: Middleware) -> Self {
    self.function_middleware.push(middleware);
    self
  }

  pub fn route_middleware(mut self, route_id: impl Into<String>, middleware: Middleware) -> Self {
    self.route_middleware.entry(route_id.into()).or_default().push(middleware);
    self
  }

  pub fn adapters(mut self, registry: AdapterRegistry) -> Self {
    self.adapters = Some(registry);
    self
  }

  /// HTML document the dehydrated state is injected into.
  pub fn shell(mut self, html: impl Into<String>) -> Self {
    self.shell = html.into();
    self
  }

  /// Consume the builder, returning framework-agnostic parts for an adapter.
  pub fn into_parts(self) -> Result<StartParts, StartError> {
    self.config.validate().map_err(|e| StartError::internal(format!("{e:#}")))?;
    for route_id in self.route_middleware.keys() {
      if self.tree.route(route_id).is_none() {
        return Err(StartError::internal(format!("middleware registered for unknown route '{route_id}'")));
      }
    }
    let mut server_fns = ServerFnRegistry::new();
    for def in self.server_fns {
      server_fns.register(def)?;
    }
    tracing::debug!(
      routes = self.tree.len(),
      server_fns = server_fns.len(),
      request_middleware = self.request_middleware.len(),
      "assembled server parts"
    );
    Ok(StartParts {
      tree: self.tree,
      router_options: self.router_options,
      config: self.config,
      server_fns,
      request_middleware: self.request_middleware,
      function_middleware: self.function_middleware,
      route_middleware: self.route_middleware,
      serializer: self.adapters.map(Serializer::new).unwrap_or_default(),
      shell: self.shell,
      requests: AtomicU64::new(0),
    })
  }
}
