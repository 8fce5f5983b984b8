/* src/server/core/rust/src/server_fn.rs */

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use trellis_router::{BoxFuture, Value};

use crate::errors::{ServerFnError, StartError};
use crate::middleware::{Method, Middleware};

/// Input handed to a server-function handler once its middleware has run.
#[derive(Clone, Debug)]
pub struct ServerFnCtx {
  pub data: Value,
  pub context: Value,
  pub method: Method,
}

pub type ServerFnHandler = Arc<dyn Fn(ServerFnCtx) -> BoxFuture<Result<Value, ServerFnError>> + Send + Sync>;

#[derive(Clone)]
pub struct ServerFnDef {
  pub id: String,
  pub name: String,
  pub method: Method,
  pub middleware: Vec<Middleware>,
  pub handler: ServerFnHandler,
}

impl ServerFnDef {
  /// The id defaults to `name`.
  pub fn new<F, Fut>(name: impl Into<String>, method: Method, handler: F) -> Self
  where
    F: Fn(ServerFnCtx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ServerFnError>> + Send + 'static,
  {
    let name = name.into();
    Self {
      id: name.clone(),
      name,
      method,
      middleware: Vec::new(),
      handler: Arc::new(move |ctx| Box::pin(handler(ctx))),
    }
  }

  pub fn with_id(mut self, id: impl Into<String>) -> Self {
    self.id = id.into();
    self
  }

  pub fn middleware(mut self, middleware: impl IntoIterator<Item = Middleware>) -> Self {
    self.middleware.extend(middleware);
    self
  }

  /// What a caller needs to invoke this function remotely.
  pub fn reference(&self) -> ServerFnRef {
    ServerFnRef { id: self.id.clone(), method: self.method, middleware: self.middleware.clone() }
  }
}

impl std::fmt::Debug for ServerFnDef {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ServerFnDef")
      .field("id", &self.id)
      .field("name", &self.name)
      .field("method", &self.method)
      .field("middleware", &self.middleware)
      .finish_non_exhaustive()
  }
}

/// Client-side handle of a server function.
#[derive(Clone, Debug)]
pub struct ServerFnRef {
  pub id: String,
  pub method: Method,
  pub middleware: Vec<Middleware>,
}

#[derive(Clone, Default)]
pub struct ServerFnRegistry {
  by_id: HashMap<String, Arc<ServerFnDef>>,
}

impl ServerFnRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&mut self, def: ServerFnDef) -> Result<(), StartError> {
    if self.by_id.contains_key(&def.id) {
      return Err(StartError::internal(format!("server function id '{}' is registered twice", def.id)));
    }
    self.by_id.insert(def.id.clone(), Arc::new(def));
    Ok(())
  }

  pub fn get(&self, id: &str) -> Option<&Arc<ServerFnDef>> {
    self.by_id.get(id)
  }

  pub fn ids(&self) -> Vec<&str> {
    let mut ids: Vec<&str> = self.by_id.keys().map(String::as_str).collect();
    ids.sort_unstable();
    ids
  }

  pub fn len(&self) -> usize {
    self.by_id.len()
  }

  pub fn is_empty(&self) -> bool {
    self.by_id.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn echo(name: &str) -> ServerFnDef {
    ServerFnDef::new(name, Method::Post, |ctx| async move { Ok(ctx.data) })
  }

  #[test]
  fn id_defaults_to_name() {
    let def = echo("greet");
    assert_eq!(def.id, "greet");
    assert_eq!(echo("greet").with_id("src/greet.rs#greet").id, "src/greet.rs#greet");
  }

  #[test]
  fn duplicate_ids_are_rejected() {
    let mut registry = ServerFnRegistry::new();
    registry.register(echo("a")).unwrap();
    registry.register(echo("b")).unwrap();
    let err = registry.register(echo("a")).unwrap_err();
    assert!(err.message().contains("'a'"));
    assert_eq!(registry.ids(), vec!["a", "b"]);
  }

  #[tokio::test]
  async fn handler_is_callable_through_the_registry() {
    let mut registry = ServerFnRegistry::new();
    registry.register(echo("echo")).unwrap();
    let def = registry.get("echo").unwrap();
    let ctx = ServerFnCtx { data: Value::from("hi"), context: Value::empty_object(), method: Method::Post };
    assert_eq!((def.handler)(ctx).await, Ok(Value::from("hi")));
  }
}
