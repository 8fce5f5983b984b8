/* src/server/core/rust/src/middleware.rs */

//! Onion-style middleware shared by server functions and document requests.
//!
//! A call assembles its chain from up to three tiers (global, route,
//! function). [`flatten`] expands dependencies and drops repeated instances so
//! each middleware runs once, at its earliest position.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use trellis_router::{BoxFuture, Value};

use crate::errors::ServerFnError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Method {
  Get,
  #[default]
  Post,
}

impl Method {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Get => "GET",
      Self::Post => "POST",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Some(Self::Get),
      "POST" => Some(Self::Post),
      _ => None,
    }
  }
}

/// Which side of a call a stage runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
  Client,
  Server,
}

/// What a stage receives: the call target, its input, and the context
/// accumulated by the stages before it.
#[derive(Clone, Debug)]
pub struct StageCtx {
  /// Server-function id, or the request href for document requests.
  pub target: String,
  pub method: Method,
  pub data: Value,
  pub context: Value,
  /// Values destined for the other side of the call.
  pub send_context: Value,
}

impl StageCtx {
  pub fn new(target: impl Into<String>, method: Method, data: Value) -> Self {
    Self {
      target: target.into(),
      method,
      data,
      context: Value::empty_object(),
      send_context: Value::empty_object(),
    }
  }

  pub fn with_context(mut self, context: &Value) -> Self {
    self.context = self.context.merge(context);
    self
  }
}

/// Context additions passed to [`Next::run_with`]. Both merge shallowly; the
/// new keys win.
#[derive(Clone, Debug, Default)]
pub struct NextOptions {
  pub context: Option<Value>,
  pub send_context: Option<Value>,
}

impl NextOptions {
  pub fn context(mut self, context: Value) -> Self {
    self.context = Some(context);
    self
  }

  pub fn send_context(mut self, send_context: Value) -> Self {
    self.send_context = Some(send_context);
    self
  }
}

/// Result travelling back out through the chain.
#[derive(Clone, Debug, PartialEq)]
pub struct StageOutput {
  pub context: Value,
  pub send_context: Value,
  pub result: Value,
}

pub type StageResult = Result<StageOutput, ServerFnError>;

pub type StageFn = Arc<dyn Fn(StageCtx, Next) -> BoxFuture<StageResult> + Send + Sync>;

/// Innermost step, reached once every stage has called `next`.
pub type Terminal = Arc<dyn Fn(StageCtx) -> BoxFuture<StageResult> + Send + Sync>;

/// Continuation handed to each stage.
pub struct Next {
  stages: Arc<[StageFn]>,
  index: usize,
  terminal: Terminal,
}

impl Next {
  pub fn new(stages: Vec<StageFn>, terminal: Terminal) -> Self {
    Self { stages: stages.into(), index: 0, terminal }
  }

  pub fn run(self, ctx: StageCtx) -> BoxFuture<StageResult> {
    match self.stages.get(self.index).cloned() {
      Some(stage) => {
        let next = Next { stages: Arc::clone(&self.stages), index: self.index + 1, terminal: self.terminal };
        stage(ctx, next)
      }
      None => (self.terminal)(ctx),
    }
  }

  pub fn run_with(self, mut ctx: StageCtx, opts: NextOptions) -> BoxFuture<StageResult> {
    if let Some(context) = &opts.context {
      ctx.context = ctx.context.merge(context);
    }
    if let Some(send) = &opts.send_context {
      ctx.send_context = ctx.send_context.merge(send);
    }
    self.run(ctx)
  }
}

struct MiddlewareInner {
  name: String,
  dependencies: Vec<Middleware>,
  client: Option<StageFn>,
  server: Option<StageFn>,
}

/// A shareable middleware instance. Clones keep the same identity, which is
/// what deduplication compares.
#[derive(Clone)]
pub struct Middleware {
  inner: Arc<MiddlewareInner>,
}

impl Middleware {
  pub fn builder(name: impl Into<String>) -> MiddlewareBuilder {
    MiddlewareBuilder { name: name.into(), dependencies: Vec::new(), client: None, server: None }
  }

  pub fn name(&self) -> &str {
    &self.inner.name
  }

  pub fn dependencies(&self) -> &[Middleware] {
    &self.inner.dependencies
  }

  pub fn ptr_eq(&self, other: &Middleware) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner)
  }

  fn stage(&self, stage: Stage) -> Option<&StageFn> {
    match stage {
      Stage::Client => self.inner.client.as_ref(),
      Stage::Server => self.inner.server.as_ref(),
    }
  }

  fn key(&self) -> usize {
    Arc::as_ptr(&self.inner) as usize
  }
}

impl std::fmt::Debug for Middleware {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Middleware")
      .field("name", &self.inner.name)
      .field("dependencies", &self.inner.dependencies.len())
      .field("client", &self.inner.client.is_some())
      .field("server", &self.inner.server.is_some())
      .finish()
  }
}

pub struct MiddlewareBuilder {
  name: String,
  dependencies: Vec<Middleware>,
  client: Option<StageFn>,
  server: Option<StageFn>,
}

fn stage_fn<F, Fut>(f: F) -> StageFn
where
  F: Fn(StageCtx, Next) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = StageResult> + Send + 'static,
{
  Arc::new(move |ctx, next| Box::pin(f(ctx, next)))
}

impl MiddlewareBuilder {
  pub fn dependency(mut self, middleware: Middleware) -> Self {
    self.dependencies.push(middleware);
    self
  }

  pub fn dependencies(mut self, middleware: impl IntoIterator<Item = Middleware>) -> Self {
    self.dependencies.extend(middleware);
    self
  }

  /// Stage run by the caller before the request is sent.
  pub fn client<F, Fut>(mut self, f: F) -> Self
  where
    F: Fn(StageCtx, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StageResult> + Send + 'static,
  {
    self.client = Some(stage_fn(f));
    self
  }

  pub fn server<F, Fut>(mut self, f: F) -> Self
  where
    F: Fn(StageCtx, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StageResult> + Send + 'static,
  {
    self.server = Some(stage_fn(f));
    self
  }

  pub fn build(self) -> Middleware {
    Middleware {
      inner: Arc::new(MiddlewareInner {
        name: self.name,
        dependencies: self.dependencies,
        client: self.client,
        server: self.server,
      }),
    }
  }
}

/// Expand dependencies (before their dependents) and keep only the first
/// occurrence of each instance, in tier order.
pub fn flatten<'a>(tiers: impl IntoIterator<Item = &'a [Middleware]>) -> Vec<Middleware> {
  let mut seen = HashSet::new();
  let mut out = Vec::new();
  for tier in tiers {
    for middleware in tier {
      visit(middleware, &mut seen, &mut out);
    }
  }
  out
}

fn visit(middleware: &Middleware, seen: &mut HashSet<usize>, out: &mut Vec<Middleware>) {
  // marked before recursing so dependency cycles terminate
  if !seen.insert(middleware.key()) {
    return;
  }
  for dep in middleware.dependencies() {
    visit(dep, seen, out);
  }
  out.push(middleware.clone());
}

/// Run the `stage` half of every middleware in `chain` around `terminal`.
pub async fn execute(chain: &[Middleware], stage: Stage, ctx: StageCtx, terminal: Terminal) -> StageResult {
  let stages: Vec<StageFn> = chain.iter().filter_map(|m| m.stage(stage)).cloned().collect();
  tracing::trace!(target_id = %ctx.target, ?stage, stages = stages.len(), "running middleware");
  let result = Next::new(stages, terminal).run(ctx).await;
  if let Err(ServerFnError::Failed(err)) = &result {
    tracing::error!(error = %err, ?stage, "middleware chain failed");
  }
  result
}

/// Terminal that echoes the accumulated context with `result`.
pub fn respond_with(result: Value) -> Terminal {
  Arc::new(move |ctx: StageCtx| {
    let result = result.clone();
    Box::pin(async move { Ok(StageOutput { context: ctx.context, send_context: ctx.send_context, result }) })
  })
}

#[cfg(test)]
mod tests {
  use parking_lot::Mutex;

  use super::*;
  use crate::errors::StartError;

  fn named(name: &str) -> Middleware {
    Middleware::builder(name).build()
  }

  fn names(chain: &[Middleware]) -> Vec<&str> {
    chain.iter().map(Middleware::name).collect()
  }

  /// Server stage that bumps `count` and records its name.
  fn counting(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Middleware {
    let log = Arc::clone(log);
    Middleware::builder(name)
      .server(move |ctx, next| {
        log.lock().push(name);
        let count = ctx.context.get("count").and_then(Value::as_f64).unwrap_or(0.0);
        let extra = Value::object([("count", Value::from(count + 1.0)), (name, Value::from(true))]);
        next.run_with(ctx, NextOptions::default().context(extra))
      })
      .build()
  }

  #[test]
  fn dependencies_come_first() {
    let auth = named("auth");
    let logging = named("logging");
    let admin = Middleware::builder("admin").dependencies([auth.clone(), logging.clone()]).build();
    assert_eq!(names(&flatten([&[admin][..]])), vec!["auth", "logging", "admin"]);
  }

  #[test]
  fn duplicates_keep_their_earliest_position() {
    let a = named("a");
    let b = named("b");
    let c = Middleware::builder("c").dependency(a.clone()).build();
    let global = vec![b.clone(), a.clone()];
    let route = vec![c.clone(), b.clone()];
    let function = vec![a.clone(), named("d")];
    let chain = flatten([&global[..], &route[..], &function[..]]);
    assert_eq!(names(&chain), vec!["b", "a", "c", "d"]);
  }

  #[test]
  fn same_name_different_instance_both_run() {
    let chain = flatten([&[named("x"), named("x")][..]]);
    assert_eq!(chain.len(), 2);
  }

  #[test]
  fn dependency_cycles_terminate() {
    let a = named("a");
    let b = Middleware::builder("b").dependency(a.clone()).build();
    let c = Middleware::builder("c").dependencies([b.clone(), b]).build();
    assert_eq!(names(&flatten([&[c, a][..]])), vec!["a", "b", "c"]);
  }

  #[tokio::test]
  async fn shared_instance_runs_once() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let shared = counting("shared", &log);
    let own = counting("own", &log);
    let global = vec![shared.clone()];
    let function = vec![shared, own];
    let chain = flatten([&global[..], &function[..]]);

    let ctx = StageCtx::new("fn", Method::Post, Value::Null);
    let out = execute(&chain, Stage::Server, ctx, respond_with(Value::from("done"))).await.unwrap();
    assert_eq!(*log.lock(), vec!["shared", "own"]);
    assert_eq!(out.context.get("count"), Some(&Value::from(2.0)));
    assert_eq!(out.result, Value::from("done"));
  }

  #[tokio::test]
  async fn later_context_wins_conflicts() {
    let first = Middleware::builder("first")
      .server(|ctx, next| {
        let extra = Value::object([("who", Value::from("first")), ("a", Value::from(1.0))]);
        next.run_with(ctx, NextOptions::default().context(extra))
      })
      .build();
    let second = Middleware::builder("second")
      .server(|ctx, next| {
        let seen_a = ctx.context.get("a").cloned().unwrap_or_default();
        let extra = Value::object([("who", Value::from("second")), ("saw", seen_a)]);
        next.run_with(ctx, NextOptions::default().context(extra))
      })
      .build();
    let ctx = StageCtx::new("fn", Method::Get, Value::Null);
    let out = execute(&[first, second], Stage::Server, ctx, respond_with(Value::Null)).await.unwrap();
    assert_eq!(out.context.get("who"), Some(&Value::from("second")));
    assert_eq!(out.context.get("saw"), Some(&Value::from(1.0)));
  }

  #[tokio::test]
  async fn stages_are_picked_by_side() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let (c, s) = (Arc::clone(&log), Arc::clone(&log));
    let both = Middleware::builder("both")
      .client(move |ctx, next| {
        c.lock().push("client");
        next.run_with(ctx, NextOptions::default().send_context(Value::object([("token", Value::from("t"))])))
      })
      .server(move |ctx, next| {
        s.lock().push("server");
        next.run(ctx)
      })
      .build();
    let ctx = StageCtx::new("fn", Method::Post, Value::Null);
    let out = execute(&[both], Stage::Client, ctx, respond_with(Value::Null)).await.unwrap();
    assert_eq!(*log.lock(), vec!["client"]);
    assert_eq!(out.send_context.get("token"), Some(&Value::from("t")));
  }

  #[tokio::test]
  async fn errors_short_circuit_the_rest() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let failing = Middleware::builder("failing")
      .server(|_, _| async { Err(StartError::middleware("boom").into()) })
      .build();
    let after = counting("after", &log);
    let ctx = StageCtx::new("fn", Method::Post, Value::Null);
    let err = execute(&[failing, after], Stage::Server, ctx, respond_with(Value::Null)).await.unwrap_err();
    assert_eq!(err, ServerFnError::Failed(StartError::middleware("boom")));
    assert!(log.lock().is_empty());
  }

  #[test]
  fn method_parsing() {
    assert_eq!(Method::parse("get"), Some(Method::Get));
    assert_eq!(Method::parse("POST"), Some(Method::Post));
    assert_eq!(Method::parse("PUT"), None);
    assert_eq!(Method::Get.as_str(), "GET");
  }
}
