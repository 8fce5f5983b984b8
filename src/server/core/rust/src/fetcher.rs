/* src/server/core/rust/src/fetcher.rs */

//! Calling server functions from the client side of the wire.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt, stream};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use trellis_router::{BoxFuture, Value};
use trellis_serializer::{FormData, FrameLimits, Serializer};

use crate::errors::{ServerFnError, StartError};
use crate::middleware::{Method, Middleware, Stage, StageCtx, StageOutput, Terminal, execute, flatten};
use crate::server::StartParts;
use crate::server_fn::ServerFnRef;
use crate::transport::{
  CONTENT_TYPE_FORM, CONTENT_TYPE_JSON, CallOutput, FetchedResponse, PAYLOAD_MODE_HEADER, Payload, PayloadMode,
  ResponseBody, SERVER_FN_HEADER, ServerFnRequest, ServerFnResponse, decode_response, encode_form, encode_payload,
  payload_query,
};

/// Characters kept verbatim in a function id path segment.
const ID_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

#[derive(Clone, Debug)]
pub struct FetchRequest {
  pub method: Method,
  pub url: String,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
}

impl FetchRequest {
  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
  }
}

/// HTTP transport used by [`ServerFnClient`].
pub trait Fetch: Send + Sync {
  fn fetch(&self, req: FetchRequest) -> BoxFuture<Result<FetchedResponse, StartError>>;
}

#[derive(Clone)]
pub struct ServerFnClient {
  base: String,
  fetch: Arc<dyn Fetch>,
  serializer: Serializer,
  middleware: Vec<Middleware>,
  limits: FrameLimits,
}

impl ServerFnClient {
  pub fn new(base: impl Into<String>, fetch: Arc<dyn Fetch>) -> Self {
    Self {
      base: base.into(),
      fetch,
      serializer: Serializer::default(),
      middleware: Vec::new(),
      limits: FrameLimits::default(),
    }
  }

  pub fn serializer(mut self, serializer: Serializer) -> Self {
    self.serializer = serializer;
    self
  }

  /// Client stages that run before every call's own middleware.
  pub fn middleware(mut self, middleware: Middleware) -> Self {
    self.middleware.push(middleware);
    self
  }

  pub fn limits(mut self, limits: FrameLimits) -> Self {
    self.limits = limits;
    self
  }

  pub fn url_for(&self, id: &str) -> String {
    format!("{}/{}", self.base.trim_end_matches('/'), utf8_percent_encode(id, ID_SEGMENT))
  }

  /// Run the client stages, send the call, and merge the context the server
  /// stages sent back into the caller's context.
  pub async fn call(&self, function: &ServerFnRef, data: Value, context: Value) -> Result<CallOutput, ServerFnError> {
    let chain = flatten([self.middleware.as_slice(), function.middleware.as_slice()]);
    let ctx = StageCtx::new(function.id.clone(), function.method, data).with_context(&context);
    let out = execute(&chain, Stage::Client, ctx, self.transport_terminal()).await?;
    Ok(CallOutput { result: out.result, context: out.context })
  }

  fn transport_terminal(&self) -> Terminal {
    let client = self.clone();
    Arc::new(move |ctx: StageCtx| {
      let client = client.clone();
      Box::pin(async move {
        let req = client.build_request(&ctx)?;
        tracing::debug!(function = %ctx.target, method = %ctx.method.as_str(), "calling server function");
        let response = client.fetch.fetch(req).await?;
        let output = decode_response(&client.serializer, &ctx.target, response, client.limits).await?;
        Ok(StageOutput {
          context: ctx.context.merge(&output.context),
          send_context: Value::empty_object(),
          result: output.result,
        })
      })
    })
  }

  fn build_request(&self, ctx: &StageCtx) -> Result<FetchRequest, StartError> {
    let url = self.url_for(&ctx.target);
    let mut headers = vec![(SERVER_FN_HEADER.to_string(), "true".to_string())];

    if let Some(form) = ctx.data.downcast_ref::<FormData>() {
      if ctx.method == Method::Get {
        return Err(StartError::validation("form data must be sent with POST"));
      }
      let body = encode_form(&self.serializer, &ctx.target, form, &ctx.send_context)?;
      headers.push((PAYLOAD_MODE_HEADER.to_string(), PayloadMode::FormData.as_str().to_string()));
      headers.push(("content-type".to_string(), CONTENT_TYPE_FORM.to_string()));
      return Ok(FetchRequest { method: Method::Post, url, headers, body: Bytes::from(body) });
    }

    let payload = Payload::new(ctx.data.clone(), ctx.send_context.clone());
    let chunk = encode_payload(&self.serializer, &ctx.target, &payload)?;
    headers.push((PAYLOAD_MODE_HEADER.to_string(), PayloadMode::Payload.as_str().to_string()));
    match ctx.method {
      Method::Get => {
        let url = format!("{url}?{}", payload_query(&chunk)?);
        Ok(FetchRequest { method: Method::Get, url, headers, body: Bytes::new() })
      }
      Method::Post => {
        headers.push(("content-type".to_string(), CONTENT_TYPE_JSON.to_string()));
        Ok(FetchRequest { method: Method::Post, url, headers, body: Bytes::from(chunk) })
      }
    }
  }
}

/// Dispatches straight into a [`StartParts`] without a network hop.
pub struct InProcessFetch {
  parts: Arc<StartParts>,
}

impl InProcessFetch {
  pub fn new(parts: Arc<StartParts>) -> Self {
    Self { parts }
  }
}

impl Fetch for InProcessFetch {
  fn fetch(&self, req: FetchRequest) -> BoxFuture<Result<FetchedResponse, StartError>> {
    let parts = Arc::clone(&self.parts);
    Box::pin(async move {
      let base = parts.config.server_fn.base.trim_end_matches('/').to_string();
      let (path, query) = match req.url.split_once('?') {
        Some((path, query)) => (path, Some(query.to_string())),
        None => (req.url.as_str(), None),
      };
      let encoded_id = path
        .strip_prefix(base.as_str())
        .and_then(|rest| rest.strip_prefix('/'))
        .ok_or_else(|| StartError::not_found(format!("{path} is not a server function url")))?;
      let function_id = percent_decode_str(encoded_id)
        .decode_utf8()
        .map_err(|_| StartError::validation("server function id is not UTF-8"))?
        .into_owned();
      let mode = match req.header(PAYLOAD_MODE_HEADER) {
        Some(raw) => PayloadMode::parse(raw)
          .ok_or_else(|| StartError::validation(format!("unknown payload mode '{raw}'")))?,
        None => PayloadMode::Payload,
      };
      let request = ServerFnRequest {
        method: req.method,
        function_id,
        mode,
        query,
        content_type: req.header("content-type").map(str::to_string),
        body: req.body.clone(),
      };
      let response = crate::dispatch::handle_server_fn(&parts, request).await;
      Ok(into_fetched(response))
    })
  }
}

fn into_fetched(response: ServerFnResponse) -> FetchedResponse {
  let body = match response.body {
    ResponseBody::Full(bytes) => stream::once(async move { Ok(bytes) }).boxed(),
    ResponseBody::Framed(frames) => frames.map_err(|e| e.to_string()).boxed(),
  };
  FetchedResponse {
    status: response.status,
    kind: Some(response.kind),
    content_type: response.content_type.to_string(),
    body,
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use trellis_router::{Deferred, Route, RouteTree};

  use super::*;
  use crate::middleware::NextOptions;
  use crate::server::StartServer;
  use crate::server_fn::ServerFnDef;

  /// Client middleware sends a trace id; server middleware echoes it back
  /// under a different key.
  fn tracing_pair() -> Middleware {
    Middleware::builder("trace")
      .client(|ctx, next| async move {
        let send = Value::object([("traceId", Value::from("t-42"))]);
        next.run_with(ctx, NextOptions::default().send_context(send)).await
      })
      .server(|ctx, next| async move {
        let seen = ctx.context.get("traceId").cloned().unwrap_or_default();
        let send = Value::object([("serverSaw", seen)]);
        next.run_with(ctx, NextOptions::default().send_context(send)).await
      })
      .build()
  }

  fn echo_context(name: &str, method: Method) -> ServerFnDef {
    ServerFnDef::new(name, method, |ctx| async move {
      Ok(Value::object([
        ("data", ctx.data),
        ("traceId", ctx.context.get("traceId").cloned().unwrap_or_default()),
      ]))
    })
    .middleware([tracing_pair()])
  }

  fn setup(server: impl FnOnce(StartServer) -> StartServer) -> (ServerFnClient, Arc<StartParts>) {
    let tree = Arc::new(RouteTree::build(Route::root()).unwrap());
    let parts = Arc::new(server(StartServer::new(tree)).into_parts().unwrap());
    let client = ServerFnClient::new("/_serverFn", Arc::new(InProcessFetch::new(Arc::clone(&parts))));
    (client, parts)
  }

  #[tokio::test]
  async fn send_context_round_trips_over_get_and_post() {
    let get = echo_context("read", Method::Get);
    let post = echo_context("write", Method::Post);
    let (get_ref, post_ref) = (get.reference(), post.reference());
    let (client, _) = setup(|s| s.server_fn(get).server_fn(post));

    for function in [&get_ref, &post_ref] {
      let out = client.call(function, Value::from(7.0), Value::object([("local", Value::from(1.0))])).await.unwrap();
      assert_eq!(out.result.get("data"), Some(&Value::from(7.0)), "{}", function.id);
      assert_eq!(out.result.get("traceId"), Some(&Value::from("t-42")), "{}", function.id);
      assert_eq!(out.context.get("serverSaw"), Some(&Value::from("t-42")), "{}", function.id);
      assert_eq!(out.context.get("local"), Some(&Value::from(1.0)), "{}", function.id);
    }
  }

  #[derive(Default)]
  struct Recording {
    requests: Mutex<Vec<FetchRequest>>,
    inner: Option<InProcessFetch>,
  }

  impl Fetch for Recording {
    fn fetch(&self, req: FetchRequest) -> BoxFuture<Result<FetchedResponse, StartError>> {
      self.requests.lock().unwrap().push(req.clone());
      match &self.inner {
        Some(inner) => inner.fetch(req),
        None => Box::pin(async { Err(StartError::internal("offline")) }),
      }
    }
  }

  #[tokio::test]
  async fn get_travels_in_the_query_and_post_in_the_body() {
    let get = echo_context("src/posts.rs#read", Method::Get);
    let post = echo_context("write", Method::Post);
    let (get_ref, post_ref) = (get.reference(), post.reference());
    let (_, parts) = setup(|s| s.server_fn(get).server_fn(post));
    let recording = Arc::new(Recording { inner: Some(InProcessFetch::new(parts)), ..Default::default() });
    let client = ServerFnClient::new("/_serverFn", Arc::clone(&recording) as Arc<dyn Fetch>);

    client.call(&get_ref, Value::Null, Value::empty_object()).await.unwrap();
    client.call(&post_ref, Value::Null, Value::empty_object()).await.unwrap();
    let requests = recording.requests.lock().unwrap();
    assert!(requests[0].url.starts_with("/_serverFn/src%2Fposts.rs%23read?payload="));
    assert!(requests[0].body.is_empty());
    assert_eq!(requests[1].url, "/_serverFn/write");
    assert!(!requests[1].body.is_empty());
    assert_eq!(requests[1].header(PAYLOAD_MODE_HEADER), Some("payload"));
  }

  #[tokio::test]
  async fn transport_failures_surface_as_errors() {
    let client = ServerFnClient::new("/_serverFn", Arc::new(Recording::default()));
    let function = ServerFnRef { id: "x".into(), method: Method::Post, middleware: Vec::new() };
    let err = client.call(&function, Value::Null, Value::empty_object()).await.unwrap_err();
    assert_eq!(err, ServerFnError::Failed(StartError::internal("offline")));
  }

  #[tokio::test]
  async fn redirects_reach_the_caller_as_signals() {
    let def = ServerFnDef::new("gate", Method::Post, |_| async { Err(ServerFnError::redirect("/login")) });
    let function = def.reference();
    let (client, _) = setup(|s| s.server_fn(def));
    let err = client.call(&function, Value::Null, Value::empty_object()).await.unwrap_err();
    let ServerFnError::Redirect(redirect) = err else { panic!("expected a redirect") };
    assert_eq!(redirect.to.as_deref(), Some("/login"));
  }

  #[tokio::test]
  async fn form_data_posts_fields() {
    let def = ServerFnDef::new("signup", Method::Post, |ctx| async move {
      let form = ctx.data.downcast_ref::<FormData>().cloned().unwrap_or_default();
      Ok(Value::from(form.0.len() as f64))
    })
    .middleware([tracing_pair()]);
    let function = def.reference();
    let (client, _) = setup(|s| s.server_fn(def));
    let form = FormData(vec![("email".into(), "a@b.c".into()), ("name".into(), "Ada".into())]);
    let out = client.call(&function, Value::opaque(form), Value::empty_object()).await.unwrap();
    assert_eq!(out.result, Value::from(2.0));
    assert_eq!(out.context.get("serverSaw"), Some(&Value::from("t-42")));
  }

  #[tokio::test]
  async fn deferred_results_keep_settling_after_the_call() {
    let def = ServerFnDef::new("slow", Method::Post, |_| async {
      Ok(Value::object([("later", Value::Deferred(Deferred::resolved(Value::from("done"))))]))
    });
    let function = def.reference();
    let (client, _) = setup(|s| s.server_fn(def));
    let out = client.call(&function, Value::Null, Value::empty_object()).await.unwrap();
    let Some(Value::Deferred(later)) = out.result.get("later").cloned() else { panic!("expected a deferred") };
    assert_eq!(later.settled().await, Ok(Value::from("done")));
  }
}
