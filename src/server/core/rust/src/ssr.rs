/* src/server/core/rust/src/ssr.rs */

//! Server-side document rendering: run request middleware, load the
//! matched routes, inline the dehydrated state, stream deferred data.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::{StreamExt, stream};
use parking_lot::Mutex;
use trellis_injector::inject_state;
use trellis_router::{
  MemoryHistory, NavigateOptions, NavigationOutcome, Params, Redirect, Router, RouterOptions, Value,
};
use trellis_serializer::{dehydrate_router, follow_ups, frame_stream};

use crate::errors::{ServerFnError, StartError};
use crate::middleware::{Method, Stage, StageCtx, StageOutput, Terminal, execute, flatten};
use crate::server::StartParts;
use crate::transport::ResponseBody;

pub const CONTENT_TYPE_HTML: &str = "text/html; charset=utf-8";
/// Serializer scope id the client needs to decode the inline state.
pub const SCOPE_HEADER: &str = "x-trellis-scope";

#[derive(Clone, Debug, Default)]
pub struct DocumentRequest {
  /// Path plus query and hash, e.g. `/posts/1?tab=comments`.
  pub href: String,
  pub headers: Vec<(String, String)>,
}

impl DocumentRequest {
  pub fn new(href: impl Into<String>) -> Self {
    Self { href: href.into(), headers: Vec::new() }
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
  }
}

#[derive(Debug)]
pub struct DocumentResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  /// `Full` when nothing is left to stream. `Framed` starts with the HTML
  /// document and continues with one frame per settled deferred value.
  pub body: ResponseBody,
}

impl DocumentResponse {
  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
  }

  fn redirect(status: u16, location: String) -> Self {
    Self {
      status,
      headers: vec![("location".to_string(), location)],
      body: ResponseBody::Full(Bytes::new()),
    }
  }

  fn error(err: &StartError) -> Self {
    Self {
      status: err.status(),
      headers: vec![("content-type".to_string(), "application/json".to_string())],
      body: ResponseBody::Full(Bytes::from(err.to_json().to_string())),
    }
  }
}

type Loaded = Arc<Mutex<Option<(Router, NavigationOutcome)>>>;

pub async fn render_document(parts: &StartParts, req: DocumentRequest) -> DocumentResponse {
  let options = parts.server_router_options();
  let probe = Router::new(Arc::clone(&parts.tree), Arc::new(MemoryHistory::new(&req.href)), options.clone());
  let location = probe.state().location.clone();
  let route_ids: Vec<String> = probe.match_routes(&location).into_iter().map(|m| m.route_id).collect();

  let mut tiers = vec![parts.request_middleware.as_slice()];
  tiers.extend(parts.route_middleware_for(route_ids.iter().map(String::as_str)));
  let chain = flatten(tiers);

  let loaded: Loaded = Arc::new(Mutex::new(None));
  let ctx = StageCtx::new(req.href.clone(), Method::Get, Value::Null).with_context(&options.context);
  let terminal = load_terminal(parts, &req.href, options, Arc::clone(&loaded));
  tracing::debug!(href = %req.href, middleware = chain.len(), "rendering document");

  match execute(&chain, Stage::Server, ctx, terminal).await {
    Ok(_) => {}
    Err(ServerFnError::Redirect(redirect)) => {
      return DocumentResponse::redirect(redirect.status_code, resolve_redirect(&probe, &redirect));
    }
    Err(ServerFnError::NotFound(_)) => {
      return DocumentResponse::error(&StartError::not_found(format!("{} not found", req.href)));
    }
    Err(ServerFnError::Failed(err)) => return DocumentResponse::error(&err),
  }

  let Some((router, outcome)) = loaded.lock().take() else {
    // a middleware answered without calling next
    return DocumentResponse::error(&StartError::middleware("request middleware did not continue the chain"));
  };
  match outcome {
    NavigationOutcome::Redirected(redirect) => {
      DocumentResponse::redirect(redirect.status_code, resolve_redirect(&router, &redirect))
    }
    NavigationOutcome::ReloadDocument(href) => DocumentResponse::redirect(307, href),
    NavigationOutcome::RedirectLimit(href) => {
      DocumentResponse::error(&StartError::internal(format!("too many redirects while rendering {href}")))
    }
    NavigationOutcome::Committed { .. } | NavigationOutcome::Superseded => stream_document(parts, &router),
  }
}

fn load_terminal(parts: &StartParts, href: &str, options: RouterOptions, loaded: Loaded) -> Terminal {
  let tree = Arc::clone(&parts.tree);
  let href = href.to_string();
  Arc::new(move |ctx: StageCtx| {
    let options = RouterOptions { context: ctx.context.clone(), ..options.clone() };
    let router = Router::new(Arc::clone(&tree), Arc::new(MemoryHistory::new(&href)), options);
    let loaded = Arc::clone(&loaded);
    Box::pin(async move {
      let outcome = router.load().await;
      *loaded.lock() = Some((router, outcome));
      Ok(StageOutput { context: ctx.context, send_context: ctx.send_context, result: Value::Null })
    })
  })
}

fn resolve_redirect(router: &Router, redirect: &Redirect) -> String {
  match (&redirect.href, &redirect.to) {
    (Some(href), _) => href.clone(),
    (None, Some(to)) => {
      let opts = NavigateOptions { params: Some(Params::new()), ..NavigateOptions::to(to.clone()) };
      router.build_location(&opts).href
    }
    (None, None) => "/".to_string(),
  }
}

fn stream_document(parts: &StartParts, router: &Router) -> DocumentResponse {
  let scope_id = parts.next_scope_id();
  let mut scope = parts.serializer.encode_scope(scope_id.clone());
  let state = match dehydrate_router(router, &mut scope) {
    Ok(chunk) => chunk,
    Err(err) => {
      tracing::error!(scope = %scope_id, error = %err, "failed to dehydrate router state");
      return DocumentResponse::error(&StartError::internal(err.to_string()));
    }
  };
  let html = Bytes::from(inject_state(&parts.shell, &state));
  let status = router.state().status_code;
  let headers = vec![
    ("content-type".to_string(), CONTENT_TYPE_HTML.to_string()),
    (SCOPE_HEADER.to_string(), scope_id),
  ];
  if !scope.has_pending() {
    return DocumentResponse { status, headers, body: ResponseBody::Full(html) };
  }
  let frames = frame_stream(follow_ups(scope));
  let body = stream::once(async move { Ok(html) }).chain(frames).boxed();
  DocumentResponse { status, headers, body: ResponseBody::Framed(body) }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use futures_util::TryStreamExt;
  use trellis_injector::extract_state;
  use trellis_router::{Deferred, MatchStatus, Route, RouteError, RouteTree};
  use trellis_serializer::{FrameLimits, Serializer, hydrate_router, read_frames};

  use super::*;
  use crate::middleware::{Middleware, NextOptions};
  use crate::server::StartServer;

  fn tree() -> Arc<RouteTree> {
    let about = Route::new("about").loader(|_| async { Ok(Value::from("about us")) });
    let post = Route::new("posts/$id").loader(|ctx| async move {
      Ok(Value::object([
        ("id", Value::from(ctx.params["id"].clone())),
        ("user", ctx.context.get("user").cloned().unwrap_or_default()),
        ("comments", Value::Deferred(Deferred::resolved(Value::from(3.0)))),
      ]))
    });
    let old = Route::new("old").before_load(|_| async { Err(RouteError::Redirect(Redirect::to("/about"))) });
    let broken = Route::new("broken").loader(|_| async { Err(RouteError::loader("db down")) });
    Arc::new(RouteTree::build(Route::root().children([about, post, old, broken])).unwrap())
  }

  fn parts(server: impl FnOnce(StartServer) -> StartServer) -> StartParts {
    server(StartServer::new(tree()).shell("<html><body><main></main></body></html>")).into_parts().unwrap()
  }

  fn client(href: &str) -> Router {
    Router::new(tree(), Arc::new(MemoryHistory::new(href)), RouterOptions::default())
  }

  #[tokio::test]
  async fn plain_page_inlines_state() {
    let parts = parts(|s| s);
    let resp = render_document(&parts, DocumentRequest::new("/about")).await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.header("content-type"), Some(CONTENT_TYPE_HTML));
    let scope_id = resp.header(SCOPE_HEADER).unwrap().to_string();
    let ResponseBody::Full(body) = resp.body else { panic!("nothing should be left to stream") };
    let html = String::from_utf8(body.to_vec()).unwrap();
    assert!(html.ends_with("</script></body></html>"));

    let client = client("/about");
    let mut scope = parts.serializer.decode_scope(scope_id);
    hydrate_router(&client, &mut scope, &extract_state(&html).unwrap()).unwrap();
    let state = client.state();
    assert_eq!(state.matches.last().and_then(|m| m.loader_data.clone()), Some(Value::from("about us")));
  }

  #[tokio::test]
  async fn deferred_data_follows_the_document_as_frames() {
    let user = Middleware::builder("user")
      .server(|ctx, next| async move {
        next.run_with(ctx, NextOptions::default().context(Value::object([("user", Value::from("ada"))]))).await
      })
      .build();
    let parts = parts(|s| s.route_middleware("/posts/$id", user));
    let resp = render_document(&parts, DocumentRequest::new("/posts/9")).await;
    assert_eq!(resp.status, 200);
    let scope_id = resp.header(SCOPE_HEADER).unwrap().to_string();
    let ResponseBody::Framed(body) = resp.body else { panic!("deferred data should stream") };
    let mut parts_iter: Vec<Bytes> = body.try_collect().await.unwrap();
    let html = String::from_utf8(parts_iter.remove(0).to_vec()).unwrap();

    let client = client("/posts/9");
    let mut scope = Serializer::default().decode_scope(scope_id);
    hydrate_router(&client, &mut scope, &extract_state(&html).unwrap()).unwrap();
    let frames = read_frames(stream::iter(parts_iter.into_iter().map(Ok::<_, String>)), FrameLimits::default());
    let chunks: Vec<String> = frames.try_collect().await.unwrap();
    for chunk in &chunks {
      scope.apply_chunk(chunk).unwrap();
    }

    let leaf = client.state().matches.last().cloned().unwrap();
    assert_eq!(leaf.status, MatchStatus::Success);
    let data = leaf.loader_data.clone().unwrap();
    assert_eq!(data.get("user"), Some(&Value::from("ada")));
    let Some(Value::Deferred(comments)) = data.get("comments").cloned() else { panic!("placeholder") };
    assert_eq!(comments.settled().await, Ok(Value::from(3.0)));
  }

  #[tokio::test]
  async fn loader_redirects_become_307() {
    let parts = parts(|s| s);
    let resp = render_document(&parts, DocumentRequest::new("/old")).await;
    assert_eq!(resp.status, 307);
    assert_eq!(resp.header("location"), Some("/about"));
  }

  #[tokio::test]
  async fn middleware_redirects_skip_loading() {
    let guard = Middleware::builder("guard")
      .server(|_, _| async { Err(ServerFnError::redirect("/about")) })
      .build();
    let parts = parts(|s| s.request_middleware(guard));
    let resp = render_document(&parts, DocumentRequest::new("/posts/1")).await;
    assert_eq!((resp.status, resp.header("location")), (307, Some("/about")));
  }

  #[tokio::test]
  async fn status_follows_router_state() {
    let parts = parts(|s| s);
    assert_eq!(render_document(&parts, DocumentRequest::new("/nowhere")).await.status, 404);
    assert_eq!(render_document(&parts, DocumentRequest::new("/broken")).await.status, 500);
  }

  #[tokio::test]
  async fn shared_middleware_runs_once_per_request() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counted = {
      let runs = Arc::clone(&runs);
      Middleware::builder("count")
        .server(move |ctx, next| {
          runs.fetch_add(1, Ordering::SeqCst);
          next.run(ctx)
        })
        .build()
    };
    let parts = parts(|s| s.request_middleware(counted.clone()).route_middleware("/about", counted));
    render_document(&parts, DocumentRequest::new("/about")).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn each_request_gets_a_fresh_scope() {
    let parts = parts(|s| s);
    let a = render_document(&parts, DocumentRequest::new("/about")).await;
    let b = render_document(&parts, DocumentRequest::new("/about")).await;
    assert_ne!(a.header(SCOPE_HEADER), b.header(SCOPE_HEADER));
  }
}
