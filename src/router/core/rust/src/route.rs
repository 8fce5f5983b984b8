/* src/router/core/rust/src/route.rs */

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};

use serde::Deserialize;

use crate::BoxFuture;
use crate::errors::RouteError;
use crate::location::Location;
use crate::path::{MatchOptions, Matcher, Params, join_paths, trim_path_left, trim_path_right};
use crate::value::Value;

pub const ROOT_ROUTE_ID: &str = "__root__";

pub type LoaderFn = Arc<dyn Fn(LoaderCtx) -> BoxFuture<Result<Value, RouteError>> + Send + Sync>;
pub type BeforeLoadFn =
  Arc<dyn Fn(BeforeLoadCtx) -> BoxFuture<Result<Value, RouteError>> + Send + Sync>;
pub type ContextFn = Arc<dyn Fn(&ContextCtx) -> Result<Value, RouteError> + Send + Sync>;
pub type ValidateSearchFn = Arc<dyn Fn(&Value) -> Result<Value, RouteError> + Send + Sync>;
pub type LoaderDepsFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;
pub type TransformFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// How a route participates in server rendering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SsrMode {
  /// Run `beforeLoad` and `loader` on the server and render.
  #[default]
  Full,
  /// Run lifecycle functions on the server but leave rendering to the client.
  DataOnly,
  /// Skip the route entirely on the server.
  Off,
}

impl SsrMode {
  pub fn as_str(self) -> &'static str {
    match self {
      SsrMode::Full => "full",
      SsrMode::DataOnly => "data-only",
      SsrMode::Off => "off",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "full" | "true" => Some(SsrMode::Full),
      "data-only" => Some(SsrMode::DataOnly),
      "off" | "false" => Some(SsrMode::Off),
      _ => None,
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadCause {
  /// The route was not part of the previously committed matches.
  Enter,
  /// The route stays matched across the navigation.
  Stay,
  Preload,
}

#[derive(Clone, Debug)]
pub struct BeforeLoadCtx {
  pub route_id: String,
  pub params: Params,
  pub search: Value,
  /// Accumulated context from the router and every ancestor.
  pub context: Value,
  pub location: Arc<Location>,
  pub cause: LoadCause,
  pub preload: bool,
}

#[derive(Clone, Debug)]
pub struct LoaderCtx {
  pub route_id: String,
  pub params: Params,
  pub deps: Value,
  pub context: Value,
  pub location: Arc<Location>,
  pub cause: LoadCause,
  pub preload: bool,
}

#[derive(Clone, Debug)]
pub struct ContextCtx {
  pub route_id: String,
  pub params: Params,
  pub deps: Value,
  pub context: Value,
}

/// Dehydrate/hydrate pair for one lifecycle result.
#[derive(Clone, Default)]
pub struct Transform {
  pub dehydrate: Option<TransformFn>,
  pub hydrate: Option<TransformFn>,
}

impl Transform {
  pub fn dehydrate(&self, value: &Value) -> Value {
    match &self.dehydrate {
      Some(f) => f(value),
      None => value.clone(),
    }
  }

  pub fn hydrate(&self, value: &Value) -> Value {
    match &self.hydrate {
      Some(f) => f(value),
      None => value.clone(),
    }
  }
}

/// Per-lifecycle dehydration hooks of a route.
#[derive(Clone, Default)]
pub struct SerializationHooks {
  pub loader: Transform,
  pub before_load: Transform,
  pub context: Transform,
}

/// Declarative route definition. Turned into an immutable [`RouteNode`]
/// tree by [`crate::RouteTree::build`].
#[derive(Clone, Default)]
pub struct Route {
  path: Option<String>,
  id: Option<String>,
  case_sensitive: Option<bool>,
  loader: Option<LoaderFn>,
  before_load: Option<BeforeLoadFn>,
  context: Option<ContextFn>,
  validate_search: Option<ValidateSearchFn>,
  loader_deps: Option<LoaderDepsFn>,
  ssr: Option<SsrMode>,
  hooks: SerializationHooks,
  static_data: Value,
  children: Vec<Route>,
}

impl Route {
  pub fn root() -> Self {
    Self::default()
  }

  pub fn new(path: impl Into<String>) -> Self {
    Self { path: Some(path.into()), ..Self::default() }
  }

  /// Pathless layout route: contributes an id and lifecycle but no path segment.
  pub fn layout(id: impl Into<String>) -> Self {
    Self { id: Some(id.into()), ..Self::default() }
  }

  pub fn id(mut self, id: impl Into<String>) -> Self {
    self.id = Some(id.into());
    self
  }

  pub fn case_sensitive(mut self, on: bool) -> Self {
    self.case_sensitive = Some(on);
    self
  }

  pub fn loader<F, Fut>(mut self, f: F) -> Self
  where
    F: Fn(LoaderCtx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, RouteError>> + Send + 'static,
  {
    self.loader = Some(Arc::new(move |ctx| Box::pin(f(ctx))));
    self
  }

  pub fn before_load<F, Fut>(mut self, f: F) -> Self
  where
    F: Fn(BeforeLoadCtx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, RouteError>> + Send + 'static,
  {
    self.before_load = Some(Arc::new(move |ctx| Box::pin(f(ctx))));
    self
  }

  pub fn context<F>(mut self, f: F) -> Self
  where
    F: Fn(&ContextCtx) -> Result<Value, RouteError> + Send + Sync + 'static,
  {
    self.context = Some(Arc::new(f));
    self
  }

  /// Validate (and default) the search object. Receives the output of the
  /// parent route's validator merged over the raw search.
  pub fn validate_search<F>(mut self, f: F) -> Self
  where
    F: Fn(&Value) -> Result<Value, RouteError> + Send + Sync + 'static,
  {
    self.validate_search = Some(Arc::new(f));
    self
  }

  /// Select the part of the validated search the loader depends on.
  pub fn loader_deps<F>(mut self, f: F) -> Self
  where
    F: Fn(&Value) -> Value + Send + Sync + 'static,
  {
    self.loader_deps = Some(Arc::new(f));
    self
  }

  pub fn ssr(mut self, mode: SsrMode) -> Self {
    self.ssr = Some(mode);
    self
  }

  pub fn dehydrate_loader<D, H>(mut self, dehydrate: D, hydrate: H) -> Self
  where
    D: Fn(&Value) -> Value + Send + Sync + 'static,
    H: Fn(&Value) -> Value + Send + Sync + 'static,
  {
    self.hooks.loader = Transform { dehydrate: Some(Arc::new(dehydrate)), hydrate: Some(Arc::new(hydrate)) };
    self
  }

  pub fn dehydrate_before_load<D, H>(mut self, dehydrate: D, hydrate: H) -> Self
  where
    D: Fn(&Value) -> Value + Send + Sync + 'static,
    H: Fn(&Value) -> Value + Send + Sync + 'static,
  {
    self.hooks.before_load =
      Transform { dehydrate: Some(Arc::new(dehydrate)), hydrate: Some(Arc::new(hydrate)) };
    self
  }

  pub fn dehydrate_context<D, H>(mut self, dehydrate: D, hydrate: H) -> Self
  where
    D: Fn(&Value) -> Value + Send + Sync + 'static,
    H: Fn(&Value) -> Value + Send + Sync + 'static,
  {
    self.hooks.context = Transform { dehydrate: Some(Arc::new(dehydrate)), hydrate: Some(Arc::new(hydrate)) };
    self
  }

  pub fn static_data(mut self, data: Value) -> Self {
    self.static_data = data;
    self
  }

  pub fn children(mut self, children: impl IntoIterator<Item = Route>) -> Self {
    self.children.extend(children);
    self
  }
}

/// An immutable node of a built route tree.
pub struct RouteNode {
  pub id: String,
  /// Normalized own path (`/` for index routes, empty for pathless and root).
  pub path: String,
  pub full_path: String,
  pub is_root: bool,
  pub case_sensitive: Option<bool>,
  pub loader: Option<LoaderFn>,
  pub before_load: Option<BeforeLoadFn>,
  pub context: Option<ContextFn>,
  pub validate_search: Option<ValidateSearchFn>,
  pub loader_deps: Option<LoaderDepsFn>,
  pub ssr: Option<SsrMode>,
  pub hooks: SerializationHooks,
  pub static_data: Value,
  matcher: Matcher,
  parent: Weak<RouteNode>,
  children: Vec<Arc<RouteNode>>,
}

impl RouteNode {
  /// Build the node tree with `def` as the root route.
  pub(crate) fn build_root(def: Route) -> Arc<RouteNode> {
    Self::build_inner(def, None)
  }

  fn build_inner(def: Route, parent: Option<(Weak<RouteNode>, &str, &str)>) -> Arc<RouteNode> {
    let Route {
      path,
      id: custom_id,
      case_sensitive,
      loader,
      before_load,
      context,
      validate_search,
      loader_deps,
      ssr,
      hooks,
      static_data,
      children,
    } = def;

    let (parent_weak, id, path, full_path, is_root) = match parent {
      None => (Weak::new(), ROOT_ROUTE_ID.to_string(), String::new(), "/".to_string(), true),
      Some((weak, parent_id, parent_full)) => {
        let path = path
          .map(|p| if p == "/" { p } else { trim_path_left(&p).to_string() })
          .unwrap_or_default();
        let custom = custom_id.unwrap_or_else(|| path.clone());
        let parent_id = if parent_id == ROOT_ROUTE_ID { "" } else { parent_id };
        let id = join_paths(["/", parent_id, custom.as_str()]);
        let full_path = join_paths([parent_full, path.as_str()]);
        (weak, id, path, full_path, false)
      }
    };

    let matcher = Matcher::compile(&full_path, MatchOptions::default());
    Arc::new_cyclic(|me: &Weak<RouteNode>| {
      let children = children
        .into_iter()
        .map(|child| Self::build_inner(child, Some((me.clone(), id.as_str(), full_path.as_str()))))
        .collect();
      RouteNode {
        id,
        path,
        full_path,
        is_root,
        case_sensitive,
        loader,
        before_load,
        context,
        validate_search,
        loader_deps,
        ssr,
        hooks,
        static_data,
        matcher,
        parent: parent_weak,
        children,
      }
    })
  }

  pub fn parent(&self) -> Option<Arc<RouteNode>> {
    self.parent.upgrade()
  }

  pub fn children(&self) -> &[Arc<RouteNode>] {
    &self.children
  }

  pub fn is_index(&self) -> bool {
    self.path == "/"
  }

  pub fn is_pathless(&self) -> bool {
    !self.is_root && self.path.is_empty()
  }

  /// Full path with a trailing slash removed (index routes share it with their parent).
  pub fn trimmed_full_path(&self) -> &str {
    let trimmed = trim_path_right(&self.full_path);
    if trimmed.is_empty() { "/" } else { trimmed }
  }

  /// Fuzzy match against this node's full path. `**` holds any unmatched rest.
  pub fn match_pathname(&self, pathname: &str, case_sensitive: bool) -> Option<Params> {
    let case_sensitive = self.case_sensitive.unwrap_or(case_sensitive);
    self.matcher.match_with(pathname, MatchOptions { fuzzy: true, case_sensitive })
  }

  /// Ancestor chain from the root down to this node.
  pub fn lineage(self: &Arc<Self>) -> Vec<Arc<RouteNode>> {
    let mut chain = vec![Arc::clone(self)];
    let mut cursor = self.parent();
    while let Some(node) = cursor {
      cursor = node.parent();
      chain.push(node);
    }
    chain.reverse();
    chain
  }
}

impl fmt::Debug for RouteNode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RouteNode")
      .field("id", &self.id)
      .field("full_path", &self.full_path)
      .field("children", &self.children.len())
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn node(def: Route) -> Arc<RouteNode> {
    RouteNode::build_root(def)
  }

  #[test]
  fn ids_and_full_paths() {
    let root = node(Route::root().children([
      Route::new("/").id("index"),
      Route::new("posts").children([Route::new("/"), Route::new("$postId")]),
      Route::layout("_auth").children([Route::new("dashboard")]),
    ]));
    assert_eq!(root.id, ROOT_ROUTE_ID);
    assert_eq!(root.full_path, "/");

    let ids: Vec<_> = root.children().iter().map(|c| (c.id.clone(), c.full_path.clone())).collect();
    assert_eq!(
      ids,
      vec![
        ("/index".to_string(), "/".to_string()),
        ("/posts".to_string(), "/posts".to_string()),
        ("/_auth".to_string(), "/".to_string()),
      ]
    );

    let posts = &root.children()[1];
    assert_eq!(posts.children()[0].id, "/posts/");
    assert_eq!(posts.children()[0].full_path, "/posts/");
    assert!(posts.children()[0].is_index());
    assert_eq!(posts.children()[1].full_path, "/posts/$postId");

    let auth = &root.children()[2];
    assert!(auth.is_pathless());
    assert_eq!(auth.children()[0].id, "/_auth/dashboard");
    assert_eq!(auth.children()[0].full_path, "/dashboard");
  }

  #[test]
  fn lineage_runs_root_first() {
    let root = node(Route::root().children([Route::new("a").children([Route::new("b")])]));
    let leaf = Arc::clone(&root.children()[0].children()[0]);
    let ids: Vec<_> = leaf.lineage().iter().map(|n| n.id.clone()).collect();
    assert_eq!(ids, vec![ROOT_ROUTE_ID, "/a", "/a/b"]);
  }

  #[test]
  fn ssr_mode_names() {
    assert_eq!(SsrMode::parse("data-only"), Some(SsrMode::DataOnly));
    assert_eq!(SsrMode::parse("false"), Some(SsrMode::Off));
    assert_eq!(SsrMode::Full.as_str(), "full");
  }

  #[test]
  fn transform_defaults_to_identity() {
    let t = Transform::default();
    let v = Value::from("x");
    assert_eq!(t.dehydrate(&v), v);
    assert_eq!(t.hydrate(&v), v);
  }
}
