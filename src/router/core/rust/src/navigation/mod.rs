/* src/router/core/rust/src/navigation/mod.rs */

mod events;
mod load;


use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub use events::{RouterEvent, RouterEventKind};

use crate::errors::{Redirect, RouteError, ValidationError, is_external_href};
use crate::history::History;
use crate::location::{Location, SearchUpdate};
use crate::matches::{Match, MatchStatus, Params};
use crate::path::{
  TrailingSlash, decode_path, interpolate_path, remove_basepath, resolve_path,
};
use crate::route::SsrMode;
use crate::scroll::{ScrollIntoViewOptions, ScrollRestoration, Viewport};
use crate::store::{Listeners, MatchList, RouterState, RouterStatus, Store, Subscription};
use crate::tree::RouteTree;
use crate::value::{Value, replace_equal_deep};

use load::LoadResult;

const MAX_REDIRECTS: usize = 20;

type EventListener = dyn Fn(&RouterEvent) + Send + Sync;

#[derive(Clone)]
pub struct RouterOptions {
  pub basepath: String,
  pub trailing_slash: TrailingSlash,
  pub case_sensitive: bool,
  /// Router-level context every match context starts from.
  pub context: Value,
  pub scroll_restoration: bool,
  pub scroll_into_view: ScrollIntoViewOptions,
  pub default_ssr: SsrMode,
  pub is_server: bool,
  pub viewport: Option<Arc<dyn Viewport>>,
}

impl Default for RouterOptions {
  fn default() -> Self {
    Self {
      basepath: "/".to_string(),
      trailing_slash: TrailingSlash::default(),
      case_sensitive: false,
      context: Value::empty_object(),
      scroll_restoration: false,
      scroll_into_view: ScrollIntoViewOptions::default(),
      default_ssr: SsrMode::Full,
      is_server: false,
      viewport: None,
    }
  }
}

impl fmt::Debug for RouterOptions {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RouterOptions")
      .field("basepath", &self.basepath)
      .field("trailing_slash", &self.trailing_slash)
      .field("case_sensitive", &self.case_sensitive)
      .field("scroll_restoration", &self.scroll_restoration)
      .field("default_ssr", &self.default_ssr)
      .field("is_server", &self.is_server)
      .finish_non_exhaustive()
  }
}

/// Destination of a navigation. Without `href`, the target is built from
/// `to` resolved against `from` (or the current pathname).
#[derive(Clone, Debug, Default)]
pub struct NavigateOptions {
  pub to: Option<String>,
  pub from: Option<String>,
  /// Params for `$name` segments of `to`. `None` reuses the current params.
  pub params: Option<Params>,
  pub search: SearchUpdate,
  pub hash: Option<String>,
  pub state: Value,
  pub replace: bool,
  pub reload_document: bool,
  pub href: Option<String>,
}

impl NavigateOptions {
  pub fn to(to: impl Into<String>) -> Self {
    Self { to: Some(to.into()), ..Self::default() }
  }

  pub fn href(href: impl Into<String>) -> Self {
    Self { href: Some(href.into()), ..Self::default() }
  }

  pub fn from(mut self, from: impl Into<String>) -> Self {
    self.from = Some(from.into());
    self
  }

  pub fn params<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
  where
    K: Into<String>,
    V: Into<String>,
  {
    self.params = Some(params.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
    self
  }

  pub fn search(mut self, search: SearchUpdate) -> Self {
    self.search = search;
    self
  }

  pub fn hash(mut self, hash: impl Into<String>) -> Self {
    self.hash = Some(hash.into());
    self
  }

  pub fn state(mut self, state: Value) -> Self {
    self.state = state;
    self
  }

  pub fn replace(mut self) -> Self {
    self.replace = true;
    self
  }

  pub fn reload_document(mut self) -> Self {
    self.reload_document = true;
    self
  }
}

#[derive(Clone, Debug, PartialEq)]
pub enum NavigationOutcome {
  Committed { href: String, status_code: u16 },
  /// A newer navigation started before this one could commit.
  Superseded,
  /// The navigation left the application through a full document load.
  ReloadDocument(String),
  /// Server-side redirect, recorded in state instead of followed.
  Redirected(Redirect),
  /// Gave up after too many consecutive redirects.
  RedirectLimit(String),
}

/// Navigation engine bound to one route tree and one history stack.
#[derive(Clone)]
pub struct Router {
  inner: Arc<RouterInner>,
}

struct RouterInner {
  tree: Arc<RouteTree>,
  options: RouterOptions,
  store: Store<RouterState>,
  history: Arc<dyn History>,
  generation: AtomicU64,
  events: Arc<Listeners<EventListener>>,
  scroll: Option<ScrollRestoration>,
}

impl Router {
  pub fn new(tree: Arc<RouteTree>, history: Arc<dyn History>, options: RouterOptions) -> Self {
    let entry = history.current();
    let location = Location::parse(&entry.href, entry.state).with_key(Some(entry.key));
    let scroll = match (&options.viewport, options.scroll_restoration && !options.is_server) {
      (Some(viewport), true) => {
        Some(ScrollRestoration::new(Arc::clone(viewport), options.scroll_into_view))
      }
      _ => None,
    };
    Self {
      inner: Arc::new(RouterInner {
        tree,
        options,
        store: Store::new(RouterState::new(location)),
        history,
        generation: AtomicU64::new(0),
        events: Listeners::new(),
        scroll,
      }),
    }
  }

  pub fn state(&self) -> Arc<RouterState> {
    self.inner.store.get_state()
  }

  pub fn store(&self) -> &Store<RouterState> {
    &self.inner.store
  }

  pub fn tree(&self) -> &Arc<RouteTree> {
    &self.inner.tree
  }

  pub fn options(&self) -> &RouterOptions {
    &self.inner.options
  }

  pub fn history(&self) -> &Arc<dyn History> {
    &self.inner.history
  }

  pub fn scroll(&self) -> Option<&ScrollRestoration> {
    self.inner.scroll.as_ref()
  }

  /// Listen for one kind of router event.
  pub fn on<F>(&self, kind: RouterEventKind, listener: F) -> Subscription
  where
    F: Fn(&RouterEvent) + Send + Sync + 'static,
  {
    self.inner.events.add(Arc::new(move |event: &RouterEvent| {
      if event.kind == kind {
        listener(event);
      }
    }))
  }

  fn emit(&self, kind: RouterEventKind, from: Option<Arc<Location>>, to: &Arc<Location>) {
    let event = RouterEvent::new(kind, from, Arc::clone(to));
    for listener in self.inner.events.snapshot() {
      listener(&event);
    }
  }

  fn is_current(&self, generation: u64) -> bool {
    self.inner.generation.load(Ordering::SeqCst) == generation
  }

  /// Build the location a navigation with `opts` would commit.
  pub fn build_location(&self, opts: &NavigateOptions) -> Location {
    if let Some(href) = &opts.href {
      return Location::parse(href, opts.state.clone());
    }
    let state = self.state();
    let current = &state.location;
    let options = &self.inner.options;

    let from = opts.from.as_deref().unwrap_or(&current.pathname);
    let to = opts.to.as_deref().unwrap_or(".");
    let pattern = resolve_path(&options.basepath, from, to, options.trailing_slash);

    let params = match &opts.params {
      Some(p) => p.clone(),
      None => state.matches.last().map(|m| m.params.clone()).unwrap_or_default(),
    };
    let pathname = decode_path(&interpolate_path(&pattern, &params, false).path);

    let search = opts.search.apply(&current.search);
    let search = replace_equal_deep(&current.search, &search);
    let hash = opts.hash.clone().unwrap_or_default();
    Location::new(pathname, search, hash, opts.state.clone())
  }

  /// Resolve `location` into pending matches with validated search.
  pub fn match_routes(&self, location: &Location) -> Vec<Match> {
    let options = &self.inner.options;
    let relative = remove_basepath(&options.basepath, &location.pathname, options.case_sensitive);
    let relative = if relative.is_empty() { "/".to_string() } else { relative };
    let matched = self.inner.tree.match_routes(&relative, options.case_sensitive);

    let mut parent_search = location.search.clone();
    let mut parent_ssr = options.default_ssr;
    let last = matched.routes.len().saturating_sub(1);
    let mut out = Vec::with_capacity(matched.routes.len());

    for (index, route) in matched.routes.iter().enumerate() {
      let (search, search_error) = match &route.validate_search {
        Some(validate) => match validate(&parent_search) {
          Ok(strict) => (parent_search.merge(&strict), None),
          Err(err) => {
            let err = match err {
              RouteError::Validation(v) => v,
              other => ValidationError { route_id: route.id.clone(), message: other.to_string() },
            };
            (parent_search.clone(), Some(RouteError::Validation(err)))
          }
        },
        None => (parent_search.clone(), None),
      };

      let loader_deps = route.loader_deps.as_ref().map_or(Value::Null, |deps| deps(&search));
      let deps_key = if loader_deps.is_null() { String::new() } else { loader_deps.to_key_string() };
      let id = format!("{}{deps_key}", interpolate_path(&route.id, &matched.params, true).path);
      let pathname = interpolate_path(&route.full_path, &matched.params, false).path;
      let ssr = narrow_ssr(parent_ssr, route.ssr.unwrap_or(parent_ssr));

      out.push(Match {
        id,
        route_id: route.id.clone(),
        pathname,
        params: matched.params.clone(),
        search: search.clone(),
        search_error,
        status: MatchStatus::Pending,
        loader_deps,
        ssr,
        global_not_found: matched.global_not_found && index == last,
        ..Match::default()
      });
      parent_search = search;
      parent_ssr = ssr;
    }
    out
  }

  /// Navigate to a new location and load it.
  pub async fn navigate(&self, opts: NavigateOptions) -> NavigationOutcome {
    let location = self.build_location(&opts);
    let external = opts.href.as_deref().is_some_and(is_external_href);
    if opts.reload_document || external {
      let href = opts.href.clone().filter(|_| external).unwrap_or_else(|| location.href.clone());
      tracing::debug!(%href, "navigation leaves the app");
      self.inner.history.reload_document(&href);
      return NavigationOutcome::ReloadDocument(href);
    }

    let current = self.state();
    if let Some(scroll) = &self.inner.scroll {
      scroll.save(&current.location);
    }
    let replace = opts.replace || current.location.href == location.href;
    let entry = if replace {
      self.inner.history.replace(&location.href, location.state.clone())
    } else {
      self.inner.history.push(&location.href, location.state.clone())
    };
    tracing::debug!(href = %location.href, replace, "navigate");
    self.load_location(location.with_key(Some(entry.key))).await
  }

  /// Load the history's current entry.
  pub async fn load(&self) -> NavigationOutcome {
    let entry = self.inner.history.current();
    let location = Location::parse(&entry.href, entry.state).with_key(Some(entry.key));
    self.load_location(location).await
  }

  /// Mark every committed and cached match invalid, then reload.
  pub async fn invalidate(&self) -> NavigationOutcome {
    let mark = |list: &MatchList| -> MatchList {
      Arc::new(
        list.iter().map(|m| Arc::new(Match { invalid: true, ..Match::clone(m) })).collect(),
      )
    };
    self.inner.store.set_state(|s| RouterState {
      matches: mark(&s.matches),
      cached_matches: mark(&s.cached_matches),
      ..s.clone()
    });
    self.load().await
  }

  /// Run matching and loading for a destination without committing it.
  /// Successful matches land in the cached-match pool for later reuse.
  pub async fn preload_route(&self, opts: NavigateOptions) -> Vec<Arc<Match>> {
    let location = Arc::new(self.build_location(&opts));
    let matches = self.match_routes(&location);
    let matches = match load::load_matches(self, &location, matches, None).await {
      LoadResult::Settled(matches) => matches,
      LoadResult::Redirect(redirect) => {
        tracing::debug!(target = redirect.target(), "preload redirected, nothing cached");
        return Vec::new();
      }
      LoadResult::Superseded => return Vec::new(),
    };
    let matches: Vec<Arc<Match>> = matches.into_iter().map(Arc::new).collect();
    let fresh: Vec<Arc<Match>> =
      matches.iter().filter(|m| m.status == MatchStatus::Success).cloned().collect();
    self.inner.store.set_state(|s| {
      let mut cached: Vec<Arc<Match>> =
        s.cached_matches.iter().filter(|c| !fresh.iter().any(|f| f.id == c.id)).cloned().collect();
      cached.extend(fresh.iter().cloned());
      RouterState { cached_matches: Arc::new(cached), ..s.clone() }
    });
    matches
  }

  async fn load_location(&self, location: Location) -> NavigationOutcome {
    let mut location = location;
    for _ in 0..MAX_REDIRECTS {
      let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
      let previous = self.state();
      let from = previous.resolved_location.clone();
      self.emit(RouterEventKind::BeforeNavigate, from.clone(), &Arc::new(location.clone()));

      let matches = self.match_routes(&location);
      if let Some(leaf) = matches.last()
        && leaf.search != location.search
      {
        // validators filled in defaults; make them part of the committed href
        let entry = self.inner.history.replace(
          &location.with_search(leaf.search.clone()).href,
          location.state.clone(),
        );
        location = location.with_search(leaf.search.clone()).with_key(Some(entry.key));
      }
      let target = Arc::new(location.clone());

      let pending: MatchList = Arc::new(matches.iter().cloned().map(Arc::new).collect());
      self.inner.store.set_state(|s| RouterState {
        status: RouterStatus::Pending,
        is_loading: true,
        location: Arc::clone(&target),
        pending_matches: Some(Arc::clone(&pending)),
        ..s.clone()
      });
      self.emit(RouterEventKind::BeforeLoad, from.clone(), &target);

      let result = load::load_matches(self, &target, matches, Some(generation)).await;
      if !self.is_current(generation) {
        tracing::debug!(href = %target.href, "navigation superseded");
        return NavigationOutcome::Superseded;
      }

      match result {
        LoadResult::Superseded => return NavigationOutcome::Superseded,
        LoadResult::Settled(matches) => return self.commit(target, from, matches),
        LoadResult::Redirect(redirect) => {
          tracing::debug!(target = redirect.target(), "redirect");
          if self.inner.options.is_server {
            self.inner.store.set_state(|s| RouterState {
              status: RouterStatus::Idle,
              is_loading: false,
              pending_matches: None,
              status_code: redirect.status_code,
              redirect: Some(redirect.clone()),
              ..s.clone()
            });
            return NavigationOutcome::Redirected(redirect);
          }
          if redirect.is_external() || redirect.reload_document {
            let href = redirect.target().to_string();
            self.inner.history.reload_document(&href);
            self.inner.store.set_state(|s| RouterState {
              status: RouterStatus::Idle,
              is_loading: false,
              pending_matches: None,
              redirect: Some(redirect.clone()),
              ..s.clone()
            });
            return NavigationOutcome::ReloadDocument(href);
          }
          let next = match &redirect.href {
            Some(href) => Location::parse(href, Value::Null),
            None => self.build_location(&NavigateOptions {
              to: redirect.to.clone(),
              from: Some(target.pathname.clone()),
              params: Some(Params::new()),
              ..NavigateOptions::default()
            }),
          };
          let entry = if redirect.replace {
            self.inner.history.replace(&next.href, next.state.clone())
          } else {
            self.inner.history.push(&next.href, next.state.clone())
          };
          location = next.with_key(Some(entry.key));
        }
      }
    }
    tracing::warn!(href = %location.href, "too many redirects");
    NavigationOutcome::RedirectLimit(location.href)
  }

  fn commit(
    &self,
    target: Arc<Location>,
    from: Option<Arc<Location>>,
    matches: Vec<Match>,
  ) -> NavigationOutcome {
    let status_code = status_code(&matches);
    let matches: MatchList = Arc::new(
      matches.into_iter().map(|m| Arc::new(Match { dehydrated: false, invalid: false, ..m })).collect(),
    );
    self.inner.store.set_state(|s| {
      let cached: Vec<Arc<Match>> =
        s.cached_matches.iter().filter(|c| !matches.iter().any(|m| m.id == c.id)).cloned().collect();
      RouterState {
        status: RouterStatus::Idle,
        is_loading: false,
        location: Arc::clone(&target),
        resolved_location: Some(Arc::clone(&target)),
        matches: Arc::clone(&matches),
        pending_matches: None,
        cached_matches: Arc::new(cached),
        status_code,
        redirect: None,
      }
    });
    tracing::debug!(href = %target.href, status_code, "navigation committed");

    let href_changed = from.as_ref().is_none_or(|f| f.href != target.href);
    if href_changed {
      self.emit(RouterEventKind::Load, from.clone(), &target);
    }
    self.emit(RouterEventKind::BeforeRouteMount, from.clone(), &target);
    if let Some(scroll) = &self.inner.scroll {
      scroll.restore(&target);
    }
    self.emit(RouterEventKind::Resolved, from, &target);
    NavigationOutcome::Committed { href: target.href.clone(), status_code }
  }
}

/// A child can only narrow its parent's server-rendering mode.
fn narrow_ssr(parent: SsrMode, own: SsrMode) -> SsrMode {
  let rank = |m: SsrMode| match m {
    SsrMode::Full => 2,
    SsrMode::DataOnly => 1,
    SsrMode::Off => 0,
  };
  if rank(own) < rank(parent) { own } else { parent }
}

/// 500 when any match errored, else 404 when any is not-found, else 200.
fn status_code(matches: &[Match]) -> u16 {
  if matches.iter().any(|m| m.status == MatchStatus::Error) {
    500
  } else if matches.iter().any(|m| m.status == MatchStatus::NotFound) {
    404
  } else {
    200
  }
}
