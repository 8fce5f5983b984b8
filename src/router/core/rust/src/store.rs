/* src/router/core/rust/src/store.rs */

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::errors::{Redirect, RouteError};
use crate::location::Location;
use crate::matches::Match;
use crate::value::{Value, replace_equal_deep};

/// Reconciles a freshly computed state against the previous snapshot so that
/// unchanged parts keep their previous `Arc` identity.
pub trait StructuralShare: Sized {
  /// Return `next`, reusing `prev`'s shared parts wherever they are equal.
  fn share(prev: &Self, next: Self) -> Self;

  /// Identity comparison of two snapshots (no deep walk).
  fn is_same(&self, other: &Self) -> bool;
}

/// Handle returned by `subscribe`; dropping it keeps the listener registered.
#[must_use = "call `unsubscribe` to remove the listener"]
pub struct Subscription {
  cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
  pub fn unsubscribe(mut self) {
    if let Some(cancel) = self.cancel.take() {
      cancel();
    }
  }
}

/// Ordered listener registry shared by the store and the router event bus.
pub(crate) struct Listeners<T: ?Sized> {
  next_id: AtomicU64,
  items: Mutex<Vec<(u64, Arc<T>)>>,
}

impl<T: ?Sized + Send + Sync + 'static> Listeners<T> {
  pub(crate) fn new() -> Arc<Self> {
    Arc::new(Self { next_id: AtomicU64::new(0), items: Mutex::new(Vec::new()) })
  }

  pub(crate) fn add(self: &Arc<Self>, listener: Arc<T>) -> Subscription {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    self.items.lock().push((id, listener));
    let weak = Arc::downgrade(self);
    Subscription {
      cancel: Some(Box::new(move || {
        if let Some(listeners) = weak.upgrade() {
          listeners.items.lock().retain(|(i, _)| *i != id);
        }
      })),
    }
  }

  /// Current listeners, cloned out so callbacks run without the lock held.
  pub(crate) fn snapshot(&self) -> Vec<Arc<T>> {
    self.items.lock().iter().map(|(_, l)| Arc::clone(l)).collect()
  }
}

type StoreListener<S> = dyn Fn(&Arc<S>, &Arc<S>) + Send + Sync;

/// Single source of mutable router state. Every write goes through
/// `set_state`, which reconciles the new snapshot against the old one.
pub struct Store<S> {
  state: RwLock<Arc<S>>,
  listeners: Arc<Listeners<StoreListener<S>>>,
}

impl<S: StructuralShare + Send + Sync + 'static> Store<S> {
  pub fn new(initial: S) -> Self {
    Self { state: RwLock::new(Arc::new(initial)), listeners: Listeners::new() }
  }

  pub fn get_state(&self) -> Arc<S> {
    Arc::clone(&self.state.read())
  }

  /// Apply `updater` to the current snapshot. Listeners are notified with
  /// `(next, prev)` only when the shared result differs by identity.
  /// The updater runs under the write lock and must not touch the store.
  pub fn set_state(&self, updater: impl FnOnce(&S) -> S) -> bool {
    let (next, prev) = {
      let mut guard = self.state.write();
      let prev = Arc::clone(&guard);
      let shared = S::share(&prev, updater(&prev));
      if shared.is_same(&prev) {
        return false;
      }
      let next = Arc::new(shared);
      *guard = Arc::clone(&next);
      (next, prev)
    };
    for listener in self.listeners.snapshot() {
      listener(&next, &prev);
    }
    true
  }

  pub fn subscribe<F>(&self, listener: F) -> Subscription
  where
    F: Fn(&Arc<S>, &Arc<S>) + Send + Sync + 'static,
  {
    self.listeners.add(Arc::new(listener))
  }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RouterStatus {
  #[default]
  Idle,
  Pending,
}

pub type MatchList = Arc<Vec<Arc<Match>>>;

#[derive(Clone, Debug)]
pub struct RouterState {
  pub status: RouterStatus,
  pub is_loading: bool,
  /// Location of the latest navigation attempt.
  pub location: Arc<Location>,
  /// Last committed location.
  pub resolved_location: Option<Arc<Location>>,
  /// Committed matches, root first.
  pub matches: MatchList,
  /// Matches of the in-flight navigation.
  pub pending_matches: Option<MatchList>,
  /// Preloaded matches available for reuse.
  pub cached_matches: MatchList,
  pub status_code: u16,
  pub redirect: Option<Redirect>,
}

impl RouterState {
  pub fn new(location: Location) -> Self {
    Self {
      status: RouterStatus::Idle,
      is_loading: false,
      location: Arc::new(location),
      resolved_location: None,
      matches: Arc::default(),
      pending_matches: None,
      cached_matches: Arc::default(),
      status_code: 200,
      redirect: None,
    }
  }

  pub fn find_match(&self, route_id: &str) -> Option<&Arc<Match>> {
    self.matches.iter().find(|m| m.route_id == route_id)
  }
}

fn share_location(prev: &Arc<Location>, next: Arc<Location>) -> Arc<Location> {
  if Arc::ptr_eq(prev, &next) {
    return next;
  }
  let mut loc = Arc::unwrap_or_clone(next);
  let mut reused = reconcile(&prev.search, &mut loc.search);
  reused &= reconcile(&prev.state, &mut loc.state);
  let plain_equal = prev.pathname == loc.pathname
    && prev.search_str == loc.search_str
    && prev.hash == loc.hash
    && prev.href == loc.href
    && prev.key == loc.key;
  if reused && plain_equal { Arc::clone(prev) } else { Arc::new(loc) }
}

/// Replace `next` with its structurally shared form; true when it is now `prev` itself.
fn reconcile(prev: &Value, next: &mut Value) -> bool {
  *next = replace_equal_deep(prev, next);
  next.same(prev)
}

fn same_error(prev: Option<&RouteError>, next: Option<&RouteError>) -> bool {
  match (prev, next) {
    (None, None) => true,
    (Some(RouteError::Loader(a)), Some(RouteError::Loader(b))) => {
      a.message == b.message && replace_equal_deep(&a.value, &b.value).same(&a.value)
    }
    (Some(a), Some(b)) => a == b,
    _ => false,
  }
}

fn share_opt_location(
  prev: Option<&Arc<Location>>,
  next: Option<Arc<Location>>,
) -> Option<Arc<Location>> {
  match (prev, next) {
    (Some(p), Some(n)) => Some(share_location(p, n)),
    (_, n) => n,
  }
}

fn share_match(prev: &Arc<Match>, next: &Arc<Match>) -> Arc<Match> {
  if Arc::ptr_eq(prev, next) {
    return Arc::clone(prev);
  }
  let mut m = Match::clone(next);
  let mut reused = reconcile(&prev.search, &mut m.search);
  reused &= reconcile(&prev.loader_deps, &mut m.loader_deps);
  reused &= reconcile(&prev.route_context, &mut m.route_context);
  reused &= reconcile(&prev.before_load_context, &mut m.before_load_context);
  reused &= reconcile(&prev.context, &mut m.context);
  match (&prev.loader_data, &mut m.loader_data) {
    (Some(p), Some(n)) => reused &= reconcile(p, n),
    (None, None) => {}
    _ => reused = false,
  }
  let plain_equal = prev.id == m.id
    && prev.route_id == m.route_id
    && prev.pathname == m.pathname
    && prev.params == m.params
    && prev.status == m.status
    && prev.ssr == m.ssr
    && prev.invalid == m.invalid
    && prev.dehydrated == m.dehydrated
    && prev.global_not_found == m.global_not_found
    && same_error(prev.search_error.as_ref(), m.search_error.as_ref())
    && same_error(prev.error.as_ref(), m.error.as_ref());
  if reused && plain_equal { Arc::clone(prev) } else { Arc::new(m) }
}

fn share_matches(prev: &MatchList, next: MatchList) -> MatchList {
  if Arc::ptr_eq(prev, &next) {
    return next;
  }
  let items: Vec<Arc<Match>> = next
    .iter()
    .map(|m| match prev.iter().find(|p| p.id == m.id) {
      Some(p) => share_match(p, m),
      None => Arc::clone(m),
    })
    .collect();
  let reused = items.len() == prev.len() && items.iter().zip(prev.iter()).all(|(a, b)| Arc::ptr_eq(a, b));
  if reused { Arc::clone(prev) } else { Arc::new(items) }
}

fn same_opt<T>(a: Option<&Arc<T>>, b: Option<&Arc<T>>) -> bool {
  match (a, b) {
    (Some(a), Some(b)) => Arc::ptr_eq(a, b),
    (None, None) => true,
    _ => false,
  }
}

impl StructuralShare for RouterState {
  fn share(prev: &Self, next: Self) -> Self {
    let pending_matches = match (&prev.pending_matches, next.pending_matches) {
      (Some(p), Some(n)) => Some(share_matches(p, n)),
      (_, n) => n,
    };
    RouterState {
      location: share_location(&prev.location, next.location),
      resolved_location: share_opt_location(prev.resolved_location.as_ref(), next.resolved_location),
      matches: share_matches(&prev.matches, next.matches),
      pending_matches,
      cached_matches: share_matches(&prev.cached_matches, next.cached_matches),
      ..next
    }
  }

  fn is_same(&self, other: &Self) -> bool {
    self.status == other.status
      && self.is_loading == other.is_loading
      && self.status_code == other.status_code
      && self.redirect == other.redirect
      && Arc::ptr_eq(&self.location, &other.location)
      && same_opt(self.resolved_location.as_ref(), other.resolved_location.as_ref())
      && Arc::ptr_eq(&self.matches, &other.matches)
      && same_opt(self.pending_matches.as_ref(), other.pending_matches.as_ref())
      && Arc::ptr_eq(&self.cached_matches, &other.cached_matches)
  }
}
