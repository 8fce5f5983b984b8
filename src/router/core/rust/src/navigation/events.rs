/* src/router/core/rust/src/navigation/events.rs */

use std::sync::Arc;

use crate::location::Location;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RouterEventKind {
  BeforeNavigate,
  BeforeLoad,
  /// The committed location differs from the previously committed one.
  Load,
  BeforeRouteMount,
  /// Every match of the committed navigation has settled.
  Resolved,
}

#[derive(Clone, Debug)]
pub struct RouterEvent {
  pub kind: RouterEventKind,
  pub from_location: Option<Arc<Location>>,
  pub to_location: Arc<Location>,
  pub href_changed: bool,
  pub pathname_changed: bool,
  pub hash_changed: bool,
}

impl RouterEvent {
  pub(crate) fn new(
    kind: RouterEventKind,
    from_location: Option<Arc<Location>>,
    to_location: Arc<Location>,
  ) -> Self {
    let (href_changed, pathname_changed, hash_changed) = match &from_location {
      Some(from) => (
        from.href != to_location.href,
        from.pathname != to_location.pathname,
        from.hash != to_location.hash,
      ),
      None => (true, true, true),
    };
    Self { kind, from_location, to_location, href_changed, pathname_changed, hash_changed }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::value::Value;

  #[test]
  fn change_flags() {
    let a = Arc::new(Location::parse("/a#x", Value::Null));
    let b = Arc::new(Location::parse("/a#y", Value::Null));
    let e = RouterEvent::new(RouterEventKind::Load, Some(a), b);
    assert!(e.href_changed);
    assert!(!e.pathname_changed);
    assert!(e.hash_changed);

    let first = RouterEvent::new(RouterEventKind::Load, None, Arc::new(Location::parse("/", Value::Null)));
    assert!(first.href_changed);
  }
}
