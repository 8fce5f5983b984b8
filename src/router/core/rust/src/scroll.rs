/* src/router/core/rust/src/scroll.rs */

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::location::Location;

/// Element key under which the window's own scroll offset is stored.
pub const WINDOW_KEY: &str = "window";

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ScrollPosition {
  pub x: f64,
  pub y: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScrollBehavior {
  #[default]
  Auto,
  Instant,
  Smooth,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScrollAlign {
  Start,
  Center,
  End,
  Nearest,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScrollIntoViewOptions {
  pub behavior: ScrollBehavior,
  pub block: ScrollAlign,
  pub inline: ScrollAlign,
}

impl Default for ScrollIntoViewOptions {
  fn default() -> Self {
    Self { behavior: ScrollBehavior::Auto, block: ScrollAlign::Start, inline: ScrollAlign::Nearest }
  }
}

/// The scrollable surface the router drives (a browser window, a test double).
pub trait Viewport: Send + Sync {
  /// Current offsets of every tracked scrollable element, keyed by element key.
  fn positions(&self) -> Vec<(String, ScrollPosition)>;

  fn scroll_to(&self, element: &str, position: ScrollPosition);

  /// Scroll the element with `id` into view. `false` when no such element exists.
  fn scroll_into_view(&self, id: &str, options: &ScrollIntoViewOptions) -> bool;
}

/// What the restorer did after a navigation settled.
#[derive(Clone, Debug, PartialEq)]
pub enum ScrollAction {
  IntoView(String),
  Restored,
  Top,
}

type PositionCache = HashMap<String, HashMap<String, ScrollPosition>>;

/// Side store of scroll offsets keyed by history entry, then element.
pub struct ScrollRestoration {
  viewport: Arc<dyn Viewport>,
  options: ScrollIntoViewOptions,
  cache: Mutex<PositionCache>,
}

fn entry_key(location: &Location) -> &str {
  location.key.as_deref().unwrap_or(&location.href)
}

impl ScrollRestoration {
  pub fn new(viewport: Arc<dyn Viewport>, options: ScrollIntoViewOptions) -> Self {
    Self { viewport, options, cache: Mutex::new(HashMap::new()) }
  }

  /// Record current offsets for the location being left.
  pub fn save(&self, leaving: &Location) {
    let positions: HashMap<String, ScrollPosition> = self.viewport.positions().into_iter().collect();
    self.cache.lock().insert(entry_key(leaving).to_string(), positions);
  }

  pub fn position(&self, location: &Location, element: &str) -> Option<ScrollPosition> {
    self.cache.lock().get(entry_key(location)).and_then(|m| m.get(element)).copied()
  }

  /// Apply scroll for a settled location: hash target first, then the cached
  /// offsets for its history entry, otherwise the top of the window.
  pub fn restore(&self, location: &Location) -> ScrollAction {
    if !location.hash.is_empty() && self.viewport.scroll_into_view(&location.hash, &self.options) {
      return ScrollAction::IntoView(location.hash.clone());
    }
    let cached = self.cache.lock().get(entry_key(location)).cloned();
    match cached {
      Some(positions) if !positions.is_empty() => {
        for (element, position) in positions {
          self.viewport.scroll_to(&element, position);
        }
        ScrollAction::Restored
      }
      _ => {
        self.viewport.scroll_to(WINDOW_KEY, ScrollPosition::default());
        ScrollAction::Top
      }
    }
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::value::Value;

  /// Viewport double with a fixed set of element ids.
  #[derive(Default)]
  pub(crate) struct FakeViewport {
    pub(crate) offsets: Mutex<HashMap<String, ScrollPosition>>,
    pub(crate) ids: Vec<String>,
    pub(crate) into_view: Mutex<Vec<String>>,
  }

  impl Viewport for FakeViewport {
    fn positions(&self) -> Vec<(String, ScrollPosition)> {
      self.offsets.lock().iter().map(|(k, v)| (k.clone(), *v)).collect()
    }

    fn scroll_to(&self, element: &str, position: ScrollPosition) {
      self.offsets.lock().insert(element.to_string(), position);
    }

    fn scroll_into_view(&self, id: &str, _options: &ScrollIntoViewOptions) -> bool {
      if self.ids.iter().any(|i| i == id) {
        self.into_view.lock().push(id.to_string());
        true
      } else {
        false
      }
    }
  }

  fn loc(href: &str, key: &str) -> Location {
    Location::parse(href, Value::Null).with_key(Some(key.to_string()))
  }

  #[test]
  fn restores_saved_offsets_per_entry() {
    let viewport = Arc::new(FakeViewport::default());
    let scroll = ScrollRestoration::new(viewport.clone(), ScrollIntoViewOptions::default());
    let first = loc("/a", "k1");
    viewport.scroll_to(WINDOW_KEY, ScrollPosition { x: 0.0, y: 420.0 });
    scroll.save(&first);

    assert_eq!(scroll.restore(&loc("/b", "k2")), ScrollAction::Top);
    assert_eq!(viewport.offsets.lock()[WINDOW_KEY].y, 0.0);

    assert_eq!(scroll.restore(&first), ScrollAction::Restored);
    assert_eq!(viewport.offsets.lock()[WINDOW_KEY].y, 420.0);
  }

  #[test]
  fn hash_scrolls_into_view() {
    let viewport = Arc::new(FakeViewport { ids: vec!["section".into()], ..FakeViewport::default() });
    let scroll = ScrollRestoration::new(viewport.clone(), ScrollIntoViewOptions::default());
    assert_eq!(scroll.restore(&loc("/a#section", "k")), ScrollAction::IntoView("section".into()));
    assert_eq!(viewport.into_view.lock().as_slice(), ["section".to_string()]);
  }

  #[test]
  fn unknown_hash_falls_back_to_top() {
    let viewport = Arc::new(FakeViewport::default());
    let scroll = ScrollRestoration::new(viewport, ScrollIntoViewOptions::default());
    assert_eq!(scroll.restore(&loc("/a#missing", "k")), ScrollAction::Top);
  }
}
