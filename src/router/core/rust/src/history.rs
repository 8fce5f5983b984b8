/* src/router/core/rust/src/history.rs */

use parking_lot::Mutex;

use crate::value::Value;

#[derive(Clone, Debug, PartialEq)]
pub struct HistoryEntry {
  pub href: String,
  pub state: Value,
  /// Unique per entry; scroll positions are cached under it.
  pub key: String,
}

/// The navigation stack the router commits locations into.
pub trait History: Send + Sync {
  fn current(&self) -> HistoryEntry;

  fn push(&self, href: &str, state: Value) -> HistoryEntry;

  fn replace(&self, href: &str, state: Value) -> HistoryEntry;

  fn go(&self, delta: isize);

  fn back(&self) {
    self.go(-1);
  }

  fn forward(&self) {
    self.go(1);
  }

  /// Leave the application with a full document load.
  fn reload_document(&self, href: &str);
}

/// In-memory history, used on the server and in tests.
pub struct MemoryHistory {
  inner: Mutex<MemoryInner>,
}

struct MemoryInner {
  entries: Vec<HistoryEntry>,
  index: usize,
  next_key: u64,
  reloads: Vec<String>,
}

impl MemoryInner {
  fn entry(&mut self, href: &str, state: Value) -> HistoryEntry {
    self.next_key += 1;
    HistoryEntry { href: href.to_string(), state, key: format!("{:06x}", self.next_key) }
  }
}

impl MemoryHistory {
  pub fn new(initial: &str) -> Self {
    let mut inner = MemoryInner { entries: Vec::new(), index: 0, next_key: 0, reloads: Vec::new() };
    let first = inner.entry(initial, Value::Null);
    inner.entries.push(first);
    Self { inner: Mutex::new(inner) }
  }

  pub fn entries(&self) -> Vec<HistoryEntry> {
    self.inner.lock().entries.clone()
  }

  pub fn index(&self) -> usize {
    self.inner.lock().index
  }

  /// Document loads requested through `reload_document`.
  pub fn reloads(&self) -> Vec<String> {
    self.inner.lock().reloads.clone()
  }
}

impl History for MemoryHistory {
  fn current(&self) -> HistoryEntry {
    let inner = self.inner.lock();
    inner.entries[inner.index].clone()
  }

  fn push(&self, href: &str, state: Value) -> HistoryEntry {
    let mut inner = self.inner.lock();
    let entry = inner.entry(href, state);
    let next = inner.index + 1;
    inner.entries.truncate(next);
    inner.entries.push(entry.clone());
    inner.index = next;
    entry
  }

  fn replace(&self, href: &str, state: Value) -> HistoryEntry {
    let mut inner = self.inner.lock();
    let entry = inner.entry(href, state);
    let index = inner.index;
    inner.entries[index] = entry.clone();
    entry
  }

  fn go(&self, delta: isize) {
    let mut inner = self.inner.lock();
    let last = inner.entries.len().saturating_sub(1);
    inner.index = inner.index.saturating_add_signed(delta).min(last);
  }

  fn reload_document(&self, href: &str) {
    self.inner.lock().reloads.push(href.to_string());
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn push_truncates_forward_entries() {
    let h = MemoryHistory::new("/");
    h.push("/a", Value::Null);
    h.push("/b", Value::Null);
    h.back();
    assert_eq!(h.current().href, "/a");
    h.push("/c", Value::Null);
    let hrefs: Vec<_> = h.entries().into_iter().map(|e| e.href).collect();
    assert_eq!(hrefs, vec!["/", "/a", "/c"]);
  }

  #[test]
  fn replace_keeps_length_and_changes_key() {
    let h = MemoryHistory::new("/");
    let before = h.current().key;
    h.replace("/x", Value::Null);
    assert_eq!(h.entries().len(), 1);
    assert_ne!(h.current().key, before);
  }

  #[test]
  fn go_is_clamped() {
    let h = MemoryHistory::new("/");
    h.push("/a", Value::Null);
    h.go(-5);
    assert_eq!(h.index(), 0);
    h.go(9);
    assert_eq!(h.index(), 1);
  }
}
