/* src/router/core/rust/src/location.rs */

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::path::{decode_path, encode_href_path, encode_uri_component};
use crate::value::{Map, Value};

/// A concrete place in the application. `href` is always rebuilt from the
/// other fields, so it stays the canonical, re-parseable form.
#[derive(Clone, Debug, PartialEq)]
pub struct Location {
  /// Decoded pathname. Reserved escapes (`%25`, `%2F`, `%5C`, `%3F`, `%23`, ..)
  /// stay encoded.
  pub pathname: String,
  /// Parsed query as an object value.
  pub search: Value,
  /// Serialized query including the leading `?`, or empty.
  pub search_str: String,
  /// Fragment without the leading `#`.
  pub hash: String,
  pub state: Value,
  pub href: String,
  /// History entry key, when the location came from a history stack.
  pub key: Option<String>,
}

impl Location {
  pub fn new(pathname: impl Into<String>, search: Value, hash: impl Into<String>, state: Value) -> Self {
    let pathname = decode_path(&encode_href_path(&pathname.into()));
    let hash = hash.into();
    let search = if search.as_object().is_some() { search } else { Value::empty_object() };
    let search_str = stringify_search(&search);
    let href = build_href(&pathname, &search_str, &hash);
    Self { pathname, search, search_str, hash, state, href, key: None }
  }

  /// Parse an href (path, query and fragment; an origin is ignored).
  pub fn parse(href: &str, state: Value) -> Self {
    let href = strip_origin(href);
    let (rest, hash) = href.split_once('#').unwrap_or((href, ""));
    let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
    let pathname = decode_path(if path.is_empty() { "/" } else { path });
    let pathname = if pathname.is_empty() { "/".to_string() } else { pathname };
    Self::new(pathname, parse_search(query), hash, state)
  }

  pub fn with_key(mut self, key: Option<String>) -> Self {
    self.key = key;
    self
  }

  /// Same location with `search` replaced and `href` rebuilt.
  pub fn with_search(&self, search: Value) -> Self {
    Self::new(self.pathname.clone(), search, self.hash.clone(), self.state.clone())
      .with_key(self.key.clone())
  }
}

fn strip_origin(href: &str) -> &str {
  match href.split_once("://") {
    Some((scheme, rest)) if !scheme.contains('/') => match rest.find('/') {
      Some(idx) => &rest[idx..],
      None => "/",
    },
    _ => href,
  }
}

fn build_href(pathname: &str, search_str: &str, hash: &str) -> String {
  let mut href = encode_href_path(pathname);
  href.push_str(search_str);
  if !hash.is_empty() {
    href.push('#');
    href.push_str(hash);
  }
  href
}

/// Parse a query string. Values that are valid JSON become JSON values,
/// everything else stays a string; repeated keys collect into an array.
pub fn parse_search(query: &str) -> Value {
  let query = query.strip_prefix('?').unwrap_or(query);
  if query.is_empty() {
    return Value::empty_object();
  }
  let pairs: Vec<(String, String)> = match serde_urlencoded::from_str(query) {
    Ok(pairs) => pairs,
    Err(e) => {
      tracing::debug!(error = %e, "unparseable search string");
      return Value::empty_object();
    }
  };
  let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
  for (k, v) in pairs {
    grouped.entry(k).or_default().push(v);
  }
  let map: Map = grouped
    .into_iter()
    .map(|(k, mut values)| {
      let value = if values.len() == 1 {
        let raw = values.remove(0);
        match serde_json::from_str::<serde_json::Value>(&raw) {
          Ok(json) => Value::from(json),
          Err(_) => Value::String(raw),
        }
      } else {
        Value::array(values.into_iter().map(Value::String).collect())
      };
      (k, value)
    })
    .collect();
  Value::from(map)
}

/// Inverse of `parse_search`, including the leading `?` when non-empty.
/// Strings that would parse as JSON are quoted so they read back as strings.
pub fn stringify_search(search: &Value) -> String {
  let Some(map) = search.as_object() else {
    return String::new();
  };
  let parts: Vec<String> = map
    .iter()
    .filter_map(|(k, v)| {
      let text = match v {
        Value::Null => return None,
        Value::String(s) => {
          if serde_json::from_str::<serde_json::Value>(s).is_ok() {
            serde_json::Value::String(s.clone()).to_string()
          } else {
            s.clone()
          }
        }
        other => other.to_json()?.to_string(),
      };
      Some(format!("{}={}", encode_uri_component(k), encode_uri_component(&text)))
    })
    .collect();
  if parts.is_empty() { String::new() } else { format!("?{}", parts.join("&")) }
}

/// How `build_location` derives the next search object.
#[derive(Clone, Default)]
pub enum SearchUpdate {
  /// Start from an empty search.
  #[default]
  Clear,
  /// Carry the current search over unchanged.
  Keep,
  Replace(Value),
  Update(Arc<dyn Fn(&Value) -> Value + Send + Sync>),
}

impl SearchUpdate {
  pub fn update<F>(f: F) -> Self
  where
    F: Fn(&Value) -> Value + Send + Sync + 'static,
  {
    SearchUpdate::Update(Arc::new(f))
  }

  pub fn apply(&self, current: &Value) -> Value {
    match self {
      SearchUpdate::Clear => Value::empty_object(),
      SearchUpdate::Keep => current.clone(),
      SearchUpdate::Replace(v) => v.clone(),
      SearchUpdate::Update(f) => f(current),
    }
  }
}

impl fmt::Debug for SearchUpdate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SearchUpdate::Clear => f.write_str("Clear"),
      SearchUpdate::Keep => f.write_str("Keep"),
      SearchUpdate::Replace(v) => f.debug_tuple("Replace").field(v).finish(),
      SearchUpdate::Update(_) => f.write_str("Update(..)"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_path_query_and_hash() {
    let loc = Location::parse("/posts/1?page=2&q=hello#top", Value::Null);
    assert_eq!(loc.pathname, "/posts/1");
    assert_eq!(loc.search.get("page"), Some(&Value::from(2_i64)));
    assert_eq!(loc.search.get("q"), Some(&Value::from("hello")));
    assert_eq!(loc.hash, "top");
    assert_eq!(loc.href, "/posts/1?page=2&q=hello#top");
  }

  #[test]
  fn href_is_reparseable() {
    let search = Value::object([
      ("filter", Value::object([("tag", Value::from("rust"))])),
      ("n", Value::from("1")),
      ("term", Value::from("a b")),
    ]);
    let loc = Location::new("/caf\u{e9}/items", search, "", Value::Null);
    let again = Location::parse(&loc.href, Value::Null);
    assert_eq!(again.pathname, loc.pathname);
    assert_eq!(again.search, loc.search);
    assert_eq!(again.href, loc.href);
  }

  #[test]
  fn numeric_looking_strings_are_quoted() {
    let s = stringify_search(&Value::object([("n", Value::from("1"))]));
    assert_eq!(s, "?n=%221%22");
    let back = parse_search(&s);
    assert_eq!(back.get("n"), Some(&Value::from("1")));
  }

  #[test]
  fn plain_strings_stay_bare() {
    assert_eq!(stringify_search(&Value::object([("default", Value::from("d1"))])), "?default=d1");
  }

  #[test]
  fn repeated_keys_collect() {
    let v = parse_search("?t=a&t=b");
    assert_eq!(v.get("t"), Some(&Value::array(vec![Value::from("a"), Value::from("b")])));
  }

  #[test]
  fn empty_search_has_no_question_mark() {
    let loc = Location::new("/", Value::Null, "", Value::Null);
    assert_eq!(loc.search_str, "");
    assert_eq!(loc.href, "/");
  }

  #[test]
  fn encoded_slash_survives_round_trip() {
    let loc = Location::parse("/files/foo%2Fbar", Value::Null);
    assert_eq!(loc.pathname, "/files/foo%2Fbar");
    assert_eq!(loc.href, "/files/foo%2Fbar");
  }

  #[test]
  fn encoded_query_and_fragment_markers_stay_in_the_path() {
    let loc = Location::parse("/files/a%3Fb%23c?x=1#top", Value::Null);
    assert_eq!(loc.pathname, "/files/a%3Fb%23c");
    assert_eq!(loc.href, "/files/a%3Fb%23c?x=1#top");
    assert_eq!(Location::parse(&loc.href, Value::Null), loc);

    let raw = Location::new("/files/a?b#c", Value::empty_object(), "", Value::Null);
    assert_eq!(raw.pathname, "/files/a%3Fb%23c");
    assert_eq!(Location::parse(&raw.href, Value::Null).pathname, raw.pathname);
  }

  #[test]
  fn origin_is_ignored() {
    let loc = Location::parse("https://example.com/a?b=c", Value::Null);
    assert_eq!(loc.href, "/a?b=c");
  }

  #[test]
  fn search_updates() {
    let current = Value::object([("a", Value::from(1_i64))]);
    assert_eq!(SearchUpdate::Keep.apply(&current), current);
    assert_eq!(SearchUpdate::Clear.apply(&current), Value::empty_object());
    let bumped = SearchUpdate::update(|s| s.merge(&Value::object([("b", Value::from(2_i64))])));
    assert_eq!(bumped.apply(&current).get("b"), Some(&Value::from(2_i64)));
  }
}
