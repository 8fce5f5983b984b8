/* src/router/core/rust/src/value.rs */

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures_core::Stream;
use futures_util::future::{FutureExt, Shared};
use parking_lot::Mutex;

use crate::{BoxFuture, BoxStream};

pub type Map = BTreeMap<String, Value>;

/// Dynamic value flowing through loaders, contexts, search params and the wire.
///
/// Containers are reference counted so that identity survives clones; this is
/// what structural sharing and the serializer's reference graph key on.
#[derive(Clone, Debug, Default)]
pub enum Value {
  #[default]
  Null,
  Bool(bool),
  Number(f64),
  String(String),
  Array(Arc<Vec<Value>>),
  Object(Arc<Map>),
  /// Non-plain leaf (dates, regexes, class instances). Compared by identity
  /// during structural sharing and never recursed into.
  Opaque(Arc<dyn Opaque>),
  Deferred(Deferred),
  Stream(RawStream),
}

/// A non-JSON value carried opaquely by the router.
pub trait Opaque: Any + Send + Sync + fmt::Debug {
  fn type_name(&self) -> &'static str;

  fn as_any(&self) -> &dyn Any;

  fn eq_opaque(&self, other: &dyn Opaque) -> bool;
}

/// Equality helper for `Opaque::eq_opaque` implementations.
pub fn opaque_eq<T: PartialEq + 'static>(this: &T, other: &dyn Opaque) -> bool {
  other.as_any().downcast_ref::<T>().is_some_and(|o| o == this)
}

impl Value {
  pub fn object<K, I>(entries: I) -> Self
  where
    K: Into<String>,
    I: IntoIterator<Item = (K, Value)>,
  {
    Value::Object(Arc::new(entries.into_iter().map(|(k, v)| (k.into(), v)).collect()))
  }

  pub fn empty_object() -> Self {
    Value::Object(Arc::new(Map::new()))
  }

  pub fn array(items: Vec<Value>) -> Self {
    Value::Array(Arc::new(items))
  }

  pub fn opaque<T: Opaque>(value: T) -> Self {
    Value::Opaque(Arc::new(value))
  }

  pub fn is_null(&self) -> bool {
    matches!(self, Value::Null)
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::String(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_f64(&self) -> Option<f64> {
    match self {
      Value::Number(n) => Some(*n),
      _ => None,
    }
  }

  pub fn as_bool(&self) -> Option<bool> {
    match self {
      Value::Bool(b) => Some(*b),
      _ => None,
    }
  }

  pub fn as_object(&self) -> Option<&Map> {
    match self {
      Value::Object(map) => Some(map),
      _ => None,
    }
  }

  pub fn as_array(&self) -> Option<&[Value]> {
    match self {
      Value::Array(items) => Some(items),
      _ => None,
    }
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.as_object().and_then(|m| m.get(key))
  }

  pub fn downcast_ref<T: Opaque>(&self) -> Option<&T> {
    match self {
      Value::Opaque(o) => o.as_any().downcast_ref::<T>(),
      _ => None,
    }
  }

  /// Whether the value holds no deferred or streamed parts anywhere inside.
  pub fn is_settled(&self) -> bool {
    match self {
      Value::Deferred(_) | Value::Stream(_) => false,
      Value::Array(items) => items.iter().all(Value::is_settled),
      Value::Object(map) => map.values().all(Value::is_settled),
      _ => true,
    }
  }

  /// Identity comparison: containers and opaque leaves by pointer, scalars by value.
  pub fn same(&self, other: &Value) -> bool {
    match (self, other) {
      (Value::Null, Value::Null) => true,
      (Value::Bool(a), Value::Bool(b)) => a == b,
      (Value::Number(a), Value::Number(b)) => a.to_bits() == b.to_bits(),
      (Value::String(a), Value::String(b)) => a == b,
      (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
      (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
      (Value::Opaque(a), Value::Opaque(b)) => std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b)),
      (Value::Deferred(a), Value::Deferred(b)) => a.ptr_eq(b),
      (Value::Stream(a), Value::Stream(b)) => a.ptr_eq(b),
      _ => false,
    }
  }

  /// Shallow object spread: keys of `other` win. Non-object operands are
  /// treated as empty objects.
  pub fn merge(&self, other: &Value) -> Value {
    let Some(extra) = other.as_object().filter(|m| !m.is_empty()) else {
      return match self {
        Value::Object(_) => self.clone(),
        _ => Value::empty_object(),
      };
    };
    let mut out = self.as_object().cloned().unwrap_or_default();
    for (k, v) in extra {
      out.insert(k.clone(), v.clone());
    }
    Value::Object(Arc::new(out))
  }

  /// Plain JSON view of the value. `None` when a non-plain part is present.
  pub fn to_json(&self) -> Option<serde_json::Value> {
    Some(match self {
      Value::Null => serde_json::Value::Null,
      Value::Bool(b) => serde_json::Value::Bool(*b),
      Value::Number(n) => serde_json::Value::Number(json_number(*n)?),
      Value::String(s) => serde_json::Value::String(s.clone()),
      Value::Array(items) => {
        serde_json::Value::Array(items.iter().map(Value::to_json).collect::<Option<_>>()?)
      }
      Value::Object(map) => serde_json::Value::Object(
        map
          .iter()
          .map(|(k, v)| v.to_json().map(|j| (k.clone(), j)))
          .collect::<Option<_>>()?,
      ),
      Value::Opaque(_) | Value::Deferred(_) | Value::Stream(_) => return None,
    })
  }

  /// Stable text form used for match ids and diagnostics.
  pub fn to_key_string(&self) -> String {
    match self.to_json() {
      Some(json) => json.to_string(),
      None => format!("{self:?}"),
    }
  }

  pub fn from_serialize<T: serde::Serialize>(value: &T) -> Result<Value, serde_json::Error> {
    serde_json::to_value(value).map(Value::from)
  }

  pub fn deserialize_into<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
    let json = self
      .to_json()
      .ok_or_else(|| <serde_json::Error as serde::de::Error>::custom("value is not plain data"))?;
    serde_json::from_value(json)
  }
}

#[allow(clippy::cast_possible_truncation)]
fn json_number(n: f64) -> Option<serde_json::Number> {
  if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
    return Some(serde_json::Number::from(n as i64));
  }
  serde_json::Number::from_f64(n)
}

impl PartialEq for Value {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
      (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b) || a == b,
      (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b) || a == b,
      (Value::Opaque(a), Value::Opaque(b)) => a.eq_opaque(b.as_ref()),
      _ => self.same(other),
    }
  }
}

impl From<serde_json::Value> for Value {
  fn from(json: serde_json::Value) -> Self {
    match json {
      serde_json::Value::Null => Value::Null,
      serde_json::Value::Bool(b) => Value::Bool(b),
      serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
      serde_json::Value::String(s) => Value::String(s),
      serde_json::Value::Array(items) => Value::array(items.into_iter().map(Value::from).collect()),
      serde_json::Value::Object(map) => Value::object(map.into_iter().map(|(k, v)| (k, v.into()))),
    }
  }
}

impl From<&str> for Value {
  fn from(s: &str) -> Self {
    Value::String(s.to_string())
  }
}

impl From<String> for Value {
  fn from(s: String) -> Self {
    Value::String(s)
  }
}

impl From<bool> for Value {
  fn from(b: bool) -> Self {
    Value::Bool(b)
  }
}

impl From<f64> for Value {
  fn from(n: f64) -> Self {
    Value::Number(n)
  }
}

impl From<i64> for Value {
  #[allow(clippy::cast_precision_loss)]
  fn from(n: i64) -> Self {
    Value::Number(n as f64)
  }
}

impl From<Vec<Value>> for Value {
  fn from(items: Vec<Value>) -> Self {
    Value::array(items)
  }
}

impl From<Map> for Value {
  fn from(map: Map) -> Self {
    Value::Object(Arc::new(map))
  }
}

pub type DeferredResult = Result<Value, Value>;

/// A value that settles after the initial response: a promise on the wire.
#[derive(Clone)]
pub struct Deferred {
  inner: Arc<Shared<BoxFuture<DeferredResult>>>,
}

impl Deferred {
  pub fn new<F>(fut: F) -> Self
  where
    F: Future<Output = DeferredResult> + Send + 'static,
  {
    let boxed: BoxFuture<DeferredResult> = Box::pin(fut);
    Self { inner: Arc::new(boxed.shared()) }
  }

  pub fn resolved(value: Value) -> Self {
    Self::new(async move { Ok(value) })
  }

  /// Wait for the outcome. Every waiter observes the same result.
  pub async fn settled(&self) -> DeferredResult {
    (*self.inner).clone().await
  }

  /// Outcome if already available, without polling the underlying future.
  pub fn peek(&self) -> Option<DeferredResult> {
    self.inner.peek().cloned()
  }

  pub fn ptr_eq(&self, other: &Deferred) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner)
  }
}

impl fmt::Debug for Deferred {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Deferred").field("settled", &self.inner.peek().is_some()).finish()
  }
}

/// How a raw byte stream should be carried over a text transport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StreamHint {
  /// Always base64.
  #[default]
  Binary,
  /// UTF-8 text when every chunk decodes, base64 for chunks that do not.
  Text,
}

/// A single-consumer byte stream embedded in a value.
#[derive(Clone)]
pub struct RawStream {
  inner: Arc<RawStreamInner>,
}

struct RawStreamInner {
  hint: StreamHint,
  source: Mutex<Option<BoxStream<Result<Bytes, String>>>>,
}

impl RawStream {
  pub fn new<S>(hint: StreamHint, stream: S) -> Self
  where
    S: Stream<Item = Result<Bytes, String>> + Send + 'static,
  {
    Self { inner: Arc::new(RawStreamInner { hint, source: Mutex::new(Some(Box::pin(stream))) }) }
  }

  pub fn hint(&self) -> StreamHint {
    self.inner.hint
  }

  /// Take the underlying stream. Returns `None` once consumed.
  pub fn take(&self) -> Option<BoxStream<Result<Bytes, String>>> {
    self.inner.source.lock().take()
  }

  pub fn ptr_eq(&self, other: &RawStream) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner)
  }
}

impl fmt::Debug for RawStream {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RawStream").field("hint", &self.inner.hint).finish_non_exhaustive()
  }
}

/// Reconcile `next` against `prev`, returning `prev`'s containers for every
/// subtree that is deeply equal. Opaque leaves are compared by identity only.
pub fn replace_equal_deep(prev: &Value, next: &Value) -> Value {
  let mut memo = HashMap::new();
  share(prev, next, &mut memo)
}

fn share(prev: &Value, next: &Value, memo: &mut HashMap<usize, Value>) -> Value {
  if prev.same(next) {
    return prev.clone();
  }
  match (prev, next) {
    (Value::Array(p), Value::Array(n)) => {
      let key = Arc::as_ptr(n) as usize;
      if let Some(hit) = memo.get(&key) {
        return hit.clone();
      }
      let mut reused = p.len() == n.len();
      let mut items = Vec::with_capacity(n.len());
      for (i, item) in n.iter().enumerate() {
        match p.get(i) {
          Some(old) => {
            let shared = share(old, item, memo);
            reused &= shared.same(old);
            items.push(shared);
          }
          None => {
            reused = false;
            items.push(item.clone());
          }
        }
      }
      let out = if reused { prev.clone() } else { Value::Array(Arc::new(items)) };
      memo.insert(key, out.clone());
      out
    }
    (Value::Object(p), Value::Object(n)) => {
      let key = Arc::as_ptr(n) as usize;
      if let Some(hit) = memo.get(&key) {
        return hit.clone();
      }
      let mut reused = p.len() == n.len();
      let mut out = Map::new();
      for (k, item) in n.iter() {
        match p.get(k) {
          Some(old) => {
            let shared = share(old, item, memo);
            reused &= shared.same(old);
            out.insert(k.clone(), shared);
          }
          None => {
            reused = false;
            out.insert(k.clone(), item.clone());
          }
        }
      }
      let out = if reused { prev.clone() } else { Value::Object(Arc::new(out)) };
      memo.insert(key, out.clone());
      out
    }
    (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan() => prev.clone(),
    _ => next.clone(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample() -> Value {
    Value::object([
      ("user", Value::object([("name", Value::from("ada")), ("age", Value::from(36_i64))])),
      ("tags", Value::array(vec![Value::from("a"), Value::from("b")])),
    ])
  }

  #[test]
  fn deep_equal_input_keeps_previous_root() {
    let prev = sample();
    let next = sample();
    assert!(!prev.same(&next));
    let out = replace_equal_deep(&prev, &next);
    assert!(out.same(&prev));
  }

  #[test]
  fn unchanged_subtree_keeps_identity() {
    let prev = sample();
    let next = Value::object([
      ("user", Value::object([("name", Value::from("ada")), ("age", Value::from(36_i64))])),
      ("tags", Value::array(vec![Value::from("a"), Value::from("c")])),
    ]);
    let out = replace_equal_deep(&prev, &next);
    assert!(!out.same(&prev));
    assert!(out.get("user").unwrap().same(prev.get("user").unwrap()));
    assert!(!out.get("tags").unwrap().same(prev.get("tags").unwrap()));
    assert_eq!(out, next);
  }

  #[test]
  fn added_key_produces_new_object() {
    let prev = Value::object([("a", Value::from(1_i64))]);
    let next = Value::object([("a", Value::from(1_i64)), ("b", Value::from(2_i64))]);
    let out = replace_equal_deep(&prev, &next);
    assert!(!out.same(&prev));
    assert_eq!(out, next);
  }

  #[derive(Debug, PartialEq)]
  struct Stamp(u32);

  impl Opaque for Stamp {
    fn type_name(&self) -> &'static str {
      "Stamp"
    }
    fn as_any(&self) -> &dyn Any {
      self
    }
    fn eq_opaque(&self, other: &dyn Opaque) -> bool {
      opaque_eq(self, other)
    }
  }

  #[test]
  fn opaque_leaves_compare_by_identity() {
    let prev = Value::object([("at", Value::opaque(Stamp(1)))]);
    let next = Value::object([("at", Value::opaque(Stamp(1)))]);
    // deep equal, but the opaque leaf is a different instance
    assert_eq!(prev, next);
    let out = replace_equal_deep(&prev, &next);
    assert!(!out.same(&prev));
    assert!(out.get("at").unwrap().same(next.get("at").unwrap()));
  }

  #[test]
  fn shared_next_subtree_resolves_once() {
    let shared = Value::object([("x", Value::from(1_i64))]);
    let next = Value::array(vec![shared.clone(), shared]);
    let prev = Value::array(vec![Value::Null]);
    let out = replace_equal_deep(&prev, &next);
    let items = out.as_array().unwrap();
    assert!(items[0].same(&items[1]));
  }

  #[test]
  fn merge_is_shallow_and_later_wins() {
    let a = Value::object([("a", Value::from(1_i64)), ("b", Value::from(1_i64))]);
    let b = Value::object([("b", Value::from(2_i64))]);
    let merged = a.merge(&b);
    assert_eq!(merged.get("a"), Some(&Value::from(1_i64)));
    assert_eq!(merged.get("b"), Some(&Value::from(2_i64)));
    assert!(a.merge(&Value::Null).same(&a));
  }

  #[test]
  fn json_round_trip_for_plain_values() {
    let json = serde_json::json!({"n": 1, "f": 1.5, "s": "x", "l": [true, null]});
    let value = Value::from(json.clone());
    assert_eq!(value.to_json(), Some(json));
    assert_eq!(Value::opaque(Stamp(1)).to_json(), None);
  }

  #[tokio::test]
  async fn deferred_is_shared_between_waiters() {
    let d = Deferred::new(async { Ok(Value::from("done")) });
    let other = d.clone();
    assert_eq!(d.settled().await, Ok(Value::from("done")));
    assert_eq!(other.settled().await, Ok(Value::from("done")));
    assert!(d.ptr_eq(&other));
  }
}
