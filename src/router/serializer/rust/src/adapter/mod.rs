/* src/router/serializer/rust/src/adapter/mod.rs */

mod builtin;

use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

use trellis_router::{Opaque, Value};

use crate::error::SerializationError;

pub use builtin::{Date, FormData, Headers, RegExp, ValueMap, ValueSet};

/// Envelope tags owned by the codec itself.
pub(crate) const RESERVED_KEYS: [&str; 4] = ["$ref", "$promise", "$stream", "object"];

/// Converts one kind of non-plain value to and from a serializable form.
///
/// `to_serializable` may return values that themselves need adapters (a map
/// holding dates, say); the encoder recurses into the result.
pub trait SerializationAdapter: Send + Sync {
  fn key(&self) -> &str;

  fn test(&self, value: &Value) -> bool;

  fn to_serializable(&self, value: &Value) -> Result<Value, SerializationError>;

  fn from_serializable(&self, value: Value) -> Result<Value, SerializationError>;
}

type ToFn<T> = Arc<dyn Fn(&T) -> Value + Send + Sync>;
type FromFn<T> = Arc<dyn Fn(&Value) -> Result<T, String> + Send + Sync>;

/// Adapter for one concrete [`Opaque`] type, matched by downcast.
pub struct TypedAdapter<T> {
  key: String,
  to: ToFn<T>,
  from: FromFn<T>,
  _marker: PhantomData<fn() -> T>,
}

impl<T: Opaque> TypedAdapter<T> {
  pub fn new<F, G>(key: impl Into<String>, to: F, from: G) -> Self
  where
    F: Fn(&T) -> Value + Send + Sync + 'static,
    G: Fn(&Value) -> Result<T, String> + Send + Sync + 'static,
  {
    Self { key: key.into(), to: Arc::new(to), from: Arc::new(from), _marker: PhantomData }
  }
}

impl<T: Opaque> SerializationAdapter for TypedAdapter<T> {
  fn key(&self) -> &str {
    &self.key
  }

  fn test(&self, value: &Value) -> bool {
    value.downcast_ref::<T>().is_some()
  }

  fn to_serializable(&self, value: &Value) -> Result<Value, SerializationError> {
    let typed = value
      .downcast_ref::<T>()
      .ok_or_else(|| SerializationError::adapter(&self.key, "value does not match the adapter"))?;
    Ok((self.to)(typed))
  }

  fn from_serializable(&self, value: Value) -> Result<Value, SerializationError> {
    (self.from)(&value).map(Value::opaque).map_err(|m| SerializationError::adapter(&self.key, m))
  }
}

/// Ordered adapter list: user adapters in registration order, then the
/// built-ins. The first adapter whose `test` accepts a value wins.
#[derive(Clone)]
pub struct AdapterRegistry {
  adapters: Vec<Arc<dyn SerializationAdapter>>,
}

impl AdapterRegistry {
  pub fn builder() -> AdapterRegistryBuilder {
    AdapterRegistryBuilder { adapters: Vec::new() }
  }

  pub fn find(&self, value: &Value) -> Option<&Arc<dyn SerializationAdapter>> {
    self.adapters.iter().find(|a| a.test(value))
  }

  pub fn get(&self, key: &str) -> Option<&Arc<dyn SerializationAdapter>> {
    self.adapters.iter().find(|a| a.key() == key)
  }

  pub fn keys(&self) -> Vec<&str> {
    self.adapters.iter().map(|a| a.key()).collect()
  }
}

impl Default for AdapterRegistry {
  fn default() -> Self {
    Self { adapters: builtin::adapters() }
  }
}

pub struct AdapterRegistryBuilder {
  adapters: Vec<Arc<dyn SerializationAdapter>>,
}

impl AdapterRegistryBuilder {
  pub fn adapter<A: SerializationAdapter + 'static>(mut self, adapter: A) -> Self {
    self.adapters.push(Arc::new(adapter));
    self
  }

  pub fn shared(mut self, adapter: Arc<dyn SerializationAdapter>) -> Self {
    self.adapters.push(adapter);
    self
  }

  /// Fails when two adapters (user or built-in) share a key, or a key
  /// collides with a codec tag.
  pub fn build(self) -> Result<AdapterRegistry, SerializationError> {
    let mut adapters = self.adapters;
    adapters.extend(builtin::adapters());
    let mut seen = HashSet::new();
    for adapter in &adapters {
      if RESERVED_KEYS.contains(&adapter.key()) || !seen.insert(adapter.key().to_string()) {
        return Err(SerializationError::DuplicateAdapter(adapter.key().to_string()));
      }
    }
    Ok(AdapterRegistry { adapters })
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use std::any::Any;

  use trellis_router::opaque_eq;

  use super::*;

  #[derive(Debug, PartialEq)]
  pub(crate) struct Point {
    pub(crate) x: f64,
    pub(crate) y: f64,
  }

  impl Opaque for Point {
    fn type_name(&self) -> &'static str {
      "Point"
    }
    fn as_any(&self) -> &dyn Any {
      self
    }
    fn eq_opaque(&self, other: &dyn Opaque) -> bool {
      opaque_eq(self, other)
    }
  }

  pub(crate) fn point_adapter(key: &str) -> TypedAdapter<Point> {
    TypedAdapter::new(
      key,
      |p: &Point| Value::array(vec![Value::from(p.x), Value::from(p.y)]),
      |v: &Value| {
        let items = v.as_array().ok_or("expected [x, y]")?;
        match items {
          [x, y] => Ok(Point {
            x: x.as_f64().ok_or("x is not a number")?,
            y: y.as_f64().ok_or("y is not a number")?,
          }),
          _ => Err("expected [x, y]".to_string()),
        }
      },
    )
  }

  #[test]
  fn user_adapters_come_before_builtins() {
    let registry = AdapterRegistry::builder().adapter(point_adapter("Point")).build().unwrap();
    let keys = registry.keys();
    assert_eq!(keys[0], "Point");
    assert_eq!(&keys[1..], &["$number", "Date", "RegExp", "Map", "Set", "FormData", "Headers"]);
  }

  #[test]
  fn first_matching_adapter_wins() {
    let registry = AdapterRegistry::builder()
      .adapter(point_adapter("PointA"))
      .adapter(point_adapter("PointB"))
      .build()
      .unwrap();
    let value = Value::opaque(Point { x: 1.0, y: 2.0 });
    assert_eq!(registry.find(&value).map(|a| a.key()), Some("PointA"));
  }

  #[test]
  fn duplicate_keys_are_rejected() {
    let err = AdapterRegistry::builder()
      .adapter(point_adapter("Point"))
      .adapter(point_adapter("Point"))
      .build()
      .err()
      .unwrap();
    assert!(matches!(err, SerializationError::DuplicateAdapter(ref k) if k == "Point"));

    let shadowing = AdapterRegistry::builder().adapter(point_adapter("Date")).build();
    assert!(shadowing.is_err());
    let reserved = AdapterRegistry::builder().adapter(point_adapter("$ref")).build();
    assert!(reserved.is_err());
  }

  #[test]
  fn typed_adapter_reports_bad_payloads() {
    let adapter = point_adapter("Point");
    let err = adapter.from_serializable(Value::from("nope")).err().unwrap();
    assert_eq!(err.to_string(), "adapter `Point`: expected [x, y]");
  }
}
