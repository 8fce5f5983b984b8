/* src/router/serializer/rust/src/adapter/builtin.rs */

use std::any::Any;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use trellis_router::{Opaque, Value, opaque_eq};

use super::{SerializationAdapter, TypedAdapter};
use crate::error::SerializationError;

/// A point in time, carried as ISO-8601 with millisecond precision.
#[derive(Clone, Debug, PartialEq)]
pub struct Date(pub DateTime<Utc>);

#[derive(Clone, Debug, PartialEq)]
pub struct RegExp {
  pub source: String,
  pub flags: String,
}

/// Insertion-ordered map with arbitrary keys.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValueMap(pub Vec<(Value, Value)>);

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValueSet(pub Vec<Value>);

/// Ordered form fields. Repeated names are kept.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FormData(pub Vec<(String, String)>);

/// Ordered header pairs with lower-cased names.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Headers(pub Vec<(String, String)>);

impl FormData {
  pub fn get(&self, name: &str) -> Option<&str> {
    self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
  }
}

impl Headers {
  pub fn new<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
  where
    K: AsRef<str>,
    V: Into<String>,
  {
    Self(pairs.into_iter().map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.into())).collect())
  }

  pub fn get(&self, name: &str) -> Option<&str> {
    let name = name.to_ascii_lowercase();
    self.0.iter().find(|(k, _)| *k == name).map(|(_, v)| v.as_str())
  }
}

macro_rules! impl_opaque {
  ($ty:ty, $name:literal) => {
    impl Opaque for $ty {
      fn type_name(&self) -> &'static str {
        $name
      }

      fn as_any(&self) -> &dyn Any {
        self
      }

      fn eq_opaque(&self, other: &dyn Opaque) -> bool {
        opaque_eq(self, other)
      }
    }
  };
}

impl_opaque!(Date, "Date");
impl_opaque!(RegExp, "RegExp");
impl_opaque!(ValueMap, "Map");
impl_opaque!(ValueSet, "Set");
impl_opaque!(FormData, "FormData");
impl_opaque!(Headers, "Headers");

/// NaN and the infinities, which JSON cannot carry as numbers.
struct NumberAdapter;

impl SerializationAdapter for NumberAdapter {
  fn key(&self) -> &str {
    "$number"
  }

  fn test(&self, value: &Value) -> bool {
    matches!(value, Value::Number(n) if !n.is_finite())
  }

  fn to_serializable(&self, value: &Value) -> Result<Value, SerializationError> {
    let text = match value.as_f64() {
      Some(n) if n.is_nan() => "NaN",
      Some(n) if n == f64::INFINITY => "Infinity",
      Some(n) if n == f64::NEG_INFINITY => "-Infinity",
      _ => return Err(SerializationError::adapter("$number", "expected a non-finite number")),
    };
    Ok(Value::from(text))
  }

  fn from_serializable(&self, value: Value) -> Result<Value, SerializationError> {
    match value.as_str() {
      Some("NaN") => Ok(Value::from(f64::NAN)),
      Some("Infinity") => Ok(Value::from(f64::INFINITY)),
      Some("-Infinity") => Ok(Value::from(f64::NEG_INFINITY)),
      _ => Err(SerializationError::adapter("$number", "unknown number literal")),
    }
  }
}

fn string_pairs(pairs: &[(String, String)]) -> Value {
  Value::array(
    pairs.iter().map(|(k, v)| Value::array(vec![Value::from(k.as_str()), Value::from(v.as_str())])).collect(),
  )
}

fn parse_string_pairs(value: &Value) -> Result<Vec<(String, String)>, String> {
  value
    .as_array()
    .ok_or("expected an array of pairs")?
    .iter()
    .map(|pair| match pair.as_array() {
      Some([k, v]) => match (k.as_str(), v.as_str()) {
        (Some(k), Some(v)) => Ok((k.to_string(), v.to_string())),
        _ => Err("pair entries must be strings".to_string()),
      },
      _ => Err("expected a [name, value] pair".to_string()),
    })
    .collect()
}

pub(super) fn adapters() -> Vec<Arc<dyn SerializationAdapter>> {
  vec![
    Arc::new(NumberAdapter),
    Arc::new(TypedAdapter::new(
      "Date",
      |d: &Date| Value::from(d.0.to_rfc3339_opts(SecondsFormat::Millis, true)),
      |v: &Value| {
        let text = v.as_str().ok_or("expected an ISO-8601 string")?;
        DateTime::parse_from_rfc3339(text).map(|d| Date(d.with_timezone(&Utc))).map_err(|e| e.to_string())
      },
    )),
    Arc::new(TypedAdapter::new(
      "RegExp",
      |r: &RegExp| {
        Value::object([("source", Value::from(r.source.as_str())), ("flags", Value::from(r.flags.as_str()))])
      },
      |v: &Value| {
        let field = |name: &str| v.get(name).and_then(Value::as_str).map(str::to_string);
        Ok(RegExp { source: field("source").ok_or("missing source")?, flags: field("flags").unwrap_or_default() })
      },
    )),
    Arc::new(TypedAdapter::new(
      "Map",
      |m: &ValueMap| {
        Value::array(m.0.iter().map(|(k, v)| Value::array(vec![k.clone(), v.clone()])).collect())
      },
      |v: &Value| {
        let entries = v.as_array().ok_or("expected an array of entries")?;
        entries
          .iter()
          .map(|entry| match entry.as_array() {
            Some([k, v]) => Ok((k.clone(), v.clone())),
            _ => Err("expected a [key, value] entry".to_string()),
          })
          .collect::<Result<_, _>>()
          .map(ValueMap)
      },
    )),
    Arc::new(TypedAdapter::new(
      "Set",
      |s: &ValueSet| Value::array(s.0.clone()),
      |v: &Value| Ok(ValueSet(v.as_array().ok_or("expected an array")?.to_vec())),
    )),
    Arc::new(TypedAdapter::new(
      "FormData",
      |f: &FormData| string_pairs(&f.0),
      |v: &Value| parse_string_pairs(v).map(FormData),
    )),
    Arc::new(TypedAdapter::new(
      "Headers",
      |h: &Headers| string_pairs(&h.0),
      |v: &Value| parse_string_pairs(v).map(Headers::new),
    )),
  ]
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn adapter(key: &str) -> Arc<dyn SerializationAdapter> {
    adapters().into_iter().find(|a| a.key() == key).unwrap()
  }

  #[test]
  fn non_finite_numbers() {
    let a = adapter("$number");
    assert!(a.test(&Value::from(f64::NAN)));
    assert!(!a.test(&Value::from(1.5)));
    let wire = a.to_serializable(&Value::from(f64::NEG_INFINITY)).unwrap();
    assert_eq!(wire, Value::from("-Infinity"));
    assert_eq!(a.from_serializable(wire).unwrap(), Value::from(f64::NEG_INFINITY));
  }

  #[test]
  fn dates_use_iso_strings() {
    let at = Utc.with_ymd_and_hms(2024, 2, 29, 12, 30, 0).unwrap();
    let a = adapter("Date");
    let wire = a.to_serializable(&Value::opaque(Date(at))).unwrap();
    assert_eq!(wire, Value::from("2024-02-29T12:30:00.000Z"));
    let back = a.from_serializable(wire).unwrap();
    assert_eq!(back.downcast_ref::<Date>(), Some(&Date(at)));
    assert!(a.from_serializable(Value::from("yesterday")).is_err());
  }

  #[test]
  fn headers_lowercase_names() {
    let headers = Headers::new([("Content-Type", "text/html"), ("X-Id", "7")]);
    assert_eq!(headers.get("content-type"), Some("text/html"));
    assert_eq!(headers.get("X-ID"), Some("7"));
    let a = adapter("Headers");
    let back = a.from_serializable(a.to_serializable(&Value::opaque(headers.clone())).unwrap()).unwrap();
    assert_eq!(back.downcast_ref::<Headers>(), Some(&headers));
  }

  #[test]
  fn form_data_keeps_repeated_fields() {
    let form = FormData(vec![("tag".into(), "a".into()), ("tag".into(), "b".into())]);
    let a = adapter("FormData");
    let back = a.from_serializable(a.to_serializable(&Value::opaque(form.clone())).unwrap()).unwrap();
    assert_eq!(back.downcast_ref::<FormData>().unwrap().0.len(), 2);
    assert_eq!(form.get("tag"), Some("a"));
  }
}
