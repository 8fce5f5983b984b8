/* src/router/serializer/rust/src/envelope.rs */

//! Value <-> JSON mapping.
//!
//! Plain data maps onto JSON directly. Everything else travels in a
//! `{"__type": tag, "payload": ..}` envelope:
//!
//! - adapter keys (`Date`, `Map`, user adapters, ...) wrap the adapter's
//!   serializable form; identity-bearing values also carry their `id`
//! - `$ref` points back at a container sent earlier in the same scope
//! - `$promise` / `$stream` are placeholders settled by later chunks
//! - `object` escapes plain objects that contain a `__type` key
//!
//! Arrays, plain objects and adapter values with an `id` take reference ids
//! in pre-order, so encoder and decoder number them identically.

use std::sync::Arc;

use serde_json::{Map as JsonMap, Value as Json, json};
use trellis_router::{Map, Value};

use crate::error::SerializationError;
use crate::scope::{DecodeScope, EncodeScope, Pending, hint_name, parse_hint};

pub const TYPE_KEY: &str = "__type";
pub const PAYLOAD_KEY: &str = "payload";

fn envelope(tag: &str, payload: Json) -> Json {
  json!({ TYPE_KEY: tag, PAYLOAD_KEY: payload })
}

/// Address of the shared allocation behind an identity-bearing value.
fn identity(value: &Value) -> Option<usize> {
  match value {
    Value::Array(items) => Some(Arc::as_ptr(items).cast::<()>() as usize),
    Value::Object(map) => Some(Arc::as_ptr(map).cast::<()>() as usize),
    Value::Opaque(inner) => Some(Arc::as_ptr(inner).cast::<()>() as usize),
    _ => None,
  }
}

#[allow(clippy::cast_possible_truncation)]
fn json_number(n: f64) -> Json {
  if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
    return Json::from(n as i64);
  }
  serde_json::Number::from_f64(n).map_or(Json::Null, Json::Number)
}

fn as_id(value: &Json) -> Result<u32, SerializationError> {
  value
    .as_u64()
    .and_then(|n| u32::try_from(n).ok())
    .ok_or_else(|| SerializationError::malformed(format!("invalid reference id {value}")))
}

impl EncodeScope {
  pub fn encode(&mut self, value: &Value) -> Result<Json, SerializationError> {
    if !matches!(value, Value::Deferred(_) | Value::Stream(_)) {
      if let Some(json) = self.encode_shared(value)? {
        return Ok(json);
      }
    }

    Ok(match value {
      Value::Null => Json::Null,
      Value::Bool(b) => Json::Bool(*b),
      Value::Number(n) => json_number(*n),
      Value::String(s) => Json::String(s.clone()),
      Value::Array(items) => Json::Array(items.iter().map(|item| self.encode(item)).collect::<Result<_, _>>()?),
      Value::Object(map) => {
        let mut out = JsonMap::new();
        for (key, item) in map.iter() {
          out.insert(key.clone(), self.encode(item)?);
        }
        if map.contains_key(TYPE_KEY) { envelope("object", Json::Object(out)) } else { Json::Object(out) }
      }
      Value::Opaque(inner) => return Err(SerializationError::UnknownType(inner.type_name().to_string())),
      Value::Deferred(deferred) => {
        let id = match self.deferreds.iter().find(|(_, d)| d.ptr_eq(deferred)) {
          Some((id, _)) => *id,
          None => {
            let id = self.next_pending_id();
            self.deferreds.push((id, deferred.clone()));
            self.pending.push(Pending::Deferred(id, deferred.clone()));
            id
          }
        };
        envelope("$promise", json!(id))
      }
      Value::Stream(raw) => {
        let id = match self.streams.iter().find(|(_, s)| s.ptr_eq(raw)) {
          Some((id, _)) => *id,
          None => {
            let id = self.next_pending_id();
            self.streams.push((id, raw.clone()));
            self.pending.push(Pending::Stream(id, raw.clone()));
            id
          }
        };
        envelope("$stream", json!({ "id": id, "hint": hint_name(raw.hint()) }))
      }
    })
  }

  /// Back-references and adapter envelopes. `None` means `value` is encoded
  /// as plain data (after taking its reference id, if it has one).
  fn encode_shared(&mut self, value: &Value) -> Result<Option<Json>, SerializationError> {
    let mut ref_id = None;
    if let Some(ptr) = identity(value) {
      if let Some(id) = self.refs.get(&ptr) {
        return Ok(Some(envelope("$ref", json!(id))));
      }
      let id = u32::try_from(self.retained.len())
        .map_err(|_| SerializationError::malformed("too many referenced values in one scope"))?;
      self.refs.insert(ptr, id);
      self.retained.push(value.clone());
      ref_id = Some(id);
    }

    let Some(adapter) = self.registry.find(value).cloned() else {
      return Ok(None);
    };
    let payload = self.encode(&adapter.to_serializable(value)?)?;
    let mut out = JsonMap::new();
    out.insert(TYPE_KEY.into(), Json::from(adapter.key()));
    if let Some(id) = ref_id {
      out.insert("id".into(), json!(id));
    }
    out.insert(PAYLOAD_KEY.into(), payload);
    Ok(Some(Json::Object(out)))
  }

  fn next_pending_id(&mut self) -> u32 {
    let id = self.next_pending;
    self.next_pending += 1;
    id
  }
}

impl DecodeScope {
  pub fn decode(&mut self, json: &Json) -> Result<Value, SerializationError> {
    match json {
      Json::Null => Ok(Value::Null),
      Json::Bool(b) => Ok(Value::Bool(*b)),
      Json::Number(n) => Ok(Value::Number(n.as_f64().unwrap_or(f64::NAN))),
      Json::String(s) => Ok(Value::String(s.clone())),
      Json::Array(items) => {
        let slot = self.reserve();
        let items = items.iter().map(|item| self.decode(item)).collect::<Result<Vec<_>, _>>()?;
        Ok(self.fill(slot, Value::array(items)))
      }
      Json::Object(map) => match map.get(TYPE_KEY).and_then(Json::as_str) {
        Some(tag) => self.decode_envelope(tag, map),
        None => self.decode_object(map),
      },
    }
  }

  fn decode_object(&mut self, map: &JsonMap<String, Json>) -> Result<Value, SerializationError> {
    let slot = self.reserve();
    let mut out = Map::new();
    for (key, item) in map {
      out.insert(key.clone(), self.decode(item)?);
    }
    Ok(self.fill(slot, Value::from(out)))
  }

  fn decode_envelope(&mut self, tag: &str, map: &JsonMap<String, Json>) -> Result<Value, SerializationError> {
    let payload = map.get(PAYLOAD_KEY).unwrap_or(&Json::Null);
    match tag {
      "$ref" => {
        let id = as_id(payload)?;
        self
          .slots
          .get(id as usize)
          .cloned()
          .flatten()
          .ok_or(SerializationError::DanglingReference(id))
      }
      "$promise" => Ok(self.promise(as_id(payload)?)),
      "$stream" => {
        let id = as_id(payload.get("id").unwrap_or(&Json::Null))?;
        let hint = parse_hint(payload.get("hint").and_then(Json::as_str).unwrap_or("binary"));
        Ok(self.raw_stream(id, hint))
      }
      "object" => match payload {
        Json::Object(inner) => self.decode_object(inner),
        _ => Err(SerializationError::malformed("escaped object payload must be an object")),
      },
      key => {
        let adapter =
          self.registry.get(key).cloned().ok_or_else(|| SerializationError::UnknownType(key.to_string()))?;
        let slot = match map.get("id") {
          Some(id) => {
            let id = as_id(id)?;
            if id as usize != self.slots.len() {
              return Err(SerializationError::malformed(format!("reference id {id} out of order")));
            }
            Some(self.reserve())
          }
          None => None,
        };
        let inner = self.decode(payload)?;
        let value = adapter.from_serializable(inner)?;
        Ok(match slot {
          Some(slot) => self.fill(slot, value),
          None => value,
        })
      }
    }
  }

  fn reserve(&mut self) -> usize {
    self.slots.push(None);
    self.slots.len() - 1
  }

  fn fill(&mut self, slot: usize, value: Value) -> Value {
    self.slots[slot] = Some(value.clone());
    value
  }
}
