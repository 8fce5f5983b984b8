/* src/router/core/rust/src/dehydrate.rs */

use std::sync::Arc;

use crate::errors::RouteError;
use crate::location::Location;
use crate::matches::{Match, MatchStatus};
use crate::navigation::Router;
use crate::route::SsrMode;
use crate::store::RouterState;
use crate::value::{Map, Value};

/// Wire-safe form of one settled match.
#[derive(Clone, Debug, PartialEq)]
pub struct DehydratedMatch {
  pub id: String,
  pub route_id: String,
  pub status: MatchStatus,
  pub ssr: SsrMode,
  pub loader_data: Option<Value>,
  pub route_context: Value,
  pub before_load_context: Value,
  pub error: Option<Value>,
}

/// Server router state as shipped to the client.
#[derive(Clone, Debug, PartialEq)]
pub struct DehydratedRouter {
  pub href: String,
  pub status_code: u16,
  pub matches: Vec<DehydratedMatch>,
}

impl DehydratedMatch {
  fn to_value(&self) -> Value {
    let mut map = Map::new();
    map.insert("i".into(), Value::from(self.id.clone()));
    map.insert("r".into(), Value::from(self.route_id.clone()));
    map.insert("s".into(), Value::from(self.status.as_str()));
    map.insert("ssr".into(), Value::from(self.ssr.as_str()));
    if let Some(data) = &self.loader_data {
      map.insert("l".into(), data.clone());
    }
    map.insert("c".into(), self.route_context.clone());
    map.insert("b".into(), self.before_load_context.clone());
    if let Some(error) = &self.error {
      map.insert("e".into(), error.clone());
    }
    Value::from(map)
  }

  fn from_value(value: &Value) -> Option<Self> {
    let text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
    Some(Self {
      id: text("i")?,
      route_id: text("r")?,
      status: MatchStatus::parse(value.get("s")?.as_str()?)?,
      ssr: value.get("ssr").and_then(Value::as_str).and_then(SsrMode::parse).unwrap_or_default(),
      loader_data: value.get("l").cloned(),
      route_context: value.get("c").cloned().unwrap_or_default(),
      before_load_context: value.get("b").cloned().unwrap_or_default(),
      error: value.get("e").cloned(),
    })
  }
}

impl DehydratedRouter {
  pub fn to_value(&self) -> Value {
    Value::object([
      ("href", Value::from(self.href.clone())),
      ("statusCode", Value::from(i64::from(self.status_code))),
      ("matches", Value::array(self.matches.iter().map(DehydratedMatch::to_value).collect())),
    ])
  }

  /// `None` when the value does not have the dehydrated router shape.
  pub fn from_value(value: &Value) -> Option<Self> {
    let status = value.get("statusCode")?.as_f64()?;
    Some(Self {
      href: value.get("href")?.as_str()?.to_string(),
      status_code: if (100.0..=599.0).contains(&status) { status as u16 } else { 500 },
      matches: value
        .get("matches")?
        .as_array()?
        .iter()
        .map(DehydratedMatch::from_value)
        .collect::<Option<_>>()?,
    })
  }
}

impl Router {
  /// Snapshot the committed matches for shipping to the client. Each
  /// route's dehydrate hooks run once per value; matches left pending
  /// (ssr off) are omitted.
  pub fn dehydrate(&self) -> DehydratedRouter {
    let state = self.state();
    let href = state.resolved_location.as_ref().unwrap_or(&state.location).href.clone();
    let matches = state
      .matches
      .iter()
      .filter(|m| m.status != MatchStatus::Pending)
      .map(|m| {
        let route = self.tree().route(&m.route_id);
        let hooks = route.map(|r| r.hooks.clone()).unwrap_or_default();
        DehydratedMatch {
          id: m.id.clone(),
          route_id: m.route_id.clone(),
          status: m.status,
          ssr: m.ssr,
          loader_data: m.loader_data.as_ref().map(|d| hooks.loader.dehydrate(d)),
          route_context: hooks.context.dehydrate(&m.route_context),
          before_load_context: hooks.before_load.dehydrate(&m.before_load_context),
          error: m.error.as_ref().map(RouteError::to_value),
        }
      })
      .collect();
    DehydratedRouter { href, status_code: state.status_code, matches }
  }

  /// Install server state. Each match is hydrated once here; the following
  /// `load()` reuses these matches instead of running their lifecycles.
  pub fn hydrate(&self, dehydrated: DehydratedRouter) {
    let entry = self.history().current();
    let location = Arc::new(Location::parse(&dehydrated.href, entry.state).with_key(Some(entry.key)));
    let matches: Vec<Arc<Match>> = dehydrated
      .matches
      .into_iter()
      .map(|dm| {
        let hooks = self.tree().route(&dm.route_id).map(|r| r.hooks.clone()).unwrap_or_default();
        Arc::new(Match {
          id: dm.id,
          route_id: dm.route_id,
          status: dm.status,
          ssr: dm.ssr,
          loader_data: dm.loader_data.as_ref().map(|d| hooks.loader.hydrate(d)),
          route_context: hooks.context.hydrate(&dm.route_context),
          before_load_context: hooks.before_load.hydrate(&dm.before_load_context),
          error: dm.error.as_ref().map(RouteError::from_value),
          dehydrated: true,
          ..Match::default()
        })
      })
      .collect();
    tracing::debug!(href = %location.href, matches = matches.len(), "hydrated router state");
    self.store().set_state(|s| RouterState {
      location: Arc::clone(&location),
      matches: Arc::new(matches),
      status_code: dehydrated.status_code,
      ..s.clone()
    });
  }
}
