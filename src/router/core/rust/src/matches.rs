/* src/router/core/rust/src/matches.rs */

use crate::errors::RouteError;
use crate::route::SsrMode;
use crate::value::Value;

pub use crate::path::Params;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MatchStatus {
  #[default]
  Pending,
  Success,
  Error,
  NotFound,
  Redirected,
}

impl MatchStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      MatchStatus::Pending => "pending",
      MatchStatus::Success => "success",
      MatchStatus::Error => "error",
      MatchStatus::NotFound => "notFound",
      MatchStatus::Redirected => "redirected",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    Some(match s {
      "pending" => MatchStatus::Pending,
      "success" => MatchStatus::Success,
      "error" => MatchStatus::Error,
      "notFound" => MatchStatus::NotFound,
      "redirected" => MatchStatus::Redirected,
      _ => return None,
    })
  }
}

/// A route bound to a concrete location for one navigation attempt.
///
/// Matches are replaced, never mutated, once committed: a newer navigation
/// produces new `Match` values and older ones stay valid for whoever holds them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Match {
  /// `route id + interpolated path + loader deps`; equal ids mean the loader
  /// result can be reused.
  pub id: String,
  pub route_id: String,
  pub pathname: String,
  pub params: Params,
  pub search: Value,
  pub search_error: Option<RouteError>,
  pub status: MatchStatus,
  pub loader_deps: Value,
  pub loader_data: Option<Value>,
  /// Output of the route's `context` function.
  pub route_context: Value,
  pub before_load_context: Value,
  /// Router context merged with every ancestor's contributions and this match's own.
  pub context: Value,
  pub error: Option<RouteError>,
  pub ssr: SsrMode,
  /// Set by `invalidate()`; an invalid match never has its loader skipped.
  pub invalid: bool,
  /// Installed from server state; the first client load skips its loader.
  pub dehydrated: bool,
  /// The pathname did not fully match any route and this match hosts the not-found state.
  pub global_not_found: bool,
}

impl Match {
  pub fn is_settled(&self) -> bool {
    self.status != MatchStatus::Pending
  }
}
