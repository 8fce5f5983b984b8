/* src/router/core/rust/src/tree.rs */

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::RouteTreeError;
use crate::path::{Params, Segment, SegmentKind, parse_pathname, trim_path_left, trim_path_right};
use crate::route::{Route, RouteNode};

const SLASH_SCORE: f64 = 0.75;
const STATIC_SEGMENT_SCORE: f64 = 1.0;
const REQUIRED_PARAM_BASE_SCORE: f64 = 0.5;
const OPTIONAL_PARAM_BASE_SCORE: f64 = 0.4;
const WILDCARD_PARAM_BASE_SCORE: f64 = 0.25;
const STATIC_AFTER_DYNAMIC_BONUS_SCORE: f64 = 0.2;
const BOTH_PRESENCE_BASE_SCORE: f64 = 0.05;
const PREFIX_PRESENCE_BASE_SCORE: f64 = 0.02;
const SUFFIX_PRESENCE_BASE_SCORE: f64 = 0.01;
const PREFIX_LENGTH_SCORE_MULTIPLIER: f64 = 0.0002;
const SUFFIX_LENGTH_SCORE_MULTIPLIER: f64 = 0.0001;

/// Immutable, indexed route tree shared by every router built from it.
#[derive(Debug)]
pub struct RouteTree {
  root: Arc<RouteNode>,
  by_id: HashMap<String, Arc<RouteNode>>,
  by_path: HashMap<String, Arc<RouteNode>>,
  flat: Vec<Arc<RouteNode>>,
}

/// Result of resolving a pathname against the tree.
#[derive(Debug, Clone)]
pub struct MatchedRoutes {
  /// Root-first ancestor chain ending at the matched (or deepest fuzzy) route.
  pub routes: Vec<Arc<RouteNode>>,
  pub params: Params,
  /// Nothing matched the whole pathname; the last route hosts the not-found state.
  pub global_not_found: bool,
}

impl RouteTree {
  /// Build and validate the tree. Duplicate ids and identical full paths are
  /// configuration errors reported here, never during navigation.
  pub fn build(root: Route) -> Result<Self, RouteTreeError> {
    let root = RouteNode::build_root(root);
    let mut by_id: HashMap<String, Arc<RouteNode>> = HashMap::new();
    let mut by_path: HashMap<String, Arc<RouteNode>> = HashMap::new();
    let mut declared = Vec::new();

    let mut stack = vec![Arc::clone(&root)];
    while let Some(node) = stack.pop() {
      if by_id.contains_key(&node.id) {
        return Err(RouteTreeError::DuplicateId(node.id.clone()));
      }
      by_id.insert(node.id.clone(), Arc::clone(&node));

      if !node.is_root && !node.path.is_empty() {
        let trimmed = node.trimmed_full_path().to_string();
        match by_path.get(&trimmed) {
          Some(existing) if existing.full_path == node.full_path => {
            return Err(RouteTreeError::DuplicateFullPath {
              path: node.full_path.clone(),
              first: existing.id.clone(),
              second: node.id.clone(),
            });
          }
          Some(_) if !node.full_path.ends_with('/') => {}
          _ => {
            by_path.insert(trimmed, Arc::clone(&node));
          }
        }
      }

      declared.push(Arc::clone(&node));
      stack.extend(node.children().iter().rev().cloned());
    }

    let flat = sort_routes(&declared);
    tracing::debug!(routes = by_id.len(), matchable = flat.len(), "route tree built");
    Ok(Self { root, by_id, by_path, flat })
  }

  pub fn root(&self) -> &Arc<RouteNode> {
    &self.root
  }

  pub fn route(&self, id: &str) -> Option<&Arc<RouteNode>> {
    self.by_id.get(id)
  }

  pub fn route_by_path(&self, path: &str) -> Option<&Arc<RouteNode>> {
    self.by_path.get(trim_path_right(path))
  }

  /// Matchable routes in priority order.
  pub fn flat_routes(&self) -> &[Arc<RouteNode>] {
    &self.flat
  }

  pub fn len(&self) -> usize {
    self.by_id.len()
  }

  /// True when no route besides the root can match anything.
  pub fn is_empty(&self) -> bool {
    self.flat.is_empty()
  }

  /// Resolve a basepath-relative pathname to its route chain.
  pub fn match_routes(&self, pathname: &str, case_sensitive: bool) -> MatchedRoutes {
    let trimmed = trim_path_right(pathname);
    let trimmed = if trimmed.is_empty() { "/" } else { trimmed };

    let mut found: Option<(&Arc<RouteNode>, Params)> = None;
    if let Some(route) = self.by_path.get(trimmed)
      && let Some(params) = route.match_pathname(trimmed, case_sensitive)
    {
      found = Some((route, params));
    }

    if found.is_none() {
      let mut fuzzy: Option<(&Arc<RouteNode>, Params)> = None;
      for route in &self.flat {
        let Some(params) = route.match_pathname(trimmed, case_sensitive) else { continue };
        if route.path != "/" && params.contains_key("**") {
          if fuzzy.is_none() {
            fuzzy = Some((route, params));
          }
          continue;
        }
        found = Some((route, params));
        break;
      }
      if found.is_none() {
        found = fuzzy;
      }
    }

    let (leaf, mut params, global_not_found) = match found {
      Some((route, params)) => {
        let partial = route.path != "/" && params.contains_key("**");
        (Arc::clone(route), params, partial)
      }
      None => (Arc::clone(&self.root), Params::new(), trimmed != "/"),
    };
    params.remove("**");

    MatchedRoutes { routes: leaf.lineage(), params, global_not_found }
  }
}

struct Scored {
  node: Arc<RouteNode>,
  parsed: Vec<Segment>,
  index: usize,
  scores: Vec<f64>,
  has_static_after: bool,
  optional_params: usize,
}

fn param_score(segment: &Segment, base: f64) -> f64 {
  let prefix_len = segment.prefix.as_deref().map_or(0, str::len) as f64;
  let suffix_len = segment.suffix.as_deref().map_or(0, str::len) as f64;
  match (&segment.prefix, &segment.suffix) {
    (Some(_), Some(_)) => {
      base
        + BOTH_PRESENCE_BASE_SCORE
        + PREFIX_LENGTH_SCORE_MULTIPLIER * prefix_len
        + SUFFIX_LENGTH_SCORE_MULTIPLIER * suffix_len
    }
    (Some(_), None) => base + PREFIX_PRESENCE_BASE_SCORE + PREFIX_LENGTH_SCORE_MULTIPLIER * prefix_len,
    (None, Some(_)) => base + SUFFIX_PRESENCE_BASE_SCORE + SUFFIX_LENGTH_SCORE_MULTIPLIER * suffix_len,
    (None, None) => base,
  }
}

fn score(node: &Arc<RouteNode>, index: usize) -> Scored {
  let mut parsed = parse_pathname(trim_path_left(&node.full_path));
  let skip = parsed.iter().take(parsed.len().saturating_sub(1)).take_while(|s| s.value == "/").count();
  parsed.drain(..skip);

  let mut optional_params = 0;
  let mut has_static_after = false;
  let scores = parsed
    .iter()
    .enumerate()
    .map(|(i, segment)| {
      if segment.value == "/" && segment.kind == SegmentKind::Pathname {
        return SLASH_SCORE;
      }
      let base = match segment.kind {
        SegmentKind::Pathname => return STATIC_SEGMENT_SCORE,
        SegmentKind::Param => REQUIRED_PARAM_BASE_SCORE,
        SegmentKind::OptionalParam => {
          optional_params += 1;
          OPTIONAL_PARAM_BASE_SCORE
        }
        SegmentKind::Wildcard => WILDCARD_PARAM_BASE_SCORE,
      };
      let static_after =
        parsed[i + 1..].iter().any(|s| s.kind == SegmentKind::Pathname && s.value != "/");
      if static_after {
        has_static_after = true;
        param_score(segment, base + STATIC_AFTER_DYNAMIC_BONUS_SCORE)
      } else {
        param_score(segment, base)
      }
    })
    .collect();

  Scored { node: Arc::clone(node), parsed, index, scores, has_static_after, optional_params }
}

fn compare(a: &Scored, b: &Scored) -> Ordering {
  let common = a.scores.len().min(b.scores.len());
  for i in 0..common {
    if a.scores[i] != b.scores[i] {
      return b.scores[i].total_cmp(&a.scores[i]);
    }
  }

  if a.scores.len() != b.scores.len() {
    if a.optional_params != b.optional_params {
      match (a.has_static_after, b.has_static_after) {
        (x, y) if x == y => return a.optional_params.cmp(&b.optional_params),
        (true, false) => return Ordering::Less,
        _ => return Ordering::Greater,
      }
    }
    return b.scores.len().cmp(&a.scores.len());
  }

  for i in 0..common {
    match a.parsed[i].value.cmp(&b.parsed[i].value) {
      Ordering::Equal => {}
      other => return other,
    }
  }

  a.index.cmp(&b.index)
}

fn sort_routes(declared: &[Arc<RouteNode>]) -> Vec<Arc<RouteNode>> {
  let mut scored: Vec<Scored> = declared
    .iter()
    .enumerate()
    .filter(|(_, node)| !node.is_root && !node.path.is_empty())
    .map(|(i, node)| score(node, i))
    .collect();
  scored.sort_by(compare);
  scored.into_iter().map(|s| s.node).collect()
}
