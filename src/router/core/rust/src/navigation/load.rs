/* src/router/core/rust/src/navigation/load.rs */

use std::sync::Arc;

use futures_util::future::join_all;

use super::Router;
use crate::errors::{NotFound, Redirect, RouteError};
use crate::location::Location;
use crate::matches::{Match, MatchStatus};
use crate::route::{BeforeLoadCtx, ContextCtx, LoadCause, LoaderCtx, SsrMode};
use crate::store::RouterState;
use crate::value::Value;

pub(super) enum LoadResult {
  Settled(Vec<Match>),
  Redirect(Redirect),
  Superseded,
}

/// Committed or cached match with the same id, if any.
fn previous_match(state: &RouterState, id: &str) -> Option<Arc<Match>> {
  state.matches.iter().chain(state.cached_matches.iter()).find(|p| p.id == id).cloned()
}

/// Attach a failure to the match at `index`. Returns the index of the match
/// that now holds the failure, or the redirect to follow.
fn settle_error(matches: &mut [Match], index: usize, err: RouteError) -> Result<usize, Redirect> {
  match err {
    RouteError::Redirect(redirect) => {
      matches[index].status = MatchStatus::Redirected;
      Err(redirect)
    }
    RouteError::NotFound(not_found) => {
      let target = not_found
        .route_id
        .as_deref()
        .and_then(|id| matches[..=index].iter().position(|m| m.route_id == id))
        .unwrap_or(index);
      let m = &mut matches[target];
      m.status = MatchStatus::NotFound;
      m.error =
        Some(RouteError::NotFound(NotFound { route_id: Some(m.route_id.clone()), data: not_found.data }));
      Ok(target)
    }
    other => {
      let m = &mut matches[index];
      tracing::warn!(route_id = %m.route_id, error = %other, "route lifecycle failed");
      m.status = MatchStatus::Error;
      m.error = Some(other);
      Ok(index)
    }
  }
}

/// Run context, `beforeLoad` (serially, root first) and loaders
/// (concurrently) for `matches`. `generation` is `None` for preloads, which
/// are never superseded.
pub(super) async fn load_matches(
  router: &Router,
  location: &Arc<Location>,
  mut matches: Vec<Match>,
  generation: Option<u64>,
) -> LoadResult {
  let preload = generation.is_none();
  let stale = || generation.is_some_and(|g| !router.is_current(g));
  let state = router.state();
  let tree = Arc::clone(router.tree());
  let options = router.options();

  // on the server, routes with ssr off (and everything below them) are left to the client
  let limit = if options.is_server {
    matches.iter().position(|m| m.ssr == SsrMode::Off).unwrap_or(matches.len())
  } else {
    matches.len()
  };

  let mut first_bad = limit;
  let mut load_host = false;
  let mut parent_context = options.context.clone();

  for index in 0..limit {
    let Some(route) = tree.route(&matches[index].route_id).cloned() else { continue };
    let hydrated = previous_match(&state, &matches[index].id).filter(|p| p.dehydrated);
    let cause = if preload {
      LoadCause::Preload
    } else if state.matches.iter().any(|m| m.route_id == route.id) {
      LoadCause::Stay
    } else {
      LoadCause::Enter
    };

    if let Some(err) = matches[index].search_error.clone() {
      match settle_error(&mut matches, index, err) {
        Ok(bad) => {
          first_bad = bad;
          break;
        }
        Err(redirect) => return LoadResult::Redirect(redirect),
      }
    }

    if let Some(h) = &hydrated {
      let m = &mut matches[index];
      m.route_context = h.route_context.clone();
      m.before_load_context = h.before_load_context.clone();
      if matches!(h.status, MatchStatus::Error | MatchStatus::NotFound) {
        // the server already settled this failure
        m.status = h.status;
        m.error = h.error.clone();
        m.context = parent_context.merge(&m.route_context).merge(&m.before_load_context);
        first_bad = index;
        break;
      }
    } else if let Some(context_fn) = &route.context {
      let ctx = ContextCtx {
        route_id: route.id.clone(),
        params: matches[index].params.clone(),
        deps: matches[index].loader_deps.clone(),
        context: parent_context.clone(),
      };
      match context_fn(&ctx) {
        Ok(value) => matches[index].route_context = value,
        Err(err) => match settle_error(&mut matches, index, err) {
          Ok(bad) => {
            first_bad = bad;
            break;
          }
          Err(redirect) => return LoadResult::Redirect(redirect),
        },
      }
    }
    let mut context = parent_context.merge(&matches[index].route_context);

    if hydrated.is_none()
      && let Some(before_load) = &route.before_load
    {
      let ctx = BeforeLoadCtx {
        route_id: route.id.clone(),
        params: matches[index].params.clone(),
        search: matches[index].search.clone(),
        context: context.clone(),
        location: Arc::clone(location),
        cause,
        preload,
      };
      let result = before_load(ctx).await;
      if stale() {
        return LoadResult::Superseded;
      }
      match result {
        Ok(value) => matches[index].before_load_context = value,
        Err(err) => match settle_error(&mut matches, index, err) {
          Ok(bad) => {
            first_bad = bad;
            break;
          }
          Err(redirect) => return LoadResult::Redirect(redirect),
        },
      }
    }
    context = context.merge(&matches[index].before_load_context);
    matches[index].context = context.clone();
    parent_context = context;

    if matches[index].global_not_found {
      let m = &mut matches[index];
      m.status = MatchStatus::NotFound;
      m.error = Some(RouteError::NotFound(NotFound {
        route_id: Some(m.route_id.clone()),
        data: Value::Null,
      }));
      first_bad = index;
      load_host = true;
      break;
    }
  }

  // the not-found host still loads its own data so its layout can render
  let loader_end = if load_host { first_bad + 1 } else { first_bad };
  let jobs: Vec<_> = matches[..loader_end]
    .iter()
    .enumerate()
    .map(|(index, m)| {
      let route = tree.route(&m.route_id).cloned();
      let previous = previous_match(&state, &m.id);
      let reusable = previous
        .filter(|p| p.dehydrated || (p.status == MatchStatus::Success && !p.invalid));
      let ctx = LoaderCtx {
        route_id: m.route_id.clone(),
        params: m.params.clone(),
        deps: m.loader_deps.clone(),
        context: m.context.clone(),
        location: Arc::clone(location),
        cause: if preload {
          LoadCause::Preload
        } else if state.matches.iter().any(|p| p.route_id == m.route_id) {
          LoadCause::Stay
        } else {
          LoadCause::Enter
        },
        preload,
      };
      async move {
        if let Some(previous) = reusable {
          return (index, Ok(previous.loader_data.clone()));
        }
        match route.and_then(|r| r.loader.clone()) {
          Some(loader) => (index, loader(ctx).await.map(Some)),
          None => (index, Ok(None)),
        }
      }
    })
    .collect();

  let results = join_all(jobs).await;
  if stale() {
    return LoadResult::Superseded;
  }

  let mut redirect = None;
  for (index, result) in results {
    match result {
      Ok(data) => {
        let m = &mut matches[index];
        m.loader_data = data;
        if m.status == MatchStatus::Pending {
          m.status = MatchStatus::Success;
        }
      }
      Err(err) => {
        if let Err(r) = settle_error(&mut matches, index, err)
          && redirect.is_none()
        {
          redirect = Some(r);
        }
      }
    }
  }

  match redirect {
    Some(redirect) => LoadResult::Redirect(redirect),
    None => LoadResult::Settled(matches),
  }
}
