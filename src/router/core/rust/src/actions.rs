/* src/router/core/rust/src/actions.rs */

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use thiserror::Error;

use crate::BoxFuture;
use crate::value::Value;

pub const DEFAULT_MAX_SUBMISSIONS: usize = 10;

/// Millisecond wall clock used to stamp submissions.
pub trait Clock: Send + Sync {
  fn now_ms(&self) -> u64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now_ms(&self) -> u64 {
    SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmissionStatus {
  Pending,
  Success,
  Error,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Submission {
  /// Client-local sequence number.
  pub id: u64,
  pub submitted_at: u64,
  pub status: SubmissionStatus,
  pub variables: Value,
  pub response: Option<Value>,
  pub error: Option<Value>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ActionState {
  /// Newest first, capped at the action's `max_submissions`.
  pub submissions: Vec<Submission>,
}

impl ActionState {
  pub fn latest(&self) -> Option<&Submission> {
    self.submissions.first()
  }

  pub fn pending(&self) -> impl Iterator<Item = &Submission> {
    self.submissions.iter().filter(|s| s.status == SubmissionStatus::Pending)
  }
}

pub type ActionFn = Arc<dyn Fn(Value, Value) -> BoxFuture<Result<Value, Value>> + Send + Sync>;
pub type ActionCallback = Arc<dyn Fn(&Submission, &Value) + Send + Sync>;

#[derive(Debug, Error)]
pub enum ActionError {
  #[error("unknown action: {0}")]
  UnknownAction(String),
  #[error("action {key} failed")]
  Failed { key: String, error: Value },
}

#[derive(Clone, Default)]
struct Callbacks {
  each_success: Option<ActionCallback>,
  latest_success: Option<ActionCallback>,
  each_error: Option<ActionCallback>,
  latest_error: Option<ActionCallback>,
  each_settled: Option<ActionCallback>,
  latest_settled: Option<ActionCallback>,
}

/// A keyed mutation with per-submission bookkeeping.
#[derive(Clone)]
pub struct Action {
  key: String,
  handler: ActionFn,
  max_submissions: Option<usize>,
  callbacks: Callbacks,
}

macro_rules! callback_setter {
  ($name:ident, $field:ident) => {
    pub fn $name<F>(mut self, f: F) -> Self
    where
      F: Fn(&Submission, &Value) + Send + Sync + 'static,
    {
      self.callbacks.$field = Some(Arc::new(f));
      self
    }
  };
}

impl Action {
  /// `f` receives the submitted variables and the client context.
  pub fn new<F, Fut>(key: impl Into<String>, f: F) -> Self
  where
    F: Fn(Value, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, Value>> + Send + 'static,
  {
    Self {
      key: key.into(),
      handler: Arc::new(move |vars, ctx| Box::pin(f(vars, ctx))),
      max_submissions: None,
      callbacks: Callbacks::default(),
    }
  }

  pub fn key(&self) -> &str {
    &self.key
  }

  pub fn max_submissions(mut self, max: usize) -> Self {
    self.max_submissions = Some(max);
    self
  }

  callback_setter!(on_each_success, each_success);
  callback_setter!(on_latest_success, latest_success);
  callback_setter!(on_each_error, each_error);
  callback_setter!(on_latest_error, latest_error);
  callback_setter!(on_each_settled, each_settled);
  callback_setter!(on_latest_settled, latest_settled);
}

impl fmt::Debug for Action {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Action").field("key", &self.key).finish_non_exhaustive()
  }
}

/// Tracks submissions of registered actions by key.
///
/// "Latest" is decided by comparing a submission's `submitted_at` with the
/// newest retained submission at the moment a callback fires. Two submissions
/// stamped in the same millisecond are therefore both latest.
pub struct ActionClient {
  actions: HashMap<String, Action>,
  context: Value,
  clock: Arc<dyn Clock>,
  default_max: usize,
  next_id: AtomicU64,
  state: Mutex<HashMap<String, ActionState>>,
}

impl ActionClient {
  pub fn new(actions: impl IntoIterator<Item = Action>, context: Value) -> Self {
    let actions: HashMap<String, Action> =
      actions.into_iter().map(|a| (a.key.clone(), a)).collect();
    let state = actions.keys().map(|k| (k.clone(), ActionState::default())).collect();
    Self {
      actions,
      context,
      clock: Arc::new(SystemClock),
      default_max: DEFAULT_MAX_SUBMISSIONS,
      next_id: AtomicU64::new(1),
      state: Mutex::new(state),
    }
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  /// Cap applied to actions without their own `max_submissions`.
  pub fn with_default_max_submissions(mut self, max: usize) -> Self {
    self.default_max = max;
    self
  }

  pub fn state(&self, key: &str) -> Option<ActionState> {
    self.state.lock().get(key).cloned()
  }

  /// Drop settled submissions of one action; pending ones stay.
  pub fn clear_action(&self, key: &str) {
    if let Some(action) = self.state.lock().get_mut(key) {
      action.submissions.retain(|s| s.status == SubmissionStatus::Pending);
    }
  }

  pub fn clear_all(&self) {
    for action in self.state.lock().values_mut() {
      action.submissions.retain(|s| s.status == SubmissionStatus::Pending);
    }
  }

  fn is_latest(&self, key: &str, submitted_at: u64) -> bool {
    let state = self.state.lock();
    state.get(key).and_then(ActionState::latest).is_some_and(|l| l.submitted_at == submitted_at)
  }

  fn update(&self, key: &str, id: u64, f: impl FnOnce(&mut Submission)) -> Option<Submission> {
    let mut state = self.state.lock();
    let found = state.get_mut(key)?.submissions.iter_mut().find(|s| s.id == id);
    match found {
      Some(submission) => {
        f(submission);
        Some(submission.clone())
      }
      None => {
        tracing::debug!(key, id, "submission was evicted before it settled");
        None
      }
    }
  }

  fn fire(&self, callback: Option<&ActionCallback>, submission: &Submission) {
    if let Some(cb) = callback {
      cb(submission, &self.context);
    }
  }

  pub async fn submit(&self, key: &str, variables: Value) -> Result<Value, ActionError> {
    let action =
      self.actions.get(key).cloned().ok_or_else(|| ActionError::UnknownAction(key.to_string()))?;
    let submitted_at = self.clock.now_ms();
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let mut submission = Submission {
      id,
      submitted_at,
      status: SubmissionStatus::Pending,
      variables: variables.clone(),
      response: None,
      error: None,
    };
    {
      let max = action.max_submissions.unwrap_or(self.default_max);
      let mut state = self.state.lock();
      let entry = state.entry(key.to_string()).or_default();
      entry.submissions.insert(0, submission.clone());
      entry.submissions.truncate(max);
    }

    let result = (action.handler)(variables, self.context.clone()).await;
    let callbacks = &action.callbacks;
    match result {
      Ok(response) => {
        let stored = response.clone();
        if let Some(s) = self.update(key, id, |s| s.response = Some(stored)) {
          submission = s;
        } else {
          submission.response = Some(response.clone());
        }
        self.fire(callbacks.each_success.as_ref(), &submission);
        if self.is_latest(key, submitted_at) {
          self.fire(callbacks.latest_success.as_ref(), &submission);
        }
        self.settled(&action, &submission);
        self.update(key, id, |s| s.status = SubmissionStatus::Success);
        Ok(response)
      }
      Err(error) => {
        tracing::warn!(key, "action failed");
        let stored = error.clone();
        if let Some(s) = self.update(key, id, |s| s.error = Some(stored)) {
          submission = s;
        } else {
          submission.error = Some(error.clone());
        }
        self.fire(callbacks.each_error.as_ref(), &submission);
        if self.is_latest(key, submitted_at) {
          self.fire(callbacks.latest_error.as_ref(), &submission);
        }
        self.settled(&action, &submission);
        self.update(key, id, |s| s.status = SubmissionStatus::Error);
        Err(ActionError::Failed { key: key.to_string(), error })
      }
    }
  }

  fn settled(&self, action: &Action, submission: &Submission) {
    self.fire(action.callbacks.each_settled.as_ref(), submission);
    if self.is_latest(&action.key, submission.submitted_at) {
      self.fire(action.callbacks.latest_settled.as_ref(), submission);
    }
  }
}
