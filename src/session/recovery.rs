//! Automatic recovery from authentication failures.
//!
//! [`SessionRecovery::with_recovery`] wraps a gateway call. When the call
//! fails with an auth error, one re-authentication round is attempted and,
//! if it succeeds, the call is retried. Consecutive failed rounds are
//! counted; once the limit is reached the session is cleared, listeners are
//! notified, and no further recovery is attempted until a call succeeds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{error, info, warn};

use super::scope::Scope;
use super::token_store::TokenStore;
use crate::api::error::ApiError;
use crate::cache::RequestCache;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Scope key holding the failed-attempt count between processes
const ATTEMPTS_KEY: &str = "recovery_attempts";

/// Something able to confirm or re-establish the current session.
#[async_trait]
pub trait Reauthenticate: Send + Sync {
  async fn reauthenticate(&self) -> Result<(), ApiError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
  Idle,
  Recovering,
  /// Recovery gave up; the session has been cleared.
  Exhausted,
}

#[derive(Debug, Clone)]
pub struct RecoveryAttemptState {
  pub attempt_count: u32,
  pub state: RecoveryState,
  pub max_attempts: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct RecoveryOptions {
  /// Retries of the wrapped operation per call.
  pub max_retries: u32,
}

impl Default for RecoveryOptions {
  fn default() -> Self {
    Self { max_retries: 1 }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpiryReason {
  /// Recovery attempts ran out after auth failures.
  RecoveryExhausted,
  /// The session was cleared on request.
  Cleared,
}

/// Passed to session-expired listeners.
#[derive(Debug, Clone)]
pub struct SessionExpired {
  pub reason: ExpiryReason,
  pub message: Option<String>,
  pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&SessionExpired) + Send + Sync>;

pub struct SessionRecovery {
  reauth: Arc<dyn Reauthenticate>,
  tokens: Arc<TokenStore>,
  cache: Arc<RequestCache>,
  attempts: Mutex<RecoveryAttemptState>,
  listeners: Mutex<Vec<(ListenerId, Listener)>>,
  next_listener: AtomicU64,
  attempt_store: Option<Arc<dyn Scope>>,
}

/// Puts the machine back to `Idle` if a recovery round is abandoned
/// while awaiting re-authentication.
struct RecoveringGuard<'a> {
  recovery: &'a SessionRecovery,
  armed: bool,
}

impl RecoveringGuard<'_> {
  fn disarm(mut self) {
    self.armed = false;
  }
}

impl Drop for RecoveringGuard<'_> {
  fn drop(&mut self) {
    if self.armed {
      let mut attempts = self.recovery.attempts();
      if attempts.state == RecoveryState::Recovering {
        attempts.state = RecoveryState::Idle;
      }
    }
  }
}

impl SessionRecovery {
  pub fn new(
    reauth: Arc<dyn Reauthenticate>,
    tokens: Arc<TokenStore>,
    cache: Arc<RequestCache>,
    max_attempts: u32,
  ) -> Self {
    Self {
      reauth,
      tokens,
      cache,
      attempts: Mutex::new(RecoveryAttemptState {
        attempt_count: 0,
        state: RecoveryState::Idle,
        max_attempts: max_attempts.max(1),
      }),
      listeners: Mutex::new(Vec::new()),
      next_listener: AtomicU64::new(0),
      attempt_store: None,
    }
  }

  /// Keep the failed-attempt count in `scope` so it carries over to the
  /// next process sharing the same session.
  pub fn with_attempt_store(mut self, scope: Arc<dyn Scope>) -> Self {
    let stored = match scope.get(ATTEMPTS_KEY) {
      Ok(raw) => raw.and_then(|v| v.parse::<u32>().ok()).unwrap_or(0),
      Err(e) => {
        warn!(error = %e, "Failed to read recovery attempt count");
        0
      }
    };
    {
      let mut attempts = self.attempts();
      attempts.attempt_count = stored.min(attempts.max_attempts.saturating_sub(1));
    }
    self.attempt_store = Some(scope);
    self
  }

  fn persist_count(&self, count: u32) {
    let Some(store) = &self.attempt_store else {
      return;
    };
    let result = if count == 0 {
      store.remove(ATTEMPTS_KEY)
    } else {
      store.set(ATTEMPTS_KEY, &count.to_string())
    };
    if let Err(e) = result {
      warn!(error = %e, "Failed to store recovery attempt count");
    }
  }

  fn attempts(&self) -> MutexGuard<'_, RecoveryAttemptState> {
    self.attempts.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn listeners(&self) -> MutexGuard<'_, Vec<(ListenerId, Listener)>> {
    self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn state(&self) -> RecoveryState {
    self.attempts().state
  }

  pub fn attempt_state(&self) -> RecoveryAttemptState {
    self.attempts().clone()
  }

  /// Back to `Idle` with a zero count, as after any successful call.
  pub fn reset(&self) {
    let previous = {
      let mut attempts = self.attempts();
      let previous = attempts.attempt_count;
      attempts.attempt_count = 0;
      attempts.state = RecoveryState::Idle;
      previous
    };
    if previous > 0 {
      self.persist_count(0);
    }
  }

  /// Run `operation`, recovering once per retry from auth failures.
  pub async fn with_recovery<T, F, Fut>(
    &self,
    mut operation: F,
    options: RecoveryOptions,
  ) -> Result<T, ApiError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
  {
    let mut retries = 0;

    loop {
      match operation().await {
        Ok(value) => {
          self.reset();
          return Ok(value);
        }
        Err(err) if err.is_auth() && retries < options.max_retries => {
          retries += 1;
          if !self.recover(&err).await {
            return Err(err);
          }
        }
        Err(err) => return Err(err),
      }
    }
  }

  /// One re-authentication round. Returns whether the caller may retry.
  async fn recover(&self, cause: &ApiError) -> bool {
    {
      let mut attempts = self.attempts();
      match attempts.state {
        RecoveryState::Exhausted => return false,
        // Another call is already recovering
        RecoveryState::Recovering => return false,
        RecoveryState::Idle => attempts.state = RecoveryState::Recovering,
      }
    }

    info!(cause = %cause, "Attempting session recovery");

    let guard = RecoveringGuard {
      recovery: self,
      armed: true,
    };
    let outcome = self.reauth.reauthenticate().await;
    guard.disarm();

    match outcome {
      Ok(()) => {
        self.attempts().state = RecoveryState::Idle;
        info!("Session recovered");
        true
      }
      Err(e) => {
        let (count, exhausted) = {
          let mut attempts = self.attempts();
          attempts.attempt_count += 1;
          if attempts.attempt_count >= attempts.max_attempts {
            attempts.state = RecoveryState::Exhausted;
            (attempts.attempt_count, true)
          } else {
            attempts.state = RecoveryState::Idle;
            (attempts.attempt_count, false)
          }
        };
        // The next session starts from a clean count
        self.persist_count(if exhausted { 0 } else { count });

        if exhausted {
          warn!(error = %e, "Session recovery exhausted, clearing session");
          self.expire(ExpiryReason::RecoveryExhausted, Some(cause.to_string()));
        } else {
          warn!(error = %e, "Session recovery attempt failed");
        }
        false
      }
    }
  }

  /// Forcibly clear the session and notify listeners.
  pub fn clear_session(&self) {
    self.expire(ExpiryReason::Cleared, None);
  }

  fn expire(&self, reason: ExpiryReason, message: Option<String>) {
    self.tokens.clear_session();
    self.cache.clear();

    let event = SessionExpired {
      reason,
      message,
      at: Utc::now(),
    };

    // Snapshot so listeners may (un)subscribe from inside a callback
    let listeners: Vec<Listener> = self
      .listeners()
      .iter()
      .map(|(_, listener)| Arc::clone(listener))
      .collect();

    for listener in listeners {
      if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
        error!("Session-expired listener panicked");
      }
    }
  }

  pub fn on_session_expired<F>(&self, listener: F) -> ListenerId
  where
    F: Fn(&SessionExpired) + Send + Sync + 'static,
  {
    let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
    self.listeners().push((id, Arc::new(listener)));
    id
  }

  pub fn off_session_expired(&self, id: ListenerId) -> bool {
    let mut listeners = self.listeners();
    let before = listeners.len();
    listeners.retain(|(existing, _)| *existing != id);
    listeners.len() != before
  }
}
