//! Form-state snapshots kept across a session recovery.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::scope::Scope;

const KEY_PREFIX: &str = "form_snapshot:";

pub const DEFAULT_MAX_AGE_SECS: i64 = 60 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSnapshot {
  pub form_id: String,
  pub data: Value,
  pub captured_at: DateTime<Utc>,
  pub origin_path: String,
}

/// Snapshot store keyed by form id, backed by a session scope.
pub struct FormSnapshots {
  scope: Arc<dyn Scope>,
  max_age: Duration,
}

impl FormSnapshots {
  pub fn new(scope: Arc<dyn Scope>, max_age_secs: i64) -> Self {
    Self {
      scope,
      max_age: Duration::seconds(max_age_secs),
    }
  }

  fn key(form_id: &str) -> String {
    format!("{}{}", KEY_PREFIX, form_id)
  }

  pub fn capture(&self, form_id: &str, data: Value, origin_path: &str) {
    self.store(&FormSnapshot {
      form_id: form_id.to_string(),
      data,
      captured_at: Utc::now(),
      origin_path: origin_path.to_string(),
    });
  }

  fn store(&self, snapshot: &FormSnapshot) {
    let raw = match serde_json::to_string(snapshot) {
      Ok(raw) => raw,
      Err(e) => {
        warn!(form_id = %snapshot.form_id, error = %e, "Failed to encode form snapshot");
        return;
      }
    };
    if let Err(e) = self.scope.set(&Self::key(&snapshot.form_id), &raw) {
      warn!(form_id = %snapshot.form_id, error = %e, "Failed to store form snapshot");
    }
  }

  /// Take the snapshot for `form_id`, discarding it if it has gone stale.
  pub fn restore(&self, form_id: &str) -> Option<FormSnapshot> {
    self.restore_at(form_id, Utc::now())
  }

  pub fn restore_at(&self, form_id: &str, now: DateTime<Utc>) -> Option<FormSnapshot> {
    let key = Self::key(form_id);
    let raw = self.scope.get(&key).ok().flatten()?;
    self.discard(form_id);

    let snapshot: FormSnapshot = serde_json::from_str(&raw).ok()?;
    if now - snapshot.captured_at > self.max_age {
      debug!(form_id, "Discarding stale form snapshot");
      return None;
    }
    Some(snapshot)
  }

  pub fn discard(&self, form_id: &str) {
    if let Err(e) = self.scope.remove(&Self::key(form_id)) {
      warn!(form_id, error = %e, "Failed to remove form snapshot");
    }
  }

  /// Remove every snapshot older than the staleness window.
  pub fn prune(&self) -> usize {
    let now = Utc::now();
    let keys = self.scope.keys_with_prefix(KEY_PREFIX).unwrap_or_default();
    let mut removed = 0;

    for key in keys {
      let stale = match self.scope.get(&key).ok().flatten() {
        Some(raw) => match serde_json::from_str::<FormSnapshot>(&raw) {
          Ok(snapshot) => now - snapshot.captured_at > self.max_age,
          Err(_) => true,
        },
        None => false,
      };
      if stale && self.scope.remove(&key).is_ok() {
        removed += 1;
      }
    }
    removed
  }
}
