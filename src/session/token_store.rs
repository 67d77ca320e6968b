//! Bearer token persistence across the session and durable scopes.
//!
//! The session scope is authoritative. A token found in the one-shot
//! hand-off slot or in the legacy durable scope is migrated into the
//! session scope on first read, so after any read at most one scope holds
//! it.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::scope::Scope;

const TOKEN_KEY: &str = "token";
const USER_KEY: &str = "user";
const HANDOFF_KEY: &str = "temp_token";

/// Refresh once the token is this close to expiring.
pub const REFRESH_BUFFER_SECS: i64 = 120;

pub struct TokenStore {
  session: Arc<dyn Scope>,
  durable: Arc<dyn Scope>,
}

impl TokenStore {
  pub fn new(session: Arc<dyn Scope>, durable: Arc<dyn Scope>) -> Self {
    Self { session, durable }
  }

  pub fn get_token(&self) -> Option<String> {
    if let Some(token) = read(self.session.as_ref(), TOKEN_KEY) {
      return Some(token);
    }

    if let Some(token) = read(self.durable.as_ref(), HANDOFF_KEY) {
      debug!("Promoting hand-off token into session scope");
      write(self.session.as_ref(), TOKEN_KEY, &token);
      delete(self.durable.as_ref(), HANDOFF_KEY);
      return Some(token);
    }

    if let Some(token) = read(self.durable.as_ref(), TOKEN_KEY) {
      debug!("Migrating legacy durable token into session scope");
      write(self.session.as_ref(), TOKEN_KEY, &token);
      delete(self.durable.as_ref(), TOKEN_KEY);
      return Some(token);
    }

    None
  }

  pub fn set_token(&self, token: &str) {
    write(self.session.as_ref(), TOKEN_KEY, token);
    delete(self.durable.as_ref(), TOKEN_KEY);
    delete(self.durable.as_ref(), HANDOFF_KEY);
  }

  /// Park a token in the hand-off slot for the next reader to claim. The
  /// session copy is dropped so only the slot holds it.
  pub fn hand_off(&self, token: &str) {
    delete(self.session.as_ref(), TOKEN_KEY);
    delete(self.durable.as_ref(), TOKEN_KEY);
    write(self.durable.as_ref(), HANDOFF_KEY, token);
  }

  pub fn remove_token(&self) {
    delete(self.session.as_ref(), TOKEN_KEY);
    delete(self.durable.as_ref(), TOKEN_KEY);
    delete(self.durable.as_ref(), HANDOFF_KEY);
  }

  pub fn is_authenticated(&self) -> bool {
    self.get_token().is_some()
  }

  pub fn set_user(&self, user: &Value) {
    write(self.session.as_ref(), USER_KEY, &user.to_string());
  }

  pub fn user(&self) -> Option<Value> {
    read(self.session.as_ref(), USER_KEY).and_then(|raw| serde_json::from_str(&raw).ok())
  }

  /// Remove the token and the cached user.
  pub fn clear_session(&self) {
    self.remove_token();
    delete(self.session.as_ref(), USER_KEY);
  }

  pub fn should_refresh_token(&self) -> bool {
    self.should_refresh_at(Utc::now())
  }

  /// Whether the held token expires within [`REFRESH_BUFFER_SECS`] of `now`.
  ///
  /// A missing or undecodable token never asks for a refresh.
  pub fn should_refresh_at(&self, now: DateTime<Utc>) -> bool {
    let Some(token) = self.get_token() else {
      return false;
    };

    match token_expiry(&token) {
      Some(expires_at) => expires_at - now < Duration::seconds(REFRESH_BUFFER_SECS),
      None => false,
    }
  }
}

#[derive(Deserialize)]
struct ExpiryClaim {
  exp: Option<i64>,
}

/// Expiry claim of a JWT-shaped token, without verifying it.
pub fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
  let payload = token.split('.').nth(1)?;
  let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
  let claim: ExpiryClaim = serde_json::from_slice(&bytes).ok()?;
  Utc.timestamp_opt(claim.exp?, 0).single()
}

fn read(scope: &dyn Scope, key: &str) -> Option<String> {
  scope.get(key).unwrap_or_else(|e| {
    warn!(key, error = %e, "Token scope read failed");
    None
  })
}

fn write(scope: &dyn Scope, key: &str, value: &str) {
  if let Err(e) = scope.set(key, value) {
    warn!(key, error = %e, "Token scope write failed");
  }
}

fn delete(scope: &dyn Scope, key: &str) {
  if let Err(e) = scope.remove(key) {
    warn!(key, error = %e, "Token scope delete failed");
  }
}


#[cfg(test)]
mod tests {
  use super::testing::token_expiring_at;
  use super::*;
  use crate::session::scope::MemoryScope;
  use serde_json::json;

  fn store() -> (TokenStore, Arc<MemoryScope>, Arc<MemoryScope>) {
    let session = Arc::new(MemoryScope::new());
    let durable = Arc::new(MemoryScope::new());
    let store = TokenStore::new(session.clone(), durable.clone());
    (store, session, durable)
  }

  #[test]
  fn test_set_then_get_round_trip() {
    let (store, _, _) = store();
    store.set_token("t1");
    assert_eq!(store.get_token().as_deref(), Some("t1"));
    assert!(store.is_authenticated());
  }

  #[test]
  fn test_set_clears_durable_copy() {
    let (store, session, durable) = store();
    durable.set(TOKEN_KEY, "old").unwrap();
    store.set_token("new");
    assert_eq!(durable.get(TOKEN_KEY).unwrap(), None);
    assert_eq!(session.get(TOKEN_KEY).unwrap().as_deref(), Some("new"));
  }

  #[test]
  fn test_durable_token_migrates_on_read() {
    let (store, session, durable) = store();
    durable.set(TOKEN_KEY, "legacy").unwrap();

    assert_eq!(store.get_token().as_deref(), Some("legacy"));
    assert_eq!(session.get(TOKEN_KEY).unwrap().as_deref(), Some("legacy"));
    assert_eq!(durable.get(TOKEN_KEY).unwrap(), None);
  }

  #[test]
  fn test_handoff_slot_is_one_shot() {
    let (store, session, durable) = store();
    store.hand_off("handed");

    assert_eq!(store.get_token().as_deref(), Some("handed"));
    assert_eq!(durable.get(HANDOFF_KEY).unwrap(), None);
    assert_eq!(session.get(TOKEN_KEY).unwrap().as_deref(), Some("handed"));
  }

  #[test]
  fn test_set_token_drops_pending_handoff() {
    let (store, session, durable) = store();
    store.hand_off("parked");
    store.set_token("fresh");

    assert_eq!(durable.get(HANDOFF_KEY).unwrap(), None);
    assert_eq!(session.get(TOKEN_KEY).unwrap().as_deref(), Some("fresh"));
    store.remove_token();
    assert_eq!(store.get_token(), None);
  }

  #[test]
  fn test_handoff_moves_session_token_into_slot() {
    let (store, session, durable) = store();
    store.set_token("current");
    store.hand_off("current");

    assert_eq!(session.get(TOKEN_KEY).unwrap(), None);
    assert_eq!(durable.get(HANDOFF_KEY).unwrap().as_deref(), Some("current"));
    assert_eq!(store.get_token().as_deref(), Some("current"));
    assert_eq!(durable.get(HANDOFF_KEY).unwrap(), None);
  }

  #[test]
  fn test_session_scope_wins_over_durable() {
    let (store, session, durable) = store();
    session.set(TOKEN_KEY, "current").unwrap();
    durable.set(TOKEN_KEY, "legacy").unwrap();
    assert_eq!(store.get_token().as_deref(), Some("current"));
  }

  #[test]
  fn test_remove_token_is_idempotent() {
    let (store, session, durable) = store();
    store.set_token("t");
    durable.set(TOKEN_KEY, "legacy").unwrap();

    store.remove_token();
    store.remove_token();

    assert_eq!(session.get(TOKEN_KEY).unwrap(), None);
    assert_eq!(durable.get(TOKEN_KEY).unwrap(), None);
    assert!(!store.is_authenticated());
  }

  #[test]
  fn test_clear_session_drops_user() {
    let (store, _, _) = store();
    store.set_token("t");
    store.set_user(&json!({"email": "a@b.co"}));
    assert_eq!(store.user(), Some(json!({"email": "a@b.co"})));

    store.clear_session();
    assert_eq!(store.user(), None);
    assert_eq!(store.get_token(), None);
  }

  #[test]
  fn test_should_refresh_inside_buffer() {
    let (store, _, _) = store();
    let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

    store.set_token(&token_expiring_at(1_700_000_000 + 60));
    assert!(store.should_refresh_at(now));

    store.set_token(&token_expiring_at(1_700_000_000 + 600));
    assert!(!store.should_refresh_at(now));

    // Already expired
    store.set_token(&token_expiring_at(1_700_000_000 - 10));
    assert!(store.should_refresh_at(now));
  }

  #[test]
  fn test_malformed_token_never_refreshes() {
    let (store, _, _) = store();
    store.set_token("not-a-jwt");
    assert!(!store.should_refresh_token());

    store.set_token("a.%%%.c");
    assert!(!store.should_refresh_token());
  }

  #[test]
  fn test_no_token_never_refreshes() {
    let (store, _, _) = store();
    assert!(!store.should_refresh_token());
  }
}
