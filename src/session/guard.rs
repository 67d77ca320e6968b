//! Session checks run before state-changing operations.

use std::fmt;
use std::future::Future;

use super::token_store::TokenStore;
use crate::api::error::ApiError;
use crate::api::gateway::ApiGateway;

pub const LOGIN_PATH: &str = "/login";

/// Uniform failure action: send the user to the login screen, remembering
/// where they were.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequired {
  pub return_to: String,
  pub reason: String,
}

impl AuthRequired {
  pub fn new(return_to: &str, reason: impl Into<String>) -> Self {
    Self {
      return_to: return_to.to_string(),
      reason: reason.into(),
    }
  }

  pub fn login_redirect(&self) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(self.return_to.as_bytes()).collect();
    format!("{}?returnTo={}", LOGIN_PATH, encoded)
  }
}

impl fmt::Display for AuthRequired {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} (sign in again: {})", self.reason, self.login_redirect())
  }
}

impl std::error::Error for AuthRequired {}

#[derive(Debug, thiserror::Error)]
pub enum GuardedError {
  #[error(transparent)]
  AuthRequired(#[from] AuthRequired),
  #[error(transparent)]
  Api(#[from] ApiError),
}

/// Fail fast when no token is held.
pub fn require_session(tokens: &TokenStore, return_path: &str) -> Result<(), AuthRequired> {
  if tokens.is_authenticated() {
    Ok(())
  } else {
    Err(AuthRequired::new(return_path, "Please sign in to continue"))
  }
}

/// Confirm with the server that the held token is still accepted.
pub async fn validate_session(
  gateway: &ApiGateway,
  return_path: &str,
) -> Result<crate::api::types::User, GuardedError> {
  require_session(gateway.tokens(), return_path)?;
  match gateway.me().await {
    Ok(user) => Ok(user),
    Err(e) if e.is_auth() => {
      gateway.tokens().clear_session();
      Err(AuthRequired::new(return_path, "Your session has expired").into())
    }
    Err(e) => Err(e.into()),
  }
}

/// Run a state-changing operation only when a session exists.
pub async fn guarded<T, F, Fut>(
  tokens: &TokenStore,
  return_path: &str,
  operation: F,
) -> Result<T, GuardedError>
where
  F: FnOnce() -> Fut,
  Fut: Future<Output = Result<T, ApiError>>,
{
  require_session(tokens, return_path)?;
  match operation().await {
    Err(e) if e.is_auth() => {
      Err(AuthRequired::new(return_path, "Your session has expired").into())
    }
    other => other.map_err(GuardedError::from),
  }
}
