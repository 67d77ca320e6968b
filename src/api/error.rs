//! Closed error taxonomy surfaced by the API gateway.

use std::fmt;
use std::time::Duration;

/// Server messages that indicate a dead or rejected session even when the
/// status code does not say so.
const AUTH_FAILURE_PHRASES: &[&str] = &[
  "jwt expired",
  "jwt malformed",
  "invalid token",
  "invalid signature",
  "token expired",
  "no token",
  "unauthorized",
  "not authorized",
];

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
  pub field: String,
  pub message: String,
}

/// Field-level validation failures collected before a request is sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(Vec<FieldError>);

impl FieldErrors {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, field: &str, message: &str) {
    self.0.push(FieldError {
      field: field.to_string(),
      message: message.to_string(),
    });
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
    self.0.iter()
  }

  /// Message for a given field, if it failed.
  #[cfg(test)]
  pub fn get(&self, field: &str) -> Option<&str> {
    self
      .0
      .iter()
      .find(|e| e.field == field)
      .map(|e| e.message.as_str())
  }

  /// Turn the collection into a result: `Ok` when nothing failed.
  pub fn into_result(self) -> Result<(), ApiError> {
    if self.is_empty() {
      Ok(())
    } else {
      Err(ApiError::Validation(self))
    }
  }
}

impl fmt::Display for FieldErrors {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let joined = self
      .0
      .iter()
      .map(|e| format!("{}: {}", e.field, e.message))
      .collect::<Vec<_>>()
      .join("; ");
    f.write_str(&joined)
  }
}

/// Coarse classification of an [`ApiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  Timeout,
  Network,
  Http,
  Auth,
  Decode,
  Validation,
  Local,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
  /// The request exceeded its deadline and was cancelled.
  #[error("Request timed out after {}s", after.as_secs())]
  Timeout { after: Duration },

  /// The server could not be reached.
  #[error("Network error: {0}")]
  Network(String),

  /// The server answered with a non-success status.
  #[error("{message}")]
  Http { status: u16, message: String },

  /// A success response whose body could not be decoded.
  #[error("Invalid response body: {0}")]
  Decode(String),

  /// Client-side field checks failed; nothing was sent.
  #[error("{0}")]
  Validation(FieldErrors),

  /// No token is held for an operation that needs one.
  #[error("Not signed in")]
  NoSession,

  /// Failed on this side before or after the exchange, such as encoding
  /// the request or writing a download to disk.
  #[error("{0}")]
  Local(String),
}

impl ApiError {
  pub fn http(status: u16, message: impl Into<String>) -> Self {
    Self::Http {
      status,
      message: message.into(),
    }
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Timeout { .. } => ErrorKind::Timeout,
      Self::Network(_) => ErrorKind::Network,
      Self::Decode(_) => ErrorKind::Decode,
      Self::Validation(_) => ErrorKind::Validation,
      Self::Local(_) => ErrorKind::Local,
      Self::NoSession => ErrorKind::Auth,
      Self::Http { .. } if self.is_auth() => ErrorKind::Auth,
      Self::Http { .. } => ErrorKind::Http,
    }
  }

  /// HTTP status, when the server produced one.
  pub fn status(&self) -> Option<u16> {
    match self {
      Self::Http { status, .. } => Some(*status),
      _ => None,
    }
  }

  /// Whether this failure means the session is no longer accepted.
  pub fn is_auth(&self) -> bool {
    match self {
      Self::NoSession => true,
      Self::Http { status, message } => {
        matches!(status, 401 | 403) || is_auth_failure_message(message)
      }
      _ => false,
    }
  }
}

fn is_auth_failure_message(message: &str) -> bool {
  let lower = message.to_lowercase();
  AUTH_FAILURE_PHRASES.iter().any(|p| lower.contains(p))
}
