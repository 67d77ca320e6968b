//! Request and response bodies for the membership REST API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
  #[serde(alias = "_id")]
  pub id: String,
  #[serde(default)]
  pub first_name: Option<String>,
  #[serde(default)]
  pub last_name: Option<String>,
  pub email: String,
  #[serde(default)]
  pub role: Option<String>,
  #[serde(default)]
  pub is_verified: bool,
}

impl User {
  pub fn is_admin(&self) -> bool {
    self.role.as_deref() == Some("admin")
  }

  pub fn display_name(&self) -> String {
    match (&self.first_name, &self.last_name) {
      (Some(first), Some(last)) => format!("{} {}", first, last),
      (Some(first), None) => first.clone(),
      _ => self.email.clone(),
    }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
  pub email: String,
  pub password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
  pub first_name: String,
  pub last_name: String,
  pub email: String,
  pub password: String,
  #[serde(skip_serializing)]
  pub confirm_password: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub phone: Option<String>,
}

/// Token-bearing response from login, OTP verification and refresh.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
  pub token: String,
  #[serde(default)]
  pub user: Option<User>,
}

/// Registration only issues an OTP; the token follows verification.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
  #[serde(default)]
  pub message: Option<String>,
  #[serde(default)]
  pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageResponse {
  #[serde(default)]
  pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
  pub date: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub time_slot: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
  #[serde(alias = "_id")]
  pub id: String,
  pub date: String,
  #[serde(default)]
  pub time_slot: Option<String>,
  #[serde(default)]
  pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
  #[serde(alias = "_id")]
  pub id: String,
  #[serde(default)]
  pub plan: Option<String>,
  #[serde(default)]
  pub status: Option<String>,
  #[serde(default)]
  pub start_date: Option<String>,
  #[serde(default)]
  pub end_date: Option<String>,
  #[serde(default)]
  pub user: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tour {
  #[serde(alias = "_id")]
  pub id: String,
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub email: Option<String>,
  #[serde(default)]
  pub scheduled_at: Option<String>,
  #[serde(default)]
  pub status: Option<String>,
  #[serde(default)]
  pub checked_in: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TourRequest {
  pub name: String,
  pub email: String,
  pub scheduled_at: String,
}

/// Dashboard counters; unknown counters are kept verbatim.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdminStats {
  #[serde(default)]
  pub count: Option<u64>,
  #[serde(default)]
  pub total_members: Option<u64>,
  #[serde(default)]
  pub active_memberships: Option<u64>,
  #[serde(default)]
  pub pending_tours: Option<u64>,
  #[serde(flatten)]
  pub other: serde_json::Map<String, Value>,
}
