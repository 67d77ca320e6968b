//! Typed wrappers over [`ApiGateway::request`] for each endpoint group.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use tracing::{info, warn};

use super::checkin::VisitorPass;
use super::error::ApiError;
use super::gateway::{decode, ApiGateway, RequestOptions};
use super::transport::{FormField, Method};
use super::types::{
  AdminStats, AuthResponse, Booking, BookingRequest, LoginRequest, Membership, MessageResponse,
  RegisterRequest, RegisterResponse, Tour, TourRequest, User,
};
use super::validation;
use crate::session::recovery::Reauthenticate;

impl ApiGateway {
  fn require_token(&self) -> Result<(), ApiError> {
    if self.tokens().is_authenticated() {
      Ok(())
    } else {
      Err(ApiError::NoSession)
    }
  }

  /// Store a freshly issued session and drop anything cached for the
  /// previous one.
  fn begin_session(&self, auth: &AuthResponse) {
    self.tokens().set_token(&auth.token);
    if let Some(user) = &auth.user {
      if let Ok(value) = serde_json::to_value(user) {
        self.tokens().set_user(&value);
      }
    }
    self.cache().clear();
  }

  // ==========================================================================
  // Auth
  // ==========================================================================

  pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
    let request = LoginRequest {
      email: email.trim().to_string(),
      password: password.to_string(),
    };
    validation::validate_login(&request).into_result()?;

    let auth: AuthResponse = self.send(Method::Post, "/auth/login", &request).await?;
    self.begin_session(&auth);
    info!(email = %request.email, "Signed in");
    Ok(auth)
  }

  pub async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, ApiError> {
    validation::validate_registration(request).into_result()?;
    self.send(Method::Post, "/auth/register", request).await
  }

  pub async fn verify_otp(&self, email: &str, otp: &str) -> Result<AuthResponse, ApiError> {
    validation::validate_otp(email, otp).into_result()?;

    let body = json!({ "email": email.trim(), "otp": otp });
    let auth: AuthResponse = self.send(Method::Post, "/auth/otp/verify", &body).await?;
    self.begin_session(&auth);
    info!(email = email.trim(), "Email verified");
    Ok(auth)
  }

  pub async fn resend_otp(&self, email: &str) -> Result<MessageResponse, ApiError> {
    validation::validate_email(email).into_result()?;
    self
      .send(Method::Post, "/auth/otp/resend", &json!({ "email": email.trim() }))
      .await
  }

  /// Sign out. The local session is cleared even when the server call fails.
  pub async fn logout(&self) -> Result<(), ApiError> {
    let result = self
      .request("/auth/logout", RequestOptions::new(Method::Post))
      .await;

    self.tokens().clear_session();
    self.cache().clear();

    match result {
      Ok(_) => {
        info!("Signed out");
        Ok(())
      }
      Err(e) => {
        warn!(error = %e, "Server logout failed; local session cleared");
        Err(e)
      }
    }
  }

  pub async fn me(&self) -> Result<User, ApiError> {
    self.require_token()?;
    let value = self.request("/auth/me", RequestOptions::get()).await?;
    // Some deployments wrap the user as {"user": {...}}
    let user_value = match value.get("user") {
      Some(inner) if inner.is_object() => inner.clone(),
      _ => value,
    };
    self.tokens().set_user(&user_value);
    decode(user_value)
  }

  pub async fn forgot_password(&self, email: &str) -> Result<MessageResponse, ApiError> {
    validation::validate_email(email).into_result()?;
    self
      .send(
        Method::Post,
        "/auth/forgot-password",
        &json!({ "email": email.trim() }),
      )
      .await
  }

  pub async fn reset_password(
    &self,
    reset_token: &str,
    password: &str,
  ) -> Result<MessageResponse, ApiError> {
    validation::validate_password(password).into_result()?;
    self
      .send(
        Method::Post,
        "/auth/reset-password",
        &json!({ "token": reset_token, "password": password }),
      )
      .await
  }

  // ==========================================================================
  // Member
  // ==========================================================================

  pub async fn member_details(&self) -> Result<Value, ApiError> {
    self.require_token()?;
    self.request("/member/details", RequestOptions::get()).await
  }

  pub async fn update_member_details(&self, details: &Value) -> Result<Value, ApiError> {
    self.require_token()?;
    self
      .request(
        "/member/details",
        RequestOptions::json(Method::Put, details.clone()),
      )
      .await
  }

  pub async fn upload_member_photo(
    &self,
    file_name: &str,
    content_type: &str,
    bytes: Vec<u8>,
    caption: Option<&str>,
  ) -> Result<Value, ApiError> {
    self.require_token()?;
    let mut fields = vec![FormField::File {
      name: "photo".to_string(),
      file_name: file_name.to_string(),
      content_type: content_type.to_string(),
      bytes,
    }];
    if let Some(caption) = caption {
      fields.push(FormField::Text {
        name: "caption".to_string(),
        value: caption.to_string(),
      });
    }
    self
      .request("/member/photo", RequestOptions::multipart(Method::Post, fields))
      .await
  }

  // ==========================================================================
  // Booking
  // ==========================================================================

  pub async fn create_booking(&self, request: &BookingRequest) -> Result<Booking, ApiError> {
    validation::validate_booking(request).into_result()?;
    self.require_token()?;
    self.send(Method::Post, "/booking", request).await
  }

  pub async fn my_bookings(&self) -> Result<Vec<Booking>, ApiError> {
    self.require_token()?;
    self.get("/booking/my").await
  }

  pub async fn cancel_booking(&self, booking_id: &str) -> Result<(), ApiError> {
    self.require_token()?;
    self
      .request(
        &format!("/booking/{}", booking_id),
        RequestOptions::new(Method::Delete),
      )
      .await?;
    Ok(())
  }

  // ==========================================================================
  // Membership
  // ==========================================================================

  pub async fn memberships(&self) -> Result<Vec<Membership>, ApiError> {
    self.require_token()?;
    self.get("/membership").await
  }

  pub async fn update_membership(
    &self,
    membership_id: &str,
    changes: &Value,
  ) -> Result<Membership, ApiError> {
    self.require_token()?;
    self
      .send(Method::Patch, &format!("/membership/{}", membership_id), changes)
      .await
  }

  /// Download the membership export (CSV) to `out`. Returns bytes written.
  pub async fn export_memberships(&self, out: &Path) -> Result<usize, ApiError> {
    self.require_token()?;
    let contents = self.download("/membership/export").await?;
    std::fs::write(out, &contents)
      .map_err(|e| ApiError::Local(format!("Failed to write {}: {}", out.display(), e)))?;
    Ok(contents.len())
  }

  // ==========================================================================
  // Tour
  // ==========================================================================

  pub async fn tours(&self) -> Result<Vec<Tour>, ApiError> {
    self.require_token()?;
    self.get("/tour").await
  }

  pub async fn schedule_tour(&self, request: &TourRequest) -> Result<Tour, ApiError> {
    validation::validate_tour(request).into_result()?;
    self.send(Method::Post, "/tour", request).await
  }

  pub async fn check_in(&self, pass: &VisitorPass) -> Result<Tour, ApiError> {
    self.require_token()?;
    let response = self
      .request(
        "/tour/checkin",
        RequestOptions::json(Method::Post, pass.check_in_body()),
      )
      .await?;
    // Response is either the tour or {"tour": {...}}
    match response.get("tour") {
      Some(tour) if tour.is_object() => decode(tour.clone()),
      _ => decode(response),
    }
  }

  // ==========================================================================
  // Admin
  // ==========================================================================

  pub async fn admin_stats(&self) -> Result<AdminStats, ApiError> {
    self.require_token()?;
    self.get("/admin/stats").await
  }

  pub async fn admin_users(&self) -> Result<Vec<User>, ApiError> {
    self.require_token()?;
    self.get("/admin/users").await
  }

  pub async fn delete_user(&self, user_id: &str) -> Result<(), ApiError> {
    self.require_token()?;
    self
      .request(
        &format!("/admin/users/{}", user_id),
        RequestOptions::new(Method::Delete),
      )
      .await?;
    Ok(())
  }
}

#[async_trait]
impl Reauthenticate for ApiGateway {
  /// Confirm the held token still works by re-fetching the current user.
  async fn reauthenticate(&self) -> Result<(), ApiError> {
    self.me().await.map(|_| ())
  }
}
