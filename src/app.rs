use crate::api::checkin::VisitorPass;
use crate::api::error::ErrorKind;
use crate::api::transport::{ReqwestTransport, Transport};
use crate::api::types::{BookingRequest, RegisterRequest, TourRequest, User};
use crate::api::ApiError;
use crate::api::{ApiGateway, RequestOptions};
use crate::cache::{policy, RequestCache};
use crate::commands::Command;
use crate::config::Config;
use crate::session::guard::{self, GuardedError};
use crate::session::recovery::{ListenerId, Reauthenticate};
use crate::session::token_store::token_expiry;
use crate::session::{
  FormSnapshots, MemoryScope, RecoveryOptions, Scope, SessionDatabase, SessionRecovery, TokenStore,
};
use color_eyre::{eyre::eyre, Report, Result};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const SESSION_TABLE: &str = "session_scope";
const DURABLE_TABLE: &str = "durable_scope";

/// Form id under which an interrupted profile update is kept
const PROFILE_FORM: &str = "member-details";

/// Composition root: owns one instance of every service and runs commands
/// against them.
pub struct App {
  gateway: Arc<ApiGateway>,
  recovery: SessionRecovery,
  snapshots: FormSnapshots,
  sweeper: Option<JoinHandle<()>>,
  expiry_listener: ListenerId,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let (session, durable) = match Self::open_scopes(&config) {
      Ok(scopes) => scopes,
      Err(e) => {
        warn!(error = %e, "Session database unavailable, session will not outlive this command");
        let session: Arc<dyn Scope> = Arc::new(MemoryScope::new());
        let durable: Arc<dyn Scope> = Arc::new(MemoryScope::new());
        (session, durable)
      }
    };

    let transport = ReqwestTransport::from_kind(config.api.transport)
      .map_err(|e| eyre!("Failed to create HTTP transport: {}", e))?;

    Ok(Self::with_parts(&config, Arc::new(transport), session, durable))
  }

  fn open_scopes(config: &Config) -> Result<(Arc<dyn Scope>, Arc<dyn Scope>)> {
    let db = SessionDatabase::open(config.session.database.as_deref())?;
    let session: Arc<dyn Scope> = Arc::new(db.scope(SESSION_TABLE)?);
    let durable: Arc<dyn Scope> = Arc::new(db.scope(DURABLE_TABLE)?);
    Ok((session, durable))
  }

  /// Wire the services together around the given transport and scopes.
  pub fn with_parts(
    config: &Config,
    transport: Arc<dyn Transport>,
    session: Arc<dyn Scope>,
    durable: Arc<dyn Scope>,
  ) -> Self {
    let tokens = Arc::new(TokenStore::new(Arc::clone(&session), durable));
    let cache = Arc::new(RequestCache::new());

    let sweeper = match config.cache.sweep_interval_secs {
      0 => None,
      secs => Some(cache.spawn_sweeper(Duration::from_secs(secs))),
    };

    let gateway = Arc::new(ApiGateway::new(
      &config.api.base_url,
      transport,
      Arc::clone(&cache),
      Arc::clone(&tokens),
      config.api.timeouts(),
    ));

    let reauth: Arc<dyn Reauthenticate> = gateway.clone();
    let recovery = SessionRecovery::new(
      reauth,
      tokens,
      cache,
      config.session.max_recovery_attempts,
    )
    .with_attempt_store(Arc::clone(&session));
    let expiry_listener = recovery.on_session_expired(|event| {
      warn!(
        reason = ?event.reason,
        cause = ?event.message,
        at = %event.at,
        "Session expired"
      );
    });

    let snapshots = FormSnapshots::new(session, config.session.snapshot_max_age_secs);
    let pruned = snapshots.prune();
    if pruned > 0 {
      info!(pruned, "Removed stale form snapshots");
    }

    Self {
      gateway,
      recovery,
      snapshots,
      sweeper,
      expiry_listener,
    }
  }

  /// Run one command and return the text to print.
  pub async fn run(&self, command: Command) -> Result<String> {
    let path = command.return_path();
    let gateway = &self.gateway;

    match command {
      Command::Login {
        email,
        password,
        hand_off,
      } => {
        let auth = gateway.login(&email, &password).await.map_err(api_error)?;
        self.recovery.reset();
        let name = auth.user.map(|u| u.display_name()).unwrap_or(email);
        if hand_off {
          gateway.tokens().hand_off(&auth.token);
          return Ok(format!("Signed in as {}; token parked for the next command", name));
        }
        Ok(format!("Signed in as {}", name))
      }

      Command::Register {
        first_name,
        last_name,
        email,
        password,
        confirm_password,
        phone,
      } => {
        let request = RegisterRequest {
          first_name,
          last_name,
          email,
          confirm_password: confirm_password.unwrap_or_else(|| password.clone()),
          password,
          phone,
        };
        let response = gateway.register(&request).await.map_err(api_error)?;
        let email = response.email.unwrap_or(request.email);
        Ok(response
          .message
          .unwrap_or_else(|| format!("Check {} for a verification code", email)))
      }

      Command::VerifyOtp { email, otp } => {
        let auth = gateway.verify_otp(&email, &otp).await.map_err(api_error)?;
        self.recovery.reset();
        let name = auth.user.map(|u| u.display_name()).unwrap_or(email);
        Ok(format!("Email verified, signed in as {}", name))
      }

      Command::ResendOtp { email } => {
        let response = gateway.resend_otp(&email).await.map_err(api_error)?;
        Ok(response.message.unwrap_or_else(|| "Verification code sent".to_string()))
      }

      Command::ForgotPassword { email } => {
        let response = gateway.forgot_password(&email).await.map_err(api_error)?;
        Ok(response.message.unwrap_or_else(|| "Password reset email sent".to_string()))
      }

      Command::ResetPassword { token, password } => {
        let response = gateway
          .reset_password(&token, &password)
          .await
          .map_err(api_error)?;
        Ok(response.message.unwrap_or_else(|| "Password updated".to_string()))
      }

      Command::Logout => {
        let result = gateway.logout().await;
        self.recovery.clear_session();
        match result {
          Ok(()) => Ok("Signed out".to_string()),
          Err(e) => Ok(format!("Signed out locally (server said: {})", e)),
        }
      }

      Command::Me => to_json(&self.authenticated(path, || gateway.me()).await?),

      Command::Session { check } => self.session_status(check).await,

      Command::Get { endpoint } => {
        let value = self
          .authenticated(path, || gateway.request(&endpoint, RequestOptions::get()))
          .await?;
        to_json(&value)
      }

      Command::Profile => to_json(&self.authenticated(path, || gateway.member_details()).await?),

      Command::ProfileUpdate { data, resume } => self.update_profile(data, resume).await,

      Command::UploadPhoto { file, caption } => {
        let bytes = std::fs::read(&file)
          .map_err(|e| eyre!("Failed to read {}: {}", file.display(), e))?;
        let file_name = file
          .file_name()
          .map(|n| n.to_string_lossy().into_owned())
          .unwrap_or_else(|| "photo".to_string());
        let content_type = image_content_type(&file);

        let value = self
          .authenticated(path, || {
            gateway.upload_member_photo(
              &file_name,
              content_type,
              bytes.clone(),
              caption.as_deref(),
            )
          })
          .await?;
        to_json(&value)
      }

      Command::Bookings => to_json(&self.authenticated(path, || gateway.my_bookings()).await?),

      Command::Book {
        date,
        time_slot,
        notes,
      } => {
        let request = BookingRequest {
          date,
          time_slot,
          notes,
        };
        to_json(&self.authenticated(path, || gateway.create_booking(&request)).await?)
      }

      Command::CancelBooking { id } => {
        self.authenticated(path, || gateway.cancel_booking(&id)).await?;
        Ok(format!("Booking {} cancelled", id))
      }

      Command::Memberships => to_json(&self.authenticated(path, || gateway.memberships()).await?),

      Command::UpdateMembership { id, data } => {
        let changes = parse_object(&data)?;
        to_json(
          &self
            .authenticated(path, || gateway.update_membership(&id, &changes))
            .await?,
        )
      }

      Command::ExportMemberships { out } => {
        let written = self
          .authenticated(path, || gateway.export_memberships(&out))
          .await?;
        Ok(format!("Wrote {} bytes to {}", written, out.display()))
      }

      Command::Tours => to_json(&self.authenticated(path, || gateway.tours()).await?),

      Command::ScheduleTour { name, email, at } => {
        let request = TourRequest {
          name,
          email,
          scheduled_at: at,
        };
        to_json(&gateway.schedule_tour(&request).await.map_err(api_error)?)
      }

      Command::CheckIn { payload } => {
        let pass = VisitorPass::from_qr_payload(&payload)
          .map_err(|e| eyre!("Failed to read visitor pass: {}", e))?;
        let tour = self.authenticated(path, || gateway.check_in(&pass)).await?;
        let name = tour.name.clone().or(pass.name).unwrap_or_else(|| tour.id.clone());
        Ok(format!("Checked in {}", name))
      }

      Command::Stats => to_json(&self.authenticated(path, || gateway.admin_stats()).await?),

      Command::Users => to_json(&self.authenticated(path, || gateway.admin_users()).await?),

      Command::DeleteUser { id } => {
        self.authenticated(path, || gateway.delete_user(&id)).await?;
        Ok(format!("User {} deleted", id))
      }

      Command::CachePolicy { endpoint } => Ok(describe_policy(&endpoint)),
    }
  }

  /// Run `operation` behind the session guard with automatic recovery.
  async fn guarded_call<T, F, Fut>(&self, return_path: &str, operation: F) -> Result<T, GuardedError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
  {
    guard::guarded(self.gateway.tokens(), return_path, || {
      self
        .recovery
        .with_recovery(operation, RecoveryOptions::default())
    })
    .await
  }

  async fn authenticated<T, F, Fut>(&self, return_path: &str, operation: F) -> Result<T>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
  {
    match self.guarded_call(return_path, operation).await {
      Ok(value) => Ok(value),
      Err(GuardedError::AuthRequired(required)) => Err(eyre!("{}", required)),
      Err(GuardedError::Api(e)) => Err(api_error(e)),
    }
  }

  async fn session_status(&self, check: bool) -> Result<String> {
    let tokens = self.gateway.tokens();
    let mut lines = Vec::new();

    if check {
      match guard::validate_session(&self.gateway, "/").await {
        Ok(user) => lines.push(format!("Server accepts the session for {}", user.email)),
        Err(GuardedError::AuthRequired(required)) => return Err(eyre!("{}", required)),
        Err(GuardedError::Api(e)) => return Err(api_error(e)),
      }
    }

    match tokens.get_token() {
      None => lines.push("Not signed in".to_string()),
      Some(token) => {
        let expiry = token_expiry(&token)
          .map(|at| at.to_rfc3339())
          .unwrap_or_else(|| "unknown".to_string());
        lines.push(format!("Token expires: {}", expiry));
        if tokens.should_refresh_token() {
          lines.push("Token is due for refresh".to_string());
        }
      }
    }

    if let Some(user) = tokens
      .user()
      .and_then(|value| serde_json::from_value::<User>(value).ok())
    {
      let role = if user.is_admin() { "admin" } else { "member" };
      lines.push(format!("User: {} <{}> ({})", user.display_name(), user.email, role));
    }

    let attempts = self.recovery.attempt_state();
    lines.push(format!(
      "Recovery: {:?}, {} of {} attempts used",
      self.recovery.state(),
      attempts.attempt_count,
      attempts.max_attempts
    ));
    Ok(lines.join("\n"))
  }

  /// Send a profile update, keeping the submitted fields if the session is
  /// lost so they can be resent after signing in.
  async fn update_profile(&self, data: Option<String>, resume: bool) -> Result<String> {
    let details = if resume {
      match self.snapshots.restore(PROFILE_FORM) {
        Some(snapshot) => {
          info!(
            origin = %snapshot.origin_path,
            captured_at = %snapshot.captured_at,
            "Resuming profile update"
          );
          snapshot.data
        }
        None => return Ok("No interrupted profile update to resume".to_string()),
      }
    } else {
      let raw = data.ok_or_else(|| eyre!("Either --data or --resume is required"))?;
      parse_object(&raw)?
    };

    self.snapshots.capture(PROFILE_FORM, details.clone(), "/profile");

    let gateway = &self.gateway;
    match self
      .guarded_call("/profile", || gateway.update_member_details(&details))
      .await
    {
      Ok(updated) => {
        self.snapshots.discard(PROFILE_FORM);
        to_json(&updated)
      }
      Err(GuardedError::AuthRequired(required)) => Err(eyre!(
        "{}\nYour changes were kept; sign in and run `clubgate profile-update --resume`",
        required
      )),
      Err(GuardedError::Api(e)) => {
        self.snapshots.discard(PROFILE_FORM);
        Err(api_error(e))
      }
    }
  }
}

impl Drop for App {
  fn drop(&mut self) {
    self.recovery.off_session_expired(self.expiry_listener);
    if let Some(handle) = self.sweeper.take() {
      handle.abort();
    }
  }
}

fn api_error(e: ApiError) -> Report {
  if let ApiError::Validation(errors) = &e {
    let lines: Vec<String> = errors
      .iter()
      .map(|f| format!("  {}: {}", f.field, f.message))
      .collect();
    return eyre!("Please fix the following:\n{}", lines.join("\n"));
  }

  match (e.kind(), e.status()) {
    (ErrorKind::Timeout | ErrorKind::Network, _) => eyre!("Could not reach the server: {}", e),
    (_, Some(status)) => eyre!("Request failed with status {}: {}", status, e),
    _ => eyre!("{}", e),
  }
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
  serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to format response: {}", e))
}

fn parse_object(raw: &str) -> Result<Value> {
  let value: Value =
    serde_json::from_str(raw).map_err(|e| eyre!("Failed to parse JSON input: {}", e))?;
  if !value.is_object() {
    return Err(eyre!("Expected a JSON object, got: {}", raw));
  }
  Ok(value)
}

fn image_content_type(path: &Path) -> &'static str {
  let ext = path
    .extension()
    .and_then(|e| e.to_str())
    .map(|e| e.to_ascii_lowercase());
  match ext.as_deref() {
    Some("png") => "image/png",
    Some("jpg") | Some("jpeg") => "image/jpeg",
    Some("gif") => "image/gif",
    Some("webp") => "image/webp",
    _ => "application/octet-stream",
  }
}

fn describe_policy(endpoint: &str) -> String {
  let bucket = policy::bucket_for(endpoint);
  let ttl = bucket.ttl();
  let mut out = if ttl.is_zero() {
    format!("{}: not cached", endpoint)
  } else {
    format!("{}: cached for {}s ({:?})", endpoint, ttl.as_secs(), bucket)
  };

  let invalidates = policy::invalidations_for(endpoint);
  if !invalidates.is_empty() {
    out.push_str(&format!("\nwrites invalidate: {}", invalidates.join(", ")));
  }
  out
}
