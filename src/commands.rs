//! Command-line subcommands

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
  /// Sign in with email and password
  Login {
    email: String,
    #[arg(short, long, env = "CLUBGATE_PASSWORD", hide_env_values = true)]
    password: String,
    /// Park the token for the next invocation to claim instead of keeping it
    #[arg(long)]
    hand_off: bool,
  },

  /// Create an account; a one-time code is sent by email
  Register {
    #[arg(long)]
    first_name: String,
    #[arg(long)]
    last_name: String,
    #[arg(long)]
    email: String,
    #[arg(long, env = "CLUBGATE_PASSWORD", hide_env_values = true)]
    password: String,
    /// Defaults to the password
    #[arg(long)]
    confirm_password: Option<String>,
    #[arg(long)]
    phone: Option<String>,
  },

  /// Confirm an email address with its one-time code
  #[command(alias = "otp")]
  VerifyOtp { email: String, otp: String },

  /// Send a new one-time code
  ResendOtp { email: String },

  /// Request a password reset email
  ForgotPassword { email: String },

  /// Set a new password using a reset token
  ResetPassword {
    token: String,
    #[arg(short, long, env = "CLUBGATE_PASSWORD", hide_env_values = true)]
    password: String,
  },

  /// Sign out and forget the local session
  Logout,

  /// Show the signed-in user
  #[command(alias = "whoami")]
  Me,

  /// Show the local session: token expiry, cached user, recovery attempts
  #[command(alias = "status")]
  Session {
    /// Also confirm with the server that the token is still accepted
    #[arg(long)]
    check: bool,
  },

  /// GET any endpoint and print the JSON body
  Get { endpoint: String },

  /// Show member details
  Profile,

  /// Update member details from a JSON object
  ProfileUpdate {
    /// JSON object with the fields to change
    #[arg(long, conflicts_with = "resume")]
    data: Option<String>,
    /// Retry the last update that was interrupted by an expired session
    #[arg(long)]
    resume: bool,
  },

  /// Upload a member photo
  UploadPhoto {
    file: PathBuf,
    #[arg(long)]
    caption: Option<String>,
  },

  /// List my bookings
  #[command(alias = "b")]
  Bookings,

  /// Book a visit
  Book {
    /// Date as YYYY-MM-DD
    date: String,
    #[arg(long)]
    time_slot: Option<String>,
    #[arg(long)]
    notes: Option<String>,
  },

  /// Cancel a booking
  CancelBooking { id: String },

  /// List memberships
  #[command(alias = "m")]
  Memberships,

  /// Update a membership from a JSON object
  UpdateMembership { id: String, data: String },

  /// Download the membership export
  ExportMemberships {
    #[arg(short, long, default_value = "memberships.csv")]
    out: PathBuf,
  },

  /// List tours
  #[command(alias = "t")]
  Tours,

  /// Schedule a tour for a visitor
  ScheduleTour {
    #[arg(long)]
    name: String,
    #[arg(long)]
    email: String,
    /// RFC 3339 timestamp
    #[arg(long)]
    at: String,
  },

  /// Check a visitor in from a scanned QR payload
  CheckIn { payload: String },

  /// Show admin dashboard counters
  Stats,

  /// List users (admin)
  Users,

  /// Delete a user (admin)
  DeleteUser { id: String },

  /// Show how long responses for an endpoint are cached
  CachePolicy { endpoint: String },
}

impl Command {
  /// Screen path this command stands in for, used for login redirects.
  pub fn return_path(&self) -> &'static str {
    match self {
      Command::Me | Command::Profile | Command::ProfileUpdate { .. } | Command::UploadPhoto { .. } => {
        "/profile"
      }
      Command::Bookings | Command::Book { .. } | Command::CancelBooking { .. } => "/booking",
      Command::Memberships | Command::UpdateMembership { .. } | Command::ExportMemberships { .. } => {
        "/membership"
      }
      Command::Tours | Command::ScheduleTour { .. } | Command::CheckIn { .. } => "/tour",
      Command::Stats | Command::Users | Command::DeleteUser { .. } => "/admin",
      _ => "/",
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::Parser;

  #[derive(Parser, Debug)]
  struct Cli {
    #[command(subcommand)]
    command: Command,
  }

  #[test]
  fn test_parses_aliases() {
    let cli = Cli::try_parse_from(["clubgate", "whoami"]).unwrap();
    assert!(matches!(cli.command, Command::Me));

    let cli = Cli::try_parse_from(["clubgate", "otp", "ada@example.com", "123456"]).unwrap();
    assert!(matches!(cli.command, Command::VerifyOtp { .. }));
  }

  #[test]
  fn test_login_hand_off_flag() {
    let cli = Cli::try_parse_from([
      "clubgate",
      "login",
      "ada@example.com",
      "--password",
      "secret-pass",
      "--hand-off",
    ])
    .unwrap();
    assert!(matches!(cli.command, Command::Login { hand_off: true, .. }));

    let cli = Cli::try_parse_from(["clubgate", "status", "--check"]).unwrap();
    assert!(matches!(cli.command, Command::Session { check: true }));
  }

  #[test]
  fn test_export_default_path() {
    let cli = Cli::try_parse_from(["clubgate", "export-memberships"]).unwrap();
    match cli.command {
      Command::ExportMemberships { out } => assert_eq!(out, PathBuf::from("memberships.csv")),
      other => panic!("unexpected command: {:?}", other),
    }
  }

  #[test]
  fn test_profile_update_flags_conflict() {
    assert!(Cli::try_parse_from(["clubgate", "profile-update", "--data", "{}", "--resume"]).is_err());
  }

  #[test]
  fn test_return_paths() {
    assert_eq!(Command::Stats.return_path(), "/admin");
    assert_eq!(
      Command::CheckIn {
        payload: String::new()
      }
      .return_path(),
      "/tour"
    );
    assert_eq!(Command::Logout.return_path(), "/");
  }
}
