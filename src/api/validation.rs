//! Client-side field checks run before anything reaches the network.

use super::error::FieldErrors;
use super::types::{BookingRequest, LoginRequest, RegisterRequest, TourRequest};

pub const MIN_PASSWORD_LEN: usize = 8;
pub const OTP_LEN: usize = 6;

fn looks_like_email(email: &str) -> bool {
  let email = email.trim();
  match email.split_once('@') {
    Some((local, domain)) => {
      !local.is_empty()
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && domain.contains('.')
        && !email.contains(char::is_whitespace)
    }
    None => false,
  }
}

fn check_email(errors: &mut FieldErrors, email: &str) {
  if email.trim().is_empty() {
    errors.push("email", "Email is required");
  } else if !looks_like_email(email) {
    errors.push("email", "Please enter a valid email address");
  }
}

pub fn validate_email(email: &str) -> FieldErrors {
  let mut errors = FieldErrors::new();
  check_email(&mut errors, email);
  errors
}

fn check_password(errors: &mut FieldErrors, password: &str) {
  if password.chars().count() < MIN_PASSWORD_LEN {
    errors.push("password", "Password must be at least 8 characters");
  }
}

pub fn validate_password(password: &str) -> FieldErrors {
  let mut errors = FieldErrors::new();
  check_password(&mut errors, password);
  errors
}

pub fn validate_login(request: &LoginRequest) -> FieldErrors {
  let mut errors = FieldErrors::new();
  check_email(&mut errors, &request.email);
  if request.password.is_empty() {
    errors.push("password", "Password is required");
  }
  errors
}

pub fn validate_registration(request: &RegisterRequest) -> FieldErrors {
  let mut errors = FieldErrors::new();
  if request.first_name.trim().is_empty() {
    errors.push("firstName", "First name is required");
  }
  if request.last_name.trim().is_empty() {
    errors.push("lastName", "Last name is required");
  }
  check_email(&mut errors, &request.email);
  check_password(&mut errors, &request.password);
  if request.password != request.confirm_password {
    errors.push("confirmPassword", "Passwords do not match");
  }
  errors
}

pub fn validate_otp(email: &str, otp: &str) -> FieldErrors {
  let mut errors = FieldErrors::new();
  check_email(&mut errors, email);
  if otp.len() != OTP_LEN || !otp.bytes().all(|b| b.is_ascii_digit()) {
    errors.push("otp", "Enter the 6-digit code from your email");
  }
  errors
}

pub fn validate_booking(request: &BookingRequest) -> FieldErrors {
  let mut errors = FieldErrors::new();
  if request.date.trim().is_empty() {
    errors.push("date", "Please choose a date");
  }
  errors
}

pub fn validate_tour(request: &TourRequest) -> FieldErrors {
  let mut errors = FieldErrors::new();
  if request.name.trim().is_empty() {
    errors.push("name", "Name is required");
  }
  check_email(&mut errors, &request.email);
  if request.scheduled_at.trim().is_empty() {
    errors.push("scheduledAt", "Please choose a time");
  }
  errors
}
