//! Visitor pass payloads scanned from tour check-in QR codes.

use serde::Deserialize;
use serde_json::{json, Value};

pub const VISITOR_PASS_TYPE: &str = "visitor_pass";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QrError {
  #[error("QR code does not contain a valid pass")]
  NotJson,
  #[error("QR code is not a visitor pass")]
  WrongType,
  #[error("Visitor pass has no tour identifier")]
  MissingId,
}

/// A decoded visitor pass identifying a scheduled tour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitorPass {
  pub tour_id: String,
  pub name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPass {
  #[serde(rename = "type")]
  kind: Option<String>,
  #[serde(alias = "tourId")]
  id: Option<String>,
  name: Option<String>,
}

impl VisitorPass {
  /// Decode a scanned payload, rejecting anything that is not a visitor pass.
  pub fn from_qr_payload(payload: &str) -> Result<Self, QrError> {
    let value: Value = serde_json::from_str(payload.trim()).map_err(|_| QrError::NotJson)?;
    if !value.is_object() {
      return Err(QrError::NotJson);
    }

    let raw: RawPass = serde_json::from_value(value).map_err(|_| QrError::NotJson)?;
    if raw.kind.as_deref() != Some(VISITOR_PASS_TYPE) {
      return Err(QrError::WrongType);
    }

    let tour_id = raw
      .id
      .map(|id| id.trim().to_string())
      .filter(|id| !id.is_empty())
      .ok_or(QrError::MissingId)?;

    Ok(Self {
      tour_id,
      name: raw.name,
    })
  }

  /// Body for the check-in endpoint.
  pub fn check_in_body(&self) -> Value {
    json!({ "tourId": self.tour_id })
  }
}
