//! Pluggable HTTP transport used by the gateway.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::fmt;
use tracing::warn;

use crate::config::TransportKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
  Get,
  Post,
  Put,
  Patch,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl From<Method> for reqwest::Method {
  fn from(method: Method) -> Self {
    match method {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Patch => reqwest::Method::PATCH,
      Method::Delete => reqwest::Method::DELETE,
    }
  }
}

/// One part of a multipart upload.
#[derive(Debug, Clone)]
pub enum FormField {
  Text {
    name: String,
    value: String,
  },
  File {
    name: String,
    file_name: String,
    content_type: String,
    bytes: Vec<u8>,
  },
}

#[derive(Debug, Clone, Default)]
pub enum RequestBody {
  #[default]
  Empty,
  Json(Value),
  Multipart(Vec<FormField>),
}

impl RequestBody {
  pub fn is_multipart(&self) -> bool {
    matches!(self, RequestBody::Multipart(_))
  }
}

/// A fully resolved request, ready for the wire.
#[derive(Debug, Clone)]
pub struct HttpRequest {
  pub method: Method,
  pub url: String,
  pub headers: Vec<(String, String)>,
  pub body: RequestBody,
}

impl HttpRequest {
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
  pub status: u16,
  pub body: Vec<u8>,
}

impl HttpResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
  /// The request could not be built on this side; nothing was sent.
  #[error("{0}")]
  Request(String),
  /// The server could not be reached or the exchange broke mid-way.
  #[error("{0}")]
  Network(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Transport backed by a `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestTransport {
  client: reqwest::Client,
}

impl ReqwestTransport {
  pub fn standard() -> Result<Self, TransportError> {
    let client = reqwest::Client::builder()
      .gzip(false)
      .deflate(false)
      .build()
      .map_err(|e| TransportError::Request(format!("Failed to build HTTP client: {}", e)))?;
    Ok(Self { client })
  }

  /// Client negotiating gzip/deflate response compression.
  pub fn compressed() -> Result<Self, TransportError> {
    let client = reqwest::Client::builder()
      .gzip(true)
      .deflate(true)
      .build()
      .map_err(|e| TransportError::Request(format!("Failed to build compressed HTTP client: {}", e)))?;
    Ok(Self { client })
  }

  /// Build the transport selected in configuration, falling back to the
  /// standard client when the alternate one cannot be built.
  pub fn from_kind(kind: TransportKind) -> Result<Self, TransportError> {
    match kind {
      TransportKind::Standard => Self::standard(),
      TransportKind::Compressed => Self::compressed().or_else(|e| {
        warn!(error = %e, "Compressed transport unavailable, using standard transport");
        Self::standard()
      }),
    }
  }
}

#[async_trait]
impl Transport for ReqwestTransport {
  async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
    let mut builder = self
      .client
      .request(request.method.into(), request.url.as_str());

    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    builder = match request.body {
      RequestBody::Empty => builder,
      RequestBody::Json(value) => builder.body(
        serde_json::to_vec(&value)
          .map_err(|e| TransportError::Request(format!("Failed to encode request body: {}", e)))?,
      ),
      RequestBody::Multipart(fields) => builder.multipart(build_form(fields)?),
    };

    let response = builder
      .send()
      .await
      .map_err(|e| TransportError::Network(e.to_string()))?;

    let status = response.status().as_u16();
    let body = response
      .bytes()
      .await
      .map_err(|e| TransportError::Network(format!("Failed to read response body: {}", e)))?
      .to_vec();

    Ok(HttpResponse { status, body })
  }
}

fn build_form(fields: Vec<FormField>) -> Result<Form, TransportError> {
  let mut form = Form::new();
  for field in fields {
    form = match field {
      FormField::Text { name, value } => form.text(name, value),
      FormField::File {
        name,
        file_name,
        content_type,
        bytes,
      } => {
        let part = Part::bytes(bytes)
          .file_name(file_name)
          .mime_str(&content_type)
          .map_err(|e| TransportError::Request(format!("Invalid content type {}: {}", content_type, e)))?;
        form.part(name, part)
      }
    };
  }
  Ok(form)
}

#[cfg(test)]
pub(crate) mod testing {
  //! Scripted transport double that records every request it sees.

  use super::*;
  use std::collections::VecDeque;
  use std::sync::Mutex;
  use std::time::Duration;

  pub enum Scripted {
    Respond(u16, String),
    Fail(String),
    Reject(String),
    Hang,
  }

  #[derive(Default)]
  pub struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    seen: Mutex<Vec<HttpRequest>>,
  }

  impl ScriptedTransport {
    pub fn new() -> Self {
      Self::default()
    }

    pub fn respond(&self, status: u16, body: &str) -> &Self {
      self
        .script
        .lock()
        .unwrap()
        .push_back(Scripted::Respond(status, body.to_string()));
      self
    }

    pub fn fail(&self, message: &str) -> &Self {
      self
        .script
        .lock()
        .unwrap()
        .push_back(Scripted::Fail(message.to_string()));
      self
    }

    /// Fail as if the request could not be built locally.
    pub fn reject(&self, message: &str) -> &Self {
      self
        .script
        .lock()
        .unwrap()
        .push_back(Scripted::Reject(message.to_string()));
      self
    }

    pub fn hang(&self) -> &Self {
      self.script.lock().unwrap().push_back(Scripted::Hang);
      self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
      self.seen.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
      self.seen.lock().unwrap().len()
    }
  }

  #[async_trait]
  impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
      self.seen.lock().unwrap().push(request);
      let next = self.script.lock().unwrap().pop_front();
      match next {
        Some(Scripted::Respond(status, body)) => Ok(HttpResponse {
          status,
          body: body.into_bytes(),
        }),
        Some(Scripted::Fail(message)) => Err(TransportError::Network(message)),
        Some(Scripted::Reject(message)) => Err(TransportError::Request(message)),
        Some(Scripted::Hang) => {
          tokio::time::sleep(Duration::from_secs(3600)).await;
          Err(TransportError::Network("hung request resumed".into()))
        }
        None => Err(TransportError::Network("no scripted response".into())),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_header_lookup_is_case_insensitive() {
    let request = HttpRequest {
      method: Method::Get,
      url: "http://localhost/api/tour".into(),
      headers: vec![("Authorization".into(), "Bearer abc".into())],
      body: RequestBody::Empty,
    };
    assert_eq!(request.header("authorization"), Some("Bearer abc"));
    assert_eq!(request.header("content-type"), None);
  }

  #[test]
  fn test_build_form_rejects_bad_mime() {
    let fields = vec![FormField::File {
      name: "photo".into(),
      file_name: "me.png".into(),
      content_type: "not a mime".into(),
      bytes: vec![1, 2, 3],
    }];
    assert!(matches!(build_form(fields), Err(TransportError::Request(_))));
  }

  #[test]
  fn test_success_range() {
    let ok = HttpResponse {
      status: 204,
      body: Vec::new(),
    };
    let err = HttpResponse {
      status: 302,
      body: Vec::new(),
    };
    assert!(ok.is_success());
    assert!(!err.is_success());
  }
}
