//! Single entry point for every HTTP call made by the client.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::error::ApiError;
use super::transport::{
  FormField, HttpRequest, HttpResponse, Method, RequestBody, Transport, TransportError,
};
use super::types::AuthResponse;
use crate::cache::policy::{invalidations_for, ttl_for};
use crate::cache::RequestCache;
use crate::session::TokenStore;

pub const REFRESH_ENDPOINT: &str = "/auth/refresh";

#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
  pub standard: Duration,
  /// Exports and downloads stream large bodies.
  pub export: Duration,
}

impl Default for Timeouts {
  fn default() -> Self {
    Self {
      standard: Duration::from_secs(15),
      export: Duration::from_secs(30),
    }
  }
}

#[derive(Debug, Clone)]
pub struct RequestOptions {
  pub method: Method,
  pub body: RequestBody,
  /// Overrides the per-endpoint deadline.
  pub timeout: Option<Duration>,
}

impl RequestOptions {
  pub fn new(method: Method) -> Self {
    Self {
      method,
      body: RequestBody::Empty,
      timeout: None,
    }
  }

  pub fn get() -> Self {
    Self::new(Method::Get)
  }

  pub fn json(method: Method, body: Value) -> Self {
    Self {
      body: RequestBody::Json(body),
      ..Self::new(method)
    }
  }

  pub fn multipart(method: Method, fields: Vec<FormField>) -> Self {
    Self {
      body: RequestBody::Multipart(fields),
      ..Self::new(method)
    }
  }

  #[allow(dead_code)]
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }
}

pub struct ApiGateway {
  base_url: String,
  transport: Arc<dyn Transport>,
  cache: Arc<RequestCache>,
  tokens: Arc<TokenStore>,
  timeouts: Timeouts,
}

impl ApiGateway {
  pub fn new(
    base_url: &str,
    transport: Arc<dyn Transport>,
    cache: Arc<RequestCache>,
    tokens: Arc<TokenStore>,
    timeouts: Timeouts,
  ) -> Self {
    Self {
      base_url: base_url.trim_end_matches('/').to_string(),
      transport,
      cache,
      tokens,
      timeouts,
    }
  }

  pub fn cache(&self) -> &Arc<RequestCache> {
    &self.cache
  }

  pub fn tokens(&self) -> &Arc<TokenStore> {
    &self.tokens
  }

  pub fn url_for(&self, endpoint: &str) -> String {
    if endpoint.starts_with('/') {
      format!("{}{}", self.base_url, endpoint)
    } else {
      format!("{}/{}", self.base_url, endpoint)
    }
  }

  fn timeout_for(&self, endpoint: &str) -> Duration {
    if endpoint.contains("/export") || endpoint.contains("/download") {
      self.timeouts.export
    } else {
      self.timeouts.standard
    }
  }

  /// Perform a request and return the decoded JSON body.
  ///
  /// GETs are served from the request cache when possible and stored
  /// according to the cache policy. Successful writes evict the cached
  /// reads they affect.
  pub async fn request(&self, endpoint: &str, options: RequestOptions) -> Result<Value, ApiError> {
    let url = self.url_for(endpoint);
    let method = options.method;

    if method == Method::Get {
      if let Some(hit) = self.cache.get(&url, method) {
        return Ok(hit);
      }
    }

    if endpoint != REFRESH_ENDPOINT && self.tokens.should_refresh_token() {
      self.refresh_token().await;
    }

    let timeout = options.timeout.unwrap_or_else(|| self.timeout_for(endpoint));
    let value = self.dispatch(url.clone(), method, options.body, timeout).await?;

    if method == Method::Get {
      let ttl = ttl_for(endpoint);
      if !ttl.is_zero() {
        self.cache.set(&url, method, value.clone(), ttl);
      }
    } else {
      for pattern in invalidations_for(endpoint) {
        self.cache.invalidate_pattern(&pattern);
      }
    }

    Ok(value)
  }

  pub async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, ApiError> {
    decode(self.request(endpoint, RequestOptions::get()).await?)
  }

  pub async fn send<T, B>(&self, method: Method, endpoint: &str, body: &B) -> Result<T, ApiError>
  where
    T: DeserializeOwned,
    B: Serialize + ?Sized,
  {
    let body = serde_json::to_value(body)
      .map_err(|e| ApiError::Local(format!("Failed to encode request: {}", e)))?;
    decode(self.request(endpoint, RequestOptions::json(method, body)).await?)
  }

  /// Fetch a non-JSON body such as a CSV export. Never cached.
  pub async fn download(&self, endpoint: &str) -> Result<Vec<u8>, ApiError> {
    if self.tokens.should_refresh_token() {
      self.refresh_token().await;
    }
    let url = self.url_for(endpoint);
    let timeout = self.timeout_for(endpoint);
    self
      .dispatch_raw(url, Method::Get, RequestBody::Empty, timeout)
      .await
  }

  /// Exchange the current token for a fresh one. Failure is logged and
  /// otherwise ignored; the caller proceeds with the existing token.
  pub async fn refresh_token(&self) -> bool {
    let url = self.url_for(REFRESH_ENDPOINT);
    let result = self
      .dispatch(url, Method::Post, RequestBody::Empty, self.timeouts.standard)
      .await
      .and_then(decode::<AuthResponse>);

    match result {
      Ok(auth) => {
        debug!("Token refreshed");
        self.tokens.set_token(&auth.token);
        true
      }
      Err(e) => {
        warn!(error = %e, "Token refresh failed, continuing with current token");
        false
      }
    }
  }

  fn headers(&self, body: &RequestBody) -> Vec<(String, String)> {
    let mut headers = vec![("Accept".to_string(), "application/json".to_string())];
    // Multipart bodies carry their own boundary in the content type
    if !body.is_multipart() {
      headers.push(("Content-Type".to_string(), "application/json".to_string()));
    }
    if let Some(token) = self.tokens.get_token() {
      headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
    }
    headers
  }

  async fn dispatch(
    &self,
    url: String,
    method: Method,
    body: RequestBody,
    timeout: Duration,
  ) -> Result<Value, ApiError> {
    let body = self.dispatch_raw(url, method, body, timeout).await?;
    parse_body(&body)
  }

  async fn dispatch_raw(
    &self,
    url: String,
    method: Method,
    body: RequestBody,
    timeout: Duration,
  ) -> Result<Vec<u8>, ApiError> {
    let request = HttpRequest {
      method,
      headers: self.headers(&body),
      url,
      body,
    };
    debug!(
      method = %request.method,
      url = %request.url,
      bearer = request.header("Authorization").is_some(),
      "Dispatching request"
    );

    let response = match tokio::time::timeout(timeout, self.transport.send(request)).await {
      Err(_) => return Err(ApiError::Timeout { after: timeout }),
      Ok(Err(TransportError::Request(message))) => return Err(ApiError::Local(message)),
      Ok(Err(TransportError::Network(message))) => return Err(ApiError::Network(message)),
      Ok(Ok(response)) => response,
    };

    if !response.is_success() {
      return Err(error_from_response(&response));
    }

    Ok(response.body)
  }
}

pub(crate) fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ApiError> {
  serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
}

fn parse_body(body: &[u8]) -> Result<Value, ApiError> {
  if body.iter().all(u8::is_ascii_whitespace) {
    return Ok(Value::Null);
  }
  serde_json::from_slice(body).map_err(|e| ApiError::Decode(e.to_string()))
}

fn error_from_response(response: &HttpResponse) -> ApiError {
  let status = response.status;
  let body: Option<Value> = serde_json::from_slice(&response.body).ok();

  let message = body
    .as_ref()
    .and_then(|b| {
      validation_message(b)
        .or_else(|| string_field(b, &["message", "error"]))
        .filter(|m| !m.is_empty())
    })
    .unwrap_or_else(|| format!("HTTP error, status {}", status));

  ApiError::http(status, message)
}

/// Join a `{"errors": [...]}` list of field failures into one message.
fn validation_message(body: &Value) -> Option<String> {
  let parts: Vec<String> = body
    .get("errors")?
    .as_array()?
    .iter()
    .filter_map(|entry| {
      if let Some(text) = entry.as_str() {
        return Some(text.to_string());
      }
      let message = string_field(entry, &["msg", "message"])?;
      match string_field(entry, &["param", "path", "field"]) {
        Some(field) => Some(format!("{}: {}", field, message)),
        None => Some(message),
      }
    })
    .collect();

  if parts.is_empty() {
    None
  } else {
    Some(parts.join("; "))
  }
}

fn string_field(value: &Value, names: &[&str]) -> Option<String> {
  names
    .iter()
    .find_map(|name| value.get(*name).and_then(Value::as_str))
    .map(String::from)
}


#[cfg(test)]
mod tests {
  use super::testing::{gateway, BASE};
  use super::*;
  use crate::api::error::ErrorKind;
  use crate::session::token_store::testing::token_expiring_at;
  use serde_json::json;
  use tokio::time::Instant;

  #[tokio::test(start_paused = true)]
  async fn test_medium_bucket_get_is_cached_for_five_minutes() {
    let (gateway, transport) = gateway();
    transport
      .respond(200, r#"{"count":5}"#)
      .respond(200, r#"{"count":6}"#);

    let first = gateway.request("/admin/stats", RequestOptions::get()).await.unwrap();
    assert_eq!(first, json!({"count": 5}));

    tokio::time::advance(Duration::from_secs(4 * 60)).await;
    let second = gateway.request("/admin/stats", RequestOptions::get()).await.unwrap();
    assert_eq!(second, json!({"count": 5}));
    assert_eq!(transport.calls(), 1);

    tokio::time::advance(Duration::from_secs(60) + Duration::from_millis(1)).await;
    let third = gateway.request("/admin/stats", RequestOptions::get()).await.unwrap();
    assert_eq!(third, json!({"count": 6}));
    assert_eq!(transport.calls(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_no_cache_endpoint_always_dispatches() {
    let (gateway, transport) = gateway();
    transport.respond(200, r#"{"id":"u1"}"#).respond(200, r#"{"id":"u1"}"#);

    gateway.request("/auth/me", RequestOptions::get()).await.unwrap();
    gateway.request("/auth/me", RequestOptions::get()).await.unwrap();
    assert_eq!(transport.calls(), 2);
    assert_eq!(gateway.cache().len(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_write_invalidates_related_reads() {
    let (gateway, transport) = gateway();
    transport
      .respond(200, r#"[{"_id":"m1"}]"#)
      .respond(200, r#"{"_id":"m1","status":"active"}"#)
      .respond(200, r#"[{"_id":"m1","status":"active"}]"#);

    gateway.request("/membership", RequestOptions::get()).await.unwrap();
    gateway
      .request(
        "/membership/m1",
        RequestOptions::json(Method::Put, json!({"status": "active"})),
      )
      .await
      .unwrap();
    let list = gateway.request("/membership", RequestOptions::get()).await.unwrap();

    assert_eq!(list[0]["status"], "active");
    assert_eq!(transport.calls(), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_writes_are_not_cached() {
    let (gateway, transport) = gateway();
    transport.respond(201, r#"{"_id":"b1"}"#).respond(201, r#"{"_id":"b2"}"#);

    let body = json!({"date": "2026-11-01"});
    gateway
      .request("/booking", RequestOptions::json(Method::Post, body.clone()))
      .await
      .unwrap();
    gateway
      .request("/booking", RequestOptions::json(Method::Post, body))
      .await
      .unwrap();
    assert_eq!(transport.calls(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_overlapping_gets_both_dispatch() {
    let (gateway, transport) = gateway();
    transport.respond(200, "[]").respond(200, "[]");

    let (a, b) = futures::join!(
      gateway.request("/tour", RequestOptions::get()),
      gateway.request("/tour", RequestOptions::get())
    );
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(transport.calls(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_standard_timeout() {
    let (gateway, transport) = gateway();
    transport.hang();

    let started = Instant::now();
    let err = gateway.request("/tour", RequestOptions::get()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(started.elapsed(), Duration::from_secs(15));
  }

  #[tokio::test(start_paused = true)]
  async fn test_export_timeout_is_longer() {
    let (gateway, transport) = gateway();
    transport.hang();

    let started = Instant::now();
    let err = gateway.download("/membership/export").await.unwrap_err();
    assert!(matches!(err, ApiError::Timeout { .. }));
    assert_eq!(started.elapsed(), Duration::from_secs(30));
  }

  #[tokio::test]
  async fn test_network_failure() {
    let (gateway, transport) = gateway();
    transport.fail("connection refused");

    let err = gateway.request("/tour", RequestOptions::get()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
    assert!(err.to_string().contains("connection refused"));
  }

  #[tokio::test]
  async fn test_local_request_failure_is_not_network() {
    let (gateway, transport) = gateway();
    transport.reject("Invalid content type not a mime");

    let err = gateway
      .request("/member/photo", RequestOptions::multipart(Method::Post, Vec::new()))
      .await
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Local);
    assert!(!err.is_auth());
  }

  #[tokio::test]
  async fn test_validation_errors_are_concatenated() {
    let (gateway, transport) = gateway();
    transport.respond(
      400,
      r#"{"errors":[{"msg":"Invalid email","param":"email"},{"msg":"Too short","path":"password"}]}"#,
    );

    let err = gateway
      .request("/auth/register", RequestOptions::json(Method::Post, json!({})))
      .await
      .unwrap_err();
    assert_eq!(err.status(), Some(400));
    assert_eq!(err.to_string(), "email: Invalid email; password: Too short");
  }

  #[tokio::test]
  async fn test_server_message_and_generic_fallback() {
    let (gateway, transport) = gateway();
    transport
      .respond(404, r#"{"message":"Tour not found"}"#)
      .respond(502, "<html>bad gateway</html>");

    let err = gateway.request("/tour/x", RequestOptions::get()).await.unwrap_err();
    assert_eq!(err.to_string(), "Tour not found");
    assert_eq!(err.kind(), ErrorKind::Http);

    let err = gateway.request("/tour/y", RequestOptions::get()).await.unwrap_err();
    assert_eq!(err.to_string(), "HTTP error, status 502");
  }

  #[tokio::test]
  async fn test_jwt_expired_is_auth_error() {
    let (gateway, transport) = gateway();
    transport.respond(401, r#"{"message":"jwt expired"}"#);

    let err = gateway.request("/member/details", RequestOptions::get()).await.unwrap_err();
    assert!(err.is_auth());
    assert_eq!(err.status(), Some(401));
  }

  #[tokio::test]
  async fn test_headers_and_url() {
    let (gateway, transport) = gateway();
    gateway.tokens().set_token("abc");
    transport.respond(200, "{}").respond(200, "{}");

    gateway.request("tour", RequestOptions::get()).await.unwrap();
    gateway
      .request(
        "/member/photo",
        RequestOptions::multipart(
          Method::Post,
          vec![FormField::Text {
            name: "caption".into(),
            value: "me".into(),
          }],
        ),
      )
      .await
      .unwrap();

    let requests = transport.requests();
    assert_eq!(requests[0].url, format!("{}/tour", BASE));
    assert_eq!(requests[0].header("authorization"), Some("Bearer abc"));
    assert_eq!(requests[0].header("content-type"), Some("application/json"));
    assert_eq!(requests[1].header("content-type"), None);
    assert_eq!(requests[1].header("authorization"), Some("Bearer abc"));
  }

  #[tokio::test]
  async fn test_empty_success_body_is_null() {
    let (gateway, transport) = gateway();
    transport.respond(204, "");
    let value = gateway
      .request("/booking/b1", RequestOptions::new(Method::Delete))
      .await
      .unwrap();
    assert_eq!(value, Value::Null);
  }

  #[tokio::test]
  async fn test_preemptive_refresh_swaps_token() {
    let (gateway, transport) = gateway();
    let soon = chrono::Utc::now().timestamp() + 30;
    gateway.tokens().set_token(&token_expiring_at(soon));
    transport
      .respond(200, r#"{"token":"fresh"}"#)
      .respond(200, "[]");

    gateway.request("/tour", RequestOptions::get()).await.unwrap();

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].url, format!("{}/auth/refresh", BASE));
    assert_eq!(requests[0].method, Method::Post);
    assert_eq!(requests[1].header("authorization"), Some("Bearer fresh"));
  }

  #[tokio::test]
  async fn test_refresh_failure_does_not_block_request() {
    let (gateway, transport) = gateway();
    let soon = chrono::Utc::now().timestamp() + 30;
    let old = token_expiring_at(soon);
    gateway.tokens().set_token(&old);
    transport.respond(500, "{}").respond(200, "[]");

    let value = gateway.request("/tour", RequestOptions::get()).await.unwrap();
    assert_eq!(value, json!([]));

    let requests = transport.requests();
    let expected = format!("Bearer {}", old);
    assert_eq!(requests[1].header("authorization"), Some(expected.as_str()));
  }

  #[tokio::test]
  async fn test_refresh_endpoint_does_not_refresh_itself() {
    let (gateway, transport) = gateway();
    let soon = chrono::Utc::now().timestamp() + 30;
    gateway.tokens().set_token(&token_expiring_at(soon));
    transport.respond(200, r#"{"token":"fresh"}"#);

    gateway
      .request(REFRESH_ENDPOINT, RequestOptions::new(Method::Post))
      .await
      .unwrap();
    assert_eq!(transport.calls(), 1);
  }
}
