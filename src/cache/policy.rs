//! Static endpoint classification for response caching and write invalidation.
//!
//! Tune by editing the tables; matching is by substring and the first
//! bucket that matches wins.

use std::time::Duration;

/// Endpoints whose responses must never be cached.
const NO_CACHE: &[&str] = &[
  "/auth/",
  "/otp",
  "/export",
  "/download",
  "/checkin",
  "/logout",
  "/refresh",
];

/// Volatile lists: one minute.
const SHORT: &[&str] = &["/booking", "/admin/users", "/tour/today", "/notifications"];

/// Dashboards and member records: five minutes.
const MEDIUM: &[&str] = &["/admin/stats", "/admin", "/membership", "/member", "/tour"];

/// Reference data: thirty minutes.
const LONG: &[&str] = &["/plans", "/facilities", "/settings"];

pub const SHORT_TTL: Duration = Duration::from_secs(60);
pub const MEDIUM_TTL: Duration = Duration::from_secs(5 * 60);
pub const LONG_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBucket {
  NoCache,
  Short,
  Medium,
  Long,
}

impl CacheBucket {
  pub fn ttl(&self) -> Duration {
    match self {
      CacheBucket::NoCache => Duration::ZERO,
      CacheBucket::Short => SHORT_TTL,
      CacheBucket::Medium => MEDIUM_TTL,
      CacheBucket::Long => LONG_TTL,
    }
  }
}

pub fn bucket_for(endpoint: &str) -> CacheBucket {
  let buckets = [
    (NO_CACHE, CacheBucket::NoCache),
    (SHORT, CacheBucket::Short),
    (MEDIUM, CacheBucket::Medium),
    (LONG, CacheBucket::Long),
  ];

  buckets
    .iter()
    .find(|(patterns, _)| patterns.iter().any(|p| endpoint.contains(p)))
    .map(|(_, bucket)| *bucket)
    .unwrap_or(CacheBucket::NoCache)
}

/// TTL for a GET on `endpoint`; zero means do not cache.
pub fn ttl_for(endpoint: &str) -> Duration {
  bucket_for(endpoint).ttl()
}

/// Writes that change what other cached reads return.
const WRITE_INVALIDATIONS: &[(&str, &[&str])] = &[
  ("/membership", &["/membership", "/member", "/admin"]),
  ("/member", &["/member", "/admin"]),
  ("/booking", &["/booking", "/tour", "/admin"]),
  ("/tour", &["/tour", "/booking", "/admin"]),
  ("/admin/users", &["/admin", "/member", "/membership"]),
];

/// Cache key patterns to evict after a successful write to `endpoint`.
///
/// Falls back to the endpoint's first path segment when no table row
/// matches.
pub fn invalidations_for(endpoint: &str) -> Vec<String> {
  let path = endpoint.split('?').next().unwrap_or(endpoint);

  if let Some((_, patterns)) = WRITE_INVALIDATIONS
    .iter()
    .find(|(prefix, _)| path.starts_with(prefix))
  {
    return patterns.iter().map(|p| p.to_string()).collect();
  }

  path
    .trim_start_matches('/')
    .split('/')
    .next()
    .filter(|segment| !segment.is_empty())
    .map(|segment| vec![format!("/{}", segment)])
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_no_cache_endpoints_have_zero_ttl() {
    for endpoint in [
      "/auth/me",
      "/auth/login",
      "/membership/export",
      "/tour/checkin",
      "/auth/otp/verify",
      "/member/download/card",
    ] {
      assert_eq!(ttl_for(endpoint), Duration::ZERO, "{}", endpoint);
    }
  }

  #[test]
  fn test_buckets() {
    assert_eq!(bucket_for("/booking/my"), CacheBucket::Short);
    assert_eq!(bucket_for("/admin/stats"), CacheBucket::Medium);
    assert_eq!(ttl_for("/admin/stats"), Duration::from_secs(300));
    assert_eq!(bucket_for("/membership"), CacheBucket::Medium);
    assert_eq!(bucket_for("/plans"), CacheBucket::Long);
  }

  #[test]
  fn test_first_bucket_wins() {
    // "/admin/users" is short even though "/admin" is medium
    assert_eq!(bucket_for("/admin/users"), CacheBucket::Short);
    // no-cache beats medium
    assert_eq!(bucket_for("/membership/export"), CacheBucket::NoCache);
  }

  #[test]
  fn test_unknown_endpoint_defaults_to_no_cache() {
    assert_eq!(bucket_for("/something/else"), CacheBucket::NoCache);
  }

  #[test]
  fn test_membership_write_invalidates_lists_and_dashboards() {
    let patterns = invalidations_for("/membership/42");
    assert!(patterns.contains(&"/membership".to_string()));
    assert!(patterns.contains(&"/admin".to_string()));
  }

  #[test]
  fn test_unlisted_write_falls_back_to_first_segment() {
    assert_eq!(invalidations_for("/plans/gold?x=1"), vec!["/plans"]);
    assert!(invalidations_for("/").is_empty());
  }
}
