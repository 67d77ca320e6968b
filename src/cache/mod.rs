//! Response caching for the API gateway.
//!
//! This module provides:
//! - An in-memory TTL store keyed by `(method, url)` with a background sweep
//! - A static policy table mapping endpoints to TTL buckets
//! - A write-invalidation table so mutations evict the reads they affect

pub mod policy;
mod request_cache;

pub use request_cache::RequestCache;
