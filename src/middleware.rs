//! Response cache middleware.
//!
//! Opt-in per route through `axum::middleware::from_fn_with_state`. A hit is
//! served straight from the cache and the wrapped handler never runs; a miss
//! runs the handler and stores a successful response from a detached task so
//! request latency never waits on the cache write.

use std::fmt;
use std::sync::Arc;

use axum::{
    body::{Body, HttpBody},
    extract::State,
    http::{header, HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::cache::MAX_VALUE_SIZE;
use crate::service::CacheService;

/// Header added to responses served from the cache.
pub const CACHE_STATUS_HEADER: &str = "x-cache";

/// Derives a cache key from a request.
pub type KeyFn = Arc<dyn Fn(&Request<Body>) -> String + Send + Sync>;

// == TTL Presets ==
pub const SHORT_TTL: u64 = 60;
pub const STANDARD_TTL: u64 = 300;
pub const LONG_TTL: u64 = 3600;
pub const VERY_LONG_TTL: u64 = 86_400;

/// A captured handler response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

// == Response Cache ==
/// Middleware state: the shared service, a TTL and an optional key function.
#[derive(Clone)]
pub struct ResponseCache {
    service: Arc<CacheService>,
    ttl: u64,
    key_fn: Option<KeyFn>,
}

impl fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCache")
            .field("ttl", &self.ttl)
            .field("custom_key", &self.key_fn.is_some())
            .finish()
    }
}

impl ResponseCache {
    pub fn new(service: Arc<CacheService>, ttl: u64) -> Self {
        Self {
            service,
            ttl,
            key_fn: None,
        }
    }

    /// One minute; fast-moving feeds.
    pub fn short(service: Arc<CacheService>) -> Self {
        Self::new(service, SHORT_TTL)
    }

    /// Five minutes; most read endpoints.
    pub fn standard(service: Arc<CacheService>) -> Self {
        Self::new(service, STANDARD_TTL)
    }

    /// One hour.
    pub fn long(service: Arc<CacheService>) -> Self {
        Self::new(service, LONG_TTL)
    }

    /// One day; reference data that rarely changes.
    pub fn very_long(service: Arc<CacheService>) -> Self {
        Self::new(service, VERY_LONG_TTL)
    }

    /// Replaces the default path-and-query key.
    pub fn with_key_fn<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&Request<Body>) -> String + Send + Sync + 'static,
    {
        self.key_fn = Some(Arc::new(key_fn));
        self
    }

    pub fn ttl(&self) -> u64 {
        self.ttl
    }

    fn key_for(&self, request: &Request<Body>) -> String {
        match &self.key_fn {
            Some(key_fn) => key_fn(request),
            None => request_key(request),
        }
    }
}

/// Default key: `route:{path}` plus the query with its pairs sorted by
/// name, so `?b=2&a=1` and `?a=1&b=2` share an entry while `?id=1&id=2` and
/// `?id=2&id=1` do not.
pub fn request_key(request: &Request<Body>) -> String {
    let uri = request.uri();
    let mut key = format!("route:{}", uri.path());

    if let Some(query) = uri.query().filter(|q| !q.is_empty()) {
        let mut pairs: Vec<&str> = query.split('&').filter(|p| !p.is_empty()).collect();
        // Stable and by name only: repeated parameters keep their order.
        pairs.sort_by(|a, b| param_name(a).cmp(param_name(b)));
        if !pairs.is_empty() {
            key.push('?');
            key.push_str(&pairs.join("&"));
        }
    }

    key
}

fn param_name(pair: &str) -> &str {
    pair.split_once('=').map_or(pair, |(name, _)| name)
}

/// Caches `GET` responses of the wrapped routes.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn response_cache(
    State(cache): State<ResponseCache>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() != Method::GET {
        return next.run(request).await;
    }

    let key = cache.key_for(&request);

    if let Some(cached) = cache.service.get::<CachedResponse>(&key).await {
        debug!(key = %key, outcome = "hit", "serving cached response");
        return build_response(cached);
    }

    debug!(key = %key, outcome = "miss", "cache miss, executing handler");
    let response = next.run(request).await;

    if response.status() != StatusCode::OK {
        return response;
    }

    let (parts, body) = response.into_parts();
    if !fits_capture_limit(&body) {
        debug!(key = %key, "response body unbounded or too large, not caching");
        return Response::from_parts(parts, body);
    }

    // The size hint bounds the body, so only a failing body stream errors here.
    let bytes = match axum::body::to_bytes(body, MAX_VALUE_SIZE).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(key = %key, error = %e, "failed to read response body");
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    if let Ok(text) = std::str::from_utf8(&bytes) {
        let cached = CachedResponse {
            status: parts.status.as_u16(),
            content_type: parts
                .headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned),
            body: text.to_owned(),
        };

        let service = cache.service.clone();
        let ttl = cache.ttl;
        tokio::spawn(async move {
            service.set(&key, &cached, ttl).await;
        });
    }

    Response::from_parts(parts, Body::from(bytes))
}

/// Whether the body is known to fit in a cache entry without reading it.
fn fits_capture_limit(body: &Body) -> bool {
    body.size_hint()
        .upper()
        .is_some_and(|len| len <= MAX_VALUE_SIZE as u64)
}

/// Rebuilds a response from cached data.
fn build_response(cached: CachedResponse) -> Response {
    let mut builder = Response::builder()
        .status(cached.status)
        .header(CACHE_STATUS_HEADER, HeaderValue::from_static("HIT"));

    if let Some(content_type) = cached
        .content_type
        .as_deref()
        .and_then(|v| HeaderValue::from_str(v).ok())
    {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }

    builder
        .body(Body::from(cached.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
