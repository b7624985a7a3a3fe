use async_trait::async_trait;
use axum::{
    body::{Body, Bytes},
    http::{self, HeaderMap, StatusCode, header, request},
    response::{IntoResponse, Response},
};
use http_cache_semantics::CachePolicy;
use moka::{Expiry, future::Cache as MokaCache};
use std::{
    hash::{DefaultHasher, Hash, Hasher},
    sync::Arc,
    time::{Duration, Instant, SystemTime},
};

pub type CacheKey = u64;

/// Derive the key a request is cached under from its method, host and full URI.
pub fn cache_key(request: &request::Parts) -> CacheKey {
    let mut hasher = DefaultHasher::new();
    request.method.hash(&mut hasher);
    request
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .hash(&mut hasher);
    request.uri.to_string().hash(&mut hasher);
    hasher.finish()
}

/// A complete response kept for replaying to later matching requests.
#[derive(Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub cache_policy: Arc<CachePolicy>,
}

impl CachedResponse {
    /// Wrap a response and evaluate its shared-cache policy against the request it answers.
    pub fn new(request: &request::Parts, status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        let (response_parts, ()) = {
            let mut response = http::Response::new(());
            *response.status_mut() = status;
            *response.headers_mut() = headers.clone();
            response.into_parts()
        };
        Self {
            cache_policy: Arc::new(CachePolicy::new(request, &response_parts)),
            status,
            headers,
            body,
        }
    }

    fn cache_size_shallow(&self) -> usize {
        std::mem::size_of::<Self>() + self.body.len() + self.headers.capacity()
    }
}

impl IntoResponse for CachedResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Storage for responses that can be served again without contacting upstream.
#[async_trait]
pub trait ResponseStore: Send + Sync {
    async fn get(&self, key: CacheKey) -> Option<CachedResponse>;

    /// Store a response. Failing to store is not reported to the caller.
    async fn put(&self, key: CacheKey, response: CachedResponse);
}

struct CacheExpiry;

impl Expiry<CacheKey, CachedResponse> for CacheExpiry {
    fn expire_after_create(
        &self,
        _key: &CacheKey,
        value: &CachedResponse,
        _current_time: Instant,
    ) -> Option<Duration> {
        Some(value.cache_policy.time_to_live(SystemTime::now()))
    }

    fn expire_after_update(
        &self,
        _key: &CacheKey,
        value: &CachedResponse,
        _current_time: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.cache_policy.time_to_live(SystemTime::now()))
    }
}

/// In-memory [`ResponseStore`] bounded by the total size of the responses it holds.
pub struct MemoryCache {
    inner: MokaCache<CacheKey, CachedResponse>,
}

impl MemoryCache {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: MokaCache::builder()
                .weigher(|_key, value: &CachedResponse| -> u32 {
                    value.cache_size_shallow().try_into().unwrap_or(u32::MAX)
                })
                .expire_after(CacheExpiry)
                .max_capacity(max_capacity)
                .build(),
        }
    }
}

#[async_trait]
impl ResponseStore for MemoryCache {
    async fn get(&self, key: CacheKey) -> Option<CachedResponse> {
        self.inner.get(&key).await
    }

    async fn put(&self, key: CacheKey, response: CachedResponse) {
        self.inner.insert(key, response).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, Method, Request};

    fn request_parts(method: Method, uri: &str) -> request::Parts {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::HOST, "versions.example.com")
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    fn json_response(request: &request::Parts, body: &'static str) -> CachedResponse {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("s-maxage=3600"));
        CachedResponse::new(request, StatusCode::OK, headers, Bytes::from_static(body.as_bytes()))
    }

    #[test]
    fn cache_key_depends_on_method_host_and_uri() {
        let get = request_parts(Method::GET, "/versions/foo");
        assert_eq!(cache_key(&get), cache_key(&request_parts(Method::GET, "/versions/foo")));
        assert_ne!(cache_key(&get), cache_key(&request_parts(Method::POST, "/versions/foo")));
        assert_ne!(cache_key(&get), cache_key(&request_parts(Method::GET, "/versions/bar")));
        assert_ne!(cache_key(&get), cache_key(&request_parts(Method::GET, "/versions/foo?x=1")));

        let mut other_host = request_parts(Method::GET, "/versions/foo");
        other_host
            .headers
            .insert(header::HOST, HeaderValue::from_static("elsewhere.example.com"));
        assert_ne!(cache_key(&get), cache_key(&other_host));
    }

    #[test]
    fn shared_max_age_makes_responses_storable_for_an_hour() {
        let request = request_parts(Method::GET, "/versions/foo");
        let response = json_response(&request, "{}");
        assert!(response.cache_policy.is_storable());
        let ttl = response.cache_policy.time_to_live(SystemTime::now());
        assert!(ttl > Duration::from_secs(3590) && ttl <= Duration::from_secs(3600));
    }

    #[test]
    fn unsafe_method_responses_are_not_storable() {
        let request = request_parts(Method::PUT, "/versions/foo");
        assert!(!json_response(&request, "{}").cache_policy.is_storable());
    }

    #[tokio::test]
    async fn memory_cache_returns_stored_responses() {
        let cache = MemoryCache::new(1024 * 1024);
        let request = request_parts(Method::GET, "/versions/foo");
        let key = cache_key(&request);

        assert!(cache.get(key).await.is_none());
        cache.put(key, json_response(&request, r#"{"resource":"foo"}"#)).await;

        let cached = cache.get(key).await.unwrap();
        assert_eq!(cached.status, StatusCode::OK);
        assert_eq!(cached.body, Bytes::from_static(br#"{"resource":"foo"}"#));
        assert_eq!(cached.headers[header::CACHE_CONTROL], "s-maxage=3600");
        assert!(cache.get(key.wrapping_add(1)).await.is_none());
    }

    #[tokio::test]
    async fn memory_cache_last_write_wins() {
        let cache = MemoryCache::new(1024 * 1024);
        let request = request_parts(Method::GET, "/versions/foo");
        let key = cache_key(&request);

        cache.put(key, json_response(&request, "first")).await;
        cache.put(key, json_response(&request, "second")).await;

        assert_eq!(cache.get(key).await.unwrap().body, Bytes::from_static(b"second"));
    }

    #[tokio::test]
    async fn cached_response_replays_status_headers_and_body() {
        let request = request_parts(Method::GET, "/versions/foo");
        let response = json_response(&request, "{}").into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, Bytes::from_static(b"{}"));
    }
}
