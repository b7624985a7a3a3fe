use crate::server::{
    AppState,
    cache::{self, CachedResponse},
    github::LookupError,
    routes::{ErrorResponse, unexpected_error},
};
use axum::{
    Json,
    body::Bytes,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::{sync::Arc, time::SystemTime};
use tracing::{debug, warn};

const INVALID_ROUTE_MESSAGE: &str = "Invalid route. Use /versions/:resource-name";
const NOT_FOUND_MESSAGE: &str = "Repository or release not found. Check that the resource exists and has at least one GitHub release.";
const UPSTREAM_FAILURE_MESSAGE: &str = "Failed to fetch release info from GitHub.";

/// Shared caches may serve a release lookup for an hour.
const SUCCESS_CACHE_CONTROL: &str = "s-maxage=3600";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionsResponse<'a> {
    resource: &'a str,
    latest_version: String,
    release_url: String,
    published_at: String,
}

/// Extract the resource name from a `/versions/{resource}` path.
///
/// Empty segments are skipped and anything after the resource is ignored.
fn resource_name(path: &str) -> Option<&str> {
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    match (segments.next(), segments.next()) {
        (Some("versions"), Some(resource)) => Some(resource),
        _ => None,
    }
}

fn lookup_error_response(resource: &str, err: LookupError) -> (StatusCode, Json<ErrorResponse>) {
    match err {
        LookupError::Status(StatusCode::NOT_FOUND) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                resource: Some(resource.to_owned()),
                ..ErrorResponse::new(NOT_FOUND_MESSAGE)
            }),
        ),
        LookupError::Status(status) => (
            status,
            Json(ErrorResponse {
                status: Some(status.as_u16()),
                ..ErrorResponse::new(UPSTREAM_FAILURE_MESSAGE)
            }),
        ),
        LookupError::Unexpected(message) => unexpected_error(message),
    }
}

pub async fn versions_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let (request, _) = request.into_parts();
    let Some(resource) = resource_name(request.uri.path()) else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(INVALID_ROUTE_MESSAGE)),
        ));
    };

    let cache_key = cache::cache_key(&request);
    if let Some(cached) = state.response_cache.get(cache_key).await
        && !cached.cache_policy.is_stale(SystemTime::now())
    {
        debug!("Serving release of {resource} from cache");
        return Ok(cached.into_response());
    }

    let release = state
        .releases
        .latest_release(resource)
        .await
        .map_err(|err| {
            warn!("Failed to look up latest release of {resource}: {err}");
            lookup_error_response(resource, err)
        })?;

    let body = serde_json::to_vec(&VersionsResponse {
        resource,
        latest_version: release.tag_name,
        release_url: release.html_url,
        published_at: release.published_at,
    })
    .map_err(|err| unexpected_error(err.to_string()))?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(SUCCESS_CACHE_CONTROL),
    );
    let response = CachedResponse::new(&request, StatusCode::OK, headers, Bytes::from(body));

    // Only GET lookups are replayable, matching what shared caches accept.
    if request.method == Method::GET && response.cache_policy.is_storable() {
        let response_cache = Arc::clone(&state.response_cache);
        let entry = response.clone();
        debug!("Caching release of {resource}");
        tokio::spawn(async move { response_cache.put(cache_key, entry).await });
    }

    Ok(response.into_response())
}
