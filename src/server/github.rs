use crate::server::http_client::HttpClient;
use async_trait::async_trait;
use axum::http::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// The latest published release of a repository, as reported upstream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseRecord {
    pub tag_name: String,
    pub html_url: String,
    pub published_at: String,
}

#[derive(Debug, Error)]
pub enum LookupError {
    /// Upstream answered, but with a non-success status.
    #[error("upstream responded with status {0}")]
    Status(StatusCode),

    /// Anything else: transport failures, malformed bodies, invalid URLs.
    #[error("{0}")]
    Unexpected(String),
}

impl From<reqwest::Error> for LookupError {
    fn from(err: reqwest::Error) -> Self {
        Self::Unexpected(err.to_string())
    }
}

/// Something that can tell which release of a resource is the latest one.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    async fn latest_release(&self, resource: &str) -> Result<ReleaseRecord, LookupError>;
}

/// [`ReleaseSource`] backed by the GitHub REST API.
pub struct GitHubReleases {
    client: HttpClient,
    api_url: Url,
    organization: String,
}

impl GitHubReleases {
    pub fn new(client: HttpClient, api_url: Url, organization: String) -> Self {
        Self {
            client,
            api_url,
            organization,
        }
    }

    fn latest_release_url(&self, resource: &str) -> String {
        format!(
            "{}/repos/{}/{}/releases/latest",
            self.api_url.as_str().trim_end_matches('/'),
            self.organization,
            resource
        )
    }
}

#[async_trait]
impl ReleaseSource for GitHubReleases {
    async fn latest_release(&self, resource: &str) -> Result<ReleaseRecord, LookupError> {
        let url = self.latest_release_url(resource);
        debug!("Requesting latest release from {url}");
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(LookupError::Status(response.status()));
        }
        Ok(response.json().await?)
    }
}
