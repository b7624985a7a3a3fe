//! Server for Herald, a caching relay for the latest GitHub release of a project.

#[cfg(feature = "rustls-tls")]
#[cfg(feature = "native-tls")]
compile_error!("You can only enable one TLS backend");

mod cache;
mod github;
mod http_client;
mod routes;

use anyhow::Result;
use axum::{
    BoxError, Json, Router,
    error_handling::HandleErrorLayer,
    extract::Request,
    http::{HeaderValue, StatusCode},
    middleware::{self as axum_middleware, Next},
    response::{IntoResponse, Response},
};
use cache::{MemoryCache, ResponseStore};
use core::{net::SocketAddr, time::Duration};
use github::{GitHubReleases, ReleaseSource};
use http_client::{BuildHttpClientArgs, build_http_client};
use reqwest::{Proxy, header};
use routes::ErrorResponse;
use std::{any::Any, sync::Arc};
use tokio::{net::TcpListener, signal};
use tower::{ServiceBuilder, timeout::TimeoutLayer};
use tower_http::{
    catch_panic::CatchPanicLayer,
    trace::{self, TraceLayer},
};
use tracing::{Level, info, warn};
use url::Url;

pub struct Server {
    router_inner: Router,
}

/// Settings to run the server with.
#[derive(Clone)]
pub struct Settings {
    /// Maximum time a request may take before it is abandoned.
    pub request_timeout: Duration,

    /// See [`UpstreamSettings`].
    pub upstream_settings: UpstreamSettings,

    /// See [`CacheSettings`].
    pub cache_settings: CacheSettings,
}

/// Configuration used when querying the GitHub API.
#[derive(Clone)]
pub struct UpstreamSettings {
    /// Base URL of the GitHub REST API.
    pub api_url: Url,

    /// Organization that every requested resource name is resolved under.
    pub organization: String,

    /// Bearer token sent with every upstream request.
    pub token: String,

    /// `User-Agent` sent with every upstream request.
    pub user_agent: String,

    /// Maximum time an upstream request may take before it's abandoned and considered failed.
    pub request_timeout: Duration,

    /// The maximum amount of redirects to follow when making a request to an upstream server before abandoning the request.
    pub max_redirects: usize,

    /// The proxy to use for all outgoing requests.
    pub request_proxy: Option<Url>,
}

/// Configuration for the in-memory response cache.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Maximum combined size (in bytes) of all cached responses.
    pub max_size: u64,
}

struct AppState {
    releases: Arc<dyn ReleaseSource>,
    response_cache: Arc<dyn ResponseStore>,
}

impl Server {
    /// Create a new server with the provided settings.
    pub fn new(settings: Settings) -> Result<Self> {
        let upstream = settings.upstream_settings;
        let client = build_http_client(BuildHttpClientArgs {
            token: &upstream.token,
            user_agent: &upstream.user_agent,
            max_redirects: upstream.max_redirects,
            request_timeout: upstream.request_timeout,
            proxy: upstream
                .request_proxy
                .as_ref()
                .map(|p| Proxy::all(p.as_str()))
                .transpose()?,
        })?;

        let state = Arc::new(AppState {
            releases: Arc::new(GitHubReleases::new(
                client,
                upstream.api_url,
                upstream.organization,
            )),
            response_cache: Arc::new(MemoryCache::new(settings.cache_settings.max_size)),
        });

        Ok(Self {
            router_inner: Self::router(state, settings.request_timeout),
        })
    }

    /// Start the server and expose it locally on the provided [`SocketAddr`].
    pub async fn start(self, address: &SocketAddr) -> Result<()> {
        let tcp_listener = TcpListener::bind(&address).await?;
        info!("Listening on http://{}", tcp_listener.local_addr()?);
        axum::serve(tcp_listener, self.router_inner)
            .with_graceful_shutdown(Self::shutdown_signal())
            .await?;
        Ok(())
    }

    // Every path reaches the versions handler, which answers unknown routes itself.
    fn router(state: Arc<AppState>, request_timeout: Duration) -> Router {
        Router::new()
            .fallback(routes::versions_handler)
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                    .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
            )
            .layer(
                ServiceBuilder::new()
                    .layer(HandleErrorLayer::new(Self::handle_middleware_error))
                    .layer(TimeoutLayer::new(request_timeout)),
            )
            .layer(CatchPanicLayer::custom(Self::panic_response))
            .layer(axum_middleware::from_fn(Self::header_middleware))
            .with_state(state)
    }

    // https://github.com/tokio-rs/axum/blob/15917c6dbcb4a48707a20e9cfd021992a279a662/examples/graceful-shutdown/src/main.rs#L55
    async fn shutdown_signal() {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    // Requests abandoned by the timeout get the same JSON body as any other unexpected failure.
    async fn handle_middleware_error(err: BoxError) -> (StatusCode, Json<ErrorResponse>) {
        warn!("Request failed in middleware: {err}");
        routes::unexpected_error(err.to_string())
    }

    fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
        let message = if let Some(message) = err.downcast_ref::<String>() {
            message.clone()
        } else if let Some(message) = err.downcast_ref::<&str>() {
            (*message).to_owned()
        } else {
            "handler panicked".to_owned()
        };
        routes::unexpected_error(message).into_response()
    }

    async fn header_middleware(request: Request, next: Next) -> Response {
        let mut response = next.run(request).await;
        response.headers_mut().append(
            header::SERVER,
            HeaderValue::from_static(env!("CARGO_PKG_NAME")),
        );
        response
            .headers_mut()
            .append("X-Robots-Tag", HeaderValue::from_static("none"));
        response
    }
}
