use anyhow::Result;
use reqwest::{
    Proxy,
    header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue},
    redirect::Policy,
};
use std::time::Duration;

pub type HttpClient = reqwest::Client;

/// Media type requesting the structured JSON representation of the GitHub REST API.
const GITHUB_ACCEPT: &str = "application/vnd.github+json";

pub struct BuildHttpClientArgs<'a> {
    pub token: &'a str,
    pub user_agent: &'a str,
    pub max_redirects: usize,
    pub request_timeout: Duration,
    pub proxy: Option<Proxy>,
}

/// Create a new [`HttpClient`] that sends the GitHub credential and
/// client identification with every request.
pub fn build_http_client(args: BuildHttpClientArgs) -> Result<HttpClient> {
    let mut headers = HeaderMap::new();
    let mut authorization = HeaderValue::from_str(&format!("Bearer {}", args.token))?;
    authorization.set_sensitive(true);
    headers.insert(AUTHORIZATION, authorization);
    headers.insert(ACCEPT, HeaderValue::from_static(GITHUB_ACCEPT));

    let mut builder = reqwest::ClientBuilder::default()
        .redirect(Policy::limited(args.max_redirects))
        .user_agent(args.user_agent)
        .default_headers(headers)
        .connect_timeout(Duration::from_secs(5))
        .timeout(args.request_timeout);
    if let Some(proxy) = args.proxy {
        builder = builder.proxy(proxy);
    }
    Ok(builder.build()?)
}
