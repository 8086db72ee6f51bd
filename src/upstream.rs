//! Forwarding to the wrapped application.

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use reqwest::Client;
use std::time::Duration;

/// Headers that only make sense for one connection.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// A request on its way to the application.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// The application's answer.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// The application behind the simulator.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn forward(&self, request: UpstreamRequest) -> Result<UpstreamResponse>;
}

/// Upstream reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: Client,
    base_url: String,
}

impl HttpUpstream {
    /// Create a new upstream client with a request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to build upstream HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url_for(&self, path_and_query: &str) -> String {
        format!("{}{}", self.base_url, path_and_query)
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn forward(&self, request: UpstreamRequest) -> Result<UpstreamResponse> {
        let url = self.url_for(&request.path_and_query);
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .context("Unsupported request method")?;

        let response = self
            .client
            .request(method, &url)
            .headers(convert_request_headers(&request.headers))
            .body(request.body)
            .send()
            .await
            .with_context(|| format!("Upstream request failed: {}", url))?;

        let status = StatusCode::from_u16(response.status().as_u16())
            .context("Invalid upstream status code")?;
        let headers = convert_response_headers(response.headers());
        let body = response
            .bytes()
            .await
            .context("Failed to read upstream response body")?;

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

/// Is this header scoped to a single connection?
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| name.eq_ignore_ascii_case(h))
}

/// Convert axum headers to reqwest headers, dropping hop-by-hop headers and `Host`.
fn convert_request_headers(headers: &HeaderMap) -> reqwest::header::HeaderMap {
    let mut converted = reqwest::header::HeaderMap::new();
    for (name, value) in headers {
        if is_hop_by_hop(name.as_str()) || name.as_str() == "host" {
            continue;
        }
        if let Ok(reqwest_name) = reqwest::header::HeaderName::try_from(name.as_str()) {
            if let Ok(reqwest_value) = reqwest::header::HeaderValue::from_bytes(value.as_bytes()) {
                converted.append(reqwest_name, reqwest_value);
            }
        }
    }
    converted
}

/// Convert reqwest headers back, dropping hop-by-hop headers.
fn convert_response_headers(headers: &reqwest::header::HeaderMap) -> HeaderMap {
    let mut converted = HeaderMap::new();
    for (name, value) in headers {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        if let Ok(axum_name) = HeaderName::try_from(name.as_str()) {
            if let Ok(axum_value) = HeaderValue::from_bytes(value.as_bytes()) {
                converted.append(axum_name, axum_value);
            }
        }
    }
    converted
}
