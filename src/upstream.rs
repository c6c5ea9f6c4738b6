//! Upstream Module
//!
//! Fetches objects from the primary store and the backup origin. The caller's
//! original headers are forwarded minus hop-by-hop ones, and every fetch
//! carries an edge-cache-affinity hint so intermediary caches may also hold
//! the result, independent of this proxy's own response policy.

use crate::{ProxyError, Result};
use http::header::{HeaderMap, HeaderValue, CACHE_CONTROL};
use std::time::Duration;

/// Headers that belong to a single hop and must not be forwarded upstream.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "host",
    "content-length",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// HTTP client for origin fetches
pub struct UpstreamClient {
    client: reqwest::Client,
    edge_cache_hint: HeaderValue,
}

impl UpstreamClient {
    pub fn new(client: reqwest::Client, edge_cache_ttl: Duration) -> Result<Self> {
        let edge_cache_hint =
            HeaderValue::from_str(&format!("max-age={}", edge_cache_ttl.as_secs())).map_err(
                |e| ProxyError::ConfigError(format!("Invalid edge cache TTL header: {}", e)),
            )?;
        Ok(Self {
            client,
            edge_cache_hint,
        })
    }

    /// GET `{base_url}/{path}`, forwarding the caller's headers.
    ///
    /// Non-success statuses are returned as responses, not errors; only
    /// transport failures surface as `Err`.
    pub async fn fetch(
        &self,
        base_url: &str,
        path: &str,
        client_headers: &HeaderMap,
    ) -> Result<reqwest::Response> {
        let url = join_url(base_url, path);
        let mut headers = forward_headers(client_headers);
        headers.insert(CACHE_CONTROL, self.edge_cache_hint.clone());

        let response = self.client.get(&url).headers(headers).send().await?;
        Ok(response)
    }
}

/// Join a base URL and a normalized request path with a single separator.
pub(crate) fn join_url(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}

/// Copy headers, dropping hop-by-hop ones.
pub(crate) fn forward_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = HeaderMap::new();
    for (name, value) in headers {
        if !HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
            forwarded.append(name, value.clone());
        }
    }
    forwarded
}
