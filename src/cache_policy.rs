//! Cache Policy Module
//!
//! Applies the fixed Cache-Control policy to every outgoing response, success
//! or failure, so that even "not found" responses are cached briefly and
//! repeated misses stop reaching the upstreams.

use crate::config::ResponseCacheConfig;
use crate::{ProxyError, Result};
use http::header::{HeaderValue, CACHE_CONTROL};
use http::Response;

/// Fixed outgoing Cache-Control policy
#[derive(Debug, Clone)]
pub struct CachePolicy {
    header_value: HeaderValue,
}

impl CachePolicy {
    pub fn new(config: &ResponseCacheConfig) -> Result<Self> {
        let rendered = format!(
            "public, max-age={}, stale-while-revalidate={}, stale-if-error={}",
            config.max_age.as_secs(),
            config.stale_while_revalidate.as_secs(),
            config.stale_if_error.as_secs()
        );
        let header_value = HeaderValue::from_str(&rendered)
            .map_err(|e| ProxyError::ConfigError(format!("Invalid cache policy: {}", e)))?;
        Ok(Self { header_value })
    }

    /// Overwrite the response's Cache-Control header with the fixed policy.
    pub fn apply<B>(&self, response: &mut Response<B>) {
        response
            .headers_mut()
            .insert(CACHE_CONTROL, self.header_value.clone());
    }
}
