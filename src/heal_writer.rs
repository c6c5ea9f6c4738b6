//! Heal Writer Module
//!
//! Uploads an object that was served from the backup origin into the primary
//! store, so future requests hit the primary directly. Invoked fire-and-forget
//! from the request path; the outcome is observed only through logging and
//! never delays or alters the response already sent to the client.

use crate::digest::sha1_hex;
use crate::session::SessionCache;
use crate::{ProxyError, Result};
use bytes::Bytes;
use http::header::{HeaderMap, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use std::sync::Arc;
use tracing::{debug, warn};

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// A fully buffered payload awaiting upload.
///
/// `content_length` is copied verbatim from the source response; if the
/// source was truncated the declared length will mismatch the body and the
/// primary store rejects the upload. That failure mode is accepted, not
/// corrected here.
#[derive(Debug, Clone)]
pub struct HealPayload {
    pub bytes: Bytes,
    pub content_type: Option<String>,
    pub content_length: Option<String>,
}

impl HealPayload {
    /// Build a payload from a buffered body and its source response headers.
    pub fn from_parts(headers: &HeaderMap, bytes: Bytes) -> Self {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let content_length = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        Self {
            bytes,
            content_type,
            content_length,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Uploads previously-fetched payloads to the primary store.
pub struct HealWriter {
    client: reqwest::Client,
    sessions: Arc<SessionCache>,
}

impl HealWriter {
    pub fn new(client: reqwest::Client, sessions: Arc<SessionCache>) -> Self {
        Self { client, sessions }
    }

    /// Upload one payload under the given path key.
    ///
    /// Acquires credentials (cached or fresh), digests the payload, and
    /// issues a single upload call. A rejected upload is returned as
    /// `UploadFailure` without retrying and without touching the cached
    /// session; a later heal attempt acquires again.
    pub async fn heal(&self, payload: HealPayload, path: &str) -> Result<()> {
        let session = self.sessions.acquire().await?;
        let digest = sha1_hex(&payload.bytes);
        let content_type = payload
            .content_type
            .as_deref()
            .unwrap_or(FALLBACK_CONTENT_TYPE);

        debug!(
            path,
            bytes = payload.len(),
            digest = %digest,
            "uploading object to primary store"
        );

        let mut request = self
            .client
            .post(&session.upload_url)
            .header(AUTHORIZATION, session.upload_token.as_str())
            .header("X-File-Name", path)
            .header(CONTENT_TYPE, content_type)
            .header("X-Content-Sha1", digest.as_str());
        if let Some(length) = &payload.content_length {
            request = request.header(CONTENT_LENGTH, length.as_str());
        }

        let response = request.body(payload.bytes).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                path,
                status = status.as_u16(),
                content_type,
                content_length = ?payload.content_length,
                digest = %digest,
                upstream_response = %body,
                "primary store rejected upload"
            );
            return Err(ProxyError::UploadFailure(status.as_u16(), body));
        }

        Ok(())
    }
}
