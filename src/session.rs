//! Session Module
//!
//! Caches the short-lived credential bundle needed to write to the primary
//! store. A cache hit serves the stored session without any network calls; a
//! miss runs the two-step handshake (account authorization, then upload-URL
//! issuance) and persists the result with a fixed TTL.
//!
//! Concurrent misses may each run the handshake; the store entry is
//! last-writer-wins and the redundant calls are tolerated.

use crate::config::PrimaryStoreConfig;
use crate::{ProxyError, Result};
use async_trait::async_trait;
use http::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Path of the upload-URL issuance endpoint, relative to the API base URL
/// returned by account authorization.
const UPLOAD_URL_ENDPOINT: &str = "/api/v2/get_upload_url";

/// Credential bundle for reading and writing the primary store.
///
/// Immutable once created; replaced wholesale on refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub auth_token: String,
    pub api_url: String,
    pub upload_url: String,
    pub upload_token: String,
}

/// Account-authorization response payload
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizeResponse {
    authorization_token: String,
    api_url: String,
}

/// Upload-URL issuance request payload
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadUrlRequest<'a> {
    bucket_id: &'a str,
}

/// Upload-URL issuance response payload
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadUrlResponse {
    authorization_token: String,
    upload_url: String,
}

/// External key-value cache store collaborator.
///
/// Only one session is ever cached, under a single well-known key.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
}

/// In-process `KvStore` backed by a map of value + expiry deadline.
///
/// Entries past their deadline read as absent. Writes overwrite
/// unconditionally (last writer wins).
#[derive(Default)]
pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|(_, deadline)| *deadline > Instant::now())
            .map(|(value, _)| value.clone()))
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }
}

/// Credential cache backed by an external key-value store.
pub struct SessionCache {
    store: std::sync::Arc<dyn KvStore>,
    client: reqwest::Client,
    config: PrimaryStoreConfig,
}

impl SessionCache {
    pub fn new(
        store: std::sync::Arc<dyn KvStore>,
        client: reqwest::Client,
        config: PrimaryStoreConfig,
    ) -> Self {
        Self {
            store,
            client,
            config,
        }
    }

    /// Return the cached session, or run the handshake and cache the result.
    ///
    /// A single failure at any handshake step aborts the whole acquisition;
    /// nothing partial is ever cached, so a later call retries from scratch.
    pub async fn acquire(&self) -> Result<Session> {
        let key = &self.config.session_cache_key;

        match self.store.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str::<Session>(&raw) {
                Ok(session) => {
                    debug!("session cache hit");
                    return Ok(session);
                }
                Err(e) => warn!(error = %e, "cached session is malformed, refreshing"),
            },
            Ok(None) => debug!("session cache miss"),
            Err(e) => warn!(error = %e, "session cache read failed, refreshing"),
        }

        let session = self.handshake().await?;

        // A failed cache write must not discard a successful handshake.
        match serde_json::to_string(&session) {
            Ok(raw) => {
                if let Err(e) = self.store.put(key, &raw, self.config.session_ttl).await {
                    warn!(error = %e, "failed to cache session");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize session"),
        }

        Ok(session)
    }

    /// Two-step handshake: account authorization, then upload-URL issuance.
    async fn handshake(&self) -> Result<Session> {
        info!("running credential handshake with primary store");

        let response = self
            .client
            .post(&self.config.authorize_url)
            .basic_auth(&self.config.key_id, Some(&self.config.application_key))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ProxyError::AuthFailure(response.status().as_u16()));
        }
        let body = response.bytes().await?;
        let authorized: AuthorizeResponse = serde_json::from_slice(&body)
            .map_err(|e| ProxyError::ProtocolError(format!("authorize response: {}", e)))?;
        debug!("account authorized");

        let endpoint = format!(
            "{}{}",
            authorized.api_url.trim_end_matches('/'),
            UPLOAD_URL_ENDPOINT
        );
        let response = self
            .client
            .post(&endpoint)
            .header(AUTHORIZATION, authorized.authorization_token.as_str())
            .json(&UploadUrlRequest {
                bucket_id: &self.config.bucket_id,
            })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProxyError::UploadUrlFailure(status.as_u16()));
        }
        let body = response.bytes().await?;
        let issued: UploadUrlResponse = serde_json::from_slice(&body)
            .map_err(|e| ProxyError::ProtocolError(format!("get_upload_url response: {}", e)))?;
        if issued.upload_url.is_empty() {
            warn!("upload-URL issuance returned an empty URL");
            return Err(ProxyError::UploadUrlFailure(status.as_u16()));
        }
        debug!("upload URL issued");

        Ok(Session {
            auth_token: authorized.authorization_token,
            api_url: authorized.api_url,
            upload_url: issued.upload_url,
            upload_token: issued.authorization_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn memory_store_expires_entries() {
        let store = MemoryKvStore::new();
        store.put("k", "v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_store_last_writer_wins() {
        let store = MemoryKvStore::new();
        store.put("k", "first", Duration::from_secs(60)).await.unwrap();
        store.put("k", "second", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn memory_store_misses_unknown_keys() {
        let store = MemoryKvStore::new();
        assert_eq!(store.get("absent").await.unwrap(), None);
    }

    #[test]
    fn session_roundtrips_through_json() {
        let session = Session {
            auth_token: "token".to_string(),
            api_url: "https://api.example.com".to_string(),
            upload_url: "https://upload.example.com/path".to_string(),
            upload_token: "upload-token".to_string(),
        };
        let raw = serde_json::to_string(&session).unwrap();
        let restored: Session = serde_json::from_str(&raw).unwrap();
        assert_eq!(restored.auth_token, session.auth_token);
        assert_eq!(restored.upload_url, session.upload_url);
    }

    #[test]
    fn handshake_payloads_use_camel_case() {
        let authorized: AuthorizeResponse = serde_json::from_str(
            r#"{"authorizationToken": "t", "apiUrl": "https://api.example.com"}"#,
        )
        .unwrap();
        assert_eq!(authorized.authorization_token, "t");

        // A missing field is a protocol error, not an empty default
        let missing =
            serde_json::from_str::<UploadUrlResponse>(r#"{"authorizationToken": "t"}"#);
        assert!(missing.is_err());

        let body = serde_json::to_string(&UploadUrlRequest { bucket_id: "bkt" }).unwrap();
        assert_eq!(body, r#"{"bucketId":"bkt"}"#);
    }
}
