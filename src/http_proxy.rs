//! HTTP Proxy Module
//!
//! The request-facing half of the proxy: an HTTP/1.1 server whose handler
//! runs the fallback state machine. Every request tries the primary store
//! first; on failure it tries the backup origin, and a backup hit additionally
//! schedules a detached heal upload so the next request finds the object in
//! the primary store. Exactly one response is produced per request and the
//! heal task is never awaited by the request path.

use crate::cache_policy::CachePolicy;
use crate::config::Config;
use crate::heal_writer::{HealPayload, HealWriter};
use crate::session::{KvStore, SessionCache};
use crate::upstream::UpstreamClient;
use crate::{ProxyError, Result};
use bytes::Bytes;
use futures::StreamExt;
use http_body_util::{combinators::BoxBody, BodyExt, Full, StreamBody};
use hyper::body::Frame;
use hyper::header::{HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{HeaderMap, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Response body type: buffered for backup-origin responses, streamed for
/// primary-store hits.
pub type ProxyBody = BoxBody<Bytes, ProxyError>;

/// Headers that belong to a single hop and must not be copied onto the
/// outgoing response.
const HOP_BY_HOP_RESPONSE_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// HTTP proxy server with backup-origin fallback and self-healing
#[derive(Clone)]
pub struct HttpProxy {
    listen_addr: SocketAddr,
    config: Arc<Config>,
    upstream: Arc<UpstreamClient>,
    heal_writer: Arc<HealWriter>,
    cache_policy: CachePolicy,
    request_semaphore: Arc<Semaphore>,
    active_connections: Arc<AtomicUsize>,
}

impl HttpProxy {
    /// Create a new proxy instance; all components share one outbound client.
    pub fn new(config: Arc<Config>, store: Arc<dyn KvStore>) -> Result<Self> {
        let ip: IpAddr = config.server.bind_address.parse().map_err(|_| {
            ProxyError::ConfigError(format!(
                "Invalid bind address: {}",
                config.server.bind_address
            ))
        })?;
        let listen_addr = SocketAddr::new(ip, config.server.port);

        let client = reqwest::Client::builder()
            .timeout(config.server.request_timeout)
            .build()
            .map_err(|e| ProxyError::HttpError(format!("Failed to build HTTP client: {}", e)))?;

        let upstream = Arc::new(UpstreamClient::new(client.clone(), config.edge_cache.ttl)?);
        let sessions = Arc::new(SessionCache::new(
            store,
            client.clone(),
            config.primary.clone(),
        ));
        let heal_writer = Arc::new(HealWriter::new(client, sessions));
        let cache_policy = CachePolicy::new(&config.response_cache)?;
        let request_semaphore = Arc::new(Semaphore::new(config.server.max_concurrent_requests));

        Ok(Self {
            listen_addr,
            config,
            upstream,
            heal_writer,
            cache_policy,
            request_semaphore,
            active_connections: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Run the accept loop until shutdown is signalled.
    pub async fn start(&self, mut shutdown_signal: crate::shutdown::ShutdownSignal) -> Result<()> {
        let listener = TcpListener::bind(self.listen_addr).await?;
        info!("HTTP proxy listening on {}", self.listen_addr);

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            debug!("HTTP connection from {}", addr);

                            if let Err(e) = stream.set_nodelay(true) {
                                warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                            }

                            let proxy = self.clone();
                            tokio::spawn(async move {
                                if let Err(e) = Self::serve_connection(proxy, stream, addr).await {
                                    error!("HTTP proxy error for {}: {}", addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept HTTP connection: {}", e);
                        }
                    }
                }
                _ = shutdown_signal.wait_for_shutdown() => {
                    info!("HTTP proxy received shutdown signal, stopping accept loop");
                    break;
                }
            }
        }

        // Drain period: wait for in-flight connections to complete
        let drain_timeout = Duration::from_secs(5);
        let drain_start = std::time::Instant::now();
        while self.active_connections.load(Ordering::Relaxed) > 0
            && drain_start.elapsed() < drain_timeout
        {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let remaining = self.active_connections.load(Ordering::Relaxed);
        if remaining > 0 {
            warn!("HTTP proxy shutdown with {} connections still active", remaining);
        }

        info!("HTTP proxy stopped");
        Ok(())
    }

    /// Serve a single HTTP connection
    async fn serve_connection(proxy: HttpProxy, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        let io = TokioIo::new(stream);
        let active_connections = Arc::clone(&proxy.active_connections);
        active_connections.fetch_add(1, Ordering::Relaxed);

        let service = service_fn(move |req| {
            let proxy = proxy.clone();
            async move { proxy.handle_request(req, addr).await }
        });

        if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
            if err.is_canceled() || err.is_incomplete_message() {
                debug!("Client disconnected from {}: {}", addr, err);
            } else {
                error!("Error serving HTTP connection from {}: {}", addr, err);
            }
        }

        active_connections.fetch_sub(1, Ordering::Relaxed);
        Ok(())
    }

    /// Handle a single HTTP request
    pub async fn handle_request(
        &self,
        req: Request<hyper::body::Incoming>,
        client_addr: SocketAddr,
    ) -> std::result::Result<Response<ProxyBody>, Infallible> {
        let start_time = std::time::Instant::now();
        let request_id = Uuid::new_v4();

        let _permit = match self.request_semaphore.try_acquire() {
            Ok(permit) => permit,
            Err(_) => {
                warn!("Request limit exceeded, returning 429");
                let mut response =
                    error_response(StatusCode::TOO_MANY_REQUESTS, "request limit exceeded\n");
                response
                    .headers_mut()
                    .insert(RETRY_AFTER, HeaderValue::from_static("10"));
                return Ok(response);
            }
        };

        let path = normalized_path(req.uri().path());
        debug!(
            %request_id,
            method = %req.method(),
            path = %path,
            client = %client_addr,
            "incoming request"
        );

        let response = self.fetch_with_fallback(&path, req.headers()).await;

        info!(
            %request_id,
            method = %req.method(),
            path = %path,
            status = response.status().as_u16(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "request served"
        );

        Ok(response)
    }

    /// Run the fallback state machine for one request path and decorate the
    /// outcome with the response cache policy.
    pub async fn fetch_with_fallback(
        &self,
        path: &str,
        client_headers: &HeaderMap,
    ) -> Response<ProxyBody> {
        let mut response = self.route(path, client_headers).await;
        self.cache_policy.apply(&mut response);
        response
    }

    async fn route(&self, path: &str, client_headers: &HeaderMap) -> Response<ProxyBody> {
        match self
            .upstream
            .fetch(&self.config.primary.base_url, path, client_headers)
            .await
        {
            Ok(response) if response.status().is_success() => {
                debug!(path, "object served from primary store");
                return streaming_response(response);
            }
            Ok(response) => debug!(
                path,
                status = response.status().as_u16(),
                "object not in primary store, trying backup origin"
            ),
            Err(e) => warn!(path, error = %e, "primary store fetch failed, trying backup origin"),
        }

        let response = match self
            .upstream
            .fetch(&self.config.secondary.base_url, path, client_headers)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(path, error = %e, "backup origin fetch failed");
                return error_response(StatusCode::BAD_GATEWAY, "backup origin unreachable\n");
            }
        };

        // The backup body feeds both the client response and the heal upload,
        // so it is buffered exactly once and the handle shared.
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path, error = %e, "failed to read backup origin response body");
                return error_response(StatusCode::BAD_GATEWAY, "backup origin read failed\n");
            }
        };

        if status.is_success() {
            info!(
                path,
                bytes = bytes.len(),
                "object found in backup origin, scheduling heal upload"
            );
            self.schedule_heal(path, HealPayload::from_parts(&headers, bytes.clone()));
        } else {
            debug!(
                path,
                status = status.as_u16(),
                "object missing from backup origin as well"
            );
        }

        buffered_response(status, &headers, bytes)
    }

    /// Spawn a detached heal task. The request path never waits on it and a
    /// failure is only logged.
    fn schedule_heal(&self, path: &str, payload: HealPayload) {
        let heal_writer = Arc::clone(&self.heal_writer);
        let path = path.to_string();
        tokio::spawn(async move {
            match heal_writer.heal(payload, &path).await {
                Ok(()) => info!(path = %path, "heal upload completed"),
                Err(e) => warn!(path = %path, error = %e, "heal upload failed"),
            }
        });
    }
}

/// Strip the leading separator from the request path; the empty path maps to
/// the root key.
fn normalized_path(path: &str) -> String {
    path.trim_start_matches('/').to_string()
}

/// Build a response that streams the upstream body through to the client.
fn streaming_response(response: reqwest::Response) -> Response<ProxyBody> {
    let status = response.status();
    let headers = response.headers().clone();

    let frame_stream = response.bytes_stream().map(|chunk| match chunk {
        Ok(bytes) => Ok(Frame::data(bytes)),
        Err(e) => Err(ProxyError::HttpError(e.to_string())),
    });

    let mut out = Response::new(BoxBody::new(StreamBody::new(frame_stream)));
    *out.status_mut() = status;
    copy_response_headers(&headers, out.headers_mut());
    out
}

/// Build a response from a fully buffered upstream body.
fn buffered_response(status: StatusCode, headers: &HeaderMap, bytes: Bytes) -> Response<ProxyBody> {
    let mut out = Response::new(Full::new(bytes).map_err(|never| match never {}).boxed());
    *out.status_mut() = status;
    copy_response_headers(headers, out.headers_mut());
    out
}

/// Build a locally generated error response.
fn error_response(status: StatusCode, message: &'static str) -> Response<ProxyBody> {
    let mut out = Response::new(
        Full::new(Bytes::from_static(message.as_bytes()))
            .map_err(|never| match never {})
            .boxed(),
    );
    *out.status_mut() = status;
    out.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    out
}

/// Copy upstream response headers, dropping hop-by-hop ones.
fn copy_response_headers(src: &HeaderMap, dst: &mut HeaderMap) {
    for (name, value) in src {
        if !HOP_BY_HOP_RESPONSE_HEADERS.contains(&name.as_str()) {
            dst.append(name, value.clone());
        }
    }
}
