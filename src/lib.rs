//! Fallback Proxy - Read-through object storage proxy with self-healing
//!
//! Serves objects from a primary object store and transparently falls back to
//! a backup origin when the primary does not have them. Objects served from
//! the backup are uploaded to the primary store in the background so the next
//! request is a primary hit.

pub mod cache_policy;
pub mod config;
pub mod digest;
pub mod error;
pub mod heal_writer;
pub mod http_proxy;
pub mod logging;
pub mod session;
pub mod shutdown;
pub mod upstream;

pub use error::{ProxyError, Result};
