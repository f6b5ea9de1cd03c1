//! Result cache - keyed byte store with per-entry TTL.
//!
//! Two backends: an in-process LRU (`MemoryCache`) and a network store
//! speaking a RESP subset (`RespCache`). Expired entries read as misses.

mod memory;
mod resp;

pub use memory::MemoryCache;
pub use resp::RespCache;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use vigil_common::ErrorKind;

/// Longest TTL an entry is stored with; longer requests are clamped
pub const MAX_ENTRY_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache protocol error: {0}")]
    Protocol(String),

    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),
}

impl CacheError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(e) if e.kind() == std::io::ErrorKind::TimedOut => ErrorKind::Timeout,
            Self::Io(_) => ErrorKind::ConnectionRefused,
            Self::Protocol(_) => ErrorKind::ProtocolError,
            Self::Timeout(_) => ErrorKind::Timeout,
        }
    }
}

/// Point-in-time counters of a cache backend
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheStats {
    /// `None` until at least one lookup happened
    pub fn hit_ratio(&self) -> Option<f64> {
        let total = self.hits + self.misses;
        if total == 0 {
            None
        } else {
            Some(self.hits as f64 / total as f64)
        }
    }
}

/// Keyed store with TTL
///
/// Values are opaque bytes; callers always receive owned copies.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Liveness check used by the `cache` health checker
    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }

    /// Backend counters, when the backend tracks them
    async fn stats(&self) -> Option<CacheStats> {
        None
    }

    fn backend(&self) -> &'static str;
}

pub type SharedCache = Arc<dyn CacheStore>;
