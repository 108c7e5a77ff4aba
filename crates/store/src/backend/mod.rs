//! Key-value backends holding encoded [`PersistenceForm`](crate::PersistenceForm)s.
//!
//! A backend only knows strings and lifetimes. Encoding, decoding and the
//! OAuth error mapping live in [`RefreshTokenRepository`](crate::RefreshTokenRepository).

use async_trait::async_trait;
use refresh_flow_types::traits::Result;

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryBackend;
#[cfg(feature = "redis")]
pub use redis::{RedisBackend, subscribe_events};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;

/// A string store with per-entry expiry.
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    /// Writes `value` under `key`, overwriting any previous entry and
    /// resetting its lifetime to `ttl_secs` seconds.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    /// Reads `key`; expired entries are reported as absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Removes `key`. A missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}
