//! Refresh-token persistence.
//!
//! Sessions are stored as compact [`PersistenceForm`]s in a key-value backend
//! with a fixed lifetime. Provides an in-memory backend for tests, a
//! SQLite-backed one for single-node deployments and a Redis-backed one shared
//! with the services that publish "refresh token created" events.

pub mod backend;
pub mod form;
pub mod noop;
pub mod repository;
pub mod subscription;

pub use backend::{KeyValueBackend, MemoryBackend};
#[cfg(feature = "redis")]
pub use backend::{RedisBackend, subscribe_events};
#[cfg(feature = "sqlite")]
pub use backend::SqliteBackend;
pub use form::PersistenceForm;
pub use noop::NoOpAccessTokenStore;
pub use repository::RefreshTokenRepository;
pub use subscription::EventSubscription;
