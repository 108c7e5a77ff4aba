//! Configuration loading for the refresh-flow service.
//!
//! Uses figment for YAML-based configuration with sensible defaults,
//! overridable through `REFRESH_FLOW_*` environment variables.

pub mod schema;

pub use schema::{
    Config, DiscoveryConfig, ENV_PREFIX, LogConfig, RedisConfig, ServiceConfig, StoreBackend,
    StoreConfig,
};
