use refresh_flow_types::{RefreshError, SessionKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Prefix of environment variables overriding file values.
pub const ENV_PREFIX: &str = "REFRESH_FLOW_";

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    38003
}
fn default_concurrency() -> usize {
    4
}
fn default_access_token_lifespan() -> u64 {
    3600
}
fn default_id_token_lifespan() -> u64 {
    3600
}
fn default_refresh_token_lifespan() -> u64 {
    14 * 24 * 3600
}
fn default_true() -> bool {
    true
}

/// Exchange service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Listen address (defaults to `127.0.0.1`).
    #[serde(default = "default_host")]
    pub host: String,
    /// Listen port (defaults to 38003).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Size of the exchange worker pool.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Access token lifespan in seconds.
    #[serde(default = "default_access_token_lifespan")]
    pub access_token_lifespan: u64,
    /// ID token lifespan in seconds.
    #[serde(default = "default_id_token_lifespan")]
    pub id_token_lifespan: u64,
    /// Refresh token lifespan in seconds; also the store TTL.
    #[serde(default = "default_refresh_token_lifespan")]
    pub refresh_token_lifespan: u64,
    /// Base64 HMAC key for refresh tokens.
    #[serde(default)]
    pub refresh_token_key: String,
    /// Base64 HMAC key for signing access and ID tokens.
    #[serde(default)]
    pub signing_key: String,
    /// Whether the OpenID Connect refresh handler is enabled.
    #[serde(default = "default_true")]
    pub oidc: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            concurrency: default_concurrency(),
            access_token_lifespan: default_access_token_lifespan(),
            id_token_lifespan: default_id_token_lifespan(),
            refresh_token_lifespan: default_refresh_token_lifespan(),
            refresh_token_key: String::new(),
            signing_key: String::new(),
            oidc: true,
        }
    }
}

impl ServiceConfig {
    #[must_use]
    pub fn access_token_lifespan(&self) -> Duration {
        Duration::from_secs(self.access_token_lifespan)
    }

    #[must_use]
    pub fn id_token_lifespan(&self) -> Duration {
        Duration::from_secs(self.id_token_lifespan)
    }

    #[must_use]
    pub fn refresh_token_lifespan(&self) -> Duration {
        Duration::from_secs(self.refresh_token_lifespan)
    }

    /// Session variant built for each exchange.
    #[must_use]
    pub fn session_kind(&self) -> SessionKind {
        if self.oidc {
            SessionKind::Oidc
        } else {
            SessionKind::OAuth
        }
    }
}

fn default_issuer() -> String {
    "https://localhost".to_string()
}
fn default_token_endpoint() -> String {
    "https://localhost/oauth/token".to_string()
}

/// Issuer metadata normally served by the discovery service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_issuer")]
    pub issuer: String,
    #[serde(default = "default_token_endpoint")]
    pub token_endpoint: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            issuer: default_issuer(),
            token_endpoint: default_token_endpoint(),
        }
    }
}

/// Which key-value backend holds refresh-token sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
    Redis,
}

fn default_sqlite_url() -> String {
    "sqlite://refresh_tokens.db".to_string()
}
fn default_ingest_concurrency() -> usize {
    2
}

/// Token store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_sqlite_url")]
    pub sqlite_url: String,
    /// Size of the event-ingestion worker pool.
    #[serde(default = "default_ingest_concurrency")]
    pub ingest_concurrency: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            sqlite_url: default_sqlite_url(),
            ingest_concurrency: default_ingest_concurrency(),
        }
    }
}

fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}
fn default_redis_port() -> u16 {
    6379
}
fn default_events_channel() -> String {
    "refresh_token_created".to_string()
}

/// Redis connection and event channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_host")]
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default)]
    pub db: u8,
    /// Pub/sub channel carrying "refresh token created" events.
    #[serde(default = "default_events_channel")]
    pub events_channel: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_redis_host(),
            port: default_redis_port(),
            db: 0,
            events_channel: default_events_channel(),
        }
    }
}

impl RedisConfig {
    /// Connection URL in `redis://host:port/db` form.
    #[must_use]
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

fn default_level() -> String {
    "info".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
    /// Also write daily-rotated log files into this directory.
    #[serde(default)]
    pub directory: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            directory: None,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Parses configuration from a YAML string, merged with defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`figment::Error`] if the YAML is invalid or extraction fails.
    #[allow(clippy::result_large_err)]
    pub fn from_yaml(yaml: &str) -> Result<Self, figment::Error> {
        use figment::{
            Figment,
            providers::{Format as _, Serialized, Yaml},
        };
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Yaml::string(yaml))
            .extract()
    }

    /// Loads configuration from an optional file, then `REFRESH_FLOW_*`
    /// environment variables (`__` separates nested keys).
    ///
    /// # Errors
    ///
    /// Returns a [`figment::Error`] if the file cannot be read or parsed.
    #[allow(clippy::result_large_err)]
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, figment::Error> {
        use figment::{
            Figment,
            providers::{Env, Format as _, Serialized, Yaml},
        };
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__")).extract()
    }

    /// Rejects settings the service cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`RefreshError::Config`] naming the offending key.
    pub fn validate(&self) -> Result<(), RefreshError> {
        let checks = [
            ("service.concurrency", self.service.concurrency == 0),
            ("store.ingest_concurrency", self.store.ingest_concurrency == 0),
            (
                "service.access_token_lifespan",
                self.service.access_token_lifespan == 0,
            ),
            (
                "service.id_token_lifespan",
                self.service.id_token_lifespan == 0,
            ),
            (
                "service.refresh_token_lifespan",
                self.service.refresh_token_lifespan == 0,
            ),
        ];
        if let Some((key, _)) = checks.iter().find(|(_, bad)| *bad) {
            return Err(RefreshError::Config(format!("{key} must be greater than zero")));
        }
        if self.service.refresh_token_key.is_empty() || self.service.signing_key.is_empty() {
            return Err(RefreshError::Config(
                "service.refresh_token_key and service.signing_key are required".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_YAML: &str = r#"
service:
  port: 9000
  host: "0.0.0.0"
  refresh_token_lifespan: 86400
  refresh_token_key: "cmVmcmVzaC1rZXk="
  signing_key: "c2lnbmluZy1rZXk="
  oidc: false
store:
  backend: redis
  ingest_concurrency: 8
redis:
  host: cache.internal
  db: 3
"#;

    #[test]
    fn test_default_config() {
        let c = Config::default();
        assert_eq!(c.service.port, 38003);
        assert_eq!(c.service.host, "127.0.0.1");
        assert_eq!(c.service.concurrency, 4);
        assert_eq!(c.store.ingest_concurrency, 2);
        assert_eq!(c.store.backend, StoreBackend::Memory);
        assert_eq!(c.service.session_kind(), SessionKind::Oidc);
    }

    #[test]
    fn test_from_yaml_service() {
        let c = Config::from_yaml(SAMPLE_YAML).unwrap();
        assert_eq!(c.service.port, 9000);
        assert_eq!(c.service.host, "0.0.0.0");
        assert_eq!(
            c.service.refresh_token_lifespan(),
            Duration::from_secs(86400)
        );
        assert_eq!(c.service.session_kind(), SessionKind::OAuth);
    }

    #[test]
    fn test_from_yaml_store_and_redis() {
        let c = Config::from_yaml(SAMPLE_YAML).unwrap();
        assert_eq!(c.store.backend, StoreBackend::Redis);
        assert_eq!(c.store.ingest_concurrency, 8);
        assert_eq!(c.redis.url(), "redis://cache.internal:6379/3");
        assert_eq!(c.redis.events_channel, "refresh_token_created");
    }

    #[test]
    fn test_from_yaml_defaults_applied() {
        let c = Config::from_yaml("service:\n  port: 1234").unwrap();
        assert_eq!(c.service.port, 1234);
        assert_eq!(c.service.host, "127.0.0.1"); // default preserved
        assert_eq!(c.service.access_token_lifespan, 3600);
    }

    #[test]
    fn test_validate_ok() {
        assert!(Config::from_yaml(SAMPLE_YAML).unwrap().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_pool() {
        let mut c = Config::from_yaml(SAMPLE_YAML).unwrap();
        c.service.concurrency = 0;
        let err = c.validate().unwrap_err();
        assert!(err.to_string().contains("service.concurrency"));
    }

    #[test]
    fn test_validate_requires_keys() {
        let err = Config::default().validate().unwrap_err();
        assert!(matches!(err, RefreshError::Config(_)));
    }

    #[test]
    fn test_load_file_then_env() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("config.yaml", SAMPLE_YAML)?;
            jail.set_env("REFRESH_FLOW_SERVICE__PORT", "7000");
            jail.set_env("REFRESH_FLOW_REDIS__EVENTS_CHANNEL", "rt.created");
            let c = Config::load(Some(std::path::Path::new("config.yaml")))?;
            assert_eq!(c.service.port, 7000);
            assert_eq!(c.service.host, "0.0.0.0");
            assert_eq!(c.redis.events_channel, "rt.created");
            Ok(())
        });
    }

    #[test]
    fn test_load_without_file() {
        figment::Jail::expect_with(|_jail| {
            // A missing YAML file contributes nothing.
            let c = Config::load(Some(std::path::Path::new("absent.yaml")))?;
            assert_eq!(c.service.port, 38003);
            Ok(())
        });
    }
}
