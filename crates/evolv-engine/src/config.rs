//! # Engine Configuration
//!
//! Everything deployment-specific: where the database lives, how to reach the
//! payment gateway and the carrier, retry and sweeper timings. Business rules
//! such as the tax rate and payment window are compile-time constants in
//! `evolv-core` and cannot be configured.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                            │
//! │     EVOLV_DATABASE_PATH=/var/lib/evolv/storefront.db                    │
//! │     EVOLV_GATEWAY_KEY_SECRET=...                                        │
//! │                                                                         │
//! │  2. TOML Config File                                                    │
//! │     ~/.config/evolv-storefront/engine.toml (Linux)                      │
//! │     ~/Library/Application Support/in.evolv.storefront/engine.toml       │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [server]
//! bind_addr = "0.0.0.0"
//! port = 8080
//!
//! [database]
//! path = "/var/lib/evolv/storefront.db"
//! max_connections = 5
//!
//! [gateway]
//! base_url = "https://api.razorpay.com/v1"
//! key_id = "rzp_live_xxx"
//! key_secret = "..."
//! webhook_secret = "..."
//!
//! [carrier]
//! base_url = "https://apiv2.shiprocket.in/v1/external"
//! api_token = "..."
//! webhook_secret = "..."
//!
//! [retry]
//! max_attempts = 4
//! initial_backoff_ms = 500
//! max_backoff_secs = 30
//! give_up_after = 12
//!
//! [sweeper]
//! interval_secs = 60
//! batch_size = 100
//! stale_after_mins = 360
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};

// =============================================================================
// Server Settings
// =============================================================================

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// JSON product catalogue loaded at startup. When unset the catalogue
    /// starts empty and every checkout fails with product-not-found.
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            bind_addr: default_bind_addr(),
            port: default_port(),
            catalog_path: None,
        }
    }
}

impl ServerSettings {
    /// Returns the full bind address.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

// =============================================================================
// Database Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Defaults to the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: None,
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseSettings {
    /// Configured path, or `storefront.db` in the platform data directory.
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("in", "evolv", "storefront")
                .map(|dirs| dirs.data_dir().join("storefront.db"))
                .unwrap_or_else(|| PathBuf::from("storefront.db"))
        })
    }
}

// =============================================================================
// Collaborator Settings
// =============================================================================

/// Payment gateway credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    #[serde(default = "default_gateway_url")]
    pub base_url: String,

    /// Public key id, handed to the browser checkout widget.
    #[serde(default)]
    pub key_id: String,

    /// Signs payment callbacks (`order_id|payment_id`).
    #[serde(default)]
    pub key_secret: String,

    /// Signs server-to-server webhooks.
    #[serde(default)]
    pub webhook_secret: String,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_gateway_url() -> String {
    "https://api.razorpay.com/v1".to_string()
}

fn default_timeout() -> u64 {
    10
}

impl Default for GatewaySettings {
    fn default() -> Self {
        GatewaySettings {
            base_url: default_gateway_url(),
            key_id: String::new(),
            key_secret: String::new(),
            webhook_secret: String::new(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Shipment carrier credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarrierSettings {
    #[serde(default = "default_carrier_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_token: String,

    #[serde(default)]
    pub webhook_secret: String,

    /// Warehouse pickup location name registered with the carrier.
    #[serde(default = "default_pickup_location")]
    pub pickup_location: String,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_carrier_url() -> String {
    "https://apiv2.shiprocket.in/v1/external".to_string()
}

fn default_pickup_location() -> String {
    "Primary".to_string()
}

impl Default for CarrierSettings {
    fn default() -> Self {
        CarrierSettings {
            base_url: default_carrier_url(),
            api_token: String::new(),
            webhook_secret: String::new(),
            pickup_location: default_pickup_location(),
            timeout_secs: default_timeout(),
        }
    }
}

// =============================================================================
// Retry Settings
// =============================================================================

/// Backoff for gateway, carrier and refund calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Attempts per round before the order is parked as retry-pending.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Total attempts across sweeper rounds before an operator is paged.
    #[serde(default = "default_give_up_after")]
    pub give_up_after: u32,
}

fn default_max_attempts() -> u32 {
    4
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    30
}
fn default_give_up_after() -> u32 {
    12
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            give_up_after: default_give_up_after(),
        }
    }
}

// =============================================================================
// Sweeper Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Orders handled per pass of each job.
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,

    /// In-transit orders untouched this long get a carrier tracking poll.
    #[serde(default = "default_stale_after")]
    pub stale_after_mins: i64,

    /// Parked shipments are retried once they have waited this long.
    #[serde(default = "default_shipment_retry_after")]
    pub shipment_retry_after_secs: i64,
}

fn default_true() -> bool {
    true
}
fn default_interval() -> u64 {
    60
}
fn default_batch_size() -> i64 {
    100
}
fn default_stale_after() -> i64 {
    360
}
fn default_shipment_retry_after() -> i64 {
    300
}

impl Default for SweeperSettings {
    fn default() -> Self {
        SweeperSettings {
            enabled: true,
            interval_secs: default_interval(),
            batch_size: default_batch_size(),
            stale_after_mins: default_stale_after(),
            shipment_retry_after_secs: default_shipment_retry_after(),
        }
    }
}

// =============================================================================
// Main Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub gateway: GatewaySettings,

    #[serde(default)]
    pub carrier: CarrierSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub sweeper: SweeperSettings,
}

impl EngineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (engine.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> EngineResult<()> {
        for (name, url) in [
            ("gateway.base_url", &self.gateway.base_url),
            ("carrier.base_url", &self.carrier.base_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(EngineError::Config(format!(
                    "{name} must start with http:// or https://, got: {url}"
                )));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(EngineError::Config(
                "retry.max_attempts must be greater than 0".into(),
            ));
        }
        if self.retry.give_up_after < self.retry.max_attempts {
            return Err(EngineError::Config(
                "retry.give_up_after must be at least retry.max_attempts".into(),
            ));
        }
        if self.sweeper.interval_secs == 0 || self.sweeper.batch_size <= 0 {
            return Err(EngineError::Config(
                "sweeper.interval_secs and sweeper.batch_size must be greater than 0".into(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(EngineError::Config(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if self.gateway.key_secret.is_empty() {
            warn!("gateway.key_secret is empty, every payment callback will fail verification");
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("EVOLV_BIND_ADDR") {
            self.server.bind_addr = addr;
        }

        if let Ok(port) = std::env::var("EVOLV_PORT") {
            if let Ok(p) = port.parse::<u16>() {
                debug!(port = p, "Overriding port from environment");
                self.server.port = p;
            }
        }

        if let Ok(path) = std::env::var("EVOLV_CATALOG_PATH") {
            self.server.catalog_path = Some(PathBuf::from(path));
        }

        if let Ok(path) = std::env::var("EVOLV_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = Some(PathBuf::from(path));
        }

        if let Ok(url) = std::env::var("EVOLV_GATEWAY_URL") {
            debug!(url = %url, "Overriding gateway URL from environment");
            self.gateway.base_url = url;
        }

        if let Ok(key) = std::env::var("EVOLV_GATEWAY_KEY_ID") {
            self.gateway.key_id = key;
        }

        if let Ok(secret) = std::env::var("EVOLV_GATEWAY_KEY_SECRET") {
            self.gateway.key_secret = secret;
        }

        if let Ok(secret) = std::env::var("EVOLV_GATEWAY_WEBHOOK_SECRET") {
            self.gateway.webhook_secret = secret;
        }

        if let Ok(url) = std::env::var("EVOLV_CARRIER_URL") {
            debug!(url = %url, "Overriding carrier URL from environment");
            self.carrier.base_url = url;
        }

        if let Ok(token) = std::env::var("EVOLV_CARRIER_TOKEN") {
            self.carrier.api_token = token;
        }

        if let Ok(secret) = std::env::var("EVOLV_CARRIER_WEBHOOK_SECRET") {
            self.carrier.webhook_secret = secret;
        }

        if let Ok(interval) = std::env::var("EVOLV_SWEEPER_INTERVAL_SECS") {
            match interval.parse::<u64>() {
                Ok(secs) => self.sweeper.interval_secs = secs,
                Err(_) => warn!(value = %interval, "Ignoring invalid EVOLV_SWEEPER_INTERVAL_SECS"),
            }
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("in", "evolv", "storefront")
            .map(|dirs| dirs.config_dir().join("engine.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweeper.interval_secs)
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway.timeout_secs)
    }

    pub fn carrier_timeout(&self) -> Duration {
        Duration::from_secs(self.carrier.timeout_secs)
    }
}
