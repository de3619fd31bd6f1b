//! Broker configuration
//!
//! Host processes construct the broker from a [`BrokerConfig`], either
//! programmatically or from a YAML document:
//!
//! ```yaml
//! pool:
//!   max_idle_secs: 300
//!   health_check_interval_secs: 30
//! ```
//!
//! The network timeouts of the query path are protocol constants, not
//! configuration: both tunnel handshakes and the driver connect are bounded
//! at 10 seconds each.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{BrokerError, Result};

/// Timeout for the relay TLS handshake (TCP connect included).
pub const RELAY_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the gateway TLS handshake nested in the relay stream.
pub const GATEWAY_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for a driver-level database connect.
pub const DRIVER_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default port for the relay when `relayHost` carries none.
pub const DEFAULT_RELAY_PORT: u16 = 8443;

/// Top-level broker configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BrokerConfig {
    /// Direct connection pool settings.
    #[serde(default)]
    pub pool: PoolConfig,
}

/// Settings for the direct connection pool.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Idle time after which a pooled connection is evicted.
    #[serde(default = "default_max_idle_secs")]
    pub max_idle_secs: u64,

    /// Interval between sweeper runs.
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
}

fn default_max_idle_secs() -> u64 {
    300
}

fn default_health_check_interval_secs() -> u64 {
    30
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_secs: default_max_idle_secs(),
            health_check_interval_secs: default_health_check_interval_secs(),
        }
    }
}

impl PoolConfig {
    /// Idle eviction threshold as a [`Duration`].
    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }

    /// Sweeper interval as a [`Duration`].
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }
}

impl BrokerConfig {
    /// Parse a configuration from YAML.
    pub fn from_yaml(input: &str) -> Result<Self> {
        let config: BrokerConfig = serde_yaml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.pool.max_idle_secs == 0 {
            return Err(BrokerError::Config(
                "pool.max_idle_secs must be greater than zero".to_string(),
            ));
        }
        if self.pool.health_check_interval_secs == 0 {
            return Err(BrokerError::Config(
                "pool.health_check_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
