//! Bin configuration loader - parses bins.toml
//!
//! Keeps bin metadata (ids, names, sensor wiring, calibration heights) and
//! global tuning out of the code so a deployment can add bins or adjust the
//! alert threshold without recompiling the service.

use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "bins.toml";

/// Environment variable naming an alternative configuration file.
pub const CONFIG_ENV_VAR: &str = "FILLMON_CONFIG";

// ---------------------------------------------------------------------------
// TOML Configuration Structures
// ---------------------------------------------------------------------------

/// Root configuration, read once at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Seconds to sleep between poll cycles.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Fill percentage at or above which a bin is flagged as full.
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: f64,

    /// Upper bound on one poll cycle's sensor reads, in milliseconds.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Pending messages each stream subscriber may queue before the oldest
    /// are discarded.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Optional outbound sink for update events.
    pub sink: Option<SinkConfig>,

    #[serde(rename = "bin", default)]
    pub bins: Vec<BinConfig>,
}

/// HTTP endpoint settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

/// Outbound sink settings. Every kind publishes to per-bin topics
/// `<topic_base>/<bin_id>/level`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkConfig {
    /// Appends one JSON line per update to `path`.
    File {
        path: PathBuf,
        #[serde(default = "default_topic_base")]
        topic_base: String,
    },
    /// Publishes each update to an MQTT broker with QoS 1.
    Mqtt {
        broker: String,
        #[serde(default = "default_mqtt_port")]
        port: u16,
        #[serde(default = "default_mqtt_client_id")]
        client_id: String,
        #[serde(default = "default_topic_base")]
        topic_base: String,
    },
}

impl SinkConfig {
    pub fn topic_base(&self) -> &str {
        match self {
            SinkConfig::File { topic_base, .. } | SinkConfig::Mqtt { topic_base, .. } => topic_base,
        }
    }
}

/// One monitored bin.
#[derive(Debug, Clone, Deserialize)]
pub struct BinConfig {
    pub id: String,
    pub name: String,
    /// Distance from the sensor to the bottom of the empty bin.
    pub height_cm: f64,
    pub sensor: SensorConfig,
}

/// How to obtain a distance reading for a bin.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SensorConfig {
    /// Random distance between `min_cm` and the bin height.
    Simulated {
        #[serde(default = "default_simulated_min_cm")]
        min_cm: f64,
    },
    /// Decimal distance in cm read from a text file on every poll.
    File { path: PathBuf },
    /// Constant distance.
    Fixed { distance_cm: f64 },
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_alert_threshold() -> f64 {
    80.0
}

fn default_read_timeout_ms() -> u64 {
    1000
}

fn default_subscriber_buffer() -> usize {
    64
}

fn default_bind() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_topic_base() -> String {
    "smartwaste".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_client_id() -> String {
    "smartwaste-pi-1".to_string()
}

fn default_simulated_min_cm() -> f64 {
    2.0
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl ServiceConfig {
    /// Parses and validates configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Rejects configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bins.is_empty() {
            return Err(ConfigError::NoBinsConfigured);
        }

        let mut seen = HashSet::new();
        for bin in &self.bins {
            if !bin.height_cm.is_finite() || bin.height_cm <= 0.0 {
                return Err(ConfigError::InvalidHeight {
                    bin_id: bin.id.clone(),
                    height_cm: bin.height_cm,
                });
            }
            if !seen.insert(bin.id.as_str()) {
                return Err(ConfigError::DuplicateBin(bin.id.clone()));
            }
        }

        if self.poll_interval_secs == 0 {
            return Err(invalid("poll_interval_secs", "must be at least 1 second"));
        }
        if !(0.0..=100.0).contains(&self.alert_threshold) {
            return Err(invalid(
                "alert_threshold",
                format!("must be within 0..=100, got {}", self.alert_threshold),
            ));
        }
        if self.read_timeout_ms == 0 {
            return Err(invalid("read_timeout_ms", "must be positive"));
        }
        if self.subscriber_buffer == 0 {
            return Err(invalid("subscriber_buffer", "must be positive"));
        }
        if let Some(sink) = &self.sink {
            validate_sink(sink)?;
        }

        Ok(())
    }
}

fn validate_sink(sink: &SinkConfig) -> Result<(), ConfigError> {
    match sink {
        SinkConfig::File { .. } => Ok(()),
        #[cfg(not(feature = "mqtt"))]
        SinkConfig::Mqtt { .. } => Err(invalid("sink.kind", "built without the `mqtt` feature")),
        #[cfg(feature = "mqtt")]
        SinkConfig::Mqtt { broker, client_id, .. } => {
            if broker.trim().is_empty() {
                return Err(invalid("sink.broker", "must not be empty"));
            }
            if client_id.is_empty() {
                return Err(invalid("sink.client_id", "must not be empty"));
            }
            Ok(())
        }
    }
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidSetting {
        name,
        reason: reason.into(),
    }
}

/// Resolves which configuration file to read.
///
/// An explicit path wins, then `FILLMON_CONFIG` (a `.env` file is honoured),
/// then `bins.toml` in the working directory.
pub fn resolve_config_path(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }
    dotenv::dotenv().ok();
    env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}
