//! Error types for the telemetry pipeline and its collaborators.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the query/subscribe façade and the bin registry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TelemetryError {
    /// The referenced bin id is not registered.
    #[error("unknown bin id: {0}")]
    UnknownBin(String),
    /// A single-bin query was made against an empty registry.
    #[error("no bins configured")]
    NoBinsConfigured,
    /// A manual override level was NaN or infinite.
    #[error("invalid level: {0}")]
    InvalidLevel(f64),
}

/// Startup configuration errors. All of these are fatal.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("no bins configured")]
    NoBinsConfigured,
    #[error("bin {bin_id}: calibration height must be positive, got {height_cm}")]
    InvalidHeight { bin_id: String, height_cm: f64 },
    #[error("bin id {0} is configured more than once")]
    DuplicateBin(String),
    #[error("invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
}

/// A failed distance reading. Recovered locally by the poller as an unknown
/// level for that bin and cycle.
#[derive(Error, Debug)]
pub enum SensorError {
    #[error("sensor i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("unreadable sensor value {0:?}")]
    Parse(String),
    #[error("sensor returned non-finite distance {0}")]
    InvalidDistance(f64),
    #[error("sensor did not answer within {0:?}")]
    Timeout(std::time::Duration),
    #[error("sensor unavailable: {0}")]
    Unavailable(String),
}

/// HTTP endpoint failures.
#[derive(Error, Debug)]
pub enum EndpointError {
    #[error("failed to start HTTP server on {addr}: {reason}")]
    Bind { addr: String, reason: String },
}

/// Outbound sink failures. Logged by the forwarder, never propagated into the
/// pipeline.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("sink i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("mqtt publish failed: {0}")]
    Mqtt(String),
    #[error("{0} sink support is not compiled in")]
    Unsupported(&'static str),
}

/// Failures bringing the daemon up.
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to open sink: {0}")]
    Sink(#[from] SinkError),
    #[error("failed to spawn {task} thread: {source}")]
    Spawn {
        task: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
}
