//! Query/subscribe façade over the bin registry and event broadcaster.
//!
//! [`Telemetry`] is the single owned state object of the pipeline. The poller
//! writes through [`Telemetry::record`], the HTTP layer reads through the
//! query methods and subscribes through [`Telemetry::open_stream`].

use chrono::Utc;
use std::collections::BTreeMap;

use crate::broadcast::{Broadcaster, Subscription};
use crate::config::ServiceConfig;
use crate::error::{ConfigError, TelemetryError};
use crate::model::{Bin, BinView, LevelResponse, UpdateEvent};
use crate::registry::BinRegistry;

pub struct Telemetry {
    registry: BinRegistry,
    broadcaster: Broadcaster,
}

impl Telemetry {
    pub fn new(registry: BinRegistry, broadcaster: Broadcaster) -> Self {
        Self {
            registry,
            broadcaster,
        }
    }

    /// Registers the configured bins with no readings yet.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, ConfigError> {
        let bins = config
            .bins
            .iter()
            .map(|bin| Bin::new(bin.id.clone(), bin.name.clone(), bin.height_cm))
            .collect();
        let registry = BinRegistry::new(bins, config.alert_threshold)?;
        Ok(Self::new(registry, Broadcaster::new(config.subscriber_buffer)))
    }

    pub fn registry(&self) -> &BinRegistry {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// The first configured bin.
    pub fn query_single(&self) -> Result<LevelResponse, TelemetryError> {
        let bin = self.registry.first().ok_or(TelemetryError::NoBinsConfigured)?;
        Ok(LevelResponse {
            bin_id: bin.id.clone(),
            view: bin.view(),
        })
    }

    /// Every bin keyed by id.
    pub fn query_all(&self) -> BTreeMap<String, BinView> {
        self.registry
            .get_all()
            .into_iter()
            .map(|bin| {
                let view = bin.view();
                (bin.id, view)
            })
            .collect()
    }

    /// Subscribes to updates. The first message is a snapshot of every bin,
    /// taken so that no update published after it is missed.
    pub fn open_stream(&self) -> Subscription {
        self.broadcaster.subscribe_with(|| self.query_all())
    }

    /// Stores a reading and publishes the resulting event.
    ///
    /// Shared by the poller and manual overrides. Writers are serialized so
    /// per-bin event order matches the order the registry was updated in.
    pub fn record(&self, bin_id: &str, level: Option<f64>) -> Result<UpdateEvent, TelemetryError> {
        self.broadcaster
            .publish_with(|| self.registry.update(bin_id, level, Utc::now()))
    }

    /// Manual override: sets a bin's level as if it had been measured.
    ///
    /// The level is stored as given, without clamping, but must be finite.
    pub fn simulate(&self, bin_id: &str, level: f64) -> Result<UpdateEvent, TelemetryError> {
        if !self.registry.contains(bin_id) {
            return Err(TelemetryError::UnknownBin(bin_id.to_string()));
        }
        if !level.is_finite() {
            return Err(TelemetryError::InvalidLevel(level));
        }
        self.record(bin_id, Some(level))
    }
}
