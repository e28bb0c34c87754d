//! In-memory bin registry.
//!
//! Holds the fixed set of configured bins and their latest cached reading.
//! Bins are registered once at construction; there is no runtime add/remove.
//! Each bin sits behind its own lock so a reader never observes a
//! half-written update, while updates to different bins do not contend.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::error::{ConfigError, TelemetryError};
use crate::model::{is_alert, Bin, UpdateEvent};

pub struct BinRegistry {
    bins: Vec<Mutex<Bin>>,
    index: HashMap<String, usize>,
    alert_threshold: f64,
}

impl BinRegistry {
    /// Registers `bins` in the given order.
    ///
    /// Fails on an empty list, a non-positive or non-finite height, or a
    /// repeated id.
    pub fn new(bins: Vec<Bin>, alert_threshold: f64) -> Result<Self, ConfigError> {
        if bins.is_empty() {
            return Err(ConfigError::NoBinsConfigured);
        }

        let mut index = HashMap::with_capacity(bins.len());
        for (position, bin) in bins.iter().enumerate() {
            if !bin.height_cm.is_finite() || bin.height_cm <= 0.0 {
                return Err(ConfigError::InvalidHeight {
                    bin_id: bin.id.clone(),
                    height_cm: bin.height_cm,
                });
            }
            if index.insert(bin.id.clone(), position).is_some() {
                return Err(ConfigError::DuplicateBin(bin.id.clone()));
            }
        }

        Ok(Self {
            bins: bins.into_iter().map(Mutex::new).collect(),
            index,
            alert_threshold,
        })
    }

    pub fn alert_threshold(&self) -> f64 {
        self.alert_threshold
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn contains(&self, bin_id: &str) -> bool {
        self.index.contains_key(bin_id)
    }

    /// Returns a copy of one bin's current state.
    pub fn get(&self, bin_id: &str) -> Result<Bin, TelemetryError> {
        Ok(self.slot(bin_id)?.lock().clone())
    }

    /// Returns a copy of every bin, in configuration order.
    pub fn get_all(&self) -> Vec<Bin> {
        self.bins.iter().map(|bin| bin.lock().clone()).collect()
    }

    /// The first configured bin.
    pub fn first(&self) -> Option<Bin> {
        self.bins.first().map(|bin| bin.lock().clone())
    }

    /// Overwrites a bin's cached reading and returns the resulting event.
    ///
    /// A `None` level clears the alert but leaves `last_update` at the time of
    /// the last known reading, so clients can tell how stale the bin is. The
    /// event itself is stamped with `timestamp`.
    pub fn update(
        &self,
        bin_id: &str,
        level: Option<f64>,
        timestamp: DateTime<Utc>,
    ) -> Result<UpdateEvent, TelemetryError> {
        let mut bin = self.slot(bin_id)?.lock();

        bin.level = level;
        bin.is_alert = is_alert(level, self.alert_threshold);
        if level.is_some() {
            bin.last_update = Some(timestamp);
        }

        Ok(UpdateEvent {
            bin_id: bin.id.clone(),
            name: bin.name.clone(),
            level: bin.level,
            is_alert: bin.is_alert,
            timestamp,
        })
    }

    fn slot(&self, bin_id: &str) -> Result<&Mutex<Bin>, TelemetryError> {
        self.index
            .get(bin_id)
            .and_then(|&position| self.bins.get(position))
            .ok_or_else(|| TelemetryError::UnknownBin(bin_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;
    use std::thread;

    fn registry() -> BinRegistry {
        BinRegistry::new(
            vec![
                Bin::new("bin_1", "Main Gate Bin", 40.0),
                Bin::new("bin_2", "Cafeteria Bin", 60.0),
            ],
            80.0,
        )
        .unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_preserves_configuration_order() {
        let ids: Vec<String> = registry().get_all().into_iter().map(|b| b.id).collect();
        assert_eq!(ids, vec!["bin_1", "bin_2"]);
    }

    #[test]
    fn test_rejects_empty() {
        assert!(matches!(BinRegistry::new(vec![], 80.0), Err(ConfigError::NoBinsConfigured)));
    }

    #[test]
    fn test_rejects_bad_height() {
        let result = BinRegistry::new(vec![Bin::new("bin_1", "Bin", -1.0)], 80.0);
        assert!(matches!(result, Err(ConfigError::InvalidHeight { .. })));
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let result = BinRegistry::new(
            vec![Bin::new("bin_1", "A", 40.0), Bin::new("bin_1", "B", 40.0)],
            80.0,
        );
        assert!(matches!(result, Err(ConfigError::DuplicateBin(_))));
    }

    #[test]
    fn test_unknown_bin() {
        let registry = registry();
        assert_eq!(
            registry.get("bin_9"),
            Err(TelemetryError::UnknownBin("bin_9".to_string()))
        );
        assert!(registry.update("bin_9", Some(10.0), at(0)).is_err());
    }

    #[test]
    fn test_update_sets_alert_flag() {
        let registry = registry();

        let event = registry.update("bin_1", Some(75.0), at(100)).unwrap();
        assert!(!event.is_alert);

        let event = registry.update("bin_1", Some(95.0), at(200)).unwrap();
        assert!(event.is_alert);
        assert_eq!(event.name, "Main Gate Bin");

        let bin = registry.get("bin_1").unwrap();
        assert_eq!(bin.level, Some(95.0));
        assert!(bin.is_alert);
        assert_eq!(bin.last_update, Some(at(200)));
    }

    #[test]
    fn test_alert_invariant_over_levels() {
        let registry = registry();
        for level in [None, Some(0.0), Some(79.9), Some(80.0), Some(100.0)] {
            let event = registry.update("bin_2", level, at(1)).unwrap();
            let expected = level.is_some_and(|l| l >= 80.0);
            assert_eq!(event.is_alert, expected, "level {level:?}");
            assert_eq!(registry.get("bin_2").unwrap().is_alert, expected);
        }
    }

    #[test]
    fn test_unknown_reading_keeps_last_update() {
        let registry = registry();
        registry.update("bin_1", Some(95.0), at(100)).unwrap();

        let later = at(100) + Duration::seconds(5);
        let event = registry.update("bin_1", None, later).unwrap();

        assert_eq!(event.level, None);
        assert!(!event.is_alert);
        assert_eq!(event.timestamp, later);

        let bin = registry.get("bin_1").unwrap();
        assert_eq!(bin.level, None);
        assert!(!bin.is_alert);
        assert_eq!(bin.last_update, Some(at(100)));
    }

    #[test]
    fn test_reads_are_idempotent() {
        let registry = registry();
        registry.update("bin_1", Some(42.0), at(10)).unwrap();
        assert_eq!(registry.get_all(), registry.get_all());
        assert_eq!(registry.first(), registry.first());
    }

    #[test]
    fn test_concurrent_readers_see_whole_updates() {
        let registry = Arc::new(registry());

        let writer = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for i in 0..500 {
                    let level = if i % 2 == 0 { Some(90.0) } else { None };
                    registry.update("bin_1", level, at(i)).unwrap();
                }
            })
        };

        for _ in 0..500 {
            let bin = registry.get("bin_1").unwrap();
            assert_eq!(bin.is_alert, bin.level.is_some_and(|l| l >= 80.0));
        }
        writer.join().unwrap();
    }
}
