//! Shared data types for the bin telemetry pipeline.
//!
//! Everything here is plain data: the cached state of one bin, the event
//! emitted when that state changes, and the JSON shapes the endpoint and the
//! event stream serve.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Bin state
// ---------------------------------------------------------------------------

/// A monitored waste container and its latest cached reading.
#[derive(Debug, Clone, PartialEq)]
pub struct Bin {
    /// Stable identifier from configuration, e.g. `bin_1`.
    pub id: String,
    /// Human-readable name shown on dashboards.
    pub name: String,
    /// Distance from the sensor to the bottom of an empty bin, in cm.
    pub height_cm: f64,
    /// Latest fill percentage, `None` when the last reading failed or none
    /// has been taken yet.
    pub level: Option<f64>,
    /// Time of the last known reading. Unknown readings do not advance it.
    pub last_update: Option<DateTime<Utc>>,
    /// True iff `level` is known and at or above the alert threshold.
    pub is_alert: bool,
}

impl Bin {
    /// A freshly registered bin that has never been read.
    pub fn new(id: impl Into<String>, name: impl Into<String>, height_cm: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            height_cm,
            level: None,
            last_update: None,
            is_alert: false,
        }
    }

    /// Projects the cached state into its JSON view.
    pub fn view(&self) -> BinView {
        BinView {
            name: self.name.clone(),
            level: self.level,
            is_alert: self.is_alert,
            last_update: self.last_update,
        }
    }
}

/// Evaluates the alert rule for a fill reading.
pub fn is_alert(level: Option<f64>, threshold: f64) -> bool {
    matches!(level, Some(l) if l >= threshold)
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// One bin's state change, broadcast to every stream subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEvent {
    pub bin_id: String,
    pub name: String,
    pub level: Option<f64>,
    pub is_alert: bool,
    /// When the reading was attempted (Unix seconds on the wire).
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
}

/// A message delivered on an event stream.
///
/// Serializes as `{"type":"snapshot","bins":{..}}` or
/// `{"type":"update","data":{..}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamMessage {
    Snapshot { bins: BTreeMap<String, BinView> },
    Update { data: UpdateEvent },
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// Cached bin state as served by `/api/bins` and stream snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinView {
    pub name: String,
    pub level: Option<f64>,
    pub is_alert: bool,
    /// Fractional Unix seconds, millisecond resolution.
    #[serde(with = "float_seconds_option")]
    pub last_update: Option<DateTime<Utc>>,
}

/// Single-bin response for `/api/level`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelResponse {
    pub bin_id: String,
    #[serde(flatten)]
    pub view: BinView,
}

/// `Option<DateTime<Utc>>` as fractional Unix seconds, e.g. `1700000000.25`.
mod float_seconds_option {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(time) => serializer.serialize_some(&(time.timestamp_millis() as f64 / 1000.0)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        let Some(secs) = Option::<f64>::deserialize(deserializer)? else {
            return Ok(None);
        };
        if !secs.is_finite() {
            return Err(de::Error::custom("timestamp is not a finite number"));
        }
        DateTime::from_timestamp_millis((secs * 1000.0).round() as i64)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("timestamp {secs} out of range")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_alert_rule() {
        assert!(!is_alert(None, 80.0));
        assert!(!is_alert(Some(79.9), 80.0));
        assert!(is_alert(Some(80.0), 80.0));
        assert!(is_alert(Some(95.0), 80.0));
    }

    #[test]
    fn test_new_bin_is_unknown() {
        let bin = Bin::new("bin_1", "Main Gate Bin", 40.0);
        assert_eq!(bin.level, None);
        assert_eq!(bin.last_update, None);
        assert!(!bin.is_alert);
    }

    #[test]
    fn test_update_message_shape() {
        let msg = StreamMessage::Update {
            data: UpdateEvent {
                bin_id: "bin_1".to_string(),
                name: "Main Gate Bin".to_string(),
                level: Some(75.0),
                is_alert: false,
                timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            },
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "update");
        assert_eq!(json["data"]["bin_id"], "bin_1");
        assert_eq!(json["data"]["level"], 75.0);
        assert_eq!(json["data"]["timestamp"], 1_700_000_000);
    }

    #[test]
    fn test_snapshot_message_shape() {
        let mut bins = BTreeMap::new();
        bins.insert("bin_1".to_string(), Bin::new("bin_1", "Main Gate Bin", 40.0).view());

        let json = serde_json::to_value(StreamMessage::Snapshot { bins }).unwrap();
        assert_eq!(json["type"], "snapshot");
        assert_eq!(json["bins"]["bin_1"]["name"], "Main Gate Bin");
        assert!(json["bins"]["bin_1"]["level"].is_null());
        assert!(json["bins"]["bin_1"]["last_update"].is_null());
    }

    #[test]
    fn test_level_response_is_flat() {
        let response = LevelResponse {
            bin_id: "bin_1".to_string(),
            view: Bin::new("bin_1", "Main Gate Bin", 40.0).view(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["bin_id"], "bin_1");
        assert_eq!(json["name"], "Main Gate Bin");
        assert_eq!(json["is_alert"], false);
    }

    #[test]
    fn test_last_update_keeps_sub_second_precision() {
        let mut bin = Bin::new("bin_1", "Main Gate Bin", 40.0);
        bin.last_update = Utc.timestamp_millis_opt(1_700_000_000_250).single();

        let json = serde_json::to_value(bin.view()).unwrap();
        assert_eq!(json["last_update"], 1_700_000_000.25);

        let view: BinView = serde_json::from_value(json).unwrap();
        assert_eq!(view.last_update, bin.last_update);
    }

    #[test]
    fn test_level_response_round_trips_through_flatten() {
        let mut bin = Bin::new("bin_1", "Main Gate Bin", 40.0);
        bin.level = Some(63.5);
        bin.last_update = Utc.timestamp_millis_opt(1_700_000_123_500).single();
        let response = LevelResponse { bin_id: bin.id.clone(), view: bin.view() };

        let text = serde_json::to_string(&response).unwrap();
        assert!(text.contains("\"last_update\":1700000123.5"));
        let parsed: LevelResponse = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, response);
    }
}
