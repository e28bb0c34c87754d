//! Outbound forwarding of level updates.
//!
//! A sink receives `(bin_id, {level, timestamp})` for every update. It runs
//! behind its own broadcaster subscription on a dedicated thread, so a slow
//! sink only ever loses its own oldest events and never holds up the poller.
//!
//! Two sinks are provided: [`JsonLinesSink`] appending to a file, and
//! [`mqtt::MqttSink`] publishing to a broker (behind the `mqtt` feature).

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

use crate::broadcast::Subscription;
use crate::config::SinkConfig;
use crate::error::SinkError;
use crate::model::StreamMessage;

#[cfg(feature = "mqtt")]
pub mod mqtt;

/// Body forwarded for one update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelPayload {
    pub level: Option<f64>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
}

pub trait LevelSink: Send {
    fn publish(&mut self, bin_id: &str, payload: &LevelPayload) -> Result<(), SinkError>;
}

impl<S: LevelSink + ?Sized> LevelSink for Box<S> {
    fn publish(&mut self, bin_id: &str, payload: &LevelPayload) -> Result<(), SinkError> {
        (**self).publish(bin_id, payload)
    }
}

/// Per-bin topic, `<topic_base>/<bin_id>/level`.
pub fn level_topic(topic_base: &str, bin_id: &str) -> String {
    format!("{topic_base}/{bin_id}/level")
}

/// Builds the sink described by `config`.
pub fn open(config: &SinkConfig) -> Result<Box<dyn LevelSink>, SinkError> {
    match config {
        SinkConfig::File { path, topic_base } => {
            Ok(Box::new(JsonLinesSink::append_to(path, topic_base.clone())?))
        }
        #[cfg(feature = "mqtt")]
        SinkConfig::Mqtt {
            broker,
            port,
            client_id,
            topic_base,
        } => Ok(Box::new(mqtt::MqttSink::connect(broker, *port, client_id, topic_base.clone())?)),
        #[cfg(not(feature = "mqtt"))]
        SinkConfig::Mqtt { .. } => Err(SinkError::Unsupported("mqtt")),
    }
}

// ---------------------------------------------------------------------------
// JSON lines
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct Envelope<'a> {
    topic: String,
    payload: &'a LevelPayload,
}

/// Writes one `{"topic": "<base>/<bin_id>/level", "payload": {..}}` line per
/// update. Lines are flushed as they are written so a tailing process sees
/// them immediately.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
    topic_base: String,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W, topic_base: impl Into<String>) -> Self {
        Self {
            writer,
            topic_base: topic_base.into(),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonLinesSink<BufWriter<File>> {
    /// Appends to `path`, creating it if needed.
    pub fn append_to(path: &Path, topic_base: impl Into<String>) -> Result<Self, SinkError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(BufWriter::new(file), topic_base))
    }
}

impl<W: Write + Send> LevelSink for JsonLinesSink<W> {
    fn publish(&mut self, bin_id: &str, payload: &LevelPayload) -> Result<(), SinkError> {
        let envelope = Envelope {
            topic: level_topic(&self.topic_base, bin_id),
            payload,
        };
        serde_json::to_writer(&mut self.writer, &envelope)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Forwarding
// ---------------------------------------------------------------------------

/// Pushes every update from `subscription` into `sink` until the
/// subscription closes. Sink errors are logged and the event skipped.
pub fn forward<S: LevelSink>(mut subscription: Subscription, sink: &mut S) -> usize {
    let mut forwarded = 0;
    while let Some(message) = subscription.recv() {
        let StreamMessage::Update { data } = message else {
            continue;
        };
        let payload = LevelPayload {
            level: data.level,
            timestamp: data.timestamp,
        };
        match sink.publish(&data.bin_id, &payload) {
            Ok(()) => forwarded += 1,
            Err(e) => warn!(bin = %data.bin_id, error = %e, "sink publish failed"),
        }
    }
    forwarded
}

/// Runs [`forward`] on a named background thread.
pub fn spawn_forwarder<S>(subscription: Subscription, mut sink: S) -> std::io::Result<JoinHandle<()>>
where
    S: LevelSink + 'static,
{
    thread::Builder::new().name("sink".to_string()).spawn(move || {
        let forwarded = forward(subscription, &mut sink);
        info!(forwarded, "sink forwarder stopped");
    })
}
