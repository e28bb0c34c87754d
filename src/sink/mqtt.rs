//! MQTT publishing of level updates.
//!
//! Each update is published with QoS 1 to `<topic_base>/<bin_id>/level` as
//! the JSON body `{"level": .., "timestamp": ..}`. The broker connection is
//! driven on its own thread and reconnects after failures; publishes made
//! while the broker is away queue in the client up to its request capacity,
//! after which they fail and the forwarder logs and skips them.

use rumqttc::{Client, Connection, Event, MqttOptions, Packet, QoS};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{level_topic, LevelPayload, LevelSink};
use crate::error::SinkError;

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const REQUEST_CAPACITY: usize = 64;

pub struct MqttSink {
    client: Client,
    topic_base: String,
}

impl MqttSink {
    /// Connects to `broker:port` as `client_id` and starts the connection
    /// thread. The connection itself is established in the background.
    pub fn connect(
        broker: &str,
        port: u16,
        client_id: &str,
        topic_base: impl Into<String>,
    ) -> Result<Self, SinkError> {
        let mut options = MqttOptions::new(client_id, broker, port);
        options.set_keep_alive(KEEP_ALIVE);
        let (client, connection) = Client::new(options, REQUEST_CAPACITY);

        let broker = format!("{broker}:{port}");
        thread::Builder::new()
            .name("mqtt".to_string())
            .spawn(move || drive(connection, &broker))?;

        Ok(Self::with_client(client, topic_base))
    }

    /// Wraps an existing client. The caller drives its connection.
    pub fn with_client(client: Client, topic_base: impl Into<String>) -> Self {
        Self {
            client,
            topic_base: topic_base.into(),
        }
    }
}

impl LevelSink for MqttSink {
    fn publish(&mut self, bin_id: &str, payload: &LevelPayload) -> Result<(), SinkError> {
        let body = serde_json::to_vec(payload)?;
        self.client
            .try_publish(level_topic(&self.topic_base, bin_id), QoS::AtLeastOnce, false, body)
            .map_err(|e| SinkError::Mqtt(e.to_string()))
    }
}

/// Runs the connection event loop until every client handle is dropped.
fn drive(mut connection: Connection, broker: &str) {
    for notification in connection.iter() {
        match notification {
            Ok(Event::Incoming(Packet::ConnAck(_))) => info!(broker, "connected to MQTT broker"),
            Ok(event) => debug!(?event, "mqtt event"),
            Err(e) => {
                warn!(broker, error = %e, "mqtt connection failed, retrying");
                thread::sleep(RECONNECT_DELAY);
            }
        }
    }
    debug!(broker, "mqtt connection closed");
}
