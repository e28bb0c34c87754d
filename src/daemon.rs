//! Daemon wiring for the fill monitoring service
//!
//! Builds the telemetry state from configuration and starts the background
//! pieces around it:
//! 1. The poller thread reading every bin's sensor on a fixed interval
//! 2. The optional sink forwarder
//! 3. The HTTP endpoint, which runs in the foreground

use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{info, warn};

use crate::config::ServiceConfig;
use crate::endpoint;
use crate::error::DaemonError;
use crate::poller::{Poller, PollerHandle};
use crate::sink;
use crate::telemetry::Telemetry;

// ---------------------------------------------------------------------------
// Daemon State
// ---------------------------------------------------------------------------

pub struct Daemon {
    config: ServiceConfig,
    telemetry: Arc<Telemetry>,
}

/// Background tasks of a started daemon. Dropping it stops the poller.
pub struct RunningDaemon {
    telemetry: Arc<Telemetry>,
    poller: PollerHandle,
    sink: Option<(u64, JoinHandle<()>)>,
}

impl RunningDaemon {
    /// Stops polling, then lets the sink forwarder drain what it already
    /// received and exit.
    pub fn shutdown(self) {
        self.poller.shutdown();
        if let Some((subscriber, forwarder)) = self.sink {
            self.telemetry.broadcaster().unsubscribe(subscriber);
            if forwarder.join().is_err() {
                warn!("sink forwarder panicked");
            }
        }
    }
}

impl Daemon {
    /// Registers the configured bins. Fails on invalid configuration.
    pub fn new(config: ServiceConfig) -> Result<Self, DaemonError> {
        let telemetry = Arc::new(Telemetry::from_config(&config)?);
        Ok(Self { config, telemetry })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        Arc::clone(&self.telemetry)
    }

    /// Starts the sink forwarder (if configured) and the poller.
    pub fn start(&self) -> Result<RunningDaemon, DaemonError> {
        let sink = match &self.config.sink {
            Some(sink_config) => {
                let sink = sink::open(sink_config)?;
                let subscription = self.telemetry.open_stream();
                let subscriber = subscription.id();
                let handle = sink::spawn_forwarder(subscription, sink)
                    .map_err(|source| DaemonError::Spawn { task: "sink", source })?;
                info!(topic_base = sink_config.topic_base(), "sink forwarding enabled");
                Some((subscriber, handle))
            }
            None => None,
        };

        let poller = Poller::from_config(Arc::clone(&self.telemetry), &self.config)
            .spawn()
            .map_err(|source| DaemonError::Spawn { task: "poller", source })?;

        Ok(RunningDaemon {
            telemetry: Arc::clone(&self.telemetry),
            poller,
            sink,
        })
    }

    /// Starts everything and serves HTTP until the server fails.
    pub fn run(self) -> Result<(), DaemonError> {
        info!(
            bins = self.telemetry.registry().len(),
            poll_interval_secs = self.config.poll_interval_secs,
            alert_threshold = self.config.alert_threshold,
            "starting fill monitor"
        );

        let running = self.start()?;
        let result = endpoint::start_endpoint_server(&self.config.endpoint.bind, self.telemetry());
        if let Err(e) = &result {
            warn!(error = %e, "endpoint stopped, shutting down");
        }
        running.shutdown();
        result.map_err(DaemonError::from)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StreamMessage;
    use std::time::Duration;

    const CONFIG: &str = r#"
        poll_interval_secs = 1
        read_timeout_ms = 100

        [[bin]]
        id = "bin_1"
        name = "Main Gate Bin"
        height_cm = 40.0
        sensor = { kind = "fixed", distance_cm = 10.0 }

        [[bin]]
        id = "bin_2"
        name = "Cafeteria Bin"
        height_cm = 40.0
        sensor = { kind = "fixed", distance_cm = 2.0 }
    "#;

    #[test]
    fn test_daemon_registers_configured_bins() {
        let daemon = Daemon::new(ServiceConfig::from_toml_str(CONFIG).unwrap()).unwrap();
        let bins = daemon.telemetry().query_all();
        assert_eq!(bins.len(), 2);
        assert!(bins.values().all(|bin| bin.level.is_none()));
    }

    #[test]
    fn test_started_daemon_polls_configured_readers() {
        let daemon = Daemon::new(ServiceConfig::from_toml_str(CONFIG).unwrap()).unwrap();
        let mut stream = daemon.telemetry().open_stream();
        let running = daemon.start().unwrap();

        assert!(matches!(stream.recv(), Some(StreamMessage::Snapshot { .. })));
        let mut seen = Vec::new();
        for _ in 0..2 {
            match stream.recv_timeout(Duration::from_secs(2)) {
                Ok(StreamMessage::Update { data }) => seen.push((data.bin_id, data.level, data.is_alert)),
                other => panic!("expected update, got {other:?}"),
            }
        }
        running.shutdown();

        assert_eq!(
            seen,
            vec![
                ("bin_1".to_string(), Some(75.0), false),
                ("bin_2".to_string(), Some(95.0), true),
            ]
        );
    }

    #[test]
    fn test_configured_file_sink_receives_updates() {
        let path = std::env::temp_dir().join(format!("fillmon-daemon-{}.jsonl", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let toml = format!("{CONFIG}\n[sink]\nkind = \"file\"\npath = '{}'\n", path.display());

        let daemon = Daemon::new(ServiceConfig::from_toml_str(&toml).unwrap()).unwrap();
        let mut stream = daemon.telemetry().open_stream();
        let running = daemon.start().unwrap();

        assert!(matches!(stream.recv(), Some(StreamMessage::Snapshot { .. })));
        for _ in 0..2 {
            assert!(matches!(
                stream.recv_timeout(Duration::from_secs(2)),
                Ok(StreamMessage::Update { .. })
            ));
        }
        running.shutdown();

        let contents = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert!(contents.contains("\"topic\":\"smartwaste/bin_1/level\""));
        assert!(contents.contains("\"topic\":\"smartwaste/bin_2/level\""));
    }
}
