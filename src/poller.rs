//! Periodic sensor polling loop.
//!
//! Each cycle reads every bin's sensor concurrently on a worker pool, waits
//! at most `read_timeout` for the whole batch, then records the results in
//! configuration order. A bin whose read fails, panics or misses the deadline
//! is recorded as unknown for that cycle; other bins are unaffected.
//!
//! Because the batch is time-boxed, a cycle never outlasts `read_timeout` by
//! more than the cost of recording, so cycles cannot overlap.
//!
//! Each bin has at most one read in flight. A reader that hangs occupies one
//! worker; while it is still running, its bin is not dispatched again and is
//! recorded as timed out. The pool has one worker per bin, so the remaining
//! bins always find a free worker.

use crossbeam_channel::{RecvTimeoutError, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use threadpool::ThreadPool;
use tracing::{debug, error, info, warn};

use crate::config::ServiceConfig;
use crate::error::SensorError;
use crate::fill::compute_fill;
use crate::model::UpdateEvent;
use crate::sensor::{build_reader, DistanceReader};
use crate::telemetry::Telemetry;

struct PolledBin {
    id: String,
    height_cm: f64,
    reader: Arc<dyn DistanceReader>,
    /// Set while a read for this bin is running on the pool.
    in_flight: Arc<AtomicBool>,
}

pub struct Poller {
    telemetry: Arc<Telemetry>,
    bins: Vec<PolledBin>,
    interval: Duration,
    read_timeout: Duration,
    pool: ThreadPool,
}

impl Poller {
    pub fn new(telemetry: Arc<Telemetry>, interval: Duration, read_timeout: Duration) -> Self {
        Self {
            telemetry,
            bins: Vec::new(),
            interval,
            read_timeout,
            pool: ThreadPool::with_name("sensor-read".to_string(), 1),
        }
    }

    /// Wires every configured bin to the reader its `sensor` entry describes.
    pub fn from_config(telemetry: Arc<Telemetry>, config: &ServiceConfig) -> Self {
        let mut poller = Self::new(telemetry, config.poll_interval(), config.read_timeout());
        for bin in &config.bins {
            let reader = build_reader(&bin.sensor, bin.height_cm);
            poller.add_bin(bin.id.clone(), bin.height_cm, reader);
        }
        poller
    }

    /// Adds a bin to the poll set. Bins are read in the order they are added.
    pub fn add_bin(&mut self, id: impl Into<String>, height_cm: f64, reader: Arc<dyn DistanceReader>) {
        self.bins.push(PolledBin {
            id: id.into(),
            height_cm,
            reader,
            in_flight: Arc::new(AtomicBool::new(false)),
        });
        self.pool.set_num_threads(self.bins.len().max(1));
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs one poll cycle and returns the events it published.
    pub fn poll_once(&self) -> Vec<UpdateEvent> {
        let readings = self.read_all();

        let mut events = Vec::with_capacity(self.bins.len());
        for (bin, reading) in self.bins.iter().zip(readings) {
            let level = match reading {
                Some(Ok(distance)) if distance.is_finite() => Some(compute_fill(distance, bin.height_cm)),
                Some(Ok(distance)) => {
                    warn!(bin = %bin.id, error = %SensorError::InvalidDistance(distance), "sensor read failed");
                    None
                }
                Some(Err(e)) => {
                    warn!(bin = %bin.id, error = %e, "sensor read failed");
                    None
                }
                None => {
                    warn!(bin = %bin.id, error = %SensorError::Timeout(self.read_timeout), "sensor read failed");
                    None
                }
            };

            match self.telemetry.record(&bin.id, level) {
                Ok(event) => {
                    debug!(bin = %event.bin_id, level = ?event.level, alert = event.is_alert, "bin updated");
                    events.push(event);
                }
                Err(e) => error!(bin = %bin.id, error = %e, "failed to record reading"),
            }
        }
        events
    }

    /// Dispatches every read to the pool and collects what arrives before the
    /// cycle deadline. `None` marks a bin that did not answer in time,
    /// including one whose previous read is still running.
    fn read_all(&self) -> Vec<Option<Result<f64, SensorError>>> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut pending = 0;

        for (index, bin) in self.bins.iter().enumerate() {
            if bin.in_flight.swap(true, Ordering::AcqRel) {
                debug!(bin = %bin.id, "previous read still running, skipping");
                continue;
            }
            let reader = Arc::clone(&bin.reader);
            let in_flight = Arc::clone(&bin.in_flight);
            let tx = tx.clone();
            self.pool.execute(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| reader.read()))
                    .unwrap_or_else(|_| Err(SensorError::Unavailable("reader panicked".to_string())));
                in_flight.store(false, Ordering::Release);
                // The cycle may have given up on this bin already.
                let _ = tx.send((index, result));
            });
            pending += 1;
        }
        drop(tx);

        let mut readings: Vec<Option<Result<f64, SensorError>>> =
            self.bins.iter().map(|_| None).collect();
        let deadline = Instant::now() + self.read_timeout;

        while pending > 0 {
            match rx.recv_deadline(deadline) {
                Ok((index, result)) => {
                    if let Some(slot) = readings.get_mut(index) {
                        *slot = Some(result);
                        pending -= 1;
                    }
                }
                Err(_) => break,
            }
        }
        readings
    }

    /// Starts the loop on its own thread.
    ///
    /// The loop polls, then sleeps the full interval, until the returned
    /// handle is shut down or dropped.
    pub fn spawn(self) -> std::io::Result<PollerHandle> {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);

        let thread = thread::Builder::new()
            .name("poller".to_string())
            .spawn(move || {
                info!(
                    bins = self.bins.len(),
                    interval_secs = self.interval.as_secs_f64(),
                    "poller started"
                );
                loop {
                    let events = self.poll_once();
                    debug!(updated = events.len(), "poll cycle complete");

                    match shutdown_rx.recv_timeout(self.interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("poller stopped");
            })?;

        Ok(PollerHandle {
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }
}

/// Owner of a running poller thread.
pub struct PollerHandle {
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// Wakes the loop, stops it and waits for the current cycle to finish.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // Dropping the sender disconnects the loop's sleep.
        drop(self.shutdown.take());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("poller thread panicked");
            }
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
