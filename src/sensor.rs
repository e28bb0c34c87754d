//! Distance readers.
//!
//! The poller only knows the [`DistanceReader`] contract: return a distance
//! in centimetres or fail. How the value is obtained is up to the reader.

use rand::Rng;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::SensorConfig;
use crate::error::SensorError;

/// A source of raw distance measurements for one bin.
///
/// Implementations should return promptly; the poller bounds each cycle and
/// records readers that miss the deadline as unknown.
pub trait DistanceReader: Send + Sync {
    fn read(&self) -> Result<f64, SensorError>;
}

impl<F> DistanceReader for F
where
    F: Fn() -> Result<f64, SensorError> + Send + Sync,
{
    fn read(&self) -> Result<f64, SensorError> {
        self()
    }
}

/// Builds the reader described by a bin's sensor configuration.
pub fn build_reader(config: &SensorConfig, height_cm: f64) -> Arc<dyn DistanceReader> {
    match config {
        SensorConfig::Simulated { min_cm } => Arc::new(SimulatedReader::new(*min_cm, height_cm)),
        SensorConfig::File { path } => Arc::new(FileReader::new(path.clone())),
        SensorConfig::Fixed { distance_cm } => Arc::new(FixedReader(*distance_cm)),
    }
}

// ---------------------------------------------------------------------------
// Simulated
// ---------------------------------------------------------------------------

/// Uniformly random distance between `min_cm` and `max_cm`, for running
/// without hardware.
#[derive(Debug, Clone)]
pub struct SimulatedReader {
    min_cm: f64,
    max_cm: f64,
}

impl SimulatedReader {
    pub fn new(min_cm: f64, max_cm: f64) -> Self {
        let min_cm = min_cm.max(0.0).min(max_cm);
        Self { min_cm, max_cm }
    }
}

impl DistanceReader for SimulatedReader {
    fn read(&self) -> Result<f64, SensorError> {
        if self.min_cm >= self.max_cm {
            return Ok(self.max_cm);
        }
        Ok(rand::rng().random_range(self.min_cm..=self.max_cm))
    }
}

// ---------------------------------------------------------------------------
// File
// ---------------------------------------------------------------------------

/// Reads a decimal distance in cm from a text file, such as a sysfs
/// attribute or a value dropped by an external driver process.
#[derive(Debug, Clone)]
pub struct FileReader {
    path: PathBuf,
}

impl FileReader {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl DistanceReader for FileReader {
    fn read(&self) -> Result<f64, SensorError> {
        let contents = fs::read_to_string(&self.path)?;
        let trimmed = contents.trim();
        trimmed
            .parse::<f64>()
            .map_err(|_| SensorError::Parse(trimmed.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Fixed
// ---------------------------------------------------------------------------

/// Always reports the same distance.
#[derive(Debug, Clone, Copy)]
pub struct FixedReader(pub f64);

impl DistanceReader for FixedReader {
    fn read(&self) -> Result<f64, SensorError> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::process;

    fn scratch_file(name: &str, contents: &str) -> PathBuf {
        let path = env::temp_dir().join(format!("fillmon-{}-{name}", process::id()));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_simulated_stays_in_range() {
        let reader = SimulatedReader::new(2.0, 40.0);
        for _ in 0..1_000 {
            let distance = reader.read().unwrap();
            assert!((2.0..=40.0).contains(&distance));
        }
    }

    #[test]
    fn test_simulated_degenerate_range() {
        let reader = SimulatedReader::new(50.0, 40.0);
        assert_eq!(reader.read().unwrap(), 40.0);
    }

    #[test]
    fn test_file_reader_parses_trimmed_value() {
        let path = scratch_file("ok", "12.5\n");
        assert_eq!(FileReader::new(path.clone()).read().unwrap(), 12.5);
        fs::remove_file(path).ok();
    }

    #[test]
    fn test_file_reader_rejects_garbage() {
        let path = scratch_file("garbage", "n/a");
        let err = FileReader::new(path.clone()).read().unwrap_err();
        assert!(matches!(err, SensorError::Parse(value) if value == "n/a"));
        fs::remove_file(path).ok();
    }

    #[test]
    fn test_file_reader_missing_file_is_io_error() {
        let reader = FileReader::new(PathBuf::from("/nonexistent/fillmon/distance"));
        assert!(matches!(reader.read(), Err(SensorError::Io(_))));
    }

    #[test]
    fn test_closure_reader() {
        let reader = || -> Result<f64, SensorError> { Err(SensorError::Unavailable("unplugged".to_string())) };
        assert!(reader.read().is_err());
    }

    #[test]
    fn test_build_reader_from_config() {
        let reader = build_reader(&SensorConfig::Fixed { distance_cm: 10.0 }, 40.0);
        assert_eq!(reader.read().unwrap(), 10.0);
    }
}
