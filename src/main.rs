//! Waste Bin Fill Monitoring Service - Main Daemon
//!
//! A daemon that continuously:
//! 1. Reads each configured bin's distance sensor on a fixed interval
//! 2. Converts readings to fill percentages and flags full bins
//! 3. Serves the latest levels over HTTP and pushes updates as server-sent events
//! 4. Optionally forwards every update to an outbound sink
//!
//! Usage:
//!   cargo run --release                              # bins.toml in the working directory
//!   cargo run --release -- --config /etc/bins.toml   # explicit configuration file
//!   cargo run --release -- --endpoint 8080           # override the HTTP port
//!
//! Environment:
//!   FILLMON_CONFIG - configuration file path (when --config is not given)
//!   RUST_LOG       - log filter, defaults to `info`

use fillmon_service::config::{self, ServiceConfig};
use fillmon_service::daemon::Daemon;
use std::env;
use std::path::PathBuf;
use std::process;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Parse command-line arguments
    let args: Vec<String> = env::args().collect();
    let mut config_path: Option<PathBuf> = None;
    let mut endpoint_port: Option<u16> = None;

    let mut i = 1;
    while i < args.len() {
        match (args[i].as_str(), args.get(i + 1)) {
            ("--config", Some(path)) => {
                config_path = Some(PathBuf::from(path));
                i += 2;
            }
            ("--endpoint", Some(port)) => match port.parse() {
                Ok(port) => {
                    endpoint_port = Some(port);
                    i += 2;
                }
                Err(_) => usage_error(&args[0], &format!("invalid port: {port}")),
            },
            ("--config" | "--endpoint", None) => {
                usage_error(&args[0], &format!("{} requires a value", args[i]))
            }
            (other, _) => usage_error(&args[0], &format!("unknown argument: {other}")),
        }
    }

    let path = config::resolve_config_path(config_path);
    let mut config = match ServiceConfig::load(&path) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %path.display(), error = %e, "invalid configuration");
            process::exit(1);
        }
    };
    info!(path = %path.display(), bins = config.bins.len(), "configuration loaded");

    if let Some(port) = endpoint_port {
        config.endpoint.bind = with_port(&config.endpoint.bind, port);
    }

    let daemon = match Daemon::new(config) {
        Ok(daemon) => daemon,
        Err(e) => {
            error!(error = %e, "initialization failed");
            process::exit(1);
        }
    };

    if let Err(e) = daemon.run() {
        error!(error = %e, "daemon error");
        process::exit(1);
    }
}

/// Replaces the port of a `host:port` bind address.
fn with_port(bind: &str, port: u16) -> String {
    let host = bind.rsplit_once(':').map_or("0.0.0.0", |(host, _)| host);
    format!("{host}:{port}")
}

fn usage_error(program: &str, message: &str) -> ! {
    eprintln!("Error: {message}");
    eprintln!("Usage: {program} [--config PATH] [--endpoint PORT]");
    process::exit(2);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_port() {
        assert_eq!(with_port("0.0.0.0:5000", 8080), "0.0.0.0:8080");
        assert_eq!(with_port("[::1]:5000", 9000), "[::1]:9000");
        assert_eq!(with_port("localhost", 8080), "0.0.0.0:8080");
    }
}
