//! fillmon_service: waste bin fill-level monitoring service.
//!
//! # Module structure
//!
//! ```text
//! fillmon_service
//! ├── model       - shared data types (Bin, UpdateEvent, StreamMessage, BinView)
//! ├── error       - error enums for the pipeline, configuration, sensors and sinks
//! ├── config      - bins.toml loader and validation
//! ├── fill        - distance + calibration height → fill percentage
//! ├── sensor      - DistanceReader contract and simulated/file/fixed readers
//! ├── registry    - in-memory bin state, one lock per bin
//! ├── broadcast   - bounded, drop-oldest fan-out to stream subscribers
//! ├── telemetry   - query/subscribe façade shared by the poller and HTTP layer
//! ├── poller      - periodic, time-boxed sensor polling loop
//! ├── sink        - optional outbound forwarding of updates (JSON lines, MQTT)
//! ├── endpoint    - REST + server-sent events over tiny_http
//! └── daemon      - startup wiring (telemetry, poller, sink, endpoint)
//! ```

pub mod broadcast;
pub mod config;
pub mod daemon;
pub mod endpoint;
pub mod error;
pub mod fill;
pub mod model;
pub mod poller;
pub mod registry;
pub mod sensor;
pub mod sink;
pub mod telemetry;
