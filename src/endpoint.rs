//! HTTP endpoint for querying bin levels
//!
//! Exposes the telemetry façade to dashboards and scripts.
//!
//! Endpoints:
//! - GET /api/level - Latest reading of the first configured bin
//! - GET /api/bins - Latest reading of every bin, keyed by bin id
//! - GET /stream - Server-sent events: a snapshot, then one frame per update
//! - POST /api/simulate/{bin_id}/{level} - Manual level override
//! - GET /health - Service health check

use crossbeam_channel::RecvTimeoutError;
use serde_json::{json, Value};
use std::io::{self, Cursor, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tiny_http::{Header, Method, Request, Response, StatusCode};
use tracing::{debug, error, info, warn};

use crate::broadcast::Subscription;
use crate::error::{EndpointError, TelemetryError};
use crate::model::StreamMessage;
use crate::telemetry::Telemetry;

/// How long an idle stream waits before sending a keep-alive comment. A
/// failed keep-alive write is how a vanished client is noticed.
pub const STREAM_KEEPALIVE: Duration = Duration::from_secs(15);

const AVAILABLE_ENDPOINTS: [&str; 5] = [
    "GET /api/level",
    "GET /api/bins",
    "GET /stream",
    "POST /api/simulate/{bin_id}/{level}",
    "GET /health",
];

const STREAM_HEAD: &[u8] = b"HTTP/1.1 200 OK\r\n\
Content-Type: text/event-stream\r\n\
Cache-Control: no-cache\r\n\
Connection: close\r\n\
\r\n";

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// A JSON reply: status code plus body.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub body: Value,
}

impl Reply {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            body: json!({ "error": message }),
        }
    }
}

/// What the server should do with a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Json(Reply),
    Stream,
}

/// Maps a request onto the façade. Pure apart from manual overrides, which
/// update the registry and publish like a poll would.
pub fn route(method: &Method, url: &str, telemetry: &Telemetry) -> Route {
    let path = url.split_once('?').map_or(url, |(path, _)| path);
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    match (method, segments.as_slice()) {
        (Method::Get, ["api", "level"]) => Route::Json(handle_level(telemetry)),
        (Method::Get, ["api", "bins"]) => Route::Json(Reply::ok(json!(telemetry.query_all()))),
        (Method::Get, ["stream"]) => Route::Stream,
        (Method::Post, ["api", "simulate", bin_id, level]) => {
            Route::Json(handle_simulate(telemetry, bin_id, level))
        }
        (Method::Get, ["health"]) => Route::Json(handle_health(telemetry)),
        _ => Route::Json(Reply {
            status: 404,
            body: json!({
                "error": "not found",
                "available_endpoints": AVAILABLE_ENDPOINTS,
            }),
        }),
    }
}

/// Handle /api/level endpoint
fn handle_level(telemetry: &Telemetry) -> Reply {
    match telemetry.query_single() {
        Ok(level) => Reply::ok(json!(level)),
        Err(e) => Reply::error(503, &e.to_string()),
    }
}

/// Handle /api/simulate/{bin_id}/{level} endpoint
fn handle_simulate(telemetry: &Telemetry, raw_bin_id: &str, raw_level: &str) -> Reply {
    let bin_id = urlencoding::decode(raw_bin_id)
        .map(|id| id.into_owned())
        .unwrap_or_else(|_| raw_bin_id.to_string());

    let Ok(level) = raw_level.parse::<f64>() else {
        if !telemetry.registry().contains(&bin_id) {
            return Reply::error(404, "unknown bin id");
        }
        return Reply::error(400, "invalid level");
    };

    match telemetry.simulate(&bin_id, level) {
        Ok(event) => {
            info!(bin = %event.bin_id, level, alert = event.is_alert, "manual level override");
            Reply::ok(json!({ "ok": true, "bin": bin_id, "level": level }))
        }
        Err(TelemetryError::UnknownBin(_)) => Reply::error(404, "unknown bin id"),
        Err(TelemetryError::InvalidLevel(_)) => Reply::error(400, "invalid level"),
        Err(e @ TelemetryError::NoBinsConfigured) => Reply::error(503, &e.to_string()),
    }
}

/// Handle /health endpoint
fn handle_health(telemetry: &Telemetry) -> Reply {
    Reply::ok(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "bins": telemetry.registry().len(),
        "subscribers": telemetry.broadcaster().subscriber_count(),
    }))
}

// ---------------------------------------------------------------------------
// Event Stream
// ---------------------------------------------------------------------------

/// Formats one stream message as an SSE frame, `data: <json>\n\n`.
pub fn sse_frame(message: &StreamMessage) -> serde_json::Result<String> {
    Ok(format!("data: {}\n\n", serde_json::to_string(message)?))
}

/// Writes the response head, then one frame per message until the
/// subscription closes or a write fails.
///
/// Returning drops the subscription, which deregisters it from the
/// broadcaster.
pub fn write_stream<W: Write + ?Sized>(
    writer: &mut W,
    mut subscription: Subscription,
    keepalive: Duration,
) -> io::Result<()> {
    writer.write_all(STREAM_HEAD)?;
    writer.flush()?;

    loop {
        match subscription.recv_timeout(keepalive) {
            Ok(message) => writer.write_all(sse_frame(&message)?.as_bytes())?,
            Err(RecvTimeoutError::Timeout) => writer.write_all(b": keep-alive\n\n")?,
            Err(RecvTimeoutError::Disconnected) => return Ok(()),
        }
        writer.flush()?;
    }
}

// ---------------------------------------------------------------------------
// HTTP Server
// ---------------------------------------------------------------------------

/// Start HTTP endpoint server on `bind` (e.g. `0.0.0.0:5000`).
///
/// Every request is served on its own thread; event streams hold theirs for
/// as long as the client stays connected. Only returns on bind failure.
pub fn start_endpoint_server(bind: &str, telemetry: Arc<Telemetry>) -> Result<(), EndpointError> {
    let server = tiny_http::Server::http(bind).map_err(|e| EndpointError::Bind {
        addr: bind.to_string(),
        reason: e.to_string(),
    })?;

    info!(addr = bind, "HTTP endpoint listening");
    for endpoint in AVAILABLE_ENDPOINTS {
        debug!(endpoint, "route registered");
    }

    for request in server.incoming_requests() {
        let telemetry = Arc::clone(&telemetry);
        let spawned = thread::Builder::new()
            .name("http".to_string())
            .spawn(move || handle_request(request, &telemetry));
        if let Err(e) = spawned {
            error!(error = %e, "failed to spawn request thread");
        }
    }

    Ok(())
}

fn handle_request(request: Request, telemetry: &Telemetry) {
    debug!(method = %request.method(), url = request.url(), "request");

    match route(request.method(), request.url(), telemetry) {
        Route::Json(reply) => {
            if let Err(e) = request.respond(json_response(&reply)) {
                warn!(error = %e, "failed to send response");
            }
        }
        Route::Stream => {
            let subscription = telemetry.open_stream();
            let id = subscription.id();
            info!(subscriber = id, "stream opened");

            let mut writer = request.into_writer();
            match write_stream(&mut *writer, subscription, STREAM_KEEPALIVE) {
                Ok(()) => info!(subscriber = id, "stream ended"),
                Err(e) => info!(subscriber = id, reason = %e, "stream client disconnected"),
            }
        }
    }
}

/// Create HTTP response with JSON body
fn json_response(reply: &Reply) -> Response<Cursor<Vec<u8>>> {
    let response = Response::from_data(reply.body.to_string().into_bytes())
        .with_status_code(StatusCode::from(reply.status));

    match Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        Ok(header) => response.with_header(header),
        Err(()) => response,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
