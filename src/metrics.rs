//! Lightweight metrics helpers.
//!
//! Thin wrappers over the `metrics` crate macros describing the proxy's
//! metric families. No exporter is embedded; the application installs any
//! compatible recorder.
//!
//! Families:
//! * `myelin_requests_total` (counter, label: method)
//! * `myelin_request_duration_seconds` (histogram, label: status)
//! * `myelin_forward_requests_total` (counter, label: status)
//! * `myelin_forward_duration_seconds` (histogram)
//! * `myelin_forward_errors_total` (counter, label: kind)
//! * `myelin_websocket_sessions_total` (counter)
//! * `myelin_websocket_bytes_total` (counter, label: direction)
use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

pub const REQUESTS_TOTAL: &str = "myelin_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "myelin_request_duration_seconds";
pub const FORWARD_REQUESTS_TOTAL: &str = "myelin_forward_requests_total";
pub const FORWARD_DURATION_SECONDS: &str = "myelin_forward_duration_seconds";
pub const FORWARD_ERRORS_TOTAL: &str = "myelin_forward_errors_total";
pub const WEBSOCKET_SESSIONS_TOTAL: &str = "myelin_websocket_sessions_total";
pub const WEBSOCKET_BYTES_TOTAL: &str = "myelin_websocket_bytes_total";

/// Register descriptions for every metric family. Optional; call once at
/// startup if the installed recorder surfaces metadata.
pub fn describe_metrics() {
    describe_counter!(REQUESTS_TOTAL, Unit::Count, "Requests entering the proxy");
    describe_histogram!(
        REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "End-to-end request handling duration"
    );
    describe_counter!(
        FORWARD_REQUESTS_TOTAL,
        Unit::Count,
        "Upstream round-trips executed"
    );
    describe_histogram!(
        FORWARD_DURATION_SECONDS,
        Unit::Seconds,
        "Upstream round-trip duration"
    );
    describe_counter!(
        FORWARD_ERRORS_TOTAL,
        Unit::Count,
        "Forwarding failures by kind"
    );
    describe_counter!(
        WEBSOCKET_SESSIONS_TOTAL,
        Unit::Count,
        "Websocket sessions relayed"
    );
    describe_counter!(
        WEBSOCKET_BYTES_TOTAL,
        Unit::Bytes,
        "Bytes relayed over websocket sessions"
    );
}

pub fn record_request(method: &str) {
    counter!(REQUESTS_TOTAL, "method" => method.to_string()).increment(1);
}

pub fn record_request_duration(status: u16, duration: Duration) {
    histogram!(REQUEST_DURATION_SECONDS, "status" => status.to_string())
        .record(duration.as_secs_f64());
}

pub fn record_forward(status: u16, duration: Duration) {
    counter!(FORWARD_REQUESTS_TOTAL, "status" => status.to_string()).increment(1);
    histogram!(FORWARD_DURATION_SECONDS).record(duration.as_secs_f64());
}

pub fn record_forward_error(kind: &'static str) {
    counter!(FORWARD_ERRORS_TOTAL, "kind" => kind).increment(1);
}

pub fn record_websocket_session() {
    counter!(WEBSOCKET_SESSIONS_TOTAL).increment(1);
}

pub fn record_websocket_bytes(direction: &'static str, bytes: u64) {
    counter!(WEBSOCKET_BYTES_TOTAL, "direction" => direction).increment(bytes);
}
