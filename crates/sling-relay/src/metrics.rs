//! Metric names.
//!
//! Recorded through the `metrics` facade; the embedding process decides
//! whether and where to export them.

/// Clients whose loops are running (gauge).
pub const RELAY_CLIENTS_ACTIVE: &str = "relay_clients_active";
/// Clients activated since start (counter).
pub const RELAY_CLIENTS_TOTAL: &str = "relay_clients_total";
/// Data frames received from clients (counter, label: `stream`).
pub const RELAY_FRAMES_IN_TOTAL: &str = "relay_frames_in_total";
/// Frames written to clients (counter, label: `stream`).
pub const RELAY_FRAMES_OUT_TOTAL: &str = "relay_frames_out_total";
/// Inbound frames dropped because they failed to decode (counter, label: `stream`).
pub const RELAY_DECODE_ERRORS_TOTAL: &str = "relay_decode_errors_total";
/// Client teardowns (counter, label: `reason`).
pub const RELAY_TEARDOWNS_TOTAL: &str = "relay_teardowns_total";
/// Activation to termination (histogram, seconds).
pub const RELAY_CLIENT_LIFETIME_SECONDS: &str = "relay_client_lifetime_seconds";
