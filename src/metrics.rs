//! Metric helpers for `wireproxy`.
//!
//! This module defines metric names and simple helper functions
//! wrapping the [`metrics`](https://docs.rs/metrics) crate. With the
//! `metrics` feature disabled every helper compiles to a no-op.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

use crate::proxy::Side;

/// Name of the gauge tracking active proxy pipes.
pub const PIPES_ACTIVE: &str = "wireproxy_pipes_active";
/// Name of the counter tracking bytes forwarded, labelled by destination side.
pub const BYTES_FORWARDED: &str = "wireproxy_bytes_forwarded_total";
/// Name of the counter tracking failed or timed out backend dials.
pub const CONNECT_FAILURES: &str = "wireproxy_connect_failures_total";
/// Name of the counter tracking panicking pipe tasks.
pub const PIPE_PANICS: &str = "wireproxy_pipe_panics_total";
/// Name of the counter tracking decode errors, labelled by error type.
pub const DECODE_ERRORS: &str = "wireproxy_decode_errors_total";
/// Name of the gauge tracking RPC calls awaiting a response.
pub const RPC_PENDING: &str = "wireproxy_rpc_pending_calls";
/// Name of the counter tracking responses with no matching pending call.
pub const RPC_UNMATCHED: &str = "wireproxy_rpc_unmatched_responses_total";

/// Increment the active pipes gauge.
pub fn inc_pipes() {
    #[cfg(feature = "metrics")]
    gauge!(PIPES_ACTIVE).increment(1.0);
}

/// Decrement the active pipes gauge.
pub fn dec_pipes() {
    #[cfg(feature = "metrics")]
    gauge!(PIPES_ACTIVE).decrement(1.0);
}

/// Record `bytes` written to `destination`.
pub fn add_forwarded(destination: Side, bytes: u64) {
    #[cfg(feature = "metrics")]
    counter!(BYTES_FORWARDED, "destination" => destination.as_str()).increment(bytes);
    #[cfg(not(feature = "metrics"))]
    let _ = (destination, bytes);
}

/// Record a failed backend dial.
pub fn inc_connect_failures() {
    #[cfg(feature = "metrics")]
    counter!(CONNECT_FAILURES).increment(1);
}

/// Record a panicking pipe task.
pub fn inc_pipe_panics() {
    #[cfg(feature = "metrics")]
    counter!(PIPE_PANICS).increment(1);
}

/// Record a decode error of the given type.
pub fn inc_decode_errors(error_type: &'static str) {
    #[cfg(feature = "metrics")]
    counter!(DECODE_ERRORS, "error_type" => error_type).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = error_type;
}

/// Set the number of RPC calls awaiting a response.
#[cfg_attr(
    feature = "metrics",
    expect(
        clippy::cast_precision_loss,
        reason = "pending call counts stay far below f64 precision limits"
    )
)]
pub fn set_pending_calls(pending: usize) {
    #[cfg(feature = "metrics")]
    gauge!(RPC_PENDING).set(pending as f64);
    #[cfg(not(feature = "metrics"))]
    let _ = pending;
}

/// Record a response that matched no pending call.
pub fn inc_unmatched_responses() {
    #[cfg(feature = "metrics")]
    counter!(RPC_UNMATCHED).increment(1);
}
