//! Metric helpers for `wiremux`.
//!
//! This module defines metric names and simple helper functions
//! wrapping the [`metrics`](https://docs.rs/metrics) crate.

use metrics::{counter, gauge};

/// Name of the gauge tracking streams currently in the session table.
pub const STREAMS_ACTIVE: &str = "wiremux_streams_active";
/// Name of the counter tracking processed frames.
pub const FRAMES_PROCESSED: &str = "wiremux_frames_processed_total";
/// Name of the counter tracking emitted stream resets.
pub const RESETS_TOTAL: &str = "wiremux_stream_resets_total";

/// Direction of frame processing.
#[derive(Clone, Copy)]
pub enum Direction {
    /// Inbound frames received from the peer.
    Inbound,
    /// Outbound frames written to the peer.
    Outbound,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Increment the active streams gauge.
pub fn inc_streams() { gauge!(STREAMS_ACTIVE).increment(1.0); }

/// Decrement the active streams gauge.
pub fn dec_streams() { gauge!(STREAMS_ACTIVE).decrement(1.0); }

/// Record a processed frame for the given direction.
pub fn inc_frames(direction: Direction) {
    counter!(FRAMES_PROCESSED, "direction" => direction.as_str()).increment(1);
}

/// Record an emitted RST_STREAM.
pub fn inc_resets() { counter!(RESETS_TOTAL).increment(1); }
