//! Frame vocabulary for the multiplexing session.
//!
//! A [`Frame`] is one logical unit exchanged on the wire: control frames
//! open, answer, and abort streams; data frames carry flow-controlled
//! payload. Frame kinds the session does not process decode to
//! [`Frame::Unknown`] so an unrecognised kind never tears down the
//! connection.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Identifier of one logical stream within a session.
///
/// Zero is reserved: a locally initiated stream carries id 0 until the
/// session event loop assigns the next identifier of its parity.
pub type StreamId = u32;

/// Settings identifier for the negotiated initial window size (SPDY/3).
pub const SETTINGS_INITIAL_WINDOW_SIZE: u32 = 7;

/// Flag bits carried by control frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct ControlFlags(u8);

impl ControlFlags {
    /// Half-closes the sender's side of the stream.
    pub const FIN: ControlFlags = ControlFlags(0x01);
    /// The stream is one-directional; the receiver must not reply or write.
    pub const UNIDIRECTIONAL: ControlFlags = ControlFlags(0x02);

    /// No flags set.
    #[must_use]
    pub const fn empty() -> Self { ControlFlags(0) }

    /// Raw flag bits.
    #[must_use]
    pub const fn bits(self) -> u8 { self.0 }

    /// Whether every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: ControlFlags) -> bool { self.0 & other.0 == other.0 }

    /// Bits present in both `self` and `other`.
    #[must_use]
    pub const fn intersection(self, other: ControlFlags) -> Self { ControlFlags(self.0 & other.0) }
}

impl std::ops::BitOr for ControlFlags {
    type Output = ControlFlags;

    fn bitor(self, rhs: ControlFlags) -> ControlFlags { ControlFlags(self.0 | rhs.0) }
}

/// Flag bits carried by data frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct DataFlags(u8);

impl DataFlags {
    /// Half-closes the sender's side of the stream after this payload.
    pub const FIN: DataFlags = DataFlags(0x01);

    /// No flags set.
    #[must_use]
    pub const fn empty() -> Self { DataFlags(0) }

    /// Raw flag bits.
    #[must_use]
    pub const fn bits(self) -> u8 { self.0 }

    /// Whether every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: DataFlags) -> bool { self.0 & other.0 == other.0 }
}

/// Status codes carried by RST_STREAM frames.
///
/// The numeric values follow SPDY/3 §2.4.2.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub enum RstStatus {
    ProtocolError,
    InvalidStream,
    RefusedStream,
    UnsupportedVersion,
    Cancel,
    InternalError,
    FlowControlError,
    StreamInUse,
    StreamAlreadyClosed,
}

impl RstStatus {
    /// Protocol status code for this variant.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            RstStatus::ProtocolError => 1,
            RstStatus::InvalidStream => 2,
            RstStatus::RefusedStream => 3,
            RstStatus::UnsupportedVersion => 4,
            RstStatus::Cancel => 5,
            RstStatus::InternalError => 6,
            RstStatus::FlowControlError => 7,
            RstStatus::StreamInUse => 8,
            RstStatus::StreamAlreadyClosed => 9,
        }
    }
}

impl std::fmt::Display for RstStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RstStatus::ProtocolError => "PROTOCOL_ERROR",
            RstStatus::InvalidStream => "INVALID_STREAM",
            RstStatus::RefusedStream => "REFUSED_STREAM",
            RstStatus::UnsupportedVersion => "UNSUPPORTED_VERSION",
            RstStatus::Cancel => "CANCEL",
            RstStatus::InternalError => "INTERNAL_ERROR",
            RstStatus::FlowControlError => "FLOW_CONTROL_ERROR",
            RstStatus::StreamInUse => "STREAM_IN_USE",
            RstStatus::StreamAlreadyClosed => "STREAM_ALREADY_CLOSED",
        };
        write!(f, "{name} ({})", self.code())
    }
}

/// One settings entry: an identifier/value pair.
///
/// Only [`SETTINGS_INITIAL_WINDOW_SIZE`] is interpreted; other identifiers
/// are carried opaquely.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct SettingsEntry {
    pub id: u32,
    pub value: u32,
}

/// Header metadata exchanged at stream open and reply time.
///
/// An ordered list of name/value pairs. Lookup is linear; header blocks at
/// this layer are small.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    /// Create an empty header block.
    #[must_use]
    pub fn new() -> Self { Headers(Vec::new()) }

    /// Append a name/value pair.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// First value recorded for `name`, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Number of recorded pairs.
    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    /// Whether the block holds no pairs.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Iterate over the pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Headers(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[(&str, &str); N]> for Headers {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Headers(
            pairs
                .into_iter()
                .map(|(n, v)| (n.to_owned(), v.to_owned()))
                .collect(),
        )
    }
}

/// One frame on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Opens a new stream with header metadata.
    SynStream {
        stream_id: StreamId,
        flags: ControlFlags,
        headers: Headers,
    },
    /// Answers a SYN_STREAM with header metadata.
    SynReply {
        stream_id: StreamId,
        flags: ControlFlags,
        headers: Headers,
    },
    /// Aborts a stream, closing both directions.
    RstStream {
        stream_id: StreamId,
        status: RstStatus,
    },
    /// Session-level settings exchange.
    Settings { entries: Vec<SettingsEntry> },
    /// Liveness probe; echoed back unmodified.
    Ping { id: u32 },
    /// Mid-stream header block. Tolerated and ignored.
    Headers {
        stream_id: StreamId,
        flags: ControlFlags,
        headers: Headers,
    },
    /// Grants `delta` bytes of send credit on a stream.
    WindowUpdate { stream_id: StreamId, delta: u32 },
    /// Flow-controlled payload bytes.
    Data {
        stream_id: StreamId,
        flags: DataFlags,
        payload: Vec<u8>,
    },
    /// Remote shutdown notice. Tolerated and ignored.
    Goaway {
        last_stream_id: StreamId,
        status: u32,
    },
    /// A frame kind this implementation does not recognise.
    Unknown { kind: u8 },
}

impl Frame {
    /// The stream this frame addresses, if it is stream-scoped.
    #[must_use]
    pub fn stream_id(&self) -> Option<StreamId> {
        match self {
            Frame::SynStream { stream_id, .. }
            | Frame::SynReply { stream_id, .. }
            | Frame::RstStream { stream_id, .. }
            | Frame::Headers { stream_id, .. }
            | Frame::WindowUpdate { stream_id, .. }
            | Frame::Data { stream_id, .. } => Some(*stream_id),
            Frame::Settings { .. }
            | Frame::Ping { .. }
            | Frame::Goaway { .. }
            | Frame::Unknown { .. } => None,
        }
    }
}
