//! Session- and stream-level error types.
//!
//! The taxonomy separates the blast radius of a failure:
//!
//! - [`StreamError`]: scoped to one stream, surfaced only to callers of that
//!   stream's methods. Cloneable so a recorded terminal error can be handed
//!   to every blocked reader and writer.
//! - [`SessionError`]: fatal to the whole session; when `run` returns one,
//!   every live stream has been force-closed with
//!   [`StreamError::SessionClosed`].
//!
//! Codec-layer errors live in [`crate::codec::CodecError`].

use thiserror::Error;

use crate::{codec::CodecError, frame::RstStatus};

/// Fatal session failure terminating the event loop.
#[derive(Debug, Error)]
pub enum SessionError {
    /// An error in the underlying transport.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame encoding or decoding failed on the connection.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Recoverable, stream-scoped failure.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The session event loop has stopped; no further frames move.
    #[error("session closed")]
    SessionClosed,

    /// The stream's write side was closed by a FIN.
    #[error("stream closed")]
    Closed,

    /// The stream was aborted with RST_STREAM.
    #[error("stream was reset: {0}")]
    Reset(RstStatus),

    /// The stream has no incoming direction.
    #[error("not readable")]
    NotReadable,

    /// A remote-initiated stream must reply before writing.
    #[error("not writable; must reply first")]
    NotWritable,

    /// Reply on a stream that is already open for writing.
    #[error("can't reply; already open for writing")]
    AlreadyWritable,

    /// A flow-control credit return outside `[1, 2^31 - 1]`.
    #[error("window delta out of range: {0}")]
    InvalidWindowDelta(usize),
}
