//! Internal event types for the session select loop.

use crate::{codec::CodecError, frame::Frame, session::OpenRequest};

/// Events multiplexed by [`Session::run`][super::Session::run].
///
/// The reader task produces `Frame` and `ReadDone` in order on one
/// channel, so a terminal read result is never observed ahead of frames
/// that arrived before it.
pub(super) enum Event {
    /// A frame arrived from the reader task.
    Frame(Frame),
    /// The reader task finished: clean end-of-stream (`None`) or a
    /// terminal decode/transport error.
    ReadDone(Option<CodecError>),
    /// A stream handed over a frame for transmission.
    Write(Frame),
    /// Application code requested a new outbound stream.
    Open(OpenRequest),
}
