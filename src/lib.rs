//! Public API for the `wiremux` library.
//!
//! This crate multiplexes independent, bidirectional, flow-controlled
//! logical streams over one connection using a SPDY-style framed protocol.
//! A [`Session`] owns the connection and runs a single event loop that
//! serialises all frame I/O; each [`Stream`] presents one logical channel
//! as an ordinary asynchronous byte stream with header metadata attached.

pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod session;
pub mod stream;

pub use codec::{CodecError, FrameCodec};
pub use config::SessionConfig;
pub use error::{SessionError, StreamError};
pub use frame::{
    ControlFlags, DataFlags, Frame, Headers, RstStatus, SettingsEntry, StreamId,
    SETTINGS_INITIAL_WINDOW_SIZE,
};
pub use session::{Role, Session, SessionHandle, StreamHandler};
pub use stream::Stream;
