//! Shared utilities for integration tests.
//!
//! Provides helpers to spawn a session over one end of an in-memory duplex
//! pipe and to drive the other end at the frame level.

// Items in this shared module may not be used by all test binaries that import it.
#![allow(
    dead_code,
    reason = "shared test utilities are not used by all test binaries"
)]

use tokio::{io::DuplexStream, task::JoinHandle};
use tokio_util::codec::Framed;
use wiremux::{
    FrameCodec, Role, Session, SessionConfig, SessionError, SessionHandle, Stream, StreamHandler,
};

/// Duplex pipe capacity; large enough that tests never stall on transport
/// backpressure.
pub const PIPE: usize = 64 * 1024;

/// Initialise tracing output for the current test binary once.
pub fn init_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// Spawn a session over one end of a duplex pipe and drive it to completion
/// on its own task.
pub fn spawn_session<H: StreamHandler>(
    conn: DuplexStream,
    role: Role,
    config: SessionConfig,
    handler: H,
) -> (SessionHandle, JoinHandle<Result<(), SessionError>>) {
    init_logging();
    let session = Session::with_config(conn, config);
    let handle = session.handle();
    (handle, tokio::spawn(session.run(role, handler)))
}

/// Handler for sessions not expected to accept inbound streams.
pub async fn ignore_stream(stream: Stream) { drop(stream); }

/// Frame-level peer driving the remote end of the pipe directly.
pub fn raw_peer(conn: DuplexStream) -> Framed<DuplexStream, FrameCodec> {
    Framed::new(conn, FrameCodec::default())
}
