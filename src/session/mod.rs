//! Session: one physical connection multiplexing many streams.
//!
//! All shared session state — the stream table, the outgoing identifier
//! counter, the wire itself — is confined to a single event loop driven by
//! [`Session::run`]. The loop serialises four event sources: frames read
//! off the wire by a dedicated reader task, frames handed over by streams,
//! open requests from [`SessionHandle::open`], and the reader's terminal
//! result. Nothing else touches the frame codec or the table, so those
//! structures need no locks.
//!
//! The handoff channels have capacity one: a sender parks until the loop
//! services it, which is the only cross-stream synchronisation point and
//! gives natural backpressure.

mod dispatch;
mod event;

use std::sync::{
    Arc,
    atomic::{AtomicI32, Ordering},
};

use async_trait::async_trait;
use futures::StreamExt;
use log::{info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
};
use tokio_util::{
    codec::{FramedRead, FramedWrite},
    sync::CancellationToken,
};

use dispatch::Core;
use event::Event;

use crate::{
    codec::FrameCodec,
    config::SessionConfig,
    error::{SessionError, StreamError},
    frame::{ControlFlags, Frame, Headers},
    stream::{Stream, StreamInner},
};

/// Which side of the connection this session is.
///
/// The role fixes stream identifier parity: a server initiates
/// even-numbered streams and expects odd-numbered ones from its peer; a
/// client the reverse.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    /// First identifier this side may assign to an outbound stream.
    fn first_stream_id(self) -> u32 {
        match self {
            Role::Client => 1,
            Role::Server => 2,
        }
    }
}

/// Callback invoked once per accepted inbound stream.
///
/// Runs on its own task, concurrently with the event loop; every
/// [`Stream`] method is safe to call from it. Closures of shape
/// `Fn(Stream) -> impl Future<Output = ()>` implement this automatically.
#[async_trait]
pub trait StreamHandler: Send + Sync + 'static {
    /// Handle one accepted inbound stream.
    async fn handle(&self, stream: Stream);
}

#[async_trait]
impl<F, Fut> StreamHandler for F
where
    F: Fn(Stream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, stream: Stream) { (self)(stream).await; }
}

/// State shared between the event loop, stream handles, and
/// [`SessionHandle`]s.
pub(crate) struct Shared {
    /// Frame handoff into the event loop.
    pub(crate) write_tx: mpsc::Sender<Frame>,
    /// Open-request handoff into the event loop.
    pub(crate) open_tx: mpsc::Sender<OpenRequest>,
    /// Negotiated initial send window; written only by the event loop.
    pub(crate) init_wnd: AtomicI32,
    /// Receive buffer capacity granted to each new stream.
    pub(crate) recv_capacity: usize,
    /// Cancelled when the event loop stops, releasing parked senders.
    pub(crate) stopped: CancellationToken,
}

/// A stream awaiting identifier assignment by the event loop.
pub(crate) struct OpenRequest {
    pub(crate) stream: Arc<StreamInner>,
    pub(crate) headers: Headers,
    pub(crate) flags: ControlFlags,
}

/// A multiplexed session over one connection.
///
/// Construct with [`Session::new`], grab a [`SessionHandle`] for opening
/// outbound streams, then drive the session with [`Session::run`].
///
/// # Examples
///
/// ```no_run
/// use wiremux::{ControlFlags, Role, Session};
///
/// # async fn demo() -> Result<(), wiremux::SessionError> {
/// let (conn, _remote) = tokio::io::duplex(4096);
/// let session = Session::new(conn);
/// let handle = session.handle();
/// tokio::spawn(async move {
///     if let Ok(stream) = handle.open([(":method", "GET")].into(), ControlFlags::empty()).await {
///         let _ = stream.close().await;
///     }
/// });
/// session.run(Role::Client, |stream| async move { drop(stream); }).await
/// # }
/// ```
pub struct Session<C> {
    conn: C,
    config: SessionConfig,
    shared: Arc<Shared>,
    write_rx: mpsc::Receiver<Frame>,
    open_rx: mpsc::Receiver<OpenRequest>,
}

impl<C> Session<C>
where
    C: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Create a session over `conn` with default configuration.
    #[must_use]
    pub fn new(conn: C) -> Self { Self::with_config(conn, SessionConfig::default()) }

    /// Create a session over `conn` with the given configuration.
    #[must_use]
    pub fn with_config(conn: C, config: SessionConfig) -> Self {
        let (write_tx, write_rx) = mpsc::channel(1);
        let (open_tx, open_rx) = mpsc::channel(1);
        let shared = Arc::new(Shared {
            write_tx,
            open_tx,
            init_wnd: AtomicI32::new(
                i32::try_from(config.initial_window()).unwrap_or(i32::MAX),
            ),
            recv_capacity: usize::try_from(config.initial_window()).unwrap_or(usize::MAX),
            stopped: CancellationToken::new(),
        });
        Self {
            conn,
            config,
            shared,
            write_rx,
            open_rx,
        }
    }

    /// Handle for opening outbound streams on this session.
    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Drive the session until the connection ends.
    ///
    /// `handler` is invoked on its own task for every accepted inbound
    /// stream. Blocks for the life of the session; on exit every live
    /// stream has been force-closed with [`StreamError::SessionClosed`].
    ///
    /// # Errors
    ///
    /// Returns the terminal [`SessionError`] for transport or codec
    /// failures. A clean end-of-stream from the peer is a success.
    pub async fn run<H>(self, role: Role, handler: H) -> Result<(), SessionError>
    where
        H: StreamHandler,
    {
        let Session {
            conn,
            config,
            shared,
            mut write_rx,
            mut open_rx,
        } = self;
        let (read_half, write_half) = tokio::io::split(conn);
        let codec = FrameCodec::new(config.max_frame_length());
        let mut frames = FramedRead::new(read_half, codec.clone());
        let sink = FramedWrite::new(write_half, codec);

        let (reader_tx, mut reader_rx) = mpsc::channel(1);
        let stopped = shared.stopped.clone();
        let reader = tokio::spawn(async move {
            loop {
                let event = match frames.next().await {
                    Some(Ok(frame)) => Event::Frame(frame),
                    Some(Err(err)) => Event::ReadDone(Some(err)),
                    None => Event::ReadDone(None),
                };
                let terminal = matches!(event, Event::ReadDone(_));
                let forwarded = tokio::select! {
                    sent = reader_tx.send(event) => sent.is_ok(),
                    () = stopped.cancelled() => false,
                };
                if terminal || !forwarded {
                    return;
                }
            }
        });

        info!("session started: role={role:?}");
        let mut core = Core::new(role, sink, Arc::clone(&shared), Arc::new(handler));
        let result = loop {
            let event = tokio::select! {
                Some(event) = reader_rx.recv() => event,
                Some(frame) = write_rx.recv() => Event::Write(frame),
                Some(request) = open_rx.recv() => Event::Open(request),
                else => Event::ReadDone(None),
            };
            let step = match event {
                Event::ReadDone(None) => break Ok(()),
                Event::ReadDone(Some(err)) => break Err(SessionError::Codec(err)),
                Event::Frame(frame) => core.dispatch(frame).await,
                Event::Write(frame) => core.write_frame(frame).await,
                Event::Open(request) => core.initiate(request).await,
            };
            if let Err(err) = step {
                break Err(err);
            }
        };

        shared.stopped.cancel();
        reader.abort();
        // An open request parked in the handoff never reached the table;
        // its stream must still observe the closed session.
        open_rx.close();
        while let Ok(request) = open_rx.try_recv() {
            request.stream.force_close();
        }
        core.teardown();
        match &result {
            Ok(()) => info!("session closed"),
            Err(err) => warn!("session terminated: {err}"),
        }
        result
    }
}

/// Cloneable handle for opening outbound streams.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    /// Initiate a new outbound stream with SYN_STREAM.
    ///
    /// The returned stream has no identifier yet; the event loop assigns
    /// the next one of this side's parity and buffered writes proceed once
    /// it does. Flags other than FIN and UNIDIRECTIONAL are silently
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::SessionClosed`] when the session has
    /// stopped.
    pub async fn open(
        &self,
        headers: Headers,
        flags: ControlFlags,
    ) -> Result<Stream, StreamError> {
        let window = self.shared.init_wnd.load(Ordering::Relaxed);
        let unidirectional = flags.contains(ControlFlags::UNIDIRECTIONAL);
        let stream = StreamInner::opened(
            Arc::clone(&self.shared),
            window,
            self.shared.recv_capacity,
            unidirectional,
        );
        let request = OpenRequest {
            stream: Arc::clone(&stream),
            headers,
            flags,
        };
        tokio::select! {
            biased;
            () = self.shared.stopped.cancelled() => return Err(StreamError::SessionClosed),
            sent = self.shared.open_tx.send(request) => {
                if sent.is_err() {
                    return Err(StreamError::SessionClosed);
                }
            }
        }
        Ok(Stream::from_inner(stream))
    }
}
