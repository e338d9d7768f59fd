//! One logical stream multiplexed onto a session.
//!
//! A [`Stream`] behaves like an ordinary bidirectional byte channel with
//! header metadata attached. Each direction closes independently: reads
//! drain buffered payload until end-of-stream, writes are gated by the
//! peer's flow-control credit.
//!
//! Internally the read and write halves are separate monitors (a mutex
//! around the state plus a [`Notify`] for wakeups, with the predicate
//! re-checked in a loop), so a slow reader never blocks a writer, and
//! neither ever blocks the session's event loop. Everything a stream sends
//! travels through a bounded handoff to that loop; the loop is the only
//! code that touches the wire.

mod buffer;
mod window;

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;

pub(crate) use buffer::BufferFull;
use buffer::ReceiveBuffer;
use window::SendWindow;

use crate::{
    config::MAX_WINDOW,
    error::StreamError,
    frame::{ControlFlags, DataFlags, Frame, Headers, RstStatus, StreamId},
    session::Shared,
};

struct ReadHalf {
    buf: ReceiveBuffer,
    closed: bool,
    err: Option<StreamError>,
}

/// State shared between the application's [`Stream`] handles and the
/// session event loop.
pub(crate) struct StreamInner {
    session: Arc<Shared>,
    /// 0 until the event loop allocates an identifier.
    id: watch::Sender<StreamId>,
    in_headers: Mutex<Option<Headers>>,
    /// Set once a reply arrives, or once it is certain none will.
    reply_seen: watch::Sender<bool>,
    wready: AtomicBool,
    read: Mutex<ReadHalf>,
    read_ready: Notify,
    write: Mutex<SendWindow>,
    write_ready: Notify,
    /// Cancelled when the write side closes, waking blocked writers.
    wstop: CancellationToken,
}

impl StreamInner {
    fn new(
        session: Arc<Shared>,
        id: StreamId,
        in_headers: Option<Headers>,
        reply_seen: bool,
        wready: bool,
        window: i32,
        capacity: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            session,
            id: watch::Sender::new(id),
            in_headers: Mutex::new(in_headers),
            reply_seen: watch::Sender::new(reply_seen),
            wready: AtomicBool::new(wready),
            read: Mutex::new(ReadHalf {
                buf: ReceiveBuffer::with_capacity(capacity),
                closed: false,
                err: None,
            }),
            read_ready: Notify::new(),
            write: Mutex::new(SendWindow::new(window)),
            write_ready: Notify::new(),
            wstop: CancellationToken::new(),
        })
    }

    /// Stream accepted from a remote SYN_STREAM: identifier known, local
    /// side must reply before writing, inbound headers already present.
    pub(crate) fn accepted(
        session: Arc<Shared>,
        id: StreamId,
        headers: Headers,
        window: i32,
        capacity: usize,
    ) -> Arc<Self> {
        Self::new(session, id, Some(headers), true, false, window, capacity)
    }

    /// Locally initiated stream: identifier pending, write-ready from the
    /// start. A unidirectional stream expects no reply and is unreadable.
    pub(crate) fn opened(
        session: Arc<Shared>,
        window: i32,
        capacity: usize,
        unidirectional: bool,
    ) -> Arc<Self> {
        let inner = Self::new(session, 0, None, unidirectional, true, window, capacity);
        if unidirectional {
            inner.rclose(Some(StreamError::NotReadable));
        }
        inner
    }

    pub(crate) fn publish_id(&self, id: StreamId) { self.id.send_replace(id); }

    pub(crate) fn current_id(&self) -> StreamId { *self.id.borrow() }

    pub(crate) fn set_reply(&self, headers: Headers) {
        *self.in_headers.lock().expect("header lock poisoned") = Some(headers);
        self.reply_seen.send_replace(true);
    }

    /// Wake anyone blocked in `header` without recording headers.
    pub(crate) fn release_reply_waiters(&self) { self.reply_seen.send_replace(true); }

    /// Close the read side; `None` records clean end-of-stream.
    pub(crate) fn rclose(&self, err: Option<StreamError>) {
        {
            let mut read = self.read.lock().expect("read lock poisoned");
            if read.closed {
                return;
            }
            read.closed = true;
            read.err = err;
        }
        self.read_ready.notify_waiters();
    }

    /// Close the write side with `err`, waking blocked writers.
    pub(crate) fn wclose(&self, err: StreamError) {
        let newly_closed = self
            .write
            .lock()
            .expect("window lock poisoned")
            .close(err);
        if newly_closed {
            self.write_ready.notify_waiters();
            self.wstop.cancel();
        }
    }

    pub(crate) fn read_closed(&self) -> bool {
        self.read.lock().expect("read lock poisoned").closed
    }

    pub(crate) fn is_fully_closed(&self) -> bool {
        self.read_closed() && self.write.lock().expect("window lock poisoned").is_closed()
    }

    /// Deliver received payload to the read buffer and wake readers.
    pub(crate) fn append(&self, payload: &[u8]) -> Result<(), BufferFull> {
        let appended = self
            .read
            .lock()
            .expect("read lock poisoned")
            .buf
            .append(payload);
        self.read_ready.notify_waiters();
        appended
    }

    /// Apply a WINDOW_UPDATE delta, waking writers; false on violation.
    pub(crate) fn apply_window_update(&self, delta: u32) -> bool {
        let ok = self
            .write
            .lock()
            .expect("window lock poisoned")
            .apply_update(delta);
        self.write_ready.notify_waiters();
        ok
    }

    /// Session teardown: both directions fail over to a session error.
    pub(crate) fn force_close(&self) {
        self.rclose(Some(StreamError::SessionClosed));
        self.wclose(StreamError::SessionClosed);
        self.release_reply_waiters();
    }

    fn write_error(&self) -> StreamError {
        self.write.lock().expect("window lock poisoned").error()
    }
}

/// Handle to one logical stream.
///
/// Cheap to clone; all methods take `&self` and may be called from any
/// task. Dropping the handle does not close the stream — use
/// [`close`](Stream::close) or [`reset`](Stream::reset).
#[derive(Clone)]
pub struct Stream {
    inner: Arc<StreamInner>,
}

impl Stream {
    pub(crate) fn from_inner(inner: Arc<StreamInner>) -> Self { Self { inner } }

    /// The stream's identifier, once the event loop has assigned one.
    #[must_use]
    pub fn id(&self) -> Option<StreamId> {
        match self.inner.current_id() {
            0 => None,
            id => Some(id),
        }
    }

    /// Inbound headers, from the SYN_STREAM (remote-initiated streams) or
    /// the SYN_REPLY (locally initiated ones).
    ///
    /// Waits until an outstanding reply has arrived. Returns `None` when
    /// the stream has no incoming direction or the session ended before a
    /// reply was received.
    pub async fn header(&self) -> Option<Headers> {
        let mut seen = self.inner.reply_seen.subscribe();
        // The sender lives inside StreamInner, so wait_for cannot fail
        // while this handle exists.
        let _ = seen.wait_for(|ready| *ready).await;
        self.inner
            .in_headers
            .lock()
            .expect("header lock poisoned")
            .clone()
    }

    /// Answer a remote-initiated stream with SYN_REPLY, opening the local
    /// write side.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::AlreadyWritable`] on a stream that is
    /// already open for writing (locally initiated, or replied before),
    /// and the write side's terminal error if the session has stopped.
    pub async fn reply(&self, headers: Headers, flags: ControlFlags) -> Result<(), StreamError> {
        if self.inner.wready.swap(true, Ordering::AcqRel) {
            return Err(StreamError::AlreadyWritable);
        }
        let stream_id = self.await_id().await?;
        self.send_frame(Frame::SynReply {
            stream_id,
            flags,
            headers,
        })
        .await
    }

    /// Read received payload into `dst`, waiting for data or end-of-stream.
    ///
    /// Returns `Ok(0)` at clean end-of-stream once the buffer is drained.
    /// Every successful drain returns the same number of bytes of
    /// flow-control credit to the sender.
    ///
    /// # Errors
    ///
    /// Returns the read side's terminal error after an abnormal close: a
    /// [`StreamError::Reset`] carrying the received status, or
    /// [`StreamError::SessionClosed`].
    pub async fn read(&self, dst: &mut [u8]) -> Result<usize, StreamError> {
        loop {
            let ready = self.inner.read_ready.notified();
            let drained = {
                let mut read = self.inner.read.lock().expect("read lock poisoned");
                if !read.buf.is_empty() {
                    Some(read.buf.drain_into(dst))
                } else if read.closed {
                    return match &read.err {
                        None => Ok(0),
                        Some(err) => Err(err.clone()),
                    };
                } else {
                    None
                }
            };
            if let Some(n) = drained {
                if n > 0 {
                    // Credit return is best effort: a closed write
                    // side must not fail the read that drained data.
                    let _ = self.update_window(n).await;
                }
                return Ok(n);
            }
            ready.await;
        }
    }

    /// Write `data` as one or more DATA frames, waiting for send credit.
    ///
    /// Chunks are sized to the current send window; a full window blocks
    /// until the peer returns credit or the write side closes.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::NotWritable`] on a remote-initiated stream
    /// that has not replied, otherwise the write side's terminal error.
    /// Bytes accepted by earlier chunks may already be in flight when an
    /// error is returned.
    pub async fn write(&self, data: &[u8]) -> Result<usize, StreamError> {
        let mut written = 0;
        while written < data.len() {
            written += self.write_once(&data[written..]).await?;
        }
        Ok(written)
    }

    /// Half-close the write side by sending an empty DATA frame with FIN.
    ///
    /// A no-op when the write side is already closed. Reading is
    /// unaffected. To abort both directions use [`reset`](Stream::reset).
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::SessionClosed`] when the session has
    /// stopped, or the write side's recorded reset error.
    pub async fn close(&self) -> Result<(), StreamError> {
        if self
            .inner
            .write
            .lock()
            .expect("window lock poisoned")
            .is_closed()
        {
            return Ok(());
        }
        let stream_id = self.await_id().await?;
        match self
            .send_frame(Frame::Data {
                stream_id,
                flags: DataFlags::FIN,
                payload: Vec::new(),
            })
            .await
        {
            // Lost a race with another close; still a no-op.
            Err(StreamError::Closed) => Ok(()),
            result => result,
        }
    }

    /// Abort the stream with RST_STREAM, closing both directions.
    ///
    /// A no-op when the stream is already fully closed.
    ///
    /// # Errors
    ///
    /// Returns the write side's terminal error when the frame can no
    /// longer be sent.
    pub async fn reset(&self, status: RstStatus) -> Result<(), StreamError> {
        if self.inner.is_fully_closed() {
            return Ok(());
        }
        let stream_id = self.await_id().await?;
        self.send_frame(Frame::RstStream { stream_id, status }).await
    }

    /// Write one DATA frame no larger than the current send window.
    async fn write_once(&self, data: &[u8]) -> Result<usize, StreamError> {
        if !self.inner.wready.load(Ordering::Acquire) {
            return Err(StreamError::NotWritable);
        }
        let chunk = loop {
            let ready = self.inner.write_ready.notified();
            {
                let mut window = self.inner.write.lock().expect("window lock poisoned");
                if window.is_closed() {
                    return Err(window.error());
                }
                if let Some(chunk) = window.debit(data.len()) {
                    break chunk;
                }
            }
            ready.await;
        };
        let stream_id = self.await_id().await?;
        self.send_frame(Frame::Data {
            stream_id,
            flags: DataFlags::empty(),
            payload: data[..chunk].to_vec(),
        })
        .await?;
        Ok(chunk)
    }

    /// Return `delta` bytes of credit to the sender.
    async fn update_window(&self, delta: usize) -> Result<(), StreamError> {
        let delta = u32::try_from(delta)
            .ok()
            .filter(|delta| (1..=MAX_WINDOW).contains(delta))
            .ok_or(StreamError::InvalidWindowDelta(delta))?;
        self.send_frame(Frame::WindowUpdate {
            stream_id: self.inner.current_id(),
            delta,
        })
        .await
    }

    /// Identifier assigned by the event loop; waits for outbound streams
    /// still in the open handoff.
    async fn await_id(&self) -> Result<StreamId, StreamError> {
        let current = self.inner.current_id();
        if current != 0 {
            return Ok(current);
        }
        let mut assigned = self.inner.id.subscribe();
        // Biased so an already-closed write side wins deterministically.
        tokio::select! {
            biased;
            () = self.inner.wstop.cancelled() => Err(self.inner.write_error()),
            id = assigned.wait_for(|id| *id != 0) => {
                id.map(|id| *id).map_err(|_| StreamError::SessionClosed)
            }
        }
    }

    /// Hand a frame to the session event loop.
    ///
    /// Blocks until the loop accepts the frame; a closed write side or a
    /// stopped session fails instead of blocking forever.
    async fn send_frame(&self, frame: Frame) -> Result<(), StreamError> {
        // Biased so an already-closed write side wins deterministically.
        tokio::select! {
            biased;
            () = self.inner.wstop.cancelled() => Err(self.inner.write_error()),
            sent = self.inner.session.write_tx.send(frame) => {
                sent.map_err(|_| StreamError::SessionClosed)
            }
        }
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.inner.current_id())
            .finish_non_exhaustive()
    }
}
