//! Frame dispatch and stream-table maintenance for the event loop.
//!
//! Everything here runs on the session's single logical thread of control;
//! `Core` is the only owner of the stream table, the identifier counters,
//! and the write half of the connection.

use std::{
    collections::HashMap,
    sync::{Arc, atomic::Ordering},
};

use futures::SinkExt;
use log::{debug, warn};
use tokio::io::{AsyncWrite, WriteHalf};
use tokio_util::codec::FramedWrite;

use super::{OpenRequest, Role, Shared, StreamHandler};
use crate::{
    codec::FrameCodec,
    error::{SessionError, StreamError},
    frame::{
        ControlFlags, DataFlags, Frame, Headers, RstStatus, SETTINGS_INITIAL_WINDOW_SIZE,
        SettingsEntry, StreamId,
    },
    stream::{Stream, StreamInner},
};

/// How writing a frame affects the local state of its stream.
struct Disposition {
    stream_id: Option<StreamId>,
    closes_write: bool,
    reset: Option<RstStatus>,
}

fn disposition(frame: &Frame) -> Disposition {
    match frame {
        Frame::SynStream {
            stream_id, flags, ..
        }
        | Frame::SynReply {
            stream_id, flags, ..
        }
        | Frame::Headers {
            stream_id, flags, ..
        } => Disposition {
            stream_id: Some(*stream_id),
            closes_write: flags.contains(ControlFlags::FIN),
            reset: None,
        },
        Frame::Data {
            stream_id, flags, ..
        } => Disposition {
            stream_id: Some(*stream_id),
            closes_write: flags.contains(DataFlags::FIN),
            reset: None,
        },
        Frame::RstStream { stream_id, status } => Disposition {
            stream_id: Some(*stream_id),
            closes_write: false,
            reset: Some(*status),
        },
        Frame::Settings { .. }
        | Frame::Ping { .. }
        | Frame::WindowUpdate { .. }
        | Frame::Goaway { .. }
        | Frame::Unknown { .. } => Disposition {
            stream_id: None,
            closes_write: false,
            reset: None,
        },
    }
}

/// Loop-local session state.
pub(super) struct Core<C, H> {
    role: Role,
    sink: FramedWrite<WriteHalf<C>, FrameCodec>,
    shared: Arc<Shared>,
    streams: HashMap<StreamId, Arc<StreamInner>>,
    next_syn_id: StreamId,
    last_recv_id: StreamId,
    handler: Arc<H>,
}

impl<C, H> Core<C, H>
where
    C: AsyncWrite + Send + 'static,
    H: StreamHandler,
{
    pub(super) fn new(
        role: Role,
        sink: FramedWrite<WriteHalf<C>, FrameCodec>,
        shared: Arc<Shared>,
        handler: Arc<H>,
    ) -> Self {
        Self {
            role,
            sink,
            shared,
            streams: HashMap::new(),
            next_syn_id: role.first_stream_id(),
            last_recv_id: 0,
            handler,
        }
    }

    /// Interpret one received frame and apply it.
    pub(super) async fn dispatch(&mut self, frame: Frame) -> Result<(), SessionError> {
        #[cfg(feature = "metrics")]
        crate::metrics::inc_frames(crate::metrics::Direction::Inbound);
        match frame {
            Frame::SynStream {
                stream_id,
                flags,
                headers,
            } => self.handle_syn_stream(stream_id, flags, headers).await,
            Frame::SynReply {
                stream_id,
                flags,
                headers,
            } => self.handle_syn_reply(stream_id, flags, headers).await,
            Frame::RstStream { stream_id, status } => {
                self.handle_rst_stream(stream_id, status);
                Ok(())
            }
            Frame::Settings { entries } => {
                self.handle_settings(&entries);
                Ok(())
            }
            Frame::Ping { id } => self.write_frame(Frame::Ping { id }).await,
            Frame::WindowUpdate { stream_id, delta } => {
                self.handle_window_update(stream_id, delta).await
            }
            Frame::Data {
                stream_id,
                flags,
                payload,
            } => self.handle_data(stream_id, flags, &payload).await,
            frame @ (Frame::Headers { .. } | Frame::Goaway { .. } | Frame::Unknown { .. }) => {
                debug!("ignoring unhandled frame: {frame:?}");
                Ok(())
            }
        }
    }

    /// Write one frame to the wire without stream-table side effects.
    async fn send_raw(&mut self, frame: Frame) -> Result<(), SessionError> {
        self.sink.send(frame).await?;
        #[cfg(feature = "metrics")]
        crate::metrics::inc_frames(crate::metrics::Direction::Outbound);
        Ok(())
    }

    /// Write one frame to the wire and apply its local side effects.
    ///
    /// A FIN half-closes the stream's write side; an RST_STREAM closes
    /// both directions. Streams closed in both directions leave the table.
    pub(super) async fn write_frame(&mut self, frame: Frame) -> Result<(), SessionError> {
        let disposition = disposition(&frame);
        self.send_raw(frame).await?;
        let Some(stream_id) = disposition.stream_id else {
            return Ok(());
        };
        let Some(stream) = self.streams.get(&stream_id).cloned() else {
            return Ok(());
        };
        if let Some(status) = disposition.reset {
            stream.rclose(Some(StreamError::Reset(status)));
            stream.wclose(StreamError::Reset(status));
        } else if disposition.closes_write {
            stream.wclose(StreamError::Closed);
        }
        if stream.is_fully_closed() {
            debug!("stream {stream_id} fully closed; leaving the table");
            self.remove_stream(stream_id);
        }
        Ok(())
    }

    /// Assign the next local identifier to an opened stream and emit its
    /// SYN_STREAM.
    pub(super) async fn initiate(&mut self, request: OpenRequest) -> Result<(), SessionError> {
        let OpenRequest {
            stream,
            headers,
            flags,
        } = request;
        let stream_id = self.next_syn_id;
        self.next_syn_id += 2;
        self.insert_stream(stream_id, Arc::clone(&stream));
        stream.publish_id(stream_id);
        let flags = flags.intersection(ControlFlags::FIN | ControlFlags::UNIDIRECTIONAL);
        self.write_frame(Frame::SynStream {
            stream_id,
            flags,
            headers,
        })
        .await
    }

    /// Force-close every remaining stream when the session ends.
    pub(super) fn teardown(&mut self) {
        for (_, stream) in self.streams.drain() {
            stream.force_close();
            #[cfg(feature = "metrics")]
            crate::metrics::dec_streams();
        }
    }

    async fn handle_syn_stream(
        &mut self,
        stream_id: StreamId,
        flags: ControlFlags,
        headers: Headers,
    ) -> Result<(), SessionError> {
        let from_server = stream_id % 2 == 0;
        if (self.role == Role::Server) == from_server || stream_id <= self.last_recv_id {
            warn!("rejecting SYN_STREAM {stream_id}: wrong parity or non-increasing id");
            // The rejection addresses the offending id only; a live local
            // stream that already owns it must stay usable, so skip the
            // write-side disposition.
            #[cfg(feature = "metrics")]
            crate::metrics::inc_resets();
            return self
                .send_raw(Frame::RstStream {
                    stream_id,
                    status: RstStatus::ProtocolError,
                })
                .await;
        }
        self.last_recv_id = stream_id;
        let window = self.shared.init_wnd.load(Ordering::Relaxed);
        let stream = StreamInner::accepted(
            Arc::clone(&self.shared),
            stream_id,
            headers,
            window,
            self.shared.recv_capacity,
        );
        if flags.contains(ControlFlags::UNIDIRECTIONAL) {
            stream.wclose(StreamError::Closed);
        }
        if flags.contains(ControlFlags::FIN) {
            stream.rclose(None);
        }
        self.insert_stream(stream_id, Arc::clone(&stream));
        let handler = Arc::clone(&self.handler);
        tokio::spawn(async move { handler.handle(Stream::from_inner(stream)).await });
        Ok(())
    }

    async fn handle_syn_reply(
        &mut self,
        stream_id: StreamId,
        flags: ControlFlags,
        headers: Headers,
    ) -> Result<(), SessionError> {
        let Some(stream) = self.streams.get(&stream_id).cloned() else {
            return self.reset_stream(stream_id, RstStatus::InvalidStream).await;
        };
        stream.set_reply(headers);
        if flags.contains(ControlFlags::FIN) {
            stream.rclose(None);
        }
        Ok(())
    }

    fn handle_rst_stream(&mut self, stream_id: StreamId, status: RstStatus) {
        let Some(stream) = self.streams.get(&stream_id).cloned() else {
            debug!("RST_STREAM for unknown stream {stream_id}");
            return;
        };
        warn!("stream {stream_id} reset by peer: {status}");
        stream.rclose(Some(StreamError::Reset(status)));
        stream.wclose(StreamError::Reset(status));
        self.remove_stream(stream_id);
    }

    fn handle_settings(&mut self, entries: &[SettingsEntry]) {
        for entry in entries {
            if entry.id == SETTINGS_INITIAL_WINDOW_SIZE {
                // Values outside the signed 31-bit range are ignored.
                if let Ok(window) = i32::try_from(entry.value) {
                    debug!("initial window size now {window}");
                    self.shared.init_wnd.store(window, Ordering::Relaxed);
                }
            }
        }
    }

    async fn handle_window_update(
        &mut self,
        stream_id: StreamId,
        delta: u32,
    ) -> Result<(), SessionError> {
        let ok = match self.streams.get(&stream_id) {
            Some(stream) => stream.apply_window_update(delta),
            // Credit for a stream we already closed with FIN; the update
            // was in flight when the stream left the table.
            None => return Ok(()),
        };
        if ok {
            Ok(())
        } else {
            warn!("stream {stream_id}: invalid window delta {delta}");
            self.reset_stream(stream_id, RstStatus::FlowControlError).await
        }
    }

    async fn handle_data(
        &mut self,
        stream_id: StreamId,
        flags: DataFlags,
        payload: &[u8],
    ) -> Result<(), SessionError> {
        let Some(stream) = self.streams.get(&stream_id).cloned() else {
            return self.reset_stream(stream_id, RstStatus::InvalidStream).await;
        };
        if stream.read_closed() {
            return self
                .reset_stream(stream_id, RstStatus::StreamAlreadyClosed)
                .await;
        }
        let appended = stream.append(payload);
        if flags.contains(DataFlags::FIN) {
            stream.rclose(None);
        }
        if appended.is_err() {
            warn!("stream {stream_id} overran its receive window");
            return self.reset_stream(stream_id, RstStatus::FlowControlError).await;
        }
        Ok(())
    }

    /// Abort `stream_id` with RST_STREAM.
    async fn reset_stream(
        &mut self,
        stream_id: StreamId,
        status: RstStatus,
    ) -> Result<(), SessionError> {
        #[cfg(feature = "metrics")]
        crate::metrics::inc_resets();
        self.write_frame(Frame::RstStream { stream_id, status }).await
    }

    fn insert_stream(&mut self, stream_id: StreamId, stream: Arc<StreamInner>) {
        self.streams.insert(stream_id, stream);
        #[cfg(feature = "metrics")]
        crate::metrics::inc_streams();
    }

    fn remove_stream(&mut self, stream_id: StreamId) {
        if self.streams.remove(&stream_id).is_some() {
            #[cfg(feature = "metrics")]
            crate::metrics::dec_streams();
        }
    }
}
