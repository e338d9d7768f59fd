//! Wire codec for [`Frame`]s.
//!
//! Frames travel in a length-delimited envelope: a four byte big-endian
//! length prefix, a one byte frame kind, then the bincode-encoded body for
//! that kind. The session core never touches bytes directly; it only sees
//! this module's [`Decoder`]/[`Encoder`] pair.
//!
//! Unrecognised kind bytes decode to [`Frame::Unknown`] so a peer speaking
//! a newer revision degrades to ignored frames instead of a dead session.

use std::io;

use bincode::{
    Decode,
    config,
    decode_from_slice,
    encode_to_vec,
    error::{DecodeError, EncodeError},
};
use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    config::clamp_frame_length,
    frame::{ControlFlags, DataFlags, Frame, Headers, RstStatus, SettingsEntry, StreamId},
};

const KIND_DATA: u8 = 0;
const KIND_SYN_STREAM: u8 = 1;
const KIND_SYN_REPLY: u8 = 2;
const KIND_RST_STREAM: u8 = 3;
const KIND_SETTINGS: u8 = 4;
const KIND_PING: u8 = 6;
const KIND_GOAWAY: u8 = 7;
const KIND_HEADERS: u8 = 8;
const KIND_WINDOW_UPDATE: u8 = 9;

/// Errors raised while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum CodecError {
    /// An error in the underlying transport.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    /// Outgoing frame larger than the configured maximum.
    #[error("frame exceeds max length: {size} > {max}")]
    OversizedFrame {
        /// Encoded frame size.
        size: usize,
        /// Maximum allowed frame size.
        max: usize,
    },

    /// A zero-length envelope carries no kind byte.
    #[error("empty frame")]
    EmptyFrame,

    /// The body of a recognised frame kind failed to decode.
    #[error("malformed {kind} frame: {source}")]
    MalformedFrame {
        /// Frame kind name.
        kind: &'static str,
        /// Underlying decode failure.
        source: DecodeError,
    },

    /// The connection ended in the middle of a frame.
    #[error("connection closed mid-frame with {bytes_received} byte(s) pending")]
    Truncated {
        /// Bytes received past the last complete frame.
        bytes_received: usize,
    },

    /// Frame body serialization failed.
    #[error("frame encoding failed: {0}")]
    Encode(#[from] EncodeError),
}

/// Length prefix header size in bytes (big-endian u32).
const LENGTH_HEADER_SIZE: usize = 4;

/// Length-delimited codec turning byte streams into [`Frame`]s and back.
///
/// The decoder peeks without consuming until a full envelope is buffered,
/// so it carries no state between calls and end-of-stream detection only
/// has to look at the remaining bytes.
#[derive(Clone, Debug)]
pub struct FrameCodec {
    max_frame_length: usize,
}

impl FrameCodec {
    /// Construct a codec with the given maximum frame length.
    ///
    /// The length is clamped to
    /// [`MIN_FRAME_LENGTH`](crate::config::MIN_FRAME_LENGTH)..=
    /// [`MAX_FRAME_LENGTH`](crate::config::MAX_FRAME_LENGTH).
    #[must_use]
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            max_frame_length: clamp_frame_length(max_frame_length),
        }
    }

    /// Maximum frame length accepted and produced by this codec.
    #[must_use]
    pub fn max_frame_length(&self) -> usize { self.max_frame_length }
}

impl Default for FrameCodec {
    fn default() -> Self { Self::new(1024 * 1024) }
}

fn body<D: Decode<()>>(kind: &'static str, bytes: &[u8]) -> Result<D, CodecError> {
    decode_from_slice(bytes, config::standard())
        .map(|(value, _)| value)
        .map_err(|source| CodecError::MalformedFrame { kind, source })
}

fn decode_frame(kind: u8, bytes: &[u8]) -> Result<Frame, CodecError> {
    let frame = match kind {
        KIND_DATA => {
            let (stream_id, flags, payload): (StreamId, DataFlags, Vec<u8>) =
                body("DATA", bytes)?;
            Frame::Data {
                stream_id,
                flags,
                payload,
            }
        }
        KIND_SYN_STREAM => {
            let (stream_id, flags, headers): (StreamId, ControlFlags, Headers) =
                body("SYN_STREAM", bytes)?;
            Frame::SynStream {
                stream_id,
                flags,
                headers,
            }
        }
        KIND_SYN_REPLY => {
            let (stream_id, flags, headers): (StreamId, ControlFlags, Headers) =
                body("SYN_REPLY", bytes)?;
            Frame::SynReply {
                stream_id,
                flags,
                headers,
            }
        }
        KIND_RST_STREAM => {
            let (stream_id, status): (StreamId, RstStatus) = body("RST_STREAM", bytes)?;
            Frame::RstStream { stream_id, status }
        }
        KIND_SETTINGS => {
            let entries: Vec<SettingsEntry> = body("SETTINGS", bytes)?;
            Frame::Settings { entries }
        }
        KIND_PING => {
            let id: u32 = body("PING", bytes)?;
            Frame::Ping { id }
        }
        KIND_GOAWAY => {
            let (last_stream_id, status): (StreamId, u32) = body("GOAWAY", bytes)?;
            Frame::Goaway {
                last_stream_id,
                status,
            }
        }
        KIND_HEADERS => {
            let (stream_id, flags, headers): (StreamId, ControlFlags, Headers) =
                body("HEADERS", bytes)?;
            Frame::Headers {
                stream_id,
                flags,
                headers,
            }
        }
        KIND_WINDOW_UPDATE => {
            let (stream_id, delta): (StreamId, u32) = body("WINDOW_UPDATE", bytes)?;
            Frame::WindowUpdate { stream_id, delta }
        }
        other => {
            tracing::debug!(kind = other, "decoded unknown frame kind");
            Frame::Unknown { kind: other }
        }
    };
    Ok(frame)
}

fn encode_frame(frame: Frame) -> Result<(u8, Vec<u8>), CodecError> {
    let standard = config::standard();
    let encoded = match frame {
        Frame::Data {
            stream_id,
            flags,
            payload,
        } => (KIND_DATA, encode_to_vec((stream_id, flags, payload), standard)?),
        Frame::SynStream {
            stream_id,
            flags,
            headers,
        } => (
            KIND_SYN_STREAM,
            encode_to_vec((stream_id, flags, headers), standard)?,
        ),
        Frame::SynReply {
            stream_id,
            flags,
            headers,
        } => (
            KIND_SYN_REPLY,
            encode_to_vec((stream_id, flags, headers), standard)?,
        ),
        Frame::RstStream { stream_id, status } => (
            KIND_RST_STREAM,
            encode_to_vec((stream_id, status), standard)?,
        ),
        Frame::Settings { entries } => (KIND_SETTINGS, encode_to_vec(entries, standard)?),
        Frame::Ping { id } => (KIND_PING, encode_to_vec(id, standard)?),
        Frame::Goaway {
            last_stream_id,
            status,
        } => (
            KIND_GOAWAY,
            encode_to_vec((last_stream_id, status), standard)?,
        ),
        Frame::Headers {
            stream_id,
            flags,
            headers,
        } => (
            KIND_HEADERS,
            encode_to_vec((stream_id, flags, headers), standard)?,
        ),
        Frame::WindowUpdate { stream_id, delta } => (
            KIND_WINDOW_UPDATE,
            encode_to_vec((stream_id, delta), standard)?,
        ),
        Frame::Unknown { kind } => (kind, Vec::new()),
    };
    Ok(encoded)
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        if src.len() < LENGTH_HEADER_SIZE {
            return Ok(None);
        }
        let mut header = [0u8; LENGTH_HEADER_SIZE];
        header.copy_from_slice(&src[..LENGTH_HEADER_SIZE]);
        let length = usize::try_from(u32::from_be_bytes(header)).unwrap_or(usize::MAX);
        if length > self.max_frame_length {
            return Err(CodecError::OversizedFrame {
                size: length,
                max: self.max_frame_length,
            });
        }
        if src.len() < LENGTH_HEADER_SIZE + length {
            return Ok(None);
        }
        src.advance(LENGTH_HEADER_SIZE);
        let envelope = src.split_to(length);
        let Some((&kind, bytes)) = envelope.split_first() else {
            return Err(CodecError::EmptyFrame);
        };
        decode_frame(kind, bytes).map(Some)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        if src.is_empty() {
            return Ok(None);
        }
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => Err(CodecError::Truncated {
                bytes_received: src.len(),
            }),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), CodecError> {
        let (kind, bytes) = encode_frame(frame)?;
        let size = bytes.len() + 1;
        if size > self.max_frame_length {
            return Err(CodecError::OversizedFrame {
                size,
                max: self.max_frame_length,
            });
        }
        dst.reserve(LENGTH_HEADER_SIZE + size);
        dst.put_u32(u32::try_from(size).unwrap_or(u32::MAX));
        dst.put_u8(kind);
        dst.extend_from_slice(&bytes);
        Ok(())
    }
}
