//! A minimal, sans-I/O-flavored HTTP/2 frame codec.
//!
//! This module is intentionally narrow: it understands only the frame
//! kinds the rest of this crate dispatches on (HEADERS, CONTINUATION, DATA,
//! SETTINGS, WINDOW_UPDATE) and treats everything else as an opaque,
//! ignorable `Unknown` frame. It does not implement HTTP/2 flow control,
//! priority scheduling, or most error-recovery frames (RST_STREAM,
//! GOAWAY, PING) beyond being able to skip over them on the wire.
//!
//! Modeled on the frame header layout and constant set of a sans-I/O HPACK
//! kernel: a 9-byte frame header (24-bit length, 8-bit type, 8-bit flags,
//! 31-bit stream id) followed by a type-specific payload.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// The fixed connection preface every HTTP/2 connection begins with.
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Size in bytes of a frame header (length + type + flags + stream id).
pub const HEADER_LEN: usize = 9;

/// Cap on the total bytes accumulated across a HEADERS + CONTINUATION... run
/// before it is treated as a protocol violation. Guards against an endpoint
/// that never sets END_HEADERS.
pub const MAX_HEADER_BLOCK_SIZE: usize = 256 * 1024;

pub mod frame_type {
    pub const DATA: u8 = 0x0;
    pub const HEADERS: u8 = 0x1;
    pub const PRIORITY: u8 = 0x2;
    pub const RST_STREAM: u8 = 0x3;
    pub const SETTINGS: u8 = 0x4;
    pub const PUSH_PROMISE: u8 = 0x5;
    pub const PING: u8 = 0x6;
    pub const GOAWAY: u8 = 0x7;
    pub const WINDOW_UPDATE: u8 = 0x8;
    pub const CONTINUATION: u8 = 0x9;
}

pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

pub mod settings_id {
    pub const HEADER_TABLE_SIZE: u16 = 0x1;
    pub const ENABLE_PUSH: u16 = 0x2;
    pub const MAX_CONCURRENT_STREAMS: u16 = 0x3;
    pub const INITIAL_WINDOW_SIZE: u16 = 0x4;
    pub const MAX_FRAME_SIZE: u16 = 0x5;
    pub const MAX_HEADER_LIST_SIZE: u16 = 0x6;
}

/// The parsed fixed-size frame header preceding every frame's payload.
#[derive(Debug, Clone, Copy)]
pub struct FrameHead {
    pub length: u32,
    pub kind: u8,
    pub flags: u8,
    pub stream_id: u32,
}

impl FrameHead {
    pub fn parse(raw: &[u8; HEADER_LEN]) -> Self {
        let length = u32::from_be_bytes([0, raw[0], raw[1], raw[2]]);
        let kind = raw[3];
        let flags = raw[4];
        let stream_id = u32::from_be_bytes([raw[5], raw[6], raw[7], raw[8]]) & 0x7fff_ffff;
        Self {
            length,
            kind,
            flags,
            stream_id,
        }
    }

    pub fn encode(&self, out: &mut BytesMut) {
        out.put_u8((self.length >> 16) as u8);
        out.put_u8((self.length >> 8) as u8);
        out.put_u8(self.length as u8);
        out.put_u8(self.kind);
        out.put_u8(self.flags);
        out.put_u32(self.stream_id & 0x7fff_ffff);
    }

    pub fn is_flag_set(&self, flag: u8) -> bool {
        self.flags & flag == flag
    }
}

/// One parsed HTTP/2 frame, narrowed to the kinds this crate cares about.
#[derive(Debug, Clone)]
pub enum Frame {
    Headers {
        stream_id: u32,
        block_fragment: Bytes,
        end_headers: bool,
        end_stream: bool,
    },
    Continuation {
        stream_id: u32,
        block_fragment: Bytes,
        end_headers: bool,
    },
    Data {
        stream_id: u32,
        payload: Bytes,
        end_stream: bool,
    },
    Settings {
        ack: bool,
        params: Vec<(u16, u32)>,
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
    /// A frame kind this codec does not interpret. Carried through so a
    /// caller may choose to skip it silently.
    Unknown { head: FrameHead },
}

impl Frame {
    pub fn stream_id(&self) -> u32 {
        match self {
            Frame::Headers { stream_id, .. }
            | Frame::Continuation { stream_id, .. }
            | Frame::Data { stream_id, .. }
            | Frame::WindowUpdate { stream_id, .. } => *stream_id,
            Frame::Settings { .. } => 0,
            Frame::Unknown { head } => head.stream_id,
        }
    }
}

/// Reads exactly one frame from `reader`, including any header-padding it
/// declares. Unknown frame kinds have their payload consumed but not
/// interpreted.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame> {
    let mut head_buf = [0u8; HEADER_LEN];
    reader.read_exact(&mut head_buf).await.map_err(Error::from)?;
    let head = FrameHead::parse(&head_buf);

    let mut payload = vec![0u8; head.length as usize];
    reader.read_exact(&mut payload).await.map_err(Error::from)?;
    let mut payload = Bytes::from(payload);

    parse_payload(head, &mut payload)
}

fn strip_padding(head: &FrameHead, payload: &mut Bytes) -> Result<()> {
    if head.is_flag_set(flags::PADDED) {
        if payload.is_empty() {
            return Err(Error::new_protocol_violation(
                "PADDED flag set but frame has no pad length byte",
            ));
        }
        let pad_len = payload.split_to(1)[0] as usize;
        if pad_len > payload.len() {
            return Err(Error::new_protocol_violation(
                "padding length exceeds remaining frame payload",
            ));
        }
        let keep = payload.len() - pad_len;
        payload.truncate(keep);
    }
    Ok(())
}

fn parse_payload(head: FrameHead, payload: &mut Bytes) -> Result<Frame> {
    match head.kind {
        frame_type::HEADERS => {
            strip_padding(&head, payload)?;
            if head.is_flag_set(flags::PRIORITY) {
                if payload.len() < 5 {
                    return Err(Error::new_protocol_violation(
                        "HEADERS PRIORITY flag set but frame too short",
                    ));
                }
                payload.advance(5);
            }
            Ok(Frame::Headers {
                stream_id: head.stream_id,
                block_fragment: payload.clone(),
                end_headers: head.is_flag_set(flags::END_HEADERS),
                end_stream: head.is_flag_set(flags::END_STREAM),
            })
        }
        frame_type::CONTINUATION => Ok(Frame::Continuation {
            stream_id: head.stream_id,
            block_fragment: payload.clone(),
            end_headers: head.is_flag_set(flags::END_HEADERS),
        }),
        frame_type::DATA => {
            strip_padding(&head, payload)?;
            Ok(Frame::Data {
                stream_id: head.stream_id,
                payload: payload.clone(),
                end_stream: head.is_flag_set(flags::END_STREAM),
            })
        }
        frame_type::SETTINGS => {
            if head.is_flag_set(flags::ACK) {
                return Ok(Frame::Settings {
                    ack: true,
                    params: Vec::new(),
                });
            }
            if payload.len() % 6 != 0 {
                return Err(Error::new_protocol_violation(
                    "SETTINGS payload length is not a multiple of 6",
                ));
            }
            let mut params = Vec::with_capacity(payload.len() / 6);
            while payload.has_remaining() {
                let id = payload.get_u16();
                let value = payload.get_u32();
                params.push((id, value));
            }
            Ok(Frame::Settings { ack: false, params })
        }
        frame_type::WINDOW_UPDATE => {
            if payload.len() != 4 {
                return Err(Error::new_protocol_violation(
                    "WINDOW_UPDATE payload must be 4 bytes",
                ));
            }
            let increment = payload.get_u32() & 0x7fff_ffff;
            Ok(Frame::WindowUpdate {
                stream_id: head.stream_id,
                increment,
            })
        }
        _ => Ok(Frame::Unknown { head }),
    }
}

/// Writes a single HEADERS frame (no CONTINUATION) with the given already
/// HPACK-encoded `block`. Callers needing to split a block across multiple
/// frames should use [`split_header_block`] and write each piece with the
/// appropriate head flags themselves.
pub async fn write_raw_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    head: FrameHead,
    payload: &[u8],
) -> Result<()> {
    let mut out = BytesMut::with_capacity(HEADER_LEN + payload.len());
    let mut head = head;
    head.length = payload.len() as u32;
    head.encode(&mut out);
    out.extend_from_slice(payload);
    writer.write_all(&out).await.map_err(Error::from)?;
    Ok(())
}

/// Splits an HPACK-encoded header block into `(is_first, chunk)` pieces no
/// larger than `max_frame_size`. The first piece is meant to go out as a
/// HEADERS frame, subsequent ones as CONTINUATION frames.
pub fn split_header_block(block: &[u8], max_frame_size: usize) -> Vec<&[u8]> {
    if block.is_empty() {
        return vec![&[]];
    }
    block.chunks(max_frame_size.max(1)).collect()
}

pub fn encode_settings_params(params: &[(u16, u32)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(params.len() * 6);
    for (id, value) in params {
        out.extend_from_slice(&id.to_be_bytes());
        out.extend_from_slice(&value.to_be_bytes());
    }
    out
}
