//! `ConnectionEndpoint`: one side of a bridged HTTP/2 connection.
//!
//! Each endpoint owns exactly one HPACK encoder and one HPACK decoder.
//! The decoder (and the reader half of the transport) stays exclusive to
//! whichever task is pumping frames off this endpoint — only that task
//! ever sees this endpoint's incoming frames, so no lock is needed there.
//! The encoder is paired with the writer half under a single mutex,
//! because outbound HEADERS + CONTINUATION runs must reach the wire
//! contiguously and HPACK-encode under the same exclusive section that
//! serializes the write.

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::config::{
    Http2Config, ADVERTISED_INITIAL_WINDOW_SIZE, CONNECTION_WINDOW_UPDATE_INCREMENT,
};
use crate::error::{Error, Result};
use crate::frame::{self, flags, frame_type, settings_id, Frame, FrameHead};
use crate::headers::HeaderList;
use crate::hpack::{HpackDecoder, HpackEncoder};

/// Which side of the bridged connection an endpoint represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Faces the downstream client: reads the preface, is read from first.
    ClientFacing,
    /// Faces the upstream server: writes the preface.
    ServerFacing,
}

struct WriteState<W> {
    writer: W,
    encoder: HpackEncoder,
}

/// A cloneable, `Send + Sync` handle to an endpoint's writer half and HPACK
/// encoder. Stream workers hold one of these for the *opposite* endpoint
/// (the one they need to forward translated requests/responses onto).
pub struct EndpointHandle<W> {
    role: Role,
    state: Arc<Mutex<WriteState<W>>>,
    max_frame_size: u32,
}

// Implemented by hand rather than derived: `Arc<Mutex<_>>` is `Clone`
// regardless of `W`, but `#[derive(Clone)]` would add a spurious `W: Clone`
// bound onto this handle.
impl<W> Clone for EndpointHandle<W> {
    fn clone(&self) -> Self {
        Self {
            role: self.role,
            state: Arc::clone(&self.state),
            max_frame_size: self.max_frame_size,
        }
    }
}

impl<W: AsyncWrite + Unpin> EndpointHandle<W> {
    pub fn role(&self) -> Role {
        self.role
    }

    /// Encodes `headers` and writes a HEADERS frame followed by zero or
    /// more CONTINUATION frames, all under one acquisition of the write
    /// lock so no other frame can interleave with this run on the wire.
    pub async fn send_headers(
        &self,
        headers: &HeaderList,
        stream_id: u32,
        end_stream: bool,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let block = state.encoder.encode(headers);
        let chunks = frame::split_header_block(&block, self.max_frame_size as usize);
        let last = chunks.len() - 1;

        for (i, chunk) in chunks.iter().enumerate() {
            let is_first = i == 0;
            let is_last = i == last;
            let kind = if is_first {
                frame_type::HEADERS
            } else {
                frame_type::CONTINUATION
            };
            let mut flag_bits = 0u8;
            if is_last {
                flag_bits |= flags::END_HEADERS;
            }
            if is_first && end_stream {
                flag_bits |= flags::END_STREAM;
            }
            let head = FrameHead {
                length: chunk.len() as u32,
                kind,
                flags: flag_bits,
                stream_id,
            };
            frame::write_raw_frame(&mut state.writer, head, chunk).await?;
        }
        state.writer.flush().await.map_err(Error::from)?;
        trace!(stream_id, end_stream, "sent headers");
        Ok(())
    }

    /// Splits `payload` into DATA frames of at most `max_frame_size` bytes.
    /// Each frame is written under its own acquisition of the write lock,
    /// so DATA frames for different streams MAY interleave on the wire —
    /// only same-stream ordering and HEADERS atomicity are guaranteed.
    pub async fn send_data(&self, payload: &[u8], stream_id: u32, end_stream: bool) -> Result<()> {
        if payload.is_empty() {
            return self.send_data_frame(&[], stream_id, end_stream).await;
        }
        let max = self.max_frame_size as usize;
        let mut offset = 0;
        while offset < payload.len() {
            let end = (offset + max).min(payload.len());
            let is_last = end == payload.len();
            self.send_data_frame(&payload[offset..end], stream_id, is_last && end_stream)
                .await?;
            offset = end;
        }
        Ok(())
    }

    async fn send_data_frame(&self, chunk: &[u8], stream_id: u32, end_stream: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        let head = FrameHead {
            length: chunk.len() as u32,
            kind: frame_type::DATA,
            flags: if end_stream { flags::END_STREAM } else { 0 },
            stream_id,
        };
        frame::write_raw_frame(&mut state.writer, head, chunk).await?;
        state.writer.flush().await.map_err(Error::from)?;
        Ok(())
    }

    /// Shuts down the transport's write half. Used on connection teardown
    /// to unblock any stream worker currently writing through this handle,
    /// so it observes an I/O error instead of hanging forever.
    pub async fn shutdown_writer(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.writer.shutdown().await.map_err(Error::from)
    }

    /// Sends an empty SETTINGS frame with the ACK flag set, back to the
    /// endpoint that sent us a non-ACK SETTINGS frame.
    pub async fn send_settings_ack(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let head = FrameHead {
            length: 0,
            kind: frame_type::SETTINGS,
            flags: flags::ACK,
            stream_id: 0,
        };
        frame::write_raw_frame(&mut state.writer, head, &[]).await?;
        state.writer.flush().await.map_err(Error::from)?;
        Ok(())
    }

    /// Sends the fixed initial SETTINGS frame and the follow-up
    /// connection-level WINDOW_UPDATE every bridged connection emits right
    /// after the preface. `disable_push` additionally sends
    /// `SETTINGS_ENABLE_PUSH = 0`, which only the server-facing endpoint
    /// does (the proxy plays the HTTP/2 *client* role there, and it is the
    /// client's prerogative to tell the server it won't accept pushes).
    pub async fn send_initial_settings(&self, config: &Http2Config, disable_push: bool) -> Result<()> {
        let mut params = vec![
            (
                settings_id::MAX_CONCURRENT_STREAMS,
                config.max_concurrent_streams,
            ),
            (
                settings_id::INITIAL_WINDOW_SIZE,
                ADVERTISED_INITIAL_WINDOW_SIZE,
            ),
        ];
        if disable_push {
            params.push((settings_id::ENABLE_PUSH, 0));
        }
        let payload = frame::encode_settings_params(&params);

        let mut state = self.state.lock().await;
        let head = FrameHead {
            length: payload.len() as u32,
            kind: frame_type::SETTINGS,
            flags: 0,
            stream_id: 0,
        };
        frame::write_raw_frame(&mut state.writer, head, &payload).await?;

        let mut wu = Vec::with_capacity(4);
        wu.extend_from_slice(&CONNECTION_WINDOW_UPDATE_INCREMENT.to_be_bytes());
        let head = FrameHead {
            length: 4,
            kind: frame_type::WINDOW_UPDATE,
            flags: 0,
            stream_id: 0,
        };
        frame::write_raw_frame(&mut state.writer, head, &wu).await?;
        state.writer.flush().await.map_err(Error::from)?;
        Ok(())
    }
}

/// One side of a bridged HTTP/2 connection: the reader half, the HPACK
/// decoder, and a handle to the writer half + HPACK encoder.
pub struct ConnectionEndpoint<R, W> {
    role: Role,
    reader: R,
    decoder: HpackDecoder,
    handle: EndpointHandle<W>,
    config: Http2Config,
}

impl<R, W> ConnectionEndpoint<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(role: Role, reader: R, writer: W, config: Http2Config) -> Self {
        let handle = EndpointHandle {
            role,
            max_frame_size: config.max_frame_size,
            state: Arc::new(Mutex::new(WriteState {
                writer,
                encoder: HpackEncoder::new(),
            })),
        };
        Self {
            role,
            reader,
            decoder: HpackDecoder::new(),
            handle,
            config,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn handle(&self) -> EndpointHandle<W> {
        self.handle.clone()
    }

    /// Performs this endpoint's half of the connection preface, then sends
    /// the fixed initial SETTINGS + WINDOW_UPDATE pair every bridged
    /// connection emits.
    pub async fn perform_preface(&mut self) -> Result<()> {
        match self.role {
            Role::ClientFacing => {
                let mut buf = vec![0u8; frame::CONNECTION_PREFACE.len()];
                tokio::io::AsyncReadExt::read_exact(&mut self.reader, &mut buf)
                    .await
                    .map_err(Error::from)?;
                if buf != frame::CONNECTION_PREFACE {
                    return Err(Error::new_bad_preface());
                }
                self.handle.send_initial_settings(&self.config, false).await?;
            }
            Role::ServerFacing => {
                {
                    let mut state = self.handle.state.lock().await;
                    state
                        .writer
                        .write_all(frame::CONNECTION_PREFACE)
                        .await
                        .map_err(Error::from)?;
                    state.writer.flush().await.map_err(Error::from)?;
                }
                self.handle.send_initial_settings(&self.config, true).await?;
            }
        }
        debug!(role = ?self.role, "preface complete");
        Ok(())
    }

    /// Reads exactly one frame from this endpoint's transport.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        frame::read_frame(&mut self.reader).await
    }

    /// Given the HEADERS frame that opened a header-block run, reads
    /// CONTINUATION frames from this endpoint's transport (and only this
    /// endpoint's transport — no other stream's frames can legally appear
    /// mid-run) until END_HEADERS, then HPACK-decodes the concatenated
    /// fragments.
    ///
    /// A decode failure, or any frame in the run mismatching `stream_id` or
    /// not being a CONTINUATION, is connection-fatal: HPACK decoder state
    /// afterward is undefined.
    pub async fn read_and_reassemble_headers(
        &mut self,
        stream_id: u32,
        first_fragment: Bytes,
        first_end_headers: bool,
    ) -> Result<HeaderList> {
        let mut block = Vec::with_capacity(first_fragment.len());
        block.extend_from_slice(&first_fragment);
        let mut end_headers = first_end_headers;

        while !end_headers {
            if block.len() > self.config.max_header_block_size {
                return Err(Error::new_protocol_violation(
                    "accumulated header block exceeds configured maximum",
                ));
            }
            match self.read_frame().await? {
                Frame::Continuation {
                    stream_id: sid,
                    block_fragment,
                    end_headers: eh,
                } => {
                    if sid != stream_id {
                        return Err(Error::new_protocol_violation(
                            "CONTINUATION frame stream id did not match the open header run",
                        ));
                    }
                    block.extend_from_slice(&block_fragment);
                    end_headers = eh;
                }
                _ => {
                    return Err(Error::new_protocol_violation(
                        "expected CONTINUATION frame to continue an open header run",
                    ));
                }
            }
        }

        if block.len() > self.config.max_header_block_size {
            return Err(Error::new_protocol_violation(
                "accumulated header block exceeds configured maximum",
            ));
        }

        self.decoder.decode(&block)
    }
}
