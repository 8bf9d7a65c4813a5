//! `Http2Layer`: the single demultiplex/multiplex loop driving one bridged
//! HTTP/2 session between a client-facing and a server-facing transport.

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::config::Http2Config;
use crate::endpoint::{ConnectionEndpoint, Role};
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::stream::{reap_finished_streams, StreamBridge, StreamTable};
use crate::worker::Inspector;

/// Drives one HTTP/2 session end to end: performs both connection
/// prefaces, then loops reading frames from whichever transport has one
/// ready, dispatching each according to the precedence rules in this
/// crate's specification.
pub struct Http2Layer<TC, TS, I> {
    client: ConnectionEndpoint<ReadHalf<TC>, WriteHalf<TC>>,
    server: ConnectionEndpoint<ReadHalf<TS>, WriteHalf<TS>>,
    streams: StreamTable,
    inspector: I,
    config: Http2Config,
    cancellation: CancellationToken,
}

impl<TC, TS, I> Http2Layer<TC, TS, I>
where
    TC: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    TS: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    I: Inspector + Clone,
{
    pub fn new(client_transport: TC, server_transport: TS, config: Http2Config, inspector: I) -> Self {
        Self::with_cancellation(
            client_transport,
            server_transport,
            config,
            inspector,
            CancellationToken::new(),
        )
    }

    /// As [`Http2Layer::new`], but lets the caller supply their own
    /// cancellation token so an external shutdown signal can stop `run`.
    pub fn with_cancellation(
        client_transport: TC,
        server_transport: TS,
        config: Http2Config,
        inspector: I,
        cancellation: CancellationToken,
    ) -> Self {
        let (client_reader, client_writer) = tokio::io::split(client_transport);
        let (server_reader, server_writer) = tokio::io::split(server_transport);
        let client = ConnectionEndpoint::new(Role::ClientFacing, client_reader, client_writer, config.clone());
        let server = ConnectionEndpoint::new(Role::ServerFacing, server_reader, server_writer, config.clone());
        Self {
            client,
            server,
            streams: StreamTable::new(),
            inspector,
            config,
            cancellation,
        }
    }

    /// Performs both connection prefaces. Split out from [`Http2Layer::run`]
    /// so a caller can observe a bad client preface separately from any
    /// later dispatch error.
    pub async fn perform_prefaces(&mut self) -> Result<()> {
        self.client.perform_preface().await?;
        self.server.perform_preface().await?;
        info!("both connection prefaces complete");
        Ok(())
    }

    /// Runs the demux/mux loop until either transport closes, a
    /// connection-fatal error occurs, or cancellation is requested.
    pub async fn run(mut self) -> Result<()> {
        self.perform_prefaces().await?;

        loop {
            tokio::select! {
                biased;

                _ = self.cancellation.cancelled() => {
                    debug!("http2 layer cancelled");
                    self.teardown().await;
                    return Ok(());
                }

                frame = self.client.read_frame() => {
                    match frame {
                        Ok(frame) => self.handle_client_frame(frame).await?,
                        Err(err) if is_clean_eof(&err) => return Ok(()),
                        Err(err) => return Err(err),
                    }
                }

                frame = self.server.read_frame() => {
                    match frame {
                        Ok(frame) => self.handle_server_frame(frame).await?,
                        Err(err) if is_clean_eof(&err) => return Ok(()),
                        Err(err) => return Err(err),
                    }
                }
            }

            reap_finished_streams(&mut self.streams);
        }
    }

    /// Tears down both endpoints on cancellation: aborts every stream
    /// worker's task outright (a `JoinHandle` does not cancel its task on
    /// drop, so an un-awaited, un-aborted worker keeps running orphaned)
    /// and shuts down both transports' write halves, so any worker that
    /// slips past the abort and is mid-write observes an I/O failure
    /// rather than blocking forever.
    async fn teardown(&mut self) {
        for bridge in self.streams.values() {
            bridge.abort();
        }
        self.streams.clear();

        if let Err(err) = self.client.handle().shutdown_writer().await {
            debug!(%err, "error shutting down client-facing writer during teardown");
        }
        if let Err(err) = self.server.handle().shutdown_writer().await {
            debug!(%err, "error shutting down server-facing writer during teardown");
        }
    }

    async fn handle_client_frame(&mut self, frame: Frame) -> Result<()> {
        match frame {
            Frame::Headers {
                stream_id,
                block_fragment,
                end_headers,
                end_stream,
            } => {
                if self.streams.contains_key(&stream_id) {
                    return Err(Error::new_protocol_violation(
                        "client HEADERS for a stream id that is already open",
                    ));
                }
                let headers = self
                    .client
                    .read_and_reassemble_headers(stream_id, block_fragment, end_headers)
                    .await?;
                trace!(stream_id, "opening new stream from client HEADERS");

                let mut bridge = StreamBridge::spawn(
                    stream_id,
                    self.config.clone(),
                    self.server.handle(),
                    self.client.handle(),
                    self.inspector.clone(),
                );
                bridge.deliver_client_headers(headers, end_stream).await?;
                self.streams.insert(stream_id, bridge);
                Ok(())
            }
            Frame::Data { stream_id, payload, end_stream } => {
                let bridge = self.streams.get_mut(&stream_id).ok_or_else(|| {
                    Error::new_protocol_violation("client DATA for an unknown stream id")
                })?;
                bridge.forward_client_data(&payload, end_stream).await
            }
            Frame::Settings { ack, .. } => {
                if !ack {
                    self.client.handle().send_settings_ack().await?;
                }
                Ok(())
            }
            Frame::WindowUpdate { .. } => Ok(()),
            Frame::Continuation { .. } => Err(Error::new_protocol_violation(
                "unexpected CONTINUATION frame outside an open header run",
            )),
            Frame::Unknown { .. } => Ok(()),
        }
    }

    async fn handle_server_frame(&mut self, frame: Frame) -> Result<()> {
        match frame {
            Frame::Headers {
                stream_id,
                block_fragment,
                end_headers,
                end_stream,
            } => {
                let headers = self
                    .server
                    .read_and_reassemble_headers(stream_id, block_fragment, end_headers)
                    .await?;
                let bridge = self.streams.get_mut(&stream_id).ok_or_else(|| {
                    Error::new_protocol_violation("server HEADERS for an unknown stream id")
                })?;
                bridge.deliver_server_headers(headers, end_stream).await
            }
            Frame::Data { stream_id, payload, end_stream } => {
                let bridge = self.streams.get_mut(&stream_id).ok_or_else(|| {
                    Error::new_protocol_violation("server DATA for an unknown stream id")
                })?;
                bridge.forward_server_data(&payload, end_stream).await
            }
            Frame::Settings { ack, .. } => {
                if !ack {
                    self.server.handle().send_settings_ack().await?;
                }
                Ok(())
            }
            Frame::WindowUpdate { .. } => Ok(()),
            Frame::Continuation { .. } => Err(Error::new_protocol_violation(
                "unexpected CONTINUATION frame outside an open header run",
            )),
            Frame::Unknown { .. } => Ok(()),
        }
    }
}

fn is_clean_eof(err: &Error) -> bool {
    err.find_source::<std::io::Error>()
        .map(|io_err| io_err.kind() == std::io::ErrorKind::UnexpectedEof)
        .unwrap_or(false)
}
