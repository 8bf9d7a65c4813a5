//! `StreamBridge`: the per-stream pair of body pipes, header queues, and
//! worker task that together translate one HTTP/2 stream into an
//! HTTP/1-shaped request/response cycle.

use std::collections::HashMap;

use tokio::io::{AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::Http2Config;
use crate::endpoint::EndpointHandle;
use crate::error::{Error, Result};
use crate::headers::HeaderList;
use crate::pipe::{make_pipe, Pipe, DEFAULT_PIPE_BUFFER};
use crate::worker::{run_stream, Inspector, StreamWorkerIo};

/// A single open HTTP/2 stream, from the demux loop's point of view: two
/// write-only handles into the stream's body pipes, two single-slot header
/// senders, and the join handle of the worker task translating this stream.
pub struct StreamBridge {
    stream_id: u32,
    client_inject: WriteHalf<Pipe>,
    server_inject: WriteHalf<Pipe>,
    client_headers_tx: Option<oneshot::Sender<HeaderList>>,
    server_headers_tx: Option<oneshot::Sender<HeaderList>>,
    worker: JoinHandle<()>,
}

impl StreamBridge {
    /// Allocates the pipes and header queues for a new stream and spawns
    /// its worker task. `to_server` and `to_client` are handles to the
    /// *opposite* endpoint from the one this stream was opened on, since
    /// that is the endpoint the worker must forward translated messages to.
    pub fn spawn<CW, SW, I>(
        stream_id: u32,
        config: Http2Config,
        to_server: EndpointHandle<SW>,
        to_client: EndpointHandle<CW>,
        inspector: I,
    ) -> Self
    where
        CW: AsyncWrite + Unpin + Send + 'static,
        SW: AsyncWrite + Unpin + Send + 'static,
        I: Inspector + Clone,
    {
        let (client_inject, client_consume) = make_pipe(DEFAULT_PIPE_BUFFER);
        let (server_inject, server_consume) = make_pipe(DEFAULT_PIPE_BUFFER);
        let (client_headers_tx, client_headers_rx) = oneshot::channel();
        let (server_headers_tx, server_headers_rx) = oneshot::channel();

        let io = StreamWorkerIo {
            stream_id,
            client_headers_rx,
            server_headers_rx,
            client_body_rx: client_consume,
            server_body_rx: server_consume,
            to_server,
            to_client,
            config,
        };

        let worker = tokio::spawn(async move {
            if let Err(err) = run_stream(io, inspector).await {
                warn!(stream_id, %err, "stream worker exited with an error");
            }
        });

        Self {
            stream_id,
            client_inject,
            server_inject,
            client_headers_tx: Some(client_headers_tx),
            server_headers_tx: Some(server_headers_tx),
            worker,
        }
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Delivers the reassembled request header list. Populated exactly
    /// once; a second call is a caller bug and is ignored other than being
    /// logged, since the oneshot sender is already consumed.
    pub async fn deliver_client_headers(&mut self, headers: HeaderList, end_stream: bool) -> Result<()> {
        match self.client_headers_tx.take() {
            Some(tx) => {
                let _ = tx.send(headers);
            }
            None => warn!(stream_id = self.stream_id, "duplicate client HEADERS for stream"),
        }
        if end_stream {
            self.client_inject.shutdown().await.map_err(Error::from)?;
        }
        Ok(())
    }

    /// Delivers the reassembled response header list.
    pub async fn deliver_server_headers(&mut self, headers: HeaderList, end_stream: bool) -> Result<()> {
        match self.server_headers_tx.take() {
            Some(tx) => {
                let _ = tx.send(headers);
            }
            None => warn!(stream_id = self.stream_id, "duplicate server HEADERS for stream"),
        }
        if end_stream {
            self.server_inject.shutdown().await.map_err(Error::from)?;
        }
        Ok(())
    }

    /// Forwards a client-origin DATA frame's payload into the request body
    /// pipe, shutting the pipe's write half if this was the final frame.
    pub async fn forward_client_data(&mut self, payload: &[u8], end_stream: bool) -> Result<()> {
        self.client_inject.write_all(payload).await.map_err(Error::from)?;
        if end_stream {
            self.client_inject.shutdown().await.map_err(Error::from)?;
        }
        Ok(())
    }

    /// Forwards a server-origin DATA frame's payload into the response body
    /// pipe, shutting the pipe's write half if this was the final frame.
    pub async fn forward_server_data(&mut self, payload: &[u8], end_stream: bool) -> Result<()> {
        self.server_inject.write_all(payload).await.map_err(Error::from)?;
        if end_stream {
            self.server_inject.shutdown().await.map_err(Error::from)?;
        }
        Ok(())
    }

    /// True once the worker task has returned, successfully or not.
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Aborts the worker task. Used on connection teardown, where the
    /// worker's only remaining purpose is to be stopped rather than let
    /// run to completion.
    pub fn abort(&self) {
        self.worker.abort();
    }
}

/// The demux loop's stream table: stream_id -> bridge, with no ordering
/// guarantee across entries.
pub type StreamTable = HashMap<u32, StreamBridge>;

/// Removes every finished stream from `table`. Called periodically by the
/// demux loop to bound memory, since neither direction's END_STREAM alone
/// removes an entry (the worker may still be forwarding the other
/// direction).
pub fn reap_finished_streams(table: &mut StreamTable) {
    table.retain(|_, bridge| !bridge.is_finished());
}
