//! Per-stream translation between HTTP/2 frames and an HTTP/1-shaped
//! request/response pair, and the seam (`Inspector`) at which the external
//! inspection pipeline plugs in.

use std::future::Future;

use bytes::Bytes;
use tokio::io::{AsyncWrite, ReadHalf};
use tokio::sync::oneshot;
use tracing::{trace, warn};

use crate::body;
use crate::config::Http2Config;
use crate::endpoint::EndpointHandle;
use crate::error::{Error, Result};
use crate::headers::HeaderList;
use crate::pipe::Pipe;

/// An HTTP/1-shaped view of one HTTP/2 request.
#[derive(Debug, Clone)]
pub struct Request {
    pub headers: HeaderList,
    pub body: Bytes,
}

impl Request {
    pub fn method(&self) -> Option<&Bytes> {
        self.headers.pseudo(b":method")
    }

    pub fn scheme(&self) -> Option<&Bytes> {
        self.headers.pseudo(b":scheme")
    }

    pub fn path(&self) -> Option<&Bytes> {
        self.headers.pseudo(b":path")
    }
}

/// An HTTP/1-shaped view of one HTTP/2 response.
#[derive(Debug, Clone)]
pub struct Response {
    pub headers: HeaderList,
    pub body: Bytes,
}

impl Response {
    pub fn status(&self) -> Option<u16> {
        self.headers
            .pseudo(b":status")
            .and_then(|v| std::str::from_utf8(v).ok())
            .and_then(|s| s.parse().ok())
    }
}

/// The seam at which the (out of scope) HTTP/1-based inspection/scripting
/// pipeline observes and may rewrite each request and response. Mirrors the
/// role `HttpService` plays at the boundary of a connection driver: the
/// bridge core doesn't know or care what the implementation does, only
/// that it returns a (possibly modified) message.
pub trait Inspector: Send + Sync + 'static {
    fn inspect_request(&self, request: Request) -> impl Future<Output = Result<Request>> + Send + '_;

    fn inspect_response(&self, response: Response) -> impl Future<Output = Result<Response>> + Send + '_;
}

/// The default `Inspector`: forwards every request and response unchanged.
/// Used by tests and by callers who have not yet wired up a real
/// inspection pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughInspector;

impl Inspector for PassthroughInspector {
    async fn inspect_request(&self, request: Request) -> Result<Request> {
        Ok(request)
    }

    async fn inspect_response(&self, response: Response) -> Result<Response> {
        Ok(response)
    }
}

/// Everything a stream worker needs: the two body pipes' consume ends, the
/// two single-slot header queues, and handles to write onto each endpoint.
pub struct StreamWorkerIo<CW, SW> {
    pub stream_id: u32,
    pub client_headers_rx: oneshot::Receiver<HeaderList>,
    pub server_headers_rx: oneshot::Receiver<HeaderList>,
    pub client_body_rx: ReadHalf<Pipe>,
    pub server_body_rx: ReadHalf<Pipe>,
    pub to_server: EndpointHandle<SW>,
    pub to_client: EndpointHandle<CW>,
    pub config: Http2Config,
}

/// Runs one stream's full request/response translation: read the request
/// off the client pipe, hand it to the inspector, forward it to the server
/// endpoint, then do the symmetric thing for the response.
pub async fn run_stream<CW, SW, I>(mut io: StreamWorkerIo<CW, SW>, inspector: I) -> Result<()>
where
    CW: AsyncWrite + Unpin,
    SW: AsyncWrite + Unpin,
    I: Inspector,
{
    let request = read_request(&mut io).await?;
    trace!(stream_id = io.stream_id, "read request");

    let request = inspector.inspect_request(request).await?;
    send_request(&io, &request).await?;

    let response = read_response(&mut io).await?;
    trace!(stream_id = io.stream_id, "read response");

    let response = inspector.inspect_response(response).await?;
    send_response(&io, &response).await?;

    Ok(())
}

async fn read_request<CW, SW>(io: &mut StreamWorkerIo<CW, SW>) -> Result<Request> {
    let headers = (&mut io.client_headers_rx)
        .await
        .map_err(|_| Error::new_malformed_request("client header queue dropped before headers arrived"))?;

    if headers.pseudo(b":method").is_none()
        || headers.pseudo(b":scheme").is_none()
        || headers.pseudo(b":path").is_none()
    {
        return Err(Error::new_malformed_request(
            "request missing a required pseudo-header",
        ));
    }
    if headers.pseudo(b":method").map(|m| m.as_ref()) == Some(b"CONNECT") {
        return Err(Error::new_unsupported("CONNECT is not supported"));
    }

    let length = body::resolved_length(&headers, true)?;
    let body = body::read_body(&mut io.client_body_rx, length, io.config.body_size_limit, true).await?;

    Ok(Request { headers, body })
}

async fn send_request<CW, SW: AsyncWrite + Unpin>(
    io: &StreamWorkerIo<CW, SW>,
    request: &Request,
) -> Result<()> {
    let end_stream = request.body.is_empty();
    io.to_server
        .send_headers(&request.headers, io.stream_id, end_stream)
        .await?;
    if !end_stream {
        io.to_server
            .send_data(&request.body, io.stream_id, true)
            .await?;
    }
    Ok(())
}

async fn read_response<CW, SW>(io: &mut StreamWorkerIo<CW, SW>) -> Result<Response> {
    let headers = (&mut io.server_headers_rx)
        .await
        .map_err(|_| Error::new_malformed_response("server header queue dropped before headers arrived"))?;

    if headers.pseudo(b":status").is_none() {
        return Err(Error::new_malformed_response("response missing :status"));
    }
    let status_text = headers.pseudo(b":status").unwrap();
    if std::str::from_utf8(status_text)
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .is_none()
    {
        warn!(stream_id = io.stream_id, "response had an unparsable :status");
        return Err(Error::new_malformed_response(":status is not a valid status code"));
    }

    let length = body::resolved_length(&headers, false)?;
    let body = body::read_body(&mut io.server_body_rx, length, io.config.body_size_limit, false).await?;

    Ok(Response { headers, body })
}

async fn send_response<CW: AsyncWrite + Unpin, SW>(
    io: &StreamWorkerIo<CW, SW>,
    response: &Response,
) -> Result<()> {
    let end_stream = response.body.is_empty();
    io.to_client
        .send_headers(&response.headers, io.stream_id, end_stream)
        .await?;
    if !end_stream {
        io.to_client
            .send_data(&response.body, io.stream_id, true)
            .await?;
    }
    Ok(())
}
