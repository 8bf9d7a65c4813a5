//! A minimal HTTP/1-shaped body reader.
//!
//! HTTP/2 never uses `Transfer-Encoding: chunked` — framing is carried by
//! DATA frames and the stream's END_STREAM flag — so the only thing this
//! reader needs to resolve from headers is whether a `content-length` was
//! declared. If not, the body is read until the pipe reports EOF (mirroring
//! a close-delimited HTTP/1 body), bounded by the configured size limit.
//!
//! Bodies are read eagerly and fully materialized, the same way the
//! original request/response translation buffers a complete body before
//! handing it to the inspection pipeline.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};
use crate::headers::HeaderList;

/// The body length resolved from a header list, mirroring the
/// known/unknown split every HTTP/1 body reader has to make.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyLength {
    /// `content-length` was present and parsed successfully.
    Known(u64),
    /// No `content-length`; read until the transport signals EOF.
    Unknown,
}

/// Resolves the body length for a header list. HTTP/2 requests/responses
/// never carry `Transfer-Encoding: chunked`; a present-but-unparsable
/// `content-length` is a malformed-message condition.
pub fn resolved_length(headers: &HeaderList, is_request: bool) -> Result<BodyLength> {
    match headers.get("content-length") {
        Some(value) => {
            let text = std::str::from_utf8(value).map_err(|_| {
                new_malformed(is_request, "content-length is not valid UTF-8")
            })?;
            let len: u64 = text
                .parse()
                .map_err(|_| new_malformed(is_request, "content-length is not a valid integer"))?;
            Ok(BodyLength::Known(len))
        }
        None => Ok(BodyLength::Unknown),
    }
}

fn new_malformed(is_request: bool, msg: &'static str) -> Error {
    if is_request {
        Error::new_malformed_request(msg)
    } else {
        Error::new_malformed_response(msg)
    }
}

/// Reads a full body from `reader` according to `length`, never exceeding
/// `limit` bytes.
pub async fn read_body<R: AsyncRead + Unpin>(
    reader: &mut R,
    length: BodyLength,
    limit: usize,
    is_request: bool,
) -> Result<Bytes> {
    match length {
        BodyLength::Known(len) => {
            if len as usize > limit {
                return Err(new_malformed(is_request, "declared body length exceeds configured limit"));
            }
            let mut buf = vec![0u8; len as usize];
            reader.read_exact(&mut buf).await.map_err(Error::from)?;
            Ok(Bytes::from(buf))
        }
        BodyLength::Unknown => {
            let mut buf = BytesMut::with_capacity(8 * 1024);
            let mut total = 0usize;
            let mut chunk = [0u8; 8 * 1024];
            loop {
                let n = reader.read(&mut chunk).await.map_err(Error::from)?;
                if n == 0 {
                    break;
                }
                total += n;
                if total > limit {
                    return Err(new_malformed(is_request, "body exceeded configured size limit"));
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            Ok(buf.freeze())
        }
    }
}
