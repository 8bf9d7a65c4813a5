//! The in-process byte pipe used to carry one direction of one stream's
//! body bytes from the demux loop to its worker.
//!
//! Built on [`tokio::io::duplex`]: a bounded in-memory channel whose two
//! ends each implement `AsyncRead + AsyncWrite`. Only one direction of
//! each end is used here — the demux loop injects bytes, the worker
//! consumes them — so the unused halves are dropped immediately. Dropping
//! the injecting half's write side (via `shutdown()`) makes the consuming
//! half observe EOF once its buffered bytes are drained, which is exactly
//! the half-close semantics an HTTP/2 END_STREAM needs to convey.

use tokio::io::{split, DuplexStream, ReadHalf, WriteHalf};

/// One end of an in-process body pipe.
pub type Pipe = DuplexStream;

/// Default buffer size for a stream's body pipes. Bounds how far the demux
/// loop can get ahead of a slow worker before a DATA-frame write blocks,
/// which is this bridge's only form of backpressure (see the crate's
/// concurrency notes: real HTTP/2 flow control is out of scope).
pub const DEFAULT_PIPE_BUFFER: usize = 64 * 1024;

/// Creates one direction's pipe, returning the injecting write half and the
/// consuming read half. The paired halves are dropped: nothing else in
/// this crate reads from the inject side or writes to the consume side.
pub fn make_pipe(buffer: usize) -> (WriteHalf<Pipe>, ReadHalf<Pipe>) {
    let (inject_end, consume_end) = tokio::io::duplex(buffer);
    let (inject_read, inject_write) = split(inject_end);
    let (consume_read, consume_write) = split(consume_end);
    drop(inject_read);
    drop(consume_write);
    (inject_write, consume_read)
}
