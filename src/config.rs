//! Connection-level configuration.

/// Tunables for a bridged HTTP/2 connection.
///
/// `body_size_limit` is the only knob the bridged protocol behavior itself
/// exposes; the rest mirror the hardcoded defaults a production H2 stack
/// carries regardless of feature scope (frame fragmentation threshold,
/// header-block accumulation cap).
#[derive(Debug, Clone)]
pub struct Http2Config {
    /// Maximum number of bytes read from a request or response body before
    /// the bridge aborts the stream.
    pub body_size_limit: usize,

    /// Maximum payload size used when fragmenting outgoing HEADERS/
    /// CONTINUATION and DATA frames.
    pub max_frame_size: u32,

    /// Maximum accumulated bytes across a HEADERS + CONTINUATION... run
    /// before it is treated as a protocol violation.
    pub max_header_block_size: usize,

    /// `SETTINGS_MAX_CONCURRENT_STREAMS` advertised to the peer.
    pub max_concurrent_streams: u32,
}

impl Default for Http2Config {
    fn default() -> Self {
        Self {
            body_size_limit: DEFAULT_BODY_SIZE_LIMIT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_block_size: crate::frame::MAX_HEADER_BLOCK_SIZE,
            max_concurrent_streams: DEFAULT_MAX_CONCURRENT_STREAMS,
        }
    }
}

pub const DEFAULT_BODY_SIZE_LIMIT: usize = 8 * 1024 * 1024;
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16 * 1024;
pub const DEFAULT_MAX_CONCURRENT_STREAMS: u32 = 100;

/// `SETTINGS_INITIAL_WINDOW_SIZE` advertised to the peer. Since this bridge
/// never applies real flow control, it simply advertises the largest legal
/// window so a compliant peer never stalls waiting on a WINDOW_UPDATE.
pub const ADVERTISED_INITIAL_WINDOW_SIZE: u32 = (1u32 << 31) - 1;

/// Connection-level WINDOW_UPDATE increment sent once, right after the
/// initial SETTINGS, to bring stream 0's window up from the default 64 KiB
/// to the same maximum.
pub const CONNECTION_WINDOW_UPDATE_INCREMENT: u32 = (1u32 << 31) - (1 << 16);
