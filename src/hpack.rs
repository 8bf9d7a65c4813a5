//! Thin wrapper around `fluke_hpack` producing/consuming this crate's
//! [`HeaderList`] instead of raw name/value pairs.
//!
//! One encoder and one decoder live per connection direction; neither is
//! `Clone` and neither may be shared across endpoints (see the connection
//! module for where ownership lives).

use crate::error::{Error, Result};
use crate::headers::{Header, HeaderList};
use bytes::Bytes;

pub struct HpackDecoder {
    inner: fluke_hpack::Decoder<'static>,
}

impl std::fmt::Debug for HpackDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HpackDecoder").finish()
    }
}

impl Default for HpackDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackDecoder {
    pub fn new() -> Self {
        Self {
            inner: fluke_hpack::Decoder::new(),
        }
    }

    /// Decodes one concatenated header-block fragment run into a
    /// [`HeaderList`]. Decoder state persists across calls (dynamic table);
    /// a failed decode leaves that state undefined, so the caller must treat
    /// any `Err` here as connection-fatal.
    pub fn decode(&mut self, block: &[u8]) -> Result<HeaderList> {
        let pairs = self
            .inner
            .decode(block)
            .map_err(|e| Error::new_hpack_failure(format!("hpack decode error: {e:?}")))?;
        Ok(pairs
            .into_iter()
            .map(|(name, value)| Header::new(Bytes::from(name), Bytes::from(value)))
            .collect())
    }
}

pub struct HpackEncoder {
    inner: fluke_hpack::Encoder<'static>,
}

impl std::fmt::Debug for HpackEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HpackEncoder").finish()
    }
}

impl Default for HpackEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackEncoder {
    pub fn new() -> Self {
        Self {
            inner: fluke_hpack::Encoder::new(),
        }
    }

    /// Encodes a header list into a single HPACK header block. Splitting
    /// the block across HEADERS/CONTINUATION frames is the caller's job.
    pub fn encode(&mut self, headers: &HeaderList) -> Vec<u8> {
        let pairs: Vec<(&[u8], &[u8])> = headers
            .iter()
            .map(|h| (h.name.as_ref(), h.value.as_ref()))
            .collect();
        self.inner.encode(pairs)
    }
}
