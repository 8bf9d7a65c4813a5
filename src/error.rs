//! Error and Result module.

use std::error::Error as StdError;
use std::fmt;

/// Result type returned from methods in this crate that can fail.
pub type Result<T> = std::result::Result<T, Error>;

type BoxError = Box<dyn StdError + Send + Sync>;

/// Represents errors that can occur while pumping or bridging an HTTP/2
/// connection.
///
/// # Formatting
///
/// The `Display` implementation of this type only prints the details of
/// this level of error, even though it may have been caused by another error
/// and contain that error in its source. To print all relevant information,
/// including the source chain, use something like `std::error::Report` or
/// an equivalent third-party type.
///
/// The contents of the formatted error message are unspecified and may
/// change in any version.
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<BoxError>,
}

#[derive(Debug)]
pub(crate) enum Kind {
    /// The client connection preface did not match the expected literal.
    BadPreface,
    /// A frame arrived out of the order the protocol allows.
    ProtocolViolation,
    /// HPACK encoding or decoding failed.
    HpackFailure,
    /// A request was missing a required pseudo-header or had an invalid one.
    MalformedRequest,
    /// A response was missing a required pseudo-header or had an invalid one.
    MalformedResponse,
    /// The request used a feature this bridge does not support (e.g. CONNECT).
    Unsupported,
    /// An `io::Error` occurred while reading from or writing to a transport.
    TransportIO,
}

impl Error {
    /// Returns true if this was a bad connection preface.
    #[must_use]
    #[inline(always)]
    pub fn is_bad_preface(&self) -> bool {
        matches!(self.inner.kind, Kind::BadPreface)
    }

    /// Returns true if this was a protocol-level ordering violation.
    #[must_use]
    #[inline(always)]
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self.inner.kind, Kind::ProtocolViolation)
    }

    /// Returns true if this was an HPACK encode/decode failure.
    #[must_use]
    #[inline(always)]
    pub fn is_hpack_failure(&self) -> bool {
        matches!(self.inner.kind, Kind::HpackFailure)
    }

    /// Returns true if this was a malformed request (missing/invalid pseudo-header).
    #[must_use]
    #[inline(always)]
    pub fn is_malformed_request(&self) -> bool {
        matches!(self.inner.kind, Kind::MalformedRequest)
    }

    /// Returns true if this was a malformed response (missing/invalid pseudo-header).
    #[must_use]
    #[inline(always)]
    pub fn is_malformed_response(&self) -> bool {
        matches!(self.inner.kind, Kind::MalformedResponse)
    }

    /// Returns true if this was caused by an unsupported feature (e.g. CONNECT).
    #[must_use]
    #[inline(always)]
    pub fn is_unsupported(&self) -> bool {
        matches!(self.inner.kind, Kind::Unsupported)
    }

    /// Returns true if this was a transport I/O error.
    #[must_use]
    #[inline(always)]
    pub fn is_transport_io(&self) -> bool {
        matches!(self.inner.kind, Kind::TransportIO)
    }

    /// Returns true if a connection-level error occurred, i.e. one that
    /// requires tearing down both endpoints rather than just one stream.
    #[must_use]
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self.inner.kind,
            Kind::BadPreface | Kind::ProtocolViolation | Kind::HpackFailure | Kind::TransportIO
        )
    }

    #[inline(always)]
    pub(crate) fn new(kind: Kind) -> Self {
        Self {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    #[inline(always)]
    pub(crate) fn with<C: Into<BoxError>>(mut self, cause: C) -> Self {
        self.inner.cause = Some(cause.into());
        self
    }

    #[inline(always)]
    pub(crate) fn kind(&self) -> &Kind {
        &self.inner.kind
    }

    pub(crate) fn find_source<E: StdError + 'static>(&self) -> Option<&E> {
        let mut cause = self.source();
        while let Some(err) = cause {
            if let Some(typed) = err.downcast_ref() {
                return Some(typed);
            }
            cause = err.source();
        }
        None
    }

    #[inline(always)]
    pub(crate) fn new_bad_preface() -> Self {
        Self::new(Kind::BadPreface)
    }

    #[inline(always)]
    pub(crate) fn new_protocol_violation(msg: &'static str) -> Self {
        Self::new(Kind::ProtocolViolation).with(msg)
    }

    #[inline(always)]
    pub(crate) fn new_hpack_failure<E: Into<BoxError>>(cause: E) -> Self {
        Self::new(Kind::HpackFailure).with(cause)
    }

    #[inline(always)]
    pub(crate) fn new_malformed_request(msg: &'static str) -> Self {
        Self::new(Kind::MalformedRequest).with(msg)
    }

    #[inline(always)]
    pub(crate) fn new_malformed_response(msg: &'static str) -> Self {
        Self::new(Kind::MalformedResponse).with(msg)
    }

    #[inline(always)]
    pub(crate) fn new_unsupported(msg: &'static str) -> Self {
        Self::new(Kind::Unsupported).with(msg)
    }

    #[inline(always)]
    pub(crate) fn new_io(cause: std::io::Error) -> Self {
        Self::new(Kind::TransportIO).with(cause)
    }

    fn description(&self) -> &str {
        match self.inner.kind {
            Kind::BadPreface => "client connection preface did not match",
            Kind::ProtocolViolation => "frame received out of the order the protocol allows",
            Kind::HpackFailure => "hpack encode/decode failure",
            Kind::MalformedRequest => "request missing or had an invalid required pseudo-header",
            Kind::MalformedResponse => "response missing or had an invalid required pseudo-header",
            Kind::Unsupported => "request used an unsupported feature",
            Kind::TransportIO => "transport read or write failed",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::new_io(err)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("rama_h2_bridge::Error");
        f.field(&self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            f.field(cause);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}
