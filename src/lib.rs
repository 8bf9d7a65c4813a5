//! A multiplexed HTTP/2 frame pump and per-stream HTTP/1-bridging engine,
//! for use inside an intercepting proxy.
//!
//! This crate is deliberately narrow. It owns exactly the "hard part" of
//! bridging HTTP/2 into an HTTP/1-shaped inspection pipeline: the
//! connection-level frame dispatch loop and the per-stream byte-pipe
//! bridge that lets each HTTP/2 stream be treated as an ordinary
//! request/response pair. It does not implement:
//!
//! - the HPACK codec internals (delegated to [`fluke_hpack`] via
//!   [`hpack`]),
//! - TLS, ALPN negotiation, or connection establishment,
//! - real HTTP/2 flow control — outbound windows are advertised at their
//!   maximum and peer `WINDOW_UPDATE` frames are ignored,
//! - the inspection/scripting pipeline itself, which plugs in through the
//!   [`worker::Inspector`] trait.
#![cfg_attr(not(test), warn(clippy::print_stdout, clippy::dbg_macro))]

pub mod body;
pub mod config;
pub mod endpoint;
mod error;
pub mod frame;
pub mod headers;
pub mod hpack;
pub mod layer;
mod pipe;
pub mod stream;
pub mod worker;

pub use config::Http2Config;
pub use endpoint::{ConnectionEndpoint, EndpointHandle, Role};
pub use error::{Error, Result};
pub use headers::{Header, HeaderList};
pub use layer::Http2Layer;
pub use worker::{Inspector, PassthroughInspector, Request, Response};
