#![forbid(unsafe_code)]

//! Blocking HTTP/2 server engine.
//!
//! [`hpack`] implements header compression, [`h2`] the frame codec, the
//! per-connection stream multiplexer and a thread-per-connection listener.

pub mod config;
pub mod error;
pub mod h2;
pub mod hpack;

pub use config::{H2Settings, ServerConfig};
pub use error::{Error, H2Error, HandlerError, HpackError, Result};
pub use h2::{Exchange, Handler, Request, Response, ResponseWriter, Server};
pub use hpack::HeaderField;
