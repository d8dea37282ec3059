//! HTTP/2 server engine (RFC 9113).
//!
//! Bytes come in through [`transfer`], are cut into [`frame`]s, and drive the
//! per-connection state machine in [`connection`]. Completed requests run on
//! the bounded [`pool`] and answer through [`exchange::ResponseWriter`].

pub mod connection;
pub mod exchange;
pub mod flow_control;
pub mod frame;
pub mod pool;
pub mod server;
pub mod stream;
pub mod transfer;

pub use connection::{ConnState, Connection};
pub use exchange::{Exchange, Handler, Request, Response, ResponseWriter};
pub use frame::{Frame, FrameHeader, Priority};
pub use pool::WorkerPool;
pub use server::Server;
pub use transfer::{FrameReader, FrameTransfer, FrameWriter, PREFACE, Transport};
