//! Request/response exchange handed to application handlers.
//!
//! A handler gets the fully assembled [`Request`] and a [`ResponseWriter`]
//! bound to its stream. The writer frames lazily: nothing goes out until the
//! first body byte or [`ResponseWriter::finish`], so the handler can still set
//! the status and headers up to that point.

use std::io::{self, Write};
use std::sync::Arc;

use bytes::{Buf, Bytes, buf::Reader};
use tracing::debug;

use super::frame::{Frame, MAX_FRAME_SIZE};
use super::transfer::FrameWriter;
use crate::error::{H2Error, HandlerError, Result};
use crate::hpack::HeaderField;

/// Application entry point. `Ok(false)` asks the server to wind the
/// connection down once in-flight streams finish (GOAWAY with NO_ERROR).
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, exchange: &mut Exchange) -> Result<bool, HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(&mut Exchange) -> Result<bool, HandlerError> + Send + Sync + 'static,
{
    fn handle(&self, exchange: &mut Exchange) -> Result<bool, HandlerError> {
        self(exchange)
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A complete request: decoded header list (trailers appended) and body.
#[derive(Debug, Clone)]
pub struct Request {
    stream_id: u32,
    headers: Vec<HeaderField>,
    body: Bytes,
}

impl Request {
    pub fn new(stream_id: u32, headers: Vec<HeaderField>, body: Bytes) -> Self {
        Self { stream_id, headers, body }
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    pub fn headers(&self) -> &[HeaderField] {
        &self.headers
    }

    /// First value for `name` (lowercase).
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|f| f.name() == name.as_bytes())
            .map(HeaderField::value)
    }

    pub fn method(&self) -> Option<&[u8]> {
        self.header(":method")
    }

    pub fn path(&self) -> Option<&[u8]> {
        self.header(":path")
    }

    pub fn scheme(&self) -> Option<&[u8]> {
        self.header(":scheme")
    }

    pub fn authority(&self) -> Option<&[u8]> {
        self.header(":authority")
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The body as a byte stream.
    pub fn body_reader(&self) -> Reader<Bytes> {
        self.body.clone().reader()
    }
}

// ---------------------------------------------------------------------------
// Response head
// ---------------------------------------------------------------------------

/// Hop-by-hop headers HTTP/2 forbids (RFC 9113 §8.2.2).
const CONNECTION_SPECIFIC: [&[u8]; 5] = [
    b"connection",
    b"keep-alive",
    b"proxy-connection",
    b"transfer-encoding",
    b"upgrade",
];

/// Status and headers of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: u16,
    headers: Vec<HeaderField>,
}

impl Default for Response {
    fn default() -> Self {
        Self::new(200)
    }
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self { status, headers: Vec::new() }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_status(&mut self, status: u16) -> &mut Self {
        self.status = status;
        self
    }

    /// Append a header. Names are lowercased; connection-specific headers
    /// and pseudo-headers are dropped (`:status` comes from [`set_status`]).
    ///
    /// [`set_status`]: Self::set_status
    pub fn add_header(&mut self, name: impl AsRef<[u8]>, value: impl Into<Bytes>) -> &mut Self {
        let field = HeaderField::new(name.as_ref().to_ascii_lowercase(), value);
        if !field.is_pseudo() && !CONNECTION_SPECIFIC.iter().any(|h| *h == field.name()) {
            self.headers.push(field);
        }
        self
    }

    pub fn headers(&self) -> &[HeaderField] {
        &self.headers
    }

    /// Header list as sent: `:status` first.
    pub fn to_fields(&self) -> Vec<HeaderField> {
        let mut fields = Vec::with_capacity(self.headers.len() + 1);
        fields.push(HeaderField::new(":status", self.status.to_string()));
        fields.extend(self.headers.iter().cloned());
        fields
    }
}

// ---------------------------------------------------------------------------
// Response writer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyState {
    /// Nothing sent yet.
    Pending,
    /// HEADERS sent without END_STREAM.
    Streaming,
    /// END_STREAM or RST_STREAM sent, or the connection is gone.
    Finished,
}

/// Body writer for one stream.
///
/// The first write sends HEADERS, body bytes go out as DATA frames of at most
/// 16384 bytes, and [`finish`](Self::finish) closes the stream. Dropping an
/// unfinished writer finishes it.
pub struct ResponseWriter {
    stream_id: u32,
    writer: Arc<FrameWriter>,
    head: Response,
    state: BodyState,
    bytes_written: u64,
}

impl ResponseWriter {
    pub fn new(stream_id: u32, writer: Arc<FrameWriter>) -> Self {
        Self {
            stream_id,
            writer,
            head: Response::default(),
            state: BodyState::Pending,
            bytes_written: 0,
        }
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Response head, editable until HEADERS has been sent.
    pub fn response_mut(&mut self) -> Option<&mut Response> {
        (self.state == BodyState::Pending).then_some(&mut self.head)
    }

    pub fn headers_sent(&self) -> bool {
        self.state != BodyState::Pending
    }

    pub fn is_finished(&self) -> bool {
        self.state == BodyState::Finished
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Send the whole body and finish.
    pub fn send(&mut self, body: &[u8]) -> Result<()> {
        if !body.is_empty() {
            self.write_body(body)?;
        }
        self.finish()
    }

    /// End the stream: HEADERS with END_STREAM if nothing was written yet,
    /// otherwise an empty DATA frame with END_STREAM.
    pub fn finish(&mut self) -> Result<()> {
        let state = std::mem::replace(&mut self.state, BodyState::Finished);
        match state {
            BodyState::Pending => self.writer.write_headers(self.stream_id, &self.head.to_fields(), true),
            BodyState::Streaming => self.writer.write_frame(&Frame::Data {
                stream_id: self.stream_id,
                payload: Bytes::new(),
                end_stream: true,
                padding: None,
            }),
            BodyState::Finished => Ok(()),
        }
    }

    /// Abort the stream with RST_STREAM.
    pub fn reset(&mut self, code: H2Error) -> Result<()> {
        if self.state == BodyState::Finished {
            return Ok(());
        }
        self.state = BodyState::Finished;
        self.writer.write_frame(&Frame::RstStream {
            stream_id: self.stream_id,
            error_code: code.to_code(),
        })
    }

    /// Turn a handler failure into a 500 when the head is still unsent,
    /// otherwise into RST_STREAM(INTERNAL_ERROR).
    pub(crate) fn fail(&mut self) -> Result<()> {
        match self.state {
            BodyState::Pending => {
                self.head = Response::new(500);
                self.finish()
            }
            _ => self.reset(H2Error::InternalError),
        }
    }

    fn write_body(&mut self, buf: &[u8]) -> Result<()> {
        match self.state {
            BodyState::Finished => return Err(crate::error::Error::Closed),
            BodyState::Pending => {
                // Mark first so a failed HEADERS write is not retried.
                self.state = BodyState::Finished;
                self.writer.write_headers(self.stream_id, &self.head.to_fields(), false)?;
                self.state = BodyState::Streaming;
            }
            BodyState::Streaming => {}
        }
        for chunk in buf.chunks(MAX_FRAME_SIZE as usize) {
            let sent = self.writer.write_frame(&Frame::Data {
                stream_id: self.stream_id,
                payload: Bytes::copy_from_slice(chunk),
                end_stream: false,
                padding: None,
            });
            if let Err(e) = sent {
                self.state = BodyState::Finished;
                return Err(e);
            }
            self.bytes_written += chunk.len() as u64;
        }
        Ok(())
    }
}

impl Write for ResponseWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.write_body(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ResponseWriter {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            debug!(stream = self.stream_id, error = %e, "response finish on drop failed");
        }
    }
}

/// One request and the writer for its response.
pub struct Exchange {
    request: Request,
    response: ResponseWriter,
}

impl Exchange {
    pub fn new(request: Request, response: ResponseWriter) -> Self {
        Self { request, response }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn response(&mut self) -> &mut ResponseWriter {
        &mut self.response
    }

    pub fn into_parts(self) -> (Request, ResponseWriter) {
        (self.request, self.response)
    }
}
