//! Frame transfer over a blocking duplex transport.
//!
//! The transport is split once into a read half and a write half, each behind
//! its own lock: the connection's reader loop pulls frames while any number of
//! handler threads push responses. The write lock also guards the HPACK
//! encoder, so a header block is encoded and put on the wire in one critical
//! section and table mutations reach the peer in the order they happened.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::{Mutex, MutexGuard};

use bytes::{Buf, BytesMut};
use tracing::trace;

use super::frame::{self, FRAME_HEADER_LEN, Frame, MAX_FRAME_SIZE, check_length, decode_frame_header};
use crate::error::{Error, Result};
use crate::hpack::{HeaderField, HpackEncoder};

/// Client connection preface (RFC 9113 §3.4).
pub const PREFACE: &[u8; 24] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// A duplex byte channel that splits into independent blocking halves.
pub trait Transport: Send + 'static {
    type Reader: Read + Send + 'static;
    type Writer: Write + Send + 'static;

    fn split(self) -> io::Result<(Self::Reader, Self::Writer)>;
}

impl Transport for TcpStream {
    type Reader = TcpStream;
    type Writer = TcpStream;

    fn split(self) -> io::Result<(TcpStream, TcpStream)> {
        let writer = self.try_clone()?;
        Ok((self, writer))
    }
}

#[cfg(unix)]
impl Transport for std::os::unix::net::UnixStream {
    type Reader = Self;
    type Writer = Self;

    fn split(self) -> io::Result<(Self, Self)> {
        let writer = self.try_clone()?;
        Ok((self, writer))
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking holder leaves only byte buffers behind; keep going.
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

struct ReadHalf {
    io: Box<dyn Read + Send>,
    buf: BytesMut,
    chunk: usize,
}

impl ReadHalf {
    /// Read once from the transport. Returns the number of new bytes.
    fn fill(&mut self) -> Result<usize> {
        let start = self.buf.len();
        self.buf.resize(start + self.chunk, 0);
        let n = loop {
            match self.io.read(&mut self.buf[start..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.buf.truncate(start);
                    return Err(e.into());
                }
            }
        };
        self.buf.truncate(start + n);
        Ok(n)
    }

    /// Fill until at least `len` bytes are buffered. `false` on EOF.
    fn fill_to(&mut self, len: usize) -> Result<bool> {
        while self.buf.len() < len {
            if self.fill()? == 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Frame-level read side.
pub struct FrameReader {
    inner: Mutex<ReadHalf>,
}

impl FrameReader {
    pub fn new(io: impl Read + Send + 'static, read_buffer_size: usize) -> Self {
        let chunk = read_buffer_size.max(FRAME_HEADER_LEN);
        Self {
            inner: Mutex::new(ReadHalf {
                io: Box::new(io),
                buf: BytesMut::with_capacity(chunk),
                chunk,
            }),
        }
    }

    /// Consume and validate the 24-byte client preface.
    pub fn read_preface(&self) -> Result<()> {
        let mut half = lock(&self.inner);
        if !half.fill_to(PREFACE.len())? {
            return Err(if half.buf.is_empty() { Error::Closed } else { Error::BadPreface });
        }
        if &half.buf[..PREFACE.len()] != PREFACE {
            return Err(Error::BadPreface);
        }
        half.buf.advance(PREFACE.len());
        Ok(())
    }

    /// Read the next frame.
    ///
    /// `Ok(None)` is a clean EOF between frames; EOF inside a frame is an
    /// error. The declared length is checked as soon as the header is in,
    /// before any of the body is buffered.
    pub fn read_frame(&self) -> Result<Option<Frame>> {
        let mut half = lock(&self.inner);

        if !half.fill_to(FRAME_HEADER_LEN)? {
            if half.buf.is_empty() {
                return Ok(None);
            }
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        let header = decode_frame_header(&half.buf)?;
        check_length(&header)?;

        let total = FRAME_HEADER_LEN + header.length as usize;
        if !half.fill_to(total)? {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        trace!(kind = header.kind, length = header.length, stream = header.stream_id, "frame in");

        let mut raw = half.buf.split_to(total).freeze();
        raw.advance(FRAME_HEADER_LEN);
        Frame::parse(header, raw).map(Some)
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

struct WriteHalf {
    /// `None` once closed or after a failed write.
    io: Option<Box<dyn Write + Send>>,
    out: BytesMut,
    buffer_size: usize,
    encoder: HpackEncoder,
}

impl WriteHalf {
    /// Queue a frame, draining to the transport whenever the buffer fills.
    fn queue(&mut self, frame: &Frame) -> Result<()> {
        frame::encode_frame_into(frame, &mut self.out);
        trace!(kind = frame.kind_name(), stream = frame.stream_id(), "frame out");
        if self.out.len() >= self.buffer_size {
            self.drain()?;
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        let Some(io) = self.io.as_mut() else {
            self.out.clear();
            return Err(Error::Closed);
        };
        while self.out.has_remaining() {
            let n = self.out.len().min(self.buffer_size);
            if let Err(e) = io.write_all(&self.out[..n]) {
                self.io = None;
                self.out.clear();
                return Err(e.into());
            }
            self.out.advance(n);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.drain()?;
        if let Some(io) = self.io.as_mut()
            && let Err(e) = io.flush()
        {
            self.io = None;
            return Err(e.into());
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.io.is_none() {
            return Err(Error::Closed);
        }
        Ok(())
    }
}

/// Frame-level write side. Shared by the reader loop and every in-flight
/// response on the connection.
pub struct FrameWriter {
    inner: Mutex<WriteHalf>,
}

impl FrameWriter {
    pub fn new(io: impl Write + Send + 'static, write_buffer_size: usize, encoder: HpackEncoder) -> Self {
        let buffer_size = write_buffer_size.max(FRAME_HEADER_LEN);
        Self {
            inner: Mutex::new(WriteHalf {
                io: Some(Box::new(io)),
                out: BytesMut::with_capacity(buffer_size),
                buffer_size,
                encoder,
            }),
        }
    }

    /// Write one frame and flush.
    pub fn write_frame(&self, frame: &Frame) -> Result<()> {
        let mut half = lock(&self.inner);
        half.ensure_open()?;
        half.queue(frame)?;
        half.flush()
    }

    /// Write several frames back to back under one lock acquisition.
    pub fn write_frames(&self, frames: &[Frame]) -> Result<()> {
        let mut half = lock(&self.inner);
        half.ensure_open()?;
        for frame in frames {
            half.queue(frame)?;
        }
        half.flush()
    }

    /// HPACK-encode `fields` and send them as HEADERS plus as many
    /// CONTINUATION frames as the block needs, all under the write lock.
    pub fn write_headers(&self, stream_id: u32, fields: &[HeaderField], end_stream: bool) -> Result<()> {
        let mut half = lock(&self.inner);
        half.ensure_open()?;

        let mut block = half.encoder.encode_block(fields);
        let max = MAX_FRAME_SIZE as usize;

        let first = block.split_to(block.len().min(max));
        half.queue(&Frame::Headers {
            stream_id,
            fragment: first,
            end_stream,
            end_headers: block.is_empty(),
            priority: None,
        })?;
        while !block.is_empty() {
            let fragment = block.split_to(block.len().min(max));
            half.queue(&Frame::Continuation {
                stream_id,
                fragment,
                end_headers: block.is_empty(),
            })?;
        }
        half.flush()
    }

    /// Apply the peer's SETTINGS_HEADER_TABLE_SIZE to the encoder.
    pub fn set_encoder_table_size(&self, size: usize) {
        lock(&self.inner).encoder.set_max_table_size(size);
    }

    /// Drop the write half. Later writes fail with [`Error::Closed`].
    pub fn close(&self) {
        let mut half = lock(&self.inner);
        let _ = half.flush();
        half.io = None;
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner).io.is_none()
    }
}

/// Both halves of a split transport.
pub struct FrameTransfer {
    pub reader: FrameReader,
    pub writer: FrameWriter,
}

impl FrameTransfer {
    pub fn new<T: Transport>(
        transport: T,
        read_buffer_size: usize,
        write_buffer_size: usize,
        encoder: HpackEncoder,
    ) -> io::Result<Self> {
        let (r, w) = transport.split()?;
        Ok(Self {
            reader: FrameReader::new(r, read_buffer_size),
            writer: FrameWriter::new(w, write_buffer_size, encoder),
        })
    }
}
