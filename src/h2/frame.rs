//! HTTP/2 frame codec (RFC 9113 §4, §6).
//!
//! Every frame starts with a fixed 9-byte header:
//! ```text
//!  +-----------------------------------------------+
//!  |                 Length (24)                   |
//!  +---------------+---------------+---------------+
//!  |   Type (8)    |   Flags (8)   |
//!  +-+-------------+---------------+---------------+
//!  |R|                Stream Identifier (31)       |
//!  +-+---------------------------------------------+
//!  |                Frame Payload (0...)         ...
//!  +-----------------------------------------------+
//! ```
//!
//! Decoded frames own their payload as [`Bytes`], so a frame can outlive the
//! read buffer it was parsed from.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, H2Error, Result};

pub const FRAME_HEADER_LEN: usize = 9;

/// Largest payload this endpoint sends or accepts.
pub const MAX_FRAME_SIZE: u32 = 16_384;

// Frame type codes (RFC 9113 §6).
pub const FRAME_DATA: u8 = 0x0;
pub const FRAME_HEADERS: u8 = 0x1;
pub const FRAME_PRIORITY: u8 = 0x2;
pub const FRAME_RST_STREAM: u8 = 0x3;
pub const FRAME_SETTINGS: u8 = 0x4;
pub const FRAME_PUSH_PROMISE: u8 = 0x5;
pub const FRAME_PING: u8 = 0x6;
pub const FRAME_GOAWAY: u8 = 0x7;
pub const FRAME_WINDOW_UPDATE: u8 = 0x8;
pub const FRAME_CONTINUATION: u8 = 0x9;

// Flag bits.
pub const FLAG_ACK: u8 = 0x1;
pub const FLAG_END_STREAM: u8 = 0x1;
pub const FLAG_END_HEADERS: u8 = 0x4;
pub const FLAG_PADDED: u8 = 0x8;
pub const FLAG_PRIORITY: u8 = 0x20;

// SETTINGS identifiers (RFC 9113 §6.5.2).
pub const SETTINGS_HEADER_TABLE_SIZE: u16 = 0x1;
pub const SETTINGS_ENABLE_PUSH: u16 = 0x2;
pub const SETTINGS_MAX_CONCURRENT_STREAMS: u16 = 0x3;
pub const SETTINGS_INITIAL_WINDOW_SIZE: u16 = 0x4;
pub const SETTINGS_MAX_FRAME_SIZE: u16 = 0x5;
pub const SETTINGS_MAX_HEADER_LIST_SIZE: u16 = 0x6;

const STREAM_ID_MASK: u32 = 0x7fff_ffff;

/// The 9-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// 24-bit payload length.
    pub length: u32,
    pub kind: u8,
    pub flags: u8,
    /// 31-bit; the reserved bit is always clear.
    pub stream_id: u32,
}

impl FrameHeader {
    pub fn encode<B: BufMut>(&self, out: &mut B) {
        out.put_uint(u64::from(self.length & 0x00ff_ffff), 3);
        out.put_u8(self.kind);
        out.put_u8(self.flags);
        out.put_u32(self.stream_id & STREAM_ID_MASK);
    }

    fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

/// Decode a frame header from the first 9 bytes of `buf`.
pub fn decode_frame_header(buf: &[u8]) -> Result<FrameHeader> {
    if buf.len() < FRAME_HEADER_LEN {
        return Err(Error::Incomplete { needed: FRAME_HEADER_LEN });
    }
    let length = u32::from_be_bytes([0, buf[0], buf[1], buf[2]]);
    let stream_id = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]) & STREAM_ID_MASK;
    Ok(FrameHeader { length, kind: buf[3], flags: buf[4], stream_id })
}

/// Stream dependency carried by HEADERS and PRIORITY. Parsed, never enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority {
    pub exclusive: bool,
    pub dependency: u32,
    pub weight: u8,
}

impl Priority {
    fn parse(payload: &mut Bytes) -> Self {
        let word = payload.get_u32();
        let weight = payload.get_u8();
        Priority {
            exclusive: word & !STREAM_ID_MASK != 0,
            dependency: word & STREAM_ID_MASK,
            weight,
        }
    }

    fn encode(&self, out: &mut BytesMut) {
        let exclusive = if self.exclusive { !STREAM_ID_MASK } else { 0 };
        out.put_u32(exclusive | (self.dependency & STREAM_ID_MASK));
        out.put_u8(self.weight);
    }
}

/// A decoded HTTP/2 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data {
        stream_id: u32,
        payload: Bytes,
        end_stream: bool,
        /// Pad length when the frame was (or is to be) sent PADDED.
        padding: Option<u8>,
    },
    Headers {
        stream_id: u32,
        /// Raw HPACK block fragment. Decoded by the connection in arrival order.
        fragment: Bytes,
        end_stream: bool,
        end_headers: bool,
        priority: Option<Priority>,
    },
    Priority {
        stream_id: u32,
        priority: Priority,
    },
    RstStream {
        stream_id: u32,
        error_code: u32,
    },
    Settings {
        ack: bool,
        params: Vec<(u16, u32)>,
    },
    Ping {
        ack: bool,
        data: [u8; 8],
    },
    GoAway {
        last_stream_id: u32,
        error_code: u32,
        debug: Bytes,
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
    Continuation {
        stream_id: u32,
        fragment: Bytes,
        end_headers: bool,
    },
}

impl Frame {
    pub fn stream_id(&self) -> u32 {
        match self {
            Frame::Data { stream_id, .. }
            | Frame::Headers { stream_id, .. }
            | Frame::Priority { stream_id, .. }
            | Frame::RstStream { stream_id, .. }
            | Frame::WindowUpdate { stream_id, .. }
            | Frame::Continuation { stream_id, .. } => *stream_id,
            Frame::Settings { .. } | Frame::Ping { .. } | Frame::GoAway { .. } => 0,
        }
    }

    /// Frame type name, for logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Frame::Data { .. } => "DATA",
            Frame::Headers { .. } => "HEADERS",
            Frame::Priority { .. } => "PRIORITY",
            Frame::RstStream { .. } => "RST_STREAM",
            Frame::Settings { .. } => "SETTINGS",
            Frame::Ping { .. } => "PING",
            Frame::GoAway { .. } => "GOAWAY",
            Frame::WindowUpdate { .. } => "WINDOW_UPDATE",
            Frame::Continuation { .. } => "CONTINUATION",
        }
    }

    /// Bytes this frame counts against flow-control windows: the whole
    /// payload, padding included (RFC 9113 §6.1).
    pub fn flow_len(&self) -> u32 {
        match self {
            Frame::Data { .. } => payload_len(self) as u32,
            _ => 0,
        }
    }

    /// Parse a frame body. `payload` must be exactly `header.length` bytes.
    pub fn parse(header: FrameHeader, mut payload: Bytes) -> Result<Frame> {
        debug_assert_eq!(payload.len(), header.length as usize);
        let stream_id = header.stream_id;

        let frame = match header.kind {
            FRAME_DATA => {
                require_stream(stream_id)?;
                let padding = strip_padding(&mut payload, header.flags, 0)?;
                Frame::Data {
                    stream_id,
                    payload,
                    end_stream: header.has(FLAG_END_STREAM),
                    padding,
                }
            }
            FRAME_HEADERS => {
                require_stream(stream_id)?;
                let priority_len = if header.has(FLAG_PRIORITY) { 5 } else { 0 };
                strip_padding(&mut payload, header.flags, priority_len)?;
                let priority = if header.has(FLAG_PRIORITY) {
                    if payload.len() < 5 {
                        return Err(H2Error::FrameSizeError.into());
                    }
                    Some(Priority::parse(&mut payload))
                } else {
                    None
                };
                Frame::Headers {
                    stream_id,
                    fragment: payload,
                    end_stream: header.has(FLAG_END_STREAM),
                    end_headers: header.has(FLAG_END_HEADERS),
                    priority,
                }
            }
            FRAME_PRIORITY => {
                require_stream(stream_id)?;
                require_len(&payload, 5)?;
                Frame::Priority { stream_id, priority: Priority::parse(&mut payload) }
            }
            FRAME_RST_STREAM => {
                require_stream(stream_id)?;
                require_len(&payload, 4)?;
                Frame::RstStream { stream_id, error_code: payload.get_u32() }
            }
            FRAME_SETTINGS => {
                require_connection(stream_id)?;
                let ack = header.has(FLAG_ACK);
                if (ack && !payload.is_empty()) || payload.len() % 6 != 0 {
                    return Err(H2Error::FrameSizeError.into());
                }
                let params = payload
                    .chunks_exact(6)
                    .map(|p| {
                        (
                            u16::from_be_bytes([p[0], p[1]]),
                            u32::from_be_bytes([p[2], p[3], p[4], p[5]]),
                        )
                    })
                    .collect();
                Frame::Settings { ack, params }
            }
            FRAME_PING => {
                require_connection(stream_id)?;
                require_len(&payload, 8)?;
                let mut data = [0u8; 8];
                payload.copy_to_slice(&mut data);
                Frame::Ping { ack: header.has(FLAG_ACK), data }
            }
            FRAME_GOAWAY => {
                require_connection(stream_id)?;
                if payload.len() < 8 {
                    return Err(H2Error::FrameSizeError.into());
                }
                let last_stream_id = payload.get_u32() & STREAM_ID_MASK;
                let error_code = payload.get_u32();
                Frame::GoAway { last_stream_id, error_code, debug: payload }
            }
            FRAME_WINDOW_UPDATE => {
                require_len(&payload, 4)?;
                Frame::WindowUpdate {
                    stream_id,
                    increment: payload.get_u32() & STREAM_ID_MASK,
                }
            }
            FRAME_CONTINUATION => {
                require_stream(stream_id)?;
                Frame::Continuation {
                    stream_id,
                    fragment: payload,
                    end_headers: header.has(FLAG_END_HEADERS),
                }
            }
            // PUSH_PROMISE is client-bound only; a server never accepts one.
            other => return Err(Error::UnknownFrameType(other)),
        };
        Ok(frame)
    }
}

/// Decode one complete frame from the front of `buf`.
///
/// Returns `(frame, bytes_consumed)`. The declared length is checked against
/// [`MAX_FRAME_SIZE`] before the body is looked at.
pub fn decode_frame(buf: &[u8]) -> Result<(Frame, usize)> {
    let header = decode_frame_header(buf)?;
    check_length(&header)?;
    let total = FRAME_HEADER_LEN + header.length as usize;
    if buf.len() < total {
        return Err(Error::Incomplete { needed: total });
    }
    let payload = Bytes::copy_from_slice(&buf[FRAME_HEADER_LEN..total]);
    Ok((Frame::parse(header, payload)?, total))
}

/// Reject a declared length above [`MAX_FRAME_SIZE`].
pub fn check_length(header: &FrameHeader) -> Result<()> {
    if header.length > MAX_FRAME_SIZE {
        return Err(Error::FrameTooLarge { length: header.length, limit: MAX_FRAME_SIZE });
    }
    Ok(())
}

/// Encode a frame, header included. Never pads.
pub fn encode_frame(frame: &Frame) -> Bytes {
    let mut out = BytesMut::with_capacity(FRAME_HEADER_LEN + payload_len(frame));
    encode_frame_into(frame, &mut out);
    out.freeze()
}

/// Append the encoded frame to `out`.
pub fn encode_frame_into(frame: &Frame, out: &mut BytesMut) {
    let length = payload_len(frame) as u32;
    let (kind, flags) = match frame {
        Frame::Data { end_stream, padding, .. } => (
            FRAME_DATA,
            flag(*end_stream, FLAG_END_STREAM) | flag(padding.is_some(), FLAG_PADDED),
        ),
        Frame::Headers { end_stream, end_headers, priority, .. } => (
            FRAME_HEADERS,
            flag(*end_stream, FLAG_END_STREAM)
                | flag(*end_headers, FLAG_END_HEADERS)
                | flag(priority.is_some(), FLAG_PRIORITY),
        ),
        Frame::Priority { .. } => (FRAME_PRIORITY, 0),
        Frame::RstStream { .. } => (FRAME_RST_STREAM, 0),
        Frame::Settings { ack, .. } => (FRAME_SETTINGS, flag(*ack, FLAG_ACK)),
        Frame::Ping { ack, .. } => (FRAME_PING, flag(*ack, FLAG_ACK)),
        Frame::GoAway { .. } => (FRAME_GOAWAY, 0),
        Frame::WindowUpdate { .. } => (FRAME_WINDOW_UPDATE, 0),
        Frame::Continuation { end_headers, .. } => {
            (FRAME_CONTINUATION, flag(*end_headers, FLAG_END_HEADERS))
        }
    };
    FrameHeader { length, kind, flags, stream_id: frame.stream_id() }.encode(out);

    match frame {
        Frame::Data { payload, padding, .. } => {
            if let Some(pad) = *padding {
                out.put_u8(pad);
                out.put_slice(payload);
                out.put_bytes(0, pad as usize);
            } else {
                out.put_slice(payload);
            }
        }
        Frame::Headers { fragment, priority, .. } => {
            if let Some(p) = priority {
                p.encode(out);
            }
            out.put_slice(fragment);
        }
        Frame::Priority { priority, .. } => priority.encode(out),
        Frame::RstStream { error_code, .. } => out.put_u32(*error_code),
        Frame::Settings { params, .. } => {
            for &(id, value) in params {
                out.put_u16(id);
                out.put_u32(value);
            }
        }
        Frame::Ping { data, .. } => out.put_slice(data),
        Frame::GoAway { last_stream_id, error_code, debug } => {
            out.put_u32(last_stream_id & STREAM_ID_MASK);
            out.put_u32(*error_code);
            out.put_slice(debug);
        }
        Frame::WindowUpdate { increment, .. } => out.put_u32(increment & STREAM_ID_MASK),
        Frame::Continuation { fragment, .. } => out.put_slice(fragment),
    }
}

fn payload_len(frame: &Frame) -> usize {
    match frame {
        Frame::Data { payload, padding, .. } => {
            payload.len() + padding.map_or(0, |pad| pad as usize + 1)
        }
        Frame::Headers { fragment, priority, .. } => {
            fragment.len() + if priority.is_some() { 5 } else { 0 }
        }
        Frame::Priority { .. } => 5,
        Frame::RstStream { .. } | Frame::WindowUpdate { .. } => 4,
        Frame::Settings { params, .. } => params.len() * 6,
        Frame::Ping { .. } => 8,
        Frame::GoAway { debug, .. } => 8 + debug.len(),
        Frame::Continuation { fragment, .. } => fragment.len(),
    }
}

const fn flag(set: bool, bit: u8) -> u8 {
    if set { bit } else { 0 }
}

/// Remove the pad-length byte and trailing padding when PADDED is set.
/// Returns the pad length. `fixed` bytes after the pad length (the HEADERS
/// priority block) may not be covered by padding.
fn strip_padding(payload: &mut Bytes, flags: u8, fixed: usize) -> Result<Option<u8>> {
    if flags & FLAG_PADDED == 0 {
        return Ok(None);
    }
    if payload.is_empty() {
        return Err(H2Error::FrameSizeError.into());
    }
    let pad_len = payload.get_u8();
    if pad_len as usize + fixed > payload.len() {
        return Err(H2Error::ProtocolError.into());
    }
    payload.truncate(payload.len() - pad_len as usize);
    Ok(Some(pad_len))
}

fn require_len(payload: &Bytes, len: usize) -> Result<()> {
    if payload.len() != len {
        return Err(H2Error::FrameSizeError.into());
    }
    Ok(())
}

fn require_stream(stream_id: u32) -> Result<()> {
    if stream_id == 0 {
        return Err(H2Error::ProtocolError.into());
    }
    Ok(())
}

fn require_connection(stream_id: u32) -> Result<()> {
    if stream_id != 0 {
        return Err(H2Error::ProtocolError.into());
    }
    Ok(())
}
