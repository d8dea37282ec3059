use std::io;

/// HTTP/2 error codes (RFC 9113 §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum H2Error {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

impl H2Error {
    pub const fn to_code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0x0 => Some(Self::NoError),
            0x1 => Some(Self::ProtocolError),
            0x2 => Some(Self::InternalError),
            0x3 => Some(Self::FlowControlError),
            0x4 => Some(Self::SettingsTimeout),
            0x5 => Some(Self::StreamClosed),
            0x6 => Some(Self::FrameSizeError),
            0x7 => Some(Self::RefusedStream),
            0x8 => Some(Self::Cancel),
            0x9 => Some(Self::CompressionError),
            0xa => Some(Self::ConnectError),
            0xb => Some(Self::EnhanceYourCalm),
            0xc => Some(Self::InadequateSecurity),
            0xd => Some(Self::Http11Required),
            _ => None,
        }
    }
}

/// HPACK decoding and encoding failures (RFC 7541).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HpackError {
    #[error("header block truncated")]
    Truncated,
    #[error("integer overflows 64 bits")]
    IntegerOverflow,
    #[error("table index {0} out of range")]
    InvalidIndex(u64),
    #[error("invalid huffman code")]
    Huffman,
    #[error("unrecognized representation byte {0:#04x}")]
    InvalidRepresentation(u8),
    #[error("table size update to {requested} exceeds limit {limit}")]
    TableSizeUpdate { requested: u64, limit: usize },
    #[error("header list exceeds {0} bytes")]
    HeaderListTooLarge(usize),
}

/// Top-level crate error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport read or write failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// HTTP/2 protocol violation. The connection must close.
    #[error("HTTP/2 error: {0:?}")]
    Http2(H2Error),
    /// Declared frame length exceeds the negotiated maximum.
    #[error("frame length {length} exceeds limit {limit}")]
    FrameTooLarge { length: u32, limit: u32 },
    /// Buffer ends before the frame does.
    #[error("incomplete frame: {needed} bytes needed")]
    Incomplete { needed: usize },
    /// Frame type this endpoint does not accept.
    #[error("unknown frame type {0:#04x}")]
    UnknownFrameType(u8),
    /// Header block could not be decoded.
    #[error("HPACK error: {0}")]
    Hpack(#[from] HpackError),
    /// The peer did not open with the HTTP/2 connection preface.
    #[error("invalid connection preface")]
    BadPreface,
    /// Connection is closed.
    #[error("connection closed")]
    Closed,
}

impl From<H2Error> for Error {
    fn from(e: H2Error) -> Self {
        Error::Http2(e)
    }
}

impl Error {
    /// Error code carried in the GOAWAY sent before closing on this error.
    pub fn h2_code(&self) -> H2Error {
        match self {
            Error::Http2(e) => *e,
            Error::FrameTooLarge { .. } | Error::Incomplete { .. } => H2Error::FrameSizeError,
            Error::Hpack(_) => H2Error::CompressionError,
            Error::UnknownFrameType(_) | Error::BadPreface => H2Error::ProtocolError,
            Error::Io(_) | Error::Closed => H2Error::InternalError,
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => e,
            Error::Closed => io::Error::new(io::ErrorKind::BrokenPipe, Error::Closed),
            other => io::Error::other(other),
        }
    }
}

/// Failure raised by a request handler. Stream-local: it never takes the
/// connection down.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Protocol(#[from] Error),
    #[error("{0}")]
    Message(String),
    #[error("handler panicked")]
    Panicked,
}

impl From<&str> for HandlerError {
    fn from(msg: &str) -> Self {
        HandlerError::Message(msg.to_string())
    }
}

impl From<String> for HandlerError {
    fn from(msg: String) -> Self {
        HandlerError::Message(msg)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
