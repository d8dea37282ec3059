//! Per-stream receive state (RFC 9113 §5.1), owned by the connection's
//! reader loop.
//!
//! A server stream only ever walks `Open → HalfClosedRemote`: once the peer
//! sends END_STREAM the stream leaves the map and its request is handed to a
//! worker, which owns the send side from then on.

use bytes::{Bytes, BytesMut};

use super::flow_control::FlowController;
use crate::error::{Error, H2Error};
use crate::hpack::HeaderField;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Receiving the request header block.
    Open,
    /// Header block decoded; request body may follow.
    ReceivingBody,
    /// Peer sent END_STREAM.
    HalfClosedRemote,
}

#[derive(Debug)]
pub struct Stream {
    pub id: u32,
    state: StreamState,
    /// Raw HPACK fragments of the block in progress.
    header_block: BytesMut,
    headers: Vec<HeaderField>,
    body: BytesMut,
    /// END_STREAM arrived on a HEADERS frame whose block is still open.
    end_stream_pending: bool,
    pub recv_window: FlowController,
    pub send_window: FlowController,
}

impl Stream {
    pub fn new(id: u32, recv_window: i32, send_window: i32) -> Self {
        Self {
            id,
            state: StreamState::Open,
            header_block: BytesMut::new(),
            headers: Vec::new(),
            body: BytesMut::new(),
            end_stream_pending: false,
            recv_window: FlowController::new(recv_window),
            send_window: FlowController::new(send_window),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Append a HEADERS or CONTINUATION fragment.
    pub fn push_fragment(&mut self, fragment: &[u8], end_stream: bool) {
        self.header_block.extend_from_slice(fragment);
        self.end_stream_pending |= end_stream;
    }

    /// Take the completed header block for decoding.
    pub fn take_header_block(&mut self) -> Bytes {
        self.header_block.split().freeze()
    }

    /// Store a decoded block. The first one is the request head; later ones
    /// (trailers) are appended. Returns whether END_STREAM was seen with it.
    pub fn finish_headers(&mut self, fields: Vec<HeaderField>) -> bool {
        self.headers.extend(fields);
        if self.state == StreamState::Open {
            self.state = StreamState::ReceivingBody;
        }
        std::mem::take(&mut self.end_stream_pending)
    }

    /// Append a DATA payload, charging it against the receive window.
    pub fn push_data(&mut self, data: &[u8], flow_len: u32) -> Result<(), Error> {
        if self.state != StreamState::ReceivingBody {
            return Err(H2Error::StreamClosed.into());
        }
        self.recv_window.consume(flow_len)?;
        self.body.extend_from_slice(data);
        Ok(())
    }

    /// Process END_STREAM from the peer.
    pub fn recv_end_stream(&mut self) {
        self.state = StreamState::HalfClosedRemote;
    }

    pub fn is_complete(&self) -> bool {
        self.state == StreamState::HalfClosedRemote
    }

    /// Hand over the assembled header list and body.
    pub fn into_parts(self) -> (Vec<HeaderField>, Bytes) {
        (self.headers, self.body.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_lifecycle() {
        let mut s = Stream::new(1, 65_535, 65_535);
        assert_eq!(s.state(), StreamState::Open);

        s.push_fragment(&[0x82], false);
        s.push_fragment(&[0x84], false);
        assert_eq!(&s.take_header_block()[..], [0x82, 0x84]);
        assert!(!s.finish_headers(vec![HeaderField::new(":method", "GET")]));
        assert_eq!(s.state(), StreamState::ReceivingBody);

        s.push_data(b"hello ", 6).unwrap();
        s.push_data(b"world", 5).unwrap();
        assert_eq!(s.recv_window.window(), 65_535 - 11);

        s.recv_end_stream();
        assert!(s.is_complete());
        let (headers, body) = s.into_parts();
        assert_eq!(headers.len(), 1);
        assert_eq!(&body[..], b"hello world");
    }

    #[test]
    fn end_stream_on_headers_is_reported_once() {
        let mut s = Stream::new(3, 65_535, 65_535);
        s.push_fragment(&[0x82], true);
        assert!(s.finish_headers(vec![]));
        s.push_fragment(&[0x40], false);
        assert!(!s.finish_headers(vec![]));
    }

    #[test]
    fn data_before_headers_complete_is_rejected() {
        let mut s = Stream::new(1, 65_535, 65_535);
        s.push_fragment(&[0x82], false);
        assert_eq!(s.push_data(b"x", 1).unwrap_err().h2_code(), H2Error::StreamClosed);
    }

    #[test]
    fn data_beyond_window_is_flow_control_error() {
        let mut s = Stream::new(1, 4, 65_535);
        s.finish_headers(vec![]);
        assert_eq!(s.push_data(b"12345", 5).unwrap_err().h2_code(), H2Error::FlowControlError);
    }
}
