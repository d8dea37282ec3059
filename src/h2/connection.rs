//! HTTP/2 server connection (RFC 9113).
//!
//! One blocking reader loop per connection owns the stream map and the HPACK
//! decoder. Header blocks are decoded as soon as END_HEADERS arrives, in wire
//! order, so the decoder's dynamic table always matches the peer's encoder.
//! Completed streams are handed to the shared [`WorkerPool`]; responses go out
//! through the connection's [`FrameWriter`], which owns the HPACK encoder.

use std::collections::HashMap;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use bytes::Bytes;
use tracing::{Span, debug, info, info_span, warn};

use super::exchange::{Exchange, Handler, Request, ResponseWriter};
use super::flow_control::{DEFAULT_CONNECTION_WINDOW_SIZE, FlowController};
use super::frame::{Frame, SETTINGS_HEADER_TABLE_SIZE, SETTINGS_INITIAL_WINDOW_SIZE};
use super::pool::WorkerPool;
use super::stream::{Stream, StreamState};
use super::transfer::{FrameReader, FrameTransfer, FrameWriter, Transport};
use crate::config::{H2Settings, ServerConfig};
use crate::error::{Error, H2Error, HandlerError, Result};
use crate::hpack::codec::DEFAULT_TABLE_SIZE;
use crate::hpack::{HpackDecoder, HpackEncoder};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    AwaitingPreface,
    Established,
    Closed,
}

/// State shared between the reader loop and handler jobs.
struct Shared {
    writer: Arc<FrameWriter>,
    /// Streams opened and not yet fully handled.
    in_flight: AtomicUsize,
    /// Highest client stream id processed.
    last_stream_id: AtomicU32,
    /// Streams above this id are refused once GOAWAY went out.
    goaway_last: AtomicU32,
    goaway_sent: AtomicBool,
}

impl Shared {
    /// Send GOAWAY once. Later calls are no-ops.
    fn goaway(&self, code: H2Error, reason: &str) {
        if self.goaway_sent.swap(true, Ordering::SeqCst) {
            return;
        }
        self.send_goaway(code, reason);
    }

    /// Send GOAWAY even if one already went out, so a fatal error can follow
    /// a graceful NO_ERROR shutdown with its real code. The advertised last
    /// stream id never grows between the two.
    fn send_goaway(&self, code: H2Error, reason: &str) {
        self.goaway_sent.store(true, Ordering::SeqCst);
        let current = self.last_stream_id.load(Ordering::SeqCst);
        let last_stream_id = self.goaway_last.fetch_min(current, Ordering::SeqCst).min(current);
        let frame = Frame::GoAway {
            last_stream_id,
            error_code: code.to_code(),
            debug: Bytes::copy_from_slice(reason.as_bytes()),
        };
        match self.writer.write_frame(&frame) {
            Ok(()) => debug!(last_stream_id, code = ?code, "sent GOAWAY"),
            Err(e) => debug!(error = %e, "GOAWAY not delivered"),
        }
    }

    fn stream_done(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Server side of one HTTP/2 connection.
pub struct Connection {
    id: u64,
    state: ConnState,
    reader: FrameReader,
    shared: Arc<Shared>,
    decoder: HpackDecoder,
    streams: HashMap<u32, Stream>,
    local: H2Settings,
    peer: H2Settings,
    recv_window: FlowController,
    send_window: FlowController,
    /// Stream whose header block awaits CONTINUATION frames.
    continuation: Option<u32>,
    /// Streams refused while their header block was still open; the block is
    /// decoded for HPACK state and then dropped.
    refused: Option<u32>,
    handler: Arc<dyn Handler>,
    pool: Arc<WorkerPool>,
}

impl Connection {
    pub fn new<T: Transport>(
        transport: T,
        config: &ServerConfig,
        handler: Arc<dyn Handler>,
        pool: Arc<WorkerPool>,
    ) -> io::Result<Self> {
        let local = config.settings;
        let encoder = HpackEncoder::new(DEFAULT_TABLE_SIZE).with_huffman(config.huffman);
        let FrameTransfer { reader, writer } =
            FrameTransfer::new(transport, config.read_buffer_size, config.write_buffer_size, encoder)?;
        // Until the peer acknowledges our SETTINGS and sends a size update,
        // its encoder still uses the default table size.
        let decoder = HpackDecoder::new(DEFAULT_TABLE_SIZE)
            .with_size_update_limit(local.header_table_size as usize)
            .with_max_header_list_size(local.max_header_list_size as usize);

        Ok(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            state: ConnState::AwaitingPreface,
            reader,
            shared: Arc::new(Shared {
                writer: Arc::new(writer),
                in_flight: AtomicUsize::new(0),
                last_stream_id: AtomicU32::new(0),
                goaway_last: AtomicU32::new(u32::MAX),
                goaway_sent: AtomicBool::new(false),
            }),
            decoder,
            streams: HashMap::new(),
            local,
            peer: H2Settings::peer_initial(),
            recv_window: FlowController::new(DEFAULT_CONNECTION_WINDOW_SIZE),
            send_window: FlowController::new(DEFAULT_CONNECTION_WINDOW_SIZE),
            continuation: None,
            refused: None,
            handler,
            pool,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Run the connection until the peer closes it, sends GOAWAY, or a
    /// connection error occurs.
    ///
    /// On a connection error a GOAWAY carrying the mapped code goes out
    /// before the transport is closed. EOF is a clean close.
    pub fn serve(mut self) -> Result<()> {
        let span = info_span!("h2", conn = self.id);
        let _enter = span.enter();
        info!("connection open");

        let result = self.run();
        match &result {
            Ok(()) => info!(last_stream_id = self.last_stream_id(), "connection closed"),
            Err(e) => {
                warn!(error = %e, "connection error");
                if self.state == ConnState::Established {
                    self.shared.send_goaway(e.h2_code(), &e.to_string());
                }
                self.shared.writer.close();
            }
        }
        self.state = ConnState::Closed;
        result
    }

    fn run(&mut self) -> Result<()> {
        match self.reader.read_preface() {
            Ok(()) => {}
            // Peer connected and left without a byte.
            Err(Error::Closed) => return Ok(()),
            Err(e) => return Err(e),
        }
        self.state = ConnState::Established;
        self.shared.writer.write_frame(&Frame::Settings {
            ack: false,
            params: self.local.to_params(),
        })?;

        while let Some(frame) = self.reader.read_frame()? {
            debug!(kind = frame.kind_name(), stream = frame.stream_id(), "recv");
            if !self.process(frame)? {
                break;
            }
        }
        Ok(())
    }

    fn last_stream_id(&self) -> u32 {
        self.shared.last_stream_id.load(Ordering::SeqCst)
    }

    /// Handle one frame. `Ok(false)` ends the loop.
    fn process(&mut self, frame: Frame) -> Result<bool> {
        if let Some(expected) = self.continuation
            && !matches!(frame, Frame::Continuation { stream_id, .. } if stream_id == expected)
        {
            return Err(H2Error::ProtocolError.into());
        }

        let flow_len = frame.flow_len();
        match frame {
            Frame::Data { stream_id, payload, end_stream, .. } => {
                self.on_data(stream_id, payload, end_stream, flow_len)?;
            }
            Frame::Headers { stream_id, fragment, end_stream, end_headers, .. } => {
                self.on_headers(stream_id, &fragment, end_stream, end_headers)?;
            }
            Frame::Continuation { stream_id, fragment, end_headers } => {
                if self.continuation != Some(stream_id) {
                    return Err(H2Error::ProtocolError.into());
                }
                self.on_fragment(stream_id, &fragment, false, end_headers)?;
            }
            Frame::Settings { ack: false, params } => self.on_settings(&params)?,
            Frame::Settings { ack: true, .. } => debug!("settings acknowledged"),
            Frame::Ping { ack: false, data } => {
                self.shared.writer.write_frame(&Frame::Ping { ack: true, data })?;
            }
            Frame::Ping { ack: true, .. } => {}
            Frame::Priority { .. } => {}
            Frame::WindowUpdate { stream_id, increment } => self.on_window_update(stream_id, increment)?,
            Frame::RstStream { stream_id, error_code } => {
                debug!(stream = stream_id, code = ?H2Error::from_code(error_code), "stream reset by peer");
                if self.streams.remove(&stream_id).is_some() {
                    self.shared.stream_done();
                }
            }
            Frame::GoAway { last_stream_id, error_code, debug: debug_data } => {
                info!(
                    last_stream_id,
                    code = ?H2Error::from_code(error_code),
                    debug = %String::from_utf8_lossy(&debug_data),
                    "peer sent GOAWAY"
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn on_headers(&mut self, stream_id: u32, fragment: &[u8], end_stream: bool, end_headers: bool) -> Result<()> {
        if let Some(stream) = self.streams.get(&stream_id) {
            // Trailers: only once the head is in and the body still open.
            if stream.state() != StreamState::ReceivingBody || !end_stream {
                return Err(H2Error::ProtocolError.into());
            }
            return self.on_fragment(stream_id, fragment, end_stream, end_headers);
        }

        // A new stream must be client-initiated (odd) and above every id seen.
        if stream_id % 2 == 0 || stream_id <= self.last_stream_id() {
            return Err(H2Error::ProtocolError.into());
        }
        self.shared.last_stream_id.store(stream_id, Ordering::SeqCst);

        let in_flight = self.shared.in_flight.load(Ordering::SeqCst);
        let going_away = stream_id > self.shared.goaway_last.load(Ordering::SeqCst);
        if going_away || in_flight >= self.local.max_concurrent_streams as usize {
            debug!(stream = stream_id, in_flight, going_away, "refusing stream");
            self.refuse(stream_id)?;
            // The block must still go through the decoder.
            if end_headers {
                self.decoder.decode(Bytes::copy_from_slice(fragment))?;
            } else {
                self.refused = Some(stream_id);
                self.streams.insert(stream_id, self.new_stream(stream_id));
                self.on_fragment(stream_id, fragment, end_stream, false)?;
            }
            return Ok(());
        }

        self.shared.in_flight.fetch_add(1, Ordering::SeqCst);
        self.streams.insert(stream_id, self.new_stream(stream_id));
        debug!(stream = stream_id, "stream opened");
        self.on_fragment(stream_id, fragment, end_stream, end_headers)
    }

    fn new_stream(&self, stream_id: u32) -> Stream {
        Stream::new(
            stream_id,
            self.local.initial_window_size as i32,
            self.peer.initial_window_size as i32,
        )
    }

    fn on_fragment(&mut self, stream_id: u32, fragment: &[u8], end_stream: bool, end_headers: bool) -> Result<()> {
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return Err(H2Error::ProtocolError.into());
        };
        stream.push_fragment(fragment, end_stream);
        if !end_headers {
            self.continuation = Some(stream_id);
            return Ok(());
        }
        self.continuation = None;

        let block = stream.take_header_block();
        let fields = self.decoder.decode(block)?;

        if self.refused == Some(stream_id) {
            self.refused = None;
            self.streams.remove(&stream_id);
            return Ok(());
        }
        if stream.finish_headers(fields) {
            stream.recv_end_stream();
            self.dispatch(stream_id);
        }
        Ok(())
    }

    fn on_data(&mut self, stream_id: u32, payload: Bytes, end_stream: bool, flow_len: u32) -> Result<()> {
        self.recv_window.consume(flow_len)?;

        let mut updates = Vec::with_capacity(2);
        if flow_len > 0 {
            self.recv_window.replenish(flow_len)?;
            updates.push(Frame::WindowUpdate { stream_id: 0, increment: flow_len });
        }

        let last_seen = self.last_stream_id();
        match self.streams.get_mut(&stream_id) {
            Some(stream) => {
                if let Err(e) = stream.push_data(&payload, flow_len) {
                    debug!(stream = stream_id, error = %e, "stream error on DATA");
                    self.streams.remove(&stream_id);
                    self.shared.stream_done();
                    updates.push(Frame::RstStream { stream_id, error_code: e.h2_code().to_code() });
                } else {
                    // No stream credit once the peer has finished sending on it.
                    if flow_len > 0 && !end_stream {
                        stream.recv_window.replenish(flow_len)?;
                        updates.push(Frame::WindowUpdate { stream_id, increment: flow_len });
                    }
                    if end_stream {
                        stream.recv_end_stream();
                    }
                }
            }
            None if stream_id > last_seen => {
                // DATA on an idle stream.
                return Err(H2Error::ProtocolError.into());
            }
            // Reset or refused earlier; only the connection window counts.
            None => debug!(stream = stream_id, "DATA for closed stream ignored"),
        }

        if !updates.is_empty() {
            self.shared.writer.write_frames(&updates)?;
        }
        if self.streams.get(&stream_id).is_some_and(Stream::is_complete) {
            self.dispatch(stream_id);
        }
        Ok(())
    }

    fn on_settings(&mut self, params: &[(u16, u32)]) -> Result<()> {
        for &(id, value) in params {
            self.peer.apply(id, value)?;
            match id {
                SETTINGS_HEADER_TABLE_SIZE => {
                    self.shared
                        .writer
                        .set_encoder_table_size((value as usize).min(DEFAULT_TABLE_SIZE));
                }
                SETTINGS_INITIAL_WINDOW_SIZE => {
                    for stream in self.streams.values_mut() {
                        stream.send_window.update_initial_window(value as i32)?;
                    }
                }
                _ => {}
            }
        }
        debug!(?params, "peer settings applied");
        self.shared.writer.write_frame(&Frame::Settings { ack: true, params: Vec::new() })
    }

    fn on_window_update(&mut self, stream_id: u32, increment: u32) -> Result<()> {
        if stream_id == 0 {
            if increment == 0 {
                return Err(H2Error::ProtocolError.into());
            }
            return self.send_window.replenish(increment);
        }
        let result = match self.streams.get_mut(&stream_id) {
            Some(_) if increment == 0 => Err(H2Error::ProtocolError.into()),
            Some(stream) => stream.send_window.replenish(increment),
            None => Ok(()),
        };
        if let Err(e) = result {
            self.streams.remove(&stream_id);
            self.shared.stream_done();
            self.shared.writer.write_frame(&Frame::RstStream {
                stream_id,
                error_code: e.h2_code().to_code(),
            })?;
        }
        Ok(())
    }

    fn refuse(&self, stream_id: u32) -> Result<()> {
        self.shared.writer.write_frame(&Frame::RstStream {
            stream_id,
            error_code: H2Error::RefusedStream.to_code(),
        })
    }

    /// Hand a completed stream to the worker pool.
    fn dispatch(&mut self, stream_id: u32) {
        let Some(stream) = self.streams.remove(&stream_id) else {
            return;
        };
        let (headers, body) = stream.into_parts();
        debug!(stream = stream_id, headers = headers.len(), body = body.len(), "request complete");

        let request = Request::new(stream_id, headers, body);
        let handler = Arc::clone(&self.handler);
        let shared = Arc::clone(&self.shared);
        let span = Span::current();
        let job = Box::new(move || {
            span.in_scope(|| run_handler(handler.as_ref(), request, &shared));
        });

        if self.pool.try_execute(job).is_err() {
            debug!(stream = stream_id, "worker queue full");
            self.shared.stream_done();
            if let Err(e) = self.refuse(stream_id) {
                debug!(stream = stream_id, error = %e, "refusal not delivered");
            }
        }
    }
}

fn run_handler(handler: &dyn Handler, request: Request, shared: &Shared) {
    let stream_id = request.stream_id();
    let response = ResponseWriter::new(stream_id, Arc::clone(&shared.writer));
    let mut exchange = Exchange::new(request, response);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&mut exchange)))
        .unwrap_or(Err(HandlerError::Panicked));

    let keep_open = match outcome {
        Ok(keep_open) => {
            if let Err(e) = exchange.response().finish() {
                debug!(stream = stream_id, error = %e, "response not completed");
            }
            keep_open
        }
        Err(e) => {
            let headers_sent = exchange.response().headers_sent();
            warn!(stream = stream_id, headers_sent, error = %e, "handler failed");
            if let Err(e) = exchange.response().fail() {
                debug!(stream = stream_id, error = %e, "error response not delivered");
            }
            true
        }
    };
    drop(exchange);
    shared.stream_done();

    if !keep_open {
        shared.goaway(H2Error::NoError, "");
    }
}
