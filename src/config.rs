//! Server configuration.
//!
//! [`H2Settings`] is the SETTINGS view of one endpoint: what we advertise, or
//! what the peer told us. [`ServerConfig`] adds the process-side knobs.

use crate::error::{Error, H2Error};
use crate::h2::flow_control::DEFAULT_INITIAL_WINDOW_SIZE;
use crate::h2::frame::{
    MAX_FRAME_SIZE, SETTINGS_ENABLE_PUSH, SETTINGS_HEADER_TABLE_SIZE,
    SETTINGS_INITIAL_WINDOW_SIZE, SETTINGS_MAX_CONCURRENT_STREAMS, SETTINGS_MAX_FRAME_SIZE,
    SETTINGS_MAX_HEADER_LIST_SIZE,
};
use crate::hpack::codec::DEFAULT_TABLE_SIZE;

/// HTTP/2 settings (RFC 9113 §6.5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct H2Settings {
    pub header_table_size: u32,
    pub enable_push: bool,
    pub max_concurrent_streams: u32,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: u32,
}

impl Default for H2Settings {
    fn default() -> Self {
        Self {
            header_table_size: DEFAULT_TABLE_SIZE as u32,
            enable_push: false,
            max_concurrent_streams: 128,
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE as u32,
            max_frame_size: MAX_FRAME_SIZE,
            max_header_list_size: 16_384,
        }
    }
}

impl H2Settings {
    /// Settings assumed for a peer before its first SETTINGS frame arrives.
    pub fn peer_initial() -> Self {
        Self {
            max_concurrent_streams: u32::MAX,
            max_header_list_size: u32::MAX,
            enable_push: true,
            ..Self::default()
        }
    }

    /// The `(id, value)` pairs advertised in our initial SETTINGS frame.
    pub fn to_params(&self) -> Vec<(u16, u32)> {
        vec![
            (SETTINGS_MAX_CONCURRENT_STREAMS, self.max_concurrent_streams),
            (SETTINGS_ENABLE_PUSH, u32::from(self.enable_push)),
            (SETTINGS_HEADER_TABLE_SIZE, self.header_table_size),
            (SETTINGS_INITIAL_WINDOW_SIZE, self.initial_window_size),
            (SETTINGS_MAX_FRAME_SIZE, self.max_frame_size),
            (SETTINGS_MAX_HEADER_LIST_SIZE, self.max_header_list_size),
        ]
    }

    /// Apply one parameter with RFC 9113 §6.5.2 validation. Unknown
    /// identifiers are ignored.
    pub fn apply(&mut self, id: u16, value: u32) -> Result<(), Error> {
        match id {
            SETTINGS_HEADER_TABLE_SIZE => self.header_table_size = value,
            SETTINGS_ENABLE_PUSH => {
                if value > 1 {
                    return Err(H2Error::ProtocolError.into());
                }
                self.enable_push = value != 0;
            }
            SETTINGS_MAX_CONCURRENT_STREAMS => self.max_concurrent_streams = value,
            SETTINGS_INITIAL_WINDOW_SIZE => {
                if value > 0x7fff_ffff {
                    return Err(H2Error::FlowControlError.into());
                }
                self.initial_window_size = value;
            }
            SETTINGS_MAX_FRAME_SIZE => {
                if !(16_384..=16_777_215).contains(&value) {
                    return Err(H2Error::ProtocolError.into());
                }
                self.max_frame_size = value;
            }
            SETTINGS_MAX_HEADER_LIST_SIZE => self.max_header_list_size = value,
            _ => {}
        }
        Ok(())
    }
}

/// Listener-wide configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Settings advertised to every client.
    pub settings: H2Settings,
    /// Threads running handlers, shared by all connections.
    pub worker_threads: usize,
    /// Completed streams that may wait for a worker before new ones are refused.
    pub queue_depth: usize,
    /// Whether the response encoder may Huffman-code string literals.
    pub huffman: bool,
    pub write_buffer_size: usize,
    pub read_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            settings: H2Settings::default(),
            worker_threads: std::thread::available_parallelism().map_or(4, |n| n.get()),
            queue_depth: 256,
            huffman: true,
            write_buffer_size: 16 * 1024,
            read_buffer_size: 32 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn with_settings(mut self, settings: H2Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_worker_threads(mut self, n: usize) -> Self {
        self.worker_threads = n.max(1);
        self
    }

    pub fn with_queue_depth(mut self, n: usize) -> Self {
        self.queue_depth = n;
        self
    }

    pub fn with_huffman(mut self, huffman: bool) -> Self {
        self.huffman = huffman;
        self
    }

    pub fn with_max_concurrent_streams(mut self, n: u32) -> Self {
        self.settings.max_concurrent_streams = n;
        self
    }

    pub fn with_write_buffer_size(mut self, n: usize) -> Self {
        self.write_buffer_size = n.max(1);
        self
    }

    pub fn with_read_buffer_size(mut self, n: usize) -> Self {
        self.read_buffer_size = n.max(1);
        self
    }
}
