//! HPACK header compression (RFC 7541).
//!
//! Leaves first: [`huffman`] and [`integer`] are the wire primitives,
//! [`static_table`] and [`table`] the two index spaces, and [`codec`] the
//! stateful encoder/decoder pair each connection owns.

pub mod codec;
pub mod huffman;
pub mod integer;
pub mod static_table;
pub mod table;

use bytes::Bytes;

pub use codec::{HpackDecoder, HpackEncoder, Representation};
pub use table::{HeaderTable, Match};

/// Per-entry overhead counted by the table size (RFC 7541 §4.1).
pub const ENTRY_OVERHEAD: usize = 32;

/// An immutable header name/value pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HeaderField {
    name: Bytes,
    value: Bytes,
}

impl HeaderField {
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self { name: name.into(), value: value.into() }
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Size charged against a header table.
    pub fn size(&self) -> usize {
        self.name.len() + self.value.len() + ENTRY_OVERHEAD
    }

    /// Pseudo-headers (`:method`, `:path`, ...) start with a colon.
    pub fn is_pseudo(&self) -> bool {
        self.name.first() == Some(&b':')
    }
}
