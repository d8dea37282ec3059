//! HPACK encoder and decoder (RFC 7541 §6).
//!
//! Each side owns one dynamic table. The two tables stay synchronized only if
//! every block is decoded in exactly the order it was encoded, so both types
//! take `&mut self` and must be driven from a single critical section.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::integer::{decode_integer, encode_integer};
use super::static_table::{self, STATIC_LEN};
use super::table::{HeaderTable, Match};
use super::{huffman, HeaderField};
use crate::error::HpackError;

/// Default SETTINGS_HEADER_TABLE_SIZE (RFC 9113 §6.5.2).
pub const DEFAULT_TABLE_SIZE: usize = 4096;

const DYNAMIC_START: u64 = STATIC_LEN as u64 + 1;

/// Wire representation of one header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
    /// §6.1 `1xxxxxxx`
    Indexed,
    /// §6.2.1 `01xxxxxx`
    WithIndexing,
    /// §6.2.2 `0000xxxx`
    WithoutIndexing,
    /// §6.2.3 `0001xxxx`
    NeverIndexed,
}

impl Representation {
    /// `(prefix_bits, first_byte_mask)`.
    const fn prefix(self) -> (u8, u8) {
        match self {
            Representation::Indexed => (7, 0x80),
            Representation::WithIndexing => (6, 0x40),
            Representation::WithoutIndexing => (4, 0x00),
            Representation::NeverIndexed => (4, 0x10),
        }
    }
}

/// Headers whose values must never enter a compression table.
const SENSITIVE: [&[u8]; 4] = [b"authorization", b"cookie", b"proxy-authorization", b"set-cookie"];

fn lookup(table: &HeaderTable, name: &[u8], value: &[u8]) -> Match {
    match static_table::lookup(name, value) {
        Match::Exact(index) => Match::Exact(index),
        Match::Name(index) => match table.find(name, value) {
            Match::Exact(dyn_index) => Match::Exact(dyn_index),
            _ => Match::Name(index),
        },
        Match::None => table.find(name, value),
    }
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// HPACK encoder with a dynamic table.
#[derive(Debug)]
pub struct HpackEncoder {
    table: HeaderTable,
    huffman: bool,
    /// Table size change to announce at the start of the next block.
    pending_size_update: Option<usize>,
}

impl Default for HpackEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_SIZE)
    }
}

impl HpackEncoder {
    pub fn new(max_table_size: usize) -> Self {
        Self {
            table: HeaderTable::new(DYNAMIC_START, Some(max_table_size)),
            huffman: true,
            pending_size_update: None,
        }
    }

    /// Whether string literals may be Huffman-coded when that is shorter.
    pub fn with_huffman(mut self, huffman: bool) -> Self {
        self.huffman = huffman;
        self
    }

    pub fn table(&self) -> &HeaderTable {
        &self.table
    }

    /// Apply the peer's SETTINGS_HEADER_TABLE_SIZE.
    pub fn set_max_table_size(&mut self, max_size: usize) {
        if self.table.max_size() == Some(max_size) {
            return;
        }
        self.table.set_max_size(Some(max_size));
        self.pending_size_update = Some(max_size);
    }

    /// Encode a header list as one block.
    ///
    /// Sensitive headers are sent never-indexed; everything else goes through
    /// the default representation selection.
    pub fn encode_block(&mut self, fields: &[HeaderField]) -> Bytes {
        let mut out = BytesMut::with_capacity(fields.iter().map(|f| f.size()).sum::<usize>() / 2);
        if let Some(size) = self.pending_size_update.take() {
            // §6.3 Dynamic Table Size Update: 001xxxxx
            encode_integer(size as u64, 5, 0x20, &mut out);
        }
        for field in fields {
            let forced = SENSITIVE
                .iter()
                .any(|name| *name == field.name())
                .then_some(Representation::NeverIndexed);
            self.encode_field(field, self.huffman, forced, &mut out);
        }
        out.freeze()
    }

    /// Encode a single field.
    ///
    /// An exact table match is always sent indexed. Otherwise the field is a
    /// literal using `forced` (default: with incremental indexing), with an
    /// indexed name when one exists. Only with-indexing literals mutate the
    /// table.
    pub fn encode_field<B: BufMut>(
        &mut self,
        field: &HeaderField,
        allow_huffman: bool,
        forced: Option<Representation>,
        out: &mut B,
    ) {
        let (name, value) = (field.name(), field.value());
        let found = lookup(&self.table, name, value);

        if let Match::Exact(index) = found {
            let (bits, mask) = Representation::Indexed.prefix();
            encode_integer(index, bits, mask, out);
            return;
        }

        let repr = match forced {
            None | Some(Representation::Indexed) => Representation::WithIndexing,
            Some(r) => r,
        };
        let (bits, mask) = repr.prefix();
        match found {
            Match::Name(index) => encode_integer(index, bits, mask, out),
            _ => {
                out.put_u8(mask);
                encode_string(name, allow_huffman, out);
            }
        }
        encode_string(value, allow_huffman, out);

        if repr == Representation::WithIndexing {
            self.table.add(field.clone());
        }
    }
}

/// String literal (§5.2): H flag + 7-bit length prefix, then octets.
fn encode_string<B: BufMut>(s: &[u8], allow_huffman: bool, out: &mut B) {
    if allow_huffman {
        let len = huffman::encoded_len(s);
        if len < s.len() {
            encode_integer(len as u64, 7, 0x80, out);
            huffman::encode_into(s, out);
            return;
        }
    }
    encode_integer(s.len() as u64, 7, 0x00, out);
    out.put_slice(s);
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// HPACK decoder with a dynamic table.
#[derive(Debug)]
pub struct HpackDecoder {
    table: HeaderTable,
    /// Upper bound a table size update may request (our advertised setting).
    max_table_size: usize,
    max_header_list_size: usize,
}

impl Default for HpackDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_SIZE)
    }
}

impl HpackDecoder {
    pub fn new(max_table_size: usize) -> Self {
        Self {
            table: HeaderTable::new(DYNAMIC_START, Some(max_table_size)),
            max_table_size,
            max_header_list_size: usize::MAX,
        }
    }

    pub fn with_max_header_list_size(mut self, size: usize) -> Self {
        self.max_header_list_size = size;
        self
    }

    /// Cap what a table size update may request without touching the
    /// current table bound. The peer keeps encoding against the old bound
    /// until its next size update.
    pub fn with_size_update_limit(mut self, limit: usize) -> Self {
        self.max_table_size = limit;
        self
    }

    pub fn table(&self) -> &HeaderTable {
        &self.table
    }

    /// Decode one complete header block.
    pub fn decode(&mut self, mut block: Bytes) -> Result<Vec<HeaderField>, HpackError> {
        let mut fields = Vec::new();
        let mut list_size = 0usize;

        while block.has_remaining() {
            let first = block[0];

            let field = if first & 0x80 != 0 {
                let index = decode_integer(&mut block, 7)?;
                self.field_at(index)?
            } else if first & 0xc0 == 0x40 {
                let field = self.decode_literal(&mut block, 6)?;
                self.table.add(field.clone());
                field
            } else if first & 0xe0 == 0x20 {
                // Size updates are only allowed before the first field.
                if !fields.is_empty() {
                    return Err(HpackError::InvalidRepresentation(first));
                }
                let requested = decode_integer(&mut block, 5)?;
                if requested > self.max_table_size as u64 {
                    return Err(HpackError::TableSizeUpdate {
                        requested,
                        limit: self.max_table_size,
                    });
                }
                self.table.set_max_size(Some(requested as usize));
                continue;
            } else if first & 0xe0 == 0x00 {
                // 0000xxxx and 0001xxxx share the same shape and never index.
                self.decode_literal(&mut block, 4)?
            } else {
                return Err(HpackError::InvalidRepresentation(first));
            };

            list_size += field.size();
            if list_size > self.max_header_list_size {
                return Err(HpackError::HeaderListTooLarge(self.max_header_list_size));
            }
            fields.push(field);
        }

        Ok(fields)
    }

    fn field_at(&self, index: u64) -> Result<HeaderField, HpackError> {
        if let Some((name, value)) = static_table::get(index) {
            return Ok(HeaderField::new(Bytes::from_static(name), Bytes::from_static(value)));
        }
        self.table.get(index).cloned().ok_or(HpackError::InvalidIndex(index))
    }

    fn decode_literal(&self, block: &mut Bytes, prefix_bits: u8) -> Result<HeaderField, HpackError> {
        let name_index = decode_integer(block, prefix_bits)?;
        let name = if name_index == 0 {
            decode_string(block)?
        } else {
            self.field_at(name_index)?.name
        };
        let value = decode_string(block)?;
        Ok(HeaderField { name, value })
    }
}

fn decode_string(block: &mut Bytes) -> Result<Bytes, HpackError> {
    let huffman = block.first().ok_or(HpackError::Truncated)? & 0x80 != 0;
    let len = decode_integer(block, 7)?;
    let len = usize::try_from(len).map_err(|_| HpackError::Truncated)?;
    if block.remaining() < len {
        return Err(HpackError::Truncated);
    }
    let raw = block.split_to(len);
    if huffman {
        Ok(Bytes::from(huffman::decode(&raw)?))
    } else {
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use proptest::prelude::*;

    fn fields(pairs: &[(&'static str, &'static str)]) -> Vec<HeaderField> {
        pairs.iter().map(|&(n, v)| HeaderField::new(n, v)).collect()
    }

    fn decode_hex(decoder: &mut HpackDecoder, bytes: &[u8]) -> Vec<HeaderField> {
        decoder.decode(Bytes::copy_from_slice(bytes)).unwrap()
    }

    #[test]
    fn method_get_is_single_indexed_byte() {
        let mut encoder = HpackEncoder::default();
        let block = encoder.encode_block(&fields(&[(":method", "GET")]));
        assert_eq!(&block[..], [0x82]);
        assert!(encoder.table().is_empty());
    }

    #[test]
    fn status_200_is_single_indexed_byte() {
        let mut encoder = HpackEncoder::default();
        let block = encoder.encode_block(&fields(&[(":status", "200")]));
        assert_eq!(&block[..], [0x88]);
    }

    // RFC 7541 C.3: requests without Huffman, one encoder across blocks.
    #[test]
    fn rfc7541_c3_request_sequence() {
        let mut encoder = HpackEncoder::default().with_huffman(false);
        let mut decoder = HpackDecoder::default();

        let first = fields(&[
            (":method", "GET"),
            (":scheme", "http"),
            (":path", "/"),
            (":authority", "www.example.com"),
        ]);
        let block = encoder.encode_block(&first);
        assert_eq!(&block[..], hex!("828684410f7777772e6578616d706c652e636f6d"));
        assert_eq!(decoder.decode(block).unwrap(), first);
        assert_eq!(encoder.table().current_size(), 57);

        let mut second = first.clone();
        second.push(HeaderField::new("cache-control", "no-cache"));
        let block = encoder.encode_block(&second);
        assert_eq!(&block[..], hex!("828684be58086e6f2d6361636865"));
        assert_eq!(decoder.decode(block).unwrap(), second);
        assert_eq!(encoder.table().current_size(), 110);

        let third = fields(&[
            (":method", "GET"),
            (":scheme", "https"),
            (":path", "/index.html"),
            (":authority", "www.example.com"),
            ("custom-key", "custom-value"),
        ]);
        let block = encoder.encode_block(&third);
        assert_eq!(
            &block[..],
            hex!("828785bf400a637573746f6d2d6b65790c637573746f6d2d76616c7565")
        );
        assert_eq!(decoder.decode(block).unwrap(), third);
        assert_eq!(encoder.table().current_size(), 164);
        assert_eq!(decoder.table().current_size(), 164);
    }

    // RFC 7541 C.4: same requests with Huffman.
    #[test]
    fn rfc7541_c4_request_sequence_huffman() {
        let mut encoder = HpackEncoder::default();
        let block = encoder.encode_block(&fields(&[
            (":method", "GET"),
            (":scheme", "http"),
            (":path", "/"),
            (":authority", "www.example.com"),
        ]));
        assert_eq!(&block[..], hex!("828684418cf1e3c2e5f23a6ba0ab90f4ff"));

        let block = encoder.encode_block(&fields(&[
            (":method", "GET"),
            (":scheme", "http"),
            (":path", "/"),
            (":authority", "www.example.com"),
            ("cache-control", "no-cache"),
        ]));
        assert_eq!(&block[..], hex!("828684be5886a8eb10649cbf"));

        let block = encoder.encode_block(&fields(&[
            (":method", "GET"),
            (":scheme", "https"),
            (":path", "/index.html"),
            (":authority", "www.example.com"),
            ("custom-key", "custom-value"),
        ]));
        assert_eq!(&block[..], hex!("828785bf408825a849e95ba97d7f8925a849e95bb8e8b4bf"));
    }

    // RFC 7541 C.5: responses with a 256-byte table, exercising eviction.
    #[test]
    fn rfc7541_c5_response_eviction() {
        let mut encoder = HpackEncoder::new(256).with_huffman(false);
        let mut decoder = HpackDecoder::new(256);

        let first = fields(&[
            (":status", "302"),
            ("cache-control", "private"),
            ("date", "Mon, 21 Oct 2013 20:13:21 GMT"),
            ("location", "https://www.example.com"),
        ]);
        let block = encoder.encode_block(&first);
        assert_eq!(
            &block[..],
            hex!(
                "4803333032580770726976617465611d4d6f6e2c203231204f637420323031332032303a31333a"
                "323120474d546e1768747470733a2f2f7777772e6578616d706c652e636f6d"
            )
        );
        assert_eq!(decoder.decode(block).unwrap(), first);
        assert_eq!(encoder.table().current_size(), 222);

        let second = fields(&[
            (":status", "307"),
            ("cache-control", "private"),
            ("date", "Mon, 21 Oct 2013 20:13:21 GMT"),
            ("location", "https://www.example.com"),
        ]);
        let block = encoder.encode_block(&second);
        assert_eq!(&block[..], hex!("4803333037c1c0bf"));
        assert_eq!(decoder.decode(block).unwrap(), second);
        assert_eq!(decoder.table().current_size(), 222);
        assert_eq!(decoder.table().get(62), Some(&HeaderField::new(":status", "307")));
    }

    #[test]
    fn forced_without_indexing_leaves_table_alone() {
        let mut encoder = HpackEncoder::default().with_huffman(false);
        let mut out = BytesMut::new();
        let field = HeaderField::new(":path", "/sample/path");
        encoder.encode_field(&field, false, Some(Representation::WithoutIndexing), &mut out);
        // RFC 7541 C.2.2
        assert_eq!(&out[..], hex!("040c2f73616d706c652f70617468"));
        assert!(encoder.table().is_empty());
    }

    #[test]
    fn sensitive_headers_are_never_indexed() {
        let mut encoder = HpackEncoder::default().with_huffman(false);
        let block = encoder.encode_block(&fields(&[("authorization", "secret")]));
        // Name index 23, never-indexed: 0001_1111 then 23 - 15 = 8.
        assert_eq!(&block[..2], [0x1f, 0x08]);
        assert!(encoder.table().is_empty());

        let mut decoder = HpackDecoder::default();
        assert_eq!(
            decoder.decode(block).unwrap(),
            fields(&[("authorization", "secret")])
        );
        assert!(decoder.table().is_empty());
    }

    #[test]
    fn rfc7541_c2_1_literal_with_indexing() {
        let mut decoder = HpackDecoder::default();
        let decoded = decode_hex(
            &mut decoder,
            &hex!("400a637573746f6d2d6b65790d637573746f6d2d686561646572"),
        );
        assert_eq!(decoded, fields(&[("custom-key", "custom-header")]));
        assert_eq!(decoder.table().current_size(), 55);
    }

    #[test]
    fn rfc7541_c2_3_literal_never_indexed() {
        let mut decoder = HpackDecoder::default();
        let decoded = decode_hex(&mut decoder, &hex!("100870617373776f726406736563726574"));
        assert_eq!(decoded, fields(&[("password", "secret")]));
        assert!(decoder.table().is_empty());
    }

    #[test]
    fn index_out_of_range_is_an_error() {
        let mut decoder = HpackDecoder::default();
        assert_eq!(
            decoder.decode(Bytes::from_static(&[0x80 | 62])),
            Err(HpackError::InvalidIndex(62))
        );
        assert_eq!(
            decoder.decode(Bytes::from_static(&[0x80])),
            Err(HpackError::InvalidIndex(0))
        );
    }

    #[test]
    fn truncated_string_is_an_error() {
        let mut decoder = HpackDecoder::default();
        assert_eq!(
            decoder.decode(Bytes::from_static(&[0x40, 0x0a, b'c'])),
            Err(HpackError::Truncated)
        );
    }

    #[test]
    fn size_update_applies_and_is_bounded() {
        let mut decoder = HpackDecoder::default();
        decode_hex(&mut decoder, &hex!("400a637573746f6d2d6b65790d637573746f6d2d686561646572"));
        // 0x20 = size update to 0 flushes the table.
        assert!(decode_hex(&mut decoder, &[0x20]).is_empty());
        assert!(decoder.table().is_empty());

        let mut over = BytesMut::new();
        encode_integer(8192, 5, 0x20, &mut over);
        assert!(matches!(
            decoder.decode(over.freeze()),
            Err(HpackError::TableSizeUpdate { requested: 8192, .. })
        ));
    }

    #[test]
    fn size_update_after_field_is_rejected() {
        let mut decoder = HpackDecoder::default();
        assert_eq!(
            decoder.decode(Bytes::from_static(&[0x82, 0x20])),
            Err(HpackError::InvalidRepresentation(0x20))
        );
    }

    #[test]
    fn lower_limit_waits_for_peer_update() {
        let mut encoder = HpackEncoder::default();
        let mut decoder = HpackDecoder::new(DEFAULT_TABLE_SIZE).with_size_update_limit(64);
        let request = fields(&[(":path", "/first-request-path"), ("x-trace", "0123456789abcdef")]);

        // The peer has not seen our SETTINGS yet and indexes at 4096.
        let first = encoder.encode_block(&request);
        assert_eq!(decoder.decode(first).unwrap(), request);
        let second = encoder.encode_block(&request);
        assert_eq!(second.len(), 2);
        assert_eq!(decoder.decode(second).unwrap(), request);
        assert_eq!(decoder.table().len(), 2);

        // Once it does, only updates within the limit are accepted.
        let mut over = BytesMut::new();
        encode_integer(4096, 5, 0x20, &mut over);
        assert!(matches!(
            decoder.decode(over.freeze()),
            Err(HpackError::TableSizeUpdate { requested: 4096, limit: 64 })
        ));
        encoder.set_max_table_size(64);
        let shrunk = encoder.encode_block(&request);
        assert_eq!(decoder.decode(shrunk).unwrap(), request);
        assert_eq!(decoder.table().max_size(), Some(64));
        assert!(decoder.table().current_size() <= 64);
    }

    #[test]
    fn encoder_announces_table_size_change() {
        let mut encoder = HpackEncoder::default();
        encoder.set_max_table_size(0);
        let block = encoder.encode_block(&fields(&[("x-a", "b")]));
        assert_eq!(block[0], 0x20);
        assert!(encoder.table().is_empty());

        let mut decoder = HpackDecoder::default();
        assert_eq!(decoder.decode(block).unwrap(), fields(&[("x-a", "b")]));
        assert!(decoder.table().is_empty());
    }

    #[test]
    fn header_list_limit() {
        let mut encoder = HpackEncoder::default();
        let block = encoder.encode_block(&fields(&[("x-long", "0123456789")]));
        let mut decoder = HpackDecoder::default().with_max_header_list_size(40);
        assert_eq!(decoder.decode(block), Err(HpackError::HeaderListTooLarge(40)));
    }

    fn header_list() -> impl Strategy<Value = Vec<HeaderField>> {
        let name = prop_oneof![
            Just(":method".to_string()),
            Just(":path".to_string()),
            Just("content-type".to_string()),
            Just("cookie".to_string()),
            "[a-z][a-z0-9-]{0,12}",
        ];
        let value = prop_oneof![Just("GET".to_string()), "[ -~]{0,40}"];
        proptest::collection::vec(
            (name, value).prop_map(|(n, v)| HeaderField::new(n, v)),
            0..12,
        )
    }

    proptest! {
        #[test]
        fn encoder_decoder_stay_in_sync(
            blocks in proptest::collection::vec(header_list(), 1..8),
            table_size in prop_oneof![Just(0usize), Just(128), Just(4096)],
            huffman in any::<bool>(),
        ) {
            let mut encoder = HpackEncoder::new(table_size).with_huffman(huffman);
            let mut decoder = HpackDecoder::new(table_size);
            for block in &blocks {
                let encoded = encoder.encode_block(block);
                prop_assert_eq!(&decoder.decode(encoded).unwrap(), block);
                prop_assert_eq!(
                    encoder.table().current_size(),
                    decoder.table().current_size()
                );
            }
        }
    }
}
