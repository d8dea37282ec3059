#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use milli_h2::hpack::{HpackDecoder, HpackEncoder};

fuzz_target!(|data: &[u8]| {
    // Split the input into several blocks so dynamic table state carries over.
    let mut decoder = HpackDecoder::new(4096).with_max_header_list_size(64 * 1024);
    for block in data.split(|b| *b == 0xff) {
        let Ok(fields) = decoder.decode(Bytes::copy_from_slice(block)) else {
            return;
        };
        // Whatever decodes must re-encode and decode to the same list.
        let mut encoder = HpackEncoder::new(4096);
        let mut check = HpackDecoder::new(4096);
        let wire = encoder.encode_block(&fields);
        assert_eq!(check.decode(wire).ok(), Some(fields));
    }
});
