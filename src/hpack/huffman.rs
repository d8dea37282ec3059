//! HPACK Huffman coding (RFC 7541 §5.2, Appendix B).
//!
//! The canonical code is a fixed table of 257 symbols (every byte value plus
//! EOS). Encoding packs codes MSB-first and pads the last byte with the high
//! bits of EOS. Decoding matches the shortest code length first; since the
//! code is prefix-free the first hit is the only possible symbol.

use std::collections::HashMap;
use std::sync::LazyLock;

use bytes::BufMut;

use crate::error::HpackError;

/// `(code, bit_length)` per symbol; index 256 is EOS.
static CODES: [(u32, u8); 257] = [
    (0x1ff8, 13),     (0x7fffd8, 23),   (0xfffffe2, 28),  (0xfffffe3, 28),  //   0
    (0xfffffe4, 28),  (0xfffffe5, 28),  (0xfffffe6, 28),  (0xfffffe7, 28),  //   4
    (0xfffffe8, 28),  (0xffffea, 24),   (0x3ffffffc, 30), (0xfffffe9, 28),  //   8
    (0xfffffea, 28),  (0x3ffffffd, 30), (0xfffffeb, 28),  (0xfffffec, 28),  //  12
    (0xfffffed, 28),  (0xfffffee, 28),  (0xfffffef, 28),  (0xffffff0, 28),  //  16
    (0xffffff1, 28),  (0xffffff2, 28),  (0x3ffffffe, 30), (0xffffff3, 28),  //  20
    (0xffffff4, 28),  (0xffffff5, 28),  (0xffffff6, 28),  (0xffffff7, 28),  //  24
    (0xffffff8, 28),  (0xffffff9, 28),  (0xffffffa, 28),  (0xffffffb, 28),  //  28
    (0x14, 6),        (0x3f8, 10),      (0x3f9, 10),      (0xffa, 12),      //  32
    (0x1ff9, 13),     (0x15, 6),        (0xf8, 8),        (0x7fa, 11),      //  36
    (0x3fa, 10),      (0x3fb, 10),      (0xf9, 8),        (0x7fb, 11),      //  40
    (0xfa, 8),        (0x16, 6),        (0x17, 6),        (0x18, 6),        //  44
    (0x0, 5),         (0x1, 5),         (0x2, 5),         (0x19, 6),        //  48
    (0x1a, 6),        (0x1b, 6),        (0x1c, 6),        (0x1d, 6),        //  52
    (0x1e, 6),        (0x1f, 6),        (0x5c, 7),        (0xfb, 8),        //  56
    (0x7ffc, 15),     (0x20, 6),        (0xffb, 12),      (0x3fc, 10),      //  60
    (0x1ffa, 13),     (0x21, 6),        (0x5d, 7),        (0x5e, 7),        //  64
    (0x5f, 7),        (0x60, 7),        (0x61, 7),        (0x62, 7),        //  68
    (0x63, 7),        (0x64, 7),        (0x65, 7),        (0x66, 7),        //  72
    (0x67, 7),        (0x68, 7),        (0x69, 7),        (0x6a, 7),        //  76
    (0x6b, 7),        (0x6c, 7),        (0x6d, 7),        (0x6e, 7),        //  80
    (0x6f, 7),        (0x70, 7),        (0x71, 7),        (0x72, 7),        //  84
    (0xfc, 8),        (0x73, 7),        (0xfd, 8),        (0x1ffb, 13),     //  88
    (0x7fff0, 19),    (0x1ffc, 13),     (0x3ffc, 14),     (0x22, 6),        //  92
    (0x7ffd, 15),     (0x3, 5),         (0x23, 6),        (0x4, 5),         //  96
    (0x24, 6),        (0x5, 5),         (0x25, 6),        (0x26, 6),        // 100
    (0x27, 6),        (0x6, 5),         (0x74, 7),        (0x75, 7),        // 104
    (0x28, 6),        (0x29, 6),        (0x2a, 6),        (0x7, 5),         // 108
    (0x2b, 6),        (0x76, 7),        (0x2c, 6),        (0x8, 5),         // 112
    (0x9, 5),         (0x2d, 6),        (0x77, 7),        (0x78, 7),        // 116
    (0x79, 7),        (0x7a, 7),        (0x7b, 7),        (0x7ffe, 15),     // 120
    (0x7fc, 11),      (0x3ffd, 14),     (0x1ffd, 13),     (0xffffffc, 28),  // 124
    (0xfffe6, 20),    (0x3fffd2, 22),   (0xfffe7, 20),    (0xfffe8, 20),    // 128
    (0x3fffd3, 22),   (0x3fffd4, 22),   (0x3fffd5, 22),   (0x7fffd9, 23),   // 132
    (0x3fffd6, 22),   (0x7fffda, 23),   (0x7fffdb, 23),   (0x7fffdc, 23),   // 136
    (0x7fffdd, 23),   (0x7fffde, 23),   (0xffffeb, 24),   (0x7fffdf, 23),   // 140
    (0xffffec, 24),   (0xffffed, 24),   (0x3fffd7, 22),   (0x7fffe0, 23),   // 144
    (0xffffee, 24),   (0x7fffe1, 23),   (0x7fffe2, 23),   (0x7fffe3, 23),   // 148
    (0x7fffe4, 23),   (0x1fffdc, 21),   (0x3fffd8, 22),   (0x7fffe5, 23),   // 152
    (0x3fffd9, 22),   (0x7fffe6, 23),   (0x7fffe7, 23),   (0xffffef, 24),   // 156
    (0x3fffda, 22),   (0x1fffdd, 21),   (0xfffe9, 20),    (0x3fffdb, 22),   // 160
    (0x3fffdc, 22),   (0x7fffe8, 23),   (0x7fffe9, 23),   (0x1fffde, 21),   // 164
    (0x7fffea, 23),   (0x3fffdd, 22),   (0x3fffde, 22),   (0xfffff0, 24),   // 168
    (0x1fffdf, 21),   (0x3fffdf, 22),   (0x7fffeb, 23),   (0x7fffec, 23),   // 172
    (0x1fffe0, 21),   (0x1fffe1, 21),   (0x3fffe0, 22),   (0x1fffe2, 21),   // 176
    (0x7fffed, 23),   (0x3fffe1, 22),   (0x7fffee, 23),   (0x7fffef, 23),   // 180
    (0xfffea, 20),    (0x3fffe2, 22),   (0x3fffe3, 22),   (0x3fffe4, 22),   // 184
    (0x7ffff0, 23),   (0x3fffe5, 22),   (0x3fffe6, 22),   (0x7ffff1, 23),   // 188
    (0x3ffffe0, 26),  (0x3ffffe1, 26),  (0xfffeb, 20),    (0x7fff1, 19),    // 192
    (0x3fffe7, 22),   (0x7ffff2, 23),   (0x3fffe8, 22),   (0x1ffffec, 25),  // 196
    (0x3ffffe2, 26),  (0x3ffffe3, 26),  (0x3ffffe4, 26),  (0x7ffffde, 27),  // 200
    (0x7ffffdf, 27),  (0x3ffffe5, 26),  (0xfffff1, 24),   (0x1ffffed, 25),  // 204
    (0x7fff2, 19),    (0x1fffe3, 21),   (0x3ffffe6, 26),  (0x7ffffe0, 27),  // 208
    (0x7ffffe1, 27),  (0x3ffffe7, 26),  (0x7ffffe2, 27),  (0xfffff2, 24),   // 212
    (0x1fffe4, 21),   (0x1fffe5, 21),   (0x3ffffe8, 26),  (0x3ffffe9, 26),  // 216
    (0xffffffd, 28),  (0x7ffffe3, 27),  (0x7ffffe4, 27),  (0x7ffffe5, 27),  // 220
    (0xfffec, 20),    (0xfffff3, 24),   (0xfffed, 20),    (0x1fffe6, 21),   // 224
    (0x3fffe9, 22),   (0x1fffe7, 21),   (0x1fffe8, 21),   (0x7ffff3, 23),   // 228
    (0x3fffea, 22),   (0x3fffeb, 22),   (0x1ffffee, 25),  (0x1ffffef, 25),  // 232
    (0xfffff4, 24),   (0xfffff5, 24),   (0x3ffffea, 26),  (0x7ffff4, 23),   // 236
    (0x3ffffeb, 26),  (0x7ffffe6, 27),  (0x3ffffec, 26),  (0x3ffffed, 26),  // 240
    (0x7ffffe7, 27),  (0x7ffffe8, 27),  (0x7ffffe9, 27),  (0x7ffffea, 27),  // 244
    (0x7ffffeb, 27),  (0xffffffe, 28),  (0x7ffffec, 27),  (0x7ffffed, 27),  // 248
    (0x7ffffee, 27),  (0x7ffffef, 27),  (0x7fffff0, 27),  (0x3ffffee, 26),  // 252
    (0x3fffffff, 30), // 256
];

const EOS: u16 = 256;
const MIN_CODE_LEN: u8 = 5;
const MAX_CODE_LEN: u8 = 30;

/// Reverse lookup `(bit_length, code) -> symbol`, built on first use.
static DECODE_TABLE: LazyLock<HashMap<(u8, u32), u16>> = LazyLock::new(|| {
    CODES
        .iter()
        .enumerate()
        .map(|(sym, &(code, len))| ((len, code), sym as u16))
        .collect()
});

/// Number of bytes `src` occupies once Huffman-coded, padding included.
pub fn encoded_len(src: &[u8]) -> usize {
    let bits: usize = src.iter().map(|&b| CODES[b as usize].1 as usize).sum();
    bits.div_ceil(8)
}

/// Huffman-code `src` into `out`.
pub fn encode_into<B: BufMut>(src: &[u8], out: &mut B) {
    let mut acc: u64 = 0;
    let mut acc_len: u32 = 0;

    for &byte in src {
        let (code, len) = CODES[byte as usize];
        acc = (acc << len) | u64::from(code);
        acc_len += u32::from(len);
        while acc_len >= 8 {
            acc_len -= 8;
            out.put_u8((acc >> acc_len) as u8);
        }
        acc &= (1u64 << acc_len) - 1;
    }

    if acc_len > 0 {
        // Pad with the most significant bits of EOS, which are all ones.
        let pad = 8 - acc_len;
        out.put_u8(((acc << pad) as u8) | ((1u8 << pad) - 1));
    }
}

/// Huffman-code `src` into a fresh vector.
pub fn encode(src: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(src));
    encode_into(src, &mut out);
    out
}

/// Decode a Huffman-coded string.
///
/// Trailing bits that do not form a complete code are padding: fewer than
/// eight of them, all ones. Anything else, or an explicit EOS, is an error.
pub fn decode(src: &[u8]) -> Result<Vec<u8>, HpackError> {
    let mut out = Vec::with_capacity(src.len() * 8 / 5);
    decode_into(src, &mut out)?;
    Ok(out)
}

/// Decode a Huffman-coded string, appending to `out`.
pub fn decode_into(src: &[u8], out: &mut Vec<u8>) -> Result<(), HpackError> {
    let table = &*DECODE_TABLE;
    let mut acc: u64 = 0;
    let mut acc_len: u8 = 0;

    for &byte in src {
        acc = (acc << 8) | u64::from(byte);
        acc_len += 8;

        'symbols: while acc_len >= MIN_CODE_LEN {
            for len in MIN_CODE_LEN..=acc_len.min(MAX_CODE_LEN) {
                let candidate = (acc >> (acc_len - len)) as u32;
                if let Some(&sym) = table.get(&(len, candidate)) {
                    if sym == EOS {
                        return Err(HpackError::Huffman);
                    }
                    out.push(sym as u8);
                    acc_len -= len;
                    acc &= (1u64 << acc_len) - 1;
                    continue 'symbols;
                }
            }
            if acc_len >= MAX_CODE_LEN {
                return Err(HpackError::Huffman);
            }
            break;
        }
    }

    if acc_len > 7 {
        return Err(HpackError::Huffman);
    }
    let mask = (1u64 << acc_len) - 1;
    if acc & mask != mask {
        return Err(HpackError::Huffman);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use proptest::prelude::*;

    #[test]
    fn encode_www_example_com() {
        assert_eq!(encode(b"www.example.com"), hex!("f1e3c2e5f23a6ba0ab90f4ff"));
    }

    #[test]
    fn encode_no_cache() {
        assert_eq!(encode(b"no-cache"), hex!("a8eb10649cbf"));
    }

    #[test]
    fn encode_custom_key_and_value() {
        assert_eq!(encode(b"custom-key"), hex!("25a849e95ba97d7f"));
        assert_eq!(encode(b"custom-value"), hex!("25a849e95bb8e8b4bf"));
    }

    #[test]
    fn decode_rfc_vectors() {
        assert_eq!(decode(&hex!("f1e3c2e5f23a6ba0ab90f4ff")).unwrap(), b"www.example.com");
        assert_eq!(decode(&hex!("a8eb10649cbf")).unwrap(), b"no-cache");
    }

    #[test]
    fn encoded_len_matches() {
        assert_eq!(encoded_len(b""), 0);
        assert_eq!(encoded_len(b"www.example.com"), 12);
        assert_eq!(encoded_len(b"no-cache"), 6);
    }

    #[test]
    fn empty_input() {
        assert!(encode(b"").is_empty());
        assert!(decode(&[]).unwrap().is_empty());
    }

    #[test]
    fn padding_of_zeros_is_rejected() {
        // '0' is 00000 (5 bits); 3 padding zero bits are not EOS prefix.
        assert_eq!(decode(&[0b0000_0000]), Err(HpackError::Huffman));
    }

    #[test]
    fn padding_longer_than_seven_bits_is_rejected() {
        // "0" followed by a full byte of ones.
        assert_eq!(decode(&[0b0000_0111, 0xff]), Err(HpackError::Huffman));
    }

    #[test]
    fn explicit_eos_is_rejected() {
        // EOS is thirty 1-bits; four bytes of ones contain it.
        assert_eq!(decode(&[0xff, 0xff, 0xff, 0xff]), Err(HpackError::Huffman));
    }

    #[test]
    fn every_byte_value_roundtrips() {
        let all: Vec<u8> = (0..=255).collect();
        assert_eq!(decode(&encode(&all)).unwrap(), all);
    }

    #[test]
    fn table_is_prefix_free() {
        for (i, &(a, la)) in CODES.iter().enumerate() {
            for &(b, lb) in CODES.iter().skip(i + 1) {
                let (short, ls, long, ll) = if la <= lb { (a, la, b, lb) } else { (b, lb, a, la) };
                assert_ne!(long >> (ll - ls), short, "code {i} is a prefix");
            }
        }
    }

    proptest! {
        #[test]
        fn roundtrip(s in proptest::collection::vec(any::<u8>(), 0..256)) {
            let encoded = encode(&s);
            prop_assert_eq!(encoded.len(), encoded_len(&s));
            prop_assert_eq!(decode(&encoded).unwrap(), s);
        }
    }
}
