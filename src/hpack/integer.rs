//! HPACK prefix integers (RFC 7541 §5.1).
//!
//! A value is packed into the low `prefix_bits` of the first byte; if it does
//! not fit, the prefix is saturated and the remainder follows as little-endian
//! 7-bit groups with the MSB marking continuation.

use bytes::{Buf, BufMut};

use crate::error::HpackError;

/// Encode `value` with an N-bit prefix. `first_byte_mask` carries the
/// representation bits above the prefix.
pub fn encode_integer<B: BufMut>(value: u64, prefix_bits: u8, first_byte_mask: u8, out: &mut B) {
    debug_assert!((1..=8).contains(&prefix_bits));

    let max_prefix: u64 = (1u64 << prefix_bits) - 1;
    if value < max_prefix {
        out.put_u8(first_byte_mask | value as u8);
        return;
    }

    out.put_u8(first_byte_mask | max_prefix as u8);
    let mut remaining = value - max_prefix;
    while remaining >= 128 {
        out.put_u8(0x80 | (remaining & 0x7f) as u8);
        remaining >>= 7;
    }
    out.put_u8(remaining as u8);
}

/// Decode an N-bit prefix integer, advancing `src` past it.
///
/// Bits above the prefix in the first byte are ignored; callers inspect
/// them before calling.
pub fn decode_integer<B: Buf>(src: &mut B, prefix_bits: u8) -> Result<u64, HpackError> {
    debug_assert!((1..=8).contains(&prefix_bits));

    if !src.has_remaining() {
        return Err(HpackError::Truncated);
    }
    let max_prefix: u64 = (1u64 << prefix_bits) - 1;
    let mut value = u64::from(src.get_u8()) & max_prefix;
    if value < max_prefix {
        return Ok(value);
    }

    let mut shift: u32 = 0;
    loop {
        if !src.has_remaining() {
            return Err(HpackError::Truncated);
        }
        let byte = src.get_u8();
        let addition = u64::from(byte & 0x7f)
            .checked_shl(shift)
            .filter(|a| a >> shift == u64::from(byte & 0x7f))
            .ok_or(HpackError::IntegerOverflow)?;
        value = value.checked_add(addition).ok_or(HpackError::IntegerOverflow)?;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift > 63 {
            return Err(HpackError::IntegerOverflow);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: u64, prefix_bits: u8, mask: u8) -> Vec<u8> {
        let mut out = Vec::new();
        encode_integer(value, prefix_bits, mask, &mut out);
        out
    }

    #[test]
    fn ten_fits_five_bit_prefix() {
        assert_eq!(encode(10, 5, 0), [0b0000_1010]);
    }

    #[test]
    fn mask_bits_are_preserved() {
        assert_eq!(encode(10, 5, 0b1010_0000), [0b1010_1010]);
    }

    #[test]
    fn rfc_1337_five_bit_prefix() {
        assert_eq!(encode(1337, 5, 0), [0b0001_1111, 0b1001_1010, 0b0000_1010]);
    }

    #[test]
    fn forty_two_eight_bit_prefix() {
        assert_eq!(encode(42, 8, 0), [0b0010_1010]);
    }

    #[test]
    fn saturated_prefix_needs_zero_continuation() {
        // 31 with a 5-bit prefix does not fit: 0x1f then 0x00.
        assert_eq!(encode(31, 5, 0), [0x1f, 0x00]);
        assert_eq!(encode(30, 5, 0), [30]);
    }

    #[test]
    fn decode_rfc_examples() {
        let mut src: &[u8] = &[0b1110_1010];
        assert_eq!(decode_integer(&mut src, 5).unwrap(), 10);
        assert!(src.is_empty());

        let mut src: &[u8] = &[0x1f, 0x9a, 0x0a, 0xff];
        assert_eq!(decode_integer(&mut src, 5).unwrap(), 1337);
        assert_eq!(src, [0xff]);

        let mut src: &[u8] = &[42];
        assert_eq!(decode_integer(&mut src, 8).unwrap(), 42);
    }

    #[test]
    fn decode_large_values() {
        for value in [127u64, 128, 255, 16_383, 1 << 32, u64::MAX] {
            let bytes = encode(value, 7, 0x80);
            let mut src = &bytes[..];
            assert_eq!(decode_integer(&mut src, 7).unwrap(), value, "value {value}");
            assert!(src.is_empty());
        }
    }

    #[test]
    fn decode_truncated() {
        let mut src: &[u8] = &[];
        assert_eq!(decode_integer(&mut src, 5), Err(HpackError::Truncated));
        let mut src: &[u8] = &[0x1f, 0x9a];
        assert_eq!(decode_integer(&mut src, 5), Err(HpackError::Truncated));
    }

    #[test]
    fn decode_overflow() {
        let mut bytes = vec![0xff];
        bytes.extend(std::iter::repeat_n(0xff, 10));
        bytes.push(0x01);
        let mut src = &bytes[..];
        assert_eq!(decode_integer(&mut src, 8), Err(HpackError::IntegerOverflow));
    }
}
