//! Decoding of LEB128 variable-length integers.
//!
//! All integer immediates and counts in the binary format are encoded as
//! LEB128: 7-bit groups in little-endian order, the high bit of each byte
//! flagging a continuation. Signed values sign-extend from the `0x40` bit of
//! the final byte.
//!
//! Decoding is capped at ⌈width / 7⌉ bytes so a malicious stream of
//! continuation bytes cannot spin the decoder forever.

use crate::DecodeError;
use std::io::Read;

const CONTINUATION: u8 = 0x80;
const SIGN: u8 = 0x40;

fn read_byte<R: Read>(reader: &mut R) -> Result<u8, DecodeError> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

macro_rules! impl_unsigned {
    ($name:ident, $ty:ty, $max_shift:expr, $doc:expr) => {
        #[doc = $doc]
        pub fn $name<R: Read>(reader: &mut R) -> Result<$ty, DecodeError> {
            let mut result: $ty = 0;
            let mut shift = 0u32;
            loop {
                if shift > $max_shift {
                    return Err(DecodeError::MalformedLeb128);
                }
                let byte = read_byte(reader)?;
                result |= <$ty>::from(byte & !CONTINUATION) << shift;
                if byte & CONTINUATION == 0 {
                    return Ok(result);
                }
                shift += 7;
            }
        }
    };
}

macro_rules! impl_signed {
    ($name:ident, $ty:ty, $unsigned:ty, $max_shift:expr, $doc:expr) => {
        #[doc = $doc]
        pub fn $name<R: Read>(reader: &mut R) -> Result<$ty, DecodeError> {
            let mut result: $unsigned = 0;
            let mut shift = 0u32;
            loop {
                if shift > $max_shift {
                    return Err(DecodeError::MalformedLeb128);
                }
                let byte = read_byte(reader)?;
                result |= <$unsigned>::from(byte & !CONTINUATION) << shift;
                shift += 7;
                if byte & CONTINUATION == 0 {
                    if shift < <$unsigned>::BITS && byte & SIGN != 0 {
                        result |= <$unsigned>::MAX << shift;
                    }
                    return Ok(result as $ty);
                }
            }
        }
    };
}

impl_unsigned!(u32, u32, 28, "Decodes an unsigned 32-bit LEB128 integer.");
impl_unsigned!(u64, u64, 63, "Decodes an unsigned 64-bit LEB128 integer.");
impl_signed!(i32, i32, u32, 28, "Decodes a signed 32-bit LEB128 integer.");
impl_signed!(i64, i64, u64, 63, "Decodes a signed 64-bit LEB128 integer.");

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::DecodeError;

    fn encode_unsigned(mut value: u64) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                out.push(byte);
                return out;
            }
            out.push(byte | 0x80);
        }
    }

    fn encode_signed(mut value: i64) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
            if done {
                out.push(byte);
                return out;
            }
            out.push(byte | 0x80);
        }
    }

    fn u32(bytes: &[u8]) -> Result<u32, DecodeError> {
        super::u32(&mut &bytes[..])
    }

    fn i32(bytes: &[u8]) -> Result<i32, DecodeError> {
        super::i32(&mut &bytes[..])
    }

    fn i64(bytes: &[u8]) -> Result<i64, DecodeError> {
        super::i64(&mut &bytes[..])
    }

    #[test]
    fn unsigned_round_trips() {
        for value in [0u32, 1, 2, 127, 128, 255, 624485, u32::MAX / 2, u32::MAX] {
            assert_eq!(u32(&encode_unsigned(value.into())).unwrap(), value);
        }
        for value in [0u64, 1 << 32, u64::MAX / 3, u64::MAX] {
            let bytes = encode_unsigned(value);
            assert_eq!(super::u64(&mut &bytes[..]).unwrap(), value);
        }
    }

    #[test]
    fn signed_round_trips() {
        for value in [0i32, 1, -1, 63, 64, -64, -65, 624485, -624485, i32::MIN, i32::MAX] {
            assert_eq!(i32(&encode_signed(value.into())).unwrap(), value);
        }
        for value in [0i64, -1, i64::MIN, i64::MAX, 1 << 40, -(1 << 40)] {
            assert_eq!(i64(&encode_signed(value)).unwrap(), value);
        }
    }

    #[test]
    fn known_encodings() {
        assert_eq!(u32(&[0xe5, 0x8e, 0x26]).unwrap(), 624485);
        assert_eq!(i32(&[0x7f]).unwrap(), -1);
        assert_eq!(i32(&[0xc0, 0xbb, 0x78]).unwrap(), -123456);
        // A full five-byte group also denotes -1; the fifth byte carries only
        // the top four value bits.
        assert_eq!(i32(&[0xff, 0xff, 0xff, 0xff, 0x0f]).unwrap(), -1);
        assert_eq!(u32(&[0xff, 0xff, 0xff, 0xff, 0x0f]).unwrap(), u32::MAX);
    }

    #[test]
    fn sign_extension_only_below_width() {
        assert_eq!(i32(&[0x40]).unwrap(), -64);
        assert_eq!(i32(&[0xff, 0x7f]).unwrap(), -1);
        assert_eq!(i64(&[0x7e]).unwrap(), -2);
    }

    #[test]
    fn overlong_encodings_rejected() {
        assert_matches!(
            u32(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x01]),
            Err(DecodeError::MalformedLeb128)
        );
        assert_matches!(
            i32(&[0xff, 0xff, 0xff, 0xff, 0xff, 0x7f]),
            Err(DecodeError::MalformedLeb128)
        );
        let eleven = [0x80u8; 11];
        assert_matches!(
            super::u64(&mut &eleven[..]),
            Err(DecodeError::MalformedLeb128)
        );
    }

    #[test]
    fn truncated_input_is_eof() {
        assert_matches!(u32(&[0x80]), Err(DecodeError::UnexpectedEof));
        assert_matches!(i64(&[0x80, 0x80]), Err(DecodeError::UnexpectedEof));
    }
}
