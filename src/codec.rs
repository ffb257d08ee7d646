//! Big-endian encoding and decoding of the primitive types used by
//! generated message code.
//!
//! Everything on the wire is big-endian. The functions here work on plain
//! byte slices with an explicit offset so that generated code can marshall
//! a message field by field into a single buffer without intermediate
//! allocations. Floating point values travel as the unsigned integer of
//! equal width, so there is no such thing as float endianness here.

use byteorder::{ByteOrder, NetworkEndian};
use std::{mem, slice};

use error::{DecodeError, EncodeError};

/// A primitive that can be encoded and decoded according to the LCM
/// protocol.
pub trait Marshall: Sized {
    /// Returns the number of bytes `values` will occupy once encoded.
    fn encoded_array_size(values: &[Self]) -> usize;

    /// Encodes `values` into `buf` starting at `offset`.
    ///
    /// Returns the number of bytes written.
    fn encode_array(buf: &mut [u8], offset: usize, values: &[Self]) -> Result<usize, EncodeError>;

    /// Decodes `values.len()` elements from `buf` starting at `offset`.
    ///
    /// Returns the number of bytes read.
    fn decode_array(buf: &[u8], offset: usize, values: &mut [Self]) -> Result<usize, DecodeError>;
}

/// Encodes a single value into `buf` at `offset`.
pub fn encode<T>(buf: &mut [u8], offset: usize, value: &T) -> Result<usize, EncodeError>
where
    T: Marshall,
{
    T::encode_array(buf, offset, slice::from_ref(value))
}

/// Decodes a single value from `buf` at `offset`.
pub fn decode<T>(buf: &[u8], offset: usize) -> Result<(T, usize), DecodeError>
where
    T: Marshall + Default,
{
    let mut value = [T::default()];
    let read = T::decode_array(buf, offset, &mut value)?;
    Ok((mem::replace(&mut value[0], T::default()), read))
}

/// Folds the rotation count into a running message fingerprint.
///
/// The hash is rotated to the left with the shift masked to its six low
/// bits. Generated message code composes its 64-bit type fingerprints with
/// this; the value is a protocol constant, so the masking must not change.
pub fn hash_rotate(hash: u64, bits: u32) -> u64 {
    hash.rotate_left(bits & 0x3F)
}

/// Returns how many bytes are actually available when `needed` bytes do
/// not fit, and `None` when they do.
fn shortfall(needed: usize, len: usize, offset: usize) -> Option<usize> {
    let available = len.saturating_sub(offset);
    if available < needed {
        Some(available)
    } else {
        None
    }
}

macro_rules! impl_marshall {
    ($type:ty, $size:expr, $read:ident, $write:ident) => {
        impl Marshall for $type {
            fn encoded_array_size(values: &[Self]) -> usize {
                $size * values.len()
            }

            fn encode_array(
                buf: &mut [u8],
                offset: usize,
                values: &[Self],
            ) -> Result<usize, EncodeError> {
                let needed = $size * values.len();
                if let Some(available) = shortfall(needed, buf.len(), offset) {
                    return Err(EncodeError::BufferTooSmall { needed, available });
                }

                let mut pos = offset;
                for &value in values {
                    NetworkEndian::$write(&mut buf[pos..pos + $size], value);
                    pos += $size;
                }
                Ok(needed)
            }

            fn decode_array(
                buf: &[u8],
                offset: usize,
                values: &mut [Self],
            ) -> Result<usize, DecodeError> {
                let needed = $size * values.len();
                if let Some(available) = shortfall(needed, buf.len(), offset) {
                    return Err(DecodeError::BufferTooSmall { needed, available });
                }

                let mut pos = offset;
                for value in values.iter_mut() {
                    *value = NetworkEndian::$read(&buf[pos..pos + $size]);
                    pos += $size;
                }
                Ok(needed)
            }
        }
    };
}

impl_marshall!(i16, 2, read_i16, write_i16);
impl_marshall!(i32, 4, read_i32, write_i32);
impl_marshall!(i64, 8, read_i64, write_i64);
impl_marshall!(u32, 4, read_u32, write_u32);
impl_marshall!(f32, 4, read_f32, write_f32);
impl_marshall!(f64, 8, read_f64, write_f64);

macro_rules! impl_marshall_byte {
    ($type:ty) => {
        impl Marshall for $type {
            fn encoded_array_size(values: &[Self]) -> usize {
                values.len()
            }

            fn encode_array(
                buf: &mut [u8],
                offset: usize,
                values: &[Self],
            ) -> Result<usize, EncodeError> {
                let needed = values.len();
                if let Some(available) = shortfall(needed, buf.len(), offset) {
                    return Err(EncodeError::BufferTooSmall { needed, available });
                }

                for (i, &value) in values.iter().enumerate() {
                    buf[offset + i] = value as u8;
                }
                Ok(needed)
            }

            fn decode_array(
                buf: &[u8],
                offset: usize,
                values: &mut [Self],
            ) -> Result<usize, DecodeError> {
                let needed = values.len();
                if let Some(available) = shortfall(needed, buf.len(), offset) {
                    return Err(DecodeError::BufferTooSmall { needed, available });
                }

                for (i, value) in values.iter_mut().enumerate() {
                    *value = buf[offset + i] as $type;
                }
                Ok(needed)
            }
        }
    };
}

impl_marshall_byte!(u8);
impl_marshall_byte!(i8);

impl Marshall for bool {
    fn encoded_array_size(values: &[Self]) -> usize {
        values.len()
    }

    fn encode_array(buf: &mut [u8], offset: usize, values: &[Self]) -> Result<usize, EncodeError> {
        let needed = values.len();
        if let Some(available) = shortfall(needed, buf.len(), offset) {
            return Err(EncodeError::BufferTooSmall { needed, available });
        }

        for (i, &value) in values.iter().enumerate() {
            buf[offset + i] = if value { 1 } else { 0 };
        }
        Ok(needed)
    }

    fn decode_array(buf: &[u8], offset: usize, values: &mut [Self]) -> Result<usize, DecodeError> {
        let needed = values.len();
        if let Some(available) = shortfall(needed, buf.len(), offset) {
            return Err(DecodeError::BufferTooSmall { needed, available });
        }

        // Booleans are an i8 on the wire. Anything nonzero reads as true.
        for (i, value) in values.iter_mut().enumerate() {
            *value = buf[offset + i] != 0;
        }
        Ok(needed)
    }
}

impl Marshall for String {
    fn encoded_array_size(values: &[Self]) -> usize {
        values.iter().map(|s| 4 + s.len() + 1).sum()
    }

    fn encode_array(buf: &mut [u8], offset: usize, values: &[Self]) -> Result<usize, EncodeError> {
        let needed = String::encoded_array_size(values);
        if let Some(available) = shortfall(needed, buf.len(), offset) {
            return Err(EncodeError::BufferTooSmall { needed, available });
        }

        let mut pos = offset;
        for value in values {
            NetworkEndian::write_i32(&mut buf[pos..pos + 4], value.len() as i32 + 1);
            pos += 4;
            buf[pos..pos + value.len()].copy_from_slice(value.as_bytes());
            pos += value.len();
            buf[pos] = 0;
            pos += 1;
        }
        Ok(needed)
    }

    fn decode_array(buf: &[u8], offset: usize, values: &mut [Self]) -> Result<usize, DecodeError> {
        let mut pos = offset;
        for value in values.iter_mut() {
            if let Some(available) = shortfall(4, buf.len(), pos) {
                return Err(DecodeError::BufferTooSmall {
                    needed: 4,
                    available,
                });
            }
            let len = NetworkEndian::read_i32(&buf[pos..pos + 4]);
            pos += 4;

            // The length includes the NUL terminator, so it is at least one.
            if len <= 0 {
                return Err(DecodeError::InvalidSize(i64::from(len)));
            }
            let len = len as usize;
            if let Some(available) = shortfall(len, buf.len(), pos) {
                return Err(DecodeError::BufferTooSmall {
                    needed: len,
                    available,
                });
            }

            if buf[pos + len - 1] != 0 {
                return Err(DecodeError::MissingNullTerminator);
            }
            *value = String::from_utf8(buf[pos..pos + len - 1].to_vec())?;
            pos += len;
        }
        Ok(pos - offset)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn integers_are_big_endian() {
        let mut buf = [0u8; 8];
        let written = encode(&mut buf, 0, &0x0102_0304i32).unwrap();
        assert_eq!(written, 4);
        assert_eq!(&buf[..4], &[0x01, 0x02, 0x03, 0x04]);

        let written = encode(&mut buf, 0, &0x0102_0304_0506_0708i64).unwrap();
        assert_eq!(written, 8);
        assert_eq!(&buf, &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
    }

    #[test]
    fn floats_bit_cast_through_integers() {
        let mut buf = [0u8; 8];
        encode(&mut buf, 0, &1.0f64).unwrap();
        assert_eq!(&buf, &[0x3F, 0xF0, 0, 0, 0, 0, 0, 0]);

        encode(&mut buf, 0, &-2.0f32).unwrap();
        assert_eq!(&buf[..4], &[0xC0, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn round_trip_arrays() {
        let mut buf = [0u8; 256];

        let values: Vec<i16> = (-8..8).collect();
        let written = i16::encode_array(&mut buf, 3, &values).unwrap();
        assert_eq!(written, i16::encoded_array_size(&values));
        let mut decoded = vec![0i16; values.len()];
        let read = i16::decode_array(&buf, 3, &mut decoded).unwrap();
        assert_eq!(read, written);
        assert_eq!(decoded, values);

        let values = vec![0.5f64, -1.25, 3e300];
        let written = f64::encode_array(&mut buf, 0, &values).unwrap();
        let mut decoded = vec![0f64; values.len()];
        f64::decode_array(&buf, 0, &mut decoded).unwrap();
        assert_eq!(written, 24);
        assert_eq!(decoded, values);
    }

    #[test]
    fn round_trip_empty_array() {
        let mut buf = [0u8; 4];
        assert_eq!(u32::encode_array(&mut buf, 4, &[]).unwrap(), 0);
        assert_eq!(u32::decode_array(&buf, 4, &mut []).unwrap(), 0);
    }

    #[test]
    fn string_framing() {
        let mut buf = [0u8; 16];
        let written = encode(&mut buf, 0, &String::from("AB")).unwrap();
        assert_eq!(written, 7);
        assert_eq!(&buf[..7], &[0, 0, 0, 3, b'A', b'B', 0]);

        let (decoded, read): (String, _) = decode(&buf, 0).unwrap();
        assert_eq!(read, 7);
        assert_eq!(decoded, "AB");
    }

    #[test]
    fn string_requires_null_terminator() {
        let buf = [0, 0, 0, 2, b'A', b'B'];
        let result: Result<(String, _), _> = decode(&buf, 0);
        assert!(match result {
            Err(DecodeError::MissingNullTerminator) => true,
            _ => false,
        });
    }

    #[test]
    fn string_rejects_bad_length() {
        let buf = [0xFF, 0xFF, 0xFF, 0xFF, 0];
        let result: Result<(String, _), _> = decode(&buf, 0);
        assert!(match result {
            Err(DecodeError::InvalidSize(_)) => true,
            _ => false,
        });
    }

    #[test]
    fn truncated_buffers_are_reported() {
        let mut buf = [0u8; 3];
        let err = encode(&mut buf, 0, &0u32).unwrap_err();
        match err {
            EncodeError::BufferTooSmall { needed, available } => {
                assert_eq!(needed, 4);
                assert_eq!(available, 3);
            }
        }

        let buf = [0u8; 10];
        let mut decoded = [0i64; 2];
        assert!(i64::decode_array(&buf, 0, &mut decoded).is_err());

        // An offset past the end is just an empty buffer.
        let mut buf = [0u8; 10];
        assert!(encode(&mut buf, 100, &0i8).is_err());
    }

    #[test]
    fn booleans_decode_nonzero_as_true() {
        let buf = [0u8, 1, 2, 255];
        let mut values = [false; 4];
        bool::decode_array(&buf, 0, &mut values).unwrap();
        assert_eq!(values, [false, true, true, true]);

        let mut buf = [0xAAu8; 2];
        bool::encode_array(&mut buf, 0, &[true, false]).unwrap();
        assert_eq!(buf, [1, 0]);
    }

    #[test]
    fn hash_rotation() {
        assert_eq!(hash_rotate(1, 1), 2);
        assert_eq!(hash_rotate(0x8000_0000_0000_0000, 1), 1);
        assert_eq!(hash_rotate(0x0123_4567_89AB_CDEF, 0), 0x0123_4567_89AB_CDEF);

        // The shift is masked to six bits, so 64 is a full turn and 70 is
        // the same as 6.
        let hash = 0xDEAD_BEEF_0BAD_F00D;
        assert_eq!(hash_rotate(hash, 64), hash);
        assert_eq!(hash_rotate(hash, 70), hash_rotate(hash, 6));
    }
}
