//! Big-endian primitives and length-prefixed strings
//!
//! Encoders append to a growable buffer. Decoders take a slice and return the
//! unconsumed remainder alongside the value; on failure nothing is consumed.

use crate::error::{Result, StarError};

pub fn put_u16(dst: &mut Vec<u8>, value: u16) {
    dst.extend_from_slice(&value.to_be_bytes());
}

pub fn put_u32(dst: &mut Vec<u8>, value: u32) {
    dst.extend_from_slice(&value.to_be_bytes());
}

pub fn put_u64(dst: &mut Vec<u8>, value: u64) {
    dst.extend_from_slice(&value.to_be_bytes());
}

/// Append a u32 length followed by the raw bytes of `s`
pub fn put_str(dst: &mut Vec<u8>, s: &str) -> Result<()> {
    let len = u32::try_from(s.len()).map_err(|_| StarError::StringTooLong(s.len()))?;
    dst.reserve(4 + s.len());
    put_u32(dst, len);
    dst.extend_from_slice(s.as_bytes());
    Ok(())
}

/// Split `N` bytes off the front of `src`
fn take<const N: usize>(src: &[u8]) -> Result<(&[u8], [u8; N])> {
    if src.len() < N {
        return Err(StarError::TruncatedInput {
            needed: N,
            available: src.len(),
        });
    }
    let (head, rest) = src.split_at(N);
    let mut buf = [0u8; N];
    buf.copy_from_slice(head);
    Ok((rest, buf))
}

pub fn get_u16(src: &[u8]) -> Result<(&[u8], u16)> {
    let (rest, buf) = take::<2>(src)?;
    Ok((rest, u16::from_be_bytes(buf)))
}

pub fn get_u32(src: &[u8]) -> Result<(&[u8], u32)> {
    let (rest, buf) = take::<4>(src)?;
    Ok((rest, u32::from_be_bytes(buf)))
}

pub fn get_u64(src: &[u8]) -> Result<(&[u8], u64)> {
    let (rest, buf) = take::<8>(src)?;
    Ok((rest, u64::from_be_bytes(buf)))
}

/// Decode a length-prefixed string as a view into `src`
///
/// The declared length must be fully present; the bytes must be UTF-8.
pub fn get_str(src: &[u8]) -> Result<(&[u8], &str)> {
    let (rest, len) = get_u32(src)?;
    let len = len as usize;
    if rest.len() < len {
        return Err(StarError::TruncatedInput {
            needed: len,
            available: rest.len(),
        });
    }
    let (bytes, rest) = rest.split_at(len);
    let s = std::str::from_utf8(bytes).map_err(|_| StarError::InvalidUtf8 { field: "string" })?;
    Ok((rest, s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integers_are_big_endian() {
        let mut buf = Vec::new();
        put_u16(&mut buf, 0x0102);
        put_u32(&mut buf, 0x03040506);
        put_u64(&mut buf, 0x0708090A0B0C0D0E);
        assert_eq!(
            buf,
            [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14]
        );

        let (rest, a) = get_u16(&buf).unwrap();
        let (rest, b) = get_u32(rest).unwrap();
        let (rest, c) = get_u64(rest).unwrap();
        assert_eq!((a, b, c), (0x0102, 0x03040506, 0x0708090A0B0C0D0E));
        assert!(rest.is_empty());
    }

    #[test]
    fn test_put_appends_to_existing_bytes() {
        let mut buf = vec![0xAA];
        put_u32(&mut buf, 7);
        assert_eq!(buf, [0xAA, 0, 0, 0, 7]);
    }

    #[test]
    fn test_short_integer_input_is_truncated() {
        let src = [0u8; 7];
        match get_u64(&src) {
            Err(StarError::TruncatedInput { needed, available }) => {
                assert_eq!(needed, 8);
                assert_eq!(available, 7);
            }
            other => panic!("Expected TruncatedInput, got: {:?}", other),
        }
        assert!(matches!(get_u16(&[1]), Err(StarError::TruncatedInput { .. })));
        assert!(matches!(get_u32(&[]), Err(StarError::TruncatedInput { .. })));
    }

    #[test]
    fn test_string_layout() {
        let mut buf = Vec::new();
        put_str(&mut buf, "a.txt").unwrap();
        assert_eq!(&buf[..4], &[0, 0, 0, 5]);
        assert_eq!(&buf[4..], b"a.txt");

        let (rest, s) = get_str(&buf).unwrap();
        assert_eq!(s, "a.txt");
        assert!(rest.is_empty());
    }

    #[test]
    fn test_empty_string() {
        let mut buf = Vec::new();
        put_str(&mut buf, "").unwrap();
        assert_eq!(buf, [0, 0, 0, 0]);
        let (_, s) = get_str(&buf).unwrap();
        assert_eq!(s, "");
    }

    #[test]
    fn test_string_shorter_than_declared() {
        let mut buf = Vec::new();
        put_u32(&mut buf, 10);
        buf.extend_from_slice(b"abc");

        match get_str(&buf) {
            Err(StarError::TruncatedInput { needed, available }) => {
                assert_eq!(needed, 10);
                assert_eq!(available, 3);
            }
            other => panic!("Expected TruncatedInput, got: {:?}", other),
        }
    }

    #[test]
    fn test_string_rejects_invalid_utf8() {
        let mut buf = Vec::new();
        put_u32(&mut buf, 2);
        buf.extend_from_slice(&[0xFF, 0xFE]);
        assert!(matches!(get_str(&buf), Err(StarError::InvalidUtf8 { .. })));
    }
}
