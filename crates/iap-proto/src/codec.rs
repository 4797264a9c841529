//! Big-endian integer codec
//!
//! All multi-byte integers on the wire are big-endian. Each source byte is
//! widened to the target width before it is shifted into place.

use thiserror::Error;

/// Protocol errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtoError {
    #[error("Incomplete data: needed {needed} bytes, {available} available")]
    IncompleteData { needed: usize, available: usize },

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Unknown tag: {0}")]
    UnknownTag(u16),
}

/// Result type for codec and message operations
pub type ProtoResult<T> = Result<T, ProtoError>;

fn field(bytes: &[u8], offset: usize, width: usize) -> ProtoResult<&[u8]> {
    let end = offset.checked_add(width).ok_or(ProtoError::IncompleteData {
        needed: usize::MAX,
        available: bytes.len(),
    })?;

    bytes.get(offset..end).ok_or(ProtoError::IncompleteData {
        needed: end,
        available: bytes.len(),
    })
}

fn field_mut(bytes: &mut [u8], offset: usize, width: usize) -> ProtoResult<&mut [u8]> {
    let available = bytes.len();
    let end = offset.checked_add(width).ok_or(ProtoError::IncompleteData {
        needed: usize::MAX,
        available,
    })?;

    bytes.get_mut(offset..end).ok_or(ProtoError::IncompleteData {
        needed: end,
        available,
    })
}

fn decode_be(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(0u64, |acc, &byte| (acc << 8) | u64::from(byte))
}

fn encode_be(value: u64, out: &mut [u8]) {
    let width = out.len();
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = (value >> (8 * (width - 1 - i))) as u8;
    }
}

/// Read a big-endian u16 at `offset`
pub fn decode_u16(bytes: &[u8], offset: usize) -> ProtoResult<u16> {
    field(bytes, offset, 2).map(|b| decode_be(b) as u16)
}

/// Read a big-endian u32 at `offset`
pub fn decode_u32(bytes: &[u8], offset: usize) -> ProtoResult<u32> {
    field(bytes, offset, 4).map(|b| decode_be(b) as u32)
}

/// Read a big-endian u64 at `offset`
pub fn decode_u64(bytes: &[u8], offset: usize) -> ProtoResult<u64> {
    field(bytes, offset, 8).map(decode_be)
}

/// Write `value` as a big-endian u16 at `offset`, overwriting exactly 2 bytes
pub fn encode_u16(value: u16, bytes: &mut [u8], offset: usize) -> ProtoResult<()> {
    encode_be(u64::from(value), field_mut(bytes, offset, 2)?);
    Ok(())
}

/// Write `value` as a big-endian u32 at `offset`, overwriting exactly 4 bytes
pub fn encode_u32(value: u32, bytes: &mut [u8], offset: usize) -> ProtoResult<()> {
    encode_be(u64::from(value), field_mut(bytes, offset, 4)?);
    Ok(())
}

/// Write `value` as a big-endian u64 at `offset`, overwriting exactly 8 bytes
pub fn encode_u64(value: u64, bytes: &mut [u8], offset: usize) -> ProtoResult<()> {
    encode_be(value, field_mut(bytes, offset, 8)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_keeps_high_order_bytes() {
        let bytes = [0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0];

        assert_eq!(decode_u16(&bytes, 0).unwrap(), 0x1234);
        assert_eq!(decode_u32(&bytes, 0).unwrap(), 0x1234_5678);
        assert_eq!(decode_u64(&bytes, 0).unwrap(), 0x1234_5678_9abc_def0);
    }

    #[test]
    fn test_decode_at_offset() {
        let bytes = [0xff, 0x00, 0x00, 0x01, 0x00];
        assert_eq!(decode_u32(&bytes, 1).unwrap(), 0x0000_0100);
        assert_eq!(decode_u16(&bytes, 3).unwrap(), 0x0100);
    }

    #[test]
    fn test_decode_past_end() {
        let bytes = [0x00, 0x04, 0x00];
        let err = decode_u32(&bytes, 1).unwrap_err();
        assert_eq!(
            err,
            ProtoError::IncompleteData {
                needed: 5,
                available: 3
            }
        );
        assert!(decode_u64(&[], 0).is_err());
        assert!(decode_u16(&bytes, usize::MAX).is_err());
    }

    #[test]
    fn test_encode_overwrites_exact_width() {
        let mut bytes = [0xaa; 12];
        encode_u64(0x0102_0304_0506_0708, &mut bytes, 2).unwrap();
        assert_eq!(
            bytes,
            [0xaa, 0xaa, 1, 2, 3, 4, 5, 6, 7, 8, 0xaa, 0xaa]
        );

        encode_u32(0xdead_beef, &mut bytes, 0).unwrap();
        assert_eq!(&bytes[..4], &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(bytes[4], 3);

        encode_u16(0x0007, &mut bytes, 10).unwrap();
        assert_eq!(&bytes[10..], &[0x00, 0x07]);
    }

    #[test]
    fn test_encode_out_of_bounds() {
        let mut bytes = [0u8; 3];
        assert!(encode_u32(1, &mut bytes, 0).is_err());
        assert_eq!(bytes, [0, 0, 0]);
    }

    #[test]
    fn test_encode_decode_extremes() {
        let mut bytes = [0u8; 8];
        for value in [0u64, 1, 255, 256, u32::MAX as u64, u64::MAX] {
            encode_u64(value, &mut bytes, 0).unwrap();
            assert_eq!(decode_u64(&bytes, 0).unwrap(), value);
        }
    }
}
