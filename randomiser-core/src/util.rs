//! Little-endian field access and padding helpers shared by the table and
//! bytecode codecs.

use crate::{RandomiserError, Result};

pub(crate) fn read_u16_le(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

pub(crate) fn read_u32_le(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

pub(crate) fn write_u16_le(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// Read a u32 that must lie fully inside `buf`, reporting `what` otherwise.
pub(crate) fn checked_u32_le(buf: &[u8], offset: usize, what: &'static str) -> Result<u32> {
    if offset + 4 > buf.len() {
        return Err(RandomiserError::MalformedRecordStream {
            what,
            expected: offset + 4,
            actual: buf.len(),
        });
    }
    Ok(read_u32_le(buf, offset))
}

/// Number of filler bytes needed to bring `len` up to a multiple of four.
pub(crate) fn padding_to_word(len: usize) -> usize {
    if len % 4 == 0 {
        0
    } else {
        4 - (len % 4)
    }
}

pub(crate) fn pad_to_word(out: &mut Vec<u8>, unit_len: usize, filler: u8) {
    let pad = padding_to_word(unit_len);
    out.extend(std::iter::repeat(filler).take(pad));
}

pub(crate) fn is_zeroed(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b == 0)
}

/// Render bytes as a `b"\x.."` literal.
pub(crate) fn bytes_literal(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(3 + bytes.len() * 4);
    s.push_str("b\"");
    for b in bytes {
        s.push_str(&format!("\\x{:02x}", b));
    }
    s.push('"');
    s
}

pub(crate) fn parse_hex_u32(token: &str) -> Option<u32> {
    let t = token.trim();
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        t.parse::<u32>().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_rounds_up_to_word() {
        assert_eq!(padding_to_word(0), 0);
        assert_eq!(padding_to_word(1), 3);
        assert_eq!(padding_to_word(4), 0);
        assert_eq!(padding_to_word(6), 2);

        let mut out = vec![1, 2, 3, 4, 5];
        pad_to_word(&mut out, 5, 0xCC);
        assert_eq!(out, vec![1, 2, 3, 4, 5, 0xCC, 0xCC, 0xCC]);
    }

    #[test]
    fn reads_little_endian() {
        let buf = [0x34, 0x12, 0x78, 0x56];
        assert_eq!(read_u16_le(&buf, 0), 0x1234);
        assert_eq!(read_u32_le(&buf, 0), 0x5678_1234);
        assert!(checked_u32_le(&buf, 1, "test").is_err());
    }

    #[test]
    fn parses_hex_and_decimal() {
        assert_eq!(parse_hex_u32("0x1a4"), Some(0x1a4));
        assert_eq!(parse_hex_u32("42"), Some(42));
        assert_eq!(parse_hex_u32("zz"), None);
        assert_eq!(bytes_literal(&[0, 0xff]), "b\"\\x00\\xff\"");
    }
}
