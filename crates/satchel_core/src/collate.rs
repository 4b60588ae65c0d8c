//! Collatable key encoding.
//!
//! A small tagged encoding whose byte-lexicographic order matches logical
//! order, used for composite keys in auxiliary stores (the expiry
//! timeline). Numbers are encoded as tag + length + minimal big-endian
//! bytes, so a larger number always compares greater; byte strings are
//! NUL-terminated and must not contain NUL themselves.

use crate::error::{Error, Result};

const TAG_NUMBER: u8 = 0x03;
const TAG_STRING: u8 = 0x05;
const TAG_ARRAY: u8 = 0x06;
const TAG_END: u8 = 0x00;

/// Builds a collatable byte sequence.
#[derive(Debug, Default)]
pub struct CollatableWriter {
    buf: Vec<u8>,
}

impl CollatableWriter {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens an array.
    pub fn begin_array(&mut self) -> &mut Self {
        self.buf.push(TAG_ARRAY);
        self
    }

    /// Closes the innermost array.
    pub fn end_array(&mut self) -> &mut Self {
        self.buf.push(TAG_END);
        self
    }

    /// Appends an unsigned integer.
    pub fn number(&mut self, value: u64) -> &mut Self {
        let bytes = value.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count().min(7);
        self.buf.push(TAG_NUMBER);
        self.buf.push((8 - skip) as u8);
        self.buf.extend_from_slice(&bytes[skip..]);
        self
    }

    /// Appends a byte string. The bytes must not contain NUL.
    pub fn bytes(&mut self, value: &[u8]) -> &mut Self {
        debug_assert!(!value.contains(&0), "collatable strings must not contain NUL");
        self.buf.push(TAG_STRING);
        self.buf.extend_from_slice(value);
        self.buf.push(TAG_END);
        self
    }

    /// Consumes the writer and returns the encoded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads values back out of a collatable byte sequence.
#[derive(Debug)]
pub struct CollatableReader<'a> {
    buf: &'a [u8],
}

impl<'a> CollatableReader<'a> {
    /// Creates a reader over encoded bytes.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn tag(&mut self, expected: u8, what: &str) -> Result<()> {
        match self.buf.first() {
            Some(&t) if t == expected => {
                self.buf = &self.buf[1..];
                Ok(())
            }
            _ => Err(Error::corrupt_data(format!("expected collatable {what}"))),
        }
    }

    /// Consumes an array-begin tag.
    pub fn begin_array(&mut self) -> Result<()> {
        self.tag(TAG_ARRAY, "array")
    }

    /// Consumes an array-end tag.
    pub fn end_array(&mut self) -> Result<()> {
        self.tag(TAG_END, "array end")
    }

    /// Reads an unsigned integer.
    pub fn number(&mut self) -> Result<u64> {
        self.tag(TAG_NUMBER, "number")?;
        let len = *self
            .buf
            .first()
            .ok_or_else(|| Error::corrupt_data("truncated collatable number"))?
            as usize;
        if len == 0 || len > 8 || self.buf.len() < 1 + len {
            return Err(Error::corrupt_data("malformed collatable number"));
        }
        let mut bytes = [0u8; 8];
        bytes[8 - len..].copy_from_slice(&self.buf[1..1 + len]);
        self.buf = &self.buf[1 + len..];
        Ok(u64::from_be_bytes(bytes))
    }

    /// Reads a byte string.
    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        self.tag(TAG_STRING, "string")?;
        let end = self
            .buf
            .iter()
            .position(|b| *b == TAG_END)
            .ok_or_else(|| Error::corrupt_data("unterminated collatable string"))?;
        let (value, rest) = self.buf.split_at(end);
        self.buf = &rest[1..];
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_pair(number: u64, id: &[u8]) -> Vec<u8> {
        let mut w = CollatableWriter::new();
        w.begin_array().number(number).bytes(id).end_array();
        w.into_bytes()
    }

    #[test]
    fn number_round_trip() {
        for value in [0u64, 1, 255, 256, 1_700_000_000_000, u64::MAX] {
            let mut w = CollatableWriter::new();
            w.number(value);
            let buf = w.into_bytes();
            assert_eq!(CollatableReader::new(&buf).number().unwrap(), value);
        }
    }

    #[test]
    fn array_round_trip() {
        let buf = encode_pair(42, b"doc-1");
        let mut r = CollatableReader::new(&buf);
        r.begin_array().unwrap();
        assert_eq!(r.number().unwrap(), 42);
        assert_eq!(r.bytes().unwrap(), b"doc-1");
        r.end_array().unwrap();
    }

    #[test]
    fn byte_order_matches_numeric_order() {
        let pairs = [
            (0u64, 1u64),
            (1, 2),
            (255, 256),
            (256, 257),
            (1_000, 1_000_000),
            (u64::MAX - 1, u64::MAX),
        ];
        for (small, large) in pairs {
            assert!(
                encode_pair(small, b"z") < encode_pair(large, b"a"),
                "{small} should order before {large}"
            );
        }
    }

    #[test]
    fn malformed_input_is_corrupt_data() {
        let mut r = CollatableReader::new(b"\x07junk");
        assert!(matches!(r.begin_array().err(), Some(Error::CorruptData(_))));

        let mut r = CollatableReader::new(&[TAG_NUMBER, 9, 0]);
        assert!(matches!(r.number().err(), Some(Error::CorruptData(_))));

        let mut r = CollatableReader::new(&[TAG_STRING, b'a']);
        assert!(matches!(r.bytes().err(), Some(Error::CorruptData(_))));
    }
}
