//! Byte-level reader and writer for the proof wire format

use crate::error::{Error, Result};

/// Cursor over a borrowed byte buffer
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Number of unread bytes
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(Error::Truncated {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    /// `0xff` is true, `0x00` is false, anything else is rejected
    pub fn read_bool(&mut self) -> Result<bool> {
        match self.read_byte()? {
            0xff => Ok(true),
            0x00 => Ok(false),
            b => Err(Error::InvalidBool(b)),
        }
    }

    /// Unsigned LEB128
    pub fn read_varuint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_byte()?;
            let bits = u64::from(byte & 0x7f);
            if shift > 63 || (shift == 63 && bits > 1) {
                return Err(Error::VarUintOverflow);
            }
            value |= bits << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    /// Length-prefixed byte string; the length must lie in `[min, max]`
    pub fn read_varbytes(&mut self, max: usize, min: usize) -> Result<&'a [u8]> {
        let len = self.read_varuint()?;
        let len = usize::try_from(len).map_err(|_| Error::Bounds {
            len: usize::MAX,
            min,
            max,
        })?;
        if len > max || len < min {
            return Err(Error::Bounds { len, min, max });
        }
        self.read_bytes(len)
    }

    pub fn assert_magic(&mut self, expected: &[u8]) -> Result<()> {
        let take = expected.len().min(self.remaining());
        let actual = self.read_bytes(take)?;
        if actual != expected {
            return Err(Error::BadMagic {
                expected: hex::encode(expected),
                actual: hex::encode(actual),
            });
        }
        Ok(())
    }

    pub fn assert_eof(&self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(Error::TrailingData(n)),
        }
    }
}

/// Growable output buffer
#[derive(Debug, Clone, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn write_byte(&mut self, byte: u8) {
        self.buf.push(byte);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_byte(if value { 0xff } else { 0x00 });
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_varuint(&mut self, mut value: u64) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.write_byte(byte);
                return;
            }
            self.write_byte(byte | 0x80);
        }
    }

    pub fn write_varbytes(&mut self, bytes: &[u8]) {
        self.write_varuint(bytes.len() as u64);
        self.write_bytes(bytes);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}
