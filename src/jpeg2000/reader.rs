//! Big-endian reader over a byte slice, shared by the box and marker parsers.

use crate::error::{BridgeError, Result};

pub struct ByteReader<'a> {
    source: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(source: &'a [u8]) -> Self {
        Self {
            source,
            position: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining_data(&self) -> &'a [u8] {
        &self.source[self.position..]
    }

    pub fn remaining(&self) -> usize {
        self.source.len() - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        if self.remaining() < count {
            return Err(BridgeError::invalid_data(format!(
                "need {count} bytes at offset {}, {} left",
                self.position,
                self.remaining()
            )));
        }
        let bytes = &self.source[self.position..self.position + count];
        self.position += count;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.read_bytes(8)?;
        let mut word = [0u8; 8];
        word.copy_from_slice(b);
        Ok(u64::from_be_bytes(word))
    }

    /// Read an unsigned big-endian value of `width` bytes (1 to 4).
    pub fn read_uint(&mut self, width: usize) -> Result<u32> {
        let b = self.read_bytes(width)?;
        Ok(b.iter().fold(0u32, |acc, &byte| (acc << 8) | u32::from(byte)))
    }

    pub fn advance(&mut self, count: usize) -> Result<()> {
        self.read_bytes(count).map(|_| ())
    }
}
