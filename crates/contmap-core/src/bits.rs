//! Low-level bit and integer decoding shared by the analyzers.
//!
//! ## Encodings
//!
//! - MSB-first bit fields of arbitrary width (MPEG side information)
//! - syncsafe integers: 7 significant bits per byte, high bit always zero
//!   (ID3v2 tag and frame sizes)
//! - plain big-endian integers of 1 to 4 bytes (ID3v2.2/2.3 frame sizes)

use crate::error::{Error, Result};

/// Reads MSB-first bit fields from a byte slice
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BitReader<'a> {
    /// Creates a reader positioned at the first bit of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Current position in bits
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bits left to read
    pub fn remaining(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.position)
    }

    /// Reads `width` bits (at most 32) as an unsigned integer
    pub fn read(&mut self, width: usize) -> Result<u32> {
        if width > 32 {
            return Err(Error::truncated(
                self.position,
                format!("bit field of {} bits exceeds 32", width),
            ));
        }
        if width > self.remaining() {
            return Err(Error::truncated(
                self.position,
                format!("need {} bits, have {}", width, self.remaining()),
            ));
        }

        let mut value: u32 = 0;
        for _ in 0..width {
            let byte = self.data[self.position / 8];
            let bit = (byte >> (7 - self.position % 8)) & 1;
            value = (value << 1) | u32::from(bit);
            self.position += 1;
        }
        Ok(value)
    }

    /// Reads a single bit as a flag
    pub fn read_flag(&mut self) -> Result<bool> {
        Ok(self.read(1)? == 1)
    }
}

/// Decodes a syncsafe integer from up to 4 bytes
///
/// Returns the value, or an error if a byte has its high bit set.
pub fn decode_syncsafe(data: &[u8]) -> Result<u32> {
    if data.is_empty() || data.len() > 4 {
        return Err(Error::truncated(0, "syncsafe integers span 1 to 4 bytes"));
    }

    let mut value: u32 = 0;
    for (i, &byte) in data.iter().enumerate() {
        if byte & 0x80 != 0 {
            return Err(Error::truncated(i, "syncsafe byte with high bit set"));
        }
        value = (value << 7) | u32::from(byte);
    }
    Ok(value)
}

/// Decodes a big-endian unsigned integer from up to 4 bytes
pub fn decode_be(data: &[u8]) -> Result<u32> {
    if data.is_empty() || data.len() > 4 {
        return Err(Error::truncated(0, "big-endian integers span 1 to 4 bytes"));
    }
    Ok(data.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b)))
}
