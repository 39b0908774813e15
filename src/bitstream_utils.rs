// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io::Write;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BitWriterError {
    #[error("invalid bit count {0}")]
    InvalidBitCount(usize),
    #[error("value {value} does not fit in {bits} bits")]
    ValueOutOfRange { bits: usize, value: u32 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type BitWriterResult<T> = std::result::Result<T, BitWriterError>;

/// MSB-first bit writer for uncompressed codec headers.
pub struct BitWriter<W: Write> {
    out: W,
    nth_bit: u8,
    curr_byte: u8,
    /// Number of bits written so far, including the ones still cached in `curr_byte`.
    position: u64,
}

impl<W: Write> BitWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            out: writer,
            curr_byte: 0,
            nth_bit: 0,
            position: 0,
        }
    }

    /// Writes fixed bit size integer (up to 32 bit)
    pub fn write_f<T: Into<u32>>(&mut self, bits: usize, value: T) -> BitWriterResult<usize> {
        let value = value.into();

        if bits > 32 {
            return Err(BitWriterError::InvalidBitCount(bits));
        }

        if bits < 32 && value >> bits != 0 {
            return Err(BitWriterError::ValueOutOfRange { bits, value });
        }

        let mut written = 0;
        for bit in (0..bits).rev() {
            let bit = (1 << bit) as u32;

            self.write_bit((value & bit) == bit)?;
            written += 1;
        }

        Ok(written)
    }

    /// Takes a single bit that will be outputed to [`std::io::Write`]
    pub fn write_bit(&mut self, bit: bool) -> BitWriterResult<()> {
        self.curr_byte |= (bit as u8) << (7u8 - self.nth_bit);
        self.nth_bit += 1;
        self.position += 1;

        if self.nth_bit == 8 {
            self.out.write_all(&[self.curr_byte])?;
            self.nth_bit = 0;
            self.curr_byte = 0;
        }

        Ok(())
    }

    /// Pads the current byte with zero bits.
    pub fn byte_align(&mut self) -> BitWriterResult<()> {
        while self.nth_bit != 0 {
            self.write_bit(false)?;
        }

        Ok(())
    }

    /// Immediately outputs any cached bits to [`std::io::Write`]
    pub fn flush(&mut self) -> BitWriterResult<()> {
        if self.nth_bit != 0 {
            self.out.write_all(&[self.curr_byte])?;
            self.nth_bit = 0;
            self.curr_byte = 0;
        }

        self.out.flush()?;
        Ok(())
    }

    /// Returns `true` if ['Self`] hold data that wasn't written to [`std::io::Write`]
    pub fn has_data_pending(&self) -> bool {
        self.nth_bit != 0
    }

    /// Bit offset of the next bit to be written.
    pub fn position(&self) -> u64 {
        self.position
    }
}

impl<W: Write> Drop for BitWriter<W> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::error!("Unable to flush bits {e:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitwriter_f1() {
        let mut buf = Vec::<u8>::new();
        {
            let mut writer = BitWriter::new(&mut buf);
            writer.write_f(1, true).unwrap();
            writer.write_f(1, false).unwrap();
            writer.write_f(1, false).unwrap();
            writer.write_f(1, false).unwrap();
            writer.write_f(1, true).unwrap();
            writer.write_f(1, true).unwrap();
            writer.write_f(1, true).unwrap();
            writer.write_f(1, true).unwrap();
            assert_eq!(writer.position(), 8);
        }
        assert_eq!(buf, vec![0b10001111u8]);
    }

    #[test]
    fn test_bitwriter_f3() {
        let mut buf = Vec::<u8>::new();
        {
            let mut writer = BitWriter::new(&mut buf);
            writer.write_f(3, 0b100u8).unwrap();
            writer.write_f(3, 0b101u8).unwrap();
            writer.write_f(3, 0b011u8).unwrap();
            assert!(writer.has_data_pending());
            assert_eq!(writer.position(), 9);
        }
        assert_eq!(buf, vec![0b10010101u8, 0b10000000u8]);
    }

    #[test]
    fn test_bitwriter_align() {
        let mut buf = Vec::<u8>::new();
        {
            let mut writer = BitWriter::new(&mut buf);
            writer.write_f(2, 0b11u8).unwrap();
            writer.byte_align().unwrap();
            assert!(!writer.has_data_pending());
            assert_eq!(writer.position(), 8);
            writer.write_f(16, 0xbeefu16).unwrap();
        }
        assert_eq!(buf, vec![0b11000000u8, 0xbe, 0xef]);
    }

    #[test]
    fn test_bitwriter_rejects_oversized_values() {
        let mut buf = Vec::<u8>::new();
        let mut writer = BitWriter::new(&mut buf);

        assert!(matches!(
            writer.write_f(33, 0u32),
            Err(BitWriterError::InvalidBitCount(33))
        ));
        assert!(matches!(
            writer.write_f(3, 8u32),
            Err(BitWriterError::ValueOutOfRange { bits: 3, value: 8 })
        ));
        assert_eq!(writer.position(), 0);
    }
}
