//! MSB-first bit-field reader.

use crate::error::{BitstreamError, BitstreamResult};

/// Reads bit fields, most significant bit first, from a borrowed byte window.
///
/// Every read is bounds checked against the window and fails with
/// [`BitstreamError::Exhausted`] instead of panicking.
#[derive(Clone, Debug, Default)]
pub struct BitstreamReader<'a> {
    data: Option<&'a [u8]>,
    /// Absolute bit position inside `data`.
    pos: u64,
}

impl<'a> BitstreamReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data: Some(data),
            pos: 0,
        }
    }

    /// Rebind to `data`, starting at `byte_offset`.
    pub fn init(&mut self, data: &'a [u8], byte_offset: usize) {
        self.data = Some(data);
        self.pos = byte_offset as u64 * 8;
    }

    fn buffer(&self) -> BitstreamResult<&'a [u8]> {
        self.data.ok_or(BitstreamError::NoBuffer)
    }

    pub fn bit_position(&self) -> u64 {
        self.pos
    }

    pub fn bits_remaining(&self) -> u64 {
        self.data
            .map_or(0, |data| (data.len() as u64 * 8).saturating_sub(self.pos))
    }

    pub fn is_byte_aligned(&self) -> bool {
        self.pos % 8 == 0
    }

    fn ensure(&self, bits: u64) -> BitstreamResult<&'a [u8]> {
        let data = self.buffer()?;
        let available = (data.len() as u64 * 8).saturating_sub(self.pos);
        if bits > available {
            return Err(BitstreamError::Exhausted {
                needed: bits,
                available,
            });
        }
        Ok(data)
    }

    fn take(&mut self, n: u32) -> BitstreamResult<u64> {
        let data = self.ensure(u64::from(n))?;
        let mut value = 0u64;
        let mut left = n;
        while left > 0 {
            let byte = data[(self.pos / 8) as usize];
            let used = (self.pos % 8) as u32;
            let avail = 8 - used;
            let count = avail.min(left);
            let bits = (u64::from(byte) >> (avail - count)) & ((1u64 << count) - 1);
            value = (value << count) | bits;
            self.pos += u64::from(count);
            left -= count;
        }
        Ok(value)
    }

    /// Read up to 32 bits as a signed value (bit pattern preserved for n = 32).
    pub fn read_bits(&mut self, n: u32) -> BitstreamResult<i32> {
        if n > 32 {
            return Err(BitstreamError::OutOfRange {
                requested: n,
                max: 32,
            });
        }
        #[expect(
            clippy::cast_possible_truncation,
            clippy::cast_possible_wrap,
            reason = "at most 32 bits were read"
        )]
        let value = self.take(n)? as u32 as i32;
        Ok(value)
    }

    /// Read up to 32 bits.
    pub fn read_unsigned_bits(&mut self, n: u32) -> BitstreamResult<u32> {
        if n > 32 {
            return Err(BitstreamError::OutOfRange {
                requested: n,
                max: 32,
            });
        }
        #[expect(clippy::cast_possible_truncation, reason = "at most 32 bits were read")]
        let value = self.take(n)? as u32;
        Ok(value)
    }

    /// Read up to 57 bits.
    pub fn read_bits_u64(&mut self, n: u32) -> BitstreamResult<u64> {
        if n > 57 {
            return Err(BitstreamError::OutOfRange {
                requested: n,
                max: 57,
            });
        }
        self.take(n)
    }

    pub fn read_flag(&mut self) -> BitstreamResult<bool> {
        Ok(self.take(1)? == 1)
    }

    pub fn read_byte(&mut self) -> BitstreamResult<u8> {
        #[expect(clippy::cast_possible_truncation, reason = "8 bits were read")]
        let value = self.take(8)? as u8;
        Ok(value)
    }

    pub fn skip_bits(&mut self, n: u64) -> BitstreamResult<()> {
        self.ensure(n)?;
        self.pos += n;
        Ok(())
    }

    pub fn skip_bytes(&mut self, n: usize) -> BitstreamResult<()> {
        self.skip_bits(n as u64 * 8)
    }

    pub fn byte_align(&mut self) {
        self.pos = self.pos.div_ceil(8) * 8;
    }

    /// Unsigned exp-Golomb (`ue(v)`).
    pub fn read_ue(&mut self) -> BitstreamResult<u32> {
        let mut zeros = 0u32;
        while !self.read_flag()? {
            zeros += 1;
            if zeros > 31 {
                return Err(BitstreamError::InvalidGolomb);
            }
        }
        let suffix = self.read_unsigned_bits(zeros)?;
        Ok(((1u64 << zeros) - 1 + u64::from(suffix)) as u32)
    }

    /// Signed exp-Golomb (`se(v)`).
    pub fn read_se(&mut self) -> BitstreamResult<i32> {
        let code = i64::from(self.read_ue()?);
        let value = if code % 2 == 1 {
            (code + 1) / 2
        } else {
            -(code / 2)
        };
        #[expect(clippy::cast_possible_truncation, reason = "ue(v) is at most 2^32 - 2")]
        let value = value as i32;
        Ok(value)
    }
}
