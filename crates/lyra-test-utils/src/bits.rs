//! MSB-first bit writer used to build bitstream fixtures.

#[derive(Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    acc: u64,
    bits: u32,
}

impl BitWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the low `n` bits of `value` (n <= 32).
    pub fn put(&mut self, value: u32, n: u32) -> &mut Self {
        for i in (0..n).rev() {
            self.acc = (self.acc << 1) | u64::from((value >> i) & 1);
            self.bits += 1;
            if self.bits == 8 {
                self.bytes.push(self.acc as u8);
                self.acc = 0;
                self.bits = 0;
            }
        }
        self
    }

    pub fn flag(&mut self, set: bool) -> &mut Self {
        self.put(u32::from(set), 1)
    }

    /// Unsigned exp-Golomb code.
    pub fn ue(&mut self, value: u32) -> &mut Self {
        let code = value + 1;
        let len = 32 - code.leading_zeros();
        self.put(0, len - 1);
        self.put(code, len)
    }

    /// Signed exp-Golomb code.
    pub fn se(&mut self, value: i32) -> &mut Self {
        let mapped = if value > 0 {
            (value as u32) * 2 - 1
        } else {
            value.unsigned_abs() * 2
        };
        self.ue(mapped)
    }

    /// RBSP stop bit followed by zero alignment.
    pub fn trailing(&mut self) -> &mut Self {
        self.put(1, 1);
        while self.bits != 0 {
            self.put(0, 1);
        }
        self
    }

    /// Zero-pad to a byte boundary and return the bytes.
    #[must_use]
    pub fn finish(&mut self) -> Vec<u8> {
        while self.bits != 0 {
            self.put(0, 1);
        }
        std::mem::take(&mut self.bytes)
    }
}
