//! Deterministic PRNG for reproducible randomized tests.

/// xorshift64 generator seeded through splitmix64 so that small seeds still
/// produce well-mixed sequences.
pub struct Xorshift64(u64);

impl Xorshift64 {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        let mut z = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        Self((z ^ (z >> 31)).max(1))
    }

    pub fn next_u64(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    /// Returns a value in `[min, max)`; `min` when the range is empty.
    pub fn range_u64(&mut self, min: u64, max: u64) -> u64 {
        if max <= min {
            return min;
        }
        min + self.next_u64() % (max - min)
    }

    /// Splits `data` into random chunk lengths in `[1, max_chunk]`.
    pub fn chunks<'a>(&mut self, data: &'a [u8], max_chunk: usize) -> Vec<&'a [u8]> {
        let mut out = Vec::new();
        let mut rest = data;
        while !rest.is_empty() {
            let n = self.range_u64(1, max_chunk as u64 + 1) as usize;
            let (head, tail) = rest.split_at(n.min(rest.len()));
            out.push(head);
            rest = tail;
        }
        out
    }
}
