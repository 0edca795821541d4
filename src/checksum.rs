//! Fletcher-16 checksum, mod-256 variant.

/// Running Fletcher-16 accumulator, used while transmitting a frame
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Fletcher16 {
    sum1: u8,
    sum2: u8,
}

impl Fletcher16 {
    pub const fn new() -> Self {
        Self { sum1: 0, sum2: 0 }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Accumulate a single byte, returning the running checksum
    pub fn accumulate(&mut self, byte: u8) -> u16 {
        self.sum1 = self.sum1.wrapping_add(byte);
        self.sum2 = self.sum2.wrapping_add(self.sum1);
        self.value()
    }

    /// Current checksum, `(sum2 << 8) | sum1`
    pub fn value(&self) -> u16 {
        u16::from_le_bytes([self.sum1, self.sum2])
    }

    /// Checksum bytes in transmission order
    pub fn to_le_bytes(&self) -> [u8; 2] {
        [self.sum1, self.sum2]
    }
}

/// Compute the checksum of a complete buffer
pub fn fletcher16(data: &[u8]) -> u16 {
    let mut f = Fletcher16::new();
    data.iter().for_each(|b| {
        f.accumulate(*b);
    });
    f.value()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    #[test]
    fn known_values() {
        assert_eq!(fletcher16(&[]), 0x0000);
        assert_eq!(fletcher16(&[0x01, 0x02]), 0x0403);
        // sum1 = 0xff + 0x01 wraps to 0, sum2 = 0xff + 0x00
        assert_eq!(fletcher16(&[0xff, 0x01]), 0xff00);
        assert_eq!(fletcher16(b"abcde"), 0xc3ef);
    }

    #[test]
    fn incremental_matches_buffer() {
        let mut rng = rand::thread_rng();
        for len in [0usize, 1, 2, 7, 255, 256, 1024] {
            let mut data = vec![0u8; len];
            rng.fill_bytes(&mut data);

            let mut f = Fletcher16::new();
            for b in &data {
                let running = f.accumulate(*b);
                assert_eq!(running, f.value());
            }

            assert_eq!(f.value(), fletcher16(&data), "mismatch for length {len}");
        }
    }

    #[test]
    fn reset_clears_sums() {
        let mut f = Fletcher16::new();
        f.accumulate(0x42);
        f.reset();
        assert_eq!(f, Fletcher16::new());
        assert_eq!(f.to_le_bytes(), [0, 0]);
    }
}
