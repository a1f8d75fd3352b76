//! xorshift64* source for spawn positions.
//!
//! A fixed `SimulationConfig::seed` replays the same placements; nothing here
//! is fit for secrets.

use crate::vector::Vec3;

#[derive(Debug, Clone)]
pub struct Prng {
    state: u64,
}

impl Prng {
    pub fn new(seed: u64) -> Self {
        // Avoid a zero state.
        let seed = if seed == 0 { 0x9E3779B97F4A7C15 } else { seed };
        Self { state: seed }
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    #[inline]
    pub fn next_f64_01(&mut self) -> f64 {
        // 53 random mantissa bits -> [0,1).
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    #[inline]
    pub fn gen_range_f64(&mut self, low: f64, high: f64) -> f64 {
        low + (high - low) * self.next_f64_01()
    }

    /// Uniform point in the cube `[0, extent)^3`.
    pub fn gen_position(&mut self, extent: f64) -> Vec3 {
        Vec3::new(
            self.gen_range_f64(0.0, extent),
            self.gen_range_f64(0.0, extent),
            self.gen_range_f64(0.0, extent),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sequence() {
        let mut a = Prng::new(7);
        let mut b = Prng::new(7);
        for _ in 0..32 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn positions_stay_inside_extent() {
        let mut rng = Prng::new(0);
        for _ in 0..1000 {
            let p = rng.gen_position(10.0);
            for c in p.to_array() {
                assert!((0.0..10.0).contains(&c));
            }
        }
    }
}
