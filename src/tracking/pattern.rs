//! Fixed descriptor sampling pattern.
//!
//! The 256 point pairs are drawn once from a seeded generator and shared by
//! every descriptor in the process, so any two descriptors are bit-comparable.

use std::sync::OnceLock;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::tracking::feature::DESCRIPTOR_BITS;

/// Radius (pixels) of the disc the pairs are drawn from.
pub const PATTERN_RADIUS: i32 = 15;

const PATTERN_SEED: u64 = 0x0b71_ef5e_ed00_0256;

/// Pair of sampling offsets relative to the feature centre.
pub type SamplePair = ((f32, f32), (f32, f32));

pub struct SamplingPattern {
    pairs: Vec<SamplePair>,
}

impl SamplingPattern {
    fn generate() -> Self {
        let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
        let mut pairs = Vec::with_capacity(DESCRIPTOR_BITS);
        while pairs.len() < DESCRIPTOR_BITS {
            let a = sample_in_disc(&mut rng);
            let b = sample_in_disc(&mut rng);
            if a != b {
                pairs.push(((a.0 as f32, a.1 as f32), (b.0 as f32, b.1 as f32)));
            }
        }
        Self { pairs }
    }

    pub fn pairs(&self) -> &[SamplePair] {
        &self.pairs
    }
}

/// The process-wide pattern.
pub fn sampling_pattern() -> &'static SamplingPattern {
    static PATTERN: OnceLock<SamplingPattern> = OnceLock::new();
    PATTERN.get_or_init(SamplingPattern::generate)
}

fn sample_in_disc(rng: &mut StdRng) -> (i32, i32) {
    loop {
        let x = rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS);
        let y = rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS);
        if x * x + y * y <= PATTERN_RADIUS * PATTERN_RADIUS {
            return (x, y);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_is_shared_and_bounded() {
        let a = sampling_pattern();
        let b = sampling_pattern();
        assert!(std::ptr::eq(a, b));
        assert_eq!(a.pairs().len(), DESCRIPTOR_BITS);

        let r2 = (PATTERN_RADIUS * PATTERN_RADIUS) as f32;
        for ((x1, y1), (x2, y2)) in a.pairs() {
            assert!(x1 * x1 + y1 * y1 <= r2);
            assert!(x2 * x2 + y2 * y2 <= r2);
        }
    }

    #[test]
    fn test_generation_is_reproducible() {
        let fresh = SamplingPattern::generate();
        assert_eq!(fresh.pairs(), sampling_pattern().pairs());
    }
}
