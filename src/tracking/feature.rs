//! Per-frame features and their binary descriptors.

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::map::MapPointId;

/// Number of bits in a descriptor.
pub const DESCRIPTOR_BITS: usize = 256;

/// A 256-bit binary descriptor. Bit `i` lives in byte `i / 8`, bit `i % 8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Descriptor(pub [u8; DESCRIPTOR_BITS / 8]);

impl Descriptor {
    pub fn zeros() -> Self {
        Self::default()
    }

    pub fn bit(&self, i: usize) -> bool {
        self.0[i / 8] & (1 << (i % 8)) != 0
    }

    pub fn set_bit(&mut self, i: usize) {
        self.0[i / 8] |= 1 << (i % 8);
    }

    /// Number of differing bits (0-256).
    pub fn hamming_distance(&self, other: &Self) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

/// A detected (and possibly tracked) image feature.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    /// Column in pixels.
    pub x: f64,
    /// Row in pixels.
    pub y: f64,
    /// Corner strength.
    pub score: f32,
    /// Orientation in radians.
    pub angle: f32,
    pub descriptor: Descriptor,
    /// Map point this feature observes, once triangulated.
    pub track_id: Option<MapPointId>,
}

impl Feature {
    pub fn uv(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }

    pub fn is_tracked(&self) -> bool {
        self.track_id.is_some()
    }
}
