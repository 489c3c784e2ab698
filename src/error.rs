//! Error types.
//!
//! Per-frame failures are values, not panics: the pipeline maps them onto a
//! held pose and a degraded tracking state. `anyhow` is only used at IO and
//! configuration boundaries.

use thiserror::Error;

use crate::map::{KeyFrameId, MapPointId};

/// Pose estimation could not produce a usable pose for this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TrackingLost {
    #[error("insufficient correspondences: {found} (need at least {required})")]
    InsufficientCorrespondences { found: usize, required: usize },

    #[error("no consensus pose after {iterations} RANSAC iterations")]
    NoConsensus { iterations: usize },
}

/// Malformed camera frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("invalid frame dimensions {width}x{height}x{channels}: expected {expected} bytes, got {actual}")]
    InvalidDimensions {
        width: u32,
        height: u32,
        channels: usize,
        expected: usize,
        actual: usize,
    },

    #[error("frame has zero area ({width}x{height})")]
    Empty { width: u32, height: u32 },
}

/// Inconsistent map data (only reachable from persisted input).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MapError {
    #[error("{keyframe} references unknown map point {map_point}")]
    UnknownMapPoint {
        keyframe: KeyFrameId,
        map_point: MapPointId,
    },

    #[error("non-sequential id: expected {expected}, found {found}")]
    NonSequentialId { expected: u32, found: u32 },
}
