//! Loop detection from shared map points.
//!
//! A keyframe is a loop candidate for the newest keyframe when it is not one
//! of the newest keyframe's covisible neighbors (the top keyframes by
//! shared-point count), yet most of their map points are shared:
//!
//! ```text
//! similarity = shared / max(|points(current)|, |points(candidate)|)
//! ```

use serde::{Deserialize, Serialize};

use crate::geometry::SE3;
use crate::map::{KeyFrameId, SparseMap};

/// Configuration for loop detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopDetectorConfig {
    /// Number of top covisible keyframes treated as neighbors (never loops).
    pub neighbor_count: usize,
    /// A keyframe must share more than this many points to be a neighbor.
    pub neighbor_min_shared: usize,
    /// Similarity above which a non-neighbor becomes a candidate.
    pub similarity_threshold: f64,
}

impl Default for LoopDetectorConfig {
    fn default() -> Self {
        Self {
            neighbor_count: 5,
            neighbor_min_shared: 10,
            similarity_threshold: 0.7,
        }
    }
}

/// A potential loop closure recorded by the map.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopCandidate {
    /// Keyframe whose insertion detected the loop.
    pub current_keyframe_id: KeyFrameId,
    /// Older keyframe we are closing back to.
    pub candidate_keyframe_id: KeyFrameId,
    pub similarity: f64,
    /// Capture time of the current keyframe (ns).
    pub timestamp_ns: u64,
}

/// Loop closure reported to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopClosure {
    pub current_keyframe_id: KeyFrameId,
    pub loop_keyframe_id: KeyFrameId,
    pub similarity: f64,
    /// Current pose expressed relative to the loop keyframe (`T_loop⁻¹ · T_current`).
    pub transform: SE3,
}

/// Loop candidates for `current`, best similarity first.
pub fn detect_loop_candidates(
    map: &SparseMap,
    current: KeyFrameId,
    config: &LoopDetectorConfig,
) -> Vec<LoopCandidate> {
    let Some(current_kf) = map.keyframe(current) else {
        return Vec::new();
    };

    let mut shared: Vec<(KeyFrameId, usize)> = map.shared_map_point_counts(current).into_iter().collect();
    shared.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let neighbors: Vec<KeyFrameId> = shared
        .iter()
        .filter(|(_, n)| *n > config.neighbor_min_shared)
        .take(config.neighbor_count)
        .map(|(id, _)| *id)
        .collect();

    let mut candidates: Vec<LoopCandidate> = shared
        .iter()
        .filter(|(id, _)| !neighbors.contains(id))
        .filter_map(|&(id, n)| {
            let other = map.keyframe(id)?;
            let denom = current_kf.num_map_points().max(other.num_map_points());
            if denom == 0 {
                return None;
            }
            let similarity = n as f64 / denom as f64;
            (similarity > config.similarity_threshold).then_some(LoopCandidate {
                current_keyframe_id: current,
                candidate_keyframe_id: id,
                similarity,
                timestamp_ns: current_kf.timestamp_ns,
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then(a.candidate_keyframe_id.cmp(&b.candidate_keyframe_id))
    });
    candidates
}
