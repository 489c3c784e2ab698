//! KeyFrame - A retained frame anchoring part of the map.

use crate::geometry::SE3;
use crate::tracking::feature::Feature;

use super::types::{KeyFrameId, MapPointId};

/// Identifies the camera frame a keyframe was captured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Sequential index of the frame in the stream.
    pub index: u64,
    /// Capture time in nanoseconds.
    pub timestamp_ns: u64,
}

/// A KeyFrame in the sparse map.
///
/// Immutable once created apart from `map_point_ids` growth and pose
/// correction by bundle adjustment, both performed by the owning map.
#[derive(Debug, Clone)]
pub struct KeyFrame {
    pub id: KeyFrameId,

    /// Capture time in nanoseconds.
    pub timestamp_ns: u64,

    /// Index of the source frame.
    pub frame_index: u64,

    /// Pose: transform from camera to world (T_wc).
    pub pose: SE3,

    /// Features at capture time, with `track_id`s resolved.
    /// Empty for keyframes restored from disk.
    pub features: Vec<Feature>,

    /// Map points observed by this keyframe (unique, insertion order).
    pub map_point_ids: Vec<MapPointId>,
}

impl KeyFrame {
    pub fn num_map_points(&self) -> usize {
        self.map_point_ids.len()
    }

    /// Feature index observing `mp_id`, if any.
    pub fn feature_of(&self, mp_id: MapPointId) -> Option<usize> {
        self.features.iter().position(|f| f.track_id == Some(mp_id))
    }
}
