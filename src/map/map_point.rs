//! MapPoint - A 3D landmark observed by KeyFrames.

use nalgebra::Vector3;

use crate::tracking::feature::Descriptor;

use super::types::{KeyFrameId, MapPointId};

/// One sighting of a map point: which keyframe, which feature in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub keyframe_id: KeyFrameId,
    pub feature_index: usize,
}

/// A 3D map point (landmark).
///
/// Only the owning [`SparseMap`](super::SparseMap) mutates map points:
/// observations are appended and the position is refined by
/// re-triangulation and bundle adjustment.
#[derive(Debug, Clone)]
pub struct MapPoint {
    pub id: MapPointId,

    /// Position in world frame.
    pub position: Vector3<f64>,

    /// Descriptor of the feature that created this point.
    pub descriptor: Descriptor,

    /// Observations in insertion order.
    pub observations: Vec<Observation>,

    /// KeyFrame that first created this point.
    pub first_keyframe_id: KeyFrameId,
}

impl MapPoint {
    pub fn new(
        id: MapPointId,
        position: Vector3<f64>,
        descriptor: Descriptor,
        first_keyframe_id: KeyFrameId,
    ) -> Self {
        Self {
            id,
            position,
            descriptor,
            observations: Vec::new(),
            first_keyframe_id,
        }
    }

    pub fn num_observations(&self) -> usize {
        self.observations.len()
    }

    pub fn is_observed_by(&self, keyframe_id: KeyFrameId) -> bool {
        self.observations.iter().any(|o| o.keyframe_id == keyframe_id)
    }

    pub(crate) fn add_observation(&mut self, keyframe_id: KeyFrameId, feature_index: usize) {
        self.observations.push(Observation {
            keyframe_id,
            feature_index,
        });
    }
}
