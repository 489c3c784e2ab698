//! Per-frame output handed to the renderer.

use crate::geometry::SE3;
use crate::loop_closing::LoopClosure;
use crate::map::{KeyFrameId, MapPointId};
use crate::optimizer::BundleAdjustmentReport;
use crate::tracking::TrackingState;

/// Map-level events raised while processing a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum SlamEvent {
    LoopClosure(LoopClosure),
    BundleAdjusted(BundleAdjustmentReport),
}

/// Pose and map delta for one frame.
#[derive(Debug, Clone)]
pub struct FrameOutput {
    pub frame_index: u64,
    /// Capture time in nanoseconds.
    pub timestamp_ns: u64,
    /// Camera pose (T_wc). Held from the previous frame when tracking failed.
    pub pose: SE3,
    pub state: TrackingState,
    /// Set when this frame became a keyframe.
    pub keyframe_id: Option<KeyFrameId>,
    pub created_points: Vec<MapPointId>,
    pub updated_points: Vec<MapPointId>,
    pub events: Vec<SlamEvent>,
    /// Features carried by this frame after merging tracks and detections.
    pub num_features: usize,
    /// Features linked to a map point.
    pub num_tracked: usize,
    /// RANSAC inliers (0 if pose estimation was skipped or failed).
    pub num_inliers: usize,
}

impl FrameOutput {
    pub fn is_keyframe(&self) -> bool {
        self.keyframe_id.is_some()
    }
}
