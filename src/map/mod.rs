//! Sparse map: keyframes, map points, covisibility and persistence.

pub mod covisibility;
pub mod keyframe;
pub mod map_point;
pub mod persistence;
pub mod sparse_map;
pub mod types;

pub use covisibility::CovisibilityGraph;
pub use keyframe::{FrameInfo, KeyFrame};
pub use map_point::{MapPoint, Observation};
pub use persistence::PersistedMap;
pub use sparse_map::{KeyFrameInsertion, MapConfig, SparseMap};
pub use types::{KeyFrameId, MapPointId};
