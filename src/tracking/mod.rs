//! Front end: per-frame features, frame-to-frame tracking and pose estimation.
//!
//! - `extractor`: grid-bucketed FAST corners with binary descriptors
//! - `feature_tracker`: local SSD search against the previous frame
//! - `matching`: map point search by projection after tracking breaks
//! - `pose_estimation`: RANSAC PnP on tracked features vs map points
//! - `state` / `result`: tracking status and per-frame output

pub mod extractor;
pub mod feature;
pub mod feature_tracker;
pub mod frame;
pub mod matching;
pub mod pattern;
pub mod pose_estimation;
pub mod result;
pub mod state;

pub use extractor::{ExtractorParams, FeatureExtractor};
pub use feature::{Descriptor, Feature};
pub use feature_tracker::{merge_detections, FeatureTracker, TrackerConfig};
pub use matching::{reacquire_features, ReacquireConfig};
pub use result::{FrameOutput, SlamEvent};
pub use state::TrackingState;
