//! Loop closing.
//!
//! Loop candidates are detected at keyframe insertion from shared map
//! points alone (no place-recognition vocabulary). A detected candidate
//! triggers bundle adjustment on the map; the relative transform to the
//! loop keyframe is reported to the caller as a [`LoopClosure`].

pub mod detector;

pub use detector::{detect_loop_candidates, LoopCandidate, LoopClosure, LoopDetectorConfig};
