//! Optimization: windowed bundle adjustment over keyframe poses and map points.

pub mod bundle_adjustment;

pub(crate) use bundle_adjustment::{collect_problem, solve};
pub use bundle_adjustment::{BundleAdjustmentConfig, BundleAdjustmentReport};
