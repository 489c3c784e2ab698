//! Sensor feed, calibration and visual-inertial fusion.

pub mod calibration;
pub mod fusion;
pub mod sample;

pub use calibration::Calibration;
pub use fusion::{FusionConfig, SensorFusion};
pub use sample::{AccelSample, GyroSample, Orientation, OrientationSample, SensorReading};
