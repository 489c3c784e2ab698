//! Visual-inertial rotation blending.
//!
//! Vision owns translation. Rotation is a slerp between the visual estimate
//! and the sensor estimate, weighted towards vision. The sensor estimate is
//! the latest absolute orientation if the feed provides one; otherwise the
//! previous fused rotation propagated through the gyro samples received
//! since the last frame.

use std::collections::VecDeque;

use nalgebra::UnitQuaternion;
use serde::{Deserialize, Serialize};

use crate::geometry::so3::integrate_angular_velocity;
use crate::geometry::SE3;

use super::sample::{AccelSample, GyroSample, OrientationSample, SensorReading};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub enabled: bool,
    /// Weight of the sensor rotation in the slerp (0 = vision only).
    pub sensor_weight: f64,
    /// Gyro and accelerometer samples retained.
    pub buffer_size: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sensor_weight: 0.3,
            buffer_size: 100,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SensorFusion {
    config: FusionConfig,
    latest_orientation: Option<OrientationSample>,
    gyro: VecDeque<GyroSample>,
    /// Retained for consumers through [`SensorFusion::accel_samples`]. Rotation
    /// blending does not read it: translation is owned by vision.
    accel: VecDeque<AccelSample>,
    /// Fused rotation and timestamp of the previous frame.
    last_fused: Option<(UnitQuaternion<f64>, u64)>,
}

impl SensorFusion {
    pub fn new(config: FusionConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn push(&mut self, reading: SensorReading) {
        let capacity = self.config.buffer_size.max(1);
        match reading {
            SensorReading::Orientation(sample) => self.latest_orientation = Some(sample),
            SensorReading::Gyro(sample) => push_bounded(&mut self.gyro, sample, capacity),
            SensorReading::Accel(sample) => push_bounded(&mut self.accel, sample, capacity),
        }
    }

    pub fn gyro_samples(&self) -> &VecDeque<GyroSample> {
        &self.gyro
    }

    /// The most recent accelerometer samples, oldest first.
    pub fn accel_samples(&self) -> &VecDeque<AccelSample> {
        &self.accel
    }

    pub fn has_sensor_data(&self) -> bool {
        self.latest_orientation.is_some() || !self.gyro.is_empty()
    }

    /// Blend `visual_pose` (T_wc) captured at `timestamp_ns` with the sensor feed.
    pub fn fuse(&mut self, visual_pose: &SE3, timestamp_ns: u64) -> SE3 {
        if !self.config.enabled {
            return *visual_pose;
        }
        let fused = match self.sensor_rotation(timestamp_ns) {
            Some(sensor) => {
                let rotation = visual_pose
                    .rotation
                    .try_slerp(&sensor, self.config.sensor_weight, 1e-9)
                    .unwrap_or(visual_pose.rotation);
                SE3::new(rotation, visual_pose.translation)
            }
            None => *visual_pose,
        };
        self.last_fused = Some((fused.rotation, timestamp_ns));
        fused
    }

    fn sensor_rotation(&self, timestamp_ns: u64) -> Option<UnitQuaternion<f64>> {
        if let Some(sample) = &self.latest_orientation {
            return Some(sample.orientation.to_rotation());
        }

        let (mut rotation, since) = self.last_fused?;
        let mut t = since;
        let mut integrated = false;
        for sample in self.gyro.iter().filter(|s| s.timestamp_ns > since && s.timestamp_ns <= timestamp_ns) {
            let dt = (sample.timestamp_ns - t) as f64 * 1e-9;
            rotation = integrate_angular_velocity(&rotation, &sample.rate, dt);
            t = sample.timestamp_ns;
            integrated = true;
        }
        integrated.then_some(rotation)
    }
}

fn push_bounded<T>(buffer: &mut VecDeque<T>, item: T, capacity: usize) {
    if buffer.len() == capacity {
        buffer.pop_front();
    }
    buffer.push_back(item);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::sample::Orientation;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn yaw(deg: f64) -> UnitQuaternion<f64> {
        UnitQuaternion::from_axis_angle(&Vector3::z_axis(), deg.to_radians())
    }

    #[test]
    fn test_no_sensor_data_is_passthrough() {
        let mut fusion = SensorFusion::new(FusionConfig::default());
        let pose = SE3::new(yaw(10.0), Vector3::new(1.0, 2.0, 3.0));

        assert_eq!(fusion.fuse(&pose, 0), pose);
    }

    #[test]
    fn test_orientation_blend_is_seventy_percent_visual() {
        let mut fusion = SensorFusion::new(FusionConfig::default());
        fusion.push(SensorReading::Orientation(OrientationSample {
            timestamp_ns: 0,
            orientation: Orientation::Quaternion(yaw(100.0)),
        }));
        let pose = SE3::new(yaw(0.0), Vector3::new(1.0, 0.0, 0.0));

        let fused = fusion.fuse(&pose, 1);
        assert_relative_eq!(fused.rotation.angle(), 30f64.to_radians(), epsilon = 1e-9);
        assert_relative_eq!(fused.translation, pose.translation);
    }

    #[test]
    fn test_disabled_fusion_ignores_sensors() {
        let mut fusion = SensorFusion::new(FusionConfig {
            enabled: false,
            ..FusionConfig::default()
        });
        fusion.push(SensorReading::Orientation(OrientationSample {
            timestamp_ns: 0,
            orientation: Orientation::Euler { alpha: 45.0, beta: 0.0, gamma: 0.0 },
        }));
        let pose = SE3::identity();

        assert_eq!(fusion.fuse(&pose, 1), pose);
    }

    #[test]
    fn test_gyro_integration_fallback() {
        let mut fusion = SensorFusion::new(FusionConfig::default());
        fusion.fuse(&SE3::identity(), 0);

        // 1 rad/s about z for 0.1 s, sampled every 10 ms.
        for i in 1..=10u64 {
            fusion.push(SensorReading::Gyro(GyroSample {
                timestamp_ns: i * 10_000_000,
                rate: Vector3::new(0.0, 0.0, 1.0),
            }));
        }
        let fused = fusion.fuse(&SE3::identity(), 100_000_000);

        // Sensor says 0.1 rad, vision says 0: blend lands at 0.03 rad.
        assert_relative_eq!(fused.rotation.angle(), 0.03, epsilon = 1e-9);
    }

    #[test]
    fn test_buffers_are_bounded() {
        let mut fusion = SensorFusion::new(FusionConfig {
            buffer_size: 3,
            ..FusionConfig::default()
        });
        for i in 0..5u64 {
            fusion.push(SensorReading::Accel(AccelSample {
                timestamp_ns: i,
                acceleration: Vector3::new(0.0, 0.0, 9.81),
            }));
        }

        assert_eq!(fusion.accel_samples().len(), 3);
        assert_eq!(fusion.accel_samples().front().map(|s| s.timestamp_ns), Some(2));

        // Acceleration alone does not count as rotation data.
        assert!(!fusion.has_sensor_data());
        let pose = SE3::new(yaw(20.0), Vector3::new(0.5, 0.0, 0.0));
        assert_eq!(fusion.fuse(&pose, 10), pose);
    }
}
