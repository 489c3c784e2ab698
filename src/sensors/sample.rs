//! Timestamped inertial and orientation readings.

use nalgebra::{UnitQuaternion, Vector3};

/// Device orientation as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Orientation {
    /// Intrinsic Z-X'-Y'' Euler angles in degrees: `alpha` about z,
    /// `beta` about x, `gamma` about y.
    Euler { alpha: f64, beta: f64, gamma: f64 },
    Quaternion(UnitQuaternion<f64>),
}

impl Orientation {
    pub fn to_rotation(&self) -> UnitQuaternion<f64> {
        match *self {
            Self::Euler { alpha, beta, gamma } => {
                UnitQuaternion::from_axis_angle(&Vector3::z_axis(), alpha.to_radians())
                    * UnitQuaternion::from_axis_angle(&Vector3::x_axis(), beta.to_radians())
                    * UnitQuaternion::from_axis_angle(&Vector3::y_axis(), gamma.to_radians())
            }
            Self::Quaternion(q) => q,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationSample {
    pub timestamp_ns: u64,
    pub orientation: Orientation,
}

/// Angular velocity in rad/s.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GyroSample {
    pub timestamp_ns: u64,
    pub rate: Vector3<f64>,
}

/// Linear acceleration in m/s².
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccelSample {
    pub timestamp_ns: u64,
    pub acceleration: Vector3<f64>,
}

/// One reading from the sensor feed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorReading {
    Orientation(OrientationSample),
    Gyro(GyroSample),
    Accel(AccelSample),
}

impl SensorReading {
    pub fn timestamp_ns(&self) -> u64 {
        match self {
            Self::Orientation(s) => s.timestamp_ns,
            Self::Gyro(s) => s.timestamp_ns,
            Self::Accel(s) => s.timestamp_ns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_euler_single_axis() {
        let yaw = Orientation::Euler { alpha: 90.0, beta: 0.0, gamma: 0.0 }.to_rotation();
        assert_relative_eq!(yaw * Vector3::x(), Vector3::y(), epsilon = 1e-12);

        let pitch = Orientation::Euler { alpha: 0.0, beta: 90.0, gamma: 0.0 }.to_rotation();
        assert_relative_eq!(pitch * Vector3::y(), Vector3::z(), epsilon = 1e-12);
    }

    #[test]
    fn test_euler_order() {
        let q = Orientation::Euler { alpha: 30.0, beta: 20.0, gamma: 10.0 }.to_rotation();
        let expected = UnitQuaternion::from_scaled_axis(Vector3::z() * 30f64.to_radians())
            * UnitQuaternion::from_scaled_axis(Vector3::x() * 20f64.to_radians())
            * UnitQuaternion::from_scaled_axis(Vector3::y() * 10f64.to_radians());
        assert_relative_eq!(q.angle_to(&expected), 0.0, epsilon = 1e-12);
    }
}
