//! SE(3) rigid transform.
//!
//! Poses in this crate are stored as `T_wc` (camera-to-world). Optimizers and
//! the PnP solver work internally with `T_cw` and convert at the boundary.

use nalgebra::{Matrix3, Matrix4, UnitQuaternion, Vector3, Vector6};
use serde::{Deserialize, Serialize};

/// Rigid body transform: rotation (unit quaternion) + translation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SE3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl SE3 {
    pub fn new(rotation: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Build from a rotation matrix and translation vector.
    ///
    /// The matrix is re-orthonormalized through the quaternion conversion.
    pub fn from_rt(rotation: &Matrix3<f64>, translation: &Vector3<f64>) -> Self {
        let rot = nalgebra::Rotation3::from_matrix(rotation);
        Self {
            rotation: UnitQuaternion::from_rotation_matrix(&rot),
            translation: *translation,
        }
    }

    /// Build from axis-angle rotation + translation parameters.
    pub fn from_params(axis_angle: &Vector3<f64>, translation: &Vector3<f64>) -> Self {
        Self {
            rotation: UnitQuaternion::from_scaled_axis(*axis_angle),
            translation: *translation,
        }
    }

    /// Axis-angle rotation + translation parameters.
    pub fn to_params(&self) -> (Vector3<f64>, Vector3<f64>) {
        (self.rotation.scaled_axis(), self.translation)
    }

    pub fn inverse(&self) -> Self {
        let rot_inv = self.rotation.inverse();
        Self {
            rotation: rot_inv,
            translation: -(rot_inv * self.translation),
        }
    }

    /// `self * other`.
    pub fn compose(&self, other: &SE3) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.to_rotation_matrix().into_inner()
    }

    pub fn to_matrix(&self) -> Matrix4<f64> {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.rotation_matrix());
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        m
    }

    /// Apply a left-multiplied increment `[ω, v]`:
    /// `R' = exp(ω) R`, `t' = exp(ω) t + v`.
    ///
    /// To first order this matches the SE(3) exponential, so the usual
    /// projection Jacobians `[-[p]×, I]` apply.
    pub fn retract(&self, delta: &Vector6<f64>) -> Self {
        let omega = Vector3::new(delta[0], delta[1], delta[2]);
        let v = Vector3::new(delta[3], delta[4], delta[5]);
        let dq = UnitQuaternion::from_scaled_axis(omega);
        Self {
            rotation: dq * self.rotation,
            translation: dq * self.translation + v,
        }
    }

    /// Translation distance to another pose (metres).
    pub fn translation_distance(&self, other: &SE3) -> f64 {
        (self.translation - other.translation).norm()
    }

    /// Rotation angle between this pose and another (radians, in `[0, π]`).
    pub fn rotation_angle_to(&self, other: &SE3) -> f64 {
        self.rotation.angle_to(&other.rotation)
    }
}

impl Default for SE3 {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::ops::Mul for SE3 {
    type Output = SE3;

    fn mul(self, rhs: SE3) -> SE3 {
        self.compose(&rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_pose() -> SE3 {
        SE3::new(
            UnitQuaternion::from_euler_angles(0.1, -0.2, 0.3),
            Vector3::new(1.0, -2.0, 0.5),
        )
    }

    #[test]
    fn test_inverse_compose_is_identity() {
        let pose = sample_pose();
        let id = pose.compose(&pose.inverse());

        assert_relative_eq!(id.translation, Vector3::zeros(), epsilon = 1e-12);
        assert_relative_eq!(id.rotation.angle(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_transform_point_matches_matrix() {
        let pose = sample_pose();
        let p = Vector3::new(0.3, 0.7, 2.0);
        let m = pose.to_matrix();
        let ph = m * p.push(1.0);

        assert_relative_eq!(pose.transform_point(&p), ph.xyz(), epsilon = 1e-12);
    }

    #[test]
    fn test_params_roundtrip() {
        let pose = sample_pose();
        let (rot, trans) = pose.to_params();
        let back = SE3::from_params(&rot, &trans);

        assert_relative_eq!(back.rotation_angle_to(&pose), 0.0, epsilon = 1e-12);
        assert_relative_eq!(back.translation, pose.translation, epsilon = 1e-12);
    }

    #[test]
    fn test_retract_zero_is_noop() {
        let pose = sample_pose();
        let same = pose.retract(&Vector6::zeros());

        assert_relative_eq!(same.translation, pose.translation, epsilon = 1e-12);
        assert_relative_eq!(same.rotation_angle_to(&pose), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rotation_angle_to() {
        let a = SE3::identity();
        let b = SE3::new(
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.25),
            Vector3::new(0.0, 0.0, 1.0),
        );

        assert_relative_eq!(a.rotation_angle_to(&b), 0.25, epsilon = 1e-12);
        assert_relative_eq!(a.translation_distance(&b), 1.0, epsilon = 1e-12);
    }
}
