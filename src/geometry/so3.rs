//! SO(3) helpers used by the pose solvers and gyro integration.
//!
//! - `skew`: cross-product matrix
//! - `right_jacobian_so3`: derivative of the exponential map, needed when a
//!   rotation is parameterized directly as an axis-angle vector
//! - `integrate_angular_velocity`: body-rate integration for the sensor fuser

use nalgebra::{Matrix3, UnitQuaternion, Vector3};

/// Small angle threshold for numerical stability.
const SMALL_ANGLE_THRESHOLD: f64 = 1e-6;

/// Constructs the skew-symmetric matrix [v]× such that [v]× u = v × u.
///
/// ```text
/// [v]× = |  0   -v_z   v_y |
///        |  v_z   0   -v_x |
///        | -v_y  v_x    0  |
/// ```
#[inline]
#[rustfmt::skip]
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y,
        v.z, 0.0, -v.x,
        -v.y, v.x, 0.0,
    )
}

/// Right Jacobian Jr(φ) of SO(3).
///
/// ```text
/// Jr(φ) = I - (1 - cos|φ|)/|φ|² [φ]× + (|φ| - sin|φ|)/|φ|³ [φ]×²
/// ```
///
/// With `R = exp(φ)`, `d(R p)/dφ = -R [p]× Jr(φ)`.
pub fn right_jacobian_so3(phi: &Vector3<f64>) -> Matrix3<f64> {
    let theta = phi.norm();

    if theta < SMALL_ANGLE_THRESHOLD {
        return Matrix3::identity() - 0.5 * skew(phi);
    }

    let theta_sq = theta * theta;
    let theta_cu = theta_sq * theta;
    let skew_phi = skew(phi);
    let skew_phi_sq = skew_phi * skew_phi;

    Matrix3::identity() - ((1.0 - theta.cos()) / theta_sq) * skew_phi
        + ((theta - theta.sin()) / theta_cu) * skew_phi_sq
}

/// Integrate a body-frame angular velocity (rad/s) over `dt` seconds.
pub fn integrate_angular_velocity(
    rotation: &UnitQuaternion<f64>,
    omega: &Vector3<f64>,
    dt: f64,
) -> UnitQuaternion<f64> {
    if dt <= 0.0 {
        return *rotation;
    }
    rotation * UnitQuaternion::from_scaled_axis(omega * dt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_skew_cross_product() {
        let v = Vector3::new(1.0, 2.0, 3.0);
        let u = Vector3::new(4.0, 5.0, 6.0);

        assert_relative_eq!(v.cross(&u), skew(&v) * u, epsilon = 1e-12);
    }

    #[test]
    fn test_right_jacobian_identity_at_zero() {
        let jr = right_jacobian_so3(&Vector3::zeros());
        assert_relative_eq!(jr, Matrix3::identity(), epsilon = 1e-10);
    }

    #[test]
    fn test_right_jacobian_matches_finite_difference() {
        // d(exp(φ) p)/dφ = -exp(φ) [p]× Jr(φ)
        let phi = Vector3::new(0.3, -0.2, 0.5);
        let p = Vector3::new(1.0, 2.0, -0.5);
        let analytic = -(UnitQuaternion::from_scaled_axis(phi).to_rotation_matrix().into_inner())
            * skew(&p)
            * right_jacobian_so3(&phi);

        let h = 1e-6;
        for k in 0..3 {
            let mut dphi = Vector3::zeros();
            dphi[k] = h;
            let plus = UnitQuaternion::from_scaled_axis(phi + dphi) * p;
            let minus = UnitQuaternion::from_scaled_axis(phi - dphi) * p;
            let numeric = (plus - minus) / (2.0 * h);
            assert_relative_eq!(numeric, analytic.column(k).into_owned(), epsilon = 1e-6);
        }
    }

    #[test]
    fn test_integrate_constant_rate() {
        let q = UnitQuaternion::identity();
        let omega = Vector3::new(0.0, 0.0, 1.0);
        let q1 = integrate_angular_velocity(&q, &omega, 0.5);

        assert_relative_eq!(q1.angle(), 0.5, epsilon = 1e-12);
        assert_relative_eq!(integrate_angular_velocity(&q, &omega, -1.0).angle(), 0.0);
    }
}
