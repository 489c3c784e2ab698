//! Pinhole camera model.

use nalgebra::{Matrix2x3, Matrix3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::geometry::SE3;

/// Minimum depth (metres) for a point to be considered in front of the camera.
pub const MIN_DEPTH: f64 = 1e-6;

/// Pinhole intrinsics `K = [[fx,0,cx],[0,fy,cy],[0,0,1]]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraModel {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Default for CameraModel {
    /// Nominal 640x480 camera.
    fn default() -> Self {
        Self::new(800.0, 800.0, 320.0, 240.0)
    }
}

impl CameraModel {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    pub fn from_k(k: &Matrix3<f64>) -> Self {
        Self::new(k[(0, 0)], k[(1, 1)], k[(0, 2)], k[(1, 2)])
    }

    #[rustfmt::skip]
    pub fn k(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx,
            0.0, self.fy, self.cy,
            0.0, 0.0, 1.0,
        )
    }

    /// Project a camera-frame point to pixels. `None` if behind the camera.
    pub fn project(&self, p_cam: &Vector3<f64>) -> Option<Vector2<f64>> {
        if p_cam.z <= MIN_DEPTH {
            return None;
        }
        Some(Vector2::new(
            self.fx * p_cam.x / p_cam.z + self.cx,
            self.fy * p_cam.y / p_cam.z + self.cy,
        ))
    }

    /// Normalized image coordinates `(x, y, 1)` of a pixel.
    pub fn unproject(&self, uv: &Vector2<f64>) -> Vector3<f64> {
        Vector3::new((uv.x - self.cx) / self.fx, (uv.y - self.cy) / self.fy, 1.0)
    }

    /// Unit bearing vector of a pixel.
    pub fn bearing(&self, uv: &Vector2<f64>) -> Vector3<f64> {
        self.unproject(uv).normalize()
    }

    /// Reprojection error (pixels) of a world point under `T_cw`.
    ///
    /// Points behind the camera report `f64::INFINITY`.
    pub fn reprojection_error(&self, pose_cw: &SE3, p_world: &Vector3<f64>, uv: &Vector2<f64>) -> f64 {
        match self.project(&pose_cw.transform_point(p_world)) {
            Some(proj) => (proj - uv).norm(),
            None => f64::INFINITY,
        }
    }

    /// Jacobian of the projection w.r.t. the camera-frame point.
    #[rustfmt::skip]
    pub fn projection_jacobian(&self, p_cam: &Vector3<f64>) -> Matrix2x3<f64> {
        let invz = 1.0 / p_cam.z;
        let invz2 = invz * invz;
        Matrix2x3::new(
            self.fx * invz, 0.0, -self.fx * p_cam.x * invz2,
            0.0, self.fy * invz, -self.fy * p_cam.y * invz2,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_project_unproject() {
        let cam = CameraModel::default();
        let p = Vector3::new(0.2, -0.1, 2.0);
        let uv = cam.project(&p).unwrap();

        assert_relative_eq!(uv, Vector2::new(400.0, 200.0), epsilon = 1e-12);
        assert_relative_eq!(cam.unproject(&uv) * p.z, p, epsilon = 1e-12);
    }

    #[test]
    fn test_behind_camera() {
        let cam = CameraModel::default();
        assert!(cam.project(&Vector3::new(0.0, 0.0, -1.0)).is_none());
        assert!(cam
            .reprojection_error(&SE3::identity(), &Vector3::new(0.0, 0.0, -1.0), &Vector2::zeros())
            .is_infinite());
    }

    #[test]
    fn test_k_roundtrip() {
        let cam = CameraModel::new(500.0, 510.0, 300.0, 200.0);
        assert_eq!(CameraModel::from_k(&cam.k()), cam);
    }
}
