//! Camera calibration and its YAML store.
//!
//! ```yaml
//! camera_matrix:
//!   - [fx, 0.0, cx]
//!   - [0.0, fy, cy]
//!   - [0.0, 0.0, 1.0]
//! distortion_coeffs: [k1, k2, p1, p2, k3]
//! timestamp: 1700000000   # unix seconds
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::tracking::frame::CameraModel;

/// Intrinsics (row-major `K`) and radial-tangential distortion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub camera_matrix: [[f64; 3]; 3],
    pub distortion_coeffs: [f64; 5],
    /// When the calibration was produced (unix seconds).
    pub timestamp: u64,
}

impl Calibration {
    /// Approximate intrinsics for a `width x height` stream: `fx = fy = 1.2 w`,
    /// principal point at the centre, no distortion.
    pub fn default_for(width: u32, height: u32) -> Self {
        let f = 1.2 * width as f64;
        Self {
            camera_matrix: [
                [f, 0.0, width as f64 / 2.0],
                [0.0, f, height as f64 / 2.0],
                [0.0, 0.0, 1.0],
            ],
            distortion_coeffs: [0.0; 5],
            timestamp: unix_now(),
        }
    }

    pub fn from_camera(camera: &CameraModel) -> Self {
        let k = camera.k();
        Self {
            camera_matrix: [
                [k[(0, 0)], k[(0, 1)], k[(0, 2)]],
                [k[(1, 0)], k[(1, 1)], k[(1, 2)]],
                [k[(2, 0)], k[(2, 1)], k[(2, 2)]],
            ],
            distortion_coeffs: [0.0; 5],
            timestamp: unix_now(),
        }
    }

    #[rustfmt::skip]
    pub fn k(&self) -> Matrix3<f64> {
        let m = &self.camera_matrix;
        Matrix3::new(
            m[0][0], m[0][1], m[0][2],
            m[1][0], m[1][1], m[1][2],
            m[2][0], m[2][1], m[2][2],
        )
    }

    pub fn camera(&self) -> CameraModel {
        CameraModel::from_k(&self.k())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("Failed to open calibration {}", path.display()))?;
        let calibration: Self = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse calibration {}", path.display()))?;

        let m = &calibration.camera_matrix;
        if m[0][0] <= 0.0 || m[1][1] <= 0.0 {
            bail!("Calibration {} has non-positive focal length", path.display());
        }
        Ok(calibration)
    }

    /// Load from `path`, falling back to [`Calibration::default_for`] when the
    /// file is missing or unreadable.
    pub fn load_or_default(path: impl AsRef<Path>, width: u32, height: u32) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(calibration) => {
                info!(path = %path.display(), "Loaded calibration");
                calibration
            }
            Err(e) => {
                warn!("Using default intrinsics for {}x{}: {:#}", width, height, e);
                Self::default_for(width, height)
            }
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).with_context(|| format!("Failed to create calibration {}", path.display()))?;
        serde_yaml::to_writer(BufWriter::new(file), self)
            .with_context(|| format!("Failed to write calibration {}", path.display()))?;
        Ok(())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("mono_slam_{}_{}", std::process::id(), name))
    }

    #[test]
    fn test_default_intrinsics() {
        let camera = Calibration::default_for(640, 480).camera();

        assert_relative_eq!(camera.fx, 768.0);
        assert_relative_eq!(camera.fy, 768.0);
        assert_relative_eq!(camera.cx, 320.0);
        assert_relative_eq!(camera.cy, 240.0);
    }

    #[test]
    fn test_yaml_round_trip() {
        let mut calibration = Calibration::from_camera(&CameraModel::new(500.0, 510.0, 319.5, 239.5));
        calibration.distortion_coeffs = [0.1, -0.05, 0.001, 0.002, 0.0];
        let path = temp_path("calib.yaml");

        calibration.save(&path).unwrap();
        let loaded = Calibration::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, calibration);
        assert_relative_eq!(loaded.camera().fy, 510.0);
    }

    #[test]
    fn test_missing_file_falls_back_to_default() {
        let calibration = Calibration::load_or_default(temp_path("missing.yaml"), 320, 240);
        assert_eq!(calibration.camera_matrix, Calibration::default_for(320, 240).camera_matrix);
    }

    #[test]
    fn test_garbage_file_falls_back_to_default() {
        let path = temp_path("garbage.yaml");
        std::fs::write(&path, "camera_matrix: not a matrix").unwrap();
        let calibration = Calibration::load_or_default(&path, 100, 80);
        std::fs::remove_file(&path).ok();

        assert_relative_eq!(calibration.camera().fx, 120.0);
    }
}
