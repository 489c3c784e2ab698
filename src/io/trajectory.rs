//! Trajectory export as CSV: `timestamp, tx, ty, tz, qx, qy, qz, qw`.

use std::path::Path;

use anyhow::{Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::geometry::SE3;

/// One row of the trajectory file. `timestamp` is in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryRecord {
    pub timestamp: u64,
    pub tx: f64,
    pub ty: f64,
    pub tz: f64,
    pub qx: f64,
    pub qy: f64,
    pub qz: f64,
    pub qw: f64,
}

impl TrajectoryRecord {
    pub fn new(timestamp: u64, pose: &SE3) -> Self {
        let t = pose.translation;
        let q = pose.rotation.quaternion();
        Self {
            timestamp,
            tx: t.x,
            ty: t.y,
            tz: t.z,
            qx: q.i,
            qy: q.j,
            qz: q.k,
            qw: q.w,
        }
    }

    pub fn pose(&self) -> SE3 {
        SE3 {
            rotation: UnitQuaternion::from_quaternion(Quaternion::new(self.qw, self.qx, self.qy, self.qz)),
            translation: Vector3::new(self.tx, self.ty, self.tz),
        }
    }
}

pub fn write_trajectory(path: impl AsRef<Path>, records: &[TrajectoryRecord]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = WriterBuilder::new()
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_trajectory(path: impl AsRef<Path>) -> Result<Vec<TrajectoryRecord>> {
    let path = path.as_ref();
    let mut reader = ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    reader
        .deserialize()
        .collect::<Result<Vec<TrajectoryRecord>, _>>()
        .with_context(|| format!("Malformed trajectory {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_write_then_read() {
        let poses = [
            SE3::identity(),
            SE3 {
                rotation: UnitQuaternion::from_euler_angles(0.1, -0.2, 0.3),
                translation: Vector3::new(1.0, 2.0, -0.5),
            },
        ];
        let records: Vec<TrajectoryRecord> = poses
            .iter()
            .enumerate()
            .map(|(i, p)| TrajectoryRecord::new(i as u64 * 1_000, p))
            .collect();
        let path = std::env::temp_dir().join(format!("mono_slam_traj_{}.csv", std::process::id()));

        write_trajectory(&path, &records).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("timestamp,tx,ty,tz,qx,qy,qz,qw"));

        let loaded = read_trajectory(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].timestamp, 1_000);
        let pose = loaded[1].pose();
        assert_relative_eq!(pose.translation, poses[1].translation, epsilon = 1e-12);
        assert!(pose.rotation.angle_to(&poses[1].rotation) < 1e-9);
    }

    #[test]
    fn test_missing_file() {
        assert!(read_trajectory("/nonexistent/trajectory.csv").is_err());
    }
}
