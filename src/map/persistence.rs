//! JSON persistence for the sparse map.
//!
//! Only the geometric skeleton is stored: keyframe poses with the ids of
//! the points they observe, and point positions with descriptors. Features
//! are not persisted, so restored keyframes carry none and are ignored by
//! bundle adjustment until the map grows past them.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::MapError;
use crate::geometry::SE3;
use crate::tracking::feature::Descriptor;
use crate::tracking::frame::CameraModel;

use super::keyframe::KeyFrame;
use super::map_point::MapPoint;
use super::sparse_map::{MapConfig, SparseMap};
use super::types::{KeyFrameId, MapPointId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedKeyFrame {
    pub id: KeyFrameId,
    pub pose: SE3,
    pub map_point_ids: Vec<MapPointId>,
    /// Capture time in nanoseconds.
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedMapPoint {
    pub id: MapPointId,
    pub position: Vector3<f64>,
    pub descriptor: Descriptor,
}

/// On-disk form of a [`SparseMap`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedMap {
    pub keyframes: Vec<PersistedKeyFrame>,
    pub map_points: Vec<PersistedMapPoint>,
}

impl SparseMap {
    pub fn to_persisted(&self) -> PersistedMap {
        PersistedMap {
            keyframes: self
                .keyframes()
                .iter()
                .map(|kf| PersistedKeyFrame {
                    id: kf.id,
                    pose: kf.pose,
                    map_point_ids: kf.map_point_ids.clone(),
                    timestamp: kf.timestamp_ns,
                })
                .collect(),
            map_points: self
                .map_points()
                .iter()
                .map(|mp| PersistedMapPoint {
                    id: mp.id,
                    position: mp.position,
                    descriptor: mp.descriptor,
                })
                .collect(),
        }
    }

    /// Rebuild a map, checking that ids are dense and references resolve.
    pub fn from_persisted(camera: CameraModel, config: MapConfig, persisted: PersistedMap) -> Result<Self, MapError> {
        for (i, mp) in persisted.map_points.iter().enumerate() {
            if mp.id.index() != i {
                return Err(MapError::NonSequentialId {
                    expected: i as u32,
                    found: mp.id.0,
                });
            }
        }

        let num_points = persisted.map_points.len();
        let mut first_observer: Vec<Option<KeyFrameId>> = vec![None; num_points];
        let mut keyframes = Vec::with_capacity(persisted.keyframes.len());
        for (i, kf) in persisted.keyframes.into_iter().enumerate() {
            if kf.id.index() != i {
                return Err(MapError::NonSequentialId {
                    expected: i as u32,
                    found: kf.id.0,
                });
            }
            for mp_id in &kf.map_point_ids {
                let slot = first_observer.get_mut(mp_id.index()).ok_or(MapError::UnknownMapPoint {
                    keyframe: kf.id,
                    map_point: *mp_id,
                })?;
                slot.get_or_insert(kf.id);
            }
            keyframes.push(KeyFrame {
                id: kf.id,
                timestamp_ns: kf.timestamp,
                frame_index: 0,
                pose: kf.pose,
                features: Vec::new(),
                map_point_ids: kf.map_point_ids,
            });
        }

        let map_points = persisted
            .map_points
            .into_iter()
            .zip(first_observer)
            .map(|(mp, first)| MapPoint::new(mp.id, mp.position, mp.descriptor, first.unwrap_or(KeyFrameId::new(0))))
            .collect();

        Ok(Self::from_parts(camera, config, keyframes, map_points))
    }

    /// Write the map as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).with_context(|| format!("Failed to create map file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &self.to_persisted())
            .with_context(|| format!("Failed to serialize map to {}", path.display()))?;
        writer.flush()?;

        info!(
            path = %path.display(),
            keyframes = self.num_keyframes(),
            map_points = self.num_map_points(),
            "Saved map"
        );
        Ok(())
    }

    /// Read a map written by [`SparseMap::save`].
    pub fn load(path: impl AsRef<Path>, camera: CameraModel, config: MapConfig) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("Failed to open map file {}", path.display()))?;
        let persisted: PersistedMap = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse map file {}", path.display()))?;
        let map = Self::from_persisted(camera, config, persisted)?;

        info!(
            path = %path.display(),
            keyframes = map.num_keyframes(),
            map_points = map.num_map_points(),
            "Loaded map"
        );
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::FrameInfo;
    use crate::tracking::feature::Feature;
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;

    fn feature(x: f64, y: f64, track_id: Option<MapPointId>, tag: u8) -> Feature {
        Feature {
            x,
            y,
            score: 1.0,
            angle: 0.0,
            descriptor: Descriptor([tag; 32]),
            track_id,
        }
    }

    /// Two keyframes sharing 20 points.
    fn small_map() -> SparseMap {
        let mut map = SparseMap::new(CameraModel::default(), MapConfig::default());
        let mut f0: Vec<Feature> = (0..20).map(|i| feature(100.0 + 10.0 * i as f64, 200.0, None, i as u8)).collect();
        map.add_keyframe(FrameInfo { index: 0, timestamp_ns: 5 }, &mut f0, SE3::identity())
            .unwrap();

        let pose = SE3::new(
            UnitQuaternion::from_scaled_axis(Vector3::new(0.0, 0.05, 0.0)),
            Vector3::new(0.3, 0.0, 0.0),
        );
        let mut f1: Vec<Feature> = f0
            .iter()
            .map(|f| feature(f.x - 20.0, f.y, f.track_id, 0))
            .collect();
        map.add_keyframe(FrameInfo { index: 30, timestamp_ns: 1_000_005 }, &mut f1, pose)
            .unwrap();
        map
    }

    #[test]
    fn test_save_load_preserves_geometry() {
        let map = small_map();
        let path = std::env::temp_dir().join(format!("mono_slam_map_{}.json", std::process::id()));

        map.save(&path).unwrap();
        let loaded = SparseMap::load(&path, CameraModel::default(), MapConfig::default()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.to_persisted(), map.to_persisted());
        assert_eq!(loaded.num_keyframes(), 2);
        assert_eq!(loaded.keyframes()[1].timestamp_ns, 1_000_005);
        assert_relative_eq!(
            loaded.keyframes()[1].pose.translation,
            map.keyframes()[1].pose.translation,
            epsilon = 1e-12
        );
        assert_eq!(loaded.map_points()[3].descriptor, Descriptor([3; 32]));
        assert_eq!(loaded.map_points()[3].num_observations(), 2);
        assert_eq!(
            loaded.covisibility_weight(KeyFrameId::new(0), KeyFrameId::new(1)),
            map.covisibility_weight(KeyFrameId::new(0), KeyFrameId::new(1))
        );
    }

    #[test]
    fn test_json_layout() {
        let json = serde_json::to_value(small_map().to_persisted()).unwrap();

        let kf = &json["keyframes"][1];
        assert_eq!(kf["id"], 1);
        assert_eq!(kf["timestamp"], 1_000_005);
        assert_eq!(kf["map_point_ids"].as_array().unwrap().len(), 20);
        assert!(kf["pose"]["translation"].is_array());
        assert_eq!(json["map_points"][0]["position"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_rejects_dangling_reference() {
        let mut persisted = small_map().to_persisted();
        persisted.keyframes[1].map_point_ids.push(MapPointId::new(500));

        let err = SparseMap::from_persisted(CameraModel::default(), MapConfig::default(), persisted).err();
        assert_eq!(
            err,
            Some(MapError::UnknownMapPoint {
                keyframe: KeyFrameId::new(1),
                map_point: MapPointId::new(500)
            })
        );
    }

    #[test]
    fn test_rejects_non_sequential_ids() {
        let mut persisted = small_map().to_persisted();
        persisted.map_points.swap(0, 1);

        assert!(matches!(
            SparseMap::from_persisted(CameraModel::default(), MapConfig::default(), persisted),
            Err(MapError::NonSequentialId { expected: 0, found: 1 })
        ));
    }
}
