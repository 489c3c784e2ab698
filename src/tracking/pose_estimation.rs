//! Frame pose from tracked features and the map's 3D points.
//!
//! Features carrying a `track_id` give 2D-3D correspondences; RANSAC PnP
//! estimates the pose and flags the correspondences that disagree with it.

use nalgebra::{Vector2, Vector3};
use rand::Rng;

use crate::error::TrackingLost;
use crate::geometry::pnp::{solve_pnp_ransac_with_rng, RansacConfig};
use crate::geometry::SE3;
use crate::map::SparseMap;
use crate::tracking::feature::Feature;

/// 2D-3D correspondences with the feature each came from.
#[derive(Debug, Clone, Default)]
pub struct Correspondences {
    pub feature_indices: Vec<usize>,
    pub points2d: Vec<Vector2<f64>>,
    pub points3d: Vec<Vector3<f64>>,
}

impl Correspondences {
    pub fn len(&self) -> usize {
        self.feature_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feature_indices.is_empty()
    }
}

/// Estimated pose plus per-feature outlier verdicts.
#[derive(Debug, Clone)]
pub struct PoseEstimate {
    /// Camera pose (T_wc).
    pub pose: SE3,
    /// Feature indices consistent with the pose.
    pub inlier_features: Vec<usize>,
    /// Tracked feature indices rejected by RANSAC.
    pub outlier_features: Vec<usize>,
}

/// Correspondences for every feature linked to a known map point.
pub fn collect_correspondences(features: &[Feature], map: &SparseMap) -> Correspondences {
    let mut out = Correspondences::default();
    for (i, feature) in features.iter().enumerate() {
        let Some(mp) = feature.track_id.and_then(|id| map.map_point(id)) else {
            continue;
        };
        out.feature_indices.push(i);
        out.points2d.push(feature.uv());
        out.points3d.push(mp.position);
    }
    out
}

/// Robust pose for a frame.
pub fn estimate_frame_pose<R: Rng + ?Sized>(
    features: &[Feature],
    map: &SparseMap,
    config: &RansacConfig,
    rng: &mut R,
) -> Result<PoseEstimate, TrackingLost> {
    let correspondences = collect_correspondences(features, map);
    let result = solve_pnp_ransac_with_rng(
        &correspondences.points2d,
        &correspondences.points3d,
        map.camera(),
        config,
        rng,
    )?;

    let to_features = |indices: &[usize]| -> Vec<usize> {
        indices
            .iter()
            .map(|&i| correspondences.feature_indices[i])
            .collect()
    };
    Ok(PoseEstimate {
        pose: result.pose,
        inlier_features: to_features(&result.inliers),
        outlier_features: to_features(&result.outliers),
    })
}
