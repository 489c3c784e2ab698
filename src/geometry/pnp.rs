//! PnP (Perspective-n-Point) solving with RANSAC outlier rejection.
//!
//! - Minimal solver: P3P on three correspondences, a fourth selects among
//!   the up to four real solutions
//! - Robust wrapper: RANSAC over random 4-point samples
//! - Refinement: Levenberg-Marquardt on the inlier reprojection error

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{DMatrix, DVector, Dyn, Owned, Vector2, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TrackingLost;
use crate::geometry::p3p::solve_p3p;
use crate::geometry::so3::{right_jacobian_so3, skew};
use crate::geometry::SE3;
use crate::tracking::frame::camera::MIN_DEPTH;
use crate::tracking::frame::CameraModel;

/// Correspondences needed for a minimal sample (P3P + one check point).
pub const MIN_CORRESPONDENCES: usize = 4;

/// RANSAC parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacConfig {
    /// Maximum number of hypotheses.
    pub max_iterations: usize,
    /// Inlier threshold on reprojection error (pixels).
    pub reprojection_threshold: f64,
    /// Stop once inliers exceed this fraction of the input.
    pub early_stop_ratio: f64,
    /// Refine the best hypothesis on its inliers.
    pub refine: bool,
    /// Seed for hypothesis sampling; `None` draws from OS entropy.
    pub seed: Option<u64>,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            reprojection_threshold: 2.0,
            early_stop_ratio: 0.8,
            refine: true,
            seed: None,
        }
    }
}

/// Result of robust PnP.
#[derive(Debug, Clone)]
pub struct PnPResult {
    /// Estimated camera pose (T_wc).
    pub pose: SE3,
    /// Indices of inlier correspondences (ascending).
    pub inliers: Vec<usize>,
    /// Indices of outlier correspondences (ascending).
    pub outliers: Vec<usize>,
    /// RANSAC iterations run.
    pub iterations: usize,
    /// Mean reprojection error over inliers (pixels).
    pub mean_inlier_error: f64,
}

/// Non-robust pose from all correspondences.
///
/// Uses the first four correspondences for the minimal solve, then refines
/// on the full set. Returns `T_wc`.
pub fn estimate_pose(
    points2d: &[Vector2<f64>],
    points3d: &[Vector3<f64>],
    camera: &CameraModel,
) -> Result<SE3, TrackingLost> {
    let n = check_input(points2d, points3d)?;
    let sample: Vec<usize> = (0..MIN_CORRESPONDENCES).collect();
    let pose_cw = solve_minimal(&sample, points2d, points3d, camera)
        .ok_or(TrackingLost::NoConsensus { iterations: 1 })?;
    let all: Vec<usize> = (0..n).collect();
    let refined = refine_pose(&pose_cw, points2d, points3d, camera, &all).unwrap_or(pose_cw);
    Ok(refined.inverse())
}

/// Robust PnP with a sampling RNG derived from `config.seed`.
pub fn solve_pnp_ransac(
    points2d: &[Vector2<f64>],
    points3d: &[Vector3<f64>],
    camera: &CameraModel,
    config: &RansacConfig,
) -> Result<PnPResult, TrackingLost> {
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    solve_pnp_ransac_with_rng(points2d, points3d, camera, config, &mut rng)
}

/// Robust PnP drawing samples from the given RNG.
pub fn solve_pnp_ransac_with_rng<R: Rng + ?Sized>(
    points2d: &[Vector2<f64>],
    points3d: &[Vector3<f64>],
    camera: &CameraModel,
    config: &RansacConfig,
    rng: &mut R,
) -> Result<PnPResult, TrackingLost> {
    let n = check_input(points2d, points3d)?;
    let early_stop = config.early_stop_ratio * n as f64;
    let threshold = config.reprojection_threshold;

    let mut best: Option<(SE3, Vec<usize>, f64)> = None;
    let mut iterations = 0;

    for iter in 0..config.max_iterations {
        iterations = iter + 1;

        let sample = rand::seq::index::sample(rng, n, MIN_CORRESPONDENCES).into_vec();
        let Some(candidate) = solve_minimal(&sample, points2d, points3d, camera) else {
            continue;
        };

        let (inliers, error) = partition_inliers(&candidate, points2d, points3d, camera, threshold);
        let better = match &best {
            None => true,
            Some((_, best_inliers, best_error)) => {
                inliers.len() > best_inliers.len()
                    || (inliers.len() == best_inliers.len() && error < *best_error)
            }
        };
        if better {
            best = Some((candidate, inliers, error));
        }

        if let Some((_, best_inliers, _)) = &best {
            if best_inliers.len() as f64 > early_stop {
                break;
            }
        }
    }

    let Some((mut pose_cw, mut inliers, mut error)) =
        best.filter(|(_, inliers, _)| inliers.len() >= MIN_CORRESPONDENCES)
    else {
        return Err(TrackingLost::NoConsensus { iterations });
    };

    if config.refine {
        if let Some(refined) = refine_pose(&pose_cw, points2d, points3d, camera, &inliers) {
            let (refined_inliers, refined_error) =
                partition_inliers(&refined, points2d, points3d, camera, threshold);
            if refined_inliers.len() >= inliers.len() {
                pose_cw = refined;
                inliers = refined_inliers;
                error = refined_error;
            }
        }
    }

    let mut is_inlier = vec![false; n];
    for &i in &inliers {
        is_inlier[i] = true;
    }
    let outliers: Vec<usize> = (0..n).filter(|&i| !is_inlier[i]).collect();

    debug!(
        "PnP RANSAC: {}/{} inliers after {} iterations",
        inliers.len(),
        n,
        iterations
    );

    Ok(PnPResult {
        pose: pose_cw.inverse(),
        mean_inlier_error: error / inliers.len() as f64,
        inliers,
        outliers,
        iterations,
    })
}

/// Refine `T_cw` with Levenberg-Marquardt over the selected correspondences.
///
/// Returns `None` if the optimizer fails or does not improve the cost.
pub fn refine_pose(
    pose_cw: &SE3,
    points2d: &[Vector2<f64>],
    points3d: &[Vector3<f64>],
    camera: &CameraModel,
    indices: &[usize],
) -> Option<SE3> {
    if indices.len() < MIN_CORRESPONDENCES {
        return None;
    }
    let (rot, trans) = pose_cw.to_params();
    let problem = PoseRefinement {
        camera,
        observed: indices.iter().map(|&i| points2d[i]).collect(),
        points: indices.iter().map(|&i| points3d[i]).collect(),
        params: DVector::from_column_slice(&[rot.x, rot.y, rot.z, trans.x, trans.y, trans.z]),
    };
    let initial_cost = problem.residuals()?.norm_squared();

    let (problem, _report) = LevenbergMarquardt::new().with_patience(20).minimize(problem);
    let final_cost = problem.residuals()?.norm_squared();
    if !final_cost.is_finite() || final_cost > initial_cost {
        return None;
    }
    Some(problem.pose())
}

fn check_input(points2d: &[Vector2<f64>], points3d: &[Vector3<f64>]) -> Result<usize, TrackingLost> {
    debug_assert_eq!(points2d.len(), points3d.len());
    let n = points2d.len().min(points3d.len());
    if n < MIN_CORRESPONDENCES {
        return Err(TrackingLost::InsufficientCorrespondences {
            found: n,
            required: MIN_CORRESPONDENCES,
        });
    }
    Ok(n)
}

/// P3P on the first three sample indices; the fourth picks the solution.
fn solve_minimal(
    sample: &[usize],
    points2d: &[Vector2<f64>],
    points3d: &[Vector3<f64>],
    camera: &CameraModel,
) -> Option<SE3> {
    let bearings = [
        camera.bearing(&points2d[sample[0]]),
        camera.bearing(&points2d[sample[1]]),
        camera.bearing(&points2d[sample[2]]),
    ];
    let points = [points3d[sample[0]], points3d[sample[1]], points3d[sample[2]]];
    let check = sample[3];

    solve_p3p(&bearings, &points)
        .into_iter()
        .map(|pose| {
            let err = camera.reprojection_error(&pose, &points3d[check], &points2d[check]);
            (pose, err)
        })
        .filter(|(_, err)| err.is_finite())
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(pose, _)| pose)
}

/// Inlier indices and their summed reprojection error.
fn partition_inliers(
    pose_cw: &SE3,
    points2d: &[Vector2<f64>],
    points3d: &[Vector3<f64>],
    camera: &CameraModel,
    threshold: f64,
) -> (Vec<usize>, f64) {
    let mut inliers = Vec::new();
    let mut total = 0.0;
    for (i, (uv, p)) in points2d.iter().zip(points3d).enumerate() {
        let err = camera.reprojection_error(pose_cw, p, uv);
        if err < threshold {
            inliers.push(i);
            total += err;
        }
    }
    (inliers, total)
}

/// Reprojection least squares over `T_cw = (exp(ω), t)`.
struct PoseRefinement<'a> {
    camera: &'a CameraModel,
    observed: Vec<Vector2<f64>>,
    points: Vec<Vector3<f64>>,
    params: DVector<f64>,
}

impl PoseRefinement<'_> {
    fn omega(&self) -> Vector3<f64> {
        Vector3::new(self.params[0], self.params[1], self.params[2])
    }

    fn pose(&self) -> SE3 {
        let t = Vector3::new(self.params[3], self.params[4], self.params[5]);
        SE3::from_params(&self.omega(), &t)
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for PoseRefinement<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, params: &DVector<f64>) {
        self.params.copy_from(params);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let pose = self.pose();
        let mut r = DVector::zeros(self.observed.len() * 2);
        for (i, (uv, p)) in self.observed.iter().zip(&self.points).enumerate() {
            let proj = self.camera.project(&pose.transform_point(p))?;
            r[2 * i] = proj.x - uv.x;
            r[2 * i + 1] = proj.y - uv.y;
        }
        Some(r)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let pose = self.pose();
        let rot = pose.rotation_matrix();
        let jr = right_jacobian_so3(&self.omega());
        let mut jac = DMatrix::zeros(self.observed.len() * 2, 6);
        for (i, p) in self.points.iter().enumerate() {
            let p_cam = pose.transform_point(p);
            if p_cam.z <= MIN_DEPTH {
                return None;
            }
            let j_proj = self.camera.projection_jacobian(&p_cam);
            let j_rot = j_proj * (-rot * skew(p) * jr);
            jac.fixed_view_mut::<2, 3>(2 * i, 0).copy_from(&j_rot);
            jac.fixed_view_mut::<2, 3>(2 * i, 3).copy_from(&j_proj);
        }
        Some(jac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;

    fn planted_scene(pose_wc: &SE3, camera: &CameraModel) -> (Vec<Vector2<f64>>, Vec<Vector3<f64>>) {
        let pose_cw = pose_wc.inverse();
        let mut rng = StdRng::seed_from_u64(7);
        let mut points2d = Vec::new();
        let mut points3d = Vec::new();
        while points3d.len() < 15 {
            let p = Vector3::new(
                rng.gen_range(-2.0..2.0),
                rng.gen_range(-1.5..1.5),
                rng.gen_range(4.0..8.0),
            );
            if let Some(uv) = camera.project(&pose_cw.transform_point(&p)) {
                points2d.push(uv);
                points3d.push(p);
            }
        }
        (points2d, points3d)
    }

    fn planted_pose() -> SE3 {
        SE3::new(
            UnitQuaternion::from_euler_angles(0.05, -0.12, 0.08),
            Vector3::new(0.3, -0.1, 0.2),
        )
    }

    #[test]
    fn test_insufficient_correspondences() {
        let camera = CameraModel::default();
        let pts2 = vec![Vector2::new(1.0, 2.0); 3];
        let pts3 = vec![Vector3::new(0.0, 0.0, 1.0); 3];

        let err = solve_pnp_ransac(&pts2, &pts3, &camera, &RansacConfig::default()).unwrap_err();
        assert_eq!(
            err,
            TrackingLost::InsufficientCorrespondences {
                found: 3,
                required: 4
            }
        );
        assert!(estimate_pose(&pts2, &pts3, &camera).is_err());
    }

    #[test]
    fn test_estimate_pose_exact() {
        let camera = CameraModel::default();
        let pose = planted_pose();
        let (pts2, pts3) = planted_scene(&pose, &camera);

        let est = estimate_pose(&pts2, &pts3, &camera).unwrap();
        assert_relative_eq!(est.translation, pose.translation, epsilon = 1e-6);
        assert_relative_eq!(est.rotation_angle_to(&pose), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_ransac_rejects_planted_outliers() {
        let camera = CameraModel::default();
        let pose = planted_pose();
        let (mut pts2, mut pts3) = planted_scene(&pose, &camera);

        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..5 {
            pts2.push(Vector2::new(rng.gen_range(0.0..640.0), rng.gen_range(0.0..480.0)));
            pts3.push(Vector3::new(
                rng.gen_range(-2.0..2.0),
                rng.gen_range(-1.5..1.5),
                rng.gen_range(4.0..8.0),
            ));
        }

        let config = RansacConfig {
            seed: Some(1),
            ..RansacConfig::default()
        };
        let result = solve_pnp_ransac(&pts2, &pts3, &camera, &config).unwrap();

        assert!(result.inliers.len() >= 15, "inliers: {}", result.inliers.len());
        assert!((0..15).all(|i| result.inliers.contains(&i)));
        assert_eq!(result.inliers.len() + result.outliers.len(), 20);
        assert!(result.iterations <= 1000);
        assert_relative_eq!(result.pose.translation, pose.translation, epsilon = 1e-4);
        assert_relative_eq!(result.pose.rotation_angle_to(&pose), 0.0, epsilon = 1e-4);
    }

    #[test]
    fn test_refine_recovers_perturbed_pose() {
        let camera = CameraModel::default();
        let pose = planted_pose();
        let (pts2, pts3) = planted_scene(&pose, &camera);
        let perturbed = pose
            .inverse()
            .retract(&nalgebra::Vector6::new(0.01, -0.01, 0.02, 0.05, 0.02, -0.03));

        let all: Vec<usize> = (0..pts2.len()).collect();
        let refined = refine_pose(&perturbed, &pts2, &pts3, &camera, &all).unwrap();
        assert_relative_eq!(refined.inverse().translation, pose.translation, epsilon = 1e-6);
    }
}
