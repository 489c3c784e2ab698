//! Windowed bundle adjustment with a Schur-complement Levenberg-Marquardt solver.
//!
//! Minimizes the robust reprojection error
//!
//! ```text
//! E = Σ_ij ρ(||u_ij − π(T_i, p_j)||²)
//! ```
//!
//! over the poses of the most recent keyframes and the positions of the map
//! points they observe. Runs in three phases so the solve never touches the
//! map:
//!
//! 1. [`collect_problem`] snapshots poses, points and observations.
//! 2. [`solve`] iterates LM on the snapshot. Point blocks are 3x3 and are
//!    eliminated per point, leaving a dense 6k x 6k reduced camera system.
//! 3. The caller writes the result back (see `SparseMap::optimize_bundle`).
//!
//! The oldest keyframe of the window is the gauge anchor and stays fixed,
//! as does every keyframe outside the window that observes a windowed point.
//! The result is discarded if the plain squared error did not decrease.

use std::collections::{BTreeSet, HashMap};

use nalgebra::{DMatrix, DVector, Matrix3, Matrix3x6, Matrix6x3, Vector2, Vector3, Vector6};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::geometry::so3::skew;
use crate::geometry::SE3;
use crate::map::{KeyFrameId, MapPointId, SparseMap};
use crate::tracking::frame::camera::MIN_DEPTH;
use crate::tracking::frame::CameraModel;

/// Configuration for windowed bundle adjustment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleAdjustmentConfig {
    /// Maximum number of LM iterations.
    pub max_iterations: usize,
    /// Huber kernel threshold (pixels).
    pub huber_threshold: f64,
    /// Number of most recent keyframes whose poses are optimized.
    pub window_size: usize,
    /// Points with fewer usable observations are left out.
    pub min_observations: usize,
    /// Initial LM damping.
    pub initial_lambda: f64,
}

impl Default for BundleAdjustmentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            huber_threshold: 5.991_f64.sqrt(), // 95% chi2, 2 DOF
            window_size: 20,
            min_observations: 2,
            initial_lambda: 1e-3,
        }
    }
}

/// Summary of one bundle adjustment run.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleAdjustmentReport {
    pub iterations: usize,
    /// Sum of squared reprojection errors before optimization (pixels²).
    pub initial_error: f64,
    /// Sum of squared reprojection errors after optimization (pixels²).
    pub final_error: f64,
    /// Number of keyframes whose pose was optimized.
    pub num_keyframes: usize,
    pub num_map_points: usize,
    pub num_observations: usize,
}

/// One reprojection term, indexing into the problem's pose and point lists.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BAObservation {
    pub pose: usize,
    pub point: usize,
    pub uv: Vector2<f64>,
}

/// Snapshot of the optimization problem.
#[derive(Debug, Clone)]
pub(crate) struct BAProblemData {
    pub keyframe_ids: Vec<KeyFrameId>,
    /// World-to-camera poses, parallel to `keyframe_ids`.
    pub poses_cw: Vec<SE3>,
    /// Whether each pose is held constant.
    pub fixed: Vec<bool>,
    pub map_point_ids: Vec<MapPointId>,
    pub points: Vec<Vector3<f64>>,
    pub observations: Vec<BAObservation>,
}

/// Optimized values, parallel to the problem's lists.
#[derive(Debug, Clone)]
pub(crate) struct BAResultData {
    pub poses_cw: Vec<SE3>,
    pub points: Vec<Vector3<f64>>,
    pub report: BundleAdjustmentReport,
}

/// Phase 1: snapshot the window from the map.
pub(crate) fn collect_problem(map: &SparseMap, config: &BundleAdjustmentConfig) -> Option<BAProblemData> {
    let keyframes = map.keyframes();
    if keyframes.len() < 2 {
        return None;
    }
    let window_start = keyframes.len().saturating_sub(config.window_size.max(2));
    let anchor = keyframes[window_start].id;
    let in_window = |id: KeyFrameId| id.index() >= window_start;

    // Points seen by the window with enough usable observations.
    let mut point_ids: BTreeSet<MapPointId> = BTreeSet::new();
    for kf in &keyframes[window_start..] {
        point_ids.extend(kf.map_point_ids.iter().copied());
    }

    let mut pose_index: HashMap<KeyFrameId, usize> = HashMap::new();
    let mut problem = BAProblemData {
        keyframe_ids: Vec::new(),
        poses_cw: Vec::new(),
        fixed: Vec::new(),
        map_point_ids: Vec::new(),
        points: Vec::new(),
        observations: Vec::new(),
    };

    for mp_id in point_ids {
        let Some(mp) = map.map_point(mp_id) else {
            continue;
        };
        let usable: Vec<(KeyFrameId, Vector2<f64>)> = mp
            .observations
            .iter()
            .filter_map(|obs| {
                let kf = map.keyframe(obs.keyframe_id)?;
                let feature = kf.features.get(obs.feature_index)?;
                Some((obs.keyframe_id, feature.uv()))
            })
            .collect();
        if usable.len() < config.min_observations.max(2) {
            continue;
        }

        let point = problem.points.len();
        problem.map_point_ids.push(mp_id);
        problem.points.push(mp.position);

        for (kf_id, uv) in usable {
            let pose = match pose_index.get(&kf_id) {
                Some(&i) => i,
                None => {
                    let Some(kf) = map.keyframe(kf_id) else {
                        continue;
                    };
                    let i = problem.keyframe_ids.len();
                    problem.keyframe_ids.push(kf_id);
                    problem.poses_cw.push(kf.pose.inverse());
                    problem.fixed.push(kf_id == anchor || !in_window(kf_id));
                    pose_index.insert(kf_id, i);
                    i
                }
            };
            problem.observations.push(BAObservation { pose, point, uv });
        }
    }

    if problem.observations.is_empty() {
        return None;
    }
    Some(problem)
}

/// Accumulated normal equations `H δ = b`, split into camera and point blocks.
struct NormalEquations {
    hpp: DMatrix<f64>,
    bp: DVector<f64>,
    hll: Vec<Matrix3<f64>>,
    bl: Vec<Vector3<f64>>,
    /// Camera-point coupling block per observation (`None` for fixed poses).
    hpl: Vec<Option<Matrix6x3<f64>>>,
}

/// Phase 2: optimize the snapshot.
pub(crate) fn solve(problem: &BAProblemData, camera: &CameraModel, config: &BundleAdjustmentConfig) -> BAResultData {
    let mut pose_param: Vec<Option<usize>> = Vec::with_capacity(problem.poses_cw.len());
    let mut num_cameras = 0;
    for &fixed in &problem.fixed {
        if fixed {
            pose_param.push(None);
        } else {
            pose_param.push(Some(num_cameras));
            num_cameras += 1;
        }
    }

    let mut obs_by_point: Vec<Vec<usize>> = vec![Vec::new(); problem.points.len()];
    for (k, obs) in problem.observations.iter().enumerate() {
        obs_by_point[obs.point].push(k);
    }

    let mut poses = problem.poses_cw.clone();
    let mut points = problem.points.clone();
    let initial_error = squared_error(problem, camera, &poses, &points);
    let mut cost = robust_cost(problem, camera, &poses, &points, config.huber_threshold);
    let mut lambda = config.initial_lambda;
    let mut iterations = 0;

    for _ in 0..config.max_iterations {
        iterations += 1;
        let system = build_normal_equations(problem, camera, &poses, &points, &pose_param, num_cameras, config.huber_threshold);

        let gradient_norm = system.bp.norm_squared() + system.bl.iter().map(|b| b.norm_squared()).sum::<f64>();
        if gradient_norm < 1e-20 {
            break;
        }

        let Some((dp, dl)) = solve_damped(&system, problem, &pose_param, &obs_by_point, num_cameras, lambda) else {
            lambda = (lambda * 10.0).min(1e10);
            continue;
        };

        let trial_poses: Vec<SE3> = poses
            .iter()
            .zip(&pose_param)
            .map(|(pose, param)| match param {
                Some(c) => pose.retract(&dp.fixed_rows::<6>(6 * c).into_owned()),
                None => *pose,
            })
            .collect();
        let trial_points: Vec<Vector3<f64>> = points.iter().zip(&dl).map(|(p, d)| p + d).collect();
        let trial_cost = robust_cost(problem, camera, &trial_poses, &trial_points, config.huber_threshold);

        if trial_cost < cost {
            let improvement = cost - trial_cost;
            poses = trial_poses;
            points = trial_points;
            cost = trial_cost;
            lambda = (lambda * 0.1).max(1e-10);
            if improvement < 1e-12 * cost.max(1e-12) {
                break;
            }
        } else {
            lambda = (lambda * 10.0).min(1e10);
        }
    }

    let mut final_error = squared_error(problem, camera, &poses, &points);
    if !(final_error <= initial_error) {
        debug!(initial_error, final_error, "BA increased squared error, keeping initial state");
        poses = problem.poses_cw.clone();
        points = problem.points.clone();
        final_error = initial_error;
    }

    BAResultData {
        poses_cw: poses,
        points,
        report: BundleAdjustmentReport {
            iterations,
            initial_error,
            final_error,
            num_keyframes: num_cameras,
            num_map_points: problem.points.len(),
            num_observations: problem.observations.len(),
        },
    }
}

/// Sum of squared pixel residuals over observations in front of their camera.
pub(crate) fn squared_error(problem: &BAProblemData, camera: &CameraModel, poses: &[SE3], points: &[Vector3<f64>]) -> f64 {
    problem
        .observations
        .iter()
        .filter_map(|obs| {
            let p_cam = poses[obs.pose].transform_point(&points[obs.point]);
            camera.project(&p_cam).map(|uv| (uv - obs.uv).norm_squared())
        })
        .sum()
}

/// Huber cost. Infinite if any point falls behind its camera, so such a
/// step is never accepted.
fn robust_cost(problem: &BAProblemData, camera: &CameraModel, poses: &[SE3], points: &[Vector3<f64>], delta: f64) -> f64 {
    let mut cost = 0.0;
    for obs in &problem.observations {
        let p_cam = poses[obs.pose].transform_point(&points[obs.point]);
        let Some(uv) = camera.project(&p_cam) else {
            return f64::INFINITY;
        };
        let e = (uv - obs.uv).norm();
        cost += if e <= delta { e * e } else { 2.0 * delta * e - delta * delta };
    }
    cost
}

fn huber_weight(error: f64, delta: f64) -> f64 {
    if error <= delta {
        1.0
    } else {
        delta / error
    }
}

fn build_normal_equations(
    problem: &BAProblemData,
    camera: &CameraModel,
    poses: &[SE3],
    points: &[Vector3<f64>],
    pose_param: &[Option<usize>],
    num_cameras: usize,
    delta: f64,
) -> NormalEquations {
    let mut system = NormalEquations {
        hpp: DMatrix::zeros(6 * num_cameras, 6 * num_cameras),
        bp: DVector::zeros(6 * num_cameras),
        hll: vec![Matrix3::zeros(); points.len()],
        bl: vec![Vector3::zeros(); points.len()],
        hpl: vec![None; problem.observations.len()],
    };

    for (k, obs) in problem.observations.iter().enumerate() {
        let pose = &poses[obs.pose];
        let p_cam = pose.transform_point(&points[obs.point]);
        if p_cam.z <= MIN_DEPTH {
            continue;
        }
        let Some(uv) = camera.project(&p_cam) else {
            continue;
        };
        let r = uv - obs.uv;
        let w = huber_weight(r.norm(), delta);
        let j_proj = camera.projection_jacobian(&p_cam);
        let j_point = j_proj * pose.rotation_matrix();

        system.hll[obs.point] += w * j_point.transpose() * j_point;
        system.bl[obs.point] -= w * j_point.transpose() * r;

        if let Some(c) = pose_param[obs.pose] {
            // Left perturbation: ∂p_cam/∂(ω, v) = [−[p_cam]×, I].
            let mut d_pcam = Matrix3x6::zeros();
            d_pcam.fixed_view_mut::<3, 3>(0, 0).copy_from(&(-skew(&p_cam)));
            d_pcam.fixed_view_mut::<3, 3>(0, 3).copy_from(&Matrix3::identity());
            let j_pose = j_proj * d_pcam;

            let mut block = system.hpp.fixed_view_mut::<6, 6>(6 * c, 6 * c);
            block += w * j_pose.transpose() * j_pose;
            let mut grad = system.bp.fixed_rows_mut::<6>(6 * c);
            grad -= w * j_pose.transpose() * r;
            system.hpl[k] = Some(w * j_pose.transpose() * j_point);
        }
    }
    system
}

/// Solve the damped system by eliminating point blocks.
fn solve_damped(
    system: &NormalEquations,
    problem: &BAProblemData,
    pose_param: &[Option<usize>],
    obs_by_point: &[Vec<usize>],
    num_cameras: usize,
    lambda: f64,
) -> Option<(DVector<f64>, Vec<Vector3<f64>>)> {
    let hll_inv: Vec<Matrix3<f64>> = system
        .hll
        .iter()
        .map(|h| {
            let mut damped = *h;
            for d in 0..3 {
                damped[(d, d)] += lambda * h[(d, d)].max(1e-6);
            }
            damped.try_inverse().unwrap_or_else(Matrix3::zeros)
        })
        .collect();

    let mut reduced = system.hpp.clone();
    for d in 0..6 * num_cameras {
        reduced[(d, d)] += lambda * system.hpp[(d, d)].max(1e-6);
    }
    let mut rhs = system.bp.clone();

    for (j, observations) in obs_by_point.iter().enumerate() {
        for &ka in observations {
            let (Some(h_a), Some(ca)) = (system.hpl[ka], pose_param[problem.observations[ka].pose]) else {
                continue;
            };
            let h_a_inv = h_a * hll_inv[j];
            let mut rhs_block = rhs.fixed_rows_mut::<6>(6 * ca);
            rhs_block -= h_a_inv * system.bl[j];
            for &kb in observations {
                let (Some(h_b), Some(cb)) = (system.hpl[kb], pose_param[problem.observations[kb].pose]) else {
                    continue;
                };
                let mut block = reduced.fixed_view_mut::<6, 6>(6 * ca, 6 * cb);
                block -= h_a_inv * h_b.transpose();
            }
        }
    }

    let dp = if num_cameras == 0 {
        DVector::zeros(0)
    } else {
        match reduced.clone().cholesky() {
            Some(chol) => chol.solve(&rhs),
            None => reduced.lu().solve(&rhs)?,
        }
    };
    if dp.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let dl: Vec<Vector3<f64>> = obs_by_point
        .iter()
        .enumerate()
        .map(|(j, observations)| {
            let mut b = system.bl[j];
            for &k in observations {
                if let (Some(h), Some(c)) = (system.hpl[k], pose_param[problem.observations[k].pose]) {
                    let step: Vector6<f64> = dp.fixed_rows::<6>(6 * c).into_owned();
                    b -= h.transpose() * step;
                }
            }
            hll_inv[j] * b
        })
        .collect();

    Some((dp, dl))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::UnitQuaternion;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn camera() -> CameraModel {
        CameraModel::new(500.0, 500.0, 320.0, 240.0)
    }

    /// Three cameras along x looking down +z at a cloud of points.
    fn synthetic_problem(pose_noise: f64, point_noise: f64, seed: u64) -> (BAProblemData, Vec<Vector3<f64>>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let cam = camera();
        let true_poses_wc: Vec<SE3> = (0..3)
            .map(|i| SE3::new(UnitQuaternion::identity(), Vector3::new(0.3 * i as f64, 0.0, 0.0)))
            .collect();
        let true_points: Vec<Vector3<f64>> = (0..40)
            .map(|_| Vector3::new(rng.gen_range(-1.0..1.5), rng.gen_range(-1.0..1.0), rng.gen_range(3.0..6.0)))
            .collect();

        let mut observations = Vec::new();
        for (i, pose) in true_poses_wc.iter().enumerate() {
            let pose_cw = pose.inverse();
            for (j, p) in true_points.iter().enumerate() {
                let uv = cam.project(&pose_cw.transform_point(p)).unwrap();
                observations.push(BAObservation { pose: i, point: j, uv });
            }
        }

        let poses_cw: Vec<SE3> = true_poses_wc
            .iter()
            .enumerate()
            .map(|(i, pose)| {
                let noisy = if i == 0 {
                    *pose
                } else {
                    SE3::new(
                        UnitQuaternion::from_scaled_axis(Vector3::new(0.0, pose_noise, 0.0)) * pose.rotation,
                        pose.translation + Vector3::new(pose_noise, -pose_noise, 0.0),
                    )
                };
                noisy.inverse()
            })
            .collect();
        let points = true_points
            .iter()
            .map(|p| {
                let mut jitter = || (rng.gen::<f64>() * 2.0 - 1.0) * point_noise;
                p + Vector3::new(jitter(), 0.0, jitter())
            })
            .collect();

        let problem = BAProblemData {
            keyframe_ids: (0..3).map(KeyFrameId::new).collect(),
            poses_cw,
            fixed: vec![true, false, false],
            map_point_ids: (0..40).map(MapPointId::new).collect(),
            points,
            observations,
        };
        (problem, true_points)
    }

    #[test]
    fn test_reduces_reprojection_error() {
        let (problem, _) = synthetic_problem(0.01, 0.05, 7);
        let result = solve(&problem, &camera(), &BundleAdjustmentConfig::default());

        assert!(result.report.initial_error > 1.0);
        assert!(result.report.final_error < 0.1 * result.report.initial_error);
        assert_eq!(result.report.num_keyframes, 2);
        assert_eq!(result.report.num_map_points, 40);
        assert_eq!(result.report.num_observations, 120);
    }

    #[test]
    fn test_fixed_pose_is_untouched() {
        let (problem, _) = synthetic_problem(0.01, 0.05, 8);
        let result = solve(&problem, &camera(), &BundleAdjustmentConfig::default());

        assert_eq!(result.poses_cw[0], problem.poses_cw[0]);
    }

    #[test]
    fn test_exact_problem_stays_put() {
        let (problem, truth) = synthetic_problem(0.0, 0.0, 9);
        let result = solve(&problem, &camera(), &BundleAdjustmentConfig::default());

        assert!(result.report.final_error <= result.report.initial_error);
        for (p, t) in result.points.iter().zip(&truth) {
            assert!((p - t).norm() < 1e-6);
        }
    }

    #[test]
    fn test_error_never_increases() {
        for seed in 0..5 {
            let (problem, _) = synthetic_problem(0.05, 0.3, seed);
            let config = BundleAdjustmentConfig {
                max_iterations: 3,
                ..BundleAdjustmentConfig::default()
            };
            let result = solve(&problem, &camera(), &config);
            assert!(result.report.final_error <= result.report.initial_error);
        }
    }
}
