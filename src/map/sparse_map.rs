//! SparseMap - keyframes, map points and the covisibility graph.
//!
//! The map is an arena: keyframes and map points live in `Vec`s and their
//! ids are indices. Nothing is ever removed, so ids stay valid for the
//! lifetime of the map.
//!
//! Keyframe insertion is staged: the incoming features are classified
//! first and the map is only mutated once every decision has been made,
//! so a rejected keyframe leaves no trace.

use std::collections::{HashMap, HashSet};
use std::mem::size_of;

use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::MapError;
use crate::geometry::triangulation::{depth_in, max_parallax, point_at_depth, triangulate_views, View};
use crate::geometry::SE3;
use crate::loop_closing::{detect_loop_candidates, LoopCandidate, LoopClosure, LoopDetectorConfig};
use crate::optimizer::{self, BundleAdjustmentConfig, BundleAdjustmentReport};
use crate::tracking::feature::Feature;
use crate::tracking::frame::CameraModel;

use super::covisibility::CovisibilityGraph;
use super::keyframe::{FrameInfo, KeyFrame};
use super::map_point::{MapPoint, Observation};
use super::types::{KeyFrameId, MapPointId};

/// Map maintenance parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Minimum number of frames between keyframes.
    pub keyframe_frame_interval: u64,
    /// Translation (m) since the last keyframe that justifies a new one.
    pub min_translation: f64,
    /// Rotation (rad) since the last keyframe that justifies a new one.
    pub min_rotation: f64,
    /// Keyframes are covisible when they share more points than this.
    pub covisibility_min_shared: usize,
    /// Depth given to new points when nothing better is known.
    pub bootstrap_depth: f64,
    /// Minimum ray angle (degrees) for re-triangulating a point.
    pub min_parallax_deg: f64,
    pub loop_detection: LoopDetectorConfig,
    pub bundle_adjustment: BundleAdjustmentConfig,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            keyframe_frame_interval: 30,
            min_translation: 0.1,
            min_rotation: 0.2,
            covisibility_min_shared: 15,
            bootstrap_depth: 1.0,
            min_parallax_deg: 1.0,
            loop_detection: LoopDetectorConfig::default(),
            bundle_adjustment: BundleAdjustmentConfig::default(),
        }
    }
}

/// What a successful keyframe insertion changed.
#[derive(Debug, Clone)]
pub struct KeyFrameInsertion {
    pub keyframe_id: KeyFrameId,
    /// Map points created from untracked features.
    pub created: Vec<MapPointId>,
    /// Existing map points that gained an observation.
    pub updated: Vec<MapPointId>,
    pub loop_candidate: Option<LoopCandidate>,
    /// Set when a loop candidate triggered bundle adjustment.
    pub bundle_adjustment: Option<BundleAdjustmentReport>,
}

/// Per-feature decision made while staging an insertion.
enum Staged {
    Observe(MapPointId),
    Create,
}

pub struct SparseMap {
    camera: CameraModel,
    config: MapConfig,
    keyframes: Vec<KeyFrame>,
    map_points: Vec<MapPoint>,
    covisibility: CovisibilityGraph,
    loop_candidates: Vec<LoopCandidate>,
}

impl SparseMap {
    pub fn new(camera: CameraModel, config: MapConfig) -> Self {
        let covisibility = CovisibilityGraph::new(config.covisibility_min_shared);
        Self {
            camera,
            config,
            keyframes: Vec::new(),
            map_points: Vec::new(),
            covisibility,
            loop_candidates: Vec::new(),
        }
    }

    /// Rebuild a map from restored keyframes and points.
    ///
    /// Observations are derived from `keyframe.map_point_ids` (feature
    /// indices are list positions) and the covisibility graph is replayed
    /// in keyframe order. Ids must already be validated as dense.
    pub(crate) fn from_parts(
        camera: CameraModel,
        config: MapConfig,
        keyframes: Vec<KeyFrame>,
        mut map_points: Vec<MapPoint>,
    ) -> Self {
        for kf in &keyframes {
            for (i, mp_id) in kf.map_point_ids.iter().enumerate() {
                map_points[mp_id.index()].add_observation(kf.id, i);
            }
        }
        let mut map = Self {
            covisibility: CovisibilityGraph::new(config.covisibility_min_shared),
            camera,
            config,
            keyframes,
            map_points,
            loop_candidates: Vec::new(),
        };
        for i in 0..map.keyframes.len() {
            let id = map.keyframes[i].id;
            map.update_covisibility(id, |other| other < id);
        }
        map
    }

    // --- Accessors ---

    pub fn camera(&self) -> &CameraModel {
        &self.camera
    }

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    pub fn keyframes(&self) -> &[KeyFrame] {
        &self.keyframes
    }

    pub fn map_points(&self) -> &[MapPoint] {
        &self.map_points
    }

    pub fn keyframe(&self, id: KeyFrameId) -> Option<&KeyFrame> {
        self.keyframes.get(id.index())
    }

    pub fn map_point(&self, id: MapPointId) -> Option<&MapPoint> {
        self.map_points.get(id.index())
    }

    pub fn last_keyframe(&self) -> Option<&KeyFrame> {
        self.keyframes.last()
    }

    pub fn num_keyframes(&self) -> usize {
        self.keyframes.len()
    }

    pub fn num_map_points(&self) -> usize {
        self.map_points.len()
    }

    pub fn covisibility(&self) -> &CovisibilityGraph {
        &self.covisibility
    }

    pub fn covisibility_weight(&self, a: KeyFrameId, b: KeyFrameId) -> Option<usize> {
        self.covisibility.weight(a, b)
    }

    /// Covisible neighbors of `id`, strongest first.
    pub fn neighbors(&self, id: KeyFrameId) -> Vec<(KeyFrameId, usize)> {
        self.covisibility.neighbors(id)
    }

    /// Loop candidates recorded so far, oldest first.
    pub fn loop_candidates(&self) -> &[LoopCandidate] {
        &self.loop_candidates
    }

    pub fn set_keyframe_interval(&mut self, frames: u64) {
        self.config.keyframe_frame_interval = frames;
    }

    /// Number of map points each other keyframe shares with `id`.
    pub fn shared_map_point_counts(&self, id: KeyFrameId) -> HashMap<KeyFrameId, usize> {
        let mut counts: HashMap<KeyFrameId, usize> = HashMap::new();
        let Some(kf) = self.keyframe(id) else {
            return counts;
        };
        for mp_id in &kf.map_point_ids {
            let Some(mp) = self.map_point(*mp_id) else {
                continue;
            };
            let observers: HashSet<KeyFrameId> = mp
                .observations
                .iter()
                .map(|o| o.keyframe_id)
                .filter(|&other| other != id)
                .collect();
            for other in observers {
                *counts.entry(other).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Rough heap footprint of the map contents.
    pub fn estimated_memory_bytes(&self) -> usize {
        let keyframes: usize = self
            .keyframes
            .iter()
            .map(|kf| {
                size_of::<KeyFrame>()
                    + kf.features.capacity() * size_of::<Feature>()
                    + kf.map_point_ids.capacity() * size_of::<MapPointId>()
            })
            .sum();
        let points: usize = self
            .map_points
            .iter()
            .map(|mp| size_of::<MapPoint>() + mp.observations.capacity() * size_of::<Observation>())
            .sum();
        let edges = self.covisibility.num_edges() * (size_of::<(KeyFrameId, KeyFrameId, usize)>() + 2 * size_of::<KeyFrameId>());
        keyframes + points + edges
    }

    // --- Keyframe insertion ---

    /// Whether a frame at `frame_index` with pose `pose` (T_wc) qualifies as
    /// a keyframe: the first frame always does; later frames need the frame
    /// interval to have elapsed and enough motion since the last keyframe.
    pub fn should_insert_keyframe(&self, frame_index: u64, pose: &SE3) -> bool {
        let Some(last) = self.keyframes.last() else {
            return true;
        };
        let elapsed = frame_index.saturating_sub(last.frame_index);
        if elapsed < self.config.keyframe_frame_interval.max(1) {
            return false;
        }
        pose.translation_distance(&last.pose) > self.config.min_translation
            || pose.rotation_angle_to(&last.pose) > self.config.min_rotation
    }

    /// Insert a keyframe if the policy allows it.
    ///
    /// Tracked features become observations of their map points; untracked
    /// ones create new points along their viewing rays at the median depth
    /// of the observed points. New `track_id`s are written back into
    /// `features`. Returns `None`, with nothing changed, when the frame does
    /// not qualify.
    pub fn add_keyframe(&mut self, frame: FrameInfo, features: &mut [Feature], pose: SE3) -> Option<KeyFrameInsertion> {
        if !self.should_insert_keyframe(frame.index, &pose) {
            return None;
        }
        let keyframe_id = KeyFrameId::new(self.keyframes.len() as u32);

        // Stage: decide what happens to every feature.
        let mut seen: HashSet<MapPointId> = HashSet::new();
        let staged: Vec<Staged> = features
            .iter()
            .map(|f| match f.track_id {
                Some(mp_id) if mp_id.index() < self.map_points.len() => {
                    if seen.insert(mp_id) {
                        Staged::Observe(mp_id)
                    } else {
                        Staged::Create
                    }
                }
                Some(mp_id) => {
                    debug_assert!(false, "feature references unknown map point {mp_id}");
                    warn!(%mp_id, "Dropping observation of unknown map point");
                    Staged::Create
                }
                None => Staged::Create,
            })
            .collect();

        // Commit.
        let mut updated = Vec::new();
        let mut fresh = Vec::new();
        for (i, decision) in staged.iter().enumerate() {
            match decision {
                Staged::Observe(mp_id) => {
                    self.map_points[mp_id.index()].add_observation(keyframe_id, i);
                    updated.push(*mp_id);
                }
                Staged::Create => {
                    features[i].track_id = None;
                    fresh.push(i);
                }
            }
        }
        self.keyframes.push(KeyFrame {
            id: keyframe_id,
            timestamp_ns: frame.timestamp_ns,
            frame_index: frame.index,
            pose,
            features: features.to_vec(),
            map_point_ids: updated.clone(),
        });

        for &mp_id in &updated {
            self.retriangulate(mp_id);
        }

        let depth = self.reference_depth(&pose, &updated);
        let mut created = Vec::with_capacity(fresh.len());
        for &i in &fresh {
            let mp_id = MapPointId::new(self.map_points.len() as u32);
            let normalized = self.camera.unproject(&features[i].uv()).xy();
            let mut mp = MapPoint::new(mp_id, point_at_depth(&pose, &normalized, depth), features[i].descriptor, keyframe_id);
            mp.add_observation(keyframe_id, i);
            self.map_points.push(mp);
            features[i].track_id = Some(mp_id);
            created.push(mp_id);
        }
        let kf = &mut self.keyframes[keyframe_id.index()];
        kf.features.clone_from_slice(features);
        kf.map_point_ids.extend_from_slice(&created);

        self.update_covisibility(keyframe_id, |_| true);

        debug!(
            %keyframe_id,
            created = created.len(),
            updated = updated.len(),
            depth,
            "Inserted keyframe"
        );

        let loop_candidate = detect_loop_candidates(self, keyframe_id, &self.config.loop_detection)
            .into_iter()
            .next();
        let bundle_adjustment = match &loop_candidate {
            Some(candidate) => {
                info!(
                    current = %candidate.current_keyframe_id,
                    candidate = %candidate.candidate_keyframe_id,
                    similarity = candidate.similarity,
                    "Loop candidate detected"
                );
                self.loop_candidates.push(candidate.clone());
                self.optimize_bundle()
            }
            None => None,
        };

        Some(KeyFrameInsertion {
            keyframe_id,
            created,
            updated,
            loop_candidate,
            bundle_adjustment,
        })
    }

    /// Write covisibility edges between `id` and the keyframes accepted by `filter`.
    fn update_covisibility(&mut self, id: KeyFrameId, filter: impl Fn(KeyFrameId) -> bool) {
        let mut shared: Vec<(KeyFrameId, usize)> = self
            .shared_map_point_counts(id)
            .into_iter()
            .filter(|(other, _)| filter(*other))
            .collect();
        shared.sort();
        for (other, count) in shared {
            self.covisibility.update_edge(id, other, count);
        }
    }

    /// Median depth of `observed` points in front of `pose`, else the bootstrap depth.
    fn reference_depth(&self, pose: &SE3, observed: &[MapPointId]) -> f64 {
        let mut depths: Vec<f64> = observed
            .iter()
            .filter_map(|id| self.map_point(*id))
            .map(|mp| depth_in(pose, &mp.position))
            .filter(|d| d.is_finite() && *d > 0.0)
            .collect();
        if depths.is_empty() {
            return self.config.bootstrap_depth;
        }
        depths.sort_by(f64::total_cmp);
        depths[depths.len() / 2]
    }

    /// Pixel observations of a map point as triangulation views.
    fn views_of(&self, mp: &MapPoint) -> Vec<(View, Vector2<f64>)> {
        mp.observations
            .iter()
            .filter_map(|obs| {
                let kf = self.keyframe(obs.keyframe_id)?;
                let uv = kf.features.get(obs.feature_index)?.uv();
                let normalized = self.camera.unproject(&uv).xy();
                Some((View { pose: kf.pose, normalized }, uv))
            })
            .collect()
    }

    /// Re-triangulate from all observations when the rays are far enough
    /// apart and the new position reprojects better than the old one.
    fn retriangulate(&mut self, mp_id: MapPointId) {
        let Some(mp) = self.map_point(mp_id) else {
            return;
        };
        let observed = self.views_of(mp);
        if observed.len() < 2 {
            return;
        }
        let views: Vec<View> = observed.iter().map(|(v, _)| *v).collect();
        let Some(candidate) = triangulate_views(&views) else {
            return;
        };
        if max_parallax(&views, &candidate).to_degrees() <= self.config.min_parallax_deg {
            return;
        }

        let error = |p: &Vector3<f64>| -> f64 {
            observed
                .iter()
                .map(|(v, uv)| {
                    self.camera
                        .reprojection_error(&v.pose.inverse(), p, uv)
                        .powi(2)
                })
                .sum()
        };
        if error(&candidate) < error(&mp.position) {
            self.map_points[mp_id.index()].position = candidate;
        }
    }

    // --- Loop closure and optimization ---

    /// Relative transform from the most recent loop keyframe to `current_pose`.
    pub fn detect_loop_closure(&self, current_pose: &SE3) -> Option<LoopClosure> {
        let candidate = self.loop_candidates.last()?;
        let loop_kf = self.keyframe(candidate.candidate_keyframe_id)?;
        Some(LoopClosure {
            current_keyframe_id: candidate.current_keyframe_id,
            loop_keyframe_id: candidate.candidate_keyframe_id,
            similarity: candidate.similarity,
            transform: loop_kf.pose.inverse() * *current_pose,
        })
    }

    /// Bundle-adjust the most recent keyframes and the points they observe.
    ///
    /// Points left out of the problem (a single usable observation) move
    /// rigidly with the keyframe observing them, `p' = T_new · T_old⁻¹ · p`.
    /// If the map-wide reprojection error still rose, every change is
    /// rolled back. Returns `None` when there is nothing to optimize.
    pub fn optimize_bundle(&mut self) -> Option<BundleAdjustmentReport> {
        let config = self.config.bundle_adjustment.clone();
        let problem = optimizer::collect_problem(self, &config)?;
        let result = optimizer::solve(&problem, &self.camera, &config);
        let error_before = self.total_reprojection_error();

        let mut old_poses: Vec<(KeyFrameId, SE3)> = Vec::new();
        let mut corrections: HashMap<KeyFrameId, SE3> = HashMap::new();
        for ((id, pose_cw), fixed) in problem.keyframe_ids.iter().zip(&result.poses_cw).zip(&problem.fixed) {
            if *fixed {
                continue;
            }
            let kf = &mut self.keyframes[id.index()];
            let pose = pose_cw.inverse();
            corrections.insert(*id, pose * kf.pose.inverse());
            old_poses.push((*id, kf.pose));
            kf.pose = pose;
        }

        let mut old_positions: Vec<(MapPointId, Vector3<f64>)> = Vec::new();
        let optimized: HashSet<MapPointId> = problem.map_point_ids.iter().copied().collect();
        for (id, position) in problem.map_point_ids.iter().zip(&result.points) {
            let mp = &mut self.map_points[id.index()];
            old_positions.push((*id, mp.position));
            mp.position = *position;
        }
        let keyframes = &self.keyframes;
        for mp in self.map_points.iter_mut().filter(|mp| !optimized.contains(&mp.id)) {
            // Follow the keyframe holding the point's usable observation.
            let correction = mp.observations.iter().find_map(|obs| {
                let correction = corrections.get(&obs.keyframe_id)?;
                keyframes[obs.keyframe_id.index()].features.get(obs.feature_index)?;
                Some(correction)
            });
            if let Some(correction) = correction {
                old_positions.push((mp.id, mp.position));
                mp.position = correction.transform_point(&mp.position);
            }
        }

        let mut report = result.report;
        let error_after = self.total_reprojection_error();
        if error_after > error_before {
            debug!(error_before, error_after, "Map error rose after bundle adjustment, rolling back");
            for (id, pose) in old_poses {
                self.keyframes[id.index()].pose = pose;
            }
            for (id, position) in old_positions {
                self.map_points[id.index()].position = position;
            }
            report.final_error = report.initial_error;
        }

        info!(
            iterations = report.iterations,
            initial_error = report.initial_error,
            final_error = report.final_error,
            keyframes = report.num_keyframes,
            points = report.num_map_points,
            "Bundle adjustment finished"
        );
        Some(report)
    }

    /// Sum of squared reprojection errors over every observation with a
    /// feature and a point in front of the camera.
    pub fn total_reprojection_error(&self) -> f64 {
        self.map_points
            .iter()
            .flat_map(|mp| {
                self.views_of(mp).into_iter().map(move |(view, uv)| {
                    self.camera
                        .project(&view.pose.inverse().transform_point(&mp.position))
                        .map_or(0.0, |proj| (proj - uv).norm_squared())
                })
            })
            .sum()
    }

    /// Check that ids are dense and every keyframe references known points.
    pub fn validate(&self) -> Result<(), MapError> {
        for (i, kf) in self.keyframes.iter().enumerate() {
            if kf.id.index() != i {
                return Err(MapError::NonSequentialId {
                    expected: i as u32,
                    found: kf.id.0,
                });
            }
            for mp_id in &kf.map_point_ids {
                if mp_id.index() >= self.map_points.len() {
                    return Err(MapError::UnknownMapPoint {
                        keyframe: kf.id,
                        map_point: *mp_id,
                    });
                }
            }
        }
        for (i, mp) in self.map_points.iter().enumerate() {
            if mp.id.index() != i {
                return Err(MapError::NonSequentialId {
                    expected: i as u32,
                    found: mp.id.0,
                });
            }
        }
        Ok(())
    }
}
