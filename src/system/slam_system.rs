//! SlamPipeline - per-frame orchestration.
//!
//! Runs on the caller's thread and owns every stage. Only feature
//! extraction may be handed to the worker pool:
//!
//! ```text
//! frame → extract → track vs previous frame → merge
//!       → (not Ok: search map points by projection)
//!       → RANSAC PnP vs map → drop outliers → fuse with sensors
//!       → keyframe insertion (map points, covisibility, loop, BA)
//!       → monitor → quality controller
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use image::GrayImage;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::config::SlamConfig;
use crate::error::FrameError;
use crate::geometry::SE3;
use crate::map::{FrameInfo, SparseMap};
use crate::performance::{PerformanceMonitor, PerformanceReport, QualityController, QualityLevel};
use crate::sensors::{SensorFusion, SensorReading};
use crate::tracking::frame::{CameraFrame, CameraModel};
use crate::tracking::pose_estimation::estimate_frame_pose;
use crate::tracking::{
    merge_detections, reacquire_features, Feature, FeatureExtractor, FeatureTracker, FrameOutput, SlamEvent, TrackingState,
};

use super::worker_pool::WorkerPool;

/// What the next frame is tracked against.
struct PreviousFrame {
    image: Arc<GrayImage>,
    features: Vec<Feature>,
}

pub struct SlamPipeline {
    config: SlamConfig,
    extractor: FeatureExtractor,
    tracker: FeatureTracker,
    map: SparseMap,
    fusion: SensorFusion,
    monitor: PerformanceMonitor,
    quality: QualityController,
    workers: Option<WorkerPool>,
    rng: StdRng,

    state: TrackingState,
    next_frame_index: u64,
    previous: Option<PreviousFrame>,
    last_pose: SE3,
    consecutive_failures: u32,
}

impl SlamPipeline {
    pub fn new(config: SlamConfig, camera: CameraModel) -> Self {
        let map = SparseMap::new(camera, config.map.clone());
        Self::with_map(config, map)
    }

    /// Resume on a restored map.
    ///
    /// Tracking starts `NotInitialized` at the last keyframe's pose and
    /// finds the map again by projection. Frame indices continue after the
    /// last keyframe.
    pub fn with_map(config: SlamConfig, map: SparseMap) -> Self {
        let last_pose = map.last_keyframe().map_or_else(SE3::identity, |kf| kf.pose);
        let next_frame_index = map.last_keyframe().map_or(0, |kf| kf.frame_index + 1);
        let level = config.performance.initial_quality.unwrap_or_else(QualityLevel::detect);
        let rng = match config.ransac.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut pipeline = Self {
            extractor: FeatureExtractor::new(config.extractor),
            tracker: FeatureTracker::new(config.tracker.clone()),
            map,
            fusion: SensorFusion::new(config.fusion.clone()),
            monitor: PerformanceMonitor::new(config.performance.clone()),
            quality: QualityController::new(level, config.performance.min_dwell_frames),
            workers: None,
            rng,
            state: TrackingState::NotInitialized,
            next_frame_index,
            previous: None,
            last_pose,
            consecutive_failures: 0,
            config,
        };
        pipeline.apply_quality(level);
        info!(
            quality = ?level,
            keyframes = pipeline.map.num_keyframes(),
            map_points = pipeline.map.num_map_points(),
            "SLAM pipeline ready"
        );
        pipeline
    }

    // --- Accessors ---

    pub fn map(&self) -> &SparseMap {
        &self.map
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    pub fn quality_level(&self) -> QualityLevel {
        self.quality.level()
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    /// Workers currently running (0 when extracting synchronously).
    pub fn worker_count(&self) -> usize {
        self.workers.as_ref().map_or(0, WorkerPool::worker_count)
    }

    pub fn performance_report(&self) -> PerformanceReport {
        self.monitor.report(self.map.estimated_memory_bytes(), self.quality.level())
    }

    pub fn push_sensor(&mut self, reading: SensorReading) {
        self.fusion.push(reading);
    }

    pub fn save_map(&self, path: impl AsRef<Path>) -> Result<()> {
        self.map.save(path)
    }

    /// Stop the worker pool. Later frames are extracted synchronously.
    pub fn shutdown(&mut self) {
        if let Some(mut pool) = self.workers.take() {
            pool.shutdown();
        }
    }

    // --- Per-frame processing ---

    /// Process one camera frame.
    ///
    /// Only a malformed buffer is an error, and it is rejected before any
    /// state changes. Tracking failures are reported through
    /// [`FrameOutput::state`] with the last good pose held.
    pub fn process_frame(&mut self, frame: CameraFrame) -> Result<FrameOutput, FrameError> {
        let start = Instant::now();
        let timestamp_ns = frame.timestamp_ns;
        let image = Arc::new(frame.into_gray()?);
        let frame_index = self.next_frame_index;
        self.next_frame_index += 1;

        let detections = self.extract(frame_index, &image);
        let tracked = match &self.previous {
            Some(previous) => {
                let carried: Vec<Feature> = previous.features.iter().filter(|f| f.is_tracked()).cloned().collect();
                self.tracker.track(&carried, &previous.image, &image)
            }
            None => Vec::new(),
        };
        let min_distance = self.extractor.params().grid_size as f64 / 2.0;
        let mut features = merge_detections(tracked, detections, min_distance, self.extractor.params().max_features);

        let mut num_inliers = 0;
        let pose = if self.map.num_keyframes() == 0 {
            SE3::identity()
        } else {
            if self.state != TrackingState::Ok {
                let found = reacquire_features(&mut features, &self.map, &self.last_pose, &self.config.reacquire);
                debug!(frame = frame_index, found, "Searched map points by projection");
            }
            match estimate_frame_pose(&features, &self.map, &self.config.ransac, &mut self.rng) {
                Ok(estimate) => {
                    num_inliers = estimate.inlier_features.len();
                    drop_outliers(&mut features, &estimate.outlier_features);
                    self.consecutive_failures = 0;
                    self.state = TrackingState::Ok;
                    self.fusion.fuse(&estimate.pose, timestamp_ns)
                }
                Err(lost) => {
                    self.consecutive_failures += 1;
                    self.state = self.state.after_failure(self.consecutive_failures, self.config.lost_after_frames);
                    debug!(frame = frame_index, reason = %lost, state = ?self.state, "Holding last pose");
                    self.last_pose
                }
            }
        };
        let num_tracked = features.iter().filter(|f| f.is_tracked()).count();

        let mut output = FrameOutput {
            frame_index,
            timestamp_ns,
            pose,
            state: self.state,
            keyframe_id: None,
            created_points: Vec::new(),
            updated_points: Vec::new(),
            events: Vec::new(),
            num_features: features.len(),
            num_tracked,
            num_inliers,
        };

        let can_insert = self.map.num_keyframes() == 0 || self.state == TrackingState::Ok;
        if can_insert {
            let info = FrameInfo {
                index: frame_index,
                timestamp_ns,
            };
            if let Some(insertion) = self.map.add_keyframe(info, &mut features, pose) {
                self.state = TrackingState::Ok;
                output.state = self.state;
                output.keyframe_id = Some(insertion.keyframe_id);
                if insertion.loop_candidate.is_some() {
                    if let Some(closure) = self.map.detect_loop_closure(&pose) {
                        output.events.push(SlamEvent::LoopClosure(closure));
                    }
                }
                if let Some(report) = insertion.bundle_adjustment {
                    output.events.push(SlamEvent::BundleAdjusted(report));
                }
                output.created_points = insertion.created;
                output.updated_points = insertion.updated;
            }
        }

        self.last_pose = pose;
        self.previous = Some(PreviousFrame { image, features });

        self.monitor.record_frame(start.elapsed().as_secs_f64() * 1000.0);
        self.adapt_quality();

        Ok(output)
    }

    /// Extract on the worker pool if possible, synchronously otherwise.
    fn extract(&self, frame_index: u64, image: &Arc<GrayImage>) -> Vec<Feature> {
        let params = *self.extractor.params();
        let timeout = Duration::from_millis(self.config.workers.result_timeout_ms);
        if let Some(pool) = &self.workers {
            if pool.try_submit(frame_index, Arc::clone(image), params) {
                if let Some(features) = pool.wait_for(frame_index, timeout) {
                    return features;
                }
            }
            warn!(frame = frame_index, "Falling back to synchronous extraction");
        }
        self.extractor.extract(image)
    }

    fn adapt_quality(&mut self) {
        if !self.config.performance.adaptive_quality || self.monitor.num_samples() < 2 {
            return;
        }
        let fps = self.monitor.fps();
        let latency = self.monitor.latency().average;
        if let Some(level) = self.quality.update(fps, latency) {
            self.apply_quality(level);
        }
    }

    /// Push a quality profile to the extractor, the map and the worker pool.
    fn apply_quality(&mut self, level: QualityLevel) {
        let profile = level.profile();
        let mut params = *self.extractor.params();
        params.max_features = profile.max_features;
        params.grid_size = profile.grid_size;
        params.use_accelerated_path = profile.use_accelerated_path;
        self.extractor.set_params(params);
        self.map.set_keyframe_interval(profile.keyframe_frame_interval);

        if !self.config.workers.enabled || self.worker_count() == profile.worker_count {
            return;
        }
        self.shutdown();
        match WorkerPool::new(profile.worker_count, self.config.workers.queue_capacity) {
            Ok(pool) => self.workers = Some(pool),
            Err(e) => warn!("Extracting synchronously, worker pool unavailable: {:#}", e),
        }
    }
}

/// Remove the features at `outliers`, keeping the order of the rest.
fn drop_outliers(features: &mut Vec<Feature>, outliers: &[usize]) {
    if outliers.is_empty() {
        return;
    }
    let mut keep = vec![true; features.len()];
    for &i in outliers {
        if let Some(flag) = keep.get_mut(i) {
            *flag = false;
        }
    }
    let mut flags = keep.into_iter();
    features.retain(|_| flags.next().unwrap_or(true));
}

impl Drop for SlamPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
