//! Pipeline configuration.
//!
//! Every section has defaults and `#[serde(default)]`, so a YAML file only
//! needs the values it changes:
//!
//! ```yaml
//! performance:
//!   initial_quality: medium
//! map:
//!   bundle_adjustment:
//!     max_iterations: 5
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::geometry::RansacConfig;
use crate::map::MapConfig;
use crate::performance::PerformanceConfig;
use crate::sensors::FusionConfig;
use crate::system::WorkerConfig;
use crate::tracking::{ExtractorParams, ReacquireConfig, TrackerConfig};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Calibration YAML; default intrinsics are derived from the first frame when unset.
    pub calibration_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlamConfig {
    pub camera: CameraConfig,
    /// `max_features`, `grid_size` and `use_accelerated_path` are overridden
    /// by the active quality level.
    pub extractor: ExtractorParams,
    pub tracker: TrackerConfig,
    /// Search by projection while tracking is not `Ok`.
    pub reacquire: ReacquireConfig,
    pub ransac: RansacConfig,
    /// `keyframe_frame_interval` is overridden by the active quality level.
    pub map: MapConfig,
    pub performance: PerformanceConfig,
    pub fusion: FusionConfig,
    pub workers: WorkerConfig,
    /// Consecutive failed frames before `RecentlyLost` becomes `Lost`.
    pub lost_after_frames: u32,
}

impl Default for SlamConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            extractor: ExtractorParams::default(),
            tracker: TrackerConfig::default(),
            reacquire: ReacquireConfig::default(),
            ransac: RansacConfig::default(),
            map: MapConfig::default(),
            performance: PerformanceConfig::default(),
            fusion: FusionConfig::default(),
            workers: WorkerConfig::default(),
            lost_after_frames: 10,
        }
    }
}

impl SlamConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("Failed to open config {}", path.display()))?;
        serde_yaml::from_reader(BufReader::new(file)).with_context(|| format!("Failed to parse config {}", path.display()))
    }
}
