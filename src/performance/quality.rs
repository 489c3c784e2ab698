//! Adaptive quality levels.
//!
//! Each level binds the extractor budget, keyframe spacing and worker count.
//! The controller picks a level from measured throughput and latency:
//!
//! | condition                          | level  |
//! |------------------------------------|--------|
//! | fps < 30 or latency > 32 ms        | Low    |
//! | fps < 45 or latency > 20 ms        | Medium |
//! | fps >= 50 and latency < 16 ms      | High   |
//! | otherwise                          | hold   |

use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    High,
    Medium,
    Low,
}

/// Parameters bound to a [`QualityLevel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityProfile {
    pub max_features: usize,
    pub grid_size: u32,
    pub keyframe_frame_interval: u64,
    pub use_accelerated_path: bool,
    pub worker_count: usize,
}

impl QualityLevel {
    pub fn profile(self) -> QualityProfile {
        match self {
            Self::High => QualityProfile {
                max_features: 8000,
                grid_size: 15,
                keyframe_frame_interval: 30,
                use_accelerated_path: true,
                worker_count: 2,
            },
            Self::Medium => QualityProfile {
                max_features: 4000,
                grid_size: 20,
                keyframe_frame_interval: 45,
                use_accelerated_path: true,
                worker_count: 1,
            },
            Self::Low => QualityProfile {
                max_features: 2000,
                grid_size: 30,
                keyframe_frame_interval: 60,
                use_accelerated_path: false,
                worker_count: 1,
            },
        }
    }

    /// Starting level for a device with `threads` hardware threads.
    pub fn from_hardware_threads(threads: usize) -> Self {
        match threads {
            t if t >= 4 => Self::High,
            t if t >= 2 => Self::Medium,
            _ => Self::Low,
        }
    }

    /// Starting level for this machine.
    pub fn detect() -> Self {
        let threads = std::thread::available_parallelism().map_or(1, |n| n.get());
        Self::from_hardware_threads(threads)
    }
}

#[derive(Debug, Clone)]
pub struct QualityController {
    level: QualityLevel,
    /// Updates that must pass after a transition before the next one.
    min_dwell_frames: u32,
    updates_since_change: u32,
}

impl QualityController {
    pub fn new(level: QualityLevel, min_dwell_frames: u32) -> Self {
        Self {
            level,
            min_dwell_frames,
            updates_since_change: min_dwell_frames,
        }
    }

    pub fn level(&self) -> QualityLevel {
        self.level
    }

    /// Feed one measurement. Returns the new level on a transition.
    pub fn update(&mut self, fps: f64, latency_ms: f64) -> Option<QualityLevel> {
        let target = if fps < 30.0 || latency_ms > 32.0 {
            QualityLevel::Low
        } else if fps < 45.0 || latency_ms > 20.0 {
            QualityLevel::Medium
        } else if fps >= 50.0 && latency_ms < 16.0 {
            QualityLevel::High
        } else {
            self.level
        };

        if target == self.level || self.updates_since_change < self.min_dwell_frames {
            self.updates_since_change = self.updates_since_change.saturating_add(1);
            return None;
        }

        info!(from = ?self.level, to = ?target, fps, latency_ms, "Quality level changed");
        self.level = target;
        self.updates_since_change = 0;
        Some(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poor_performance_drops_to_low_at_once() {
        let mut controller = QualityController::new(QualityLevel::High, 0);
        assert_eq!(controller.update(25.0, 40.0), Some(QualityLevel::Low));
        assert_eq!(controller.level(), QualityLevel::Low);
    }

    #[test]
    fn test_good_performance_climbs_to_high_at_once() {
        let mut controller = QualityController::new(QualityLevel::Low, 0);
        assert_eq!(controller.update(55.0, 10.0), Some(QualityLevel::High));
    }

    #[test]
    fn test_bands() {
        let mut controller = QualityController::new(QualityLevel::High, 0);
        assert_eq!(controller.update(40.0, 10.0), Some(QualityLevel::Medium));
        assert_eq!(controller.update(60.0, 25.0), None);
        // Between bands: hold.
        assert_eq!(controller.update(47.0, 15.0), None);
        assert_eq!(controller.level(), QualityLevel::Medium);
        assert_eq!(controller.update(60.0, 40.0), Some(QualityLevel::Low));
    }

    #[test]
    fn test_min_dwell_suppresses_flapping() {
        let mut controller = QualityController::new(QualityLevel::High, 3);
        assert_eq!(controller.update(25.0, 40.0), Some(QualityLevel::Low));
        assert_eq!(controller.update(55.0, 10.0), None);
        assert_eq!(controller.update(55.0, 10.0), None);
        assert_eq!(controller.update(55.0, 10.0), None);
        assert_eq!(controller.update(55.0, 10.0), Some(QualityLevel::High));
    }

    #[test]
    fn test_profiles_and_initial_level() {
        assert_eq!(QualityLevel::High.profile().max_features, 8000);
        assert_eq!(QualityLevel::Medium.profile().grid_size, 20);
        assert!(!QualityLevel::Low.profile().use_accelerated_path);
        assert_eq!(QualityLevel::from_hardware_threads(8), QualityLevel::High);
        assert_eq!(QualityLevel::from_hardware_threads(2), QualityLevel::Medium);
        assert_eq!(QualityLevel::from_hardware_threads(1), QualityLevel::Low);
    }
}
