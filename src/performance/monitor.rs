//! Rolling frame-time statistics.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::quality::QualityLevel;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub target_fps: f64,
    /// Frame times kept in the rolling window.
    pub window_size: usize,
    /// Below `degraded_ratio * target_fps` a warning is logged.
    pub degraded_ratio: f64,
    /// Minimum fraction of `target_fps` for a good status.
    pub good_ratio: f64,
    /// Average latency (ms) must stay below this for a good status.
    pub good_latency_ms: f64,
    pub adaptive_quality: bool,
    /// Fixed starting level; detected from the hardware when unset.
    pub initial_quality: Option<QualityLevel>,
    pub min_dwell_frames: u32,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            target_fps: 60.0,
            window_size: 60,
            degraded_ratio: 0.8,
            good_ratio: 0.9,
            good_latency_ms: 16.0,
            adaptive_quality: true,
            initial_quality: None,
            min_dwell_frames: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub average: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceStatus {
    Good,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub fps: f64,
    /// Frame processing time in milliseconds.
    pub latency: LatencyStats,
    /// Estimated bytes held by the sparse map.
    pub memory: usize,
    pub status: PerformanceStatus,
    pub quality: QualityLevel,
}

#[derive(Debug, Clone)]
pub struct PerformanceMonitor {
    config: PerformanceConfig,
    frame_times_ms: VecDeque<f64>,
}

impl PerformanceMonitor {
    pub fn new(config: PerformanceConfig) -> Self {
        Self {
            frame_times_ms: VecDeque::with_capacity(config.window_size.max(1)),
            config,
        }
    }

    pub fn config(&self) -> &PerformanceConfig {
        &self.config
    }

    pub fn num_samples(&self) -> usize {
        self.frame_times_ms.len()
    }

    /// Record one frame's processing time. Warns on every frame recorded
    /// while throughput is below the degradation threshold.
    pub fn record_frame(&mut self, elapsed_ms: f64) {
        if self.frame_times_ms.len() == self.config.window_size.max(1) {
            self.frame_times_ms.pop_front();
        }
        self.frame_times_ms.push_back(elapsed_ms);

        if self.is_degraded() {
            warn!(fps = self.fps(), target = self.config.target_fps, "Performance degraded");
        }
    }

    /// Throughput below `degraded_ratio * target_fps` (needs two samples).
    pub fn is_degraded(&self) -> bool {
        self.num_samples() >= 2 && self.fps() < self.config.degraded_ratio * self.config.target_fps
    }

    /// Throughput implied by the average frame time; 0 with fewer than two samples.
    pub fn fps(&self) -> f64 {
        if self.frame_times_ms.len() < 2 {
            return 0.0;
        }
        let average = self.latency().average;
        if average <= 0.0 {
            return 0.0;
        }
        1000.0 / average
    }

    pub fn latency(&self) -> LatencyStats {
        if self.frame_times_ms.is_empty() {
            return LatencyStats { average: 0.0, max: 0.0 };
        }
        let sum: f64 = self.frame_times_ms.iter().sum();
        let max = self.frame_times_ms.iter().copied().fold(f64::MIN, f64::max);
        LatencyStats {
            average: sum / self.frame_times_ms.len() as f64,
            max,
        }
    }

    pub fn report(&self, memory: usize, quality: QualityLevel) -> PerformanceReport {
        let fps = self.fps();
        let latency = self.latency();
        let status = if fps >= self.config.good_ratio * self.config.target_fps
            && latency.average < self.config.good_latency_ms
        {
            PerformanceStatus::Good
        } else {
            PerformanceStatus::Degraded
        };
        PerformanceReport {
            fps,
            latency,
            memory,
            status,
            quality,
        }
    }
}
