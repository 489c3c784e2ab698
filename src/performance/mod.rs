//! Throughput monitoring and adaptive quality control.

pub mod monitor;
pub mod quality;

pub use monitor::{LatencyStats, PerformanceConfig, PerformanceMonitor, PerformanceReport, PerformanceStatus};
pub use quality::{QualityController, QualityLevel, QualityProfile};
