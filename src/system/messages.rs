//! Messages exchanged with extraction workers.

use std::sync::Arc;

use image::GrayImage;

use crate::tracking::extractor::ExtractorParams;
use crate::tracking::feature::Feature;

/// Request sent to a worker. The image is shared, not copied.
#[derive(Debug, Clone)]
pub enum WorkerRequest {
    Extract {
        frame_index: u64,
        image: Arc<GrayImage>,
        params: ExtractorParams,
    },
    Shutdown,
}

/// Reply from a worker, tagged with the frame it belongs to.
#[derive(Debug, Clone)]
pub enum WorkerResponse {
    Extracted {
        frame_index: u64,
        features: Vec<Feature>,
        elapsed_ms: f64,
    },
    Failed {
        frame_index: u64,
        reason: String,
    },
}

impl WorkerResponse {
    pub fn frame_index(&self) -> u64 {
        match self {
            Self::Extracted { frame_index, .. } | Self::Failed { frame_index, .. } => *frame_index,
        }
    }
}
