//! A directory of image files replayed as a camera stream.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::tracking::frame::CameraFrame;

const EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Image files of a directory, sorted by file name.
#[derive(Debug, Clone)]
pub struct ImageSequence {
    paths: Vec<PathBuf>,
}

impl ImageSequence {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).with_context(|| format!("Failed to read directory {}", dir.display()))?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
            if is_image {
                paths.push(path);
            }
        }
        if paths.is_empty() {
            bail!("No png/jpg images in {}", dir.display());
        }
        paths.sort();
        Ok(Self { paths })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Decode frame `idx` as grayscale, timestamped at `idx / fps`.
    pub fn frame(&self, idx: usize, fps: f64) -> Result<CameraFrame> {
        let path = self.paths.get(idx).with_context(|| format!("No frame at index {}", idx))?;
        let image = image::open(path)
            .with_context(|| format!("Failed to read image {}", path.display()))?
            .to_luma8();
        let timestamp_ns = (idx as f64 / fps.max(f64::EPSILON) * 1e9).round() as u64;
        Ok(CameraFrame::from_gray(image, timestamp_ns))
    }
}
