//! Feature extraction worker pool.
//!
//! Workers pull [`WorkerRequest`]s from a bounded channel and push
//! [`WorkerResponse`]s back. Submission never blocks: when the queue is
//! full the caller extracts synchronously instead. Results for frames the
//! caller has given up on are discarded by `frame_index`.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use image::GrayImage;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::tracking::extractor::{extract_features, ExtractorParams};
use crate::tracking::feature::Feature;

use super::messages::{WorkerRequest, WorkerResponse};

/// Poll interval of idle workers (allows shutdown checks).
const RECV_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub enabled: bool,
    /// Pending requests accepted before submission falls back.
    pub queue_capacity: usize,
    /// How long to wait for a result before extracting synchronously (ms).
    pub result_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: 2,
            result_timeout_ms: 33,
        }
    }
}

/// Counters shared by all workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub completed: u64,
    pub failed: u64,
}

pub struct WorkerPool {
    requests: Sender<WorkerRequest>,
    responses: Receiver<WorkerResponse>,
    handles: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<Mutex<PoolStats>>,
}

impl WorkerPool {
    pub fn new(worker_count: usize, queue_capacity: usize) -> Result<Self> {
        let (requests, request_rx) = bounded::<WorkerRequest>(queue_capacity.max(1));
        let (response_tx, responses) = unbounded::<WorkerResponse>();
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(Mutex::new(PoolStats::default()));

        let mut pool = Self {
            requests,
            responses,
            handles: Vec::with_capacity(worker_count),
            shutdown,
            stats,
        };
        for i in 0..worker_count.max(1) {
            let rx = request_rx.clone();
            let tx = response_tx.clone();
            let shutdown = Arc::clone(&pool.shutdown);
            let stats = Arc::clone(&pool.stats);
            let handle = thread::Builder::new()
                .name(format!("extract-{i}"))
                .spawn(move || run_worker(rx, tx, shutdown, stats))
                .context("Failed to spawn extraction worker")?;
            pool.handles.push(handle);
        }
        debug!(workers = pool.handles.len(), "Worker pool started");
        Ok(pool)
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    pub fn stats(&self) -> PoolStats {
        *self.stats.lock()
    }

    /// Queue an extraction without blocking. Returns `false` if the queue
    /// is full or the workers are gone.
    pub fn try_submit(&self, frame_index: u64, image: Arc<GrayImage>, params: ExtractorParams) -> bool {
        match self.requests.try_send(WorkerRequest::Extract {
            frame_index,
            image,
            params,
        }) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(frame = frame_index, "Worker queue full");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!(frame = frame_index, "Worker pool disconnected");
                false
            }
        }
    }

    /// Wait up to `timeout` for the features of `frame_index`.
    ///
    /// Results for other frames are stale and dropped.
    pub fn wait_for(&self, frame_index: u64, timeout: Duration) -> Option<Vec<Feature>> {
        let deadline = Instant::now() + timeout;
        loop {
            let response = match self.responses.recv_deadline(deadline) {
                Ok(response) => response,
                Err(_) => {
                    debug!(frame = frame_index, "No worker result within the frame budget");
                    return None;
                }
            };
            if response.frame_index() != frame_index {
                debug!(frame = response.frame_index(), "Discarding stale worker result");
                continue;
            }
            return match response {
                WorkerResponse::Extracted { features, elapsed_ms, .. } => {
                    debug!(frame = frame_index, features = features.len(), elapsed_ms, "Worker extraction done");
                    Some(features)
                }
                WorkerResponse::Failed { reason, .. } => {
                    warn!(frame = frame_index, %reason, "Worker extraction failed");
                    None
                }
            };
        }
    }

    /// Stop every worker, join them and drop in-flight results.
    pub fn shutdown(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        self.shutdown.store(true, Ordering::SeqCst);
        for _ in 0..self.handles.len() {
            // Full queue: workers see the flag on their next poll instead.
            let _ = self.requests.try_send(WorkerRequest::Shutdown);
        }
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("Extraction worker panicked");
            }
        }
        while self.responses.try_recv().is_ok() {}
        debug!("Worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(
    requests: Receiver<WorkerRequest>,
    responses: Sender<WorkerResponse>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<Mutex<PoolStats>>,
) {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let (frame_index, image, params) = match requests.recv_timeout(RECV_TIMEOUT) {
            Ok(WorkerRequest::Extract {
                frame_index,
                image,
                params,
            }) => (frame_index, image, params),
            Ok(WorkerRequest::Shutdown) => break,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let start = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| extract_features(&image, &params)));
        let response = match result {
            Ok(features) => {
                stats.lock().completed += 1;
                WorkerResponse::Extracted {
                    frame_index,
                    features,
                    elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
                }
            }
            Err(_) => {
                stats.lock().failed += 1;
                WorkerResponse::Failed {
                    frame_index,
                    reason: "extractor panicked".to_string(),
                }
            }
        };
        if responses.send(response).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Random 8x8 blocks: plenty of corners.
    fn blocky(width: u32, height: u32, seed: u64) -> GrayImage {
        let mut rng = StdRng::seed_from_u64(seed);
        let bw = width.div_ceil(8);
        let blocks: Vec<u8> = (0..bw * height.div_ceil(8)).map(|_| rng.gen_range(0..=255)).collect();
        GrayImage::from_fn(width, height, |x, y| Luma([blocks[((y / 8) * bw + x / 8) as usize]]))
    }

    #[test]
    fn test_worker_matches_synchronous_extraction() {
        let pool = WorkerPool::new(2, 4).unwrap();
        let image = Arc::new(blocky(160, 120, 13));
        let params = ExtractorParams::default();

        assert!(pool.try_submit(7, Arc::clone(&image), params));
        let features = pool.wait_for(7, Duration::from_secs(10)).unwrap();

        assert!(!features.is_empty());
        assert_eq!(features, extract_features(&image, &params));
        assert_eq!(pool.stats().completed, 1);
    }

    #[test]
    fn test_stale_results_are_discarded() {
        let pool = WorkerPool::new(1, 4).unwrap();
        let image = Arc::new(blocky(160, 120, 11));
        let params = ExtractorParams::default();

        assert!(pool.try_submit(1, Arc::clone(&image), params));
        assert!(pool.try_submit(2, Arc::clone(&image), params));

        assert!(pool.wait_for(2, Duration::from_secs(10)).is_some());
    }

    #[test]
    fn test_full_queue_rejects_without_blocking() {
        let pool = WorkerPool::new(1, 1).unwrap();
        let image = Arc::new(blocky(640, 480, 9));
        let params = ExtractorParams::default();

        // One in flight, one queued, then the queue is full.
        let accepted = (0..8)
            .filter(|&i| pool.try_submit(i, Arc::clone(&image), params))
            .count();
        assert!(accepted < 8);
    }

    #[test]
    fn test_shutdown_joins_workers() {
        let mut pool = WorkerPool::new(3, 2).unwrap();
        assert_eq!(pool.worker_count(), 3);

        pool.shutdown();
        assert_eq!(pool.worker_count(), 0);
        assert!(!pool.try_submit(0, Arc::new(blocky(40, 40, 5)), ExtractorParams::default()));
    }
}
