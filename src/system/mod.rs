//! Pipeline orchestration and the feature extraction worker pool.
//!
//! `SlamPipeline` drives every stage on the caller's thread. The only
//! concurrency is the optional `WorkerPool`, which extracts features from
//! shared frame buffers and talks to the pipeline over channels.

pub mod messages;
mod slam_system;
pub mod worker_pool;

pub use messages::{WorkerRequest, WorkerResponse};
pub use slam_system::SlamPipeline;
pub use worker_pool::{PoolStats, WorkerConfig, WorkerPool};
