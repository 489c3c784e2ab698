pub mod config;
pub mod error;
pub mod geometry;
pub mod io;
pub mod logger;
pub mod loop_closing;
pub mod map;
pub mod optimizer;
pub mod performance;
pub mod sensors;
pub mod system;
pub mod tracking;

pub use config::SlamConfig;
pub use logger::{init_logger, init_logger_with_level};
pub use system::SlamPipeline;
