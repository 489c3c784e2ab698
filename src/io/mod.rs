//! Frame sources and trajectory output for offline replay.

pub mod image_sequence;
pub mod trajectory;

pub use image_sequence::ImageSequence;
pub use trajectory::{read_trajectory, write_trajectory, TrajectoryRecord};
