//! Frame-level types: camera model and incoming pixel buffers.

pub mod camera;
pub mod image;

pub use camera::CameraModel;
pub use image::{CameraFrame, PixelFormat};
