//! Camera frames as delivered by the frame source.

use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};

use crate::error::FrameError;

/// Pixel layout of an incoming buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Gray,
    Rgb,
    Rgba,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Gray => 1,
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba => 4,
        }
    }
}

/// A timestamped pixel buffer pushed by the camera frame source.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Capture time in nanoseconds.
    pub timestamp_ns: u64,
}

impl CameraFrame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, format: PixelFormat, timestamp_ns: u64) -> Self {
        Self {
            pixels,
            width,
            height,
            format,
            timestamp_ns,
        }
    }

    /// Wrap an already-decoded grayscale image.
    pub fn from_gray(image: GrayImage, timestamp_ns: u64) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, PixelFormat::Gray, timestamp_ns)
    }

    /// Check the buffer length against the declared dimensions.
    pub fn validate(&self) -> Result<(), FrameError> {
        if self.width == 0 || self.height == 0 {
            return Err(FrameError::Empty {
                width: self.width,
                height: self.height,
            });
        }
        let channels = self.format.channels();
        let expected = self.width as usize * self.height as usize * channels;
        if self.pixels.len() != expected {
            return Err(FrameError::InvalidDimensions {
                width: self.width,
                height: self.height,
                channels,
                expected,
                actual: self.pixels.len(),
            });
        }
        Ok(())
    }

    /// Convert into a single-channel image, consuming the buffer.
    pub fn into_gray(self) -> Result<GrayImage, FrameError> {
        self.validate()?;
        let Self {
            pixels,
            width,
            height,
            format,
            ..
        } = self;
        let expected = pixels.len();
        let converted = match format {
            PixelFormat::Gray => GrayImage::from_raw(width, height, pixels),
            PixelFormat::Rgb => RgbImage::from_raw(width, height, pixels)
                .map(|img| DynamicImage::ImageRgb8(img).to_luma8()),
            PixelFormat::Rgba => RgbaImage::from_raw(width, height, pixels)
                .map(|img| DynamicImage::ImageRgba8(img).to_luma8()),
        };
        converted.ok_or(FrameError::InvalidDimensions {
            width,
            height,
            channels: format.channels(),
            expected,
            actual: expected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gray_passthrough() {
        let frame = CameraFrame::new(vec![7; 12], 4, 3, PixelFormat::Gray, 0);
        let gray = frame.into_gray().unwrap();

        assert_eq!(gray.dimensions(), (4, 3));
        assert!(gray.pixels().all(|p| p.0[0] == 7));
    }

    #[test]
    fn test_rgba_conversion() {
        let pixels = [255u8, 255, 255, 255].repeat(6);
        let gray = CameraFrame::new(pixels, 3, 2, PixelFormat::Rgba, 0).into_gray().unwrap();

        assert_eq!(gray.dimensions(), (3, 2));
        assert!(gray.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn test_malformed_dimensions() {
        let frame = CameraFrame::new(vec![0; 10], 4, 3, PixelFormat::Rgb, 0);
        assert!(matches!(
            frame.validate(),
            Err(FrameError::InvalidDimensions {
                expected: 36,
                actual: 10,
                ..
            })
        ));

        let empty = CameraFrame::new(Vec::new(), 0, 3, PixelFormat::Gray, 0);
        assert!(matches!(empty.into_gray(), Err(FrameError::Empty { .. })));
    }
}
