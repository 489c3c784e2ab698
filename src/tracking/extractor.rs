//! Grid-bucketed FAST corner extraction with oriented binary descriptors.
//!
//! The image is divided into `grid_size` cells. Each cell contributes at
//! most one feature: its strongest FAST-9 corner, provided the score clears
//! `min_score`. Features are then sorted by score and truncated.
//!
//! Cells are independent, so with `use_accelerated_path` the cell rows are
//! scanned in parallel. The result does not depend on the path taken.

use image::GrayImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::tracking::feature::{Descriptor, Feature};
use crate::tracking::pattern::{sampling_pattern, PATTERN_RADIUS};

/// 16-pixel Bresenham circle of radius 3, clockwise from 12 o'clock.
const CIRCLE: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// Contiguous arc length for FAST-9.
const ARC_LENGTH: usize = 9;

/// Radius of the intensity-centroid disc.
const ORIENTATION_RADIUS: i32 = 7;

/// Features closer than this to the border are not extracted.
pub const BORDER: u32 = PATTERN_RADIUS as u32 + 2;

/// Extraction parameters. `max_features`, `grid_size` and
/// `use_accelerated_path` follow the active quality profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorParams {
    pub max_features: usize,
    pub grid_size: u32,
    /// FAST intensity threshold.
    pub fast_threshold: u8,
    /// Minimum corner score for a cell to contribute a feature.
    pub min_score: f32,
    pub use_accelerated_path: bool,
}

impl Default for ExtractorParams {
    fn default() -> Self {
        Self {
            max_features: 8000,
            grid_size: 15,
            fast_threshold: 20,
            min_score: 50.0,
            use_accelerated_path: true,
        }
    }
}

/// Stateless extractor holding the current parameters.
#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor {
    params: ExtractorParams,
}

impl FeatureExtractor {
    pub fn new(params: ExtractorParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ExtractorParams {
        &self.params
    }

    pub fn set_params(&mut self, params: ExtractorParams) {
        self.params = params;
    }

    pub fn extract(&self, image: &GrayImage) -> Vec<Feature> {
        extract_features(image, &self.params)
    }
}

/// Extract at most `params.max_features` features, highest score first.
pub fn extract_features(image: &GrayImage, params: &ExtractorParams) -> Vec<Feature> {
    let (width, height) = image.dimensions();
    let grid = params.grid_size.max(1);
    if params.max_features == 0 || width <= 2 * BORDER || height <= 2 * BORDER {
        return Vec::new();
    }

    let rows = cell_origins(height, grid);
    let cols = cell_origins(width, grid);
    let scan_row = |&gy: &u32| -> Vec<Feature> {
        cols.iter()
            .filter_map(|&gx| best_in_cell(image, gx, gy, grid, params))
            .collect()
    };

    let mut features: Vec<Feature> = if params.use_accelerated_path {
        rows.par_iter().flat_map_iter(scan_row).collect()
    } else {
        rows.iter().flat_map(scan_row).collect()
    };

    features.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(a.y.total_cmp(&b.y))
            .then(a.x.total_cmp(&b.x))
    });
    features.truncate(params.max_features);
    features
}

/// Cell origins `grid, 2·grid, …` stopping one cell short of the far edge.
fn cell_origins(extent: u32, grid: u32) -> Vec<u32> {
    let limit = extent.saturating_sub(grid);
    (1..)
        .map(|k| k * grid)
        .take_while(|&origin| origin < limit)
        .collect()
}

fn best_in_cell(image: &GrayImage, gx: u32, gy: u32, grid: u32, params: &ExtractorParams) -> Option<Feature> {
    let (width, height) = image.dimensions();
    let x0 = gx.max(BORDER);
    let y0 = gy.max(BORDER);
    let x1 = (gx + grid).min(width - BORDER);
    let y1 = (gy + grid).min(height - BORDER);

    let mut best: Option<(f32, u32, u32)> = None;
    for y in y0..y1 {
        for x in x0..x1 {
            if let Some(score) = fast_score(image, x, y, params.fast_threshold) {
                if best.map_or(true, |(s, _, _)| score > s) {
                    best = Some((score, x, y));
                }
            }
        }
    }

    let (score, x, y) = best?;
    if score <= params.min_score {
        return None;
    }
    let angle = orientation(image, x, y);
    Some(Feature {
        x: x as f64,
        y: y as f64,
        score,
        angle,
        descriptor: describe(image, x, y, angle),
        track_id: None,
    })
}

#[inline]
fn pixel(image: &GrayImage, x: i32, y: i32) -> i16 {
    image.get_pixel(x as u32, y as u32).0[0] as i16
}

/// FAST-9 score: summed contrast beyond the threshold over the ring pixels
/// of the winning polarity. `None` if (x, y) is not a corner.
fn fast_score(image: &GrayImage, x: u32, y: u32, threshold: u8) -> Option<f32> {
    let (cx, cy) = (x as i32, y as i32);
    let center = pixel(image, cx, cy);
    let t = threshold as i16;

    // At least two of the compass points lie on any 9-pixel arc.
    let compass = [0, 4, 8, 12].map(|i| pixel(image, cx + CIRCLE[i].0, cy + CIRCLE[i].1));
    let bright = compass.iter().filter(|&&v| v > center + t).count();
    let dark = compass.iter().filter(|&&v| v < center - t).count();
    if bright < 2 && dark < 2 {
        return None;
    }

    let ring: [i16; 16] = std::array::from_fn(|i| pixel(image, cx + CIRCLE[i].0, cy + CIRCLE[i].1));

    let bright_score = has_arc(&ring, |v| v > center + t).then(|| {
        ring.iter()
            .filter(|&&v| v > center + t)
            .map(|&v| (v - center - t) as f32)
            .sum::<f32>()
    });
    let dark_score = has_arc(&ring, |v| v < center - t).then(|| {
        ring.iter()
            .filter(|&&v| v < center - t)
            .map(|&v| (center - v - t) as f32)
            .sum::<f32>()
    });

    match (bright_score, dark_score) {
        (Some(b), Some(d)) => Some(b.max(d)),
        (b, d) => b.or(d),
    }
}

fn has_arc(ring: &[i16; 16], pred: impl Fn(i16) -> bool) -> bool {
    let mut run = 0;
    for i in 0..32 {
        if pred(ring[i % 16]) {
            run += 1;
            if run >= ARC_LENGTH {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

/// Intensity-centroid orientation (radians).
fn orientation(image: &GrayImage, x: u32, y: u32) -> f32 {
    let (cx, cy) = (x as i32, y as i32);
    let mut m10 = 0.0_f32;
    let mut m01 = 0.0_f32;
    for dy in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
        for dx in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
            if dx * dx + dy * dy > ORIENTATION_RADIUS * ORIENTATION_RADIUS {
                continue;
            }
            let intensity = pixel(image, cx + dx, cy + dy) as f32;
            m10 += dx as f32 * intensity;
            m01 += dy as f32 * intensity;
        }
    }
    m01.atan2(m10)
}

/// Steered binary descriptor over the shared sampling pattern.
fn describe(image: &GrayImage, x: u32, y: u32, angle: f32) -> Descriptor {
    let (sin, cos) = angle.sin_cos();
    let (width, height) = image.dimensions();
    let sample = |ox: f32, oy: f32| -> i16 {
        let rx = cos * ox - sin * oy;
        let ry = sin * ox + cos * oy;
        let px = (x as f32 + rx).round().clamp(0.0, (width - 1) as f32) as i32;
        let py = (y as f32 + ry).round().clamp(0.0, (height - 1) as f32) as i32;
        pixel(image, px, py)
    };

    let mut descriptor = Descriptor::zeros();
    for (i, ((x1, y1), (x2, y2))) in sampling_pattern().pairs().iter().enumerate() {
        if sample(*x1, *y1) < sample(*x2, *y2) {
            descriptor.set_bit(i);
        }
    }
    descriptor
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Random 8x8 blocks: corners at most block junctions.
    fn blocky_image(width: u32, height: u32, seed: u64) -> GrayImage {
        let mut rng = StdRng::seed_from_u64(seed);
        let bw = width.div_ceil(8);
        let bh = height.div_ceil(8);
        let blocks: Vec<u8> = (0..bw * bh).map(|_| rng.gen_range(0..=255)).collect();
        GrayImage::from_fn(width, height, |x, y| Luma([blocks[((y / 8) * bw + x / 8) as usize]]))
    }

    #[test]
    fn test_uniform_image_has_no_features() {
        let image = GrayImage::from_pixel(160, 120, Luma([128]));
        assert!(extract_features(&image, &ExtractorParams::default()).is_empty());
    }

    #[test]
    fn test_small_image_has_no_features() {
        let image = blocky_image(30, 30, 1);
        assert!(extract_features(&image, &ExtractorParams::default()).is_empty());
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let image = blocky_image(320, 240, 42);
        let params = ExtractorParams {
            use_accelerated_path: false,
            ..ExtractorParams::default()
        };

        let first = extract_features(&image, &params);
        let second = extract_features(&image, &params);
        assert!(!first.is_empty());
        assert_eq!(first, second);

        let parallel = extract_features(
            &image,
            &ExtractorParams {
                use_accelerated_path: true,
                ..params
            },
        );
        assert_eq!(first, parallel);
    }

    #[test]
    fn test_sorted_truncated_and_inside_border() {
        let image = blocky_image(320, 240, 3);
        let params = ExtractorParams {
            max_features: 25,
            grid_size: 20,
            ..ExtractorParams::default()
        };
        let features = extract_features(&image, &params);

        assert_eq!(features.len(), 25);
        assert!(features.windows(2).all(|w| w[0].score >= w[1].score));
        for f in &features {
            assert!(f.score > params.min_score);
            assert!(f.x >= BORDER as f64 && f.x < (320 - BORDER) as f64);
            assert!(f.y >= BORDER as f64 && f.y < (240 - BORDER) as f64);
            assert!(f.track_id.is_none());
        }
    }

    #[test]
    fn test_one_feature_per_cell() {
        let image = blocky_image(320, 240, 5);
        let params = ExtractorParams {
            grid_size: 30,
            ..ExtractorParams::default()
        };
        let features = extract_features(&image, &params);
        let mut cells: Vec<(u32, u32)> = features
            .iter()
            .map(|f| (f.x as u32 / 30, f.y as u32 / 30))
            .collect();
        let n = cells.len();
        cells.sort();
        cells.dedup();
        assert_eq!(cells.len(), n);
    }

    #[test]
    fn test_cell_origins() {
        assert_eq!(cell_origins(100, 20), vec![20, 40, 60]);
        assert!(cell_origins(30, 20).is_empty());
    }
}
