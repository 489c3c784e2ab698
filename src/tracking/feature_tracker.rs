//! Frame-to-frame feature association by local SSD search.
//!
//! Every previous feature is searched for within a small square window
//! around its last position. Candidates are scored by the sum of squared
//! differences between the patch around the old position (previous frame)
//! and the patch around the candidate (current frame). The best candidate
//! is accepted only below `max_ssd`; otherwise the feature is dropped.

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::tracking::feature::Feature;

/// Configuration for the local-search tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Search radius in pixels (square window).
    pub search_radius: i32,
    /// Patch side length in pixels (odd).
    pub patch_size: u32,
    /// Maximum accepted SSD.
    pub max_ssd: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            search_radius: 5,
            patch_size: 15,
            max_ssd: 1000.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeatureTracker {
    config: TrackerConfig,
}

impl FeatureTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Re-localize `previous` features in `current`.
    ///
    /// Returned features keep their score, descriptor and `track_id` and
    /// carry their new position. Order follows the input.
    pub fn track(&self, previous: &[Feature], previous_image: &GrayImage, current_image: &GrayImage) -> Vec<Feature> {
        previous
            .iter()
            .filter_map(|f| {
                let (x, y) = self.search(f, previous_image, current_image)?;
                Some(Feature {
                    x: x as f64,
                    y: y as f64,
                    ..f.clone()
                })
            })
            .collect()
    }

    fn search(&self, feature: &Feature, previous_image: &GrayImage, current_image: &GrayImage) -> Option<(i32, i32)> {
        let half = (self.config.patch_size / 2) as i32;
        let x0 = feature.x.round() as i32;
        let y0 = feature.y.round() as i32;
        if !patch_inside(previous_image, x0, y0, half) {
            return None;
        }

        let r = self.config.search_radius;
        let mut best: Option<(f64, i32, i32)> = None;
        for dy in -r..=r {
            for dx in -r..=r {
                let (x, y) = (x0 + dx, y0 + dy);
                if !patch_inside(current_image, x, y, half) {
                    continue;
                }
                let score = ssd(previous_image, x0, y0, current_image, x, y, half);
                let better = match best {
                    None => true,
                    // Prefer the smaller displacement on ties.
                    Some((s, bx, by)) => {
                        score < s
                            || (score == s && dx * dx + dy * dy < (bx - x0).pow(2) + (by - y0).pow(2))
                    }
                };
                if better {
                    best = Some((score, x, y));
                }
            }
        }

        best.filter(|(score, _, _)| *score < self.config.max_ssd)
            .map(|(_, x, y)| (x, y))
    }
}

/// Combine tracked features with fresh detections.
///
/// Every tracked feature is kept. A detection is added only if no tracked
/// feature lies within `min_distance` pixels of it, and only while the
/// total stays below `max_features`. Detections keep their score order.
pub fn merge_detections(tracked: Vec<Feature>, detections: Vec<Feature>, min_distance: f64, max_features: usize) -> Vec<Feature> {
    let min_sq = min_distance * min_distance;
    let mut merged = tracked;
    let num_tracked = merged.len();
    for detection in detections {
        if merged.len() >= max_features {
            break;
        }
        let crowded = merged[..num_tracked]
            .iter()
            .any(|t| (t.uv() - detection.uv()).norm_squared() < min_sq);
        if !crowded {
            merged.push(detection);
        }
    }
    merged
}

fn patch_inside(image: &GrayImage, x: i32, y: i32, half: i32) -> bool {
    let (w, h) = image.dimensions();
    x - half >= 0 && y - half >= 0 && x + half < w as i32 && y + half < h as i32
}

fn ssd(a: &GrayImage, ax: i32, ay: i32, b: &GrayImage, bx: i32, by: i32, half: i32) -> f64 {
    let mut sum = 0.0;
    for dy in -half..=half {
        for dx in -half..=half {
            let va = a.get_pixel((ax + dx) as u32, (ay + dy) as u32).0[0] as f64;
            let vb = b.get_pixel((bx + dx) as u32, (by + dy) as u32).0[0] as f64;
            let d = va - vb;
            sum += d * d;
        }
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::MapPointId;
    use crate::tracking::feature::Descriptor;
    use image::Luma;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn noise_image(width: u32, height: u32, seed: u64) -> GrayImage {
        let mut rng = StdRng::seed_from_u64(seed);
        GrayImage::from_fn(width, height, |_, _| Luma([rng.gen_range(0..=255)]))
    }

    fn shifted(image: &GrayImage, sx: i32, sy: i32) -> GrayImage {
        let (w, h) = image.dimensions();
        GrayImage::from_fn(w, h, |x, y| {
            let ox = (x as i32 - sx).clamp(0, w as i32 - 1) as u32;
            let oy = (y as i32 - sy).clamp(0, h as i32 - 1) as u32;
            *image.get_pixel(ox, oy)
        })
    }

    fn feature_at(x: f64, y: f64, id: u32) -> Feature {
        Feature {
            x,
            y,
            score: 100.0,
            angle: 0.0,
            descriptor: Descriptor::zeros(),
            track_id: Some(MapPointId::new(id)),
        }
    }

    #[test]
    fn test_recovers_known_shift() {
        let prev = noise_image(100, 100, 1);
        let curr = shifted(&prev, 3, -2);
        let tracker = FeatureTracker::default();

        let tracked = tracker.track(&[feature_at(50.0, 50.0, 7)], &prev, &curr);
        assert_eq!(tracked.len(), 1);
        assert_eq!((tracked[0].x, tracked[0].y), (53.0, 48.0));
        assert_eq!(tracked[0].track_id, Some(MapPointId::new(7)));
    }

    #[test]
    fn test_drops_motion_beyond_radius() {
        let prev = noise_image(100, 100, 2);
        let curr = shifted(&prev, 9, 0);
        let tracker = FeatureTracker::default();

        assert!(tracker.track(&[feature_at(50.0, 50.0, 0)], &prev, &curr).is_empty());
    }

    #[test]
    fn test_drops_unrelated_content() {
        let prev = noise_image(100, 100, 3);
        let curr = noise_image(100, 100, 4);
        let tracker = FeatureTracker::default();

        assert!(tracker.track(&[feature_at(50.0, 50.0, 0)], &prev, &curr).is_empty());
    }

    #[test]
    fn test_skips_features_near_border() {
        let prev = noise_image(100, 100, 5);
        let tracker = FeatureTracker::default();

        assert!(tracker.track(&[feature_at(3.0, 50.0, 0)], &prev, &prev).is_empty());
    }

    #[test]
    fn test_merge_skips_detections_near_tracks() {
        let tracked = vec![feature_at(50.0, 50.0, 1)];
        let mut near = feature_at(55.0, 52.0, 0);
        near.track_id = None;
        let mut far = feature_at(80.0, 50.0, 0);
        far.track_id = None;

        let merged = merge_detections(tracked, vec![near, far.clone()], 7.5, 100);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].track_id, Some(MapPointId::new(1)));
        assert_eq!(merged[1], far);
    }

    #[test]
    fn test_merge_respects_feature_budget() {
        let tracked = vec![feature_at(10.0, 10.0, 0), feature_at(20.0, 10.0, 1)];
        let detections: Vec<Feature> = (0..5).map(|i| feature_at(100.0 + 20.0 * i as f64, 90.0, 9)).collect();

        assert_eq!(merge_detections(tracked.clone(), detections.clone(), 5.0, 4).len(), 4);
        // Tracks are never dropped, even over budget.
        assert_eq!(merge_detections(tracked, detections, 5.0, 1).len(), 2);
    }
}
