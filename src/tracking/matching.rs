//! Map point search by projection.
//!
//! When frame-to-frame tracking has broken, map points are projected into
//! the current frame with a pose guess and matched against the frame's
//! untracked features by descriptor distance. Accepted matches get their
//! `track_id` set, so pose estimation can see them again.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::geometry::SE3;
use crate::map::{MapPointId, SparseMap};
use crate::tracking::feature::Feature;

/// Strict descriptor distance for accepting a match.
pub const TH_LOW: u32 = 50;
/// Best-to-second-best distance ratio.
pub const NN_RATIO: f64 = 0.75;

/// Configuration for search by projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReacquireConfig {
    /// Pixels between a feature and a projected map point.
    pub search_radius: f64,
    /// Maximum Hamming distance of an accepted match.
    pub max_distance: u32,
    /// The best match must beat `nn_ratio` times the second best.
    pub nn_ratio: f64,
}

impl Default for ReacquireConfig {
    fn default() -> Self {
        Self {
            search_radius: 30.0,
            max_distance: TH_LOW,
            nn_ratio: NN_RATIO,
        }
    }
}

/// A map point projected into the current frame.
struct Projected {
    id: MapPointId,
    u: f64,
    v: f64,
}

/// Projected points bucketed in square cells of the search radius.
struct ProjectionGrid {
    cell: f64,
    cells: HashMap<(i64, i64), Vec<Projected>>,
}

impl ProjectionGrid {
    fn new(cell: f64) -> Self {
        Self {
            cell: cell.max(1.0),
            cells: HashMap::new(),
        }
    }

    fn key(&self, u: f64, v: f64) -> (i64, i64) {
        ((u / self.cell).floor() as i64, (v / self.cell).floor() as i64)
    }

    fn insert(&mut self, p: Projected) {
        let key = self.key(p.u, p.v);
        self.cells.entry(key).or_default().push(p);
    }

    /// Points within `radius` of `(u, v)`.
    fn near(&self, u: f64, v: f64, radius: f64) -> impl Iterator<Item = &Projected> {
        let (cx, cy) = self.key(u, v);
        let r2 = radius * radius;
        (cy - 1..=cy + 1)
            .flat_map(move |y| (cx - 1..=cx + 1).map(move |x| (x, y)))
            .filter_map(move |key| self.cells.get(&key))
            .flatten()
            .filter(move |p| (p.u - u).powi(2) + (p.v - v).powi(2) <= r2)
    }
}

/// Link untracked `features` to map points projected with `pose` (T_wc).
///
/// Points behind the camera and points already tracked in this frame are
/// skipped. A feature takes its nearest point in descriptor space when the
/// distance is within `max_distance` and passes the ratio test; a point
/// claimed by several features goes to the closest one. Returns the number
/// of features linked.
pub fn reacquire_features(features: &mut [Feature], map: &SparseMap, pose: &SE3, config: &ReacquireConfig) -> usize {
    let pose_cw = pose.inverse();
    let camera = map.camera();
    let already: HashSet<MapPointId> = features.iter().filter_map(|f| f.track_id).collect();

    let mut grid = ProjectionGrid::new(config.search_radius);
    for mp in map.map_points() {
        if already.contains(&mp.id) {
            continue;
        }
        if let Some(uv) = camera.project(&pose_cw.transform_point(&mp.position)) {
            grid.insert(Projected {
                id: mp.id,
                u: uv.x,
                v: uv.y,
            });
        }
    }

    // Best claim per map point: (feature index, distance).
    let mut claims: HashMap<MapPointId, (usize, u32)> = HashMap::new();
    for (i, feature) in features.iter().enumerate() {
        if feature.is_tracked() {
            continue;
        }
        let mut best: Option<(MapPointId, u32)> = None;
        let mut second = u32::MAX;
        for p in grid.near(feature.x, feature.y, config.search_radius) {
            let Some(mp) = map.map_point(p.id) else {
                continue;
            };
            let distance = feature.descriptor.hamming_distance(&mp.descriptor);
            match best {
                Some((_, d)) if distance >= d => second = second.min(distance),
                _ => {
                    if let Some((_, d)) = best {
                        second = d;
                    }
                    best = Some((p.id, distance));
                }
            }
        }
        let Some((mp_id, distance)) = best else {
            continue;
        };
        if distance > config.max_distance {
            continue;
        }
        if second != u32::MAX && distance as f64 >= config.nn_ratio * second as f64 {
            continue;
        }
        match claims.get(&mp_id) {
            Some(&(_, d)) if d <= distance => {}
            _ => {
                claims.insert(mp_id, (i, distance));
            }
        }
    }

    for (mp_id, (i, _)) in &claims {
        features[*i].track_id = Some(*mp_id);
    }
    claims.len()
}
