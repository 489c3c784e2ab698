//! Covisibility graph between keyframes.
//!
//! Undirected, weighted by the number of shared map points. An edge is only
//! stored when the weight exceeds `min_shared`, and edges are only written
//! when a keyframe is inserted: later observation changes never rewrite or
//! remove existing edges.

use std::collections::HashMap;

use super::types::KeyFrameId;

#[derive(Debug, Clone)]
pub struct CovisibilityGraph {
    /// Edges keyed by (smaller id, larger id).
    edges: HashMap<(KeyFrameId, KeyFrameId), usize>,
    /// Per-keyframe adjacency for neighbor queries.
    adjacency: HashMap<KeyFrameId, Vec<KeyFrameId>>,
    min_shared: usize,
}

impl CovisibilityGraph {
    pub fn new(min_shared: usize) -> Self {
        Self {
            edges: HashMap::new(),
            adjacency: HashMap::new(),
            min_shared,
        }
    }

    fn key(a: KeyFrameId, b: KeyFrameId) -> (KeyFrameId, KeyFrameId) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    pub fn min_shared(&self) -> usize {
        self.min_shared
    }

    /// Add or update the edge `a`-`b` if `shared` exceeds the threshold.
    ///
    /// Returns whether an edge was written.
    pub(crate) fn update_edge(&mut self, a: KeyFrameId, b: KeyFrameId, shared: usize) -> bool {
        if a == b || shared <= self.min_shared {
            return false;
        }
        let key = Self::key(a, b);
        if self.edges.insert(key, shared).is_none() {
            self.adjacency.entry(a).or_default().push(b);
            self.adjacency.entry(b).or_default().push(a);
        }
        true
    }

    pub fn weight(&self, a: KeyFrameId, b: KeyFrameId) -> Option<usize> {
        self.edges.get(&Self::key(a, b)).copied()
    }

    /// Neighbors of `kf` sorted by weight (descending), ties by id.
    pub fn neighbors(&self, kf: KeyFrameId) -> Vec<(KeyFrameId, usize)> {
        let mut out: Vec<(KeyFrameId, usize)> = self
            .adjacency
            .get(&kf)
            .map(|ids| {
                ids.iter()
                    .filter_map(|&other| self.weight(kf, other).map(|w| (other, w)))
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        out
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// All edges as `(a, b, weight)` with `a < b`, sorted.
    pub fn edges(&self) -> Vec<(KeyFrameId, KeyFrameId, usize)> {
        let mut out: Vec<_> = self.edges.iter().map(|(&(a, b), &w)| (a, b, w)).collect();
        out.sort();
        out
    }
}
