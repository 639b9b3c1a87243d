//! Vector index: exact and approximate nearest-neighbour search.
//!
//! Small indexes are scanned exhaustively.  Once the index grows past
//! the brute-force threshold, an `instant-distance` HNSW graph is built
//! over the stored points and rebuilt whenever enough new points have
//! accumulated.  Points added since the last build are always scanned
//! exactly, so a fresh insert is visible to the very next search.
//!
//! Distance is squared Euclidean throughout.
//!
//! ```rust
//! # use fabula_core::index::VectorIndex;
//! let mut index = VectorIndex::new();
//! index.insert(vec![0.1, 0.2, 0.3]);
//! index.insert(vec![0.9, 0.8, 0.7]);
//! let hits = index.search(&[0.1, 0.2, 0.3], 5);
//! assert_eq!(hits.len(), 2);
//! assert_eq!(hits[0].position, 0);
//! ```

use instant_distance::{Builder, HnswMap, Point, Search};
use ordered_float::OrderedFloat;
use tracing::debug;

// ---------------------------------------------------------------------------
// IndexPoint: adapter from a raw vector to instant-distance's Point trait
// ---------------------------------------------------------------------------

/// A point in the index.
#[derive(Clone, Debug)]
struct IndexPoint(Vec<f32>);

impl Point for IndexPoint {
    fn distance(&self, other: &Self) -> f32 {
        squared_euclidean(&self.0, &other.0)
    }
}

/// Squared Euclidean distance.  Mismatched lengths compare as infinitely far.
#[must_use]
pub fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

// ---------------------------------------------------------------------------
// Search Results
// ---------------------------------------------------------------------------

/// A single search result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexHit {
    /// Insertion position of the matching vector.
    pub position: usize,
    /// Squared Euclidean distance to the query.
    pub distance: f32,
}

// ---------------------------------------------------------------------------
// VectorIndex
// ---------------------------------------------------------------------------

/// Append-only nearest-neighbour index over fixed-dimension vectors.
pub struct VectorIndex {
    /// Every point, in insertion order.
    points: Vec<IndexPoint>,
    /// HNSW graph over `points[..built_len]`.
    map: Option<HnswMap<IndexPoint, usize>>,
    /// How many leading points the graph covers.
    built_len: usize,
    /// Below this many points, searches are exhaustive.
    brute_force_threshold: usize,
    /// `ef_construction` parameter (higher = more accurate build, slower).
    ef_construction: usize,
    /// `ef_search` parameter (higher = more accurate search, slower).
    ef_search: usize,
    /// Rebuild once unindexed points exceed this fraction of the total.
    auto_rebuild_threshold: f32,
}

impl VectorIndex {
    /// Create a new empty index with default parameters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            points: Vec::new(),
            map: None,
            built_len: 0,
            brute_force_threshold: 100,
            ef_construction: 100,
            ef_search: 50,
            auto_rebuild_threshold: 0.2,
        }
    }

    /// Create with a custom brute-force threshold.
    #[must_use]
    pub fn with_brute_force_threshold(threshold: usize) -> Self {
        Self {
            brute_force_threshold: threshold,
            ..Self::new()
        }
    }

    /// Append a vector; returns its position.
    pub fn insert(&mut self, vector: Vec<f32>) -> usize {
        self.points.push(IndexPoint(vector));
        self.points.len() - 1
    }

    /// Number of stored vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Dimension of the stored vectors, if any are stored.
    #[must_use]
    pub fn dimensions(&self) -> Option<usize> {
        self.points.first().map(|p| p.0.len())
    }

    /// Whether the HNSW graph should be (re)built.
    #[must_use]
    pub fn needs_rebuild(&self) -> bool {
        let total = self.points.len();
        if total < self.brute_force_threshold {
            return false;
        }
        if self.map.is_none() {
            return true;
        }
        let dirty = total - self.built_len;
        (dirty as f32 / total as f32) > self.auto_rebuild_threshold
    }

    /// Rebuild the graph if [`needs_rebuild`](Self::needs_rebuild) says so.
    pub fn maybe_rebuild(&mut self) {
        if self.needs_rebuild() {
            self.build();
        }
    }

    /// Build (or rebuild) the HNSW graph from all points.
    pub fn build(&mut self) {
        if self.points.is_empty() {
            return;
        }

        let builder = Builder::default()
            .ef_construction(self.ef_construction)
            .ef_search(self.ef_search)
            .seed(42); // Deterministic for reproducibility

        let values: Vec<usize> = (0..self.points.len()).collect();
        self.map = Some(builder.build(self.points.clone(), values));
        self.built_len = self.points.len();
        debug!(points = self.built_len, "rebuilt vector index");
    }

    /// Find the `k` nearest vectors to `query`.
    ///
    /// Returns exactly `min(k, len)` hits, sorted nearest first.
    #[must_use]
    pub fn search(&self, query: &[f32], k: usize) -> Vec<IndexHit> {
        let k = k.min(self.points.len());
        if k == 0 {
            return Vec::new();
        }

        if let Some(map) = self.map.as_ref().filter(|_| self.points.len() >= self.brute_force_threshold) {
            let query_point = IndexPoint(query.to_vec());
            let mut search = Search::default();
            let mut hits: Vec<IndexHit> = map
                .search(&query_point, &mut search)
                .take(k)
                .map(|item| IndexHit {
                    position: *item.value,
                    distance: item.distance,
                })
                .collect();

            // Points added since the last build are not in the graph.
            hits.extend(self.scan(query, self.built_len..self.points.len()));
            sort_hits(&mut hits);
            hits.truncate(k);

            if hits.len() == k {
                return hits;
            }
        }

        let mut hits = self.scan(query, 0..self.points.len());
        sort_hits(&mut hits);
        hits.truncate(k);
        hits
    }

    /// Exact distances for a range of positions.
    fn scan(&self, query: &[f32], range: std::ops::Range<usize>) -> Vec<IndexHit> {
        self.points[range.clone()]
            .iter()
            .zip(range)
            .map(|(point, position)| IndexHit {
                position,
                distance: squared_euclidean(query, &point.0),
            })
            .collect()
    }

    /// Get index statistics for debugging.
    #[must_use]
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            total_points: self.points.len(),
            unindexed: self.points.len() - self.built_len,
            is_built: self.map.is_some(),
            brute_force_threshold: self.brute_force_threshold,
        }
    }
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Nearest first; ties broken by insertion order.
fn sort_hits(hits: &mut [IndexHit]) {
    hits.sort_by_key(|h| (OrderedFloat(h.distance), h.position));
}

/// Statistics about the index state.
#[derive(Debug, Clone)]
pub struct IndexStats {
    /// Total number of stored points.
    pub total_points: usize,
    /// Points not yet covered by the graph.
    pub unindexed: usize,
    /// Whether an HNSW graph has been built.
    pub is_built: bool,
    /// Exhaustive-search cutoff.
    pub brute_force_threshold: usize,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_index_returns_no_results() {
        let index = VectorIndex::new();
        assert!(index.search(&[1.0, 0.0, 0.0], 5).is_empty());
    }

    #[test]
    fn brute_force_orders_by_squared_distance() {
        let mut index = VectorIndex::new();
        index.insert(vec![1.0, 0.0]);
        index.insert(vec![0.0, 3.0]);
        index.insert(vec![0.9, 0.1]);

        let hits = index.search(&[1.0, 0.0], 3);
        assert_eq!(hits.iter().map(|h| h.position).collect::<Vec<_>>(), vec![0, 2, 1]);
        assert!(hits[0].distance.abs() < 1e-6);
        assert!((hits[2].distance - 10.0).abs() < 1e-5);
    }

    #[test]
    fn k_larger_than_index_is_clamped() {
        let mut index = VectorIndex::new();
        index.insert(vec![1.0]);
        index.insert(vec![2.0]);
        assert_eq!(index.search(&[0.0], 10).len(), 2);
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let mut index = VectorIndex::new();
        index.insert(vec![1.0, 0.0]);
        index.insert(vec![-1.0, 0.0]);
        let hits = index.search(&[0.0, 0.0], 2);
        assert_eq!(hits[0].position, 0);
        assert_eq!(hits[1].position, 1);
    }

    #[test]
    fn no_graph_below_threshold() {
        let mut index = VectorIndex::with_brute_force_threshold(10);
        for i in 0..9 {
            index.insert(vec![i as f32]);
        }
        index.maybe_rebuild();
        assert!(!index.stats().is_built);
        index.insert(vec![9.0]);
        assert!(index.needs_rebuild());
        index.maybe_rebuild();
        assert!(index.stats().is_built);
        assert_eq!(index.stats().unindexed, 0);
    }

    #[test]
    fn graph_search_sees_unindexed_points() {
        let mut index = VectorIndex::with_brute_force_threshold(20);
        for i in 0..50u32 {
            let angle = (i as f32 / 50.0) * std::f32::consts::TAU;
            index.insert(vec![angle.cos(), angle.sin(), 0.0]);
        }
        index.build();

        let fresh = index.insert(vec![0.0, 0.0, 5.0]);
        assert!(!index.needs_rebuild());
        let hits = index.search(&[0.0, 0.0, 5.0], 1);
        assert_eq!(hits[0].position, fresh);
    }

    #[test]
    fn large_index_search_is_sorted_and_complete() {
        let mut index = VectorIndex::with_brute_force_threshold(50);
        for i in 0..500u32 {
            let v1 = (i as f32 * 0.017).sin();
            let v2 = (i as f32 * 0.031).cos();
            let v3 = (i as f32 * 0.053).sin();
            index.insert(vec![v1, v2, v3]);
        }
        index.maybe_rebuild();

        let hits = index.search(&[0.5, 0.5, 0.5], 10);
        assert_eq!(hits.len(), 10);
        for window in hits.windows(2) {
            assert!(window[0].distance <= window[1].distance);
        }
    }

    #[test]
    fn mismatched_dimensions_are_infinitely_far() {
        assert!(squared_euclidean(&[1.0], &[1.0, 2.0]).is_infinite());
    }
}
