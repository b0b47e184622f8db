//! R-tree index over loaded heatmap locations.
//!
//! The controller loads the whole sample log once per refresh, but re-rasterizes on
//! every drag tick. Indexing the snapshot lets each tick project only the locations
//! inside the current viewport instead of the entire history.

use std::fmt;

use rstar::{RTree, RTreeObject, AABB};

use crate::{Bounds, GpsPoint, WeightedLocation};

#[derive(Debug, Clone)]
struct IndexedLocation(WeightedLocation);

impl RTreeObject for IndexedLocation {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.0.point.longitude, self.0.point.latitude])
    }
}

/// Immutable spatial snapshot of weighted locations.
pub struct SampleIndex {
    tree: RTree<IndexedLocation>,
}

impl fmt::Debug for SampleIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleIndex").field("len", &self.tree.size()).finish()
    }
}

impl Default for SampleIndex {
    fn default() -> Self {
        Self { tree: RTree::new() }
    }
}

impl SampleIndex {
    /// Bulk-load an index. Locations with invalid coordinates are skipped.
    pub fn new(locations: Vec<WeightedLocation>) -> Self {
        let items: Vec<IndexedLocation> = locations
            .into_iter()
            .filter(|loc| loc.point.is_valid())
            .map(IndexedLocation)
            .collect();
        Self { tree: RTree::bulk_load(items) }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Locations inside `bounds` (edges inclusive), in no particular order.
    pub fn within(&self, bounds: &Bounds) -> Vec<WeightedLocation> {
        let envelope = AABB::from_corners(
            [bounds.min_lng, bounds.min_lat],
            [bounds.max_lng, bounds.max_lat],
        );
        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|item| item.0)
            .collect()
    }

    /// Coordinates of every indexed location.
    pub fn points(&self) -> Vec<GpsPoint> {
        self.tree.iter().map(|item| item.0.point).collect()
    }
}
