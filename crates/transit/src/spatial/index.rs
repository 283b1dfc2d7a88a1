//! R-tree nodes for spatial indexing of route stops.
//!
//! ## Two-Stage Filtering
//!
//! Radius queries use a two-stage filtering approach:
//! 1. **R-tree filter**: a lon/lat bounding box sized from the radius
//! 2. **Haversine filter**: accurate geodesic distance on the boxed candidates
//!
//! The box is sized on the same sphere as the haversine check and widened in
//! longitude by the latitude of the query point, so no stop inside the
//! geodesic radius is lost by the first stage.

use geo::Point;
use rstar::{PointDistance, RTree, RTreeObject, AABB};

use crate::identifiers::StopIdentifier;
use crate::models::types::Stop;
use crate::spatial::queries::{
    haversine_distance, meters_to_degrees, meters_to_longitude_degrees,
};

// Slack for rounding at the box edge; the haversine stage decides.
const ENVELOPE_PAD: f64 = 1.0 + 1e-6;

// ============================================================================
// Stop Spatial Node
// ============================================================================

#[derive(Clone, Debug)]
pub struct StopNode {
    /// Position of the stop in route order.
    pub index: usize,
    pub stop_id: StopIdentifier,
    pub location: Point,
    point: [f64; 2],
}

impl StopNode {
    pub fn new(index: usize, stop: &Stop) -> Self {
        Self {
            index,
            stop_id: stop.stop_id.clone(),
            location: stop.location,
            point: [stop.location.x(), stop.location.y()],
        }
    }
}

impl RTreeObject for StopNode {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.point)
    }
}

impl PointDistance for StopNode {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.point[0] - point[0];
        let dy = self.point[1] - point[1];
        dx * dx + dy * dy
    }
}

// ============================================================================
// Stop Index
// ============================================================================

/// Spatial index over the ordered stops of one route.
#[derive(Clone)]
pub struct StopIndex {
    tree: RTree<StopNode>,
}

impl StopIndex {
    pub fn new(stops: &[Stop]) -> Self {
        let nodes = stops
            .iter()
            .enumerate()
            .map(|(index, stop)| StopNode::new(index, stop))
            .collect();

        Self {
            tree: RTree::bulk_load(nodes),
        }
    }

    pub fn empty() -> Self {
        Self { tree: RTree::new() }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Stops within `radius_m` meters of `point`, in route order.
    pub fn within(&self, point: Point, radius_m: f64) -> Vec<&StopNode> {
        // Validate radius is positive
        if radius_m <= 0.0 || !radius_m.is_finite() {
            return Vec::new();
        }

        let dlat = meters_to_degrees(radius_m) * ENVELOPE_PAD;
        let dlon = meters_to_longitude_degrees(radius_m, point.y()) * ENVELOPE_PAD;
        let envelope = AABB::from_corners(
            [point.x() - dlon, point.y() - dlat],
            [point.x() + dlon, point.y() + dlat],
        );

        let mut found: Vec<&StopNode> = self
            .tree
            .locate_in_envelope(&envelope)
            .filter(|node| haversine_distance(point, node.location) <= radius_m)
            .collect();
        found.sort_by_key(|node| node.index);
        found
    }

    /// The stop closest to `point` (planar lon/lat distance).
    pub fn nearest(&self, point: Point) -> Option<&StopNode> {
        self.tree.nearest_neighbor(&[point.x(), point.y()])
    }
}

impl std::fmt::Debug for StopIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopIndex").field("stops", &self.len()).finish()
    }
}

impl Default for StopIndex {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stops() -> Vec<Stop> {
        vec![
            Stop::new(StopIdentifier::start(), "Garia No.6", Point::new(88.377227, 22.465693)),
            Stop::new("1", "Laxmi Narayan Colony", Point::new(88.3760, 22.4700)),
            Stop::new("2", "Rathtala", Point::new(88.3740, 22.4750)),
            Stop::new(StopIdentifier::end(), "Tollygunge Tram Depot", Point::new(88.345291, 22.493469)),
        ]
    }

    #[test]
    fn test_empty_index() {
        let index = StopIndex::new(&[]);
        assert!(index.is_empty());
        assert!(index.within(Point::new(88.37, 22.46), 100.0).is_empty());
        assert!(index.nearest(Point::new(88.37, 22.46)).is_none());
    }

    #[test]
    fn test_within_radius() {
        let index = StopIndex::new(&stops());
        assert_eq!(index.len(), 4);

        // ~50 m north of stop 1
        let near_one = Point::new(88.3760, 22.47045);
        let hits = index.within(near_one, 100.0);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].stop_id.as_str(), "1");
        assert_eq!(hits[0].index, 1);

        // ~250 m away from everything
        let between = Point::new(88.3750, 22.4725);
        assert!(index.within(between, 100.0).is_empty());
    }

    #[test]
    fn test_within_keeps_stops_at_the_edge() {
        let index = StopIndex::new(&[Stop::new("edge", "Edge", Point::new(88.37, 22.40))]);

        // 99.94 m due north and due south
        let north = Point::new(88.37, 22.4008988);
        let south = Point::new(88.37, 22.3991012);
        assert!(haversine_distance(north, Point::new(88.37, 22.40)) < 100.0);
        assert_eq!(index.within(north, 100.0).len(), 1);
        assert_eq!(index.within(south, 100.0).len(), 1);

        // 99.9 m due east
        let dlon = meters_to_longitude_degrees(99.9, 22.40);
        let east = Point::new(88.37 + dlon, 22.40);
        assert_eq!(index.within(east, 100.0).len(), 1);

        // just outside
        let beyond = Point::new(88.37, 22.40 + meters_to_degrees(100.5));
        assert!(index.within(beyond, 100.0).is_empty());
    }

    #[test]
    fn test_within_rejects_bad_radius() {
        let index = StopIndex::new(&stops());
        let at_stop = Point::new(88.3760, 22.4700);
        assert!(index.within(at_stop, 0.0).is_empty());
        assert!(index.within(at_stop, f64::NAN).is_empty());
    }

    #[test]
    fn test_nearest() {
        let index = StopIndex::new(&stops());
        let nearest = index.nearest(Point::new(88.346, 22.493)).unwrap();
        assert_eq!(nearest.stop_id.as_str(), StopIdentifier::END);
    }
}
