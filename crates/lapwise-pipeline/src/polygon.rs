//! Polygon containment and exterior distance.
//!
//! Boundaries are treated as inside: a point exactly on an edge is
//! contained and has exterior distance zero. [`BoundaryPolygon`] keeps an
//! R-tree of its edges so repeated distance queries over a whole table
//! stay logarithmic in the number of vertices.

use std::collections::HashSet;

use geo::coordinate_position::{CoordPos, CoordinatePosition};
use geo::line_measures::Distance;
use geo::{Euclidean, Line, LineString, Polygon};
use rstar::RTree;

use crate::types::{PipelineError, Point};

/// Convert a lapwise point into a `geo` coordinate.
pub(crate) const fn point_to_coord(p: Point) -> geo::Coord<f64> {
    geo::Coord { x: p.x, y: p.y }
}

/// A closed ring with an edge index for distance queries.
#[derive(Debug, Clone)]
pub struct BoundaryPolygon {
    polygon: Polygon<f64>,
    edges: RTree<Line<f64>>,
}

impl BoundaryPolygon {
    /// Build a polygon from an ordered ring of vertices.
    ///
    /// The ring is closed implicitly; repeating the first vertex at the end
    /// is allowed but not required.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DegenerateGeometry`] if the ring has fewer
    /// than three distinct finite vertices.
    pub fn new(ring: &[Point]) -> Result<Self, PipelineError> {
        if ring.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return Err(PipelineError::DegenerateGeometry(
                "polygon ring contains a non-finite vertex".to_string(),
            ));
        }
        let distinct: HashSet<(u64, u64)> =
            ring.iter().map(|p| (p.x.to_bits(), p.y.to_bits())).collect();
        if distinct.len() < 3 {
            return Err(PipelineError::DegenerateGeometry(format!(
                "polygon ring needs at least 3 distinct vertices, got {}",
                distinct.len()
            )));
        }

        let exterior: LineString<f64> = ring.iter().map(|&p| point_to_coord(p)).collect();
        let polygon = Polygon::new(exterior, vec![]);
        let edges: Vec<Line<f64>> = polygon
            .exterior()
            .lines()
            .filter(|line| line.start != line.end)
            .collect();

        Ok(Self {
            polygon,
            edges: RTree::bulk_load(edges),
        })
    }

    /// Whether `p` lies inside the polygon or on its boundary.
    #[must_use]
    pub fn contains(&self, p: Point) -> bool {
        matches!(
            self.polygon.coordinate_position(&point_to_coord(p)),
            CoordPos::Inside | CoordPos::OnBoundary
        )
    }

    /// Shortest distance from `p` to the polygon boundary.
    ///
    /// This is the boundary distance regardless of containment; use
    /// [`distance_outside`](Self::distance_outside) for the signed-free
    /// "how far outside" measure.
    #[must_use]
    pub fn boundary_distance(&self, p: Point) -> f64 {
        let query = geo::Point::from(point_to_coord(p));
        self.edges
            .nearest_neighbor(&query)
            .map_or(f64::INFINITY, |edge| Euclidean.distance(&query, edge))
    }

    /// Zero for contained points, otherwise the distance to the boundary.
    #[must_use]
    pub fn distance_outside(&self, p: Point) -> f64 {
        if self.contains(p) {
            0.0
        } else {
            self.boundary_distance(p)
        }
    }

    /// Ring vertices in order, without the closing repeat.
    pub fn vertices(&self) -> impl Iterator<Item = Point> + '_ {
        let coords = self.polygon.exterior().0.as_slice();
        let open = coords.len().saturating_sub(1);
        coords[..open].iter().map(|c| Point::new(c.x, c.y))
    }
}

/// Whether `p` lies inside or on the ring.
///
/// A degenerate ring contains nothing.
#[must_use]
pub fn contains(ring: &[Point], p: Point) -> bool {
    BoundaryPolygon::new(ring).is_ok_and(|polygon| polygon.contains(p))
}

/// Distance from `p` to the ring when outside it, zero when inside.
///
/// A degenerate ring is infinitely far from everything.
#[must_use]
pub fn exterior_distance(ring: &[Point], p: Point) -> f64 {
    BoundaryPolygon::new(ring).map_or(f64::INFINITY, |polygon| polygon.distance_outside(p))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn square() -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ]
    }

    #[test]
    fn interior_point_is_contained() {
        assert!(contains(&square(), Point::new(5.0, 5.0)));
        assert!((exterior_distance(&square(), Point::new(5.0, 5.0))).abs() < f64::EPSILON);
    }

    #[test]
    fn boundary_point_is_contained() {
        assert!(contains(&square(), Point::new(10.0, 5.0)));
        assert!(contains(&square(), Point::new(0.0, 0.0)));
        assert!((exterior_distance(&square(), Point::new(0.0, 5.0))).abs() < f64::EPSILON);
    }

    #[test]
    fn exterior_distance_to_edge() {
        assert!(!contains(&square(), Point::new(13.0, 5.0)));
        assert!((exterior_distance(&square(), Point::new(13.0, 5.0)) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn exterior_distance_to_corner() {
        let d = exterior_distance(&square(), Point::new(13.0, 14.0));
        assert!((d - 5.0).abs() < 1e-9);
    }

    #[test]
    fn boundary_distance_from_inside() {
        let polygon = BoundaryPolygon::new(&square()).unwrap();
        assert!((polygon.boundary_distance(Point::new(2.0, 5.0)) - 2.0).abs() < 1e-9);
        assert!(polygon.distance_outside(Point::new(2.0, 5.0)).abs() < f64::EPSILON);
    }

    #[test]
    fn explicit_closing_vertex_is_accepted() {
        let mut ring = square();
        ring.push(Point::new(0.0, 0.0));
        let polygon = BoundaryPolygon::new(&ring).unwrap();
        assert_eq!(polygon.vertices().count(), 4);
        assert!(polygon.contains(Point::new(1.0, 1.0)));
    }

    #[test]
    fn degenerate_ring_is_rejected() {
        let ring = vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(0.0, 0.0),
        ];
        assert!(matches!(
            BoundaryPolygon::new(&ring),
            Err(PipelineError::DegenerateGeometry(_))
        ));
        assert!(!contains(&ring, Point::new(0.0, 0.0)));
        assert!(exterior_distance(&ring, Point::new(0.0, 0.0)).is_infinite());
    }

    #[test]
    fn non_finite_vertex_is_rejected() {
        let mut ring = square();
        ring[1] = Point::new(f64::NAN, 0.0);
        assert!(BoundaryPolygon::new(&ring).is_err());
    }

    #[test]
    fn vertices_preserve_ring_order() {
        let polygon = BoundaryPolygon::new(&square()).unwrap();
        assert_eq!(polygon.vertices().collect::<Vec<_>>(), square());
    }
}
