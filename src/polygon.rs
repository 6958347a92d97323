//! Point-in-polygon tests by ray casting.
//!
//! A horizontal ray is cast rightwards from the test point and the number of
//! polygon edges it crosses is counted; an odd count means the point is
//! inside. When the point's y coordinate coincides exactly with an edge
//! endpoint, the point is moved up by one unit for that edge only. The
//! nudge is a deterministic tie-break for rays passing through a vertex; it
//! is not exact for points within one unit of such a vertex, and results
//! for those points must stay reproducible rather than exact.

use serde::{Deserialize, Serialize};

use crate::Point2D;

/// How far the test point moves along y when it lines up with an edge endpoint
pub const VERTEX_NUDGE: f64 = 1.0;

/// The 8 nullable corner coordinates of a quadrilateral, as stored for slots,
/// check-in zones and camera check-in boxes
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct QuadCoords {
    pub d1x: Option<f64>,
    pub d1y: Option<f64>,
    pub d2x: Option<f64>,
    pub d2y: Option<f64>,
    pub d3x: Option<f64>,
    pub d3y: Option<f64>,
    pub d4x: Option<f64>,
    pub d4y: Option<f64>,
}

impl QuadCoords {
    pub fn from_points(points: [Point2D; 4]) -> Self {
        let [(d1x, d1y), (d2x, d2y), (d3x, d3y), (d4x, d4y)] = points;
        QuadCoords {
            d1x: Some(d1x),
            d1y: Some(d1y),
            d2x: Some(d2x),
            d2y: Some(d2y),
            d3x: Some(d3x),
            d3y: Some(d3y),
            d4x: Some(d4x),
            d4y: Some(d4y),
        }
    }

    /// All four corners, or None if any coordinate is missing
    pub fn points(&self) -> Option<[Point2D; 4]> {
        Some([
            (self.d1x?, self.d1y?),
            (self.d2x?, self.d2y?),
            (self.d3x?, self.d3y?),
            (self.d4x?, self.d4y?),
        ])
    }

    pub fn is_complete(&self) -> bool {
        self.points().is_some()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Polygon {
    vertices: Vec<Point2D>,
}

impl Polygon {
    pub fn new(vertices: Vec<Point2D>) -> Self {
        Polygon { vertices }
    }

    /// Build a quadrilateral from stored corners; absent if any corner
    /// coordinate is null
    pub fn from_quad(quad: &QuadCoords) -> Option<Self> {
        quad.points().map(|corners| Polygon::new(corners.to_vec()))
    }

    pub fn vertices(&self) -> &[Point2D] {
        &self.vertices
    }

    /// Fewer than three finite vertices cannot enclose anything
    pub fn is_usable(&self) -> bool {
        self.vertices.len() >= 3
            && self
                .vertices
                .iter()
                .all(|(x, y)| x.is_finite() && y.is_finite())
    }

    /// Iterate edges (p1, p2), wrapping from the last vertex back to the first
    pub fn edges(&self) -> impl Iterator<Item = (&Point2D, &Point2D)> {
        let n = self.vertices.len();
        (0..n).map(move |i| (&self.vertices[i], &self.vertices[(i + 1) % n]))
    }

    pub fn contains(&self, point: &Point2D) -> bool {
        contains(point, self)
    }
}

/// Does a rightward horizontal ray from `point` cross the segment p1-p2?
pub fn ray_segment_intersects(point: &Point2D, p1: &Point2D, p2: &Point2D) -> bool {
    // Order the endpoints so that `a` is the lower one
    let (a, b) = if p1.1 > p2.1 { (p2, p1) } else { (p1, p2) };

    let (px, mut py) = *point;
    if py == a.1 || py == b.1 {
        py += VERTEX_NUDGE;
    }

    if py > b.1 || py < a.1 || px > a.0.max(b.0) {
        return false;
    }
    if px < a.0.min(b.0) {
        return true;
    }

    let edge_slope = if a.0 != b.0 {
        (b.1 - a.1) / (b.0 - a.0)
    } else {
        f64::INFINITY
    };
    let point_slope = if a.0 != px {
        (py - a.1) / (px - a.0)
    } else {
        f64::INFINITY
    };
    point_slope >= edge_slope
}

/// Ray-casting parity test; unusable polygons never contain anything
pub fn contains(point: &Point2D, polygon: &Polygon) -> bool {
    if !polygon.is_usable() {
        return false;
    }
    polygon
        .edges()
        .filter(|(p1, p2)| ray_segment_intersects(point, p1, p2))
        .count()
        % 2
        == 1
}

/// Containment against a polygon that may be absent (incomplete record)
pub fn contains_optional(point: &Point2D, polygon: Option<&Polygon>) -> bool {
    polygon.is_some_and(|p| contains(point, p))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Polygon {
        Polygon::new(vec![(0., 0.), (10., 0.), (10., 10.), (0., 10.)])
    }

    #[test]
    fn inside_and_outside_square() {
        let sq = square();
        assert!(sq.contains(&(3., 3.)));
        assert!(sq.contains(&(9.5, 0.5)));
        assert!(!sq.contains(&(22., 22.)));
        assert!(!sq.contains(&(-0.5, 5.)));
        assert!(!sq.contains(&(5., 10.5)));
    }

    #[test]
    fn diamond_with_point_level_with_vertex() {
        // (3, 5) is level with the left and right vertices, so the nudge applies
        let diamond = Polygon::new(vec![(5., 0.), (10., 5.), (5., 10.), (0., 5.)]);
        assert!(diamond.contains(&(3., 5.)));
        assert!(!diamond.contains(&(-1., 5.)));
        assert!(!diamond.contains(&(11., 5.)));
    }

    #[test]
    fn segment_to_the_right_is_crossed() {
        assert!(ray_segment_intersects(&(0., 5.), &(10., 0.), &(10., 10.)));
        // Endpoint order does not matter
        assert!(ray_segment_intersects(&(0., 5.), &(10., 10.), &(10., 0.)));
        // Segment behind the point
        assert!(!ray_segment_intersects(&(20., 5.), &(10., 0.), &(10., 10.)));
        // Segment above the point
        assert!(!ray_segment_intersects(&(0., 50.), &(10., 0.), &(10., 10.)));
    }

    #[test]
    fn nudge_moves_point_off_endpoint() {
        // y == 0 matches the lower endpoint; nudged to y == 1 which is within the edge
        assert!(ray_segment_intersects(&(0., 0.), &(10., 0.), &(10., 10.)));
        // y == 10 matches the upper endpoint; nudged to 11 which is above the edge
        assert!(!ray_segment_intersects(&(0., 10.), &(10., 0.), &(10., 10.)));
    }

    #[test]
    fn degenerate_polygons_contain_nothing() {
        let line = Polygon::new(vec![(0., 0.), (10., 10.)]);
        assert!(!line.contains(&(5., 5.)));
        let empty = Polygon::new(vec![]);
        assert!(!empty.contains(&(0., 0.)));
        let with_nan = Polygon::new(vec![(0., 0.), (f64::NAN, 0.), (10., 10.), (0., 10.)]);
        assert!(!with_nan.contains(&(2., 5.)));
    }

    #[test]
    fn triangle_is_usable() {
        let tri = Polygon::new(vec![(0., 0.), (10., 0.), (0., 10.)]);
        assert!(tri.contains(&(2., 2.)));
        assert!(!tri.contains(&(8., 8.)));
    }

    #[test]
    fn missing_coordinate_means_absent_polygon() {
        let mut quad = QuadCoords::from_points([(0., 0.), (10., 0.), (10., 10.), (0., 10.)]);
        assert!(Polygon::from_quad(&quad).is_some());
        quad.d3y = None;
        assert!(!quad.is_complete());
        assert!(Polygon::from_quad(&quad).is_none());
        assert!(!contains_optional(&(3., 3.), None));
    }

    #[test]
    fn rotation_of_vertex_list_does_not_change_result() {
        let base = vec![(1., 1.), (12., 2.), (11., 9.), (2., 11.)];
        let probes = [(5.2, 5.7), (0.3, 0.4), (11.7, 8.1), (6.1, 10.9), (13., 5.)];
        for shift in 0..base.len() {
            let mut rotated = base.clone();
            rotated.rotate_left(shift);
            let p_base = Polygon::new(base.clone());
            let p_rot = Polygon::new(rotated);
            for probe in probes.iter() {
                assert_eq!(p_base.contains(probe), p_rot.contains(probe));
            }
        }
    }
}
