use crate::Point2D;

pub fn distance_points(a: &Point2D, b: &Point2D) -> f64 {
    let (x1, y1) = *a;
    let (x2, y2) = *b;

    f64::sqrt(f64::powi(x1 - x2, 2) + f64::powi(y1 - y2, 2))
}

pub fn centroid(points: &[Point2D]) -> Option<Point2D> {
    let count = points.len();
    points
        .iter()
        .cloned()
        .reduce(|acc, el| (acc.0 + el.0, acc.1 + el.1))
        .map(|(x, y)| (x / count as f64, y / count as f64))
}

/// Twice the signed area of the triangle (a, b, c); positive when the
/// points turn counter-clockwise (on a positive-y-up graph)
pub fn cross(a: &Point2D, b: &Point2D, c: &Point2D) -> f64 {
    (b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0)
}

/// Largest distance along either axis covered by the points
pub fn extent(points: &[Point2D]) -> f64 {
    let (mut x_min, mut y_min) = (f64::INFINITY, f64::INFINITY);
    let (mut x_max, mut y_max) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for (x, y) in points {
        x_min = x_min.min(*x);
        y_min = y_min.min(*y);
        x_max = x_max.max(*x);
        y_max = y_max.max(*y);
    }
    if points.is_empty() {
        0.
    } else {
        (x_max - x_min).max(y_max - y_min)
    }
}

/// True if any three of the given points lie (nearly) on a common line.
/// Tolerance scales with the squared extent of the point set, so the test
/// behaves the same for pixel and normalised coordinates.
pub fn has_collinear_triple(points: &[Point2D]) -> bool {
    let span = extent(points);
    if span <= f64::EPSILON {
        return true;
    }
    let tolerance = 1e-6 * span * span;
    let n = points.len();
    for i in 0..n {
        for j in (i + 1)..n {
            for k in (j + 1)..n {
                if cross(&points[i], &points[j], &points[k]).abs() <= tolerance {
                    return true;
                }
            }
        }
    }
    false
}

pub fn is_finite_point(p: &Point2D) -> bool {
    p.0.is_finite() && p.1.is_finite()
}
