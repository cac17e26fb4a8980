//! 2-D vectors, polygons and the walkable navmesh

use std::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};

/// Tolerance used for point deduplication and boundary tests
pub const EPS: f64 = 1e-8;

/// A point or direction in world space
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector {
    pub x: f64,
    pub y: f64,
}

impl Vector {
    pub const ZERO: Vector = Vector { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Unit vector pointing at `angle` radians
    pub fn from_angle(angle: f64) -> Self {
        Self::new(angle.cos(), angle.sin())
    }

    pub fn cross(self, other: Vector) -> f64 {
        self.x * other.y - self.y * other.x
    }

    pub fn dot(self, other: Vector) -> f64 {
        self.x * other.x + self.y * other.y
    }

    pub fn length(self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn squared_distance(self, other: Vector) -> f64 {
        let d = self - other;
        d.dot(d)
    }

    pub fn distance(self, other: Vector) -> f64 {
        self.squared_distance(other).sqrt()
    }

    /// Component-wise equality within [`EPS`]
    pub fn almost_equal(self, other: Vector) -> bool {
        (self.x - other.x).abs() < EPS && (self.y - other.y).abs() < EPS
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Add for Vector {
    type Output = Vector;

    fn add(self, other: Vector) -> Vector {
        Vector::new(self.x + other.x, self.y + other.y)
    }
}

impl Sub for Vector {
    type Output = Vector;

    fn sub(self, other: Vector) -> Vector {
        Vector::new(self.x - other.x, self.y - other.y)
    }
}

impl Mul<f64> for Vector {
    type Output = Vector;

    fn mul(self, scalar: f64) -> Vector {
        Vector::new(self.x * scalar, self.y * scalar)
    }
}

impl From<[f64; 2]> for Vector {
    fn from([x, y]: [f64; 2]) -> Self {
        Vector::new(x, y)
    }
}

/// A closed ring of vertices; the last point repeats the first
#[derive(Debug, Clone)]
pub struct Polygon {
    points: Vec<Vector>,
}

impl Polygon {
    /// Build a ring from raw points.
    ///
    /// Consecutive near-equal points collapse into one and an open ring is
    /// closed back to its first point. Rings with fewer than four points
    /// after closing (two or fewer distinct vertices) are rejected.
    pub fn new(raw: &[Vector]) -> Option<Self> {
        let mut points: Vec<Vector> = Vec::with_capacity(raw.len() + 1);
        for &point in raw {
            if points.last().map_or(true, |last| !last.almost_equal(point)) {
                points.push(point);
            }
        }

        let first = *points.first()?;
        let last = *points.last()?;
        if points.len() == 1 || !first.almost_equal(last) {
            points.push(first);
        }

        if points.len() < 4 {
            return None;
        }

        Some(Self { points })
    }

    #[cfg(test)]
    pub fn points(&self) -> &[Vector] {
        &self.points
    }

    fn edges(&self) -> impl Iterator<Item = (Vector, Vector)> + '_ {
        self.points.windows(2).map(|w| (w[0], w[1]))
    }

    /// Even-odd ray casting; points on an edge count as inside.
    ///
    /// Independent of vertex winding and correct for concave rings.
    pub fn contains(&self, point: Vector) -> bool {
        let mut inside = false;
        for (a, b) in self.edges() {
            if on_segment(a, b, point) {
                return true;
            }
            if (a.y > point.y) != (b.y > point.y) {
                let x_cross = a.x + (point.y - a.y) * (b.x - a.x) / (b.y - a.y);
                if point.x < x_cross {
                    inside = !inside;
                }
            }
        }
        inside
    }
}

fn on_segment(a: Vector, b: Vector, p: Vector) -> bool {
    let ab = b - a;
    let ap = p - a;
    if ab.cross(ap).abs() > EPS * ab.length().max(1.0) {
        return false;
    }
    let t = ap.dot(ab);
    t >= -EPS && t <= ab.dot(ab) + EPS
}

/// The set of polygons a player may stand in, clipped to the world rectangle
#[derive(Debug, Clone)]
pub struct Navmesh {
    bounds: Vector,
    polygons: Vec<Polygon>,
}

impl Navmesh {
    /// Build from raw point lists, silently dropping degenerate rings
    pub fn build(bounds: Vector, point_sets: &[Vec<[f64; 2]>]) -> Self {
        let polygons = point_sets
            .iter()
            .filter_map(|set| {
                let points: Vec<Vector> = set.iter().copied().map(Vector::from).collect();
                Polygon::new(&points)
            })
            .collect();

        Self { bounds, polygons }
    }

    pub fn bounds(&self) -> Vector {
        self.bounds
    }

    pub fn polygons(&self) -> &[Polygon] {
        &self.polygons
    }

    pub fn in_bounds(&self, point: Vector) -> bool {
        point.is_finite()
            && point.x >= 0.0
            && point.y >= 0.0
            && point.x <= self.bounds.x
            && point.y <= self.bounds.y
    }

    /// True iff the point is inside the world rectangle and at least one polygon
    pub fn contains(&self, point: Vector) -> bool {
        self.in_bounds(point) && self.polygons.iter().any(|poly| poly.contains(point))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x0: f64, y0: f64, size: f64) -> Vec<[f64; 2]> {
        vec![
            [x0, y0],
            [x0 + size, y0],
            [x0 + size, y0 + size],
            [x0, y0 + size],
        ]
    }

    #[test]
    fn vector_arithmetic() {
        let a = Vector::new(1.0, 2.0);
        let b = Vector::new(4.0, 6.0);
        assert_eq!(a + b, Vector::new(5.0, 8.0));
        assert_eq!(b - a, Vector::new(3.0, 4.0));
        assert_eq!(a * 2.0, Vector::new(2.0, 4.0));
        assert_eq!(a.squared_distance(b), 25.0);
        assert_eq!(a.cross(b), 1.0 * 6.0 - 2.0 * 4.0);
        assert!(a.almost_equal(Vector::new(1.0 + 1e-9, 2.0 - 1e-9)));
        assert!(!a.almost_equal(Vector::new(1.0 + 1e-6, 2.0)));
    }

    #[test]
    fn polygon_closes_open_ring_and_dedupes() {
        let raw = [
            Vector::new(0.0, 0.0),
            Vector::new(0.0, 0.0),
            Vector::new(10.0, 0.0),
            Vector::new(10.0, 1e-10),
            Vector::new(10.0, 10.0),
        ];
        let poly = Polygon::new(&raw).unwrap();
        assert_eq!(poly.points().len(), 4);
        assert!(poly.points()[0].almost_equal(poly.points()[3]));
    }

    #[test]
    fn polygon_keeps_explicitly_closed_ring() {
        let raw = [
            Vector::new(0.0, 0.0),
            Vector::new(10.0, 0.0),
            Vector::new(10.0, 10.0),
            Vector::new(0.0, 0.0),
        ];
        assert_eq!(Polygon::new(&raw).unwrap().points().len(), 4);
    }

    #[test]
    fn degenerate_rings_are_discarded() {
        assert!(Polygon::new(&[]).is_none());
        assert!(Polygon::new(&[Vector::new(1.0, 1.0)]).is_none());
        assert!(Polygon::new(&[Vector::new(0.0, 0.0), Vector::new(5.0, 5.0)]).is_none());
        assert!(Polygon::new(&[
            Vector::new(0.0, 0.0),
            Vector::new(5.0, 5.0),
            Vector::new(0.0, 0.0)
        ])
        .is_none());
    }

    #[test]
    fn containment_ignores_winding() {
        let ccw = square(0.0, 0.0, 10.0);
        let mut cw = ccw.clone();
        cw.reverse();
        let mesh = Navmesh::build(Vector::new(100.0, 100.0), &[ccw]);
        let mesh_cw = Navmesh::build(Vector::new(100.0, 100.0), &[cw]);

        for mesh in [&mesh, &mesh_cw] {
            assert!(mesh.contains(Vector::new(5.0, 5.0)));
            assert!(mesh.contains(Vector::new(0.0, 5.0)));
            assert!(!mesh.contains(Vector::new(15.0, 5.0)));
            assert!(!mesh.contains(Vector::new(5.0, -1.0)));
        }
    }

    #[test]
    fn concave_ring() {
        // L shape with the notch at the top right
        let l = vec![
            [0.0, 0.0],
            [20.0, 0.0],
            [20.0, 10.0],
            [10.0, 10.0],
            [10.0, 20.0],
            [0.0, 20.0],
        ];
        let mesh = Navmesh::build(Vector::new(100.0, 100.0), &[l]);
        assert!(mesh.contains(Vector::new(5.0, 15.0)));
        assert!(mesh.contains(Vector::new(15.0, 5.0)));
        assert!(!mesh.contains(Vector::new(15.0, 15.0)));
    }

    #[test]
    fn union_of_polygons_and_world_bounds() {
        let mesh = Navmesh::build(
            Vector::new(50.0, 50.0),
            &[
                square(0.0, 0.0, 10.0),
                square(30.0, 30.0, 40.0),
                vec![[1.0, 1.0], [2.0, 2.0]],
            ],
        );
        assert_eq!(mesh.polygons().len(), 2);
        assert!(mesh.contains(Vector::new(35.0, 35.0)));
        assert!(!mesh.contains(Vector::new(20.0, 20.0)));
        // inside the second square but outside the world rectangle
        assert!(!mesh.contains(Vector::new(60.0, 60.0)));
        assert!(!mesh.contains(Vector::new(f64::NAN, 5.0)));
    }
}
