//! Coordinate tracking for a single build attempt.
//!
//! Every block a build touches is fed to a [`CoordinateTracker`], which keeps
//! a running axis-aligned bounding region. The region later bounds the
//! structure-save command and yields the reported dimensions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A block position in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point3 {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Point3 {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    fn component_min(self, other: Point3) -> Point3 {
        Point3::new(self.x.min(other.x), self.y.min(other.y), self.z.min(other.z))
    }

    fn component_max(self, other: Point3) -> Point3 {
        Point3::new(self.x.max(other.x), self.y.max(other.y), self.z.max(other.z))
    }
}

impl fmt::Display for Point3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.x, self.y, self.z)
    }
}

/// Inclusive axis-aligned box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingRegion {
    pub min: Point3,
    pub max: Point3,
}

impl BoundingRegion {
    /// Region spanning two corners given in any order.
    pub fn from_corners(a: Point3, b: Point3) -> Self {
        Self {
            min: a.component_min(b),
            max: a.component_max(b),
        }
    }

    /// Grow the region to include `p`.
    pub fn include(&mut self, p: Point3) {
        self.min = self.min.component_min(p);
        self.max = self.max.component_max(p);
    }

    pub fn contains(&self, p: Point3) -> bool {
        (self.min.x..=self.max.x).contains(&p.x)
            && (self.min.y..=self.max.y).contains(&p.y)
            && (self.min.z..=self.max.z).contains(&p.z)
    }

    /// The eight corners of the box (duplicates when the box is flat).
    pub fn corners(&self) -> [Point3; 8] {
        let (lo, hi) = (self.min, self.max);
        [
            Point3::new(lo.x, lo.y, lo.z),
            Point3::new(lo.x, lo.y, hi.z),
            Point3::new(lo.x, hi.y, lo.z),
            Point3::new(lo.x, hi.y, hi.z),
            Point3::new(hi.x, lo.y, lo.z),
            Point3::new(hi.x, lo.y, hi.z),
            Point3::new(hi.x, hi.y, lo.z),
            Point3::new(hi.x, hi.y, hi.z),
        ]
    }

    /// Inclusive size: both endpoints are occupied blocks.
    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: i64::from(self.max.x) - i64::from(self.min.x) + 1,
            height: i64::from(self.max.y) - i64::from(self.min.y) + 1,
            depth: i64::from(self.max.z) - i64::from(self.min.z) + 1,
        }
    }
}

/// Size of a structure along x (width), y (height) and z (depth).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: i64,
    pub height: i64,
    pub depth: i64,
}

impl Dimensions {
    /// Block count, or `None` when it does not fit in an `i64`.
    pub fn volume(&self) -> Option<i64> {
        self.width
            .checked_mul(self.height)?
            .checked_mul(self.depth)
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.depth)
    }
}

/// Records every placed point of one build and maintains its bounding region.
#[derive(Debug, Clone, Default)]
pub struct CoordinateTracker {
    points: Vec<Point3>,
    region: Option<BoundingRegion>,
}

impl CoordinateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a point. O(1): only the current min/max are compared.
    pub fn track(&mut self, x: i32, y: i32, z: i32) {
        self.track_point(Point3::new(x, y, z));
    }

    pub fn track_point(&mut self, p: Point3) {
        self.points.push(p);
        match &mut self.region {
            Some(region) => region.include(p),
            None => self.region = Some(BoundingRegion::from_corners(p, p)),
        }
    }

    /// Current bounding region, `None` until something is tracked.
    pub fn bounding_region(&self) -> Option<BoundingRegion> {
        self.region
    }

    pub fn dimensions(&self) -> Option<Dimensions> {
        self.region.map(|r| r.dimensions())
    }

    pub fn points(&self) -> &[Point3] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Forget everything; used between build attempts.
    pub fn reset(&mut self) {
        self.points.clear();
        self.region = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_tracker_has_no_region() {
        let tracker = CoordinateTracker::new();
        assert!(tracker.bounding_region().is_none());
        assert!(tracker.dimensions().is_none());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_single_point_is_one_block() {
        let mut tracker = CoordinateTracker::new();
        tracker.track(4, -2, 9);
        assert_eq!(
            tracker.dimensions(),
            Some(Dimensions {
                width: 1,
                height: 1,
                depth: 1
            })
        );
    }

    #[test]
    fn test_dimensions_match_full_rescan() {
        let points = [
            (3, 7, -1),
            (-5, 0, 2),
            (10, 2, 2),
            (0, -8, 30),
            (1, 1, 1),
            (-5, 64, -9),
        ];
        let mut tracker = CoordinateTracker::new();
        for (i, &(x, y, z)) in points.iter().enumerate() {
            tracker.track(x, y, z);

            let seen = &points[..=i];
            let min_x = seen.iter().map(|p| p.0).min().unwrap();
            let max_x = seen.iter().map(|p| p.0).max().unwrap();
            let min_y = seen.iter().map(|p| p.1).min().unwrap();
            let max_y = seen.iter().map(|p| p.1).max().unwrap();
            let min_z = seen.iter().map(|p| p.2).min().unwrap();
            let max_z = seen.iter().map(|p| p.2).max().unwrap();

            let region = tracker.bounding_region().unwrap();
            assert_eq!(region.min, Point3::new(min_x, min_y, min_z));
            assert_eq!(region.max, Point3::new(max_x, max_y, max_z));
            let dims = tracker.dimensions().unwrap();
            assert_eq!(dims.width, i64::from(max_x - min_x + 1));
            assert_eq!(dims.height, i64::from(max_y - min_y + 1));
            assert_eq!(dims.depth, i64::from(max_z - min_z + 1));
        }
        assert_eq!(tracker.len(), points.len());
    }

    #[test]
    fn test_from_corners_is_order_independent() {
        let a = Point3::new(5, 1, -3);
        let b = Point3::new(-2, 9, 4);
        let ab = BoundingRegion::from_corners(a, b);
        let ba = BoundingRegion::from_corners(b, a);
        assert_eq!(ab, ba);
        assert_eq!(ab.min, Point3::new(-2, 1, -3));
        assert_eq!(ab.max, Point3::new(5, 9, 4));
    }

    #[test]
    fn test_corners_are_contained() {
        let region = BoundingRegion::from_corners(Point3::new(0, 0, 0), Point3::new(2, 3, 4));
        for corner in region.corners() {
            assert!(region.contains(corner));
        }
        assert!(!region.contains(Point3::new(3, 0, 0)));
        assert_eq!(region.dimensions().volume(), Some(3 * 4 * 5));
    }

    #[test]
    fn test_reset_clears_region() {
        let mut tracker = CoordinateTracker::new();
        tracker.track(1, 2, 3);
        tracker.reset();
        assert!(tracker.bounding_region().is_none());
        assert_eq!(tracker.len(), 0);
    }

    #[test]
    fn test_dimensions_display() {
        let dims = Dimensions {
            width: 5,
            height: 4,
            depth: 3,
        };
        assert_eq!(dims.to_string(), "5x4x3");
    }

    #[test]
    fn test_volume_overflow_is_none() {
        let region = BoundingRegion::from_corners(
            Point3::new(i32::MIN, i32::MIN, i32::MIN),
            Point3::new(i32::MAX, i32::MAX, i32::MAX),
        );
        assert_eq!(region.dimensions().volume(), None);
    }
}
