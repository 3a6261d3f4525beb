//! Integer rectangles in mosaic pixel space

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An axis-aligned, half-open rectangle `[min_x, max_x) x [min_y, max_y)`.
///
/// Coordinates are pixels of the mosaic's finest resolution. Two rectangles that
/// only share an edge do not intersect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub min_x: i64,
    pub min_y: i64,
    pub max_x: i64,
    pub max_y: i64,
}

impl Rect {
    /// Largest coordinate magnitude a rectangle may have.
    ///
    /// Widths, centroids and bounding boxes of valid rectangles stay within `i64`.
    pub const COORD_LIMIT: i64 = i64::MAX / 4;

    /// Create a non-empty rectangle from its corners.
    pub fn new(min_x: i64, min_y: i64, max_x: i64, max_y: i64) -> Result<Self> {
        let rect = Self { min_x, min_y, max_x, max_y };
        rect.validate()?;
        Ok(rect)
    }

    /// Check that the rectangle is non-empty and its measures are representable.
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::InvalidRegion(format!("{self} is empty or inverted")));
        }
        let limit = -Self::COORD_LIMIT..=Self::COORD_LIMIT;
        if [self.min_x, self.min_y, self.max_x, self.max_y]
            .iter()
            .any(|c| !limit.contains(c))
        {
            return Err(Error::InvalidRegion(format!(
                "{self} exceeds the coordinate limit of {}",
                Self::COORD_LIMIT
            )));
        }
        let width = self.max_x.checked_sub(self.min_x);
        let height = self.max_y.checked_sub(self.min_y);
        let area = width
            .zip(height)
            .and_then(|(w, h)| (w as u64).checked_mul(h as u64));
        if area.is_none() {
            return Err(Error::InvalidRegion(format!("area of {self} overflows")));
        }
        Ok(())
    }

    /// Build without validation. Callers guarantee `min < max` on both axes.
    pub(crate) const fn new_unchecked(min_x: i64, min_y: i64, max_x: i64, max_y: i64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    pub fn width(&self) -> u64 {
        (self.max_x - self.min_x) as u64
    }

    pub fn height(&self) -> u64 {
        (self.max_y - self.min_y) as u64
    }

    pub fn area(&self) -> u64 {
        self.width() * self.height()
    }

    pub fn is_empty(&self) -> bool {
        self.min_x >= self.max_x || self.min_y >= self.max_y
    }

    /// Check if two rectangles share at least one pixel.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
    }

    /// Whether `other` lies entirely inside `self`.
    pub fn contains(&self, other: &Rect) -> bool {
        self.min_x <= other.min_x
            && self.min_y <= other.min_y
            && self.max_x >= other.max_x
            && self.max_y >= other.max_y
    }

    /// Whether the pixel at `(x, y)` lies inside `self`.
    pub fn contains_point(&self, x: i64, y: i64) -> bool {
        x >= self.min_x && x < self.max_x && y >= self.min_y && y < self.max_y
    }

    /// Shared pixels of both rectangles, or `None` when they do not intersect.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        if !self.intersects(other) {
            return None;
        }
        Some(Rect::new_unchecked(
            self.min_x.max(other.min_x),
            self.min_y.max(other.min_y),
            self.max_x.min(other.max_x),
            self.max_y.min(other.max_y),
        ))
    }

    /// Smallest rectangle covering both.
    pub fn union(&self, other: &Rect) -> Rect {
        Rect::new_unchecked(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }

    /// Pixels of `self` not covered by `cut`, as at most four disjoint pieces.
    ///
    /// Pieces come in a fixed order: the band above `cut`, the band below it,
    /// then the left and right remainders of the middle band.
    pub fn subtract(&self, cut: &Rect) -> Vec<Rect> {
        let Some(inner) = self.intersection(cut) else {
            return vec![*self];
        };

        let mut pieces = Vec::with_capacity(4);
        if self.min_y < inner.min_y {
            pieces.push(Rect::new_unchecked(self.min_x, self.min_y, self.max_x, inner.min_y));
        }
        if inner.max_y < self.max_y {
            pieces.push(Rect::new_unchecked(self.min_x, inner.max_y, self.max_x, self.max_y));
        }
        if self.min_x < inner.min_x {
            pieces.push(Rect::new_unchecked(self.min_x, inner.min_y, inner.min_x, inner.max_y));
        }
        if inner.max_x < self.max_x {
            pieces.push(Rect::new_unchecked(inner.max_x, inner.min_y, self.max_x, inner.max_y));
        }
        pieces
    }

    /// Twice the centroid, so that it stays exact in integers.
    pub fn center2(&self) -> (i64, i64) {
        (self.min_x + self.max_x, self.min_y + self.max_y)
    }

    /// Bounding box of a sequence of rectangles.
    pub fn bounding<'a, I>(rects: I) -> Option<Rect>
    where
        I: IntoIterator<Item = &'a Rect>,
    {
        rects.into_iter().fold(None, |acc, r| match acc {
            None => Some(*r),
            Some(b) => Some(b.union(r)),
        })
    }

    pub fn as_tuple(&self) -> (i64, i64, i64, i64) {
        (self.min_x, self.min_y, self.max_x, self.max_y)
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}, {})", self.min_x, self.min_y, self.max_x, self.max_y)
    }
}

/// A pixel window inside one tile source: offset and size in source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelWindow {
    pub x: u64,
    pub y: u64,
    pub width: u64,
    pub height: u64,
}

impl PixelWindow {
    pub fn new(x: u64, y: u64, width: u64, height: u64) -> Self {
        Self { x, y, width, height }
    }

    /// Exclusive end column.
    pub fn max_x(&self) -> u64 {
        self.x + self.width
    }

    /// Exclusive end row.
    pub fn max_y(&self) -> u64 {
        self.y + self.height
    }

    pub fn area(&self) -> u64 {
        self.width * self.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(a: i64, b: i64, c: i64, d: i64) -> Rect {
        Rect::new(a, b, c, d).unwrap()
    }

    #[test]
    fn test_new_rejects_empty() {
        assert!(Rect::new(0, 0, 0, 10).is_err());
        assert!(Rect::new(5, 0, 1, 10).is_err());
        assert!(Rect::new(0, 0, 1, 1).is_ok());
    }

    #[test]
    fn test_new_rejects_unrepresentable_extents() {
        let wide = Rect::new(i64::MIN / 2 - 10, 0, i64::MAX / 2 + 10, 1);
        assert!(matches!(wide, Err(Error::InvalidRegion(_))));
        assert!(Rect::new(i64::MIN, 0, 0, 1).is_err());
        // Each side fits but the area does not
        let lim = Rect::COORD_LIMIT;
        assert!(Rect::new(-lim, -lim, lim, lim).is_err());
        let edge = Rect::new(-lim, 0, lim, 1).unwrap();
        assert_eq!(edge.width(), 2 * lim as u64);
        assert_eq!(edge.center2(), (0, 1));
    }

    #[test]
    fn test_validate_catches_literal_rects() {
        let literal = Rect { min_x: 0, min_y: 0, max_x: i64::MAX, max_y: 1 };
        assert!(literal.validate().is_err());
        assert!(Rect { min_x: 3, min_y: 0, max_x: 3, max_y: 1 }.validate().is_err());
        assert!(Rect { min_x: 0, min_y: 0, max_x: 3, max_y: 1 }.validate().is_ok());
    }

    #[test]
    fn test_intersects_excludes_touching() {
        let a = r(0, 0, 10, 10);
        assert!(a.intersects(&r(5, 5, 15, 15)));
        assert!(!a.intersects(&r(10, 0, 20, 10)));
        assert!(!a.intersects(&r(20, 20, 30, 30)));
    }

    #[test]
    fn test_intersection() {
        let a = r(0, 0, 10, 10);
        assert_eq!(a.intersection(&r(5, -5, 15, 5)), Some(r(5, 0, 10, 5)));
        assert_eq!(a.intersection(&r(10, 10, 11, 11)), None);
    }

    #[test]
    fn test_subtract_center_hole() {
        let a = r(0, 0, 10, 10);
        let pieces = a.subtract(&r(3, 3, 6, 6));
        assert_eq!(
            pieces,
            vec![r(0, 0, 10, 3), r(0, 6, 10, 10), r(0, 3, 3, 6), r(6, 3, 10, 6)]
        );
        let total: u64 = pieces.iter().map(Rect::area).sum();
        assert_eq!(total, 100 - 9);
        for (i, p) in pieces.iter().enumerate() {
            for q in &pieces[i + 1..] {
                assert!(!p.intersects(q));
            }
        }
    }

    #[test]
    fn test_subtract_disjoint_and_covering() {
        let a = r(0, 0, 10, 10);
        assert_eq!(a.subtract(&r(20, 20, 30, 30)), vec![a]);
        assert!(a.subtract(&r(-1, -1, 11, 11)).is_empty());
    }

    #[test]
    fn test_bounding() {
        let rects = [r(0, 0, 1, 1), r(5, -2, 6, 3)];
        assert_eq!(Rect::bounding(rects.iter()), Some(r(0, -2, 6, 3)));
        assert_eq!(Rect::bounding(std::iter::empty()), None);
    }
}
