//! Affine georeferencing of the mosaic pixel grid

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geometry::Rect;

/// A geographic bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }
}

/// Affine transformation coefficients relating mosaic pixels to map coordinates.
///
/// ```text
/// x = origin_x + col * pixel_width + row * row_rotation
/// y = origin_y + col * col_rotation + row * pixel_height
/// ```
///
/// Pixels are those of the mosaic's finest resolution. For north-up mosaics the
/// rotations are 0 and `pixel_height` is negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// X coordinate of the upper-left corner
    pub origin_x: f64,
    /// Y coordinate of the upper-left corner
    pub origin_y: f64,
    /// Pixel width (cell size in X direction)
    pub pixel_width: f64,
    /// Pixel height (cell size in Y direction, usually negative)
    pub pixel_height: f64,
    /// Rotation about X axis (usually 0)
    pub row_rotation: f64,
    /// Rotation about Y axis (usually 0)
    pub col_rotation: f64,
}

impl GeoTransform {
    /// Create a new GeoTransform with no rotation (north-up)
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            pixel_width,
            pixel_height,
            row_rotation: 0.0,
            col_rotation: 0.0,
        }
    }

    /// Map coordinates of a pixel corner.
    pub fn pixel_to_geo(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.origin_x + col * self.pixel_width + row * self.row_rotation;
        let y = self.origin_y + col * self.col_rotation + row * self.pixel_height;
        (x, y)
    }

    /// Fractional pixel coordinates of a map position, `None` for a degenerate transform.
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let det = self.pixel_width * self.pixel_height - self.row_rotation * self.col_rotation;

        if det.abs() < 1e-12 {
            return None;
        }

        let dx = x - self.origin_x;
        let dy = y - self.origin_y;

        let col = (self.pixel_height * dx - self.row_rotation * dy) / det;
        let row = (-self.col_rotation * dx + self.pixel_width * dy) / det;

        Some((col, row))
    }

    /// Smallest pixel rectangle containing `bbox`.
    ///
    /// All four corners are transformed, so rotated grids yield the covering
    /// axis-aligned window.
    pub fn bbox_to_pixels(&self, bbox: &BBox) -> Result<Rect> {
        let corners = [
            (bbox.min_x, bbox.min_y),
            (bbox.min_x, bbox.max_y),
            (bbox.max_x, bbox.min_y),
            (bbox.max_x, bbox.max_y),
        ];

        let mut cols = [0.0; 4];
        let mut rows = [0.0; 4];
        for (i, (x, y)) in corners.iter().enumerate() {
            let (c, r) = self.geo_to_pixel(*x, *y).ok_or_else(|| Error::InvalidParameter {
                name: "geo_transform",
                value: format!("{:?}", self),
                reason: "transform is not invertible".into(),
            })?;
            cols[i] = c;
            rows[i] = r;
        }

        let min_col = cols.iter().cloned().fold(f64::INFINITY, f64::min).floor();
        let max_col = cols.iter().cloned().fold(f64::NEG_INFINITY, f64::max).ceil();
        let min_row = rows.iter().cloned().fold(f64::INFINITY, f64::min).floor();
        let max_row = rows.iter().cloned().fold(f64::NEG_INFINITY, f64::max).ceil();

        if !(min_col.is_finite() && max_col.is_finite() && min_row.is_finite() && max_row.is_finite()) {
            return Err(Error::InvalidRegion(format!("bbox {:?} has non-finite bounds", bbox)));
        }

        Rect::new(min_col as i64, min_row as i64, max_col as i64, max_row as i64)
    }

    /// Map extent of a pixel rectangle.
    pub fn pixels_to_bbox(&self, rect: &Rect) -> BBox {
        let corners = [
            self.pixel_to_geo(rect.min_x as f64, rect.min_y as f64),
            self.pixel_to_geo(rect.max_x as f64, rect.min_y as f64),
            self.pixel_to_geo(rect.min_x as f64, rect.max_y as f64),
            self.pixel_to_geo(rect.max_x as f64, rect.max_y as f64),
        ];

        let min_x = corners.iter().map(|c| c.0).fold(f64::INFINITY, f64::min);
        let max_x = corners.iter().map(|c| c.0).fold(f64::NEG_INFINITY, f64::max);
        let min_y = corners.iter().map(|c| c.1).fold(f64::INFINITY, f64::min);
        let max_y = corners.iter().map(|c| c.1).fold(f64::NEG_INFINITY, f64::max);

        BBox::new(min_x, min_y, max_x, max_y)
    }

    /// Check if this is a north-up grid (no rotation)
    pub fn is_north_up(&self) -> bool {
        self.row_rotation.abs() < 1e-10
            && self.col_rotation.abs() < 1e-10
            && self.pixel_height < 0.0
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::new(0.0, 0.0, 1.0, -1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pixel_to_geo_roundtrip() {
        let gt = GeoTransform::new(100.0, 200.0, 10.0, -10.0);

        let (x, y) = gt.pixel_to_geo(5.5, 10.5);
        let (col, row) = gt.geo_to_pixel(x, y).unwrap();

        assert_relative_eq!(col, 5.5, epsilon = 1e-10);
        assert_relative_eq!(row, 10.5, epsilon = 1e-10);
    }

    #[test]
    fn test_bbox_to_pixels_north_up() {
        // 1 unit per pixel, origin at (0, 100)
        let gt = GeoTransform::new(0.0, 100.0, 1.0, -1.0);
        let rect = gt.bbox_to_pixels(&BBox::new(10.0, 10.0, 30.0, 30.0)).unwrap();
        assert_eq!(rect.as_tuple(), (10, 70, 30, 90));
    }

    #[test]
    fn test_bbox_to_pixels_rounds_outward() {
        let gt = GeoTransform::new(0.0, 0.0, 2.0, -2.0);
        let rect = gt.bbox_to_pixels(&BBox::new(1.0, -5.0, 5.0, -1.0)).unwrap();
        assert_eq!(rect.as_tuple(), (0, 0, 3, 3));
    }

    #[test]
    fn test_degenerate_transform() {
        let gt = GeoTransform::new(0.0, 0.0, 0.0, 0.0);
        assert!(gt.geo_to_pixel(1.0, 1.0).is_none());
        assert!(gt.bbox_to_pixels(&BBox::new(0.0, 0.0, 1.0, 1.0)).is_err());
    }

    #[test]
    fn test_pixels_to_bbox() {
        let gt = GeoTransform::new(0.0, 100.0, 1.0, -1.0);
        let bbox = gt.pixels_to_bbox(&Rect::new(0, 0, 100, 100).unwrap());

        assert_relative_eq!(bbox.min_x, 0.0, epsilon = 1e-10);
        assert_relative_eq!(bbox.min_y, 0.0, epsilon = 1e-10);
        assert_relative_eq!(bbox.max_x, 100.0, epsilon = 1e-10);
        assert_relative_eq!(bbox.max_y, 100.0, epsilon = 1e-10);
        assert!(gt.is_north_up());
    }
}
