//! Geometry of the mosaic pixel space

mod geotransform;
mod rect;

pub use geotransform::{BBox, GeoTransform};
pub use rect::{PixelWindow, Rect};
