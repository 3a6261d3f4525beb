//! Cell grid for regular levels.
//!
//! When every tile of a level has the same size and sits on a common lattice,
//! the tile covering a cell is found by arithmetic instead of a tree descent.

use std::ops::Range;

use mosaico_core::Rect;

use super::TileKey;

/// Grids sparser than this many cells per tile fall back to the tree.
const MAX_CELLS_PER_TILE: usize = 4;

/// Row-major cell grid over equally sized, aligned tiles.
#[derive(Debug, Clone)]
pub struct GridIndex {
    origin_x: i64,
    origin_y: i64,
    cell_width: i64,
    cell_height: i64,
    cols: usize,
    rows: usize,
    cells: Vec<Option<TileKey>>,
    len: usize,
}

impl GridIndex {
    /// Build a grid if the extents form a regular lattice with at most one tile per cell.
    pub fn try_build(items: &[(TileKey, Rect)]) -> Option<Self> {
        let (_, first) = items.first()?;
        let cell_width = first.width() as i64;
        let cell_height = first.height() as i64;

        if items
            .iter()
            .any(|(_, e)| e.width() as i64 != cell_width || e.height() as i64 != cell_height)
        {
            return None;
        }

        let bounds = Rect::bounding(items.iter().map(|(_, e)| e))?;
        let (origin_x, origin_y) = (bounds.min_x, bounds.min_y);

        if items.iter().any(|(_, e)| {
            (e.min_x - origin_x) % cell_width != 0 || (e.min_y - origin_y) % cell_height != 0
        }) {
            return None;
        }

        let cols = (bounds.width() as i64 / cell_width) as usize;
        let rows = (bounds.height() as i64 / cell_height) as usize;
        let total = cols.checked_mul(rows)?;
        if total > items.len().saturating_mul(MAX_CELLS_PER_TILE) {
            return None;
        }

        let mut cells = vec![None; total];
        for (key, e) in items {
            let col = ((e.min_x - origin_x) / cell_width) as usize;
            let row = ((e.min_y - origin_y) / cell_height) as usize;
            let cell = &mut cells[row * cols + col];
            if cell.is_some() {
                // Duplicate coverage needs the tree's priority handling
                return None;
            }
            *cell = Some(*key);
        }

        Some(Self {
            origin_x,
            origin_y,
            cell_width,
            cell_height,
            cols,
            rows,
            cells,
            len: items.len(),
        })
    }

    /// Lazily yield tiles intersecting `region`, row by row.
    pub fn query(&self, region: Rect) -> GridQuery<'_> {
        let cols = span(region.min_x, region.max_x, self.origin_x, self.cell_width, self.cols);
        let rows = span(region.min_y, region.max_y, self.origin_y, self.cell_height, self.rows);
        let col = cols.start;
        GridQuery {
            grid: self,
            cols,
            rows,
            col,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// `(cols, rows)` of the lattice.
    pub fn shape(&self) -> (usize, usize) {
        (self.cols, self.rows)
    }
}

/// Cell indices along one axis whose cells intersect `[min, max)`.
fn span(min: i64, max: i64, origin: i64, cell: i64, count: usize) -> Range<usize> {
    let first = (min - origin).div_euclid(cell).clamp(0, count as i64) as usize;
    let last = (-(-(max - origin)).div_euclid(cell)).clamp(0, count as i64) as usize;
    first..last.max(first)
}

/// Lazy range query over a [`GridIndex`].
pub struct GridQuery<'a> {
    grid: &'a GridIndex,
    cols: Range<usize>,
    rows: Range<usize>,
    col: usize,
}

impl Iterator for GridQuery<'_> {
    type Item = TileKey;

    fn next(&mut self) -> Option<TileKey> {
        while self.rows.start < self.rows.end {
            while self.col < self.cols.end {
                let cell = self.grid.cells[self.rows.start * self.grid.cols + self.col];
                self.col += 1;
                if let Some(key) = cell {
                    return Some(key);
                }
            }
            self.rows.start += 1;
            self.col = self.cols.start;
        }
        None
    }
}
