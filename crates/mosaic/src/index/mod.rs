//! Spatial indexes over tile extents

mod grid;
mod str_tree;

pub use grid::{GridIndex, GridQuery};
pub use str_tree::{IndexStats, Query, SpatialIndex};

use mosaico_core::Rect;

/// Position of a tile in the mosaic's tile table.
pub type TileKey = usize;

/// Index of one resolution level: a tree in general, a grid for regular levels.
#[derive(Debug, Clone)]
pub enum LevelIndex {
    Tree(SpatialIndex),
    Grid(GridIndex),
}

impl LevelIndex {
    /// Build the grid fast path when allowed and applicable, the tree otherwise.
    pub fn build(
        items: Vec<(TileKey, Rect)>,
        leaf_fanout: usize,
        internal_fanout: usize,
        grid_fast_path: bool,
    ) -> mosaico_core::Result<Self> {
        if grid_fast_path {
            if let Some(grid) = GridIndex::try_build(&items) {
                return Ok(LevelIndex::Grid(grid));
            }
        }
        SpatialIndex::build(items, leaf_fanout, internal_fanout).map(LevelIndex::Tree)
    }

    pub fn query(&self, region: Rect) -> LevelQuery<'_> {
        match self {
            LevelIndex::Tree(tree) => LevelQuery::Tree(tree.query(region)),
            LevelIndex::Grid(grid) => LevelQuery::Grid(grid.query(region)),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            LevelIndex::Tree(tree) => tree.len(),
            LevelIndex::Grid(grid) => grid.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_grid(&self) -> bool {
        matches!(self, LevelIndex::Grid(_))
    }
}

/// Lazy range query over a [`LevelIndex`].
pub enum LevelQuery<'a> {
    Tree(Query<'a>),
    Grid(GridQuery<'a>),
}

impl Iterator for LevelQuery<'_> {
    type Item = TileKey;

    fn next(&mut self) -> Option<TileKey> {
        match self {
            LevelQuery::Tree(q) => q.next(),
            LevelQuery::Grid(q) => q.next(),
        }
    }
}
