//! Bulk-loaded R-tree over tile extents.
//!
//! The tree is packed with Sort-Tile-Recursive (STR): items are sorted by
//! centroid x, cut into vertical slabs, each slab is sorted by centroid y and cut
//! into nodes of `fanout` items. The same packing is applied level by level until
//! a single root remains. Grouping by centroid keeps small detail tiles and
//! mosaic-wide overview tiles in compact nodes without assuming a tile size.
//!
//! Nodes live in one arena and refer to their children by index. Children of an
//! internal node, like the entries of a leaf, are stored contiguously.

use std::ops::Range;

use mosaico_core::{Error, Rect, Result};

use super::TileKey;
use crate::maybe_rayon::*;

type NodeId = usize;

#[derive(Debug, Clone, Copy)]
struct Entry {
    extent: Rect,
    key: TileKey,
}

#[derive(Debug, Clone, Copy)]
enum NodeKind {
    /// Range into `entries`.
    Leaf { start: usize, end: usize },
    /// Range into `nodes`.
    Internal { start: usize, end: usize },
}

#[derive(Debug, Clone, Copy)]
struct Node {
    bbox: Rect,
    kind: NodeKind,
}

/// Shape of a built index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    pub tiles: usize,
    pub nodes: usize,
    pub leaves: usize,
    /// Number of node levels from root to leaves, inclusive.
    pub depth: usize,
    pub bounds: Rect,
}

/// Read-only spatial index over tile extents.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    nodes: Vec<Node>,
    entries: Vec<Entry>,
    root: NodeId,
    depth: usize,
    leaf_fanout: usize,
    internal_fanout: usize,
}

impl SpatialIndex {
    /// Bulk-load the index from `(key, extent)` pairs.
    ///
    /// Fails with [`Error::EmptyMosaic`] when `items` is empty. The build is
    /// deterministic: the same input order always yields the same tree.
    pub fn build<I>(items: I, leaf_fanout: usize, internal_fanout: usize) -> Result<Self>
    where
        I: IntoIterator<Item = (TileKey, Rect)>,
    {
        let mut entries: Vec<Entry> = items
            .into_iter()
            .map(|(key, extent)| Entry { extent, key })
            .collect();

        if entries.is_empty() {
            return Err(Error::EmptyMosaic);
        }
        let leaf_fanout = leaf_fanout.max(2);
        let internal_fanout = internal_fanout.max(2);

        let groups = str_pack(&mut entries, leaf_fanout, |e| e.extent);
        let mut level: Vec<Node> = groups
            .into_iter()
            .map(|g| Node {
                bbox: group_bounds(&entries[g.clone()], |e| e.extent),
                kind: NodeKind::Leaf {
                    start: g.start,
                    end: g.end,
                },
            })
            .collect();

        let mut nodes: Vec<Node> = Vec::new();
        let mut depth = 1;

        while level.len() > 1 {
            let groups = str_pack(&mut level, internal_fanout, |n| n.bbox);
            let mut parents = Vec::with_capacity(groups.len());

            for g in groups {
                if g.len() == 1 {
                    // Promote a lone node instead of wrapping it in a one-child parent
                    parents.push(level[g.start]);
                    continue;
                }
                let start = nodes.len();
                nodes.extend_from_slice(&level[g.clone()]);
                parents.push(Node {
                    bbox: group_bounds(&level[g], |n| n.bbox),
                    kind: NodeKind::Internal {
                        start,
                        end: nodes.len(),
                    },
                });
            }

            level = parents;
            depth += 1;
        }

        nodes.append(&mut level);
        let root = nodes.len() - 1;

        Ok(Self {
            nodes,
            entries,
            root,
            depth,
            leaf_fanout,
            internal_fanout,
        })
    }

    /// Lazily yield the key of every tile whose extent intersects `region`.
    ///
    /// The order is depth-first, children in storage order, and is stable for a
    /// given index.
    pub fn query(&self, region: Rect) -> Query<'_> {
        Query {
            index: self,
            region,
            stack: vec![self.root],
            leaf: 0..0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bounding box of every indexed extent.
    pub fn bounds(&self) -> Rect {
        self.nodes[self.root].bbox
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            tiles: self.entries.len(),
            nodes: self.nodes.len(),
            leaves: self
                .nodes
                .iter()
                .filter(|n| matches!(n.kind, NodeKind::Leaf { .. }))
                .count(),
            depth: self.depth,
            bounds: self.bounds(),
        }
    }

    /// Verify containment and fan-out bounds for every node.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        for node in &self.nodes {
            match node.kind {
                NodeKind::Leaf { start, end } => {
                    assert!(end > start && end - start <= self.leaf_fanout);
                    for e in &self.entries[start..end] {
                        assert!(node.bbox.contains(&e.extent));
                    }
                }
                NodeKind::Internal { start, end } => {
                    assert!(end - start >= 2 && end - start <= self.internal_fanout);
                    for child in &self.nodes[start..end] {
                        assert!(node.bbox.contains(&child.bbox));
                    }
                }
            }
        }
    }
}

/// Lazy range query over a [`SpatialIndex`].
pub struct Query<'a> {
    index: &'a SpatialIndex,
    region: Rect,
    stack: Vec<NodeId>,
    leaf: Range<usize>,
}

impl Iterator for Query<'_> {
    type Item = TileKey;

    fn next(&mut self) -> Option<TileKey> {
        loop {
            for i in self.leaf.by_ref() {
                let entry = &self.index.entries[i];
                if entry.extent.intersects(&self.region) {
                    return Some(entry.key);
                }
            }

            let id = self.stack.pop()?;
            let node = &self.index.nodes[id];
            if !node.bbox.intersects(&self.region) {
                continue;
            }
            match node.kind {
                NodeKind::Leaf { start, end } => self.leaf = start..end,
                // Reversed so the first child is visited first
                NodeKind::Internal { start, end } => self.stack.extend((start..end).rev()),
            }
        }
    }
}

/// Reorder `items` in place into STR groups of at most `fanout` and return the group ranges.
///
/// Slabs and the groups inside each slab are split as evenly as possible, so a
/// group has a single member only when its slab does.
fn str_pack<T, F>(items: &mut [T], fanout: usize, rect_of: F) -> Vec<Range<usize>>
where
    T: Send,
    F: Fn(&T) -> Rect + Sync,
{
    let n = items.len();
    let groups = n.div_ceil(fanout);
    let slabs = ((groups as f64).sqrt().ceil() as usize).clamp(1, n.max(1));

    items.par_sort_by_key(|item| rect_of(item).center2());

    let mut ranges = Vec::with_capacity(groups);
    for slab in split_even(0..n, slabs) {
        items[slab.clone()].sort_by_key(|item| {
            let (cx, cy) = rect_of(item).center2();
            (cy, cx)
        });
        ranges.extend(split_even(slab.clone(), slab.len().div_ceil(fanout)));
    }
    ranges
}

/// Cut `range` into `parts` contiguous ranges whose lengths differ by at most one.
fn split_even(range: Range<usize>, parts: usize) -> Vec<Range<usize>> {
    let len = range.len();
    let parts = parts.clamp(1, len.max(1));
    let (base, extra) = (len / parts, len % parts);

    let mut out = Vec::with_capacity(parts);
    let mut start = range.start;
    for i in 0..parts {
        let end = start + base + usize::from(i < extra);
        if end > start {
            out.push(start..end);
        }
        start = end;
    }
    out
}

/// Union of the rectangles of a non-empty group.
fn group_bounds<T>(group: &[T], rect_of: impl Fn(&T) -> Rect) -> Rect {
    group[1..]
        .iter()
        .fold(rect_of(&group[0]), |acc, item| acc.union(&rect_of(item)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(a: i64, b: i64, c: i64, d: i64) -> Rect {
        Rect::new(a, b, c, d).unwrap()
    }

    fn grid(n: i64, size: i64) -> Vec<(TileKey, Rect)> {
        let mut out = Vec::new();
        for row in 0..n {
            for col in 0..n {
                let key = (row * n + col) as TileKey;
                out.push((key, r(col * size, row * size, (col + 1) * size, (row + 1) * size)));
            }
        }
        out
    }

    fn sorted(mut v: Vec<TileKey>) -> Vec<TileKey> {
        v.sort_unstable();
        v
    }

    #[test]
    fn test_build_empty_fails() {
        let err = SpatialIndex::build(Vec::new(), 8, 8).unwrap_err();
        assert!(matches!(err, Error::EmptyMosaic));
    }

    #[test]
    fn test_single_tile() {
        let index = SpatialIndex::build(vec![(0, r(0, 0, 10, 10))], 8, 8).unwrap();
        assert_eq!(index.depth(), 1);
        assert_eq!(index.query(r(5, 5, 6, 6)).collect::<Vec<_>>(), vec![0]);
        assert!(index.query(r(10, 10, 20, 20)).next().is_none());
    }

    #[test]
    fn test_grid_query_matches_cells() {
        let index = SpatialIndex::build(grid(20, 10), 4, 4).unwrap();
        index.check_invariants();
        assert!(index.depth() >= 3);

        let hits = sorted(index.query(r(15, 15, 25, 25)).collect());
        assert_eq!(hits, vec![21, 22, 41, 42]);
    }

    #[test]
    fn test_overview_and_detail_tiles() {
        let mut items = grid(10, 10);
        items.push((100, r(0, 0, 100, 100)));
        let index = SpatialIndex::build(items, 4, 4).unwrap();
        index.check_invariants();

        let hits = sorted(index.query(r(0, 0, 5, 5)).collect());
        assert_eq!(hits, vec![0, 100]);
        assert_eq!(index.bounds(), r(0, 0, 100, 100));
    }

    #[test]
    fn test_query_order_is_stable() {
        let index = SpatialIndex::build(grid(16, 8), 5, 3).unwrap();
        let a: Vec<_> = index.query(r(3, 3, 90, 70)).collect();
        let b: Vec<_> = index.query(r(3, 3, 90, 70)).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_stats() {
        let index = SpatialIndex::build(grid(4, 1), 4, 4).unwrap();
        let stats = index.stats();
        assert_eq!(stats.tiles, 16);
        assert_eq!(stats.leaves, 4);
        assert_eq!(stats.nodes, 5);
        assert_eq!(stats.depth, 2);
    }

    #[test]
    fn test_str_pack_groups_respect_fanout() {
        for n in 1..60 {
            let mut items: Vec<Rect> = (0..n).map(|i| r(i, 0, i + 1, 1)).collect();
            let groups = str_pack(&mut items, 4, |r| *r);
            assert!(groups.iter().all(|g| !g.is_empty() && g.len() <= 4));
            assert_eq!(groups.iter().map(|g| g.len()).sum::<usize>(), n as usize);
        }
    }

    #[test]
    fn test_split_even() {
        assert_eq!(split_even(0..10, 3), vec![0..4, 4..7, 7..10]);
        assert_eq!(split_even(5..6, 4), vec![5..6]);
        assert_eq!(split_even(0..0, 2), Vec::<Range<usize>>::new());
    }

    #[test]
    fn test_fanout_two_keeps_invariants() {
        for n in 2..40 {
            let items: Vec<(TileKey, Rect)> =
                (0..n).map(|i| (i as TileKey, r(i * 3, i % 5, i * 3 + 4, i % 5 + 2))).collect();
            let index = SpatialIndex::build(items, 2, 2).unwrap();
            index.check_invariants();
            assert_eq!(index.query(index.bounds()).count(), n as usize);
        }
    }
}
