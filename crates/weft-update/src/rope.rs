// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Rope over runs of record fields.
//!
//! A rope node covers a run of consecutive fields; initially one node
//! covers the whole array. Addressing a field splits the run it falls
//! into, so insert, erase, and extract cost O(log n) in the number of
//! *touched* runs and never copy untouched siblings. Items live in an
//! index-addressed arena, which keeps node references stable across
//! rebalancing and sidesteps ownership cycles.
//!
//! The tree is a treap ordered by implicit unit position; priorities
//! come from a deterministic xorshift so a given operation sequence
//! always builds the same shape.

use crate::error::Result;

const NIL: u32 = u32::MAX;

/// Splits an item at a unit offset, mutating it into the head run and
/// returning the tail run. Fallible: splitting walks encoded data.
pub(crate) type SplitFn<'s, T> = &'s mut dyn FnMut(&mut T, u32) -> Result<T>;

#[derive(Debug)]
struct Node<T> {
    left: u32,
    right: u32,
    prio: u64,
    /// Units covered by the whole subtree.
    tree_size: u32,
    /// Units covered by this node's item.
    leaf_size: u32,
    item: T,
}

#[derive(Debug)]
pub(crate) struct Rope<T> {
    nodes: Vec<Node<T>>,
    root: u32,
    rng: u64,
}

impl<T> Rope<T> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            root: NIL,
            rng: 0x9e37_79b9_7f4a_7c15,
        }
    }

    pub fn size(&self) -> u32 {
        self.subtree_size(self.root)
    }

    pub fn item(&self, idx: u32) -> &T {
        &self.nodes[idx as usize].item
    }

    pub fn item_mut(&mut self, idx: u32) -> &mut T {
        &mut self.nodes[idx as usize].item
    }

    pub fn leaf_size(&self, idx: u32) -> u32 {
        self.nodes[idx as usize].leaf_size
    }

    fn next_prio(&mut self) -> u64 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng = x;
        x
    }

    fn subtree_size(&self, idx: u32) -> u32 {
        if idx == NIL {
            0
        } else {
            self.nodes[idx as usize].tree_size
        }
    }

    fn update(&mut self, idx: u32) {
        let left = self.nodes[idx as usize].left;
        let right = self.nodes[idx as usize].right;
        let size = self.subtree_size(left)
            + self.nodes[idx as usize].leaf_size
            + self.subtree_size(right);
        self.nodes[idx as usize].tree_size = size;
    }

    fn new_node(&mut self, item: T, size: u32) -> u32 {
        let prio = self.next_prio();
        let idx = self.nodes.len() as u32;
        self.nodes.push(Node {
            left: NIL,
            right: NIL,
            prio,
            tree_size: size,
            leaf_size: size,
            item,
        });
        idx
    }

    fn merge(&mut self, l: u32, r: u32) -> u32 {
        if l == NIL {
            return r;
        }
        if r == NIL {
            return l;
        }
        if self.nodes[l as usize].prio >= self.nodes[r as usize].prio {
            let merged = self.merge(self.nodes[l as usize].right, r);
            self.nodes[l as usize].right = merged;
            self.update(l);
            l
        } else {
            let merged = self.merge(l, self.nodes[r as usize].left);
            self.nodes[r as usize].left = merged;
            self.update(r);
            r
        }
    }

    /// Split the subtree into trees covering the first `k` units and
    /// the rest. Splits an item in two when `k` falls inside a run.
    fn split(&mut self, idx: u32, k: u32, split_fn: SplitFn<'_, T>) -> Result<(u32, u32)> {
        if idx == NIL {
            return Ok((NIL, NIL));
        }
        let left = self.nodes[idx as usize].left;
        let right = self.nodes[idx as usize].right;
        let left_size = self.subtree_size(left);
        let leaf_size = self.nodes[idx as usize].leaf_size;
        if k <= left_size {
            let (a, b) = self.split(left, k, split_fn)?;
            self.nodes[idx as usize].left = b;
            self.update(idx);
            Ok((a, idx))
        } else if k >= left_size + leaf_size {
            let (a, b) = self.split(right, k - left_size - leaf_size, split_fn)?;
            self.nodes[idx as usize].right = a;
            self.update(idx);
            Ok((idx, b))
        } else {
            // The boundary falls inside this node's run.
            let at = k - left_size;
            let tail = split_fn(&mut self.nodes[idx as usize].item, at)?;
            self.nodes[idx as usize].leaf_size = at;
            let tail_idx = self.new_node(tail, leaf_size - at);
            let old_right = self.nodes[idx as usize].right;
            self.nodes[idx as usize].right = NIL;
            self.update(idx);
            let r = self.merge(tail_idx, old_right);
            Ok((idx, r))
        }
    }

    fn leftmost(&self, mut idx: u32) -> u32 {
        while self.nodes[idx as usize].left != NIL {
            idx = self.nodes[idx as usize].left;
        }
        idx
    }

    /// Append a run at the end.
    pub fn append(&mut self, item: T, size: u32) {
        let idx = self.new_node(item, size);
        self.root = self.merge(self.root, idx);
    }

    /// Insert a run so that it starts at unit `offset`.
    pub fn insert(
        &mut self,
        offset: u32,
        item: T,
        size: u32,
        split_fn: SplitFn<'_, T>,
    ) -> Result<()> {
        debug_assert!(offset <= self.size());
        let (l, r) = self.split(self.root, offset, split_fn)?;
        let idx = self.new_node(item, size);
        let l = self.merge(l, idx);
        self.root = self.merge(l, r);
        Ok(())
    }

    /// Make a run start exactly at `offset` and return its node index.
    /// The run still covers the following untouched units.
    pub fn extract(&mut self, offset: u32, split_fn: SplitFn<'_, T>) -> Result<u32> {
        debug_assert!(offset < self.size());
        let (l, r) = self.split(self.root, offset, split_fn)?;
        let idx = self.leftmost(r);
        self.root = self.merge(l, r);
        Ok(idx)
    }

    /// Remove one unit at `offset`. The removed unit's item is
    /// abandoned in the arena; its borrowed data needs no cleanup.
    pub fn erase(&mut self, offset: u32, split_fn: SplitFn<'_, T>) -> Result<()> {
        debug_assert!(offset < self.size());
        let (l, r) = self.split(self.root, offset, split_fn)?;
        let (_, rest) = self.split(r, 1, split_fn)?;
        self.root = self.merge(l, rest);
        Ok(())
    }

    /// In-order iteration over runs.
    pub fn iter(&self) -> RopeIter<'_, T> {
        let mut iter = RopeIter {
            rope: self,
            stack: Vec::new(),
        };
        iter.push_left(self.root);
        iter
    }
}

pub(crate) struct RopeIter<'r, T> {
    rope: &'r Rope<T>,
    stack: Vec<u32>,
}

impl<'r, T> RopeIter<'r, T> {
    fn push_left(&mut self, mut idx: u32) {
        while idx != NIL {
            self.stack.push(idx);
            idx = self.rope.nodes[idx as usize].left;
        }
    }
}

impl<'r, T> Iterator for RopeIter<'r, T> {
    type Item = (&'r T, u32);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.stack.pop()?;
        let node = &self.rope.nodes[idx as usize];
        self.push_left(node.right);
        Some((&node.item, node.leaf_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test items are integer ranges [start, start + len).
    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Run {
        start: u32,
    }

    fn split_run(run: &mut Run, at: u32) -> Result<Run> {
        Ok(Run {
            start: run.start + at,
        })
    }

    fn collect(rope: &Rope<Run>) -> Vec<(u32, u32)> {
        rope.iter().map(|(r, size)| (r.start, size)).collect()
    }

    #[test]
    fn extract_splits_runs() {
        let mut rope = Rope::new();
        rope.append(Run { start: 0 }, 10);
        let idx = rope.extract(4, &mut split_run).unwrap();
        assert_eq!(rope.item(idx).start, 4);
        assert_eq!(rope.size(), 10);
        assert_eq!(collect(&rope), vec![(0, 4), (4, 6)]);
        // Extracting an existing boundary does not split again.
        let idx = rope.extract(4, &mut split_run).unwrap();
        assert_eq!(rope.item(idx).start, 4);
        assert_eq!(collect(&rope), vec![(0, 4), (4, 6)]);
    }

    #[test]
    fn insert_shifts_following_units() {
        let mut rope = Rope::new();
        rope.append(Run { start: 0 }, 5);
        rope.insert(2, Run { start: 100 }, 1, &mut split_run).unwrap();
        assert_eq!(rope.size(), 6);
        assert_eq!(collect(&rope), vec![(0, 2), (100, 1), (2, 3)]);
        rope.insert(6, Run { start: 200 }, 1, &mut split_run).unwrap();
        assert_eq!(collect(&rope), vec![(0, 2), (100, 1), (2, 3), (200, 1)]);
    }

    #[test]
    fn erase_drops_single_units() {
        let mut rope = Rope::new();
        rope.append(Run { start: 0 }, 5);
        rope.erase(0, &mut split_run).unwrap();
        assert_eq!(rope.size(), 4);
        assert_eq!(collect(&rope), vec![(1, 4)]);
        rope.erase(2, &mut split_run).unwrap();
        assert_eq!(collect(&rope), vec![(1, 2), (4, 1)]);
    }

    #[test]
    fn mixed_operations_keep_order() {
        let mut rope = Rope::new();
        rope.append(Run { start: 0 }, 100);
        for i in 0..20 {
            rope.insert(i * 5, Run { start: 1000 + i }, 1, &mut split_run)
                .unwrap();
        }
        assert_eq!(rope.size(), 120);
        let total: u32 = rope.iter().map(|(_, s)| s).sum();
        assert_eq!(total, 120);
    }
}
