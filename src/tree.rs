//! `Tree`: search, top-down preemptive-split insertion, top-down
//! preemptive-rebalance deletion, and min/max.

use crate::auditor::{self, AuditReport};
use crate::compactor;
use crate::config::TreeConfig;
use crate::element::{Element, SENTINEL};
use crate::error::Result;
use crate::node::Node;
use crate::page_manager::PageManager;
use std::path::Path;
use tracing::{info, instrument, warn};

pub struct Tree {
    pager: PageManager,
    cfg: TreeConfig,
    closed: bool,
}

impl Tree {
    pub fn open<P: AsRef<Path>>(path: P, order: i32) -> Result<Self> {
        Self::open_with_fill(path, order, crate::config::DEFAULT_FILL)
    }

    pub fn open_with_fill<P: AsRef<Path>>(path: P, order: i32, fill: f64) -> Result<Self> {
        let cfg = TreeConfig::with_fill(order, fill)?;
        let pager = PageManager::open(path, order)?;
        Ok(Tree { pager, cfg, closed: false })
    }

    pub(crate) fn from_parts(pager: PageManager, cfg: TreeConfig) -> Self {
        Tree { pager, cfg, closed: false }
    }

    pub fn order(&self) -> i32 {
        self.cfg.order
    }

    pub fn commit(&mut self) -> Result<()> {
        self.pager.commit()
    }

    /// Idempotent: a second call on an already-closed tree is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.pager.close()?;
        self.closed = true;
        Ok(())
    }

    // --- Introspection, useful to callers and the CLI -----------------

    pub fn node_count(&self) -> i32 {
        self.pager.node_count()
    }

    pub fn free_list_len(&self) -> usize {
        self.pager.free_list_len()
    }

    pub fn root_id(&self) -> i32 {
        self.pager.root_id()
    }

    // --- Search -----------------------------------------------------

    #[instrument(skip(self))]
    pub fn try_search(&mut self, key: i32) -> Result<Option<Element>> {
        if self.pager.root_id() < 0 {
            return Ok(None);
        }
        let mut id = self.pager.root_id();
        loop {
            let node = self.pager.read(id)?;
            let i = node.find_index(key);
            if node.contains_at(i, key) {
                return Ok(Some(node.keys[i]));
            }
            if node.leaf {
                return Ok(None);
            }
            id = node.kids[i];
        }
    }

    pub fn find_min(&mut self) -> Result<Option<Element>> {
        if self.pager.root_id() < 0 {
            return Ok(None);
        }
        let mut id = self.pager.root_id();
        loop {
            let node = self.pager.read(id)?;
            if node.leaf {
                return Ok(if node.num_keys > 0 { Some(node.keys[0]) } else { None });
            }
            id = node.kids[0];
        }
    }

    pub fn find_max(&mut self) -> Result<Option<Element>> {
        if self.pager.root_id() < 0 {
            return Ok(None);
        }
        let mut id = self.pager.root_id();
        loop {
            let node = self.pager.read(id)?;
            if node.leaf {
                return Ok(if node.num_keys > 0 {
                    Some(node.keys[(node.num_keys - 1) as usize])
                } else {
                    None
                });
            }
            id = node.kids[node.num_keys as usize];
        }
    }

    // --- Insertion ----------------------------------------------------

    pub fn insert(&mut self, key: i32, data: i32) -> Result<()> {
        self.insert_element(Element::new(key, data))
    }

    #[instrument(skip(self))]
    pub fn insert_element(&mut self, e: Element) -> Result<()> {
        if self.pager.root_id() < 0 {
            let id = self.pager.allocate();
            let mut leaf = Node::new_leaf(id, self.cfg.order);
            leaf.keys[0] = e;
            leaf.num_keys = 1;
            self.pager.write(&leaf)?;
            self.pager.set_root_id(id);
            self.pager.commit()?;
            return Ok(());
        }

        let root_id = self.pager.root_id();
        let mut root = self.pager.read(root_id)?;

        if root.num_keys == self.cfg.max_keys() {
            info!(root_id, "root full, splitting on descent");
            let new_root_id = self.pager.allocate();
            let mut new_root = Node::new_internal(new_root_id, self.cfg.order);
            new_root.kids[0] = root_id;
            self.split_child(&mut new_root, 0, &mut root)?;
            self.pager.set_root_id(new_root_id);
            self.pager.commit()?;
            self.insert_nonfull(&mut new_root, e)?;
        } else {
            self.insert_nonfull(&mut root, e)?;
        }
        Ok(())
    }

    /// Splits `child` (assumed to hold exactly `order - 1` keys) which sits
    /// at `parent.kids[i]`, promoting the median into `parent` at index `i`
    /// and writing the new sibling at `parent.kids[i + 1]`.
    ///
    /// The right sibling gets the keys strictly after the median, i.e.
    /// `order - t - 1` of them, which is the count-preserving value:
    /// `y` had `order - 1` keys total, loses one to the median and `t - 1`
    /// stay behind, so what's left for `z` is `(order - 1) - 1 - (t - 1)`.
    fn split_child(&mut self, parent: &mut Node, i: usize, y: &mut Node) -> Result<()> {
        let order = self.cfg.order;
        let t = self.cfg.min_degree();
        let median_idx = (t - 1) as usize;
        let median = y.keys[median_idx];

        let z_id = self.pager.allocate();
        let mut z = if y.leaf {
            Node::new_leaf(z_id, order)
        } else {
            Node::new_internal(z_id, order)
        };

        let z_count = (order - t) as usize - 1;
        for j in 0..z_count {
            z.keys[j] = y.keys[median_idx + 1 + j];
        }
        z.num_keys = z_count as i32;
        if !y.leaf {
            for j in 0..=z_count {
                z.kids[j] = y.kids[(t as usize) + j];
            }
        }

        y.num_keys = t - 1;
        y.wipe_unused();

        let pk = parent.num_keys as usize;
        for j in (i..pk).rev() {
            parent.keys[j + 1] = parent.keys[j];
        }
        for j in (i + 1..=pk).rev() {
            parent.kids[j + 1] = parent.kids[j];
        }
        parent.keys[i] = median;
        parent.kids[i + 1] = z.id;
        parent.num_keys += 1;

        self.pager.write(y)?;
        self.pager.write(&z)?;
        self.pager.write(parent)?;
        Ok(())
    }

    fn insert_nonfull(&mut self, node: &mut Node, e: Element) -> Result<()> {
        if node.leaf {
            let i = node.find_index(e.key);
            let n = node.num_keys as usize;
            for j in (i..n).rev() {
                node.keys[j + 1] = node.keys[j];
            }
            node.keys[i] = e;
            node.num_keys += 1;
            self.pager.write(node)?;
            return Ok(());
        }

        let mut i = node.find_index(e.key);
        let mut child_id = node.kids[i];
        let mut child = self.pager.read(child_id)?;

        if child.num_keys == self.cfg.max_keys() {
            self.split_child(node, i, &mut child)?;
            if e.key > node.keys[i].key {
                i += 1;
                child_id = node.kids[i];
                child = self.pager.read(child_id)?;
            }
        }

        self.insert_nonfull(&mut child, e)
    }

    // --- Deletion -------------------------------------------------

    pub fn delete(&mut self, key: i32, _data: i32) -> Result<()> {
        // Matches by `key` alone; `data` is accepted for API symmetry with
        // `insert` but unused since keys are unique within the tree.
        if self.pager.root_id() < 0 {
            return Ok(());
        }
        let root_id = self.pager.root_id();
        let mut root = self.pager.read(root_id)?;
        self.delete_node(&mut root, key)?;
        self.pager.write(&root)?;

        let root = self.pager.read(root_id)?;
        if !root.leaf && root.num_keys == 0 {
            let new_root_id = root.kids[0];
            self.pager.zero(root_id)?;
            self.pager.free(root_id);
            self.pager.set_root_id(new_root_id);
            self.pager.commit()?;
            info!(old_root = root_id, new_root = new_root_id, "root collapsed");
        }
        Ok(())
    }

    fn delete_node(&mut self, node: &mut Node, key: i32) -> Result<()> {
        let t = self.cfg.min_degree();
        let i = node.find_index(key);

        if node.contains_at(i, key) {
            if node.leaf {
                self.remove_key_leaf(node, i);
                self.pager.write(node)?;
            } else {
                let left_id = node.kids[i];
                let right_id = node.kids[i + 1];
                let left = self.pager.read(left_id)?;
                if left.num_keys >= t {
                    let max_elem = self.delete_max(left_id)?;
                    node.keys[i] = max_elem;
                    self.pager.write(node)?;
                } else {
                    let right = self.pager.read(right_id)?;
                    if right.num_keys >= t {
                        let min_elem = self.delete_min(right_id)?;
                        node.keys[i] = min_elem;
                        self.pager.write(node)?;
                    } else {
                        self.merge_children(node, i)?;
                        let merged_id = node.kids[i];
                        let mut merged = self.pager.read(merged_id)?;
                        self.delete_node(&mut merged, key)?;
                        self.pager.write(node)?;
                    }
                }
            }
            return Ok(());
        }

        if node.leaf {
            return Ok(()); // Case B: absent key at a leaf, no-op.
        }

        // Case C: descend through child i, thickening it first if needed.
        let mut ci = i;
        {
            let child = self.pager.read(node.kids[ci])?;
            if child.num_keys == t - 1 {
                let has_left = ci > 0;
                let has_right = (ci as i32) < node.num_keys;

                let left_ok = has_left && self.pager.read(node.kids[ci - 1])?.num_keys >= t;
                if left_ok {
                    self.borrow_from_left(node, ci)?;
                } else {
                    let right_ok = has_right && self.pager.read(node.kids[ci + 1])?.num_keys >= t;
                    if right_ok {
                        self.borrow_from_right(node, ci)?;
                    } else if has_right {
                        self.merge_children(node, ci)?;
                    } else if has_left {
                        self.merge_children(node, ci - 1)?;
                        ci -= 1;
                    }
                }
            }
        }

        let child_id = node.kids[ci];
        let mut child = self.pager.read(child_id)?;
        self.delete_node(&mut child, key)
    }

    fn remove_key_leaf(&self, node: &mut Node, i: usize) {
        let n = node.num_keys as usize;
        for j in (i + 1)..n {
            node.keys[j - 1] = node.keys[j];
        }
        node.num_keys -= 1;
        node.wipe_unused();
    }

    fn delete_max(&mut self, id: i32) -> Result<Element> {
        let mut node = self.pager.read(id)?;
        if node.leaf {
            let idx = (node.num_keys - 1) as usize;
            let e = node.keys[idx];
            node.num_keys -= 1;
            node.wipe_unused();
            self.pager.write(&node)?;
            return Ok(e);
        }
        let t = self.cfg.min_degree();
        let mut ci = node.num_keys as usize;
        let child = self.pager.read(node.kids[ci])?;
        if child.num_keys == t - 1 {
            if ci > 0 {
                let left = self.pager.read(node.kids[ci - 1])?;
                if left.num_keys >= t {
                    self.borrow_from_left(&mut node, ci)?;
                } else {
                    self.merge_children(&mut node, ci - 1)?;
                    ci -= 1;
                }
            }
        }
        let child_id = node.kids[ci];
        let result = self.delete_max(child_id)?;
        self.pager.write(&node)?;
        Ok(result)
    }

    fn delete_min(&mut self, id: i32) -> Result<Element> {
        let mut node = self.pager.read(id)?;
        if node.leaf {
            let e = node.keys[0];
            for j in 1..node.num_keys as usize {
                node.keys[j - 1] = node.keys[j];
            }
            node.num_keys -= 1;
            node.wipe_unused();
            self.pager.write(&node)?;
            return Ok(e);
        }
        let t = self.cfg.min_degree();
        let ci = 0usize;
        let child = self.pager.read(node.kids[ci])?;
        if child.num_keys == t - 1 {
            let right = self.pager.read(node.kids[ci + 1])?;
            if right.num_keys >= t {
                self.borrow_from_right(&mut node, ci)?;
            } else {
                self.merge_children(&mut node, ci)?;
            }
        }
        let child_id = node.kids[ci];
        let result = self.delete_min(child_id)?;
        self.pager.write(&node)?;
        Ok(result)
    }

    fn borrow_from_left(&mut self, parent: &mut Node, i: usize) -> Result<()> {
        let child_id = parent.kids[i];
        let left_id = parent.kids[i - 1];
        let mut child = self.pager.read(child_id)?;
        let mut left = self.pager.read(left_id)?;

        let cn = child.num_keys as usize;
        for j in (0..cn).rev() {
            child.keys[j + 1] = child.keys[j];
        }
        if !child.leaf {
            for j in (0..=cn).rev() {
                child.kids[j + 1] = child.kids[j];
            }
        }
        child.keys[0] = parent.keys[i - 1];
        parent.keys[i - 1] = left.keys[(left.num_keys - 1) as usize];
        if !child.leaf {
            child.kids[0] = left.kids[left.num_keys as usize];
            left.kids[left.num_keys as usize] = crate::node::NONE_ID;
        }
        left.keys[(left.num_keys - 1) as usize] = SENTINEL;
        left.num_keys -= 1;
        child.num_keys += 1;

        self.pager.write(&left)?;
        self.pager.write(&child)?;
        self.pager.write(parent)?;
        Ok(())
    }

    fn borrow_from_right(&mut self, parent: &mut Node, i: usize) -> Result<()> {
        let child_id = parent.kids[i];
        let right_id = parent.kids[i + 1];
        let mut child = self.pager.read(child_id)?;
        let mut right = self.pager.read(right_id)?;

        let cn = child.num_keys as usize;
        child.keys[cn] = parent.keys[i];
        parent.keys[i] = right.keys[0];
        if !child.leaf {
            child.kids[cn + 1] = right.kids[0];
        }
        child.num_keys += 1;

        let rn = right.num_keys as usize;
        for j in 1..rn {
            right.keys[j - 1] = right.keys[j];
        }
        right.keys[rn - 1] = SENTINEL;
        if !right.leaf {
            for j in 1..=rn {
                right.kids[j - 1] = right.kids[j];
            }
            right.kids[rn] = crate::node::NONE_ID;
        }
        right.num_keys -= 1;

        self.pager.write(&right)?;
        self.pager.write(&child)?;
        self.pager.write(parent)?;
        Ok(())
    }

    /// Merges `parent.kids[i]` and `parent.kids[i + 1]` through the
    /// separator at `parent.keys[i]`, freeing the right sibling.
    fn merge_children(&mut self, parent: &mut Node, i: usize) -> Result<()> {
        let left_id = parent.kids[i];
        let right_id = parent.kids[i + 1];
        let mut left = self.pager.read(left_id)?;
        let right = self.pager.read(right_id)?;

        let ln = left.num_keys as usize;
        left.keys[ln] = parent.keys[i];
        for j in 0..right.num_keys as usize {
            left.keys[ln + 1 + j] = right.keys[j];
        }
        if !left.leaf {
            for j in 0..=(right.num_keys as usize) {
                left.kids[ln + 1 + j] = right.kids[j];
            }
        }
        left.num_keys = left.num_keys + 1 + right.num_keys;

        let pk = parent.num_keys as usize;
        for j in (i + 1)..pk {
            parent.keys[j - 1] = parent.keys[j];
        }
        for j in (i + 2)..=pk {
            parent.kids[j - 1] = parent.kids[j];
        }
        parent.num_keys -= 1;
        parent.wipe_unused();

        self.pager.zero(right_id)?;
        self.pager.free(right_id);
        self.pager.write(&left)?;
        self.pager.write(parent)?;
        Ok(())
    }

    // --- In-order traversal (lazy) --------------------------------------

    pub fn get_keys(&mut self) -> Result<impl Iterator<Item = Result<i32>> + '_> {
        let iter = KeysIter::new(self)?;
        Ok(iter.map(|r| r.map(|e| e.key)))
    }

    pub fn get_elements(&mut self) -> Result<Vec<Element>> {
        let mut out = Vec::new();
        let mut iter = KeysIter::new(self)?;
        while let Some(item) = iter.next() {
            out.push(item?);
        }
        Ok(out)
    }

    pub fn count_keys(&mut self, subroot: i32) -> Result<i32> {
        if subroot < 0 {
            return Ok(0);
        }
        let node = self.pager.read(subroot)?;
        let mut total = node.num_keys;
        if !node.leaf {
            for i in 0..=(node.num_keys as usize) {
                total += self.count_keys(node.kids[i])?;
            }
        }
        Ok(total)
    }

    // --- Compaction ----------------------------------------------------

    pub fn compact(&mut self) -> Result<()> {
        compactor::compact(&mut self.pager)
    }

    // --- Audit -----------------------------------------------------

    pub fn perform_full_audit(&mut self) -> Result<AuditReport> {
        auditor::perform_full_audit(&mut self.pager, &self.cfg)
    }

    pub fn validate_integrity(&mut self) -> Result<()> {
        auditor::validate_integrity(&mut self.pager, &self.cfg)
    }

    pub fn check_ghost(&mut self) -> Result<()> {
        auditor::check_ghost(&mut self.pager)
    }

    pub fn count_zombies(&mut self) -> Result<i32> {
        auditor::count_zombies(&mut self.pager)
    }

    pub fn count_ghost(&mut self) -> Result<i32> {
        auditor::count_ghost(&mut self.pager)
    }

    pub fn reclaim_orphans(&mut self) -> Result<i32> {
        auditor::reclaim_orphans(&mut self.pager)
    }
}

impl Drop for Tree {
    fn drop(&mut self) {
        if !self.closed {
            warn!("tree dropped without an explicit close(); flushing now");
            let _ = self.pager.close();
        }
    }
}

struct Frame {
    node: Node,
    phase: usize,
}

/// A lazy, non-restartable in-order traversal. Memory is bounded by
/// `height * order`, not by the number of keys in the tree: each stack
/// frame holds one resident node and its next-child/next-key phase.
struct KeysIter<'a> {
    tree: &'a mut Tree,
    stack: Vec<Frame>,
}

impl<'a> KeysIter<'a> {
    fn new(tree: &'a mut Tree) -> Result<Self> {
        let mut stack = Vec::new();
        let root_id = tree.pager.root_id();
        if root_id >= 0 {
            let node = tree.pager.read(root_id)?;
            stack.push(Frame { node, phase: 0 });
        }
        Ok(KeysIter { tree, stack })
    }
}

impl<'a> Iterator for KeysIter<'a> {
    type Item = Result<Element>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = self.stack.last_mut()?;
            let nk = frame.node.num_keys as usize;

            if frame.node.leaf {
                if frame.phase < nk {
                    let e = frame.node.keys[frame.phase];
                    frame.phase += 1;
                    return Some(Ok(e));
                }
                self.stack.pop();
                continue;
            }

            if frame.phase % 2 == 0 {
                let k = frame.phase / 2;
                frame.phase += 1;
                if k > nk {
                    self.stack.pop();
                    continue;
                }
                let child_id = frame.node.kids[k];
                match self.tree.pager_mut().read(child_id) {
                    Ok(child) => {
                        self.stack.push(Frame { node: child, phase: 0 });
                        continue;
                    }
                    Err(e) => return Some(Err(e)),
                }
            } else {
                let k = (frame.phase - 1) / 2;
                if k >= nk {
                    self.stack.pop();
                    continue;
                }
                frame.phase += 1;
                return Some(Ok(frame.node.keys[k]));
            }
        }
    }
}

impl Tree {
    fn pager_mut(&mut self) -> &mut PageManager {
        &mut self.pager
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn insert_and_search_small_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.db");
        let mut tree = Tree::open(&path, 4).unwrap();
        for &(k, v) in &[(10, 100), (20, 200), (30, 300), (40, 400), (50, 500), (60, 600), (70, 700), (80, 800)] {
            tree.insert(k, v).unwrap();
        }
        assert_eq!(tree.try_search(50).unwrap(), Some(Element::new(50, 500)));
        tree.delete(10, 100).unwrap();
        assert_eq!(tree.find_min().unwrap(), Some(Element::new(20, 200)));
        assert_eq!(tree.find_max().unwrap(), Some(Element::new(80, 800)));
        assert_eq!(tree.count_zombies().unwrap(), 0);
    }

    #[test]
    fn sequential_inserts_stay_searchable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.db");
        let mut tree = Tree::open(&path, 4).unwrap();
        for i in 1..=100 {
            tree.insert(i, i * 10).unwrap();
        }
        for i in 1..=100 {
            assert_eq!(tree.try_search(i).unwrap(), Some(Element::new(i, i * 10)));
        }
        assert!(tree.root_id() >= 0);
        assert_eq!(tree.count_zombies().unwrap(), 0);
    }

    #[test]
    fn delete_absent_key_is_noop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.db");
        let mut tree = Tree::open(&path, 4).unwrap();
        for i in 1..=10 {
            tree.insert(i, i).unwrap();
        }
        let before = tree.get_keys().unwrap().collect::<Result<Vec<_>>>().unwrap();
        tree.delete(9999, 0).unwrap();
        let after = tree.get_keys().unwrap().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn get_keys_is_sorted_and_deduped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.db");
        let mut tree = Tree::open(&path, 16).unwrap();
        let mut input: Vec<i32> = (1..200).collect();
        // deterministic shuffle (no rand dependency in lib tests)
        input.sort_by_key(|k| (k * 2654435761u32 as i32) ^ 0x5bd1e995);
        for k in &input {
            tree.insert(*k, *k * 10).unwrap();
        }
        let keys = tree.get_keys().unwrap().collect::<Result<Vec<_>>>().unwrap();
        let mut sorted = keys.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(keys, sorted);
        assert_eq!(tree.count_keys(tree.root_id()).unwrap() as usize, keys.len());
        assert_eq!(tree.count_zombies().unwrap(), 0);
        assert_eq!(tree.count_ghost().unwrap(), 0);
    }

    #[test]
    fn persistence_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.db");
        let node_count_before;
        {
            let mut tree = Tree::open(&path, 4).unwrap();
            for i in 1..=10 {
                tree.insert(i, i).unwrap();
            }
            tree.delete(1, 0).unwrap();
            tree.delete(2, 0).unwrap();
            node_count_before = tree.node_count();
            tree.close().unwrap();
        }
        let mut tree = Tree::open(&path, 4).unwrap();
        tree.insert(1000, 1000).unwrap();
        assert_eq!(tree.node_count(), node_count_before);
    }
}
