//! `Auditor`: cycle detection, live-set computation, zombie/ghost
//! counts, density and height, plus the auxiliary checks that must signal
//! failure rather than merely report.

use crate::config::TreeConfig;
use crate::error::{BtreeError, Result};
use crate::page_manager::PageManager;
use tracing::{info, warn};

/// Summary produced by a full audit pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AuditReport {
    pub height: i32,
    pub reachable_nodes: i32,
    pub total_keys: i32,
    pub average_density: f64,
    pub ghost_count: i32,
    pub zombie_count: i32,
}

/// Walks the tree from `root_id`, recording which ids are reachable.
/// Returns `StructuralCorruption` if a node is visited twice (a cycle).
fn live_set(pager: &mut PageManager, root_id: i32) -> Result<(Vec<bool>, i32, i32, i32)> {
    let node_count = pager.node_count();
    let mut seen = vec![false; node_count.max(0) as usize];
    let mut reachable = 0;
    let mut total_keys = 0;
    let mut ghosts = 0;
    let mut height = 0;

    if root_id < 0 {
        return Ok((seen, 0, 0, 0));
    }

    fn visit(
        pager: &mut PageManager,
        id: i32,
        depth: i32,
        node_count: i32,
        seen: &mut Vec<bool>,
        reachable: &mut i32,
        total_keys: &mut i32,
        ghosts: &mut i32,
        height: &mut i32,
        is_root: bool,
    ) -> Result<()> {
        if id < 0 || id >= node_count {
            *ghosts += 1;
            return Ok(());
        }
        if seen[id as usize] {
            return Err(BtreeError::corruption(format!("cycle detected at node {}", id)));
        }
        seen[id as usize] = true;
        *reachable += 1;

        let node = pager.read(id)?;
        if node.num_keys == 0 && !is_root {
            *ghosts += 1;
        }
        *total_keys += node.num_keys;

        if node.leaf {
            *height = (*height).max(depth + 1);
        } else {
            for i in 0..=(node.num_keys as usize) {
                visit(
                    pager,
                    node.kids[i],
                    depth + 1,
                    node_count,
                    seen,
                    reachable,
                    total_keys,
                    ghosts,
                    height,
                    false,
                )?;
            }
        }
        Ok(())
    }

    visit(
        pager,
        root_id,
        1,
        node_count,
        &mut seen,
        &mut reachable,
        &mut total_keys,
        &mut ghosts,
        &mut height,
        true,
    )?;

    Ok((seen, reachable, total_keys, ghosts))
}

pub fn perform_full_audit(pager: &mut PageManager, cfg: &TreeConfig) -> Result<AuditReport> {
    let root_id = pager.root_id();
    let node_count = pager.node_count();
    let (seen, reachable, total_keys, ghosts) = live_set(pager, root_id)?;

    let mut zombies = 0;
    for id in 0..node_count {
        let accounted = seen.get(id as usize).copied().unwrap_or(false) || pager.free_list_contains(id);
        if !accounted {
            zombies += 1;
        }
    }

    let height = if root_id < 0 {
        0
    } else {
        height_of(pager, root_id)?
    };

    let denom = (reachable as f64) * (cfg.max_keys() as f64);
    let density = if denom > 0.0 { total_keys as f64 / denom } else { 0.0 };

    let report = AuditReport {
        height,
        reachable_nodes: reachable,
        total_keys,
        average_density: density,
        ghost_count: ghosts,
        zombie_count: zombies,
    };
    info!(?report, "full audit complete");
    Ok(report)
}

fn height_of(pager: &mut PageManager, id: i32) -> Result<i32> {
    let node = pager.read(id)?;
    if node.leaf {
        Ok(1)
    } else {
        Ok(1 + height_of(pager, node.kids[0])?)
    }
}

/// Fails with `StructuralCorruption` if any non-root node has zero keys.
pub fn check_ghost(pager: &mut PageManager) -> Result<()> {
    let root_id = pager.root_id();
    if root_id < 0 {
        return Ok(());
    }

    fn walk(pager: &mut PageManager, id: i32, is_root: bool) -> Result<()> {
        let node = pager.read(id)?;
        if node.num_keys == 0 && !is_root {
            return Err(BtreeError::corruption(format!("ghost node at id {}", id)));
        }
        if !node.leaf {
            for i in 0..=(node.num_keys as usize) {
                walk(pager, node.kids[i], false)?;
            }
        }
        Ok(())
    }

    walk(pager, root_id, true)
}

/// Fails with `StructuralCorruption` on: a cycle, a key-ordering violation
/// within a node, a key falling outside its parent-imposed range, or a
/// non-root node underflowing below `t - 1` keys.
pub fn validate_integrity(pager: &mut PageManager, cfg: &TreeConfig) -> Result<()> {
    let root_id = pager.root_id();
    if root_id < 0 {
        return Ok(());
    }
    let node_count = pager.node_count();
    let mut seen = vec![false; node_count.max(0) as usize];

    fn walk(
        pager: &mut PageManager,
        id: i32,
        lo: Option<i32>,
        hi: Option<i32>,
        is_root: bool,
        cfg: &TreeConfig,
        seen: &mut Vec<bool>,
    ) -> Result<()> {
        if id < 0 || id as usize >= seen.len() {
            return Err(BtreeError::corruption(format!("ghost child reference {}", id)));
        }
        if seen[id as usize] {
            return Err(BtreeError::corruption(format!("cycle detected at node {}", id)));
        }
        seen[id as usize] = true;

        let node = pager.read(id)?;
        if !is_root && node.num_keys < cfg.min_keys() {
            return Err(BtreeError::corruption(format!(
                "node {} underflows: {} keys < minimum {}",
                id, node.num_keys, cfg.min_keys()
            )));
        }

        let mut prev: Option<i32> = None;
        for i in 0..node.num_keys as usize {
            let k = node.keys[i].key;
            if let Some(p) = prev {
                if k <= p {
                    return Err(BtreeError::corruption(format!(
                        "node {} keys not strictly increasing at index {}",
                        id, i
                    )));
                }
            }
            if let Some(l) = lo {
                if k <= l {
                    return Err(BtreeError::corruption(format!(
                        "node {} key {} violates lower bound {}",
                        id, k, l
                    )));
                }
            }
            if let Some(h) = hi {
                if k >= h {
                    return Err(BtreeError::corruption(format!(
                        "node {} key {} violates upper bound {}",
                        id, k, h
                    )));
                }
            }
            prev = Some(k);
        }

        if !node.leaf {
            for i in 0..=(node.num_keys as usize) {
                let child_lo = if i == 0 { lo } else { Some(node.keys[i - 1].key) };
                let child_hi = if i == node.num_keys as usize { hi } else { Some(node.keys[i].key) };
                walk(pager, node.kids[i], child_lo, child_hi, false, cfg, seen)?;
            }
        }
        Ok(())
    }

    walk(pager, root_id, None, None, true, cfg, &mut seen)
}

pub fn count_zombies(pager: &mut PageManager) -> Result<i32> {
    let root_id = pager.root_id();
    let node_count = pager.node_count();
    let (seen, _, _, _) = live_set(pager, root_id)?;
    let mut zombies = 0;
    for id in 0..node_count {
        let accounted = seen.get(id as usize).copied().unwrap_or(false) || pager.free_list_contains(id);
        if !accounted {
            zombies += 1;
        }
    }
    Ok(zombies)
}

pub fn count_ghost(pager: &mut PageManager) -> Result<i32> {
    let root_id = pager.root_id();
    let (_, _, _, ghosts) = live_set(pager, root_id)?;
    Ok(ghosts)
}

/// Adds every zombie id (allocated, unreachable, not already free) to the
/// free list. Returns the number reclaimed.
pub fn reclaim_orphans(pager: &mut PageManager) -> Result<i32> {
    let root_id = pager.root_id();
    let node_count = pager.node_count();
    let (seen, _, _, _) = live_set(pager, root_id)?;
    let mut reclaimed = 0;
    for id in 0..node_count {
        let accounted = seen.get(id as usize).copied().unwrap_or(false) || pager.free_list_contains(id);
        if !accounted {
            pager.free(id);
            reclaimed += 1;
        }
    }
    if reclaimed > 0 {
        warn!(reclaimed, "reclaimed orphaned pages into the free list");
    }
    Ok(reclaimed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Element;
    use crate::node::Node;
    use crate::page_manager::PageManager;
    use crate::tree::Tree;
    use tempfile::tempdir;

    #[test]
    fn audit_on_empty_tree() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.db");
        let mut tree = Tree::open(&path, 4).unwrap();
        let report = tree.perform_full_audit().unwrap();
        assert_eq!(report.reachable_nodes, 0);
        assert_eq!(report.zombie_count, 0);
    }

    #[test]
    fn audit_after_inserts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.db");
        let mut tree = Tree::open(&path, 4).unwrap();
        for i in 1..=20 {
            tree.insert_element(Element::new(i, i * 10)).unwrap();
        }
        tree.validate_integrity().unwrap();
        assert_eq!(tree.count_zombies().unwrap(), 0);
        let report = tree.perform_full_audit().unwrap();
        assert!(report.reachable_nodes > 0);
        assert!(report.average_density > 0.0);
    }

    /// A root whose second child id points back at the root is a cycle:
    /// `validate_integrity`'s DFS must revisit id 0 and fail rather than
    /// loop forever.
    #[test]
    fn validate_integrity_detects_cycle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.db");
        let mut pager = PageManager::open(&path, 4).unwrap();

        let mut root = Node::new_internal(0, 4);
        root.num_keys = 1;
        root.keys[0] = Element::new(10, 10);
        root.kids[0] = 1;
        root.kids[1] = 0; // points back at itself

        let mut leaf = Node::new_leaf(1, 4);
        leaf.num_keys = 1;
        leaf.keys[0] = Element::new(5, 5);

        pager.allocate();
        pager.allocate();
        pager.write(&root).unwrap();
        pager.write(&leaf).unwrap();
        pager.set_root_id(0);

        let cfg = TreeConfig::new(4).unwrap();
        let err = validate_integrity(&mut pager, &cfg).unwrap_err();
        assert!(matches!(err, BtreeError::StructuralCorruption { .. }));
    }

    /// A non-root leaf with zero keys is a ghost; `check_ghost` must fail.
    #[test]
    fn check_ghost_detects_zero_key_non_root_node() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.db");
        let mut pager = PageManager::open(&path, 4).unwrap();

        let mut root = Node::new_internal(0, 4);
        root.num_keys = 1;
        root.keys[0] = Element::new(10, 10);
        root.kids[0] = 1;
        root.kids[1] = 2;

        let ghost = Node::new_leaf(1, 4); // num_keys left at 0

        let mut right = Node::new_leaf(2, 4);
        right.num_keys = 1;
        right.keys[0] = Element::new(20, 20);

        pager.allocate();
        pager.allocate();
        pager.allocate();
        pager.write(&root).unwrap();
        pager.write(&ghost).unwrap();
        pager.write(&right).unwrap();
        pager.set_root_id(0);

        let err = check_ghost(&mut pager).unwrap_err();
        assert!(matches!(err, BtreeError::StructuralCorruption { .. }));
    }

    /// Keys within a node must be strictly increasing.
    #[test]
    fn validate_integrity_detects_key_order_violation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.db");
        let mut pager = PageManager::open(&path, 4).unwrap();

        let mut root = Node::new_leaf(0, 4);
        root.num_keys = 2;
        root.keys[0] = Element::new(20, 0);
        root.keys[1] = Element::new(10, 0); // out of order

        pager.allocate();
        pager.write(&root).unwrap();
        pager.set_root_id(0);

        let cfg = TreeConfig::new(4).unwrap();
        let err = validate_integrity(&mut pager, &cfg).unwrap_err();
        assert!(matches!(err, BtreeError::StructuralCorruption { .. }));
    }

    /// A non-root node below `t - 1` keys underflows.
    #[test]
    fn validate_integrity_detects_underflow() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.db");
        let order = 10;
        let mut pager = PageManager::open(&path, order).unwrap();
        let cfg = TreeConfig::new(order).unwrap();
        assert_eq!(cfg.min_keys(), 4);

        let mut root = Node::new_internal(0, order);
        root.num_keys = 1;
        root.keys[0] = Element::new(100, 0);
        root.kids[0] = 1;
        root.kids[1] = 2;

        // Only 2 keys, below the minimum of 4 for a non-root node.
        let mut thin = Node::new_leaf(1, order);
        thin.num_keys = 2;
        thin.keys[0] = Element::new(10, 0);
        thin.keys[1] = Element::new(20, 0);

        let mut right = Node::new_leaf(2, order);
        right.num_keys = cfg.min_keys();
        for i in 0..right.num_keys as usize {
            right.keys[i] = Element::new(200 + i as i32, 0);
        }

        pager.allocate();
        pager.allocate();
        pager.allocate();
        pager.write(&root).unwrap();
        pager.write(&thin).unwrap();
        pager.write(&right).unwrap();
        pager.set_root_id(0);

        let err = validate_integrity(&mut pager, &cfg).unwrap_err();
        assert!(matches!(err, BtreeError::StructuralCorruption { .. }));
    }
}
