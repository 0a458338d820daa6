//! `Builder`: bottom-capacity bulk load from a sorted, duplicate-free
//! input.

use crate::config::TreeConfig;
use crate::element::Element;
use crate::error::{BtreeError, Result};
use crate::node::Node;
use crate::page_manager::PageManager;
use crate::tree::Tree;
use std::path::Path;
use tracing::info;

/// Builds a new tree at `path` from a sorted, duplicate-free slice of
/// elements. Bypasses `Tree`'s mutating API and writes pages directly
/// through a private `PageManager`, in post-order, so child ids are
/// always allocated before the parent that references them.
pub fn build_from_sorted<P: AsRef<Path>>(
    elements: &[Element],
    path: P,
    order: i32,
    fill: f64,
) -> Result<Tree> {
    let cfg = TreeConfig::with_fill(order, fill)?;
    debug_assert!(elements.windows(2).all(|w| w[0].key < w[1].key), "input must be sorted and duplicate-free");

    let mut pager = PageManager::open(path, order)?;
    let leaf_target = leaf_target_for(&cfg);

    let root_id = if elements.is_empty() {
        -1
    } else {
        build_subtree(elements, &cfg, leaf_target, &mut pager)?
    };

    pager.set_root_id(root_id);
    pager.commit()?;
    info!(count = elements.len(), order, leaf_target, root_id, "bulk load complete");
    Ok(Tree::from_parts(pager, cfg))
}

fn leaf_target_for(cfg: &TreeConfig) -> i32 {
    let raw = ((cfg.max_keys() as f64) * cfg.fill).floor() as i32;
    raw.clamp(1, cfg.max_keys())
}

/// Least `h >= 1` such that `leaf_target * order^(h-1) >= n`.
fn height_of(n: i64, leaf_target: i64, order: i64) -> i64 {
    let mut h = 1i64;
    let mut capacity = leaf_target;
    while capacity < n {
        capacity = capacity.saturating_mul(order);
        h += 1;
    }
    h
}

fn write_leaf_run(elements: &[Element], order: i32, pager: &mut PageManager) -> Result<i32> {
    if elements.len() as i32 > order - 1 {
        return Err(BtreeError::invalid_state(format!(
            "leaf run of {} elements exceeds capacity {}",
            elements.len(),
            order - 1
        )));
    }
    let id = pager.allocate();
    let mut node = Node::new_leaf(id, order);
    for (i, e) in elements.iter().enumerate() {
        node.keys[i] = *e;
    }
    node.num_keys = elements.len() as i32;
    pager.write(&node)?;
    Ok(id)
}

fn build_subtree(
    elements: &[Element],
    cfg: &TreeConfig,
    leaf_target: i32,
    pager: &mut PageManager,
) -> Result<i32> {
    let n = elements.len();
    let h = height_of(n as i64, leaf_target as i64, cfg.order as i64);

    if n as i32 <= leaf_target || h <= 1 {
        return write_leaf_run(elements, cfg.order, pager);
    }

    let child_capacity = (leaf_target as i64 * cfg.order.pow((h - 2).max(0) as u32) as i64) as usize;
    let max_separators = (cfg.order - 1) as usize;

    let mut children: Vec<i32> = Vec::new();
    let mut separators: Vec<Element> = Vec::new();
    let mut idx = 0usize;

    while idx < n {
        let remaining = n - idx;
        let mut take = child_capacity.min(remaining);

        // Guard: never strand a single trailing element that is just
        // enough to become a separator but leaves nothing for the child
        // that must follow it. Fold it into the current child instead.
        if remaining - take == 1 {
            take = remaining;
        }
        take = take.max(1);

        let child_id = build_subtree(&elements[idx..idx + take], cfg, leaf_target, pager)?;
        children.push(child_id);
        idx += take;

        if idx >= n || separators.len() >= max_separators {
            break;
        }
        separators.push(elements[idx]);
        idx += 1;
    }

    write_internal(&children, &separators, cfg.order, pager)
}

fn write_internal(children: &[i32], separators: &[Element], order: i32, pager: &mut PageManager) -> Result<i32> {
    debug_assert_eq!(children.len(), separators.len() + 1);
    let id = pager.allocate();
    let mut node = Node::new_internal(id, order);
    for (i, s) in separators.iter().enumerate() {
        node.keys[i] = *s;
    }
    for (i, c) in children.iter().enumerate() {
        node.kids[i] = *c;
    }
    node.num_keys = separators.len() as i32;
    pager.write(&node)?;
    Ok(id)
}
