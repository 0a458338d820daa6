//! `Compactor`: live-set enumeration, id remapping, rewrite to a
//! temporary file, and an atomic swap back into place.

use crate::error::{BtreeError, Result};
use crate::page_manager::PageManager;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::info;

/// Rewrites the file backing `pager` with no zombies, no free list, and
/// contiguous ids `[0, reachable_count)`. On success `*pager` is replaced
/// with a fresh handle onto the rewritten file.
pub fn compact(pager: &mut PageManager) -> Result<()> {
    let order = pager.order();
    let root_id = pager.root_id();
    let node_count = pager.node_count();
    let path = pager.path().to_path_buf();

    let mut seen = vec![false; node_count.max(0) as usize];
    if root_id >= 0 {
        mark_live(pager, root_id, &mut seen)?;
    }
    let live_ids: Vec<i32> = (0..node_count).filter(|&id| seen[id as usize]).collect();
    info!(live = live_ids.len(), node_count, "compaction: live set scanned");

    let mut remap: HashMap<i32, i32> = HashMap::with_capacity(live_ids.len());
    for (new_id, &old_id) in live_ids.iter().enumerate() {
        remap.insert(old_id, new_id as i32);
    }

    let dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    let tmp_path = NamedTempFile::new_in(&dir)?
        .into_temp_path()
        .keep()
        .map_err(|e| BtreeError::Io(e.error))?;
    let mut dest = PageManager::open(&tmp_path, order)?;

    for &old_id in &live_ids {
        let mut node = pager.read(old_id)?;
        let new_id = dest.allocate();
        debug_assert_eq!(new_id, remap[&old_id]);
        node.id = new_id;
        if !node.leaf {
            for i in 0..=(node.num_keys as usize) {
                node.kids[i] = remap[&node.kids[i]];
            }
        }
        dest.write(&node)?;
    }

    let new_root = if root_id >= 0 {
        *remap
            .get(&root_id)
            .ok_or_else(|| BtreeError::corruption("root id not found in live set during compaction"))?
    } else {
        -1
    };
    dest.set_root_id(new_root);
    dest.close()?;

    let backup_path = backup_path_for(&path);
    fs::rename(&path, &backup_path)?;
    match fs::rename(&tmp_path, &path) {
        Ok(()) => {
            fs::remove_file(&backup_path).ok();
        }
        Err(e) => {
            fs::rename(&backup_path, &path).ok();
            return Err(BtreeError::Io(e));
        }
    }

    *pager = PageManager::open(&path, order)?;
    info!(reachable = live_ids.len(), "compaction complete");
    Ok(())
}

fn backup_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".bak");
    path.with_file_name(name)
}

/// DFS marking reachable ids. A revisit is a cycle and aborts the compaction.
fn mark_live(pager: &mut PageManager, id: i32, seen: &mut Vec<bool>) -> Result<()> {
    if id < 0 || id as usize >= seen.len() {
        return Ok(());
    }
    if seen[id as usize] {
        return Err(BtreeError::corruption(format!(
            "cycle detected at node {} during compaction",
            id
        )));
    }
    seen[id as usize] = true;
    let node = pager.read(id)?;
    if !node.leaf {
        for i in 0..=(node.num_keys as usize) {
            mark_live(pager, node.kids[i], seen)?;
        }
    }
    Ok(())
}
