//! End-to-end scenarios exercising the public `classic_btree` API against
//! real files on disk: small-order structural churn, large sequential and
//! shuffled workloads, persistence across reopen, compaction, and
//! bulk-load followed by incremental growth.

use classic_btree::{build_from_sorted, Element, Tree};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tempfile::tempdir;

fn db_path(dir: &tempfile::TempDir, name: &str) -> std::path::PathBuf {
    dir.path().join(name)
}

#[test]
fn small_order_insert_delete_keeps_structure_valid() {
    let dir = tempdir().unwrap();
    let path = db_path(&dir, "small.db");
    let mut tree = Tree::open(&path, 4).unwrap();

    let keys: Vec<i32> = (1..=60).collect();
    for &k in &keys {
        tree.insert(k, k * 2).unwrap();
    }
    tree.validate_integrity().unwrap();

    for &k in keys.iter().step_by(3) {
        tree.delete(k, 0).unwrap();
    }
    tree.validate_integrity().unwrap();
    assert_eq!(tree.count_zombies().unwrap(), 0);

    let remaining: Vec<i32> = keys.iter().copied().filter(|k| k % 3 != 0).collect();
    for k in remaining {
        assert_eq!(tree.try_search(k).unwrap(), Some(Element::new(k, k * 2)));
    }
    for k in keys.iter().step_by(3) {
        assert_eq!(tree.try_search(*k).unwrap(), None);
    }
}

#[test]
fn sequential_large_workload_preserves_order() {
    let dir = tempdir().unwrap();
    let path = db_path(&dir, "seq.db");
    let mut tree = Tree::open(&path, 32).unwrap();

    for i in 1..=5000 {
        tree.insert(i, i).unwrap();
    }
    let keys = tree.get_keys().unwrap().collect::<classic_btree::Result<Vec<_>>>().unwrap();
    let expected: Vec<i32> = (1..=5000).collect();
    assert_eq!(keys, expected);

    let report = tree.perform_full_audit().unwrap();
    assert_eq!(report.total_keys, 5000);
    assert_eq!(report.ghost_count, 0);
    assert_eq!(report.zombie_count, 0);
}

#[test]
fn shuffled_insert_and_delete_matches_reference_set() {
    let dir = tempdir().unwrap();
    let path = db_path(&dir, "shuffled.db");
    let mut tree = Tree::open(&path, 16).unwrap();

    let mut rng = StdRng::seed_from_u64(42);
    let mut insert_order: Vec<i32> = (1..=2000).collect();
    insert_order.shuffle(&mut rng);
    for &k in &insert_order {
        tree.insert(k, k * 7).unwrap();
    }

    let mut delete_order: Vec<i32> = (1..=2000).filter(|k| k % 2 == 0).collect();
    delete_order.shuffle(&mut rng);
    for &k in &delete_order {
        tree.delete(k, 0).unwrap();
    }

    tree.validate_integrity().unwrap();
    let mut expected: Vec<i32> = (1..=2000).filter(|k| k % 2 != 0).collect();
    expected.sort();
    let actual = tree.get_keys().unwrap().collect::<classic_btree::Result<Vec<_>>>().unwrap();
    assert_eq!(actual, expected);
    assert_eq!(tree.count_zombies().unwrap(), 0);
}

#[test]
fn reopening_after_close_preserves_every_key() {
    let dir = tempdir().unwrap();
    let path = db_path(&dir, "persist.db");

    {
        let mut tree = Tree::open(&path, 8).unwrap();
        for i in 1..=300 {
            tree.insert(i, i * 3).unwrap();
        }
        for i in (1..=300).step_by(5) {
            tree.delete(i, 0).unwrap();
        }
        tree.close().unwrap();
    }

    let mut tree = Tree::open(&path, 8).unwrap();
    for i in 1..=300 {
        let expect = if i % 5 == 0 { None } else { Some(Element::new(i, i * 3)) };
        assert_eq!(tree.try_search(i).unwrap(), expect);
    }
    for i in 301..=350 {
        tree.insert(i, i).unwrap();
    }
    for i in 301..=350 {
        assert_eq!(tree.try_search(i).unwrap(), Some(Element::new(i, i)));
    }
}

#[test]
fn compaction_shrinks_file_and_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = db_path(&dir, "compact.db");
    let mut tree = Tree::open(&path, 8).unwrap();

    for i in 1..=1000 {
        tree.insert(i, i).unwrap();
    }
    for i in (1..=1000).step_by(2) {
        tree.delete(i, 0).unwrap();
    }
    let zombies_before = tree.count_zombies().unwrap();
    let free_before = tree.free_list_len();
    assert_eq!(zombies_before, 0);
    assert!(free_before > 0, "deleting every even key should have freed pages");

    let size_before = std::fs::metadata(&path).unwrap().len();
    tree.compact().unwrap();
    let size_after = std::fs::metadata(&path).unwrap().len();
    assert!(size_after <= size_before);
    assert_eq!(tree.count_zombies().unwrap(), 0);
    assert_eq!(tree.free_list_len(), 0);

    for i in (2..=1000).step_by(2) {
        assert_eq!(tree.try_search(i).unwrap(), Some(Element::new(i, i)));
    }
    tree.close().unwrap();

    let mut reopened = Tree::open(&path, 8).unwrap();
    for i in (2..=1000).step_by(2) {
        assert_eq!(reopened.try_search(i).unwrap(), Some(Element::new(i, i)));
    }
}

#[test]
fn bulk_load_then_incremental_growth_stays_consistent() {
    let dir = tempdir().unwrap();
    let path = db_path(&dir, "bulk.db");
    let elements: Vec<Element> = (1..=10_000).step_by(2).map(|k| Element::new(k, k)).collect();

    let mut tree = build_from_sorted(&elements, &path, 64, 0.75).unwrap();
    tree.validate_integrity().unwrap();

    let mut rng = StdRng::seed_from_u64(7);
    let mut new_keys: Vec<i32> = (2..=10_000).step_by(2).collect();
    new_keys.shuffle(&mut rng);
    for &k in &new_keys {
        tree.insert(k, k).unwrap();
    }

    tree.validate_integrity().unwrap();
    let all = tree.get_keys().unwrap().collect::<classic_btree::Result<Vec<_>>>().unwrap();
    let expected: Vec<i32> = (1..=10_000).collect();
    assert_eq!(all, expected);

    let report = tree.perform_full_audit().unwrap();
    assert_eq!(report.total_keys, 10_000);
    assert_eq!(report.zombie_count, 0);
}
