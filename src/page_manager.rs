//! `PageManager`: byte-offset arithmetic, node IO, and the free-list
//! allocator over a single file.

use crate::error::{BtreeError, Result};
use crate::header::{Header, HEADER_SIZE};
use crate::node::Node;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct PageManager {
    path: PathBuf,
    file: File,
    header: Header,
    free_list: BTreeSet<i32>,
}

impl PageManager {
    /// Opens `path` with the given `order`. If the file is empty, a fresh
    /// header is written; otherwise the existing header and free list are
    /// loaded and the file is truncated back to the pre-free-list length.
    pub fn open<P: AsRef<Path>>(path: P, order: i32) -> Result<Self> {
        if order < crate::config::MIN_ORDER {
            return Err(BtreeError::invalid_argument(format!(
                "order must be >= {}, got {}",
                crate::config::MIN_ORDER,
                order
            )));
        }
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let len = file.metadata()?.len();
        let (header, free_list) = if len == 0 {
            let header = Header::new(order);
            file.write_all(&header.encode()?)?;
            file.flush()?;
            (header, BTreeSet::new())
        } else {
            let mut buf = vec![0u8; HEADER_SIZE];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut buf)?;
            let header = Header::decode(&buf)?;
            if header.page_size != 12 * order + 16 {
                return Err(BtreeError::format(format!(
                    "page_size {} does not match requested order {}",
                    header.page_size, order
                )));
            }
            let free_list = if header.free_list_count > 0 {
                load_free_list(&mut file, header.free_list_offset, header.free_list_count)?
            } else {
                BTreeSet::new()
            };
            // Truncate any persisted free-list tail; it is reconstructed
            // in memory and rewritten (possibly with different contents)
            // on the next close.
            let live_len = HEADER_SIZE as u64 + header.node_count as u64 * header.page_size as u64;
            file.set_len(live_len)?;
            (header, free_list)
        };

        debug!(path = %path.display(), order, node_count = header.node_count, "page manager opened");
        Ok(PageManager { path, file, header, free_list })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn order(&self) -> i32 {
        self.header.order
    }

    pub fn page_size(&self) -> i32 {
        self.header.page_size
    }

    pub fn root_id(&self) -> i32 {
        self.header.root_id
    }

    pub fn set_root_id(&mut self, id: i32) {
        self.header.root_id = id;
    }

    pub fn node_count(&self) -> i32 {
        self.header.node_count
    }

    pub fn free_list_len(&self) -> usize {
        self.free_list.len()
    }

    pub fn free_list_contains(&self, id: i32) -> bool {
        self.free_list.contains(&id)
    }

    fn offset(&self, id: i32) -> Result<u64> {
        if id < 0 {
            return Err(BtreeError::invalid_argument(format!("negative id {}", id)));
        }
        let off = HEADER_SIZE as u64 + id as u64 * self.header.page_size as u64;
        let end = off + self.header.page_size as u64;
        let file_len = self.file.metadata()?.len();
        if end > file_len.max(HEADER_SIZE as u64 + self.header.node_count as u64 * self.header.page_size as u64) {
            return Err(BtreeError::invalid_state(format!(
                "id {} offset {} is outside the file",
                id, off
            )));
        }
        Ok(off)
    }

    pub fn read(&mut self, id: i32) -> Result<Node> {
        let off = self.offset(id)?;
        self.file.seek(SeekFrom::Start(off))?;
        let mut buf = vec![0u8; self.header.page_size as usize];
        self.file.read_exact(&mut buf)?;
        Node::decode(&buf, self.header.order)
    }

    pub fn write(&mut self, node: &Node) -> Result<()> {
        if node.id < 0 {
            return Err(BtreeError::invalid_argument(format!("negative id {}", node.id)));
        }
        let off = HEADER_SIZE as u64 + node.id as u64 * self.header.page_size as u64;
        self.file.seek(SeekFrom::Start(off))?;
        let bytes = node.encode(self.header.order)?;
        self.file.write_all(&bytes)?;
        Ok(())
    }

    pub fn zero(&mut self, id: i32) -> Result<()> {
        let off = self.offset(id)?;
        self.file.seek(SeekFrom::Start(off))?;
        let zeros = vec![0u8; self.header.page_size as usize];
        self.file.write_all(&zeros)?;
        Ok(())
    }

    /// Pops any member of the free list; else returns `node_count` and
    /// grows the high-water mark.
    pub fn allocate(&mut self) -> i32 {
        if let Some(&id) = self.free_list.iter().next() {
            self.free_list.remove(&id);
            debug!(id, "allocated from free list");
            id
        } else {
            let id = self.header.node_count;
            self.header.node_count += 1;
            debug!(id, "allocated new slot");
            id
        }
    }

    pub fn free(&mut self, id: i32) {
        debug!(id, "freed");
        self.free_list.insert(id);
    }

    /// Persists the header. Does not touch the free list on disk.
    pub fn commit(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.header.encode()?)?;
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Persists the free list at the current end-of-file, records its
    /// locator in the header, persists the header, and leaves the file
    /// handle open (callers decide whether to drop it).
    pub fn close(&mut self) -> Result<()> {
        let live_len = HEADER_SIZE as u64 + self.header.node_count as u64 * self.header.page_size as u64;
        self.file.set_len(live_len)?;
        let offset = live_len;
        self.file.seek(SeekFrom::Start(offset))?;
        for &id in &self.free_list {
            self.file.write_i32::<LittleEndian>(id)?;
        }
        self.header.free_list_count = self.free_list.len() as i32;
        self.header.free_list_offset = offset as i64;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.header.encode()?)?;
        self.file.flush()?;
        self.file.sync_all()?;
        debug!(free_list_count = self.header.free_list_count, "page manager closed");
        Ok(())
    }
}

fn load_free_list(file: &mut File, offset: i64, count: i32) -> Result<BTreeSet<i32>> {
    file.seek(SeekFrom::Start(offset as u64))?;
    let mut set = BTreeSet::new();
    for _ in 0..count {
        set.insert(file.read_i32::<LittleEndian>()?);
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn allocate_and_reuse() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.db");
        let mut pm = PageManager::open(&path, 4).unwrap();
        let a = pm.allocate();
        let b = pm.allocate();
        assert_eq!((a, b), (0, 1));
        pm.free(a);
        let c = pm.allocate();
        assert_eq!(c, a);
    }

    #[test]
    fn write_read_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.db");
        let mut pm = PageManager::open(&path, 4).unwrap();
        let id = pm.allocate();
        let mut node = Node::new_leaf(id, pm.order());
        node.num_keys = 1;
        node.keys[0] = crate::element::Element::new(42, 99);
        pm.write(&node).unwrap();
        let back = pm.read(id).unwrap();
        assert_eq!(back.keys[0].key, 42);
    }

    #[test]
    fn close_and_reopen_preserves_free_list() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.db");
        {
            let mut pm = PageManager::open(&path, 4).unwrap();
            let a = pm.allocate();
            let _b = pm.allocate();
            pm.free(a);
            pm.close().unwrap();
        }
        let pm2 = PageManager::open(&path, 4).unwrap();
        assert_eq!(pm2.free_list_len(), 1);
        assert!(pm2.free_list_contains(0));
    }
}
