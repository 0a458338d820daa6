//! `Node`: a fixed-capacity page parameterized by the tree's order.

use crate::element::{Element, SENTINEL};
use crate::error::{BtreeError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// "no node" / "no child" / unused slot.
pub const NONE_ID: i32 = -1;

/// A node holds up to `order - 1` logical keys and, if internal, up to
/// `order` logical children. The physical arrays carry one extra slot
/// beyond the maximum logical size so a node can transiently hold
/// `order` keys right before it gets split.
#[derive(Clone, Debug)]
pub struct Node {
    pub leaf: bool,
    pub num_keys: i32,
    pub id: i32,
    /// Physical capacity `order`; logical keys occupy `keys[0..num_keys]`.
    pub keys: Vec<Element>,
    /// Physical capacity `order + 1`; logical children occupy
    /// `kids[0..num_keys + 1]` when non-leaf. Unused for leaves.
    pub kids: Vec<i32>,
}

impl Node {
    pub fn new_leaf(id: i32, order: i32) -> Self {
        Node {
            leaf: true,
            num_keys: 0,
            id,
            keys: vec![SENTINEL; order as usize],
            kids: vec![NONE_ID; (order + 1) as usize],
        }
    }

    pub fn new_internal(id: i32, order: i32) -> Self {
        Node {
            leaf: false,
            num_keys: 0,
            id,
            keys: vec![SENTINEL; order as usize],
            kids: vec![NONE_ID; (order + 1) as usize],
        }
    }

    /// Finds the least index `i` with `keys[i].key >= key`. If no such
    /// index exists within `[0, num_keys)`, returns `num_keys`.
    pub fn find_index(&self, key: i32) -> usize {
        let n = self.num_keys as usize;
        match self.keys[..n].binary_search_by_key(&key, |e| e.key) {
            Ok(i) => i,
            Err(i) => i,
        }
    }

    /// True if `keys[i].key == key` for the index `find_index` returns.
    pub fn contains_at(&self, i: usize, key: i32) -> bool {
        i < self.num_keys as usize && self.keys[i].key == key
    }

    fn wipe_key(&mut self, i: usize) {
        self.keys[i] = SENTINEL;
    }

    fn wipe_kid(&mut self, i: usize) {
        self.kids[i] = NONE_ID;
    }

    /// Clears all logical slots beyond `num_keys` / `num_keys + 1` back to
    /// sentinels. Called after any shrinking mutation.
    pub fn wipe_unused(&mut self) {
        let n = self.num_keys as usize;
        for i in n..self.keys.len() {
            self.wipe_key(i);
        }
        if self.leaf {
            for k in self.kids.iter_mut() {
                *k = NONE_ID;
            }
        } else {
            for i in (n + 1)..self.kids.len() {
                self.wipe_kid(i);
            }
        }
    }

    // --- Encoding -----------------------------------------------------
    //
    // leaf(i32: 0/1) | num_keys(i32) | id(i32) | keys[m]{key(i32),data(i32)}
    // | kids[m+1](i32), little-endian, total 12 + 8m + 4(m+1) bytes.

    pub fn encode(&self, order: i32) -> Result<Vec<u8>> {
        let page_size = (12 * order + 16) as usize;
        let mut buf = Vec::with_capacity(page_size);
        buf.write_i32::<LittleEndian>(if self.leaf { 1 } else { 0 })?;
        buf.write_i32::<LittleEndian>(self.num_keys)?;
        buf.write_i32::<LittleEndian>(self.id)?;
        for i in 0..order as usize {
            let e = self.keys.get(i).copied().unwrap_or(SENTINEL);
            buf.write_i32::<LittleEndian>(e.key)?;
            buf.write_i32::<LittleEndian>(e.data)?;
        }
        for i in 0..(order + 1) as usize {
            let k = self.kids.get(i).copied().unwrap_or(NONE_ID);
            buf.write_i32::<LittleEndian>(k)?;
        }
        debug_assert_eq!(buf.len(), page_size);
        Ok(buf)
    }

    pub fn decode(bytes: &[u8], order: i32) -> Result<Self> {
        let mut cur = Cursor::new(bytes);
        let leaf = cur.read_i32::<LittleEndian>()? != 0;
        let num_keys = cur.read_i32::<LittleEndian>()?;
        let id = cur.read_i32::<LittleEndian>()?;
        let mut keys = Vec::with_capacity(order as usize);
        for _ in 0..order {
            let key = cur.read_i32::<LittleEndian>()?;
            let data = cur.read_i32::<LittleEndian>()?;
            keys.push(Element::new(key, data));
        }
        let mut kids = Vec::with_capacity((order + 1) as usize);
        for _ in 0..(order + 1) {
            kids.push(cur.read_i32::<LittleEndian>()?);
        }
        if num_keys < 0 || num_keys > order {
            return Err(BtreeError::format(format!(
                "node {} has out-of-range num_keys {}",
                id, num_keys
            )));
        }
        Ok(Node { leaf, num_keys, id, keys, kids })
    }

}
