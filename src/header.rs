//! `Header`: the persistent 4096-byte metadata block at file offset 0.

use crate::error::{BtreeError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

pub const MAGIC: u32 = 0x42542145;
pub const HEADER_SIZE: usize = 4096;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Header {
    pub magic: u32,
    pub order: i32,
    pub page_size: i32,
    pub root_id: i32,
    pub node_count: i32,
    pub free_list_count: i32,
    pub free_list_offset: i64,
}

impl Header {
    pub fn new(order: i32) -> Self {
        Header {
            magic: MAGIC,
            order,
            page_size: 12 * order + 16,
            root_id: -1,
            node_count: 0,
            free_list_count: 0,
            free_list_offset: 0,
        }
    }

    /// Fixed byte layout:
    /// 0-3 magic | 4-7 order | 8-11 root_id | 12-15 page_size
    /// | 16-19 node_count | 20-23 free_list_count | 24-31 free_list_offset
    /// | 32-4095 reserved (zero).
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        buf.write_u32::<LittleEndian>(self.magic)?;
        buf.write_i32::<LittleEndian>(self.order)?;
        buf.write_i32::<LittleEndian>(self.root_id)?;
        buf.write_i32::<LittleEndian>(self.page_size)?;
        buf.write_i32::<LittleEndian>(self.node_count)?;
        buf.write_i32::<LittleEndian>(self.free_list_count)?;
        buf.write_i64::<LittleEndian>(self.free_list_offset)?;
        buf.resize(HEADER_SIZE, 0);
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(BtreeError::format("truncated header block"));
        }
        let mut cur = Cursor::new(bytes);
        let magic = cur.read_u32::<LittleEndian>()?;
        let order = cur.read_i32::<LittleEndian>()?;
        let root_id = cur.read_i32::<LittleEndian>()?;
        let page_size = cur.read_i32::<LittleEndian>()?;
        let node_count = cur.read_i32::<LittleEndian>()?;
        let free_list_count = cur.read_i32::<LittleEndian>()?;
        let free_list_offset = cur.read_i64::<LittleEndian>()?;

        if magic != MAGIC {
            return Err(BtreeError::format(format!(
                "bad magic: expected {:#x}, got {:#x}",
                MAGIC, magic
            )));
        }
        if order < crate::config::MIN_ORDER {
            return Err(BtreeError::format(format!(
                "order {} below minimum {}",
                order, crate::config::MIN_ORDER
            )));
        }
        if page_size != 12 * order + 16 {
            return Err(BtreeError::format(format!(
                "page_size {} does not match order {}",
                page_size, order
            )));
        }
        Ok(Header {
            magic,
            order,
            page_size,
            root_id,
            node_count,
            free_list_count,
            free_list_offset,
        })
    }
}
