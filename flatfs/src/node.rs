use std::convert::TryFrom;

use crate::config::{
    BLOCK_SIZE, INODE_SIZE, INODE_TABLE_BLOCKS, NUM_DIRECT, NUM_INODES, PTRS_PER_BLOCK,
    ROOT_DIR_BLOCKS, ROOT_DIR_START, ROOT_INODE,
};
use crate::error::{FsError, Result};
use crate::io::BlockNumber;

use zerocopy::{AsBytes, FromBytes, FromZeroes};

const ROOT_DEFAULT_MODE: u32 = 0o040_755;
const FILE_DEFAULT_MODE: u32 = 0o100_644;
/// Marks an empty field on disk.
const SENTINEL: i32 = -1;

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Copy, Clone)]
/// On-disk inode record. This structure __must stay exactly INODE_SIZE bytes.__
struct RawInode {
    mode: i32,
    /// Number of data blocks allocated to the file.
    link_cnt: i32,
    uid: i32,
    gid: i32,
    size: i32,
    data_ptrs: [i32; NUM_DIRECT],
    indirect_ptr: i32,
}

impl RawInode {
    fn unused() -> Self {
        Self {
            mode: SENTINEL,
            link_cnt: SENTINEL,
            uid: SENTINEL,
            gid: SENTINEL,
            size: SENTINEL,
            data_ptrs: [SENTINEL; NUM_DIRECT],
            indirect_ptr: SENTINEL,
        }
    }
}

pub(crate) fn encode_ptr(ptr: Option<BlockNumber>) -> i32 {
    ptr.and_then(|b| i32::try_from(b).ok()).unwrap_or(SENTINEL)
}

pub(crate) fn decode_ptr(raw: i32) -> Option<BlockNumber> {
    usize::try_from(raw).ok()
}

/// A file's metadata: ownership, length and where its blocks live.
#[derive(Debug, Clone, PartialEq)]
pub struct Inode {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Length in bytes. Directories do not track one.
    pub size: Option<usize>,
    /// Data blocks currently allocated, which is also the number of valid
    /// pointers across `direct` and the indirect block.
    pub blocks: usize,
    pub direct: [Option<BlockNumber>; NUM_DIRECT],
    /// Only set while `blocks > NUM_DIRECT`.
    pub indirect: Option<BlockNumber>,
}

impl Inode {
    /// The root directory owns the fixed run of blocks right after the inode table.
    pub fn root() -> Self {
        let mut direct = [None; NUM_DIRECT];
        for (i, ptr) in direct.iter_mut().take(ROOT_DIR_BLOCKS).enumerate() {
            *ptr = Some(ROOT_DIR_START + i);
        }
        Self {
            mode: ROOT_DEFAULT_MODE,
            uid: 0,
            gid: 0,
            size: None,
            blocks: ROOT_DIR_BLOCKS,
            direct,
            indirect: None,
        }
    }

    /// An empty regular file holding a single data block.
    pub fn file(first_block: BlockNumber) -> Self {
        let mut direct = [None; NUM_DIRECT];
        direct[0] = Some(first_block);
        Self {
            mode: FILE_DEFAULT_MODE,
            uid: 0,
            gid: 0,
            size: Some(0),
            blocks: 1,
            direct,
            indirect: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.size.is_none()
    }

    fn from_raw(raw: &RawInode) -> Self {
        let mut direct = [None; NUM_DIRECT];
        for (ptr, &r) in direct.iter_mut().zip(raw.data_ptrs.iter()) {
            *ptr = decode_ptr(r);
        }
        Self {
            mode: raw.mode as u32,
            uid: raw.uid as u32,
            gid: raw.gid as u32,
            size: usize::try_from(raw.size).ok(),
            blocks: usize::try_from(raw.link_cnt).unwrap_or(0),
            direct,
            indirect: decode_ptr(raw.indirect_ptr),
        }
    }

    fn to_raw(&self) -> RawInode {
        let mut data_ptrs = [SENTINEL; NUM_DIRECT];
        for (r, &ptr) in data_ptrs.iter_mut().zip(self.direct.iter()) {
            *r = encode_ptr(ptr);
        }
        RawInode {
            mode: self.mode as i32,
            link_cnt: self.blocks as i32,
            uid: self.uid as i32,
            gid: self.gid as i32,
            size: self.size.map_or(SENTINEL, |s| s as i32),
            data_ptrs,
            indirect_ptr: encode_ptr(self.indirect),
        }
    }
}

/// The fixed array of inode slots. An occupied slot holds `Some`; the
/// occupancy flags persisted next to the table are derived from that.
pub struct InodeTable {
    nodes: Vec<Option<Inode>>,
}

impl InodeTable {
    /// A fresh table holding only the root directory.
    pub fn new() -> Self {
        let mut nodes = vec![None; NUM_INODES];
        nodes[ROOT_INODE] = Some(Inode::root());
        Self { nodes }
    }

    /// Rebuilds the table from the persisted records and occupancy flags.
    pub fn load(table: &[u8], status: &[u8]) -> Result<Self> {
        if table.len() < NUM_INODES * INODE_SIZE || status.len() < NUM_INODES {
            return Err(FsError::Corrupt("inode table is truncated".to_string()));
        }
        let nodes: Vec<Option<Inode>> = table
            .chunks_exact(INODE_SIZE)
            .zip(status.iter())
            .take(NUM_INODES)
            .map(|(chunk, &flag)| {
                if flag == 0 {
                    return None;
                }
                RawInode::read_from(chunk).map(|raw| Inode::from_raw(&raw))
            })
            .collect();

        match &nodes[ROOT_INODE] {
            Some(root) if root.is_dir() => Ok(Self { nodes }),
            _ => Err(FsError::Corrupt("root inode is not a directory".to_string())),
        }
    }

    /// Lowest free slot, never the root's. Nothing is reserved until `set`.
    pub fn first_free(&self) -> Option<usize> {
        self.nodes
            .iter()
            .enumerate()
            .skip(ROOT_INODE + 1)
            .find(|(_, node)| node.is_none())
            .map(|(i, _)| i)
    }

    /// Writes a full record into `slot` and marks it occupied.
    pub fn set(&mut self, slot: usize, node: Inode) {
        self.nodes[slot] = Some(node);
    }

    /// Clears `slot` back to the unused pattern. The root slot is never freed.
    pub fn free(&mut self, slot: usize) {
        assert_ne!(slot, ROOT_INODE, "the root inode is permanent");
        self.nodes[slot] = None;
    }

    pub fn get(&self, slot: usize) -> Option<&Inode> {
        self.nodes.get(slot).and_then(Option::as_ref)
    }

    pub fn free_count(&self) -> usize {
        self.nodes.iter().filter(|node| node.is_none()).count()
    }

    /// Every record, unused ones as sentinels, padded to whole blocks.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(INODE_TABLE_BLOCKS * BLOCK_SIZE);
        for node in self.nodes.iter() {
            let raw = node.as_ref().map_or_else(RawInode::unused, Inode::to_raw);
            buf.extend_from_slice(raw.as_bytes());
        }
        buf.resize(INODE_TABLE_BLOCKS * BLOCK_SIZE, 0);
        buf
    }

    /// One byte per slot, 1 while occupied, padded to a block.
    pub fn serialize_status(&self) -> Vec<u8> {
        let mut buf: Vec<u8> = self.nodes.iter().map(|n| n.is_some() as u8).collect();
        buf.resize(BLOCK_SIZE, 0);
        buf
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Copy, Clone)]
struct RawIndirect {
    ptrs: [i32; PTRS_PER_BLOCK],
}

/// The block of extra pointers addressing file blocks past the direct ones.
#[derive(Debug, Clone, PartialEq)]
pub struct IndirectBlock {
    ptrs: Vec<Option<BlockNumber>>,
}

impl IndirectBlock {
    pub fn new() -> Self {
        Self {
            ptrs: vec![None; PTRS_PER_BLOCK],
        }
    }

    pub fn parse(buf: &[u8]) -> Option<Self> {
        let raw = RawIndirect::read_from_prefix(buf)?;
        Some(Self {
            ptrs: raw.ptrs.iter().map(|&p| decode_ptr(p)).collect(),
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut raw = RawIndirect {
            ptrs: [SENTINEL; PTRS_PER_BLOCK],
        };
        for (r, &ptr) in raw.ptrs.iter_mut().zip(self.ptrs.iter()) {
            *r = encode_ptr(ptr);
        }
        raw.as_bytes().to_vec()
    }

    pub fn get(&self, i: usize) -> Option<BlockNumber> {
        self.ptrs.get(i).copied().flatten()
    }

    pub fn set(&mut self, i: usize, ptr: Option<BlockNumber>) {
        self.ptrs[i] = ptr;
    }
}

impl Default for IndirectBlock {
    fn default() -> Self {
        Self::new()
    }
}
