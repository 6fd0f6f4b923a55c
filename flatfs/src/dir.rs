//! The single flat directory. Entries live in the blocks owned by the root
//! inode, one slot per possible inode.

use crate::config::{
    BLOCK_SIZE, DIR_ENTRY_SIZE, MAX_NAME_LEN, NAME_FIELD_LEN, NUM_INODES, ROOT_DIR_BLOCKS,
};
use crate::error::{FsError, Result};
use crate::node::{decode_ptr, encode_ptr};

use zerocopy::{AsBytes, FromBytes, FromZeroes};

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Copy, Clone)]
struct RawDirEntry {
    /// Inode number, -1 for an empty slot.
    num: i32,
    /// NUL padded.
    name: [u8; NAME_FIELD_LEN],
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirEntry {
    pub inode: usize,
    pub name: String,
}

/// Checks a name before anything is allocated for it.
pub fn validate_name(name: &str) -> Result<()> {
    if name.len() > MAX_NAME_LEN {
        return Err(FsError::NameTooLong);
    }
    if name.is_empty() || name.contains('\0') || name.contains('/') {
        return Err(FsError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Position of a caller's walk over the directory. Each caller holds its own,
/// so concurrent listings never disturb one another.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct DirCursor {
    locus: usize,
}

impl DirCursor {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct RootDir {
    entries: Vec<Option<DirEntry>>,
    /// Number of occupied slots.
    live: usize,
}

impl RootDir {
    pub fn new() -> Self {
        Self {
            entries: vec![None; NUM_INODES],
            live: 0,
        }
    }

    /// Decodes the entries stored in the root directory's data blocks.
    pub fn load(buf: &[u8]) -> Self {
        let entries: Vec<Option<DirEntry>> = buf
            .chunks_exact(DIR_ENTRY_SIZE)
            .take(NUM_INODES)
            .map(|chunk| {
                let raw = RawDirEntry::read_from(chunk)?;
                let inode = decode_ptr(raw.num)?;
                let end = raw.name.iter().position(|&b| b == 0).unwrap_or(NAME_FIELD_LEN);
                Some(DirEntry {
                    inode,
                    name: String::from_utf8_lossy(&raw.name[..end]).into_owned(),
                })
            })
            .collect();
        let mut dir = Self::new();
        for (slot, entry) in entries.into_iter().enumerate() {
            dir.live += entry.is_some() as usize;
            dir.entries[slot] = entry;
        }
        dir
    }

    /// All slots, padded to the root directory's block run.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ROOT_DIR_BLOCKS * BLOCK_SIZE);
        for entry in self.entries.iter() {
            let mut raw = RawDirEntry {
                num: encode_ptr(None),
                name: [0; NAME_FIELD_LEN],
            };
            if let Some(entry) = entry {
                raw.num = encode_ptr(Some(entry.inode));
                let bytes = entry.name.as_bytes();
                let len = bytes.len().min(MAX_NAME_LEN);
                raw.name[..len].copy_from_slice(&bytes[..len]);
            }
            buf.extend_from_slice(raw.as_bytes());
        }
        buf.resize(ROOT_DIR_BLOCKS * BLOCK_SIZE, 0);
        buf
    }

    /// Linear scan for `name`.
    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .flatten()
            .find(|entry| entry.name == name)
            .map(|entry| entry.inode)
    }

    pub fn first_free_slot(&self) -> Option<usize> {
        self.entries.iter().position(Option::is_none)
    }

    pub fn insert(&mut self, slot: usize, inode: usize, name: &str) {
        debug_assert!(self.entries[slot].is_none());
        debug_assert!(self.lookup(name).is_none());
        self.entries[slot] = Some(DirEntry {
            inode,
            name: name.to_string(),
        });
        self.live += 1;
    }

    /// Clears the slot holding `name`, returning its inode.
    pub fn remove(&mut self, name: &str) -> Option<usize> {
        let slot = self
            .entries
            .iter()
            .position(|e| e.as_ref().map_or(false, |e| e.name == name))?;
        let entry = self.entries[slot].take()?;
        self.live -= 1;
        Some(entry.inode)
    }

    /// Logical entry count.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn free_count(&self) -> usize {
        NUM_INODES - self.live
    }

    pub fn entries(&self) -> impl Iterator<Item = &DirEntry> {
        self.entries.iter().flatten()
    }

    /// Advances `cursor` to the next occupied slot and returns its name. Running
    /// off the last slot rewinds the cursor and returns `None`, ending the pass.
    pub fn next_name(&self, cursor: &mut DirCursor) -> Option<&str> {
        while cursor.locus < self.entries.len() {
            let slot = cursor.locus;
            cursor.locus += 1;
            if let Some(entry) = &self.entries[slot] {
                return Some(entry.name.as_str());
            }
        }
        cursor.locus = 0;
        None
    }
}

impl Default for RootDir {
    fn default() -> Self {
        Self::new()
    }
}
