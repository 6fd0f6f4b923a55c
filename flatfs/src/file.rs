use std::fmt;

use crate::config::NUM_INODES;
use crate::error::{FsError, Result};

/// Names one open-file session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(usize);

impl Handle {
    pub fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for Handle {
    fn from(index: usize) -> Self {
        Handle(index)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd{}", self.0)
    }
}

/// An inode bound to a byte cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenFile {
    pub inode: usize,
    pub rwptr: usize,
}

/// Open handles are never persisted. No inode appears in more than one slot.
pub struct OpenFileTable {
    slots: Vec<Option<OpenFile>>,
}

impl OpenFileTable {
    pub fn new() -> Self {
        Self {
            slots: vec![None; NUM_INODES],
        }
    }

    pub fn first_free(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    pub fn is_open(&self, inode: usize) -> bool {
        self.slots.iter().flatten().any(|f| f.inode == inode)
    }

    pub fn bind(&mut self, slot: usize, inode: usize, rwptr: usize) -> Handle {
        debug_assert!(!self.is_open(inode));
        self.slots[slot] = Some(OpenFile { inode, rwptr });
        Handle(slot)
    }

    pub fn close(&mut self, handle: Handle) -> Result<()> {
        let slot = self.slots.get_mut(handle.0).ok_or(FsError::InvalidHandle)?;
        slot.take().map(|_| ()).ok_or(FsError::InvalidHandle)
    }

    pub fn get(&self, handle: Handle) -> Result<&OpenFile> {
        self.slots
            .get(handle.0)
            .and_then(Option::as_ref)
            .ok_or(FsError::InvalidHandle)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Result<&mut OpenFile> {
        self.slots
            .get_mut(handle.0)
            .and_then(Option::as_mut)
            .ok_or(FsError::InvalidHandle)
    }

    pub fn open_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }
}

impl Default for OpenFileTable {
    fn default() -> Self {
        Self::new()
    }
}
