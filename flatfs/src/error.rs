use std::fmt;

use thiserror::Error;

use crate::config::MAX_NAME_LEN;

/// The table that ran out of room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Handle,
    Inode,
    DirEntry,
    Block,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Resource::Handle => "open file handles",
            Resource::Inode => "inodes",
            Resource::DirEntry => "directory entries",
            Resource::Block => "data blocks",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum FsError {
    #[error("file name exceeds {} bytes", MAX_NAME_LEN)]
    NameTooLong,
    #[error("invalid file name: {0:?}")]
    InvalidName(String),
    #[error("found no file with that name")]
    NotFound,
    #[error("file is already open")]
    AlreadyOpen,
    #[error("no free {0}")]
    ResourceExhausted(Resource),
    #[error("handle is not open")]
    InvalidHandle,
    #[error("seek to {offset} is past the end of file ({size} bytes)")]
    SeekOutOfRange { offset: usize, size: usize },
    #[error("invalid superblock: {0}")]
    InvalidSuperBlock(String),
    #[error("inconsistent metadata: {0}")]
    Corrupt(String),
    #[error("unsuitable block device: {0}")]
    Geometry(String),
    #[error("block device error")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FsError>;
