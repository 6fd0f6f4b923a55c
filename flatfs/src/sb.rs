use crate::config::{BLOCK_SIZE, NUM_BLOCKS, NUM_INODES, ROOT_INODE, SB_MAGIC};
use crate::error::{FsError, Result};

const ENCODED_LEN: usize = 20;

/// The first block of the file system storing information critical for mounting
/// the file system and verifying the underlying disk is formatted correctly.
///
/// Written once at format time. Every later mount must read back exactly the
/// geometry this build was compiled with.
#[derive(Debug, PartialEq)]
pub struct SuperBlock {
    /// A 32-bit identifying constant.
    pub sb_magic: u32,
    pub block_size: u32,
    /// Total number of blocks on the device, metadata included.
    pub fs_size: u32,
    /// Number of inode slots, which also bounds the root directory.
    pub inode_table_len: u32,
    pub root_dir_inode: u32,
}

impl Default for SuperBlock {
    fn default() -> Self {
        Self {
            sb_magic: SB_MAGIC,
            block_size: BLOCK_SIZE as u32,
            fs_size: NUM_BLOCKS as u32,
            inode_table_len: NUM_INODES as u32,
            root_dir_inode: ROOT_INODE as u32,
        }
    }
}

impl SuperBlock {
    /// Reads the super block from the front of a block buffer.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < ENCODED_LEN {
            return Err(FsError::InvalidSuperBlock(format!(
                "expected at least {} bytes, got {}",
                ENCODED_LEN,
                buf.len()
            )));
        }
        let field = |i: usize| {
            let b = &buf[i * 4..i * 4 + 4];
            u32::from_be_bytes([b[0], b[1], b[2], b[3]])
        };

        Ok(Self {
            sb_magic: field(0),
            block_size: field(1),
            fs_size: field(2),
            inode_table_len: field(3),
            root_dir_inode: field(4),
        })
    }

    /// Serializes the SuperBlock into a BLOCK_SIZE buffer for writing to disk.
    /// The encoding is a series of struct fields with big endian alignment.
    pub fn serialize(&self) -> Vec<u8> {
        let mut sb_encoded = Vec::with_capacity(BLOCK_SIZE);
        sb_encoded.extend_from_slice(&self.sb_magic.to_be_bytes());
        sb_encoded.extend_from_slice(&self.block_size.to_be_bytes());
        sb_encoded.extend_from_slice(&self.fs_size.to_be_bytes());
        sb_encoded.extend_from_slice(&self.inode_table_len.to_be_bytes());
        sb_encoded.extend_from_slice(&self.root_dir_inode.to_be_bytes());
        sb_encoded.resize(BLOCK_SIZE, 0);
        sb_encoded
    }

    /// Refuses any image whose geometry differs from the compiled-in layout.
    pub fn validate(&self) -> Result<()> {
        if self.sb_magic != SB_MAGIC {
            return Err(FsError::InvalidSuperBlock(format!(
                "bad magic {:#010x}",
                self.sb_magic
            )));
        }
        let expected = Self::default();
        if *self != expected {
            return Err(FsError::InvalidSuperBlock(format!(
                "geometry {:?} does not match {:?}",
                self, expected
            )));
        }
        Ok(())
    }
}
