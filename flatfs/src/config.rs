//! Compiled-in volume geometry. An image formatted with different values is
//! refused at mount time.

/// Size in bytes of every block on the device.
pub const BLOCK_SIZE: usize = 1024;
/// Total number of blocks on the device.
pub const NUM_BLOCKS: usize = 1024;
/// Capacity of the inode table, and therefore of the root directory.
pub const NUM_INODES: usize = 100;
/// Inode permanently owned by the root directory.
pub const ROOT_INODE: usize = 0;

/// Identifies a formatted image in the superblock's first field.
pub const SB_MAGIC: u32 = 0xABCD_0005;

/// Known locations.
pub const SUPERBLOCK_INDEX: usize = 0;
pub const INODE_START: usize = 1;
pub const INODE_STATUS_BLOCK: usize = NUM_BLOCKS - 2;
pub const BITMAP_BLOCK: usize = NUM_BLOCKS - 1;

/// Direct block pointers held in each inode.
pub const NUM_DIRECT: usize = 12;
/// Width of an on-disk block pointer, a 32-bit signed integer.
pub const PTR_SIZE: usize = 4;
pub const PTRS_PER_BLOCK: usize = BLOCK_SIZE / PTR_SIZE;
/// The largest file the direct and single indirect pointers can address.
pub const MAX_FILE_SIZE: usize = BLOCK_SIZE * (NUM_DIRECT + PTRS_PER_BLOCK);

/// Longest accepted file name in bytes.
pub const MAX_NAME_LEN: usize = 20;
/// Width of the name field of an on-disk directory entry. Always leaves room
/// for a trailing NUL.
pub const NAME_FIELD_LEN: usize = 28;

/// On-disk record sizes.
pub const INODE_SIZE: usize = 72;
pub const DIR_ENTRY_SIZE: usize = 32;

pub const fn blocks_for(bytes: usize) -> usize {
    (bytes + BLOCK_SIZE - 1) / BLOCK_SIZE
}

pub const INODE_TABLE_BLOCKS: usize = blocks_for(NUM_INODES * INODE_SIZE);
pub const ROOT_DIR_BLOCKS: usize = blocks_for(NUM_INODES * DIR_ENTRY_SIZE);
/// First block holding root-directory entries.
pub const ROOT_DIR_START: usize = INODE_START + INODE_TABLE_BLOCKS;
/// First block that may hold file data or an indirect block. The data region
/// ends where the trailing metadata blocks begin.
pub const DATA_START: usize = ROOT_DIR_START + ROOT_DIR_BLOCKS;
/// Blocks left for file data and indirect blocks on a fresh volume.
pub const DATA_BLOCKS: usize = INODE_STATUS_BLOCK - DATA_START;
