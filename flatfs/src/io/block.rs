use std::io::{Error, ErrorKind};
use std::path::Path;

/// The block number to access ranging from 0 (the first block) to n - 1 (the last
/// block) where n is number of blocks available.
pub type BlockNumber = usize;

/// Tried to map as closely as possible to the prescribed interface of a fixed
/// geometry disk: format or reopen a store, then move whole blocks in and out.
///
/// In cases where implementing the interface as described would lead to non-idiomatic
/// rust code, I opted to use a more rust-y interface.
pub trait BlockStorage {
    /// Opens a disk at the specified path. This method does not validate the
    /// storage blocks, it is up for clients to ensure disks are appropriately initialized.
    fn open_disk<P: AsRef<Path>>(path: P, block_size: usize, nblocks: usize) -> std::io::Result<Self>
    where
        Self: std::marker::Sized;
    /// Size in bytes of a single block.
    fn block_size(&self) -> usize;
    /// Number of addressable blocks.
    fn block_count(&self) -> usize;
    /// Reads disk block number into provided buffer.
    ///
    /// # Errors
    ///
    /// Attempting to read a block out of range will return an error.
    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()>;
    /// Writes provided buffer into the specified block number.
    ///
    /// # Errors
    ///
    /// Attempting to write a block out of range will return an error.
    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()>;
    /// Flush any buffered disk IO from memory. This is useful if it must guaranteed
    /// the disk writes actually occurred, for instance, if being re-read from
    /// disk.
    fn sync_disk(&mut self) -> std::io::Result<()>;

    /// Reads `count` consecutive blocks starting at `start` into `buf`, which must
    /// hold at least `count` blocks.
    fn read_blocks(&mut self, start: BlockNumber, count: usize, buf: &mut [u8]) -> std::io::Result<()> {
        let bs = self.block_size();
        check_span(buf.len(), bs, count)?;
        for (i, chunk) in buf.chunks_mut(bs).take(count).enumerate() {
            self.read_block(start + i, chunk)?;
        }
        Ok(())
    }

    /// Writes `count` consecutive blocks starting at `start` from `buf`.
    fn write_blocks(&mut self, start: BlockNumber, count: usize, buf: &[u8]) -> std::io::Result<()> {
        let bs = self.block_size();
        check_span(buf.len(), bs, count)?;
        for (i, chunk) in buf.chunks(bs).take(count).enumerate() {
            self.write_block(start + i, chunk)?;
        }
        Ok(())
    }
}

fn check_span(len: usize, block_size: usize, count: usize) -> std::io::Result<()> {
    if len < block_size * count {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            "buffer does not contain enough space for the requested blocks",
        ));
    }
    Ok(())
}
