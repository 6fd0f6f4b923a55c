//! Block addressing: byte offsets to file blocks to device blocks.
//!
//! File block `i` lives at direct pointer `i` while `i < NUM_DIRECT`, and at
//! slot `i - NUM_DIRECT` of the indirect block after that.

use log::{debug, warn};

use crate::config::{
    blocks_for, BLOCK_SIZE, DATA_START, INODE_STATUS_BLOCK, MAX_FILE_SIZE, NUM_DIRECT,
};
use crate::error::{FsError, Resource, Result};
use crate::file::Handle;
use crate::fs::FlatFs;
use crate::io::{BlockNumber, BlockStorage};
use crate::node::{IndirectBlock, Inode};

/// File data and indirect tables only ever live in the data region.
fn in_data_region(blocknr: BlockNumber) -> Result<BlockNumber> {
    if (DATA_START..INODE_STATUS_BLOCK).contains(&blocknr) {
        Ok(blocknr)
    } else {
        Err(FsError::Corrupt(format!(
            "block {} is outside the data region",
            blocknr
        )))
    }
}

fn resolve(node: &Inode, indirect: Option<&IndirectBlock>, i: usize) -> Result<BlockNumber> {
    let ptr = if i >= node.blocks {
        None
    } else if i < NUM_DIRECT {
        node.direct[i]
    } else {
        indirect.and_then(|block| block.get(i - NUM_DIRECT))
    };
    ptr.ok_or_else(|| FsError::Corrupt(format!("file block {} is not mapped", i)))
        .and_then(in_data_region)
}

impl<T: BlockStorage> FlatFs<T> {
    /// Loads the indirect block of `node`, if it has one.
    fn load_indirect(&mut self, node: &Inode) -> Result<Option<IndirectBlock>> {
        let blocknr = match node.indirect {
            Some(blocknr) => in_data_region(blocknr)?,
            None if node.blocks > NUM_DIRECT => {
                return Err(FsError::Corrupt(format!(
                    "{} blocks allocated without an indirect block",
                    node.blocks
                )))
            }
            None => return Ok(None),
        };
        let mut buf = vec![0; BLOCK_SIZE];
        self.dev.read_block(blocknr, &mut buf)?;
        let block = IndirectBlock::parse(&buf)
            .ok_or_else(|| FsError::Corrupt(format!("indirect block {} is unreadable", blocknr)))?;
        Ok(Some(block))
    }

    /// Every data block of `node` in file order, direct pointers first.
    pub(crate) fn data_blocks(&mut self, node: &Inode) -> Result<Vec<BlockNumber>> {
        let indirect = self.load_indirect(node)?;
        (0..node.blocks)
            .map(|i| resolve(node, indirect.as_ref(), i))
            .collect()
    }

    /// Reads from the cursor into `buf`, stopping at the end of the file, and
    /// advances the cursor by the number of bytes copied.
    ///
    /// Files without content (empty files and directories) report `buf.len()`
    /// without touching `buf` or the cursor.
    pub fn read(&mut self, handle: Handle, buf: &mut [u8]) -> Result<usize> {
        let rwptr = self.files.get(handle)?.rwptr;
        let inum = self.files.get(handle)?.inode;
        let node = self
            .inodes
            .get(inum)
            .cloned()
            .ok_or_else(|| FsError::Corrupt(format!("{} refers to free inode {}", handle, inum)))?;

        let size = match node.size {
            Some(size) if size > 0 => size,
            _ => return Ok(buf.len()),
        };
        let to_read = buf.len().min(size.saturating_sub(rwptr));
        if to_read == 0 {
            return Ok(0);
        }

        let indirect = self.load_indirect(&node)?;
        let mut block = vec![0; BLOCK_SIZE];
        let mut done = 0;
        while done < to_read {
            let pos = rwptr + done;
            let offset = pos % BLOCK_SIZE;
            let n = (BLOCK_SIZE - offset).min(to_read - done);

            let blocknr = resolve(&node, indirect.as_ref(), pos / BLOCK_SIZE)?;
            self.dev.read_block(blocknr, &mut block)?;
            buf[done..done + n].copy_from_slice(&block[offset..offset + n]);
            done += n;
        }

        self.files.get_mut(handle)?.rwptr = rwptr + to_read;
        Ok(to_read)
    }

    /// Writes `buf` at the cursor, growing the file as needed, and leaves the
    /// cursor after the last byte written.
    ///
    /// A write that would pass `MAX_FILE_SIZE` is cut short and reports the
    /// reduced count, zero once the cursor sits at the ceiling. Growth is all
    /// or nothing: if the device runs out of blocks part way, every block taken
    /// for this call is released and the file is left untouched.
    pub fn write(&mut self, handle: Handle, buf: &[u8]) -> Result<usize> {
        let rwptr = self.files.get(handle)?.rwptr;
        let inum = self.files.get(handle)?.inode;
        let mut node = self
            .inodes
            .get(inum)
            .cloned()
            .ok_or_else(|| FsError::Corrupt(format!("{} refers to free inode {}", handle, inum)))?;

        let to_write = buf.len().min(MAX_FILE_SIZE.saturating_sub(rwptr));
        if to_write < buf.len() {
            warn!(
                "{}: write of {} bytes clamped to {} at the size ceiling",
                handle,
                buf.len(),
                to_write
            );
        }
        let end = rwptr + to_write;
        let blocks_needed = blocks_for(end);

        let mut indirect = self.load_indirect(&node)?;
        let mut taken = Vec::new();
        if blocks_needed > node.blocks {
            // The indirect table is taken before any data block.
            if blocks_needed > NUM_DIRECT && node.indirect.is_none() {
                let blocknr = self.acquire_or_release(&mut taken)?;
                node.indirect = Some(blocknr);
                indirect = Some(IndirectBlock::new());
            }
            for i in node.blocks..blocks_needed {
                let blocknr = self.acquire_or_release(&mut taken)?;
                if i < NUM_DIRECT {
                    node.direct[i] = Some(blocknr);
                } else if let Some(table) = indirect.as_mut() {
                    table.set(i - NUM_DIRECT, Some(blocknr));
                }
            }
            debug!(
                "{}: grew inode {} from {} to {} blocks",
                handle, inum, node.blocks, blocks_needed
            );
            node.blocks = blocks_needed;
        }

        let written = self
            .write_span(&node, indirect.as_ref(), rwptr, &buf[..to_write])
            .and_then(|()| match (node.indirect, indirect.as_ref()) {
                (Some(blocknr), Some(table)) => self
                    .dev
                    .write_block(blocknr, &table.serialize())
                    .map_err(FsError::from),
                _ => Ok(()),
            });
        if let Err(e) = written {
            self.release(&taken)?;
            return Err(e);
        }

        node.size = Some(node.size.unwrap_or(0).max(end));
        self.inodes.set(inum, node);
        self.files.get_mut(handle)?.rwptr = end;

        self.persist_inodes()?;
        self.persist_bitmap()?;
        Ok(to_write)
    }

    /// Moves the cursor to `offset`. Seeking past the end of the file is refused;
    /// files only grow through `write`.
    pub fn seek(&mut self, handle: Handle, offset: usize) -> Result<()> {
        let inum = self.files.get(handle)?.inode;
        let size = self.inodes.get(inum).and_then(|n| n.size).unwrap_or(0);
        if offset > size {
            return Err(FsError::SeekOutOfRange { offset, size });
        }
        self.files.get_mut(handle)?.rwptr = offset;
        Ok(())
    }

    /// Current cursor of `handle`.
    pub fn tell(&self, handle: Handle) -> Result<usize> {
        Ok(self.files.get(handle)?.rwptr)
    }

    /// Overlays `data` onto the file blocks spanning `[pos, pos + data.len())`.
    fn write_span(
        &mut self,
        node: &Inode,
        indirect: Option<&IndirectBlock>,
        pos: usize,
        data: &[u8],
    ) -> Result<()> {
        let mut block = vec![0; BLOCK_SIZE];
        let mut done = 0;
        while done < data.len() {
            let at = pos + done;
            let offset = at % BLOCK_SIZE;
            let n = (BLOCK_SIZE - offset).min(data.len() - done);

            let blocknr = resolve(node, indirect, at / BLOCK_SIZE)?;
            if n < BLOCK_SIZE {
                self.dev.read_block(blocknr, &mut block)?;
            }
            block[offset..offset + n].copy_from_slice(&data[done..done + n]);
            self.dev.write_block(blocknr, &block)?;
            done += n;
        }
        Ok(())
    }

    /// Takes one free block for the write in progress. On exhaustion hands
    /// back everything already taken.
    fn acquire_or_release(&mut self, taken: &mut Vec<BlockNumber>) -> Result<BlockNumber> {
        match self.free_map.acquire() {
            Some(blocknr) => {
                taken.push(blocknr);
                Ok(blocknr)
            }
            None => {
                warn!("out of data blocks, releasing {} taken", taken.len());
                self.release(taken)?;
                taken.clear();
                Err(FsError::ResourceExhausted(Resource::Block))
            }
        }
    }

    fn release(&mut self, blocks: &[BlockNumber]) -> Result<()> {
        for &blocknr in blocks {
            self.free_map.set_free(blocknr)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NUM_BLOCKS, PTRS_PER_BLOCK};
    use crate::io::{FileBlockEmulator, FileBlockEmulatorBuilder};

    fn create_test_fs() -> FlatFs<FileBlockEmulator> {
        let dev = FileBlockEmulatorBuilder::from(tempfile::tempfile().unwrap())
            .with_block_len(BLOCK_SIZE)
            .with_block_count(NUM_BLOCKS)
            .build()
            .expect("Could not initialize disk emulator.");
        FlatFs::format(dev).unwrap()
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn resolve_uses_direct_then_indirect() {
        let mut node = Inode::file(50);
        node.blocks = NUM_DIRECT + 2;
        for i in 0..NUM_DIRECT {
            node.direct[i] = Some(50 + i);
        }
        node.indirect = Some(90);
        let mut table = IndirectBlock::new();
        table.set(0, Some(91));
        table.set(1, Some(92));

        assert_eq!(resolve(&node, Some(&table), 0).unwrap(), 50);
        assert_eq!(resolve(&node, Some(&table), NUM_DIRECT - 1).unwrap(), 61);
        assert_eq!(resolve(&node, Some(&table), NUM_DIRECT).unwrap(), 91);
        assert_eq!(resolve(&node, Some(&table), NUM_DIRECT + 1).unwrap(), 92);
        assert!(resolve(&node, Some(&table), NUM_DIRECT + 2).is_err());
        assert!(resolve(&node, None, NUM_DIRECT).is_err());
    }

    #[test]
    fn resolve_refuses_pointers_outside_the_data_region() {
        let mut node = Inode::file(0);
        assert!(matches!(resolve(&node, None, 0), Err(FsError::Corrupt(_))));

        node.direct[0] = Some(5000);
        assert!(matches!(resolve(&node, None, 0), Err(FsError::Corrupt(_))));

        node.direct[0] = Some(INODE_STATUS_BLOCK);
        assert!(resolve(&node, None, 0).is_err());

        node.direct[0] = Some(DATA_START);
        assert_eq!(resolve(&node, None, 0).unwrap(), DATA_START);
    }

    #[test]
    fn write_then_read_back() {
        let mut fs = create_test_fs();
        let fd = fs.open("a.txt").unwrap();
        let data = pattern(3000);

        assert_eq!(fs.write(fd, &data).unwrap(), 3000);
        assert_eq!(fs.tell(fd).unwrap(), 3000);
        assert_eq!(fs.stat_size("a.txt").unwrap(), 3000);

        fs.seek(fd, 0).unwrap();
        let mut out = vec![0; 3000];
        assert_eq!(fs.read(fd, &mut out).unwrap(), 3000);
        assert_eq!(out, data);
        assert_eq!(fs.tell(fd).unwrap(), 3000);
    }

    #[test]
    fn read_stops_at_end_of_file() {
        let mut fs = create_test_fs();
        let fd = fs.open("a.txt").unwrap();
        fs.write(fd, b"hello world").unwrap();

        fs.seek(fd, 6).unwrap();
        let mut out = vec![0; 100];
        assert_eq!(fs.read(fd, &mut out).unwrap(), 5);
        assert_eq!(&out[..5], b"world");
        assert_eq!(fs.read(fd, &mut out).unwrap(), 0);
    }

    #[test]
    fn read_of_empty_file_reports_full_length() {
        let mut fs = create_test_fs();
        let fd = fs.open("empty").unwrap();
        let mut out = vec![7; 16];
        assert_eq!(fs.read(fd, &mut out).unwrap(), 16);
        assert_eq!(out, vec![7; 16]);
        assert_eq!(fs.tell(fd).unwrap(), 0);
    }

    #[test]
    fn overwrite_in_the_middle_keeps_size() {
        let mut fs = create_test_fs();
        let fd = fs.open("a.txt").unwrap();
        fs.write(fd, &vec![b'a'; 2500]).unwrap();

        fs.seek(fd, 1020).unwrap();
        assert_eq!(fs.write(fd, &[b'b'; 8]).unwrap(), 8);
        assert_eq!(fs.tell(fd).unwrap(), 1028);
        assert_eq!(fs.stat_size("a.txt").unwrap(), 2500);

        fs.seek(fd, 1016).unwrap();
        let mut out = vec![0; 16];
        fs.read(fd, &mut out).unwrap();
        assert_eq!(&out, b"aaaabbbbbbbbaaaa");
    }

    #[test]
    fn writes_append_across_block_boundaries() {
        let mut fs = create_test_fs();
        let fd = fs.open("a.txt").unwrap();
        let data = pattern(5000);
        for chunk in data.chunks(700) {
            fs.write(fd, chunk).unwrap();
        }
        assert_eq!(fs.stat_size("a.txt").unwrap(), 5000);

        fs.seek(fd, 0).unwrap();
        let mut out = vec![0; 5000];
        fs.read(fd, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn growth_past_direct_pointers_takes_an_indirect_block() {
        let mut fs = create_test_fs();
        let fd = fs.open("big").unwrap();
        let before = fs.stats().free_blocks;

        let data = pattern(13 * BLOCK_SIZE + 10);
        fs.write(fd, &data).unwrap();
        // 14 data blocks, one already held since create, plus the indirect block.
        assert_eq!(fs.stats().free_blocks, before - 13 - 1);

        fs.seek(fd, 0).unwrap();
        let mut out = vec![0; data.len()];
        assert_eq!(fs.read(fd, &mut out).unwrap(), data.len());
        assert_eq!(out, data);
    }

    #[test]
    fn seek_past_end_is_refused() {
        let mut fs = create_test_fs();
        let fd = fs.open("a.txt").unwrap();
        fs.write(fd, &[1; 10]).unwrap();
        fs.seek(fd, 4).unwrap();

        match fs.seek(fd, 11) {
            Err(FsError::SeekOutOfRange { offset, size }) => {
                assert_eq!(offset, 11);
                assert_eq!(size, 10);
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(fs.tell(fd).unwrap(), 4);
        fs.seek(fd, 10).unwrap();
    }

    #[test]
    fn closed_handles_are_rejected() {
        let mut fs = create_test_fs();
        let fd = fs.open("a.txt").unwrap();
        fs.close(fd).unwrap();

        let mut out = [0; 4];
        assert!(matches!(fs.read(fd, &mut out), Err(FsError::InvalidHandle)));
        assert!(matches!(fs.write(fd, b"x"), Err(FsError::InvalidHandle)));
        assert!(matches!(fs.seek(fd, 0), Err(FsError::InvalidHandle)));
    }

    #[test]
    fn write_is_clamped_at_the_size_ceiling() {
        let mut fs = create_test_fs();
        let fd = fs.open("max").unwrap();
        let data = vec![0xab; MAX_FILE_SIZE + 100];

        assert_eq!(fs.write(fd, &data).unwrap(), MAX_FILE_SIZE);
        assert_eq!(fs.stat_size("max").unwrap(), MAX_FILE_SIZE);
        // At the ceiling a write is not an error, it just moves nothing.
        assert_eq!(fs.write(fd, b"more").unwrap(), 0);
        assert_eq!(fs.stat_size("max").unwrap(), MAX_FILE_SIZE);
        assert_eq!(fs.tell(fd).unwrap(), MAX_FILE_SIZE);

        fs.seek(fd, MAX_FILE_SIZE - 4).unwrap();
        let mut out = vec![0; 8];
        assert_eq!(fs.read(fd, &mut out).unwrap(), 4);
        assert_eq!(&out[..4], &[0xab; 4]);
        assert_eq!(NUM_DIRECT + PTRS_PER_BLOCK, MAX_FILE_SIZE / BLOCK_SIZE);
    }

    #[test]
    fn failed_growth_returns_every_block_taken() {
        let mut fs = create_test_fs();
        let fd = fs.open("a.txt").unwrap();
        fs.write(fd, b"keep").unwrap();

        // Leave fewer free blocks than the write below needs.
        let mut hoard = Vec::new();
        while fs.stats().free_blocks > 5 {
            hoard.push(fs.free_map.acquire().unwrap());
        }
        let before = fs.stats();

        let result = fs.write(fd, &pattern(20 * BLOCK_SIZE));
        assert!(matches!(
            result,
            Err(FsError::ResourceExhausted(Resource::Block))
        ));
        assert_eq!(fs.stats(), before);
        assert_eq!(fs.stat_size("a.txt").unwrap(), 4);
        assert_eq!(fs.tell(fd).unwrap(), 4);

        fs.release(&hoard).unwrap();
        assert_eq!(fs.write(fd, b"!").unwrap(), 1);
    }
}
