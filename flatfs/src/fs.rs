use std::fs::OpenOptions;
use std::path::Path;

use log::{debug, info, warn};

use crate::alloc::Bitmap;
use crate::config::{
    BITMAP_BLOCK, BLOCK_SIZE, DATA_START, INODE_START, INODE_STATUS_BLOCK, INODE_TABLE_BLOCKS,
    NUM_BLOCKS, ROOT_DIR_BLOCKS, ROOT_DIR_START, ROOT_INODE, SUPERBLOCK_INDEX,
};
use crate::dir::{validate_name, DirCursor, RootDir};
use crate::error::{FsError, Resource, Result};
use crate::file::{Handle, OpenFileTable};
use crate::io::{BlockStorage, FileBlockEmulator, FileBlockEmulatorBuilder};
use crate::node::{Inode, InodeTable};
use crate::sb::SuperBlock;

/// Free capacity of a mounted volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStats {
    pub free_blocks: usize,
    pub free_inodes: usize,
    pub free_entries: usize,
    pub open_files: usize,
}

/// A mounted volume. Owns the device and every in-memory metadata table;
/// each mutating call re-persists the tables it touched before returning.
///
/// # Layout
/// =====================================================================================
/// | SuperBlock | Inodes | Root directory | Data region ... | Inode flags | Free bitmap |
/// =====================================================================================
pub struct FlatFs<T: BlockStorage> {
    pub(crate) dev: T,
    super_block: SuperBlock,
    pub(crate) free_map: Bitmap,
    pub(crate) inodes: InodeTable,
    root: RootDir,
    pub(crate) files: OpenFileTable,
}

impl FlatFs<FileBlockEmulator> {
    /// Mounts the image at `path`. With `fresh` set the image is created (or
    /// truncated) and formatted, otherwise the existing image is reopened.
    pub fn mksfs<P: AsRef<Path>>(path: P, fresh: bool) -> Result<Self> {
        if fresh {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            let dev = FileBlockEmulatorBuilder::from(file)
                .with_block_len(BLOCK_SIZE)
                .with_block_count(NUM_BLOCKS)
                .build()?;
            FlatFs::format(dev)
        } else {
            let dev = FileBlockEmulator::open_disk(path, BLOCK_SIZE, NUM_BLOCKS)?;
            FlatFs::mount(dev)
        }
    }
}

impl<T: BlockStorage> FlatFs<T> {
    fn check_device(dev: &T) -> Result<()> {
        if dev.block_size() != BLOCK_SIZE {
            return Err(FsError::Geometry(format!(
                "block size is {} bytes, expected {}",
                dev.block_size(),
                BLOCK_SIZE
            )));
        }
        if dev.block_count() < NUM_BLOCKS {
            return Err(FsError::Geometry(format!(
                "device holds {} blocks, expected at least {}",
                dev.block_count(),
                NUM_BLOCKS
            )));
        }
        Ok(())
    }

    /// Lays an empty file system onto owned block storage.
    pub fn format(dev: T) -> Result<Self> {
        Self::check_device(&dev)?;

        let mut free_map = Bitmap::new();
        free_map.set_reserved(SUPERBLOCK_INDEX)?;
        for blocknr in INODE_START..DATA_START {
            free_map.set_reserved(blocknr)?;
        }
        free_map.set_reserved(INODE_STATUS_BLOCK)?;
        free_map.set_reserved(BITMAP_BLOCK)?;

        let mut fs = FlatFs {
            dev,
            super_block: SuperBlock::default(),
            free_map,
            inodes: InodeTable::new(),
            root: RootDir::new(),
            files: OpenFileTable::new(),
        };

        let sb = fs.super_block.serialize();
        fs.dev.write_block(SUPERBLOCK_INDEX, &sb)?;
        fs.persist_inodes()?;
        fs.persist_root_dir()?;
        fs.persist_bitmap()?;
        fs.dev.sync_disk()?;

        info!(
            "formatted volume: {} blocks of {} bytes, {} free",
            NUM_BLOCKS,
            BLOCK_SIZE,
            fs.free_map.free_count()
        );
        Ok(fs)
    }

    /// Loads an existing file system. Refuses images whose superblock does not
    /// match the compiled-in geometry.
    pub fn mount(mut dev: T) -> Result<Self> {
        Self::check_device(&dev)?;

        let mut block_buf = vec![0; BLOCK_SIZE];
        dev.read_block(SUPERBLOCK_INDEX, &mut block_buf)?;
        let super_block = SuperBlock::parse(&block_buf)?;
        if let Err(e) = super_block.validate() {
            warn!("refusing to mount: {}", e);
            return Err(e);
        }

        let mut table_buf = vec![0; INODE_TABLE_BLOCKS * BLOCK_SIZE];
        dev.read_blocks(INODE_START, INODE_TABLE_BLOCKS, &mut table_buf)?;
        dev.read_block(INODE_STATUS_BLOCK, &mut block_buf)?;
        let inodes = InodeTable::load(&table_buf, &block_buf)?;

        dev.read_block(BITMAP_BLOCK, &mut block_buf)?;
        let free_map = Bitmap::parse(&block_buf)
            .ok_or_else(|| FsError::Corrupt("free bitmap is truncated".to_string()))?;

        let root_node = inodes
            .get(ROOT_INODE)
            .ok_or_else(|| FsError::Corrupt("root inode is missing".to_string()))?;
        let root_start = match (root_node.blocks, root_node.direct[0]) {
            (ROOT_DIR_BLOCKS, Some(ROOT_DIR_START)) => ROOT_DIR_START,
            (blocks, start) => {
                return Err(FsError::Corrupt(format!(
                    "root directory spans {} blocks from {:?}",
                    blocks, start
                )))
            }
        };
        let mut dir_buf = vec![0; ROOT_DIR_BLOCKS * BLOCK_SIZE];
        dev.read_blocks(root_start, ROOT_DIR_BLOCKS, &mut dir_buf)?;
        let root = RootDir::load(&dir_buf);

        if let Some(entry) = root.entries().find(|e| inodes.get(e.inode).is_none()) {
            return Err(FsError::Corrupt(format!(
                "entry {:?} names free inode {}",
                entry.name, entry.inode
            )));
        }

        info!(
            "mounted volume: {} files, {} free blocks",
            root.len(),
            free_map.free_count()
        );
        Ok(FlatFs {
            dev,
            super_block,
            free_map,
            inodes,
            root,
            files: OpenFileTable::new(),
        })
    }

    /// Hands the device back, dropping every open handle.
    pub fn into_inner(self) -> T {
        self.dev
    }

    pub fn sync(&mut self) -> Result<()> {
        self.dev.sync_disk()?;
        Ok(())
    }

    pub fn super_block(&self) -> &SuperBlock {
        &self.super_block
    }

    pub fn stats(&self) -> FsStats {
        FsStats {
            free_blocks: self.free_map.free_count(),
            free_inodes: self.inodes.free_count(),
            free_entries: self.root.free_count(),
            open_files: self.files.open_count(),
        }
    }

    /// Returns the name after `cursor` and advances it. `None` marks the end
    /// of a pass; the cursor is then rewound for the next one.
    pub fn next_name(&self, cursor: &mut DirCursor) -> Option<&str> {
        self.root.next_name(cursor)
    }

    /// One full pass over the directory.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.root.entries().map(|e| e.name.as_str())
    }

    /// Byte length of the file called `name`.
    pub fn stat_size(&self, name: &str) -> Result<usize> {
        let inum = self.root.lookup(name).ok_or(FsError::NotFound)?;
        let node = self.inodes.get(inum).ok_or(FsError::NotFound)?;
        Ok(node.size.unwrap_or(0))
    }

    /// Opens `name`, creating it when it does not exist. The cursor starts at
    /// the end of the file; nothing is ever truncated on open.
    pub fn open(&mut self, name: &str) -> Result<Handle> {
        validate_name(name)?;

        if let Some(inum) = self.root.lookup(name) {
            if self.files.is_open(inum) {
                return Err(FsError::AlreadyOpen);
            }
            let slot = self
                .files
                .first_free()
                .ok_or(FsError::ResourceExhausted(Resource::Handle))?;
            let size = self.inodes.get(inum).and_then(|n| n.size).unwrap_or(0);
            let handle = self.files.bind(slot, inum, size);
            debug!("opened {:?} (inode {}) as {}", name, inum, handle);
            return Ok(handle);
        }

        // Every table is checked before anything is taken, so a failed create
        // leaves no reservation behind.
        let slot = self
            .files
            .first_free()
            .ok_or(FsError::ResourceExhausted(Resource::Handle))?;
        let inum = self
            .inodes
            .first_free()
            .ok_or(FsError::ResourceExhausted(Resource::Inode))?;
        let entry = self
            .root
            .first_free_slot()
            .ok_or(FsError::ResourceExhausted(Resource::DirEntry))?;
        let block = self
            .free_map
            .acquire()
            .ok_or(FsError::ResourceExhausted(Resource::Block))?;

        self.inodes.set(inum, Inode::file(block));
        self.root.insert(entry, inum, name);
        let handle = self.files.bind(slot, inum, 0);

        self.persist_root_dir()?;
        self.persist_inodes()?;
        self.persist_bitmap()?;
        debug!(
            "created {:?} (inode {}, first block {}) as {}",
            name, inum, block, handle
        );
        Ok(handle)
    }

    pub fn close(&mut self, handle: Handle) -> Result<()> {
        self.files.close(handle)?;
        debug!("closed {}", handle);
        Ok(())
    }

    /// Deletes `name`, returning its data blocks and indirect block to the
    /// free pool. Open files cannot be removed.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        let inum = self.root.lookup(name).ok_or(FsError::NotFound)?;
        if inum == ROOT_INODE {
            return Err(FsError::NotFound);
        }
        if self.files.is_open(inum) {
            return Err(FsError::AlreadyOpen);
        }
        let node = self
            .inodes
            .get(inum)
            .cloned()
            .ok_or_else(|| FsError::Corrupt(format!("{:?} names free inode {}", name, inum)))?;

        // Every pointer is checked before any block is handed back.
        let blocks = self.data_blocks(&node)?;
        for &blocknr in blocks.iter() {
            self.free_map.set_free(blocknr)?;
        }
        if let Some(indirect) = node.indirect {
            self.free_map.set_free(indirect)?;
        }

        self.inodes.free(inum);
        self.root.remove(name);

        self.persist_root_dir()?;
        self.persist_inodes()?;
        self.persist_bitmap()?;
        debug!(
            "removed {:?} (inode {}), released {} blocks",
            name,
            inum,
            blocks.len() + node.indirect.is_some() as usize
        );
        Ok(())
    }

    /// Writes the whole inode table and the occupancy flags.
    pub(crate) fn persist_inodes(&mut self) -> Result<()> {
        let table = self.inodes.serialize();
        self.dev
            .write_blocks(INODE_START, INODE_TABLE_BLOCKS, &table)?;
        let status = self.inodes.serialize_status();
        self.dev.write_block(INODE_STATUS_BLOCK, &status)?;
        Ok(())
    }

    pub(crate) fn persist_bitmap(&mut self) -> Result<()> {
        let mut block = vec![0; BLOCK_SIZE];
        let bytes = self.free_map.serialize();
        block[..bytes.len()].copy_from_slice(bytes);
        self.dev.write_block(BITMAP_BLOCK, &block)?;
        Ok(())
    }

    fn persist_root_dir(&mut self) -> Result<()> {
        let start = self
            .inodes
            .get(ROOT_INODE)
            .and_then(|root| root.direct[0])
            .unwrap_or(ROOT_DIR_START);
        let entries = self.root.serialize();
        self.dev.write_blocks(start, ROOT_DIR_BLOCKS, &entries)?;
        Ok(())
    }
}
