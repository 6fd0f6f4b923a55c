//! A single-directory file system over a fixed-size block device.
//!
//! Files live in one flat root directory. Each file is described by an inode
//! with twelve direct block pointers and one indirect block, free space is
//! tracked by a bitmap, and every mutating call writes the affected metadata
//! back to the device before it returns. There is no journal.
//!
//! ```no_run
//! use flatfs::FlatFs;
//!
//! let mut fs = FlatFs::mksfs("volume.img", true)?;
//! let fd = fs.open("hello.txt")?;
//! fs.write(fd, b"hello")?;
//! fs.close(fd)?;
//! # Ok::<(), flatfs::FsError>(())
//! ```
mod alloc;
pub mod config;
mod dir;
mod error;
mod file;
mod fs;
pub mod io;
mod node;
mod rw;
mod sb;

pub use crate::dir::DirCursor;
pub use crate::error::{FsError, Resource, Result};
pub use crate::file::Handle;
pub use crate::fs::{FlatFs, FsStats};
pub use crate::sb::SuperBlock;
