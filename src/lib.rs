//! An in-process, heap-resident virtual filesystem.
//!
//! [`Filesystem`] is a self-contained POSIX-flavored tree of directories and
//! files, entirely resident in the host process's memory. There is no disk
//! backing, no cross-process sharing, and no persistence across restarts —
//! every instance starts from a single empty root directory and is dropped
//! with its owner (spec §1, §9).
//!
//! ```
//! use memfs_core::{Filesystem, OpenMode};
//!
//! let fs = Filesystem::new();
//! fs.mkdir("/docs", false).unwrap();
//! let mut handle = fs.open("/docs/readme.txt", OpenMode::WriteTruncate, 0, None).unwrap();
//! handle.write(b"hello").unwrap();
//! handle.close();
//! assert_eq!(fs.get_size("/docs/readme.txt").unwrap(), 5);
//! ```

mod error;
mod fs;
mod glob;
mod handle;
mod lock;
mod node;
mod path;
mod quota;
mod storage;

pub use error::{Error, Result};
pub use fs::{Config, ConfigBuilder, DefaultStorage, Filesystem, Stat, Stats};
pub use handle::{FileHandle, OpenMode, SeekFrom};
