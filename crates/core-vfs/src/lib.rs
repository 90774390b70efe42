//! Virtual file system and rollback log.
//!
//! Every file the TeX worker touches is owned by a [`FileSystem`] entry
//! keyed on normalized path. The worker's open-file descriptors live in an
//! [`OpenFiles`] table whose slots, like every mutable field of a
//! [`FileEntry`], are only changed through helpers that first append an undo
//! record to the [`Log`]. Rolling the log back to a [`Mark`] restores the
//! whole VFS to its state at that mark, byte for byte, which is what makes
//! worker snapshots cheap to resume.

mod entry;
mod fs;
mod log;
mod stat;

pub use entry::{AccessLevel, Bytes, EntryId, FileEntry, PicCache, Saved, new_bytes};
pub use fs::{FileSystem, normalize_path};
pub use log::{CellRef, FileCell, Log, Mark, OpenFiles, MAX_FILES};
pub use stat::FsStat;
