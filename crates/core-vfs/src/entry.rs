//! File entries and their observable state.

use std::cell::RefCell;
use std::rc::Rc;

use crate::stat::FsStat;

/// Byte buffer shared between a file entry and the undo records that hold a
/// strong handle to its past contents. The core is single-threaded, so plain
/// reference counting with interior mutability is enough.
pub type Bytes = Rc<RefCell<Vec<u8>>>;

pub fn new_bytes(data: Vec<u8>) -> Bytes {
    Rc::new(RefCell::new(data))
}

/// Index of an entry inside its [`crate::FileSystem`]. Stable for the whole
/// session; undo records and the executor's trace refer to entries by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(pub(crate) usize);

impl EntryId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// How the worker currently uses a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum AccessLevel {
    #[default]
    None,
    Read,
    Write,
}

/// Graphics bounding-box cache attached to an entry, keyed on (type, page).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PicCache {
    pub kind: i32,
    pub page: i32,
    pub bounds: [f32; 4],
}

/// State of a file as observed or produced by the worker. The buffer handle
/// and the access level roll back together; `snap` dedups undo records
/// within one snapshot generation.
#[derive(Debug, Clone, Default)]
pub struct Saved {
    pub data: Option<Bytes>,
    pub level: AccessLevel,
    pub(crate) snap: u64,
}

/// One logical file path and everything the system knows about it.
#[derive(Debug)]
pub struct FileEntry {
    pub path: String,

    // Cache of on-disk state
    pub fs_stat: Option<FsStat>,
    pub fs_data: Option<Bytes>,

    // Unsaved contents as the editor sees them
    pub edit_data: Option<Bytes>,

    // State observed and/or produced by the worker
    pub saved: Saved,

    /// Highest byte offset the worker has observably consumed. `-1` if the
    /// file was never opened, `i32::MAX` if it resolved as "not found".
    pub seen: i32,

    pub pic_cache: Option<PicCache>,
}

impl FileEntry {
    pub(crate) fn new(path: String) -> Self {
        FileEntry {
            path,
            fs_stat: None,
            fs_data: None,
            edit_data: None,
            saved: Saved::default(),
            seen: -1,
            pic_cache: None,
        }
    }

    /// Effective content for worker reads: saved if present, else edited,
    /// else last read from disk.
    pub fn effective(&self) -> Option<Bytes> {
        self.saved
            .data
            .clone()
            .or_else(|| self.edit_data.clone())
            .or_else(|| self.fs_data.clone())
    }

    /// Worker-produced output, if any.
    pub fn output(&self) -> Option<Bytes> {
        self.saved.data.clone()
    }
}
