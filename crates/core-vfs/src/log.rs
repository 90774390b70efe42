//! Append-only undo log and the worker's open-file table.
//!
//! Three record kinds cover every mutation of persistent state:
//!
//! * `Entry` — the whole `(saved buffer handle, access level)` tuple of a
//!   file entry plus the buffer's length at save time. Logged at most once
//!   per entry per snapshot generation; the first record is enough to undo
//!   any number of later mutations in the same generation.
//! * `Cell` — one slot of the open-file table (a worker descriptor or one of
//!   the `stdout`/`document`/`synctex`/`log` singletons).
//! * `Overwrite` — the bytes clobbered by an in-place write inside a saved
//!   buffer, with a strong handle to that buffer.
//!
//! A [`Mark`] is the record count at snapshot time. `rollback(mark)` pops
//! records in reverse until the log is `mark` records long, restoring each
//! field; popping past a live mark is a caller bug and panics.

use tracing::trace;

use crate::entry::{Bytes, EntryId, Saved};
use crate::fs::FileSystem;

pub const MAX_FILES: usize = 1024;

/// A slot of the open-file table.
#[derive(Debug, Clone, Default)]
pub struct FileCell {
    pub entry: Option<EntryId>,
    snap: u64,
}

/// Addresses a [`FileCell`] in undo records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellRef {
    Fd(usize),
    Stdout,
    Document,
    Synctex,
    Log,
}

/// The worker's view of its open files: one slot per descriptor plus the
/// four distinguished output streams.
pub struct OpenFiles {
    table: Vec<FileCell>,
    pub stdout: FileCell,
    pub document: FileCell,
    pub synctex: FileCell,
    pub log: FileCell,
}

impl Default for OpenFiles {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenFiles {
    pub fn new() -> Self {
        OpenFiles {
            table: (0..MAX_FILES).map(|_| FileCell::default()).collect(),
            stdout: FileCell::default(),
            document: FileCell::default(),
            synctex: FileCell::default(),
            log: FileCell::default(),
        }
    }

    pub fn cell(&self, r: CellRef) -> &FileCell {
        match r {
            CellRef::Fd(i) => &self.table[i],
            CellRef::Stdout => &self.stdout,
            CellRef::Document => &self.document,
            CellRef::Synctex => &self.synctex,
            CellRef::Log => &self.log,
        }
    }

    /// Point a slot at an entry (or clear it). The caller is responsible for
    /// logging the slot first via [`Log::save_cell`].
    pub fn set(&mut self, r: CellRef, entry: Option<EntryId>) {
        self.cell_mut(r).entry = entry;
    }

    fn cell_mut(&mut self, r: CellRef) -> &mut FileCell {
        match r {
            CellRef::Fd(i) => &mut self.table[i],
            CellRef::Stdout => &mut self.stdout,
            CellRef::Document => &mut self.document,
            CellRef::Synctex => &mut self.synctex,
            CellRef::Log => &mut self.log,
        }
    }
}

/// Snapshot mark: the log length at the time [`Log::snapshot`] was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Mark(usize);

enum LogRecord {
    Entry {
        id: EntryId,
        saved: Saved,
        len: usize,
    },
    Cell {
        cell: CellRef,
        entry: Option<EntryId>,
        snap: u64,
    },
    Overwrite {
        data: Bytes,
        start: usize,
        old: Vec<u8>,
    },
}

pub struct Log {
    records: Vec<LogRecord>,
    generation: u64,
}

impl Default for Log {
    fn default() -> Self {
        Self::new()
    }
}

impl Log {
    pub fn new() -> Self {
        Log {
            records: Vec::new(),
            generation: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Capture the current position; a later [`Log::rollback`] to the
    /// returned mark undoes everything recorded after this call.
    pub fn snapshot(&mut self) -> Mark {
        self.generation += 1;
        Mark(self.records.len())
    }

    /// Record the pre-mutation state of `id`, once per generation.
    pub fn save_entry(&mut self, fs: &mut FileSystem, id: EntryId) {
        let entry = fs.entry_mut(id);
        if entry.saved.snap == self.generation {
            return;
        }
        trace!(target: "vfs.log", path = entry.path.as_str(), "save_entry");
        let len = entry
            .saved
            .data
            .as_ref()
            .map_or(0, |d| d.borrow().len());
        let saved = entry.saved.clone();
        entry.saved.snap = self.generation;
        self.records.push(LogRecord::Entry { id, saved, len });
    }

    /// Record the pre-mutation state of an open-file slot, once per
    /// generation.
    pub fn save_cell(&mut self, files: &mut OpenFiles, cell: CellRef) {
        let c = files.cell_mut(cell);
        if c.snap == self.generation {
            return;
        }
        trace!(target: "vfs.log", ?cell, "save_cell");
        let record = LogRecord::Cell {
            cell,
            entry: c.entry,
            snap: c.snap,
        };
        c.snap = self.generation;
        self.records.push(record);
    }

    /// Record bytes about to be overwritten in place inside `data`.
    pub fn save_overwrite(&mut self, data: &Bytes, start: usize, len: usize) {
        if len == 0 {
            return;
        }
        let old = data.borrow()[start..start + len].to_vec();
        self.records.push(LogRecord::Overwrite {
            data: data.clone(),
            start,
            old,
        });
    }

    /// Pop records until the log is `mark` records long, restoring each
    /// field in reverse order.
    pub fn rollback(&mut self, fs: &mut FileSystem, files: &mut OpenFiles, mark: Mark) {
        assert!(
            mark.0 <= self.records.len(),
            "rollback: mark {} is past the log ({} records)",
            mark.0,
            self.records.len()
        );
        while self.records.len() > mark.0 {
            match self.records.pop().unwrap() {
                LogRecord::Entry { id, saved, len } => {
                    let entry = fs.entry_mut(id);
                    entry.saved = saved;
                    if let Some(data) = &entry.saved.data {
                        let mut data = data.borrow_mut();
                        debug_assert!(len <= data.len());
                        data.truncate(len);
                    }
                }
                LogRecord::Cell { cell, entry, snap } => {
                    let c = files.cell_mut(cell);
                    c.entry = entry;
                    c.snap = snap;
                }
                LogRecord::Overwrite { data, start, old } => {
                    data.borrow_mut()[start..start + old.len()].copy_from_slice(&old);
                }
            }
        }
        self.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{new_bytes, AccessLevel};

    fn write_saved(log: &mut Log, fs: &mut FileSystem, id: EntryId, pos: usize, bytes: &[u8]) {
        log.save_entry(fs, id);
        let data = fs.entry(id).saved.data.clone().unwrap();
        let len = data.borrow().len();
        if pos < len {
            log.save_overwrite(&data, pos, (pos + bytes.len()).min(len) - pos);
        }
        let mut data = data.borrow_mut();
        if pos + bytes.len() > len {
            let overlap = len.saturating_sub(pos);
            data[pos..pos + overlap].copy_from_slice(&bytes[..overlap]);
            data.extend_from_slice(&bytes[overlap..]);
        } else {
            data[pos..pos + bytes.len()].copy_from_slice(bytes);
        }
    }

    fn setup() -> (Log, FileSystem, OpenFiles, EntryId) {
        let mut fs = FileSystem::new();
        let id = fs.lookup_or_create("out.xdv");
        let entry = fs.entry_mut(id);
        entry.saved.data = Some(new_bytes(b"hello world".to_vec()));
        entry.saved.level = AccessLevel::Write;
        (Log::new(), fs, OpenFiles::new(), id)
    }

    #[test]
    fn rollback_restores_appends() {
        let (mut log, mut fs, mut files, id) = setup();
        let mark = log.snapshot();
        write_saved(&mut log, &mut fs, id, 11, b"!!!");
        assert_eq!(&*fs.entry(id).saved.data.as_ref().unwrap().borrow(), b"hello world!!!");
        log.rollback(&mut fs, &mut files, mark);
        assert_eq!(&*fs.entry(id).saved.data.as_ref().unwrap().borrow(), b"hello world");
    }

    #[test]
    fn rollback_restores_overwrites_byte_for_byte() {
        let (mut log, mut fs, mut files, id) = setup();
        let mark = log.snapshot();
        write_saved(&mut log, &mut fs, id, 0, b"HELLO");
        write_saved(&mut log, &mut fs, id, 6, b"WORLD extended");
        log.rollback(&mut fs, &mut files, mark);
        assert_eq!(&*fs.entry(id).saved.data.as_ref().unwrap().borrow(), b"hello world");
    }

    #[test]
    fn one_entry_record_per_generation() {
        let (mut log, mut fs, _files, id) = setup();
        let _mark = log.snapshot();
        log.save_entry(&mut fs, id);
        log.save_entry(&mut fs, id);
        assert_eq!(log.len(), 1);
        let _mark2 = log.snapshot();
        log.save_entry(&mut fs, id);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn nested_marks_unwind_in_order() {
        let (mut log, mut fs, mut files, id) = setup();
        let m1 = log.snapshot();
        write_saved(&mut log, &mut fs, id, 0, b"A");
        let m2 = log.snapshot();
        write_saved(&mut log, &mut fs, id, 1, b"B");
        log.rollback(&mut fs, &mut files, m2);
        assert_eq!(&fs.entry(id).saved.data.as_ref().unwrap().borrow()[..2], b"Ae");
        log.rollback(&mut fs, &mut files, m1);
        assert_eq!(&fs.entry(id).saved.data.as_ref().unwrap().borrow()[..2], b"he");
    }

    #[test]
    fn cell_rollback() {
        let (mut log, mut fs, mut files, id) = setup();
        let mark = log.snapshot();
        log.save_cell(&mut files, CellRef::Document);
        files.document.entry = Some(id);
        log.save_cell(&mut files, CellRef::Fd(3));
        files.set(CellRef::Fd(3), Some(id));
        log.rollback(&mut fs, &mut files, mark);
        assert_eq!(files.document.entry, None);
        assert_eq!(files.cell(CellRef::Fd(3)).entry, None);
    }
}
