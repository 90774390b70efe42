//! Applying editor commands to the engine.
//!
//! Paths from the editor are absolute; anything rooted outside the document
//! directory is skipped with a warning. While the worker is typesetting
//! within two pages of the one on display, incoming changes buffer up (a
//! burst of keystrokes then costs one rewind) and flush before anything
//! that needs an up-to-date VFS.

use tracing::{info, warn};

use core_editor::command::line_offset;
use core_editor::utf16::utf16_to_utf8_offset;
use core_editor::ChangeSpan;
use core_engine::{EngineStatus, TexEngine};
use core_vfs::new_bytes;

const BUFFERED_OPS: usize = 64;
const BUFFERED_BYTES: usize = 4096;

/// Strip `dir` from the front of `path`. `None` when the path lives
/// outside `dir` (reaching it would need `../` segments).
pub fn relative_path<'a>(path: &'a str, dir: &str) -> Option<&'a str> {
    let dir = dir.trim_end_matches('/');
    let mut rest = path.strip_prefix(dir)?;
    if !dir.is_empty() && !rest.starts_with('/') {
        // A shared string prefix is not a shared directory (`/doc` does
        // not contain `/document/a.tex`).
        return None;
    }
    while let Some(r) = rest.strip_prefix('/') {
        rest = r;
    }
    Some(rest)
}

/// First differing byte offset, or `None` for identical contents.
pub fn find_diff(a: &[u8], b: &[u8]) -> Option<usize> {
    let len = a.len().min(b.len());
    let mut i = 0;
    while i < len && a[i] == b[i] {
        i += 1;
    }
    if i == len && a.len() == b.len() {
        None
    } else {
        Some(i)
    }
}

struct DelayedOp {
    path: String,
    offset: usize,
    remove: usize,
    data: Vec<u8>,
}

/// Byte-level edits waiting for a quiet moment.
#[derive(Default)]
pub struct DelayedChanges {
    ops: Vec<DelayedOp>,
    bytes: usize,
}

impl DelayedChanges {
    fn has_room(&self, op_bytes: usize) -> bool {
        self.ops.len() < BUFFERED_OPS && self.bytes + op_bytes <= BUFFERED_BYTES
    }

    fn push(&mut self, op: DelayedOp) {
        self.bytes += op.path.len() + 1 + op.data.len();
        self.ops.push(op);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Apply everything buffered.
    pub fn flush(&mut self, engine: &mut TexEngine, doc_dir: &str) {
        for op in std::mem::take(&mut self.ops) {
            apply_change_now(engine, doc_dir, &op.path, op.offset, op.remove, &op.data);
        }
        self.bytes = 0;
    }
}

fn resolve_entry(engine: &mut TexEngine, doc_dir: &str, path: &str, verb: &str) -> Option<core_vfs::EntryId> {
    match relative_path(path, doc_dir) {
        Some(rel) => Some(engine.find_file(rel)),
        None => {
            warn!(target: "editor", verb, path, "file has a different root, skipping");
            None
        }
    }
}

pub fn apply_open(engine: &mut TexEngine, doc_dir: &str, path: &str, data: &[u8]) {
    let Some(id) = resolve_entry(engine, doc_dir, path, "open") else {
        return;
    };

    let changed = match engine.entry_edit_data(id) {
        Some(edit) => {
            info!(target: "editor", path, "open: known file, updating");
            let diff = find_diff(&edit.borrow(), data);
            *edit.borrow_mut() = data.to_vec();
            diff
        }
        None => {
            info!(target: "editor", path, "open: new file");
            engine.set_edit_data(id, Some(new_bytes(data.to_vec())));
            match engine.entry_fs_data(id) {
                Some(fs) => find_diff(&fs.borrow(), data),
                None => None,
            }
        }
    };

    if let Some(changed) = changed {
        info!(target: "editor", path, changed, "open: changed");
        engine.notify_file_changes(id, changed);
    }
}

pub fn apply_close(engine: &mut TexEngine, doc_dir: &str, path: &str) {
    let Some(id) = resolve_entry(engine, doc_dir, path, "close") else {
        return;
    };
    let Some(edit) = engine.entry_edit_data(id) else {
        warn!(target: "editor", path, "close: file not opened, skipping");
        return;
    };

    let changed = match engine.entry_fs_data(id) {
        Some(fs) => find_diff(&fs.borrow(), &edit.borrow()).unwrap_or(0),
        None => 0,
    };
    engine.set_edit_data(id, None);
    info!(target: "editor", path, changed, "close: closing");
    engine.notify_file_changes(id, changed);
}

/// Turn a change span into `(byte offset, bytes removed)` against the
/// current edited contents.
fn resolve_span(buf: &[u8], span: &ChangeSpan) -> Option<(usize, usize)> {
    match *span {
        ChangeSpan::Bytes { offset, remove } => Some((offset, remove)),
        ChangeSpan::Lines { line, count } => {
            let start = line_offset(buf, line)?;
            let end = line_offset(buf, line + count).unwrap_or(buf.len());
            Some((start, end - start))
        }
        ChangeSpan::Range {
            start_line,
            start_char,
            end_line,
            end_char,
        } => {
            let start_bol = line_offset(buf, start_line)?;
            let start = start_bol
                + match utf16_to_utf8_offset(&buf[start_bol..], start_char) {
                    Ok(b) => b,
                    Err(err) => {
                        warn!(target: "editor", %err, "change-range start");
                        return None;
                    }
                };
            let end_bol = line_offset(buf, end_line)?;
            let end = end_bol
                + match utf16_to_utf8_offset(&buf[end_bol..], end_char) {
                    Ok(b) => b,
                    Err(err) => {
                        warn!(target: "editor", %err, "change-range end");
                        return None;
                    }
                };
            if end < start {
                return None;
            }
            Some((start, end - start))
        }
    }
}

fn apply_change_now(
    engine: &mut TexEngine,
    doc_dir: &str,
    path: &str,
    offset: usize,
    remove: usize,
    data: &[u8],
) {
    let Some(id) = resolve_entry(engine, doc_dir, path, "change") else {
        return;
    };
    let Some(edit) = engine.entry_edit_data(id) else {
        warn!(target: "editor", path, "change: file not opened, skipping");
        return;
    };

    {
        let mut buf = edit.borrow_mut();
        if offset + remove > buf.len() {
            warn!(target: "editor", path, offset, remove, len = buf.len(),
                  "change: invalid range, skipping");
            return;
        }
        buf.splice(offset..offset + remove, data.iter().copied());
    }
    info!(target: "editor", path, offset, "change applied");
    engine.notify_file_changes(id, offset);
}

/// Apply (or buffer) one change command.
#[allow(clippy::too_many_arguments)]
pub fn apply_change(
    engine: &mut TexEngine,
    delayed: &mut DelayedChanges,
    doc_dir: &str,
    displayed_page: usize,
    path: &str,
    span: &ChangeSpan,
    data: &[u8],
) {
    // Spans other than raw bytes resolve against the current contents, so
    // they cannot be delayed past other edits.
    let resolved = {
        let Some(id) = resolve_entry(engine, doc_dir, path, "change") else {
            return;
        };
        let Some(edit) = engine.entry_edit_data(id) else {
            warn!(target: "editor", path, "change: file not opened, skipping");
            return;
        };
        let buf = edit.borrow();
        match resolve_span(&buf, span) {
            Some(r) => r,
            None => {
                warn!(target: "editor", path, "change: invalid range, skipping");
                return;
            }
        }
    };
    let (offset, remove) = resolved;

    // Typesetting just below the displayed page: hold the edit so a burst
    // of keystrokes costs a single rewind.
    let page_count = engine.page_count();
    let near_display =
        page_count + 2 == displayed_page || page_count + 1 == displayed_page;
    let buffering = matches!(span, ChangeSpan::Bytes { .. })
        && near_display
        && engine.status() == EngineStatus::Running
        && delayed.has_room(path.len() + 1 + data.len());

    if buffering {
        delayed.push(DelayedOp {
            path: path.to_owned(),
            offset,
            remove,
            data: data.to_vec(),
        });
    } else {
        delayed.flush(engine, doc_dir);
        apply_change_now(engine, doc_dir, path, offset, remove, data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths() {
        assert_eq!(relative_path("/doc/main.tex", "/doc"), Some("main.tex"));
        assert_eq!(relative_path("/doc/sub/a.tex", "/doc/"), Some("sub/a.tex"));
        assert_eq!(relative_path("/doc/a.tex", "/doc/sub"), None);
        assert_eq!(relative_path("/other/a.tex", "/doc"), None);
        // A shared string prefix is not a shared directory.
        assert_eq!(relative_path("/document/a.tex", "/doc"), None);
        assert_eq!(relative_path("/doc//main.tex", "/doc"), Some("main.tex"));
    }

    #[test]
    fn diffs() {
        assert_eq!(find_diff(b"abc", b"abc"), None);
        assert_eq!(find_diff(b"abc", b"abd"), Some(2));
        assert_eq!(find_diff(b"abc", b"abcd"), Some(3));
        assert_eq!(find_diff(b"", b"x"), Some(0));
    }

    #[test]
    fn spans_resolve() {
        let buf = b"one\ntwo\nthree\n";
        assert_eq!(
            resolve_span(buf, &ChangeSpan::Bytes { offset: 2, remove: 3 }),
            Some((2, 3))
        );
        assert_eq!(
            resolve_span(buf, &ChangeSpan::Lines { line: 1, count: 1 }),
            Some((4, 4))
        );
        assert_eq!(
            resolve_span(buf, &ChangeSpan::Lines { line: 2, count: 5 }),
            Some((8, 6))
        );
        assert_eq!(
            resolve_span(
                buf,
                &ChangeSpan::Range {
                    start_line: 1,
                    start_char: 1,
                    end_line: 2,
                    end_char: 2,
                },
            ),
            Some((5, 5))
        );
    }

    #[test]
    fn range_spans_count_utf16_units() {
        let buf = "aé𝕏b\nx\n".as_bytes();
        // Columns: a=1 unit, é=1 unit, 𝕏=2 units.
        assert_eq!(
            resolve_span(
                buf,
                &ChangeSpan::Range {
                    start_line: 0,
                    start_char: 2,
                    end_line: 0,
                    end_char: 4,
                },
            ),
            Some((3, 4))
        );
        // A column inside the surrogate pair aborts.
        assert_eq!(
            resolve_span(
                buf,
                &ChangeSpan::Range {
                    start_line: 0,
                    start_char: 3,
                    end_line: 0,
                    end_char: 4,
                },
            ),
            None
        );
    }
}
