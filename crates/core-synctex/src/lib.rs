//! Incremental SyncTeX index.
//!
//! The `.synctex` stream parses line by line as the worker writes it. Page
//! open/close braces, input declarations and input closures index into
//! offset tables that roll back with the stream; record trees inside pages
//! are re-walked on demand for the two searches:
//!
//! * backward — point on a page → (file, line, column), picking the
//!   smallest record box containing the point;
//! * forward — (file, line) → page and point, a resumable scan that
//!   survives buffer updates and rewinds.

mod index;
mod records;

pub use index::{Synctex, SynctexHit};
pub use records::{Link, Point, Record, RecordKind, Size};
