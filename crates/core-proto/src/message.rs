//! Message types exchanged with the worker.

use std::os::unix::io::RawFd;

pub(crate) const fn pack(tag: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*tag)
}

pub(crate) const Q_OPRD: u32 = pack(b"OPRD");
pub(crate) const Q_OPWR: u32 = pack(b"OPWR");
pub(crate) const Q_READ: u32 = pack(b"READ");
pub(crate) const Q_WRIT: u32 = pack(b"WRIT");
pub(crate) const Q_CLOS: u32 = pack(b"CLOS");
pub(crate) const Q_SIZE: u32 = pack(b"SIZE");
pub(crate) const Q_SEEN: u32 = pack(b"SEEN");
pub(crate) const Q_GPIC: u32 = pack(b"GPIC");
pub(crate) const Q_SPIC: u32 = pack(b"SPIC");
pub(crate) const Q_CHLD: u32 = pack(b"CHLD");

pub(crate) const A_DONE: u32 = pack(b"DONE");
pub(crate) const A_PASS: u32 = pack(b"PASS");
pub(crate) const A_SIZE: u32 = pack(b"SIZE");
pub(crate) const A_READ: u32 = pack(b"READ");
pub(crate) const A_FORK: u32 = pack(b"FORK");
pub(crate) const A_OPEN: u32 = pack(b"OPEN");
pub(crate) const A_GPIC: u32 = pack(b"GPIC");

pub(crate) const C_FLSH: u32 = pack(b"FLSH");

/// Picture bounding box, `(x0, y0, x1, y1)`.
pub type PicBounds = [f32; 4];

/// A query's payload.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryKind {
    /// `OPRD`/`OPWR`: open `path` under descriptor `fid`.
    Open {
        fid: i32,
        path: String,
        for_write: bool,
    },
    Read {
        fid: i32,
        pos: u32,
        size: u32,
    },
    Write {
        fid: i32,
        pos: u32,
        data: Vec<u8>,
    },
    Close {
        fid: i32,
    },
    Size {
        fid: i32,
    },
    /// High-water mark notification; carries no answer.
    Seen {
        fid: i32,
        pos: u32,
    },
    /// Picture bounding-box cache probe.
    Gpic {
        path: String,
        kind: i32,
        page: i32,
    },
    /// Picture bounding-box cache store.
    Spic {
        path: String,
        kind: i32,
        page: i32,
        bounds: PicBounds,
    },
    /// The worker forked; the child's socket arrived via `SCM_RIGHTS`.
    Child {
        pid: i32,
        fd: RawFd,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Milliseconds since the worker's root process started.
    pub time: u32,
    pub kind: QueryKind,
}

impl Query {
    /// True when the query expects an answer on the channel.
    pub fn wants_answer(&self) -> bool {
        !matches!(self.kind, QueryKind::Seen { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Answer {
    Done,
    Pass,
    Fork,
    Size(u32),
    Read(Vec<u8>),
    /// Open succeeded; echoes the path the worker should consider open.
    Open(Vec<u8>),
    Gpic(PicBounds),
}

/// Unprompted message to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ask {
    /// Flush buffered output and bump the read-cache generation.
    Flush,
}

pub(crate) fn tag_bytes(tag: u32) -> [u8; 4] {
    tag.to_le_bytes()
}

pub(crate) fn tag_display(tag: u32) -> String {
    tag_bytes(tag)
        .iter()
        .map(|&b| {
            if b.is_ascii_graphic() {
                char::from(b)
            } else {
                '?'
            }
        })
        .collect()
}
