//! Filesystem metadata snapshots.
//!
//! Change detection compares a full stat tuple rather than mtime alone:
//! editors that write through renames change inode without touching size,
//! and some filesystems have coarse timestamps.

use std::path::Path;

/// The subset of `stat(2)` the change detector compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStat {
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: i64,
    pub blksize: i64,
    pub blocks: i64,
    pub atime: (i64, i64),
    pub mtime: (i64, i64),
    pub ctime: (i64, i64),
}

impl FsStat {
    /// Stat `path`, or `None` if the file is inaccessible.
    pub fn read(path: &Path) -> Option<FsStat> {
        let st = nix::sys::stat::stat(path).ok()?;
        Some(FsStat {
            dev: st.st_dev as u64,
            ino: st.st_ino,
            mode: st.st_mode as u32,
            nlink: st.st_nlink as u64,
            uid: st.st_uid,
            gid: st.st_gid,
            rdev: st.st_rdev as u64,
            size: st.st_size,
            blksize: st.st_blksize as i64,
            blocks: st.st_blocks,
            atime: (st.st_atime, st.st_atime_nsec),
            mtime: (st.st_mtime, st.st_mtime_nsec),
            ctime: (st.st_ctime, st.st_ctime_nsec),
        })
    }

    pub fn same(&self, other: &FsStat) -> bool {
        self == other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn stat_detects_content_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.tex");
        std::fs::write(&path, b"hello").unwrap();
        let st1 = FsStat::read(&path).unwrap();
        let st2 = FsStat::read(&path).unwrap();
        assert!(st1.same(&st2));

        let mut f = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        f.write_all(b" world").unwrap();
        drop(f);
        let st3 = FsStat::read(&path).unwrap();
        assert!(!st1.same(&st3));
    }

    #[test]
    fn missing_file_is_none() {
        assert!(FsStat::read(Path::new("/nonexistent/definitely/absent")).is_none());
    }
}
