//! The speculative-checkpoint executor.
//!
//! One worker runs at a time; every `READ` it issues is an opportunity to
//! answer `FORK` instead, turning the worker's own `fork(2)` into a cheap
//! snapshot of the entire typesetting state. Snapshots pile up in a bounded
//! ring paired with undo-log marks; when a file changes at some offset, the
//! trace of observed reads tells the executor exactly which snapshots are
//! still valid, and fences force the replacement worker to lay down fresh
//! snapshots around the edit point for the next edit.

use std::io::Write;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use nix::sys::signal::{kill, Signal};
use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use core_dvi::display::DisplayList;
use core_editor::{EditorOut, OutBuf};
use core_proto::{Answer, Ask, Channel, Query, QueryKind, WORKER_FD_VAR};
use core_synctex::{Synctex, SynctexHit};
use core_vfs::{
    new_bytes, AccessLevel, Bytes, CellRef, EntryId, FileSystem, FsStat, Log, Mark, OpenFiles,
    PicCache, MAX_FILES,
};

use crate::bundle::BundleServer;

/// Ring capacity: more snapshots than this decimate in place.
const MAX_PROCESSES: usize = 32;
/// Fence capacity per rewind.
const MAX_FENCES: usize = 16;
/// Minimum quiet time between snapshots, in worker milliseconds.
const SNAPSHOT_INTERVAL_MS: u32 = 500;
/// Channel poll budget for one `step`.
const POLL_TIMEOUT_MS: u16 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Running,
    Terminated,
}

#[derive(Debug, Clone, Copy)]
struct Process {
    pid: i32,
    /// Channel socket, `-1` once the process is dead.
    fd: RawFd,
    /// Entries below this length were produced by this process or an
    /// ancestor.
    trace_len: usize,
    /// Log mark captured when this process forked its successor.
    snap: Mark,
}

#[derive(Debug, Clone, Copy)]
struct TraceEntry {
    entry: EntryId,
    /// The entry's `seen` before this tuple's update (restoring it undoes
    /// the tuple).
    seen: i32,
    time: u32,
}

#[derive(Debug, Clone, Copy)]
struct Fence {
    entry: EntryId,
    position: i32,
}

struct Transaction {
    trace_len: usize,
    offset: i32,
    flush: bool,
}

/// How the worker gets spawned.
pub struct WorkerConfig {
    pub tectonic_path: String,
    /// `(input, output, lock)` descriptors of the bundle server, inherited
    /// by the worker and addressed by number in the bundle URL.
    pub bundle_fds: Option<(RawFd, RawFd, RawFd)>,
}

impl WorkerConfig {
    pub fn for_bundle(tectonic_path: String, server: &BundleServer) -> WorkerConfig {
        WorkerConfig {
            tectonic_path,
            bundle_fds: Some((server.input_fd(), server.output_fd(), server.lock_fd())),
        }
    }
}

pub struct TexEngine {
    name: String,
    document_dir: PathBuf,
    inclusion_path: Vec<PathBuf>,
    worker: WorkerConfig,

    fs: FileSystem,
    files: OpenFiles,
    log: Log,
    restart: Mark,

    channel: Channel,
    processes: Vec<Process>,

    trace: Vec<TraceEntry>,
    /// Active fences, crossed from the end of the vector down.
    fences: Vec<Fence>,

    rollback: Option<Transaction>,
    snapshot_interval_ms: u32,

    dvi: core_dvi::IncDvi,
    stex: Synctex,
    editor: EditorOut<Box<dyn Write>>,
}

impl TexEngine {
    pub fn new(
        document_dir: &Path,
        document_name: &str,
        worker: WorkerConfig,
        resmanager: core_dvi::resmanager::ResourceManager,
        editor: EditorOut<Box<dyn Write>>,
        inclusion_path: &str,
    ) -> TexEngine {
        // Workers die whenever a newer snapshot supersedes them; reap
        // automatically instead of collecting zombies.
        unsafe {
            let _ = nix::sys::signal::signal(Signal::SIGCHLD, nix::sys::signal::SigHandler::SigIgn);
        }

        let mut log = Log::new();
        let restart = log.snapshot();
        TexEngine {
            name: document_name.to_owned(),
            document_dir: document_dir.to_owned(),
            inclusion_path: inclusion_path
                .split(':')
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect(),
            worker,
            fs: FileSystem::new(),
            files: OpenFiles::new(),
            log,
            restart,
            channel: Channel::new(),
            processes: Vec::new(),
            trace: Vec::new(),
            fences: Vec::new(),
            rollback: None,
            snapshot_interval_ms: SNAPSHOT_INTERVAL_MS,
            dvi: core_dvi::IncDvi::new(resmanager),
            stex: Synctex::new(),
            editor,
        }
    }

    pub fn status(&self) -> EngineStatus {
        match self.processes.last() {
            Some(p) if p.fd > -1 => EngineStatus::Running,
            _ => EngineStatus::Terminated,
        }
    }

    pub fn page_count(&self) -> usize {
        self.dvi.page_count()
    }

    pub fn scale_factor(&self) -> f32 {
        self.dvi.tex_scale_factor()
    }

    pub fn editor_mut(&mut self) -> &mut EditorOut<Box<dyn Write>> {
        &mut self.editor
    }

    pub fn set_snapshot_interval(&mut self, ms: u32) {
        self.snapshot_interval_ms = ms;
    }

    pub fn document_dir(&self) -> &Path {
        &self.document_dir
    }

    pub fn find_file(&mut self, path: &str) -> EntryId {
        self.fs.lookup_or_create(path)
    }

    pub fn entry_edit_data(&self, id: EntryId) -> Option<Bytes> {
        self.fs.entry(id).edit_data.clone()
    }

    pub fn entry_fs_data(&self, id: EntryId) -> Option<Bytes> {
        self.fs.entry(id).fs_data.clone()
    }

    pub fn set_edit_data(&mut self, id: EntryId, data: Option<Bytes>) {
        self.fs.entry_mut(id).edit_data = data;
    }

    /// Display list for `page`, or `None` while that page does not exist.
    pub fn render_page(&mut self, page: usize) -> Option<DisplayList> {
        if page >= self.dvi.page_count() {
            return None;
        }
        let data = self
            .files
            .document
            .entry
            .and_then(|id| self.fs.entry(id).output())?;
        let data = data.borrow();
        Some(self.dvi.render_page(&data, page))
    }

    pub fn page_dim(&mut self, page: usize) -> Option<core_dvi::interp::PageDim> {
        if page >= self.dvi.page_count() {
            return None;
        }
        let data = self
            .files
            .document
            .entry
            .and_then(|id| self.fs.entry(id).output())?;
        let data = data.borrow();
        Some(self.dvi.page_dim(&data, page))
    }

    // --- SyncTeX ------------------------------------------------------------

    fn synctex_data(&self) -> Option<Bytes> {
        self.files
            .synctex
            .entry
            .and_then(|id| self.fs.entry(id).effective())
    }

    pub fn synctex_page_count(&self) -> usize {
        self.stex.page_count()
    }

    pub fn synctex_has_target(&self) -> bool {
        self.stex.has_target()
    }

    pub fn synctex_set_target(&mut self, current_page: usize, path: Option<&str>, line: i32) {
        self.stex.set_target(current_page, path, line);
    }

    pub fn synctex_find_target(&mut self) -> Option<SynctexHit> {
        let data = self.synctex_data()?;
        let data = data.borrow();
        self.stex.find_target(&data)
    }

    /// Backward search; emits the `synctex` editor message on a hit.
    pub fn synctex_scan(&mut self, page: usize, x: i32, y: i32) {
        let Some(data) = self.synctex_data() else {
            return;
        };
        let hit = {
            let data = data.borrow();
            self.stex.scan(&data, page, x, y)
        };
        if let Some((file, line, column)) = hit {
            let dir = self.document_dir.to_string_lossy().into_owned();
            let _ = self.editor.synctex(&dir, &file, line, column);
        }
    }

    // --- Worker lifecycle ---------------------------------------------------

    fn spawn_worker(&mut self) -> anyhow::Result<(i32, RawFd)> {
        let (parent_end, child_end) = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::empty(),
        )?;

        use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd};
        let mut cmd = Command::new(&self.worker.tectonic_path);
        cmd.arg("-X").arg("texpresso");
        if let Some((input, output, lock)) = self.worker.bundle_fds {
            cmd.arg("--bundle")
                .arg(format!("texpresso-bundle://{input},{output},{lock}"));
        }
        // The worker's stdout would collide with the editor protocol on our
        // own stdout; route its terminal output to stderr instead.
        let stderr_copy = nix::unistd::dup(2)?;
        cmd.args(["--untrusted", "--synctex", "--outfmt", "xdv"])
            .args(["-Z", "continue-on-errors"])
            .arg(&self.name)
            .current_dir(&self.document_dir)
            .env(WORKER_FD_VAR, child_end.as_raw_fd().to_string())
            .stdout(unsafe { Stdio::from_raw_fd(stderr_copy) })
            .stderr(Stdio::inherit());

        let child = cmd.spawn()?;
        drop(child_end);
        let fd = parent_end.into_raw_fd();
        let pid = child.id() as i32;
        info!(target: "engine.process", pid, "launched worker");
        // SIGCHLD is ignored; the Child handle is dropped and the process
        // reaped by the kernel.
        std::mem::forget(child);
        Ok((pid, fd))
    }

    fn prepare_process(&mut self) {
        if !self.processes.is_empty() {
            return;
        }
        self.log
            .rollback(&mut self.fs, &mut self.files, self.restart);
        match self.spawn_worker() {
            Ok((pid, fd)) => {
                self.processes.push(Process {
                    pid,
                    fd,
                    trace_len: 0,
                    snap: self.restart,
                });
                if !self.channel.handshake(fd).unwrap_or(false) {
                    panic!("engine: worker handshake failed");
                }
            }
            Err(err) => {
                warn!(target: "engine.process", %err, "cannot launch worker");
            }
        }
    }

    fn close_process(p: &mut Process) {
        if p.fd != -1 {
            if p.pid > 0 {
                let _ = kill(Pid::from_raw(p.pid), Signal::SIGTERM);
            }
            let _ = nix::unistd::close(p.fd);
            p.fd = -1;
        }
    }

    fn pop_process(&mut self) {
        let mut p = self.processes.pop().expect("no process to pop");
        Self::close_process(&mut p);
        self.channel.reset();
        let mark = match self.processes.last() {
            Some(parent) => parent.snap,
            None => self.restart,
        };
        self.log.rollback(&mut self.fs, &mut self.files, mark);
    }

    /// Ring overflow: retain roughly every other snapshot, always keeping
    /// the last 8, closing the rest.
    fn decimate_processes(&mut self) {
        for p in self.processes.iter() {
            debug!(target: "engine.process", pid = p.pid, position = p.trace_len,
                   "before decimation");
        }
        let bound = (self.processes.len().saturating_sub(8)) / 2;
        let mut kept = Vec::with_capacity(self.processes.len());
        for i in 0..bound {
            Self::close_process(&mut self.processes[2 * i]);
            kept.push(self.processes[2 * i + 1]);
        }
        kept.extend_from_slice(&self.processes[bound * 2..]);
        self.processes = kept;
        for p in self.processes.iter() {
            debug!(target: "engine.process", pid = p.pid, position = p.trace_len,
                   "after decimation");
        }
    }

    // --- Trace --------------------------------------------------------------

    fn record_seen(&mut self, id: EntryId, seen: i32, time: u32) {
        let last = self.processes.len() - 1;
        let p_trace_len = self.processes[last].trace_len;

        // Coalesce repeated SEENs on one file within a process; the tuple at
        // a snapshot boundary stays untouched so rewinds can split there.
        if p_trace_len > 0 && self.trace[p_trace_len - 1].entry == id {
            let at_boundary = self
                .processes
                .len()
                .checked_sub(2)
                .is_some_and(|i| self.processes[i].trace_len == p_trace_len);
            if !at_boundary {
                self.trace[p_trace_len - 1].time = time;
                self.fs.entry_mut(id).seen = seen;
                return;
            }
        }

        let prior = self.fs.entry(id).seen;
        let tuple = TraceEntry {
            entry: id,
            seen: prior,
            time,
        };
        if p_trace_len == self.trace.len() {
            self.trace.push(tuple);
        } else {
            self.trace[p_trace_len] = tuple;
        }
        self.processes[last].trace_len += 1;
        self.fs.entry_mut(id).seen = seen;
    }

    fn revert_trace_entry(fs: &mut FileSystem, te: &TraceEntry) {
        fs.entry_mut(te.entry).seen = te.seen;
    }

    // --- Snapshot policy ----------------------------------------------------

    fn need_snapshot(&self, time: u32) -> bool {
        // Mid-rewind, the fences dictate where snapshots happen.
        if !self.fences.is_empty() {
            return false;
        }

        let top = self.processes.len() - 1;
        let last_time = if top > 0 {
            // Stop if no new event has been traced since the last snapshot;
            // forking again would loop forever on the same state.
            if self.processes[top].trace_len == self.processes[top - 1].trace_len {
                return false;
            }
            self.trace[self.processes[top - 1].trace_len - 1].time
        } else {
            #[cfg(target_os = "macos")]
            {
                // Loading system fonts after fork is unsafe on macOS; hold
                // the first snapshot until output starts and fonts are in.
                if !self.dvi.output_started() {
                    return false;
                }
            }
            0
        };

        time > self.snapshot_interval_ms + last_time
    }

    // --- Query answering ----------------------------------------------------

    fn lookup_path(&self, name: &str) -> Option<(PathBuf, FsStat)> {
        let direct = if name.starts_with('/') {
            PathBuf::from(name)
        } else {
            self.document_dir.join(name)
        };
        if let Some(st) = FsStat::read(&direct) {
            return Some((direct, st));
        }
        if name.starts_with('/') {
            return None;
        }
        let name = core_vfs::normalize_path(name);
        for dir in &self.inclusion_path {
            let candidate = dir.join(name);
            if let Some(st) = FsStat::read(&candidate) {
                return Some((candidate, st));
            }
        }
        None
    }

    fn effective_data(&self, id: EntryId) -> Option<Bytes> {
        self.fs.entry(id).effective()
    }

    fn active_fence(&self) -> Option<Fence> {
        self.fences.last().copied()
    }

    fn answer_query(&mut self, q: Query) {
        let time = q.time;
        let mut reply_fd = self.processes.last().expect("no active process").fd;
        let answer = match q.kind {
            QueryKind::Open {
                fid,
                path,
                for_write,
            } => self.on_open(fid, &path, for_write, time),
            QueryKind::Read { fid, pos, size } => self.on_read(fid, pos, size, time),
            QueryKind::Write { fid, pos, data } => self.on_write(fid, pos, &data),
            QueryKind::Close { fid } => self.on_close(fid),
            QueryKind::Size { fid } => {
                check_fid(fid);
                let id = self.files.cell(CellRef::Fd(fid as usize)).entry;
                let id = id.expect("SIZE on a descriptor that is not open");
                assert!(
                    self.fs.entry(id).saved.level >= AccessLevel::Read,
                    "SIZE on a write-only descriptor"
                );
                let len = self.effective_data(id).map_or(0, |d| d.borrow().len());
                Some(Answer::Size(len as u32))
            }
            QueryKind::Seen { fid, pos } => {
                self.on_seen(fid, pos, time);
                None
            }
            QueryKind::Gpic { path, kind, page } => {
                let answer = self
                    .fs
                    .lookup(&path)
                    .map(|id| self.fs.entry(id))
                    .filter(|e| e.saved.level == AccessLevel::Read)
                    .and_then(|e| e.pic_cache)
                    .filter(|c| c.kind == kind && c.page == page)
                    .map(|c| Answer::Gpic(c.bounds));
                Some(answer.unwrap_or(Answer::Pass))
            }
            QueryKind::Spic {
                path,
                kind,
                page,
                bounds,
            } => {
                if let Some(id) = self.fs.lookup(&path) {
                    let e = self.fs.entry_mut(id);
                    if e.saved.level == AccessLevel::Read {
                        e.pic_cache = Some(PicCache { kind, page, bounds });
                    }
                }
                Some(Answer::Done)
            }
            QueryKind::Child { pid, fd } => {
                self.on_child(pid, fd);
                // The parent sent the query and awaits the reply; the child
                // is the top of the ring now.
                reply_fd = self.processes[self.processes.len() - 2].fd;
                Some(Answer::Done)
            }
        };

        if let Some(answer) = answer {
            self.channel.write_answer(&answer);
            let _ = self.channel.flush(reply_fd);
        }
    }

    fn on_open(&mut self, fid: i32, path: &str, for_write: bool, time: u32) -> Option<Answer> {
        check_fid(fid);
        let cell = CellRef::Fd(fid as usize);
        assert!(
            self.files.cell(cell).entry.is_none(),
            "OPEN on a busy descriptor {fid}"
        );

        let mut resolved: Option<(PathBuf, FsStat)> = None;

        let id = if !for_write {
            let existing = self.fs.lookup(path);
            let has_data = existing.is_some_and(|id| self.effective_data(id).is_some());
            if !has_data {
                resolved = self.lookup_path(path);
                if resolved.is_none() {
                    // Nowhere to read from: resolve as "not found".
                    let id = self.fs.lookup_or_create(path);
                    self.log.save_entry(&mut self.fs, id);
                    self.record_seen(id, i32::MAX, time);
                    return Some(Answer::Pass);
                }
            }
            match existing {
                Some(id) => id,
                None => self.fs.lookup_or_create(path),
            }
        } else {
            self.fs.lookup_or_create(path)
        };

        self.log.save_cell(&mut self.files, cell);
        self.log.save_entry(&mut self.fs, id);
        self.files.set(cell, Some(id));
        if self.fs.entry(id).seen < 0 {
            self.record_seen(id, 0, time);
        }

        if !for_write {
            if self.fs.entry(id).saved.level < AccessLevel::Read {
                if resolved.is_none() {
                    resolved = self.lookup_path(path);
                }
                let entry = self.fs.entry_mut(id);
                match &resolved {
                    None => {
                        assert!(
                            entry.edit_data.is_some(),
                            "OPEN for read with no backing data: {path}"
                        );
                        entry.saved.level = AccessLevel::Read;
                        entry.fs_stat = None;
                    }
                    Some((fs_path, st)) => {
                        match std::fs::read(fs_path) {
                            Ok(data) => entry.fs_data = Some(new_bytes(data)),
                            Err(err) => {
                                warn!(target: "engine", path, %err, "cannot read file");
                            }
                        }
                        entry.saved.level = AccessLevel::Read;
                        entry.fs_stat = Some(*st);
                    }
                }
            }
        } else {
            let entry = self.fs.entry_mut(id);
            entry.saved.data = Some(new_bytes(Vec::new()));
            entry.saved.level = AccessLevel::Write;
            info!(target: "engine", path, "writing");

            if path == "stdout" {
                assert!(
                    self.files.stdout.entry.is_none(),
                    "engine: two stdout streams"
                );
                self.log.save_cell(&mut self.files, CellRef::Stdout);
                self.files.set(CellRef::Stdout, Some(id));
            } else {
                match path.rsplit('.').next() {
                    Some("xdv") | Some("dvi") | Some("pdf") => {
                        assert!(
                            self.files.document.entry.is_none(),
                            "engine: two output documents"
                        );
                        self.log.save_cell(&mut self.files, CellRef::Document);
                        self.files.set(CellRef::Document, Some(id));
                        self.dvi.reset();
                        info!(target: "engine", path, "this is the output document");
                    }
                    Some("synctex") => {
                        assert!(
                            self.files.synctex.entry.is_none(),
                            "engine: two synctex streams"
                        );
                        self.log.save_cell(&mut self.files, CellRef::Synctex);
                        self.files.set(CellRef::Synctex, Some(id));
                        self.stex.rollback(0);
                        info!(target: "engine", path, "this is the synctex");
                    }
                    Some("log") => {
                        assert!(self.files.log.entry.is_none(), "engine: two log files");
                        self.log.save_cell(&mut self.files, CellRef::Log);
                        self.files.set(CellRef::Log, Some(id));
                        info!(target: "engine", path, "this is the log file");
                    }
                    _ => {}
                }
            }
        }

        Some(Answer::Open(path.as_bytes().to_vec()))
    }

    fn on_read(&mut self, fid: i32, pos: u32, size: u32, time: u32) -> Option<Answer> {
        check_fid(fid);
        let id = self.files.cell(CellRef::Fd(fid as usize)).entry;
        let id = id.expect("READ on a descriptor that is not open");
        assert!(
            self.fs.entry(id).saved.level >= AccessLevel::Read,
            "READ on a write-only descriptor"
        );
        let data = self.effective_data(id).expect("readable entry has data");
        let data = data.borrow();
        let pos = pos as usize;
        assert!(
            pos <= data.len(),
            "READ past the end: pos {} len {}",
            pos,
            data.len()
        );
        let mut n = (size as usize).min(data.len() - pos);

        let mut fork = false;
        if let Some(fence) = self.active_fence() {
            if fence.entry == id && (fence.position as i64) < (pos + n) as i64 {
                // Shrink the answer to end at the fence; a read starting on
                // the fence snapshots instead.
                let clipped = fence.position as i64 - pos as i64;
                assert!(clipped >= 0, "READ starts past the active fence");
                n = clipped as usize;
                fork = n == 0;
            }
        }

        if fork {
            self.fences.pop();
            Some(Answer::Fork)
        } else if self.need_snapshot(time) {
            Some(Answer::Fork)
        } else {
            Some(Answer::Read(data[pos..pos + n].to_vec()))
        }
    }

    fn on_write(&mut self, fid: i32, pos: u32, data: &[u8]) -> Option<Answer> {
        let id = if fid == -1 {
            // Terminal output arrives without an open descriptor.
            match self.files.stdout.entry {
                Some(id) => id,
                None => {
                    let id = self.fs.lookup_or_create("stdout");
                    self.log.save_entry(&mut self.fs, id);
                    self.log.save_cell(&mut self.files, CellRef::Stdout);
                    self.files.set(CellRef::Stdout, Some(id));
                    let entry = self.fs.entry_mut(id);
                    if entry.saved.data.is_none() {
                        entry.saved.data = Some(new_bytes(Vec::new()));
                        entry.saved.level = AccessLevel::Write;
                    }
                    id
                }
            }
        } else {
            check_fid(fid);
            self.files
                .cell(CellRef::Fd(fid as usize))
                .entry
                .expect("WRIT on a descriptor that is not open")
        };

        let entry = self.fs.entry(id);
        assert!(
            entry.saved.level == AccessLevel::Write,
            "WRIT on a non-writable entry {}",
            entry.path
        );
        self.log.save_entry(&mut self.fs, id);

        let buf = self.fs.entry(id).saved.data.clone().expect("write buffer");
        let pos = if fid == -1 {
            assert!(pos == 0, "stdout WRIT must append");
            buf.borrow().len()
        } else {
            pos as usize
        };

        {
            let len = buf.borrow().len();
            assert!(pos <= len, "WRIT would leave a gap");
            let overlap = len.min(pos + data.len()) - pos;
            self.log.save_overwrite(&buf, pos, overlap);
            let mut b = buf.borrow_mut();
            b[pos..pos + overlap].copy_from_slice(&data[..overlap]);
            b.extend_from_slice(&data[overlap..]);
        }

        if self.files.document.entry == Some(id) {
            let before = self.dvi.page_count();
            self.dvi.update(&buf.borrow());
            let after = self.dvi.page_count();
            if before != after {
                info!(target: "engine", pages = after, "output grew");
            }
        } else if self.files.synctex.entry == Some(id) {
            self.stex.update(&buf.borrow());
        } else if self.files.log.entry == Some(id) {
            let _ = self.editor.append(OutBuf::Log, &buf.borrow(), pos);
        } else if self.files.stdout.entry == Some(id) {
            let _ = self.editor.append(OutBuf::Out, &buf.borrow(), pos);
        }

        Some(Answer::Done)
    }

    fn on_close(&mut self, fid: i32) -> Option<Answer> {
        check_fid(fid);
        let cell = CellRef::Fd(fid as usize);
        let id = self
            .files
            .cell(cell)
            .entry
            .expect("CLOS on a descriptor that is not open");
        self.log.save_cell(&mut self.files, cell);
        self.files.set(cell, None);

        if self.files.stdout.entry == Some(id) {
            self.log.save_cell(&mut self.files, CellRef::Stdout);
            self.files.set(CellRef::Stdout, None);
        }
        if self.files.document.entry == Some(id) {
            // The document cell survives closing so late renders still see
            // the finished output.
            info!(target: "engine", "finished output");
        }
        if self.files.log.entry == Some(id) {
            self.log.save_cell(&mut self.files, CellRef::Log);
            self.files.set(CellRef::Log, None);
        }
        Some(Answer::Done)
    }

    fn on_seen(&mut self, fid: i32, pos: u32, time: u32) {
        check_fid(fid);
        let id = self
            .files
            .cell(CellRef::Fd(fid as usize))
            .entry
            .expect("SEEN on a descriptor that is not open");
        assert!(
            self.fs.entry(id).saved.level >= AccessLevel::Read,
            "SEEN on a write-only descriptor"
        );
        if let Some(fence) = self.active_fence() {
            assert!(
                !(fence.entry == id && fence.position < pos as i32),
                "SEEN position {} violates the active fence at {}",
                pos,
                fence.position
            );
        }
        if (pos as i32) <= self.fs.entry(id).seen {
            // Reopening a file reports positions below the high-water mark.
            return;
        }
        self.log.save_entry(&mut self.fs, id);
        self.record_seen(id, pos as i32, time);
    }

    fn on_child(&mut self, pid: i32, fd: RawFd) {
        if self.processes.len() == MAX_PROCESSES {
            self.decimate_processes();
        }
        self.channel.reset();
        let parent = self.processes.last_mut().expect("CHLD without a parent");
        let parent_trace = parent.trace_len;
        let parent_fd = parent.fd;
        parent.snap = self.log.snapshot();
        self.processes.push(Process {
            pid,
            fd,
            trace_len: parent_trace,
            snap: self.restart,
        });
        debug!(target: "engine.process", pid, parent_fd, "worker snapshot");
    }

    // --- Edit transactions --------------------------------------------------

    pub fn begin_changes(&mut self) {
        assert!(self.rollback.is_none(), "nested change transaction");
        self.rollback = Some(Transaction {
            trace_len: self.processes.last().map_or(0, |p| p.trace_len),
            offset: -1,
            flush: false,
        });
    }

    /// Drain pending SEEN queries so the worker's high-water marks are
    /// current before a rewind decision. Returns true when nothing new was
    /// learned (the worker is quiet or dead).
    fn process_pending_messages(&mut self) -> bool {
        if self.rollback.as_ref().is_some_and(|r| r.flush) {
            return true;
        }

        let mut nothing_seen = true;
        if let Some(p) = self.processes.last() {
            let fd = p.fd;
            if fd != -1 {
                loop {
                    match self.channel.has_pending_query(fd, POLL_TIMEOUT_MS) {
                        Ok(true) => {}
                        _ => {
                            // No answer within the budget: the worker might
                            // be stuck in a loop; kill it and fall back to
                            // an earlier snapshot.
                            warn!(target: "engine.process", "worker unresponsive, killing");
                            Self::close_process(self.processes.last_mut().unwrap());
                            break;
                        }
                    }
                    match self.channel.peek_tag(fd) {
                        Ok(Some(tag)) if &tag == b"SEEN" => {
                            match self.channel.read_query(fd) {
                                Ok(Some(q)) => {
                                    self.answer_query(q);
                                    nothing_seen = false;
                                }
                                _ => {
                                    Self::close_process(self.processes.last_mut().unwrap());
                                    break;
                                }
                            }
                        }
                        _ => break,
                    }
                }
            }
        }

        if let Some(r) = &mut self.rollback {
            r.flush = true;
        }
        nothing_seen
    }

    /// Register a change to `id` whose first differing byte is `offset`.
    pub fn notify_file_changes(&mut self, id: EntryId, offset: usize) {
        assert!(self.rollback.is_some(), "change outside a transaction");
        let changed = offset as i32;

        if self.fs.entry(id).seen < changed {
            if self.process_pending_messages() {
                return;
            }
            if self.fs.entry(id).seen < changed {
                return;
            }
        }

        let mut trace_len = self.rollback.as_ref().unwrap().trace_len;
        while self.fs.entry(id).seen >= changed {
            assert!(trace_len > 0, "rewind walked past the trace start");
            trace_len -= 1;
            Self::revert_trace_entry(&mut self.fs, &self.trace[trace_len]);
        }
        assert!(
            self.trace[trace_len].entry == id,
            "rewind stopped on {} instead of {}",
            self.fs.entry(self.trace[trace_len].entry).path,
            self.fs.entry(id).path
        );

        let r = self.rollback.as_mut().unwrap();
        r.trace_len = trace_len;
        r.offset = changed;
        debug!(target: "engine", path = self.fs.entry(id).path.as_str(), offset,
               trace_len, "change registered");
    }

    /// Scan the VFS for disk-level changes and register each one.
    pub fn detect_changes(&mut self) {
        let ids: Vec<EntryId> = self.fs.ids().collect();
        for id in ids {
            if let Some(changed) = self.scan_entry(id) {
                self.notify_file_changes(id, changed);
            }
        }
    }

    fn scan_entry(&mut self, id: EntryId) -> Option<usize> {
        {
            let e = self.fs.entry(id);
            if e.saved.level < AccessLevel::Read || e.fs_stat.is_none() || e.edit_data.is_some() {
                return None;
            }
        }
        let path = self.fs.entry(id).path.clone();
        debug!(target: "engine.scan", path = path.as_str(), "scanning");

        let (fs_path, st) = match self.lookup_path(&path) {
            Some(found) => found,
            None => {
                debug!(target: "engine.scan", path = path.as_str(), "file removed");
                return None;
            }
        };
        if self
            .fs
            .entry(id)
            .fs_stat
            .as_ref()
            .is_some_and(|old| old.same(&st))
        {
            return None;
        }
        self.fs.entry_mut(id).fs_stat = Some(st);
        info!(target: "engine.scan", path = path.as_str(), "file has changed");

        let new_data = std::fs::read(&fs_path).ok()?;
        self.fs.entry_mut(id).pic_cache = None;

        let old = self.fs.entry(id).fs_data.clone()?;
        let first_diff = {
            let old = old.borrow();
            let len = old.len().min(new_data.len());
            let mut i = 0;
            while i < len && old[i] == new_data[i] {
                i += 1;
            }
            if i == len && old.len() == new_data.len() {
                None
            } else {
                Some(i)
            }
        };

        match first_diff {
            None => {
                debug!(target: "engine.scan", path = path.as_str(), "content unchanged");
                None
            }
            Some(i) => {
                self.fs.entry_mut(id).fs_data = Some(new_bytes(new_data));
                Some(i)
            }
        }
    }

    /// Close the transaction: compute fences and roll processes back.
    /// Returns true when a rewind happened (the caller should step and
    /// redisplay).
    pub fn end_changes(&mut self) -> bool {
        let r = self.rollback.take().expect("end_changes outside a transaction");
        let top_trace = self.processes.last().map_or(0, |p| p.trace_len);
        let mut reverted = r.trace_len;
        let mut offset = r.offset;

        if reverted == top_trace {
            if !r.flush {
                return false;
            }
            if let Some(p) = self.processes.last() {
                if p.fd > -1 {
                    // Nothing rewound, but a change landed above the
                    // worker's high-water mark: let it flush buffered I/O.
                    self.channel.write_ask(&Ask::Flush);
                    let _ = self.channel.flush(p.fd);
                    return false;
                }
            }
            // The worker died while we probed it; rewind to just before its
            // last observed read.
            reverted = reverted.saturating_sub(1);
            if reverted > 0 {
                offset = self.trace[reverted].seen;
            }
        }

        info!(target: "engine", reverted, offset, "rewinding trace");
        let trace: i64 = if reverted > 0 {
            self.compute_fences(reverted, offset)
        } else {
            0
        };
        self.rollback_processes(reverted, trace);
        true
    }

    fn possible_fence(&self, te: &TraceEntry) -> bool {
        te.seen != i32::MAX
            && te.seen != -1
            && self.fs.entry(te.entry).saved.level <= AccessLevel::Read
    }

    /// Place up to [`MAX_FENCES`] fences: the deepest at the changed offset
    /// (snapped down to a 64-byte boundary), the rest stepping backward in
    /// time over a doubling schedule. Returns the trace position to roll
    /// processes back to (`-1` when no snapshot survives).
    fn compute_fences(&mut self, reverted: usize, offset: i32) -> i64 {
        self.fences.clear();
        if reverted == 0 {
            return 0;
        }
        assert!(
            self.processes.last().map_or(0, |p| p.trace_len) > reverted,
            "fences computed above the trace"
        );

        let first = self.trace[reverted];
        let mut position = (offset - 64) & !63;
        if position < first.seen {
            position = first.seen;
        }
        if position == -1 {
            position = 0;
        }
        self.fences.push(Fence {
            entry: first.entry,
            position,
        });
        debug!(target: "engine.fence", index = 0, trace = reverted,
               path = self.fs.entry(first.entry).path.as_str(), position,
               "fence placed");

        let target_trace = self
            .processes
            .iter()
            .rev()
            .find(|p| p.trace_len <= reverted)
            .map(|p| p.trace_len as i64)
            .unwrap_or(-1);

        let mut at = reverted as i64;
        let mut delta = 50;
        let mut time = first.time.saturating_sub(10);
        while at > target_trace && self.fences.len() < MAX_FENCES {
            let te = self.trace[at as usize];
            if te.time <= time && self.possible_fence(&te) {
                let position = te.seen.max(0);
                self.fences.push(Fence {
                    entry: te.entry,
                    position,
                });
                debug!(target: "engine.fence", index = self.fences.len() - 1, trace = at,
                       path = self.fs.entry(te.entry).path.as_str(), position,
                       "fence placed");
                time = time.saturating_sub(delta);
                delta *= 2;
            }
            at -= 1;
        }

        at
    }

    fn rollback_processes(&mut self, reverted: usize, trace: i64) {
        if self.fences.is_empty() {
            debug!(target: "engine", "no fences, assuming the run finished");
        }

        while self
            .processes
            .last()
            .is_some_and(|p| p.trace_len as i64 > trace)
        {
            self.pop_process();
        }

        let trace_len = self.processes.last().map_or(0, |p| p.trace_len);
        let mut at = reverted;
        while at > trace_len {
            at -= 1;
            Self::revert_trace_entry(&mut self.fs, &self.trace[at]);
        }

        // Re-synchronize the derived indexes with the restored buffers.
        match self
            .files
            .document
            .entry
            .and_then(|id| self.fs.entry(id).output())
        {
            Some(data) => self.dvi.update(&data.borrow()),
            None => self.dvi.reset(),
        }
        match self
            .files
            .synctex
            .entry
            .and_then(|id| self.fs.entry(id).output())
        {
            Some(data) => self.stex.update(&data.borrow()),
            None => self.stex.rollback(0),
        }
        info!(target: "engine", pages = self.dvi.page_count(), "state after rollback");

        let stdout_data = self
            .files
            .stdout
            .entry
            .and_then(|id| self.fs.entry(id).output());
        let _ = match stdout_data {
            Some(data) => self.editor.truncate(OutBuf::Out, Some(&data.borrow())),
            None => self.editor.truncate(OutBuf::Out, None),
        };
        let log_data = self
            .files
            .log
            .entry
            .and_then(|id| self.fs.entry(id).output());
        let _ = match log_data {
            Some(data) => self.editor.truncate(OutBuf::Log, Some(&data.borrow())),
            None => self.editor.truncate(OutBuf::Log, None),
        };
    }

    // --- Stepping -----------------------------------------------------------

    /// Answer at most one worker query. Returns true when a query was
    /// handled (the caller may keep stepping).
    pub fn step(&mut self, restart_if_needed: bool) -> bool {
        if restart_if_needed {
            self.prepare_process();
        }
        if self.status() != EngineStatus::Running {
            return false;
        }
        let fd = self.processes.last().expect("running implies a process").fd;
        match self.channel.has_pending_query(fd, POLL_TIMEOUT_MS) {
            Ok(true) => {}
            _ => return false,
        }
        match self.channel.read_query(fd) {
            Ok(Some(q)) => {
                self.answer_query(q);
                let _ = self.channel.flush(fd);
                true
            }
            Ok(None) | Err(_) => {
                info!(target: "engine.process", "worker terminated");
                Self::close_process(self.processes.last_mut().unwrap());
                false
            }
        }
    }
}

fn check_fid(fid: i32) {
    assert!(
        (0..MAX_FILES as i32).contains(&fid),
        "file descriptor {fid} out of range"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_dvi::backend::NoBackend;
    use core_dvi::resmanager::ResourceManager;
    use core_editor::Framing;
    use nix::sys::socket::{sendmsg, ControlMessage, MsgFlags};
    use std::cell::RefCell;
    use std::io::IoSlice;
    use std::os::unix::io::{AsRawFd, IntoRawFd, OwnedFd};
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct SharedSink(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        engine: TexEngine,
        dir: tempfile::TempDir,
        sink: SharedSink,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let sink = SharedSink::default();
        let resmanager = ResourceManager::new(
            Box::new(NoBackend),
            Box::new(NoBackend),
            Box::new(NoBackend),
        );
        let engine = TexEngine::new(
            dir.path(),
            "main.tex",
            WorkerConfig {
                tectonic_path: "/nonexistent/tectonic".to_owned(),
                bundle_fds: None,
            },
            resmanager,
            EditorOut::new(Box::new(sink.clone()), Framing::Sexp, false),
            "",
        );
        Fixture { engine, dir, sink }
    }

    /// Install a socketpair in place of a worker; the returned end plays
    /// the worker role.
    fn attach_fake_worker(engine: &mut TexEngine) -> OwnedFd {
        let (ours, theirs) = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::empty(),
        )
        .unwrap();
        engine.processes.push(Process {
            pid: -1,
            fd: ours.into_raw_fd(),
            trace_len: engine.trace.len(),
            snap: engine.restart,
        });
        theirs
    }

    fn send_query(fd: RawFd, tag: &[u8; 4], time: u32, payload: &[u8]) {
        let mut msg = Vec::new();
        msg.extend_from_slice(tag);
        msg.extend_from_slice(&time.to_le_bytes());
        msg.extend_from_slice(payload);
        let mut rest = msg.as_slice();
        while !rest.is_empty() {
            let n = nix::unistd::write(unsafe { std::os::unix::io::BorrowedFd::borrow_raw(fd) }, rest).unwrap();
            rest = &rest[n..];
        }
    }

    fn read_answer(fd: RawFd) -> (String, Vec<u8>) {
        let mut tag = [0u8; 4];
        let mut got = 0;
        while got < 4 {
            got += nix::unistd::read(fd, &mut tag[got..]).unwrap();
        }
        let name = String::from_utf8_lossy(&tag).into_owned();
        let mut rest = Vec::new();
        // Drain whatever payload followed (answers are written in one flush).
        loop {
            let mut chunk = [0u8; 4096];
            match nix::poll::poll(
                &mut [nix::poll::PollFd::new(
                    unsafe { std::os::unix::io::BorrowedFd::borrow_raw(fd) },
                    nix::poll::PollFlags::POLLIN,
                )],
                nix::poll::PollTimeout::from(20u16),
            ) {
                Ok(n) if n > 0 => match nix::unistd::read(fd, &mut chunk) {
                    Ok(0) => break,
                    Ok(n) => rest.extend_from_slice(&chunk[..n]),
                    Err(_) => break,
                },
                _ => break,
            }
        }
        (name, rest)
    }

    fn open_payload(fid: u32, path: &str) -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&fid.to_le_bytes());
        p.extend_from_slice(path.as_bytes());
        p.push(0);
        p
    }

    #[test]
    fn open_missing_file_passes() {
        let mut fx = fixture();
        let worker = attach_fake_worker(&mut fx.engine);
        send_query(worker.as_raw_fd(), b"OPRD", 1, &open_payload(0, "absent.sty"));
        assert!(fx.engine.step(false));
        let (tag, _) = read_answer(worker.as_raw_fd());
        assert_eq!(tag, "PASS");
        // Resolved as "not found": seen pins to the ceiling.
        let id = fx.engine.fs.lookup("absent.sty").unwrap();
        assert_eq!(fx.engine.fs.entry(id).seen, i32::MAX);
    }

    #[test]
    fn open_and_read_round_trip() {
        let mut fx = fixture();
        std::fs::write(fx.dir.path().join("main.tex"), b"hello world").unwrap();
        let worker = attach_fake_worker(&mut fx.engine);

        send_query(worker.as_raw_fd(), b"OPRD", 1, &open_payload(0, "main.tex"));
        assert!(fx.engine.step(false));
        let (tag, payload) = read_answer(worker.as_raw_fd());
        assert_eq!(tag, "OPEN");
        assert_eq!(&payload[4..], b"main.tex");

        let mut p = Vec::new();
        p.extend_from_slice(&0u32.to_le_bytes());
        p.extend_from_slice(&6u32.to_le_bytes());
        p.extend_from_slice(&100u32.to_le_bytes());
        send_query(worker.as_raw_fd(), b"READ", 2, &p);
        assert!(fx.engine.step(false));
        let (tag, payload) = read_answer(worker.as_raw_fd());
        assert_eq!(tag, "READ");
        assert_eq!(&payload[4..], b"world");
    }

    #[test]
    fn seen_extends_trace_monotonically() {
        let mut fx = fixture();
        std::fs::write(fx.dir.path().join("main.tex"), b"hello world").unwrap();
        let worker = attach_fake_worker(&mut fx.engine);

        send_query(worker.as_raw_fd(), b"OPRD", 1, &open_payload(0, "main.tex"));
        assert!(fx.engine.step(false));
        let _ = read_answer(worker.as_raw_fd());

        fn seen(fx: &mut Fixture, fd: RawFd, pos: u32, time: u32) {
            let mut p = Vec::new();
            p.extend_from_slice(&0u32.to_le_bytes());
            p.extend_from_slice(&pos.to_le_bytes());
            send_query(fd, b"SEEN", time, &p);
            assert!(fx.engine.step(false));
        }
        seen(&mut fx, worker.as_raw_fd(), 4, 10);
        seen(&mut fx, worker.as_raw_fd(), 9, 20);
        // Coalesced: one tuple for the open, updated in place for the SEENs.
        let id = fx.engine.fs.lookup("main.tex").unwrap();
        assert_eq!(fx.engine.fs.entry(id).seen, 9);
        assert_eq!(fx.engine.processes.last().unwrap().trace_len, 1);
        assert_eq!(fx.engine.trace[0].time, 20);
        // A SEEN below the high-water mark is ignored.
        seen(&mut fx, worker.as_raw_fd(), 2, 30);
        assert_eq!(fx.engine.fs.entry(id).seen, 9);
    }

    #[test]
    fn read_after_quiet_interval_forks_and_child_joins_ring() {
        let mut fx = fixture();
        std::fs::write(fx.dir.path().join("main.tex"), b"hello world").unwrap();
        let worker = attach_fake_worker(&mut fx.engine);

        send_query(worker.as_raw_fd(), b"OPRD", 1, &open_payload(0, "main.tex"));
        assert!(fx.engine.step(false));
        let _ = read_answer(worker.as_raw_fd());

        // Half a second of quiet: the next READ answers FORK.
        let mut p = Vec::new();
        p.extend_from_slice(&0u32.to_le_bytes());
        p.extend_from_slice(&0u32.to_le_bytes());
        p.extend_from_slice(&5u32.to_le_bytes());
        send_query(worker.as_raw_fd(), b"READ", 600, &p);
        assert!(fx.engine.step(false));
        let (tag, _) = read_answer(worker.as_raw_fd());
        assert_eq!(tag, "FORK");

        // The worker "forks" and sends the child end via SCM_RIGHTS.
        let (child_ours, child_theirs) = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::empty(),
        )
        .unwrap();
        let pid = 4242i32.to_le_bytes();
        let iov = [IoSlice::new(&pid)];
        let fds = [child_theirs.as_raw_fd()];
        let cmsg = [ControlMessage::ScmRights(&fds)];
        send_query(worker.as_raw_fd(), b"CHLD", 600, &[]);
        sendmsg::<()>(worker.as_raw_fd(), &iov, &cmsg, MsgFlags::empty(), None).unwrap();
        assert!(fx.engine.step(false));
        let (tag, _) = read_answer(worker.as_raw_fd());
        assert_eq!(tag, "DONE");

        assert_eq!(fx.engine.processes.len(), 2);
        let parent = fx.engine.processes[0];
        let child = fx.engine.processes[1];
        assert_eq!(child.pid, 4242);
        assert_eq!(child.trace_len, parent.trace_len);
        drop(child_ours);
    }

    #[test]
    fn rewind_on_edit_drops_stale_processes() {
        // Trace history: A seen to 100, B to 200, A to 150.
        let mut fx = fixture();
        let worker = attach_fake_worker(&mut fx.engine);
        let a = fx.engine.fs.lookup_or_create("a.tex");
        let b = fx.engine.fs.lookup_or_create("b.tex");
        fx.engine.fs.entry_mut(a).saved.level = AccessLevel::Read;
        fx.engine.fs.entry_mut(b).saved.level = AccessLevel::Read;
        fx.engine.record_seen(a, 100, 10);
        // Forcing distinct tuples: B breaks the coalescing run.
        fx.engine.record_seen(b, 200, 20);
        fx.engine.record_seen(a, 150, 50);
        assert_eq!(fx.engine.processes.last().unwrap().trace_len, 3);

        fx.engine.begin_changes();
        fx.engine.notify_file_changes(a, 80);
        assert!(fx.engine.end_changes());

        assert!(fx.engine.processes.is_empty(), "all processes dropped");
        assert!(fx.engine.fences.is_empty());
        assert_eq!(fx.engine.fs.entry(a).seen, -1);
        assert_eq!(fx.engine.fs.entry(b).seen, -1);
        assert_eq!(fx.engine.status(), EngineStatus::Terminated);
        drop(worker);
    }

    #[test]
    fn fences_step_backward_over_the_time_schedule() {
        let mut fx = fixture();
        let worker = attach_fake_worker(&mut fx.engine);
        let a = fx.engine.fs.lookup_or_create("a.tex");
        let b = fx.engine.fs.lookup_or_create("b.tex");
        fx.engine.fs.entry_mut(a).saved.level = AccessLevel::Read;
        fx.engine.fs.entry_mut(b).saved.level = AccessLevel::Read;
        // Interleave so coalescing keeps every tuple.
        fx.engine.record_seen(a, 1000, 100);
        fx.engine.record_seen(b, 512, 400);
        fx.engine.record_seen(a, 4096, 700);
        fx.engine.record_seen(b, 9000, 1000);

        fx.engine.begin_changes();
        // Change b at 600: only the first two tuples survive.
        fx.engine.notify_file_changes(b, 600);
        assert!(fx.engine.end_changes());

        // Fence 0 sits at the edit point snapped to 64 bytes.
        assert!(!fx.engine.fences.is_empty());
        let fence0 = fx.engine.fences[0];
        assert_eq!(fence0.entry, b);
        assert_eq!(fence0.position, (600 - 64) & !63);
        // Later fences target earlier trace entries.
        for fence in &fx.engine.fences[1..] {
            assert!(fence.position >= 0);
        }
        drop(worker);
    }

    #[test]
    fn log_writes_reach_the_editor() {
        let mut fx = fixture();
        let worker = attach_fake_worker(&mut fx.engine);

        // OPWR the log file, then write a line.
        send_query(worker.as_raw_fd(), b"OPWR", 1, &open_payload(1, "main.log"));
        assert!(fx.engine.step(false));
        let _ = read_answer(worker.as_raw_fd());

        let mut p = Vec::new();
        p.extend_from_slice(&1u32.to_le_bytes());
        p.extend_from_slice(&0u32.to_le_bytes());
        p.extend_from_slice(&6u32.to_le_bytes());
        p.extend_from_slice(b"line1\n");
        send_query(worker.as_raw_fd(), b"WRIT", 2, &p);
        assert!(fx.engine.step(false));
        let (tag, _) = read_answer(worker.as_raw_fd());
        assert_eq!(tag, "DONE");

        let out = String::from_utf8(fx.sink.0.borrow().clone()).unwrap();
        assert!(out.contains("(append log 0 \"line1\\n\")"), "got: {out}");

        let id = fx.engine.files.log.entry.unwrap();
        assert_eq!(
            &*fx.engine.fs.entry(id).output().unwrap().borrow(),
            b"line1\n"
        );
    }
}
