//! TeX-distribution back ends.
//!
//! Both realize the resource manager's "open by kind" interface:
//!
//! * [`BundleServer`] forks a `tectonic -X bundle serve` subprocess and
//!   talks a one-request-at-a-time protocol over its pipes, guarded by a
//!   file lock so the worker (which inherits the same pipes) and the
//!   orchestrator never interleave requests.
//! * [`TexliveBackend`] pre-indexes the distribution's `ls-R` files and
//!   opens resources by absolute path.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use nix::sys::stat::stat;
use tracing::{debug, info, warn};

use core_dvi::backend::{candidate_names, ResKind, ResourceBackend};

use crate::cache::BundleCache;

fn clear_cloexec(fd: RawFd) {
    // The worker addresses these descriptors by number across exec.
    unsafe {
        nix::libc::fcntl(fd, nix::libc::F_SETFD, 0);
    }
}

fn flock_op(fd: RawFd, op: nix::libc::c_int, what: &str) {
    loop {
        if unsafe { nix::libc::flock(fd, op) } == 0 {
            return;
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(nix::libc::EINTR) {
            continue;
        }
        panic!("bundle: {what} failed: {err}");
    }
}

fn flock_exclusive(fd: RawFd) {
    flock_op(fd, nix::libc::LOCK_EX, "flock");
}

fn flock_release(fd: RawFd) {
    flock_op(fd, nix::libc::LOCK_UN, "unlock");
}

/// A running `tectonic -X bundle serve` subprocess.
pub struct BundleServer {
    child: Child,
    /// Server's stdout (answers).
    input: File,
    /// Server's stdin (requests).
    output: File,
    lock: File,
}

impl BundleServer {
    pub fn start(tectonic_path: &str) -> anyhow::Result<BundleServer> {
        let mut child = Command::new(tectonic_path)
            .args(["-X", "bundle", "serve"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()?;

        let output = File::from(OwnedFd::from(child.stdin.take().expect("piped stdin")));
        let input = File::from(OwnedFd::from(child.stdout.take().expect("piped stdout")));
        let lock = tempfile::tempfile()?;

        clear_cloexec(input.as_raw_fd());
        clear_cloexec(output.as_raw_fd());
        clear_cloexec(lock.as_raw_fd());

        info!(target: "engine.bundle", pid = child.id(), path = tectonic_path,
              "bundle server started");
        Ok(BundleServer {
            child,
            input,
            output,
            lock,
        })
    }

    pub fn input_fd(&self) -> RawFd {
        self.input.as_raw_fd()
    }

    pub fn output_fd(&self) -> RawFd {
        self.output.as_raw_fd()
    }

    pub fn lock_fd(&self) -> RawFd {
        self.lock.as_raw_fd()
    }

    /// One request–reply round trip: `name\n` out; status byte + 8-byte
    /// little-endian length + body back. `C` carries file contents, `P` a
    /// filesystem path, `E` an error message.
    pub fn request(&mut self, name: &str) -> Option<Vec<u8>> {
        flock_exclusive(self.lock.as_raw_fd());
        let result = self.request_locked(name);
        flock_release(self.lock.as_raw_fd());
        result
    }

    fn request_locked(&mut self, name: &str) -> Option<Vec<u8>> {
        if self.output.write_all(name.as_bytes()).is_err()
            || self.output.write_all(b"\n").is_err()
            || self.output.flush().is_err()
        {
            warn!(target: "engine.bundle", name, "cannot send request");
            return None;
        }

        let mut header = [0u8; 9];
        if self.input.read_exact(&mut header).is_err() {
            warn!(target: "engine.bundle", name, "cannot read answer");
            return None;
        }
        let status = header[0];
        let size = u64::from_le_bytes(header[1..9].try_into().expect("8 bytes")) as usize;

        let mut body = vec![0u8; size];
        if self.input.read_exact(&mut body).is_err() {
            warn!(target: "engine.bundle", name, "cannot read data");
            return None;
        }

        match status {
            b'C' => Some(body),
            b'P' => {
                let path = String::from_utf8_lossy(&body).into_owned();
                std::fs::read(&path).ok()
            }
            b'E' => {
                debug!(target: "engine.bundle", name,
                       error = %String::from_utf8_lossy(&body), "bundle miss");
                None
            }
            other => panic!("bundle: unknown response {:?}", char::from(other)),
        }
    }
}

impl Drop for BundleServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Resource back end over a shared [`BundleServer`], with the on-disk
/// bundle cache in front of it. The server is shared with the executor,
/// which hands its pipes to every worker it spawns.
pub struct TectonicBackend {
    server: std::rc::Rc<std::cell::RefCell<BundleServer>>,
    cache: BundleCache,
    document_dir: PathBuf,
}

impl TectonicBackend {
    pub fn new(
        server: std::rc::Rc<std::cell::RefCell<BundleServer>>,
        document_dir: &Path,
    ) -> TectonicBackend {
        let checksum = server.borrow_mut().request("SHA256SUM");
        TectonicBackend {
            cache: BundleCache::open(checksum.as_deref()),
            server,
            document_dir: document_dir.to_owned(),
        }
    }

    fn fetch(&mut self, name: &str) -> Option<Vec<u8>> {
        if let Some(data) = self.cache.get(name) {
            return Some(data);
        }
        let data = self.server.borrow_mut().request(name)?;
        self.cache.put(name, &data);
        Some(data)
    }
}

impl ResourceBackend for TectonicBackend {
    fn open_file(&mut self, kind: ResKind, name: &str) -> Option<Vec<u8>> {
        debug!(target: "engine.bundle", name, "loading");
        match kind {
            ResKind::Pdf => {
                let path = if name.starts_with('/') {
                    PathBuf::from(name)
                } else {
                    self.document_dir.join(name)
                };
                std::fs::read(path).ok()
            }
            ResKind::Font if name.starts_with('/') || name.starts_with('.') => {
                std::fs::read(name).ok()
            }
            _ => candidate_names(kind, name)
                .into_iter()
                .find_map(|candidate| self.fetch(&candidate)),
        }
    }
}

/// Indexed on-disk TeX Live distribution.
pub struct TexliveBackend {
    index: HashMap<String, PathBuf>,
    document_dir: PathBuf,
}

impl TexliveBackend {
    /// Index every `ls-R` named by `kpsewhich --all -engine=xetex ls-R`.
    pub fn discover(document_dir: &Path) -> Option<TexliveBackend> {
        let output = Command::new("kpsewhich")
            .args(["--all", "-engine=xetex", "ls-R"])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let mut backend = TexliveBackend {
            index: HashMap::new(),
            document_dir: document_dir.to_owned(),
        };
        for line in output.stdout.split(|&c| c == b'\n') {
            if line.is_empty() {
                continue;
            }
            let path = PathBuf::from(String::from_utf8_lossy(line).into_owned());
            backend.index_ls_r(&path);
        }
        if backend.index.is_empty() {
            return None;
        }
        info!(target: "engine.bundle", entries = backend.index.len(), "TeX Live indexed");
        Some(backend)
    }

    pub fn empty(document_dir: &Path) -> TexliveBackend {
        TexliveBackend {
            index: HashMap::new(),
            document_dir: document_dir.to_owned(),
        }
    }

    /// Parse one `ls-R` file: `./sub/dir:` lines switch directory, other
    /// lines name files inside it. Earlier trees win over later ones.
    pub fn index_ls_r(&mut self, ls_r: &Path) {
        let file = match File::open(ls_r) {
            Ok(f) => f,
            Err(err) => {
                warn!(target: "engine.bundle", path = %ls_r.display(), %err, "cannot open ls-R");
                return;
            }
        };
        let root = ls_r.parent().unwrap_or(Path::new(".")).to_owned();
        let mut subdir = PathBuf::new();
        for line in BufReader::new(file).lines() {
            let line = match line {
                Ok(l) => l,
                Err(_) => break,
            };
            if line.is_empty() || line.starts_with('%') {
                continue;
            }
            if line.starts_with('.') && line.ends_with(':') {
                let dir = line.trim_end_matches(':').trim_start_matches('.');
                subdir = PathBuf::from(dir.trim_start_matches('/'));
                continue;
            }
            if !self.index.contains_key(&line) {
                self.index
                    .insert(line.clone(), root.join(&subdir).join(&line));
            }
        }
    }

    /// Resolved path for a resource name, if indexed and present on disk.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        let path = self.index.get(name)?;
        stat(path.as_path()).ok().map(|_| path.clone())
    }
}

impl ResourceBackend for TexliveBackend {
    fn open_file(&mut self, kind: ResKind, name: &str) -> Option<Vec<u8>> {
        match kind {
            ResKind::Pdf => {
                let path = if name.starts_with('/') {
                    PathBuf::from(name)
                } else {
                    self.document_dir.join(name)
                };
                std::fs::read(path).ok()
            }
            ResKind::Font if name.starts_with('/') || name.starts_with('.') => {
                std::fs::read(name).ok()
            }
            _ => candidate_names(kind, name)
                .into_iter()
                .find_map(|candidate| std::fs::read(self.resolve(&candidate)?).ok()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn ls_r_indexing_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let fonts = dir.path().join("fonts/tfm");
        fs::create_dir_all(&fonts).unwrap();
        fs::write(fonts.join("cmr10.tfm"), b"tfm-bytes").unwrap();
        fs::write(
            dir.path().join("ls-R"),
            "% ls-R\n./:\nls-R\n./fonts/tfm:\ncmr10.tfm\n",
        )
        .unwrap();

        let mut backend = TexliveBackend::empty(dir.path());
        backend.index_ls_r(&dir.path().join("ls-R"));
        assert_eq!(
            backend.resolve("cmr10.tfm"),
            Some(fonts.join("cmr10.tfm"))
        );

        // Extension policy: a bare name tries the kind's extension.
        let data = backend.open_file(ResKind::Tfm, "cmr10");
        assert_eq!(data, Some(b"tfm-bytes".to_vec()));
        assert_eq!(backend.open_file(ResKind::Tfm, "absent"), None);
    }

    #[test]
    fn first_tree_wins() {
        let dir = tempfile::tempdir().unwrap();
        for (tree, content) in [("a", "first"), ("b", "second")] {
            let sub = dir.path().join(tree).join("tex");
            fs::create_dir_all(&sub).unwrap();
            fs::write(sub.join("dup.tex"), content).unwrap();
            fs::write(dir.path().join(tree).join("ls-R"), "./tex:\ndup.tex\n").unwrap();
        }
        let mut backend = TexliveBackend::empty(dir.path());
        backend.index_ls_r(&dir.path().join("a").join("ls-R"));
        backend.index_ls_r(&dir.path().join("b").join("ls-R"));
        assert_eq!(
            backend.open_file(ResKind::Tfm, "dup.tex"),
            Some(b"first".to_vec())
        );
    }

    #[test]
    fn pdf_resolves_against_document_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("figure.pdf"), b"%PDF").unwrap();
        let mut backend = TexliveBackend::empty(dir.path());
        assert_eq!(
            backend.open_file(ResKind::Pdf, "figure.pdf"),
            Some(b"%PDF".to_vec())
        );
    }
}
