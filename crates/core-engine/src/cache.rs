//! Persisted caches under `$XDG_CACHE_HOME/texpresso`.
//!
//! * Format cache sidecars: `<cache>/format/<prefix><format>.fmt.deps`
//!   records either the TeX Live dependency list (`name` / `size:mtime`
//!   pairs) or the Tectonic bundle SHA256; the cached format stays valid
//!   while every dependency stats identically (or the checksum matches).
//! * Bundle cache: `<cache>/tectonic/<name>` keeps a copy of each resource
//!   fetched from a subprocess bundle, thrown away wholesale when the
//!   bundle's `SHA256SUM` changes.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

/// `$XDG_CACHE_HOME/texpresso` or `$HOME/.cache/texpresso`.
pub fn cache_dir() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os("XDG_CACHE_HOME") {
        if !dir.is_empty() {
            return Some(PathBuf::from(dir).join("texpresso"));
        }
    }
    let home = std::env::var_os("HOME")?;
    if home.is_empty() {
        return None;
    }
    Some(PathBuf::from(home).join(".cache").join("texpresso"))
}

/// One recorded format dependency: a file that existed (or didn't) with a
/// given size and mtime when the format was built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDep {
    pub name: String,
    pub size: i64,
    pub mtime: i64,
}

/// Contents of a format `.deps` sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatDeps {
    /// TeX Live: per-file `size:mtime` stamps.
    Files(Vec<FormatDep>),
    /// Tectonic: the bundle's SHA256.
    BundleSha256(String),
}

impl FormatDeps {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            FormatDeps::Files(deps) => {
                let mut out = String::new();
                for dep in deps {
                    out.push_str(&format!("{}\n{}:{}\n", dep.name, dep.size, dep.mtime));
                }
                out.into_bytes()
            }
            FormatDeps::BundleSha256(sha) => format!("sha256:{sha}\n").into_bytes(),
        }
    }

    pub fn parse(data: &[u8]) -> Option<FormatDeps> {
        let text = std::str::from_utf8(data).ok()?;
        if let Some(sha) = text.strip_prefix("sha256:") {
            return Some(FormatDeps::BundleSha256(sha.trim_end().to_owned()));
        }
        let mut deps = Vec::new();
        let mut lines = text.lines();
        while let Some(name) = lines.next() {
            let stamp = lines.next()?;
            let (size, mtime) = stamp.split_once(':')?;
            deps.push(FormatDep {
                name: name.to_owned(),
                size: size.parse().ok()?,
                mtime: mtime.parse().ok()?,
            });
        }
        Some(FormatDeps::Files(deps))
    }
}

fn stat_stamp(path: Option<&Path>) -> (i64, i64) {
    match path.and_then(|p| fs::metadata(p).ok()) {
        Some(meta) => {
            use std::os::unix::fs::MetadataExt;
            (meta.size() as i64, meta.mtime())
        }
        None => (-1, -1),
    }
}

/// Stamp a dependency as the TeX Live resolver sees it right now.
pub fn dep_of(name: &str, resolved: Option<&Path>) -> FormatDep {
    let (size, mtime) = stat_stamp(resolved);
    FormatDep {
        name: name.to_owned(),
        size,
        mtime,
    }
}

/// A cached format is valid when every recorded dependency still stats
/// identically (TeX Live) or the bundle checksum matches.
pub fn format_is_valid(
    deps: &FormatDeps,
    resolve: impl Fn(&str) -> Option<PathBuf>,
    bundle_sha: impl Fn() -> Option<String>,
) -> bool {
    match deps {
        FormatDeps::Files(files) => files.iter().all(|dep| {
            let resolved = resolve(&dep.name);
            let (size, mtime) = stat_stamp(resolved.as_deref());
            size == dep.size && mtime == dep.mtime
        }),
        FormatDeps::BundleSha256(recorded) => bundle_sha().as_deref() == Some(recorded.as_str()),
    }
}

/// On-disk copy of bundle resources, keyed by name, valid for one bundle
/// checksum.
pub struct BundleCache {
    dir: Option<PathBuf>,
}

impl BundleCache {
    /// Open (and prepare) the cache for a bundle whose `SHA256SUM` reads
    /// `checksum`. A checksum change clears every cached file.
    pub fn open(checksum: Option<&[u8]>) -> BundleCache {
        let dir = match cache_dir() {
            Some(base) => base.join("tectonic"),
            None => return BundleCache { dir: None },
        };
        if fs::create_dir_all(&dir).is_err() {
            warn!(target: "engine.cache", dir = %dir.display(), "cannot create bundle cache");
            return BundleCache { dir: None };
        }

        let sum_path = dir.join("SHA256SUM");
        let stored = fs::read(&sum_path).ok();
        match (checksum, stored) {
            (Some(current), Some(stored)) if stored == current => {}
            (Some(current), _) => {
                info!(target: "engine.cache", "bundle checksum changed, clearing cache");
                if let Ok(entries) = fs::read_dir(&dir) {
                    for entry in entries.flatten() {
                        let _ = fs::remove_file(entry.path());
                    }
                }
                let _ = fs::write(&sum_path, current);
            }
            (None, _) => {
                // No way to validate; serve whatever is there.
            }
        }
        BundleCache { dir: Some(dir) }
    }

    fn path_for(&self, name: &str) -> Option<PathBuf> {
        // Bundle resources are flat names; anything path-like skips the
        // cache rather than escaping it.
        if name.contains('/') || name.starts_with('.') {
            return None;
        }
        self.dir.as_ref().map(|d| d.join(name))
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        fs::read(self.path_for(name)?).ok()
    }

    pub fn put(&self, name: &str, data: &[u8]) {
        if let Some(path) = self.path_for(name) {
            if fs::write(&path, data).is_err() {
                let _ = fs::remove_file(&path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deps_round_trip() {
        let deps = FormatDeps::Files(vec![
            FormatDep {
                name: "xelatex.ini".into(),
                size: 123,
                mtime: 456,
            },
            FormatDep {
                name: "missing.tex".into(),
                size: -1,
                mtime: -1,
            },
        ]);
        assert_eq!(FormatDeps::parse(&deps.to_bytes()), Some(deps));

        let sha = FormatDeps::BundleSha256("abcd".into());
        assert_eq!(FormatDeps::parse(&sha.to_bytes()), Some(sha));
    }

    #[test]
    fn file_deps_validate_against_stat() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dep.tex");
        fs::write(&path, b"contents").unwrap();

        let deps = FormatDeps::Files(vec![dep_of("dep.tex", Some(&path))]);
        let resolve = |name: &str| (name == "dep.tex").then(|| path.clone());
        assert!(format_is_valid(&deps, resolve, || None));

        fs::write(&path, b"changed!!").unwrap();
        assert!(!format_is_valid(&deps, resolve, || None));
    }

    #[test]
    fn missing_dep_still_missing_is_valid() {
        let deps = FormatDeps::Files(vec![FormatDep {
            name: "gone.tex".into(),
            size: -1,
            mtime: -1,
        }]);
        assert!(format_is_valid(&deps, |_| None, || None));
    }

    #[test]
    fn sha_deps_compare_checksum() {
        let deps = FormatDeps::BundleSha256("feed".into());
        assert!(format_is_valid(&deps, |_| None, || Some("feed".into())));
        assert!(!format_is_valid(&deps, |_| None, || Some("dead".into())));
        assert!(!format_is_valid(&deps, |_| None, || None));
    }

    #[test]
    fn bundle_cache_clears_on_checksum_change() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("XDG_CACHE_HOME", dir.path());

        let cache = BundleCache::open(Some(b"v1"));
        cache.put("cmr10.tfm", b"metrics");
        assert_eq!(cache.get("cmr10.tfm"), Some(b"metrics".to_vec()));

        let cache = BundleCache::open(Some(b"v1"));
        assert_eq!(cache.get("cmr10.tfm"), Some(b"metrics".to_vec()));

        let cache = BundleCache::open(Some(b"v2"));
        assert_eq!(cache.get("cmr10.tfm"), None);

        std::env::remove_var("XDG_CACHE_HOME");
    }
}
