//! Configuration loading and parsing.
//!
//! `texpresso.toml` is discovered next to the document (or passed with
//! `--config`). Everything has a default; unknown fields are ignored so
//! older binaries tolerate newer files.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BundlePreference {
    Texlive,
    Tectonic,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct BundleConfig {
    /// Which back end to prefer when both are available and no CLI flag
    /// decides.
    #[serde(default)]
    pub prefer: Option<BundlePreference>,
    /// Path of the `texpresso-tonic`/`tectonic` binary.
    #[serde(default)]
    pub tectonic_path: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Quiet time between worker snapshots, in milliseconds.
    #[serde(default = "EngineConfig::default_snapshot_interval_ms")]
    pub snapshot_interval_ms: u32,
}

impl EngineConfig {
    fn default_snapshot_interval_ms() -> u32 {
        500
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            snapshot_interval_ms: Self::default_snapshot_interval_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive string.
    #[serde(default)]
    pub filter: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    pub bundle: BundleConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Default, Clone)]
pub struct Config {
    /// Original file text, when a file was found.
    pub raw: Option<String>,
    pub file: ConfigFile,
}

/// Load from an explicit path (errors surface) or discover
/// `texpresso.toml` beside the document (absence is fine).
pub fn load(override_path: Option<&Path>, document_dir: &Path) -> Result<Config> {
    let path: Option<PathBuf> = match override_path {
        Some(p) => Some(p.to_owned()),
        None => {
            let candidate = document_dir.join("texpresso.toml");
            candidate.exists().then_some(candidate)
        }
    };

    let Some(path) = path else {
        return Ok(Config::default());
    };

    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let file: ConfigFile = toml::from_str(&raw)
        .with_context(|| format!("parsing config {}", path.display()))?;
    info!(target: "runtime", path = %path.display(), "configuration loaded");
    Ok(Config {
        raw: Some(raw),
        file,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(None, dir.path()).unwrap();
        assert!(config.raw.is_none());
        assert_eq!(config.file.engine.snapshot_interval_ms, 500);
        assert!(config.file.bundle.prefer.is_none());
    }

    #[test]
    fn discovers_and_parses() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("texpresso.toml"),
            "[bundle]\nprefer = \"texlive\"\n[engine]\nsnapshot_interval_ms = 250\n",
        )
        .unwrap();
        let config = load(None, dir.path()).unwrap();
        assert_eq!(config.file.bundle.prefer, Some(BundlePreference::Texlive));
        assert_eq!(config.file.engine.snapshot_interval_ms, 250);
    }

    #[test]
    fn unknown_fields_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("texpresso.toml"),
            "[future]\nsetting = 1\n[log]\nfilter = \"engine=debug\"\n",
        )
        .unwrap();
        let config = load(None, dir.path()).unwrap();
        assert_eq!(config.file.log.filter.as_deref(), Some("engine=debug"));
    }

    #[test]
    fn explicit_path_errors_surface() {
        assert!(load(Some(Path::new("/nonexistent.toml")), Path::new(".")).is_err());
    }
}
