//! The speculative-checkpoint executor and its TeX-distribution back ends.
//!
//! [`engine::TexEngine`] owns the VFS, the rollback log, a bounded ring of
//! forked worker snapshots and the read trace that ties them to file
//! offsets. It answers the worker's I/O queries, decides when a `READ`
//! becomes a `FORK`, and — when an edit lands — places fences and rewinds to
//! the deepest snapshot that never saw the changed bytes.
//!
//! [`bundle`] provides the two resource back ends (subprocess-served
//! Tectonic bundle and indexed TeX Live distribution); [`cache`] the
//! persisted state both keep under the user cache directory.

pub mod bundle;
pub mod cache;
pub mod engine;

pub use core_synctex::SynctexHit;
pub use engine::{EngineStatus, TexEngine};
