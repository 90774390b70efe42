//! Fixed-point arithmetic and big-endian integer decoding shared by every
//! binary TeX format this workspace parses (DVI/XDV streams, TFM metrics,
//! virtual fonts).

pub mod bytes;
pub mod fixed;

pub use bytes::Reader;
pub use fixed::Fixed;
