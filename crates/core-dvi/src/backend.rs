//! Back-end traits the interpreter consumes.
//!
//! Font rasterization, PDF parsing and image decoding live outside this
//! crate; the resource manager reaches them through the traits below. Bundle
//! back ends provide the raw bytes, the face/graphics loaders turn bytes
//! into opaque handles the display list can reference.

use std::rc::Rc;

use crate::geom::Rect;

/// Resource kinds the resource manager can ask a bundle for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResKind {
    Pdf,
    Enc,
    Map,
    Tfm,
    Vf,
    Font,
}

/// A source of resource bytes (a TeX distribution, in one form or another).
///
/// Returning `None` means the resource does not exist; that is never fatal
/// for the caller.
pub trait ResourceBackend {
    fn open_file(&mut self, kind: ResKind, name: &str) -> Option<Vec<u8>>;
}

/// Candidate file names for `name` under the extension policy: names
/// containing a dot, or starting with `/` or `.`, are literal; otherwise the
/// kind's extensions are appended in order.
pub fn candidate_names(kind: ResKind, name: &str) -> Vec<String> {
    if name.starts_with('/') || name.starts_with('.') || name.contains('.') {
        return vec![name.to_owned()];
    }
    let exts: &[&str] = match kind {
        ResKind::Enc => &[".enc"],
        ResKind::Map => &[".map"],
        ResKind::Tfm => &[".tfm"],
        ResKind::Vf => &[".vf"],
        ResKind::Font => &[".pfb", ".otf", ".ttf"],
        ResKind::Pdf => &[""],
    };
    exts.iter().map(|e| format!("{name}{e}")).collect()
}

/// An outline font face. Implementations force the AAT charmap
/// (platform 7, encoding 2) at load time when present, so
/// [`OutlineFace::glyph_by_name`] behaves like XeTeX.
pub trait OutlineFace {
    fn glyph_by_name(&self, name: &str) -> Option<i32>;
    fn glyph_by_unicode(&self, c: u32) -> Option<i32>;
    /// Glyph bounding box in font units (identity transform).
    fn glyph_bounds(&self, glyph: i32) -> Rect;
}

pub trait FaceLoader {
    fn load_face(&mut self, data: Vec<u8>, index: i32) -> Option<Rc<dyn OutlineFace>>;
}

/// An embedded PDF document, opened once and replayed per page.
pub trait PdfDocument {
    fn page_count(&self) -> i32;
    fn media_box(&self, page: i32) -> Rect;
    fn crop_box(&self, page: i32) -> Option<Rect>;
}

/// A decoded raster image.
pub trait RasterImage {
    fn width(&self) -> f32;
    fn height(&self) -> f32;
}

pub trait GraphicsLoader {
    fn load_pdf(&mut self, data: Vec<u8>) -> Option<Rc<dyn PdfDocument>>;
    fn load_image(&mut self, path: &str) -> Option<Rc<dyn RasterImage>>;
}

/// No-op loaders for configurations (and tests) without a graphics stack.
pub struct NoBackend;

impl ResourceBackend for NoBackend {
    fn open_file(&mut self, _kind: ResKind, _name: &str) -> Option<Vec<u8>> {
        None
    }
}

impl FaceLoader for NoBackend {
    fn load_face(&mut self, _data: Vec<u8>, _index: i32) -> Option<Rc<dyn OutlineFace>> {
        None
    }
}

impl GraphicsLoader for NoBackend {
    fn load_pdf(&mut self, _data: Vec<u8>) -> Option<Rc<dyn PdfDocument>> {
        None
    }

    fn load_image(&mut self, _path: &str) -> Option<Rc<dyn RasterImage>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_policy() {
        assert_eq!(candidate_names(ResKind::Tfm, "cmr10"), vec!["cmr10.tfm"]);
        assert_eq!(
            candidate_names(ResKind::Font, "lmroman10"),
            vec!["lmroman10.pfb", "lmroman10.otf", "lmroman10.ttf"]
        );
        assert_eq!(candidate_names(ResKind::Tfm, "cmr10.tfm"), vec!["cmr10.tfm"]);
        assert_eq!(candidate_names(ResKind::Font, "/usr/f.otf"), vec!["/usr/f.otf"]);
        assert_eq!(candidate_names(ResKind::Font, "./local"), vec!["./local"]);
    }
}
