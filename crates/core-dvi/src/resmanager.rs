//! Resource loading and caching.
//!
//! Fonts (metrics, virtual fonts, encodings, outlines), font maps, embedded
//! PDFs and raster images, all loaded lazily through the bundle back end and
//! cached for the whole session. A missing resource is a warning and an
//! absent cache entry, never an error; a malformed stream is logged and the
//! entry stays absent.

use std::cell::RefCell;
use std::rc::Rc;

use core_codec::Fixed;
use tracing::{info, warn};

use crate::backend::{
    FaceLoader, GraphicsLoader, OutlineFace, PdfDocument, RasterImage, ResKind, ResourceBackend,
};
use crate::fontmap::Fontmap;
use crate::fonttable::{DviFont, FontDef, FontRef, FontSpec};
use crate::enc::Enc;
use crate::tfm::Tfm;
use crate::vf::Vf;

/// The three standard map names loaded as one logical concatenation.
const MAP_NAMES: [&str; 3] = ["pdftex.map", "kanjix.map", "ckx.map"];

pub struct ResourceManager {
    backend: Box<dyn ResourceBackend>,
    faces: Box<dyn FaceLoader>,
    graphics: Box<dyn GraphicsLoader>,
    map: Fontmap,
    fonts: Vec<(String, FontRef)>,
    encs: Vec<(String, Option<Rc<Enc>>)>,
    outlines: Vec<(String, i32, Option<Rc<dyn OutlineFace>>)>,
    pdfs: Vec<(String, Option<Rc<dyn PdfDocument>>)>,
    images: Vec<(String, Option<Rc<dyn RasterImage>>)>,
}

impl ResourceManager {
    pub fn new(
        mut backend: Box<dyn ResourceBackend>,
        faces: Box<dyn FaceLoader>,
        graphics: Box<dyn GraphicsLoader>,
    ) -> ResourceManager {
        let sources: Vec<Option<Vec<u8>>> = MAP_NAMES
            .iter()
            .map(|name| backend.open_file(ResKind::Map, name))
            .collect();
        let map = Fontmap::load(&sources);
        info!(target: "dvi.res", entries = map.len(), "fontmap loaded");
        ResourceManager {
            backend,
            faces,
            graphics,
            map,
            fonts: Vec::new(),
            encs: Vec::new(),
            outlines: Vec::new(),
            pdfs: Vec::new(),
            images: Vec::new(),
        }
    }

    fn open_file(&mut self, kind: ResKind, name: &str) -> Option<Vec<u8>> {
        self.backend.open_file(kind, name)
    }

    fn get_enc(&mut self, name: &str) -> Option<Rc<Enc>> {
        if let Some((_, enc)) = self.encs.iter().find(|(n, _)| n == name) {
            return enc.clone();
        }
        let enc = self
            .open_file(ResKind::Enc, name)
            .map(|data| Rc::new(Enc::load(&data)));
        if enc.is_none() {
            warn!(target: "dvi.res", name, "encoding not found");
        }
        self.encs.push((name.to_owned(), enc.clone()));
        enc
    }

    fn get_outline(&mut self, name: &str, index: i32) -> Option<Rc<dyn OutlineFace>> {
        if let Some((_, _, face)) = self
            .outlines
            .iter()
            .find(|(n, i, _)| n == name && *i == index)
        {
            return face.clone();
        }
        info!(target: "dvi.res", name, index, "loading font");
        let face = self
            .open_file(ResKind::Font, name)
            .and_then(|data| self.faces.load_face(data, index));
        if face.is_none() {
            warn!(target: "dvi.res", name, "outline font not found");
        }
        self.outlines.push((name.to_owned(), index, face.clone()));
        face
    }

    /// The metric font called `name`, binding TFM + encoding + outline (per
    /// the fontmap) and virtual font. Every lookup after the first is a
    /// cache hit, whatever succeeded or failed during the load.
    pub fn get_tex_font(&mut self, name: &str) -> FontRef {
        if let Some((_, font)) = self.fonts.iter().find(|(n, _)| n == name) {
            return font.clone();
        }

        let mut font = DviFont {
            name: name.to_owned(),
            tfm: None,
            enc: None,
            vf: None,
            face: None,
            glyph_map: None,
        };

        if let Some(entry) = self.map.lookup(name).cloned() {
            if let Some(font_file) = &entry.font_file {
                font.face = self.get_outline(font_file, 0);
                if let Some(enc_file) = &entry.enc_file {
                    font.enc = self.get_enc(enc_file);
                }
            }
        }

        match self.open_file(ResKind::Tfm, name) {
            Some(data) => match Tfm::load(&data) {
                Ok(tfm) => font.tfm = Some(Rc::new(tfm)),
                Err(err) => {
                    warn!(target: "dvi.res", name, %err, "ignoring metrics")
                }
            },
            None => warn!(target: "dvi.res", name, "no TFM file"),
        }

        let font = Rc::new(RefCell::new(font));
        // The cell registers before the VF loads so embedded definitions can
        // resolve fonts (including, pathologically, this one).
        self.fonts.push((name.to_owned(), font.clone()));

        if let Some(data) = self.open_file(ResKind::Vf, name) {
            match Vf::load(data, |fonts, def| {
                let resolved = self.get_tex_font(def.name);
                fonts.borrow_mut().set(
                    def.font_id,
                    FontDef::Tex {
                        font: resolved,
                        spec: FontSpec {
                            checksum: def.checksum,
                            scale_factor: def.scale_factor,
                            design_size: def.design_size,
                        },
                    },
                );
            }) {
                Ok(vf) => font.borrow_mut().vf = Some(Rc::new(vf)),
                Err(err) => warn!(target: "dvi.res", name, %err, "skipping virtual font"),
            }
        }

        {
            let f = font.borrow();
            if f.vf.is_none() && f.face.is_none() {
                warn!(target: "dvi.res", name, "no font file nor VF file found");
            }
        }

        font
    }

    /// A native (XDV) font: an outline face addressed by file name and
    /// sub-index (TTC face).
    pub fn get_xdv_font(&mut self, name: &str, index: i32) -> Option<Rc<dyn OutlineFace>> {
        self.get_outline(name, index)
    }

    pub fn get_pdf(&mut self, filename: &str) -> Option<Rc<dyn PdfDocument>> {
        if let Some((_, doc)) = self.pdfs.iter().find(|(n, _)| n == filename) {
            return doc.clone();
        }
        let doc = self
            .open_file(ResKind::Pdf, filename)
            .and_then(|data| self.graphics.load_pdf(data));
        if doc.is_none() {
            warn!(target: "dvi.res", filename, "cannot open PDF");
        }
        self.pdfs.push((filename.to_owned(), doc.clone()));
        doc
    }

    pub fn get_image(&mut self, filename: &str) -> Option<Rc<dyn RasterImage>> {
        if let Some((_, img)) = self.images.iter().find(|(n, _)| n == filename) {
            return img.clone();
        }
        let img = self.graphics.load_image(filename);
        if img.is_none() {
            warn!(target: "dvi.res", filename, "cannot open image");
        }
        self.images.push((filename.to_owned(), img.clone()));
        img
    }

    /// Drop the first cached entry matching `(kind, name)` so the next
    /// lookup reloads it. Invalidating the fontmap is illegal.
    pub fn invalidate(&mut self, kind: ResKind, name: &str) {
        match kind {
            ResKind::Pdf => {
                if let Some(i) = self.pdfs.iter().position(|(n, _)| n == name) {
                    self.pdfs.remove(i);
                }
            }
            ResKind::Enc => {
                if let Some(i) = self.encs.iter().position(|(n, _)| n == name) {
                    self.encs.remove(i);
                }
            }
            ResKind::Map => panic!("invalidate: font maps cannot be invalidated"),
            ResKind::Tfm | ResKind::Vf => {
                if let Some(i) = self.fonts.iter().position(|(n, _)| n == name) {
                    self.fonts.remove(i);
                }
            }
            ResKind::Font => {
                if let Some(i) = self.outlines.iter().position(|(n, _, _)| n == name) {
                    self.outlines.remove(i);
                }
            }
        }
    }
}
