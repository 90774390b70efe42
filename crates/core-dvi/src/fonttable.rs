//! Font definitions and the per-stream font table.
//!
//! Every DVI stream (the main document and each virtual-font sub-program)
//! numbers its fonts with its own dense table. Definitions bind a loaded
//! resource-manager font to the spec carried by the defining opcode.

use std::cell::RefCell;
use std::rc::Rc;

use core_codec::Fixed;
use tracing::warn;

use crate::backend::OutlineFace;
use crate::enc::Enc;
use crate::tfm::Tfm;
use crate::vf::Vf;

/// A metric font as the resource manager caches it: TFM metrics, optional
/// encoding vector and outline face from the fontmap, optional virtual font,
/// and a lazy byte-code → glyph-index map.
pub struct DviFont {
    pub name: String,
    pub tfm: Option<Rc<Tfm>>,
    pub enc: Option<Rc<Enc>>,
    pub vf: Option<Rc<Vf>>,
    pub face: Option<Rc<dyn OutlineFace>>,
    pub glyph_map: Option<Box<[i32; 256]>>,
}

impl DviFont {
    /// Glyph index for byte code `c`, consulting the encoding vector first
    /// and falling back to direct Unicode mapping. Cached per code.
    pub fn glyph_for_char(&mut self, c: u32) -> i32 {
        let face = match &self.face {
            Some(f) => f.clone(),
            None => return -1,
        };
        if c > 255 {
            warn!(target: "dvi.interp", char = c, font = self.name.as_str(), "character out of bounds");
            return face.glyph_by_unicode(c).unwrap_or(-1);
        }
        let map = self
            .glyph_map
            .get_or_insert_with(|| Box::new([-1i32; 256]));
        let cached = map[c as usize];
        if cached != -1 {
            return cached;
        }
        let name = self.enc.as_ref().and_then(|e| e.get(c as u8).map(str::to_owned));
        let glyph = match name {
            Some(name) => face.glyph_by_name(&name).unwrap_or(-1),
            None => face.glyph_by_unicode(c).unwrap_or(-1),
        };
        map[c as usize] = glyph;
        glyph
    }
}

pub type FontRef = Rc<RefCell<DviFont>>;

/// Spec of a metric font definition (FNT_DEF).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FontSpec {
    pub checksum: u32,
    pub scale_factor: Fixed,
    pub design_size: Fixed,
}

/// Spec of a native font definition (XDV_NATIVE_FONT_DEF).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct XdvFontSpec {
    pub size: Fixed,
    pub flags: u16,
    pub rgba: u32,
    pub extend: i32,
    pub slant: i32,
    pub bold: i32,
}

#[derive(Clone)]
pub enum FontDef {
    Tex {
        font: FontRef,
        spec: FontSpec,
    },
    Xdv {
        face: Option<Rc<dyn OutlineFace>>,
        spec: XdvFontSpec,
    },
}

/// Dense indexed table of font definitions for one stream.
#[derive(Default)]
pub struct FontTable {
    defs: Vec<Option<FontDef>>,
}

impl FontTable {
    pub fn new() -> FontTable {
        FontTable::default()
    }

    pub fn get(&self, index: u32) -> Option<FontDef> {
        self.defs.get(index as usize).and_then(Clone::clone)
    }

    pub fn set(&mut self, index: u32, def: FontDef) {
        let index = index as usize;
        assert!(index <= 9999, "font table index {index} out of range");
        if index >= self.defs.len() {
            self.defs.resize_with(index + 1, || None);
        }
        self.defs[index] = Some(def);
    }
}

pub type FontTableRef = Rc<RefCell<FontTable>>;
