//! Display lists and the path/stroke model the interpreter records into.
//!
//! A page render produces one [`DisplayList`]; the windowed renderer (out of
//! this crate) replays it into pixels. Glyph items carry the SyncTeX source
//! position and box metrics recorded at typesetting time so backward search
//! and text selection need no second interpretation pass.

use std::rc::Rc;

use crate::backend::{OutlineFace, PdfDocument, RasterImage};
use crate::geom::Matrix;

/// Path element in user space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathEl {
    MoveTo(f32, f32),
    LineTo(f32, f32),
    CurveTo(f32, f32, f32, f32, f32, f32),
    Close,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Path {
    pub elements: Vec<PathEl>,
}

impl Path {
    pub fn new() -> Path {
        Path::default()
    }

    pub fn move_to(&mut self, x: f32, y: f32) {
        self.elements.push(PathEl::MoveTo(x, y));
    }

    pub fn line_to(&mut self, x: f32, y: f32) {
        self.elements.push(PathEl::LineTo(x, y));
    }

    pub fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x3: f32, y3: f32) {
        self.elements.push(PathEl::CurveTo(x1, y1, x2, y2, x3, y3));
    }

    pub fn close(&mut self) {
        self.elements.push(PathEl::Close);
    }

    pub fn rect(&mut self, x0: f32, y0: f32, x1: f32, y1: f32) {
        self.move_to(x0, y0);
        self.line_to(x1, y0);
        self.line_to(x1, y1);
        self.line_to(x0, y1);
        self.close();
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineJoin {
    #[default]
    Miter,
    Round,
    Bevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineCaps {
    #[default]
    Butt,
    Round,
    Square,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrokeState {
    pub line_width: f32,
    pub miter_limit: f32,
    pub line_join: LineJoin,
    pub line_caps: LineCaps,
    pub dash: [f32; 4],
    pub dash_len: usize,
    pub dash_phase: f32,
}

impl Default for StrokeState {
    fn default() -> Self {
        StrokeState {
            line_width: 1.0,
            miter_limit: 10.0,
            line_join: LineJoin::Miter,
            line_caps: LineCaps::Butt,
            dash: [0.0; 4],
            dash_len: 0,
            dash_phase: 0.0,
        }
    }
}

/// SyncTeX source position attached to typeset glyphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncPos {
    pub file: i32,
    pub line: i32,
}

/// One glyph of a text run. `ucs` is the originating character when known
/// (used for copy-paste), `metrics` the TFM box when the glyph came from a
/// metric font.
#[derive(Clone)]
pub struct TextGlyph {
    pub face: Rc<dyn OutlineFace>,
    pub ctm: Matrix,
    pub glyph: i32,
    pub ucs: u32,
    pub sync: SyncPos,
    pub metrics: Option<GlyphMetrics>,
}

/// Width/height/depth of a glyph box, in device units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GlyphMetrics {
    pub width: f32,
    pub height: f32,
    pub depth: f32,
}

pub enum DisplayItem {
    /// A run of glyphs filled with one color.
    Text {
        glyphs: Vec<TextGlyph>,
        color: [f32; 3],
    },
    FillPath {
        path: Path,
        even_odd: bool,
        ctm: Matrix,
        color: [f32; 3],
    },
    StrokePath {
        path: Path,
        stroke: StrokeState,
        ctm: Matrix,
        color: [f32; 3],
    },
    ClipPath {
        path: Path,
        even_odd: bool,
        ctm: Matrix,
    },
    PopClip,
    Image {
        image: Rc<dyn RasterImage>,
        ctm: Matrix,
    },
    PdfPage {
        doc: Rc<dyn PdfDocument>,
        page: i32,
        ctm: Matrix,
    },
}

/// Recorded drawing commands for one page.
#[derive(Default)]
pub struct DisplayList {
    pub items: Vec<DisplayItem>,
    pub width: f32,
    pub height: f32,
}

impl DisplayList {
    pub fn new(width: f32, height: f32) -> DisplayList {
        DisplayList {
            items: Vec::new(),
            width,
            height,
        }
    }

    pub fn push(&mut self, item: DisplayItem) {
        self.items.push(item);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
