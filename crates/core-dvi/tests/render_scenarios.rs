//! End-to-end interpretation scenarios over synthetic DVI streams.

use std::rc::Rc;

use core_dvi::backend::{
    FaceLoader, GraphicsLoader, OutlineFace, PdfDocument, RasterImage, ResKind, ResourceBackend,
};
use core_dvi::display::DisplayItem;
use core_dvi::geom::Rect;
use core_dvi::resmanager::ResourceManager;
use core_dvi::IncDvi;

// --- Stub back end -----------------------------------------------------------

struct StubFace;

impl OutlineFace for StubFace {
    fn glyph_by_name(&self, _name: &str) -> Option<i32> {
        Some(1)
    }

    fn glyph_by_unicode(&self, c: u32) -> Option<i32> {
        Some(c as i32)
    }

    fn glyph_bounds(&self, _glyph: i32) -> Rect {
        Rect::new(0.0, 0.0, 1.0, 1.0)
    }
}

struct StubBackend;

impl ResourceBackend for StubBackend {
    fn open_file(&mut self, kind: ResKind, name: &str) -> Option<Vec<u8>> {
        match (kind, name) {
            (ResKind::Map, "pdftex.map") => Some(b"stub <stub.pfb\n".to_vec()),
            (ResKind::Tfm, "stub") => Some(sample_tfm()),
            (ResKind::Font, "stub.pfb") => Some(vec![0u8; 4]),
            _ => None,
        }
    }
}

impl FaceLoader for StubBackend {
    fn load_face(&mut self, _data: Vec<u8>, _index: i32) -> Option<Rc<dyn OutlineFace>> {
        Some(Rc::new(StubFace))
    }
}

impl GraphicsLoader for StubBackend {
    fn load_pdf(&mut self, _data: Vec<u8>) -> Option<Rc<dyn PdfDocument>> {
        None
    }

    fn load_image(&mut self, _path: &str) -> Option<Rc<dyn RasterImage>> {
        None
    }
}

fn new_incdvi() -> IncDvi {
    IncDvi::new(ResourceManager::new(
        Box::new(StubBackend),
        Box::new(StubBackend),
        Box::new(StubBackend),
    ))
}

/// Minimal TFM for chars 'A'..='B' with design size 10pt.
fn sample_tfm() -> Vec<u8> {
    let bc = 65u16;
    let ec = 66u16;
    let lh = 2u16;
    let (nw, nh, nd, ni, nl, nk, ne, np) = (2u16, 2u16, 2u16, 1u16, 0u16, 0u16, 0u16, 0u16);
    let lf = 6 + lh + (ec - bc + 1) + nw + nh + nd + ni + nl + nk + ne + np;

    let mut out = Vec::new();
    for v in [lf, lh, bc, ec, nw, nh, nd, ni, nl, nk, ne, np] {
        out.extend_from_slice(&v.to_be_bytes());
    }
    let mut word = |v: i32| out.extend_from_slice(&v.to_be_bytes());
    word(0xCAFE);
    word(10 << 20);
    word(((1 << 24) | (1 << 20) | (1 << 16)) as i32);
    word(((1 << 24) | (1 << 20)) as i32);
    word(0);
    word(1 << 19); // width 0.5
    word(0);
    word((7 << 20) / 10);
    word(0);
    word((2 << 20) / 10);
    word(0);
    out
}

// --- Stream builders ---------------------------------------------------------

const PRE: u8 = 247;
const BOP: u8 = 139;
const EOP: u8 = 140;
const NOP: u8 = 138;
const FNT_DEF1: u8 = 243;
const FNT_NUM_0: u8 = 171;
const SET_CHAR_A: u8 = 65;
const XXX1: u8 = 239;
const POST: u8 = 248;

fn preamble() -> Vec<u8> {
    // i=2, num=1, den=1000, mag=1000, comment "hello"
    let mut out = vec![PRE, 2];
    out.extend_from_slice(&0x0183_92C0u32.to_be_bytes());
    out.extend_from_slice(&0x0000_03E8u32.to_be_bytes());
    out.extend_from_slice(&0x0000_03E8u32.to_be_bytes());
    out.push(5);
    out.extend_from_slice(b"hello");
    out
}

fn push_bop(out: &mut Vec<u8>) {
    out.push(BOP);
    out.extend_from_slice(&[0u8; 40]);
    out.extend_from_slice(&(-1i32).to_be_bytes());
}

fn push_special(out: &mut Vec<u8>, text: &str) {
    out.push(XXX1);
    out.push(text.len() as u8);
    out.extend_from_slice(text.as_bytes());
}

fn push_fnt_def(out: &mut Vec<u8>, f: u8, name: &str) {
    out.push(FNT_DEF1);
    out.push(f);
    out.extend_from_slice(&0xCAFEu32.to_be_bytes()); // checksum
    out.extend_from_slice(&(1u32 << 20).to_be_bytes()); // scale 1.0
    out.extend_from_slice(&(10u32 << 20).to_be_bytes()); // design 10.0
    out.push(0);
    out.push(name.len() as u8);
    out.extend_from_slice(name.as_bytes());
}

// --- Scenarios ---------------------------------------------------------------

#[test]
fn pre_decoding() {
    // The PRE fixture: i=2 num=25400000 den=1000 mag=1000 comment "hello".
    let buf = preamble();
    let mut inc = new_incdvi();
    inc.update(&buf);
    assert_eq!(inc.page_count(), 0);
    // Scale factor reports 1.0 until a page exists; force one to read it.
    let mut buf2 = buf.clone();
    push_bop(&mut buf2);
    buf2.push(EOP);
    inc.update(&buf2);
    let expected = 25400000.0f64 / 254000.0 * (72.27 / 1000.0) * (1000.0 / 1000.0) * 800.0 / 803.0;
    assert!((f64::from(inc.tex_scale_factor()) - expected).abs() < 1e-6);
}

#[test]
fn one_page_document() {
    let mut buf = preamble();
    push_bop(&mut buf);
    buf.push(NOP);
    buf.push(EOP);
    buf.push(POST);
    let mut inc = new_incdvi();
    inc.update(&buf);
    assert_eq!(inc.page_count(), 1);

    let dim = inc.page_dim(&buf, 0);
    assert_eq!((dim.width, dim.height, dim.landscape), (612.0, 792.0, false));

    let list = inc.render_page(&buf, 0);
    assert!(list.is_empty(), "an empty page draws nothing");
}

#[test]
fn color_push_wraps_glyph() {
    let mut buf = preamble();
    push_bop(&mut buf);
    push_fnt_def(&mut buf, 0, "stub");
    buf.push(FNT_NUM_0);
    push_special(&mut buf, "color push rgb 1 0 0");
    buf.push(SET_CHAR_A);
    push_special(&mut buf, "color pop");
    buf.push(EOP);

    let mut inc = new_incdvi();
    inc.update(&buf);
    assert_eq!(inc.page_count(), 1);
    let list = inc.render_page(&buf, 0);

    let texts: Vec<_> = list
        .items
        .iter()
        .filter_map(|item| match item {
            DisplayItem::Text { glyphs, color } => Some((glyphs, color)),
            _ => None,
        })
        .collect();
    assert_eq!(texts.len(), 1);
    let (glyphs, color) = &texts[0];
    assert_eq!(**color, [1.0, 0.0, 0.0]);
    assert_eq!(glyphs.len(), 1);
    assert_eq!(glyphs[0].ucs, u32::from(SET_CHAR_A));
    // After the pop the default color stack is balanced again, so a second
    // render starts from black.
    let list2 = inc.render_page(&buf, 0);
    assert_eq!(list2.items.len(), list.items.len());
}

#[test]
fn landscape_page_swaps_dimensions() {
    let mut buf = preamble();
    push_bop(&mut buf);
    push_special(&mut buf, "landscape");
    buf.push(NOP);
    buf.push(EOP);
    let mut inc = new_incdvi();
    inc.update(&buf);
    let dim = inc.page_dim(&buf, 0);
    assert_eq!((dim.width, dim.height, dim.landscape), (792.0, 612.0, true));
}

#[test]
fn pagesize_special_overrides_dimensions() {
    let mut buf = preamble();
    push_bop(&mut buf);
    push_special(&mut buf, "pdf: pagesize width 803pt height 1606pt");
    buf.push(NOP);
    buf.push(EOP);
    let mut inc = new_incdvi();
    inc.update(&buf);
    let dim = inc.page_dim(&buf, 0);
    assert!((dim.width - 800.0).abs() < 1e-3);
    assert!((dim.height - 1600.0).abs() < 1e-3);
}

#[test]
fn set_char_advances_by_tfm_width() {
    // Two glyphs: the second sits 0.5 * scale_factor to the right.
    let mut buf = preamble();
    push_bop(&mut buf);
    push_fnt_def(&mut buf, 0, "stub");
    buf.push(FNT_NUM_0);
    buf.push(SET_CHAR_A);
    buf.push(SET_CHAR_A);
    buf.push(EOP);

    let mut inc = new_incdvi();
    inc.update(&buf);
    let list = inc.render_page(&buf, 0);
    let glyphs = list
        .items
        .iter()
        .find_map(|item| match item {
            DisplayItem::Text { glyphs, .. } => Some(glyphs),
            _ => None,
        })
        .expect("glyph run recorded");
    assert_eq!(glyphs.len(), 2);
    let dx = glyphs[1].ctm.e - glyphs[0].ctm.e;
    // 0.5 em at scale factor 1.0 in DVI units, times the document scale.
    // Single-precision coordinates this large round to about a quarter
    // point, so the comparison stays coarse.
    let expected = 0.5 * f64::from(1u32 << 20) * f64::from(inc.tex_scale_factor());
    assert!((f64::from(dx) - expected).abs() < 1.0, "dx={dx} expected={expected}");
}
