//! Instruction decoding and execution.
//!
//! Three entry points with distinct jobs:
//!
//! * [`instr_size`] — pure length decode. Returns the byte length of the
//!   opcode at `buf[0]`, `0` for an opcode that cannot be scanned past, or
//!   `-(n+1)` meaning "need at least `n+1` bytes" so incremental callers can
//!   wait for more output.
//! * [`interp`] / [`interp_sub`] — full semantic execution of one
//!   instruction against a state.
//! * [`interp_bop`] — prescan of the specials in a page's initial
//!   `PUSH`/`POP`/`XXX` run to learn the page size without rendering.

use core_codec::bytes::{decode_un, decode_u16, decode_u32, decode_u8};
use core_codec::{Fixed, Reader};
use tracing::warn;

use crate::display::{GlyphMetrics, SyncPos, TextGlyph};
use crate::fonttable::{FontDef, FontSpec, XdvFontSpec};
use crate::opcodes::*;
use crate::scratch::Slice;
use crate::special;
use crate::state::{Context, State, SyncGlyph};
use crate::DviVersion;

/// Size of the preamble at `buf[0]`, `0` if it is not a preamble, negative
/// "need more" otherwise.
pub fn preamble_size(buf: &[u8]) -> i32 {
    if buf.is_empty() {
        return -1;
    }
    if buf[0] != PRE {
        return 0;
    }
    if buf.len() <= 15 {
        return -16;
    }
    15 + i32::from(buf[14])
}

macro_rules! need {
    ($len:expr, $n:expr) => {
        if $len <= $n {
            return -(($n as i32) + 1);
        }
    };
}

/// Length of the instruction at `buf[0]` under `version`.
pub fn instr_size(buf: &[u8], version: DviVersion) -> i32 {
    let len = buf.len();
    need!(len, 0);

    let op = buf[0];

    if op <= SET_CHAR_127 || (FNT_NUM_0..=FNT_NUM_63).contains(&op) {
        return 1;
    }

    match op {
        SET1..=SET4 => i32::from(op - SET1) + 2,
        PUT1..=PUT4 => i32::from(op - PUT1) + 2,
        RIGHT1..=RIGHT4 => i32::from(op - RIGHT1) + 2,
        DOWN1..=DOWN4 => i32::from(op - DOWN1) + 2,
        FNT1..=FNT4 => i32::from(op - FNT1) + 2,
        W1..=W4 => i32::from(op - W1) + 2,
        X1..=X4 => i32::from(op - X1) + 2,
        Y1..=Y4 => i32::from(op - Y1) + 2,
        Z1..=Z4 => i32::from(op - Z1) + 2,

        SET_RULE | PUT_RULE => 9,

        NOP | EOP | PUSH | POP | W0 | X0 | Y0 | Z0 | PADDING | BEGIN_REFLECT | END_REFLECT => 1,

        BOP => 45,

        XXX1 => {
            need!(len, 1);
            2 + i32::from(decode_u8(&buf[1..]))
        }
        XXX2 => {
            need!(len, 2);
            3 + i32::from(decode_u16(&buf[1..]))
        }
        XXX3 => {
            need!(len, 3);
            4 + core_codec::bytes::decode_u24(&buf[1..]) as i32
        }
        XXX4 => {
            need!(len, 4);
            5 + decode_u32(&buf[1..]) as i32
        }

        FNT_DEF1..=FNT_DEF4 => {
            let offset = 14 + usize::from(op - FNT_DEF1);
            need!(len, offset + 1);
            // The two name-length bytes sit after the fixed part.
            2 + offset as i32 + i32::from(decode_u16(&buf[offset..]))
        }

        PRE => preamble_size(buf),
        POST => 29,
        POST_POST => 6,

        XDV_NATIVE_FONT_DEF => {
            need!(len, 11);
            let flags = decode_u16(&buf[9..]);
            let psname_len = buf[11];

            if flags & !XDV_FLAG_ALL != 0 {
                return 0;
            }
            let mut size = 16 + i32::from(psname_len);
            if flags & XDV_FLAG_COLORED != 0 {
                size += 4;
            }
            if flags & XDV_FLAG_EXTEND != 0 {
                size += 4;
            }
            if flags & XDV_FLAG_SLANT != 0 {
                size += 4;
            }
            if flags & XDV_FLAG_EMBOLDEN != 0 {
                size += 4;
            }
            if flags & XDV_FLAG_VARIATIONS != 0 {
                if version != DviVersion::Xdv5 {
                    return 0;
                }
                need!(len, size as usize + 2);
                let num_variations = decode_u16(&buf[size as usize..]);
                size += 2 + 4 * i32::from(num_variations);
            }
            size
        }

        XDV_GLYPHS => {
            need!(len, 6);
            let n = decode_u16(&buf[5..]);
            7 + 10 * i32::from(n)
        }

        XDV_TEXT_GLYPHS => {
            need!(len, 3);
            let l = decode_u16(&buf[1..]);
            let size = 3 + 2 * usize::from(l) + 4;
            need!(len, size + 2);
            let n = decode_u16(&buf[size..]);
            (size + 2) as i32 + 10 * i32::from(n)
        }

        _ => 0,
    }
}

/// Parse the preamble at `buf[0]`, installing the stream version and the
/// DVI→device scale into the context.
pub fn preamble_parse(ctx: &mut Context, buf: &[u8]) -> bool {
    let mut r = Reader::new(buf);
    if r.u8() != PRE {
        warn!(target: "dvi.interp", "preamble: invalid opcode");
        return false;
    }
    let i = r.u8();
    let num = r.u32();
    let den = r.u32();
    let mag = r.u32();
    let comment_len = usize::from(r.u8());
    let comment = String::from_utf8_lossy(r.bytes(comment_len)).into_owned();

    let version = match DviVersion::from_byte(i) {
        Some(v) => v,
        None => {
            warn!(target: "dvi.interp", version = i, "preamble: unknown format version");
            return false;
        }
    };
    ctx.set_root_version(version);
    ctx.scale =
        (num as f64 / 254000.0 * 72.27 / den as f64 * mag as f64 / 1000.0 * 800.0 / 803.0) as f32;
    tracing::debug!(target: "dvi.interp", version = i, num, den, mag, comment = comment.as_str(),
                    scale = ctx.scale, "preamble");
    true
}

/// Execute the instruction at `buf[0]` against the root state.
pub fn interp(ctx: &mut Context, buf: &[u8]) -> bool {
    let mut st = ctx.take_root();
    let result = interp_sub(ctx, &mut st, buf);
    ctx.put_root(st);
    result
}

/// Execute the instruction at `buf[0]` against `st`. Returns false when
/// interpretation of the stream must stop (end of page, padding, or a
/// malformed instruction).
pub fn interp_sub(ctx: &mut Context, st: &mut State, buf: &[u8]) -> bool {
    let mut r = Reader::new(buf);
    let op = r.u8();

    if op <= SET_CHAR_127 {
        exec_char(ctx, st, u32::from(op), true);
        return true;
    }

    if (FNT_NUM_0..=FNT_NUM_63).contains(&op) {
        exec_fnt_num(st, u32::from(op - FNT_NUM_0));
        return true;
    }

    match op {
        SET1..=SET4 => {
            let n = usize::from(op - SET1) + 1;
            let c = r.un(n);
            exec_char(ctx, st, c, true);
            true
        }
        PUT1..=PUT4 => {
            let n = usize::from(op - PUT1) + 1;
            let c = r.un(n);
            exec_char(ctx, st, c, false);
            true
        }
        RIGHT1..=RIGHT4 => {
            let n = usize::from(op - RIGHT1) + 1;
            st.registers.h = st.registers.h.wrapping_add(r.sn(n));
            true
        }
        W0 => {
            st.registers.h = st.registers.h.wrapping_add(st.registers.w);
            true
        }
        W1..=W4 => {
            let a = r.sn(usize::from(op - W1) + 1);
            st.registers.w = a;
            st.registers.h = st.registers.h.wrapping_add(a);
            true
        }
        X0 => {
            st.registers.h = st.registers.h.wrapping_add(st.registers.x);
            true
        }
        X1..=X4 => {
            let a = r.sn(usize::from(op - X1) + 1);
            st.registers.x = a;
            st.registers.h = st.registers.h.wrapping_add(a);
            true
        }
        DOWN1..=DOWN4 => {
            st.registers.v = st.registers.v.wrapping_add(r.sn(usize::from(op - DOWN1) + 1));
            true
        }
        Y0 => {
            st.registers.v = st.registers.v.wrapping_add(st.registers.y);
            true
        }
        Y1..=Y4 => {
            let a = r.sn(usize::from(op - Y1) + 1);
            st.registers.y = a;
            st.registers.v = st.registers.v.wrapping_add(a);
            true
        }
        Z0 => {
            st.registers.v = st.registers.v.wrapping_add(st.registers.z);
            true
        }
        Z1..=Z4 => {
            let a = r.sn(usize::from(op - Z1) + 1);
            st.registers.z = a;
            st.registers.v = st.registers.v.wrapping_add(a);
            true
        }
        FNT1..=FNT4 => {
            let f = r.un(usize::from(op - FNT1) + 1);
            exec_fnt_num(st, f);
            true
        }
        SET_RULE | PUT_RULE => {
            let h = r.u32() as i32;
            let w = r.u32() as i32;
            exec_rule(ctx, st, w, h);
            if op == SET_RULE {
                st.registers.h = st.registers.h.wrapping_add(w);
            }
            true
        }
        NOP => true,
        EOP => {
            ctx.flush_text(st);
            false
        }
        PADDING => false,
        PUSH => {
            ctx.push_registers(st);
            true
        }
        POP => {
            ctx.pop_registers(st);
            true
        }
        BEGIN_REFLECT | END_REFLECT => false,
        XXX1..=XXX4 => {
            let n = usize::from(op - XXX1) + 1;
            let k = r.un(n) as usize;
            let body = r.bytes(k);
            if !special::exec_special(ctx, st, body) {
                return false;
            }
            true
        }
        FNT_DEF1..=FNT_DEF4 => {
            let n = usize::from(op - FNT_DEF1) + 1;
            let k = r.un(n);
            let c = r.u32();
            let s = r.u32();
            let d = r.u32();
            let a = usize::from(r.u8());
            let l = usize::from(r.u8());
            let path = r.bytes(a + l);
            let name = String::from_utf8_lossy(&path[a..]).into_owned();
            exec_fnt_def(ctx, st, k, c, s, d, &name);
            true
        }
        BOP => {
            // Ten count registers and the previous-BOP pointer are skipped;
            // BOP resets the machine.
            exec_bop(st);
            true
        }
        PRE => {
            warn!(target: "dvi.interp", "unexpected preamble");
            false
        }
        POST | POST_POST => false,
        XDV_NATIVE_FONT_DEF => {
            let fontnum = r.i32() as u32;
            let mut spec = XdvFontSpec {
                size: r.fixed(),
                flags: r.u16(),
                ..XdvFontSpec::default()
            };

            let filename_len = usize::from(r.u8());
            let (fmname_len, stname_len) = if st.version == DviVersion::Xdv5 {
                (usize::from(r.u8()), usize::from(r.u8()))
            } else {
                (0, 0)
            };

            let filename = String::from_utf8_lossy(r.bytes(filename_len)).into_owned();

            let mut index = 0i32;
            if st.version == DviVersion::Xdv5 {
                r.skip(fmname_len + stname_len);
            } else {
                index = r.u32() as i32;
            }

            if spec.flags & XDV_FLAG_COLORED != 0 {
                spec.rgba = r.u32();
            }
            if spec.flags & XDV_FLAG_EXTEND != 0 {
                spec.extend = r.i32();
            }
            if spec.flags & XDV_FLAG_SLANT != 0 {
                spec.slant = r.i32();
            }
            if spec.flags & XDV_FLAG_EMBOLDEN != 0 {
                spec.bold = r.i32();
            }
            if spec.flags & XDV_FLAG_VARIATIONS != 0 {
                let variations = usize::from(r.u16());
                r.skip(variations * 4);
            }

            let face = ctx.resmanager.get_xdv_font(&filename, index);
            st.fonts
                .borrow_mut()
                .set(fontnum, FontDef::Xdv { face, spec });
            true
        }
        XDV_GLYPHS | XDV_TEXT_GLYPHS => {
            let chars: Option<Slice<u16>> = if op == XDV_TEXT_GLYPHS {
                let count = usize::from(r.u16());
                let slice = ctx.scratch.alloc::<u16>(count);
                for i in 0..count {
                    let c = r.u16();
                    ctx.scratch.set(slice, i, c);
                }
                Some(slice)
            } else {
                None
            };

            let width = r.fixed();
            let num_glyphs = usize::from(r.u16());

            let dx = ctx.scratch.alloc::<Fixed>(num_glyphs);
            let dy = ctx.scratch.alloc::<Fixed>(num_glyphs);
            for i in 0..num_glyphs {
                let x = r.fixed();
                let y = r.fixed();
                ctx.scratch.set(dx, i, x);
                ctx.scratch.set(dy, i, y);
            }
            let glyphs = ctx.scratch.alloc::<u16>(num_glyphs);
            for i in 0..num_glyphs {
                let g = r.u16();
                ctx.scratch.set(glyphs, i, g);
            }

            exec_xdv_glyphs(ctx, st, width, chars, dx, Fixed::ZERO, Some(dy), glyphs);
            true
        }
        _ => false,
    }
}

fn exec_fnt_num(st: &mut State, f: u32) {
    if st.fonts.borrow().get(f).is_none() {
        warn!(target: "dvi.interp", font = f, "fnt_num: undefined font");
    }
    st.f = f;
}

fn exec_bop(st: &mut State) {
    st.registers = Default::default();
    if st.gs_stack.depth != 0 {
        warn!(target: "dvi.interp", "beginning of page: transformation stack was not empty");
        st.gs_stack.depth = 0;
    }
    if st.registers_stack.depth != 0 {
        warn!(target: "dvi.interp", "beginning of page: register stack was not empty");
        st.registers_stack.depth = 0;
    }
}

fn exec_rule(ctx: &mut Context, st: &mut State, w: i32, h: i32) {
    if !ctx.recording() {
        return;
    }
    let x = st.registers.h - st.gs.h0;
    let y = st.registers.v - st.gs.v0;
    let s = ctx.scale;
    let mut path = crate::display::Path::new();
    path.rect(
        x as f32 * s,
        -y as f32 * s,
        (x + w) as f32 * s,
        -(y - h) as f32 * s,
    );
    let item = crate::display::DisplayItem::FillPath {
        path,
        even_odd: false,
        ctm: st.gs.ctm,
        color: st.gs.colors.fill,
    };
    ctx.push_item(item);
}

fn exec_fnt_def(ctx: &mut Context, st: &mut State, f: u32, c: u32, s: u32, d: u32, name: &str) {
    let font = ctx.resmanager.get_tex_font(name);
    st.fonts.borrow_mut().set(
        f,
        FontDef::Tex {
            font,
            spec: FontSpec {
                checksum: c,
                scale_factor: Fixed::make(s as i32),
                design_size: Fixed::make(d as i32),
            },
        },
    );
}

fn exec_char(ctx: &mut Context, st: &mut State, c: u32, set: bool) {
    let def = st.fonts.borrow().get(st.f);
    let (font, spec) = match def {
        Some(FontDef::Tex { font, spec }) => (font, spec),
        Some(FontDef::Xdv { .. }) => {
            warn!(target: "dvi.interp", "set/put char: expecting a metric font");
            return;
        }
        None => return,
    };
    let scale_factor = spec.scale_factor;

    let (face, vf, tfm) = {
        let f = font.borrow();
        if f.face.is_none() && f.vf.is_none() {
            warn!(target: "dvi.interp", font = f.name.as_str(), "no outline nor virtual font");
        }
        (f.face.clone(), f.vf.clone(), f.tfm.clone())
    };

    if let Some(face) = face {
        let glyph = font.borrow_mut().glyph_for_char(c);
        if ctx.recording() {
            let s = ctx.scale * scale_factor.0 as f32;
            let ctm = ctx.get_ctm(st).pre_scale(s, s);
            let metrics = tfm.as_ref().map(|tfm| GlyphMetrics {
                width: tfm.char_width(c as i32).mul(scale_factor).0 as f32 * ctx.scale,
                height: tfm.char_height(c as i32).0 as f32 * s,
                depth: tfm.char_depth(c as i32).0 as f32 * s,
            });
            ctx.text.push(TextGlyph {
                face,
                ctm,
                glyph,
                ucs: c,
                sync: ctx.sync.pos[0],
                metrics,
            });
        }
    } else if let Some(vf) = vf {
        match vf.get(c) {
            Some((program, width)) => {
                let mut vfst = ctx.enter_vf(st, vf.fonts(), vf.default_font(), scale_factor);
                let mut pos = 0usize;
                while pos < program.len() {
                    let size = instr_size(&program[pos..], DviVersion::Vf);
                    if size <= 0 || size as usize > program.len() - pos {
                        break;
                    }
                    if !interp_sub(ctx, &mut vfst, &program[pos..]) {
                        warn!(target: "dvi.interp", "virtual font program failed");
                        break;
                    }
                    pos += size as usize;
                }
                ctx.flush_text(&vfst);
                if set {
                    st.registers.h = st
                        .registers
                        .h
                        .wrapping_add(width.mul(scale_factor).0);
                }
                return;
            }
            None => {
                warn!(target: "dvi.interp", char = c, "virtual font: no such character");
            }
        }
    }

    if let Some(tfm) = tfm {
        let w = tfm.char_width(c as i32).mul(scale_factor);
        if ctx.sync_hook.is_some() {
            let s = ctx.scale * scale_factor.0 as f32;
            let h = tfm.char_height(c as i32);
            let d = tfm.char_depth(c as i32);
            let ctm = ctx.get_ctm(st).pre_scale(s, s);
            let glyph = SyncGlyph {
                file: ctx.sync.pos[0].file,
                line: ctx.sync.pos[0].line,
                ch: c,
                ctm,
                width: w.0 as f32 * ctx.scale,
                height: h.0 as f32 * s,
                depth: d.0 as f32 * s,
            };
            if let Some(hook) = &mut ctx.sync_hook {
                hook(glyph);
            }
        }
        if set {
            st.registers.h = st.registers.h.wrapping_add(w.0);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn exec_xdv_glyphs(
    ctx: &mut Context,
    st: &mut State,
    width: Fixed,
    chars: Option<Slice<u16>>,
    dx: Slice<Fixed>,
    dy0: Fixed,
    dy: Option<Slice<Fixed>>,
    glyphs: Slice<u16>,
) {
    let def = st.fonts.borrow().get(st.f);
    let (face, spec) = match def {
        Some(FontDef::Xdv { face, spec }) => (face, spec),
        Some(FontDef::Tex { .. }) => {
            warn!(target: "dvi.interp", "glyph run: expecting a native font");
            return;
        }
        None => return,
    };

    match face {
        Some(face) => {
            let ds = ctx.scale;
            let fs = spec.size.0 as f32 * ds;
            let sh = st.registers.h - st.gs.h0;
            let sv = st.registers.v + dy0.0 - st.gs.v0;

            for i in 0..glyphs.len() {
                let h = sh + ctx.scratch.get(dx, i).0;
                let v = match dy {
                    Some(dy) => sv + ctx.scratch.get(dy, i).0,
                    None => sv,
                };
                let glyph = i32::from(ctx.scratch.get(glyphs, i));
                let ctm = st
                    .gs
                    .ctm
                    .pre_translate(h as f32 * ds, -v as f32 * ds)
                    .pre_scale(fs, fs);
                let ucs = match chars {
                    Some(chars) if i < chars.len() => u32::from(ctx.scratch.get(chars, i)),
                    _ => 0,
                };
                if ctx.recording() {
                    ctx.text.push(TextGlyph {
                        face: face.clone(),
                        ctm,
                        glyph,
                        ucs,
                        sync: ctx.sync.pos[0],
                        metrics: None,
                    });
                }
                if ctx.sync_hook.is_some() {
                    let bounds = face.glyph_bounds(glyph);
                    let sync_ctm = st
                        .gs
                        .ctm
                        .pre_translate(
                            (h as f32 + bounds.x0 * spec.size.0 as f32) * ds,
                            -v as f32 * ds,
                        )
                        .pre_scale(fs, fs);
                    let ch = match chars {
                        Some(chars) if i < chars.len() => u32::from(ctx.scratch.get(chars, i)),
                        _ => u32::from(b' '),
                    };
                    let g = SyncGlyph {
                        file: ctx.sync.pos[0].file,
                        line: ctx.sync.pos[0].line,
                        ch,
                        ctm: sync_ctm,
                        width: bounds.x1 - bounds.x0,
                        height: bounds.y0,
                        depth: bounds.y1,
                    };
                    if let Some(hook) = &mut ctx.sync_hook {
                        hook(g);
                    }
                }
            }
        }
        None => warn!(target: "dvi.interp", "glyph run: font not found"),
    }

    st.registers.h = st.registers.h.wrapping_add(width.0);
}

/// Page dimensions from the prescan of a page's leading specials.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageDim {
    pub width: f32,
    pub height: f32,
    pub landscape: bool,
}

impl Default for PageDim {
    fn default() -> Self {
        PageDim {
            width: 612.0,
            height: 792.0,
            landscape: false,
        }
    }
}

/// Scan only the specials within the page's initial `PUSH`/`POP`/`XXX`
/// sequence to learn the page size. `buf` starts at a BOP.
pub fn interp_bop(buf: &[u8]) -> Option<PageDim> {
    if buf.is_empty() {
        return None;
    }
    assert_eq!(buf[0], BOP, "interp_bop: not at a BOP");

    let mut dim = PageDim::default();
    let len = buf.len();
    let mut pos = 45; // size of BOP

    while pos < len
        && ((XXX1..=XXX4).contains(&buf[pos]) || buf[pos] == PUSH || buf[pos] == POP)
    {
        if buf[pos] == PUSH || buf[pos] == POP {
            pos += 1;
            continue;
        }
        let n = usize::from(buf[pos] - XXX1) + 1;
        if len <= pos + n {
            return None;
        }
        pos += 1;
        let size = decode_un(&buf[pos..], n) as usize;
        pos += n;
        if len < pos + size {
            return None;
        }
        special::prescan_special(&buf[pos..pos + size], &mut dim);
        pos += size;
    }

    Some(dim)
}

/// Realize the stateful part of a fontdef-time special (color stack
/// creation) without a frame; called while replaying font definitions.
pub fn interp_init(ctx: &mut Context, buf: &[u8]) {
    if buf.is_empty() || !(XXX1..=XXX4).contains(&buf[0]) {
        return;
    }
    let n = usize::from(buf[0] - XXX1) + 1;
    if 1 + n > buf.len() {
        return;
    }
    let size = decode_un(&buf[1..], n) as usize;
    if 1 + n + size > buf.len() {
        return;
    }
    let mut st = ctx.take_root();
    special::init_special(ctx, &mut st, &buf[1 + n..1 + n + size]);
    ctx.put_root(st);
}
