//! `\special` directives.
//!
//! The scanner recognizes the pdfTeX/dvipdfmx color-stack family, `x:`
//! transforms, the `pdf:` family (page size, embedded graphics, transform
//! and color groups, raw PDF code) and the single-letter SyncTeX position
//! specials. Case-sensitive, leading blanks allowed. Anything else is
//! logged and skipped.

use tracing::warn;

use crate::display::DisplayItem;
use crate::geom::{Matrix, Rect};
use crate::interp::PageDim;
use crate::pdf;
use crate::state::{ColorState, Context, State};

/// Byte cursor with backtracking literal matches.
#[derive(Clone, Copy)]
pub(crate) struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Cursor<'a> {
        Cursor { buf, pos: 0 }
    }

    pub(crate) fn at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub(crate) fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos.min(self.buf.len())..]
    }

    pub(crate) fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    pub(crate) fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    pub(crate) fn skip_ws(&mut self) {
        while self.peek() == Some(b' ') {
            self.pos += 1;
        }
    }

    /// At least one blank.
    pub(crate) fn ws1(&mut self) -> bool {
        if self.peek() != Some(b' ') {
            return false;
        }
        self.skip_ws();
        true
    }

    pub(crate) fn literal(&mut self, s: &str) -> bool {
        if self.rest().starts_with(s.as_bytes()) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    pub(crate) fn nat(&mut self) -> Option<i32> {
        let mut any = false;
        let mut result: i64 = 0;
        while let Some(c @ b'0'..=b'9') = self.peek() {
            any = true;
            result = result * 10 + i64::from(c - b'0');
            self.pos += 1;
        }
        if any {
            Some(result as i32)
        } else {
            None
        }
    }

    pub(crate) fn int(&mut self) -> Option<i32> {
        let save = *self;
        let neg = self.literal("-");
        match self.nat() {
            Some(n) => Some(if neg { -n } else { n }),
            None => {
                *self = save;
                None
            }
        }
    }

    pub(crate) fn float(&mut self) -> Option<f32> {
        let save = *self;
        let neg = self.literal("-");
        let mut any = false;
        let mut result: f64 = 0.0;
        while let Some(c @ b'0'..=b'9') = self.peek() {
            any = true;
            result = result * 10.0 + f64::from(c - b'0');
            self.pos += 1;
        }
        if !any {
            *self = save;
            return None;
        }
        if self.literal(".") {
            let mut place = 0.1;
            while let Some(c @ b'0'..=b'9') = self.peek() {
                result += place * f64::from(c - b'0');
                place /= 10.0;
                self.pos += 1;
            }
        }
        Some(if neg { -result as f32 } else { result as f32 })
    }

    /// A dimension: float, optional `true` prefix (ignored), unit factor,
    /// and the 800/803 metric correction shared with the DVI scale.
    pub(crate) fn dim(&mut self) -> Option<f32> {
        let value = self.float()?;
        let _ = self.literal("true");
        let unit = if self.literal("pt") {
            1.0
        } else if self.literal("mm") {
            2.845274
        } else if self.literal("cm") {
            28.45274
        } else if self.literal("in") {
            72.27
        } else {
            1.0
        };
        Some(value * unit * 800.0 / 803.0)
    }
}

pub(crate) fn set_gray(color: &mut [f32; 3], g: f32) {
    *color = [g, g, g];
}

pub(crate) fn set_rgb(color: &mut [f32; 3], r: f32, g: f32, b: f32) {
    *color = [r, g, b];
}

pub(crate) fn set_cmyk(color: &mut [f32; 3], c: f32, m: f32, y: f32, k: f32) {
    *color = [
        (1.0 - c) * (1.0 - k),
        (1.0 - m) * (1.0 - k),
        (1.0 - y) * (1.0 - k),
    ];
}

/// `gray <f>` or `rgb <f> <f> <f>`, setting both fill and line.
fn parse_color(colors: &mut ColorState, cur: &mut Cursor) -> bool {
    cur.skip_ws();
    let mut color = [0.0f32; 3];
    if cur.literal("gray") {
        if !cur.ws1() {
            return unhandled("color", cur);
        }
        match cur.float() {
            Some(g) => set_gray(&mut color, g),
            None => return unhandled("color", cur),
        }
    } else if cur.literal("rgb") {
        let ok = (|| {
            cur.ws1();
            let r = cur.float()?;
            cur.ws1();
            let g = cur.float()?;
            cur.ws1();
            let b = cur.float()?;
            Some((r, g, b))
        })();
        match ok {
            Some((r, g, b)) => set_rgb(&mut color, r, g, b),
            None => return unhandled("color", cur),
        }
    } else {
        return unhandled("color", cur);
    }
    colors.fill = color;
    colors.line = color;
    true
}

/// The parenthesized pdfcolorstack color expression: floats followed by one
/// of the PDF color operators `g G rg RG k K`.
fn parse_pdfcolor(colors: &mut ColorState, cur: &mut Cursor) -> bool {
    cur.skip_ws();
    if cur.literal(")") {
        return true;
    }
    let mut floats = Vec::new();
    loop {
        cur.skip_ws();
        match cur.float() {
            Some(f) => floats.push(f),
            None => break,
        }
    }
    cur.skip_ws();
    match (floats.len(), cur.bump()) {
        (4, Some(b'k')) => set_cmyk(&mut colors.fill, floats[0], floats[1], floats[2], floats[3]),
        (4, Some(b'K')) => set_cmyk(&mut colors.line, floats[0], floats[1], floats[2], floats[3]),
        (1, Some(b'g')) => set_gray(&mut colors.fill, floats[0]),
        (1, Some(b'G')) => set_gray(&mut colors.line, floats[0]),
        (3, Some(b'r')) => {
            if cur.bump() != Some(b'g') {
                return unhandled("pdf color", cur);
            }
            set_rgb(&mut colors.fill, floats[0], floats[1], floats[2]);
        }
        (3, Some(b'R')) => {
            if cur.bump() != Some(b'G') {
                return unhandled("pdf color", cur);
            }
            set_rgb(&mut colors.line, floats[0], floats[1], floats[2]);
        }
        _ => return unhandled("pdf color", cur),
    }
    true
}

fn unhandled(kind: &str, cur: &Cursor) -> bool {
    warn!(
        target: "dvi.interp",
        kind,
        text = %String::from_utf8_lossy(cur.rest()),
        "unhandled special"
    );
    false
}

fn colorstack_current(ctx: &mut Context, st: &mut State, index: i32) -> bool {
    ctx.flush_text(st);
    match ctx.colorstack(index) {
        Some(stack) => {
            st.gs.colors = stack.current();
            true
        }
        None => false,
    }
}

fn colorstack_push(ctx: &mut Context, st: &mut State, index: i32) -> bool {
    ctx.flush_text(st);
    let colors = st.gs.colors;
    match ctx.colorstack(index) {
        Some(stack) => {
            stack.push(colors);
            true
        }
        None => false,
    }
}

fn colorstack_pop(ctx: &mut Context, st: &mut State, index: i32) -> bool {
    ctx.flush_text(st);
    match ctx.colorstack(index) {
        Some(stack) => match stack.pop() {
            Some(colors) => {
                st.gs.colors = colors;
                true
            }
            None => {
                warn!(target: "dvi.interp", index, "color stack pop on empty stack");
                false
            }
        },
        None => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PageBox {
    Undefined,
    Media,
    Crop,
    Art,
    Bleed,
    Trim,
}

/// A `x:`/`pdf:` transform specification.
pub(crate) struct XformSpec {
    pub ctm: Matrix,
    pub width: f32,
    pub height: f32,
    pub depth: f32,
    pub bbox: Rect,
    pub page: i32,
    pub clip: i32,
    pub pagebox: PageBox,
}

impl Default for XformSpec {
    fn default() -> Self {
        XformSpec {
            ctm: Matrix::IDENTITY,
            width: f32::NAN,
            height: f32::NAN,
            depth: f32::NAN,
            bbox: Rect::INFINITE,
            page: -1,
            clip: 0,
            pagebox: PageBox::Undefined,
        }
    }
}

/// Parse transform keywords until something unrecognized; scale and
/// rotation compose into the spec's matrix at the end.
pub(crate) fn parse_xform(xf: &mut XformSpec, cur: &mut Cursor) {
    let mut rotate = 0.0f32;
    let mut sx = 1.0f32;
    let mut sy = 1.0f32;

    loop {
        cur.skip_ws();
        if cur.at_end() {
            break;
        }
        let save = *cur;
        if cur.literal("rotate") && cur.ws1() {
            match cur.float() {
                Some(f) => {
                    rotate = f;
                    continue;
                }
                None => {}
            }
        }
        *cur = save;
        if cur.literal("clip") && cur.ws1() {
            if let Some(i) = cur.int() {
                xf.clip = i;
                continue;
            }
        }
        *cur = save;
        if cur.literal("xscale") && cur.ws1() {
            if let Some(f) = cur.float() {
                sx = f;
                continue;
            }
        }
        *cur = save;
        if cur.literal("yscale") && cur.ws1() {
            if let Some(f) = cur.float() {
                sy = f;
                continue;
            }
        }
        *cur = save;
        if cur.literal("scale") && cur.ws1() {
            if let Some(f) = cur.float() {
                sx = f;
                sy = f;
                continue;
            }
        }
        *cur = save;
        if cur.literal("width") && cur.ws1() {
            if let Some(d) = cur.dim() {
                xf.width = d;
                continue;
            }
        }
        *cur = save;
        if cur.literal("height") && cur.ws1() {
            if let Some(d) = cur.dim() {
                xf.height = d;
                continue;
            }
        }
        *cur = save;
        if cur.literal("depth") && cur.ws1() {
            if let Some(d) = cur.dim() {
                xf.depth = d;
                continue;
            }
        }
        *cur = save;
        if cur.literal("bbox") && cur.ws1() {
            let parsed = (|| {
                let x0 = cur.float()?;
                cur.ws1();
                let x1 = cur.float()?;
                cur.ws1();
                let y0 = cur.float()?;
                cur.ws1();
                let y1 = cur.float()?;
                Some((x0, x1, y0, y1))
            })();
            if let Some((x0, x1, y0, y1)) = parsed {
                xf.bbox = Rect::new(x0, y0, x1, y1);
                continue;
            }
        }
        *cur = save;
        if cur.literal("pagebox") && cur.ws1() {
            let pagebox = if cur.literal("mediabox") {
                Some(PageBox::Media)
            } else if cur.literal("cropbox") {
                Some(PageBox::Crop)
            } else if cur.literal("artbox") {
                Some(PageBox::Art)
            } else if cur.literal("bleedbox") {
                Some(PageBox::Bleed)
            } else if cur.literal("trimbox") {
                Some(PageBox::Trim)
            } else {
                None
            };
            if let Some(p) = pagebox {
                xf.pagebox = p;
                continue;
            }
        }
        *cur = save;
        if cur.literal("page") && cur.ws1() {
            if let Some(n) = cur.nat() {
                xf.page = n;
                continue;
            }
        }
        *cur = save;
        if cur.literal("matrix") && cur.ws1() {
            let parsed = (|| {
                let a = cur.float()?;
                cur.ws1();
                let b = cur.float()?;
                cur.ws1();
                let c = cur.float()?;
                cur.ws1();
                let d = cur.float()?;
                cur.ws1();
                let e = cur.float()?;
                cur.ws1();
                let f = cur.float()?;
                Some(Matrix::new(a, b, c, d, e, f))
            })();
            if let Some(m) = parsed {
                xf.ctm = m;
                continue;
            }
        }
        *cur = save;
        break;
    }

    if sx != 1.0 || sy != 1.0 {
        xf.ctm = xf.ctm.pre_scale(sx, sy);
    }
    if rotate != 0.0 {
        xf.ctm = xf.ctm.pre_rotate(rotate);
    }
}

/// Balanced-parenthesis file name with backslash escapes; consumes the
/// closing paren.
fn parse_paren_string(cur: &mut Cursor) -> String {
    let mut out = Vec::new();
    let mut nesting = 1;
    while let Some(c) = cur.bump() {
        match c {
            b'(' => {
                nesting += 1;
                out.push(c);
            }
            b')' => {
                nesting -= 1;
                if nesting == 0 {
                    break;
                }
                out.push(c);
            }
            b'\\' => {
                if let Some(e) = cur.bump() {
                    out.push(e);
                }
            }
            _ => out.push(c),
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn embed_pdf(ctx: &mut Context, st: &mut State, xf: &XformSpec, filename: &str) -> bool {
    let doc = match ctx.resmanager.get_pdf(filename) {
        Some(doc) => doc,
        None => return false,
    };
    let page = if xf.page > 0 { xf.page - 1 } else { 0 };

    let mut mediabox = doc.media_box(page);
    if mediabox.is_empty() {
        mediabox = Rect::new(0.0, 0.0, 612.0, 792.0);
    }
    if let Some(cropbox) = doc.crop_box(page) {
        if !cropbox.is_empty() {
            mediabox = mediabox.intersect(cropbox);
        }
    }

    let ctm = ctx.get_ctm(st).flip_vertically();
    let ctm = xf.ctm.concat(ctm);
    let ctm = ctm.pre_translate(0.0, mediabox.y0 - mediabox.y1);
    ctx.push_item(DisplayItem::PdfPage { doc, page, ctm });
    true
}

fn embed_image(ctx: &mut Context, st: &mut State, xf: &XformSpec, filename: &str) -> bool {
    let img = match ctx.resmanager.get_image(filename) {
        Some(img) => img,
        None => return false,
    };
    let ctm = xf.ctm.concat(ctx.get_ctm(st));
    let ar = img.width() / img.height();
    let mut w = xf.width;
    let mut h = xf.height;
    if w.is_nan() {
        w = h * ar;
    }
    if h.is_nan() {
        h = w / ar;
    }
    let ctm = ctm.pre_translate(0.0, h).pre_scale(w, -h);
    ctx.push_item(DisplayItem::Image { image: img, ctm });
    true
}

fn embed_graphics(ctx: &mut Context, st: &mut State, xf: &XformSpec, filename: &str) -> bool {
    if !ctx.recording() {
        return true;
    }
    let ext = filename.rsplit('.').next().unwrap_or("");
    if ext.eq_ignore_ascii_case("pdf") {
        embed_pdf(ctx, st, xf, filename)
    } else {
        embed_image(ctx, st, xf, filename)
    }
}

fn pdf_btrans(ctx: &mut Context, st: &mut State, cur: &mut Cursor) -> bool {
    if !ctx.push_gs(st) {
        return false;
    }
    let ctm = ctx.get_ctm(st);
    Context::set_ctm(st, ctm);

    cur.skip_ws();
    if !cur.at_end() {
        let mut xf = XformSpec::default();
        parse_xform(&mut xf, cur);
        st.gs.ctm = xf.ctm.concat(st.gs.ctm);
    }
    if !cur.at_end() {
        return unhandled("pdf btrans transformation", cur);
    }
    true
}

fn pdf_etrans(ctx: &mut Context, st: &mut State) -> bool {
    ctx.pop_gs(st)
}

/// The `pdf:` family.
fn exec_pdf(ctx: &mut Context, st: &mut State, cur: &mut Cursor) -> bool {
    if cur.literal("pagesize") {
        // Recognized at prescan time only; nothing to do while rendering.
        return true;
    }
    if cur.literal("image") {
        cur.skip_ws();
        // Transform arguments run up to the opening paren of the file name.
        let rest = cur.rest();
        let paren = match rest.iter().position(|&c| c == b'(') {
            Some(p) => p,
            None => return unhandled("pdf image", cur),
        };
        let mut xf = XformSpec::default();
        let mut xcur = Cursor::new(&rest[..paren]);
        parse_xform(&mut xf, &mut xcur);
        xcur.skip_ws();
        if !xcur.at_end() {
            warn!(
                target: "dvi.interp",
                text = %String::from_utf8_lossy(xcur.rest()),
                "pdf image: unhandled transformation"
            );
        }
        cur.pos += paren + 1;
        let filename = parse_paren_string(cur);
        if !embed_graphics(ctx, st, &xf, &filename) {
            warn!(target: "dvi.interp", filename = filename.as_str(), "error rendering image");
            return false;
        }
        return true;
    }
    if cur.literal("begintransform") || cur.literal("btrans") {
        cur.skip_ws();
        return pdf_btrans(ctx, st, cur);
    }
    if cur.literal("endtransform") || cur.literal("etrans") {
        return pdf_etrans(ctx, st);
    }
    if cur.literal("bcontent") || cur.literal("econtent") {
        if !cur.at_end() {
            warn!(
                target: "dvi.interp",
                text = %String::from_utf8_lossy(cur.rest()),
                "unhandled pdf content"
            );
        }
        return true;
    }
    if cur.literal("begincolor") || cur.literal("bcolor") || cur.literal("bc") {
        cur.skip_ws();
        if !colorstack_push(ctx, st, -1) {
            return false;
        }
        let mut floats = Vec::new();
        if cur.literal("[") {
            loop {
                cur.skip_ws();
                match cur.float() {
                    Some(f) => floats.push(f),
                    None => break,
                }
            }
            cur.skip_ws();
            if !cur.literal("]") {
                return unhandled("pdf color group", cur);
            }
        } else {
            match cur.float() {
                Some(f) => floats.push(f),
                None => return unhandled("pdf color group", cur),
            }
        }
        match floats.len() {
            1 => set_gray(&mut st.gs.colors.fill, floats[0]),
            3 => set_rgb(&mut st.gs.colors.fill, floats[0], floats[1], floats[2]),
            4 => set_cmyk(
                &mut st.gs.colors.fill,
                floats[0],
                floats[1],
                floats[2],
                floats[3],
            ),
            _ => return unhandled("pdf color group", cur),
        }
        return true;
    }
    if cur.literal("endcolor") || cur.literal("ecolor") || cur.literal("ec") {
        return colorstack_pop(ctx, st, -1);
    }
    if cur.literal("code") {
        return pdf::pdf_code(ctx, st, cur.rest());
    }
    if cur.literal("bt") {
        cur.skip_ws();
        return pdf_btrans(ctx, st, cur);
    }
    if cur.literal("et") {
        return pdf_etrans(ctx, st);
    }
    unhandled("pdf special", cur)
}

/// Execute one special. Returns false when it was unrecognized or failed;
/// the page scan continues either way.
pub fn exec_special(ctx: &mut Context, st: &mut State, body: &[u8]) -> bool {
    let mut cur = Cursor::new(body);
    cur.skip_ws();

    if cur.literal("landscape") {
        return true;
    }

    if cur.literal("pdfcolorstackinit") {
        let parsed = (|| {
            cur.ws1();
            let index = cur.nat()?;
            cur.ws1();
            if !cur.literal("page") {
                return None;
            }
            cur.ws1();
            if !cur.literal("direct") {
                return None;
            }
            cur.ws1();
            if !cur.literal("(") {
                return None;
            }
            Some(index)
        })();
        return match parsed {
            Some(index) => {
                ctx.colorstack_init(index);
                parse_pdfcolor(&mut st.gs.colors, &mut cur)
            }
            None => unhandled("special", &cur),
        };
    }

    if cur.literal("pdfcolorstack") {
        let parsed = (|| {
            cur.ws1();
            let index = cur.nat()?;
            cur.ws1();
            Some(index)
        })();
        let index = match parsed {
            Some(i) => i,
            None => return unhandled("special", &cur),
        };
        if cur.literal("current") {
            return colorstack_current(ctx, st, index);
        }
        if cur.literal("pop") {
            return colorstack_pop(ctx, st, index);
        }
        if cur.literal("push") {
            cur.skip_ws();
            if cur.literal("(") {
                return colorstack_push(ctx, st, index)
                    && parse_pdfcolor(&mut st.gs.colors, &mut cur);
            }
        }
        return unhandled("special", &cur);
    }

    if cur.literal("color") {
        if !cur.ws1() {
            return unhandled("special", &cur);
        }
        if cur.literal("pop") {
            return colorstack_pop(ctx, st, -1);
        }
        if cur.literal("push") {
            cur.ws1();
            return colorstack_push(ctx, st, -1) && parse_color(&mut st.gs.colors, &mut cur);
        }
        return unhandled("special", &cur);
    }

    if cur.literal("x:") {
        let mut xf = XformSpec::default();
        parse_xform(&mut xf, &mut cur);
        st.gs.ctm = xf.ctm.concat(st.gs.ctm);
        if !cur.at_end() {
            return unhandled("pdf x", &cur);
        }
        return true;
    }

    if cur.literal("pdf:") {
        cur.skip_ws();
        return exec_pdf(ctx, st, &mut cur);
    }

    if cur.literal("I") {
        let parsed = (|| {
            cur.ws1();
            let i = cur.nat()?;
            cur.ws1();
            let j = cur.nat()?;
            Some((i, j))
        })();
        if let Some((file, line)) = parsed {
            ctx.sync.pos[1] = ctx.sync.pos[0];
            ctx.sync.pos[0].file = file;
            ctx.sync.pos[0].line = line;
            return true;
        }
        return unhandled("special", &cur);
    }

    if cur.literal("p") {
        let prev = ctx.sync.pos[1];
        ctx.sync.pos[1] = ctx.sync.pos[0];
        ctx.sync.pos[0] = prev;
        return true;
    }

    if cur.literal("P") {
        match cur.peek() {
            Some(c @ b'0'..=b'9') => {
                cur.bump();
                let prev = ctx.sync.pos[1];
                ctx.sync.pos[1] = ctx.sync.pos[0];
                ctx.sync.pos[0] = prev;
                ctx.sync.pos[0].line += i32::from(c - b'0');
            }
            Some(b' ') => {
                cur.skip_ws();
                match cur.nat() {
                    Some(n) => {
                        ctx.sync.pos[1] = ctx.sync.pos[0];
                        ctx.sync.pos[0].line = n;
                    }
                    None => return unhandled("special", &cur),
                }
            }
            _ => {
                let prev = ctx.sync.pos[1];
                ctx.sync.pos[1] = ctx.sync.pos[0];
                ctx.sync.pos[0] = prev;
                ctx.sync.pos[0].line += 1;
            }
        }
        return true;
    }

    if cur.literal("l") {
        ctx.sync.pos[0].line += 1;
        return true;
    }

    if cur.literal("L") {
        match cur.peek() {
            Some(c @ b'0'..=b'9') => {
                cur.bump();
                ctx.sync.pos[0].line += i32::from(c - b'0');
            }
            Some(b' ') => {
                cur.skip_ws();
                match cur.nat() {
                    Some(n) => ctx.sync.pos[0].line = n,
                    None => return unhandled("special", &cur),
                }
            }
            _ => ctx.sync.pos[0].line += 2,
        }
        return true;
    }

    unhandled("special", &cur)
}

/// Fontdef-time realization of `pdfcolorstackinit`: creates the stack and
/// seeds the current colors so later pages can reference it.
pub fn init_special(ctx: &mut Context, st: &mut State, body: &[u8]) -> bool {
    let mut cur = Cursor::new(body);
    cur.skip_ws();
    if !cur.literal("pdfcolorstackinit") {
        return false;
    }
    let parsed = (|| {
        cur.ws1();
        let index = cur.nat()?;
        cur.ws1();
        if !cur.literal("page") {
            return None;
        }
        cur.ws1();
        if !cur.literal("direct") {
            return None;
        }
        cur.ws1();
        if !cur.literal("(") {
            return None;
        }
        Some(index)
    })();
    match parsed {
        Some(index) => {
            ctx.colorstack_init(index);
            parse_pdfcolor(&mut st.gs.colors, &mut cur)
        }
        None => false,
    }
}

/// Page-size prescan of one special.
pub fn prescan_special(body: &[u8], dim: &mut PageDim) {
    let mut cur = Cursor::new(body);
    cur.skip_ws();
    if cur.literal("landscape") {
        dim.landscape = true;
        return;
    }
    if cur.literal("pdf:") {
        cur.skip_ws();
        if !cur.literal("pagesize") {
            return;
        }
        if !cur.ws1() {
            return;
        }
        if cur.literal("default") {
            dim.width = 612.0;
            dim.height = 792.0;
            return;
        }
        let parsed = (|| {
            if !cur.literal("width") {
                return None;
            }
            cur.ws1();
            let w = cur.dim()?;
            cur.ws1();
            if !cur.literal("height") {
                return None;
            }
            cur.ws1();
            let h = cur.dim()?;
            Some((w, h))
        })();
        if let Some((w, h)) = parsed {
            dim.width = w;
            dim.height = h;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NoBackend;
    use crate::resmanager::ResourceManager;

    fn test_context() -> (Context, State) {
        let rm = ResourceManager::new(
            Box::new(NoBackend),
            Box::new(NoBackend),
            Box::new(NoBackend),
        );
        let mut ctx = Context::new(rm);
        ctx.scale = 1.0;
        ctx.begin_frame(612.0, 792.0);
        let st = ctx.take_root();
        (ctx, st)
    }

    #[test]
    fn color_push_pop_round_trips() {
        let (mut ctx, mut st) = test_context();
        assert!(exec_special(&mut ctx, &mut st, b"color push rgb 1 0 0"));
        assert_eq!(st.gs.colors.fill, [1.0, 0.0, 0.0]);
        assert_eq!(ctx.colorstack(-1).unwrap().depth(), 1);
        assert!(exec_special(&mut ctx, &mut st, b"color pop"));
        assert_eq!(st.gs.colors.fill, [0.0, 0.0, 0.0]);
        assert_eq!(ctx.colorstack(-1).unwrap().depth(), 0);
    }

    #[test]
    fn pdfcolorstack_init_and_use() {
        let (mut ctx, mut st) = test_context();
        assert!(exec_special(
            &mut ctx,
            &mut st,
            b"pdfcolorstackinit 1 page direct (0 0 1 rg)"
        ));
        assert_eq!(st.gs.colors.fill, [0.0, 0.0, 1.0]);
        assert!(exec_special(&mut ctx, &mut st, b"pdfcolorstack 1 push (1 g)"));
        assert_eq!(st.gs.colors.fill, [1.0, 1.0, 1.0]);
        assert!(exec_special(&mut ctx, &mut st, b"pdfcolorstack 1 pop"));
        assert_eq!(st.gs.colors.fill, [0.0, 0.0, 1.0]);
    }

    #[test]
    fn cmyk_converts_to_rgb() {
        let (mut ctx, mut st) = test_context();
        assert!(exec_special(
            &mut ctx,
            &mut st,
            b"pdfcolorstackinit 0 page direct (1 0 0 0.5 k)"
        ));
        let c = st.gs.colors.fill;
        assert!((c[0] - 0.0).abs() < 1e-6);
        assert!((c[1] - 0.5).abs() < 1e-6);
        assert!((c[2] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn sync_position_specials() {
        let (mut ctx, mut st) = test_context();
        assert!(exec_special(&mut ctx, &mut st, b"I 2 10"));
        assert_eq!(ctx.sync.pos[0].file, 2);
        assert_eq!(ctx.sync.pos[0].line, 10);
        assert!(exec_special(&mut ctx, &mut st, b"l"));
        assert_eq!(ctx.sync.pos[0].line, 11);
        assert!(exec_special(&mut ctx, &mut st, b"L5"));
        assert_eq!(ctx.sync.pos[0].line, 16);
        assert!(exec_special(&mut ctx, &mut st, b"L 42"));
        assert_eq!(ctx.sync.pos[0].line, 42);
        // "p" swaps current and previous.
        assert!(exec_special(&mut ctx, &mut st, b"I 3 1"));
        assert!(exec_special(&mut ctx, &mut st, b"p"));
        assert_eq!(ctx.sync.pos[0].file, 2);
        assert_eq!(ctx.sync.pos[1].file, 3);
    }

    #[test]
    fn x_transform_composes_ctm() {
        let (mut ctx, mut st) = test_context();
        let before = st.gs.ctm;
        assert!(exec_special(&mut ctx, &mut st, b"x: scale 2"));
        assert_eq!(st.gs.ctm, Matrix::scale(2.0, 2.0).concat(before));
    }

    #[test]
    fn prescan_reads_pagesize() {
        let mut dim = PageDim::default();
        prescan_special(b"pdf: pagesize width 100pt height 200pt", &mut dim);
        assert!((dim.width - 100.0 * 800.0 / 803.0).abs() < 1e-3);
        assert!((dim.height - 200.0 * 800.0 / 803.0).abs() < 1e-3);
        prescan_special(b"landscape", &mut dim);
        assert!(dim.landscape);
    }

    #[test]
    fn unknown_special_is_skipped() {
        let (mut ctx, mut st) = test_context();
        assert!(!exec_special(&mut ctx, &mut st, b"ps: some dvips thing"));
    }

    #[test]
    fn dims_accept_units() {
        let mut cur = Cursor::new(b"2.5cm");
        let d = cur.dim().unwrap();
        assert!((d - 2.5 * 28.45274 * 800.0 / 803.0).abs() < 1e-3);
        let mut cur = Cursor::new(b"10truept");
        assert!((cur.dim().unwrap() - 10.0 * 800.0 / 803.0).abs() < 1e-3);
    }
}
