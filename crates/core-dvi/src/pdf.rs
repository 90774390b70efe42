//! PDF content-stream subset driven by `pdf:code` specials.
//!
//! A lexer reads PDF object syntax onto a value stack; operators execute by
//! popping their arguments. Only the graphics-state, path, paint and clip
//! operators act; everything else is logged and ignored. A malformed stream
//! abandons the special without touching interpreter state beyond what
//! already executed.

use thiserror::Error;
use tracing::warn;

use crate::display::{DisplayItem, StrokeState};
use crate::state::{Context, State};

#[derive(Debug, Error)]
pub enum PdfError {
    #[error("pdf lexer: unterminated string")]
    UnterminatedString,
    #[error("pdf lexer: unterminated hex string")]
    UnterminatedHexString,
    #[error("pdf lexer: NUL byte in name")]
    NulInName,
    #[error("pdf lexer: invalid input at byte {0}")]
    InvalidInput(usize),
    #[error("pdf lexer: inline images are not supported")]
    InlineImage,
    #[error("pdf exec: {0} needs {1} arguments")]
    Arity(&'static str, usize),
    #[error("pdf exec: q/Q nesting error")]
    Nesting,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f32),
    Bool(bool),
    String(Vec<u8>),
    Name(String),
    Null,
    Ref(u32, u32),
    Array(Vec<Value>),
    Dict(Vec<Value>),
}

impl Value {
    fn number(&self) -> Option<f32> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum PdfOp {
    w, J, j, M, d, ri, i, gs, q, Q, cm,
    m, l, c, v, y, h, re,
    S, s, f, F, f_star, B, B_star, b, b_star, n,
    W, W_star,
    BT, ET, Tc, Tw, Tz, TL, Tf, Tr, Ts, Td, TD, Tm, T_star, Tj, TJ,
    squote, dquote, d0, d1,
    CS, cs, SC, sc, SCN, scn,
    G, g, RG, rg, K, k,
    sh, Do, MP, DP, BMC, BDC, EMC, BX, EX,
}

impl PdfOp {
    pub fn name(self) -> &'static str {
        use PdfOp::*;
        match self {
            w => "w", J => "J", j => "j", M => "M", d => "d", ri => "ri", i => "i",
            gs => "gs", q => "q", Q => "Q", cm => "cm", m => "m", l => "l", c => "c",
            v => "v", y => "y", h => "h", re => "re", S => "S", s => "s", f => "f",
            F => "F", f_star => "f*", B => "B", B_star => "B*", b => "b",
            b_star => "b*", n => "n", W => "W", W_star => "W*", BT => "BT",
            ET => "ET", Tc => "Tc", Tw => "Tw", Tz => "Tz", TL => "TL", Tf => "Tf",
            Tr => "Tr", Ts => "Ts", Td => "Td", TD => "TD", Tm => "Tm",
            T_star => "T*", Tj => "Tj", TJ => "TJ", squote => "'", dquote => "''",
            d0 => "d0", d1 => "d1", CS => "CS", cs => "cs", SC => "SC", sc => "sc",
            SCN => "SCN", scn => "scn", G => "G", g => "g", RG => "RG", rg => "rg",
            K => "K", k => "k", sh => "sh", Do => "Do", MP => "MP", DP => "DP",
            BMC => "BMC", BDC => "BDC", EMC => "EMC", BX => "BX", EX => "EX",
        }
    }
}

fn is_ws(c: u8) -> bool {
    matches!(c, b' ' | b'\r' | b'\n' | b'\t' | b'\x0c' | b'\0')
}

fn is_delim(c: u8) -> bool {
    matches!(c, b'[' | b']' | b'(' | b')' | b'/' | b'%' | b'>' | b'<')
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(10 + c - b'a'),
        b'A'..=b'F' => Some(10 + c - b'A'),
        _ => None,
    }
}

pub struct Lexer<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(buf: &'a [u8]) -> Lexer<'a> {
        Lexer { buf, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn starts(&mut self, s: &[u8]) -> bool {
        if self.buf[self.pos..].starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn parse_string(&mut self) -> Result<Vec<u8>, PdfError> {
        let mut out = Vec::new();
        let mut nesting = 1;
        while let Some(c) = self.bump() {
            match c {
                b'(' => {
                    nesting += 1;
                    out.push(c);
                }
                b')' => {
                    nesting -= 1;
                    if nesting == 0 {
                        return Ok(out);
                    }
                    out.push(c);
                }
                b'\r' => {
                    // EOL inside a string reads as a single newline.
                    if self.peek() == Some(b'\n') {
                        self.bump();
                    }
                    out.push(b'\n');
                }
                b'\\' => match self.bump() {
                    Some(b'n') => out.push(b'\n'),
                    Some(b'r') => out.push(b'\r'),
                    Some(b't') => out.push(b'\t'),
                    Some(b'b') => out.push(b'\x08'),
                    Some(b'f') => out.push(b'\x0c'),
                    Some(b'\n') => {}
                    Some(b'\r') => {
                        if self.peek() == Some(b'\n') {
                            self.bump();
                        }
                    }
                    Some(d @ b'0'..=b'7') => {
                        let mut v = u32::from(d - b'0');
                        for _ in 0..2 {
                            match self.peek() {
                                Some(e @ b'0'..=b'7') => {
                                    v = v * 8 + u32::from(e - b'0');
                                    self.bump();
                                }
                                _ => break,
                            }
                        }
                        out.push(v as u8);
                    }
                    Some(e) => out.push(e),
                    None => return Err(PdfError::UnterminatedString),
                },
                _ => out.push(c),
            }
        }
        Err(PdfError::UnterminatedString)
    }

    fn parse_hexstring(&mut self) -> Result<Vec<u8>, PdfError> {
        let mut out = Vec::new();
        let mut pending: Option<u8> = None;
        while let Some(c) = self.bump() {
            if is_ws(c) {
                continue;
            }
            if c == b'>' {
                if let Some(hi) = pending {
                    out.push(hi * 16);
                }
                return Ok(out);
            }
            match hex_value(c) {
                Some(v) => match pending.take() {
                    Some(hi) => out.push(hi * 16 + v),
                    None => pending = Some(v),
                },
                None => return Err(PdfError::InvalidInput(self.pos - 1)),
            }
        }
        Err(PdfError::UnterminatedHexString)
    }

    fn parse_name(&mut self) -> Result<String, PdfError> {
        let mut out = Vec::new();
        while let Some(c) = self.peek() {
            if is_ws(c) || is_delim(c) {
                break;
            }
            self.bump();
            if c == b'#' {
                let hi = self.bump().and_then(hex_value);
                let lo = self.bump().and_then(hex_value);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => {
                        let v = hi * 16 + lo;
                        if v == 0 {
                            return Err(PdfError::NulInName);
                        }
                        out.push(v);
                    }
                    _ => return Err(PdfError::NulInName),
                }
            } else {
                out.push(c);
            }
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    fn parse_number(&mut self) -> Option<f32> {
        let start = self.pos;
        let mut any = false;
        if matches!(self.peek(), Some(b'+') | Some(b'-')) {
            self.bump();
        }
        while let Some(b'0'..=b'9') = self.peek() {
            any = true;
            self.bump();
        }
        if self.peek() == Some(b'.') {
            self.bump();
            while let Some(b'0'..=b'9') = self.peek() {
                any = true;
                self.bump();
            }
        }
        if !any {
            self.pos = start;
            return None;
        }
        std::str::from_utf8(&self.buf[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
    }

    /// Try `nat ws+ nat ws+ R` (an indirect reference).
    fn parse_ref(&mut self) -> Option<(u32, u32)> {
        let start = self.pos;
        let nat = |lx: &mut Lexer| -> Option<u32> {
            let mut any = false;
            let mut v: u32 = 0;
            while let Some(c @ b'0'..=b'9') = lx.peek() {
                any = true;
                v = v.wrapping_mul(10).wrapping_add(u32::from(c - b'0'));
                lx.bump();
            }
            any.then_some(v)
        };
        let result = (|| {
            let num = nat(self)?;
            if !self.peek().is_some_and(is_ws) {
                return None;
            }
            while self.peek().is_some_and(is_ws) {
                self.bump();
            }
            let generation = nat(self)?;
            if !self.peek().is_some_and(is_ws) {
                return None;
            }
            while self.peek().is_some_and(is_ws) {
                self.bump();
            }
            if self.bump() != Some(b'R') {
                return None;
            }
            Some((num, generation))
        })();
        if result.is_none() {
            self.pos = start;
        }
        result
    }

    /// Lex values onto `stack` until an operator (returned) or end of input
    /// (`Ok(None)`).
    pub fn next_command(&mut self, stack: &mut Vec<Value>) -> Result<Option<PdfOp>, PdfError> {
        use PdfOp::*;
        while let Some(ch) = self.peek() {
            if is_ws(ch) {
                self.bump();
                continue;
            }
            match ch {
                b'(' => {
                    self.bump();
                    let str_val = self.parse_string()?;
                    stack.push(Value::String(str_val));
                }
                b'<' => {
                    self.bump();
                    if self.peek() == Some(b'<') {
                        self.bump();
                        stack.push(Value::Dict(Vec::new()));
                    } else {
                        let str_val = self.parse_hexstring()?;
                        stack.push(Value::String(str_val));
                    }
                }
                b'>' => {
                    self.bump();
                    if self.bump() != Some(b'>') {
                        return Err(PdfError::InvalidInput(self.pos));
                    }
                    // Collapse entries down to the opening dict marker.
                    let mut entries = Vec::new();
                    loop {
                        match stack.pop() {
                            Some(Value::Dict(dict_entries)) if dict_entries.is_empty() => break,
                            Some(item) => entries.insert(0, item),
                            None => return Err(PdfError::InvalidInput(self.pos)),
                        }
                    }
                    stack.push(Value::Dict(entries));
                }
                b'[' => {
                    self.bump();
                    stack.push(Value::Array(Vec::new()));
                }
                b']' => {
                    self.bump();
                    let mut entries = Vec::new();
                    loop {
                        match stack.pop() {
                            Some(Value::Array(arr_entries)) if arr_entries.is_empty() => break,
                            Some(item) => entries.insert(0, item),
                            None => return Err(PdfError::InvalidInput(self.pos)),
                        }
                    }
                    stack.push(Value::Array(entries));
                }
                b'/' => {
                    self.bump();
                    let name = self.parse_name()?;
                    stack.push(Value::Name(name));
                }
                b'0'..=b'9' | b'+' | b'-' | b'.' => {
                    if let Some((num, generation)) = self.parse_ref() {
                        stack.push(Value::Ref(num, generation));
                    } else {
                        match self.parse_number() {
                            Some(num) => stack.push(Value::Number(num)),
                            None => return Err(PdfError::InvalidInput(self.pos)),
                        }
                    }
                }
                _ => {
                    if self.starts(b"true") {
                        stack.push(Value::Bool(true));
                        continue;
                    }
                    if self.starts(b"false") {
                        stack.push(Value::Bool(false));
                        continue;
                    }
                    if self.starts(b"null") {
                        stack.push(Value::Null);
                        continue;
                    }
                    if self.starts(b"BI") {
                        return Err(PdfError::InlineImage);
                    }
                    // Operators, longest spelling first.
                    let table: &[(&[u8], PdfOp)] = &[
                        (b"SCN", SCN), (b"scn", scn), (b"BMC", BMC), (b"BDC", BDC),
                        (b"EMC", EMC),
                        (b"ri", ri), (b"gs", gs), (b"cm", cm), (b"re", re),
                        (b"f*", f_star), (b"B*", B_star), (b"b*", b_star),
                        (b"W*", W_star), (b"BT", BT), (b"ET", ET), (b"Tc", Tc),
                        (b"Tw", Tw), (b"Tz", Tz), (b"TL", TL), (b"Tf", Tf),
                        (b"Tr", Tr), (b"Ts", Ts), (b"Td", Td), (b"TD", TD),
                        (b"Tm", Tm), (b"T*", T_star), (b"Tj", Tj), (b"TJ", TJ),
                        (b"''", dquote), (b"d0", d0), (b"d1", d1), (b"CS", CS),
                        (b"cs", cs), (b"SC", SC), (b"sc", sc), (b"RG", RG),
                        (b"rg", rg), (b"Do", Do), (b"MP", MP), (b"DP", DP),
                        (b"BX", BX), (b"EX", EX), (b"sh", sh),
                        (b"w", w), (b"J", J), (b"j", j), (b"M", M), (b"d", d),
                        (b"i", i), (b"q", q), (b"Q", Q), (b"m", m), (b"l", l),
                        (b"c", c), (b"v", v), (b"y", y), (b"h", h), (b"S", S),
                        (b"s", s), (b"f", f), (b"F", F), (b"B", B), (b"b", b),
                        (b"n", n), (b"W", W), (b"'", squote), (b"G", G),
                        (b"g", g), (b"K", K), (b"k", k),
                    ];
                    let mut matched = None;
                    for (text, op) in table {
                        if self.starts(text) {
                            matched = Some(*op);
                            break;
                        }
                    }
                    match matched {
                        Some(op) => return Ok(Some(op)),
                        None => return Err(PdfError::InvalidInput(self.pos)),
                    }
                }
            }
        }
        Ok(None)
    }
}

fn pop_floats<const N: usize>(stack: &mut Vec<Value>, op: &'static str) -> Result<[f32; N], PdfError> {
    let mut out = [0.0f32; N];
    for slot in out.iter_mut().rev() {
        *slot = stack
            .pop()
            .and_then(|v| v.number())
            .ok_or(PdfError::Arity(op, N))?;
    }
    Ok(out)
}

fn stroke_state(st: &State, with_dash: bool) -> StrokeState {
    let mut stroke = StrokeState {
        line_width: st.gs.line_width,
        miter_limit: st.gs.miter_limit,
        line_join: st.gs.line_join,
        line_caps: st.gs.line_caps,
        ..StrokeState::default()
    };
    if with_dash {
        stroke.dash = st.gs.dash;
        stroke.dash_len = st.gs.dash_len;
        stroke.dash_phase = st.gs.dash_phase;
    }
    stroke
}

/// Execute a `pdf:code` special body.
pub fn pdf_code(ctx: &mut Context, st: &mut State, body: &[u8]) -> bool {
    match pdf_code_inner(ctx, st, body) {
        Ok(()) => true,
        Err(err) => {
            warn!(target: "dvi.interp", %err, "pdf code failed");
            false
        }
    }
}

fn pdf_code_inner(ctx: &mut Context, st: &mut State, body: &[u8]) -> Result<(), PdfError> {
    use crate::special::{set_cmyk, set_gray, set_rgb};
    use PdfOp::*;

    let mut lexer = Lexer::new(body);
    let mut stack: Vec<Value> = Vec::new();

    while let Some(op) = lexer.next_command(&mut stack)? {
        match op {
            cm => {
                let vals = pop_floats::<6>(&mut stack, "cm")?;
                let mat = crate::geom::Matrix::new(vals[0], vals[1], vals[2], vals[3], vals[4], vals[5]);
                let new = mat.concat(ctx.get_ctm(st));
                Context::set_ctm(st, new);
            }
            q => {
                if !ctx.push_gs(st) {
                    return Err(PdfError::Nesting);
                }
            }
            Q => {
                if !ctx.pop_gs(st) {
                    return Err(PdfError::Nesting);
                }
            }
            G => {
                let [vals] = pop_floats::<1>(&mut stack, "G")?;
                set_gray(&mut st.gs.colors.line, vals);
            }
            g => {
                let [vals] = pop_floats::<1>(&mut stack, "g")?;
                set_gray(&mut st.gs.colors.fill, vals);
            }
            RG => {
                let vals = pop_floats::<3>(&mut stack, "RG")?;
                set_rgb(&mut st.gs.colors.line, vals[0], vals[1], vals[2]);
            }
            rg => {
                let vals = pop_floats::<3>(&mut stack, "rg")?;
                set_rgb(&mut st.gs.colors.fill, vals[0], vals[1], vals[2]);
            }
            K => {
                let vals = pop_floats::<4>(&mut stack, "K")?;
                set_cmyk(&mut st.gs.colors.line, vals[0], vals[1], vals[2], vals[3]);
            }
            k => {
                let vals = pop_floats::<4>(&mut stack, "k")?;
                set_cmyk(&mut st.gs.colors.fill, vals[0], vals[1], vals[2], vals[3]);
            }
            w => {
                let [vals] = pop_floats::<1>(&mut stack, "w")?;
                st.gs.line_width = vals;
            }
            j => {
                let [vals] = pop_floats::<1>(&mut stack, "j")?;
                st.gs.line_join = match vals as i32 {
                    1 => crate::display::LineJoin::Round,
                    2 => crate::display::LineJoin::Bevel,
                    _ => crate::display::LineJoin::Miter,
                };
            }
            J => {
                let [vals] = pop_floats::<1>(&mut stack, "J")?;
                st.gs.line_caps = match vals as i32 {
                    1 => crate::display::LineCaps::Round,
                    2 => crate::display::LineCaps::Square,
                    _ => crate::display::LineCaps::Butt,
                };
            }
            M => {
                let [vals] = pop_floats::<1>(&mut stack, "M")?;
                st.gs.miter_limit = vals;
            }
            d => {
                let phase = stack
                    .pop()
                    .and_then(|vals| vals.number())
                    .ok_or(PdfError::Arity("d", 2))?;
                let array = match stack.pop() {
                    Some(Value::Array(a)) => a,
                    _ => return Err(PdfError::Arity("d", 2)),
                };
                st.gs.dash_len = array.len().min(4);
                for (idx, vals) in array.iter().take(4).enumerate() {
                    st.gs.dash[idx] = vals.number().unwrap_or(0.0);
                }
                st.gs.dash_phase = phase;
            }
            m => {
                let vals = pop_floats::<2>(&mut stack, "m")?;
                ctx.get_path().move_to(vals[0], vals[1]);
            }
            l => {
                let vals = pop_floats::<2>(&mut stack, "l")?;
                ctx.get_path().line_to(vals[0], vals[1]);
            }
            c => {
                let vals = pop_floats::<6>(&mut stack, "c")?;
                ctx.get_path().curve_to(vals[0], vals[1], vals[2], vals[3], vals[4], vals[5]);
            }
            re => {
                let vals = pop_floats::<4>(&mut stack, "re")?;
                ctx.get_path().rect(vals[0], vals[1], vals[0] + vals[2], vals[1] + vals[3]);
            }
            h => ctx.get_path().close(),
            n => ctx.drop_path(),
            S | s => {
                if ctx.recording() {
                    let ctm = ctx.get_ctm(st);
                    let stroke = stroke_state(st, op == s);
                    let mut path = ctx.get_path().clone();
                    if op == s {
                        path.close();
                    }
                    ctx.push_item(DisplayItem::StrokePath {
                        path,
                        stroke,
                        ctm,
                        color: st.gs.colors.line,
                    });
                }
                ctx.drop_path();
            }
            f | F | f_star => {
                if ctx.recording() {
                    let ctm = ctx.get_ctm(st);
                    let path = ctx.get_path().clone();
                    ctx.push_item(DisplayItem::FillPath {
                        path,
                        even_odd: op == f_star,
                        ctm,
                        color: st.gs.colors.fill,
                    });
                }
                ctx.drop_path();
            }
            B | B_star | b | b_star => {
                if ctx.recording() {
                    let ctm = ctx.get_ctm(st);
                    let stroke = stroke_state(st, false);
                    let mut path = ctx.get_path().clone();
                    if op == b || op == b_star {
                        path.close();
                    }
                    let even_odd = op == B_star || op == b_star;
                    ctx.push_item(DisplayItem::FillPath {
                        path: path.clone(),
                        even_odd,
                        ctm,
                        color: st.gs.colors.fill,
                    });
                    ctx.push_item(DisplayItem::StrokePath {
                        path,
                        stroke,
                        ctm,
                        color: st.gs.colors.line,
                    });
                }
                ctx.drop_path();
            }
            W | W_star => {
                if ctx.recording() {
                    let ctm = ctx.get_ctm(st);
                    let path = ctx.get_path().clone();
                    ctx.push_item(DisplayItem::ClipPath {
                        path,
                        even_odd: op == W_star,
                        ctm,
                    });
                    st.gs.clip_depth += 1;
                }
            }
            other => {
                warn!(target: "dvi.interp", op = other.name(), "pdf unhandled operator");
                stack.clear();
            }
        }
    }
    Ok(())
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
    fn lexes_values() {
        let mut lexer = Lexer::new(b"1 0.5 -2 (he(ll)o) <48 69> /Name#20x true null [1 2] 3 0 R q");
        let mut stack = Vec::new();
        let op = lexer.next_command(&mut stack).unwrap();
        assert_eq!(op, Some(PdfOp::q));
        assert_eq!(
            stack,
            vec![
                Value::Number(1.0),
                Value::Number(0.5),
                Value::Number(-2.0),
                Value::String(b"he(ll)o".to_vec()),
                Value::String(vec![0x48, 0x69]),
                Value::Name("Name x".to_owned()),
                Value::Bool(true),
                Value::Null,
                Value::Array(vec![Value::Number(1.0), Value::Number(2.0)]),
                Value::Ref(3, 0),
            ]
        );
    }

    #[test]
    fn string_escapes() {
        let mut lexer = Lexer::new(b"(a\\n\\101\\)b) n");
        let mut stack = Vec::new();
        lexer.next_command(&mut stack).unwrap();
        assert_eq!(stack, vec![Value::String(b"a\nA)b".to_vec())]);
    }

    #[test]
    fn odd_hexstring_pads() {
        let mut lexer = Lexer::new(b"<48a> n");
        let mut stack = Vec::new();
        lexer.next_command(&mut stack).unwrap();
        assert_eq!(stack, vec![Value::String(vec![0x48, 0xa0])]);
    }

    #[test]
    fn fill_and_clip_record() {
        let (mut ctx, mut st) = test_context();
        assert!(pdf_code(
            &mut ctx,
            &mut st,
            b"q 1 0 0 rg 0 0 m 10 0 l 10 10 l h f 0 0 5 5 re W n Q"
        ));
        assert_eq!(st.gs.clip_depth, 0); // Q popped the clip level
        let list = ctx.end_frame();
        let mut fills = 0;
        let mut clips = 0;
        let mut pops = 0;
        for item in &list.items {
            match item {
                DisplayItem::FillPath { color, .. } => {
                    fills += 1;
                    assert_eq!(*color, [1.0, 0.0, 0.0]);
                }
                DisplayItem::ClipPath { .. } => clips += 1,
                DisplayItem::PopClip => pops += 1,
                _ => {}
            }
        }
        assert_eq!((fills, clips, pops), (1, 1, 1));
    }

    #[test]
    fn dash_pattern_parses() {
        let (mut ctx, mut st) = test_context();
        assert!(pdf_code(&mut ctx, &mut st, b"[1 2] 0.5 d"));
        assert_eq!(st.gs.dash_len, 2);
        assert_eq!(st.gs.dash[0], 1.0);
        assert_eq!(st.gs.dash[1], 2.0);
        assert_eq!(st.gs.dash_phase, 0.5);
    }

    #[test]
    fn unknown_operator_is_ignored() {
        let (mut ctx, mut st) = test_context();
        assert!(pdf_code(&mut ctx, &mut st, b"/GS1 gs 1 0 0 RG"));
        assert_eq!(st.gs.colors.line, [1.0, 0.0, 0.0]);
    }

    #[test]
    fn malformed_stream_fails_cleanly() {
        let (mut ctx, mut st) = test_context();
        assert!(!pdf_code(&mut ctx, &mut st, b"(unterminated"));
    }
}
