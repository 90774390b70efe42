//! Interpreter machine state.
//!
//! One [`State`] per stream: the six DVI registers, the graphics state, and
//! window views into the two shared stacks. Entering a virtual-font
//! character builds a sub-state whose stack windows start where the parent's
//! stop, so the 256-slot backing stores are partitioned rather than
//! reallocated.
//!
//! The [`Context`] carries everything shared across streams of one page
//! render: the display list under construction, pending text run, scratch
//! arena, resource manager, color stacks and the DVI→device scale.

use std::rc::Rc;

use core_codec::Fixed;
use tracing::warn;

use crate::display::{DisplayItem, DisplayList, Path, SyncPos, TextGlyph};
use crate::fonttable::{FontTable, FontTableRef};
use crate::geom::Matrix;
use crate::resmanager::ResourceManager;
use crate::scratch::Arena;
use crate::DviVersion;

pub const STACK_SLOTS: usize = 256;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Registers {
    pub h: i32,
    pub v: i32,
    pub w: i32,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorState {
    pub line: [f32; 3],
    pub fill: [f32; 3],
}

impl Default for ColorState {
    fn default() -> Self {
        ColorState {
            line: [0.0; 3],
            fill: [0.0; 3],
        }
    }
}

pub use crate::display::{LineCaps, LineJoin};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphicsState {
    pub ctm: Matrix,
    pub colors: ColorState,
    pub line_width: f32,
    pub miter_limit: f32,
    pub line_join: LineJoin,
    pub line_caps: LineCaps,
    pub clip_depth: i32,
    pub dash: [f32; 4],
    pub dash_len: usize,
    pub dash_phase: f32,
    /// Registers at the time the CTM was last rebased; coordinates emit
    /// relative to this origin.
    pub h0: i32,
    pub v0: i32,
}

impl Default for GraphicsState {
    fn default() -> Self {
        GraphicsState {
            ctm: Matrix::IDENTITY,
            colors: ColorState::default(),
            line_width: 0.0,
            miter_limit: 0.0,
            line_join: LineJoin::Miter,
            line_caps: LineCaps::Butt,
            clip_depth: 0,
            dash: [0.0; 4],
            dash_len: 0,
            dash_phase: 0.0,
            h0: 0,
            v0: 0,
        }
    }
}

/// Window into one of the shared stacks.
#[derive(Debug, Clone, Copy, Default)]
pub struct StackWindow {
    pub base: usize,
    pub depth: usize,
    pub limit: usize,
}

pub struct State {
    pub version: DviVersion,
    pub f: u32,
    pub gs: GraphicsState,
    pub registers: Registers,
    pub registers_stack: StackWindow,
    pub gs_stack: StackWindow,
    pub fonts: FontTableRef,
}

impl State {
    fn root(fonts: FontTableRef) -> State {
        State {
            version: DviVersion::None,
            f: 0,
            gs: GraphicsState::default(),
            registers: Registers::default(),
            registers_stack: StackWindow {
                base: 0,
                depth: 0,
                limit: STACK_SLOTS,
            },
            gs_stack: StackWindow {
                base: 0,
                depth: 0,
                limit: STACK_SLOTS,
            },
            fonts,
        }
    }
}

/// A color stack: the origin colors plus pushed states.
#[derive(Default)]
pub struct ColorStack {
    origin: ColorState,
    stack: Vec<ColorState>,
}

impl ColorStack {
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn push(&mut self, colors: ColorState) {
        self.stack.push(colors);
    }

    pub fn pop(&mut self) -> Option<ColorState> {
        self.stack.pop()
    }

    pub fn current(&self) -> ColorState {
        self.stack.last().copied().unwrap_or(self.origin)
    }

    pub fn reset(&mut self) {
        self.stack.clear();
    }
}

/// Source position stream for SyncTeX: `pos[0]` is current, `pos[1]` the
/// previous position (the `p` special swaps them).
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncState {
    pub pos: [SyncPos; 2],
}

/// Geometry of one typeset glyph, reported to the backward-search hook.
pub struct SyncGlyph {
    pub file: i32,
    pub line: i32,
    pub ch: u32,
    pub ctm: Matrix,
    pub width: f32,
    pub height: f32,
    pub depth: f32,
}

pub type SyncHook = Box<dyn FnMut(SyncGlyph)>;

pub struct Context {
    pub resmanager: ResourceManager,
    pub scratch: Arena,
    pub scale: f32,
    pub sync: SyncState,
    pub sync_hook: Option<SyncHook>,

    pub(crate) root: State,
    pub(crate) registers_stack: Vec<Registers>,
    pub(crate) gs_stack: Vec<GraphicsState>,

    // Default color stack (dvipdfmx `color` specials)
    pub(crate) colorstack: ColorStack,
    // pdftex-style indexed color stacks
    pub(crate) pdfcolorstacks: Vec<ColorStack>,

    // Current page recording
    pub(crate) list: Option<DisplayList>,
    pub(crate) text: Vec<TextGlyph>,
    pub(crate) path: Option<Path>,
}

impl Context {
    pub fn new(resmanager: ResourceManager) -> Context {
        let fonts: FontTableRef = Rc::new(std::cell::RefCell::new(FontTable::new()));
        Context {
            resmanager,
            scratch: Arena::new(),
            scale: 0.0,
            sync: SyncState::default(),
            sync_hook: None,
            root: State::root(fonts),
            registers_stack: vec![Registers::default(); STACK_SLOTS],
            gs_stack: vec![GraphicsState::default(); STACK_SLOTS],
            colorstack: ColorStack::default(),
            pdfcolorstacks: Vec::new(),
            list: None,
            text: Vec::new(),
            path: None,
        }
    }

    /// True between `begin_frame` and `end_frame`; drawing is skipped
    /// otherwise (the prescan and fontdef replay run without a frame).
    pub(crate) fn recording(&self) -> bool {
        self.list.is_some()
    }

    pub fn root_version(&self) -> DviVersion {
        self.root.version
    }

    pub(crate) fn set_root_version(&mut self, version: DviVersion) {
        self.root.version = version;
    }

    /// Split the root state out so the interpreter can borrow the context
    /// and the state independently.
    pub(crate) fn take_root(&mut self) -> State {
        let fonts = self.root.fonts.clone();
        std::mem::replace(&mut self.root, State::root(fonts))
    }

    pub(crate) fn put_root(&mut self, st: State) {
        self.root = st;
    }

    /// Reset per-page state and start recording into a fresh display list.
    pub fn begin_frame(&mut self, width: f32, height: f32) {
        self.root.registers_stack.depth = 0;
        self.root.gs_stack.depth = 0;
        self.root.gs = GraphicsState {
            // Device space: y grows downward, with a one-inch margin.
            ctm: Matrix::new(1.0, 0.0, 0.0, -1.0, 72.0, 72.0),
            ..GraphicsState::default()
        };
        self.colorstack.reset();
        for stack in &mut self.pdfcolorstacks {
            stack.reset();
        }
        self.list = Some(DisplayList::new(width, height));
        self.text.clear();
        self.path = None;
    }

    /// Stop recording; the scratch arena releases wholesale here.
    pub fn end_frame(&mut self) -> DisplayList {
        self.scratch.clear();
        self.path = None;
        if self.colorstack.depth() > 0 {
            warn!(target: "dvi.interp", depth = self.colorstack.depth(),
                  "default color stack: ending frame with colors pushed");
        }
        for (i, stack) in self.pdfcolorstacks.iter().enumerate() {
            if stack.depth() > 0 {
                warn!(target: "dvi.interp", stack = i, depth = stack.depth(),
                      "color stack: ending frame with colors pushed");
            }
        }
        self.list.take().unwrap_or_default()
    }

    pub(crate) fn push_item(&mut self, item: DisplayItem) {
        if let Some(list) = &mut self.list {
            list.push(item);
        }
    }

    /// Emit the pending text run with the state's fill color.
    pub(crate) fn flush_text(&mut self, st: &State) {
        if self.text.is_empty() {
            return;
        }
        let glyphs = std::mem::take(&mut self.text);
        self.push_item(DisplayItem::Text {
            glyphs,
            color: st.gs.colors.fill,
        });
    }

    /// CTM narrowed to the current point: registers are relative to the
    /// origin the graphics state was rebased at.
    pub fn get_ctm(&self, st: &State) -> Matrix {
        let h = (st.registers.h - st.gs.h0) as f32;
        let v = (st.registers.v - st.gs.v0) as f32;
        st.gs.ctm.pre_translate(h * self.scale, -v * self.scale)
    }

    pub(crate) fn set_ctm(st: &mut State, ctm: Matrix) {
        st.gs.ctm = ctm;
        st.gs.h0 = st.registers.h;
        st.gs.v0 = st.registers.v;
    }

    /// Sub-state for a virtual-font character: fresh registers, CTM
    /// pre-scaled by the VF scale, stack windows carved out of the parent's
    /// remainder.
    pub(crate) fn enter_vf(
        &self,
        st: &State,
        fonts: FontTableRef,
        font: i32,
        scale: Fixed,
    ) -> State {
        let s = scale.to_f32();
        let mut gs = st.gs;
        gs.ctm = self.get_ctm(st).pre_scale(s, s);
        gs.h0 = 0;
        gs.v0 = 0;
        State {
            version: DviVersion::Vf,
            f: font as u32,
            gs,
            registers: Registers::default(),
            registers_stack: StackWindow {
                base: st.registers_stack.base + st.registers_stack.depth,
                depth: 0,
                limit: st.registers_stack.limit - st.registers_stack.depth,
            },
            gs_stack: StackWindow {
                base: st.gs_stack.base + st.gs_stack.depth,
                depth: 0,
                limit: st.gs_stack.limit - st.gs_stack.depth,
            },
            fonts,
        }
    }

    /// Save the registers. Overflow is dropped with a warning.
    pub(crate) fn push_registers(&mut self, st: &mut State) -> bool {
        self.flush_text(st);
        let w = &mut st.registers_stack;
        if w.depth >= w.limit {
            warn!(target: "dvi.interp", "register stack overflow, dropping push");
            return false;
        }
        self.registers_stack[w.base + w.depth] = st.registers;
        w.depth += 1;
        true
    }

    pub(crate) fn pop_registers(&mut self, st: &mut State) -> bool {
        self.flush_text(st);
        let w = &mut st.registers_stack;
        if w.depth == 0 {
            warn!(target: "dvi.interp", "register stack underflow, dropping pop");
            return false;
        }
        w.depth -= 1;
        st.registers = self.registers_stack[w.base + w.depth];
        true
    }

    pub(crate) fn push_gs(&mut self, st: &mut State) -> bool {
        let w = &mut st.gs_stack;
        if w.depth >= w.limit {
            warn!(target: "dvi.interp", "graphics state stack overflow");
            return false;
        }
        self.gs_stack[w.base + w.depth] = st.gs;
        w.depth += 1;
        true
    }

    /// Restore the graphics state; emits one `PopClip` per clip level the
    /// restored state unwinds.
    pub(crate) fn pop_gs(&mut self, st: &mut State) -> bool {
        let w = &mut st.gs_stack;
        if w.depth == 0 {
            warn!(target: "dvi.interp", "graphics state stack underflow");
            return false;
        }
        w.depth -= 1;
        let clip_depth0 = st.gs.clip_depth;
        st.gs = self.gs_stack[st.gs_stack.base + st.gs_stack.depth];
        for _ in st.gs.clip_depth..clip_depth0 {
            self.push_item(DisplayItem::PopClip);
        }
        true
    }

    pub(crate) fn colorstack(&mut self, index: i32) -> Option<&mut ColorStack> {
        if index == -1 {
            Some(&mut self.colorstack)
        } else if (index as usize) < self.pdfcolorstacks.len() {
            Some(&mut self.pdfcolorstacks[index as usize])
        } else {
            warn!(target: "dvi.interp", index, "no such color stack");
            None
        }
    }

    pub(crate) fn colorstack_init(&mut self, index: i32) {
        let index = index as usize;
        if index >= self.pdfcolorstacks.len() {
            self.pdfcolorstacks
                .resize_with(index + 1, ColorStack::default);
        }
    }

    pub(crate) fn get_path(&mut self) -> &mut Path {
        self.path.get_or_insert_with(Path::new)
    }

    pub(crate) fn drop_path(&mut self) {
        self.path = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NoBackend;

    fn test_context() -> Context {
        let rm = ResourceManager::new(
            Box::new(NoBackend),
            Box::new(NoBackend),
            Box::new(NoBackend),
        );
        let mut ctx = Context::new(rm);
        ctx.scale = 1.0;
        ctx
    }

    #[test]
    fn register_stack_window_partitions() {
        let mut ctx = test_context();
        let mut root = ctx.take_root();
        root.registers.h = 7;
        assert!(ctx.push_registers(&mut root));
        let vf_fonts: FontTableRef = Rc::new(std::cell::RefCell::new(FontTable::new()));
        let vf = ctx.enter_vf(&root, vf_fonts, 0, Fixed::ONE);
        assert_eq!(vf.registers_stack.base, 1);
        assert_eq!(vf.registers_stack.limit, STACK_SLOTS - 1);
        assert_eq!(vf.registers.h, 0);
    }

    #[test]
    fn push_pop_round_trips() {
        let mut ctx = test_context();
        let mut st = ctx.take_root();
        st.registers.h = 42;
        assert!(ctx.push_registers(&mut st));
        st.registers.h = 0;
        assert!(ctx.pop_registers(&mut st));
        assert_eq!(st.registers.h, 42);
        assert!(!ctx.pop_registers(&mut st));
    }

    #[test]
    fn pop_gs_emits_pop_clips() {
        let mut ctx = test_context();
        ctx.begin_frame(612.0, 792.0);
        let mut st = ctx.take_root();
        assert!(ctx.push_gs(&mut st));
        st.gs.clip_depth += 2;
        assert!(ctx.pop_gs(&mut st));
        let list = ctx.end_frame();
        assert_eq!(
            list.items
                .iter()
                .filter(|i| matches!(i, DisplayItem::PopClip))
                .count(),
            2
        );
    }

    #[test]
    fn get_ctm_is_relative_to_rebased_origin(){
        let ctx = test_context();
        let mut st = State::root(ctx.root.fonts.clone());
        st.registers.h = 10;
        st.registers.v = 5;
        let m = ctx.get_ctm(&st);
        assert_eq!(m.transform(0.0, 0.0), (10.0, -5.0));
        let mut st2 = st;
        Context::set_ctm(&mut st2, Matrix::IDENTITY);
        assert_eq!(ctx.get_ctm(&st2).transform(0.0, 0.0), (0.0, 0.0));
    }
}
