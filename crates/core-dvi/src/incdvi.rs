//! Incremental page index over a growing (and occasionally shrinking) DVI
//! buffer.
//!
//! `update` is idempotent on growing buffers and tolerant of rollbacks: when
//! the buffer shrinks below the parsed offset, trailing page boundaries are
//! dropped and parsing resumes from the last surviving end-of-page. Font
//! definitions are realized lazily, only up to the page being rendered, so
//! speculative output that never gets displayed costs nothing.

use tracing::{debug, info};

use crate::display::DisplayList;
use crate::interp::{self, PageDim};
use crate::opcodes::{is_fontdef, BOP, EOP, XXX1, XXX4};
use crate::resmanager::ResourceManager;
use crate::state::Context;

pub struct IncDvi {
    /// Byte offset fully parsed into the page index.
    offset: usize,
    /// Offset through which font definitions have been realized.
    fontdef_offset: usize,
    /// Alternating BOP/EOP byte offsets; page `i` is `(pages[2i], pages[2i+1])`.
    pages: Vec<usize>,
    ctx: Context,
}

impl IncDvi {
    pub fn new(resmanager: ResourceManager) -> IncDvi {
        IncDvi {
            offset: 0,
            fontdef_offset: 0,
            pages: Vec::new(),
            ctx: Context::new(resmanager),
        }
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }

    /// Forget everything (a fresh document output began).
    pub fn reset(&mut self) {
        self.offset = 0;
        self.fontdef_offset = 0;
        self.pages.clear();
    }

    pub fn page_count(&self) -> usize {
        self.pages.len() / 2
    }

    /// True once any document output has been parsed.
    pub fn output_started(&self) -> bool {
        self.offset > 0
    }

    /// The DVI→device scale factor, 1.0 until a preamble arrived.
    pub fn tex_scale_factor(&self) -> f32 {
        if self.pages.is_empty() {
            1.0
        } else {
            self.ctx.scale
        }
    }

    /// Advance (or rewind) the index to match `buf`.
    pub fn update(&mut self, buf: &[u8]) {
        let len = buf.len();

        if self.offset > len {
            // Rollback: drop page boundaries past the buffer.
            while let Some(&last) = self.pages.last() {
                if last >= len {
                    self.pages.pop();
                } else {
                    break;
                }
            }
            if self.pages.is_empty() {
                self.offset = 0;
            } else {
                // Resume at the last surviving boundary; the next pass
                // re-indexes it.
                self.offset = self.pages.pop().expect("pages is non-empty");
            }
            debug!(target: "dvi.interp", offset = self.offset, pages = self.pages.len() / 2,
                   "index rolled back");
        }

        if self.offset == 0 {
            assert!(self.pages.is_empty());
            let plen = interp::preamble_size(buf);
            if plen > 0 && interp::preamble_parse(&mut self.ctx, buf) {
                self.offset = plen as usize;
            }
        }

        if self.offset > 0 {
            let version = self.ctx.root_version();
            while self.offset < len {
                let ilen = interp::instr_size(&buf[self.offset..], version);
                if ilen <= 0 {
                    break;
                }
                let op = buf[self.offset];
                if op == BOP || op == EOP {
                    // BOP lands on even slots, EOP on odd ones.
                    assert_eq!(
                        self.pages.len() % 2 == 0,
                        op == BOP,
                        "page boundary parity broken at offset {}",
                        self.offset
                    );
                    self.pages.push(self.offset);
                }
                self.offset += ilen as usize;
            }
        }

        if self.fontdef_offset > self.offset {
            self.fontdef_offset = self.offset;
        }
    }

    /// Realize font definitions (and fontdef-time specials) up to `limit`.
    fn parse_fontdefs(&mut self, buf: &[u8], limit: usize) {
        assert!(limit <= buf.len());
        let version = self.ctx.root_version();
        while self.fontdef_offset < limit {
            let ilen = interp::instr_size(&buf[self.fontdef_offset..limit], version);
            if ilen <= 0 {
                break;
            }
            let op = buf[self.fontdef_offset];
            if (XXX1..=XXX4).contains(&op) {
                interp::interp_init(&mut self.ctx, &buf[self.fontdef_offset..limit]);
            }
            if is_fontdef(op) {
                interp::interp(&mut self.ctx, &buf[self.fontdef_offset..]);
            }
            self.fontdef_offset += ilen as usize;
        }
    }

    /// Page dimensions from the prescan of the page's leading specials.
    pub fn page_dim(&self, buf: &[u8], page: usize) -> PageDim {
        assert!(page < self.page_count(), "page_dim: page out of range");
        let bop = self.pages[page * 2];
        let mut dim = interp::interp_bop(&buf[bop..]).unwrap_or_default();
        if dim.landscape {
            std::mem::swap(&mut dim.width, &mut dim.height);
        }
        dim
    }

    /// Replay a page into a display list.
    pub fn render_page(&mut self, buf: &[u8], page: usize) -> DisplayList {
        assert!(page < self.page_count(), "render_page: page out of range");
        let mut offset = self.pages[page * 2];
        let eop = self.pages[page * 2 + 1];
        self.parse_fontdefs(buf, offset);

        let dim = self.page_dim(buf, page);
        let version = self.ctx.root_version();
        self.ctx.begin_frame(dim.width, dim.height);
        while offset < eop {
            let ilen = interp::instr_size(&buf[offset..eop], version);
            assert!(ilen > 0, "indexed page no longer decodes at offset {offset}");
            interp::interp(&mut self.ctx, &buf[offset..]);
            offset += ilen as usize;
        }
        let list = self.ctx.end_frame();
        info!(target: "dvi.interp", page, items = list.items.len(), "page rendered");
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NoBackend;

    fn new_incdvi() -> IncDvi {
        IncDvi::new(ResourceManager::new(
            Box::new(NoBackend),
            Box::new(NoBackend),
            Box::new(NoBackend),
        ))
    }

    fn preamble() -> Vec<u8> {
        let mut out = vec![crate::opcodes::PRE, 2];
        out.extend_from_slice(&25400000u32.to_be_bytes());
        out.extend_from_slice(&473628672u32.to_be_bytes());
        out.extend_from_slice(&1000u32.to_be_bytes());
        out.push(5);
        out.extend_from_slice(b"hello");
        out
    }

    fn one_page() -> Vec<u8> {
        let mut out = preamble();
        out.push(BOP);
        out.extend_from_slice(&[0u8; 40]);
        out.extend_from_slice(&(-1i32).to_be_bytes());
        out.push(crate::opcodes::NOP);
        out.push(EOP);
        out
    }

    #[test]
    fn preamble_alone_has_no_pages() {
        let mut inc = new_incdvi();
        let buf = preamble();
        inc.update(&buf);
        assert_eq!(inc.page_count(), 0);
        assert!(inc.output_started());
    }

    #[test]
    fn single_page_indexes() {
        let mut inc = new_incdvi();
        let buf = one_page();
        inc.update(&buf);
        assert_eq!(inc.page_count(), 1);
        let dim = inc.page_dim(&buf, 0);
        assert_eq!((dim.width, dim.height, dim.landscape), (612.0, 792.0, false));
    }

    #[test]
    fn chunked_update_equals_single_shot() {
        let buf = one_page();
        let mut whole = new_incdvi();
        whole.update(&buf);

        for chunk in 1..8 {
            let mut inc = new_incdvi();
            let mut fed = 0;
            while fed < buf.len() {
                let end = (fed + chunk).min(buf.len());
                inc.update(&buf[..end]);
                fed = end;
            }
            assert_eq!(inc.page_count(), whole.page_count(), "chunk size {chunk}");
            assert_eq!(inc.pages, whole.pages, "chunk size {chunk}");
        }
    }

    #[test]
    fn shrinking_buffer_rolls_back() {
        let mut inc = new_incdvi();
        let buf = one_page();
        inc.update(&buf);
        assert_eq!(inc.page_count(), 1);

        // Rewind into the middle of the page: the page pair drops.
        let cut = buf.len() - 2;
        inc.update(&buf[..cut]);
        assert_eq!(inc.page_count(), 0);

        // Feeding the full buffer again re-indexes the page.
        inc.update(&buf);
        assert_eq!(inc.page_count(), 1);
    }

    #[test]
    fn renders_empty_page() {
        let mut inc = new_incdvi();
        let buf = one_page();
        inc.update(&buf);
        let list = inc.render_page(&buf, 0);
        assert!(list.is_empty());
        assert_eq!((list.width, list.height), (612.0, 792.0));
    }

    #[test]
    fn scale_matches_preamble() {
        let mut inc = new_incdvi();
        let buf = one_page();
        inc.update(&buf);
        let expected = 25400000.0 / 254000.0 * 72.27 / 473628672.0 * 1000.0 / 1000.0 * 800.0 / 803.0;
        assert!((inc.tex_scale_factor() - expected as f32).abs() < 1e-9);
    }
}
