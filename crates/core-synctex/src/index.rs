//! The incremental index proper: offset tables, rollback, and the two
//! searches.

use tracing::{debug, info, warn};

use crate::records::{parse_int, parse_line, skip_record, Link, Record, RecordKind};

fn rollback_offsets(offsets: &mut Vec<i64>, limit: usize) {
    while let Some(&last) = offsets.last() {
        if last.unsigned_abs() as usize >= limit {
            offsets.pop();
        } else {
            break;
        }
    }
}

/// Result of a forward search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynctexHit {
    pub page: usize,
    pub x: i32,
    pub y: i32,
}

#[derive(Default)]
struct ForwardSearch {
    /// Empty when no search is active.
    target_path: String,
    target_line: i32,
    /// Page displayed when the search started; breaks ties when a match
    /// spans pages.
    target_current_page: i32,

    /// Tag index of the resolved input, or the number of inputs already
    /// checked while still unresolved.
    input_tag: usize,
    input_found: bool,

    /// Pages scanned so far; the scan resumes at this page.
    scanned_pages: usize,

    candidate_page: i32,
    candidate_line: i32,
    candidate_x: i32,
    candidate_y: i32,
}

pub struct Synctex {
    /// Input declaration offsets, negated once the input closes.
    input_off: Vec<i64>,
    /// Alternating page open/close offsets.
    page_off: Vec<i64>,
    /// Offsets of `/N` closure records, parallel with `close_inp`.
    close_off: Vec<i64>,
    close_inp: Vec<usize>,

    /// Current parse position and beginning of the unfinished line.
    cur: usize,
    bol: usize,

    search: ForwardSearch,
}

impl Default for Synctex {
    fn default() -> Self {
        Self::new()
    }
}

impl Synctex {
    pub fn new() -> Synctex {
        Synctex {
            input_off: Vec::new(),
            page_off: Vec::new(),
            close_off: Vec::new(),
            close_inp: Vec::new(),
            cur: 0,
            bol: 0,
            search: ForwardSearch::default(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.page_off.len() / 2
    }

    pub fn input_count(&self) -> usize {
        self.input_off.len()
    }

    pub fn has_target(&self) -> bool {
        !self.search.target_path.is_empty()
    }

    fn input_offset(&self, index: usize) -> usize {
        self.input_off[index].unsigned_abs() as usize
    }

    fn input_closed(&self, index: usize) -> bool {
        self.input_off[index] < 0
    }

    /// Drop everything recorded at or past `offset` (the stream shrank).
    pub fn rollback(&mut self, offset: usize) {
        rollback_offsets(&mut self.page_off, offset);
        rollback_offsets(&mut self.input_off, offset);
        rollback_offsets(&mut self.close_off, offset);

        // Reopen inputs whose closure record rolled back.
        while self.close_inp.len() > self.close_off.len() {
            let index = self.close_inp.pop().expect("close_inp is non-empty");
            if index < self.input_off.len() {
                assert!(
                    self.input_closed(index),
                    "rollback: reopening an input that is not closed"
                );
                self.input_off[index] = -self.input_off[index];
            }
        }

        if self.cur > offset {
            self.cur = offset;
        }

        if self.has_target() {
            if self.search.input_tag >= self.input_off.len() {
                self.search.input_tag = self.input_off.len();
                self.search.input_found = false;
            } else {
                let pages = self.page_count();
                if self.search.scanned_pages > pages {
                    self.search.scanned_pages = pages;
                }
                if self.search.candidate_page > pages as i32 {
                    self.search.candidate_page = -1;
                }
            }
        }
    }

    fn process_line(&mut self, offset: usize, line: &[u8]) {
        let mut pos = 1;
        match line[0] {
            c @ (b'{' | b'}') => {
                let is_closing = c == b'}';
                let index = parse_int(line, &mut pos);
                if index as usize != self.page_off.len() / 2 + 1
                    || is_closing != (self.page_off.len() % 2 == 1)
                {
                    panic!(
                        "synctex: invalid page index {} (closing: {}), expected {}/{}",
                        index,
                        is_closing,
                        self.page_off.len() / 2 + 1,
                        self.page_off.len() % 2
                    );
                }
                self.page_off.push(offset as i64);
            }
            b'I' => {
                if !line[1..].starts_with(b"nput:") {
                    return;
                }
                pos = 6;
                let index = parse_int(line, &mut pos);
                if line.get(pos) != Some(&b':') {
                    return;
                }
                if index as usize != self.input_off.len() + 1 {
                    panic!(
                        "synctex: invalid input index {} expected {}",
                        index,
                        self.input_off.len() + 1
                    );
                }
                self.input_off.push(offset as i64);
            }
            b'/' => {
                let index = parse_int(line, &mut pos) - 1;
                info!(target: "synctex", input = index + 1, "input closed");
                assert!(
                    index >= 0 && (index as usize) < self.input_off.len(),
                    "synctex: closure of unknown input {}",
                    index + 1
                );
                let index = index as usize;
                assert!(!self.input_closed(index), "synctex: input closed twice");
                self.input_off[index] = -self.input_off[index];
                assert_eq!(self.close_off.len(), self.close_inp.len());
                self.close_off.push(offset as i64);
                self.close_inp.push(index);
            }
            _ => {}
        }
    }

    /// Consume newly appended bytes (or roll back after a shrink).
    pub fn update(&mut self, buf: &[u8]) {
        let len = buf.len();
        if len <= self.cur {
            if len < self.cur {
                self.rollback(len);
            }
            return;
        }

        let mut bol = self.bol;
        if bol > self.cur {
            bol = self.cur;
            while bol > 0 && buf[bol - 1] != b'\n' {
                bol -= 1;
            }
        }

        let mut cur = self.cur;
        while cur < len {
            if buf[cur] == b'\n' {
                if cur > bol {
                    let line = &buf[bol..cur];
                    self.process_line(bol, line);
                }
                cur += 1;
                bol = cur;
            } else {
                cur += 1;
            }
        }

        self.bol = bol;
        self.cur = cur;
    }

    fn page_offsets(&self, page: usize) -> (usize, usize) {
        assert!(page * 2 + 1 < self.page_off.len(), "page out of range");
        (
            self.page_off[page * 2].unsigned_abs() as usize,
            self.page_off[page * 2 + 1].unsigned_abs() as usize,
        )
    }

    /// File name declared for a 1-based tag, if any.
    fn input_name<'a>(&self, buf: &'a [u8], index: usize) -> Option<&'a [u8]> {
        // The declaration line reads `Input:N:filename`.
        let start = self.input_offset(index);
        let line = &buf[start..];
        let mut colons = line.splitn(3, |&c| c == b':');
        colons.next()?;
        colons.next()?;
        let rest = colons.next()?;
        let end = rest.iter().position(|&c| c == b'\n')?;
        (end > 0).then_some(&rest[..end])
    }

    /// Backward search: the `(tag, line, column)` whose record box is the
    /// smallest one containing `(x, y)` on `page`, with the tag's file name.
    pub fn scan(&self, buf: &[u8], page: usize, x: i32, y: i32) -> Option<(String, i32, i32)> {
        if self.page_count() <= page {
            return None;
        }
        let (bop, _eop) = self.page_offsets(page);

        let mut best_area = f32::INFINITY;
        let mut best: Option<Link> = None;
        let mut nest = 0usize;

        let mut pos = bop;
        while let Some((r, next)) = parse_line(buf, pos) {
            pos = next;
            let rect_x0 = r.point.x;
            let rect_x1 = r.point.x + r.size.width;
            let rect_y0 = r.point.y - r.size.height;
            let rect_y1 = r.point.y + r.size.depth;
            match r.kind {
                RecordKind::Current | RecordKind::Kern | RecordKind::Glue | RecordKind::Math => {
                    // Oneliners win when their baseline box contains y; the
                    // scored area is the degenerate x-distance rectangle.
                    if rect_y0 <= y && y <= rect_y1 {
                        let (x0, x1) = if rect_x0 < x { (rect_x0, x) } else { (x, rect_x0) };
                        let area = (rect_y1 - rect_y0) as f32 * (x1 - x0) as f32;
                        if area < best_area && self.valid_tag(buf, r.link.tag) {
                            best_area = area;
                            best = Some(r.link);
                        }
                    }
                }
                RecordKind::EnterH | RecordKind::EnterV => {
                    let inside =
                        x >= rect_x0 && x < rect_x1 && y >= rect_y0 && y < rect_y1;
                    if inside {
                        let area = (rect_y1 - rect_y0) as f32 * (rect_x1 - rect_x0) as f32;
                        if area < best_area && self.valid_tag(buf, r.link.tag) {
                            best_area = area;
                            best = Some(r.link);
                        }
                        nest += 1;
                    } else {
                        let (open, close) = if r.kind == RecordKind::EnterH {
                            (b'(', b')')
                        } else {
                            (b'[', b']')
                        };
                        pos = match skip_record(buf, pos, open, close) {
                            Some(p) => p,
                            None => break,
                        };
                    }
                }
                RecordKind::LeaveH | RecordKind::LeaveV => {
                    if nest == 0 {
                        break;
                    }
                    nest -= 1;
                }
                RecordKind::Other => {}
            }
        }

        let link = best?;
        let name = self.input_name(buf, (link.tag - 1) as usize)?;
        let name = String::from_utf8_lossy(name).into_owned();
        debug!(target: "synctex", file = name.as_str(), line = link.line, column = link.column,
               "backward search hit");
        Some((name, link.line, link.column))
    }

    fn valid_tag(&self, buf: &[u8], tag: i32) -> bool {
        tag > 0
            && (tag as usize - 1) < self.input_off.len()
            && self.input_name(buf, tag as usize - 1).is_some()
    }

    /// Begin (or cancel, with `None`) a forward search.
    pub fn set_target(&mut self, current_page: usize, path: Option<&str>, line: i32) {
        match path {
            None => self.search.target_path.clear(),
            Some(path) => {
                self.search = ForwardSearch {
                    target_path: path.to_owned(),
                    target_line: line,
                    target_current_page: current_page as i32,
                    ..ForwardSearch::default()
                };
            }
        }
    }

    fn find_input(&mut self, buf: &[u8]) -> bool {
        if self.search.input_found {
            return true;
        }
        while self.search.input_tag < self.input_off.len() {
            let index = self.search.input_tag;
            let matches = self
                .input_name(buf, index)
                .is_some_and(|name| name == self.search.target_path.as_bytes());
            if !matches {
                self.search.input_tag += 1;
                continue;
            }
            // First page whose close offset is at or past the declaration.
            let offset = self.input_offset(index) as i64;
            let pages = self.page_count();
            let mut page = 0;
            while page < pages && self.page_off[page * 2 + 1] < offset {
                page += 1;
            }
            self.search.scanned_pages = page;
            self.search.input_found = true;
            self.search.candidate_page = -1;
            return true;
        }
        false
    }

    fn scan_page_forward(&mut self, buf: &[u8], page: usize, updated: &mut bool) {
        let tag = self.search.input_tag as i32 + 1;
        let line = self.search.target_line;
        let (bop, _) = self.page_offsets(page);

        // The first box record of a page is where the shipout procedure ran,
        // not page content; it and its repeats are skipped.
        let mut first: Option<Record> = None;
        let mut had_record = false;

        let mut pos = bop;
        while let Some((r, next)) = parse_line(buf, pos) {
            pos = next;

            if first.is_none() && matches!(r.kind, RecordKind::EnterH | RecordKind::EnterV) {
                // If the target line sits right before the instruction that
                // triggered the flush, the top of this page is as close an
                // approximation as the stream will give.
                if r.link.tag == tag && r.link.line < line {
                    return;
                }
                first = Some(r);
                continue;
            }

            if r.is_oneliner() && r.link.tag == tag {
                if let Some(f) = &first {
                    if r.link.tag == f.link.tag && r.link.line == f.link.line {
                        continue;
                    }
                }
                had_record = true;

                if r.link.line <= line || self.search.candidate_page == -1 {
                    self.search.candidate_page = page as i32;
                    self.search.candidate_x = r.point.x;
                    self.search.candidate_y = r.point.y;
                    self.search.candidate_line = r.link.line;
                    *updated = true;
                }

                if r.link.line >= line {
                    if self.search.candidate_page != page as i32
                        && self.search.target_current_page == page as i32
                    {
                        // The match crosses pages; side with the page on
                        // display.
                        self.search.candidate_page = page as i32;
                        self.search.candidate_x = r.point.x;
                        self.search.candidate_y = r.point.y;
                        self.search.candidate_line = r.link.line;
                        *updated = true;
                    }
                    self.search.target_path.clear();
                    return;
                }
            }
        }

        if !had_record {
            // Empty (or beamer-style) page: its bounding record can still
            // supply a fallback candidate.
            if let Some(f) = &first {
                if f.link.tag == tag
                    && f.link.line >= line
                    && (self.search.candidate_page == -1
                        || (page as i32 <= self.search.target_current_page
                            && self.search.candidate_line == f.link.line))
                {
                    self.search.candidate_page = page as i32;
                    self.search.candidate_x = f.point.x;
                    self.search.candidate_y = f.point.y;
                    self.search.candidate_line = f.link.line;
                    *updated = true;
                }
            }
        }
    }

    /// Resume the forward search over whatever the stream holds now.
    /// Returns a hit whenever the candidate improved.
    pub fn find_target(&mut self, buf: &[u8]) -> Option<SynctexHit> {
        if !self.has_target() {
            return None;
        }
        if !self.find_input(buf) {
            return None;
        }

        let pages = self.page_count();
        let mut updated = false;
        while self.has_target() && self.search.scanned_pages < pages {
            let page = self.search.scanned_pages;
            self.scan_page_forward(buf, page, &mut updated);
            self.search.scanned_pages += 1;
        }

        let hit = updated.then(|| SynctexHit {
            page: self.search.candidate_page as usize,
            x: self.search.candidate_x,
            y: self.search.candidate_y,
        });

        if self.search.input_tag < self.input_off.len() && self.input_closed(self.search.input_tag)
        {
            // The input file closed in the stream: nothing more will match.
            if self.has_target() {
                warn!(target: "synctex", path = self.search.target_path.as_str(),
                      "forward search abandoned, input closed");
            }
            self.search.target_path.clear();
        }

        hit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(parts: &[&str]) -> Vec<u8> {
        parts.join("\n").into_bytes()
    }

    #[test]
    fn update_indexes_pages_and_inputs() {
        let buf = stream(&[
            "SyncTeX Version:1",
            "Input:1:main.tex",
            "{1",
            "x1,10:100,200",
            "}1",
            "{2",
            "x1,20:150,250",
            "}2",
            "",
        ]);
        let mut stx = Synctex::new();
        stx.update(&buf);
        assert_eq!(stx.page_count(), 2);
        assert_eq!(stx.input_count(), 1);
    }

    #[test]
    fn chunked_update_matches_single_shot() {
        let buf = stream(&[
            "Input:1:main.tex",
            "{1",
            "x1,10:100,200",
            "}1",
            "",
        ]);
        for chunk in 1..10 {
            let mut stx = Synctex::new();
            let mut fed = 0;
            while fed < buf.len() {
                let end = (fed + chunk).min(buf.len());
                stx.update(&buf[..end]);
                fed = end;
            }
            assert_eq!(stx.page_count(), 1, "chunk {chunk}");
            assert_eq!(stx.input_count(), 1, "chunk {chunk}");
        }
    }

    #[test]
    fn rollback_reopens_inputs() {
        let buf = stream(&["Input:1:main.tex", "{1", "}1", "/1", ""]);
        let mut stx = Synctex::new();
        stx.update(&buf);
        assert!(stx.input_closed(0));

        // Shrink to before the closure record.
        let cut = buf.len() - 3;
        stx.update(&buf[..cut]);
        assert!(!stx.input_closed(0));
        assert_eq!(stx.page_count(), 1);
    }

    #[test]
    fn backward_search_picks_smallest_box() {
        let buf = stream(&[
            "Input:1:main.tex",
            "{1",
            "(1,1:0,500:1000,400,100",
            "x1,10:100,500",
            "x1,20:600,500",
            ")",
            "}1",
            "",
        ]);
        let mut stx = Synctex::new();
        stx.update(&buf);
        let (file, line, _col) = stx.scan(&buf, 0, 120, 500).unwrap();
        assert_eq!(file, "main.tex");
        assert_eq!(line, 10);
        let (_, line, _) = stx.scan(&buf, 0, 590, 500).unwrap();
        assert_eq!(line, 20);
    }

    #[test]
    fn forward_search_prefers_current_page() {
        // Line 15 of main.tex; both pages carry candidates.
        let buf = stream(&[
            "Input:1:main.tex",
            "{1",
            "x1,10:100,200",
            "}1",
            "{2",
            "x1,20:150,250",
            "}2",
            "",
        ]);
        let mut stx = Synctex::new();
        stx.update(&buf);
        stx.set_target(0, Some("main.tex"), 15);
        let hit = stx.find_target(&buf).unwrap();
        assert_eq!(hit, SynctexHit { page: 0, x: 100, y: 200 });
        assert!(!stx.has_target(), "match commits and clears the search");
    }

    #[test]
    fn forward_search_resumes_across_updates() {
        let mut parts = vec![
            "Input:1:main.tex".to_owned(),
            "{1".to_owned(),
            "x1,5:100,200".to_owned(),
            "}1".to_owned(),
            String::new(),
        ];
        let buf1 = parts.join("\n").into_bytes();
        let mut stx = Synctex::new();
        stx.update(&buf1);
        stx.set_target(0, Some("main.tex"), 30);
        // Line 30 not reached yet: a candidate exists but the search stays
        // open.
        let hit = stx.find_target(&buf1).unwrap();
        assert_eq!(hit.page, 0);
        assert!(stx.has_target());

        parts.pop();
        parts.extend(["{2".to_owned(), "x1,30:400,100".to_owned(), "}2".to_owned(), String::new()]);
        let buf2 = parts.join("\n").into_bytes();
        stx.update(&buf2);
        let hit = stx.find_target(&buf2).unwrap();
        assert_eq!(hit, SynctexHit { page: 1, x: 400, y: 100 });
        assert!(!stx.has_target());
    }

    #[test]
    fn forward_search_abandons_on_closed_input() {
        let buf = stream(&["Input:1:main.tex", "{1", "}1", "/1", ""]);
        let mut stx = Synctex::new();
        stx.update(&buf);
        stx.set_target(0, Some("main.tex"), 10);
        assert!(stx.find_target(&buf).is_none());
        assert!(!stx.has_target());
    }
}
