//! Font map (`pdftex.map` and friends).
//!
//! Each line maps a TeX font name to a PostScript name, an optional `"…"`
//! PostScript snippet, and `<`-included files: an include ending in `.enc`
//! is the encoding vector, anything else is the font file. Malformed lines
//! are skipped. Several map files load as one logical concatenation.

use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FontmapEntry {
    pub tex_name: String,
    pub ps_name: Option<String>,
    pub ps_snippet: Option<String>,
    pub enc_file: Option<String>,
    pub font_file: Option<String>,
}

pub struct Fontmap {
    entries: HashMap<String, FontmapEntry>,
}

fn is_ws(c: u8) -> bool {
    c == b' ' || c == b'\t'
}

impl Fontmap {
    /// Parse the logical concatenation of `sources` (absent files skip).
    pub fn load(sources: &[Option<Vec<u8>>]) -> Fontmap {
        let mut entries = HashMap::new();
        for data in sources.iter().flatten() {
            for line in data.split(|&c| c == b'\n') {
                if let Some(entry) = parse_line(line) {
                    entries.entry(entry.tex_name.clone()).or_insert(entry);
                }
            }
        }
        Fontmap { entries }
    }

    pub fn lookup(&self, name: &str) -> Option<&FontmapEntry> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_line(line: &[u8]) -> Option<FontmapEntry> {
    let mut pos = 0;
    let skip_ws = |pos: &mut usize| {
        while *pos < line.len() && is_ws(line[*pos]) {
            *pos += 1;
        }
    };
    let word = |pos: &mut usize| {
        let start = *pos;
        while *pos < line.len() && !is_ws(line[*pos]) {
            *pos += 1;
        }
        String::from_utf8_lossy(&line[start..*pos]).into_owned()
    };

    skip_ws(&mut pos);
    if pos == line.len() || line[pos] == b'%' {
        return None;
    }

    let mut entry = FontmapEntry {
        tex_name: word(&mut pos),
        ..FontmapEntry::default()
    };

    skip_ws(&mut pos);
    if pos < line.len() && line[pos] != b'<' && line[pos] != b'"' {
        entry.ps_name = Some(word(&mut pos));
        skip_ws(&mut pos);
    }

    while pos < line.len() {
        match line[pos] {
            b'"' => {
                pos += 1;
                let start = pos;
                while pos < line.len() && line[pos] != b'"' {
                    pos += 1;
                }
                if pos == line.len() {
                    return None;
                }
                entry.ps_snippet = Some(String::from_utf8_lossy(&line[start..pos]).into_owned());
                pos += 1;
            }
            b'<' => {
                pos += 1;
                skip_ws(&mut pos);
                if pos < line.len() && line[pos] == b'[' {
                    pos += 1;
                }
                skip_ws(&mut pos);
                let file = word(&mut pos);
                if file.ends_with(".enc") {
                    entry.enc_file = Some(file);
                } else {
                    entry.font_file = Some(file);
                }
            }
            _ => return None,
        }
        skip_ws(&mut pos);
    }

    Some(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_one(text: &str) -> Fontmap {
        Fontmap::load(&[Some(text.as_bytes().to_vec())])
    }

    #[test]
    fn parses_typical_lines() {
        let map = load_one(
            "% comment\n\
             cmr10 CMR10 <cmr10.pfb\n\
             ptmr8r Times-Roman \"TeXBase1Encoding ReEncodeFont\" <8r.enc <utmr8a.pfb\n",
        );
        let cmr = map.lookup("cmr10").unwrap();
        assert_eq!(cmr.ps_name.as_deref(), Some("CMR10"));
        assert_eq!(cmr.font_file.as_deref(), Some("cmr10.pfb"));
        assert_eq!(cmr.enc_file, None);

        let ptm = map.lookup("ptmr8r").unwrap();
        assert_eq!(ptm.enc_file.as_deref(), Some("8r.enc"));
        assert_eq!(ptm.font_file.as_deref(), Some("utmr8a.pfb"));
        assert_eq!(
            ptm.ps_snippet.as_deref(),
            Some("TeXBase1Encoding ReEncodeFont")
        );
    }

    #[test]
    fn malformed_lines_skip() {
        let map = load_one("good <f.pfb\nbad \"unterminated\nalso-good <g.otf\n");
        assert!(map.lookup("good").is_some());
        assert!(map.lookup("bad").is_none());
        assert!(map.lookup("also-good").is_some());
    }

    #[test]
    fn concatenation_prefers_first() {
        let map = Fontmap::load(&[
            Some(b"f <first.pfb\n".to_vec()),
            None,
            Some(b"f <second.pfb\ng <only.pfb\n".to_vec()),
        ]);
        assert_eq!(map.lookup("f").unwrap().font_file.as_deref(), Some("first.pfb"));
        assert!(map.lookup("g").is_some());
    }
}
