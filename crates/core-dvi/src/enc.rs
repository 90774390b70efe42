//! TeX encoding vectors (`.enc` files).
//!
//! A PostScript-flavored file: the first `/name` names the encoding, `[`
//! opens the 256-entry glyph-name vector, `%` comments run to end of line.

use tracing::warn;

pub struct Enc {
    name: Option<String>,
    entries: Vec<Option<String>>,
}

impl Enc {
    pub fn load(data: &[u8]) -> Enc {
        let mut name = None;
        let mut entries: Vec<Option<String>> = vec![None; 256];
        let mut entry: i32 = -1;

        let mut i = 0;
        while i < data.len() {
            match data[i] {
                b'%' => {
                    while i < data.len() && data[i] != b'\n' {
                        i += 1;
                    }
                }
                b'[' => {
                    entry = 0;
                    i += 1;
                }
                b']' => break,
                b'/' => {
                    i += 1;
                    let start = i;
                    while i < data.len() && !is_delim_or_ws(data[i]) {
                        i += 1;
                    }
                    let text = String::from_utf8_lossy(&data[start..i]).into_owned();
                    if entry == -1 {
                        if name.is_some() {
                            warn!(target: "dvi.res", new = text.as_str(), "encoding named twice");
                        }
                        name = Some(text);
                    } else if entry <= 255 {
                        entries[entry as usize] = Some(text);
                        entry += 1;
                    } else {
                        warn!(target: "dvi.res", extra = text.as_str(), "extra encoding entry");
                    }
                }
                _ => i += 1,
            }
        }

        if entry < 256 {
            warn!(target: "dvi.res", entries = entry, "incomplete encoding");
        }

        Enc { name, entries }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Glyph name for a byte code, if the vector maps it.
    pub fn get(&self, code: u8) -> Option<&str> {
        self.entries[usize::from(code)].as_deref()
    }
}

fn is_delim_or_ws(c: u8) -> bool {
    matches!(c, b'/' | b'%' | b'[' | b']' | b' ' | b'\t' | b'\n' | b'\r')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_and_entries() {
        let src = b"% comment line\n/TestEncoding [\n/grave /acute % accents\n/.notdef\n] def\n";
        let enc = Enc::load(src);
        assert_eq!(enc.name(), Some("TestEncoding"));
        assert_eq!(enc.get(0), Some("grave"));
        assert_eq!(enc.get(1), Some("acute"));
        assert_eq!(enc.get(2), Some(".notdef"));
        assert_eq!(enc.get(3), None);
    }

    #[test]
    fn name_before_bracket_only() {
        let enc = Enc::load(b"/E1 [ /a ] /late");
        assert_eq!(enc.name(), Some("E1"));
        assert_eq!(enc.get(0), Some("a"));
    }
}
