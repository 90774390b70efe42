//! Virtual fonts.
//!
//! A VF maps character codes to DVI sub-programs over its own font table.
//! The whole file stays resident; character programs are ranges into it.

use std::cell::RefCell;
use std::ops::Range;
use std::rc::Rc;

use core_codec::{Fixed, Reader};
use thiserror::Error;

use crate::fonttable::{FontTable, FontTableRef};

const LONG_CHAR: u8 = 242;
const FNT_DEF1: u8 = 243;
const FNT_DEF4: u8 = 246;
const PRE: u8 = 247;
const POST: u8 = 248;
const VF_ID: u8 = 202;

#[derive(Debug, Error)]
pub enum VfError {
    #[error("vf: file is too small")]
    TooSmall,
    #[error("vf: file doesn't start with preamble")]
    NoPreamble,
    #[error("vf: invalid preamble ID")]
    BadId,
    #[error("vf: truncated file")]
    Truncated,
    #[error("vf: invalid opcode {0}")]
    BadOpcode(u8),
}

#[derive(Debug, Clone)]
struct VfChar {
    dvi: Range<usize>,
    width: Fixed,
}

/// A font definition encountered while parsing a VF, handed back to the
/// resource manager so it can resolve the referenced font.
pub struct VfFontDef<'a> {
    pub font_id: u32,
    pub checksum: u32,
    pub scale_factor: Fixed,
    pub design_size: Fixed,
    pub name: &'a str,
}

pub struct Vf {
    buffer: Vec<u8>,
    checksum: u32,
    design_size: Fixed,
    fonts: FontTableRef,
    chars: Vec<Option<VfChar>>,
    default_font: i32,
}

impl Vf {
    /// Parse `data`, calling `define_font` for each embedded font
    /// definition; the callback installs the resolved definition in the
    /// table it is given (index = `font_id`).
    pub fn load(
        data: Vec<u8>,
        mut define_font: impl FnMut(&FontTableRef, VfFontDef<'_>),
    ) -> Result<Vf, VfError> {
        if data.len() < 16 {
            return Err(VfError::TooSmall);
        }
        if data[0] != PRE {
            return Err(VfError::NoPreamble);
        }
        if data[1] != VF_ID {
            return Err(VfError::BadId);
        }

        let comment_len = usize::from(data[2]);
        let fonts: FontTableRef = Rc::new(RefCell::new(FontTable::new()));
        let mut chars: Vec<Option<VfChar>> = Vec::new();
        let mut default_font = -1i32;

        let mut r = Reader::new(&data);
        r.skip(3 + comment_len);
        if data.len() < r.pos() + 8 {
            return Err(VfError::Truncated);
        }
        let checksum = r.u32();
        let design_size = Fixed::make(r.i32());

        while r.pos() < data.len() {
            let op = r.u8();
            if op == POST {
                break;
            } else if op <= LONG_CHAR {
                let (len, code, width) = if op == LONG_CHAR {
                    if data.len() < r.pos() + 12 {
                        return Err(VfError::Truncated);
                    }
                    (r.u32() as usize, r.u32(), Fixed::make(r.i32()))
                } else {
                    if data.len() < r.pos() + 4 {
                        return Err(VfError::Truncated);
                    }
                    (
                        usize::from(op),
                        u32::from(r.u8()),
                        Fixed::make(r.u24() as i32),
                    )
                };
                if data.len() < r.pos() + len {
                    return Err(VfError::Truncated);
                }
                let dvi = r.pos()..r.pos() + len;
                r.skip(len);
                let code = code as usize;
                if code >= chars.len() {
                    chars.resize_with(code + 1, || None);
                }
                chars[code] = Some(VfChar { dvi, width });
            } else if (FNT_DEF1..=FNT_DEF4).contains(&op) {
                let n = usize::from(op - FNT_DEF1) + 1;
                if data.len() < r.pos() + n + 14 {
                    return Err(VfError::Truncated);
                }
                let font_id = r.un(n);
                if default_font == -1 {
                    default_font = font_id as i32;
                }
                let checksum = r.u32();
                let scale_factor = Fixed::make(r.i32());
                let design_size = Fixed::make(r.i32());
                let name_len = usize::from(r.u8()) + usize::from(r.u8());
                if data.len() < r.pos() + name_len {
                    return Err(VfError::Truncated);
                }
                let name = std::str::from_utf8(r.bytes(name_len)).map_err(|_| VfError::Truncated)?;
                define_font(
                    &fonts,
                    VfFontDef {
                        font_id,
                        checksum,
                        scale_factor,
                        design_size,
                        name,
                    },
                );
            } else {
                return Err(VfError::BadOpcode(op));
            }
        }

        Ok(Vf {
            buffer: data,
            checksum,
            design_size,
            fonts,
            chars,
            default_font,
        })
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn design_size(&self) -> Fixed {
        self.design_size
    }

    pub fn fonts(&self) -> FontTableRef {
        self.fonts.clone()
    }

    pub fn default_font(&self) -> i32 {
        self.default_font
    }

    /// The DVI program and width of character `code`, if defined.
    pub fn get(&self, code: u32) -> Option<(&[u8], Fixed)> {
        let c = self.chars.get(code as usize)?.as_ref()?;
        Some((&self.buffer[c.dvi.clone()], c.width))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_vf() -> Vec<u8> {
        let mut out = vec![PRE, VF_ID, 2, b'h', b'i'];
        out.extend_from_slice(&0xBEEFu32.to_be_bytes()); // checksum
        out.extend_from_slice(&(10i32 << 20).to_be_bytes()); // design size
        // fnt_def1: id 0, checksum, scale 1.0, dsize 10.0, name "cmr10"
        out.push(FNT_DEF1);
        out.push(0);
        out.extend_from_slice(&0u32.to_be_bytes());
        out.extend_from_slice(&(1i32 << 20).to_be_bytes());
        out.extend_from_slice(&(10i32 << 20).to_be_bytes());
        out.push(0);
        out.push(5);
        out.extend_from_slice(b"cmr10");
        // short char: code 'A', width 0.5, 3-byte program
        out.push(3);
        out.push(b'A');
        out.extend_from_slice(&(1u32 << 19).to_be_bytes()[1..]); // u24 width
        out.extend_from_slice(&[141, 142, 138]); // PUSH POP NOP
        out.push(POST);
        out
    }

    #[test]
    fn parses_chars_and_font_defs() {
        let mut seen = Vec::new();
        let vf = Vf::load(sample_vf(), |_fonts, def| {
            seen.push((def.font_id, def.name.to_owned(), def.scale_factor));
        })
        .unwrap();
        assert_eq!(seen, vec![(0, "cmr10".to_owned(), Fixed::make(1 << 20))]);
        assert_eq!(vf.default_font(), 0);
        let (prog, width) = vf.get(u32::from(b'A')).unwrap();
        assert_eq!(prog, &[141, 142, 138]);
        assert_eq!(width, Fixed::make(1 << 19));
        assert!(vf.get(u32::from(b'B')).is_none());
    }

    #[test]
    fn rejects_bad_preamble() {
        assert!(matches!(
            Vf::load(vec![0u8; 20], |_, _| {}),
            Err(VfError::NoPreamble)
        ));
    }
}
