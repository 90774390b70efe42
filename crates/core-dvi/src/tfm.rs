//! TeX Font Metrics.
//!
//! The char-info word packs table indices as
//! `width:8 height:4 depth:4 italic:6 tag:2 remainder:8`; widths, heights
//! and depths are design-size-relative fixed-point values.

use core_codec::bytes::decode_i32;
use core_codec::{Fixed, Reader};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TfmError {
    #[error("tfm: truncated file")]
    Truncated,
    #[error("tfm: inconsistent length values (file says {file}, computed {computed})")]
    InconsistentLength { file: u16, computed: u32 },
    #[error("tfm: header is too small")]
    HeaderTooSmall,
    #[error("tfm: character codes out of range")]
    BadCharRange,
}

const PARAM_SPACE: usize = 1;
const PARAM_SPACE_STRETCH: usize = 2;
const PARAM_SPACE_SHRINK: usize = 3;
const PARAM_QUAD: usize = 5;

pub struct Tfm {
    checksum: u32,
    first_char: u16,
    last_char: u16,
    design_size: Fixed,
    char_table: Vec<u32>,
    width_table: Vec<Fixed>,
    height_table: Vec<Fixed>,
    depth_table: Vec<Fixed>,
    italic_table: Vec<Fixed>,
    params: [Fixed; 7],
    ascent: Fixed,
    descent: Fixed,
}

impl Tfm {
    pub fn load(data: &[u8]) -> Result<Tfm, TfmError> {
        if data.len() < 24 {
            return Err(TfmError::Truncated);
        }
        let mut r = Reader::new(data);
        let lf = r.u16(); // length of entire file, in words
        let lh = r.u16(); // length of header, in words
        let bc = r.u16(); // smallest character code
        let ec = r.u16(); // largest character code
        let nw = r.u16(); // width table words
        let nh = r.u16(); // height table words
        let nd = r.u16(); // depth table words
        let ni = r.u16(); // italic correction table words
        let nl = r.u16(); // lig/kern table words
        let nk = r.u16(); // kern table words
        let ne = r.u16(); // extensible character table words
        let np = r.u16(); // font parameter words

        let computed = 6
            + u32::from(lh)
            + (u32::from(ec) - u32::from(bc) + 1)
            + u32::from(nw)
            + u32::from(nh)
            + u32::from(nd)
            + u32::from(ni)
            + u32::from(nl)
            + u32::from(nk)
            + u32::from(ne)
            + u32::from(np);
        if computed != u32::from(lf) {
            return Err(TfmError::InconsistentLength { file: lf, computed });
        }
        if lh < 2 {
            return Err(TfmError::HeaderTooSmall);
        }
        if bc >= ec || ec > 255 || ne > 256 {
            return Err(TfmError::BadCharRange);
        }

        let body = &data[24..];
        let body_words = usize::from(lf) - 6;
        if body.len() < body_words * 4 {
            return Err(TfmError::Truncated);
        }

        let word = |i: usize| decode_i32(&body[i * 4..]);
        let checksum = word(0) as u32;
        let design_size = Fixed::make(word(1));

        let char_count = usize::from(ec - bc + 1);
        let mut at = usize::from(lh);
        let mut take = |n: usize| {
            let start = at;
            at += n;
            (start..at).map(word).collect::<Vec<i32>>()
        };

        let char_table: Vec<u32> = take(char_count).into_iter().map(|v| v as u32).collect();
        let width_table: Vec<Fixed> = take(usize::from(nw)).into_iter().map(Fixed::make).collect();
        let height_table: Vec<Fixed> = take(usize::from(nh)).into_iter().map(Fixed::make).collect();
        let depth_table: Vec<Fixed> = take(usize::from(nd)).into_iter().map(Fixed::make).collect();
        let italic_table: Vec<Fixed> = take(usize::from(ni)).into_iter().map(Fixed::make).collect();

        let mut params = [Fixed::ZERO; 7];
        let param_base = body_words - usize::from(np);
        for (i, p) in params.iter_mut().enumerate().take(usize::from(np).min(7)) {
            *p = Fixed::make(word(param_base + i));
        }

        let ascent = height_table.iter().copied().max().unwrap_or(Fixed::ZERO);
        let descent = depth_table.iter().copied().max().unwrap_or(Fixed::ZERO);

        Ok(Tfm {
            checksum,
            first_char: bc,
            last_char: ec,
            design_size,
            char_table,
            width_table,
            height_table,
            depth_table,
            italic_table,
            params,
            ascent,
            descent,
        })
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn first_char(&self) -> u16 {
        self.first_char
    }

    pub fn last_char(&self) -> u16 {
        self.last_char
    }

    pub fn design_size(&self) -> Fixed {
        self.design_size
    }

    pub fn ascent(&self) -> Fixed {
        self.ascent.mul(self.design_size)
    }

    pub fn descent(&self) -> Fixed {
        self.descent.mul(self.design_size)
    }

    fn scaled_param(&self, p: usize) -> Fixed {
        self.params[p].mul(self.design_size)
    }

    pub fn space(&self) -> Fixed {
        self.scaled_param(PARAM_SPACE)
    }

    pub fn space_stretch(&self) -> Fixed {
        self.scaled_param(PARAM_SPACE_STRETCH)
    }

    pub fn space_shrink(&self) -> Fixed {
        self.scaled_param(PARAM_SPACE_SHRINK)
    }

    pub fn quad(&self) -> Fixed {
        let q = self.scaled_param(PARAM_QUAD);
        if q == Fixed::ZERO {
            self.design_size
        } else {
            q
        }
    }

    fn char_index(&self, c: i32) -> Option<usize> {
        if c < i32::from(self.first_char) || c > i32::from(self.last_char) {
            None
        } else {
            Some((c - i32::from(self.first_char)) as usize)
        }
    }

    pub fn char_width(&self, c: i32) -> Fixed {
        match self.char_index(c) {
            Some(i) => self.width_table[((self.char_table[i] >> 24) & 0xFF) as usize],
            None => Fixed::ZERO,
        }
    }

    pub fn char_height(&self, c: i32) -> Fixed {
        match self.char_index(c) {
            Some(i) => self.height_table[((self.char_table[i] >> 20) & 0x0F) as usize],
            None => Fixed::ZERO,
        }
    }

    pub fn char_depth(&self, c: i32) -> Fixed {
        match self.char_index(c) {
            Some(i) => self.depth_table[((self.char_table[i] >> 16) & 0x0F) as usize],
            None => Fixed::ZERO,
        }
    }

    pub fn italic_corr(&self, c: i32) -> Fixed {
        match self.char_index(c) {
            Some(i) => self.italic_table[((self.char_table[i] >> 10) & 0x3F) as usize]
                .mul(self.design_size),
            None => Fixed::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal TFM: chars 'A'..='B', two widths, one height/depth.
    fn sample_tfm() -> Vec<u8> {
        let bc = 65u16;
        let ec = 66u16;
        let lh = 2u16;
        let (nw, nh, nd, ni, nl, nk, ne, np) = (2u16, 2u16, 2u16, 1u16, 0u16, 0u16, 0u16, 7u16);
        let lf = 6 + lh + (ec - bc + 1) + nw + nh + nd + ni + nl + nk + ne + np;

        let mut out = Vec::new();
        for v in [lf, lh, bc, ec, nw, nh, nd, ni, nl, nk, ne, np] {
            out.extend_from_slice(&v.to_be_bytes());
        }
        let mut word = |v: i32| out.extend_from_slice(&v.to_be_bytes());
        // header: checksum, design size 10.0
        word(0xCAFE);
        word(10 << 20);
        // char infos: 'A' -> width 1 height 1 depth 1, 'B' -> width 1 height 1 depth 0
        word(((1 << 24) | (1 << 20) | (1 << 16)) as i32);
        word(((1 << 24) | (1 << 20)) as i32);
        // widths [0, 0.5], heights [0, 0.7], depths [0, 0.2], italic [0]
        word(0);
        word(1 << 19);
        word(0);
        word((7 << 20) / 10);
        word(0);
        word((2 << 20) / 10);
        word(0);
        // params: slant, space=0.3, stretch, shrink, xheight, quad=1.0, extra
        word(0);
        word((3 << 20) / 10);
        word(0);
        word(0);
        word(0);
        word(1 << 20);
        word(0);
        out
    }

    #[test]
    fn loads_and_indexes() {
        let tfm = Tfm::load(&sample_tfm()).unwrap();
        assert_eq!(tfm.checksum(), 0xCAFE);
        assert_eq!(tfm.first_char(), 65);
        assert_eq!(tfm.last_char(), 66);
        assert_eq!(tfm.design_size().to_f64(), 10.0);
        assert_eq!(tfm.char_width(65).to_f64(), 0.5);
        assert_eq!(tfm.char_width(66).to_f64(), 0.5);
        assert_eq!(tfm.char_depth(66).to_f64(), 0.0);
        // Out-of-range characters measure zero.
        assert_eq!(tfm.char_width(0), Fixed::ZERO);
        assert_eq!(tfm.char_width(200), Fixed::ZERO);
    }

    #[test]
    fn params_scale_by_design_size() {
        let tfm = Tfm::load(&sample_tfm()).unwrap();
        assert!((tfm.space().to_f64() - 3.0).abs() < 1e-4);
        assert_eq!(tfm.quad().to_f64(), 10.0);
    }

    #[test]
    fn inconsistent_length_rejected() {
        let mut data = sample_tfm();
        data[0] = 0;
        data[1] = 99;
        assert!(matches!(
            Tfm::load(&data),
            Err(TfmError::InconsistentLength { .. })
        ));
    }
}
