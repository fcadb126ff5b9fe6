//! National Language Support
//!
//! Translation between the DOS OEM code page (437) and the UTF-8 names the
//! shared-folder host speaks once UTF-8 mode is enabled.

/// Byte used for characters that have no code page 437 equivalent
pub const REPLACEMENT_OEM: u8 = b'_';

/// Unicode code points for OEM bytes 0x80-0xFF
static CP437_HIGH: [u16; 128] = [
    0x00C7, 0x00FC, 0x00E9, 0x00E2, 0x00E4, 0x00E0, 0x00E5, 0x00E7, // 80
    0x00EA, 0x00EB, 0x00E8, 0x00EF, 0x00EE, 0x00EC, 0x00C4, 0x00C5, // 88
    0x00C9, 0x00E6, 0x00C6, 0x00F4, 0x00F6, 0x00F2, 0x00FB, 0x00F9, // 90
    0x00FF, 0x00D6, 0x00DC, 0x00A2, 0x00A3, 0x00A5, 0x20A7, 0x0192, // 98
    0x00E1, 0x00ED, 0x00F3, 0x00FA, 0x00F1, 0x00D1, 0x00AA, 0x00BA, // A0
    0x00BF, 0x2310, 0x00AC, 0x00BD, 0x00BC, 0x00A1, 0x00AB, 0x00BB, // A8
    0x2591, 0x2592, 0x2593, 0x2502, 0x2524, 0x2561, 0x2562, 0x2556, // B0
    0x2555, 0x2563, 0x2551, 0x2557, 0x255D, 0x255C, 0x255B, 0x2510, // B8
    0x2514, 0x2534, 0x252C, 0x251C, 0x2500, 0x253C, 0x255E, 0x255F, // C0
    0x255A, 0x2554, 0x2569, 0x2566, 0x2560, 0x2550, 0x256C, 0x2567, // C8
    0x2568, 0x2564, 0x2565, 0x2559, 0x2558, 0x2552, 0x2553, 0x256B, // D0
    0x256A, 0x2518, 0x250C, 0x2588, 0x2584, 0x258C, 0x2590, 0x2580, // D8
    0x03B1, 0x00DF, 0x0393, 0x03C0, 0x03A3, 0x03C3, 0x00B5, 0x03C4, // E0
    0x03A6, 0x0398, 0x03A9, 0x03B4, 0x221E, 0x03C6, 0x03B5, 0x2229, // E8
    0x2261, 0x00B1, 0x2265, 0x2264, 0x2320, 0x2321, 0x00F7, 0x2248, // F0
    0x00B0, 0x2219, 0x00B7, 0x221A, 0x207F, 0x00B2, 0x25A0, 0x00A0, // F8
];

/// Map one OEM byte to its Unicode code point
#[inline]
pub fn oem_to_unicode(byte: u8) -> u16 {
    if byte < 0x80 {
        byte as u16
    } else {
        CP437_HIGH[(byte - 0x80) as usize]
    }
}

/// Map a Unicode code point to an OEM byte, if one exists
pub fn unicode_to_oem(cp: u32) -> Option<u8> {
    if cp < 0x80 {
        return Some(cp as u8);
    }
    CP437_HIGH
        .iter()
        .position(|&c| c as u32 == cp)
        .map(|i| 0x80 + i as u8)
}

/// Encode OEM bytes as UTF-8 into `out`, returning the encoded length.
///
/// Returns `None` if `out` is too small.
pub fn oem_to_utf8(src: &[u8], out: &mut [u8]) -> Option<usize> {
    let mut len = 0;
    for &b in src {
        let cp = oem_to_unicode(b);
        let n = utf8_len(cp);
        if len + n > out.len() {
            return None;
        }
        match n {
            1 => out[len] = cp as u8,
            2 => {
                out[len] = 0xC0 | (cp >> 6) as u8;
                out[len + 1] = 0x80 | (cp & 0x3F) as u8;
            }
            _ => {
                out[len] = 0xE0 | (cp >> 12) as u8;
                out[len + 1] = 0x80 | ((cp >> 6) & 0x3F) as u8;
                out[len + 2] = 0x80 | (cp & 0x3F) as u8;
            }
        }
        len += n;
    }
    Some(len)
}

#[inline]
fn utf8_len(cp: u16) -> usize {
    if cp < 0x80 {
        1
    } else if cp < 0x800 {
        2
    } else {
        3
    }
}

/// Iterator decoding UTF-8 into OEM bytes.
///
/// Yields `(byte, lossless)`; characters outside code page 437 and malformed
/// sequences come out as [`REPLACEMENT_OEM`] with `lossless == false`.
pub struct Utf8ToOem<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Utf8ToOem<'a> {
    pub fn new(src: &'a [u8]) -> Self {
        Self { src, pos: 0 }
    }
}

impl Iterator for Utf8ToOem<'_> {
    type Item = (u8, bool);

    fn next(&mut self) -> Option<(u8, bool)> {
        let lead = *self.src.get(self.pos)?;
        let (mut cp, extra) = match lead {
            0x00..=0x7F => (lead as u32, 0),
            0xC0..=0xDF => ((lead & 0x1F) as u32, 1),
            0xE0..=0xEF => ((lead & 0x0F) as u32, 2),
            0xF0..=0xF7 => ((lead & 0x07) as u32, 3),
            _ => {
                self.pos += 1;
                return Some((REPLACEMENT_OEM, false));
            }
        };
        self.pos += 1;
        for _ in 0..extra {
            match self.src.get(self.pos) {
                Some(&b) if b & 0xC0 == 0x80 => {
                    cp = (cp << 6) | (b & 0x3F) as u32;
                    self.pos += 1;
                }
                _ => return Some((REPLACEMENT_OEM, false)),
            }
        }
        match unicode_to_oem(cp) {
            Some(b) => Some((b, true)),
            None => Some((REPLACEMENT_OEM, false)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passthrough() {
        let mut out = [0u8; 16];
        let n = oem_to_utf8(b"README.TXT", &mut out).unwrap();
        assert_eq!(&out[..n], b"README.TXT");
    }

    #[test]
    fn test_high_half_round_trip() {
        for b in 0x80..=0xFFu8 {
            let mut out = [0u8; 3];
            let n = oem_to_utf8(&[b], &mut out).unwrap();
            let back: Vec<_> = Utf8ToOem::new(&out[..n]).collect();
            assert_eq!(back, vec![(b, true)]);
        }
    }

    #[test]
    fn test_unmappable() {
        // U+4E2D has no OEM equivalent
        let decoded: Vec<_> = Utf8ToOem::new("a\u{4E2D}".as_bytes()).collect();
        assert_eq!(decoded, vec![(b'a', true), (REPLACEMENT_OEM, false)]);
    }

    #[test]
    fn test_output_too_small() {
        let mut out = [0u8; 2];
        assert!(oem_to_utf8(&[0xB0], &mut out).is_none());
    }
}
