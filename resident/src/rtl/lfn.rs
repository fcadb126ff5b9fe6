//! Long File Name Mangling
//!
//! Host file names that do not fit the DOS 8.3 scheme are shown to DOS as
//! a short prefix of the name, a `~` and a few hex digits of a hash of the
//! full host name:
//!
//! ```text
//! "Long File Name.html"  ->  "LONG~3F1.HTM"
//! ```
//!
//! The hash must stay stable: DOS programs store mangled names in their own
//! files, and the redirector finds the host name again by mangling every
//! entry of the parent directory and comparing.

use super::nls::Utf8ToOem;

/// Space-padded 8+3 name as stored in FCBs, SFTs and directory entries
pub type FcbName = [u8; 11];

/// Largest supported number of hash digits
pub const MAX_HASH_DIGITS: u8 = 4;

/// Longest host name component considered for 8.3 rendering
const MAX_COMPONENT: usize = 255;

/// Bit offsets of the hash nibbles, rotated right by one before use
const HASH_NIBBLE_SHIFTS: [u8; 4] = [0, 4, 8, 12];

static HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Punctuation DOS accepts in file names
const FCB_PUNCTUATION: &[u8] = b"!#$%&'()-@^_`{}~";

/// Check whether an (uppercased) OEM byte may appear in an 8.3 name
#[inline]
pub fn is_valid_fcb_char(c: u8) -> bool {
    c >= 0x80 || c.is_ascii_uppercase() || c.is_ascii_digit() || FCB_PUNCTUATION.contains(&c)
}

/// Uppercase and sanitize one OEM byte for an 8.3 name
#[inline]
fn fcb_char(c: u8) -> u8 {
    let c = c.to_ascii_uppercase();
    if is_valid_fcb_char(c) {
        c
    } else {
        b'_'
    }
}

/// Hash a host file name, folded to `4 * hash_digits` bits
pub fn lfn_name_hash(name: &[u8], hash_digits: u8) -> u16 {
    let mut hval: u32 = 0;
    for &b in name.iter().rev() {
        hval = (b as u32)
            .wrapping_add(hval << 6)
            .wrapping_add(hval << 16)
            .wrapping_sub(hval);
    }

    let bits = 4 * hash_digits.min(MAX_HASH_DIGITS) as u32;
    let mask = (1u32 << bits) - 1;
    (((hval >> bits) ^ hval) & mask) as u16
}

/// Build a mangled 8.3 name.
///
/// `name` is the OEM rendering of the host name and `hash` its
/// [`lfn_name_hash`]. The base keeps at most `7 - hash_digits` characters so
/// that base, `~` and digits fit in eight columns.
pub fn mangle_to_fcb_name(name: &[u8], hash: u16, hash_digits: u8) -> FcbName {
    let digits = hash_digits.clamp(1, MAX_HASH_DIGITS) as usize;
    let mut fcb = [b' '; 11];

    let trimmed = trim_leading_dots(name);
    let (base, ext) = match trimmed.iter().rposition(|&c| c == b'.') {
        Some(dot) => (&trimmed[..dot], &trimmed[dot + 1..]),
        None => (trimmed, &[][..]),
    };

    let mut pos = 0;
    for &c in base.iter().take(8 - 1 - digits) {
        fcb[pos] = fcb_char(c);
        pos += 1;
    }

    fcb[pos] = b'~';
    pos += 1;
    for i in 0..digits {
        let shift = HASH_NIBBLE_SHIFTS[(i + digits - 1) % digits];
        fcb[pos] = HEX_DIGITS[((hash >> shift) & 0xF) as usize];
        pos += 1;
    }

    for (i, &c) in ext.iter().take(3).enumerate() {
        fcb[8 + i] = fcb_char(c);
    }

    fcb
}

fn trim_leading_dots(name: &[u8]) -> &[u8] {
    let start = name.iter().position(|&c| c != b'.').unwrap_or(name.len());
    &name[start..]
}

/// Convert a name that is already valid 8.3 into FCB form.
///
/// Lowercase letters are accepted and uppercased. Returns `None` for names
/// that would need mangling, and for wildcards.
pub fn to_fcb_name(name: &[u8]) -> Option<FcbName> {
    let mut fcb = [b' '; 11];

    if name == b"." || name == b".." {
        fcb[..name.len()].copy_from_slice(name);
        return Some(fcb);
    }

    let (base, ext) = match name.iter().position(|&c| c == b'.') {
        Some(dot) => (&name[..dot], &name[dot + 1..]),
        None => (name, &[][..]),
    };
    if base.is_empty() || base.len() > 8 || ext.len() > 3 {
        return None;
    }

    for (dst, &c) in fcb.iter_mut().zip(base.iter()) {
        let c = c.to_ascii_uppercase();
        if !is_valid_fcb_char(c) {
            return None;
        }
        *dst = c;
    }
    for (dst, &c) in fcb[8..].iter_mut().zip(ext.iter()) {
        let c = c.to_ascii_uppercase();
        if !is_valid_fcb_char(c) {
            return None;
        }
        *dst = c;
    }

    Some(fcb)
}

/// Parse a DOS path component, which may hold `?` and `*` wildcards,
/// into an FCB search template.
pub fn to_fcb_template(name: &[u8]) -> FcbName {
    let mut fcb = [b' '; 11];
    let (base, ext) = match name.iter().position(|&c| c == b'.') {
        Some(dot) => (&name[..dot], &name[dot + 1..]),
        None => (name, &[][..]),
    };

    fill_template(&mut fcb[..8], base);
    fill_template(&mut fcb[8..], ext);
    fcb
}

fn fill_template(field: &mut [u8], part: &[u8]) {
    for (i, &c) in part.iter().take(field.len()).enumerate() {
        if c == b'*' {
            for f in &mut field[i..] {
                *f = b'?';
            }
            return;
        }
        field[i] = c.to_ascii_uppercase();
    }
}

/// Compute the 8.3 name DOS sees for a host directory entry.
///
/// Returns `None` when the name cannot be shown: it is not valid 8.3 and
/// mangling is disabled (`hash_digits == 0`), or it is too long to examine.
pub fn fcb_name_from_host(host_name: &[u8], hash_digits: u8) -> Option<FcbName> {
    let mut oem = [0u8; MAX_COMPONENT];
    let mut len = 0;
    let mut lossless = true;

    for (b, exact) in Utf8ToOem::new(host_name) {
        if len == oem.len() {
            return None;
        }
        oem[len] = b;
        len += 1;
        lossless &= exact;
    }
    let oem = &oem[..len];

    if lossless {
        if let Some(fcb) = to_fcb_name(oem) {
            return Some(fcb);
        }
    }
    if hash_digits == 0 || oem.is_empty() {
        return None;
    }

    let hash = lfn_name_hash(host_name, hash_digits);
    Some(mangle_to_fcb_name(oem, hash, hash_digits))
}

/// Match an FCB name against a template where `?` matches any byte
pub fn fcb_matches(template: &FcbName, name: &FcbName) -> bool {
    template
        .iter()
        .zip(name.iter())
        .all(|(&t, &n)| t == b'?' || t == n)
}

/// Whether a DOS name component can be a mangled name
#[inline]
pub fn looks_mangled(component: &[u8]) -> bool {
    component.contains(&b'~')
}
