//! Fixed-point Scaling
//!
//! Mickey to pixel conversion with a carried remainder, and the grid snap
//! applied to coordinates reported to programs.

/// Scale a relative delta by `pixels_per_unit / mickeys_per_unit`.
///
/// The fractional part that does not fit in a whole pixel is returned as the
/// new remainder and must be fed back on the next call, so no motion is lost.
/// Division truncates toward zero, which keeps the remainder's sign equal to
/// the sign of the carried numerator.
///
/// Returns `(value, remainder)`.
pub fn scale_with_carry(
    delta: i16,
    mickeys_per_unit: i16,
    pixels_per_unit: i16,
    remainder: i16,
) -> (i16, i16) {
    let divisor = (mickeys_per_unit as i32).max(1);
    let numerator = delta as i32 * pixels_per_unit as i32 + remainder as i32;

    let value = numerator / divisor;
    let rem = numerator % divisor;

    (saturate_i16(value), rem as i16)
}

/// Rescale an absolute sample from `0..=from_max` to `0..=to_max`.
pub fn rescale(value: u16, from_max: u16, to_max: u16) -> u16 {
    if from_max == 0 {
        return 0;
    }
    ((value as u32 * to_max as u32) / from_max as u32) as u16
}

/// Snap a coordinate down to a power-of-two grid.
#[inline]
pub fn snap(value: i16, granularity: i16) -> i16 {
    value & granularity.wrapping_neg()
}

#[inline]
fn saturate_i16(value: i32) -> i16 {
    value.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Position in units of 1/mickeys pixel.
    fn fixed_position(values: &[i16], rem: i16, mickeys: i16) -> i32 {
        values.iter().map(|&v| v as i32).sum::<i32>() * mickeys as i32 + rem as i32
    }

    #[test]
    fn test_default_ratio() {
        // 8 mickeys per 8 pixels is 1:1
        assert_eq!(scale_with_carry(5, 8, 8, 0), (5, 0));
        assert_eq!(scale_with_carry(-5, 8, 8, 0), (-5, 0));
        // 16 mickeys per 8 pixels halves and carries
        assert_eq!(scale_with_carry(3, 16, 8, 0), (1, 8));
        assert_eq!(scale_with_carry(1, 16, 8, 8), (1, 0));
    }

    #[test]
    fn test_carry_conserves_position() {
        let deltas: [i16; 7] = [3, -7, 11, 1, 1, -2, 5];
        for &mickeys in &[1i16, 3, 8, 16, 25] {
            let mut rem = 0;
            let mut values = [0i16; 7];
            for (i, &d) in deltas.iter().enumerate() {
                let (v, r) = scale_with_carry(d, mickeys, 8, rem);
                values[i] = v;
                rem = r;
            }
            let sum: i16 = deltas.iter().sum();
            let (v, r) = scale_with_carry(sum, mickeys, 8, 0);
            assert_eq!(
                fixed_position(&values, rem, mickeys),
                fixed_position(&[v], r, mickeys)
            );
        }
    }

    #[test]
    fn test_carry_same_sign_matches_sum() {
        let deltas: [i16; 5] = [1, 2, 3, 1, 7];
        let mut rem = 0;
        let mut pos = 0i32;
        for &d in &deltas {
            let (v, r) = scale_with_carry(d, 16, 8, rem);
            pos += v as i32;
            rem = r;
        }
        let (v, r) = scale_with_carry(14, 16, 8, 0);
        assert_eq!(pos, v as i32);
        assert_eq!(rem, r);
    }

    #[test]
    fn test_zero_mickeys_is_safe() {
        assert_eq!(scale_with_carry(4, 0, 8, 0), (32, 0));
    }

    #[test]
    fn test_snap() {
        assert_eq!(snap(13, 8), 8);
        assert_eq!(snap(639, 8), 632);
        assert_eq!(snap(7, 2), 6);
        assert_eq!(snap(7, 1), 7);
        for v in [-9i16, 0, 1, 15, 16, 319, 640] {
            for g in [1i16, 2, 4, 8, 16] {
                assert_eq!(snap(snap(v, g), g), snap(v, g));
            }
        }
    }

    #[test]
    fn test_rescale() {
        assert_eq!(rescale(0, 0xFFFF, 639), 0);
        assert_eq!(rescale(0xFFFF, 0xFFFF, 639), 639);
        assert_eq!(rescale(0x8000, 0xFFFF, 639), 319);
    }
}
