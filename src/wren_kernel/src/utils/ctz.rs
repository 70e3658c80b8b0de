//! Bit scan operations for process maps
#![allow(clippy::needless_bool)]

/// Indicates whether the target has a usable count-trailing-zeros (or
/// count-leading-zeros plus bit-reverse) instruction.
const HAS_CTZ: bool = if cfg!(target_arch = "riscv32") || cfg!(target_arch = "riscv64") {
    cfg!(target_feature = "b") || cfg!(target_feature = "experimental-b")
} else if cfg!(target_arch = "arm") {
    // (It's actually CLZ + RBIT)
    // Thumb-2
    cfg!(target_feature = "v6t2")
        // Armv5T and later, only in Arm mode
        || (cfg!(target_feature = "v5te") && !cfg!(target_feature = "thumb-mode"))
} else if cfg!(target_arch = "msp430") || cfg!(target_arch = "avr") {
    false
} else {
    // AArch64: All
    // x86: 80386 and later
    true
};

/// Isolate the least-significant set bit of `x`.
#[inline]
const fn first_set_bit_mask(x: u32) -> u32 {
    x & x.wrapping_neg()
}

/// A de Bruijn sequence mapping each isolated bit of a 32-bit word to a
/// distinct 5-bit index.
const DEBRUIJN32: u32 = 0x077c_b531;

#[rustfmt::skip]
const DEBRUIJN32_LUT: [u8; 32] = [
     0,  1, 28,  2, 29, 14, 24,  3,
    30, 22, 20, 15, 25, 17,  4,  8,
    31, 27, 13, 23, 21, 19, 16,  7,
    26, 12, 18,  6, 11,  5, 10,  9,
];

/// Implements `trailing_zeros` using a [de Bruijn sequence]. Returns `32` if
/// `x` is zero.
///
/// [de Bruijn sequence]: https://en.wikipedia.org/wiki/De_Bruijn_sequence
#[inline]
fn ctz32_debruijn(x: u32) -> u32 {
    if x == 0 {
        32
    } else {
        let pat = first_set_bit_mask(x).wrapping_mul(DEBRUIJN32) >> 27;
        DEBRUIJN32_LUT[pat as usize] as u32
    }
}

/// Return the number of trailing zeros in `x`. Returns `32` if `x` is zero.
#[inline]
pub(crate) fn trailing_zeros32(x: u32) -> u32 {
    if HAS_CTZ {
        x.trailing_zeros()
    } else {
        ctz32_debruijn(x)
    }
}

/// Return the position of the most-significant set bit of `x`.
/// Undefined (returns `32`) if `x` is zero.
#[inline]
pub(crate) fn highest_set_bit32(x: u32) -> u32 {
    if HAS_CTZ {
        31u32.wrapping_sub(x.leading_zeros())
    } else {
        // Smear the most-significant set bit downwards, then isolate it and
        // scan from the bottom.
        let mut y = x;
        y |= y >> 1;
        y |= y >> 2;
        y |= y >> 4;
        y |= y >> 8;
        y |= y >> 16;
        ctz32_debruijn(y ^ (y >> 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[quickcheck]
    fn ctz_matches_intrinsic(x: u32) {
        assert_eq!(ctz32_debruijn(x), x.trailing_zeros());
    }

    #[quickcheck]
    fn msb_matches_intrinsic(x: u32) {
        if x != 0 {
            assert_eq!(highest_set_bit32(x), 31 - x.leading_zeros());
        }
    }

    #[test]
    fn ctz_zero() {
        assert_eq!(ctz32_debruijn(0), 32);
        assert_eq!(trailing_zeros32(0), 32);
    }

    #[test]
    fn ctz_single_bits() {
        for i in 0..32 {
            assert_eq!(ctz32_debruijn(1 << i), i);
        }
    }
}
