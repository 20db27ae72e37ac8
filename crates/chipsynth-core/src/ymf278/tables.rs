//! Envelope, LFO and level tables shared by the OPL4 wave part and YMW258

use std::sync::OnceLock;

/// Envelope attenuation at which output is silent (-60 dB)
pub(super) const MAX_ATT_INDEX: i32 = 0x280;
pub(super) const MIN_ATT_INDEX: i32 = 0;
/// Envelope steps are four times finer than TL steps
pub(super) const TL_SHIFT: u32 = 2;

pub(super) const LFO_SHIFT: u32 = 18;
pub(super) const LFO_PERIOD: u32 = 1 << LFO_SHIFT;

/// Pan attenuation in -3 dB units (255 = off)
pub(super) const PAN_LEFT: [u8; 16] = [0, 8, 16, 24, 32, 40, 48, 255, 255, 0, 0, 0, 0, 0, 0, 0];
pub(super) const PAN_RIGHT: [u8; 16] = [0, 0, 0, 0, 0, 0, 0, 0, 255, 255, 48, 40, 32, 24, 16, 8];

const fn sc(db: i32) -> i32 {
    db / 3 * 0x20
}

/// Decay level per DL value, 3 dB per step with the last step at 93 dB
pub(super) const DL_TAB: [i32; 16] = [
    sc(0),
    sc(3),
    sc(6),
    sc(9),
    sc(12),
    sc(15),
    sc(18),
    sc(21),
    sc(24),
    sc(27),
    sc(30),
    sc(33),
    sc(36),
    sc(39),
    sc(42),
    sc(93),
];

const RATE_STEPS: usize = 8;

#[rustfmt::skip]
pub(super) const EG_INC: [u8; 15 * RATE_STEPS] = [
    0, 1, 0, 1, 0, 1, 0, 1, // rates 00..12 0
    0, 1, 0, 1, 1, 1, 0, 1, // rates 00..12 1
    0, 1, 1, 1, 0, 1, 1, 1, // rates 00..12 2
    0, 1, 1, 1, 1, 1, 1, 1, // rates 00..12 3

    1, 1, 1, 1, 1, 1, 1, 1, // rate 13 0
    1, 1, 1, 2, 1, 1, 1, 2, // rate 13 1
    1, 2, 1, 2, 1, 2, 1, 2, // rate 13 2
    1, 2, 2, 2, 1, 2, 2, 2, // rate 13 3

    2, 2, 2, 2, 2, 2, 2, 2, // rate 14 0
    2, 2, 2, 4, 2, 2, 2, 4, // rate 14 1
    2, 4, 2, 4, 2, 4, 2, 4, // rate 14 2
    2, 4, 4, 4, 2, 4, 4, 4, // rate 14 3

    4, 4, 4, 4, 4, 4, 4, 4, // rate 15 decay
    8, 8, 8, 8, 8, 8, 8, 8, // rate 15 attack
    0, 0, 0, 0, 0, 0, 0, 0, // infinite
];

const fn o(row: usize) -> u8 {
    (row * RATE_STEPS) as u8
}

#[rustfmt::skip]
pub(super) const EG_RATE_SELECT: [u8; 64] = [
    o(14), o(14), o(14), o(14),
    o(0), o(1), o(2), o(3),
    o(0), o(1), o(2), o(3),
    o(0), o(1), o(2), o(3),
    o(0), o(1), o(2), o(3),
    o(0), o(1), o(2), o(3),
    o(0), o(1), o(2), o(3),
    o(0), o(1), o(2), o(3),
    o(0), o(1), o(2), o(3),
    o(0), o(1), o(2), o(3),
    o(0), o(1), o(2), o(3),
    o(0), o(1), o(2), o(3),
    o(0), o(1), o(2), o(3),
    o(4), o(5), o(6), o(7),
    o(8), o(9), o(10), o(11),
    o(12), o(12), o(12), o(12),
];

#[rustfmt::skip]
pub(super) const EG_RATE_SHIFT: [u8; 64] = [
    12, 12, 12, 12,
    11, 11, 11, 11,
    10, 10, 10, 10,
    9, 9, 9, 9,
    8, 8, 8, 8,
    7, 7, 7, 7,
    6, 6, 6, 6,
    5, 5, 5, 5,
    4, 4, 4, 4,
    3, 3, 3, 3,
    2, 2, 2, 2,
    1, 1, 1, 1,
    0, 0, 0, 0,
    0, 0, 0, 0,
    0, 0, 0, 0,
    0, 0, 0, 0,
];

/// LFO counter steps per sample: 0.168, 2.019, 3.196, 4.206, 5.215, 5.888,
/// 6.224 and 7.066 Hz at 44.1 kHz
pub(super) const LFO_STEP: [u32; 8] = [1, 12, 19, 25, 31, 35, 37, 42];

/// Vibrato depth in F-number units, `(log2(0x400 + x) - 10) * 1200` cents
pub(super) const VIB_DEPTH: [i16; 8] = [0, 2, 3, 4, 6, 12, 24, 48];

/// Tremolo depth, `round(dB / 6 * 0x40) + 1`
pub(super) const AM_DEPTH: [u16; 8] = [0x00, 0x14, 0x20, 0x28, 0x30, 0x40, 0x50, 0x80];

/// Mix levels in sixteenths, 3 dB per step
pub(super) const MIX_LEVEL: [i32; 8] = [16, 12, 8, 6, 4, 3, 2, 0];

/// Linear gain (15-bit fraction) for every attenuation below the silence
/// threshold: -6 dB per 0x40 steps by shifting, linear in between
pub(super) fn volume_factors() -> &'static [i32; MAX_ATT_INDEX as usize] {
    static FACTORS: OnceLock<[i32; MAX_ATT_INDEX as usize]> = OnceLock::new();
    FACTORS.get_or_init(|| {
        let mut factors = [0; MAX_ATT_INDEX as usize];
        for (att, factor) in factors.iter_mut().enumerate() {
            let mul = 0x80 - (att as i32 & 0x3f);
            let shift = 7 + (att >> 6);
            *factor = (0x8000 * mul) >> shift;
        }
        factors
    })
}

/// Attenuate `x` by an envelope-resolution level
#[inline]
pub(super) fn vol_factor(x: i32, att: i32) -> i32 {
    if !(0..MAX_ATT_INDEX).contains(&att) {
        return 0;
    }
    (x * volume_factors()[att as usize]) >> 15
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_steps() {
        assert_eq!(vol_factor(0x4000, 0), 0x4000);
        // 0x40 steps halve the level
        assert_eq!(vol_factor(0x4000, 0x40), 0x2000);
        assert_eq!(vol_factor(0x4000, 0x80), 0x1000);
        assert_eq!(vol_factor(0x4000, MAX_ATT_INDEX), 0);
        assert!(vol_factor(0x4000, 0x20) < 0x4000);
        assert!(vol_factor(0x4000, 0x20) > 0x2000);
    }

    #[test]
    fn test_decay_levels() {
        assert_eq!(DL_TAB[0], 0);
        assert_eq!(DL_TAB[4], 0x80);
        assert_eq!(DL_TAB[15], 31 * 0x20);
    }
}
