//! Mixing, filter and ADPCM tables of the DL-1425 DSP program

use std::sync::OnceLock;

/// Entries per pan table; pan registers index `value - 0x110`, clamped
pub(super) const PAN_ENTRIES: usize = 98;

/// Offset of the linear (dry only) pan region
const LINEAR_PAN: usize = 0x30;

const DRY_MIX: [i16; 33] = [
    -16384, -16384, -16384, -16384, -16384, -16384, -16384, -16384,
    -16384, -16384, -16384, -16384, -16384, -16384, -16384, -16384,
    -16384, -14746, -13107, -11633, -10486, -9175, -8520, -7209,
    -6226, -5226, -4588, -3768, -3277, -2703, -2130, -1802,
    0,
];

const WET_MIX: [i16; 33] = [
    0, -1638, -1966, -2458, -2949, -3441, -4096, -4669,
    -4915, -5120, -5489, -6144, -7537, -8831, -9339, -9830,
    -10240, -10322, -10486, -10568, -10650, -11796, -12288, -12288,
    -12534, -12648, -12780, -12829, -12943, -13107, -13418, -14090,
    -16384,
];

const LINEAR_MIX: [i16; 33] = [
    -16379, -16338, -16257, -16135, -15973, -15772, -15531, -15251,
    -14934, -14580, -14189, -13763, -13303, -12810, -12284, -11729,
    -11729, -11144, -10531, -9893, -9229, -8543, -7836, -7109,
    -6364, -5604, -4829, -4043, -3246, -2442, -1631, -817,
    0,
];

/// 95-tap filters at program addresses 0xd53, 0xdb2, 0xe11, 0xe70 and 0xecf
#[rustfmt::skip]
const FILTER_DATA: [[i16; 95]; 5] = [
    [
        0, 0, 0, 6, 44, -24, -53, -10, 59, -40,
        -27, 1, 39, -27, 56, 127, 174, 36, -13, 49,
        212, 142, 143, -73, -20, 66, -108, -117, -399, -265,
        -392, -569, -473, -71, 95, -319, -218, -230, 331, 638,
        449, 477, -180, 532, 1107, 750, 9899, 3828, -2418, 1071,
        -176, 191, -431, 64, 117, -150, -274, -97, -238, 165,
        166, 250, -19, 4, 37, 204, 186, -6, 140, -77,
        -1, 1, 18, -10, -151, -149, -103, -9, 55, 23,
        -102, -97, -11, 13, -48, -27, 5, 18, -61, -30,
        64, 72, 0, 0, 0,
    ],
    [
        0, 0, 0, 85, 24, -76, -123, -86, -29, -14,
        -20, -7, 6, -28, -87, -89, -5, 100, 154, 160,
        150, 118, 41, -48, -78, -23, 59, 83, -2, -176,
        -333, -344, -203, -66, -39, 2, 224, 495, 495, 280,
        432, 1340, 2483, 5377, 1905, 658, 0, 97, 347, 285,
        35, -95, -78, -82, -151, -192, -171, -149, -147, -113,
        -22, 71, 118, 129, 127, 110, 71, 31, 20, 36,
        46, 23, -27, -63, -53, -21, -19, -60, -92, -69,
        -12, 25, 29, 30, 40, 41, 29, 30, 46, 39,
        -15, -74, 0, 0, 0,
    ],
    [
        0, 0, 0, 23, 42, 47, 29, 10, 2, -14,
        -54, -92, -93, -70, -64, -77, -57, 18, 94, 113,
        87, 69, 67, 50, 25, 29, 58, 62, 24, -39,
        -131, -256, -325, -234, -45, 58, 78, 223, 485, 496,
        127, 6, 857, 2283, 2683, 4928, 1328, 132, 79, 314,
        189, -80, -90, 35, -21, -186, -195, -99, -136, -258,
        -189, 82, 257, 185, 53, 41, 84, 68, 38, 63,
        77, 14, -60, -71, -71, -120, -151, -84, 14, 29,
        -8, 7, 66, 69, 12, -3, 54, 92, 52, -6,
        -15, -2, 0, 0, 0,
    ],
    [
        0, 0, 0, 2, -28, -37, -17, 0, -9, -22,
        -3, 35, 52, 39, 20, 7, -6, 2, 55, 121,
        129, 67, 8, 1, 9, -6, -16, 16, 66, 96,
        118, 130, 75, -47, -92, 43, 223, 239, 151, 219,
        440, 475, 226, 206, 940, 2100, 2663, 4980, 865, 49,
        -33, 186, 231, 103, 42, 114, 191, 184, 116, 29,
        -47, -72, -21, 60, 96, 68, 31, 32, 63, 87,
        76, 39, 7, 14, 55, 85, 67, 18, -12, -3,
        21, 34, 29, 6, -27, -49, -37, -2, 16, 0,
        -21, -16, 0, 0, 0,
    ],
    [
        0, 0, 0, 48, 7, -22, -29, -10, 24, 54,
        59, 29, -36, -117, -185, -213, -185, -99, 13, 90,
        83, 24, -5, 23, 53, 47, 38, 56, 67, 57,
        75, 107, 16, -242, -440, -355, -120, -33, -47, 152,
        501, 472, -57, -292, 544, 1937, 2277, 6145, 1240, 153,
        47, 200, 152, 36, 64, 134, 74, -82, -208, -266,
        -268, -188, -42, 65, 74, 56, 89, 133, 114, 44,
        -3, -1, 17, 29, 29, -2, -76, -156, -187, -151,
        -85, -31, -5, 7, 20, 32, 24, -5, -20, 6,
        48, 62, 0, 0, 0,
    ],
];

/// Overlapping tables from 0xf2e: output disable (0xf2e), mode 2 filter
/// (0xf73) and pass-through (0xfa0)
#[rustfmt::skip]
const FILTER_DATA2: [i16; 209] = [
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, -371, -196, -268, -512, -303,
    -315, -184, -76, 276, -256, 298, 196, 990, 236, 1114,
    -126, 4377, 6549, 791, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, -16384, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0,
];

const FILTER_BASE: i32 = 0xd53;
const FILTER2_BASE: u16 = 0xf2e;
const FILTER2_END: u16 = 0xfff;

/// ADPCM step size multipliers (x/64), indexed by `8 + nibble`
pub(super) const ADPCM_STEP: [i16; 16] = [
    154, 154, 128, 102, 77, 58, 58, 58,
    58, 58, 58, 58, 77, 102, 128, 154,
];

/// Filter coefficients stored at a DSP program address
pub(super) fn filter_table(offset: u16) -> Option<&'static [i16]> {
    if (FILTER2_BASE..FILTER2_END).contains(&offset) {
        return FILTER_DATA2.get((offset - FILTER2_BASE) as usize..);
    }
    // truncating division: addresses just below the first table map onto it
    let index = (offset as i32 - FILTER_BASE) / 95;
    usize::try_from(index)
        .ok()
        .and_then(|i| FILTER_DATA.get(i))
        .map(|taps| taps.as_slice())
}

/// Pan gains indexed `[side][dry = 0, wet = 1][pan]`
pub(super) type PanTables = [[[i16; PAN_ENTRIES]; 2]; 2];

pub(super) const DRY: usize = 0;
pub(super) const WET: usize = 1;

/// Pan tables for the left and right outputs, mirrored from one curve
pub(super) fn pan_tables() -> &'static PanTables {
    static TABLES: OnceLock<PanTables> = OnceLock::new();
    TABLES.get_or_init(|| {
        let mut t = [[[0; PAN_ENTRIES]; 2]; 2];
        for i in 0..33 {
            t[0][DRY][i] = DRY_MIX[i];
            t[1][DRY][i] = DRY_MIX[32 - i];
            t[0][WET][i] = WET_MIX[i];
            t[1][WET][i] = WET_MIX[32 - i];
            // linear panning has no wet component
            t[0][DRY][i + LINEAR_PAN] = LINEAR_MIX[i];
            t[1][DRY][i + LINEAR_PAN] = LINEAR_MIX[32 - i];
        }
        t
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_lookup() {
        assert_eq!(filter_table(0xdb2).map(|t| t[3]), Some(85));
        assert_eq!(filter_table(0xe11).map(|t| t[3]), Some(23));
        // pass-through tap of the 0xfa0 table
        assert_eq!(filter_table(0xfa0).map(|t| t[47]), Some(-16384));
        assert_eq!(filter_table(0xf73).map(|t| t.len()), Some(209 - 69));
        assert!(filter_table(0x100).is_none());
        assert!(filter_table(0xfff).is_none());
    }

    #[test]
    fn test_pan_tables_mirror() {
        let t = pan_tables();
        assert_eq!(t[0][DRY][0], -16384);
        assert_eq!(t[1][DRY][0], 0);
        assert_eq!(t[0][DRY][16], t[1][DRY][16]);
        assert_eq!(t[0][WET][LINEAR_PAN], 0);
        assert_eq!(t[1][DRY][LINEAR_PAN + 32], -16379);
        assert!(std::ptr::eq(t, pan_tables()));
    }
}
