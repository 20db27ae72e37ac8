//! Bit-field helpers over plain integers.
//!
//! Register layouts are expressed as explicit positions and widths instead of
//! relying on struct bit-field layout.

/// Bit access on unsigned register values
pub trait Bits: Copy {
    /// Test bit `pos`
    fn bit(self, pos: u32) -> bool;

    /// Extract `len` bits starting at `pos`
    fn field(self, pos: u32, len: u32) -> Self;
}

macro_rules! impl_bits {
    ($($t:ty),*) => {
        $(
            impl Bits for $t {
                #[inline]
                fn bit(self, pos: u32) -> bool {
                    (self >> pos) & 1 != 0
                }

                #[inline]
                fn field(self, pos: u32, len: u32) -> Self {
                    if len >= <$t>::BITS {
                        self >> pos
                    } else {
                        (self >> pos) & ((1 << len) - 1)
                    }
                }
            }
        )*
    };
}

impl_bits!(u8, u16, u32, u64);

/// Extract `len` bits starting at `pos` from a 32-bit value.
#[inline]
pub fn bitfield(value: u32, pos: u32, len: u32) -> u32 {
    value.field(pos, len)
}

/// Sign-extend the low `bits` bits of `value`.
#[inline]
pub fn sign_extend(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

/// Saturate a wide intermediate sum to the 16-bit output range.
#[inline]
pub fn clamp16(value: i32) -> i16 {
    value.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Replace the low byte of a 16-bit value.
#[inline]
pub fn set_lsb(value: u16, lsb: u8) -> u16 {
    (value & 0xff00) | lsb as u16
}

/// Replace the high byte of a 16-bit value.
#[inline]
pub fn set_msb(value: u16, msb: u8) -> u16 {
    (value & 0x00ff) | ((msb as u16) << 8)
}
