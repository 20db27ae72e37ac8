//! Impulse Tracker compressed sample decoding (IT 2.14 / 2.15).
//!
//! Compressed data is a sequence of blocks, each a little-endian `u16` byte
//! length followed by a bit stream. A block holds up to 0x8000 8-bit or 0x4000
//! 16-bit samples. Values are deltas (IT 2.15 integrates twice) and the bit
//! width changes in-band:
//!
//! - method 1 (width 1-6): the value `1 << (width - 1)` is followed by a 3-bit
//!   (4-bit for 16-bit samples) new width
//! - method 2 (width 7-8 / 7-16): values just above a border select the width
//! - method 3 (width 9 / 17): the top bit set means the low bits hold the width
//!
//! Decoders return the number of source bytes consumed. Truncated blocks or an
//! illegal width stop decoding early and leave the rest of the destination
//! untouched.

/// LSB-first bit reader over the compressed stream.
struct BitReader<'a> {
    src: &'a [u8],
    pos: usize,
    buf: u32,
    avail: u32,
}

impl<'a> BitReader<'a> {
    fn new(src: &'a [u8], pos: usize) -> Self {
        Self {
            src,
            pos,
            buf: 0,
            avail: 0,
        }
    }

    /// Read `n` bits (1..=32); the first bit read is the least significant.
    #[inline]
    fn read(&mut self, n: u32) -> u32 {
        let mut value = 0u32;
        for _ in 0..n {
            if self.avail == 0 {
                self.buf = self.src.get(self.pos).copied().unwrap_or(0) as u32;
                self.pos += 1;
                self.avail = 8;
            }
            value >>= 1;
            value |= self.buf << 31;
            self.buf >>= 1;
            self.avail -= 1;
        }
        value >> (32 - n)
    }
}

/// Check that a complete block header and body are available at `pos`.
fn block_available(src: &[u8], pos: usize) -> bool {
    if pos + 2 > src.len() {
        return false;
    }
    let len = u16::from_le_bytes([src[pos], src[pos + 1]]) as usize;
    pos + 2 + len <= src.len()
}

/// Number of samples a strided destination can hold.
#[inline]
fn strided_len(dest_len: usize, channels: usize) -> usize {
    dest_len.div_ceil(channels)
}

/// Decode 8-bit IT compressed sample data.
///
/// # Arguments
///
/// * `dest` - Output samples; sample `n` is stored at `dest[n * channels]`
/// * `src` - Compressed data
/// * `it215` - IT 2.15 double-delta mode
/// * `channels` - Destination stride for interleaved data (0 is treated as 1)
///
/// # Returns
///
/// Number of bytes of `src` consumed
pub fn decompress8(dest: &mut [i8], src: &[u8], it215: bool, channels: usize) -> usize {
    let stride = channels.max(1);
    let mut remaining = strided_len(dest.len(), stride);
    let mut pos = 0usize;
    let mut out = 0usize;

    while remaining > 0 {
        if !block_available(src, pos) {
            log::warn!("truncated 8-bit IT sample block at byte {pos}");
            return pos;
        }
        let mut bits = BitReader::new(src, pos + 2);

        let block_len = remaining.min(0x8000);
        let mut block_pos = 0;
        let mut width: u32 = 9;
        let mut d1: i8 = 0;
        let mut d2: i8 = 0;

        while block_pos < block_len {
            if width == 0 || width > 9 {
                log::warn!("illegal bit width {width} for 8-bit sample");
                return bits.pos;
            }
            let mut value = bits.read(width);

            if width < 7 {
                // method 1
                if value == 1 << (width - 1) {
                    value = bits.read(3) + 1;
                    width = if value < width { value } else { value + 1 };
                    continue;
                }
            } else if width < 9 {
                // method 2
                let border = (0xffu32 >> (9 - width)) - 4;
                if value > border && value <= border + 8 {
                    value -= border;
                    width = if value < width { value } else { value + 1 };
                    continue;
                }
            } else if value & 0x100 != 0 {
                // method 3
                width = (value + 1) & 0xff;
                continue;
            }

            let v = if width < 8 {
                let shift = 8 - width;
                ((value << shift) as u8 as i8) >> shift
            } else {
                value as u8 as i8
            };

            d1 = d1.wrapping_add(v);
            d2 = d2.wrapping_add(d1);
            dest[out] = if it215 { d2 } else { d1 };
            out += stride;
            block_pos += 1;
        }

        pos = bits.pos;
        remaining -= block_len;
    }
    pos
}

/// Decode 16-bit IT compressed sample data.
///
/// Same contract as [`decompress8`] with 0x4000-sample blocks and 17-bit
/// starting width.
pub fn decompress16(dest: &mut [i16], src: &[u8], it215: bool, channels: usize) -> usize {
    let stride = channels.max(1);
    let mut remaining = strided_len(dest.len(), stride);
    let mut pos = 0usize;
    let mut out = 0usize;

    while remaining > 0 {
        if !block_available(src, pos) {
            log::warn!("truncated 16-bit IT sample block at byte {pos}");
            return pos;
        }
        let mut bits = BitReader::new(src, pos + 2);

        let block_len = remaining.min(0x4000);
        let mut block_pos = 0;
        let mut width: u32 = 17;
        let mut d1: i16 = 0;
        let mut d2: i16 = 0;

        while block_pos < block_len {
            if width == 0 || width > 17 {
                log::warn!("illegal bit width {width} for 16-bit sample");
                return bits.pos;
            }
            let mut value = bits.read(width);

            if width < 7 {
                // method 1
                if value == 1 << (width - 1) {
                    value = bits.read(4) + 1;
                    width = if value < width { value } else { value + 1 };
                    continue;
                }
            } else if width < 17 {
                // method 2
                let border = (0xffffu32 >> (17 - width)) - 8;
                if value > border && value <= border + 16 {
                    value -= border;
                    width = if value < width { value } else { value + 1 };
                    continue;
                }
            } else if value & 0x10000 != 0 {
                // method 3
                width = (value + 1) & 0xff;
                continue;
            }

            let v = if width < 16 {
                let shift = 16 - width;
                ((value << shift) as u16 as i16) >> shift
            } else {
                value as u16 as i16
            };

            d1 = d1.wrapping_add(v);
            d2 = d2.wrapping_add(d1);
            dest[out] = if it215 { d2 } else { d1 };
            out += stride;
            block_pos += 1;
        }

        pos = bits.pos;
        remaining -= block_len;
    }
    pos
}

#[cfg(test)]
mod tests {
    use super::*;

    /// LSB-first bit packer producing one compressed block.
    #[derive(Default)]
    struct BlockWriter {
        bytes: Vec<u8>,
        bit: u32,
    }

    impl BlockWriter {
        fn put(&mut self, value: u32, width: u32) -> &mut Self {
            for i in 0..width {
                if self.bit == 0 {
                    self.bytes.push(0);
                }
                let last = self.bytes.len() - 1;
                self.bytes[last] |= (((value >> i) & 1) as u8) << self.bit;
                self.bit = (self.bit + 1) & 7;
            }
            self
        }

        fn finish(&self) -> Vec<u8> {
            let mut block = (self.bytes.len() as u16).to_le_bytes().to_vec();
            block.extend_from_slice(&self.bytes);
            block
        }
    }

    fn sample8_stream() -> Vec<u8> {
        let mut w = BlockWriter::default();
        w.put(1, 9) // +1
            .put(0x0fd, 9) // -3
            .put(0x100 | 3, 9) // method 3: width 4
            .put(5, 4) // +5
            .put(1 << 3, 4) // method 1 escape
            .put(5, 3) // width 6 + 1 = 7
            .put(0x7f, 7) // -1
            .put(59 + 8, 7) // method 2: width 9
            .put(0x0ff, 9); // -1
        w.finish()
    }

    #[test]
    fn test_decompress8_width_changes() {
        let src = sample8_stream();
        let mut dest = [0i8; 5];
        let used = decompress8(&mut dest, &src, false, 1);
        assert_eq!(dest, [1, -2, 3, 2, 1]);
        assert_eq!(used, src.len());
    }

    #[test]
    fn test_decompress8_it215_double_delta() {
        let src = sample8_stream();
        let mut dest = [0i8; 5];
        decompress8(&mut dest, &src, true, 1);
        assert_eq!(dest, [1, -1, 2, 4, 5]);
    }

    #[test]
    fn test_decompress8_channel_stride() {
        let src = sample8_stream();
        let mut dest = [0x55i8; 10];
        decompress8(&mut dest[1..], &src, false, 2);
        assert_eq!(dest, [0x55, 1, 0x55, -2, 0x55, 3, 0x55, 2, 0x55, 1]);
    }

    #[test]
    fn test_decompress16_width_changes() {
        let mut w = BlockWriter::default();
        w.put(1000, 17)
            .put(0xfffb, 17) // -5
            .put(0x10000 | 7, 17) // method 3: width 8
            .put(0x9c, 8) // -100
            .put(119 + 3, 8) // method 2: width 3
            .put(3, 3) // +3
            .put(1 << 2, 3) // method 1 escape
            .put(15, 4) // width 16 + 1 = 17
            .put(7, 17); // +7
        let src = w.finish();

        let mut dest = [0i16; 5];
        let used = decompress16(&mut dest, &src, false, 1);
        assert_eq!(dest, [1000, 995, 895, 898, 905]);
        assert_eq!(used, src.len());

        let mut dest = [0i16; 5];
        decompress16(&mut dest, &src, true, 1);
        assert_eq!(dest, [1000, 1995, 2890, 3788, 4693]);
    }

    #[test]
    fn test_illegal_width_returns_partial() {
        let mut w = BlockWriter::default();
        w.put(7, 9).put(0x100 | 9, 9).put(0, 16);
        let src = w.finish();

        let mut dest = [0i8; 4];
        let used = decompress8(&mut dest, &src, false, 1);
        assert_eq!(dest, [7, 0, 0, 0]);
        // header + the three bytes holding the first 18 bits
        assert_eq!(used, 5);
    }

    #[test]
    fn test_truncated_block_consumes_nothing() {
        let mut dest = [0i16; 4];
        assert_eq!(decompress16(&mut dest, &[10, 0, 1, 2], false, 1), 0);
        assert_eq!(decompress16(&mut dest, &[1], false, 1), 0);
        assert_eq!(dest, [0; 4]);
    }

    #[test]
    fn test_empty_destination() {
        let mut dest: [i8; 0] = [];
        assert_eq!(decompress8(&mut dest, &[], false, 1), 0);
    }
}
