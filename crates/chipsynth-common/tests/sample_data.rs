//! Host-side sample loading: base64 payloads, IT compressed samples and
//! the memory they end up in.

use anyhow::Result;
use chipsynth_common::{base64, it_sample, ClockResampler, SampleMemory, SampleRom};

/// LSB-first bit packer for compressed IT blocks.
#[derive(Default)]
struct BlockWriter {
    bytes: Vec<u8>,
    bit: u32,
}

impl BlockWriter {
    fn put(&mut self, value: u32, width: u32) {
        for i in 0..width {
            if self.bit == 0 {
                self.bytes.push(0);
            }
            let last = self.bytes.len() - 1;
            self.bytes[last] |= (((value >> i) & 1) as u8) << self.bit;
            self.bit = (self.bit + 1) & 7;
        }
    }

    fn finish(self) -> Vec<u8> {
        let mut block = (self.bytes.len() as u16).to_le_bytes().to_vec();
        block.extend_from_slice(&self.bytes);
        block
    }
}

fn ramp_block(samples: usize) -> Vec<u8> {
    let mut w = BlockWriter::default();
    for _ in 0..samples {
        w.put(1, 9);
    }
    w.finish()
}

#[test]
fn test_block_boundary_restarts_deltas() {
    let mut src = ramp_block(0x8000);
    let first_len = src.len();
    src.extend(ramp_block(3));

    let mut dest = vec![0i8; 0x8000 + 3];
    let used = it_sample::decompress8(&mut dest, &src, false, 1);

    assert_eq!(used, src.len());
    assert!(first_len < used);
    assert_eq!(dest[0], 1);
    assert_eq!(dest[126], 127);
    assert_eq!(dest[127], -128);
    assert_eq!(dest[0x7fff], 0);
    // second block integrates from zero again
    assert_eq!(&dest[0x8000..], &[1, 2, 3]);
}

#[test]
fn test_missing_second_block_keeps_first() {
    let src = ramp_block(0x8000);
    let mut dest = vec![0x11i8; 0x8000 + 4];
    let used = it_sample::decompress8(&mut dest, &src, false, 1);
    assert_eq!(used, src.len());
    assert_eq!(dest[10], 11);
    assert_eq!(&dest[0x8000..], &[0x11; 4]);
}

#[test]
fn test_base64_sample_into_memory() -> Result<()> {
    let mut w = BlockWriter::default();
    for delta in [16u32, 16, 16, 0x0f0] {
        w.put(delta, 9);
    }
    let text = base64::encode(&w.finish());

    let compressed = base64::decode(&format!("  {text}\n"))?;
    let mut pcm = [0i8; 4];
    it_sample::decompress8(&mut pcm, &compressed, false, 1);
    assert_eq!(pcm, [16, 32, 48, 32]);

    let rom = SampleRom::new(pcm.iter().map(|&s| s as u8).collect()).with_mask(3);
    let memory: Box<dyn SampleMemory> = Box::new(rom);
    assert_eq!(memory.len(), 4);
    assert_eq!(memory.read_byte(1), 32);
    assert_eq!(memory.read_byte(5), 32);
    Ok(())
}

#[test]
fn test_bad_base64_is_an_error() {
    assert!(base64::decode("not*base64").is_err());
    assert_eq!(base64::decode("").ok(), Some(Vec::new()));
}

#[test]
fn test_resampler_exact_over_common_rates() -> Result<()> {
    for (clock, rate) in [(985_248, 44_100), (60_000_000, 48_000), (3_579_545, 22_050)] {
        let mut resampler = ClockResampler::new(clock, rate)?;
        let total: u64 = (0..rate).map(|_| resampler.next_cycles() as u64).sum();
        assert_eq!(total, clock as u64);
    }
    Ok(())
}
