//! Yamaha YMF278 (OPL4) wave table part and YMW258 (MultiPCM)
//!
//! Both chips play 8, 12 or 16 bit PCM from external memory through the same
//! slot engine: a 16.16 phase stepper with linear interpolation, loop and end
//! addresses taken from a 12-byte wave header, a four-phase envelope
//! generator, a per-slot LFO for vibrato and tremolo, total level with
//! hardware-style interpolation and 4-bit panning.
//!
//! They differ in slot count, clocking and register layout:
//!
//! | | YMF278 | YMW258 |
//! |---|---|---|
//! | Slots | 24 | 28 |
//! | Clock | 33.8688 MHz | 9.8784 MHz |
//! | Clocks per slot | 32 | 8 |
//! | Addressing | register number | `channel << 3 \| register` |
//!
//! The FM part of the OPL4 is not emulated.

mod engine;
mod slot;
mod tables;
mod ymw258;

use chipsynth_common::{ClockResampler, Result, SampleMemory, SoundChip, StereoFrame, TrackInfo};

use crate::mixer::Mixer;
use engine::{PcmEngine, HEADER_SIZE};
use slot::SampleFormat;
use tables::MIX_LEVEL;

pub use slot::EgState;
pub use ymw258::{Ymw258, YMW258_CLOCK};

/// Default YMF278 clock
pub const YMF278_CLOCK: u32 = 33_868_800;

const SLOTS: usize = 24;
const CLOCK_DIVIDER: u32 = 32;

/// Waves below this number always use the header table at address 0
const ROM_WAVES: u16 = 384;

/// Memory access mode bit in register 2
const MEMORY_ACCESS: u8 = 0x01;

/// YMF278 wave table emulator
///
/// Slot registers live at `0x08 + group * 24 + slot` for groups 0-9:
/// wave number low, wave high/F-number low, F-number high/pseudo-reverb/octave,
/// total level, key/damp/LFO reset/output/pan, LFO/vibrato, AR/D1R, DL/D2R,
/// rate correction/RR and tremolo. Registers 2-6 form the memory access port;
/// 0xf8/0xf9 set the FM and PCM mix levels.
#[derive(Debug)]
pub struct Ymf278 {
    engine: PcmEngine,
    regs: [u8; 256],
    mem_addr: u32,
    fm_mix: [i32; 2],
    pcm_mix: [i32; 2],
    resampler: ClockResampler,
    mixer: Mixer,
}

impl Ymf278 {
    /// Create a YMF278 at the given clock and output rate
    pub fn new(clock: u32, sample_rate: u32) -> Result<Self> {
        let mut chip = Self {
            engine: PcmEngine::new(SLOTS, CLOCK_DIVIDER),
            regs: [0; 256],
            mem_addr: 0,
            fm_mix: [0; 2],
            pcm_mix: [0; 2],
            resampler: ClockResampler::new(clock, sample_rate)?,
            mixer: Mixer::new(SLOTS),
        };
        chip.reset();
        Ok(chip)
    }

    /// Envelope phase of a slot
    pub fn envelope_state(&self, slot: usize) -> Option<EgState> {
        self.engine.slots.get(slot).map(|s| s.state)
    }

    /// Whether a slot is routed to the rear (DO1) outputs
    ///
    /// Both output pairs are folded into the rendered stereo frame.
    pub fn is_rear(&self, slot: usize) -> bool {
        self.engine.slots.get(slot).is_some_and(|s| s.rear)
    }

    /// FM mix level in sixteenths, left and right
    pub fn fm_mix(&self) -> [i32; 2] {
        self.fm_mix
    }

    /// Current memory port address
    pub fn memory_address(&self) -> u32 {
        self.mem_addr
    }

    fn write_slot(&mut self, slot: usize, group: u8, data: u8) {
        match group {
            0 => {
                let sl = &mut self.engine.slots[slot];
                sl.wave = (sl.wave & 0x100) | data as u16;
                let wave = sl.wave;
                let header_bank = ((self.regs[2] >> 2) & 7) as u32;
                let base = if wave < ROM_WAVES || header_bank == 0 {
                    wave as u32 * HEADER_SIZE
                } else {
                    header_bank * 0x8_0000 + (wave - ROM_WAVES) as u32 * HEADER_SIZE
                };
                let header = self.engine.read_header(base);
                let format = SampleFormat::from_header(header[0] >> 6);
                let start = u32::from_be_bytes([0, header[0] & 0x3f, header[1], header[2]]);
                self.engine.load_wave(slot, format, start, &header);
                // the remaining header bytes land in the slot registers and
                // read back from there
                for (i, &byte) in header.iter().enumerate().skip(7) {
                    let group = (i - 2) as u8;
                    self.write(8 + slot as u32 + group as u32 * SLOTS as u32, byte);
                }
                self.engine.restart(slot);
            }
            1 => {
                let sl = &mut self.engine.slots[slot];
                sl.wave = (sl.wave & 0xff) | ((data as u16 & 1) << 8);
                sl.fnum = (sl.fnum & 0x380) | (data as u16 >> 1);
                sl.update_step();
            }
            2 => {
                let sl = &mut self.engine.slots[slot];
                sl.fnum = (sl.fnum & 0x07f) | ((data as u16 & 7) << 7);
                sl.prvb = data & 0x08 != 0;
                sl.oct = (data as i8) >> 4;
                sl.update_step();
            }
            3 => self.engine.set_total_level(slot, data),
            4 => {
                let sl = &mut self.engine.slots[slot];
                sl.rear = data & 0x10 != 0;
                sl.pan = data & 0x0f;
                if data & 0x20 != 0 {
                    sl.lfo_active = false;
                    sl.lfo_cnt = 0;
                } else {
                    sl.lfo_active = true;
                }
                sl.damp = data & 0x40 != 0;
                self.engine.set_key(slot, data & 0x80 != 0);
            }
            5 => {
                let sl = &mut self.engine.slots[slot];
                sl.lfo = (data >> 3) & 7;
                sl.vib = data & 7;
            }
            6 => {
                let sl = &mut self.engine.slots[slot];
                sl.ar = data >> 4;
                sl.d1r = data & 0xf;
            }
            7 => self.engine.set_decay_level(slot, data),
            8 => {
                let sl = &mut self.engine.slots[slot];
                sl.rc = data >> 4;
                sl.rr = data & 0xf;
            }
            _ => self.engine.slots[slot].am = data & 7,
        }
    }
}

impl SoundChip for Ymf278 {
    fn name(&self) -> &'static str {
        "YMF278"
    }

    fn channel_count(&self) -> usize {
        SLOTS
    }

    fn reset(&mut self) {
        self.engine.reset();
        self.regs = [0; 256];
        // reverse order so wave loads see the final header bank
        for reg in (0..=0xf7).rev() {
            self.write(reg, 0);
        }
        self.write(0xf8, 0x1b);
        self.write(0xf9, 0x00);
        self.mem_addr = 0;
        self.resampler.reset();
    }

    fn write(&mut self, addr: u32, value: u8) {
        let reg = (addr & 0xff) as u8;
        let mut data = value;
        match reg {
            0x08..=0xf7 => {
                let index = reg - 8;
                self.write_slot((index % SLOTS as u8) as usize, index / SLOTS as u8, data);
            }
            0x00 | 0x01 => log::trace!("YMF278: write to test register {reg:#04x}"),
            0x02 => log::trace!("YMF278: memory mode {data:#04x}"),
            // upper bits read back as zero
            0x03 => data &= 0x3f,
            0x04 => {}
            0x05 => {
                self.mem_addr = u32::from_be_bytes([0, self.regs[3], self.regs[4], data]);
            }
            0x06 => {
                if self.regs[2] & MEMORY_ACCESS != 0 {
                    self.engine.write_memory(self.mem_addr, data);
                    self.mem_addr += 1;
                }
            }
            0xf8 => {
                self.fm_mix = [MIX_LEVEL[(data & 7) as usize], MIX_LEVEL[(data >> 3 & 7) as usize]];
            }
            0xf9 => {
                self.pcm_mix = [MIX_LEVEL[(data & 7) as usize], MIX_LEVEL[(data >> 3 & 7) as usize]];
            }
            _ => log::trace!("YMF278: write to unused register {reg:#04x}"),
        }
        self.regs[reg as usize] = data;
    }

    fn read(&mut self, addr: u32) -> Option<u8> {
        let reg = (addr & 0xff) as usize;
        Some(match reg {
            // upper bits are the device ID
            2 => (self.regs[2] & 0x1f) | 0x20,
            6 => {
                if self.regs[2] & MEMORY_ACCESS != 0 {
                    let value = self.engine.read_memory(self.mem_addr);
                    self.mem_addr += 1;
                    value
                } else {
                    0xff
                }
            }
            _ => self.regs[reg],
        })
    }

    fn tick(&mut self, cycles: u32) {
        self.engine.tick(cycles);
    }

    fn render(&mut self, frames: &mut [StereoFrame]) {
        for frame in frames.iter_mut() {
            let cycles = self.resampler.next_cycles();
            self.engine.tick(cycles);
            let bus = self.engine.mix(&mut self.mixer);
            *frame = Mixer::finish([
                bus[0] * self.pcm_mix[0] / 16,
                bus[1] * self.pcm_mix[1] / 16,
            ]);
        }
    }

    output_plumbing!();

    fn set_memory(&mut self, memory: Box<dyn SampleMemory>) -> Result<()> {
        log::debug!("YMF278: attached {} bytes of wave memory", memory.len());
        self.engine.memory = Some(memory);
        Ok(())
    }

    fn track_info(&self, channel: usize) -> Option<TrackInfo> {
        self.engine.track_info(channel, self.clock(), &self.mixer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chipsynth_common::SampleRom;

    const SAMPLE_RATE: u32 = 44_100;
    const CYCLES: u32 = SLOTS as u32 * CLOCK_DIVIDER;

    /// Header for wave 0: 16-bit, start 0x1000, loop 0, end 0x100
    fn memory() -> SampleRom {
        let mut data = vec![0u8; 0x20_0000];
        data[..12].copy_from_slice(&[
            0x80, 0x10, 0x00, // 16-bit, start
            0x00, 0x00, // loop
            0xff, 0x00, // end (negated 0x100)
            0x00, // LFO/vib
            0xf0, // AR 15, D1R 0
            0x00, // DL/D2R
            0x0f, // RC 0, RR 15
            0x00, // AM
        ]);
        for i in 0..0x100 {
            data[0x1000 + i * 2] = 0x40;
        }
        SampleRom::new(data)
    }

    fn chip() -> Ymf278 {
        let mut chip = Ymf278::new(YMF278_CLOCK, SAMPLE_RATE).unwrap();
        chip.set_memory(Box::new(memory())).unwrap();
        chip
    }

    #[test]
    fn test_reset_state() {
        let mut chip = chip();
        assert_eq!(chip.read(2), Some(0x20));
        assert_eq!(chip.read(0xf8), Some(0x1b));
        assert_eq!(chip.fm_mix(), [MIX_LEVEL[3], MIX_LEVEL[3]]);
        assert_eq!(chip.pcm_mix, [16, 16]);
        assert!((0..SLOTS).all(|s| chip.envelope_state(s) == Some(EgState::Off)));
        // memory port disabled
        assert_eq!(chip.read(6), Some(0xff));
    }

    #[test]
    fn test_wave_header_load() {
        let mut chip = chip();
        chip.write(0x08, 0x00);
        let sl = &chip.engine.slots[0];
        assert_eq!(sl.format, SampleFormat::Bits16);
        assert_eq!(sl.start, 0x1000);
        assert_eq!(sl.end_addr, 0xff00);
        assert_eq!(sl.ar, 15);
        assert_eq!(sl.rr, 15);
        // header bytes read back from the slot registers
        assert_eq!(chip.read(0x08 + 6 * 24), Some(0xf0));
        assert_eq!(chip.read(0x08 + 8 * 24), Some(0x0f));
    }

    #[test]
    fn test_key_on_plays_and_releases() {
        let mut chip = chip();
        chip.write(0x08, 0x00);
        chip.write(0x08 + 2 * 24, 0x00);
        chip.write(0x08 + 3 * 24, 0x01);
        chip.write(0x08 + 4 * 24, 0x80);
        assert_eq!(chip.envelope_state(0), Some(EgState::Decay2));

        let mut frames = [[0i16; 2]; 16];
        chip.render(&mut frames);
        assert!(frames[8][0] > 0);
        assert_eq!(frames[8][0], frames[8][1]);

        // key off releases at rate 63 and goes silent
        chip.write(0x08 + 4 * 24, 0x00);
        assert_eq!(chip.envelope_state(0), Some(EgState::Release));
        chip.tick(CYCLES * 200);
        assert_eq!(chip.envelope_state(0), Some(EgState::Off));
        chip.render(&mut frames);
        assert_eq!(frames[15], [0, 0]);
    }

    #[test]
    fn test_held_key_does_not_restart() {
        let mut chip = chip();
        chip.write(0x08, 0x00);
        chip.write(0x08 + 4 * 24, 0x80);
        chip.tick(CYCLES * 10);
        let pos = chip.engine.slots[0].pos;
        assert!(pos > 0);
        chip.write(0x08 + 4 * 24, 0x80);
        assert_eq!(chip.engine.slots[0].pos, pos);
    }

    #[test]
    fn test_octave_and_pan_decode() {
        let mut chip = chip();
        chip.write(0x08 + 24 + 1, 0x03);
        chip.write(0x08 + 2 * 24 + 1, 0xf9);
        let sl = &chip.engine.slots[1];
        assert_eq!(sl.wave, 0x100);
        assert_eq!(sl.fnum, 0x81);
        assert_eq!(sl.oct, -1);
        assert!(sl.prvb);

        chip.write(0x08 + 4 * 24 + 1, 0x17);
        assert!(chip.is_rear(1));
        assert_eq!(chip.engine.slots[1].pan, 7);
        assert!(chip.engine.slots[1].lfo_active);
        chip.write(0x08 + 4 * 24 + 1, 0x20);
        assert!(!chip.engine.slots[1].lfo_active);
    }

    #[test]
    fn test_total_level_interpolation() {
        let mut chip = chip();
        chip.write(0x08 + 3 * 24, 0x10);
        assert_eq!(chip.engine.slots[0].tl_dest, 8);
        assert_eq!(chip.engine.slots[0].tl, 0);
        chip.write(0x08 + 3 * 24, 0xfe);
        assert_eq!(chip.engine.slots[0].tl_dest, 0xff);
        chip.write(0x08 + 3 * 24, 0x21);
        assert_eq!(chip.engine.slots[0].tl, 0x10);
    }

    #[test]
    fn test_memory_port_auto_increment() {
        let mut chip = Ymf278::new(YMF278_CLOCK, SAMPLE_RATE).unwrap();
        chip.set_memory(Box::new(SampleRom::ram(0x40_0000))).unwrap();
        chip.write(2, MEMORY_ACCESS);
        chip.write(3, 0xc2);
        assert_eq!(chip.read(3), Some(0x02));
        chip.write(4, 0x00);
        assert_eq!(chip.memory_address(), 0);
        chip.write(5, 0x10);
        assert_eq!(chip.memory_address(), 0x2_0010);
        chip.write(6, 0xaa);
        chip.write(6, 0xbb);
        assert_eq!(chip.memory_address(), 0x2_0012);

        chip.write(5, 0x10);
        assert_eq!(chip.read(6), Some(0xaa));
        assert_eq!(chip.read(6), Some(0xbb));

        // writes are dropped without the access bit
        chip.write(2, 0);
        chip.write(6, 0xcc);
        assert_eq!(chip.memory_address(), 0x2_0012);
    }

    #[test]
    fn test_pcm_mix_level() {
        let mut chip = chip();
        chip.write(0x08, 0x00);
        chip.write(0x08 + 3 * 24, 0x01);
        chip.write(0x08 + 4 * 24, 0x80);
        chip.write(0xf9, 0x07 << 3);
        let mut frames = [[0i16; 2]; 8];
        chip.render(&mut frames);
        assert!(frames[7][0] > 0);
        assert_eq!(frames[7][1], 0);
    }

    #[test]
    fn test_mask_and_track_info() {
        let mut chip = chip();
        chip.write(0x08, 0x00);
        chip.write(0x08 + 4 * 24, 0x80);
        let info = chip.track_info(0).unwrap();
        assert!(info.key_on);
        assert_eq!(info.position, Some(0));
        assert!(info.frequency_hz.is_some());

        chip.set_mask(1);
        let mut frames = [[0i16; 2]; 8];
        chip.render(&mut frames);
        assert_eq!(frames[7], [0, 0]);
        assert!(chip.track_info(SLOTS).is_none());
    }
}
