//! YMW258 (Sega MultiPCM) front-end
//!
//! Registers are addressed as `channel << 3 | register` with channel
//! `0x00..0x1f`. Every eighth channel number is unused, giving 28 slots.

use chipsynth_common::{ClockResampler, Result, SampleMemory, SoundChip, StereoFrame, TrackInfo};

use super::engine::{PcmEngine, HEADER_SIZE};
use super::slot::{EgState, SampleFormat};
use crate::mixer::Mixer;

/// Default YMW258 clock
pub const YMW258_CLOCK: u32 = 9_878_400;

const SLOTS: usize = 28;
const CLOCK_DIVIDER: u32 = 8;

/// Slot index for a register channel, `None` for the gaps
fn slot_index(channel: u32) -> Option<usize> {
    if channel & 7 == 7 || channel >= 0x20 {
        None
    } else {
        Some(((channel >> 3) * 7 + (channel & 7)) as usize)
    }
}

/// YMW258 emulator
#[derive(Debug)]
pub struct Ymw258 {
    engine: PcmEngine,
    resampler: ClockResampler,
    mixer: Mixer,
}

impl Ymw258 {
    /// Create a YMW258 at the given clock and output rate
    pub fn new(clock: u32, sample_rate: u32) -> Result<Self> {
        Ok(Self {
            engine: PcmEngine::new(SLOTS, CLOCK_DIVIDER),
            resampler: ClockResampler::new(clock, sample_rate)?,
            mixer: Mixer::new(SLOTS),
        })
    }

    /// Envelope phase of a slot
    pub fn envelope_state(&self, slot: usize) -> Option<EgState> {
        self.engine.slots.get(slot).map(|s| s.state)
    }

    /// Load a wave header; the YMW258 takes every parameter from it
    fn load_wave(&mut self, slot: usize) {
        let base = self.engine.slots[slot].wave as u32 * HEADER_SIZE;
        let h = self.engine.read_header(base);
        // 11: 12 bit, anything else plays as 8 bit
        let format = if h[0] >> 6 == 3 {
            SampleFormat::Bits12
        } else {
            SampleFormat::Bits8
        };
        let start = u32::from_be_bytes([0, h[0] & 0x1f, h[1], h[2]]);
        self.engine.load_wave(slot, format, start, &h);

        let sl = &mut self.engine.slots[slot];
        sl.lfo = (h[7] >> 3) & 7;
        sl.vib = h[7] & 7;
        sl.ar = h[8] >> 4;
        sl.d1r = h[8] & 0xf;
        sl.rc = h[10] >> 4;
        sl.rr = h[10] & 0xf;
        sl.am = h[11] & 7;
        self.engine.set_decay_level(slot, h[9]);
        self.engine.restart(slot);
    }
}

impl SoundChip for Ymw258 {
    fn name(&self) -> &'static str {
        "YMW258"
    }

    fn channel_count(&self) -> usize {
        SLOTS
    }

    fn reset(&mut self) {
        self.engine.reset();
        self.resampler.reset();
    }

    fn write(&mut self, addr: u32, value: u8) {
        let reg = addr & 7;
        let Some(slot) = slot_index((addr >> 3) & 0xff) else {
            log::trace!("YMW258: write to unused channel {:#04x}", addr >> 3);
            return;
        };
        let data = value;
        match reg {
            0 => self.engine.slots[slot].pan = data >> 4,
            1 => {
                let sl = &mut self.engine.slots[slot];
                sl.wave = (sl.wave & 0x100) | data as u16;
                self.load_wave(slot);
            }
            2 => {
                let sl = &mut self.engine.slots[slot];
                sl.wave = (sl.wave & 0xff) | ((data as u16 & 1) << 8);
                sl.fnum = (sl.fnum & 0x3c0) | (data as u16 >> 2);
                sl.update_step();
            }
            3 => {
                let sl = &mut self.engine.slots[slot];
                sl.fnum = (sl.fnum & 0x03f) | ((data as u16 & 0xf) << 6);
                sl.oct = (data as i8) >> 4;
                sl.update_step();
            }
            4 => {
                self.engine.slots[slot].lfo_active = true;
                self.engine.set_key(slot, data & 0x80 != 0);
            }
            5 => self.engine.set_total_level(slot, data),
            6 => {
                let sl = &mut self.engine.slots[slot];
                sl.lfo = (data >> 3) & 7;
                sl.vib = data & 7;
            }
            _ => self.engine.slots[slot].am = data & 7,
        }
    }

    fn tick(&mut self, cycles: u32) {
        self.engine.tick(cycles);
    }

    fn render(&mut self, frames: &mut [StereoFrame]) {
        for frame in frames.iter_mut() {
            let cycles = self.resampler.next_cycles();
            self.engine.tick(cycles);
            *frame = Mixer::finish(self.engine.mix(&mut self.mixer));
        }
    }

    output_plumbing!();

    fn set_memory(&mut self, memory: Box<dyn SampleMemory>) -> Result<()> {
        log::debug!("YMW258: attached {} bytes of sample ROM", memory.len());
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

    fn chip() -> Ymw258 {
        let mut data = vec![0u8; 0x10000];
        // wave 1: 12-bit at 0x2000, loop 0x10, end 0x40, AR 15, DL 2, RR 15
        data[12..24].copy_from_slice(&[
            0xc0, 0x20, 0x00, 0x00, 0x10, 0xff, 0xc0, 0x0a, 0xf0, 0x20, 0x0f, 0x03,
        ]);
        for byte in &mut data[0x2000..0x2100] {
            *byte = 0x30;
        }
        let mut chip = Ymw258::new(YMW258_CLOCK, 44_100).unwrap();
        chip.set_memory(Box::new(SampleRom::new(data))).unwrap();
        chip
    }

    #[test]
    fn test_slot_mapping_skips_gaps() {
        assert_eq!(slot_index(0), Some(0));
        assert_eq!(slot_index(6), Some(6));
        assert_eq!(slot_index(7), None);
        assert_eq!(slot_index(8), Some(7));
        assert_eq!(slot_index(0x1e), Some(27));
        assert_eq!(slot_index(0x1f), None);
        assert_eq!(slot_index(0x20), None);
    }

    #[test]
    fn test_header_sets_slot() {
        let mut chip = chip();
        // channel 9 is slot 8
        chip.write((9 << 3) | 1, 0x01);
        let sl = &chip.engine.slots[8];
        assert_eq!(sl.format, SampleFormat::Bits12);
        assert_eq!(sl.start, 0x2000);
        assert_eq!(sl.loop_addr, 0x10);
        assert_eq!(sl.end_addr, 0xffc0);
        assert_eq!((sl.lfo, sl.vib), (1, 2));
        assert_eq!((sl.ar, sl.d1r), (15, 0));
        assert_eq!(sl.d2r, 0);
        assert_ne!(sl.dl, 0);
        assert_eq!((sl.rc, sl.rr, sl.am), (0, 15, 3));
    }

    #[test]
    fn test_gap_channel_ignored() {
        let mut chip = chip();
        chip.write((7 << 3) | 4, 0x80);
        assert!((0..SLOTS).all(|s| chip.envelope_state(s) == Some(EgState::Off)));
    }

    #[test]
    fn test_pitch_registers() {
        let mut chip = chip();
        chip.write(2, 0xff);
        chip.write(3, 0xf5);
        let sl = &chip.engine.slots[0];
        assert_eq!(sl.wave, 0x100);
        assert_eq!(sl.fnum, 0x17f);
        assert_eq!(sl.oct, -1);
    }

    #[test]
    fn test_key_on_renders() {
        let mut chip = chip();
        chip.write(1, 0x01);
        chip.write(5, 0x01);
        chip.write(4, 0x80);
        assert_eq!(chip.envelope_state(0), Some(EgState::Decay1));
        let mut frames = [[0i16; 2]; 32];
        chip.render(&mut frames);
        assert!(frames[31][0] > 0);
        assert_eq!(frames[31][0], frames[31][1]);

        chip.write(4, 0x00);
        assert_eq!(chip.envelope_state(0), Some(EgState::Release));
    }
}
