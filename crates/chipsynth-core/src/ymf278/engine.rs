//! Slot array and per-sample generation shared by YMF278 and YMW258

use chipsynth_common::{accumulator_hz, SampleMemory, TrackInfo};

use super::slot::{EgState, SampleFormat, Slot, MEMORY_MASK};
use super::tables::{vol_factor, DL_TAB, MAX_ATT_INDEX, PAN_LEFT, PAN_RIGHT, TL_SHIFT};
use crate::mixer::{MixBus, Mixer};

/// Bytes per wave table header
pub(super) const HEADER_SIZE: u32 = 12;

pub(super) struct PcmEngine {
    pub slots: Vec<Slot>,
    eg_cnt: u32,
    pub memory: Option<Box<dyn SampleMemory>>,
    /// Input clocks per output sample
    cycles_per_sample: u32,
    divider: u32,
    outputs: Vec<[i32; 2]>,
    sums: Vec<[i32; 2]>,
    steps: u32,
}

impl PcmEngine {
    pub fn new(slots: usize, clock_divider: u32) -> Self {
        let mut engine = Self {
            slots: vec![Slot::default(); slots],
            eg_cnt: 0,
            memory: None,
            cycles_per_sample: slots as u32 * clock_divider,
            divider: 0,
            outputs: vec![[0; 2]; slots],
            sums: vec![[0; 2]; slots],
            steps: 0,
        };
        engine.reset();
        engine
    }

    pub fn reset(&mut self) {
        self.eg_cnt = 0;
        for slot in &mut self.slots {
            slot.reset();
        }
        self.divider = 0;
        self.outputs.fill([0; 2]);
        self.sums.fill([0; 2]);
        self.steps = 0;
    }

    pub fn cycles_per_sample(&self) -> u32 {
        self.cycles_per_sample
    }

    pub fn read_memory(&self, addr: u32) -> u8 {
        self.memory
            .as_deref()
            .map_or(0, |mem| mem.read_byte(addr & MEMORY_MASK))
    }

    pub fn write_memory(&mut self, addr: u32, value: u8) {
        if let Some(mem) = self.memory.as_deref_mut() {
            mem.write_byte(addr & MEMORY_MASK, value);
        }
    }

    /// Fetch a 12-byte wave header
    pub fn read_header(&self, base: u32) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0; HEADER_SIZE as usize];
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = self.read_memory(base + i as u32);
        }
        buf
    }

    /// Apply the address part of a wave header and restart the slot
    pub fn load_wave(&mut self, slot: usize, format: SampleFormat, start: u32, header: &[u8]) {
        let sl = &mut self.slots[slot];
        sl.format = format;
        sl.start = start;
        sl.loop_addr = u16::from_be_bytes([header[3], header[4]]);
        sl.end_addr = u16::from_be_bytes([header[5], header[6]]);
    }

    /// Restart playback after a wave load
    pub fn restart(&mut self, slot: usize) {
        let sl = &mut self.slots[slot];
        if sl.keyon {
            sl.key_on();
        } else {
            sl.stepptr = 0;
            sl.pos = 0;
        }
    }

    /// Key on or off on an edge of the key bit
    pub fn set_key(&mut self, slot: usize, on: bool) {
        let sl = &mut self.slots[slot];
        if on && !sl.keyon {
            sl.keyon = true;
            sl.key_on();
        } else if !on && sl.keyon {
            sl.keyon = false;
            sl.state = EgState::Release;
        }
    }

    /// Total level write: bit 0 applies immediately, otherwise interpolate
    pub fn set_total_level(&mut self, slot: usize, data: u8) {
        let sl = &mut self.slots[slot];
        let t = data >> 1;
        sl.tl_dest = if t != 0x7f { t } else { 0xff };
        if data & 1 != 0 {
            sl.tl = sl.tl_dest;
        }
    }

    pub fn set_decay_level(&mut self, slot: usize, data: u8) {
        let sl = &mut self.slots[slot];
        sl.dl = DL_TAB[(data >> 4) as usize];
        sl.d2r = data & 0xf;
    }

    /// Produce one output sample for every slot
    fn step(&mut self) {
        let memory = self.memory.as_deref();
        for (sl, out) in self.slots.iter_mut().zip(self.outputs.iter_mut()) {
            if sl.state == EgState::Off {
                *out = [0; 2];
                continue;
            }
            let sample = sl.interpolated(memory);
            let am = if sl.lfo_active && sl.am != 0 {
                sl.compute_am()
            } else {
                0
            };
            let env = (sl.env_vol + am).min(MAX_ATT_INDEX);
            let level = vol_factor(vol_factor(sample, env), (sl.tl as i32) << TL_SHIFT);

            // -3 dB pan steps are approximated with 75%
            let pan = |v: u8| (0x20 - (v as i32 & 0xf)) >> (v >> 4);
            let left = pan(PAN_LEFT[sl.pan as usize & 0xf]);
            let right = pan(PAN_RIGHT[sl.pan as usize & 0xf]);
            *out = [(level * left) >> 5, (level * right) >> 5];

            sl.advance_position();
        }

        self.eg_cnt = self.eg_cnt.wrapping_add(1);
        for sl in &mut self.slots {
            sl.advance(self.eg_cnt);
        }

        for (sum, out) in self.sums.iter_mut().zip(&self.outputs) {
            sum[0] += out[0];
            sum[1] += out[1];
        }
        self.steps += 1;
    }

    pub fn tick(&mut self, cycles: u32) {
        self.divider += cycles;
        while self.divider >= self.cycles_per_sample {
            self.divider -= self.cycles_per_sample;
            self.step();
        }
    }

    /// Average the samples since the last frame into the bus
    pub fn mix(&mut self, mixer: &mut Mixer) -> MixBus {
        let mut bus = MixBus::default();
        for (ch, (sum, out)) in self.sums.iter_mut().zip(&self.outputs).enumerate() {
            let value = if self.steps == 0 {
                *out
            } else {
                sum.map(|s| s / self.steps as i32)
            };
            *sum = [0; 2];
            mixer.add_stereo(&mut bus, ch, value);
        }
        self.steps = 0;
        bus.map(|s| s >> 4)
    }

    pub fn track_info(&self, channel: usize, clock: u32, mixer: &Mixer) -> Option<TrackInfo> {
        let sl = self.slots.get(channel)?;
        Some(TrackInfo {
            key_on: sl.state != EgState::Off,
            frequency: ((sl.oct as u32 & 0xf) << 10) | sl.fnum as u32,
            // sample playback rate
            frequency_hz: accumulator_hz(clock, self.cycles_per_sample, sl.step, 16),
            volume: 0xff - sl.tl as u32,
            max_volume: 0xff,
            waveform: sl.wave as u32,
            position: Some(sl.pos as u32),
            muted: mixer.is_muted(channel),
        })
    }
}

impl std::fmt::Debug for PcmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PcmEngine")
            .field("slots", &self.slots.len())
            .field("eg_cnt", &self.eg_cnt)
            .field("memory", &self.memory.as_ref().map(|m| m.len()))
            .finish_non_exhaustive()
    }
}
