//! Ensoniq ES5503 "DOC" 32-oscillator wavetable chip
//!
//! Each oscillator steps an accumulator through an 8-bit wave in sample RAM.
//! A zero byte is the end-of-sample marker and halts the oscillator; reaching
//! the end of the table halts or loops depending on the mode. Oscillators are
//! paired (even/odd) for sync, amplitude modulation and swap modes.
//!
//! Register groups (`offset & 0xe0`, oscillator in the low five bits):
//!
//! | Offset | Function |
//! |---|---|
//! | `0x00` | frequency low |
//! | `0x20` | frequency high |
//! | `0x40` | volume |
//! | `0x60` | current sample (read only) |
//! | `0x80` | wavetable pointer (address bits 8-15) |
//! | `0xa0` | control: halt, mode, IRQ enable, output channel |
//! | `0xc0` | bank, table size, resolution |
//! | `0xe0` | interrupt status (read) |
//! | `0xe1` | enabled oscillators `(n - 1) << 1` |
//! | `0xe2` | A/D converter (reads 0) |

use chipsynth_common::{
    accumulator_hz, ChipError, ChipOption, ClockResampler, Result, SampleMemory, SoundChip,
    StereoFrame, TrackInfo,
};

use crate::mixer::{MixBus, Mixer};

/// Apple IIgs DOC clock
pub const ES5503_CLOCK: u32 = 7_159_090;

const OSCILLATORS: usize = 32;
/// Output channel that carries the summing glitch
const GLITCH_CHANNEL: u8 = 7;

const WAVE_SIZES: [u32; 8] = [256, 512, 1024, 2048, 4096, 8192, 16384, 32768];
const WAVE_MASKS: [u32; 8] = [
    0x1ff00, 0x1fe00, 0x1fc00, 0x1f800, 0x1f000, 0x1e000, 0x1c000, 0x18000,
];
const ACC_MASKS: [u32; 8] = [0xff, 0x1ff, 0x3ff, 0x7ff, 0xfff, 0x1fff, 0x3fff, 0x7fff];
const RES_SHIFTS: [u32; 8] = [9, 10, 11, 12, 13, 14, 15, 16];

const CTRL_HALT: u8 = 0x01;
const CTRL_IRQ: u8 = 0x08;
const BANK_BIT: u32 = 0x1_0000;

/// Oscillator mode, control bits 1-2
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OscMode {
    /// Loop the table forever
    FreeRun,
    /// Halt at the end of the table
    OneShot,
    /// Even: hard sync to the partner. Odd: modulate the next volume
    SyncAm,
    /// Halt and start the partner
    Swap,
}

impl OscMode {
    fn from_control(control: u8) -> Self {
        match (control >> 1) & 3 {
            0 => Self::FreeRun,
            1 => Self::OneShot,
            2 => Self::SyncAm,
            _ => Self::Swap,
        }
    }
}

#[derive(Clone, Debug)]
struct Oscillator {
    freq: u16,
    wtsize: u32,
    control: u8,
    vol: u8,
    data: u8,
    wavetblpointer: u32,
    wavetblsize: u8,
    resolution: u8,
    accumulator: u32,
    irqpend: bool,
}

impl Default for Oscillator {
    fn default() -> Self {
        Self {
            freq: 0,
            wtsize: WAVE_SIZES[0],
            control: 0,
            vol: 0,
            data: 0x80,
            wavetblpointer: 0,
            wavetblsize: 0,
            resolution: 0,
            accumulator: 0,
            irqpend: false,
        }
    }
}

impl Oscillator {
    #[inline]
    fn halted(&self) -> bool {
        self.control & CTRL_HALT != 0
    }

    #[inline]
    fn mode(&self) -> OscMode {
        OscMode::from_control(self.control)
    }

    #[inline]
    fn output_channel(&self) -> u8 {
        (self.control >> 4) & 7
    }

    #[inline]
    fn res_shift(&self) -> u32 {
        RES_SHIFTS[self.resolution as usize] - self.wavetblsize as u32
    }
}

/// Ensoniq ES5503 emulator
pub struct Es5503 {
    oscillators: [Oscillator; OSCILLATORS],
    enabled: usize,
    rege0: u8,
    mono: bool,
    ram: Option<Box<dyn SampleMemory>>,
    divider: u32,
    outputs: [[i32; 2]; OSCILLATORS],
    sums: [[i32; 2]; OSCILLATORS],
    steps: u32,
    resampler: ClockResampler,
    mixer: Mixer,
}

impl Es5503 {
    /// Create an ES5503 with all 32 oscillators enabled
    pub fn new(clock: u32, sample_rate: u32) -> Result<Self> {
        Ok(Self {
            oscillators: Default::default(),
            enabled: OSCILLATORS,
            rege0: 0xff,
            mono: false,
            ram: None,
            divider: 0,
            outputs: [[0; 2]; OSCILLATORS],
            sums: [[0; 2]; OSCILLATORS],
            steps: 0,
            resampler: ClockResampler::new(clock, sample_rate)?,
            mixer: Mixer::new(OSCILLATORS),
        })
    }

    /// Number of oscillators the chip scans
    pub fn enabled_oscillators(&self) -> usize {
        self.enabled
    }

    /// Input clocks per output sample
    pub fn cycles_per_sample(&self) -> u32 {
        8 * (self.enabled as u32 + 2)
    }

    /// Whether an oscillator is halted
    pub fn is_halted(&self, osc: usize) -> bool {
        self.oscillators.get(osc).map_or(true, |o| o.halted())
    }

    fn read_byte(&self, addr: u32) -> u8 {
        self.ram.as_deref().map_or(0, |ram| ram.read_byte(addr))
    }

    /// Handle the end of a wave; `end_marker` is set for a zero sample byte
    fn halt_osc(&mut self, onum: usize, end_marker: bool, acc: &mut u32, resshift: u32) {
        let partner = onum ^ 1;
        let mut mode = self.oscillators[onum].mode();
        let partner_mode = self.oscillators[partner].mode();
        let wrap = (self.oscillators[onum].wtsize - 1) << resshift;

        if mode == OscMode::SyncAm {
            // an even oscillator restarts the running odd one below it
            if onum & 1 == 0 && onum > 0 && !self.oscillators[onum - 1].halted() {
                self.oscillators[onum - 1].accumulator = 0;
            }
            mode = OscMode::FreeRun;
        }

        if mode != OscMode::FreeRun || end_marker {
            self.oscillators[onum].control |= CTRL_HALT;
        } else {
            // keep the relative phase when looping
            *acc = acc.wrapping_sub(wrap);
        }

        if mode == OscMode::Swap {
            let p = &mut self.oscillators[partner];
            p.control &= !CTRL_HALT;
            p.accumulator = 0;
        } else if partner_mode == OscMode::Swap && onum & 1 == 0 {
            self.oscillators[onum].control &= !CTRL_HALT;
            *acc = acc.wrapping_sub(wrap);
        }

        if self.oscillators[onum].control & CTRL_IRQ != 0 {
            self.oscillators[onum].irqpend = true;
        }
    }

    /// Produce one output sample for every enabled oscillator
    fn step(&mut self) {
        self.outputs = [[0; 2]; OSCILLATORS];
        for osc in 0..self.enabled {
            let o = &self.oscillators[osc];
            // a halted oscillator is skipped, the scan still visits the rest
            if o.halted() {
                continue;
            }
            let wtptr = o.wavetblpointer & WAVE_MASKS[o.wavetblsize as usize];
            let resshift = o.res_shift();
            let sizemask = ACC_MASKS[o.wavetblsize as usize];
            let wtsize = o.wtsize - 1;
            let mode = o.mode();
            let channel = o.output_channel();
            let vol = o.vol as i32;

            let mut acc = o.accumulator;
            let altram = acc >> resshift;
            let ramptr = altram & sizemask;
            acc = acc.wrapping_add(o.freq as u32);

            let raw = self.read_byte(ramptr + wtptr);
            let data = (raw ^ 0x80) as i8 as i32;
            if raw == 0 {
                self.halt_osc(osc, true, &mut acc, resshift);
            } else {
                let audible = match mode {
                    OscMode::SyncAm if osc & 1 != 0 => {
                        // odd AM oscillators drive the next volume instead
                        if osc + 1 < OSCILLATORS && !self.oscillators[osc + 1].halted() {
                            self.oscillators[osc + 1].vol = raw;
                        }
                        false
                    }
                    _ => true,
                };
                if audible {
                    let mut value = data * vol / 8;
                    if channel == GLITCH_CHANNEL {
                        value *= 3;
                    }
                    self.outputs[osc] = if self.mono {
                        [value, value]
                    } else if channel & 1 == 0 {
                        [value, 0]
                    } else {
                        [0, value]
                    };
                }
                if altram >= wtsize {
                    self.halt_osc(osc, false, &mut acc, resshift);
                }
            }

            let o = &mut self.oscillators[osc];
            if !o.halted() {
                o.accumulator = acc;
                o.data = raw;
            }
        }

        for (sum, out) in self.sums.iter_mut().zip(self.outputs) {
            sum[0] += out[0];
            sum[1] += out[1];
        }
        self.steps += 1;
    }
}

impl std::fmt::Debug for Es5503 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Es5503")
            .field("oscillators", &self.oscillators)
            .field("enabled", &self.enabled)
            .field("ram", &self.ram.as_ref().map(|r| r.len()))
            .finish_non_exhaustive()
    }
}

impl SoundChip for Es5503 {
    fn name(&self) -> &'static str {
        "ES5503"
    }

    fn channel_count(&self) -> usize {
        OSCILLATORS
    }

    fn reset(&mut self) {
        self.oscillators = Default::default();
        self.enabled = OSCILLATORS;
        self.rege0 = 0xff;
        self.divider = 0;
        self.outputs = [[0; 2]; OSCILLATORS];
        self.sums = [[0; 2]; OSCILLATORS];
        self.steps = 0;
        self.resampler.reset();
    }

    fn write(&mut self, addr: u32, value: u8) {
        let offset = (addr & 0xff) as u8;
        if offset >= 0xe0 {
            match offset {
                0xe1 => {
                    self.enabled = ((value as usize >> 1) & 0x1f) + 1;
                    log::trace!("ES5503: {} oscillators enabled", self.enabled);
                }
                _ => log::trace!("ES5503: write to read-only register {offset:#04x}"),
            }
            return;
        }

        let o = &mut self.oscillators[(offset & 0x1f) as usize];
        match offset & 0xe0 {
            0x00 => o.freq = (o.freq & 0xff00) | value as u16,
            0x20 => o.freq = (o.freq & 0x00ff) | ((value as u16) << 8),
            0x40 => o.vol = value,
            0x60 => {}
            0x80 => o.wavetblpointer = (value as u32) << 8,
            0xa0 => {
                // leaving halt restarts from the top of the table
                if o.halted() && value & CTRL_HALT == 0 {
                    o.accumulator = 0;
                }
                o.control = value;
            }
            _ => {
                if value & 0x40 != 0 {
                    o.wavetblpointer |= BANK_BIT;
                } else {
                    o.wavetblpointer &= 0xffff;
                }
                o.wavetblsize = (value >> 3) & 7;
                o.wtsize = WAVE_SIZES[o.wavetblsize as usize];
                o.resolution = value & 7;
            }
        }
    }

    fn read(&mut self, addr: u32) -> Option<u8> {
        let offset = (addr & 0xff) as u8;
        if offset < 0xe0 {
            let o = &self.oscillators[(offset & 0x1f) as usize];
            return Some(match offset & 0xe0 {
                0x00 => o.freq as u8,
                0x20 => (o.freq >> 8) as u8,
                0x40 => o.vol,
                0x60 => o.data,
                0x80 => (o.wavetblpointer >> 8) as u8,
                0xa0 => o.control,
                _ => {
                    let bank = if o.wavetblpointer & BANK_BIT != 0 { 0x40 } else { 0 };
                    bank | (o.wavetblsize << 3) | o.resolution
                }
            });
        }
        match offset {
            0xe0 => {
                // report and acknowledge the lowest pending interrupt
                let mut status = self.rege0;
                if let Some(i) = self.oscillators[..self.enabled]
                    .iter()
                    .position(|o| o.irqpend)
                {
                    status = (i as u8) << 1;
                    self.rege0 = status | 0x80;
                    self.oscillators[i].irqpend = false;
                }
                Some(status | 0x41)
            }
            0xe1 => Some(((self.enabled - 1) << 1) as u8),
            0xe2 => Some(0),
            _ => None,
        }
    }

    fn tick(&mut self, cycles: u32) {
        self.divider += cycles;
        while self.divider >= self.cycles_per_sample() {
            self.divider -= self.cycles_per_sample();
            self.step();
        }
    }

    fn render(&mut self, frames: &mut [StereoFrame]) {
        for frame in frames.iter_mut() {
            let cycles = self.resampler.next_cycles();
            self.tick(cycles);

            let mut bus = MixBus::default();
            for ch in 0..OSCILLATORS {
                let value = if self.steps == 0 {
                    self.outputs[ch]
                } else {
                    self.sums[ch].map(|s| s / self.steps as i32)
                };
                self.mixer.add_stereo(&mut bus, ch, value);
            }
            self.sums = [[0; 2]; OSCILLATORS];
            self.steps = 0;
            *frame = Mixer::finish(bus);
        }
    }

    output_plumbing!();

    fn set_option(&mut self, option: ChipOption) -> Result<()> {
        match option {
            ChipOption::Mono(mono) => {
                self.mono = mono;
                Ok(())
            }
            other => Err(ChipError::UnsupportedOption {
                chip: self.name(),
                option: other,
            }),
        }
    }

    fn set_memory(&mut self, memory: Box<dyn SampleMemory>) -> Result<()> {
        log::debug!("ES5503: attached {} bytes of wave RAM", memory.len());
        self.ram = Some(memory);
        Ok(())
    }

    fn track_info(&self, channel: usize) -> Option<TrackInfo> {
        let o = self.oscillators.get(channel)?;
        // the table wraps after 2^(17 + resolution) accumulator units
        let bits = 17 + o.resolution as u32;
        Some(TrackInfo {
            key_on: channel < self.enabled && !o.halted(),
            frequency: o.freq as u32,
            frequency_hz: accumulator_hz(
                self.clock(),
                self.cycles_per_sample(),
                o.freq as u32,
                bits,
            ),
            volume: o.vol as u32,
            max_volume: 0xff,
            waveform: o.wavetblpointer,
            position: Some((o.accumulator >> o.res_shift()) & ACC_MASKS[o.wavetblsize as usize]),
            muted: self.mixer.is_muted(channel),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chipsynth_common::SampleRom;

    /// Wave RAM with a 256-byte table of `fill` at page 1
    fn chip(fill: u8) -> Es5503 {
        let mut ram = vec![0x80u8; 0x2_0000];
        ram[0x100..0x200].fill(fill);
        let mut chip = Es5503::new(ES5503_CLOCK, 44_100).unwrap();
        chip.set_memory(Box::new(SampleRom::new(ram))).unwrap();
        chip.write(0xe1, 1 << 1);
        chip
    }

    /// Start oscillator `osc` on page 1 with one table byte per sample
    fn start(chip: &mut Es5503, osc: u32, control: u8) {
        chip.write(osc, 0x00);
        chip.write(0x20 + osc, 0x02);
        chip.write(0x40 + osc, 0xff);
        chip.write(0x80 + osc, 0x01);
        chip.write(0xc0 + osc, 0x00);
        chip.write(0xa0 + osc, control | CTRL_HALT);
        chip.write(0xa0 + osc, control);
    }

    #[test]
    fn test_output_rate() {
        let mut chip = chip(0xc0);
        assert_eq!(chip.enabled_oscillators(), 2);
        assert_eq!(chip.cycles_per_sample(), 32);
        assert_eq!(chip.read(0xe1), Some(2));
        chip.write(0xe1, 31 << 1);
        assert_eq!(chip.cycles_per_sample(), 8 * 34);
        chip.reset();
        assert_eq!(chip.enabled_oscillators(), 32);
    }

    #[test]
    fn test_register_readback() {
        let mut chip = chip(0xc0);
        chip.write(0x03, 0x34);
        chip.write(0x23, 0x12);
        chip.write(0x83, 0xab);
        chip.write(0xc3, 0x40 | (3 << 3) | 5);
        assert_eq!(chip.read(0x03), Some(0x34));
        assert_eq!(chip.read(0x23), Some(0x12));
        assert_eq!(chip.read(0x83), Some(0xab));
        assert_eq!(chip.read(0xc3), Some(0x40 | (3 << 3) | 5));
        assert_eq!(chip.oscillators[3].wavetblpointer, 0x1ab00);
        assert_eq!(chip.oscillators[3].wtsize, 2048);
        assert_eq!(chip.read(0xe2), Some(0));
    }

    #[test]
    fn test_accumulator_advance() {
        let mut chip = chip(0xc0);
        start(&mut chip, 0, 0x00);
        chip.tick(10 * chip.cycles_per_sample());
        assert_eq!(chip.oscillators[0].accumulator, 10 * 0x200);
        assert_eq!(chip.read(0x60), Some(0xc0));
    }

    #[test]
    fn test_halted_oscillator_does_not_stop_scan() {
        let mut chip = chip(0xc0);
        chip.write(0xe1, 3 << 1);
        // oscillators 0 and 1 stay halted below the running one
        chip.write(0xa0, CTRL_HALT);
        chip.write(0xa1, CTRL_HALT);
        start(&mut chip, 2, 0x00);
        assert!(chip.is_halted(0) && chip.is_halted(1));
        chip.tick(10 * chip.cycles_per_sample());
        assert_eq!(chip.oscillators[2].accumulator, 10 * 0x200);
        assert_eq!(chip.oscillators[0].accumulator, 0);
    }

    #[test]
    fn test_one_shot_halts_at_end() {
        let mut chip = chip(0xc0);
        start(&mut chip, 0, 0x02 | CTRL_IRQ);
        // 0x200 per sample with resolution shift 9: one byte per sample
        chip.tick(255 * chip.cycles_per_sample());
        assert!(!chip.is_halted(0));
        chip.tick(chip.cycles_per_sample());
        assert!(chip.is_halted(0));
        // interrupt reported once, then acknowledged
        assert_eq!(chip.read(0xe0), Some(0x41));
        assert_eq!(chip.read(0xe0), Some(0x80 | 0x41));
    }

    #[test]
    fn test_free_run_loops_with_phase() {
        let mut chip = chip(0xc0);
        start(&mut chip, 0, 0x00);
        chip.tick(300 * chip.cycles_per_sample());
        assert!(!chip.is_halted(0));
        assert!(chip.oscillators[0].accumulator < 256 << 9);
    }

    #[test]
    fn test_zero_byte_halts() {
        let mut chip = chip(0x00);
        start(&mut chip, 0, 0x00);
        chip.tick(chip.cycles_per_sample());
        assert!(chip.is_halted(0));
    }

    #[test]
    fn test_swap_starts_partner() {
        let mut chip = chip(0xc0);
        start(&mut chip, 0, 0x06);
        chip.write(0x21, 0x02);
        chip.write(0x81, 0x01);
        chip.write(0xa1, 0x06 | CTRL_HALT);
        chip.tick(256 * chip.cycles_per_sample());
        assert!(chip.is_halted(0));
        assert!(!chip.is_halted(1));
    }

    #[test]
    fn test_even_channel_left_odd_right() {
        let mut chip = chip(0xc0);
        start(&mut chip, 0, 0x00);
        start(&mut chip, 1, 0x10);
        let mut frames = [[0i16; 2]; 4];
        chip.render(&mut frames);
        // 0x40 * 0xff / 8 per side
        assert_eq!(frames[3], [0x40 * 0xff / 8, 0x40 * 0xff / 8]);

        chip.set_mask(0b10);
        chip.render(&mut frames);
        assert_eq!(frames[3], [0x40 * 0xff / 8, 0]);

        chip.set_option(ChipOption::Mono(true)).unwrap();
        chip.render(&mut frames);
        assert_eq!(frames[3][0], frames[3][1]);
        assert!(chip.set_option(ChipOption::Filter(true)).is_err());
    }

    #[test]
    fn test_am_drives_next_volume() {
        let mut chip = chip(0xc0);
        start(&mut chip, 1, 0x04);
        start(&mut chip, 2, 0x00);
        chip.write(0xe1, 2 << 1);
        chip.tick(chip.cycles_per_sample());
        assert_eq!(chip.oscillators[2].vol, 0xc0);
        assert_eq!(chip.outputs[1], [0, 0]);
    }
}
