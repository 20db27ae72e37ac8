//! Konami VRC6 (NES cartridge expansion)
//!
//! Two pulse voices with 16-step duty and a sawtooth voice, all clocked from
//! the CPU clock through 12-bit down counters, plus the cartridge IRQ timer
//! that shares the chip.
//!
//! Registers are addressed the way the cartridge decodes them: the group is
//! `addr >> 12` (`0x9` pulse 1, `0xa` pulse 2, `0xb` sawtooth, `0xf` timer)
//! and the register is `addr & 3`. `0x9003` is the global control register.
//! Flat offsets `0x00..=0x0f` address the same registers, group `addr >> 2`.

use chipsynth_common::bits::{bitfield, Bits};
use chipsynth_common::{
    period_hz, ChipError, ChipOption, ClockResampler, Result, SoundChip, StereoFrame, TrackInfo,
};

use crate::dc_filter::StereoDcFilter;
use crate::mixer::{MixBus, Mixer};

/// NTSC NES CPU clock
pub const VRC6_CLOCK: u32 = 1_789_773;

const OUTPUT_SHIFT: u32 = 8;
const PRESCALER_RELOAD: i32 = 341;

/// 12-bit down counter shared by the three voices
#[derive(Clone, Debug, Default)]
struct Divider {
    divider: u16,
    counter: u16,
    enabled: bool,
}

impl Divider {
    fn write_lsb(&mut self, data: u8) {
        self.divider = (self.divider & 0xf00) | data as u16;
    }

    fn write_msb(&mut self, data: u8) {
        self.divider = (self.divider & 0x0ff) | ((data as u16 & 0xf) << 8);
        self.enabled = data.bit(7);
    }

    /// Count one cycle; returns true on carry (counter reloaded)
    ///
    /// `shift` splits the counter into two independently borrowing fields:
    /// 1 = bits 4..11 and 0..3, 2 = bits 8..11 and 0..7.
    fn tick(&mut self, shift: u8) -> bool {
        let temp = self.counter;
        let carry = if shift & 2 != 0 {
            self.counter = (temp.wrapping_sub(0x100) & 0xf00) | (temp.wrapping_sub(1) & 0x0ff);
            temp & 0xf00 == 0
        } else if shift & 1 != 0 {
            self.counter = (temp.wrapping_sub(0x10) & 0xff0) | (temp.wrapping_sub(1) & 0x00f);
            temp & 0xff0 == 0
        } else {
            self.counter = temp.wrapping_sub(1) & 0xfff;
            temp == 0
        };
        if carry {
            self.counter = self.divider;
        }
        carry
    }
}

#[derive(Clone, Debug, Default)]
struct Pulse {
    alu: Divider,
    mode: bool,
    duty: u8,
    volume: u8,
    cycle: u8,
}

impl Pulse {
    fn tick(&mut self, shift: u8) -> bool {
        if !self.alu.enabled {
            return false;
        }
        if self.alu.tick(shift) {
            self.cycle = (self.cycle + 1) & 0xf;
        }
        self.mode || self.cycle > self.duty
    }
}

#[derive(Clone, Debug, Default)]
struct Saw {
    alu: Divider,
    rate: u8,
    accum: u8,
    cycle: u8,
}

impl Saw {
    fn tick(&mut self, shift: u8) -> bool {
        if !self.alu.enabled {
            return false;
        }
        if self.alu.tick(shift) {
            let step = self.cycle;
            self.cycle += 1;
            if step & 1 != 0 {
                self.accum = self.accum.wrapping_add(self.rate);
            }
            if self.cycle >= 14 {
                self.accum = 0;
                self.cycle = 0;
            }
        }
        self.accum != 0
    }

    fn output(&self) -> i32 {
        ((self.accum >> 3) & 0x1f) as i32
    }
}

/// Cartridge IRQ timer
#[derive(Clone, Debug)]
struct IrqTimer {
    latch: u8,
    counter: u8,
    prescaler: i32,
    enabled: bool,
    enable_ack: bool,
    sync: bool,
    irq: bool,
}

impl Default for IrqTimer {
    fn default() -> Self {
        Self {
            latch: 0,
            counter: 0,
            prescaler: PRESCALER_RELOAD,
            enabled: false,
            enable_ack: false,
            sync: false,
            irq: false,
        }
    }
}

impl IrqTimer {
    fn tick(&mut self) {
        if !self.enabled {
            return;
        }
        let clocked = if self.sync {
            true
        } else {
            self.prescaler -= 3;
            if self.prescaler <= 0 {
                self.prescaler += PRESCALER_RELOAD;
                true
            } else {
                false
            }
        };
        if clocked {
            self.counter = self.counter.wrapping_add(1);
            if self.counter == 0 {
                self.counter = self.latch;
                self.irq = true;
            }
        }
    }

    fn write(&mut self, reg: u32, data: u8) {
        match reg {
            0 => self.latch = data,
            1 => {
                self.sync = data.bit(2);
                self.enabled = data.bit(1);
                self.enable_ack = data.bit(0);
                if self.enabled {
                    self.counter = self.latch;
                    self.prescaler = PRESCALER_RELOAD;
                }
                self.irq = false;
            }
            2 => {
                self.irq = false;
                self.enabled = self.enable_ack;
            }
            _ => log::trace!("VRC6: write to unused timer register {reg}"),
        }
    }
}

/// Konami VRC6 emulator
#[derive(Debug)]
pub struct Vrc6 {
    pulse: [Pulse; 2],
    saw: Saw,
    timer: IrqTimer,
    halt: bool,
    shift: u8,
    outputs: [i32; 3],
    resampler: ClockResampler,
    mixer: Mixer,
    dc_filter: StereoDcFilter,
}

impl Vrc6 {
    /// Create a VRC6 at the given clock and output rate
    pub fn new(clock: u32, sample_rate: u32) -> Result<Self> {
        Ok(Self {
            pulse: Default::default(),
            saw: Saw::default(),
            timer: IrqTimer::default(),
            halt: false,
            shift: 0,
            outputs: [0; 3],
            resampler: ClockResampler::new(clock, sample_rate)?,
            mixer: Mixer::new(3),
            dc_filter: StereoDcFilter::default(),
        })
    }

    /// Whether the timer IRQ line is asserted
    pub fn irq_pending(&self) -> bool {
        self.timer.irq
    }

    /// Run one CPU cycle and latch the voice outputs
    #[inline]
    fn step(&mut self) {
        self.outputs = [0; 3];
        if !self.halt {
            for (out, pulse) in self.outputs.iter_mut().zip(self.pulse.iter_mut()) {
                if pulse.tick(self.shift) {
                    *out = pulse.volume as i32;
                }
            }
            if self.saw.tick(self.shift) {
                self.outputs[2] = self.saw.output();
            }
        }
        self.timer.tick();
    }

    fn write_pulse(&mut self, voice: usize, reg: u32, data: u8) {
        let pulse = &mut self.pulse[voice];
        match reg {
            0 => {
                pulse.mode = data.bit(7);
                pulse.duty = bitfield(data as u32, 4, 3) as u8;
                pulse.volume = data & 0xf;
            }
            1 => pulse.alu.write_lsb(data),
            2 => pulse.alu.write_msb(data),
            _ => unused_register(reg),
        }
    }

    fn write_saw(&mut self, reg: u32, data: u8) {
        match reg {
            0 => self.saw.rate = data & 0x3f,
            1 => self.saw.alu.write_lsb(data),
            2 => self.saw.alu.write_msb(data),
            _ => unused_register(reg),
        }
    }
}

fn unused_register(reg: u32) {
    log::trace!("VRC6: write to unused register {reg}");
}

impl SoundChip for Vrc6 {
    fn name(&self) -> &'static str {
        "VRC6"
    }

    fn channel_count(&self) -> usize {
        3
    }

    fn reset(&mut self) {
        self.pulse = Default::default();
        self.saw = Saw::default();
        self.timer = IrqTimer::default();
        self.halt = false;
        self.shift = 0;
        self.outputs = [0; 3];
        self.resampler.reset();
        self.dc_filter.reset();
    }

    fn write(&mut self, addr: u32, value: u8) {
        let reg = addr & 3;
        // flat offsets 0x00-0x0f pack the four register pages four apart
        let page = match addr {
            0x00..=0x0f => [0x9, 0xa, 0xb, 0xf][(addr >> 2) as usize],
            _ => (addr >> 12) & 0xf,
        };
        match page {
            0x9 if reg == 3 => {
                self.halt = value.bit(0);
                self.shift = bitfield(value as u32, 1, 2) as u8;
            }
            0x9 => self.write_pulse(0, reg, value),
            0xa => self.write_pulse(1, reg, value),
            0xb => self.write_saw(reg, value),
            0xf => self.timer.write(reg, value),
            _ => log::trace!("VRC6: write to unmapped address {addr:#06x}"),
        }
    }

    fn tick(&mut self, cycles: u32) {
        for _ in 0..cycles {
            self.step();
        }
    }

    fn render(&mut self, frames: &mut [StereoFrame]) {
        for frame in frames.iter_mut() {
            let cycles = self.resampler.next_cycles();
            let mut sums = [0i32; 3];
            for _ in 0..cycles {
                self.step();
                for (sum, out) in sums.iter_mut().zip(self.outputs) {
                    *sum += out;
                }
            }
            let voices = if cycles == 0 {
                self.outputs.map(|v| v << OUTPUT_SHIFT)
            } else {
                sums.map(|s| (s << OUTPUT_SHIFT) / cycles as i32)
            };

            let mut bus = MixBus::default();
            for (ch, value) in voices.into_iter().enumerate() {
                self.mixer.add_mono(&mut bus, ch, value);
            }
            self.dc_filter.process(&mut bus);
            *frame = Mixer::finish(bus);
        }
    }

    output_plumbing!();

    fn set_option(&mut self, option: ChipOption) -> Result<()> {
        match option {
            ChipOption::DcFilter(enabled) => {
                self.dc_filter.set_enabled(enabled);
                Ok(())
            }
            other => Err(ChipError::UnsupportedOption {
                chip: self.name(),
                option: other,
            }),
        }
    }

    fn track_info(&self, channel: usize) -> Option<TrackInfo> {
        let clock = self.clock();
        let info = match channel {
            0 | 1 => {
                let pulse = &self.pulse[channel];
                TrackInfo {
                    key_on: pulse.alu.enabled && pulse.volume > 0,
                    frequency: pulse.alu.divider as u32,
                    frequency_hz: period_hz(clock, pulse.alu.divider as u32 + 1, 16),
                    volume: pulse.volume as u32,
                    max_volume: 15,
                    waveform: if pulse.mode { 8 } else { pulse.duty as u32 },
                    ..Default::default()
                }
            }
            2 => TrackInfo {
                key_on: self.saw.alu.enabled && self.saw.rate > 0,
                frequency: self.saw.alu.divider as u32,
                frequency_hz: period_hz(clock, self.saw.alu.divider as u32 + 1, 14),
                volume: self.saw.rate as u32,
                max_volume: 42,
                ..Default::default()
            },
            _ => return None,
        };
        Some(TrackInfo {
            muted: self.mixer.is_muted(channel),
            ..info
        })
    }
}
