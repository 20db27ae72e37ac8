//! Namco 163 wavetable sound
//!
//! Up to eight voices share 128 bytes of internal RAM that holds both the
//! 4-bit wave samples and the voice registers. The chip updates a single
//! voice every 15 clocks, cycling from the voice at `0x78` down to the lowest
//! enabled voice, so each voice's sample rate drops as more voices are
//! enabled.
//!
//! Voice registers at `0x40 + 8 * n` (voice 7 at `0x78` is always enabled):
//!
//! | Offset | Function |
//! |---|---|
//! | 0, 2, 4 | frequency bits 0-7, 8-15, 16-17 (reg 4 bits 0-1) |
//! | 1, 3, 5 | phase bits 0-7, 8-15, 16-23 |
//! | 4 | wave length `256 - (reg & 0xfc)`; the phase wraps modulo the length |
//! | 6 | wave offset in nibbles |
//! | 7 | volume (bits 0-3); `0x7f` bits 4-6 hold enabled voices - 1 |
//!
//! Host addresses: `0x00..=0x7f` write RAM directly, `0x80`/`0xf800` set the
//! address port (bit 7 enables auto-increment), `0x81`/`0x4800` access the
//! data port and `0xe000` bit 6 disables sound.

use chipsynth_common::bits::{bitfield, Bits};
use chipsynth_common::{
    accumulator_hz, ChipError, ChipOption, ClockResampler, Result, SoundChip, StereoFrame,
    TrackInfo,
};

use crate::dc_filter::StereoDcFilter;
use crate::mixer::{MixBus, Mixer};

/// Half the NTSC color burst, the Famicom cartridge clock
pub const N163_CLOCK: u32 = 1_789_773;

const CYCLES_PER_VOICE: u32 = 15;
const FIRST_VOICE: u8 = 0x78;
const OUTPUT_SHIFT: u32 = 7;

/// Namco 163 emulator
#[derive(Debug)]
pub struct N163 {
    ram: [u8; 0x80],
    addr: u8,
    auto_increment: bool,
    voice_cycle: u8,
    disabled: bool,
    multiplex: bool,
    /// Latest sample of each voice, indexed by hardware voice (0x40 = 0)
    voice_out: [i32; 8],
    accum: i32,
    out: i32,
    /// Per-channel contribution held between flushes
    held: [i32; 8],
    divider: u32,
    sums: [i32; 8],
    steps: u32,
    resampler: ClockResampler,
    mixer: Mixer,
    dc_filter: StereoDcFilter,
}

impl N163 {
    /// Create a N163 at the given clock and output rate
    pub fn new(clock: u32, sample_rate: u32) -> Result<Self> {
        Ok(Self {
            ram: [0; 0x80],
            addr: 0,
            auto_increment: false,
            voice_cycle: FIRST_VOICE,
            disabled: false,
            multiplex: true,
            voice_out: [0; 8],
            accum: 0,
            out: 0,
            held: [0; 8],
            divider: 0,
            sums: [0; 8],
            steps: 0,
            resampler: ClockResampler::new(clock, sample_rate)?,
            mixer: Mixer::new(8),
            dc_filter: StereoDcFilter::default(),
        })
    }

    /// Number of enabled voices (1-8)
    #[inline]
    pub fn active_voices(&self) -> usize {
        bitfield(self.ram[0x7f] as u32, 4, 3) as usize + 1
    }

    /// Register base of the voice the chip will update next
    #[inline]
    pub fn voice_cycle(&self) -> u8 {
        self.voice_cycle
    }

    /// Mixed chip output before scaling
    #[inline]
    pub fn out(&self) -> i32 {
        self.out
    }

    /// Set the address port; bit 7 enables auto-increment
    pub fn addr_w(&mut self, data: u8) {
        self.addr = data & 0x7f;
        self.auto_increment = data.bit(7);
    }

    /// Write RAM through the data port
    pub fn data_w(&mut self, data: u8) {
        self.ram[self.addr as usize] = data;
        self.advance_port();
    }

    /// Read RAM through the data port
    pub fn data_r(&mut self) -> u8 {
        let data = self.ram[self.addr as usize];
        self.advance_port();
        data
    }

    fn advance_port(&mut self) {
        if self.auto_increment {
            self.addr = (self.addr + 1) & 0x7f;
        }
    }

    /// Update the current voice and advance the cycle
    fn update_voice(&mut self) {
        if self.disabled {
            self.out = 0;
            self.held = [0; 8];
            return;
        }

        let base = self.voice_cycle as usize;
        let reg = &mut self.ram[base..base + 8];
        let freq = ((reg[4] as u32 & 3) << 16) | ((reg[2] as u32) << 8) | reg[0] as u32;
        let mut accum = ((reg[5] as u32) << 16) | ((reg[3] as u32) << 8) | reg[1] as u32;
        let length = 256 - (reg[4] & 0xfc) as u32;

        // wrapping past the end keeps the overshoot, so pitch stays exact
        // when a step is longer than one sample
        accum = ((accum + freq) & 0xff_ffff) % (length << 16);
        reg[1] = accum as u8;
        reg[3] = (accum >> 8) as u8;
        reg[5] = (accum >> 16) as u8;

        let addr = reg[6].wrapping_add((accum >> 16) as u8);
        let volume = (reg[7] & 0xf) as i32;
        let byte = self.ram[(addr >> 1) as usize];
        let nibble = if addr & 1 != 0 { byte >> 4 } else { byte & 0xf };
        let voice = ((base - 0x40) >> 3) & 7;
        let sample = (nibble as i32 - 8) * volume;
        self.voice_out[voice] = sample;

        let active = self.active_voices();
        let mut flush = self.multiplex;
        let lowest = FIRST_VOICE - ((active as u8 - 1) << 3);
        self.voice_cycle = self.voice_cycle.wrapping_sub(8);
        if self.voice_cycle < lowest {
            flush = true;
            self.voice_cycle = FIRST_VOICE;
        }

        self.accum += sample;
        if flush {
            if self.multiplex {
                self.out = self.accum;
                self.held = [0; 8];
                self.held[channel_of(voice)] = self.out;
            } else {
                self.out = self.accum / active as i32;
                self.held = [0; 8];
                for v in (8 - active)..8 {
                    self.held[channel_of(v)] = self.voice_out[v] / active as i32;
                }
            }
            self.accum = 0;
        }
    }

    fn step(&mut self) {
        self.update_voice();
        for (sum, held) in self.sums.iter_mut().zip(self.held) {
            *sum += held;
        }
        self.steps += 1;
    }
}

/// Host channel 0 is the voice at `0x78`
#[inline]
fn channel_of(voice: usize) -> usize {
    7 - voice
}

impl SoundChip for N163 {
    fn name(&self) -> &'static str {
        "N163"
    }

    fn channel_count(&self) -> usize {
        8
    }

    fn reset(&mut self) {
        self.ram = [0; 0x80];
        self.addr = 0;
        self.auto_increment = false;
        self.voice_cycle = FIRST_VOICE;
        self.disabled = false;
        self.voice_out = [0; 8];
        self.accum = 0;
        self.out = 0;
        self.held = [0; 8];
        self.divider = 0;
        self.sums = [0; 8];
        self.steps = 0;
        self.resampler.reset();
        self.dc_filter.reset();
    }

    fn write(&mut self, addr: u32, value: u8) {
        match addr {
            0x00..=0x7f => self.ram[addr as usize] = value,
            0x80 | 0xf800 => self.addr_w(value),
            0x81 | 0x4800 => self.data_w(value),
            0xe000 => {
                self.disabled = value.bit(6);
                log::trace!("N163: sound {}", if self.disabled { "disabled" } else { "enabled" });
            }
            _ => log::trace!("N163: write to unmapped address {addr:#06x}"),
        }
    }

    fn read(&mut self, addr: u32) -> Option<u8> {
        match addr {
            0x00..=0x7f => Some(self.ram[addr as usize]),
            0x81 | 0x4800 => Some(self.data_r()),
            _ => None,
        }
    }

    fn tick(&mut self, cycles: u32) {
        self.divider += cycles;
        while self.divider >= CYCLES_PER_VOICE {
            self.divider -= CYCLES_PER_VOICE;
            self.step();
        }
    }

    fn render(&mut self, frames: &mut [StereoFrame]) {
        for frame in frames.iter_mut() {
            let cycles = self.resampler.next_cycles();
            self.tick(cycles);

            let channels = if self.steps == 0 {
                self.held
            } else {
                self.sums.map(|s| s / self.steps as i32)
            };
            self.sums = [0; 8];
            self.steps = 0;

            let mut bus = MixBus::default();
            for (ch, value) in channels.into_iter().enumerate() {
                self.mixer.add_mono(&mut bus, ch, value << OUTPUT_SHIFT);
            }
            self.dc_filter.process(&mut bus);
            *frame = Mixer::finish(bus);
        }
    }

    output_plumbing!();

    fn set_option(&mut self, option: ChipOption) -> Result<()> {
        match option {
            ChipOption::Multiplex(enabled) => {
                self.multiplex = enabled;
                self.accum = 0;
                Ok(())
            }
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
        if channel >= 8 {
            return None;
        }
        let base = FIRST_VOICE as usize - (channel << 3);
        let reg = &self.ram[base..base + 8];
        let freq = ((reg[4] as u32 & 3) << 16) | ((reg[2] as u32) << 8) | reg[0] as u32;
        let length = 256 - (reg[4] & 0xfc) as u32;
        let enabled = channel < self.active_voices();
        let divider = CYCLES_PER_VOICE * self.active_voices() as u32 * length;
        Some(TrackInfo {
            key_on: enabled && !self.disabled && reg[7] & 0xf != 0,
            frequency: freq,
            frequency_hz: accumulator_hz(self.clock(), divider, freq, 16),
            volume: (reg[7] & 0xf) as u32,
            max_volume: 15,
            waveform: reg[6] as u32,
            position: Some(reg[5] as u32),
            muted: self.mixer.is_muted(channel),
        })
    }
}
