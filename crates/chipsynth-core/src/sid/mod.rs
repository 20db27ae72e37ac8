//! MOS 6581/8580 SID
//!
//! Three voices, each an oscillator with combined waveforms, ring modulation
//! and hard sync plus an ADSR envelope. Voices feed a state-variable filter
//! and the board's output RC network. The chip is clocked once per cycle.
//!
//! With [`ChipOption::Extended`] the chip becomes a SID2: every voice gets its
//! own filter and a 4-bit volume, there is no master volume, and the two
//! spare registers select per-voice noise and waveform mix modes:
//!
//! | Reg | Bits | Function |
//! |---|---|---|
//! | `0x03`, `0x0a`, `0x11` | 4-7 | volume of voice 1, 2, 3 |
//! | `0x15`, `0x18`, `0x1b` | 0-3, 4-6, 7 | cutoff low nibble, mode, filter enable of voice 1, 2, 3 |
//! | `0x16`, `0x19`, `0x1c` | 0-7 | cutoff high byte of voice 1, 2, 3 |
//! | `0x17`, `0x1a`, `0x1d` | 0-7 | resonance of voice 1, 2, 3 |
//! | `0x1e` | 0-1, 2-3, 4-5 | noise mode of voice 1, 2, 3 |
//! | `0x1e` | 6, 7 | frequency bit 16 of voice 1, 2 |
//! | `0x1f` | 0-1, 2-3, 4-5 | waveform mix mode of voice 1, 2, 3 |
//! | `0x1f` | 6 | frequency bit 16 of voice 3 |

mod envelope;
mod filter;
mod waveform;

use bitflags::bitflags;
use chipsynth_common::{
    accumulator_hz, ChipError, ChipOption, ClockResampler, Result, SoundChip, StereoFrame,
    TrackInfo,
};

use crate::mixer::Mixer;
use envelope::EnvelopeGenerator;
use filter::{ExternalFilter, Filter, VoiceFilter};
use waveform::WaveformGenerator;

pub use envelope::EnvelopeState;
pub use filter::cutoff_table;
pub use waveform::{wave_tables, WaveTables, NOISE_RESEED};

/// PAL C64 system clock
pub const SID_CLOCK_PAL: u32 = 985_248;
/// NTSC C64 system clock
pub const SID_CLOCK_NTSC: u32 = 1_022_727;

/// Cycles the last written value stays readable on the data bus
const BUS_VALUE_TTL: u32 = 0x2000;

/// Chip revision
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SidModel {
    /// Original NMOS part
    #[default]
    Mos6581,
    /// HMOS-II part with linear filter and no voice DC offset
    Mos8580,
}

impl TryFrom<u8> for SidModel {
    type Error = ChipError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(SidModel::Mos6581),
            1 => Ok(SidModel::Mos8580),
            other => Err(ChipError::ConfigError(format!("unknown SID model {other}"))),
        }
    }
}

bitflags! {
    /// Voice control register
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SidControl: u8 {
        /// Envelope gate
        const GATE = 0x01;
        /// Hard sync to the previous voice
        const SYNC = 0x02;
        /// Ring modulate with the previous voice
        const RING = 0x04;
        /// Hold the oscillator at zero
        const TEST = 0x08;
        /// Triangle waveform
        const TRIANGLE = 0x10;
        /// Sawtooth waveform
        const SAWTOOTH = 0x20;
        /// Pulse waveform
        const PULSE = 0x40;
        /// Noise waveform
        const NOISE = 0x80;
    }
}

/// SID emulator
#[derive(Debug)]
pub struct Sid {
    model: SidModel,
    waves: [WaveformGenerator; 3],
    envelopes: [EnvelopeGenerator; 3],
    control: [SidControl; 3],
    filter: Filter,
    voice_filters: [VoiceFilter; 3],
    voice_volume: [u8; 3],
    ext_filter: ExternalFilter,
    extended: bool,
    bus_value: u8,
    bus_value_ttl: u32,
    wave_zero: i32,
    voice_dc: i32,
    resampler: ClockResampler,
    mixer: Mixer,
}

impl Sid {
    /// Create a 6581 at the given clock and output rate
    pub fn new(clock: u32, sample_rate: u32) -> Result<Self> {
        let model = SidModel::default();
        let mut sid = Self {
            model,
            waves: std::array::from_fn(|_| WaveformGenerator::new(model)),
            envelopes: Default::default(),
            control: [SidControl::empty(); 3],
            filter: Filter::new(model),
            voice_filters: std::array::from_fn(|_| VoiceFilter::new()),
            voice_volume: [0; 3],
            ext_filter: ExternalFilter::new(model),
            extended: false,
            bus_value: 0,
            bus_value_ttl: 0,
            wave_zero: 0,
            voice_dc: 0,
            resampler: ClockResampler::new(clock, sample_rate)?,
            mixer: Mixer::new(3),
        };
        sid.set_model(model);
        Ok(sid)
    }

    /// Current chip revision
    pub fn model(&self) -> SidModel {
        self.model
    }

    /// Switch chip revision, keeping register state
    pub fn set_model(&mut self, model: SidModel) {
        log::debug!("SID: model {model:?}");
        self.model = model;
        for wave in &mut self.waves {
            wave.set_model(model);
        }
        self.filter.set_model(model);
        self.ext_filter.set_model(self.output_model());
        (self.wave_zero, self.voice_dc) = match model {
            SidModel::Mos6581 => (0x380, 0x800 * 0xff),
            SidModel::Mos8580 => (0x800, 0),
        };
    }

    /// Revision the board output stage follows; the extended mode has none
    /// of the 6581 DC offsets
    fn output_model(&self) -> SidModel {
        if self.extended {
            SidModel::Mos8580
        } else {
            self.model
        }
    }

    /// Whether the extended registers are decoded
    pub fn is_extended(&self) -> bool {
        self.extended
    }

    /// Envelope phase of a voice
    pub fn envelope_state(&self, voice: usize) -> Option<EnvelopeState> {
        self.envelopes.get(voice).map(|e| e.state)
    }

    /// Noise shift register of a voice
    pub fn shift_register(&self, voice: usize) -> Option<u32> {
        self.waves.get(voice).map(|w| w.shift_register)
    }

    /// Oscillator accumulator of a voice
    pub fn accumulator(&self, voice: usize) -> Option<u32> {
        self.waves.get(voice).map(|w| w.accumulator)
    }

    /// Filter cutoff in Hz for the current cutoff register
    ///
    /// In extended mode this is the filter of voice 1.
    pub fn cutoff_hz(&self) -> u32 {
        self.voice_cutoff_hz(0).unwrap_or(0)
    }

    /// Cutoff in Hz of the filter a voice runs through
    pub fn voice_cutoff_hz(&self, voice: usize) -> Option<u32> {
        if voice >= 3 {
            return None;
        }
        Some(if self.extended {
            self.voice_filters[voice].cutoff_hz()
        } else {
            self.filter.cutoff_hz()
        })
    }

    /// Per-voice volume of the extended mode, 0 to 15
    pub fn voice_volume(&self, voice: usize) -> Option<u8> {
        self.voice_volume.get(voice).copied()
    }

    fn write_voice(&mut self, voice: usize, reg: u32, value: u8) {
        let wave = &mut self.waves[voice];
        match reg {
            0 => wave.write_freq_lo(value),
            1 => wave.write_freq_hi(value),
            2 => wave.write_pw_lo(value),
            3 => {
                wave.write_pw_hi(value);
                if self.extended {
                    self.voice_volume[voice] = value >> 4;
                }
            }
            4 => {
                self.control[voice] = SidControl::from_bits_retain(value);
                wave.write_control(value);
                self.envelopes[voice].write_gate(self.control[voice].contains(SidControl::GATE));
            }
            5 => self.envelopes[voice].write_attack_decay(value),
            _ => self.envelopes[voice].write_sustain_release(value),
        }
    }

    /// Filter registers 0x15-0x1d of the extended mode, three per voice
    fn write_voice_filter(&mut self, addr: u32, value: u8) {
        let reg = addr - 0x15;
        let filter = &mut self.voice_filters[(reg / 3) as usize];
        match reg % 3 {
            0 => filter.write_fc_lo_mode(value),
            1 => filter.write_fc_hi(value),
            _ => filter.write_res(value),
        }
    }

    fn write_extended(&mut self, addr: u32, value: u8) {
        if !self.extended {
            log::trace!("SID: write to unused register {addr:#04x}");
            return;
        }
        if addr == 0x1e {
            for (i, wave) in self.waves.iter_mut().enumerate() {
                wave.write_noise_mode(value >> (2 * i));
            }
            self.waves[0].write_freq_highest(value & 0x40 != 0);
            self.waves[1].write_freq_highest(value & 0x80 != 0);
        } else {
            for (i, wave) in self.waves.iter_mut().enumerate() {
                wave.write_mix_mode(value >> (2 * i));
            }
            self.waves[2].write_freq_highest(value & 0x40 != 0);
        }
    }

    fn synchronize(&mut self) {
        for i in 0..3 {
            let dest = (i + 1) % 3;
            let source = (i + 2) % 3;
            if self.waves[i].msb_rising
                && self.waves[dest].sync
                && !(self.waves[i].sync && self.waves[source].msb_rising)
            {
                self.waves[dest].accumulator = 0;
            }
        }
    }

    /// Advance one cycle
    #[inline]
    fn step(&mut self) {
        if self.bus_value_ttl > 0 {
            self.bus_value_ttl -= 1;
            if self.bus_value_ttl == 0 {
                self.bus_value = 0;
            }
        }

        for envelope in &mut self.envelopes {
            envelope.clock();
        }
        for wave in &mut self.waves {
            wave.clock();
        }
        self.synchronize();

        if self.extended {
            self.step_extended();
            return;
        }

        let mut voices = [0i32; 3];
        for (i, out) in voices.iter_mut().enumerate() {
            let ring = self.waves[(i + 2) % 3].accumulator;
            let wave = self.waves[i].output(ring) as i32;
            let env = self.envelopes[i].output() as i32;
            *out = self
                .mixer
                .scale_mono(i, (wave - self.wave_zero) * env + self.voice_dc);
        }
        self.filter.clock(voices);
        self.ext_filter.clock(self.filter.output());
    }

    /// Output stage of the extended mode: each voice through its own filter,
    /// the three filter outputs summed
    #[inline]
    fn step_extended(&mut self) {
        let mut sum = 0;
        for i in 0..3 {
            let ring = self.waves[(i + 2) % 3].accumulator;
            // voices are centered like the 8580 whatever the model
            let wave = self.waves[i].output(ring) as i32 - 0x800;
            let env = self.envelopes[i].output() as i32;
            let voice = self
                .mixer
                .scale_mono(i, wave * env * self.voice_volume[i] as i32);
            let filter = &mut self.voice_filters[i];
            filter.clock(voice);
            sum += filter.output();
        }
        self.ext_filter.clock(sum);
    }
}

impl SoundChip for Sid {
    fn name(&self) -> &'static str {
        match (self.model, self.extended) {
            (_, true) => "SID2",
            (SidModel::Mos6581, _) => "SID 6581",
            (SidModel::Mos8580, _) => "SID 8580",
        }
    }

    fn channel_count(&self) -> usize {
        3
    }

    fn reset(&mut self) {
        for wave in &mut self.waves {
            if self.extended {
                wave.reset_extended();
            } else {
                wave.reset();
            }
        }
        for envelope in &mut self.envelopes {
            envelope.reset();
        }
        self.control = [SidControl::empty(); 3];
        self.filter.reset();
        for filter in &mut self.voice_filters {
            filter.reset();
        }
        self.voice_volume = [0; 3];
        self.ext_filter.reset();
        self.bus_value = 0;
        self.bus_value_ttl = 0;
        self.resampler.reset();
    }

    fn write(&mut self, addr: u32, value: u8) {
        let addr = addr & 0x1f;
        self.bus_value = value;
        self.bus_value_ttl = BUS_VALUE_TTL;
        match addr {
            0x00..=0x14 => self.write_voice((addr / 7) as usize, addr % 7, value),
            0x15..=0x1d if self.extended => self.write_voice_filter(addr, value),
            0x15 => self.filter.write_fc_lo(value),
            0x16 => self.filter.write_fc_hi(value),
            0x17 => self.filter.write_res_filt(value),
            0x18 => self.filter.write_mode_vol(value),
            0x1e | 0x1f => self.write_extended(addr, value),
            _ => log::trace!("SID: write to read-only register {addr:#04x}"),
        }
    }

    fn read(&mut self, addr: u32) -> Option<u8> {
        Some(match addr & 0x1f {
            0x19 | 0x1a if !self.extended => 0xff,
            0x1b => self.waves[2].read_osc(),
            0x1c => self.envelopes[2].output(),
            _ => self.bus_value,
        })
    }

    fn tick(&mut self, cycles: u32) {
        for _ in 0..cycles {
            self.step();
        }
    }

    fn render(&mut self, frames: &mut [StereoFrame]) {
        for frame in frames.iter_mut() {
            let cycles = self.resampler.next_cycles();
            let mut sum = 0i64;
            for _ in 0..cycles {
                self.step();
                sum += self.ext_filter.output() as i64;
            }
            let out = if cycles == 0 {
                self.ext_filter.output()
            } else {
                (sum / cycles as i64) as i32
            };
            let sample = out / 11;
            *frame = Mixer::finish([sample, sample]);
        }
    }

    output_plumbing!();

    fn set_option(&mut self, option: ChipOption) -> Result<()> {
        match option {
            ChipOption::Model(model) => self.set_model(SidModel::try_from(model)?),
            ChipOption::Filter(enabled) => {
                self.filter.enable(enabled);
                for filter in &mut self.voice_filters {
                    filter.enable(enabled);
                }
            }
            ChipOption::DcFilter(enabled) => self.ext_filter.enable(enabled),
            ChipOption::Extended(enabled) => {
                log::debug!("SID: extended registers {enabled}");
                self.extended = enabled;
                self.ext_filter.set_model(self.output_model());
                // the extended part powers on with its own register state
                self.reset();
            }
            other => {
                return Err(ChipError::UnsupportedOption {
                    chip: self.name(),
                    option: other,
                })
            }
        }
        Ok(())
    }

    fn track_info(&self, channel: usize) -> Option<TrackInfo> {
        let wave = self.waves.get(channel)?;
        let envelope = &self.envelopes[channel];
        Some(TrackInfo {
            key_on: self.control[channel].contains(SidControl::GATE),
            frequency: wave.freq,
            frequency_hz: accumulator_hz(self.clock(), 1, wave.freq, 24),
            volume: envelope.output() as u32,
            max_volume: 0xff,
            waveform: (self.control[channel].bits() >> 4) as u32,
            position: Some(wave.accumulator),
            muted: self.mixer.is_muted(channel),
        })
    }
}
