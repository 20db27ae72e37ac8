//! SID3: a seven-voice SID successor
//!
//! Each voice selects any mix of triangle, sawtooth, pulse, noise and one of
//! 32 generated special waves, runs an 8-bit ADSR with a sustain-rate decay
//! and passes through up to four state-variable filters before stereo
//! panning. Ring modulation, hard sync and phase modulation can take any
//! voice as their source.
//!
//! Registers are addressed as `voice * 64 + reg`:
//!
//! | Reg | Function |
//! |---|---|
//! | 0 | flags ([`Sid3Flags`]) |
//! | 1-5 | attack, decay, sustain level, sustain rate, release |
//! | 6 | waveform ([`Sid3Wave`]) |
//! | 7, 8 | pulse width high / low |
//! | 9 | special wave number |
//! | 10-12 | frequency high / mid / low (24 bit) |
//! | 13 | volume |
//! | 14 | mix mode (0 combined, 1 AND, 2 OR, 3 XOR, 4 sum) |
//! | 15-17 | ring mod, hard sync and phase mod source voice |
//! | 18, 19 | pan left / right |
//! | 20-23 | noise LFSR feedback taps, high byte first (30 bit) |
//! | 24 + 8f | filter `f` (0-3): mode, cutoff high, cutoff low, resonance, distortion, connection, output volume |

use std::sync::Arc;

use bitflags::bitflags;
use chipsynth_common::{
    accumulator_hz, ClockResampler, Result, SoundChip, StereoFrame, TableCache, TrackInfo,
};

use crate::mixer::Mixer;
use crate::sid::{wave_tables, SidModel, WaveTables};

/// Default SID3 clock
pub const SID3_CLOCK: u32 = 1_000_000;

/// Number of voices
pub const SID3_VOICES: usize = 7;

/// Register stride between voices
pub const REGISTERS_PER_VOICE: u32 = 64;

const REGISTERS_PER_FILTER: u32 = 8;
const FILTERS: usize = 4;
const FILTER_BASE: u32 = 24;

const ACC_BITS: u32 = 30;
const ACC_MASK: u32 = (1 << ACC_BITS) - 1;
/// Accumulator bit whose rising edge clocks the noise LFSR
const NOISE_CLOCK_BIT: u32 = 1 << 25;

const LFSR_MASK: u32 = 0x3fff_ffff;
/// Noise LFSR value after reset or a tap change
pub const LFSR_SEED: u32 = 0x3fff_ffff;
/// x^30 + x^6 + x^4 + x + 1
const DEFAULT_NOISE_TAPS: u32 = (1 << 29) | (1 << 5) | (1 << 3) | 1;

const ENV_MAX: u32 = 0xff_ffff;

const SPECIAL_WAVES: usize = 32;
const SPECIAL_WAVE_LEN: usize = 1024;

// filter mode register
const FILTER_LOW_PASS: u8 = 0x01;
const FILTER_BAND_PASS: u8 = 0x02;
const FILTER_HIGH_PASS: u8 = 0x04;
const FILTER_ENABLE: u8 = 0x10;
/// Connection bit that feeds the voice signal into a filter; bits 0-3 feed
/// the outputs of filters 0-3
const FILTER_INPUT_VOICE: u8 = 0x10;

const FILTER_W_MAX: f32 = 0.5;
const FILTER_RAIL: f32 = 1_048_576.0;
const FILTER_OUT_MAX: i32 = 0x2_0000;

bitflags! {
    /// Voice flag register
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Sid3Flags: u8 {
        /// Envelope gate
        const GATE = 0x01;
        /// Ring modulate with the ring source voice
        const RING_MOD = 0x02;
        /// Reset the phase when the sync source wraps
        const HARD_SYNC = 0x04;
        /// Offset the phase by the phase source's output
        const PHASE_MOD = 0x08;
        /// Clear the accumulator (acts on write)
        const PHASE_RESET = 0x10;
        /// Restart the envelope from zero on the next attack (acts on write)
        const ENV_RESET = 0x20;
        /// Reseed the noise LFSR (acts on write)
        const NOISE_PHASE_RESET = 0x40;
        /// Noise outputs only the LFSR's low bit
        const ONE_BIT_NOISE = 0x80;
    }
}

bitflags! {
    /// Waveform select register
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Sid3Wave: u8 {
        /// Triangle
        const TRIANGLE = 0x01;
        /// Sawtooth
        const SAWTOOTH = 0x02;
        /// Pulse
        const PULSE = 0x04;
        /// Noise
        const NOISE = 0x08;
        /// Generated special wave
        const SPECIAL = 0x10;
    }
}

/// How selected waveforms are combined
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MixMode {
    /// 8580-style combined waveforms, ANDed with noise and special waves
    #[default]
    Combined,
    /// Bitwise AND
    And,
    /// Bitwise OR
    Or,
    /// Bitwise XOR
    Xor,
    /// Average of the selected waves
    Sum,
}

impl MixMode {
    fn from_register(value: u8) -> Self {
        match value {
            1 => MixMode::And,
            2 => MixMode::Or,
            3 => MixMode::Xor,
            4 => MixMode::Sum,
            0 => MixMode::Combined,
            other => {
                log::trace!("SID3: mix mode {other} treated as combined");
                MixMode::Combined
            }
        }
    }
}

/// Envelope phase
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Sid3EnvelopeState {
    /// Rising to full level
    Attack,
    /// Falling to the sustain level
    Decay,
    /// Holding, or falling at the sustain rate
    Sustain,
    /// Falling to zero
    #[default]
    Release,
}

/// Special waves and envelope step sizes shared by all SID3 instances
pub struct Sid3Tables {
    special: Vec<[u16; SPECIAL_WAVE_LEN]>,
    env_steps: [u32; 256],
}

impl std::fmt::Debug for Sid3Tables {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sid3Tables")
            .field("special", &self.special.len())
            .finish_non_exhaustive()
    }
}

impl Sid3Tables {
    /// Sample of a special wave; the wave number wraps at 32
    #[inline]
    pub fn special(&self, wave: u8, phase: u32) -> u16 {
        self.special[wave as usize % SPECIAL_WAVES][phase as usize % SPECIAL_WAVE_LEN]
    }

    /// Envelope counter step per cycle for a rate register value
    #[inline]
    pub fn env_step(&self, rate: u8) -> u32 {
        self.env_steps[rate as usize]
    }
}

/// Shape of special wave `n` at phase `x` in `[0, 1)`, in `[-1, 1]`
fn special_shape(n: usize, x: f64) -> f64 {
    use std::f64::consts::{PI, TAU};
    let s = (TAU * x).sin();
    let saw = 2.0 * x - 1.0;
    let tri = 1.0 - 4.0 * (x - 0.5).abs();
    let unipolar = |v: f64| 2.0 * v - 1.0;
    match n {
        0 => s,
        1 => unipolar(s.abs()),
        2 => unipolar(s.max(0.0)),
        3 => unipolar(if (x * 4.0) as u32 % 2 == 0 { s.abs() } else { 0.0 }),
        4 => unipolar(s * s),
        5 => s * s * s,
        6 => s.signum() * s.abs().sqrt(),
        7 => (TAU * 2.0 * x).sin(),
        8 => unipolar(if x < 0.5 { (TAU * 2.0 * x).sin().abs() } else { 0.0 }),
        9 => (s + 0.5 * (TAU * 2.0 * x).sin()) / 1.5,
        10 => (s + (TAU * 3.0 * x).sin() / 3.0) / 1.25,
        11 => (s + 0.5 * (TAU * 2.0 * x).sin() + 0.25 * (TAU * 4.0 * x).sin()) / 1.75,
        12 => (saw + s) / 2.0,
        13 => (tri + s) / 2.0,
        14 => unipolar(((4.0 * x).exp() - 1.0) / (4.0f64.exp() - 1.0)),
        15 => unipolar((1.0 + x * (std::f64::consts::E - 1.0)).ln()),
        16 => unipolar(1.0 - (2.0 * x - 1.0).powi(2)),
        17 => unipolar((x * 8.0).floor() / 7.0),
        18 => ((tri * 4.0).round() / 4.0).clamp(-1.0, 1.0),
        19 => unipolar((x * 4.0).floor() / 3.0),
        20 => {
            if x < 0.125 {
                1.0
            } else {
                -1.0
            }
        }
        21 => {
            if x < 0.25 {
                1.0
            } else {
                -1.0
            }
        }
        22 => (PI * x).sin() * 2.0 - 1.0,
        23 => (TAU * x + (TAU * x).sin()).sin(),
        24 => (TAU * x + 2.0 * (TAU * 2.0 * x).sin()).sin(),
        25 => (s * 3.0).tanh() / 3.0f64.tanh(),
        26 => s * (1.0 - x),
        27 => s * x.sqrt(),
        28 => (TAU * x * x).sin(),
        29 => saw * saw * saw,
        30 => tri * tri.abs(),
        _ => (s + tri) * 0.5 * if x < 0.5 { 1.0 } else { -1.0 },
    }
}

fn build_tables(_: &()) -> Sid3Tables {
    let special = (0..SPECIAL_WAVES)
        .map(|n| {
            let mut wave = [0u16; SPECIAL_WAVE_LEN];
            for (i, out) in wave.iter_mut().enumerate() {
                let v = special_shape(n, i as f64 / SPECIAL_WAVE_LEN as f64).clamp(-1.0, 1.0);
                *out = ((v + 1.0) * 32767.5) as u16;
            }
            wave
        })
        .collect();

    // rate 0 sweeps the full range in 256 cycles, each step ~4.5% slower
    let mut env_steps = [0u32; 256];
    for (rate, step) in env_steps.iter_mut().enumerate() {
        let cycles = 256.0 * 1.045f64.powi(rate as i32);
        *step = ((ENV_MAX as f64 / cycles) as u32).max(1);
    }
    Sid3Tables { special, env_steps }
}

static TABLES: TableCache<(), Sid3Tables> = TableCache::new();

/// Shared SID3 tables, built on first use
pub fn sid3_tables() -> Arc<Sid3Tables> {
    TABLES.get_or_build((), build_tables)
}

#[derive(Clone, Debug, Default)]
struct Envelope {
    state: Sid3EnvelopeState,
    level: u32,
    attack: u8,
    decay: u8,
    sustain: u8,
    sustain_rate: u8,
    release: u8,
    gate: bool,
}

impl Envelope {
    fn write_gate(&mut self, gate: bool) {
        if gate && !self.gate {
            self.state = Sid3EnvelopeState::Attack;
        } else if !gate && self.gate {
            self.state = Sid3EnvelopeState::Release;
        }
        self.gate = gate;
    }

    fn sustain_level(&self) -> u32 {
        self.sustain as u32 * 0x1_0101
    }

    #[inline]
    fn clock(&mut self, tables: &Sid3Tables) {
        match self.state {
            Sid3EnvelopeState::Attack => {
                self.level = (self.level + tables.env_step(self.attack)).min(ENV_MAX);
                if self.level == ENV_MAX {
                    self.state = Sid3EnvelopeState::Decay;
                }
            }
            Sid3EnvelopeState::Decay => {
                let target = self.sustain_level();
                self.level = self
                    .level
                    .saturating_sub(tables.env_step(self.decay))
                    .max(target);
                if self.level == target {
                    self.state = Sid3EnvelopeState::Sustain;
                }
            }
            Sid3EnvelopeState::Sustain => {
                // sustain rate 0 holds the level
                if self.sustain_rate != 0 {
                    self.level = self
                        .level
                        .saturating_sub(tables.env_step(self.sustain_rate));
                }
            }
            Sid3EnvelopeState::Release => {
                self.level = self.level.saturating_sub(tables.env_step(self.release));
            }
        }
    }

    #[inline]
    fn output(&self) -> u8 {
        (self.level >> 16) as u8
    }
}

/// Chamberlin state-variable filter with clipping distortion
#[derive(Clone, Debug, Default)]
struct Filter {
    mode: u8,
    cutoff: u16,
    resonance: u8,
    distortion: u8,
    connection: u8,
    output_volume: u8,
    w: f32,
    inv_q: f32,
    lp: f32,
    bp: f32,
    hp: f32,
    out: i32,
}

impl Filter {
    fn is_enabled(&self) -> bool {
        self.mode & FILTER_ENABLE != 0
    }

    fn write(&mut self, reg: u32, value: u8) {
        match reg {
            0 => self.mode = value,
            1 => self.cutoff = (self.cutoff & 0x00ff) | ((value as u16) << 8),
            2 => self.cutoff = (self.cutoff & 0xff00) | value as u16,
            3 => self.resonance = value,
            4 => self.distortion = value,
            5 => self.connection = value,
            6 => self.output_volume = value,
            _ => log::trace!("SID3: write to unused filter register {reg}"),
        }
        self.update_coefficients();
    }

    /// Cutoff maps quadratically onto the integrator gain
    fn update_coefficients(&mut self) {
        let c = self.cutoff as f32 / 65535.0;
        self.w = FILTER_W_MAX * c * c;
        self.inv_q = 1.0 / (0.707 + self.resonance as f32 / 32.0);
    }

    #[inline]
    fn clock(&mut self, input: i32) -> i32 {
        // integrators saturate instead of running away under feedback
        self.lp = (self.lp + self.w * self.bp).clamp(-FILTER_RAIL, FILTER_RAIL);
        self.hp = input as f32 - self.lp - self.inv_q * self.bp;
        self.bp = (self.bp + self.w * self.hp).clamp(-FILTER_RAIL, FILTER_RAIL);

        let mut y = 0.0;
        if self.mode & FILTER_LOW_PASS != 0 {
            y += self.lp;
        }
        if self.mode & FILTER_BAND_PASS != 0 {
            y += self.bp;
        }
        if self.mode & FILTER_HIGH_PASS != 0 {
            y += self.hp;
        }
        let mut y = (y as i32).clamp(-FILTER_OUT_MAX, FILTER_OUT_MAX);

        if self.distortion != 0 {
            let headroom = 256 - self.distortion as i32;
            let limit = (0x8000 * headroom) >> 8;
            y = y.clamp(-limit, limit) * 256 / headroom;
        }
        self.out = y;
        y
    }
}

#[derive(Clone, Debug)]
struct Voice {
    flags: Sid3Flags,
    wave: Sid3Wave,
    mix_mode: MixMode,
    special_wave: u8,
    freq: u32,
    pw: u16,
    acc: u32,
    wrapped: bool,
    lfsr: u32,
    noise_taps: u32,
    volume: u8,
    ring_source: usize,
    sync_source: usize,
    phase_source: usize,
    pan: [u8; 2],
    envelope: Envelope,
    filters: [Filter; FILTERS],
    wave_out: u16,
    out: i32,
}

impl Default for Voice {
    fn default() -> Self {
        Self {
            flags: Sid3Flags::empty(),
            wave: Sid3Wave::empty(),
            mix_mode: MixMode::Combined,
            special_wave: 0,
            freq: 0,
            pw: 0,
            acc: 0,
            wrapped: false,
            lfsr: LFSR_SEED,
            noise_taps: DEFAULT_NOISE_TAPS,
            volume: 0,
            ring_source: 0,
            sync_source: 0,
            phase_source: 0,
            pan: [0xff, 0xff],
            envelope: Envelope::default(),
            filters: Default::default(),
            wave_out: 0x8000,
            out: 0,
        }
    }
}

impl Voice {
    fn write_flags(&mut self, value: u8) {
        let flags = Sid3Flags::from_bits_retain(value);
        if flags.contains(Sid3Flags::PHASE_RESET) {
            self.acc = 0;
        }
        if flags.contains(Sid3Flags::NOISE_PHASE_RESET) {
            self.lfsr = LFSR_SEED;
        }
        if flags.contains(Sid3Flags::ENV_RESET) && flags.contains(Sid3Flags::GATE) {
            self.envelope.level = 0;
        }
        self.envelope.write_gate(flags.contains(Sid3Flags::GATE));
        self.flags = flags;
    }

    fn write_noise_taps(&mut self, byte: u32, value: u8) {
        let shift = (3 - byte) * 8;
        let taps = (self.noise_taps & !(0xff << shift)) | ((value as u32) << shift);
        let taps = taps & LFSR_MASK;
        if taps != self.noise_taps {
            self.noise_taps = taps;
            self.lfsr = LFSR_SEED;
        }
    }

    #[inline]
    fn clock_oscillator(&mut self) {
        let old = self.acc;
        self.acc = (self.acc + self.freq) & ACC_MASK;
        self.wrapped = self.acc < old;
        if !old & self.acc & NOISE_CLOCK_BIT != 0 {
            let feedback = (self.lfsr & self.noise_taps).count_ones() & 1;
            self.lfsr = ((self.lfsr << 1) | feedback) & LFSR_MASK;
        }
    }

    fn noise(&self) -> u32 {
        if self.flags.contains(Sid3Flags::ONE_BIT_NOISE) {
            if self.lfsr & 1 != 0 {
                0xffff
            } else {
                0
            }
        } else {
            (self.lfsr >> 14) & 0xffff
        }
    }

    /// 16-bit unsigned waveform at a 16-bit phase
    fn waveform(&self, phase: u32, tables: &Sid3Tables, combined: &WaveTables) -> u32 {
        let triangle = if phase & 0x8000 != 0 {
            (!phase << 1) & 0xffff
        } else {
            (phase << 1) & 0xffff
        };
        let pulse = if phase >= self.pw as u32 { 0xffff } else { 0 };
        let parts = [
            (Sid3Wave::TRIANGLE, triangle),
            (Sid3Wave::SAWTOOTH, phase),
            (Sid3Wave::PULSE, pulse),
            (Sid3Wave::NOISE, self.noise()),
            (
                Sid3Wave::SPECIAL,
                tables.special(self.special_wave, phase >> 6) as u32,
            ),
        ];
        let mut selected = parts
            .iter()
            .filter(|(bit, _)| self.wave.contains(*bit))
            .map(|(_, value)| *value);

        match self.mix_mode {
            MixMode::Combined => {
                let oscillator = (self.wave.bits() & 7) as u32;
                let mut value = 0xffff;
                if oscillator != 0 {
                    let v12 = combined.get(oscillator, phase >> 4) as u32;
                    value = (v12 << 4) | (v12 >> 8);
                    if self.wave.contains(Sid3Wave::PULSE) {
                        value &= pulse;
                    }
                }
                if self.wave.contains(Sid3Wave::NOISE) {
                    value &= self.noise();
                }
                if self.wave.contains(Sid3Wave::SPECIAL) {
                    value &= tables.special(self.special_wave, phase >> 6) as u32;
                }
                if self.wave.is_empty() {
                    0x8000
                } else {
                    value
                }
            }
            MixMode::Sum => {
                let (sum, count) = selected.fold((0, 0), |(s, n), v| (s + v, n + 1));
                if count == 0 {
                    0x8000
                } else {
                    sum / count
                }
            }
            mode => {
                let Some(first) = selected.next() else {
                    return 0x8000;
                };
                selected.fold(first, |acc, v| match mode {
                    MixMode::And => acc & v,
                    MixMode::Or => acc | v,
                    _ => acc ^ v,
                })
            }
        }
    }

    /// Run the voice signal through its filter network
    fn filter(&mut self, dry: i32) -> i32 {
        if !self.filters.iter().any(Filter::is_enabled) {
            return dry;
        }
        let mut mixed = 0;
        for f in 0..FILTERS {
            if !self.filters[f].is_enabled() {
                continue;
            }
            let connection = self.filters[f].connection;
            let mut input = if connection & FILTER_INPUT_VOICE != 0 {
                dry
            } else {
                0
            };
            for source in 0..FILTERS {
                if connection & (1 << source) != 0 {
                    input += self.filters[source].out;
                }
            }
            let filter = &mut self.filters[f];
            let y = filter.clock(input);
            mixed += y * filter.output_volume as i32 / 255;
        }
        mixed
    }
}

/// SID3 emulator
pub struct Sid3 {
    voices: [Voice; SID3_VOICES],
    tables: Arc<Sid3Tables>,
    combined: Arc<WaveTables>,
    sums: [[i64; 2]; SID3_VOICES],
    resampler: ClockResampler,
    mixer: Mixer,
}

impl Sid3 {
    /// Create a SID3 at the given clock and output rate
    pub fn new(clock: u32, sample_rate: u32) -> Result<Self> {
        Ok(Self {
            voices: Default::default(),
            tables: sid3_tables(),
            combined: wave_tables(SidModel::Mos8580),
            sums: [[0; 2]; SID3_VOICES],
            resampler: ClockResampler::new(clock, sample_rate)?,
            mixer: Mixer::new(SID3_VOICES),
        })
    }

    /// Envelope phase of a voice
    pub fn envelope_state(&self, voice: usize) -> Option<Sid3EnvelopeState> {
        self.voices.get(voice).map(|v| v.envelope.state)
    }

    /// Envelope level (0-255) of a voice
    pub fn envelope_level(&self, voice: usize) -> Option<u8> {
        self.voices.get(voice).map(|v| v.envelope.output())
    }

    /// Phase accumulator of a voice
    pub fn accumulator(&self, voice: usize) -> Option<u32> {
        self.voices.get(voice).map(|v| v.acc)
    }

    /// Noise LFSR of a voice
    pub fn lfsr(&self, voice: usize) -> Option<u32> {
        self.voices.get(voice).map(|v| v.lfsr)
    }

    /// Last 16-bit waveform sample of a voice
    pub fn wave_output(&self, voice: usize) -> Option<u16> {
        self.voices.get(voice).map(|v| v.wave_out)
    }

    /// Advance one cycle
    fn step(&mut self) {
        for voice in &mut self.voices {
            voice.clock_oscillator();
        }

        let wrapped: [bool; SID3_VOICES] = std::array::from_fn(|i| self.voices[i].wrapped);
        for voice in &mut self.voices {
            if voice.flags.contains(Sid3Flags::HARD_SYNC) && wrapped[voice.sync_source] {
                voice.acc = 0;
            }
        }

        let accs: [u32; SID3_VOICES] = std::array::from_fn(|i| self.voices[i].acc);
        let waves: [u16; SID3_VOICES] = std::array::from_fn(|i| self.voices[i].wave_out);
        for (i, voice) in self.voices.iter_mut().enumerate() {
            let offset = if voice.flags.contains(Sid3Flags::PHASE_MOD) {
                (waves[voice.phase_source] as u32) << (ACC_BITS - 16)
            } else {
                0
            };
            let phase = ((voice.acc + offset) & ACC_MASK) >> (ACC_BITS - 16);
            let mut wave = voice.waveform(phase, &self.tables, &self.combined);
            if voice.flags.contains(Sid3Flags::RING_MOD)
                && accs[voice.ring_source] & (1 << (ACC_BITS - 1)) != 0
            {
                wave ^= 0xffff;
            }
            voice.wave_out = wave as u16;

            voice.envelope.clock(&self.tables);
            let level = voice.envelope.output() as i64 * voice.volume as i64;
            let dry = ((wave as i64 - 0x8000) * level / (255 * 255)) as i32 >> 2;
            let out = voice.filter(dry);
            voice.out = out;

            self.sums[i][0] += (out * voice.pan[0] as i32 / 255) as i64;
            self.sums[i][1] += (out * voice.pan[1] as i32 / 255) as i64;
        }
    }
}

impl std::fmt::Debug for Sid3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sid3")
            .field("voices", &self.voices)
            .finish_non_exhaustive()
    }
}

impl SoundChip for Sid3 {
    fn name(&self) -> &'static str {
        "SID3"
    }

    fn channel_count(&self) -> usize {
        SID3_VOICES
    }

    fn reset(&mut self) {
        self.voices = Default::default();
        self.sums = [[0; 2]; SID3_VOICES];
        self.resampler.reset();
    }

    fn write(&mut self, addr: u32, value: u8) {
        let addr = addr % (REGISTERS_PER_VOICE * SID3_VOICES as u32);
        let voice = &mut self.voices[(addr / REGISTERS_PER_VOICE) as usize];
        let reg = addr % REGISTERS_PER_VOICE;
        let source = |v: u8| v as usize % SID3_VOICES;
        match reg {
            0 => voice.write_flags(value),
            1 => voice.envelope.attack = value,
            2 => voice.envelope.decay = value,
            3 => voice.envelope.sustain = value,
            4 => voice.envelope.sustain_rate = value,
            5 => voice.envelope.release = value,
            6 => voice.wave = Sid3Wave::from_bits_truncate(value),
            7 => voice.pw = (voice.pw & 0x00ff) | ((value as u16) << 8),
            8 => voice.pw = (voice.pw & 0xff00) | value as u16,
            9 => voice.special_wave = value,
            10 => voice.freq = (voice.freq & 0x00_ffff) | ((value as u32) << 16),
            11 => voice.freq = (voice.freq & 0xff_00ff) | ((value as u32) << 8),
            12 => voice.freq = (voice.freq & 0xff_ff00) | value as u32,
            13 => voice.volume = value,
            14 => voice.mix_mode = MixMode::from_register(value),
            15 => voice.ring_source = source(value),
            16 => voice.sync_source = source(value),
            17 => voice.phase_source = source(value),
            18 => voice.pan[0] = value,
            19 => voice.pan[1] = value,
            20..=23 => voice.write_noise_taps(reg - 20, value),
            r if (FILTER_BASE..FILTER_BASE + REGISTERS_PER_FILTER * FILTERS as u32)
                .contains(&r) =>
            {
                let r = r - FILTER_BASE;
                voice.filters[(r / REGISTERS_PER_FILTER) as usize]
                    .write(r % REGISTERS_PER_FILTER, value);
            }
            _ => log::trace!("SID3: write to unused register {addr:#05x}"),
        }
    }

    fn tick(&mut self, cycles: u32) {
        for _ in 0..cycles {
            self.step();
        }
        self.sums = [[0; 2]; SID3_VOICES];
    }

    fn render(&mut self, frames: &mut [StereoFrame]) {
        for frame in frames.iter_mut() {
            let cycles = self.resampler.next_cycles();
            for _ in 0..cycles {
                self.step();
            }

            let mut bus = [0i32; 2];
            for (ch, sum) in self.sums.iter().enumerate() {
                let value = if cycles == 0 {
                    let v = &self.voices[ch];
                    [
                        v.out * v.pan[0] as i32 / 255,
                        v.out * v.pan[1] as i32 / 255,
                    ]
                } else {
                    sum.map(|s| (s / cycles as i64) as i32)
                };
                self.mixer.add_stereo(&mut bus, ch, value);
            }
            self.sums = [[0; 2]; SID3_VOICES];
            *frame = Mixer::finish(bus);
        }
    }

    output_plumbing!();

    fn track_info(&self, channel: usize) -> Option<TrackInfo> {
        let voice = self.voices.get(channel)?;
        Some(TrackInfo {
            key_on: voice.flags.contains(Sid3Flags::GATE),
            frequency: voice.freq,
            frequency_hz: accumulator_hz(self.clock(), 1, voice.freq, ACC_BITS),
            volume: voice.envelope.output() as u32,
            max_volume: 0xff,
            waveform: voice.wave.bits() as u32,
            position: Some(voice.acc),
            muted: self.mixer.is_muted(channel),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chip() -> Sid3 {
        Sid3::new(SID3_CLOCK, 44_100).unwrap()
    }

    fn reg(voice: u32, reg: u32) -> u32 {
        voice * REGISTERS_PER_VOICE + reg
    }

    fn play(sid: &mut Sid3, voice: u32, wave: Sid3Wave) {
        sid.write(reg(voice, 6), wave.bits());
        sid.write(reg(voice, 10), 0x01);
        sid.write(reg(voice, 13), 0xff);
        sid.write(reg(voice, 3), 0xff);
        sid.write(reg(voice, 0), Sid3Flags::GATE.bits());
    }

    #[test]
    fn test_reset_state() {
        let mut sid = chip();
        play(&mut sid, 0, Sid3Wave::SAWTOOTH);
        sid.tick(1000);
        sid.reset();
        assert_eq!(sid.accumulator(0), Some(0));
        assert_eq!(sid.envelope_state(0), Some(Sid3EnvelopeState::Release));
        assert_eq!(sid.lfsr(0), Some(LFSR_SEED));
        let mut frames = [[3i16; 2]; 64];
        sid.render(&mut frames);
        assert!(frames.iter().all(|f| *f == [0, 0]));
    }

    #[test]
    fn test_accumulator_closed_form() {
        let mut sid = chip();
        sid.write(reg(2, 10), 0x12);
        sid.write(reg(2, 11), 0x34);
        sid.write(reg(2, 12), 0x56);
        sid.tick(12_345);
        assert_eq!(
            sid.accumulator(2),
            Some(((12_345u64 * 0x12_3456) & ACC_MASK as u64) as u32)
        );
    }

    #[test]
    fn test_gate_is_edge_triggered() {
        let mut sid = chip();
        sid.write(reg(0, 3), 0x80);
        sid.write(reg(0, 0), Sid3Flags::GATE.bits());
        assert_eq!(sid.envelope_state(0), Some(Sid3EnvelopeState::Attack));
        sid.tick(256);
        assert_eq!(sid.envelope_level(0), Some(0xff));
        sid.tick(10_000);
        assert_eq!(sid.envelope_state(0), Some(Sid3EnvelopeState::Sustain));
        assert_eq!(sid.envelope_level(0), Some(0x80));

        sid.write(reg(0, 0), Sid3Flags::GATE.bits());
        assert_eq!(sid.envelope_state(0), Some(Sid3EnvelopeState::Sustain));

        sid.write(reg(0, 0), 0);
        assert_eq!(sid.envelope_state(0), Some(Sid3EnvelopeState::Release));
        sid.tick(10_000);
        assert_eq!(sid.envelope_level(0), Some(0));
    }

    #[test]
    fn test_sustain_rate_decays() {
        let mut sid = chip();
        sid.write(reg(1, 3), 0x80);
        sid.write(reg(1, 0), Sid3Flags::GATE.bits());
        sid.tick(20_000);
        assert_eq!(sid.envelope_level(1), Some(0x80));

        sid.write(reg(1, 4), 0x10);
        sid.tick(20_000);
        assert!(sid.envelope_level(1).is_some_and(|l| l < 0x80));
    }

    #[test]
    fn test_env_reset_restarts_from_zero() {
        let mut sid = chip();
        sid.write(reg(0, 3), 0xff);
        sid.write(reg(0, 0), Sid3Flags::GATE.bits());
        sid.tick(1000);
        sid.write(reg(0, 0), 0);
        sid.write(reg(0, 0), (Sid3Flags::GATE | Sid3Flags::ENV_RESET).bits());
        assert_eq!(sid.envelope_level(0), Some(0));
    }

    #[test]
    fn test_noise_tap_change_reseeds() {
        let mut sid = chip();
        sid.write(reg(0, 10), 0xff);
        sid.tick(10_000);
        assert_ne!(sid.lfsr(0), Some(LFSR_SEED));
        sid.write(reg(0, 23), 0x03);
        assert_eq!(sid.lfsr(0), Some(LFSR_SEED));
        assert_eq!(sid.voices[0].noise_taps, (1 << 29) | 0x03);

        sid.tick(10_000);
        sid.write(reg(0, 0), Sid3Flags::NOISE_PHASE_RESET.bits());
        assert_eq!(sid.lfsr(0), Some(LFSR_SEED));
    }

    #[test]
    fn test_phase_reset_and_hard_sync() {
        let mut sid = chip();
        sid.write(reg(0, 11), 0x10);
        sid.tick(100);
        assert_ne!(sid.accumulator(0), Some(0));
        sid.write(reg(0, 0), Sid3Flags::PHASE_RESET.bits());
        assert_eq!(sid.accumulator(0), Some(0));

        // voice 1 wraps on its 65th cycle and resets voice 0
        sid.write(reg(1, 10), 0xff);
        sid.write(reg(1, 11), 0xff);
        sid.write(reg(1, 12), 0xff);
        sid.write(reg(0, 16), 1);
        sid.write(reg(0, 0), Sid3Flags::HARD_SYNC.bits());
        sid.tick(64);
        assert_eq!(sid.accumulator(0), Some(64 * 0x1000));
        sid.tick(1);
        assert_eq!(sid.accumulator(0), Some(0));
    }

    #[test]
    fn test_mix_modes() {
        let mut sid = chip();
        sid.write(reg(0, 6), (Sid3Wave::TRIANGLE | Sid3Wave::SAWTOOTH).bits());
        let tables = sid3_tables();
        let combined = wave_tables(SidModel::Mos8580);
        let voice = &mut sid.voices[0];
        // phase 0x4000: triangle 0x8000, saw 0x4000
        voice.mix_mode = MixMode::Or;
        assert_eq!(voice.waveform(0x4000, &tables, &combined), 0xc000);
        voice.mix_mode = MixMode::And;
        assert_eq!(voice.waveform(0x4000, &tables, &combined), 0);
        voice.mix_mode = MixMode::Xor;
        assert_eq!(voice.waveform(0x4000, &tables, &combined), 0xc000);
        voice.mix_mode = MixMode::Sum;
        assert_eq!(voice.waveform(0x4000, &tables, &combined), 0x6000);
        voice.mix_mode = MixMode::Combined;
        assert_eq!(voice.waveform(0, &tables, &combined), 0);

        voice.wave = Sid3Wave::empty();
        assert_eq!(voice.waveform(0x1234, &tables, &combined), 0x8000);
    }

    #[test]
    fn test_special_waves_are_shared() {
        let a = sid3_tables();
        let b = sid3_tables();
        assert!(Arc::ptr_eq(&a, &b));
        // wave 0 is a sine
        assert!((a.special(0, 0) as i32 - 0x8000).abs() < 2);
        assert!(a.special(0, 256) > 0xfff0);
        assert!(a.special(0, 768) < 0x10);
        assert_eq!(a.special(32, 256), a.special(0, 256));
        assert_eq!(a.env_step(0), ENV_MAX / 256);
    }

    #[test]
    fn test_pan_and_render() {
        let mut sid = chip();
        play(&mut sid, 3, Sid3Wave::PULSE);
        sid.write(reg(3, 7), 0x80);
        sid.write(reg(3, 18), 0);
        let mut frames = vec![[0i16; 2]; 2048];
        sid.render(&mut frames);
        assert!(frames.iter().all(|f| f[0] == 0));
        assert!(frames.iter().any(|f| f[1].unsigned_abs() > 4000));
        assert!(sid.track_info(3).is_some_and(|t| t.key_on && t.waveform == 4));
    }

    #[test]
    fn test_low_pass_passes_dc() {
        let mut filter = Filter::default();
        filter.write(0, FILTER_ENABLE | FILTER_LOW_PASS);
        filter.write(1, 0x40);
        for _ in 0..20_000 {
            filter.clock(1000);
        }
        assert!((filter.out - 1000).abs() <= 1, "out {}", filter.out);

        filter.write(4, 0x80);
        assert!(filter.clock(100_000) <= 0x8000);
    }
}
