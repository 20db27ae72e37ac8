//! Capcom DL-1425 QSound
//!
//! A DSP program driving 16 PCM voices and 3 ADPCM voices from sample ROM.
//! Voices are panned through separate dry and wet gain curves; the wet path
//! runs through a 95-tap FIR filter per side (two shorter filters in mode
//! 2), both paths go through short delay lines, and a shared echo line with
//! feedback is added to the left dry and right wet inputs.
//!
//! The host writes 16-bit DSP registers through a three-byte port: offset 0
//! latches the high byte, offset 1 the low byte, offset 2 stores the latched
//! word to the register number given as data. Reading returns the ready flag
//! (0x80 once the DSP finished initialising).
//!
//! DSP register map:
//!
//! | Register | Contents |
//! |---|---|
//! | `v * 8 + 0` | bank of voice `v + 1` (bit 15 selects sample ROM) |
//! | `v * 8 + 1..=6` | address, rate (4.12), phase, loop length, end, volume |
//! | `0x80..=0x92` | pan of voices 0-15 and ADPCM 0-2 (`0x110 + pan`) |
//! | `0x93` | echo feedback |
//! | `0xba..=0xc9` | echo send per PCM voice |
//! | `0xca + a * 4` | ADPCM start, end, bank, volume |
//! | `0xd6..=0xd8` | ADPCM start flag |
//! | `0xd9` | echo end position |
//! | `0xda..=0xe1` | filter table positions and delays, left/right |
//! | `0xe2` | delay update request |
//! | `0xe3` | next DSP state |
//! | `0xe4..=0xe7` | wet and dry output volumes |

mod dsp;
mod tables;

use chipsynth_common::{
    accumulator_hz, period_hz, ClockResampler, Result, SampleMemory, SoundChip, StereoFrame,
    TrackInfo,
};

use crate::mixer::Mixer;
use dsp::{Delay, Echo, Fir, ECHO_LENGTH, MAX_TAPS};
use tables::{pan_tables, ADPCM_STEP, DRY, PAN_ENTRIES, WET};

/// QSound clock on CPS-2 boards
pub const QSOUND_CLOCK: u32 = 60_000_000;

/// The DSP program spends 1248 machine cycles (two clocks each) per sample
const CYCLES_PER_SAMPLE: u32 = 2 * 1248;

const PCM_VOICES: usize = 16;
const ADPCM_VOICES: usize = 3;
const VOICES: usize = PCM_VOICES + ADPCM_VOICES;

/// DSP program entry points
mod state {
    pub const INIT1: u16 = 0x288;
    pub const INIT2: u16 = 0x61a;
    pub const REFRESH1: u16 = 0x039;
    pub const REFRESH2: u16 = 0x04f;
    pub const NORMAL1: u16 = 0x314;
    pub const NORMAL2: u16 = 0x6b2;
}

const READY: u8 = 0x80;
const CENTER_PAN: u16 = 0x120;
const ROM_BANK: u16 = 0x8000;

/// Echo end positions are relative to these DSP memory addresses
const ECHO_BASE_MODE1: i32 = 0x554;
const ECHO_BASE_MODE2: i32 = 0x53c;

#[derive(Clone, Copy, Debug, Default)]
struct PcmVoice {
    bank: u16,
    addr: u16,
    rate: u16,
    phase: u16,
    loop_len: u16,
    end_addr: u16,
    volume: u16,
    echo: u16,
}

#[derive(Clone, Copy, Debug, Default)]
struct AdpcmVoice {
    start_addr: u16,
    end_addr: u16,
    bank: u16,
    volume: u16,
    flag: u16,
    cur_vol: i16,
    step_size: i16,
    cur_addr: u16,
}

/// Capcom QSound emulator
pub struct QSound {
    voices: [PcmVoice; PCM_VOICES],
    adpcm: [AdpcmVoice; ADPCM_VOICES],
    voice_pan: [u16; VOICES],
    voice_output: [i16; VOICES],
    echo: Echo,
    filter: [Fir; 2],
    alt_filter: [Fir; 2],
    wet: [Delay; 2],
    dry: [Delay; 2],
    state: u16,
    next_state: u16,
    state_counter: u16,
    delay_update: u16,
    ready_flag: u8,
    data_latch: u16,
    out: [i16; 2],
    rom: Option<Box<dyn SampleMemory>>,
    divider: u32,
    sums: [i32; 2],
    steps: u32,
    resampler: ClockResampler,
    mixer: Mixer,
}

impl QSound {
    /// Create a QSound DSP; it reports ready a few samples after start
    pub fn new(clock: u32, sample_rate: u32) -> Result<Self> {
        Ok(Self {
            voices: Default::default(),
            adpcm: Default::default(),
            voice_pan: [0; VOICES],
            voice_output: [0; VOICES],
            echo: Echo::default(),
            filter: Default::default(),
            alt_filter: Default::default(),
            wet: Default::default(),
            dry: Default::default(),
            state: 0,
            next_state: 0,
            state_counter: 0,
            delay_update: 0,
            ready_flag: 0,
            data_latch: 0,
            out: [0; 2],
            rom: None,
            divider: 0,
            sums: [0; 2],
            steps: 0,
            resampler: ClockResampler::new(clock, sample_rate)?,
            mixer: Mixer::new(VOICES),
        })
    }

    /// Whether the DSP accepts register writes
    pub fn is_ready(&self) -> bool {
        self.ready_flag == READY
    }

    /// Input clocks per DSP sample
    pub fn cycles_per_sample(&self) -> u32 {
        CYCLES_PER_SAMPLE
    }

    fn register(&mut self, address: u8) -> Option<&mut u16> {
        let a = address as usize;
        Some(match address {
            0x00..=0x7f => {
                let v = a >> 3;
                match a & 7 {
                    // bank registers apply to the next voice
                    0 => &mut self.voices[(v + 1) % PCM_VOICES].bank,
                    1 => &mut self.voices[v].addr,
                    2 => &mut self.voices[v].rate,
                    3 => &mut self.voices[v].phase,
                    4 => &mut self.voices[v].loop_len,
                    5 => &mut self.voices[v].end_addr,
                    6 => &mut self.voices[v].volume,
                    _ => return None,
                }
            }
            0x80..=0x92 => &mut self.voice_pan[a - 0x80],
            0x93 => &mut self.echo.feedback,
            0xba..=0xc9 => &mut self.voices[a - 0xba].echo,
            0xca..=0xd5 => {
                let voice = &mut self.adpcm[(a - 0xca) >> 2];
                match (a - 0xca) & 3 {
                    0 => &mut voice.start_addr,
                    1 => &mut voice.end_addr,
                    2 => &mut voice.bank,
                    _ => &mut voice.volume,
                }
            }
            0xd6..=0xd8 => &mut self.adpcm[a - 0xd6].flag,
            0xd9 => &mut self.echo.end_pos,
            0xda => &mut self.filter[0].table_pos,
            0xdb => &mut self.alt_filter[0].table_pos,
            0xdc => &mut self.filter[1].table_pos,
            0xdd => &mut self.alt_filter[1].table_pos,
            0xde => &mut self.wet[0].delay,
            0xdf => &mut self.dry[0].delay,
            0xe0 => &mut self.wet[1].delay,
            0xe1 => &mut self.dry[1].delay,
            0xe2 => &mut self.delay_update,
            0xe3 => &mut self.next_state,
            0xe4 => &mut self.wet[0].volume,
            0xe5 => &mut self.dry[0].volume,
            0xe6 => &mut self.wet[1].volume,
            0xe7 => &mut self.dry[1].volume,
            _ => return None,
        })
    }

    /// Store a word to a DSP register; the DSP becomes busy until the next
    /// sample
    pub fn write_data(&mut self, address: u8, data: u16) {
        match self.register(address) {
            Some(reg) => *reg = data,
            None => log::trace!("QSound: write to unmapped register {address:#04x}"),
        }
        self.ready_flag = 0;
    }

    /// Read back a DSP register, 0 when unmapped
    pub fn read_data(&mut self, address: u8) -> u16 {
        self.register(address).map_or(0, |reg| *reg)
    }

    fn sample(&self, bank: u16, address: u16) -> i16 {
        // banks without bit 15 address the DSP program ROM
        if bank & ROM_BANK == 0 {
            return 0;
        }
        let Some(rom) = self.rom.as_deref() else {
            return 0;
        };
        let byte = rom.read_byte(((bank as u32 & 0x7fff) << 16) | address as u32) as u16;
        ((byte << 8) | byte) as i16
    }

    /// Run one DSP sample
    fn update(&mut self) {
        match self.state {
            state::REFRESH1 => self.refresh_filter_1(),
            state::REFRESH2 => self.refresh_filter_2(),
            state::NORMAL1 | state::NORMAL2 => self.normal_update(),
            _ => self.init(),
        }
    }

    fn init(&mut self) {
        // busy for two more samples before the filter refresh
        if self.state_counter >= 2 {
            self.state_counter = 0;
            self.state = self.next_state;
            return;
        } else if self.state_counter == 1 {
            self.state_counter += 1;
            return;
        }
        let mode2 = self.state == state::INIT2;

        self.voices = Default::default();
        self.adpcm = Default::default();
        self.filter = Default::default();
        self.alt_filter = Default::default();
        self.wet = Default::default();
        self.dry = Default::default();
        self.echo.clear();
        self.voice_pan = [CENTER_PAN; VOICES];
        self.voice_output = [0; VOICES];
        for voice in &mut self.voices {
            voice.bank = ROM_BANK;
        }
        for voice in &mut self.adpcm {
            voice.bank = ROM_BANK;
        }

        if mode2 {
            self.wet[0].delay = 1;
            self.filter[0].table_pos = 0xf73;
            self.filter[1].table_pos = 0xfa4;
            self.alt_filter[0].table_pos = 0xf73;
            self.alt_filter[1].table_pos = 0xfa4;
            self.echo.end_pos = (ECHO_BASE_MODE2 + 6) as u16;
            self.next_state = state::REFRESH2;
        } else {
            self.dry[0].delay = 46;
            self.dry[1].delay = 48;
            self.filter[0].table_pos = 0xdb2;
            self.filter[1].table_pos = 0xe11;
            self.echo.end_pos = (ECHO_BASE_MODE1 + 6) as u16;
            self.next_state = state::REFRESH1;
        }
        for d in self.wet.iter_mut().chain(self.dry.iter_mut()) {
            d.volume = 0x3fff;
        }

        self.delay_update = 1;
        self.ready_flag = 0;
        self.state_counter = 1;
        log::trace!("QSound: DSP init, mode {}", if mode2 { 2 } else { 1 });
    }

    fn refresh_filter_1(&mut self) {
        for fir in &mut self.filter {
            fir.refresh(MAX_TAPS);
        }
        self.state = state::NORMAL1;
        self.next_state = state::NORMAL1;
    }

    fn refresh_filter_2(&mut self) {
        for fir in &mut self.filter {
            fir.refresh(45);
        }
        for fir in &mut self.alt_filter {
            fir.refresh(44);
        }
        self.state = state::NORMAL2;
        self.next_state = state::NORMAL2;
    }

    fn pcm_update(&mut self, n: usize, echo_in: &mut i32) -> i16 {
        let v = self.voices[n];
        let mut output = 0i16;
        if !self.mixer.is_muted(n) {
            let sample = self.sample(v.bank, v.addr) as i32;
            output = ((v.volume as i16 as i32 * sample) >> 14) as i16;
            *echo_in = echo_in.wrapping_add((output as i32 * v.echo as i16 as i32) << 2);
        }

        let mut phase = (v.rate as i32)
            .wrapping_add(((v.addr as i16 as i32) << 12) | (v.phase as i32 >> 4));
        if (phase >> 12) >= v.end_addr as i16 as i32 {
            phase = phase.wrapping_sub((v.loop_len as i16 as i32) << 12);
        }
        let phase = phase.clamp(-0x800_0000, 0x7ff_ffff);
        let v = &mut self.voices[n];
        v.addr = (phase >> 12) as u16;
        v.phase = ((phase << 4) & 0xffff) as u16;
        output
    }

    fn adpcm_update(&mut self, n: usize, low_nibble: bool) {
        let out = PCM_VOICES + n;
        let v = self.adpcm[n];
        let mut cur_addr = v.cur_addr;
        let mut cur_vol = v.cur_vol;
        let mut step_size = v.step_size;

        let byte = if !low_nibble {
            // silence at the end address, restart on the flag
            if cur_addr == v.end_addr {
                cur_vol = 0;
            }
            if v.flag != 0 {
                self.voice_output[out] = 0;
                self.adpcm[n].flag = 0;
                step_size = 10;
                cur_vol = v.volume as i16;
                cur_addr = v.start_addr;
            }
            (self.sample(v.bank, cur_addr) >> 8) as i8
        } else {
            let byte = (self.sample(v.bank, cur_addr) >> 4) as i8;
            cur_addr = cur_addr.wrapping_add(1);
            byte
        };

        // signed nibble in the top half of the byte
        let step = (byte >> 4) as i32;
        let mut delta = ((1 + (step << 1).abs()) * step_size as i32) >> 1;
        if step <= 0 {
            delta = -delta;
        }
        let delta = (delta + self.voice_output[out] as i32).clamp(-32768, 32767);

        self.voice_output[out] = if self.mixer.is_muted(out) {
            0
        } else {
            ((delta * cur_vol as i32) >> 16) as i16
        };

        let next = (ADPCM_STEP[(8 + step) as usize] as i32 * step_size as i32) >> 6;
        let a = &mut self.adpcm[n];
        a.step_size = next.clamp(1, 2000) as i16;
        a.cur_vol = cur_vol;
        a.cur_addr = cur_addr;
    }

    fn normal_update(&mut self) {
        self.ready_flag = READY;

        let base = if self.state == state::NORMAL2 {
            ECHO_BASE_MODE2
        } else {
            ECHO_BASE_MODE1
        };
        self.echo.length = (self.echo.end_pos as i32 - base).clamp(0, ECHO_LENGTH as i32) as usize;

        let mut echo_in = 0i32;
        for v in 0..PCM_VOICES {
            self.voice_output[v] = self.pcm_update(v, &mut echo_in);
        }
        self.adpcm_update(
            (self.state_counter % 3) as usize,
            self.state_counter / 3 != 0,
        );
        let echo_out = self.echo.process(echo_in) as i32;

        let pans = pan_tables();
        let mut mixed = [0i32; VOICES];
        for (v, m) in mixed.iter_mut().enumerate() {
            *m = self.mixer.scale_mono(v, self.voice_output[v] as i32);
        }

        for ch in 0..2 {
            // echo returns on the left dry and right wet inputs
            let mut wet = if ch == 1 { echo_out << 16 } else { 0 };
            let mut dry = if ch == 0 { echo_out << 16 } else { 0 };
            for (v, &value) in mixed.iter().enumerate() {
                let pan = (self.voice_pan[v].wrapping_sub(0x110) as usize).min(PAN_ENTRIES - 1);
                dry = dry.wrapping_sub(value.wrapping_mul(pans[ch][DRY][pan] as i32) << 2);
                wet = wet.wrapping_sub(value.wrapping_mul(pans[ch][WET][pan] as i32) << 2);
            }

            let wet = self.filter[ch].process((wet >> 16) as i16);
            if self.state == state::NORMAL2 {
                dry = self.alt_filter[ch].process((dry >> 16) as i16);
            }

            let output = self.wet[ch]
                .process(wet)
                .wrapping_add(self.dry[ch].process(dry));
            // DSP rounding
            let output = (output.wrapping_add(0x2000)) >> 14;
            self.out[ch] = output.clamp(-0x7fff, 0x7fff) as i16;

            if self.delay_update != 0 {
                self.wet[ch].update();
                self.dry[ch].update();
            }
        }
        self.delay_update = 0;

        // the next state runs after six samples
        self.state_counter += 1;
        if self.state_counter > 5 {
            self.state_counter = 0;
            self.state = self.next_state;
        }
    }
}

impl std::fmt::Debug for QSound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QSound")
            .field("voices", &self.voices)
            .field("adpcm", &self.adpcm)
            .field("state", &self.state)
            .field("ready_flag", &self.ready_flag)
            .field("rom", &self.rom.as_ref().map(|r| r.len()))
            .finish_non_exhaustive()
    }
}

impl SoundChip for QSound {
    fn name(&self) -> &'static str {
        "QSound"
    }

    fn channel_count(&self) -> usize {
        VOICES
    }

    fn reset(&mut self) {
        self.ready_flag = 0;
        self.out = [0; 2];
        self.state = 0;
        self.state_counter = 0;
        self.divider = 0;
        self.sums = [0; 2];
        self.steps = 0;
        self.resampler.reset();
    }

    fn write(&mut self, addr: u32, value: u8) {
        match addr & 3 {
            0 => self.data_latch = (self.data_latch & 0x00ff) | ((value as u16) << 8),
            1 => self.data_latch = (self.data_latch & 0xff00) | value as u16,
            2 => self.write_data(value, self.data_latch),
            _ => log::trace!("QSound: write to unused port {addr:#x}"),
        }
    }

    fn read(&mut self, _addr: u32) -> Option<u8> {
        Some(self.ready_flag)
    }

    fn tick(&mut self, cycles: u32) {
        self.divider += cycles;
        while self.divider >= CYCLES_PER_SAMPLE {
            self.divider -= CYCLES_PER_SAMPLE;
            self.update();
            self.sums[0] += self.out[0] as i32;
            self.sums[1] += self.out[1] as i32;
            self.steps += 1;
        }
    }

    fn render(&mut self, frames: &mut [StereoFrame]) {
        for frame in frames.iter_mut() {
            let cycles = self.resampler.next_cycles();
            self.tick(cycles);
            let bus = if self.steps == 0 {
                self.out.map(i32::from)
            } else {
                self.sums.map(|s| s / self.steps as i32)
            };
            self.sums = [0; 2];
            self.steps = 0;
            *frame = Mixer::finish(bus);
        }
    }

    output_plumbing!();

    fn set_memory(&mut self, memory: Box<dyn SampleMemory>) -> Result<()> {
        log::debug!("QSound: attached {} bytes of sample ROM", memory.len());
        self.rom = Some(memory);
        Ok(())
    }

    fn track_info(&self, channel: usize) -> Option<TrackInfo> {
        if let Some(v) = self.voices.get(channel) {
            return Some(TrackInfo {
                key_on: v.volume != 0 && v.bank & ROM_BANK != 0,
                frequency: v.rate as u32,
                frequency_hz: accumulator_hz(self.clock(), CYCLES_PER_SAMPLE, v.rate as u32, 12),
                volume: v.volume as u32,
                max_volume: 0xffff,
                waveform: ((v.bank as u32 & 0x7fff) << 16) | v.addr as u32,
                position: Some(v.addr as u32),
                muted: self.mixer.is_muted(channel),
            });
        }
        let a = self.adpcm.get(channel - PCM_VOICES)?;
        Some(TrackInfo {
            key_on: a.cur_vol != 0,
            frequency: 0,
            // one nibble every third sample
            frequency_hz: period_hz(self.clock(), CYCLES_PER_SAMPLE, ADPCM_VOICES as u32),
            volume: a.volume as u32,
            max_volume: 0xffff,
            waveform: ((a.bank as u32 & 0x7fff) << 16) | a.start_addr as u32,
            position: Some(a.cur_addr as u32),
            muted: self.mixer.is_muted(channel),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chipsynth_common::SampleRom;

    fn ready_chip(rom: Vec<u8>) -> QSound {
        let mut chip = QSound::new(QSOUND_CLOCK, 48_000).unwrap();
        chip.set_memory(Box::new(SampleRom::new(rom))).unwrap();
        let mut n = 0;
        while !chip.is_ready() && n < 100 {
            chip.tick(CYCLES_PER_SAMPLE);
            n += 1;
        }
        chip
    }

    fn write_word(chip: &mut QSound, reg: u8, value: u16) {
        chip.write(0, (value >> 8) as u8);
        chip.write(1, value as u8);
        chip.write(2, reg);
    }

    #[test]
    fn test_init_sequence() {
        let mut chip = QSound::new(QSOUND_CLOCK, 48_000).unwrap();
        assert_eq!(chip.read(0), Some(0));
        // init, two busy samples, filter refresh, then running
        for _ in 0..4 {
            chip.tick(CYCLES_PER_SAMPLE);
            assert!(!chip.is_ready());
        }
        assert_eq!(chip.state, state::NORMAL1);
        chip.tick(CYCLES_PER_SAMPLE);
        assert_eq!(chip.read(0), Some(READY));
        assert_eq!(chip.filter[0].tap_count, 95);
        assert_eq!(chip.voice_pan, [CENTER_PAN; VOICES]);
        assert_eq!(chip.dry[0].delay, 46);
        assert_eq!(chip.echo.length, 6);
    }

    #[test]
    fn test_data_port() {
        let mut chip = ready_chip(Vec::new());
        write_word(&mut chip, 0x0a, 0x1234);
        assert!(!chip.is_ready());
        assert_eq!(chip.read_data(0x0a), 0x1234);
        assert_eq!(chip.voices[1].rate, 0x1234);
        // bank register of voice 0 targets voice 1
        write_word(&mut chip, 0x00, 0x8001);
        assert_eq!(chip.voices[1].bank, 0x8001);
        write_word(&mut chip, 0x78, 0x8002);
        assert_eq!(chip.voices[0].bank, 0x8002);
        assert_eq!(chip.read_data(0x07), 0);
        chip.tick(CYCLES_PER_SAMPLE);
        assert!(chip.is_ready());
    }

    #[test]
    fn test_pcm_phase_and_loop() {
        let mut chip = ready_chip(Vec::new());
        write_word(&mut chip, 0x01, 0x0000);
        write_word(&mut chip, 0x02, 0x1000);
        write_word(&mut chip, 0x03, 0x0000);
        write_word(&mut chip, 0x04, 0x0004);
        write_word(&mut chip, 0x05, 0x0008);
        chip.tick(7 * CYCLES_PER_SAMPLE);
        assert_eq!(chip.voices[0].addr, 7);
        // reaching the end jumps back by the loop length
        chip.tick(CYCLES_PER_SAMPLE);
        assert_eq!(chip.voices[0].addr, 4);
        chip.tick(4 * CYCLES_PER_SAMPLE);
        assert_eq!(chip.voices[0].addr, 4);
    }

    #[test]
    fn test_voice_reaches_output() {
        let mut rom = vec![0u8; 0x10000];
        rom.fill(0x40);
        let mut chip = ready_chip(rom);
        write_word(&mut chip, 0x05, 0x7fff);
        write_word(&mut chip, 0x06, 0x2000);
        // hard left on the linear curve
        write_word(&mut chip, 0x80, 0x140);
        let mut frames = [[0i16; 2]; 256];
        chip.render(&mut frames);
        let [l, r] = frames[255];
        assert!(l.abs() > 1000);
        assert!(r.abs() < l.abs() / 8);

        chip.set_mask(1);
        chip.render(&mut frames);
        assert_eq!(frames[255], [0, 0]);
    }

    #[test]
    fn test_adpcm_start_and_end() {
        let mut rom = vec![0u8; 0x10000];
        rom[0x100..0x120].fill(0x77);
        let mut chip = ready_chip(rom);
        write_word(&mut chip, 0xca, 0x0100);
        write_word(&mut chip, 0xcb, 0x0104);
        write_word(&mut chip, 0xcd, 0x7fff);
        write_word(&mut chip, 0xd6, 1);

        // one update cycle covers every voice's high and low nibble
        chip.tick(6 * CYCLES_PER_SAMPLE);
        let a = chip.adpcm[0];
        assert_eq!(a.flag, 0);
        assert_eq!(a.cur_vol, 0x7fff);
        assert!((0x100..=0x101).contains(&a.cur_addr));
        assert!(chip.track_info(16).is_some_and(|t| t.key_on));

        // one byte per six samples; silenced once the end address is seen
        chip.tick(60 * CYCLES_PER_SAMPLE);
        let a = chip.adpcm[0];
        assert_eq!(a.cur_vol, 0);
        assert!(a.cur_addr > 0x104);
        assert!((1..=2000).contains(&a.step_size));
        assert!(chip.track_info(VOICES).is_none());
    }

    #[test]
    fn test_reset_reinitialises() {
        let mut chip = ready_chip(Vec::new());
        write_word(&mut chip, 0x06, 0x1000);
        chip.reset();
        assert_eq!(chip.read(0), Some(0));
        for _ in 0..5 {
            chip.tick(CYCLES_PER_SAMPLE);
        }
        assert!(chip.is_ready());
        assert_eq!(chip.voices[0].volume, 0);
    }
}
