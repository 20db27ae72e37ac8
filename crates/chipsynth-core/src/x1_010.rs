//! Seta X1-010 16-voice PCM/wavetable chip
//!
//! Every voice plays either signed 8-bit PCM from host ROM or a 128-byte
//! wavetable from internal RAM shaped by a 128-step envelope, also in RAM.
//! The chip computes one output sample every 512 clocks.
//!
//! Memory map (13-bit, bit 12 selects wave RAM):
//!
//! | Range | Contents |
//! |---|---|
//! | `0x0000..=0x007f` | voice registers, 8 per voice |
//! | `0x0080..=0x0fff` | envelope shapes (32 x 128, nibble per side) |
//! | `0x1000..=0x1fff` | wavetables (32 x 128 signed bytes) |
//!
//! Voice registers: 0 flags, 1 volume (PCM) or wave select, 2/3 frequency,
//! 4 start page or envelope rate, 5 end page (`0xff ^ page`) or envelope
//! select.

use bitflags::bitflags;
use chipsynth_common::bits::Bits;
use chipsynth_common::{
    accumulator_hz, ChipError, ChipOption, ClockResampler, Result, SampleMemory, SoundChip,
    StereoFrame, TrackInfo,
};

use crate::mixer::{MixBus, Mixer};

/// Usual X1-010 clock on Seta boards
pub const X1_010_CLOCK: u32 = 16_000_000;

const CYCLES_PER_SAMPLE: u32 = 512;
const RAM_SIZE: usize = 0x1000;

bitflags! {
    /// Voice control register (offset 0)
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct VoiceFlags: u8 {
        /// Voice sounding
        const KEY_ON = 0x01;
        /// Wavetable mode instead of PCM
        const WAVETABLE = 0x02;
        /// Envelope runs once and keys the voice off
        const ENV_ONESHOT = 0x04;
        /// Halve the frequency
        const DIV = 0x80;
    }
}

#[derive(Clone, Debug, Default)]
struct Voice {
    flags: VoiceFlags,
    vol_wave: u8,
    freq: u16,
    start_envfreq: u8,
    end_envshape: u8,
    acc: u32,
    env_acc: u32,
    data: i32,
    vol_out: [i32; 2],
}

impl Voice {
    #[inline]
    fn div(&self) -> u32 {
        self.flags.contains(VoiceFlags::DIV) as u32
    }

    fn read(&self, reg: u32) -> u8 {
        match reg {
            0 => self.flags.bits(),
            1 => self.vol_wave,
            2 => self.freq as u8,
            3 => (self.freq >> 8) as u8,
            4 => self.start_envfreq,
            5 => self.end_envshape,
            _ => 0,
        }
    }

    fn write(&mut self, reg: u32, data: u8) {
        match reg {
            0 => {
                let was_on = self.flags.contains(VoiceFlags::KEY_ON);
                self.flags = VoiceFlags::from_bits_truncate(data);
                if !was_on && self.flags.contains(VoiceFlags::KEY_ON) {
                    self.acc = if self.flags.contains(VoiceFlags::WAVETABLE) {
                        0
                    } else {
                        (self.start_envfreq as u32) << 16
                    };
                    self.env_acc = 0;
                }
            }
            1 => self.vol_wave = data,
            2 => self.freq = (self.freq & 0xff00) | data as u16,
            3 => self.freq = (self.freq & 0x00ff) | ((data as u16) << 8),
            4 => self.start_envfreq = data,
            5 => self.end_envshape = data,
            _ => log::trace!("X1-010: write to unused voice register {reg}"),
        }
    }
}

/// X1-010 emulator
pub struct X1010 {
    voices: [Voice; 16],
    envelope: Box<[u8; RAM_SIZE]>,
    wave: Box<[u8; RAM_SIZE]>,
    rom: Option<Box<dyn SampleMemory>>,
    mono: bool,
    divider: u32,
    sums: [[i32; 2]; 16],
    steps: u32,
    resampler: ClockResampler,
    mixer: Mixer,
}

impl X1010 {
    /// Create an X1-010 at the given clock and output rate
    pub fn new(clock: u32, sample_rate: u32) -> Result<Self> {
        Ok(Self {
            voices: Default::default(),
            envelope: Box::new([0; RAM_SIZE]),
            wave: Box::new([0; RAM_SIZE]),
            rom: None,
            mono: false,
            divider: 0,
            sums: [[0; 2]; 16],
            steps: 0,
            resampler: ClockResampler::new(clock, sample_rate)?,
            mixer: Mixer::new(16),
        })
    }

    /// Flags of a voice
    pub fn voice_flags(&self, voice: usize) -> VoiceFlags {
        self.voices.get(voice).map_or(VoiceFlags::empty(), |v| v.flags)
    }

    /// Side output of a voice (sample times side volume)
    pub fn voice_out(&self, voice: usize, side: usize) -> i32 {
        self.voices
            .get(voice)
            .map_or(0, |v| v.data * v.vol_out[side & 1])
    }

    fn tick_voice(&mut self, index: usize) {
        let voice = &mut self.voices[index];
        voice.data = 0;
        voice.vol_out = [0; 2];
        if !voice.flags.contains(VoiceFlags::KEY_ON) {
            return;
        }

        if voice.flags.contains(VoiceFlags::WAVETABLE) {
            let env_index = ((voice.end_envshape as usize & 0x1f) << 7)
                | ((voice.env_acc >> 10) & 0x7f) as usize;
            let vol = self.envelope[env_index];
            voice.vol_out = [(vol >> 4) as i32, (vol & 0xf) as i32];

            voice.env_acc += voice.start_envfreq as u32;
            if voice.flags.contains(VoiceFlags::ENV_ONESHOT) && voice.env_acc.bit(17) {
                voice.flags.remove(VoiceFlags::KEY_ON);
            } else {
                voice.env_acc &= 0x1_ffff;
            }

            let wave_index =
                ((voice.vol_wave as usize & 0x1f) << 7) | ((voice.acc >> 10) & 0x7f) as usize;
            voice.data = self.wave[wave_index] as i8 as i32;
            voice.acc = (voice.acc + (voice.freq as u32 >> voice.div())) & 0x1_ffff;
        } else {
            voice.vol_out = [(voice.vol_wave >> 4) as i32, (voice.vol_wave & 0xf) as i32];
            let addr = (voice.acc >> 4) & 0xf_ffff;
            voice.data = self.rom.as_deref().map_or(0, |rom| rom.read_byte(addr)) as i8 as i32;
            voice.acc += (voice.freq as u32 & 0xff) >> voice.div();
            if (voice.acc >> 16) > (0xff ^ voice.end_envshape as u32) {
                voice.flags.remove(VoiceFlags::KEY_ON);
            }
        }
    }

    fn step(&mut self) {
        for i in 0..self.voices.len() {
            self.tick_voice(i);
            let v = &self.voices[i];
            self.sums[i][0] += v.data * v.vol_out[0];
            self.sums[i][1] += v.data * v.vol_out[1];
        }
        self.steps += 1;
    }

    fn ram_read(&self, offset: u32) -> u8 {
        let offset = offset & 0x1fff;
        if offset & 0x1000 != 0 {
            self.wave[(offset & 0xfff) as usize]
        } else if offset & 0xf80 != 0 {
            self.envelope[(offset & 0xfff) as usize]
        } else {
            self.voices[((offset >> 3) & 0xf) as usize].read(offset & 7)
        }
    }
}

impl std::fmt::Debug for X1010 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("X1010")
            .field("voices", &self.voices)
            .field("rom", &self.rom.as_ref().map(|r| r.len()))
            .field("mono", &self.mono)
            .finish_non_exhaustive()
    }
}

impl SoundChip for X1010 {
    fn name(&self) -> &'static str {
        "X1-010"
    }

    fn channel_count(&self) -> usize {
        16
    }

    fn reset(&mut self) {
        self.voices = Default::default();
        self.envelope.fill(0);
        self.wave.fill(0);
        self.divider = 0;
        self.sums = [[0; 2]; 16];
        self.steps = 0;
        self.resampler.reset();
    }

    fn write(&mut self, addr: u32, value: u8) {
        let offset = addr & 0x1fff;
        if offset & 0x1000 != 0 {
            self.wave[(offset & 0xfff) as usize] = value;
        } else if offset & 0xf80 != 0 {
            self.envelope[(offset & 0xfff) as usize] = value;
        } else {
            self.voices[((offset >> 3) & 0xf) as usize].write(offset & 7, value);
        }
    }

    fn read(&mut self, addr: u32) -> Option<u8> {
        Some(self.ram_read(addr))
    }

    fn tick(&mut self, cycles: u32) {
        self.divider += cycles;
        while self.divider >= CYCLES_PER_SAMPLE {
            self.divider -= CYCLES_PER_SAMPLE;
            self.step();
        }
    }

    fn render(&mut self, frames: &mut [StereoFrame]) {
        for frame in frames.iter_mut() {
            let cycles = self.resampler.next_cycles();
            self.tick(cycles);

            let mut bus = MixBus::default();
            for ch in 0..self.voices.len() {
                let [l, r] = if self.steps == 0 {
                    [self.voice_out(ch, 0), self.voice_out(ch, 1)]
                } else {
                    self.sums[ch].map(|s| s / self.steps as i32)
                };
                let value = if self.mono {
                    let m = (l + r) >> 1;
                    [m, m]
                } else {
                    [l, r]
                };
                self.mixer.add_stereo(&mut bus, ch, value);
            }
            self.sums = [[0; 2]; 16];
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
        log::debug!("X1-010: attached {} bytes of sample ROM", memory.len());
        self.rom = Some(memory);
        Ok(())
    }

    fn track_info(&self, channel: usize) -> Option<TrackInfo> {
        let voice = self.voices.get(channel)?;
        let wavetable = voice.flags.contains(VoiceFlags::WAVETABLE);
        let divider = CYCLES_PER_SAMPLE << voice.div();
        // wavetable: 6.10 step through 128 bytes; PCM: 4.4 step in bytes
        let frequency_hz = if wavetable {
            accumulator_hz(self.clock(), divider, voice.freq as u32, 17)
        } else {
            accumulator_hz(self.clock(), divider, voice.freq as u32 & 0xff, 4)
        };
        let (volume, waveform) = if wavetable {
            (voice.vol_out[0].max(voice.vol_out[1]) as u32, (voice.vol_wave & 0x1f) as u32)
        } else {
            (
                (voice.vol_wave >> 4).max(voice.vol_wave & 0xf) as u32,
                voice.start_envfreq as u32,
            )
        };
        Some(TrackInfo {
            key_on: voice.flags.contains(VoiceFlags::KEY_ON),
            frequency: voice.freq as u32,
            frequency_hz,
            volume,
            max_volume: 15,
            waveform,
            position: Some(if wavetable { voice.acc >> 10 } else { voice.acc >> 4 }),
            muted: self.mixer.is_muted(channel),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chipsynth_common::SampleRom;

    fn chip() -> X1010 {
        X1010::new(X1_010_CLOCK, 44_100).unwrap()
    }

    #[test]
    fn test_reset_state() {
        let mut x1 = chip();
        x1.write(0x1005, 0x40);
        x1.write(0x0000, 0x03);
        x1.reset();
        assert_eq!(x1.read(0x1005), Some(0));
        assert_eq!(x1.voice_flags(0), VoiceFlags::empty());
    }

    #[test]
    fn test_memory_map_reads_back() {
        let mut x1 = chip();
        x1.write(0x1234, 0x12);
        x1.write(0x0345, 0x34);
        x1.write(0x0008 + 2, 0x56);
        x1.write(0x0008 + 3, 0x78);
        assert_eq!(x1.read(0x1234), Some(0x12));
        assert_eq!(x1.read(0x0345), Some(0x34));
        assert_eq!(x1.voices[1].freq, 0x7856);
        assert_eq!(x1.read(0x000b), Some(0x78));
        x1.write(0x0008, 0x87);
        assert_eq!(x1.read(0x0008), Some(0x87));
    }

    #[test]
    fn test_key_on_is_edge_triggered() {
        let mut x1 = chip();
        x1.write(0x04, 0x20);
        x1.write(0x00, 0x01);
        assert_eq!(x1.voices[0].acc, 0x20 << 16);
        x1.voices[0].acc += 0x1234;
        // rewriting with key-on still set keeps the position
        x1.write(0x00, 0x01);
        assert_eq!(x1.voices[0].acc, (0x20 << 16) + 0x1234);
    }

    #[test]
    fn test_pcm_stops_at_end_page() {
        let mut x1 = chip();
        let mut rom = vec![0x40u8; 0x3000];
        rom[0x1000] = 0x20;
        x1.set_memory(Box::new(SampleRom::new(rom))).unwrap();

        x1.write(0x01, 0xf0); // left volume 15
        x1.write(0x02, 0x10); // one byte per sample
        x1.write(0x04, 0x01);
        x1.write(0x05, 0xff ^ 0x01);
        x1.write(0x00, 0x01);

        x1.tick(CYCLES_PER_SAMPLE);
        assert_eq!(x1.voice_out(0, 0), 0x20 * 15);
        assert_eq!(x1.voice_out(0, 1), 0);

        x1.tick(CYCLES_PER_SAMPLE * 4094);
        assert!(x1.voice_flags(0).contains(VoiceFlags::KEY_ON));
        x1.tick(CYCLES_PER_SAMPLE);
        assert!(!x1.voice_flags(0).contains(VoiceFlags::KEY_ON));
        let acc = x1.voices[0].acc;
        x1.tick(CYCLES_PER_SAMPLE * 10);
        assert_eq!(x1.voices[0].acc, acc);
    }

    #[test]
    fn test_wavetable_accumulator_closed_form() {
        let mut x1 = chip();
        x1.write(0x02, 0x89);
        x1.write(0x03, 0x01);
        x1.write(0x00, 0x03);
        let steps = 777u32;
        x1.tick(CYCLES_PER_SAMPLE * steps);
        assert_eq!(x1.voices[0].acc, (steps * 0x189) & 0x1_ffff);

        // divider halves the step
        let mut x1 = chip();
        x1.write(0x02, 0x89);
        x1.write(0x03, 0x01);
        x1.write(0x00, 0x83);
        x1.tick(CYCLES_PER_SAMPLE * steps);
        assert_eq!(x1.voices[0].acc, (steps * (0x189 >> 1)) & 0x1_ffff);
    }

    #[test]
    fn test_oneshot_envelope_keys_off() {
        let mut x1 = chip();
        x1.write(0x04, 0xff);
        x1.write(0x00, 0x07);
        x1.tick(CYCLES_PER_SAMPLE * 514);
        assert!(x1.voice_flags(0).contains(VoiceFlags::KEY_ON));
        x1.tick(CYCLES_PER_SAMPLE);
        assert!(!x1.voice_flags(0).contains(VoiceFlags::KEY_ON));
    }

    #[test]
    fn test_wavetable_envelope_volume() {
        let mut x1 = chip();
        x1.write(0x1000 + 3 * 128, 0x7f); // wave 3, first byte
        x1.write(0x0100, 0x9c); // envelope 2, first step: left 9, right 12
        x1.write(0x01, 3);
        x1.write(0x05, 2);
        x1.write(0x00, 0x03);
        x1.tick(CYCLES_PER_SAMPLE);
        assert_eq!(x1.voice_out(0, 0), 0x7f * 9);
        assert_eq!(x1.voice_out(0, 1), 0x7f * 12);
    }
}
