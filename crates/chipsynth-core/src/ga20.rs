//! Irem GA20 four-voice PCM player
//!
//! Each voice plays unsigned 8-bit samples from host memory between a start
//! and end address given in 16-byte units. A zero sample byte also ends
//! playback. The chip produces one sample every four input clocks.
//!
//! Voice registers (`voice * 8 + reg`, address masked to `0x1f`):
//!
//! | Reg | Function |
//! |---|---|
//! | 0, 1 | start address bits 4-11 / 12-19 |
//! | 2, 3 | end address bits 4-11 / 12-19 |
//! | 4 | rate (higher is faster) |
//! | 5 | volume |
//! | 6 | control, bit 1 starts playback |
//! | 7 | status (read): 1 while playing |

use chipsynth_common::{
    accumulator_hz, ClockResampler, Result, SampleMemory, SoundChip, StereoFrame, TrackInfo,
};

use crate::mixer::{MixBus, Mixer};

/// Default GA20 clock
pub const GA20_CLOCK: u32 = 3_579_545;

const CLOCK_DIVIDER: u32 = 4;
const ADDRESS_MASK: u32 = 0xfffff;

#[derive(Clone, Debug, Default)]
struct Voice {
    rate: u32,
    pos: u32,
    counter: u32,
    start: u32,
    end: u32,
    volume: u32,
    play: bool,
}

/// Irem GA20 emulator
pub struct Ga20 {
    voices: [Voice; 4],
    rom: Option<Box<dyn SampleMemory>>,
    divider: u32,
    outputs: [i32; 4],
    sums: [i32; 4],
    steps: u32,
    resampler: ClockResampler,
    mixer: Mixer,
}

impl Ga20 {
    /// Create a GA20 at the given clock and output rate
    pub fn new(clock: u32, sample_rate: u32) -> Result<Self> {
        Ok(Self {
            voices: Default::default(),
            rom: None,
            divider: 0,
            outputs: [0; 4],
            sums: [0; 4],
            steps: 0,
            resampler: ClockResampler::new(clock, sample_rate)?,
            mixer: Mixer::new(4),
        })
    }

    /// Whether a voice is currently playing
    pub fn is_playing(&self, voice: usize) -> bool {
        self.voices.get(voice).is_some_and(|v| v.play)
    }

    fn sample(&self, addr: u32) -> u8 {
        self.rom
            .as_deref()
            .map_or(0, |rom| rom.read_byte(addr & ADDRESS_MASK))
    }

    /// Produce one output sample for every voice
    fn step(&mut self) {
        for i in 0..self.voices.len() {
            self.outputs[i] = 0;
            if !self.voices[i].play {
                continue;
            }
            let sample = self.sample(self.voices[i].pos);
            let voice = &mut self.voices[i];
            if sample == 0 {
                voice.play = false;
                continue;
            }
            self.outputs[i] = (sample as i32 - 0x80) * voice.volume as i32;

            voice.counter = voice.counter.wrapping_sub(1);
            if voice.counter <= voice.rate {
                voice.pos = (voice.pos + 1) & ADDRESS_MASK;
                voice.counter = 0x100;
            }
            if voice.pos >= voice.end {
                voice.play = false;
            }
        }
        for (sum, out) in self.sums.iter_mut().zip(self.outputs) {
            *sum += out;
        }
        self.steps += 1;
    }
}

impl std::fmt::Debug for Ga20 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ga20")
            .field("voices", &self.voices)
            .field("rom", &self.rom.as_ref().map(|r| r.len()))
            .finish_non_exhaustive()
    }
}

impl SoundChip for Ga20 {
    fn name(&self) -> &'static str {
        "GA20"
    }

    fn channel_count(&self) -> usize {
        4
    }

    fn reset(&mut self) {
        self.voices = Default::default();
        self.divider = 0;
        self.outputs = [0; 4];
        self.sums = [0; 4];
        self.steps = 0;
        self.resampler.reset();
    }

    fn write(&mut self, addr: u32, value: u8) {
        let addr = addr & 0x1f;
        let voice = &mut self.voices[(addr >> 3) as usize];
        let data = value as u32;
        match addr & 7 {
            0 => voice.start = (voice.start & 0xff000) | (data << 4),
            1 => voice.start = (voice.start & 0x00ff0) | (data << 12),
            2 => voice.end = (voice.end & 0xff000) | (data << 4),
            3 => voice.end = (voice.end & 0x00ff0) | (data << 12),
            4 => voice.rate = data,
            5 => voice.volume = data,
            6 => {
                voice.play = data & 2 != 0;
                if voice.play {
                    voice.pos = voice.start;
                    voice.counter = voice.rate;
                }
            }
            _ => log::trace!("GA20: write to status register {addr:#04x}"),
        }
    }

    fn read(&mut self, addr: u32) -> Option<u8> {
        let addr = addr & 0x1f;
        (addr & 7 == 7).then(|| self.voices[(addr >> 3) as usize].play as u8)
    }

    fn tick(&mut self, cycles: u32) {
        self.divider += cycles;
        while self.divider >= CLOCK_DIVIDER {
            self.divider -= CLOCK_DIVIDER;
            self.step();
        }
    }

    fn render(&mut self, frames: &mut [StereoFrame]) {
        for frame in frames.iter_mut() {
            let cycles = self.resampler.next_cycles();
            self.tick(cycles);

            let voices = if self.steps == 0 {
                self.outputs
            } else {
                self.sums.map(|s| s / self.steps as i32)
            };
            self.sums = [0; 4];
            self.steps = 0;

            let mut bus = MixBus::default();
            for (ch, value) in voices.into_iter().enumerate() {
                self.mixer.add_mono(&mut bus, ch, value >> 2);
            }
            *frame = Mixer::finish(bus);
        }
    }

    output_plumbing!();

    fn set_memory(&mut self, memory: Box<dyn SampleMemory>) -> Result<()> {
        log::debug!("GA20: attached {} bytes of sample ROM", memory.len());
        self.rom = Some(memory);
        Ok(())
    }

    fn track_info(&self, channel: usize) -> Option<TrackInfo> {
        let voice = self.voices.get(channel)?;
        // one address step every (0x100 - rate) samples
        let step = 0x100u32.saturating_sub(voice.rate);
        Some(TrackInfo {
            key_on: voice.play,
            frequency: voice.rate,
            frequency_hz: accumulator_hz(self.clock(), CLOCK_DIVIDER * step.max(1), 1, 0),
            volume: voice.volume,
            max_volume: 0xff,
            waveform: voice.start,
            position: Some(voice.pos),
            muted: self.mixer.is_muted(channel),
        })
    }
}
