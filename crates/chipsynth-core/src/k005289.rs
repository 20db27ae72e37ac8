//! Konami K005289 (Bubble System wavetable timer)
//!
//! The chip itself only counts: two 12-bit up counters that step a 5-bit
//! wave address each time they overflow. The board latches wave and volume
//! selections and feeds the address into a pair of 4-bit wave PROMs.
//!
//! Board register map:
//!
//! | Offset | Register |
//! |---|---|
//! | 0, 2 | voice A / B pitch low byte |
//! | 1, 3 | voice A / B pitch high nibble (latched) |
//! | 4, 5 | voice A / B wave (bits 5-7) and volume (bits 0-3) |
//! | 6, 7 | voice A / B trigger: latched pitch becomes active |

use chipsynth_common::{
    period_hz, ClockResampler, Result, SampleMemory, SoundChip, StereoFrame, TrackInfo,
};

use crate::mixer::{MixBus, Mixer};

/// NTSC color burst clock used by the Bubble System
pub const K005289_CLOCK: u32 = 3_579_545;

/// Size of the two wave PROMs together
pub const PROM_SIZE: usize = 0x200;

const OUTPUT_SHIFT: u32 = 6;

#[derive(Clone, Debug, Default)]
struct Timer {
    pitch: u16,
    freq: u16,
    counter: u16,
    addr: u8,
}

impl Timer {
    #[inline]
    fn tick(&mut self) {
        self.counter = (self.counter + 1) & 0xfff;
        if self.counter == 0 {
            self.addr = (self.addr + 1) & 0x1f;
            self.counter = self.freq;
        }
    }

    fn load(&mut self, pitch: u16) {
        self.pitch = pitch & 0xfff;
    }

    fn update(&mut self) {
        self.freq = self.pitch;
    }
}

/// K005289 with its Bubble System wave/volume latches
pub struct K005289 {
    timers: [Timer; 2],
    wave_vol: [u8; 2],
    prom: Option<Box<dyn SampleMemory>>,
    outputs: [i32; 2],
    resampler: ClockResampler,
    mixer: Mixer,
}

impl K005289 {
    /// Create a K005289 at the given clock and output rate
    pub fn new(clock: u32, sample_rate: u32) -> Result<Self> {
        Ok(Self {
            timers: Default::default(),
            wave_vol: [0; 2],
            prom: None,
            outputs: [0; 2],
            resampler: ClockResampler::new(clock, sample_rate)?,
            mixer: Mixer::new(2),
        })
    }

    /// Current 5-bit wave address of a voice
    pub fn addr(&self, voice: usize) -> u8 {
        self.timers.get(voice).map_or(0, |t| t.addr)
    }

    fn prom_sample(&self, voice: usize) -> i32 {
        let Some(prom) = self.prom.as_deref() else {
            return 0;
        };
        let wave = (self.wave_vol[voice] >> 5) as u32;
        let index = voice as u32 * 0x100 + wave * 0x20 + self.timers[voice].addr as u32;
        (prom.read_byte(index) & 0xf) as i32 - 8
    }

    #[inline]
    fn step(&mut self) {
        for voice in 0..2 {
            self.timers[voice].tick();
            let volume = (self.wave_vol[voice] & 0xf) as i32;
            self.outputs[voice] = self.prom_sample(voice) * volume;
        }
    }
}

impl std::fmt::Debug for K005289 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("K005289")
            .field("timers", &self.timers)
            .field("wave_vol", &self.wave_vol)
            .field("prom", &self.prom.as_ref().map(|p| p.len()))
            .finish_non_exhaustive()
    }
}

impl SoundChip for K005289 {
    fn name(&self) -> &'static str {
        "K005289"
    }

    fn channel_count(&self) -> usize {
        2
    }

    fn reset(&mut self) {
        self.timers = Default::default();
        self.wave_vol = [0; 2];
        self.outputs = [0; 2];
        self.resampler.reset();
    }

    fn write(&mut self, addr: u32, value: u8) {
        match addr & 7 {
            reg @ (0 | 2) => {
                let timer = &mut self.timers[(reg >> 1) as usize];
                timer.load((timer.pitch & 0xf00) | value as u16);
            }
            reg @ (1 | 3) => {
                let timer = &mut self.timers[(reg >> 1) as usize];
                timer.load((timer.pitch & 0x0ff) | ((value as u16 & 0xf) << 8));
            }
            reg @ (4 | 5) => self.wave_vol[(reg - 4) as usize] = value,
            reg => self.timers[(reg - 6) as usize].update(),
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
            let mut sums = [0i32; 2];
            for _ in 0..cycles {
                self.step();
                sums[0] += self.outputs[0];
                sums[1] += self.outputs[1];
            }
            let voices = if cycles == 0 {
                self.outputs.map(|v| v << OUTPUT_SHIFT)
            } else {
                sums.map(|s| ((s as i64) << OUTPUT_SHIFT) as i32 / cycles as i32)
            };

            let mut bus = MixBus::default();
            for (ch, value) in voices.into_iter().enumerate() {
                self.mixer.add_mono(&mut bus, ch, value);
            }
            *frame = Mixer::finish(bus);
        }
    }

    output_plumbing!();

    fn set_memory(&mut self, memory: Box<dyn SampleMemory>) -> Result<()> {
        if memory.len() < PROM_SIZE {
            log::warn!(
                "K005289: wave PROM is {} bytes, expected {PROM_SIZE}",
                memory.len()
            );
        }
        self.prom = Some(memory);
        Ok(())
    }

    fn track_info(&self, channel: usize) -> Option<TrackInfo> {
        let timer = self.timers.get(channel)?;
        let volume = (self.wave_vol[channel] & 0xf) as u32;
        Some(TrackInfo {
            key_on: volume > 0,
            frequency: timer.freq as u32,
            frequency_hz: period_hz(self.clock(), 0x1000 - timer.freq as u32, 32),
            volume,
            max_volume: 15,
            waveform: (self.wave_vol[channel] >> 5) as u32,
            position: Some(timer.addr as u32),
            muted: self.mixer.is_muted(channel),
        })
    }
}
