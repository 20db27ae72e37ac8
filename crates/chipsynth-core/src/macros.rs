//! Shared `SoundChip` plumbing for chips built on a resampler and a mixer.

/// Expand the timing and mixing methods of [`SoundChip`] for a chip that
/// stores a `resampler: ClockResampler` and a `mixer: Mixer`.
///
/// [`SoundChip`]: chipsynth_common::SoundChip
macro_rules! output_plumbing {
    () => {
        fn clock(&self) -> u32 {
            self.resampler.clock()
        }

        fn sample_rate(&self) -> u32 {
            self.resampler.rate()
        }

        fn set_rate(&mut self, sample_rate: u32) -> chipsynth_common::Result<()> {
            log::debug!("{}: sample rate {sample_rate} Hz", self.name());
            self.resampler.set_rate(sample_rate)
        }

        fn set_clock(&mut self, clock: u32) -> chipsynth_common::Result<()> {
            log::debug!("{}: clock {clock} Hz", self.name());
            self.resampler.set_clock(clock)
        }

        fn set_mask(&mut self, mask: u64) {
            self.mixer.set_mask(mask);
        }

        fn set_stereo_mix(&mut self, channel: usize, left: u8, right: u8) {
            self.mixer.set_stereo_mix(channel, left, right);
        }
    };
}
