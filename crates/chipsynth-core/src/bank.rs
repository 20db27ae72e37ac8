//! Multi-chip bank
//!
//! Manages several chip instances behind one object so a host can address
//! them by index, e.g. the two SIDs of a stereo SID tune or the four X1-010s
//! of a multi-board setup.
//!
//! # Examples
//!
//! ```
//! use chipsynth::{ChipBank, ChipKind};
//!
//! // Two VRC6 chips (6 channels total)
//! let mut bank = ChipBank::new(ChipKind::Vrc6, 2, 1_789_773, 44_100).unwrap();
//!
//! // Pulse 1 on both chips, different pitches
//! bank.write(0, 0x9000, 0x7f).unwrap();
//! bank.write(0, 0x9001, 0x80).unwrap();
//! bank.write(0, 0x9002, 0x80).unwrap();
//! bank.write(1, 0x9000, 0x7f).unwrap();
//! bank.write(1, 0x9001, 0x40).unwrap();
//! bank.write(1, 0x9002, 0x81).unwrap();
//!
//! let mut frames = vec![[0i16; 2]; 882];
//! bank.render(&mut frames);
//! ```

use chipsynth_common::{ChipError, Result, SoundChip, StereoFrame};

use crate::config::{ChipConfig, ChipKind};

/// A bank of chip instances mixed to one output.
///
/// # Channel Mapping
///
/// Channels are numbered sequentially across chips:
/// - chip 0: channels `0..c0`
/// - chip 1: channels `c0..c0 + c1`
/// - etc.
pub struct ChipBank {
    chips: Vec<Box<dyn SoundChip>>,
    /// Scratch buffers reused between renders
    scratch: Vec<StereoFrame>,
    sums: Vec<[i32; 2]>,
    mixed: Vec<StereoFrame>,
}

impl std::fmt::Debug for ChipBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.chips.iter().map(|chip| chip.name()).collect();
        f.debug_struct("ChipBank").field("chips", &names).finish()
    }
}

impl ChipBank {
    /// Creates a bank of `count` chips of one kind, all at the same clock.
    ///
    /// # Errors
    ///
    /// Fails if `count` is 0 or the clock/rate are rejected.
    pub fn new(kind: ChipKind, count: usize, clock: u32, sample_rate: u32) -> Result<Self> {
        if count == 0 {
            return Err(ChipError::ConfigError(
                "chip bank must have at least one chip".into(),
            ));
        }
        let chips = (0..count)
            .map(|_| kind.build(clock, sample_rate))
            .collect::<Result<Vec<_>>>()?;
        Self::from_chips(chips)
    }

    /// Creates a bank from a list of configurations.
    ///
    /// Chips may differ in kind and clock but must share a sample rate.
    ///
    /// # Examples
    ///
    /// ```
    /// use chipsynth::{ChipBank, ChipConfig, ChipKind};
    ///
    /// let bank = ChipBank::from_configs(&[
    ///     ChipConfig::new(ChipKind::Sid),
    ///     ChipConfig::new(ChipKind::Sid).with_clock(1_022_727),
    /// ])
    /// .unwrap();
    /// assert_eq!(bank.chip_count(), 2);
    /// assert_eq!(bank.channel_count(), 6);
    /// ```
    pub fn from_configs(configs: &[ChipConfig]) -> Result<Self> {
        let chips = configs
            .iter()
            .map(ChipConfig::build)
            .collect::<Result<Vec<_>>>()?;
        Self::from_chips(chips)
    }

    /// Creates a bank from already constructed chips.
    pub fn from_chips(chips: Vec<Box<dyn SoundChip>>) -> Result<Self> {
        let Some(first) = chips.first() else {
            return Err(ChipError::ConfigError(
                "chip bank must have at least one chip".into(),
            ));
        };
        let rate = first.sample_rate();
        if let Some(odd) = chips.iter().find(|chip| chip.sample_rate() != rate) {
            return Err(ChipError::ConfigError(format!(
                "{} runs at {} Hz, bank runs at {rate} Hz",
                odd.name(),
                odd.sample_rate()
            )));
        }
        log::debug!("chip bank with {} chips at {rate} Hz", chips.len());
        Ok(Self {
            chips,
            scratch: Vec::new(),
            sums: Vec::new(),
            mixed: Vec::new(),
        })
    }

    /// Returns the number of chips in this bank.
    #[inline]
    pub fn chip_count(&self) -> usize {
        self.chips.len()
    }

    /// Returns the total number of channels across all chips.
    pub fn channel_count(&self) -> usize {
        self.chips.iter().map(|chip| chip.channel_count()).sum()
    }

    /// Output sample rate shared by every chip.
    pub fn sample_rate(&self) -> u32 {
        self.chips.first().map_or(0, |chip| chip.sample_rate())
    }

    /// Gets a reference to a specific chip.
    #[inline]
    pub fn chip(&self, id: usize) -> Option<&dyn SoundChip> {
        self.chips.get(id).map(|chip| &**chip)
    }

    /// Gets a mutable reference to a specific chip.
    #[inline]
    pub fn chip_mut(&mut self, id: usize) -> Option<&mut (dyn SoundChip + 'static)> {
        self.chips.get_mut(id).map(|chip| &mut **chip)
    }

    fn chip_or_err(&mut self, id: usize) -> Result<&mut Box<dyn SoundChip>> {
        let count = self.chips.len();
        self.chips
            .get_mut(id)
            .ok_or_else(|| ChipError::ConfigError(format!("no chip {id} in a bank of {count}")))
    }

    /// Writes a register on a specific chip.
    pub fn write(&mut self, id: usize, addr: u32, value: u8) -> Result<()> {
        self.chip_or_err(id)?.write(addr, value);
        Ok(())
    }

    /// Reads a register from a specific chip.
    ///
    /// `Ok(None)` if the chip exists but the address is not readable.
    pub fn read(&mut self, id: usize, addr: u32) -> Result<Option<u8>> {
        Ok(self.chip_or_err(id)?.read(addr))
    }

    /// Maps a bank-wide channel number to `(chip id, local channel)`.
    pub fn locate_channel(&self, channel: usize) -> Option<(usize, usize)> {
        let mut base = 0;
        for (id, chip) in self.chips.iter().enumerate() {
            let count = chip.channel_count();
            if channel < base + count {
                return Some((id, channel - base));
            }
            base += count;
        }
        None
    }

    /// Mutes bank-wide channels; bit `n` set mutes channel `n`.
    ///
    /// Channels beyond bit 63 are left unmuted.
    pub fn set_mask(&mut self, mask: u64) {
        let mut base = 0usize;
        for chip in &mut self.chips {
            let local = if base >= 64 { 0 } else { mask >> base };
            chip.set_mask(local);
            base += chip.channel_count();
        }
    }

    /// Sets the stereo gains of a bank-wide channel.
    pub fn set_stereo_mix(&mut self, channel: usize, left: u8, right: u8) {
        if let Some((id, local)) = self.locate_channel(channel) {
            self.chips[id].set_stereo_mix(local, left, right);
        }
    }

    /// Changes the output sample rate of every chip.
    pub fn set_rate(&mut self, sample_rate: u32) -> Result<()> {
        for chip in &mut self.chips {
            chip.set_rate(sample_rate)?;
        }
        Ok(())
    }

    /// Advances every chip by the same number of its own clock cycles.
    pub fn tick(&mut self, cycles: u32) {
        for chip in &mut self.chips {
            chip.tick(cycles);
        }
    }

    /// Renders all chips mixed together.
    ///
    /// The mix is the average of the chip outputs, so a bank never clips
    /// harder than its loudest chip.
    pub fn render(&mut self, frames: &mut [StereoFrame]) {
        if self.scratch.len() < frames.len() {
            self.scratch.resize(frames.len(), [0; 2]);
            self.sums.resize(frames.len(), [0; 2]);
        }
        let scratch = &mut self.scratch[..frames.len()];
        let sums = &mut self.sums[..frames.len()];
        sums.fill([0; 2]);
        let count = self.chips.len() as i32;

        for chip in &mut self.chips {
            chip.render(scratch);
            for (sum, frame) in sums.iter_mut().zip(scratch.iter()) {
                sum[0] += frame[0] as i32;
                sum[1] += frame[1] as i32;
            }
        }

        for (out, sum) in frames.iter_mut().zip(sums.iter()) {
            out[0] = (sum[0] / count) as i16;
            out[1] = (sum[1] / count) as i16;
        }
    }

    /// Renders each chip into its own buffer.
    ///
    /// Surplus buffers are left untouched; surplus chips are not rendered.
    pub fn render_separate(&mut self, buffers: &mut [&mut [StereoFrame]]) {
        for (chip, buffer) in self.chips.iter_mut().zip(buffers.iter_mut()) {
            chip.render(buffer);
        }
    }

    /// Renders interleaved stereo `f32` samples of the averaged mix.
    pub fn generate_samples_interleaved(&mut self, buffer: &mut [f32]) {
        // taken out for the render so `self` stays borrowable
        let mut mixed = std::mem::take(&mut self.mixed);
        mixed.resize(buffer.len() / 2, [0; 2]);
        self.render(&mut mixed);
        for (pair, frame) in buffer.chunks_exact_mut(2).zip(&mixed) {
            pair[0] = frame[0] as f32 / 32768.0;
            pair[1] = frame[1] as f32 / 32768.0;
        }
        self.mixed = mixed;
    }

    /// Resets all chips to their initial state.
    pub fn reset(&mut self) {
        for chip in &mut self.chips {
            chip.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vrc6::VRC6_CLOCK;

    fn pulse_bank() -> ChipBank {
        let mut bank = ChipBank::new(ChipKind::Vrc6, 2, VRC6_CLOCK, 44_100).unwrap();
        for id in 0..2 {
            bank.write(id, 0x9000, 0x7f).unwrap();
            bank.write(id, 0x9001, 0x80).unwrap();
            bank.write(id, 0x9002, 0x80).unwrap();
        }
        bank
    }

    #[test]
    fn test_bank_creation() {
        let bank = ChipBank::new(ChipKind::Vrc6, 2, VRC6_CLOCK, 44_100).unwrap();
        assert_eq!(bank.chip_count(), 2);
        assert_eq!(bank.channel_count(), 6);
        assert_eq!(bank.sample_rate(), 44_100);
        assert_eq!(bank.chip(1).map(|c| c.name()), Some("VRC6"));
        assert!(bank.chip(2).is_none());
    }

    #[test]
    fn test_empty_bank_rejected() {
        assert!(ChipBank::new(ChipKind::Vrc6, 0, VRC6_CLOCK, 44_100).is_err());
        assert!(ChipBank::from_configs(&[]).is_err());
    }

    #[test]
    fn test_mixed_rates_rejected() {
        let result = ChipBank::from_configs(&[
            ChipConfig::new(ChipKind::Ga20),
            ChipConfig::new(ChipKind::Ga20).with_sample_rate(48_000),
        ]);
        assert!(matches!(result, Err(ChipError::ConfigError(_))));
    }

    #[test]
    fn test_write_out_of_range() {
        let mut bank = pulse_bank();
        assert!(bank.write(2, 0x9000, 0).is_err());
        assert!(bank.read(5, 0).is_err());
    }

    #[test]
    fn test_locate_channel() {
        let bank = ChipBank::from_configs(&[
            ChipConfig::new(ChipKind::Vrc6),
            ChipConfig::new(ChipKind::Sid),
        ])
        .unwrap();
        assert_eq!(bank.locate_channel(0), Some((0, 0)));
        assert_eq!(bank.locate_channel(2), Some((0, 2)));
        assert_eq!(bank.locate_channel(3), Some((1, 0)));
        assert_eq!(bank.locate_channel(5), Some((1, 2)));
        assert_eq!(bank.locate_channel(6), None);
    }

    #[test]
    fn test_render_averages_chips() {
        let mut bank = pulse_bank();
        let mut mixed = vec![[0i16; 2]; 256];
        bank.render(&mut mixed);
        assert!(mixed.iter().any(|f| f[0] != 0));

        // identical chips: the average equals one chip on its own
        let mut single = ChipBank::new(ChipKind::Vrc6, 1, VRC6_CLOCK, 44_100).unwrap();
        single.write(0, 0x9000, 0x7f).unwrap();
        single.write(0, 0x9001, 0x80).unwrap();
        single.write(0, 0x9002, 0x80).unwrap();
        let mut alone = vec![[0i16; 2]; 256];
        single.render(&mut alone);
        assert_eq!(mixed, alone);
    }

    #[test]
    fn test_mask_spans_chips() {
        let mut bank = pulse_bank();
        // mute pulse 1 on both chips (channel 0 and channel 3)
        bank.set_mask(0b1001);
        let mut frames = vec![[0i16; 2]; 256];
        bank.render(&mut frames);
        assert!(frames.iter().all(|f| f[0] == 0 && f[1] == 0));
    }

    #[test]
    fn test_interleaved_matches_render() {
        let mut interleaved = pulse_bank();
        let mut reference = pulse_bank();

        for len in [512, 256, 512] {
            let mut buffer = vec![0.0f32; len];
            interleaved.generate_samples_interleaved(&mut buffer);
            let mut frames = vec![[0i16; 2]; len / 2];
            reference.render(&mut frames);
            for (pair, frame) in buffer.chunks_exact(2).zip(&frames) {
                approx::assert_abs_diff_eq!(pair[0], frame[0] as f32 / 32768.0);
                approx::assert_abs_diff_eq!(pair[1], frame[1] as f32 / 32768.0);
            }
        }
        // the scratch frames are kept between calls
        assert!(interleaved.mixed.capacity() >= 256);
    }

    #[test]
    fn test_render_separate() {
        let mut bank = pulse_bank();
        bank.write(1, 0x9002, 0x00).unwrap();
        let mut a = vec![[0i16; 2]; 128];
        let mut b = vec![[0i16; 2]; 128];
        let mut buffers = vec![&mut a[..], &mut b[..]];
        bank.render_separate(&mut buffers);
        assert!(a.iter().any(|f| f[0] != 0));
        assert!(b.iter().all(|f| f[0] == 0));
    }

    #[test]
    fn test_reset() {
        let mut bank = pulse_bank();
        bank.reset();
        let mut frames = vec![[0i16; 2]; 128];
        bank.render(&mut frames);
        assert!(frames.iter().all(|f| f[0] == 0));
    }
}
