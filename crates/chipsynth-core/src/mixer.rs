//! Per-channel mute and stereo gain stage
//!
//! Chips hand each voice's contribution to the mixer, which applies the
//! host-side mute mask and stereo gains, accumulates in `i32` and saturates to
//! 16 bits only when the frame is finished.

use chipsynth_common::bits::clamp16;
use chipsynth_common::StereoFrame;

/// Gain value meaning "pass through unchanged".
pub const UNITY_GAIN: u8 = 255;

/// Mix state for one channel
#[derive(Clone, Debug)]
pub struct ChannelMix {
    /// User mute flag
    pub muted: bool,
    /// Left gain (0-255)
    pub left: u8,
    /// Right gain (0-255)
    pub right: u8,
    /// Last contribution before gains, for oscilloscopes
    pub last_output: i32,
}

impl Default for ChannelMix {
    fn default() -> Self {
        Self {
            muted: false,
            left: UNITY_GAIN,
            right: UNITY_GAIN,
            last_output: 0,
        }
    }
}

/// Stereo accumulator for one frame.
pub type MixBus = [i32; 2];

/// Host-side channel mixer
///
/// Sized once at chip construction; mixing never allocates.
#[derive(Clone, Debug, Default)]
pub struct Mixer {
    channels: Vec<ChannelMix>,
}

impl Mixer {
    /// Create a mixer for `channels` channels at unity gain
    pub fn new(channels: usize) -> Self {
        Self {
            channels: vec![ChannelMix::default(); channels],
        }
    }

    /// Number of channels
    #[inline]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether the mixer has no channels
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Apply a mute mask (bit set = muted)
    pub fn set_mask(&mut self, mask: u64) {
        for (i, ch) in self.channels.iter_mut().enumerate() {
            ch.muted = i < 64 && (mask >> i) & 1 != 0;
        }
    }

    /// Set stereo gains for one channel; out-of-range channels are ignored
    pub fn set_stereo_mix(&mut self, channel: usize, left: u8, right: u8) {
        if let Some(ch) = self.channels.get_mut(channel) {
            ch.left = left;
            ch.right = right;
        }
    }

    /// Check if a channel is muted
    #[inline]
    pub fn is_muted(&self, channel: usize) -> bool {
        self.channels.get(channel).is_some_and(|ch| ch.muted)
    }

    /// Last raw contribution of a channel
    #[inline]
    pub fn last_output(&self, channel: usize) -> i32 {
        self.channels.get(channel).map_or(0, |ch| ch.last_output)
    }

    /// Add a mono voice to both sides of the bus
    #[inline]
    pub fn add_mono(&mut self, bus: &mut MixBus, channel: usize, value: i32) {
        self.add_stereo(bus, channel, [value, value]);
    }

    /// Add a voice that already carries its own stereo placement
    #[inline]
    pub fn add_stereo(&mut self, bus: &mut MixBus, channel: usize, value: [i32; 2]) {
        let Some(ch) = self.channels.get_mut(channel) else {
            return;
        };
        if ch.muted {
            ch.last_output = 0;
            return;
        }
        ch.last_output = (value[0] + value[1]) / 2;
        bus[0] += scale(value[0], ch.left);
        bus[1] += scale(value[1], ch.right);
    }

    /// Apply mute and gain to a voice the chip mixes internally (for example
    /// ahead of an analog filter). The gain is the mean of both sides.
    #[inline]
    pub fn scale_mono(&mut self, channel: usize, value: i32) -> i32 {
        let Some(ch) = self.channels.get_mut(channel) else {
            return 0;
        };
        if ch.muted {
            ch.last_output = 0;
            return 0;
        }
        ch.last_output = value;
        scale(value, ((ch.left as u16 + ch.right as u16) / 2) as u8)
    }

    /// Saturate the bus to an output frame
    #[inline]
    pub fn finish(bus: MixBus) -> StereoFrame {
        [clamp16(bus[0]), clamp16(bus[1])]
    }
}

#[inline]
fn scale(value: i32, gain: u8) -> i32 {
    if gain == UNITY_GAIN {
        value
    } else {
        value * gain as i32 / UNITY_GAIN as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_voices_sum_to_zero() {
        let mut mixer = Mixer::new(8);
        let mut bus = MixBus::default();
        for ch in 0..8 {
            mixer.add_mono(&mut bus, ch, 0);
        }
        assert_eq!(Mixer::finish(bus), [0, 0]);
    }

    #[test]
    fn test_zero_pan_side_is_silent() {
        let mut mixer = Mixer::new(2);
        mixer.set_stereo_mix(0, 0, UNITY_GAIN);
        let mut bus = MixBus::default();
        mixer.add_mono(&mut bus, 0, 20_000);
        assert_eq!(Mixer::finish(bus), [0, 20_000]);

        mixer.set_stereo_mix(0, 128, UNITY_GAIN);
        let mut bus = MixBus::default();
        mixer.add_mono(&mut bus, 0, 255);
        assert_eq!(bus, [128, 255]);
    }

    #[test]
    fn test_mask_mutes_channels() {
        let mut mixer = Mixer::new(3);
        mixer.set_mask(0b010);
        assert!(!mixer.is_muted(0));
        assert!(mixer.is_muted(1));

        let mut bus = MixBus::default();
        mixer.add_mono(&mut bus, 0, 100);
        mixer.add_mono(&mut bus, 1, 1000);
        mixer.add_mono(&mut bus, 2, 10);
        assert_eq!(bus, [110, 110]);
        assert_eq!(mixer.last_output(1), 0);
        assert_eq!(mixer.last_output(2), 10);
    }

    #[test]
    fn test_scale_mono_averages_gains() {
        let mut mixer = Mixer::new(2);
        mixer.set_stereo_mix(0, 0, UNITY_GAIN);
        assert_eq!(mixer.scale_mono(0, 255), 127);
        assert_eq!(mixer.scale_mono(1, 255), 255);
        mixer.set_mask(0b10);
        assert_eq!(mixer.scale_mono(1, 255), 0);
        assert_eq!(mixer.last_output(0), 255);
    }

    #[test]
    fn test_finish_saturates() {
        assert_eq!(Mixer::finish([100_000, -100_000]), [i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_out_of_range_channel_ignored() {
        let mut mixer = Mixer::new(1);
        mixer.set_stereo_mix(5, 0, 0);
        let mut bus = MixBus::default();
        mixer.add_mono(&mut bus, 5, 1000);
        assert_eq!(bus, [0, 0]);
        assert!(!mixer.is_muted(5));
    }
}
