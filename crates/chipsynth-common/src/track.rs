//! Voice snapshots for tracker displays.
//!
//! A [`TrackInfo`] is a read-only copy of the state a pattern editor or
//! oscilloscope wants to show for one channel. Producing it never mutates the
//! chip.

/// State of a single chip voice
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrackInfo {
    /// Whether the voice is currently sounding (keyed on / playing).
    pub key_on: bool,
    /// Raw frequency or pitch register value.
    pub frequency: u32,
    /// Approximate output frequency in Hz (None if not meaningful).
    pub frequency_hz: Option<f32>,
    /// Raw volume or envelope level.
    pub volume: u32,
    /// Largest possible `volume` value for this chip.
    pub max_volume: u32,
    /// Waveform, wave number or sample start identifying the source.
    pub waveform: u32,
    /// Current playback position for sample voices.
    pub position: Option<u32>,
    /// Whether the host muted this channel.
    pub muted: bool,
}

impl TrackInfo {
    /// Normalized volume (0.0-1.0) for visualization.
    pub fn volume_normalized(&self) -> f32 {
        if self.max_volume == 0 {
            0.0
        } else {
            (self.volume as f32 / self.max_volume as f32).clamp(0.0, 1.0)
        }
    }
}

/// Frequency in Hz produced by a phase accumulator.
///
/// `step` is added `clock / divider` times per second to an accumulator whose
/// full cycle is `1 << bits`.
#[inline]
pub fn accumulator_hz(clock: u32, divider: u32, step: u32, bits: u32) -> Option<f32> {
    if step == 0 || divider == 0 {
        None
    } else {
        let rate = clock as f64 / divider as f64;
        Some((rate * step as f64 / (1u64 << bits) as f64) as f32)
    }
}

/// Frequency in Hz of a down counter that emits `steps` per waveform cycle.
#[inline]
pub fn period_hz(clock: u32, period: u32, steps: u32) -> Option<f32> {
    if period == 0 || steps == 0 {
        None
    } else {
        Some((clock as f64 / (period as f64 * steps as f64)) as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_volume_normalized() {
        let info = TrackInfo {
            volume: 8,
            max_volume: 16,
            ..Default::default()
        };
        assert_relative_eq!(info.volume_normalized(), 0.5);
        assert_relative_eq!(TrackInfo::default().volume_normalized(), 0.0);
    }

    #[test]
    fn test_accumulator_hz() {
        // 1 MHz clock, 16-bit accumulator, step 0x100 -> 1e6 / 256
        let hz = accumulator_hz(1_000_000, 1, 0x100, 16).unwrap();
        assert_relative_eq!(hz, 3906.25, epsilon = 0.01);
        assert!(accumulator_hz(1_000_000, 1, 0, 16).is_none());
    }

    #[test]
    fn test_period_hz() {
        let hz = period_hz(1_789_773, 0x1fc, 16).unwrap();
        assert_relative_eq!(hz, 1_789_773.0 / (0x1fc as f32 * 16.0), epsilon = 0.01);
        assert!(period_hz(1_000, 0, 16).is_none());
    }
}
