//! Chip clock to output sample rate stepping.
//!
//! Chips run their state machines at clock rate while the host pulls frames
//! at the sample rate. The resampler hands out the whole number of clock
//! cycles that elapse before each frame and carries the remainder, so over
//! any span the cycle count is exact.

use crate::{validate_rate, Result};

/// Fractional clock divider between chip clock and host sample rate
#[derive(Clone, Debug)]
pub struct ClockResampler {
    clock: u32,
    rate: u32,
    phase: u64,
}

impl ClockResampler {
    /// Create a resampler; both rates must be non-zero
    pub fn new(clock: u32, rate: u32) -> Result<Self> {
        Ok(Self {
            clock: validate_rate("clock", clock)?,
            rate: validate_rate("sample rate", rate)?,
            phase: 0,
        })
    }

    /// Chip clock in Hz
    #[inline]
    pub fn clock(&self) -> u32 {
        self.clock
    }

    /// Output rate in Hz
    #[inline]
    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Change the chip clock and drop the fractional phase
    pub fn set_clock(&mut self, clock: u32) -> Result<()> {
        self.clock = validate_rate("clock", clock)?;
        self.phase = 0;
        Ok(())
    }

    /// Change the output rate
    pub fn set_rate(&mut self, rate: u32) -> Result<()> {
        self.rate = validate_rate("sample rate", rate)?;
        self.phase = 0;
        Ok(())
    }

    /// Clock cycles to run before producing the next frame
    #[inline]
    pub fn next_cycles(&mut self) -> u32 {
        self.phase += self.clock as u64;
        let cycles = self.phase / self.rate as u64;
        self.phase -= cycles * self.rate as u64;
        cycles as u32
    }

    /// Forget the fractional remainder
    pub fn reset(&mut self) {
        self.phase = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycles_sum_exactly() {
        let mut r = ClockResampler::new(1_789_773, 44_100).unwrap();
        let total: u64 = (0..44_100).map(|_| r.next_cycles() as u64).sum();
        assert_eq!(total, 1_789_773);
    }

    #[test]
    fn test_slower_clock_yields_zero_steps() {
        let mut r = ClockResampler::new(1, 4).unwrap();
        let steps: Vec<u32> = (0..8).map(|_| r.next_cycles()).collect();
        assert_eq!(steps, [0, 0, 0, 1, 0, 0, 0, 1]);
    }

    #[test]
    fn test_zero_rates_rejected() {
        assert!(ClockResampler::new(0, 44_100).is_err());
        assert!(ClockResampler::new(1_000_000, 0).is_err());
        let mut r = ClockResampler::new(1_000_000, 44_100).unwrap();
        assert!(r.set_rate(0).is_err());
        assert_eq!(r.rate(), 44_100);
    }
}
