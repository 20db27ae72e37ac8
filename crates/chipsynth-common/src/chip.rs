//! Capability interface shared by every chip emulator.
//!
//! Each chip is an independent implementer; hosts pick a concrete chip (or a
//! boxed `dyn SoundChip`) and drive it through register writes, clock ticks
//! and frame renders.

use crate::{ChipError, Result, SampleMemory, TrackInfo};
use serde::{Deserialize, Serialize};

/// One rendered output frame: left and right signed 16-bit samples.
pub type StereoFrame = [i16; 2];

/// Chip-specific behavioral toggles accepted by [`SoundChip::set_option`].
///
/// Chips reject options they do not understand with
/// [`ChipError::UnsupportedOption`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "option", content = "value", rename_all = "snake_case")]
pub enum ChipOption {
    /// Chip model or revision (e.g. SID 6581 = 0, 8580 = 1).
    Model(u8),
    /// Enable the analog filter stage.
    Filter(bool),
    /// Run unipolar output through a DC blocking filter.
    DcFilter(bool),
    /// Fold stereo output to mono.
    Mono(bool),
    /// Time-division multiplexed output instead of averaged output.
    Multiplex(bool),
    /// Enable extended (non-original) register set.
    Extended(bool),
}

/// Common interface for all chip emulators
///
/// Register writes, reads and clock ticks map directly onto the hardware;
/// muting, panning and track introspection are host-side conveniences with no
/// hardware equivalent.
///
/// # Example
///
/// ```ignore
/// use chipsynth_common::SoundChip;
///
/// fn key_on<C: SoundChip>(chip: &mut C) {
///     chip.write(0x00, 0x8f);
///     chip.tick(1000);
///     let mut frames = [[0i16; 2]; 64];
///     chip.render(&mut frames);
/// }
/// ```
pub trait SoundChip: Send {
    /// Short display name of the chip
    fn name(&self) -> &'static str;

    /// Number of independently mixable channels
    fn channel_count(&self) -> usize;

    /// Reset the chip to its power-on state
    ///
    /// Clock, sample rate and host-side mix settings survive a reset.
    fn reset(&mut self);

    /// Write one register
    ///
    /// # Arguments
    ///
    /// * `addr` - Register offset; masked into the chip's address space
    /// * `value` - Register value
    ///
    /// Unknown offsets are ignored.
    fn write(&mut self, addr: u32, value: u8);

    /// Read back a status register or memory location
    ///
    /// Takes `&mut self` because some hardware reads acknowledge interrupts
    /// or advance auto-increment pointers.
    ///
    /// # Returns
    ///
    /// `None` if the address is not readable on this chip
    fn read(&mut self, _addr: u32) -> Option<u8> {
        None
    }

    /// Advance internal state by a number of chip clock cycles
    fn tick(&mut self, cycles: u32);

    /// Render output frames at the configured sample rate
    ///
    /// Ticks the chip by the resampled cycle count between frames.
    fn render(&mut self, frames: &mut [StereoFrame]);

    /// Chip input clock in Hz
    fn clock(&self) -> u32;

    /// Output sample rate in Hz
    fn sample_rate(&self) -> u32;

    /// Change the output sample rate
    ///
    /// Must be called between renders.
    fn set_rate(&mut self, sample_rate: u32) -> Result<()>;

    /// Change the chip input clock
    fn set_clock(&mut self, clock: u32) -> Result<()>;

    /// Apply a chip-specific option
    ///
    /// The default implementation rejects every option.
    fn set_option(&mut self, option: ChipOption) -> Result<()> {
        Err(ChipError::UnsupportedOption {
            chip: self.name(),
            option,
        })
    }

    /// Attach host-supplied sample or wave memory
    ///
    /// Chips without external memory reject the call.
    fn set_memory(&mut self, _memory: Box<dyn SampleMemory>) -> Result<()> {
        Err(ChipError::ConfigError(format!(
            "{} has no external sample memory",
            self.name()
        )))
    }

    /// Mute channels; bit `n` set mutes channel `n`
    fn set_mask(&mut self, mask: u64);

    /// Set the host-side stereo gains for a channel (255 = unity)
    fn set_stereo_mix(&mut self, channel: usize, left: u8, right: u8);

    /// Snapshot of a voice for display purposes
    ///
    /// # Returns
    ///
    /// `None` if `channel` is out of range
    fn track_info(&self, channel: usize) -> Option<TrackInfo>;

    /// Render interleaved stereo `f32` samples in range [-1.0, 1.0]
    ///
    /// `buffer.len()` should be even; a trailing odd sample is left untouched.
    fn generate_samples_into(&mut self, buffer: &mut [f32]) {
        let mut frame = [[0i16; 2]; 1];
        for pair in buffer.chunks_exact_mut(2) {
            self.render(&mut frame);
            pair[0] = frame[0][0] as f32 / 32768.0;
            pair[1] = frame[0][1] as f32 / 32768.0;
        }
    }
}
