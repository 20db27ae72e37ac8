//! Common traits and types for the chipsynth sound chip emulators.
//!
//! This crate provides the abstractions shared by every chip core in the
//! `chipsynth` crate, plus a handful of sample-data utilities used by hosts.
//!
//! # Traits
//!
//! - [`SoundChip`] - Capability interface implemented by every chip emulator
//! - [`SampleMemory`] - Byte-addressed sample/wave memory supplied by the host
//!
//! # Utilities
//!
//! - [`bits`] - Bit-field helpers over plain integers
//! - [`base64`] - Base64 encode/decode for embedded sample data
//! - [`it_sample`] - Impulse Tracker compressed sample decoding
//! - [`TableCache`] - Lazily built, shared immutable lookup tables
//! - [`ClockResampler`] - Chip-clock to sample-rate stepping
//!
//! # Example
//!
//! ```ignore
//! use chipsynth_common::{SoundChip, StereoFrame};
//!
//! fn render_block(chip: &mut dyn SoundChip) -> Vec<StereoFrame> {
//!     let mut frames = vec![[0i16; 2]; 1024];
//!     chip.render(&mut frames);
//!     frames
//! }
//! ```

#![warn(missing_docs)]

pub mod base64;
pub mod bits;
mod chip;
pub mod it_sample;
mod memory;
mod resample;
mod table_cache;
mod track;

pub use chip::{ChipOption, SoundChip, StereoFrame};
pub use memory::{SampleMemory, SampleRom};
pub use resample::ClockResampler;
pub use table_cache::TableCache;
pub use track::{accumulator_hz, period_hz, TrackInfo};

// ============================================================================
// Common Constants
// ============================================================================

/// Standard audio sample rate (44.1 kHz CD quality).
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Error types for chip emulator configuration and sample decoding.
///
/// Render and tick paths never fail; errors only surface while configuring a
/// chip or decoding host-supplied data.
#[derive(thiserror::Error, Debug)]
pub enum ChipError {
    /// IO error from filesystem or device
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration (clock, rate, chip model)
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Option not understood by the target chip
    #[error("{chip} does not support option {option:?}")]
    UnsupportedOption {
        /// Chip name
        chip: &'static str,
        /// Rejected option
        option: ChipOption,
    },

    /// Malformed encoded data
    #[error("Decode error: {0}")]
    Decode(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for ChipError {
    /// Converts a String into `ChipError::Other`.
    ///
    /// Prefer the specific variants where the failure kind is known.
    fn from(msg: String) -> Self {
        ChipError::Other(msg)
    }
}

impl From<&str> for ChipError {
    fn from(msg: &str) -> Self {
        ChipError::Other(msg.to_string())
    }
}

/// Result type for chip configuration and decoding operations
pub type Result<T> = std::result::Result<T, ChipError>;

/// Validate a clock or sample rate supplied by the host.
///
/// Both must be non-zero; a zero rate would stall the resampler.
pub fn validate_rate(what: &str, hz: u32) -> Result<u32> {
    if hz == 0 {
        Err(ChipError::ConfigError(format!("{what} must be non-zero")))
    } else {
        Ok(hz)
    }
}
