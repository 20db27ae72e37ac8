//! Sound chip emulators for tracker and chiptune playback
//!
//! Sample-accurate software models of wavetable, PCM and analog-modeled
//! sound chips. Every chip implements [`SoundChip`]: the host writes
//! registers, advances the chip clock and pulls stereo 16-bit frames at its
//! own output rate.
//!
//! # Chips
//!
//! | Module | Chip | Voices |
//! |---|---|---|
//! | [`vrc6`] | Konami VRC6 | 2 pulse + sawtooth |
//! | [`k005289`] | Konami K005289 | 2 wavetable (PROM) |
//! | [`ga20`] | Irem GA20 | 4 PCM |
//! | [`n163`] | Namco 163 | up to 8 wavetable, time-multiplexed |
//! | [`x1_010`] | Seta X1-010 | 16 PCM/wavetable |
//! | [`sid`] | MOS 6581/8580 SID (+ SID2 extension) | 3 |
//! | [`sid3`] | SID3 | 7 |
//! | [`ymf278`] | Yamaha YMF278 PCM, YMW258 MultiPCM | 24 / 28 |
//! | [`es5503`] | Ensoniq ES5503 DOC | 32 oscillators |
//! | [`qsound`] | Capcom QSound | 16 PCM + 3 ADPCM |
//!
//! Hosts that pick a chip at runtime use [`ChipKind`] or a serde
//! [`ChipConfig`]; several chips at once live in a [`ChipBank`].
//!
//! # Quick start
//! ```
//! use chipsynth::{SoundChip, Vrc6, VRC6_CLOCK};
//!
//! let mut chip = Vrc6::new(VRC6_CLOCK, 44_100).unwrap();
//! chip.write(0x9000, 0x7f); // pulse 1: duty 8/16, volume 15
//! chip.write(0x9001, 0xfd); // period low
//! chip.write(0x9002, 0x80); // enable, period high
//!
//! let mut frames = vec![[0i16; 2]; 512];
//! chip.render(&mut frames);
//! assert!(frames.iter().any(|f| f[0] != 0));
//! ```

#![warn(missing_docs)]

#[macro_use]
mod macros;

pub mod bank;
pub mod config;
pub mod dc_filter;
pub mod es5503;
pub mod ga20;
pub mod k005289;
pub mod mixer;
pub mod n163;
pub mod qsound;
pub mod sid;
pub mod sid3;
pub mod vrc6;
pub mod x1_010;
pub mod ymf278;

pub use bank::ChipBank;
pub use config::{ChipConfig, ChipKind};
pub use es5503::{Es5503, OscMode, ES5503_CLOCK};
pub use ga20::{Ga20, GA20_CLOCK};
pub use k005289::{K005289, K005289_CLOCK};
pub use n163::{N163, N163_CLOCK};
pub use qsound::{QSound, QSOUND_CLOCK};
pub use sid::{Sid, SidModel, SID_CLOCK_NTSC, SID_CLOCK_PAL};
pub use sid3::{Sid3, SID3_CLOCK};
pub use vrc6::{Vrc6, VRC6_CLOCK};
pub use x1_010::{X1010, X1_010_CLOCK};
pub use ymf278::{Ymf278, Ymw258, YMF278_CLOCK, YMW258_CLOCK};

// Re-export the shared interface so hosts need a single dependency
pub use chipsynth_common::{
    ChipError, ChipOption, Result, SampleMemory, SampleRom, SoundChip, StereoFrame, TrackInfo,
    DEFAULT_SAMPLE_RATE,
};
