//! Host-side chip selection and serde configuration.
//!
//! [`ChipKind`] names every emulated chip and builds a boxed [`SoundChip`];
//! [`ChipConfig`] bundles a kind with its timing and options so hosts can keep
//! chip setups in JSON files.
//!
//! ```
//! use chipsynth::{ChipConfig, ChipKind};
//!
//! let config = ChipConfig::from_json(r#"{"kind":"vrc6","sample_rate":48000}"#).unwrap();
//! assert_eq!(config.kind, ChipKind::Vrc6);
//! let chip = config.build().unwrap();
//! assert_eq!(chip.sample_rate(), 48_000);
//! ```

use chipsynth_common::{
    validate_rate, ChipError, ChipOption, Result, SoundChip, DEFAULT_SAMPLE_RATE,
};
use serde::{Deserialize, Serialize};

use crate::es5503::{Es5503, ES5503_CLOCK};
use crate::ga20::{Ga20, GA20_CLOCK};
use crate::k005289::{K005289, K005289_CLOCK};
use crate::n163::{N163, N163_CLOCK};
use crate::qsound::{QSound, QSOUND_CLOCK};
use crate::sid::{Sid, SID_CLOCK_PAL};
use crate::sid3::{Sid3, SID3_CLOCK};
use crate::vrc6::{Vrc6, VRC6_CLOCK};
use crate::x1_010::{X1010, X1_010_CLOCK};
use crate::ymf278::{Ymf278, Ymw258, YMF278_CLOCK, YMW258_CLOCK};

/// Every chip this crate emulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChipKind {
    /// Konami VRC6
    Vrc6,
    /// Konami K005289
    K005289,
    /// Irem GA20
    Ga20,
    /// Namco 163
    N163,
    /// Seta X1-010
    #[serde(rename = "x1_010")]
    X1010,
    /// MOS 6581/8580 SID
    Sid,
    /// SID3 extended synthesizer
    Sid3,
    /// Yamaha YMF278 (OPL4) wave table part
    Ymf278,
    /// Yamaha YMW258 (MultiPCM)
    Ymw258,
    /// Ensoniq ES5503 DOC
    Es5503,
    /// Capcom QSound DSP
    #[serde(rename = "qsound")]
    QSound,
}

impl ChipKind {
    /// All chip kinds, in declaration order.
    pub const ALL: [ChipKind; 11] = [
        ChipKind::Vrc6,
        ChipKind::K005289,
        ChipKind::Ga20,
        ChipKind::N163,
        ChipKind::X1010,
        ChipKind::Sid,
        ChipKind::Sid3,
        ChipKind::Ymf278,
        ChipKind::Ymw258,
        ChipKind::Es5503,
        ChipKind::QSound,
    ];

    /// Typical input clock of the chip on its original board.
    pub fn default_clock(self) -> u32 {
        match self {
            ChipKind::Vrc6 => VRC6_CLOCK,
            ChipKind::K005289 => K005289_CLOCK,
            ChipKind::Ga20 => GA20_CLOCK,
            ChipKind::N163 => N163_CLOCK,
            ChipKind::X1010 => X1_010_CLOCK,
            ChipKind::Sid => SID_CLOCK_PAL,
            ChipKind::Sid3 => SID3_CLOCK,
            ChipKind::Ymf278 => YMF278_CLOCK,
            ChipKind::Ymw258 => YMW258_CLOCK,
            ChipKind::Es5503 => ES5503_CLOCK,
            ChipKind::QSound => QSOUND_CLOCK,
        }
    }

    /// Construct a chip of this kind.
    ///
    /// # Errors
    ///
    /// Returns [`ChipError::ConfigError`] for a zero clock or sample rate.
    pub fn build(self, clock: u32, sample_rate: u32) -> Result<Box<dyn SoundChip>> {
        log::debug!("building {self:?} at {clock} Hz -> {sample_rate} Hz");
        let chip: Box<dyn SoundChip> = match self {
            ChipKind::Vrc6 => Box::new(Vrc6::new(clock, sample_rate)?),
            ChipKind::K005289 => Box::new(K005289::new(clock, sample_rate)?),
            ChipKind::Ga20 => Box::new(Ga20::new(clock, sample_rate)?),
            ChipKind::N163 => Box::new(N163::new(clock, sample_rate)?),
            ChipKind::X1010 => Box::new(X1010::new(clock, sample_rate)?),
            ChipKind::Sid => Box::new(Sid::new(clock, sample_rate)?),
            ChipKind::Sid3 => Box::new(Sid3::new(clock, sample_rate)?),
            ChipKind::Ymf278 => Box::new(Ymf278::new(clock, sample_rate)?),
            ChipKind::Ymw258 => Box::new(Ymw258::new(clock, sample_rate)?),
            ChipKind::Es5503 => Box::new(Es5503::new(clock, sample_rate)?),
            ChipKind::QSound => Box::new(QSound::new(clock, sample_rate)?),
        };
        Ok(chip)
    }
}

/// Serializable chip setup: kind, timing and options.
///
/// Missing `clock` falls back to [`ChipKind::default_clock`]; missing
/// `sample_rate` to [`DEFAULT_SAMPLE_RATE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChipConfig {
    /// Chip to build
    pub kind: ChipKind,
    /// Input clock in Hz
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clock: Option<u32>,
    /// Output sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Options applied in order after construction
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<ChipOption>,
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

impl ChipConfig {
    /// Configuration for `kind` at its default clock and 44.1 kHz.
    pub fn new(kind: ChipKind) -> Self {
        Self {
            kind,
            clock: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            options: Vec::new(),
        }
    }

    /// Override the input clock.
    pub fn with_clock(mut self, clock: u32) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Override the output sample rate.
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Append an option.
    pub fn with_option(mut self, option: ChipOption) -> Self {
        self.options.push(option);
        self
    }

    /// Effective input clock.
    pub fn clock(&self) -> u32 {
        self.clock.unwrap_or_else(|| self.kind.default_clock())
    }

    /// Validate the configuration and build the chip.
    ///
    /// # Errors
    ///
    /// Fails on a zero clock or rate, and on any option the chip rejects.
    pub fn build(&self) -> Result<Box<dyn SoundChip>> {
        let clock = validate_rate("clock", self.clock())?;
        let sample_rate = validate_rate("sample rate", self.sample_rate)?;
        let mut chip = self.kind.build(clock, sample_rate)?;
        for &option in &self.options {
            chip.set_option(option)?;
        }
        Ok(chip)
    }

    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ChipError::ConfigError(format!("invalid chip config: {e}")))
    }

    /// Serialize the configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ChipError::ConfigError(format!("cannot serialize chip config: {e}")))
    }

    /// Parse a list of configurations, e.g. a board with several chips.
    pub fn list_from_json(json: &str) -> Result<Vec<Self>> {
        serde_json::from_str(json)
            .map_err(|e| ChipError::ConfigError(format!("invalid chip config list: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_builds_at_default_clock() {
        for kind in ChipKind::ALL {
            let chip = kind.build(kind.default_clock(), 44_100).unwrap();
            assert_eq!(chip.clock(), kind.default_clock());
            assert_eq!(chip.sample_rate(), 44_100);
            assert!(chip.channel_count() > 0, "{kind:?}");
        }
    }

    #[test]
    fn test_zero_rate_rejected() {
        let config = ChipConfig::new(ChipKind::Ga20).with_sample_rate(0);
        assert!(matches!(config.build(), Err(ChipError::ConfigError(_))));
        let config = ChipConfig::new(ChipKind::Ga20).with_clock(0);
        assert!(config.build().is_err());
    }

    #[test]
    fn test_json_defaults() {
        let config = ChipConfig::from_json(r#"{"kind":"x1_010"}"#).unwrap();
        assert_eq!(config.kind, ChipKind::X1010);
        assert_eq!(config.clock(), X1_010_CLOCK);
        assert_eq!(config.sample_rate, DEFAULT_SAMPLE_RATE);
        assert!(config.options.is_empty());
    }

    #[test]
    fn test_json_options_applied() {
        let json = r#"{
            "kind": "sid",
            "clock": 1022727,
            "sample_rate": 48000,
            "options": [{"option": "model", "value": 1}, {"option": "filter", "value": false}]
        }"#;
        let config = ChipConfig::from_json(json).unwrap();
        assert_eq!(config.options.len(), 2);
        assert_eq!(config.options[0], ChipOption::Model(1));
        let chip = config.build().unwrap();
        assert_eq!(chip.clock(), 1_022_727);
        assert_eq!(chip.name(), "SID 8580");
    }

    #[test]
    fn test_unsupported_option_fails_build() {
        let config = ChipConfig::new(ChipKind::Vrc6).with_option(ChipOption::Model(1));
        assert!(matches!(
            config.build(),
            Err(ChipError::UnsupportedOption { chip: "VRC6", .. })
        ));
    }

    #[test]
    fn test_json_roundtrip_keeps_fields() {
        let config = ChipConfig::new(ChipKind::QSound)
            .with_clock(60_000_000)
            .with_option(ChipOption::Mono(true));
        let json = config.to_json().unwrap();
        assert!(json.contains("\"qsound\""));
        assert_eq!(ChipConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_bad_json() {
        assert!(ChipConfig::from_json(r#"{"kind":"opl3"}"#).is_err());
        assert!(ChipConfig::list_from_json("[{\"kind\":\"n163\"},{\"kind\":\"sid3\"}]")
            .map(|list| list.len() == 2)
            .unwrap_or(false));
    }
}
