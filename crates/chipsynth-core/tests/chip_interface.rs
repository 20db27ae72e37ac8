//! Behavior every chip shares through the `SoundChip` interface.

use anyhow::Result;
use chipsynth::{ChipBank, ChipConfig, ChipKind, ChipOption, SampleRom};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Small xorshift so register noise is repeatable.
struct Noise(u32);

impl Noise {
    fn next(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x
    }
}

fn noise_memory(size: usize, seed: u32) -> SampleRom {
    let mut noise = Noise(seed);
    SampleRom::new((0..size).map(|_| noise.next() as u8).collect())
}

#[test]
fn test_every_chip_survives_register_noise() -> Result<()> {
    init_logger();
    for (n, kind) in ChipKind::ALL.into_iter().enumerate() {
        let mut chip = ChipConfig::new(kind).build()?;
        // chips without external memory reject it
        let _ = chip.set_memory(Box::new(noise_memory(0x20000, 0x1234 + n as u32)));

        let mut noise = Noise(0xdead_beef ^ n as u32);
        let mut frames = vec![[0i16; 2]; 64];
        for _ in 0..8 {
            for _ in 0..64 {
                let value = noise.next();
                chip.write(value >> 16 & 0xffff, value as u8);
            }
            let _ = chip.read(noise.next() & 0xff);
            chip.render(&mut frames);
        }
        chip.reset();
        chip.render(&mut frames);
    }
    Ok(())
}

#[test]
fn test_track_info_covers_every_channel() -> Result<()> {
    for kind in ChipKind::ALL {
        let chip = ChipConfig::new(kind).build()?;
        let channels = chip.channel_count();
        for ch in 0..channels {
            let info = chip.track_info(ch);
            assert!(info.is_some(), "{kind:?} channel {ch}");
            assert!(!info.map(|i| i.muted).unwrap_or(true));
        }
        assert!(chip.track_info(channels).is_none(), "{kind:?}");
    }
    Ok(())
}

#[test]
fn test_mask_shows_in_track_info() -> Result<()> {
    for kind in ChipKind::ALL {
        let mut chip = ChipConfig::new(kind).build()?;
        chip.set_mask(0b10);
        let muted: Vec<bool> = (0..2)
            .filter_map(|ch| chip.track_info(ch))
            .map(|info| info.muted)
            .collect();
        assert_eq!(muted, [false, true], "{kind:?}");
    }
    Ok(())
}

#[test]
fn test_rate_change_between_renders() -> Result<()> {
    for kind in ChipKind::ALL {
        let mut chip = ChipConfig::new(kind).build()?;
        let mut frames = vec![[0i16; 2]; 32];
        chip.render(&mut frames);
        chip.set_rate(22_050)?;
        assert_eq!(chip.sample_rate(), 22_050);
        assert!(chip.set_rate(0).is_err());
        assert!(chip.set_clock(0).is_err());
        chip.render(&mut frames);
    }
    Ok(())
}

#[test]
fn test_ga20_sample_plays_to_end() -> Result<()> {
    init_logger();
    let mut chip = ChipConfig::new(ChipKind::Ga20).build()?;
    chip.set_memory(Box::new(SampleRom::new(vec![0x90; 0x1000])))?;

    chip.write(0x00, 0x10); // start 0x100
    chip.write(0x01, 0x00);
    chip.write(0x02, 0x20); // end 0x200
    chip.write(0x03, 0x00);
    chip.write(0x04, 0xff);
    chip.write(0x05, 0xff);
    chip.write(0x06, 0x02);
    assert_eq!(chip.read(0x07), Some(1));

    let mut frames = vec![[0i16; 2]; 4];
    chip.render(&mut frames);
    assert!(frames.iter().all(|f| f[0] > 0 && f[0] == f[1]));

    // 256 steps at clock / 4 take well under 64 frames
    let mut frames = vec![[0i16; 2]; 64];
    chip.render(&mut frames);
    assert_eq!(chip.read(0x07), Some(0));
    Ok(())
}

#[test]
fn test_sid_model_option_from_config() -> Result<()> {
    let chip = ChipConfig::new(ChipKind::Sid)
        .with_option(ChipOption::Model(0))
        .build()?;
    assert_eq!(chip.name(), "SID 6581");

    let chip = ChipConfig::new(ChipKind::Sid)
        .with_option(ChipOption::Extended(true))
        .build()?;
    assert_eq!(chip.name(), "SID2");

    assert!(ChipConfig::new(ChipKind::Sid)
        .with_option(ChipOption::Model(7))
        .build()
        .is_err());
    Ok(())
}

#[test]
fn test_bank_from_json_board() -> Result<()> {
    init_logger();
    let configs = ChipConfig::list_from_json(
        r#"[
            {"kind": "vrc6", "sample_rate": 48000},
            {"kind": "n163", "sample_rate": 48000, "options": [{"option": "multiplex", "value": false}]}
        ]"#,
    )?;
    let mut bank = ChipBank::from_configs(&configs)?;
    assert_eq!(bank.sample_rate(), 48_000);
    assert_eq!(bank.channel_count(), 3 + bank.chip(1).map_or(0, |c| c.channel_count()));

    bank.write(0, 0x9000, 0x7f)?;
    bank.write(0, 0x9001, 0xfd)?;
    bank.write(0, 0x9002, 0x80)?;

    let mut buffer = vec![0.0f32; 1024];
    bank.generate_samples_interleaved(&mut buffer);
    assert!(buffer.iter().any(|s| s.abs() > 0.001));
    assert!(buffer.iter().all(|s| (-1.0..=1.0).contains(s)));
    Ok(())
}
