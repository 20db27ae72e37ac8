//! SID filter and output stage
//!
//! The cutoff register maps to a corner frequency through a cubic spline over
//! measured points for each chip model. The state-variable filter integrates
//! once per cycle; the C64 board's RC low pass and high pass follow it.

use std::sync::Arc;

use chipsynth_common::TableCache;

use super::SidModel;

/// Measured (cutoff register, Hz) points. End points are repeated so the
/// spline reaches them with a straight slope.
const F0_POINTS_6581: &[(i32, i32)] = &[
    (0, 220),
    (0, 220),
    (128, 230),
    (256, 250),
    (384, 300),
    (512, 420),
    (640, 780),
    (768, 1600),
    (832, 2300),
    (896, 3200),
    (960, 4300),
    (992, 5000),
    (1008, 5400),
    (1016, 5700),
    (1023, 6000),
    (1023, 6000),
    (1024, 4600),
    (1024, 4600),
    (1032, 4800),
    (1056, 5300),
    (1088, 6000),
    (1120, 6600),
    (1152, 7200),
    (1280, 9500),
    (1408, 12000),
    (1536, 14500),
    (1664, 16000),
    (1792, 17100),
    (1920, 17700),
    (2047, 18000),
    (2047, 18000),
];

const F0_POINTS_8580: &[(i32, i32)] = &[
    (0, 0),
    (0, 0),
    (128, 800),
    (256, 1600),
    (384, 2500),
    (512, 3300),
    (640, 4100),
    (768, 4800),
    (896, 5600),
    (1024, 6500),
    (1152, 7500),
    (1280, 8400),
    (1408, 9200),
    (1536, 9800),
    (1664, 10500),
    (1792, 11000),
    (1920, 11700),
    (2047, 12500),
    (2047, 12500),
];

/// Cubic polynomial through (x1, y1) and (x2, y2) with end slopes k1, k2
fn cubic_coefficients(x1: f64, y1: f64, x2: f64, y2: f64, k1: f64, k2: f64) -> [f64; 4] {
    let dx = x2 - x1;
    let dy = y2 - y1;
    let a = ((k1 + k2) - 2.0 * dy / dx) / (dx * dx);
    let b = ((k2 - k1) / dx - 3.0 * (x1 + x2) * a) / 2.0;
    let c = k1 - (3.0 * x1 * a + 2.0 * b) * x1;
    let d = y1 - ((x1 * a + b) * x1 + c) * x1;
    [a, b, c, d]
}

/// Plot a spline through `points` into `table`, one entry per integer x.
///
/// Each segment uses the slopes of its neighbors; a repeated point marks a
/// segment end and gives it a straight slope instead.
fn interpolate(points: &[(i32, i32)], table: &mut [u32]) {
    for w in points.windows(4) {
        let [p0, p1, p2, p3] = [w[0], w[1], w[2], w[3]].map(|(x, y)| (x as f64, y as f64));
        if p1.0 == p2.0 {
            continue;
        }
        let slope = |a: (f64, f64), b: (f64, f64)| (b.1 - a.1) / (b.0 - a.0);
        let (k1, k2) = if p0.0 == p1.0 && p2.0 == p3.0 {
            let k = slope(p1, p2);
            (k, k)
        } else if p0.0 == p1.0 {
            let k2 = slope(p1, p3);
            ((3.0 * slope(p1, p2) - k2) / 2.0, k2)
        } else if p2.0 == p3.0 {
            let k1 = slope(p0, p2);
            (k1, (3.0 * slope(p1, p2) - k1) / 2.0)
        } else {
            (slope(p0, p2), slope(p1, p3))
        };

        let [a, b, c, d] = cubic_coefficients(p1.0, p1.1, p2.0, p2.1, k1, k2);
        for x in w[1].0..=w[2].0 {
            let Some(entry) = table.get_mut(x as usize) else {
                continue;
            };
            let xf = x as f64;
            let y = ((a * xf + b) * xf + c) * xf + d;
            *entry = y.max(0.0) as u32;
        }
    }
}

fn build_f0(model: &SidModel) -> Vec<u32> {
    let mut table = vec![0u32; 2048];
    match model {
        SidModel::Mos6581 => interpolate(F0_POINTS_6581, &mut table),
        SidModel::Mos8580 => interpolate(F0_POINTS_8580, &mut table),
    }
    table
}

static F0_TABLES: TableCache<SidModel, Vec<u32>> = TableCache::new();

/// Cutoff register to corner frequency (Hz), 2048 entries
pub fn cutoff_table(model: SidModel) -> Arc<Vec<u32>> {
    F0_TABLES.get_or_build(model, build_f0)
}

/// Filter mode bits in the MODE/VOL register
const MODE_LP: u8 = 0x10;
const MODE_BP: u8 = 0x20;
const MODE_HP: u8 = 0x40;
const MODE_3OFF: u8 = 0x80;

const W0_MAX: f32 = 2.0 * std::f32::consts::PI * 16_000.0 / 1_000_000.0;

/// State-variable filter with routing, resonance and master volume
#[derive(Clone, Debug)]
pub(crate) struct Filter {
    f0: Arc<Vec<u32>>,
    enabled: bool,
    pub(crate) fc: u16,
    pub(crate) res: u8,
    pub(crate) filt: u8,
    pub(crate) mode: u8,
    pub(crate) vol: u8,
    mixer_dc: i32,
    w0: f32,
    inv_q: f32,
    vhp: f32,
    vbp: f32,
    vlp: f32,
    vnf: i32,
}

impl Filter {
    pub(crate) fn new(model: SidModel) -> Self {
        let mut filter = Self {
            f0: cutoff_table(model),
            enabled: true,
            fc: 0,
            res: 0,
            filt: 0,
            mode: 0,
            vol: 0,
            mixer_dc: 0,
            w0: 0.0,
            inv_q: 0.0,
            vhp: 0.0,
            vbp: 0.0,
            vlp: 0.0,
            vnf: 0,
        };
        filter.set_model(model);
        filter
    }

    pub(crate) fn set_model(&mut self, model: SidModel) {
        self.f0 = cutoff_table(model);
        // 6581 voices sit on a DC level the mixer partly cancels
        self.mixer_dc = match model {
            SidModel::Mos6581 => (-0xfff * 0xff / 18) >> 7,
            SidModel::Mos8580 => 0,
        };
        self.set_w0();
        self.set_q();
    }

    pub(crate) fn enable(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub(crate) fn reset(&mut self) {
        self.fc = 0;
        self.res = 0;
        self.filt = 0;
        self.mode = 0;
        self.vol = 0;
        self.vhp = 0.0;
        self.vbp = 0.0;
        self.vlp = 0.0;
        self.vnf = 0;
        self.set_w0();
        self.set_q();
    }

    pub(crate) fn write_fc_lo(&mut self, value: u8) {
        self.fc = (self.fc & 0x7f8) | (value & 7) as u16;
        self.set_w0();
    }

    pub(crate) fn write_fc_hi(&mut self, value: u8) {
        self.fc = ((value as u16) << 3) | (self.fc & 7);
        self.set_w0();
    }

    pub(crate) fn write_res_filt(&mut self, value: u8) {
        self.res = value >> 4;
        self.filt = value & 0x0f;
        self.set_q();
    }

    pub(crate) fn write_mode_vol(&mut self, value: u8) {
        self.mode = value & 0xf0;
        self.vol = value & 0x0f;
    }

    /// Corner frequency for the current cutoff register
    pub(crate) fn cutoff_hz(&self) -> u32 {
        self.f0[self.fc as usize]
    }

    fn set_w0(&mut self) {
        let w0 = 2.0 * std::f32::consts::PI * self.cutoff_hz() as f32 / 1_000_000.0;
        self.w0 = w0.min(W0_MAX);
    }

    fn set_q(&mut self) {
        self.inv_q = 1.0 / (0.707 + self.res as f32 / 15.0);
    }

    /// Integrate one cycle of voice input
    #[inline]
    pub(crate) fn clock(&mut self, voices: [i32; 3]) {
        let mut voices = voices.map(|v| v >> 7);

        // 3OFF only disconnects voice 3 when it bypasses the filter
        if self.mode & MODE_3OFF != 0 && self.filt & 4 == 0 {
            voices[2] = 0;
        }

        if !self.enabled {
            self.vnf = voices.iter().sum();
            self.vhp = 0.0;
            self.vbp = 0.0;
            self.vlp = 0.0;
            return;
        }

        let mut vi = 0;
        self.vnf = 0;
        for (i, v) in voices.into_iter().enumerate() {
            if self.filt & (1 << i) != 0 {
                vi += v;
            } else {
                self.vnf += v;
            }
        }

        let dvbp = self.w0 * self.vhp;
        let dvlp = self.w0 * self.vbp;
        self.vbp -= dvbp;
        self.vlp -= dvlp;
        self.vhp = self.vbp * self.inv_q - self.vlp - vi as f32;
    }

    /// Mixed filter output scaled by the master volume
    #[inline]
    pub(crate) fn output(&self) -> i32 {
        let mut vf = 0.0;
        if self.mode & MODE_LP != 0 {
            vf += self.vlp;
        }
        if self.mode & MODE_BP != 0 {
            vf += self.vbp;
        }
        if self.mode & MODE_HP != 0 {
            vf += self.vhp;
        }
        (self.vnf + vf as i32 + self.mixer_dc) * self.vol as i32
    }
}

/// Single-voice filter of the SID2 extension
///
/// Each voice has its own cutoff, resonance and mode. The cutoff register is
/// 12 bits wide and always follows the 8580 curve. There is no volume; the
/// voice level is applied before the filter.
#[derive(Clone, Debug)]
pub(crate) struct VoiceFilter {
    f0: Arc<Vec<u32>>,
    enabled: bool,
    pub(crate) fc: u16,
    pub(crate) res: u8,
    pub(crate) filt: bool,
    pub(crate) mode: u8,
    w0: f32,
    inv_q: f32,
    vhp: f32,
    vbp: f32,
    vlp: f32,
    vnf: i32,
}

impl VoiceFilter {
    pub(crate) fn new() -> Self {
        let mut filter = Self {
            f0: cutoff_table(SidModel::Mos8580),
            enabled: true,
            fc: 0,
            res: 0,
            filt: false,
            mode: 0,
            w0: 0.0,
            inv_q: 0.0,
            vhp: 0.0,
            vbp: 0.0,
            vlp: 0.0,
            vnf: 0,
        };
        filter.reset();
        filter
    }

    pub(crate) fn enable(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub(crate) fn reset(&mut self) {
        self.fc = 0;
        self.res = 0;
        self.filt = false;
        self.mode = 0;
        self.vhp = 0.0;
        self.vbp = 0.0;
        self.vlp = 0.0;
        self.vnf = 0;
        self.set_w0();
        self.set_q();
    }

    /// Low cutoff nibble in bits 0-3, mode in bits 4-6, filter enable in bit 7
    pub(crate) fn write_fc_lo_mode(&mut self, value: u8) {
        self.fc = (self.fc & 0xff0) | (value & 0x0f) as u16;
        self.mode = value & (MODE_LP | MODE_BP | MODE_HP);
        self.filt = value & 0x80 != 0;
        self.set_w0();
    }

    pub(crate) fn write_fc_hi(&mut self, value: u8) {
        self.fc = ((value as u16) << 4) | (self.fc & 0x0f);
        self.set_w0();
    }

    /// Full 8-bit resonance
    pub(crate) fn write_res(&mut self, value: u8) {
        self.res = value;
        self.set_q();
    }

    pub(crate) fn cutoff_hz(&self) -> u32 {
        // the 12-bit register spans the same curve at twice the resolution
        self.f0[(self.fc >> 1) as usize]
    }

    fn set_w0(&mut self) {
        let w0 = 2.0 * std::f32::consts::PI * self.cutoff_hz() as f32 / 1_000_000.0;
        self.w0 = w0.min(W0_MAX);
    }

    fn set_q(&mut self) {
        self.inv_q = 1.0 / (0.707 + 2.5 * self.res as f32 / 255.0);
    }

    #[inline]
    pub(crate) fn clock(&mut self, voice: i32) {
        let voice = voice >> 7;
        if !self.enabled || !self.filt {
            self.vnf = voice;
            return;
        }
        self.vnf = 0;
        let dvbp = self.w0 * self.vhp;
        let dvlp = self.w0 * self.vbp;
        self.vbp -= dvbp;
        self.vlp -= dvlp;
        self.vhp = self.vbp * self.inv_q - self.vlp - voice as f32;
    }

    #[inline]
    pub(crate) fn output(&self) -> i32 {
        if !self.enabled {
            return self.vnf;
        }
        let mut vf = 0.0;
        if self.mode & MODE_LP != 0 {
            vf += self.vlp;
        }
        if self.mode & MODE_BP != 0 {
            vf += self.vbp;
        }
        if self.mode & MODE_HP != 0 {
            vf += self.vhp;
        }
        self.vnf + vf as i32
    }
}

/// C64 board output stage: 16 kHz low pass and 16 Hz high pass
#[derive(Clone, Debug)]
pub(crate) struct ExternalFilter {
    enabled: bool,
    mixer_dc: i32,
    vlp: i32,
    vhp: i32,
    vo: i32,
}

// 1 MHz cycle coefficients: w0 * 2^20
const W0_LP: i32 = 104_858;
const W0_HP: i32 = 105;

impl ExternalFilter {
    pub(crate) fn new(model: SidModel) -> Self {
        let mut filter = Self {
            enabled: true,
            mixer_dc: 0,
            vlp: 0,
            vhp: 0,
            vo: 0,
        };
        filter.set_model(model);
        filter
    }

    pub(crate) fn set_model(&mut self, model: SidModel) {
        // the DC level of three silent voices and the mixer at full volume
        self.mixer_dc = match model {
            SidModel::Mos6581 => {
                ((((0x800 - 0x380) + 0x800) * 0xff * 3 - 0xfff * 0xff / 18) >> 7) * 0x0f
            }
            SidModel::Mos8580 => 0,
        };
    }

    pub(crate) fn enable(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub(crate) fn reset(&mut self) {
        self.vlp = 0;
        self.vhp = 0;
        self.vo = 0;
    }

    #[inline]
    pub(crate) fn clock(&mut self, vi: i32) {
        if !self.enabled {
            self.vlp = 0;
            self.vhp = 0;
            self.vo = vi - self.mixer_dc;
            return;
        }
        let dvlp = (((W0_LP >> 8) as i64 * (vi - self.vlp) as i64) >> 12) as i32;
        let dvhp = ((W0_HP as i64 * (self.vlp - self.vhp) as i64) >> 20) as i32;
        self.vo = self.vlp - self.vhp;
        self.vlp += dvlp;
        self.vhp += dvhp;
    }

    #[inline]
    pub(crate) fn output(&self) -> i32 {
        self.vo
    }
}
