//! One PCM slot: sample position, envelope generator and LFO

use chipsynth_common::SampleMemory;

use super::tables::{
    AM_DEPTH, DL_TAB, EG_INC, EG_RATE_SELECT, EG_RATE_SHIFT, LFO_PERIOD, LFO_STEP, MAX_ATT_INDEX,
    MIN_ATT_INDEX, VIB_DEPTH,
};

/// Sample memory is addressed with 22 bits
pub(super) const MEMORY_MASK: u32 = 0x3f_ffff;

/// Envelope generator phase of a slot
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EgState {
    /// Rising toward full level
    Attack,
    /// First decay toward the decay level
    Decay1,
    /// Second decay until silence
    Decay2,
    /// After key-off
    Release,
    /// Slot silent and skipped
    #[default]
    Off,
}

/// Sample encoding selected by the wave header
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(super) enum SampleFormat {
    #[default]
    Bits8,
    Bits12,
    Bits16,
    Reserved,
}

impl SampleFormat {
    pub(super) fn from_header(bits: u8) -> Self {
        match bits & 3 {
            0 => Self::Bits8,
            1 => Self::Bits12,
            2 => Self::Bits16,
            _ => Self::Reserved,
        }
    }
}

/// Phase increment for an octave and F-number, 16-bit fraction
pub(super) fn calc_step(oct: i8, fnum: u16, vib: i16) -> u32 {
    if oct == -8 {
        return 0;
    }
    let t = (fnum as i32 + 1024 + vib as i32) as u32;
    let shift = 8 + oct as i32;
    let t = if shift >= 0 { t << shift } else { t >> -shift };
    t >> 3
}

#[derive(Clone, Debug, Default)]
pub(super) struct Slot {
    pub wave: u16,
    pub fnum: u16,
    pub oct: i8,
    pub prvb: bool,
    pub tl_dest: u8,
    pub tl: u8,
    pub pan: u8,
    pub keyon: bool,
    pub damp: bool,
    pub lfo: u8,
    pub vib: u8,
    pub am: u8,
    pub ar: u8,
    pub d1r: u8,
    pub dl: i32,
    pub d2r: u8,
    pub rc: u8,
    pub rr: u8,

    pub step: u32,
    pub stepptr: u32,
    pub pos: u16,

    pub format: SampleFormat,
    pub start: u32,
    pub loop_addr: u16,
    /// End address as stored by the chip (two's complement negated)
    pub end_addr: u16,
    pub env_vol: i32,

    pub lfo_active: bool,
    pub lfo_cnt: u32,

    pub state: EgState,
    /// Routed to the rear (DO1) output pair
    pub rear: bool,
}

impl Slot {
    pub fn reset(&mut self) {
        *self = Self {
            env_vol: MAX_ATT_INDEX,
            ..Self::default()
        };
    }

    pub fn update_step(&mut self) {
        self.step = calc_step(self.oct, self.fnum, 0);
    }

    /// Effective envelope rate 0..=63 for a 4-bit rate register
    pub fn compute_rate(&self, val: u8) -> usize {
        match val {
            0 => 0,
            15 => 63,
            _ => {
                let mut res = val as i32 * 4;
                if self.rc != 15 {
                    let oct = (self.oct as i32 + self.rc as i32).clamp(0, 15);
                    res += 2 * oct + (self.fnum & 0x200 != 0) as i32;
                }
                res.clamp(0, 63) as usize
            }
        }
    }

    pub fn compute_decay_rate(&self, val: u8) -> usize {
        if self.damp {
            // damping is much faster once the level is already low
            return if self.env_vol < DL_TAB[4] { 48 } else { 63 };
        }
        // pseudo-reverb switches to internal rate 20 at -18 dB, no correction
        if self.prvb && self.env_vol >= DL_TAB[6] {
            return 20;
        }
        self.compute_rate(val)
    }

    pub fn compute_vib(&self) -> i16 {
        let mut lfo_fm = (self.lfo_cnt / (LFO_PERIOD / 0x40)) as i16;
        if lfo_fm & 0x10 != 0 {
            lfo_fm ^= 0x1f;
        }
        if lfo_fm & 0x20 != 0 {
            lfo_fm = -(lfo_fm & 0xf);
        }
        lfo_fm * VIB_DEPTH[self.vib as usize & 7] / 12
    }

    pub fn compute_am(&self) -> i32 {
        let mut lfo_am = (self.lfo_cnt / (LFO_PERIOD / 0x100)) as u16;
        if lfo_am >= 0x80 {
            lfo_am ^= 0xff;
        }
        ((lfo_am * AM_DEPTH[self.am as usize & 7]) >> 7) as i32
    }

    /// Restart sample playback and the envelope
    pub fn key_on(&mut self) {
        self.env_vol = MAX_ATT_INDEX;
        if self.compute_rate(self.ar) < 63 {
            self.state = EgState::Attack;
        } else {
            // instant attack
            self.env_vol = MIN_ATT_INDEX;
            self.state = if self.dl != 0 {
                EgState::Decay1
            } else {
                EgState::Decay2
            };
        }
        self.stepptr = 0;
        self.pos = 0;
    }

    /// Position after `increment` samples, honouring loop and end
    pub fn next_pos(&self, pos: u16, increment: u16) -> u16 {
        let pos = pos.wrapping_add(increment);
        if pos as u32 + self.end_addr as u32 >= 0x10000 {
            pos.wrapping_add(self.end_addr.wrapping_add(self.loop_addr))
        } else {
            pos
        }
    }

    pub fn sample(&self, memory: Option<&dyn SampleMemory>, pos: u16) -> i16 {
        let Some(mem) = memory else {
            return 0;
        };
        let byte = |addr: u32| mem.read_byte(addr & MEMORY_MASK) as u16;
        let pos = pos as u32;
        match self.format {
            SampleFormat::Bits8 => (byte(self.start + pos) << 8) as i16,
            SampleFormat::Bits12 => {
                // two samples packed in three bytes
                let addr = self.start + (pos / 2) * 3;
                let raw = if pos & 1 != 0 {
                    (byte(addr + 2) << 8) | (byte(addr + 1) & 0xf0)
                } else {
                    (byte(addr) << 8) | ((byte(addr + 1) << 4) & 0xf0)
                };
                raw as i16
            }
            SampleFormat::Bits16 => {
                let addr = self.start + pos * 2;
                ((byte(addr) << 8) | byte(addr + 1)) as i16
            }
            SampleFormat::Reserved => 0,
        }
    }

    /// Interpolated sample at the current position
    pub fn interpolated(&self, memory: Option<&dyn SampleMemory>) -> i32 {
        let s0 = self.sample(memory, self.pos) as i64;
        let s1 = self.sample(memory, self.next_pos(self.pos, 1)) as i64;
        let frac = self.stepptr as i64;
        ((s0 * (0x10000 - frac) + s1 * frac) >> 16) as i16 as i32
    }

    /// Advance the position by one output sample
    pub fn advance_position(&mut self) {
        let step = if self.lfo_active && self.vib != 0 {
            calc_step(self.oct, self.fnum, self.compute_vib())
        } else {
            self.step
        };
        self.stepptr += step;
        if self.stepptr >= 0x10000 {
            self.pos = self.next_pos(self.pos, (self.stepptr >> 16) as u16);
            self.stepptr &= 0xffff;
        }
    }

    /// Once-per-sample TL interpolation, LFO and envelope update
    pub fn advance(&mut self, eg_cnt: u32) {
        // attenuation rises one TL step every 27 samples, falls every 13.5
        if eg_cnt % 9 == 0 && self.tl != self.tl_dest {
            let rising = (eg_cnt / 9) % 3 == 0;
            if rising && self.tl < self.tl_dest {
                self.tl += 1;
            } else if !rising && self.tl > self.tl_dest {
                self.tl -= 1;
            }
        }

        if self.lfo_active {
            self.lfo_cnt = (self.lfo_cnt + LFO_STEP[self.lfo as usize & 7]) & (LFO_PERIOD - 1);
        }

        match self.state {
            EgState::Off => {}
            EgState::Attack => {
                let rate = self.compute_rate(self.ar);
                // rate 63 is handled at key-on
                if rate < 63 {
                    if let Some(inc) = eg_increment(rate, eg_cnt) {
                        self.env_vol += (!self.env_vol * inc) >> 4;
                        if self.env_vol <= MIN_ATT_INDEX {
                            self.env_vol = MIN_ATT_INDEX;
                            self.state = if self.dl != 0 {
                                EgState::Decay1
                            } else {
                                EgState::Decay2
                            };
                        }
                    }
                }
            }
            EgState::Decay1 => {
                let rate = self.compute_decay_rate(self.d1r);
                if let Some(inc) = eg_increment(rate, eg_cnt) {
                    self.env_vol += inc;
                    if self.env_vol >= self.dl {
                        self.state = if self.env_vol < MAX_ATT_INDEX {
                            EgState::Decay2
                        } else {
                            EgState::Off
                        };
                    }
                }
            }
            EgState::Decay2 | EgState::Release => {
                let val = if self.state == EgState::Decay2 {
                    self.d2r
                } else {
                    self.rr
                };
                let rate = self.compute_decay_rate(val);
                if let Some(inc) = eg_increment(rate, eg_cnt) {
                    self.env_vol += inc;
                    if self.env_vol >= MAX_ATT_INDEX {
                        self.env_vol = MAX_ATT_INDEX;
                        self.state = EgState::Off;
                    }
                }
            }
        }
    }
}

/// Envelope increment for `rate` on this counter value, `None` between ticks
fn eg_increment(rate: usize, eg_cnt: u32) -> Option<i32> {
    let shift = EG_RATE_SHIFT[rate] as u32;
    if eg_cnt & ((1 << shift) - 1) != 0 {
        return None;
    }
    let select = EG_RATE_SELECT[rate] as usize;
    Some(EG_INC[select + ((eg_cnt >> shift) & 7) as usize] as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chipsynth_common::SampleRom;

    fn slot() -> Slot {
        let mut slot = Slot::default();
        slot.reset();
        slot
    }

    #[test]
    fn test_calc_step() {
        // octave 0, FN 0 plays at the base rate
        assert_eq!(calc_step(0, 0, 0), 0x8000);
        assert_eq!(calc_step(1, 0, 0), 0x10000);
        assert_eq!(calc_step(-1, 0, 0), 0x4000);
        assert_eq!(calc_step(-8, 0x3ff, 0), 0);
    }

    #[test]
    fn test_rate_with_octave_correction() {
        let mut s = slot();
        s.rc = 15;
        assert_eq!(s.compute_rate(0), 0);
        assert_eq!(s.compute_rate(15), 63);
        assert_eq!(s.compute_rate(5), 20);
        s.rc = 2;
        s.oct = 3;
        s.fnum = 0x200;
        assert_eq!(s.compute_rate(5), 20 + 10 + 1);
        s.oct = -7;
        assert_eq!(s.compute_rate(5), 21);
    }

    #[test]
    fn test_damp_rate() {
        let mut s = slot();
        s.damp = true;
        s.env_vol = 0;
        assert_eq!(s.compute_decay_rate(1), 48);
        s.env_vol = 0x100;
        assert_eq!(s.compute_decay_rate(1), 63);
    }

    #[test]
    fn test_pseudo_reverb_rate() {
        let mut s = slot();
        s.prvb = true;
        s.rc = 0;
        s.oct = 7;
        s.env_vol = DL_TAB[6];
        assert_eq!(s.compute_decay_rate(1), 20);
        s.env_vol = 0;
        assert_eq!(s.compute_decay_rate(1), 4 + 14);
    }

    #[test]
    fn test_end_wraps_to_loop() {
        let mut s = slot();
        // end at 16 samples, loop at 4
        s.end_addr = 16u16.wrapping_neg();
        s.loop_addr = 4;
        assert_eq!(s.next_pos(14, 1), 15);
        assert_eq!(s.next_pos(15, 1), 4);
        assert_eq!(s.next_pos(15, 3), 6);
    }

    #[test]
    fn test_sample_formats() {
        let rom = SampleRom::new(vec![0x12, 0x34, 0x56, 0x80, 0x00]);
        let mem: Option<&dyn SampleMemory> = Some(&rom);
        let mut s = slot();
        s.format = SampleFormat::Bits8;
        assert_eq!(s.sample(mem, 3), i16::MIN);
        s.format = SampleFormat::Bits16;
        assert_eq!(s.sample(mem, 0), 0x1234);
        s.format = SampleFormat::Bits12;
        assert_eq!(s.sample(mem, 0), 0x1240);
        assert_eq!(s.sample(mem, 1), 0x5630);
        assert_eq!(s.sample(None, 0), 0);
    }

    #[test]
    fn test_attack_reaches_decay() {
        let mut s = slot();
        s.ar = 14;
        s.rc = 15;
        s.dl = DL_TAB[3];
        s.key_on();
        assert_eq!(s.state, EgState::Attack);
        let mut cnt = 0;
        while s.state == EgState::Attack && cnt < 100_000 {
            cnt += 1;
            s.advance(cnt);
        }
        assert_eq!(s.state, EgState::Decay1);
        assert_eq!(s.env_vol, 0);
    }

    #[test]
    fn test_instant_attack() {
        let mut s = slot();
        s.ar = 15;
        s.key_on();
        assert_eq!(s.state, EgState::Decay2);
        assert_eq!(s.env_vol, 0);
    }

    #[test]
    fn test_release_to_off() {
        let mut s = slot();
        s.ar = 15;
        s.rr = 15;
        s.key_on();
        s.state = EgState::Release;
        let mut cnt = 0;
        while s.state != EgState::Off && cnt < 10_000 {
            cnt += 1;
            s.advance(cnt);
        }
        assert_eq!(s.state, EgState::Off);
        assert_eq!(s.env_vol, MAX_ATT_INDEX);
    }

    #[test]
    fn test_tl_interpolates() {
        let mut s = slot();
        s.tl_dest = 4;
        for cnt in 1..=9 * 3 * 4 {
            s.advance(cnt);
        }
        assert_eq!(s.tl, 4);
    }
}
