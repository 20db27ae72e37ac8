//! SID ADSR envelope generator
//!
//! An 8-bit envelope counter stepped by a 15-bit rate counter. Decay and
//! release approximate an exponential curve by slowing the step rate at fixed
//! counter levels. Once the counter reaches zero it is frozen until the next
//! attack.

/// Rate counter periods for the 4-bit attack/decay/release values
const RATE_COUNTER_PERIOD: [u16; 16] = [
    9, 32, 63, 95, 149, 220, 267, 313, 392, 977, 1954, 3126, 3907, 11720, 19532, 31251,
];

/// Envelope phase
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvelopeState {
    /// Counting up to 0xff
    Attack,
    /// Counting down to the sustain level, then holding
    DecaySustain,
    /// Counting down to zero
    Release,
}

#[derive(Clone, Debug)]
pub(crate) struct EnvelopeGenerator {
    pub(crate) rate_counter: u16,
    pub(crate) rate_period: u16,
    pub(crate) exponential_counter: u8,
    pub(crate) exponential_counter_period: u8,
    pub(crate) envelope_counter: u8,
    pub(crate) hold_zero: bool,
    pub(crate) state: EnvelopeState,
    gate: bool,
    attack: u8,
    decay: u8,
    sustain: u8,
    release: u8,
}

impl Default for EnvelopeGenerator {
    fn default() -> Self {
        Self {
            rate_counter: 0,
            rate_period: RATE_COUNTER_PERIOD[0],
            exponential_counter: 0,
            exponential_counter_period: 1,
            envelope_counter: 0,
            hold_zero: true,
            state: EnvelopeState::Release,
            gate: false,
            attack: 0,
            decay: 0,
            sustain: 0,
            release: 0,
        }
    }
}

impl EnvelopeGenerator {
    /// Power-on state
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    /// Advance one cycle
    pub(crate) fn clock(&mut self) {
        // A period written below the current count wraps through 0x8000 first.
        self.rate_counter += 1;
        if self.rate_counter & 0x8000 != 0 {
            self.rate_counter = (self.rate_counter + 1) & 0x7fff;
        }
        if self.rate_counter != self.rate_period {
            return;
        }
        self.rate_counter = 0;

        // The first attack step also resets the exponential counter.
        if self.state != EnvelopeState::Attack {
            self.exponential_counter = self.exponential_counter.wrapping_add(1);
            if self.exponential_counter != self.exponential_counter_period {
                return;
            }
        }
        self.exponential_counter = 0;

        if self.hold_zero {
            return;
        }

        match self.state {
            EnvelopeState::Attack => {
                self.envelope_counter = self.envelope_counter.wrapping_add(1);
                if self.envelope_counter == 0xff {
                    self.state = EnvelopeState::DecaySustain;
                    self.rate_period = RATE_COUNTER_PERIOD[self.decay as usize];
                }
            }
            EnvelopeState::DecaySustain => {
                if self.envelope_counter != self.sustain * 0x11 {
                    self.envelope_counter = self.envelope_counter.wrapping_sub(1);
                }
            }
            EnvelopeState::Release => {
                self.envelope_counter = self.envelope_counter.wrapping_sub(1);
            }
        }

        self.exponential_counter_period = match self.envelope_counter {
            0xff => 1,
            0x5d => 2,
            0x36 => 4,
            0x1a => 8,
            0x0e => 16,
            0x06 => 30,
            0x00 => {
                self.hold_zero = true;
                1
            }
            _ => self.exponential_counter_period,
        };
    }

    /// Gate bit of the control register; only edges change state
    pub(crate) fn write_gate(&mut self, gate: bool) {
        if !self.gate && gate {
            self.state = EnvelopeState::Attack;
            self.rate_period = RATE_COUNTER_PERIOD[self.attack as usize];
            self.hold_zero = false;
        } else if self.gate && !gate {
            self.state = EnvelopeState::Release;
            self.rate_period = RATE_COUNTER_PERIOD[self.release as usize];
        }
        self.gate = gate;
    }

    pub(crate) fn write_attack_decay(&mut self, value: u8) {
        self.attack = value >> 4;
        self.decay = value & 0xf;
        match self.state {
            EnvelopeState::Attack => self.rate_period = RATE_COUNTER_PERIOD[self.attack as usize],
            EnvelopeState::DecaySustain => {
                self.rate_period = RATE_COUNTER_PERIOD[self.decay as usize]
            }
            EnvelopeState::Release => {}
        }
    }

    pub(crate) fn write_sustain_release(&mut self, value: u8) {
        self.sustain = value >> 4;
        self.release = value & 0xf;
        if self.state == EnvelopeState::Release {
            self.rate_period = RATE_COUNTER_PERIOD[self.release as usize];
        }
    }

    #[inline]
    pub(crate) fn output(&self) -> u8 {
        self.envelope_counter
    }
}
