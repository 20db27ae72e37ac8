//! FIR filter, delay line and echo stages of the QSound output path
//!
//! Arithmetic wraps like the 16-bit DSP accumulators it models.

use super::tables::filter_table;

pub(super) const MAX_TAPS: usize = 95;
const DELAY_LENGTH: usize = 51;
pub(super) const ECHO_LENGTH: usize = 1024;

/// Transversal filter with up to 95 taps
#[derive(Clone, Debug)]
pub(super) struct Fir {
    pub tap_count: usize,
    delay_pos: usize,
    /// Program address of the coefficient table (register)
    pub table_pos: u16,
    taps: [i16; MAX_TAPS],
    delay_line: [i16; MAX_TAPS],
}

impl Default for Fir {
    fn default() -> Self {
        Self {
            tap_count: 0,
            delay_pos: 0,
            table_pos: 0,
            taps: [0; MAX_TAPS],
            delay_line: [0; MAX_TAPS],
        }
    }
}

impl Fir {
    /// Load `tap_count` coefficients from the table at `table_pos`
    ///
    /// Unknown addresses keep the previous coefficients.
    pub fn refresh(&mut self, tap_count: usize) {
        self.delay_pos = 0;
        self.tap_count = tap_count.min(MAX_TAPS);
        if let Some(table) = filter_table(self.table_pos) {
            let n = self.tap_count.min(table.len());
            self.taps[..n].copy_from_slice(&table[..n]);
            self.taps[n..self.tap_count].fill(0);
        }
    }

    #[cfg(test)]
    pub fn taps(&self) -> &[i16] {
        &self.taps[..self.tap_count]
    }

    pub fn process(&mut self, input: i16) -> i32 {
        if self.tap_count == 0 {
            return 0;
        }
        let history = self.tap_count - 1;
        let mut output = 0i32;
        for tap in 0..history {
            let product = self.taps[tap] as i32 * self.delay_line[self.delay_pos] as i32;
            output = output.wrapping_sub(product << 2);
            self.delay_pos += 1;
            if self.delay_pos >= history {
                self.delay_pos = 0;
            }
        }
        output = output.wrapping_sub((self.taps[history] as i32 * input as i32) << 2);

        if history > 0 {
            self.delay_line[self.delay_pos] = input;
            self.delay_pos += 1;
            if self.delay_pos >= history {
                self.delay_pos = 0;
            }
        }
        output
    }
}

/// Fixed 51-entry delay line with output volume
#[derive(Clone, Debug)]
pub(super) struct Delay {
    /// Delay in samples (register)
    pub delay: u16,
    /// Output volume (register)
    pub volume: u16,
    write_pos: usize,
    read_pos: usize,
    line: [i16; DELAY_LENGTH],
}

impl Default for Delay {
    fn default() -> Self {
        Self {
            delay: 0,
            volume: 0,
            write_pos: 0,
            read_pos: 0,
            line: [0; DELAY_LENGTH],
        }
    }
}

impl Delay {
    pub fn process(&mut self, input: i32) -> i32 {
        self.line[self.write_pos] = (input >> 16) as i16;
        self.write_pos = (self.write_pos + 1) % DELAY_LENGTH;

        let output = (self.line[self.read_pos] as i32).wrapping_mul(self.volume as i16 as i32);
        self.read_pos = (self.read_pos + 1) % DELAY_LENGTH;
        output
    }

    /// Move the read position to match the delay register
    pub fn update(&mut self) {
        let pos = (self.write_pos as i32 - self.delay as i16 as i32).rem_euclid(DELAY_LENGTH as i32);
        self.read_pos = pos as usize;
    }
}

/// Echo line smoothed by a two-sample moving average
#[derive(Clone, Debug)]
pub(super) struct Echo {
    /// End position in DSP memory (register)
    pub end_pos: u16,
    /// Feedback level (register)
    pub feedback: u16,
    pub length: usize,
    last_sample: i16,
    pos: usize,
    line: Box<[i16; ECHO_LENGTH]>,
}

impl Default for Echo {
    fn default() -> Self {
        Self {
            end_pos: 0,
            feedback: 0,
            length: 0,
            last_sample: 0,
            pos: 0,
            line: Box::new([0; ECHO_LENGTH]),
        }
    }
}

impl Echo {
    /// Clear all state without reallocating the line
    pub fn clear(&mut self) {
        self.end_pos = 0;
        self.feedback = 0;
        self.length = 0;
        self.last_sample = 0;
        self.pos = 0;
        self.line.fill(0);
    }

    pub fn process(&mut self, input: i32) -> i16 {
        let old = self.line[self.pos] as i32;
        let last = self.last_sample as i32;
        self.last_sample = old as i16;
        let average = (old + last) >> 1;

        let feedback = average.wrapping_mul(self.feedback as i16 as i32) << 2;
        self.line[self.pos] = (input.wrapping_add(feedback) >> 16) as i16;
        self.pos += 1;
        if self.pos >= self.length {
            self.pos = 0;
        }
        average as i16
    }
}
