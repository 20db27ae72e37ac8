//! DC offset removal filter
//!
//! Chips whose voices only swing between zero and a positive level (VRC6
//! pulses, K005289 and N163 wavetables) sit on a DC offset that follows the
//! playing notes. This filter subtracts a running average to center them.

/// History buffer size (2048 samples = ~46ms at 44.1kHz)
const HISTORY_SIZE_BITS: usize = 11;
const HISTORY_SIZE: usize = 1 << HISTORY_SIZE_BITS;

/// DC offset removal filter using a running average
#[derive(Clone)]
pub struct DcFilter {
    /// Circular buffer of recent samples
    buffer: Box<[i32; HISTORY_SIZE]>,
    /// Current write position in buffer
    position: usize,
    /// Running sum of all samples in buffer
    running_sum: i64,
}

impl DcFilter {
    /// Create a new DC filter
    pub fn new() -> Self {
        Self {
            buffer: Box::new([0; HISTORY_SIZE]),
            position: 0,
            running_sum: 0,
        }
    }

    /// Process a sample and return the DC-adjusted value
    #[inline]
    pub fn process(&mut self, sample: i32) -> i32 {
        self.running_sum -= self.buffer[self.position] as i64;
        self.running_sum += sample as i64;
        self.buffer[self.position] = sample;
        self.position = (self.position + 1) & (HISTORY_SIZE - 1);

        let dc_offset = self.running_sum >> HISTORY_SIZE_BITS;
        (sample as i64 - dc_offset) as i32
    }

    /// Reset the filter state
    pub fn reset(&mut self) {
        self.buffer.fill(0);
        self.position = 0;
        self.running_sum = 0;
    }
}

impl Default for DcFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DcFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DcFilter")
            .field("position", &self.position)
            .field("running_sum", &self.running_sum)
            .finish_non_exhaustive()
    }
}

/// Optional DC filter on a stereo output, toggled by `ChipOption::DcFilter`.
#[derive(Clone, Debug, Default)]
pub struct StereoDcFilter {
    filters: Option<Box<[DcFilter; 2]>>,
}

impl StereoDcFilter {
    /// Enable or disable; enabling starts from a cleared history
    pub fn set_enabled(&mut self, enabled: bool) {
        self.filters = enabled.then(|| Box::new([DcFilter::new(), DcFilter::new()]));
    }

    /// Whether the filter is active
    pub fn is_enabled(&self) -> bool {
        self.filters.is_some()
    }

    /// Filter a mixed bus in place (no-op when disabled)
    #[inline]
    pub fn process(&mut self, bus: &mut [i32; 2]) {
        if let Some(filters) = self.filters.as_mut() {
            bus[0] = filters[0].process(bus[0]);
            bus[1] = filters[1].process(bus[1]);
        }
    }

    /// Clear filter history
    pub fn reset(&mut self) {
        if let Some(filters) = self.filters.as_mut() {
            filters.iter_mut().for_each(DcFilter::reset);
        }
    }
}
