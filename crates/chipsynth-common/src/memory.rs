//! Byte-addressed sample memory supplied by the host.
//!
//! Chip cores never own a storage format; they read (and for RAM-backed chips
//! write) through this interface.

/// Sample or wavetable memory attached to a chip
pub trait SampleMemory: Send {
    /// Read one byte; addresses outside the memory read as zero
    fn read_byte(&self, addr: u32) -> u8;

    /// Write one byte; read-only memories ignore writes
    fn write_byte(&mut self, _addr: u32, _value: u8) {}

    /// Size of the memory in bytes
    fn len(&self) -> usize;

    /// Whether the memory holds no data
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Vec-backed sample memory
///
/// Reads outside the loaded data return 0. When created with
/// [`SampleRom::with_mask`], addresses are masked first, mirroring the
/// address line wrap of the original boards.
#[derive(Clone, Debug, Default)]
pub struct SampleRom {
    data: Vec<u8>,
    mask: Option<u32>,
    writable: bool,
}

impl SampleRom {
    /// Create a read-only memory from raw bytes
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            mask: None,
            writable: false,
        }
    }

    /// Create a zero-filled writable memory
    pub fn ram(size: usize) -> Self {
        Self {
            data: vec![0; size],
            mask: None,
            writable: true,
        }
    }

    /// Apply an address mask before every access
    pub fn with_mask(mut self, mask: u32) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Access the raw bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access to the raw bytes (host-side loading)
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    #[inline]
    fn index(&self, addr: u32) -> usize {
        match self.mask {
            Some(mask) => (addr & mask) as usize,
            None => addr as usize,
        }
    }
}

impl From<Vec<u8>> for SampleRom {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl SampleMemory for SampleRom {
    #[inline]
    fn read_byte(&self, addr: u32) -> u8 {
        self.data.get(self.index(addr)).copied().unwrap_or(0)
    }

    fn write_byte(&mut self, addr: u32, value: u8) {
        if !self.writable {
            return;
        }
        let index = self.index(addr);
        if let Some(slot) = self.data.get_mut(index) {
            *slot = value;
        }
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_range_reads_zero() {
        let rom = SampleRom::new(vec![1, 2, 3]);
        assert_eq!(rom.read_byte(2), 3);
        assert_eq!(rom.read_byte(3), 0);
        assert_eq!(rom.read_byte(u32::MAX), 0);
    }

    #[test]
    fn test_mask_mirrors_addresses() {
        let rom = SampleRom::new((0..=255).collect()).with_mask(0xff);
        assert_eq!(rom.read_byte(0x1_0005), 5);
    }

    #[test]
    fn test_rom_ignores_writes() {
        let mut rom = SampleRom::new(vec![7; 4]);
        rom.write_byte(0, 1);
        assert_eq!(rom.read_byte(0), 7);

        let mut ram = SampleRom::ram(4);
        ram.write_byte(1, 9);
        ram.write_byte(10, 9);
        assert_eq!(ram.as_slice(), &[0, 9, 0, 0]);
    }
}
