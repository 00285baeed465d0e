//! The simulated DRAM chip: a flat byte array addressed by physical address.
//!
//! These are the leaf primitives everything else bottoms out in. They perform
//! no translation and no bounds policy beyond the fixed array size.
//!
//! Be careful with the x86-64 little-endian integer encoding:
//! writing `0x0000_7fd3_57a0_2ae0` lays the bytes out as
//! `e0 2a a0 57 d3 7f 00 00`.

use crate::addr::{self, PAddr, LINE_SIZE, PAGE_SIZE, PHYS_MEMORY_SIZE};

/// How many bytes one fixed-width instruction text slot occupies
pub const MAX_INSTRUCTION_CHARS: usize = 64;

/// The simulated physical memory.
pub struct Dram {
    bytes: Box<[u8]>,
}

impl Dram {
    /// Create a zero-filled DRAM of [`PHYS_MEMORY_SIZE`] bytes.
    pub fn new() -> Self {
        Self {
            bytes: vec![0; PHYS_MEMORY_SIZE].into_boxed_slice(),
        }
    }

    /// Read a little-endian `u64` from the 8-byte aligned address `paddr`.
    pub fn read64(&self, paddr: PAddr) -> u64 {
        assert_eq!(paddr % 8, 0, "unaligned 64-bit DRAM read at {paddr:#x}");
        let at = paddr as usize;
        u64::from_le_bytes(self.bytes[at..at + 8].try_into().unwrap())
    }

    /// Write a little-endian `u64` to the 8-byte aligned address `paddr`.
    pub fn write64(&mut self, paddr: PAddr, data: u64) {
        assert_eq!(paddr % 8, 0, "unaligned 64-bit DRAM write at {paddr:#x}");
        let at = paddr as usize;
        self.bytes[at..at + 8].copy_from_slice(&data.to_le_bytes());
    }

    /// Read one byte.
    pub fn read8(&self, paddr: PAddr) -> u8 {
        self.bytes[paddr as usize]
    }

    /// Write one byte.
    pub fn write8(&mut self, paddr: PAddr, data: u8) {
        self.bytes[paddr as usize] = data;
    }

    /// Read the fixed-width instruction text stored at `paddr`.
    ///
    /// The returned string ends at the first NUL byte of the
    /// [`MAX_INSTRUCTION_CHARS`]-wide slot.
    pub fn read_inst(&self, paddr: PAddr) -> String {
        let at = paddr as usize;
        let slot = &self.bytes[at..at + MAX_INSTRUCTION_CHARS];
        let len = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
        String::from_utf8_lossy(&slot[..len]).into_owned()
    }

    /// Store `text` into the fixed-width instruction slot at `paddr`,
    /// zero-padding the remainder of the slot.
    ///
    /// In the simulation instruction slots are writable even though real code
    /// memory would be read-only; the loader needs this.
    pub fn write_inst(&mut self, paddr: PAddr, text: &str) {
        assert!(
            text.len() <= MAX_INSTRUCTION_CHARS,
            "instruction text longer than {MAX_INSTRUCTION_CHARS} bytes"
        );
        let at = paddr as usize;
        let slot = &mut self.bytes[at..at + MAX_INSTRUCTION_CHARS];
        slot[..text.len()].copy_from_slice(text.as_bytes());
        slot[text.len()..].fill(0);
    }

    /// Bus transfer: copy the full cache line containing `paddr` into `block`.
    pub fn bus_read_line(&self, paddr: PAddr, block: &mut [u8; LINE_SIZE]) {
        let base = addr::line_base(paddr) as usize;
        block.copy_from_slice(&self.bytes[base..base + LINE_SIZE]);
    }

    /// Bus transfer: copy `block` over the full cache line containing `paddr`.
    pub fn bus_write_line(&mut self, paddr: PAddr, block: &[u8; LINE_SIZE]) {
        let base = addr::line_base(paddr) as usize;
        self.bytes[base..base + LINE_SIZE].copy_from_slice(block);
    }

    /// Borrow the bytes of physical frame `ppn`.
    pub(crate) fn frame(&self, ppn: u64) -> &[u8] {
        let base = (ppn as usize) * PAGE_SIZE;
        &self.bytes[base..base + PAGE_SIZE]
    }

    /// Mutably borrow the bytes of physical frame `ppn`.
    pub(crate) fn frame_mut(&mut self, ppn: u64) -> &mut [u8] {
        let base = (ppn as usize) * PAGE_SIZE;
        &mut self.bytes[base..base + PAGE_SIZE]
    }
}

impl Default for Dram {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_write64_is_little_endian() {
        let mut dram = Dram::new();
        dram.write64(0x100, 0x0000_7fd3_57a0_2ae0);
        assert_eq!(dram.read8(0x100), 0xe0);
        assert_eq!(dram.read8(0x101), 0x2a);
        assert_eq!(dram.read8(0x102), 0xa0);
        assert_eq!(dram.read8(0x103), 0x57);
        assert_eq!(dram.read8(0x104), 0xd3);
        assert_eq!(dram.read8(0x105), 0x7f);
        assert_eq!(dram.read8(0x106), 0x00);
        assert_eq!(dram.read8(0x107), 0x00);
    }

    #[test]
    fn test_read64_roundtrips() {
        let mut dram = Dram::new();
        for (i, value) in [u64::MAX, 0, 0xdead_beef, 1 << 63].into_iter().enumerate() {
            let paddr = (i * 8) as PAddr;
            dram.write64(paddr, value);
            assert_eq!(dram.read64(paddr), value);
        }
    }

    #[test]
    #[should_panic(expected = "unaligned")]
    fn test_unaligned_read64_is_rejected() {
        let dram = Dram::new();
        dram.read64(0x101);
    }

    #[test]
    fn test_instruction_text_is_zero_padded() {
        let mut dram = Dram::new();
        dram.write_inst(0x200, "mov $0x1,%rax");
        assert_eq!(dram.read_inst(0x200), "mov $0x1,%rax");
        // the slot after the text must be zeroed, not leftover bytes
        dram.write_inst(0x200, "ret");
        assert_eq!(dram.read_inst(0x200), "ret");
        assert_eq!(dram.read8(0x200 + 3), 0);
    }

    #[test]
    fn test_bus_moves_whole_aligned_lines() {
        let mut dram = Dram::new();
        let mut block = [0u8; LINE_SIZE];
        for (i, b) in block.iter_mut().enumerate() {
            *b = i as u8;
        }
        // an address in the middle of the line still transfers the aligned line
        dram.bus_write_line(0x3f, &block);
        let mut readback = [0u8; LINE_SIZE];
        dram.bus_read_line(0x00, &mut readback);
        assert_eq!(readback, block);
    }
}
