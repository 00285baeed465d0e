//! Address-Layout Definitions for the Simulated Memory Subsystem
//!
//! # Virtual Addresses
//!
//! A virtual address is 48 bits wide, divided into 4 KiB pages and partitioned
//! as shown in the below figure. The four VPN (virtual page number) segments
//! index the four levels of the page table hierarchy, directory first.
//!
//! ```text
//! 47          39 38          30 29          21 20          12 11            0
//! ┌─────────────┬──────────────┬──────────────┬──────────────┬───────────────┐
//! │    VPN[1]   │    VPN[2]    │    VPN[3]    │    VPN[4]    │  page offset  │
//! └─────────────┴──────────────┴──────────────┴──────────────┴───────────────┘
//!     9bits          9bits          9bits          9bits           12bits
//! ```
//!
//! # Physical Addresses
//!
//! A physical address is 52 bits wide: a 40-bit PPN (physical page number)
//! followed by the untranslated 12-bit page offset. The data cache views the
//! same address through a different partitioning:
//!
//! ```text
//! 51                                           12 11            0
//! ┌──────────────────────────────────────────────┬───────────────┐
//! │                     PPN                      │  page offset  │
//! └──────────────────────────────────────────────┴───────────────┘
//! 51                              12 11         6 5              0
//! ┌─────────────────────────────────┬────────────┬───────────────┐
//! │            cache tag            │  set index │  line offset  │
//! └─────────────────────────────────┴────────────┴───────────────┘
//!              40bits                   6bits          6bits
//! ```
//!
//! All widths are simulator constants. Algorithm code never splits addresses
//! by hand; it goes through the helpers below so the layout can be changed in
//! one place.

use static_assertions::const_assert;
use static_assertions::const_assert_eq;

/// Type alias for virtual addresses.
///
/// This is used by functions that explicitly interpret addresses as virtual ones.
pub type VAddr = u64;

/// Type alias for physical addresses.
///
/// This is used by functions that explicitly interpret addresses as physical ones.
pub type PAddr = u64;

pub const PAGE_OFFSET_BITS: u64 = 12;
pub const PAGE_OFFSET_MASK: u64 = (1 << PAGE_OFFSET_BITS) - 1;

/// How many bytes one page holds
pub const PAGE_SIZE: usize = 1 << PAGE_OFFSET_BITS;

pub const VPN_SEGMENT_BITS: u64 = 9;
pub const VPN_SEGMENT_MASK: u64 = (1 << VPN_SEGMENT_BITS) - 1;

/// Number of page table levels (and therefore VPN segments in a virtual address)
pub const PT_LEVELS: usize = 4;

/// Number of entries a single page table node holds
pub const PTES_PER_NODE: usize = 1 << VPN_SEGMENT_BITS;

pub const PPN_BITS: u64 = 40;

/// Number of physical page frames backing the simulated DRAM
pub const PHYS_FRAMES: usize = 16;

/// Size of the simulated DRAM in bytes
pub const PHYS_MEMORY_SIZE: usize = PHYS_FRAMES * PAGE_SIZE;

pub const LINE_OFFSET_BITS: u64 = 6;

/// How many bytes one cache line (and one bus transfer) holds
pub const LINE_SIZE: usize = 1 << LINE_OFFSET_BITS;

pub const SET_INDEX_BITS: u64 = 6;

/// Number of sets in the SRAM data cache
pub const CACHE_SETS: usize = 1 << SET_INDEX_BITS;

/// Associativity of the SRAM data cache
pub const LINES_PER_SET: usize = 8;

// swap records store one page as 8-byte words
const_assert_eq!(PAGE_SIZE % 8, 0);
// a bus transfer must never straddle a page
const_assert!(LINE_SIZE <= PAGE_SIZE);
// every DRAM byte must be addressable through the PPN field
const_assert!((PHYS_FRAMES as u64) <= 1 << PPN_BITS);

/// Get the VPN segments of a virtual address, directory level first.
///
/// `vpn_segments(v)[0]` indexes the level-1 (directory) node of the page table
/// hierarchy, `vpn_segments(v)[PT_LEVELS - 1]` indexes the leaf node.
#[inline]
pub fn vpn_segments(vaddr: VAddr) -> [usize; PT_LEVELS] {
    let mut segments = [0; PT_LEVELS];
    for (i, segment) in segments.iter_mut().enumerate() {
        let shift = PAGE_OFFSET_BITS + (PT_LEVELS - 1 - i) as u64 * VPN_SEGMENT_BITS;
        *segment = ((vaddr >> shift) & VPN_SEGMENT_MASK) as usize;
    }
    segments
}

/// Get the full virtual page number of a virtual address
#[inline]
pub fn vpn(vaddr: VAddr) -> u64 {
    vaddr >> PAGE_OFFSET_BITS
}

/// Get the page offset of a virtual or physical address
#[inline]
pub fn page_offset(addr: u64) -> u64 {
    addr & PAGE_OFFSET_MASK
}

/// Compose a physical address from a frame number and a within-frame offset
#[inline]
pub fn paddr_from_ppn(ppn: u64, offset: u64) -> PAddr {
    debug_assert_eq!(offset & !PAGE_OFFSET_MASK, 0);
    (ppn << PAGE_OFFSET_BITS) | offset
}

/// Get the physical page number of a physical address
#[inline]
pub fn ppn(paddr: PAddr) -> u64 {
    paddr >> PAGE_OFFSET_BITS
}

/// Get the cache tag field of a physical address
#[inline]
pub fn cache_tag(paddr: PAddr) -> u64 {
    paddr >> (SET_INDEX_BITS + LINE_OFFSET_BITS)
}

/// Get the cache set index field of a physical address
#[inline]
pub fn cache_index(paddr: PAddr) -> usize {
    ((paddr >> LINE_OFFSET_BITS) & ((1 << SET_INDEX_BITS) - 1)) as usize
}

/// Get the within-line offset field of a physical address
#[inline]
pub fn cache_offset(paddr: PAddr) -> usize {
    (paddr & ((1 << LINE_OFFSET_BITS) - 1)) as usize
}

/// Get the physical address of the first byte of the cache line containing `paddr`
#[inline]
pub fn line_base(paddr: PAddr) -> PAddr {
    (paddr >> LINE_OFFSET_BITS) << LINE_OFFSET_BITS
}

/// Reconstruct a line-aligned physical address from its cache tag and set index fields
#[inline]
pub fn paddr_from_cache_fields(tag: u64, index: usize) -> PAddr {
    (tag << (SET_INDEX_BITS + LINE_OFFSET_BITS)) | ((index as u64) << LINE_OFFSET_BITS)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_vpn_segments_are_extracted_in_walk_order() {
        // segments 0x001, 0x002, 0x003, 0x004 and offset 0xabc
        let vaddr: VAddr = (1 << 39) | (2 << 30) | (3 << 21) | (4 << 12) | 0xabc;
        assert_eq!(vpn_segments(vaddr), [1, 2, 3, 4]);
        assert_eq!(page_offset(vaddr), 0xabc);
    }

    #[test]
    fn test_paddr_composition_roundtrips() {
        let paddr = paddr_from_ppn(0xf, 0x123);
        assert_eq!(ppn(paddr), 0xf);
        assert_eq!(page_offset(paddr), 0x123);
    }

    #[test]
    fn test_cache_fields_partition_the_address() {
        let paddr: PAddr = (0x5a << 12) | (0x2b << 6) | 0x11;
        assert_eq!(cache_tag(paddr), 0x5a);
        assert_eq!(cache_index(paddr), 0x2b);
        assert_eq!(cache_offset(paddr), 0x11);
        assert_eq!(line_base(paddr), paddr - 0x11);
        assert_eq!(
            paddr_from_cache_fields(cache_tag(paddr), cache_index(paddr)),
            line_base(paddr)
        );
    }
}
