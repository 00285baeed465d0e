//! The translation lookaside buffer: a small set-associative cache of recent
//! VPN→PPN translations, consulted before the page table walk.
//!
//! A TLB line is a pure cache of an already-durable mapping, so eviction never
//! writes anything back. When no invalid line is available in a set, the
//! victim is chosen by a rotating hand. That choice is a simplification and
//! deliberately not a documented policy: callers must not rely on any
//! particular line surviving an install.

use crate::addr::{self, VAddr};

pub const TLB_INDEX_BITS: u64 = 2;

/// Number of sets in the TLB
pub const TLB_SETS: usize = 1 << TLB_INDEX_BITS;

/// Associativity of the TLB
pub const TLB_LINES_PER_SET: usize = 4;

#[derive(Copy, Clone, Default)]
struct TlbLine {
    valid: bool,
    tag: u64,
    ppn: u64,
}

/// The TLB of one translation context.
pub struct Tlb {
    sets: [[TlbLine; TLB_LINES_PER_SET]; TLB_SETS],
    /// Rotating victim hand for sets with no invalid line
    hand: usize,
}

#[inline]
fn split_vpn(vaddr: VAddr) -> (u64, usize) {
    let vpn = addr::vpn(vaddr);
    let index = (vpn & ((1 << TLB_INDEX_BITS) - 1)) as usize;
    let tag = vpn >> TLB_INDEX_BITS;
    (tag, index)
}

impl Tlb {
    /// Create a TLB with all lines invalid.
    pub fn new() -> Self {
        Self {
            sets: [[TlbLine::default(); TLB_LINES_PER_SET]; TLB_SETS],
            hand: 0,
        }
    }

    /// Look up the frame number for the page containing `vaddr`.
    pub fn lookup(&self, vaddr: VAddr) -> Option<u64> {
        let (tag, index) = split_vpn(vaddr);
        self.sets[index]
            .iter()
            .find(|line| line.valid && line.tag == tag)
            .map(|line| line.ppn)
    }

    /// Cache the translation of the page containing `vaddr` to frame `ppn`.
    ///
    /// Picks a free line in the page's set if one exists, otherwise evicts an
    /// arbitrary line.
    pub fn install(&mut self, vaddr: VAddr, ppn: u64) {
        let (tag, index) = split_vpn(vaddr);
        let set = &mut self.sets[index];

        let slot = match set.iter().position(|line| !line.valid) {
            Some(free) => free,
            None => {
                self.hand = self.hand.wrapping_add(1);
                self.hand % TLB_LINES_PER_SET
            }
        };
        log::trace!("tlb install vpn {:#x} -> ppn {ppn} (set {index})", addr::vpn(vaddr));
        set[slot] = TlbLine {
            valid: true,
            tag,
            ppn,
        };
    }

    /// Drop every cached translation that targets frame `ppn`.
    ///
    /// Called when the swap manager reclaims a frame; the old translation
    /// would otherwise keep resolving to a frame that now holds another page.
    pub fn invalidate_frame(&mut self, ppn: u64) {
        for set in self.sets.iter_mut() {
            for line in set.iter_mut().filter(|l| l.valid && l.ppn == ppn) {
                line.valid = false;
            }
        }
    }
}

impl Default for Tlb {
    fn default() -> Self {
        Self::new()
    }
}
