//! The SRAM data cache: set-associative, write-back, write-allocate.
//!
//! The cache sits between translated physical addresses and DRAM and moves
//! whole lines of [`LINE_SIZE`] bytes across the bus; single bytes never
//! travel alone. Writes always land in the cache and reach DRAM only when a
//! dirty line is evicted.
//!
//! Replacement is LRU via an explicit per-line recency counter: every access
//! ages all lines of the touched set by one tick and resets the line it hits
//! to zero, so the line with the largest counter is the one longest unused.
//! The aging pass doubles as the victim search: it records the first invalid
//! line (cold-miss target) and the largest-recency line (eviction candidate)
//! in the same sweep. That is an efficiency choice, not a correctness
//! requirement.

use crate::addr::{self, PAddr, CACHE_SETS, LINES_PER_SET, LINE_SIZE};
use crate::dram::Dram;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
enum LineState {
    Invalid,
    Clean,
    Dirty,
}

#[derive(Copy, Clone)]
struct CacheLine {
    state: LineState,
    tag: u64,
    recency: u64,
    block: [u8; LINE_SIZE],
}

impl CacheLine {
    const INVALID: Self = Self {
        state: LineState::Invalid,
        tag: 0,
        recency: 0,
        block: [0; LINE_SIZE],
    };
}

struct CacheSet {
    lines: [CacheLine; LINES_PER_SET],
}

/// The SRAM data cache of one core.
pub struct SramCache {
    sets: Box<[CacheSet]>,
}

impl SramCache {
    /// Create a cache with all lines invalid.
    pub fn new() -> Self {
        let sets = (0..CACHE_SETS)
            .map(|_| CacheSet {
                lines: [CacheLine::INVALID; LINES_PER_SET],
            })
            .collect();
        Self { sets }
    }

    /// Read the byte at physical address `paddr` through the cache.
    ///
    /// A miss fetches the containing line from DRAM, evicting (and writing
    /// back if dirty) the LRU line of the set when no invalid line is free.
    pub fn read(&mut self, dram: &mut Dram, paddr: PAddr) -> u8 {
        let tag = addr::cache_tag(paddr);
        let index = addr::cache_index(paddr);
        let offset = addr::cache_offset(paddr);

        let (invalid, victim) = Self::age_and_scan(&mut self.sets[index]);

        // try cache hit
        if let Some(line) = self.sets[index]
            .lines
            .iter_mut()
            .find(|l| l.state != LineState::Invalid && l.tag == tag)
        {
            line.recency = 0;
            return line.block[offset];
        }

        // cold miss: a free line takes the fetch
        let slot = match invalid {
            Some(slot) => slot,
            None => {
                self.evict(dram, index, victim);
                victim
            }
        };
        self.fill(dram, index, slot, paddr);
        self.sets[index].lines[slot].block[offset]
    }

    /// Write the byte at physical address `paddr` through the cache.
    ///
    /// Write-allocate: a miss first pulls the full line in, then mutates it in
    /// the cache; DRAM is only updated when the line is later evicted.
    pub fn write(&mut self, dram: &mut Dram, paddr: PAddr, data: u8) {
        let tag = addr::cache_tag(paddr);
        let index = addr::cache_index(paddr);
        let offset = addr::cache_offset(paddr);

        let (invalid, victim) = Self::age_and_scan(&mut self.sets[index]);

        // try cache hit
        if let Some(line) = self.sets[index]
            .lines
            .iter_mut()
            .find(|l| l.state != LineState::Invalid && l.tag == tag)
        {
            line.recency = 0;
            line.block[offset] = data;
            line.state = LineState::Dirty;
            return;
        }

        let slot = match invalid {
            Some(slot) => slot,
            None => {
                self.evict(dram, index, victim);
                victim
            }
        };
        self.fill(dram, index, slot, paddr);
        let line = &mut self.sets[index].lines[slot];
        line.block[offset] = data;
        line.state = LineState::Dirty;
    }

    /// Write back and invalidate every line holding bytes of frame `ppn`.
    ///
    /// The swap manager calls this before reclaiming a frame so that the swap
    /// record sees the frame's current bytes and no line keeps serving data
    /// that now belongs to another page.
    pub fn flush_frame(&mut self, dram: &mut Dram, ppn: u64) {
        for index in 0..CACHE_SETS {
            for slot in 0..LINES_PER_SET {
                let line = &self.sets[index].lines[slot];
                if line.state == LineState::Invalid {
                    continue;
                }
                let base = addr::paddr_from_cache_fields(line.tag, index);
                if addr::ppn(base) != ppn {
                    continue;
                }
                if line.state == LineState::Dirty {
                    dram.bus_write_line(base, &self.sets[index].lines[slot].block);
                }
                self.sets[index].lines[slot].state = LineState::Invalid;
            }
        }
        log::debug!("flushed cache lines of frame {ppn}");
    }

    /// Age all lines of `set` by one tick and report the first invalid line
    /// and the LRU victim candidate in the same pass.
    fn age_and_scan(set: &mut CacheSet) -> (Option<usize>, usize) {
        let mut invalid = None;
        let mut victim = 0;
        let mut max_recency = 0;
        for (slot, line) in set.lines.iter_mut().enumerate() {
            line.recency += 1;
            if line.recency > max_recency {
                max_recency = line.recency;
                victim = slot;
            }
            if invalid.is_none() && line.state == LineState::Invalid {
                invalid = Some(slot);
            }
        }
        (invalid, victim)
    }

    /// Write the line in `slot` back to DRAM if dirty and mark it invalid.
    fn evict(&mut self, dram: &mut Dram, index: usize, slot: usize) {
        let line = &self.sets[index].lines[slot];
        if line.state == LineState::Dirty {
            // the line's own address, not the address that triggered eviction
            let base = addr::paddr_from_cache_fields(line.tag, index);
            log::trace!("cache write-back of dirty line at {base:#x}");
            dram.bus_write_line(base, &self.sets[index].lines[slot].block);
        }
        self.sets[index].lines[slot].state = LineState::Invalid;
    }

    /// Fetch the line containing `paddr` from DRAM into `slot`.
    fn fill(&mut self, dram: &mut Dram, index: usize, slot: usize, paddr: PAddr) {
        let line = &mut self.sets[index].lines[slot];
        dram.bus_read_line(paddr, &mut line.block);
        line.state = LineState::Clean;
        line.tag = addr::cache_tag(paddr);
        line.recency = 0;
        log::trace!("cache fill of line at {:#x}", addr::line_base(paddr));
    }
}

impl Default for SramCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// A physical address with the given cache tag, landing in set 0.
    fn tagged(tag: u64, offset: u64) -> PAddr {
        addr::paddr_from_cache_fields(tag, 0) | offset
    }

    #[test]
    fn test_read_after_write_returns_written_byte() {
        let mut dram = Dram::new();
        let mut cache = SramCache::new();
        cache.write(&mut dram, 0x123, 0xab);
        assert_eq!(cache.read(&mut dram, 0x123), 0xab);
    }

    #[test]
    fn test_writes_stay_out_of_dram_until_eviction() {
        let mut dram = Dram::new();
        let mut cache = SramCache::new();
        cache.write(&mut dram, 0x40, 0x77);
        // write-back: DRAM still holds the old byte
        assert_eq!(dram.read8(0x40), 0x00);
        assert_eq!(cache.read(&mut dram, 0x40), 0x77);
    }

    #[test]
    fn test_dirty_eviction_writes_line_back() {
        let mut dram = Dram::new();
        let mut cache = SramCache::new();

        // dirty every line of set 0 with a distinct tag
        for tag in 0..LINES_PER_SET as u64 {
            cache.write(&mut dram, tagged(tag, 0), 0xa0 + tag as u8);
        }
        // one more tag in the same set forces a dirty eviction
        cache.read(&mut dram, tagged(LINES_PER_SET as u64, 0));

        // exactly one of the dirtied lines must now be visible in DRAM
        let written_back = (0..LINES_PER_SET as u64)
            .filter(|&tag| dram.read8(tagged(tag, 0)) == 0xa0 + tag as u8)
            .count();
        assert_eq!(written_back, 1);
    }

    #[test]
    fn test_reads_never_dirty_a_line() {
        let mut dram = Dram::new();
        let mut cache = SramCache::new();
        dram.write8(0x80, 0x55);

        // fill set 0 beyond associativity with reads only
        for tag in 0..=LINES_PER_SET as u64 {
            cache.read(&mut dram, tagged(tag, 0));
        }
        // clean evictions must not have disturbed DRAM
        assert_eq!(dram.read8(0x80), 0x55);
    }

    #[test]
    fn test_lru_line_is_the_eviction_victim() {
        let mut dram = Dram::new();
        let mut cache = SramCache::new();

        for tag in 0..LINES_PER_SET as u64 {
            cache.write(&mut dram, tagged(tag, 0), 0x10 + tag as u8);
        }
        // touch tag 0 so tag 1 becomes the oldest line
        cache.read(&mut dram, tagged(0, 0));
        cache.read(&mut dram, tagged(LINES_PER_SET as u64, 0));

        // tag 1 was evicted: its dirty byte reached DRAM
        assert_eq!(dram.read8(tagged(1, 0)), 0x11);
        // tag 0 was not: its dirty byte is still cached only
        assert_eq!(dram.read8(tagged(0, 0)), 0x00, "tag 0 should not have been written back");
    }

    #[test]
    fn test_flush_frame_writes_dirty_lines_and_invalidates() {
        let mut dram = Dram::new();
        let mut cache = SramCache::new();
        cache.write(&mut dram, 0x1008, 0x9c);
        assert_eq!(dram.read8(0x1008), 0x00);

        cache.flush_frame(&mut dram, addr::ppn(0x1008));
        assert_eq!(dram.read8(0x1008), 0x9c);

        // overwrite DRAM behind the cache's back; an un-flushed line would hide it
        dram.write8(0x1008, 0x11);
        assert_eq!(cache.read(&mut dram, 0x1008), 0x11);
    }
}
