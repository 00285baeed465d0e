//! The memory-system context: translation entry point, page table walk and
//! page fault handling.
//!
//! One [`MemorySystem`] bundles everything a single translation context
//! mutates: the page table arenas and root handle, the frame descriptor
//! table, the TLB, the SRAM cache, DRAM and the swap store. No state lives
//! in globals. The whole subsystem is synchronous and single-threaded:
//! it is invoked once per memory access from the instruction cycle and never
//! suspends.
//!
//! Missing mappings are not errors. [`MemorySystem::translate`] resolves a
//! TLB miss by walking the page table and resolves a missing leaf by paging
//! the frame in, so it always returns a physical address; only invariant
//! violations (no root configured, an empty frame table, an exhausted node
//! arena) abort the simulation.

use crate::addr::{self, PAddr, VAddr, PHYS_FRAMES, PT_LEVELS};
use crate::cache::SramCache;
use crate::dram::Dram;
use crate::frame::FrameTable;
use crate::page_table::{LeafRef, NextLevel, PageTables};
use crate::swap::{DiskAddr, SwapError, SwapStore};
use crate::tlb::Tlb;
use std::path::PathBuf;

/// Counters observing how accesses were resolved.
#[derive(Debug, Default, Clone)]
pub struct AccessStats {
    pub tlb_hits: u64,
    pub tlb_misses: u64,
    pub page_faults: u64,
    pub swap_ins: u64,
    pub swap_outs: u64,
}

/// The complete simulated memory subsystem of one CPU core.
pub struct MemorySystem {
    dram: Dram,
    cache: SramCache,
    tlb: Tlb,
    tables: PageTables,
    frames: FrameTable,
    swap: SwapStore,
    stats: AccessStats,
}

impl MemorySystem {
    /// Create a memory system with empty DRAM, a fresh root page table and a
    /// swap store rooted at `swap_dir`.
    pub fn new(swap_dir: impl Into<PathBuf>) -> Result<Self, SwapError> {
        let swap = SwapStore::new(swap_dir)?;
        let mut tables = PageTables::new();
        let root = tables
            .alloc_interior()
            .expect("page table node arena cannot hold a root");
        tables.set_root(root);
        Ok(Self {
            dram: Dram::new(),
            cache: SramCache::new(),
            tlb: Tlb::new(),
            tables,
            frames: FrameTable::new(PHYS_FRAMES),
            swap,
            stats: AccessStats::default(),
        })
    }

    /// Translate a virtual address into the physical address it currently
    /// maps to, faulting the page in if necessary.
    ///
    /// This is the sole translation entry point for the CPU front end. It
    /// either returns a valid physical address or panics on an invariant
    /// violation; no error value ever propagates to the caller.
    pub fn translate(&mut self, vaddr: VAddr) -> PAddr {
        self.frames.tick();

        if let Some(ppn) = self.tlb.lookup(vaddr) {
            self.stats.tlb_hits += 1;
            return addr::paddr_from_ppn(ppn, addr::page_offset(vaddr));
        }
        self.stats.tlb_misses += 1;

        let paddr = self.page_walk(vaddr);
        self.tlb.install(vaddr, addr::ppn(paddr));
        paddr
    }

    /// Walk the 4-level hierarchy for `vaddr`, growing it and resolving a
    /// leaf fault along the way.
    fn page_walk(&mut self, vaddr: VAddr) -> PAddr {
        let segments = addr::vpn_segments(vaddr);
        log::trace!("page walk for {vaddr:#x}, segments {segments:?}");

        // levels 1 and 2: descend through interior nodes, allocating cold
        // subtrees on demand. An allocated-but-empty subtree cannot contain a
        // valid leaf mapping, so this path always continues toward a fault.
        let mut node = self.tables.root();
        for &segment in &segments[..PT_LEVELS - 2] {
            node = match self.tables.interior(node).entries[segment].next_level() {
                Some(NextLevel::Interior(child)) => child,
                Some(NextLevel::Leaf(_)) => {
                    panic!("leaf page table node linked above the leaf level")
                }
                None => {
                    let child = self
                        .tables
                        .alloc_interior()
                        .expect("page table node arena exhausted");
                    self.tables.interior_mut(node).entries[segment]
                        .set_next(NextLevel::Interior(child));
                    child
                }
            };
        }

        // level 3: the entry points at a leaf node
        let segment = segments[PT_LEVELS - 2];
        let leaf_node = match self.tables.interior(node).entries[segment].next_level() {
            Some(NextLevel::Leaf(child)) => child,
            Some(NextLevel::Interior(_)) => {
                panic!("interior page table node linked at the leaf level")
            }
            None => {
                let child = self
                    .tables
                    .alloc_leaf()
                    .expect("page table node arena exhausted");
                self.tables.interior_mut(node).entries[segment].set_next(NextLevel::Leaf(child));
                child
            }
        };

        // level 4: the leaf entry maps the page or faults
        let leaf = LeafRef {
            node: leaf_node,
            index: segments[PT_LEVELS - 1],
        };
        if !self.tables.leaf_entry(leaf).is_present() {
            self.handle_fault(leaf, vaddr);
        }

        let ppn = self
            .tables
            .leaf_entry(leaf)
            .ppn()
            .expect("page fault handler returned without installing a frame");
        addr::paddr_from_ppn(ppn, addr::page_offset(vaddr))
    }

    /// Resolve a fault on `leaf`, whose page containing `vaddr` is not
    /// resident, by claiming or reclaiming a physical frame for it.
    fn handle_fault(&mut self, leaf: LeafRef, vaddr: VAddr) {
        debug_assert!(!self.tables.leaf_entry(leaf).is_present());
        assert!(
            !self.frames.is_empty(),
            "page fault with an empty frame descriptor table"
        );
        self.stats.page_faults += 1;

        let daddr = self.bind_disk_slot(leaf);

        // tier 1: an unallocated frame. Freshly claimed frames start zeroed;
        // no swap traffic happens on this tier. Raw physical writes may have
        // left cache lines over the frame, so it gets the same flush as a
        // reclaimed one.
        if let Some(ppn) = self.frames.find_free() {
            log::debug!("page fault at {vaddr:#x}: claiming free frame {ppn}");
            self.cache.flush_frame(&mut self.dram, ppn);
            self.dram.frame_mut(ppn).fill(0);
            self.install_mapping(leaf, ppn, daddr);
            return;
        }

        // tier 2: the longest-untouched clean frame, reclaimable without
        // write-back. Tier 3: no clean frame exists, so the globally
        // longest-untouched one is written back first.
        let ppn = match self.frames.find_clean_victim() {
            Some(ppn) => {
                log::debug!("page fault at {vaddr:#x}: reclaiming clean frame {ppn}");
                self.cache.flush_frame(&mut self.dram, ppn);
                ppn
            }
            None => {
                let ppn = self
                    .frames
                    .find_victim()
                    .expect("frame table exhausted but holds no victim");
                log::debug!("page fault at {vaddr:#x}: writing back dirty frame {ppn}");
                self.cache.flush_frame(&mut self.dram, ppn);
                let victim_daddr = self
                    .frames
                    .get(ppn)
                    .disk
                    .expect("resident frame without a bound swap record");
                self.swap
                    .store(victim_daddr, self.dram.frame(ppn))
                    .expect("swap store write-back failed");
                self.stats.swap_outs += 1;
                ppn
            }
        };
        self.detach_frame(ppn);

        // load the faulting page's content into the reclaimed frame
        self.swap
            .load(daddr, self.dram.frame_mut(ppn))
            .expect("swap store load failed");
        self.stats.swap_ins += 1;
        self.install_mapping(leaf, ppn, daddr);
    }

    /// Disconnect frame `ppn` from its current owner: the owning leaf entry
    /// is pointed at the frame's swap record and the descriptor is freed.
    fn detach_frame(&mut self, ppn: u64) {
        let frame = self.frames.get_mut(ppn);
        debug_assert!(frame.allocated);
        let owner = frame
            .owner
            .take()
            .expect("allocated frame without an owning leaf entry");
        let daddr = frame
            .disk
            .take()
            .expect("allocated frame without a bound swap record");
        frame.allocated = false;
        frame.dirty = false;

        self.tables.leaf_entry_mut(owner).detach(daddr);
        // a stale translation must not keep resolving to this frame
        self.tlb.invalidate_frame(ppn);
    }

    /// Install the mapping `leaf` → frame `ppn`, backed by swap record `daddr`.
    ///
    /// The forward pointer (leaf entry) and the reverse pointer (frame
    /// descriptor) are updated here and only here, as one operation; callers
    /// never mutate the two sides piecemeal.
    fn install_mapping(&mut self, leaf: LeafRef, ppn: u64, daddr: DiskAddr) {
        self.tables.leaf_entry_mut(leaf).install_frame(ppn);

        let frame = self.frames.get_mut(ppn);
        frame.allocated = true;
        frame.dirty = false;
        frame.recency = 0;
        frame.owner = Some(leaf);
        frame.disk = Some(daddr);
    }

    /// The swap record backing the page behind `leaf`, allocating one the
    /// first time the page is mapped.
    ///
    /// Binding a record on install (rather than on first write-back) means a
    /// dirty eviction always has a destination.
    fn bind_disk_slot(&mut self, leaf: LeafRef) -> DiskAddr {
        match self.tables.leaf_entry(leaf).disk_addr() {
            Some(daddr) => daddr,
            None => {
                let daddr = self.swap.allocate();
                log::debug!("bound swap record {daddr} to leaf {leaf:?}");
                daddr
            }
        }
    }

    /// Read an aligned little-endian `u64` from physical address `paddr`.
    ///
    /// Routed through the SRAM cache when the `sram-cache` feature is
    /// enabled, straight to DRAM otherwise.
    pub fn read64(&mut self, paddr: PAddr) -> u64 {
        assert_eq!(paddr % 8, 0, "unaligned 64-bit read at {paddr:#x}");
        if cfg!(feature = "sram-cache") {
            let mut value = 0u64;
            for i in 0..8 {
                value |= (self.cache.read(&mut self.dram, paddr + i) as u64) << (i * 8);
            }
            value
        } else {
            self.dram.read64(paddr)
        }
    }

    /// Write an aligned little-endian `u64` to physical address `paddr`,
    /// marking the containing frame (and its leaf entry) dirty.
    pub fn write64(&mut self, paddr: PAddr, data: u64) {
        assert_eq!(paddr % 8, 0, "unaligned 64-bit write at {paddr:#x}");
        if cfg!(feature = "sram-cache") {
            for i in 0..8 {
                self.cache
                    .write(&mut self.dram, paddr + i, (data >> (i * 8)) as u8);
            }
        } else {
            self.dram.write64(paddr, data);
        }
        self.mark_frame_dirty(addr::ppn(paddr));
    }

    /// Read the fixed-width instruction text at `paddr`.
    ///
    /// The instruction fetch path bypasses the data cache.
    pub fn read_inst(&self, paddr: PAddr) -> String {
        self.dram.read_inst(paddr)
    }

    /// Store fixed-width instruction text at `paddr`, for the loader.
    pub fn write_inst(&mut self, paddr: PAddr, text: &str) {
        self.dram.write_inst(paddr, text);
        self.mark_frame_dirty(addr::ppn(paddr));
    }

    fn mark_frame_dirty(&mut self, ppn: u64) {
        let frame = self.frames.get_mut(ppn);
        if !frame.allocated {
            // raw physical writes below the translation layer (e.g. the
            // loader filling DRAM before paging starts) track no dirt
            return;
        }
        frame.dirty = true;
        let owner = frame
            .owner
            .expect("allocated frame without an owning leaf entry");
        self.tables.leaf_entry_mut(owner).mark_dirty();
    }

    /// Counters of how accesses have been resolved so far
    pub fn stats(&self) -> &AccessStats {
        &self.stats
    }

    /// How many physical frames are not currently backing any page
    pub fn free_frames(&self) -> usize {
        self.frames.free_frames()
    }
}
