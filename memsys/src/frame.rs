//! The physical page descriptor table: one descriptor per DRAM frame.
//!
//! This is the reverse map of the page table. When the swap manager needs to
//! reclaim a frame it scans this table for a victim and follows the
//! descriptor's back-reference to detach the owning leaf entry. The page table
//! remains the authoritative owner of every mapping; descriptors only exist
//! for reverse lookup and replacement bookkeeping.

use crate::page_table::LeafRef;
use crate::swap::DiskAddr;

/// Replacement bookkeeping for one physical page frame.
///
/// Invariant: while `allocated` is set, the referenced leaf entry is present
/// and its frame number equals this descriptor's index in the table.
#[derive(Debug, Default)]
pub struct FrameDescriptor {
    pub allocated: bool,
    /// The frame content has been written since install and differs from its swap record
    pub dirty: bool,
    /// Ticks since this frame was installed. Monotonic; reset only on install,
    /// never on access, so comparisons measure least-recently-installed.
    pub recency: u64,
    /// Back-reference to the leaf entry currently mapped into this frame
    pub owner: Option<LeafRef>,
    /// The swap record bound to the resident page
    pub disk: Option<DiskAddr>,
}

/// The table of all frame descriptors, indexed by PPN.
pub struct FrameTable {
    frames: Vec<FrameDescriptor>,
}

impl FrameTable {
    /// Create a table of `frames` unallocated descriptors.
    pub fn new(frames: usize) -> Self {
        Self {
            frames: (0..frames).map(|_| FrameDescriptor::default()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn get(&self, ppn: u64) -> &FrameDescriptor {
        &self.frames[ppn as usize]
    }

    pub fn get_mut(&mut self, ppn: u64) -> &mut FrameDescriptor {
        &mut self.frames[ppn as usize]
    }

    /// Age every allocated frame by one tick.
    ///
    /// Called once per memory access; together with the reset on install this
    /// makes `recency` a least-recently-installed measure.
    pub fn tick(&mut self) {
        for frame in self.frames.iter_mut().filter(|f| f.allocated) {
            frame.recency += 1;
        }
    }

    /// How many frames are not currently backing any page
    pub fn free_frames(&self) -> usize {
        self.frames.iter().filter(|f| !f.allocated).count()
    }

    /// First replacement tier: any frame that is not allocated at all.
    pub fn find_free(&self) -> Option<u64> {
        self.frames
            .iter()
            .position(|f| !f.allocated)
            .map(|i| i as u64)
    }

    /// Second replacement tier: the longest-untouched clean frame.
    pub fn find_clean_victim(&self) -> Option<u64> {
        self.frames
            .iter()
            .enumerate()
            .filter(|(_, f)| f.allocated && !f.dirty)
            .max_by_key(|(_, f)| f.recency)
            .map(|(i, _)| i as u64)
    }

    /// Third replacement tier: the longest-untouched frame regardless of dirt.
    pub fn find_victim(&self) -> Option<u64> {
        self.frames
            .iter()
            .enumerate()
            .filter(|(_, f)| f.allocated)
            .max_by_key(|(_, f)| f.recency)
            .map(|(i, _)| i as u64)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::page_table::PageTables;

    fn leaf_ref(tables: &mut PageTables, index: usize) -> LeafRef {
        let node = tables.alloc_leaf().unwrap();
        LeafRef { node, index }
    }

    fn install(table: &mut FrameTable, ppn: u64, owner: LeafRef) {
        let frame = table.get_mut(ppn);
        frame.allocated = true;
        frame.dirty = false;
        frame.recency = 0;
        frame.owner = Some(owner);
        frame.disk = Some(ppn);
    }

    #[test]
    fn test_free_frames_are_found_before_any_victim() {
        let mut tables = PageTables::new();
        let mut table = FrameTable::new(4);
        for ppn in 0..3 {
            let owner = leaf_ref(&mut tables, ppn as usize);
            install(&mut table, ppn, owner);
        }
        table.tick();
        assert_eq!(table.find_free(), Some(3));
    }

    #[test]
    fn test_clean_victim_is_least_recently_installed_clean_frame() {
        let mut tables = PageTables::new();
        let mut table = FrameTable::new(4);
        for ppn in 0..4 {
            let owner = leaf_ref(&mut tables, ppn as usize);
            install(&mut table, ppn, owner);
            table.tick();
        }
        // frame 0 is oldest but dirty, frame 1 is the oldest clean one
        table.get_mut(0).dirty = true;
        assert_eq!(table.find_free(), None);
        assert_eq!(table.find_clean_victim(), Some(1));
        assert_eq!(table.find_victim(), Some(0));
    }

    #[test]
    fn test_all_dirty_leaves_no_clean_victim() {
        let mut tables = PageTables::new();
        let mut table = FrameTable::new(2);
        for ppn in 0..2 {
            let owner = leaf_ref(&mut tables, ppn as usize);
            install(&mut table, ppn, owner);
            table.get_mut(ppn).dirty = true;
            table.tick();
        }
        assert_eq!(table.find_clean_victim(), None);
        assert_eq!(table.find_victim(), Some(0));
    }

    #[test]
    fn test_recency_only_grows_for_allocated_frames() {
        let mut tables = PageTables::new();
        let mut table = FrameTable::new(2);
        let owner = leaf_ref(&mut tables, 0);
        install(&mut table, 0, owner);
        table.tick();
        table.tick();
        assert_eq!(table.get(0).recency, 2);
        assert_eq!(table.get(1).recency, 0);
    }
}
