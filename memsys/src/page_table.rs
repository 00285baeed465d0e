//! The 4-level page table: entry formats and arena-backed node storage.
//!
//! Levels 1 through 3 hold [`InteriorEntry`]s whose present form points at the
//! next-level node; level 4 holds [`LeafEntry`]s whose present form carries a
//! physical frame number. Nodes live in fixed-capacity [`Arena`]s and are
//! referenced by integer [`Handle`]s rather than raw pointers, so a present
//! interior entry can never dangle. Nodes are allocated lazily on first fault
//! into a subtree and persist until the simulation is torn down.

use crate::addr::PTES_PER_NODE;
use crate::swap::DiskAddr;
use arena::{Arena, ArenaFull, Handle};
use bitflags::bitflags;
use core::fmt::{Debug, Formatter, Write};

/// Total number of page table nodes the hierarchy may allocate, per node kind.
///
/// Node allocation is unbounded in principle (every cold subtree grows the
/// tree), so the arenas cap it to keep the simulation bounded; exhausting the
/// cap is a configuration error and aborts the walk.
pub const PT_NODE_CAPACITY: usize = 256;

bitflags! {
    /// The flag bits stored in a page table entry
    #[derive(Copy, Clone, Eq, PartialEq)]
    pub struct EntryFlags: u8 {
        /// The entry maps something resident: a next-level node for interior
        /// entries, a physical frame for leaf entries
        const PRESENT = 1 << 0;
        /// Write access to the mapped page is not allowed.
        /// This bit is stored but deliberately not enforced by the simulator.
        const READ_ONLY = 1 << 1;
        /// The mapped page has been written since it was installed and its
        /// swap copy is stale
        const DIRTY = 1 << 2;
    }
}

impl Debug for EntryFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        fn write_bit(
            flags: EntryFlags,
            bit: EntryFlags,
            c: char,
            f: &mut Formatter<'_>,
        ) -> core::fmt::Result {
            if flags.contains(bit) {
                f.write_char(c)
            } else {
                f.write_char(' ')
            }
        }
        write_bit(*self, EntryFlags::DIRTY, 'D', f)?;
        write_bit(*self, EntryFlags::READ_ONLY, 'R', f)?;
        write_bit(*self, EntryFlags::PRESENT, 'P', f)?;
        Ok(())
    }
}

/// What a present interior entry points at.
///
/// Level-1 and level-2 entries point at further interior nodes; level-3
/// entries point at leaf nodes.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum NextLevel {
    Interior(Handle<InteriorNode>),
    Leaf(Handle<LeafNode>),
}

/// A page table entry of levels 1–3, mapping one VPN segment to the next-level node.
#[derive(Copy, Clone)]
pub struct InteriorEntry {
    flags: EntryFlags,
    next: Option<NextLevel>,
    /// Disk address of the swapped-out subtree when not present.
    /// Carried for completeness; the simulator never pages out interior nodes.
    disk: Option<DiskAddr>,
}

impl InteriorEntry {
    pub const EMPTY: Self = Self {
        flags: EntryFlags::empty(),
        next: None,
        disk: None,
    };

    pub fn is_present(&self) -> bool {
        self.flags.contains(EntryFlags::PRESENT)
    }

    /// The node this entry points at, if present.
    pub fn next_level(&self) -> Option<NextLevel> {
        if self.is_present() {
            self.next
        } else {
            None
        }
    }

    /// Point this entry at `next` and mark it present.
    pub fn set_next(&mut self, next: NextLevel) {
        self.flags.insert(EntryFlags::PRESENT);
        self.next = Some(next);
        self.disk = None;
    }
}

impl Default for InteriorEntry {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Debug for InteriorEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self.next_level() {
            None => write!(f, "InteriorEntry {{ absent }}"),
            Some(next) => write!(f, "InteriorEntry {{ {:?}, flags: {:?} }}", next, self.flags),
        }
    }
}

/// A level-4 page table entry, mapping one virtual page to a physical frame
/// (when present) or to a swap record (when swapped out).
#[derive(Copy, Clone)]
pub struct LeafEntry {
    flags: EntryFlags,
    ppn: Option<u64>,
    disk: Option<DiskAddr>,
}

impl LeafEntry {
    pub const EMPTY: Self = Self {
        flags: EntryFlags::empty(),
        ppn: None,
        disk: None,
    };

    pub fn is_present(&self) -> bool {
        self.flags.contains(EntryFlags::PRESENT)
    }

    pub fn is_dirty(&self) -> bool {
        self.flags.contains(EntryFlags::DIRTY)
    }

    /// The physical frame holding this page, if resident.
    pub fn ppn(&self) -> Option<u64> {
        if self.is_present() {
            self.ppn
        } else {
            None
        }
    }

    /// The swap record holding this page, if swapped out.
    pub fn disk_addr(&self) -> Option<DiskAddr> {
        if self.is_present() {
            None
        } else {
            self.disk
        }
    }

    /// Make this entry resident in frame `ppn`, clean.
    ///
    /// Only the swap manager may call this; it keeps the frame descriptor in
    /// sync as part of the same install operation.
    pub(crate) fn install_frame(&mut self, ppn: u64) {
        self.flags.insert(EntryFlags::PRESENT);
        self.flags.remove(EntryFlags::DIRTY);
        self.ppn = Some(ppn);
        self.disk = None;
    }

    /// Detach this entry from its frame, recording the swap record where the
    /// page can be found again.
    pub(crate) fn detach(&mut self, daddr: DiskAddr) {
        self.flags.remove(EntryFlags::PRESENT);
        self.flags.remove(EntryFlags::DIRTY);
        self.ppn = None;
        self.disk = Some(daddr);
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.flags.insert(EntryFlags::DIRTY);
    }
}

impl Default for LeafEntry {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Debug for LeafEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match (self.ppn(), self.disk_addr()) {
            (Some(ppn), _) => write!(f, "LeafEntry {{ ppn: {}, flags: {:?} }}", ppn, self.flags),
            (None, Some(daddr)) => write!(f, "LeafEntry {{ swapped out to {daddr} }}"),
            (None, None) => write!(f, "LeafEntry {{ never mapped }}"),
        }
    }
}

/// A page table node of levels 1–3.
pub struct InteriorNode {
    pub entries: [InteriorEntry; PTES_PER_NODE],
}

impl InteriorNode {
    /// Create a new empty node; all entries are absent.
    pub fn new() -> Self {
        Self {
            entries: [InteriorEntry::EMPTY; PTES_PER_NODE],
        }
    }
}

impl Default for InteriorNode {
    fn default() -> Self {
        Self::new()
    }
}

/// A level-4 page table node.
pub struct LeafNode {
    pub entries: [LeafEntry; PTES_PER_NODE],
}

impl LeafNode {
    /// Create a new empty node; all entries are absent and were never faulted in.
    pub fn new() -> Self {
        Self {
            entries: [LeafEntry::EMPTY; PTES_PER_NODE],
        }
    }
}

impl Default for LeafNode {
    fn default() -> Self {
        Self::new()
    }
}

/// Location of one leaf entry inside the hierarchy: the node that holds it and
/// the entry index inside that node.
///
/// This is the "weak reference" form the frame descriptor table stores to map
/// a physical frame back to its owning leaf entry.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct LeafRef {
    pub node: Handle<LeafNode>,
    pub index: usize,
}

/// The complete page table hierarchy of one translation context.
pub struct PageTables {
    interior: Arena<InteriorNode>,
    leaves: Arena<LeafNode>,
    root: Option<Handle<InteriorNode>>,
}

impl PageTables {
    /// Create an empty hierarchy with no root configured.
    pub fn new() -> Self {
        Self {
            interior: Arena::with_capacity(PT_NODE_CAPACITY),
            leaves: Arena::with_capacity(PT_NODE_CAPACITY),
            root: None,
        }
    }

    /// The root (directory) node of the hierarchy.
    ///
    /// # Panics
    /// Panics if no root has been configured. A missing root is a bug in
    /// whatever owns the CPU state, not a translation-time condition.
    pub fn root(&self) -> Handle<InteriorNode> {
        self.root
            .expect("translation requested but no root page table is configured")
    }

    /// Configure `root` as the directory node, the software analogue of
    /// loading a page table base register.
    pub fn set_root(&mut self, root: Handle<InteriorNode>) {
        self.root = Some(root);
    }

    /// Allocate a fresh zero-initialized interior node.
    pub fn alloc_interior(&mut self) -> Result<Handle<InteriorNode>, ArenaFull> {
        let handle = self.interior.alloc(InteriorNode::new())?;
        log::debug!("allocated interior page table node {handle:?}");
        Ok(handle)
    }

    /// Allocate a fresh zero-initialized leaf node.
    pub fn alloc_leaf(&mut self) -> Result<Handle<LeafNode>, ArenaFull> {
        let handle = self.leaves.alloc(LeafNode::new())?;
        log::debug!("allocated leaf page table node {handle:?}");
        Ok(handle)
    }

    pub fn interior(&self, handle: Handle<InteriorNode>) -> &InteriorNode {
        self.interior.get(handle)
    }

    pub fn interior_mut(&mut self, handle: Handle<InteriorNode>) -> &mut InteriorNode {
        self.interior.get_mut(handle)
    }

    pub fn leaf(&self, handle: Handle<LeafNode>) -> &LeafNode {
        self.leaves.get(handle)
    }

    pub fn leaf_mut(&mut self, handle: Handle<LeafNode>) -> &mut LeafNode {
        self.leaves.get_mut(handle)
    }

    /// The leaf entry `leaf` points at.
    pub fn leaf_entry(&self, leaf: LeafRef) -> &LeafEntry {
        &self.leaves.get(leaf.node).entries[leaf.index]
    }

    /// The leaf entry `leaf` points at, mutably.
    pub fn leaf_entry_mut(&mut self, leaf: LeafRef) -> &mut LeafEntry {
        &mut self.leaves.get_mut(leaf.node).entries[leaf.index]
    }

    /// How many nodes of either kind have been allocated so far
    pub fn allocated_nodes(&self) -> usize {
        self.interior.len() + self.leaves.len()
    }
}

impl Default for PageTables {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_fresh_nodes_have_only_absent_entries() {
        let mut tables = PageTables::new();
        let node = tables.alloc_interior().unwrap();
        assert!(tables.interior(node).entries.iter().all(|e| !e.is_present()));
        let leaf = tables.alloc_leaf().unwrap();
        assert!(tables.leaf(leaf).entries.iter().all(|e| !e.is_present()));
    }

    #[test]
    fn test_leaf_entry_lifecycle() {
        let mut entry = LeafEntry::EMPTY;
        assert!(!entry.is_present());
        assert_eq!(entry.ppn(), None);
        assert_eq!(entry.disk_addr(), None);

        entry.install_frame(3);
        assert!(entry.is_present());
        assert!(!entry.is_dirty());
        assert_eq!(entry.ppn(), Some(3));
        assert_eq!(entry.disk_addr(), None);

        entry.mark_dirty();
        assert!(entry.is_dirty());

        entry.detach(17);
        assert!(!entry.is_present());
        assert!(!entry.is_dirty());
        assert_eq!(entry.ppn(), None);
        assert_eq!(entry.disk_addr(), Some(17));

        // faulting back in consumes the swap binding
        entry.install_frame(5);
        assert_eq!(entry.ppn(), Some(5));
        assert_eq!(entry.disk_addr(), None);
    }

    #[test]
    fn test_interior_entry_points_at_child_once_set() {
        let mut tables = PageTables::new();
        let parent = tables.alloc_interior().unwrap();
        let child = tables.alloc_leaf().unwrap();

        assert_eq!(tables.interior(parent).entries[7].next_level(), None);
        tables.interior_mut(parent).entries[7].set_next(NextLevel::Leaf(child));
        assert_eq!(
            tables.interior(parent).entries[7].next_level(),
            Some(NextLevel::Leaf(child))
        );
    }

    #[test]
    #[should_panic(expected = "no root page table")]
    fn test_missing_root_is_fatal() {
        let tables = PageTables::new();
        tables.root();
    }
}
