//! A software simulation of a CPU memory subsystem.
//!
//! The crate models the path a memory access takes below the instruction
//! cycle: a virtual address is translated through a [TLB](tlb::Tlb) and a
//! 4-level [page table](page_table::PageTables), page faults are resolved
//! against a fixed pool of [DRAM](dram::Dram) frames with a
//! [swap store](swap::SwapStore) as backing, and the resulting physical
//! address is accessed through a set-associative write-back
//! [SRAM cache](cache::SramCache).
//!
//! [`MemorySystem`] bundles all of these into one translation context and is
//! the intended entry point:
//!
//! ```
//! use memsys::MemorySystem;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let mut mem = MemorySystem::new(dir.path()).unwrap();
//!
//! let paddr = mem.translate(0x7fff_8000_1008);
//! mem.write64(paddr, 42);
//! assert_eq!(mem.read64(paddr), 42);
//! ```
//!
//! The data cache can be compiled out with `--no-default-features` (the
//! `sram-cache` feature), in which case accesses go straight to DRAM.

pub mod addr;
pub mod cache;
pub mod dram;
pub mod frame;
pub mod mmu;
pub mod page_table;
pub mod swap;
pub mod tlb;

pub use addr::{PAddr, VAddr};
pub use mmu::{AccessStats, MemorySystem};
pub use swap::SwapError;
