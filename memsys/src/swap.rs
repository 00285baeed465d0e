//! The persistent swap store backing virtual pages when DRAM is exhausted.
//!
//! Each swapped-out page lives in its own record, keyed by an opaque disk
//! address. A record is a text file of [`SWAP_PAGE_WORDS`] newline-delimited
//! `0x`-prefixed 16-digit hexadecimal words, one per 8 page bytes
//! (little-endian). Semantically this is just a page-granularity key→bytes
//! store; the text format makes swapped pages easy to inspect by hand.
//!
//! A record that has never been stored reads back as a zero page. This keeps
//! the eviction path uniform: a clean page can be dropped without ever having
//! been written back, and faulting it in again yields the zeros it held.

use crate::addr::PAGE_SIZE;
use std::fs;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use thiserror::Error;

/// Opaque key of one page-sized record in the swap store.
pub type DiskAddr = u64;

/// How many 8-byte words one swap record holds
pub const SWAP_PAGE_WORDS: usize = PAGE_SIZE / 8;

/// The error returned when the swap store cannot load or store a record.
#[derive(Debug, Error)]
pub enum SwapError {
    #[error("swap record {daddr} is corrupt: bad word {word:?}")]
    CorruptRecord { daddr: DiskAddr, word: String },
    #[error("swap store io failure: {0}")]
    Io(#[from] io::Error),
}

/// A directory-backed store of page images, one file per disk address.
pub struct SwapStore {
    dir: PathBuf,
    next_daddr: DiskAddr,
}

impl SwapStore {
    /// Open (and create if needed) a swap store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SwapError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, next_daddr: 0 })
    }

    /// Reserve a fresh disk address that no record has been stored under yet.
    pub fn allocate(&mut self) -> DiskAddr {
        let daddr = self.next_daddr;
        self.next_daddr += 1;
        daddr
    }

    /// Persist `page` as the record at `daddr`, replacing any previous image.
    pub fn store(&mut self, daddr: DiskAddr, page: &[u8]) -> Result<(), SwapError> {
        assert_eq!(page.len(), PAGE_SIZE);
        let file = fs::File::create(self.record_path(daddr))?;
        let mut writer = BufWriter::new(file);
        for word in page.chunks_exact(8) {
            let value = u64::from_le_bytes(word.try_into().unwrap());
            writeln!(writer, "0x{value:016x}")?;
        }
        writer.flush()?;
        log::trace!("swapped out page to record {daddr}");
        Ok(())
    }

    /// Load the record at `daddr` into `page`.
    ///
    /// A record that was never stored loads as a zero page.
    pub fn load(&self, daddr: DiskAddr, page: &mut [u8]) -> Result<(), SwapError> {
        assert_eq!(page.len(), PAGE_SIZE);
        let file = match fs::File::open(self.record_path(daddr)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::trace!("swap record {daddr} never stored, loading zero page");
                page.fill(0);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let mut words = 0;
        for (line, out) in BufReader::new(file).lines().zip(page.chunks_exact_mut(8)) {
            let line = line?;
            let word = line.trim();
            let value = word
                .strip_prefix("0x")
                .and_then(|hex| u64::from_str_radix(hex, 16).ok())
                .ok_or_else(|| SwapError::CorruptRecord {
                    daddr,
                    word: word.to_owned(),
                })?;
            out.copy_from_slice(&value.to_le_bytes());
            words += 1;
        }
        if words != SWAP_PAGE_WORDS {
            return Err(SwapError::CorruptRecord {
                daddr,
                word: format!("only {words} of {SWAP_PAGE_WORDS} words"),
            });
        }
        log::trace!("swapped in page from record {daddr}");
        Ok(())
    }

    fn record_path(&self, daddr: DiskAddr) -> PathBuf {
        self.dir.join(format!("swap-{daddr}.txt"))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_store_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SwapStore::new(dir.path()).unwrap();

        let mut page = vec![0u8; PAGE_SIZE];
        for (i, b) in page.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let daddr = store.allocate();
        store.store(daddr, &page).unwrap();

        let mut loaded = vec![0xffu8; PAGE_SIZE];
        store.load(daddr, &mut loaded).unwrap();
        assert_eq!(loaded, page);
    }

    #[test]
    fn test_never_stored_record_loads_as_zero_page() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SwapStore::new(dir.path()).unwrap();

        let daddr = store.allocate();
        let mut page = vec![0xffu8; PAGE_SIZE];
        store.load(daddr, &mut page).unwrap();
        assert!(page.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_allocate_never_reuses_addresses() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SwapStore::new(dir.path()).unwrap();
        let a = store.allocate();
        let b = store.allocate();
        let c = store.allocate();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_truncated_record_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SwapStore::new(dir.path()).unwrap();
        let daddr = store.allocate();
        std::fs::write(dir.path().join(format!("swap-{daddr}.txt")), "0x0000000000000001\n")
            .unwrap();

        let mut page = vec![0u8; PAGE_SIZE];
        match store.load(daddr, &mut page) {
            Err(SwapError::CorruptRecord { .. }) => {}
            other => panic!("expected corrupt record error, got {other:?}"),
        }
    }
}
