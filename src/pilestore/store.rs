use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::config::BuildOptions;
use crate::message;
use crate::pbfformat::{pack_file_block, read_file_block_at};
use crate::utils::{Error, Result};

const BLOCK_NAME: &str = "PileData";

struct PileBuffer {
    pending: Vec<u8>,
    blocks: Vec<u64>,
}

struct PileFile {
    fname: String,
    file: Mutex<File>,
    keep: bool,
}

/// Append-only byte log per pile.
///
/// Every pile has its own buffer behind its own lock, so appends to
/// different piles never wait on each other. Once a pile's buffer reaches
/// the block size it is packed as a (optionally zlib compressed) file block
/// and written to the end of the shared data file; only that write holds
/// the file lock. `load` returns the blocks followed by whatever is still
/// buffered, which is everything ever appended, in append order.
pub struct PileStore {
    piles: Vec<Mutex<PileBuffer>>,
    file: Option<PileFile>,
    block_size: usize,
    compress: bool,
    total: AtomicU64,
}

impl PileStore {
    /// Keeps everything in memory. Piles are numbered from 1 to
    /// `num_piles`.
    pub fn in_memory(num_piles: usize) -> PileStore {
        PileStore::with_file(num_piles, None, usize::MAX, false)
    }

    /// Stores piles in `fname`, which is created (or truncated) now and
    /// removed when the store is dropped unless `keep` is set.
    pub fn create(
        fname: &str,
        num_piles: usize,
        block_size: usize,
        compress: bool,
        keep: bool,
    ) -> Result<PileStore> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(fname)?;
        Ok(PileStore::with_file(
            num_piles,
            Some(PileFile {
                fname: String::from(fname),
                file: Mutex::new(file),
                keep,
            }),
            usize::max(block_size, 1),
            compress,
        ))
    }

    /// In memory without `fname`, otherwise a data file laid out as
    /// `options` asks.
    pub fn from_options(
        fname: Option<&str>,
        num_piles: usize,
        options: &BuildOptions,
    ) -> Result<PileStore> {
        match fname {
            None => Ok(PileStore::in_memory(num_piles)),
            Some(fname) => PileStore::create(
                fname,
                num_piles,
                options.pile_block_size,
                options.compress_blocks,
                options.keep_temps,
            ),
        }
    }

    fn with_file(
        num_piles: usize,
        file: Option<PileFile>,
        block_size: usize,
        compress: bool,
    ) -> PileStore {
        let mut piles = Vec::with_capacity(num_piles);
        for _ in 0..num_piles {
            piles.push(Mutex::new(PileBuffer {
                pending: Vec::new(),
                blocks: Vec::new(),
            }));
        }
        PileStore {
            piles,
            file,
            block_size,
            compress,
            total: AtomicU64::new(0),
        }
    }

    pub fn pile_count(&self) -> usize {
        self.piles.len()
    }

    /// Total bytes appended so far, before compression.
    pub fn total_bytes(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    fn lock_pile(&self, pile: u32) -> Result<MutexGuard<PileBuffer>> {
        if pile == 0 || pile as usize > self.piles.len() {
            return Err(Error::PileStore(format!(
                "pile {} out of range 1..={}",
                pile,
                self.piles.len()
            )));
        }
        match self.piles[pile as usize - 1].lock() {
            Ok(g) => Ok(g),
            Err(_) => Err(Error::PileStore(format!("pile {} lock poisoned", pile))),
        }
    }

    fn lock_file<'a>(&self, pf: &'a PileFile) -> Result<MutexGuard<'a, File>> {
        match pf.file.lock() {
            Ok(g) => Ok(g),
            Err(_) => Err(Error::PileStore(format!("{} lock poisoned", pf.fname))),
        }
    }

    pub fn append(&self, pile: u32, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let mut buf = self.lock_pile(pile)?;
        buf.pending.extend_from_slice(data);
        self.total.fetch_add(data.len() as u64, Ordering::Relaxed);
        if buf.pending.len() >= self.block_size {
            self.flush_buffer(&mut buf)?;
        }
        Ok(())
    }

    fn flush_buffer(&self, buf: &mut PileBuffer) -> Result<()> {
        let pf = match &self.file {
            Some(pf) => pf,
            None => {
                return Ok(());
            }
        };
        if buf.pending.is_empty() {
            return Ok(());
        }
        let packed = pack_file_block(BLOCK_NAME, &buf.pending, self.compress)?;
        let pos = {
            let mut f = self.lock_file(pf)?;
            let pos = f.seek(SeekFrom::End(0))?;
            f.write_all(&packed)?;
            pos
        };
        buf.blocks.push(pos);
        buf.pending.clear();
        Ok(())
    }

    /// Writes every buffered pile out to the data file.
    pub fn flush(&self) -> Result<()> {
        for i in 0..self.piles.len() {
            let mut buf = self.lock_pile(i as u32 + 1)?;
            self.flush_buffer(&mut buf)?;
        }
        Ok(())
    }

    /// Everything appended to `pile`, in append order.
    pub fn load(&self, pile: u32) -> Result<Vec<u8>> {
        let buf = self.lock_pile(pile)?;
        let mut res = Vec::new();
        if let Some(pf) = &self.file {
            for pos in &buf.blocks {
                let fb = {
                    let mut f = self.lock_file(pf)?;
                    read_file_block_at(&mut *f, *pos)?
                };
                if fb.block_type != BLOCK_NAME {
                    return Err(Error::PileStore(format!(
                        "unexpected block {:?} at {} for pile {}",
                        fb.block_type, pos, pile
                    )));
                }
                res.extend(fb.data()?);
            }
        }
        res.extend_from_slice(&buf.pending);
        Ok(res)
    }

    /// Number of file blocks written for `pile`.
    pub fn block_count(&self, pile: u32) -> Result<usize> {
        Ok(self.lock_pile(pile)?.blocks.len())
    }
}

impl Drop for PileStore {
    fn drop(&mut self) {
        if let Some(pf) = &self.file {
            if !pf.keep {
                if let Err(e) = std::fs::remove_file(&pf.fname) {
                    message!("failed to remove {}: {:?}", pf.fname, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_in_memory() {
        let store = PileStore::in_memory(3);
        store.append(1, b"abc").unwrap();
        store.append(3, b"xyz").unwrap();
        store.append(1, b"def").unwrap();
        assert_eq!(store.load(1).unwrap(), b"abcdef".to_vec());
        assert_eq!(store.load(2).unwrap(), Vec::<u8>::new());
        assert_eq!(store.total_bytes(), 9);
        assert_eq!(store.pile_count(), 3);
        assert!(store.append(0, b"a").is_err());
        assert!(store.append(4, b"a").is_err());
        assert!(store.load(4).is_err());
    }

    #[test]
    fn test_file_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let fname = dir.path().join("piles.dat");
        let fname = fname.to_str().unwrap();
        {
            let store = PileStore::create(fname, 2, 8, true, false).unwrap();
            store.append(1, b"0123456789").unwrap();
            store.append(2, b"ab").unwrap();
            store.append(1, b"xy").unwrap();
            assert_eq!(store.block_count(1).unwrap(), 1);
            assert_eq!(store.block_count(2).unwrap(), 0);
            assert_eq!(store.load(1).unwrap(), b"0123456789xy".to_vec());
            store.flush().unwrap();
            assert_eq!(store.block_count(1).unwrap(), 2);
            assert_eq!(store.load(1).unwrap(), b"0123456789xy".to_vec());
            assert_eq!(store.load(2).unwrap(), b"ab".to_vec());
        }
        assert!(!std::path::Path::new(fname).exists());
    }

    #[test]
    fn test_from_options() {
        let dir = tempfile::tempdir().unwrap();
        let fname = dir.path().join("piles.dat");
        let fname = fname.to_str().unwrap();

        let mut opts = BuildOptions::default();
        opts.pile_block_size = 4;
        opts.compress_blocks = false;
        opts.keep_temps = true;
        {
            let store = PileStore::from_options(Some(fname), 2, &opts).unwrap();
            store.append(2, b"abcdefghij").unwrap();
            store.append(2, b"klmn").unwrap();
            assert_eq!(store.block_count(2).unwrap(), 2);
            assert_eq!(store.load(2).unwrap(), b"abcdefghijklmn".to_vec());
        }
        // two uncompressed blocks holding 14 bytes
        let len = std::fs::metadata(fname).unwrap().len();
        assert!(len > 14);

        opts.keep_temps = false;
        {
            let store = PileStore::from_options(Some(fname), 2, &opts).unwrap();
            assert_eq!(store.load(2).unwrap(), Vec::<u8>::new());
        }
        assert!(!std::path::Path::new(fname).exists());

        let store = PileStore::from_options(None, 3, &opts).unwrap();
        store.append(1, b"abcdefghij").unwrap();
        assert_eq!(store.block_count(1).unwrap(), 0);
        assert_eq!(store.pile_count(), 3);
    }

    #[test]
    fn test_concurrent_appends() {
        let dir = tempfile::tempdir().unwrap();
        let fname = dir.path().join("piles.dat");
        let store = Arc::new(PileStore::create(fname.to_str().unwrap(), 4, 64, false, true).unwrap());

        let mut handles = Vec::new();
        for t in 0..8u8 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                let pile = (t % 4) as u32 + 1;
                for _ in 0..100 {
                    store.append(pile, &[t; 10]).unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(store.total_bytes(), 8000);
        for pile in 1..5u32 {
            let data = store.load(pile).unwrap();
            assert_eq!(data.len(), 2000);
            // appends are never interleaved within a call
            for chunk in data.chunks(10) {
                assert!(chunk.iter().all(|b| *b == chunk[0]));
                assert_eq!(chunk[0] as u32 % 4 + 1, pile);
            }
        }
        drop(store);
        assert!(fname.exists());
    }
}
