//! Per-image block-hash index — digest lookups in both directions.
//!
//! [`IndexHashMap`] wraps one image file and answers two questions: "what's
//! the digest of block `i`" and "which blocks share digest `d`". The reverse
//! direction is kept as a run-length-encoded index so a disk that is mostly
//! one repeated block (a freshly zeroed volume, say) costs memory
//! proportional to the number of runs, not the number of blocks.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{DeltaError, Result};
use crate::hash::Hasher;

/// A run of consecutive block indices sharing one digest: `[start, start +
/// len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    pub start_index: u32,
    pub run_length:  u32,
}

/// Block-hash index over a single fixed-length image file.
///
/// Built by one linear scan at construction time. The forward direction
/// (`hash_by_index`) re-reads and re-hashes on demand rather than caching
/// every digest; only the reverse RLE index is held in memory.
pub struct IndexHashMap {
    file:             File,
    block_size:       u32,
    block_count:      u32,
    hasher:           Hasher,
    reverse:          HashMap<Vec<u8>, Vec<Run>>,
}

impl IndexHashMap {
    /// Build the index for `path`, treating it as `block_count` blocks of
    /// `block_size` bytes each.
    pub fn build<P: AsRef<Path>>(path: P, block_size: u32, hasher: Hasher) -> Result<Self> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        if block_size == 0 || len % block_size as u64 != 0 {
            return Err(DeltaError::InvalidParameter(format!(
                "image length {len} is not a multiple of block_size {block_size}"
            )));
        }
        let block_count = (len / block_size as u64) as u32;

        let mut reverse: HashMap<Vec<u8>, Vec<Run>> = HashMap::new();
        let mut buf = vec![0u8; block_size as usize];
        let mut last_digest: Option<Vec<u8>> = None;

        file.seek(SeekFrom::Start(0))?;
        for i in 0..block_count {
            file.read_exact(&mut buf)?;
            let digest = hasher.hash(&buf);

            let extends_prior = last_digest.as_deref() == Some(digest.as_slice())
                && reverse
                    .get(&digest)
                    .and_then(|runs| runs.last())
                    .is_some_and(|r| r.start_index + r.run_length == i);

            if extends_prior {
                reverse.get_mut(&digest).unwrap().last_mut().unwrap().run_length += 1;
            } else {
                reverse.entry(digest.clone()).or_default().push(Run {
                    start_index: i,
                    run_length:  1,
                });
            }
            last_digest = Some(digest);
        }

        Ok(Self { file, block_size, block_count, hasher, reverse })
    }

    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Digest of block `i`, recomputed on demand from the backing file.
    pub fn hash_by_index(&mut self, i: u32) -> Result<Vec<u8>> {
        let literal = self.literal_by_index(i)?;
        Ok(self.hasher.hash(&literal))
    }

    /// Raw `block_size`-byte contents of block `i`.
    pub fn literal_by_index(&mut self, i: u32) -> Result<Vec<u8>> {
        let offset = i as u64 * self.block_size as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; self.block_size as usize];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Defensive copy of the run list for digest `d`. Empty if `d` never
    /// occurs in this image.
    pub fn indexes_by_hash(&self, d: &[u8]) -> Vec<Run> {
        self.reverse.get(d).cloned().unwrap_or_default()
    }
}
