//! Persistent append-only store of `(digest, literal)` pairs.
//!
//! The store is the sender's (and receiver's) shared memory of blocks seen
//! across runs: anything added once can be referenced by digest alone in a
//! later delta instead of re-sent as a literal. It never shrinks and never
//! rewrites an existing record.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DeltaError, Result};

/// Record-count + checksum sidecar written after every successful `add`.
///
/// Detects torn appends: if the log is shorter than `record_count`, or the
/// digests actually present don't hash to `crc32`, the difference is treated
/// as a partial write and the log is truncated back to the last record the
/// manifest can vouch for. This is diagnostic, not transactional — a crash
/// between the log `write_all` and the manifest `write_all` still loses
/// that last record's manifest coverage, in which case the *next* load just
/// re-validates against one fewer record than was actually written.
#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    record_count: u64,
    crc32:        u32,
}

/// Persistent append-only `(digest ‖ literal)` log, parameterized by block
/// size `B` and digest size `D` (bits).
pub struct KnownBlockStore {
    file:          File,
    manifest_path: PathBuf,
    block_size:    u32,
    digest_len:    usize,
    digests:       Vec<Vec<u8>>,
    positions:     HashMap<Vec<u8>, usize>,
    crc:           crc32fast::Hasher,
}

impl KnownBlockStore {
    /// Open (creating if absent) the store backing `(block_size,
    /// digest_size_bits)` at `log_path`, validating against its
    /// `.manifest.json` sidecar.
    pub fn open<P: AsRef<Path>>(
        log_path: P,
        block_size: u32,
        digest_size_bits: u32,
    ) -> Result<Self> {
        let log_path = log_path.as_ref().to_path_buf();
        let digest_len = crate::width::byte_len(digest_size_bits);
        let record_len = digest_len + block_size as usize;

        if let Some(parent) = log_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&log_path)?;

        let manifest_path = manifest_path_for(&log_path);
        let manifest = read_manifest(&manifest_path);

        let mut digests = Vec::new();
        let mut positions = HashMap::new();
        let mut crc = crc32fast::Hasher::new();

        file.seek(SeekFrom::Start(0))?;
        let mut buf = vec![0u8; record_len];
        let mut valid_records: u64 = 0;
        loop {
            match read_fully_or_partial(&mut file, &mut buf)? {
                0 => break,
                n if n == record_len => {
                    let digest = buf[..digest_len].to_vec();
                    crc.update(&digest);
                    digests.push(digest.clone());
                    positions.insert(digest, digests.len() - 1);
                    valid_records += 1;
                }
                _ => break, // short trailing record: torn write, stop here
            }
        }

        let trusted_records = match &manifest {
            Some(m) if m.record_count <= valid_records => {
                let recomputed = crc_of_prefix(&digests, m.record_count as usize);
                if recomputed == m.crc32 {
                    m.record_count
                } else {
                    valid_records
                }
            }
            _ => valid_records,
        };

        if trusted_records < valid_records {
            digests.truncate(trusted_records as usize);
            positions.retain(|_, pos| (*pos as u64) < trusted_records);
            file.set_len(trusted_records * record_len as u64)?;
            crc = crc32fast::Hasher::new();
            for d in &digests {
                crc.update(d);
            }
        }

        file.seek(SeekFrom::End(0))?;

        Ok(Self {
            file,
            manifest_path,
            block_size,
            digest_len,
            digests,
            positions,
            crc,
        })
    }

    pub fn contains(&self, digest: &[u8]) -> bool {
        self.positions.contains_key(digest)
    }

    /// Fetch the `block_size`-byte literal stored for `digest`.
    pub fn get_data_by_hash(&mut self, digest: &[u8]) -> Result<Vec<u8>> {
        let pos = *self
            .positions
            .get(digest)
            .ok_or_else(|| DeltaError::UnknownHash(hex::encode(digest)))?;
        let record_len = self.digest_len + self.block_size as usize;
        let offset = pos as u64 * record_len as u64 + self.digest_len as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; self.block_size as usize];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Append `(digest, literal)` if `digest` is new; no-op if already
    /// present.
    pub fn add(&mut self, digest: &[u8], literal: &[u8]) -> Result<()> {
        if digest.len() != self.digest_len {
            return Err(DeltaError::HashSizeMismatch {
                expected: self.digest_len,
                actual:   digest.len(),
            });
        }
        if self.contains(digest) {
            return Ok(());
        }

        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(digest)?;
        self.file.write_all(literal)?;
        self.file.flush()?;

        self.crc.update(digest);
        self.digests.push(digest.to_vec());
        self.positions.insert(digest.to_vec(), self.digests.len() - 1);

        self.write_manifest()
    }

    fn write_manifest(&self) -> Result<()> {
        let manifest = Manifest {
            record_count: self.digests.len() as u64,
            crc32:        self.crc.clone().finalize(),
        };
        let bytes = serde_json::to_vec(&manifest)
            .map_err(|e| DeltaError::InvalidParameter(format!("manifest serialize: {e}")))?;
        std::fs::write(&self.manifest_path, bytes)?;
        Ok(())
    }
}

fn manifest_path_for(log_path: &Path) -> PathBuf {
    let mut s = log_path.as_os_str().to_os_string();
    s.push(".manifest.json");
    PathBuf::from(s)
}

fn read_manifest(path: &Path) -> Option<Manifest> {
    let bytes = std::fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn crc_of_prefix(digests: &[Vec<u8>], count: usize) -> u32 {
    let mut crc = crc32fast::Hasher::new();
    for d in digests.iter().take(count) {
        crc.update(d);
    }
    crc.finalize()
}

fn read_fully_or_partial(file: &mut File, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
