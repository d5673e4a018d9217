//! Error kinds for the disk-delta core.
//!
//! One enum covers every failure mode in the encoder, decoder, known-block
//! store, and applier. No variant is recovered internally — callers see the
//! first failure and the operation aborts.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeltaError {
    /// Initial and target images differ in byte length, or the length is
    /// not a multiple of the block size.
    #[error("size mismatch: initial={initial_len} target={target_len} block_size={block_size}")]
    SizeMismatch {
        initial_len: u64,
        target_len:  u64,
        block_size:  u32,
    },

    /// `block_size == 0`, `digest_size_bits == 0`, or `digest_size_bits > 256`.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Any underlying read/write error.
    #[error("I/O failure: {0}")]
    IoFailure(#[from] io::Error),

    /// Deserializer ran short mid-field.
    #[error("truncated delta stream: expected {expected_bits} more bit(s) while reading {field}")]
    Truncated {
        field:         &'static str,
        expected_bits: u32,
    },

    /// Deserializer read a 2-bit tag it could not map. Unreachable from a
    /// sound encoder; indicates corruption.
    #[error("invalid instruction tag {tag} at disk_index {disk_index}")]
    InvalidTag { tag: u8, disk_index: u32 },

    /// `KnownBlockStore::get_data_by_hash` needed a digest that isn't in the
    /// store.
    #[error("unknown hash: digest {0} not present in known-block store")]
    UnknownHash(String),

    /// `KnownBlockStore::add` received a digest of the wrong length.
    #[error("hash size mismatch: expected {expected} byte(s), got {actual}")]
    HashSizeMismatch { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, DeltaError>;
