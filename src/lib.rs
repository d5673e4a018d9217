//! # diskdelta — block-level binary delta encoder/decoder
//!
//! Computes a compact delta between two equally-sized raw disk images such
//! that a receiver holding the initial image plus the delta can reconstruct
//! the target image bit-for-bit. Block-level deduplication draws on three
//! sources, tried in priority order: blocks already on the initial disk,
//! blocks previously seen by a persistent known-block store, and blocks
//! that recur earlier within the same delta.
//!
//! Format guarantees:
//! - The delta is a variable-width bit-packed stream, MSB-first within
//!   every byte; it is not self-describing and only parses against an
//!   initial image of the matching size.
//! - Digests are SHA-256 truncated to a caller-chosen bit width; the low
//!   bits of the final digest byte beyond that width are always zero.
//! - The known-block store is an append-only log; entries are never
//!   rewritten or removed, only appended.

pub mod applier;
pub mod bitstream;
pub mod coordinator;
pub mod error;
pub mod hash;
pub mod index;
pub mod known_blocks;
pub mod message;
pub mod serializer;
pub mod width;

pub use applier::Applier;
pub use coordinator::{DeltaCoordinator, DeltaOptions};
pub use error::{DeltaError, Result};
pub use hash::Hasher;
pub use index::{IndexHashMap, Run};
pub use known_blocks::KnownBlockStore;
pub use message::{Instruction, Message, MessageBuilder};
