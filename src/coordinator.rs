//! High-level entry point binding block size, digest size, and the
//! known-block store path for one encode/decode run.
//!
//! Mirrors the two-type shape of an archive/options pair: [`DeltaOptions`]
//! is the parameter struct, [`DeltaCoordinator`] is the validated,
//! ready-to-use handle built from it.

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::applier::Applier;
use crate::error::{DeltaError, Result};
use crate::hash::Hasher;
use crate::index::IndexHashMap;
use crate::known_blocks::KnownBlockStore;
use crate::message::{Message, MessageBuilder};
use crate::serializer;

/// Parameters for one coordinator instance.
#[derive(Debug, Clone)]
pub struct DeltaOptions {
    pub block_size:             u32,
    pub digest_size_bits:       u32,
    pub known_block_store_path: PathBuf,
}

/// Validated, ready-to-run encode/decode handle for one `(block_size,
/// digest_size_bits)` pair.
pub struct DeltaCoordinator {
    options: DeltaOptions,
    hasher:  Hasher,
}

impl DeltaCoordinator {
    /// Construct a coordinator, validating `options` up front.
    pub fn new(options: DeltaOptions) -> Result<Self> {
        if options.block_size == 0 {
            return Err(DeltaError::InvalidParameter("block_size must be > 0".into()));
        }
        let hasher = Hasher::new(options.digest_size_bits)?;
        Ok(Self { options, hasher })
    }

    pub fn hasher(&self) -> Hasher {
        self.hasher
    }

    pub fn block_size(&self) -> u32 {
        self.options.block_size
    }

    /// Build the delta message between `initial_path` and `target_path`,
    /// growing the known-block store as it goes.
    pub fn encode(
        &self,
        initial_path: &Path,
        target_path: &Path,
        mut progress: Option<&mut dyn FnMut(u64, u64)>,
    ) -> Result<Message> {
        self.validate_sizes(initial_path, target_path)?;

        let mut initial_index = IndexHashMap::build(initial_path, self.options.block_size, self.hasher)?;
        let mut target_index = IndexHashMap::build(target_path, self.options.block_size, self.hasher)?;
        let mut store = self.open_store()?;

        let mut builder = MessageBuilder::new(&mut initial_index, &mut target_index, &mut store);
        builder.build(progress.as_deref_mut())
    }

    /// Serialize `message` to `output_path`.
    pub fn write_delta(&self, message: &Message, output_path: &Path) -> Result<()> {
        let file = File::create(output_path)?;
        serializer::serialize(message, file)
    }

    /// Read the delta at `delta_path`, given the initial image it pairs
    /// with, and reconstruct the target image at `output_path`.
    pub fn decode_and_apply(&self, delta_path: &Path, initial_path: &Path, output_path: &Path) -> Result<()> {
        let block_count = self.block_count_of(initial_path)?;
        let digest_len = self.hasher.digest_len_bytes();

        let delta_file = File::open(delta_path)?;
        let message = serializer::deserialize(delta_file, block_count, self.options.block_size, digest_len)?;

        let mut initial_index = IndexHashMap::build(initial_path, self.options.block_size, self.hasher)?;
        let mut store = self.open_store()?;
        let mut applier = Applier::new(&mut store, &mut initial_index, self.options.block_size);
        applier.apply_to_path(&message, initial_path, output_path)
    }

    /// Apply an in-memory `message` directly, without a round trip through
    /// the wire format. Used by the CLI's self-decode verification step and
    /// by tests that want to skip serialization.
    pub fn apply_message(&self, message: &Message, initial_path: &Path, output_path: &Path) -> Result<()> {
        let mut initial_index = IndexHashMap::build(initial_path, self.options.block_size, self.hasher)?;
        let mut store = self.open_store()?;
        let mut applier = Applier::new(&mut store, &mut initial_index, self.options.block_size);
        applier.apply_to_path(message, initial_path, output_path)
    }

    fn open_store(&self) -> Result<KnownBlockStore> {
        KnownBlockStore::open(&self.options.known_block_store_path, self.options.block_size, self.options.digest_size_bits)
    }

    fn block_count_of(&self, path: &Path) -> Result<u32> {
        let len = std::fs::metadata(path)?.len();
        Ok((len / self.options.block_size as u64) as u32)
    }

    fn validate_sizes(&self, initial_path: &Path, target_path: &Path) -> Result<()> {
        let initial_len = std::fs::metadata(initial_path)?.len();
        let target_len = std::fs::metadata(target_path)?.len();
        if initial_len != target_len || initial_len % self.options.block_size as u64 != 0 {
            return Err(DeltaError::SizeMismatch {
                initial_len,
                target_len,
                block_size: self.options.block_size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use tempfile::{tempdir, NamedTempFile};

    fn write_image(bytes: &[u8]) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn end_to_end_round_trip() {
        let initial = write_image(b"AAAABBBBCCCCDDDD");
        let target = write_image(b"DDDDCCCCBBBBAAAA");
        let dir = tempdir().unwrap();

        let coordinator = DeltaCoordinator::new(DeltaOptions {
            block_size:             4,
            digest_size_bits:       16,
            known_block_store_path: dir.path().join("store"),
        })
        .unwrap();

        let message = coordinator.encode(initial.path(), target.path(), None).unwrap();
        let delta_path = dir.path().join("delta.bin");
        coordinator.write_delta(&message, &delta_path).unwrap();

        let output_path = dir.path().join("out.img");
        coordinator.decode_and_apply(&delta_path, initial.path(), &output_path).unwrap();

        let mut got = Vec::new();
        std::fs::File::open(&output_path).unwrap().read_to_end(&mut got).unwrap();
        assert_eq!(got, b"DDDDCCCCBBBBAAAA".to_vec());
    }

    #[test]
    fn rejects_mismatched_image_sizes() {
        let initial = write_image(&[0u8; 16]);
        let target = write_image(&[0u8; 12]);
        let dir = tempdir().unwrap();
        let coordinator = DeltaCoordinator::new(DeltaOptions {
            block_size:             4,
            digest_size_bits:       16,
            known_block_store_path: dir.path().join("store"),
        })
        .unwrap();
        let result = coordinator.encode(initial.path(), target.path(), None);
        assert!(matches!(result, Err(DeltaError::SizeMismatch { .. })));
    }

    #[test]
    fn rejects_invalid_digest_size() {
        let dir = tempdir().unwrap();
        let result = DeltaCoordinator::new(DeltaOptions {
            block_size:             4,
            digest_size_bits:       0,
            known_block_store_path: dir.path().join("store"),
        });
        assert!(result.is_err());
    }
}
