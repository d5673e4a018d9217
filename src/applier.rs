//! Reconstructs the target image by applying a [`Message`] to a copy of the
//! initial image.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::Result;
use crate::index::IndexHashMap;
use crate::known_blocks::KnownBlockStore;
use crate::message::{Instruction, Message};

/// Applies instruction streams against a copy of the initial image.
///
/// Holds the same `KnownBlockStore` and initial-image index the encoder
/// used; `apply` never mutates either (only `MessageBuilder::build` grows
/// the store).
pub struct Applier<'a> {
    store:         &'a mut KnownBlockStore,
    initial_index: &'a mut IndexHashMap,
    block_size:    u32,
}

impl<'a> Applier<'a> {
    pub fn new(store: &'a mut KnownBlockStore, initial_index: &'a mut IndexHashMap, block_size: u32) -> Self {
        Self { store, initial_index, block_size }
    }

    /// Copy `initial_path` to `output_path`, then overwrite each changed
    /// block per `message`.
    pub fn apply_to_path(&mut self, message: &Message, initial_path: &Path, output_path: &Path) -> Result<()> {
        std::fs::copy(initial_path, output_path)?;
        let mut output = OpenOptions::new().write(true).open(output_path)?;

        for instruction in &message.instructions {
            let literal = self.resolve_literal(instruction, &message.instructions)?;
            let offset = instruction.disk_index() as u64 * self.block_size as u64;
            output.seek(SeekFrom::Start(offset))?;
            output.write_all(&literal)?;
        }
        Ok(())
    }

    /// Resolve an instruction down to its `block_size`-byte literal.
    /// `MessageReference` recursion terminates because every reference is
    /// strictly backward — a well-formed message index always names a
    /// smaller index than its own.
    fn resolve_literal(&mut self, instruction: &Instruction, instructions: &[Instruction]) -> Result<Vec<u8>> {
        match instruction {
            Instruction::Literal { data, .. } => Ok(data.clone()),
            Instruction::Hash { digest, .. } => self.store.get_data_by_hash(digest),
            Instruction::DiskReference { source_index, .. } => {
                self.initial_index.literal_by_index(*source_index)
            }
            Instruction::MessageReference { message_index, .. } => {
                let referenced = &instructions[*message_index as usize];
                self.resolve_literal(referenced, instructions)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Hasher;
    use std::io::Read as _;
    use std::io::Write as _;
    use tempfile::{tempdir, NamedTempFile};

    fn write_image(bytes: &[u8]) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn applies_disk_reference_and_literal() {
        let initial = write_image(&[0u8; 16]);
        let hasher = Hasher::new(16).unwrap();
        let mut initial_index = IndexHashMap::build(initial.path(), 4, hasher).unwrap();
        let dir = tempdir().unwrap();
        let mut store = KnownBlockStore::open(dir.path().join("store"), 4, 16).unwrap();

        let message = Message {
            header_bits:        1,
            changed_index_bits: 2,
            disk_ref_bits:      2,
            msg_ref_bits:       1,
            instructions:       vec![
                Instruction::DiskReference { disk_index: 2, source_index: 0 },
                Instruction::Literal { disk_index: 3, data: b"WXYZ".to_vec() },
            ],
        };

        let out_path = dir.path().join("target.img");
        let mut applier = Applier::new(&mut store, &mut initial_index, 4);
        applier.apply_to_path(&message, initial.path(), &out_path).unwrap();

        let mut got = Vec::new();
        std::fs::File::open(&out_path).unwrap().read_to_end(&mut got).unwrap();
        let mut expected = [0u8; 16];
        expected[12..16].copy_from_slice(b"WXYZ");
        assert_eq!(got, expected.to_vec());
    }

    #[test]
    fn resolves_message_reference_chain() {
        let initial = write_image(&[0u8; 8]);
        let hasher = Hasher::new(16).unwrap();
        let mut initial_index = IndexHashMap::build(initial.path(), 4, hasher).unwrap();
        let dir = tempdir().unwrap();
        let mut store = KnownBlockStore::open(dir.path().join("store"), 4, 16).unwrap();

        let message = Message {
            header_bits:        1,
            changed_index_bits: 1,
            disk_ref_bits:      1,
            msg_ref_bits:       1,
            instructions:       vec![
                Instruction::Literal { disk_index: 0, data: b"ABCD".to_vec() },
                Instruction::MessageReference { disk_index: 1, message_index: 0 },
            ],
        };

        let out_path = dir.path().join("target.img");
        let mut applier = Applier::new(&mut store, &mut initial_index, 4);
        applier.apply_to_path(&message, initial.path(), &out_path).unwrap();

        let mut got = Vec::new();
        std::fs::File::open(&out_path).unwrap().read_to_end(&mut got).unwrap();
        assert_eq!(got, b"ABCDABCD".to_vec());
    }
}
