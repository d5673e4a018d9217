//! Instruction classification — turns two block-hash indices and a shared
//! known-block store into an ordered list of per-block instructions.
//!
//! [`MessageBuilder::build`] is the only place classification priority is
//! decided: MessageReference beats DiskReference beats Hash beats Literal,
//! in that order, for every changed block.

use std::collections::HashMap;

use crate::error::Result;
use crate::index::IndexHashMap;
use crate::known_blocks::KnownBlockStore;
use crate::width::bits;

/// One instruction: how to reproduce the target block at `disk_index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Literal { disk_index: u32, data: Vec<u8> },
    Hash { disk_index: u32, digest: Vec<u8> },
    DiskReference { disk_index: u32, source_index: u32 },
    MessageReference { disk_index: u32, message_index: u32 },
}

impl Instruction {
    pub fn disk_index(&self) -> u32 {
        match self {
            Instruction::Literal { disk_index, .. }
            | Instruction::Hash { disk_index, .. }
            | Instruction::DiskReference { disk_index, .. }
            | Instruction::MessageReference { disk_index, .. } => *disk_index,
        }
    }

    /// 2-bit wire tag: `00=Literal, 01=Hash, 10=DiskReference,
    /// 11=MessageReference`.
    pub fn tag(&self) -> u8 {
        match self {
            Instruction::Literal { .. } => 0b00,
            Instruction::Hash { .. } => 0b01,
            Instruction::DiskReference { .. } => 0b10,
            Instruction::MessageReference { .. } => 0b11,
        }
    }
}

/// An ordered instruction list plus the four bit-widths needed to decode it.
#[derive(Debug, Clone)]
pub struct Message {
    pub header_bits:        u32,
    pub changed_index_bits: u32,
    pub disk_ref_bits:      u32,
    pub msg_ref_bits:       u32,
    pub instructions:       Vec<Instruction>,
}

/// Builds a [`Message`] from an initial image's index, a target image's
/// index, and a shared known-block store. The store is mutated (grown) as
/// the walk proceeds; the two indices are read-only but need `&mut` access
/// because block reads seek their backing file.
pub struct MessageBuilder<'a> {
    initial: &'a mut IndexHashMap,
    target:  &'a mut IndexHashMap,
    store:   &'a mut KnownBlockStore,
}

impl<'a> MessageBuilder<'a> {
    pub fn new(initial: &'a mut IndexHashMap, target: &'a mut IndexHashMap, store: &'a mut KnownBlockStore) -> Self {
        Self { initial, target, store }
    }

    /// Walk every block, classify the changed ones, and return the finished
    /// message. `progress`, when present, is called roughly every 5% of
    /// blocks scanned with `(scanned, total)`.
    pub fn build(&mut self, mut progress: Option<&mut dyn FnMut(u64, u64)>) -> Result<Message> {
        let n = self.target.block_count();
        let mut instructions = Vec::new();
        let mut hash_to_message_index: HashMap<Vec<u8>, u32> = HashMap::new();
        let mut max_disk_ref_payload: u64 = 0;
        let mut max_msg_ref_payload: u64 = 0;
        let step = (n as u64 / 20).max(1);

        for i in 0..n {
            let h_initial = self.initial.hash_by_index(i)?;
            let h_target = self.target.hash_by_index(i)?;

            if h_initial != h_target {
                let literal = self.target.literal_by_index(i)?;
                let message_index = instructions.len() as u32;

                let instruction = if let Some(&msg_idx) = hash_to_message_index.get(&h_target) {
                    max_msg_ref_payload = max_msg_ref_payload.max(msg_idx as u64);
                    Instruction::MessageReference { disk_index: i, message_index: msg_idx }
                } else if let Some(run) = self.initial.indexes_by_hash(&h_target).first() {
                    max_disk_ref_payload = max_disk_ref_payload.max(run.start_index as u64);
                    Instruction::DiskReference { disk_index: i, source_index: run.start_index }
                } else if self.store.contains(&h_target) {
                    Instruction::Hash { disk_index: i, digest: h_target.clone() }
                } else {
                    Instruction::Literal { disk_index: i, data: literal.clone() }
                };

                hash_to_message_index.insert(h_target.clone(), message_index);
                self.store.add(&h_target, &literal)?;
                instructions.push(instruction);
            }

            if let Some(cb) = progress.as_deref_mut() {
                if (i as u64) % step == 0 || i + 1 == n {
                    cb(i as u64 + 1, n as u64);
                }
            }
        }

        let changed_index_bits = bits(n.saturating_sub(1) as u64);
        let header_bits = changed_index_bits;
        let disk_ref_bits = bits(max_disk_ref_payload);
        let msg_ref_bits = bits(max_msg_ref_payload);

        Ok(Message {
            header_bits,
            changed_index_bits,
            disk_ref_bits,
            msg_ref_bits,
            instructions,
        })
    }
}
