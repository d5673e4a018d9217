//! Variable-width bit-packed wire format for a [`Message`].
//!
//! ```text
//! HEADER:
//!   disk_ref_bits   : header_bits
//!   msg_ref_bits    : header_bits
//! BODY: repeated until EOF:
//!   disk_index      : changed_index_bits
//!   kind_tag        : 2 bits   { 00=Literal, 01=Hash, 10=DiskReference, 11=MessageReference }
//!   payload         : depends on kind
//! ```
//!
//! `changed_index_bits` and `header_bits` are never written — both sides
//! derive them from the block count `N` of the initial image, which the
//! decoder always has in hand. This is what makes the format non-self-
//! describing: it only parses in the context of an initial image of the
//! right size.

use std::io::{Read, Write};

use crate::bitstream::{bits_to_u64, BitReader, BitWriter};
use crate::error::{DeltaError, Result};
use crate::message::{Instruction, Message};
use crate::width::bits;

/// Write `message` to `writer` in the wire format above.
pub fn serialize<W: Write>(message: &Message, writer: W) -> Result<()> {
    let mut bw = BitWriter::new(writer);
    bw.write_uint(message.disk_ref_bits as u64, message.header_bits)?;
    bw.write_uint(message.msg_ref_bits as u64, message.header_bits)?;

    for instruction in &message.instructions {
        bw.write_uint(instruction.disk_index() as u64, message.changed_index_bits)?;
        bw.write_uint(instruction.tag() as u64, 2)?;
        match instruction {
            Instruction::Literal { data, .. } => bw.write(&bytes_to_bits(data))?,
            Instruction::Hash { digest, .. } => bw.write(&bytes_to_bits(digest))?,
            Instruction::DiskReference { source_index, .. } => {
                bw.write_uint(*source_index as u64, message.disk_ref_bits)?
            }
            Instruction::MessageReference { message_index, .. } => {
                bw.write_uint(*message_index as u64, message.msg_ref_bits)?
            }
        }
    }

    bw.close()?;
    Ok(())
}

/// Read a [`Message`] back out of `reader`, given the decoder-side context
/// it needs: the initial image's block count `N`, the block size `B`
/// (bytes), and the digest length `⌈D/8⌉` (bytes).
pub fn deserialize<R: Read>(reader: R, block_count: u32, block_size: u32, digest_len: usize) -> Result<Message> {
    let changed_index_bits = bits((block_count as u64).saturating_sub(1));
    let header_bits = changed_index_bits;
    let mut br = BitReader::new(reader)?;

    let disk_ref_bits = field_width(read_exact_bits(&mut br, header_bits as usize, "disk_ref_bits")?);
    let msg_ref_bits = field_width(read_exact_bits(&mut br, header_bits as usize, "msg_ref_bits")?);

    let mut instructions = Vec::new();
    loop {
        let disk_index_bits = match read_field_or_eof(&mut br, changed_index_bits as usize, "disk_index")? {
            None => break,
            Some(b) => b,
        };
        let disk_index = bits_to_u64(&disk_index_bits) as u32;

        let tag_bits = match read_field_or_eof(&mut br, 2, "kind_tag")? {
            None => break,
            Some(b) => b,
        };
        let tag = bits_to_u64(&tag_bits) as u8;

        let payload_bits = match tag {
            0b00 => block_size as usize * 8,
            0b01 => digest_len * 8,
            0b10 => disk_ref_bits as usize,
            0b11 => msg_ref_bits as usize,
            other => return Err(DeltaError::InvalidTag { tag: other, disk_index }),
        };
        let payload = match read_field_or_eof(&mut br, payload_bits, payload_field_name(tag))? {
            None => break,
            Some(b) => b,
        };

        let instruction = match tag {
            0b00 => Instruction::Literal { disk_index, data: bits_to_bytes(&payload) },
            0b01 => Instruction::Hash { disk_index, digest: bits_to_bytes(&payload) },
            0b10 => Instruction::DiskReference { disk_index, source_index: bits_to_u64(&payload) as u32 },
            0b11 => Instruction::MessageReference { disk_index, message_index: bits_to_u64(&payload) as u32 },
            _ => unreachable!("tag already validated above"),
        };
        instructions.push(instruction);
    }

    Ok(Message { header_bits, changed_index_bits, disk_ref_bits, msg_ref_bits, instructions })
}

/// This crate's own `bits()` always floors at 1, but a delta written by a
/// different encoder could still carry a literal zero-width field.
/// Substitute 1 in that case.
fn field_width(raw_value: Vec<bool>) -> u32 {
    let v = bits_to_u64(&raw_value) as u32;
    if v == 0 {
        1
    } else {
        v
    }
}

fn read_exact_bits<R: Read>(br: &mut BitReader<R>, n: usize, field: &'static str) -> Result<Vec<bool>> {
    match br.read(n)? {
        Some(b) if b.len() == n => Ok(b),
        Some(b) => Err(DeltaError::Truncated { field, expected_bits: (n - b.len()) as u32 }),
        None => Err(DeltaError::Truncated { field, expected_bits: n as u32 }),
    }
}

/// Read one field inside the body loop, tolerating end-of-stream.
///
/// The writer zero-pads its final byte, so after the last instruction 0-7
/// stray zero bits remain. Those padding bits can satisfy a short field (the
/// next `disk_index`, or a `kind_tag` of `00`) before the stream is truly
/// exhausted. Every body-field read must therefore treat a clean `None`
/// (nothing at all left to read) as end-of-stream, not just the very first
/// one — exactly like the reference decoder, which checks `if bits is None:
/// break` after reading `disk_index`, after reading the tag, and after
/// reading the payload. Only a genuinely short read (some bits, but fewer
/// than requested) is a real truncation.
fn read_field_or_eof<R: Read>(br: &mut BitReader<R>, n: usize, field: &'static str) -> Result<Option<Vec<bool>>> {
    match br.read(n)? {
        None => Ok(None),
        Some(b) if b.len() == n => Ok(Some(b)),
        Some(b) => Err(DeltaError::Truncated { field, expected_bits: (n - b.len()) as u32 }),
    }
}

fn payload_field_name(tag: u8) -> &'static str {
    match tag {
        0b00 => "literal_payload",
        0b01 => "hash_payload",
        0b10 => "disk_reference_payload",
        _ => "message_reference_payload",
    }
}

fn bytes_to_bits(data: &[u8]) -> Vec<bool> {
    let mut out = Vec::with_capacity(data.len() * 8);
    for &byte in data {
        for i in (0..8).rev() {
            out.push((byte >> i) & 1 == 1);
        }
    }
    out
}

fn bits_to_bytes(bits: &[bool]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| {
            let mut byte = 0u8;
            for (i, &b) in chunk.iter().enumerate() {
                if b {
                    byte |= 1 << (7 - i);
                }
            }
            byte
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> Message {
        Message {
            header_bits:        3,
            changed_index_bits: 3,
            disk_ref_bits:      3,
            msg_ref_bits:       1,
            instructions:       vec![
                Instruction::Literal { disk_index: 0, data: b"WXYZ".to_vec() },
                Instruction::MessageReference { disk_index: 1, message_index: 0 },
                Instruction::DiskReference { disk_index: 3, source_index: 0 },
            ],
        }
    }

    #[test]
    fn round_trips_a_mixed_message() {
        let msg = sample_message();
        let mut buf = Vec::new();
        serialize(&msg, &mut buf).unwrap();

        let decoded = deserialize(&buf[..], 8, 4, 2).unwrap();
        assert_eq!(decoded.instructions, msg.instructions);
        assert_eq!(decoded.disk_ref_bits, msg.disk_ref_bits);
        assert_eq!(decoded.msg_ref_bits, msg.msg_ref_bits);
    }

    #[test]
    fn trailing_zero_padding_does_not_look_like_another_instruction() {
        // header(6) + Literal(3+2+32) + MessageReference(3+2+1) + DiskReference(3+2+3)
        // = 57 bits -> 8 bytes on the wire, with 7 trailing zero-padding bits.
        // changed_index_bits is only 3, so that padding is enough to look
        // like one more disk_index and a Literal tag before genuinely
        // running out mid-payload; this must decode cleanly, not error.
        let msg = sample_message();
        let mut buf = Vec::new();
        serialize(&msg, &mut buf).unwrap();
        assert_eq!(buf.len(), 8);

        let decoded = deserialize(&buf[..], 8, 4, 2).unwrap();
        assert_eq!(decoded.instructions, msg.instructions);
    }

    #[test]
    fn empty_message_round_trips() {
        let msg = Message {
            header_bits:        1,
            changed_index_bits: 1,
            disk_ref_bits:      1,
            msg_ref_bits:       1,
            instructions:       vec![],
        };
        let mut buf = Vec::new();
        serialize(&msg, &mut buf).unwrap();
        let decoded = deserialize(&buf[..], 1, 4, 2).unwrap();
        assert!(decoded.instructions.is_empty());
    }

    #[test]
    fn truncated_stream_is_rejected() {
        let msg = sample_message();
        let mut buf = Vec::new();
        serialize(&msg, &mut buf).unwrap();
        // Cut to 3 bytes: the header (6 bits) plus the first instruction's
        // disk_index and tag (5 bits) fit well inside that, so the cut lands
        // partway through the first Literal's 32-bit payload — a genuine
        // short read, not a clean field boundary. A cut that lands exactly on
        // a field boundary reads as end-of-stream, which is by design: the
        // format can't otherwise distinguish a dropped trailing instruction
        // from an intentionally short message once only zero-padding remains.
        buf.truncate(3);
        let result = deserialize(&buf[..], 8, 4, 2);
        assert!(matches!(result, Err(DeltaError::Truncated { .. })));
    }
}
