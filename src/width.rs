//! Bit-width arithmetic shared by the message builder and serializer.
//!
//! Every variable-width field in the wire format (disk references, message
//! references, the header widths themselves) is sized with [`bits`] and
//! packed into [`byte_len`] bytes when an integer needs a minimal byte-aligned
//! representation (e.g. payload lengths before bit-packing).

/// Number of bits needed to represent `v` in unsigned binary, with a floor of
/// 1 (there is no zero-width field in this format — an index space of size
/// one still needs a single bit to name its only element).
pub fn bits(v: u64) -> u32 {
    if v == 0 {
        1
    } else {
        64 - v.leading_zeros()
    }
}

/// Minimum whole bytes needed to hold `bit_count` bits.
pub fn byte_len(bit_count: u32) -> usize {
    ((bit_count as usize) + 7) / 8
}
