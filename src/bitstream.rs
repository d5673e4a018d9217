//! Bit-granular I/O over byte streams — MSB-first throughout.
//!
//! [`BitWriter`] accumulates bits into a byte accumulator and flushes whole
//! bytes as they fill; the final partial byte is zero-padded and flushed on
//! [`BitWriter::close`] (or on drop, as a safety net). [`BitReader`] keeps a
//! ≥1&nbsp;MiB read-ahead buffer and refills transparently across
//! arbitrarily many underlying reads.
//!
//! Neither side interprets the bits it moves — field widths, tags, and
//! payload semantics all live one layer up in [`crate::serializer`].

use std::io::{self, Read, Write};

/// Read-ahead buffer size for [`BitReader`]: 1 MiB.
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

// ── Writer ───────────────────────────────────────────────────────────────────

/// Buffered MSB-first bit writer.
///
/// `write` fills the current byte from the high-bit side first, emits whole
/// bytes as they complete, and holds the trailing partial byte until
/// [`close`](BitWriter::close) (or drop) pads it with zero bits and flushes
/// it. Closing a writer that never wrote a partial byte produces no extra
/// output; closing a writer that never wrote anything produces a zero-byte
/// file.
pub struct BitWriter<W: Write> {
    inner:        Option<W>,
    current_byte: u8,
    bit_index:    u8, // number of bits already placed in current_byte, 0..8
}

impl<W: Write> BitWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner: Some(inner), current_byte: 0, bit_index: 0 }
    }

    /// Append `bits` (each entry one bit, MSB-first order) to the stream.
    pub fn write(&mut self, bits: &[bool]) -> io::Result<()> {
        for &bit in bits {
            if bit {
                self.current_byte |= 1 << (7 - self.bit_index);
            }
            self.bit_index += 1;
            if self.bit_index == 8 {
                self.inner_mut().write_all(&[self.current_byte])?;
                self.current_byte = 0;
                self.bit_index = 0;
            }
        }
        Ok(())
    }

    fn inner_mut(&mut self) -> &mut W {
        self.inner.as_mut().expect("BitWriter used after close")
    }

    /// Write an unsigned integer as exactly `width` bits, MSB-first,
    /// left-padded with zeros. `width` must be large enough to hold `value`;
    /// higher bits of `value` beyond `width` are silently dropped, matching
    /// the encoder's own `bits()`-sized allocation discipline — callers are
    /// expected to have already sized `width` correctly.
    pub fn write_uint(&mut self, value: u64, width: u32) -> io::Result<()> {
        let mut bits = Vec::with_capacity(width as usize);
        for i in (0..width).rev() {
            bits.push((value >> i) & 1 == 1);
        }
        self.write(&bits)
    }

    /// Flush the trailing partial byte (zero-padded) and return the inner
    /// writer. Safe to call even if nothing was ever written.
    pub fn close(mut self) -> io::Result<W> {
        self.flush_tail()?;
        Ok(self.inner.take().expect("BitWriter used after close"))
    }

    fn flush_tail(&mut self) -> io::Result<()> {
        if self.bit_index > 0 {
            if let Some(inner) = self.inner.as_mut() {
                inner.write_all(&[self.current_byte])?;
            }
            self.current_byte = 0;
            self.bit_index = 0;
        }
        Ok(())
    }
}

impl<W: Write> Drop for BitWriter<W> {
    fn drop(&mut self) {
        let _ = self.flush_tail();
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

/// Buffered MSB-first bit reader with a ≥1 MiB read-ahead buffer.
///
/// `read(n)` returns:
/// - `Ok(Some(bits))` with `bits.len() == n` — the full request was
///   satisfied.
/// - `Ok(Some(bits))` with `bits.len() < n` — the stream ran out partway
///   through the request (a short read). Callers expecting a
///   complete field must treat this as `Truncated`.
/// - `Ok(None)` — strictly zero bits were available before anything was
///   read; this is the clean end-of-stream signal, valid only where the
///   caller's outer loop is itself looking for EOF (the top of a
///   body-instruction read).
pub struct BitReader<R: Read> {
    inner:       R,
    buffer:      Vec<u8>,
    buf_pos:     usize,
    bit_pos:     u8,
    buffer_size: usize,
    exhausted:   bool,
}

impl<R: Read> BitReader<R> {
    pub fn new(inner: R) -> io::Result<Self> {
        Self::with_buffer_size(inner, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(mut inner: R, buffer_size: usize) -> io::Result<Self> {
        let buffer_size = buffer_size.max(1);
        let mut buf = vec![0u8; buffer_size];
        let n = fill_as_much_as_possible(&mut inner, &mut buf)?;
        buf.truncate(n);
        Ok(Self {
            inner,
            buffer: buf,
            buf_pos: 0,
            bit_pos: 0,
            buffer_size,
            exhausted: n == 0,
        })
    }

    fn refill(&mut self) -> io::Result<()> {
        let mut buf = vec![0u8; self.buffer_size];
        let n = fill_as_much_as_possible(&mut self.inner, &mut buf)?;
        buf.truncate(n);
        self.buffer = buf;
        self.buf_pos = 0;
        self.exhausted = n == 0;
        Ok(())
    }

    fn next_bit(&mut self) -> io::Result<Option<bool>> {
        if self.buf_pos >= self.buffer.len() {
            if self.exhausted {
                return Ok(None);
            }
            self.refill()?;
            if self.buffer.is_empty() {
                return Ok(None);
            }
        }
        let byte = self.buffer[self.buf_pos];
        let bit = (byte >> (7 - self.bit_pos)) & 1 == 1;
        self.bit_pos += 1;
        if self.bit_pos == 8 {
            self.bit_pos = 0;
            self.buf_pos += 1;
        }
        Ok(Some(bit))
    }

    pub fn read(&mut self, n: usize) -> io::Result<Option<Vec<bool>>> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            match self.next_bit()? {
                Some(b) => out.push(b),
                None => {
                    return if out.is_empty() { Ok(None) } else { Ok(Some(out)) };
                }
            }
        }
        Ok(Some(out))
    }

}

pub(crate) fn bits_to_u64(bits: &[bool]) -> u64 {
    let mut v = 0u64;
    for &b in bits {
        v = (v << 1) | (b as u64);
    }
    v
}

fn fill_as_much_as_possible<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn bits_from_str(s: &str) -> Vec<bool> {
        s.chars().map(|c| c == '1').collect()
    }

    #[test]
    fn round_trip_arbitrary_bitstring() {
        let x = bits_from_str("1011001101");
        let mut buf = Vec::new();
        {
            let mut w = BitWriter::new(&mut buf);
            w.write(&x).unwrap();
            w.close().unwrap();
        }
        assert_eq!(buf.len(), 2); // 10 bits -> 2 bytes, zero padded

        let mut r = BitReader::new(Cursor::new(&buf)).unwrap();
        let read_back = r.read(x.len()).unwrap().unwrap();
        assert_eq!(read_back, x);
    }

    #[test]
    fn close_on_empty_writer_produces_zero_bytes() {
        let mut buf = Vec::new();
        {
            let w = BitWriter::new(&mut buf);
            w.close().unwrap();
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn exact_byte_multiple_has_no_padding_byte() {
        let x = bits_from_str("11110000");
        let mut buf = Vec::new();
        {
            let mut w = BitWriter::new(&mut buf);
            w.write(&x).unwrap();
            w.close().unwrap();
        }
        assert_eq!(buf, vec![0b1111_0000]);
    }

    #[test]
    fn read_past_end_returns_none() {
        let buf: Vec<u8> = vec![0xFF];
        let mut r = BitReader::new(Cursor::new(buf)).unwrap();
        assert_eq!(r.read(8).unwrap(), Some(vec![true; 8]));
        assert_eq!(r.read(1).unwrap(), None);
    }

    #[test]
    fn short_read_returns_partial_bits() {
        let buf: Vec<u8> = vec![0b1010_0000];
        let mut r = BitReader::new(Cursor::new(buf)).unwrap();
        // Only 8 bits exist; ask for 12.
        let got = r.read(12).unwrap().unwrap();
        assert_eq!(got.len(), 8);
    }

    #[test]
    fn write_uint_msb_first() {
        let mut buf = Vec::new();
        {
            let mut w = BitWriter::new(&mut buf);
            w.write_uint(5, 4).unwrap(); // 0101
            w.close().unwrap();
        }
        assert_eq!(buf, vec![0b0101_0000]);
    }

    proptest::proptest! {
        /// Writing any bitstring then closing produces a `ceil(|x|/8)`-byte
        /// file, and reading `|x|` bits back yields `x`.
        #[test]
        fn idempotent_round_trip(bits in proptest::collection::vec(proptest::bool::ANY, 0..500)) {
            let mut buf = Vec::new();
            {
                let mut w = BitWriter::new(&mut buf);
                w.write(&bits).unwrap();
                w.close().unwrap();
            }
            proptest::prop_assert_eq!(buf.len(), (bits.len() + 7) / 8);

            let mut r = BitReader::new(Cursor::new(&buf)).unwrap();
            let read_back = if bits.is_empty() {
                Vec::new()
            } else {
                r.read(bits.len()).unwrap().unwrap()
            };
            proptest::prop_assert_eq!(read_back, bits);
        }
    }

    #[test]
    fn reader_refills_across_small_buffers() {
        let data = vec![0xAAu8; 10]; // 80 bits of 10101010
        let mut r = BitReader::with_buffer_size(Cursor::new(data.clone()), 3).unwrap();
        let mut all = Vec::new();
        loop {
            match r.read(7).unwrap() {
                Some(b) if b.len() == 7 => all.extend(b),
                Some(b) => {
                    all.extend(b);
                    break;
                }
                None => break,
            }
        }
        assert_eq!(all.len(), 80);
    }
}
