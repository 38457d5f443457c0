//! LSB-first bit writer and reader.
//!
//! The writer accumulates bits in a 64-bit shift register and flushes whole
//! bytes to a growable buffer. The reader refills its register a word at a
//! time, so after [`BitReader::refill`] at least 56 bits are available for
//! the `*_no_refill` accessors. Loads past the end of the slice read zeros.

/// Minimum number of buffered bits guaranteed after a refill.
pub const REFILL_BITS: u32 = 56;

#[inline]
fn low_mask(n: u32) -> u64 {
    (1u64 << n) - 1
}

/// Appends bit fields LSB-first into a byte vector.
#[derive(Debug, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    buffer: u64,
    buffered: u32,
    closed: bool,
}

impl BitWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with reserved byte capacity.
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(bytes),
            ..Self::default()
        }
    }

    /// Append the `n` low bits of `bits`. `n` must be at most 32.
    #[inline]
    pub fn write(&mut self, bits: u32, n: u32) {
        assert!(!self.closed, "write on a closed BitWriter");
        debug_assert!(n <= 32);
        if n == 0 {
            return;
        }
        self.buffer |= (u64::from(bits) & low_mask(n)) << self.buffered;
        self.buffered += n;
        while self.buffered >= 8 {
            self.bytes.push(self.buffer as u8);
            self.buffer >>= 8;
            self.buffered -= 8;
        }
    }

    /// Append a single flag bit.
    #[inline]
    pub fn write_bool(&mut self, value: bool) {
        self.write(u32::from(value), 1);
    }

    /// Append an `f32` as its 32 raw bits.
    #[inline]
    pub fn write_f32(&mut self, value: f32) {
        self.write(value.to_bits(), 32);
    }

    /// Zero-pad to a byte boundary. No further writes are permitted.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        if self.buffered > 0 {
            self.bytes.push(self.buffer as u8);
            self.buffer = 0;
            self.buffered = 0;
        }
        self.closed = true;
    }

    /// Whether [`BitWriter::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of bits written so far.
    pub fn bit_len(&self) -> u64 {
        self.bytes.len() as u64 * 8 + u64::from(self.buffered)
    }

    /// Flushed bytes. Complete only after [`BitWriter::close`].
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Close the writer and take its bytes.
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.close();
        self.bytes
    }
}

/// Reads bit fields LSB-first from a byte slice.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    /// Next byte to load into `buffer`.
    cursor: usize,
    buffer: u64,
    buffered: u32,
}

impl<'a> BitReader<'a> {
    /// Create a reader over `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            cursor: 0,
            buffer: 0,
            buffered: 0,
        }
    }

    /// Ensure at least [`REFILL_BITS`] bits are buffered.
    #[inline]
    pub fn refill(&mut self) {
        if self.buffered >= REFILL_BITS {
            return;
        }
        if let Some(word) = self.data.get(self.cursor..self.cursor + 8) {
            let mut le = [0u8; 8];
            le.copy_from_slice(word);
            self.buffer |= u64::from_le_bytes(le) << self.buffered;
            self.cursor += ((63 - self.buffered) >> 3) as usize;
            self.buffered |= REFILL_BITS;
        } else {
            while self.buffered <= REFILL_BITS {
                let byte = self.data.get(self.cursor).copied().unwrap_or(0);
                self.buffer |= u64::from(byte) << self.buffered;
                self.cursor += 1;
                self.buffered += 8;
            }
        }
    }

    /// Refill, then consume `n` bits.
    #[inline]
    pub fn read(&mut self, n: u32) -> u32 {
        self.refill();
        self.read_no_refill(n)
    }

    /// Consume `n` bits from the buffered register.
    #[inline]
    pub fn read_no_refill(&mut self, n: u32) -> u32 {
        debug_assert!(n <= 32 && n <= self.buffered);
        let value = (self.buffer & low_mask(n)) as u32;
        self.buffer >>= n;
        self.buffered -= n;
        value
    }

    /// Refill, then inspect `n` bits without consuming them.
    #[inline]
    pub fn peek(&mut self, n: u32) -> u32 {
        self.refill();
        self.peek_no_refill(n)
    }

    /// Inspect `n` buffered bits without consuming them.
    #[inline]
    pub fn peek_no_refill(&self, n: u32) -> u32 {
        debug_assert!(n <= 32 && n <= self.buffered);
        (self.buffer & low_mask(n)) as u32
    }

    /// Discard `n` buffered bits.
    #[inline]
    pub fn skip(&mut self, n: u32) {
        debug_assert!(n <= self.buffered);
        self.buffer >>= n;
        self.buffered -= n;
    }

    /// Read a single flag bit.
    #[inline]
    pub fn read_bool(&mut self) -> bool {
        self.read(1) != 0
    }

    /// Read an `f32` stored as 32 raw bits.
    #[inline]
    pub fn read_f32(&mut self) -> f32 {
        f32::from_bits(self.read(32))
    }

    /// Number of bits consumed so far.
    pub fn bit_position(&self) -> u64 {
        self.cursor as u64 * 8 - u64::from(self.buffered)
    }

    /// Whether more bits were consumed than the slice holds.
    pub fn is_overrun(&self) -> bool {
        self.bit_position() > self.data.len() as u64 * 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lsb_first_layout() {
        let mut w = BitWriter::new();
        w.write(0b1, 1);
        w.write(0b10, 2);
        w.write(0b11111, 5);
        let bytes = w.into_bytes();
        assert_eq!(bytes, vec![0b1111_1101]);
    }

    #[test]
    fn test_close_pads_to_byte() {
        let mut w = BitWriter::new();
        w.write(0b101, 3);
        assert_eq!(w.bit_len(), 3);
        w.close();
        assert_eq!(w.bytes(), &[0b101]);
        assert!(w.is_closed());
    }

    #[test]
    #[should_panic]
    fn test_write_after_close_panics() {
        let mut w = BitWriter::new();
        w.close();
        w.write(1, 1);
    }

    #[test]
    fn test_mixed_widths() {
        let fields: Vec<(u32, u32)> = (0..200u32)
            .map(|i| {
                let n = i % 33;
                let v = i.wrapping_mul(2_654_435_761) & if n == 32 { u32::MAX } else { (1 << n) - 1 };
                (v, n)
            })
            .collect();

        let mut w = BitWriter::new();
        for &(v, n) in &fields {
            w.write(v, n);
        }
        let total_bits = w.bit_len();
        let bytes = w.into_bytes();

        let mut r = BitReader::new(&bytes);
        for &(v, n) in &fields {
            assert_eq!(r.read(n), v, "width {n}");
        }
        assert_eq!(r.bit_position(), total_bits);
        assert!(!r.is_overrun());
    }

    #[test]
    fn test_peek_then_skip() {
        let mut w = BitWriter::new();
        w.write(0xABCD, 16);
        let bytes = w.into_bytes();
        let mut r = BitReader::new(&bytes);
        assert_eq!(r.peek(8), 0xCD);
        assert_eq!(r.peek_no_refill(4), 0xD);
        r.skip(8);
        assert_eq!(r.read(8), 0xAB);
    }

    #[test]
    fn test_read_past_end_is_zero_and_overrun() {
        let bytes = [0xFFu8];
        let mut r = BitReader::new(&bytes);
        assert_eq!(r.read(8), 0xFF);
        assert!(!r.is_overrun());
        assert_eq!(r.read(16), 0);
        assert!(r.is_overrun());
    }

    #[test]
    fn test_f32_roundtrip() {
        let mut w = BitWriter::new();
        w.write_bool(true);
        w.write_f32(-3.25);
        let bytes = w.into_bytes();
        let mut r = BitReader::new(&bytes);
        assert!(r.read_bool());
        assert_eq!(r.read_f32(), -3.25);
    }
}
