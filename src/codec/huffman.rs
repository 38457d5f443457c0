//! Canonical, length-limited Huffman coding.
//!
//! Encoding happens in two steps: a [`SymbolHistogram`] counts symbol
//! frequencies, then [`SymbolHistogram::build`] turns the counts into a
//! [`HuffmanEncodeTable`] with package-merge code lengths capped at
//! [`MAX_CODE_LENGTH`] bits. Only the code lengths are serialized; both sides
//! derive the same canonical codewords from them.
//!
//! Codewords are stored bit-reversed so the LSB-first reader can decode with a
//! single `peek(max_length)` lookup followed by `skip(length)`.
//!
//! The module also hosts the signed integer coder shared by most streams: a
//! 64-symbol magnitude-class alphabet followed by raw mantissa bits.

use super::bitstream::{BitReader, BitWriter};
use crate::util::{Error, Result};

/// Longest codeword the encoder produces and the decoder accepts.
pub const MAX_CODE_LENGTH: u32 = 11;

/// Alphabet size of the signed integer coder.
pub const SIGNED_SYMBOL_COUNT: usize = 64;

/// Alphabet size of the byte residual coder.
pub const BYTE_SYMBOL_COUNT: usize = 256;

/// Frequency counter for one alphabet.
#[derive(Debug, Clone)]
pub struct SymbolHistogram {
    counts: Vec<u32>,
}

impl SymbolHistogram {
    /// Create a histogram over `symbol_count` symbols.
    pub fn new(symbol_count: usize) -> Self {
        debug_assert!(symbol_count <= u16::MAX as usize);
        Self {
            counts: vec![0; symbol_count],
        }
    }

    /// Count one occurrence of `symbol`.
    #[inline]
    pub fn record(&mut self, symbol: u32) {
        let slot = &mut self.counts[symbol as usize];
        *slot = slot.saturating_add(1);
    }

    /// Per-symbol frequencies.
    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    /// Total number of recorded symbols.
    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&c| u64::from(c)).sum()
    }

    /// Build the canonical encode table for the recorded frequencies.
    pub fn build(&self) -> HuffmanEncodeTable {
        HuffmanEncodeTable::from_lengths(limited_code_lengths(&self.counts, MAX_CODE_LENGTH))
    }
}

/// Code lengths via package-merge, limited to `max_length` bits.
///
/// Unused symbols get length 0. A single used symbol gets length 1.
pub fn limited_code_lengths(freqs: &[u32], max_length: u32) -> Vec<u8> {
    let mut lengths = vec![0u8; freqs.len()];

    let mut leaves: Vec<(u64, u16)> = freqs
        .iter()
        .enumerate()
        .filter(|(_, &f)| f > 0)
        .map(|(s, &f)| (u64::from(f), s as u16))
        .collect();

    match leaves.len() {
        0 => return lengths,
        1 => {
            lengths[leaves[0].1 as usize] = 1;
            return lengths;
        }
        n => assert!(
            n <= 1usize << max_length,
            "{n} symbols cannot fit in {max_length}-bit codes"
        ),
    }

    leaves.sort_unstable();
    let leaf_items: Vec<PackageItem> = leaves
        .iter()
        .map(|&(weight, symbol)| PackageItem {
            weight,
            symbols: vec![symbol],
        })
        .collect();

    let mut list = leaf_items.clone();
    for _ in 1..max_length {
        let packages: Vec<PackageItem> = list
            .chunks_exact(2)
            .map(|pair| PackageItem {
                weight: pair[0].weight + pair[1].weight,
                symbols: pair[0].symbols.iter().chain(&pair[1].symbols).copied().collect(),
            })
            .collect();
        list = merge_packages(&leaf_items, packages);
    }

    let take = 2 * leaves.len() - 2;
    for item in list.iter().take(take) {
        for &symbol in &item.symbols {
            lengths[symbol as usize] += 1;
        }
    }
    lengths
}

#[derive(Debug, Clone)]
struct PackageItem {
    weight: u64,
    symbols: Vec<u16>,
}

/// Merge by weight; leaves win ties so shorter codes go to original symbols.
fn merge_packages(leaves: &[PackageItem], packages: Vec<PackageItem>) -> Vec<PackageItem> {
    let mut merged = Vec::with_capacity(leaves.len() + packages.len());
    let mut leaves = leaves.iter().peekable();
    let mut packages = packages.into_iter().peekable();
    loop {
        let take_leaf = match (leaves.peek(), packages.peek()) {
            (Some(l), Some(p)) => l.weight <= p.weight,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        if take_leaf {
            if let Some(l) = leaves.next() {
                merged.push(l.clone());
            }
        } else if let Some(p) = packages.next() {
            merged.push(p);
        }
    }
    merged
}

/// Canonical codewords for `lengths`, already bit-reversed for LSB-first output.
///
/// Symbols are ordered by (length, symbol id); each codeword is the previous
/// one plus one, shifted left whenever the length grows.
pub fn canonical_codes(lengths: &[u8]) -> Vec<u32> {
    let mut order: Vec<usize> = (0..lengths.len()).filter(|&s| lengths[s] > 0).collect();
    order.sort_by_key(|&s| (lengths[s], s));

    let mut codes = vec![0u32; lengths.len()];
    let mut next = 0u32;
    let mut prev_len = order.first().map_or(0, |&s| u32::from(lengths[s]));
    for s in order {
        let len = u32::from(lengths[s]);
        next <<= len - prev_len;
        codes[s] = next.reverse_bits() >> (32 - len);
        next += 1;
        prev_len = len;
    }
    codes
}

/// Symbol to (codeword, length) map used while emitting bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HuffmanEncodeTable {
    lengths: Vec<u8>,
    codes: Vec<u32>,
}

impl HuffmanEncodeTable {
    /// Build a table from explicit code lengths.
    pub fn from_lengths(lengths: Vec<u8>) -> Self {
        let codes = canonical_codes(&lengths);
        Self { lengths, codes }
    }

    /// Number of symbols in the alphabet.
    pub fn symbol_count(&self) -> usize {
        self.lengths.len()
    }

    /// Per-symbol code lengths.
    pub fn code_lengths(&self) -> &[u8] {
        &self.lengths
    }

    /// Emit the codeword for `symbol`.
    ///
    /// The symbol must have been counted when the table was built.
    #[inline]
    pub fn encode(&self, writer: &mut BitWriter, symbol: u32) {
        let len = self.lengths[symbol as usize];
        assert!(len > 0, "symbol {symbol} was not seen while gathering statistics");
        writer.write(self.codes[symbol as usize], u32::from(len));
    }

    /// Write the symbol count and one 4-bit length per symbol.
    pub fn serialize(&self, writer: &mut BitWriter) {
        writer.write(self.lengths.len() as u32, 16);
        for &len in &self.lengths {
            writer.write(u32::from(len), 4);
        }
    }

    /// Size of the serialized table in bits.
    pub fn serialized_bits(&self) -> u64 {
        16 + 4 * self.lengths.len() as u64
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct DecodeEntry {
    symbol: u16,
    /// Zero marks a bit pattern no codeword matches.
    length: u8,
}

/// Flat `2^max_length` lookup table mapping bit patterns to symbols.
#[derive(Debug, Clone)]
pub struct HuffmanDecodeTable {
    entries: Vec<DecodeEntry>,
    max_length: u32,
    symbol_count: usize,
}

impl HuffmanDecodeTable {
    /// Read a serialized table and build the lookup array.
    pub fn read(reader: &mut BitReader<'_>) -> Result<Self> {
        let symbol_count = reader.read(16) as usize;
        let mut lengths = Vec::with_capacity(symbol_count);
        for _ in 0..symbol_count {
            lengths.push(reader.read(4) as u8);
        }
        if reader.is_overrun() {
            return Err(Error::InvalidHuffmanTable("truncated code lengths".into()));
        }
        Self::from_lengths(&lengths)
    }

    /// Build the lookup array from code lengths.
    pub fn from_lengths(lengths: &[u8]) -> Result<Self> {
        let max_length = lengths.iter().copied().max().unwrap_or(0) as u32;
        if max_length > MAX_CODE_LENGTH {
            return Err(Error::InvalidHuffmanTable(format!(
                "code length {max_length} exceeds {MAX_CODE_LENGTH}"
            )));
        }

        let kraft: u64 = lengths
            .iter()
            .filter(|&&l| l > 0)
            .map(|&l| 1u64 << (MAX_CODE_LENGTH - u32::from(l)))
            .sum();
        if kraft > 1u64 << MAX_CODE_LENGTH {
            return Err(Error::InvalidHuffmanTable("code lengths are over-subscribed".into()));
        }

        let codes = canonical_codes(lengths);
        let size = if max_length == 0 { 0 } else { 1usize << max_length };
        let mut entries = vec![DecodeEntry::default(); size];
        for (symbol, &len) in lengths.iter().enumerate() {
            if len == 0 {
                continue;
            }
            let step = 1usize << len;
            let mut pattern = codes[symbol] as usize;
            while pattern < size {
                entries[pattern] = DecodeEntry {
                    symbol: symbol as u16,
                    length: len,
                };
                pattern += step;
            }
        }

        Ok(Self {
            entries,
            max_length,
            symbol_count: lengths.len(),
        })
    }

    /// Number of symbols in the alphabet.
    pub fn symbol_count(&self) -> usize {
        self.symbol_count
    }

    /// Longest code length present in the table.
    pub fn max_length(&self) -> u32 {
        self.max_length
    }

    /// Decode one symbol.
    #[inline]
    pub fn decode(&self, reader: &mut BitReader<'_>) -> Result<u32> {
        if self.max_length == 0 {
            return Err(Error::corrupt("symbol read from an empty Huffman table"));
        }
        reader.refill();
        let entry = self.entries[reader.peek_no_refill(self.max_length) as usize];
        if entry.length == 0 {
            return Err(Error::corrupt("bit pattern matches no codeword"));
        }
        reader.skip(u32::from(entry.length));
        Ok(u32::from(entry.symbol))
    }
}

/// Split a signed value into (symbol, raw bits, raw bit count).
///
/// `-2..=1` map directly to symbols 0..=3. Other values code their bit length
/// `k` as a class symbol (even for positive, odd for negative) followed by the
/// `k - 1` bits below the leading one. Negative values code `!v`.
#[inline]
pub fn signed_to_symbol(value: i32) -> (u32, u32, u32) {
    if (-2..=1).contains(&value) {
        return ((value + 2) as u32, 0, 0);
    }
    let (magnitude, negative) = if value > 0 {
        (value as u32, 0)
    } else {
        (!value as u32, 1)
    };
    let bits = 32 - magnitude.leading_zeros();
    let symbol = 4 + (bits - 2) * 2 + negative;
    let raw_count = bits - 1;
    (symbol, magnitude - (1 << raw_count), raw_count)
}

/// Number of raw bits that follow a signed class symbol.
#[inline]
pub fn signed_raw_bit_count(symbol: u32) -> u32 {
    if symbol < 4 {
        0
    } else {
        (symbol - 4) / 2 + 1
    }
}

/// Inverse of [`signed_to_symbol`].
#[inline]
pub fn symbol_to_signed(symbol: u32, raw: u32) -> i32 {
    if symbol < 4 {
        return symbol as i32 - 2;
    }
    let raw_count = signed_raw_bit_count(symbol);
    let magnitude = (1u32 << raw_count) + raw;
    if (symbol - 4) & 1 == 0 {
        magnitude as i32
    } else {
        !(magnitude as i32)
    }
}

/// Decode a signed value coded with `table`.
#[inline]
pub fn read_signed(table: &HuffmanDecodeTable, reader: &mut BitReader<'_>) -> Result<i32> {
    let symbol = table.decode(reader)?;
    if symbol as usize >= SIGNED_SYMBOL_COUNT {
        return Err(Error::corrupt(format!("signed class symbol {symbol} out of range")));
    }
    let raw = reader.read(signed_raw_bit_count(symbol));
    Ok(symbol_to_signed(symbol, raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kraft_sum(lengths: &[u8]) -> f64 {
        lengths
            .iter()
            .filter(|&&l| l > 0)
            .map(|&l| 0.5f64.powi(l as i32))
            .sum()
    }

    #[test]
    fn test_lengths_simple() {
        let lengths = limited_code_lengths(&[5, 9, 12, 13, 16, 45], MAX_CODE_LENGTH);
        assert_eq!(lengths, vec![4, 4, 3, 3, 3, 1]);
        assert!((kraft_sum(&lengths) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_lengths_respect_limit() {
        // Fibonacci frequencies produce very deep unconstrained trees.
        let mut freqs = vec![1u32, 1];
        while freqs.len() < 30 {
            let n = freqs.len();
            freqs.push(freqs[n - 1] + freqs[n - 2]);
        }
        let lengths = limited_code_lengths(&freqs, MAX_CODE_LENGTH);
        assert!(lengths.iter().all(|&l| l >= 1 && u32::from(l) <= MAX_CODE_LENGTH));
        assert!((kraft_sum(&lengths) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_lengths_degenerate() {
        assert_eq!(limited_code_lengths(&[0, 0, 0], MAX_CODE_LENGTH), vec![0, 0, 0]);
        assert_eq!(limited_code_lengths(&[0, 7, 0], MAX_CODE_LENGTH), vec![0, 1, 0]);
        assert_eq!(limited_code_lengths(&[3, 0, 3], MAX_CODE_LENGTH), vec![1, 0, 1]);
    }

    #[test]
    fn test_canonical_codes_are_reversed() {
        // lengths 1,2,3,3 -> codes 0, 10, 110, 111
        let codes = canonical_codes(&[1, 2, 3, 3]);
        assert_eq!(codes, vec![0b0, 0b01, 0b011, 0b111]);
    }

    #[test]
    fn test_encode_decode_symbols() {
        let message: Vec<u32> = b"abracadabra, a canonical bananarama"
            .iter()
            .map(|&b| u32::from(b))
            .collect();

        let mut hist = SymbolHistogram::new(BYTE_SYMBOL_COUNT);
        for &s in &message {
            hist.record(s);
        }
        let table = hist.build();

        let mut w = BitWriter::new();
        table.serialize(&mut w);
        for &s in &message {
            table.encode(&mut w, s);
        }
        let bytes = w.into_bytes();

        let mut r = BitReader::new(&bytes);
        let decode = HuffmanDecodeTable::read(&mut r).expect("table");
        assert_eq!(decode.symbol_count(), BYTE_SYMBOL_COUNT);
        for &s in &message {
            assert_eq!(decode.decode(&mut r).expect("symbol"), s);
        }
    }

    #[test]
    fn test_single_symbol_table() {
        let mut hist = SymbolHistogram::new(SIGNED_SYMBOL_COUNT);
        for _ in 0..10 {
            hist.record(2);
        }
        let table = hist.build();
        assert_eq!(table.code_lengths()[2], 1);

        let mut w = BitWriter::new();
        for _ in 0..10 {
            table.encode(&mut w, 2);
        }
        let bytes = w.into_bytes();
        let decode = HuffmanDecodeTable::from_lengths(table.code_lengths()).expect("table");
        let mut r = BitReader::new(&bytes);
        for _ in 0..10 {
            assert_eq!(decode.decode(&mut r).expect("symbol"), 2);
        }
    }

    #[test]
    fn test_decode_rejects_bad_tables() {
        assert!(matches!(
            HuffmanDecodeTable::from_lengths(&[12, 1]),
            Err(Error::InvalidHuffmanTable(_))
        ));
        assert!(matches!(
            HuffmanDecodeTable::from_lengths(&[1, 1, 1]),
            Err(Error::InvalidHuffmanTable(_))
        ));
    }

    #[test]
    fn test_decode_unmatched_pattern() {
        let table = HuffmanDecodeTable::from_lengths(&[1, 0]).expect("table");
        let bytes = [0xFFu8; 4];
        let mut r = BitReader::new(&bytes);
        assert!(matches!(table.decode(&mut r), Err(Error::CorruptBitstream(_))));
    }

    #[test]
    fn test_empty_table_decode_fails() {
        let table = HuffmanDecodeTable::from_lengths(&[0; 64]).expect("table");
        let bytes = [0u8; 4];
        let mut r = BitReader::new(&bytes);
        assert!(table.decode(&mut r).is_err());
    }

    #[test]
    fn test_signed_mapping() {
        assert_eq!(signed_to_symbol(-2), (0, 0, 0));
        assert_eq!(signed_to_symbol(1), (3, 0, 0));
        assert_eq!(signed_to_symbol(2), (4, 0, 1));
        assert_eq!(signed_to_symbol(3), (4, 1, 1));
        assert_eq!(signed_to_symbol(-3), (5, 0, 1));
        assert_eq!(signed_to_symbol(i32::MAX).0, 62);
        assert_eq!(signed_to_symbol(i32::MIN).0, 63);

        for v in [-2, -1, 0, 1, 2, 3, 4, 7, 8, -3, -4, -5, -9, 1000, -1000, i32::MAX, i32::MIN] {
            let (symbol, raw, n) = signed_to_symbol(v);
            assert!((symbol as usize) < SIGNED_SYMBOL_COUNT);
            assert_eq!(signed_raw_bit_count(symbol), n);
            assert_eq!(symbol_to_signed(symbol, raw), v, "value {v}");
        }
    }
}
