//! Codebook serialization and LSB-first bit packing (component G).

use alloc::vec::Vec;

use super::builder::{self, CodeEntry};
use super::MAX_CODE_LEN;
use crate::encode::histogram_of;
use crate::{ImageDesc, HUFFMAN_MODE_BIT, QOI_HEADER_SIZE, QOI_MAGIC};

/// Runs the base stream through the canonical-Huffman layer, returning `None` when
/// the layer isn't worth using: a degenerate histogram (no usable code for some
/// symbol that occurs), a code longer than 32 bits, or a projected size that
/// doesn't clear the size-saving threshold.
///
/// `base` is a complete base-codec stream: 14-byte header, chunk body, terminator.
pub(crate) fn encode_alloc(desc: &ImageDesc, base: &[u8]) -> Option<Vec<u8>> {
    let body = base.get(QOI_HEADER_SIZE..)?;
    let histogram = histogram_of(body);
    let table = builder::build_code_table(&histogram);

    for (symbol, count) in histogram.iter().enumerate() {
        if *count > 0 && table[symbol].len == 0 {
            return None;
        }
        if table[symbol].len > MAX_CODE_LEN {
            return None;
        }
    }

    // Rough size estimate: a generous worst-case codebook (1280 bytes) plus the
    // packed body, mirroring the reference's own budget heuristic.
    let mut expected_bits: u64 = (1024 + 256) * 8;
    for (symbol, count) in histogram.iter().enumerate() {
        expected_bits += u64::from(*count) * u64::from(table[symbol].len);
    }
    let expected_size = expected_bits / 8;

    if expected_size > 10 * 1024 && expected_size as f64 > base.len() as f64 * 0.97 {
        return None;
    }

    let mut out = Vec::with_capacity(expected_size as usize + 64);

    out.extend_from_slice(&QOI_MAGIC.to_be_bytes());
    out.extend_from_slice(&desc.width.to_be_bytes());
    out.extend_from_slice(&desc.height.to_be_bytes());
    out.push(desc.channels);
    out.push(desc.colorspace | HUFFMAN_MODE_BIT);

    write_codebook(&mut out, &table);

    while out.len() % 4 != 0 {
        out.push(0);
    }

    pack_body(&mut out, body, &table);

    Some(out)
}

fn write_codebook(out: &mut Vec<u8>, table: &[CodeEntry; 256]) {
    for entry in table.iter() {
        out.push(entry.len);
        match entry.len {
            0..=16 => out.extend_from_slice(&(entry.bits as u16).to_be_bytes()),
            17..=24 => out.extend_from_slice(&entry.bits.to_be_bytes()[1..]),
            _ => out.extend_from_slice(&entry.bits.to_be_bytes()),
        }
    }
}

fn pack_body(out: &mut Vec<u8>, body: &[u8], table: &[CodeEntry; 256]) {
    let mut words: Vec<u32> = alloc::vec![0];
    let mut word_idx = 0usize;
    let mut bit_idx: u32 = 0;

    for &byte in body {
        let entry = table[byte as usize];
        let bits = entry.bits;
        let len = u32::from(entry.len);

        words[word_idx] |= bits << bit_idx;
        let new_bit_idx = bit_idx + len;

        if new_bit_idx >= 32 {
            words.push(0);
            word_idx += 1;
        }
        if new_bit_idx > 32 {
            words[word_idx] |= bits >> (32 - bit_idx);
        }

        bit_idx = new_bit_idx % 32;
    }

    words.push(0); // all-zero guard word

    for word in words {
        out.extend_from_slice(&word.to_le_bytes());
    }
}
