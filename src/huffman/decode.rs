//! Codebook reconstruction and bit-unpacking decoder (component H).

use super::{DECODING_TABLE_SIZE, DECODING_TABLE_WIDTH, TREE_CAPACITY};
use crate::pixel::{ColorCache, Pixel};
use crate::{
    io, DecodeError, ImageDesc, Rgb, Rgba, QOI_HEADER_SIZE, QOI_MASK_2, QOI_OP_DIFF, QOI_OP_INDEX,
    QOI_OP_LUMA, QOI_OP_RGB, QOI_OP_RGBA, QOI_PADDING_BYTES,
};

/// A slot in the direct lookup table: either empty (no code maps here), a leaf for
/// a code of `DECODING_TABLE_WIDTH` bits or fewer, or an index into `tree` for a
/// longer code that shares this prefix.
#[derive(Clone, Copy)]
enum TableSlot {
    Empty,
    Leaf { byte: u8, len: u8 },
    Tree(u16),
}

/// A node in the overflow tree arena, walked one bit at a time for codes longer
/// than the direct table's width.
#[derive(Clone, Copy)]
enum TreeNode {
    Branch {
        left: Option<u16>,
        right: Option<u16>,
    },
    Leaf {
        byte: u8,
        len: u8,
    },
}

/// Decodes a Huffman-coded stream (component H): reconstructs the codebook's
/// lookup table from `bytes`, then unpacks the chunk stream it describes straight
/// into `output`.
///
/// `desc` is the already-parsed header (Huffman-mode bit masked off); `bytes` is
/// the complete encoded buffer, header included; `output` is pre-sized to
/// `width * height * channels`.
pub(crate) fn decode_body(
    desc: &ImageDesc,
    bytes: &[u8],
    output: &mut [u8],
    channels: u8,
) -> Result<(), DecodeError> {
    let mut table = [TableSlot::Empty; DECODING_TABLE_SIZE];
    let mut tree = [TreeNode::Branch {
        left: None,
        right: None,
    }; TREE_CAPACITY];
    let mut next_free = 0u16;

    let mut p = QOI_HEADER_SIZE;
    for symbol in 0..256u16 {
        let len = *bytes.get(p).ok_or(DecodeError::CorruptCodebook)?;
        p += 1;

        let bits = match len {
            0..=16 => {
                if p + 2 > bytes.len() {
                    return Err(DecodeError::CorruptCodebook);
                }
                let v = u32::from(io::read_u16_be(bytes, p));
                p += 2;
                v
            }
            17..=24 => {
                if p + 3 > bytes.len() {
                    return Err(DecodeError::CorruptCodebook);
                }
                let v = io::read_u24_be(bytes, p);
                p += 3;
                v
            }
            _ => {
                if p + 4 > bytes.len() {
                    return Err(DecodeError::CorruptCodebook);
                }
                let v = io::read_u32_be(bytes, p);
                p += 4;
                v
            }
        };

        if len == 0 {
            continue;
        }

        insert(&mut table, &mut tree, &mut next_free, symbol as u8, len, bits)?;
    }

    let word_start = (p + 3) / 4 * 4;
    let words = bytes.get(word_start..).ok_or(DecodeError::NotEnoughData)?;

    match desc.channels {
        4 => decode_chunks::<Rgba>(&table, &tree, words, output, channels),
        _ => decode_chunks::<Rgb>(&table, &tree, words, output, channels),
    }
}

/// Adds one codebook entry to the direct lookup table (and the overflow tree, for
/// codes longer than `DECODING_TABLE_WIDTH` bits).
fn insert(
    table: &mut [TableSlot; DECODING_TABLE_SIZE],
    tree: &mut [TreeNode; TREE_CAPACITY],
    next_free: &mut u16,
    byte: u8,
    len: u8,
    bits: u32,
) -> Result<(), DecodeError> {
    if u32::from(len) <= DECODING_TABLE_WIDTH {
        // A short code leaves `DECODING_TABLE_WIDTH - len` high bits unconstrained:
        // every table index matching the code in its low bits is a valid entry.
        let padding = DECODING_TABLE_WIDTH - u32::from(len);
        let span = 1u32 << padding;
        for high in 0..span {
            let index = ((high << len) | bits) as usize;
            table[index] = TableSlot::Leaf { byte, len };
        }
        return Ok(());
    }

    let low_bits = bits & (DECODING_TABLE_SIZE as u32 - 1);
    let overflow_bits = bits >> DECODING_TABLE_WIDTH;
    let overflow_len = len - DECODING_TABLE_WIDTH as u8;

    let mut node = match table[low_bits as usize] {
        TableSlot::Tree(idx) => idx,
        TableSlot::Empty => {
            let idx = alloc_branch(tree, next_free)?;
            table[low_bits as usize] = TableSlot::Tree(idx);
            idx
        }
        TableSlot::Leaf { .. } => return Err(DecodeError::CorruptCodebook),
    };

    for step in 0..overflow_len {
        let bit = (overflow_bits >> step) & 1 == 1;
        let last = step + 1 == overflow_len;

        let (left, right) = match &mut tree[node as usize] {
            TreeNode::Branch { left, right } => (left, right),
            TreeNode::Leaf { .. } => return Err(DecodeError::CorruptCodebook),
        };
        let slot = if bit { right } else { left };

        if last {
            if slot.is_some() {
                return Err(DecodeError::CorruptCodebook);
            }
            let leaf = alloc_leaf(tree, next_free, byte, len)?;
            match &mut tree[node as usize] {
                TreeNode::Branch { left, right } => {
                    *(if bit { right } else { left }) = Some(leaf);
                }
                TreeNode::Leaf { .. } => unreachable!(),
            }
        } else {
            node = match *slot {
                Some(idx) => idx,
                None => {
                    let idx = alloc_branch(tree, next_free)?;
                    match &mut tree[node as usize] {
                        TreeNode::Branch { left, right } => {
                            *(if bit { right } else { left }) = Some(idx);
                        }
                        TreeNode::Leaf { .. } => unreachable!(),
                    }
                    idx
                }
            };
        }
    }

    Ok(())
}

fn alloc_branch(
    tree: &mut [TreeNode; TREE_CAPACITY],
    next_free: &mut u16,
) -> Result<u16, DecodeError> {
    let idx = *next_free;
    if idx as usize >= TREE_CAPACITY {
        return Err(DecodeError::CorruptCodebook);
    }
    tree[idx as usize] = TreeNode::Branch {
        left: None,
        right: None,
    };
    *next_free += 1;
    Ok(idx)
}

fn alloc_leaf(
    tree: &mut [TreeNode; TREE_CAPACITY],
    next_free: &mut u16,
    byte: u8,
    len: u8,
) -> Result<u16, DecodeError> {
    let idx = *next_free;
    if idx as usize >= TREE_CAPACITY {
        return Err(DecodeError::CorruptCodebook);
    }
    tree[idx as usize] = TreeNode::Leaf { byte, len };
    *next_free += 1;
    Ok(idx)
}

/// Decodes one Huffman symbol starting at `(*word_idx, *bit_idx)`, advancing the
/// cursor past it. Reads a 64-bit window from two adjacent little-endian `u32`
/// words so a code can straddle a word boundary without special-casing it.
fn next_byte(
    words: &[u8],
    word_idx: &mut usize,
    bit_idx: &mut u32,
    table: &[TableSlot; DECODING_TABLE_SIZE],
    tree: &[TreeNode; TREE_CAPACITY],
) -> Result<u8, DecodeError> {
    let total_words = words.len() / 4;
    if *word_idx + 1 >= total_words {
        return Err(DecodeError::TruncatedBitstream);
    }

    let w0 = u32::from_le_bytes(words[*word_idx * 4..*word_idx * 4 + 4].try_into().unwrap());
    let w1 = u32::from_le_bytes(
        words[(*word_idx + 1) * 4..(*word_idx + 1) * 4 + 4]
            .try_into()
            .unwrap(),
    );
    let window = (u64::from(w0) | (u64::from(w1) << 32)) >> *bit_idx;

    let direct = (window as usize) & (DECODING_TABLE_SIZE - 1);
    let (byte, len) = match table[direct] {
        TableSlot::Leaf { byte, len } => (byte, len),
        TableSlot::Tree(root) => {
            let mut node = root;
            let mut remaining = window >> DECODING_TABLE_WIDTH;
            loop {
                match tree[node as usize] {
                    TreeNode::Leaf { byte, len } => break (byte, len),
                    TreeNode::Branch { left, right } => {
                        let bit = remaining & 1 == 1;
                        remaining >>= 1;
                        node = if bit {
                            right.ok_or(DecodeError::CorruptCodebook)?
                        } else {
                            left.ok_or(DecodeError::CorruptCodebook)?
                        };
                    }
                }
            }
        }
        TableSlot::Empty => return Err(DecodeError::CorruptCodebook),
    };

    let advanced = *bit_idx + u32::from(len);
    *word_idx += (advanced / 32) as usize;
    *bit_idx = advanced % 32;

    Ok(byte)
}

fn decode_chunks<P: Pixel>(
    table: &[TableSlot; DECODING_TABLE_SIZE],
    tree: &[TreeNode; TREE_CAPACITY],
    words: &[u8],
    output: &mut [u8],
    channels: u8,
) -> Result<(), DecodeError> {
    let channels = channels as usize;
    let mut cache = ColorCache::<P>::new();
    let mut px = P::new_opaque();
    let mut run: u32 = 0;
    let mut word_idx = 0usize;
    let mut bit_idx = 0u32;

    for out in output.chunks_exact_mut(channels) {
        if run > 0 {
            run -= 1;
        } else {
            let tag = next_byte(words, &mut word_idx, &mut bit_idx, table, tree)?;

            match tag {
                QOI_OP_RGB => {
                    let r = next_byte(words, &mut word_idx, &mut bit_idx, table, tree)?;
                    let g = next_byte(words, &mut word_idx, &mut bit_idx, table, tree)?;
                    let b = next_byte(words, &mut word_idx, &mut bit_idx, table, tree)?;
                    px.set_rgb(r, g, b);
                    cache.put(px);
                }
                QOI_OP_RGBA => {
                    let r = next_byte(words, &mut word_idx, &mut bit_idx, table, tree)?;
                    let g = next_byte(words, &mut word_idx, &mut bit_idx, table, tree)?;
                    let b = next_byte(words, &mut word_idx, &mut bit_idx, table, tree)?;
                    let a = next_byte(words, &mut word_idx, &mut bit_idx, table, tree)?;
                    px.set_rgba(r, g, b, a);
                    cache.put(px);
                }
                _ if tag & QOI_MASK_2 == QOI_OP_INDEX => {
                    px = cache.get(tag);
                }
                _ if tag & QOI_MASK_2 == QOI_OP_DIFF => {
                    let vr = ((tag >> 4) & 0x03).wrapping_sub(2);
                    let vg = ((tag >> 2) & 0x03).wrapping_sub(2);
                    let vb = (tag & 0x03).wrapping_sub(2);
                    px.add_rgb(vr, vg, vb);
                    cache.put(px);
                }
                _ if tag & QOI_MASK_2 == QOI_OP_LUMA => {
                    let b2 = next_byte(words, &mut word_idx, &mut bit_idx, table, tree)?;
                    let vg = (tag & 0x3f).wrapping_sub(32);
                    let vr = ((b2 >> 4) & 0x0f).wrapping_sub(8).wrapping_add(vg);
                    let vb = (b2 & 0x0f).wrapping_sub(8).wrapping_add(vg);
                    px.add_rgb(vr, vg, vb);
                    cache.put(px);
                }
                _ => {
                    // top two bits are 11 but it's neither QOI_OP_RGB nor QOI_OP_RGBA: a run.
                    run = (tag & 0x3f) as u32;
                }
            }
        }

        out[0] = px.r();
        out[1] = px.g();
        out[2] = px.b();
        if channels == 4 {
            out[3] = px.a();
        }
    }

    for &expected in QOI_PADDING_BYTES.iter() {
        let byte = next_byte(words, &mut word_idx, &mut bit_idx, table, tree)?;
        if byte != expected {
            return Err(DecodeError::MissingTerminator);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn codebook_bytes(entries: &[(u8, u8, u32)]) -> Vec<u8> {
        let mut table = [(0u8, 0u32); 256];
        for &(symbol, len, bits) in entries {
            table[symbol as usize] = (len, bits);
        }

        let mut out: Vec<u8> = Vec::new();
        for &(len, bits) in table.iter() {
            out.push(len);
            match len {
                0..=16 => out.extend_from_slice(&(bits as u16).to_be_bytes()),
                17..=24 => out.extend_from_slice(&bits.to_be_bytes()[1..]),
                _ => out.extend_from_slice(&bits.to_be_bytes()),
            }
        }
        out
    }

    #[test]
    fn corrupt_codebook_is_rejected() {
        let bytes = [0u8; 4]; // far too short to hold a 14-byte header + codebook
        let desc = ImageDesc {
            width: 1,
            height: 1,
            channels: 3,
            colorspace: 0,
        };
        let mut out = [0u8; 3];
        assert_eq!(
            decode_body(&desc, &bytes, &mut out, 3),
            Err(DecodeError::CorruptCodebook)
        );
    }

    #[test]
    fn single_symbol_direct_table_round_trips() {
        // symbol 0 gets the 1-bit code `0`, symbol 1 gets the 1-bit code `1` - a
        // complete, full binary codebook. The bitstream spells out one INDEX(0)
        // pixel tag followed directly by the 8-byte terminator {0,0,0,0,0,0,0,1},
        // which is 7 more `symbol 0`s and one `symbol 1` - 9 bits total, fitting in
        // the low byte of a single word.
        let mut bytes: Vec<u8> = Vec::new();
        bytes.extend_from_slice(&[b'q', b'o', b'i', b'f']);
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.push(3);
        bytes.push(0x80); // huffman-mode bit set on the wire; desc.channels is pre-masked

        bytes.extend_from_slice(&codebook_bytes(&[(0, 1, 0), (1, 1, 1)]));
        while bytes.len() % 4 != 0 {
            bytes.push(0);
        }
        bytes.extend_from_slice(&0x100u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());

        let desc = ImageDesc {
            width: 1,
            height: 1,
            channels: 3,
            colorspace: 0,
        };
        let mut out = [0xffu8; 3];
        decode_body(&desc, &bytes, &mut out, 3).unwrap();
        assert_eq!(out, [0, 0, 0]);
    }

    #[test]
    fn corrupted_trailing_byte_is_rejected_as_missing_terminator() {
        // Same codebook and pixel as above, but the terminator's last bit is
        // flipped - it must surface as a terminator error, not a silent success.
        let mut bytes: Vec<u8> = Vec::new();
        bytes.extend_from_slice(&[b'q', b'o', b'i', b'f']);
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.push(3);
        bytes.push(0x80);

        bytes.extend_from_slice(&codebook_bytes(&[(0, 1, 0), (1, 1, 1)]));
        while bytes.len() % 4 != 0 {
            bytes.push(0);
        }
        // Dropping the lone set bit means the terminator's last byte decodes to 0
        // instead of 1.
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());

        let desc = ImageDesc {
            width: 1,
            height: 1,
            channels: 3,
            colorspace: 0,
        };
        let mut out = [0xffu8; 3];
        assert_eq!(
            decode_body(&desc, &bytes, &mut out, 3),
            Err(DecodeError::MissingTerminator)
        );
    }
}
