//! Optional canonical-Huffman entropy layer on top of the base chunk stream.
//!
//! When the colorspace byte's high bit is set, the bytes after the 14-byte header
//! are not the chunk stream directly: they are a 256-entry canonical-Huffman
//! codebook (one `{len: u8, bits: u16/u24/u32}` entry per byte value, `len == 0`
//! meaning the symbol never occurred), padding to the next 4-byte boundary, and
//! then the chunk stream packed LSB-first into 32-bit words, terminated by one
//! all-zero guard word.

mod builder;
mod decode;
mod heap;

#[cfg(feature = "alloc")]
mod encode;

pub(crate) use decode::decode_body;

#[cfg(feature = "alloc")]
pub(crate) use encode::encode_alloc;

/// Codes longer than this can't be packed into the fixed-width fields the
/// codebook reserves for them; building one means the layer isn't usable for this
/// image.
const MAX_CODE_LEN: u8 = 32;

/// Width of the direct lookup table used by the decoder: codes up to this many
/// bits decode with a single array index, longer ones fall back to a tree walk.
const DECODING_TABLE_WIDTH: u32 = 11;
const DECODING_TABLE_SIZE: usize = 1 << DECODING_TABLE_WIDTH;

/// Upper bound on tree-arena nodes: at most 256 leaves plus 256 internal branch
/// nodes for a binary tree over a byte alphabet.
const TREE_CAPACITY: usize = 512;
