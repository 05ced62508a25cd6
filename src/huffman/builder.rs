//! Canonical Huffman tree construction from a byte histogram (component F).

use super::heap::MinHeap;

/// The per-symbol code assigned by [`build_code_table`]. `len == 0` means the
/// symbol never occurred in the histogram this table was built from.
#[derive(Clone, Copy)]
pub(crate) struct CodeEntry {
    pub(crate) len: u8,
    pub(crate) bits: u32,
}

struct TreeNode {
    left: u16,
    right: u16,
}

/// Builds a canonical Huffman code from `histogram`, covering only the symbols that
/// actually occur (non-zero count). Unused symbols are left at `{len: 0, bits: 0}`,
/// matching the codebook convention that a zero length means "did not occur".
///
/// A histogram with a single distinct symbol produces `len == 0` for that symbol too
/// - there's nothing to distinguish it from, so no code is meaningful; callers treat
/// that the same as "too few symbols to bother" and skip the Huffman layer.
///
/// A code can come out longer than 32 bits when the histogram is heavily skewed;
/// callers must check `len` before committing to the packed bitstream.
pub(crate) fn build_code_table(histogram: &[u32; 256]) -> [CodeEntry; 256] {
    let mut weights = [0u32; 512];
    weights[..256].copy_from_slice(histogram);

    let mut tree: [TreeNode; 256] = core::array::from_fn(|_| TreeNode { left: 0, right: 0 });
    let mut table: [CodeEntry; 256] = core::array::from_fn(|_| CodeEntry { len: 0, bits: 0 });

    let mut heap = MinHeap::new();
    for symbol in 0..256u16 {
        if histogram[symbol as usize] > 0 {
            heap.push(symbol, &weights);
        }
    }

    if heap.len() < 2 {
        // 0 symbols: empty body, nothing to decode. 1 symbol: see doc comment above.
        return table;
    }

    let mut next_free = 256u16;
    while heap.len() > 1 {
        let left = heap.pop(&weights);
        let right = heap.pop(&weights);

        weights[next_free as usize] = weights[left as usize] + weights[right as usize];
        tree[(next_free - 256) as usize] = TreeNode { left, right };

        heap.push(next_free, &weights);
        next_free += 1;
    }

    let root = heap.pop(&weights);
    assign_codes(&tree, &mut table, root, 0, 0);
    table
}

fn assign_codes(tree: &[TreeNode; 256], table: &mut [CodeEntry; 256], node: u16, bits: u32, len: u8) {
    if node < 256 {
        table[node as usize] = CodeEntry { len, bits };
        return;
    }

    let branch = &tree[(node - 256) as usize];
    assign_codes(tree, table, branch.left, bits, len + 1);
    assign_codes(tree, table, branch.right, bits | 1u32.wrapping_shl(len as u32), len + 1);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_prefix_free(table: &[CodeEntry; 256]) {
        for a in 0..256 {
            if table[a].len == 0 {
                continue;
            }
            for b in 0..256 {
                if a == b || table[b].len == 0 || table[a].len >= table[b].len {
                    continue;
                }
                let mask = (1u32 << table[a].len) - 1;
                assert_ne!(
                    table[a].bits & mask,
                    table[b].bits & mask,
                    "code for {a} is a prefix of code for {b}"
                );
            }
        }
    }

    #[test]
    fn skewed_histogram_yields_short_codes_for_frequent_symbols() {
        let mut histogram = [0u32; 256];
        histogram[b'a' as usize] = 10_000;
        histogram[b'b' as usize] = 5_000;
        histogram[b'c' as usize] = 1;
        histogram[b'd' as usize] = 1;

        let table = build_code_table(&histogram);
        is_prefix_free(&table);

        assert!(table[b'a' as usize].len <= table[b'b' as usize].len);
        assert!(table[b'b' as usize].len <= table[b'c' as usize].len);
    }

    #[test]
    fn unused_symbols_keep_a_zero_length_code() {
        let mut histogram = [0u32; 256];
        histogram[0] = 5;
        histogram[1] = 5;
        histogram[2] = 1;

        let table = build_code_table(&histogram);
        assert_eq!(table[3].len, 0);
        assert_eq!(table[255].len, 0);
    }

    #[test]
    fn single_symbol_histogram_has_no_usable_code() {
        let mut histogram = [0u32; 256];
        histogram[42] = 1000;

        let table = build_code_table(&histogram);
        assert_eq!(table[42].len, 0);
    }

    #[test]
    fn fibonacci_weighted_histogram_produces_a_code_over_32_bits() {
        // A superincreasing (Fibonacci) weight sequence forces the classic
        // maximally skewed "caterpillar" Huffman tree, whose depth is one less
        // than its leaf count - comfortably past the 32-bit code length limit
        // that the entropy layer is willing to pack.
        let mut histogram = [0u32; 256];
        let (mut a, mut b) = (1u32, 1u32);
        for symbol in 0..40usize {
            histogram[symbol] = a;
            let next = a + b;
            a = b;
            b = next;
        }

        let table = build_code_table(&histogram);
        assert!(table.iter().any(|entry| entry.len > 32));
    }
}
