//! Base chunk-stream encoder (component C).

use crate::pixel::{ColorCache, Pixel};
use crate::{cold, unlikely, EncodeError, ImageDesc, QOI_HEADER_SIZE, QOI_PADDING};
use crate::{QOI_MAGIC, QOI_OP_INDEX, QOI_OP_RGB, QOI_OP_RGBA, QOI_OP_RUN};

/// Encodes `pixels` (tightly packed, `P::CHANNELS` bytes per pixel) into `output`,
/// writing the 14-byte header, the chunk stream, and the 8-byte terminator.
///
/// Returns the total number of bytes written.
pub(crate) fn encode_body<P: Pixel>(
    desc: &ImageDesc,
    pixels: &[u8],
    output: &mut [u8],
) -> Result<usize, EncodeError> {
    let px_len = desc.pixel_count() * P::CHANNELS;
    let pixels = pixels.get(..px_len).ok_or(EncodeError::NotEnoughPixelData)?;

    if output.len() <= QOI_HEADER_SIZE {
        return Err(EncodeError::OutputIsTooSmall);
    }

    output[0..4].copy_from_slice(&QOI_MAGIC.to_be_bytes());
    output[4..8].copy_from_slice(&desc.width.to_be_bytes());
    output[8..12].copy_from_slice(&desc.height.to_be_bytes());
    output[12] = desc.channels;
    output[13] = desc.colorspace;

    let mut cache = ColorCache::<P>::new();

    let mut run = 0u16;
    let mut px_prev = P::new_opaque();

    let mut chunks = pixels.chunks_exact(P::CHANNELS);
    let mut rest = &mut output[QOI_HEADER_SIZE..];

    while let Some(pixel) = chunks.next() {
        if unlikely(rest.len() <= QOI_PADDING) {
            return Err(EncodeError::OutputIsTooSmall);
        }

        let px = P::read(pixel);

        if px == px_prev {
            run += 1;

            if run == 62 || chunks.len() == 0 {
                rest[0] = QOI_OP_RUN | (run - 1) as u8;
                rest = &mut rest[1..];
                run = 0;
            }
            continue;
        }

        if run > 0 {
            rest[0] = QOI_OP_RUN | (run - 1) as u8;
            rest = &mut rest[1..];
            run = 0;
        }

        match rest {
            [b1, b2, b3, b4, b5, ..] => {
                let index_pos = px.hash();

                if cache.get(index_pos) == px {
                    *b1 = QOI_OP_INDEX | index_pos;
                    rest = &mut rest[1..];
                } else {
                    cache.put(px);

                    if px_prev.a() == px.a() {
                        let v = px.var(&px_prev);

                        if let Some(diff) = v.diff() {
                            *b1 = diff;
                            rest = &mut rest[1..];
                        } else if let Some([lu, ma]) = v.luma() {
                            *b1 = lu;
                            *b2 = ma;
                            rest = &mut rest[2..];
                        } else {
                            *b1 = QOI_OP_RGB;
                            *b2 = px.r();
                            *b3 = px.g();
                            *b4 = px.b();
                            rest = &mut rest[4..];
                        }
                    } else {
                        *b1 = QOI_OP_RGBA;
                        *b2 = px.r();
                        *b3 = px.g();
                        *b4 = px.b();
                        *b5 = px.a();
                        rest = &mut rest[5..];
                    }
                }
            }
            _ => {
                cold();
                return Err(EncodeError::OutputIsTooSmall);
            }
        }

        px_prev = px;
    }

    if unlikely(rest.len() < QOI_PADDING) {
        return Err(EncodeError::OutputIsTooSmall);
    }

    rest[..7].fill(0);
    rest[7] = 1;

    let tail = rest.len() - QOI_PADDING;
    Ok(output.len() - tail)
}

/// Counts occurrences of each byte value in an encoded body (chunk stream plus
/// terminator), for the Huffman builder's input histogram.
///
/// Grounded on `qoi_write_8_histo`: every body byte feeds the histogram, including
/// the trailing `{0,0,0,0,0,0,0,1}` marker.
pub(crate) fn histogram_of(body: &[u8]) -> [u32; 256] {
    let mut histogram = [0u32; 256];
    for &byte in body {
        histogram[byte as usize] += 1;
    }
    histogram
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel::{Rgb, Rgba};

    #[test]
    fn single_opaque_black_pixel_is_a_run() {
        let desc = ImageDesc {
            width: 1,
            height: 1,
            channels: 3,
            colorspace: 0,
        };
        let pixels = [0u8, 0, 0];
        let mut out = [0u8; 64];
        let n = encode_body::<Rgb>(&desc, &pixels, &mut out).unwrap();

        assert_eq!(&out[..4], b"qoif");
        assert_eq!(out[12], 3);
        assert_eq!(&out[14..15], &[QOI_OP_RUN]); // run length 1 -> run-1 = 0
        assert_eq!(&out[n - 8..n], &[0, 0, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn not_enough_pixel_data_is_rejected() {
        let desc = ImageDesc {
            width: 4,
            height: 4,
            channels: 4,
            colorspace: 0,
        };
        let pixels = [0u8; 4]; // far short of 4*4*4 bytes
        let mut out = [0u8; 256];
        assert_eq!(
            encode_body::<Rgba>(&desc, &pixels, &mut out),
            Err(EncodeError::NotEnoughPixelData)
        );
    }

    #[test]
    fn output_too_small_is_rejected() {
        let desc = ImageDesc {
            width: 4,
            height: 4,
            channels: 3,
            colorspace: 0,
        };
        let pixels = [7u8; 4 * 4 * 3];
        let mut out = [0u8; QOI_HEADER_SIZE]; // no room for even one chunk
        assert_eq!(
            encode_body::<Rgb>(&desc, &pixels, &mut out),
            Err(EncodeError::OutputIsTooSmall)
        );
    }

    #[test]
    fn histogram_counts_every_body_byte() {
        let body = [0u8, 0, 0, 0, 0, 0, 0, 1];
        let histogram = histogram_of(&body);
        assert_eq!(histogram[0], 7);
        assert_eq!(histogram[1], 1);
    }
}
