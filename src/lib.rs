//! QOI - The "Quite OK Image" format for fast, lossless image compression, with an
//! optional canonical-Huffman entropy layer on top of the base byte stream.
//!
//! <https://phoboslab.org>
//!
//! # Data Format
//!
//! An image has a 14 byte header, followed by any number of data "chunks" and an
//! 8-byte end marker.
//!
//! ```rust
//! #[repr(C)]
//! struct Header {
//!     magic: [u8; 4], // magic bytes "qoif"
//!     width: u32,     // image width in pixels (BE)
//!     height: u32,    // image height in pixels (BE)
//!     channels: u8,   // 3 = RGB, 4 = RGBA
//!     colorspace: u8, // bit 0: 0 = sRGB with linear alpha, 1 = all channels linear
//!                     // bit 7: 1 = the chunk stream below is canonical-Huffman coded
//! }
//! ```
//! Images are encoded from top to bottom, left to right. The encoder and decoder
//! start with `{r: 0, g: 0, b: 0, a: 255}` as the previous pixel value. A stream is
//! complete when all pixels specified by width * height have been covered.
//!
//! Pixels are encoded as
//!  * a run of the previous pixel
//!  * an index into an array of previously seen pixels
//!  * a difference to the previous pixel value in r,g,b
//!  * full r,g,b or r,g,b,a values
//!
//! The color channels are assumed to not be premultiplied with the alpha channel
//! ("un-premultiplied alpha").
//!
//! A running `array: [u32; 64]` (zero-initialized) of previously seen pixel values is
//! maintained by the encoder and decoder. Each pixel that is seen by the encoder and
//! decoder is put into this array at the position formed by a hash function of the
//! color value. In the encoder, if the pixel value at the index matches the current
//! pixel, this index position is written to the stream as an index chunk.
//!
//! The hash function for the index is:
//! ```rust,ignore
//! index_position = (r * 3 + g * 5 + b * 7 + a * 11) % 64
//! ```
//!
//! If the colorspace's high bit is set, the chunk stream is not stored directly:
//! immediately after the header comes a 256-entry canonical-Huffman codebook, padding
//! to the next 4-byte boundary, then the chunk stream bit-packed LSB-first into 32-bit
//! words, terminated by one all-zero guard word. See [`mod@huffman`] for the codebook
//! and bit-packing layout.
//!
//! Each chunk starts with a 2- or 8-bit tag, followed by a number of data bits. The
//! bit length of chunks is divisible by 8 - i.e. all chunks are byte aligned. The
//! 8-bit tags have precedence over the 2-bit tags - a decoder must check for the
//! presence of an 8-bit tag first.
//!
//! The byte stream's end is marked with 7 `0x00` bytes followed by a single `0x01`
//! byte.
#![forbid(unsafe_code)]
#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

use core::fmt::{self, Display};

mod decode;
mod encode;
pub mod huffman;
mod io;
mod pixel;

pub(crate) use pixel::{Pixel, Rgb, Rgba};

const QOI_OP_INDEX: u8 = 0x00; /* 00xxxxxx */
const QOI_OP_DIFF: u8 = 0x40; /* 01xxxxxx */
const QOI_OP_LUMA: u8 = 0x80; /* 10xxxxxx */
const QOI_OP_RUN: u8 = 0xc0; /* 11xxxxxx */
const QOI_OP_RGB: u8 = 0xfe; /* 11111110 */
const QOI_OP_RGBA: u8 = 0xff; /* 11111111 */
const QOI_MASK_2: u8 = 0xc0;

const QOI_MAGIC: u32 = u32::from_be_bytes(*b"qoif");
const QOI_HEADER_SIZE: usize = 14;
const QOI_PADDING: usize = 8;
const QOI_PADDING_BYTES: [u8; QOI_PADDING] = [0, 0, 0, 0, 0, 0, 0, 1];

/// The reserved high bit of the colorspace header byte: set when the chunk stream
/// after the header is canonical-Huffman coded rather than stored directly.
const HUFFMAN_MODE_BIT: u8 = 0x80;

/// 2GB is the max file size that this implementation can safely handle. We guard
/// against anything larger than that, assuming the worst case with 5 bytes per pixel,
/// rounded down to a nice clean value. 400 million pixels ought to be enough for
/// anybody.
const QOI_PIXELS_MAX: u32 = 400_000_000;

#[inline(always)]
#[cold]
fn cold() {}

#[inline(always)]
fn likely(b: bool) -> bool {
    if !b {
        cold();
    }
    b
}

#[inline(always)]
fn unlikely(b: bool) -> bool {
    if b {
        cold();
    }
    b
}

/// Image descriptor.
///
/// Describes the input pixel data for encoding, or is filled in from the stream
/// header when decoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageDesc {
    /// Width of the image in pixels. Must be non-zero.
    pub width: u32,

    /// Height of the image in pixels. Must be non-zero.
    pub height: u32,

    /// Number of color channels: 3 (RGB) or 4 (RGBA).
    pub channels: u8,

    /// Colorspace metadata: `0` = sRGB with linear alpha, `1` = all channels linear.
    /// Purely informative - never affects en-/decoding. The high bit is reserved for
    /// the Huffman-mode flag and is masked off before being exposed here.
    pub colorspace: u8,
}

impl ImageDesc {
    #[inline]
    fn has_alpha(&self) -> bool {
        self.channels == 4
    }

    #[inline]
    fn validate(&self) -> bool {
        self.width != 0
            && self.height != 0
            && (self.channels == 3 || self.channels == 4)
            && self.colorspace <= 1
            && self.height < QOI_PIXELS_MAX / self.width
    }

    #[inline]
    fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Errors that may occur during image encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EncodeError {
    /// Pixels buffer is too small for the image.
    NotEnoughPixelData,

    /// Output buffer is too small to fit the encoded image.
    OutputIsTooSmall,

    /// Image descriptor has invalid dimensions, channel count, or colorspace.
    InvalidDescriptor,
}

impl Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::NotEnoughPixelData => f.write_str("Pixels buffer is too small for image"),
            EncodeError::OutputIsTooSmall => {
                f.write_str("Output buffer is too small to fit encoded image")
            }
            EncodeError::InvalidDescriptor => f.write_str("Image descriptor is invalid"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for EncodeError {}

/// Errors that may occur during image decoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DecodeError {
    /// Buffer does not contain enough encoded data to decode the image.
    NotEnoughData,

    /// Encoded header contains an invalid magic value. First four bytes must contain
    /// `b"qoif"`. This usually indicates that the buffer does not contain a QOI
    /// image.
    InvalidMagic,

    /// Encoded header contains an invalid channels value. Only `3` or `4` are valid.
    InvalidChannelsValue,

    /// Encoded header contains an invalid color space value.
    InvalidColorSpaceValue,

    /// Encoded header describes dimensions too large for this implementation.
    ImageTooLarge,

    /// Requested channel count is neither `0` (same as header), `3`, nor `4`.
    InvalidRequestedChannels,

    /// Output buffer is too small to fit the decoded image.
    OutputIsTooSmall,

    /// The 8-byte end marker is missing or does not equal `{0,0,0,0,0,0,0,1}`.
    MissingTerminator,

    /// The Huffman codebook is truncated or internally inconsistent.
    CorruptCodebook,

    /// The Huffman-packed body ran out of bits before all pixels were decoded.
    TruncatedBitstream,
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::NotEnoughData => {
                f.write_str("Buffer does not contain enough encoded data")
            }
            DecodeError::InvalidMagic => f.write_str("Encoded header contains invalid magic value"),
            DecodeError::InvalidChannelsValue => {
                f.write_str("Encoded header contains invalid channels number. Must be 3 or 4")
            }
            DecodeError::InvalidColorSpaceValue => {
                f.write_str("Encoded header contains invalid color space value. Must be 0 or 1")
            }
            DecodeError::ImageTooLarge => {
                f.write_str("Encoded header describes dimensions that are too large")
            }
            DecodeError::InvalidRequestedChannels => {
                f.write_str("Requested channel count must be 0, 3, or 4")
            }
            DecodeError::OutputIsTooSmall => {
                f.write_str("Output buffer is too small to fit decoded image")
            }
            DecodeError::MissingTerminator => {
                f.write_str("Encoded stream is missing its end marker")
            }
            DecodeError::CorruptCodebook => f.write_str("Huffman codebook is truncated or corrupt"),
            DecodeError::TruncatedBitstream => {
                f.write_str("Huffman-packed body ended before all pixels were decoded")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DecodeError {}

impl ImageDesc {
    /// Returns the maximum size of the `encode` output, for sizing a caller-owned
    /// buffer. Using a smaller slice may cause [`ImageDesc::encode`] to return
    /// `Err(EncodeError::OutputIsTooSmall)`.
    pub fn encoded_size_limit(&self) -> usize {
        self.width as usize * self.height as usize * (self.has_alpha() as usize + 4)
            + QOI_HEADER_SIZE
            + QOI_PADDING
    }

    /// Encodes raw RGB or RGBA pixels into the base (non-Huffman) chunk stream,
    /// written into `output`.
    ///
    /// This is the stable wire format alone - see [`ImageDesc::encode_alloc`] for the
    /// full codec, which additionally attempts the Huffman layer and picks whichever
    /// is smaller.
    pub fn encode(&self, pixels: &[u8], output: &mut [u8]) -> Result<usize, EncodeError> {
        if !self.validate() {
            return Err(EncodeError::InvalidDescriptor);
        }

        match self.has_alpha() {
            true => encode::encode_body::<Rgba>(self, pixels, output),
            false => encode::encode_body::<Rgb>(self, pixels, output),
        }
    }

    /// Encodes raw RGB or RGBA pixels into an owned buffer, running the base encoder
    /// and then attempting the canonical-Huffman layer on top of it, returning
    /// whichever stream is smaller (component I, the codec dispatcher).
    #[cfg(feature = "alloc")]
    pub fn encode_alloc(&self, pixels: &[u8]) -> Result<alloc::vec::Vec<u8>, EncodeError> {
        use alloc::vec;

        let limit = self.encoded_size_limit();
        let mut base = vec![0; limit];
        let base_len = self.encode(pixels, &mut base)?;
        base.truncate(base_len);

        match huffman::encode_alloc(self, &base) {
            Some(huffman) if huffman.len() < base.len() => Ok(huffman),
            _ => Ok(base),
        }
    }

    /// Reads the header from an encoded image. The returned descriptor's
    /// `colorspace` has the Huffman-mode bit already masked off.
    pub fn decode_header(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < QOI_HEADER_SIZE + QOI_PADDING {
            return Err(DecodeError::NotEnoughData);
        }

        let magic = io::read_u32_be(bytes, 0);
        if magic != QOI_MAGIC {
            return Err(DecodeError::InvalidMagic);
        }

        let width = io::read_u32_be(bytes, 4);
        let height = io::read_u32_be(bytes, 8);
        let channels = bytes[12];
        let colorspace = bytes[13] & !HUFFMAN_MODE_BIT;

        if width == 0 || height == 0 || channels < 3 || channels > 4 {
            return Err(DecodeError::InvalidChannelsValue);
        }
        if colorspace > 1 {
            return Err(DecodeError::InvalidColorSpaceValue);
        }
        if height >= QOI_PIXELS_MAX / width {
            return Err(DecodeError::ImageTooLarge);
        }

        Ok(ImageDesc {
            width,
            height,
            channels,
            colorspace,
        })
    }

    /// Returns whether `bytes` (a full encoded stream, header included) carries the
    /// Huffman-mode flag.
    fn is_huffman(bytes: &[u8]) -> bool {
        bytes.len() > 13 && bytes[13] & HUFFMAN_MODE_BIT != 0
    }

    /// Decodes an image from `bytes` into `output`, dispatching to the base or
    /// Huffman body decoder depending on the stream's mode bit (component I).
    ///
    /// `requested_channels` is `0` for "same as header", or `3`/`4` to force the
    /// output layout.
    pub fn decode(
        bytes: &[u8],
        output: &mut [u8],
        requested_channels: u8,
    ) -> Result<Self, DecodeError> {
        if requested_channels != 0 && requested_channels != 3 && requested_channels != 4 {
            return Err(DecodeError::InvalidRequestedChannels);
        }

        let desc = Self::decode_header(bytes)?;
        let channels = if requested_channels == 0 {
            desc.channels
        } else {
            requested_channels
        };

        let px_len = desc.pixel_count() * channels as usize;
        let output = output
            .get_mut(..px_len)
            .ok_or(DecodeError::OutputIsTooSmall)?;

        if Self::is_huffman(bytes) {
            huffman::decode_body(&desc, bytes, output, channels)?;
        } else {
            let body = &bytes[QOI_HEADER_SIZE..];
            decode::check_terminator(body)?;
            match desc.has_alpha() {
                true => decode::decode_body::<Rgba>(body, output, channels)?,
                false => decode::decode_body::<Rgb>(body, output, channels)?,
            }
        }

        Ok(desc)
    }

    /// Decodes an image from `bytes` into a freshly allocated buffer.
    #[cfg(feature = "alloc")]
    pub fn decode_alloc(
        bytes: &[u8],
        requested_channels: u8,
    ) -> Result<(Self, alloc::vec::Vec<u8>), DecodeError> {
        use alloc::vec;

        if requested_channels != 0 && requested_channels != 3 && requested_channels != 4 {
            return Err(DecodeError::InvalidRequestedChannels);
        }

        let header = Self::decode_header(bytes)?;
        let channels = if requested_channels == 0 {
            header.channels
        } else {
            requested_channels
        };

        let size = header.pixel_count() * channels as usize;
        let mut output = vec![0; size];
        let desc = Self::decode(bytes, &mut output, requested_channels)?;
        Ok((desc, output))
    }
}
