// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Tight encoding: control-byte driven compression.
//!
//! Every rectangle starts with a control byte. The low four bits are
//! stream-reset flags for the four persistent zlib streams; the high bits
//! select basic compression (with bits 4-5 naming the stream), solid fill,
//! or JPEG. This encoder always emits basic compression over stream 0.
//!
//! Before compression, 32-bit pixels in a 24-bit-depth 8-8-8 format are
//! narrowed to 3 bytes each (the protocol's TPIXEL representation), which
//! alone saves a quarter of the bandwidth. Payloads shorter than 12 bytes
//! skip compression entirely and are sent without a length prefix; anything
//! longer is deflated with a sync flush so the persistent dictionary
//! carries over to the next rectangle, prefixed with the compact
//! variable-length integer the Tight encoding uses for sizes.
//!
//! Compression level and JPEG quality are negotiated through the reserved
//! pseudo-encoding ranges; see [`levels_from_encodings`].

use bytes::{BufMut, BytesMut};
use flate2::{Compress, Compression, FlushCompress};

use crate::error::Result;
use crate::pixel_format::{read_pixel, PixelFormat};
use crate::protocol::{
    ENCODING_COMPRESS_LEVEL_0, ENCODING_COMPRESS_LEVEL_9, ENCODING_QUALITY_LEVEL_0,
    ENCODING_QUALITY_LEVEL_9, ENCODING_TIGHT, TIGHT_BASIC,
};
use crate::rect::Rectangle;

use super::zlib::deflate_through;
use super::Encoder;

/// Payloads shorter than this go uncompressed, without a length prefix.
const MIN_BYTES_TO_COMPRESS: usize = 12;

/// Default compression level when the client sent no preference.
const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Extracts the Tight tuning hints from a client's encoding list: the zlib
/// compression level (0-9, default 6) and the JPEG quality level (0-9, none
/// when absent).
pub fn levels_from_encodings(encodings: &[i32]) -> (u32, Option<u8>) {
    let mut compression = DEFAULT_COMPRESSION_LEVEL;
    let mut quality = None;
    for &encoding in encodings {
        if (ENCODING_COMPRESS_LEVEL_0..=ENCODING_COMPRESS_LEVEL_9).contains(&encoding) {
            compression = (encoding - ENCODING_COMPRESS_LEVEL_0) as u32;
        } else if (ENCODING_QUALITY_LEVEL_0..=ENCODING_QUALITY_LEVEL_9).contains(&encoding) {
            quality = Some((encoding - ENCODING_QUALITY_LEVEL_0) as u8);
        }
    }
    (compression, quality)
}

/// Server-side Tight encoder with its four persistent zlib streams.
pub struct TightEncoder {
    streams: [Option<Compress>; 4],
    compression_level: u32,
    #[allow(dead_code)] // Tracked from negotiation; used once a JPEG path exists.
    quality: Option<u8>,
}

impl TightEncoder {
    /// Creates the encoder with the negotiated tuning hints.
    pub fn new(compression_level: u32, quality: Option<u8>) -> Self {
        Self {
            streams: [None, None, None, None],
            compression_level: compression_level.min(9),
            quality,
        }
    }

    fn stream(&mut self, index: usize) -> &mut Compress {
        let level = self.compression_level;
        self.streams[index]
            .get_or_insert_with(|| Compress::new(Compression::new(level), true))
    }
}

impl Default for TightEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_LEVEL, None)
    }
}

impl Encoder for TightEncoder {
    fn encoding(&self) -> i32 {
        ENCODING_TIGHT
    }

    fn send(
        &mut self,
        buf: &mut BytesMut,
        pixel_format: &PixelFormat,
        _region: Rectangle,
        contents: &[u8],
    ) -> Result<usize> {
        let start = buf.len();
        let data = if pixel_format.is_tight_narrowable() {
            narrow_to_tpixel(contents, pixel_format)
        } else {
            contents.to_vec()
        };

        // Basic compression over stream 0, no resets.
        buf.put_u8(TIGHT_BASIC);
        if data.len() < MIN_BYTES_TO_COMPRESS {
            buf.put_slice(&data);
        } else {
            let compressed = deflate_through(self.stream(0), &data, FlushCompress::Sync)?;
            put_compact_length(buf, compressed.len());
            buf.put_slice(&compressed);
        }
        Ok(buf.len() - start)
    }
}

/// Drops the padding byte from 32-bit 8-8-8 pixels, yielding the 3-byte
/// TPIXEL representation in R, G, B order.
fn narrow_to_tpixel(contents: &[u8], format: &PixelFormat) -> Vec<u8> {
    let mut out = Vec::with_capacity(contents.len() / 4 * 3);
    for chunk in contents.chunks_exact(4) {
        let value = read_pixel(chunk, format);
        out.push((value >> format.red_shift) as u8);
        out.push((value >> format.green_shift) as u8);
        out.push((value >> format.blue_shift) as u8);
    }
    out
}

/// Writes a length in the Tight compact representation: 7 bits per byte,
/// high bit as continuation, at most 3 bytes (22 bits).
fn put_compact_length(buf: &mut BytesMut, len: usize) {
    if len < 0x80 {
        buf.put_u8(len as u8);
    } else if len < 0x4000 {
        buf.put_u8((len & 0x7f) as u8 | 0x80);
        buf.put_u8((len >> 7) as u8);
    } else {
        buf.put_u8((len & 0x7f) as u8 | 0x80);
        buf.put_u8(((len >> 7) & 0x7f) as u8 | 0x80);
        buf.put_u8((len >> 14) as u8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{Decompress, FlushDecompress};

    fn read_compact_length(data: &[u8], pos: &mut usize) -> usize {
        let mut len = 0usize;
        for shift in [0u32, 7, 14] {
            let byte = data[*pos];
            *pos += 1;
            len |= usize::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
        }
        len
    }

    /// Minimal peer-side decode of a basic-compression Tight payload.
    fn decode_basic(
        data: &[u8],
        pos: &mut usize,
        inflater: &mut Decompress,
        expected: usize,
    ) -> Vec<u8> {
        let control = data[*pos];
        *pos += 1;
        assert_eq!(control, TIGHT_BASIC);
        if expected < MIN_BYTES_TO_COMPRESS {
            let out = data[*pos..*pos + expected].to_vec();
            *pos += expected;
            return out;
        }
        let len = read_compact_length(data, pos);
        let input = &data[*pos..*pos + len];
        *pos += len;
        let mut out = Vec::with_capacity(expected);
        let base = inflater.total_in();
        while out.len() < expected {
            let consumed = (inflater.total_in() - base) as usize;
            inflater
                .decompress_vec(&input[consumed..], &mut out, FlushDecompress::None)
                .unwrap();
        }
        out
    }

    #[test]
    fn narrowed_rectangle_round_trips() {
        let format = PixelFormat::rgb32();
        let region = Rectangle::new(0, 0, 16, 8);
        let mut contents = Vec::new();
        for i in 0..region.area() {
            contents.extend_from_slice(&[(i % 7) as u8, (i % 11) as u8, (i % 13) as u8, 0]);
        }

        let mut encoder = TightEncoder::default();
        let mut buf = BytesMut::new();
        encoder.send(&mut buf, &format, region, &contents).unwrap();

        let expected = 16 * 8 * 3; // TPIXEL narrows to 3 bytes
        let mut pos = 0;
        let mut inflater = Decompress::new(true);
        let tpixels = decode_basic(&buf, &mut pos, &mut inflater, expected);
        assert_eq!(pos, buf.len());

        // Reconstruct and compare against the original 32-bit pixels.
        for (chunk, orig) in tpixels.chunks_exact(3).zip(contents.chunks_exact(4)) {
            let value = read_pixel(orig, &format);
            assert_eq!(chunk[0], (value >> format.red_shift) as u8);
            assert_eq!(chunk[1], (value >> format.green_shift) as u8);
            assert_eq!(chunk[2], (value >> format.blue_shift) as u8);
        }
    }

    #[test]
    fn tiny_payload_bypasses_compression() {
        let format = PixelFormat::rgb32();
        let region = Rectangle::new(0, 0, 3, 1); // 9 TPIXEL bytes
        let contents = vec![0x42u8; 3 * 4];
        let mut encoder = TightEncoder::default();
        let mut buf = BytesMut::new();
        encoder.send(&mut buf, &format, region, &contents).unwrap();
        // Control byte plus 9 literal bytes, no length prefix.
        assert_eq!(buf.len(), 1 + 9);
        assert_eq!(buf[0], TIGHT_BASIC);
    }

    #[test]
    fn stream_persists_across_rectangles() {
        let format = PixelFormat::rgb32();
        let region = Rectangle::new(0, 0, 32, 32);
        let contents = vec![0x10u8; 32 * 32 * 4];

        let mut encoder = TightEncoder::default();
        let mut inflater = Decompress::new(true);
        for _ in 0..2 {
            let mut buf = BytesMut::new();
            encoder.send(&mut buf, &format, region, &contents).unwrap();
            let mut pos = 0;
            let out = decode_basic(&buf, &mut pos, &mut inflater, 32 * 32 * 3);
            assert!(out.iter().all(|&b| b == 0x10));
        }
    }

    #[test]
    fn non_narrowable_format_keeps_full_pixels() {
        let format = PixelFormat::new(16, 16, 5, 11, 6, 5, 5, 0, true).unwrap();
        let region = Rectangle::new(0, 0, 8, 8);
        let contents: Vec<u8> = (0..8 * 8 * 2).map(|i| (i % 251) as u8).collect();
        let mut encoder = TightEncoder::default();
        let mut buf = BytesMut::new();
        encoder.send(&mut buf, &format, region, &contents).unwrap();

        let mut pos = 0;
        let mut inflater = Decompress::new(true);
        let out = decode_basic(&buf, &mut pos, &mut inflater, contents.len());
        assert_eq!(out, contents);
    }

    #[test]
    fn compact_length_layout() {
        let mut buf = BytesMut::new();
        put_compact_length(&mut buf, 0x7f);
        assert_eq!(&buf[..], &[0x7f]);
        buf.clear();
        put_compact_length(&mut buf, 0x80);
        assert_eq!(&buf[..], &[0x80, 0x01]);
        buf.clear();
        put_compact_length(&mut buf, 0x12_3456);
        let mut pos = 0;
        assert_eq!(read_compact_length(&buf, &mut pos), 0x12_3456);
    }

    #[test]
    fn levels_parse_from_pseudo_encodings() {
        assert_eq!(levels_from_encodings(&[]), (6, None));
        assert_eq!(levels_from_encodings(&[-256 + 9, -32 + 4]), (9, Some(4)));
        assert_eq!(levels_from_encodings(&[7, 6, -247]), (9, None));
        assert_eq!(levels_from_encodings(&[-23]), (6, Some(9)));
    }
}
