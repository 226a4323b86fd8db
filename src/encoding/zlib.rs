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

//! Zlib encoding: raw pixels deflated through one persistent stream.
//!
//! Each rectangle's payload is a 4-byte big-endian length followed by
//! deflated raw pixel data. The deflate stream lives for the whole
//! connection and is full-flushed at every rectangle boundary, so each
//! payload is decodable on arrival while later rectangles still profit from
//! the accumulated dictionary. Encoder and decoder state must never be
//! reset mid-connection or the streams fall out of step.

use bytes::{BufMut, BytesMut};
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress};

use crate::error::{Result, VncError};
use crate::pixel_format::PixelFormat;
use crate::protocol::ENCODING_ZLIB;
use crate::rect::Rectangle;

use super::Encoder;

/// Sanity bound for a single compressed payload announced by the peer.
pub const MAX_ZLIB_PAYLOAD: usize = 0x1000_0000;

/// Server-side Zlib encoder with its persistent deflate stream.
pub struct ZlibEncoder {
    stream: Compress,
}

impl ZlibEncoder {
    /// Creates the encoder with a fresh deflate stream at `level` (0-9).
    pub fn new(level: u32) -> Self {
        Self {
            stream: Compress::new(Compression::new(level.min(9)), true),
        }
    }
}

impl Default for ZlibEncoder {
    fn default() -> Self {
        Self::new(6)
    }
}

impl Encoder for ZlibEncoder {
    fn encoding(&self) -> i32 {
        ENCODING_ZLIB
    }

    fn send(
        &mut self,
        buf: &mut BytesMut,
        _pixel_format: &PixelFormat,
        _region: Rectangle,
        contents: &[u8],
    ) -> Result<usize> {
        let compressed = deflate_through(&mut self.stream, contents, FlushCompress::Full)?;
        buf.put_u32(compressed.len() as u32);
        buf.put_slice(&compressed);
        Ok(4 + compressed.len())
    }
}

/// Client-side Zlib decoder with its persistent inflate stream.
pub struct ZlibDecoder {
    stream: Decompress,
}

impl ZlibDecoder {
    /// Creates the decoder with a fresh inflate stream.
    pub fn new() -> Self {
        Self {
            stream: Decompress::new(true),
        }
    }

    /// Inflates one rectangle payload into exactly `expected` bytes of raw
    /// pixel data.
    ///
    /// # Errors
    ///
    /// [`VncError::UnrecognizedProtocolElement`] when the payload is corrupt
    /// or does not inflate to the expected size.
    pub fn decode(&mut self, input: &[u8], expected: usize) -> Result<Vec<u8>> {
        let base_in = self.stream.total_in();
        let mut out = Vec::with_capacity(expected);
        loop {
            let consumed = (self.stream.total_in() - base_in) as usize;
            self.stream
                .decompress_vec(&input[consumed..], &mut out, FlushDecompress::None)
                .map_err(|_| VncError::UnrecognizedProtocolElement("zlib stream"))?;
            if out.len() >= expected {
                break;
            }
            let consumed = (self.stream.total_in() - base_in) as usize;
            if consumed == input.len() {
                return Err(VncError::UnrecognizedProtocolElement("zlib payload size"));
            }
            if out.len() == out.capacity() {
                out.reserve(64);
            }
        }
        if out.len() != expected {
            return Err(VncError::UnrecognizedProtocolElement("zlib payload size"));
        }
        Ok(out)
    }
}

impl Default for ZlibDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `input` through a persistent deflate stream with the given flush,
/// returning the bytes produced for this call.
pub(super) fn deflate_through(
    stream: &mut Compress,
    input: &[u8],
    flush: FlushCompress,
) -> Result<Vec<u8>> {
    let base_in = stream.total_in();
    // Worst case deflate expands slightly; leave room so the flush can
    // complete without a second pass in the common case.
    let mut out = Vec::with_capacity(input.len() + input.len() / 1000 + 128);
    loop {
        let consumed = (stream.total_in() - base_in) as usize;
        stream
            .compress_vec(&input[consumed..], &mut out, flush)
            .map_err(|e| {
                VncError::Network(std::io::Error::new(std::io::ErrorKind::Other, e))
            })?;
        let consumed = (stream.total_in() - base_in) as usize;
        if consumed == input.len() && out.len() < out.capacity() {
            break;
        }
        out.reserve(out.capacity().max(128));
    }
    Ok(out)
}
