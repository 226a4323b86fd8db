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

//! Rectangle encodings.
//!
//! Server-side, every encoding implements [`Encoder`]: it serializes one
//! rectangle's pixel payload into an update buffer. The session converts
//! pixels to the client's negotiated format before calling in, so encoders
//! only ever see packed buffers in that format.
//!
//! Client-side, each submodule exposes a `decode` entry point that consumes
//! one rectangle's payload from the wire and applies it to the local
//! framebuffer. Decoders always consume the full payload; pixels landing
//! outside the framebuffer (possible around a desktop resize) are
//! discarded, never an error.
//!
//! Encoders carrying compression state (`Zlib`, `Tight`) keep it for their
//! whole lifetime; a session creates them once per connection and the
//! stream dictionary persists across rectangles, as the protocol requires.

pub mod hextile;
pub mod raw;
pub mod tight;
pub mod zlib;

use bytes::BytesMut;

use crate::error::Result;
use crate::pixel_format::PixelFormat;
use crate::rect::Rectangle;

pub use tight::TightEncoder;
pub use zlib::{ZlibDecoder, ZlibEncoder};

/// Serializes rectangle payloads for one encoding.
pub trait Encoder: Send {
    /// The encoding identifier written into rectangle headers.
    fn encoding(&self) -> i32;

    /// Appends the payload for `region` to `buf` and returns the number of
    /// payload bytes written. `contents` is the region's pixels, packed with
    /// stride `region.width * bytes_per_pixel`, already in `pixel_format`.
    fn send(
        &mut self,
        buf: &mut BytesMut,
        pixel_format: &PixelFormat,
        region: Rectangle,
        contents: &[u8],
    ) -> Result<usize>;
}
