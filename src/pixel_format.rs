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

//! RFB pixel formats and pixel-buffer conversion.
//!
//! A [`PixelFormat`] describes how one pixel is laid out in memory and on the
//! wire: total size, color depth, per-channel bit widths and shifts, byte
//! order, and whether the format is palettized. The 16-byte wire record is
//! defined in RFC 6143 Section 7.4.
//!
//! [`PixelFormat::copy`] is the single conversion routine the rest of the
//! crate uses to move rectangular pixel regions between buffers, converting
//! between true-color formats when they differ.

use bytes::{BufMut, BytesMut};

use crate::error::{Result, VncError};
use crate::rect::Rectangle;

/// Describes the low-level representation of a pixel.
///
/// Value type; two formats are interchangeable exactly when all fields match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    /// Storage size of one pixel in bits: 8, 16, or 32.
    pub bits_per_pixel: u8,
    /// Number of significant color bits (24 in practice).
    pub bit_depth: u8,
    /// Bits used for the red channel.
    pub red_bits: u8,
    /// Left shift of the red channel within the pixel value.
    pub red_shift: u8,
    /// Bits used for the green channel.
    pub green_bits: u8,
    /// Left shift of the green channel within the pixel value.
    pub green_shift: u8,
    /// Bits used for the blue channel.
    pub blue_bits: u8,
    /// Left shift of the blue channel within the pixel value.
    pub blue_shift: u8,
    /// True when multi-byte pixels are stored least-significant byte first.
    pub little_endian: bool,
    /// True for indexed-color formats; channel fields are meaningless then.
    pub palettized: bool,
}

/// Size of the pixel format record on the wire, in bytes.
pub const PIXEL_FORMAT_WIRE_SIZE: usize = 16;

impl PixelFormat {
    /// Creates a validated true-color pixel format.
    ///
    /// # Errors
    ///
    /// Returns [`VncError::UnsupportedPixelFormat`] when the storage size is
    /// not 8, 16, or 32 bits, when the depth exceeds the storage size, or
    /// when any channel reaches past the color depth.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bits_per_pixel: u8,
        bit_depth: u8,
        red_bits: u8,
        red_shift: u8,
        green_bits: u8,
        green_shift: u8,
        blue_bits: u8,
        blue_shift: u8,
        little_endian: bool,
    ) -> Result<Self> {
        if !matches!(bits_per_pixel, 8 | 16 | 32)
            || bit_depth > bits_per_pixel
            || red_bits > bit_depth
            || green_bits > bit_depth
            || blue_bits > bit_depth
            || u16::from(red_shift) + u16::from(red_bits) > u16::from(bits_per_pixel)
            || u16::from(green_shift) + u16::from(green_bits) > u16::from(bits_per_pixel)
            || u16::from(blue_shift) + u16::from(blue_bits) > u16::from(bits_per_pixel)
        {
            return Err(VncError::UnsupportedPixelFormat);
        }
        Ok(Self {
            bits_per_pixel,
            bit_depth,
            red_bits,
            red_shift,
            green_bits,
            green_shift,
            blue_bits,
            blue_shift,
            little_endian,
            palettized: false,
        })
    }

    /// The canonical 32-bit RGB format: 8 bits per channel at shifts
    /// 16/8/0, depth 24, little-endian. This is the format framebuffers
    /// default to.
    pub fn rgb32() -> Self {
        Self {
            bits_per_pixel: 32,
            bit_depth: 24,
            red_bits: 8,
            red_shift: 16,
            green_bits: 8,
            green_shift: 8,
            blue_bits: 8,
            blue_shift: 0,
            little_endian: true,
            palettized: false,
        }
    }

    /// Storage size of one pixel in whole bytes.
    pub fn bytes_per_pixel(&self) -> usize {
        usize::from(self.bits_per_pixel) / 8
    }

    /// True for 32-bit formats with 24-bit depth and three byte-aligned
    /// 8-bit channels. These qualify for the Tight encoding's 3-byte
    /// narrowed pixel representation.
    pub fn is_tight_narrowable(&self) -> bool {
        self.bits_per_pixel == 32
            && self.bit_depth == 24
            && !self.palettized
            && self.red_bits == 8
            && self.green_bits == 8
            && self.blue_bits == 8
    }

    /// Serializes the format into its 16-byte wire record.
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.bits_per_pixel);
        buf.put_u8(self.bit_depth);
        buf.put_u8(u8::from(!self.little_endian));
        buf.put_u8(u8::from(!self.palettized));
        buf.put_u16(channel_max(self.red_bits));
        buf.put_u16(channel_max(self.green_bits));
        buf.put_u16(channel_max(self.blue_bits));
        buf.put_u8(self.red_shift);
        buf.put_u8(self.green_shift);
        buf.put_u8(self.blue_shift);
        buf.put_slice(&[0u8; 3]);
    }

    /// Parses a 16-byte wire record.
    ///
    /// Channel bit widths are recovered from the channel maxima, which must
    /// each be one less than a power of two.
    ///
    /// # Errors
    ///
    /// Returns [`VncError::UnsupportedPixelFormat`] for malformed records.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < PIXEL_FORMAT_WIRE_SIZE {
            return Err(VncError::UnsupportedPixelFormat);
        }
        let bits_per_pixel = bytes[0];
        let bit_depth = bytes[1];
        let little_endian = bytes[2] == 0;
        let palettized = bytes[3] == 0;
        if palettized {
            if !matches!(bits_per_pixel, 8 | 16 | 32) || bit_depth > bits_per_pixel {
                return Err(VncError::UnsupportedPixelFormat);
            }
            return Ok(Self {
                bits_per_pixel,
                bit_depth,
                red_bits: 0,
                red_shift: 0,
                green_bits: 0,
                green_shift: 0,
                blue_bits: 0,
                blue_shift: 0,
                little_endian,
                palettized: true,
            });
        }
        let red_max = u16::from_be_bytes([bytes[4], bytes[5]]);
        let green_max = u16::from_be_bytes([bytes[6], bytes[7]]);
        let blue_max = u16::from_be_bytes([bytes[8], bytes[9]]);
        Self::new(
            bits_per_pixel,
            bit_depth,
            bits_from_max(red_max)?,
            bytes[10],
            bits_from_max(green_max)?,
            bytes[11],
            bits_from_max(blue_max)?,
            bytes[12],
            little_endian,
        )
    }

    /// Copies the `region` of `src` into `dst` at `(dst_x, dst_y)`,
    /// converting between formats when they differ.
    ///
    /// Strides are in bytes. Callers are responsible for clipping: every
    /// source and destination coordinate the region touches must lie within
    /// its buffer, and the caller holds whatever lock guards the buffers.
    /// Identical formats take a per-row `memcpy` fast path.
    #[allow(clippy::too_many_arguments)]
    pub fn copy(
        src: &[u8],
        src_stride: usize,
        src_format: &PixelFormat,
        region: Rectangle,
        dst: &mut [u8],
        dst_stride: usize,
        dst_format: &PixelFormat,
        dst_x: usize,
        dst_y: usize,
    ) {
        if region.is_empty() {
            return;
        }
        let w = usize::from(region.width);
        let h = usize::from(region.height);
        let src_bpp = src_format.bytes_per_pixel();
        let dst_bpp = dst_format.bytes_per_pixel();

        if src_format == dst_format {
            for row in 0..h {
                let s = (usize::from(region.y) + row) * src_stride + usize::from(region.x) * src_bpp;
                let d = (dst_y + row) * dst_stride + dst_x * dst_bpp;
                dst[d..d + w * dst_bpp].copy_from_slice(&src[s..s + w * src_bpp]);
            }
            return;
        }

        for row in 0..h {
            let mut s = (usize::from(region.y) + row) * src_stride + usize::from(region.x) * src_bpp;
            let mut d = (dst_y + row) * dst_stride + dst_x * dst_bpp;
            for _ in 0..w {
                let value = read_pixel(&src[s..s + src_bpp], src_format);
                let converted = convert_pixel(value, src_format, dst_format);
                write_pixel(&mut dst[d..d + dst_bpp], converted, dst_format);
                s += src_bpp;
                d += dst_bpp;
            }
        }
    }
}

impl Default for PixelFormat {
    fn default() -> Self {
        Self::rgb32()
    }
}

/// Largest value a channel of the given width can hold.
fn channel_max(bits: u8) -> u16 {
    if bits == 0 {
        0
    } else {
        ((1u32 << bits) - 1) as u16
    }
}

/// Recovers a channel width from its wire maximum, which must be `2^n - 1`.
fn bits_from_max(max: u16) -> Result<u8> {
    let max = u32::from(max);
    if max & (max + 1) != 0 {
        return Err(VncError::UnsupportedPixelFormat);
    }
    Ok((32 - max.leading_zeros()) as u8)
}

/// Reads one pixel value honoring the format's byte order.
pub(crate) fn read_pixel(bytes: &[u8], format: &PixelFormat) -> u32 {
    match (format.bits_per_pixel, format.little_endian) {
        (8, _) => u32::from(bytes[0]),
        (16, true) => u32::from(u16::from_le_bytes([bytes[0], bytes[1]])),
        (16, false) => u32::from(u16::from_be_bytes([bytes[0], bytes[1]])),
        (32, true) => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        (32, false) => u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        _ => 0,
    }
}

/// Writes one pixel value honoring the format's byte order.
pub(crate) fn write_pixel(bytes: &mut [u8], value: u32, format: &PixelFormat) {
    match (format.bits_per_pixel, format.little_endian) {
        (8, _) => bytes[0] = value as u8,
        (16, true) => bytes[..2].copy_from_slice(&(value as u16).to_le_bytes()),
        (16, false) => bytes[..2].copy_from_slice(&(value as u16).to_be_bytes()),
        (32, true) => bytes[..4].copy_from_slice(&value.to_le_bytes()),
        (32, false) => bytes[..4].copy_from_slice(&value.to_be_bytes()),
        _ => {}
    }
}

/// Re-packs a pixel value from one true-color layout into another.
fn convert_pixel(value: u32, from: &PixelFormat, to: &PixelFormat) -> u32 {
    let r = extract(value, from.red_shift, from.red_bits);
    let g = extract(value, from.green_shift, from.green_bits);
    let b = extract(value, from.blue_shift, from.blue_bits);
    place(r, from.red_bits, to.red_shift, to.red_bits)
        | place(g, from.green_bits, to.green_shift, to.green_bits)
        | place(b, from.blue_bits, to.blue_shift, to.blue_bits)
}

fn extract(value: u32, shift: u8, bits: u8) -> u32 {
    if bits == 0 {
        return 0;
    }
    (value >> shift) & ((1u32 << bits) - 1)
}

fn place(channel: u32, from_bits: u8, shift: u8, to_bits: u8) -> u32 {
    if to_bits == 0 {
        return 0;
    }
    let scaled = if to_bits >= from_bits {
        channel << (to_bits - from_bits)
    } else {
        channel >> (from_bits - to_bits)
    };
    scaled << shift
}
