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

//! Hextile encoding: 16x16 sub-tiles with per-tile sub-encodings.
//!
//! Each rectangle is split into 16x16 tiles in scan order (right and bottom
//! edge tiles may be smaller). A one-byte sub-encoding per tile says whether
//! it is raw pixel data or a background fill, optionally with foreground
//! subrectangles packed two bytes each. Background and foreground colors
//! persist from tile to tile within one rectangle, which is where most of
//! the compression comes from on flat content.
//!
//! The encoder emits: background-only for solid tiles, background plus
//! monochrome subrectangle runs for two-color tiles, raw for everything
//! else (and for two-color tiles that would need more than 255 subrects).

use bytes::{BufMut, BytesMut};
use tokio::io::AsyncRead;

use crate::error::Result;
use crate::framebuffer::Framebuffer;
use crate::pixel_format::PixelFormat;
use crate::protocol::{
    ENCODING_HEXTILE, HEXTILE_ANY_SUBRECTS, HEXTILE_BACKGROUND_SPECIFIED,
    HEXTILE_FOREGROUND_SPECIFIED, HEXTILE_RAW, HEXTILE_SUBRECTS_COLOURED,
};
use crate::rect::Rectangle;
use crate::stream::RfbReader;

use super::Encoder;

const SUBTILE: u16 = 16;

/// Emits rectangles as Hextile tiles.
pub struct HextileEncoder;

impl Encoder for HextileEncoder {
    fn encoding(&self) -> i32 {
        ENCODING_HEXTILE
    }

    fn send(
        &mut self,
        buf: &mut BytesMut,
        pixel_format: &PixelFormat,
        region: Rectangle,
        contents: &[u8],
    ) -> Result<usize> {
        let bpp = pixel_format.bytes_per_pixel();
        let stride = usize::from(region.width) * bpp;
        let start = buf.len();

        // bg/fg persist across tiles within one rectangle.
        let mut bg: Option<Vec<u8>> = None;
        let mut fg: Option<Vec<u8>> = None;

        let mut ty = 0u16;
        while ty < region.height {
            let th = SUBTILE.min(region.height - ty);
            let mut tx = 0u16;
            while tx < region.width {
                let tw = SUBTILE.min(region.width - tx);
                let tile = gather_tile(contents, stride, bpp, tx, ty, tw, th);
                encode_tile(buf, &tile, tw, th, bpp, &mut bg, &mut fg);
                tx += SUBTILE;
            }
            ty += SUBTILE;
        }
        Ok(buf.len() - start)
    }
}

/// Copies one tile's pixels out of the packed rectangle buffer.
fn gather_tile(
    contents: &[u8],
    stride: usize,
    bpp: usize,
    tx: u16,
    ty: u16,
    tw: u16,
    th: u16,
) -> Vec<u8> {
    let tile_stride = usize::from(tw) * bpp;
    let mut tile = vec![0u8; tile_stride * usize::from(th)];
    for row in 0..usize::from(th) {
        let s = (usize::from(ty) + row) * stride + usize::from(tx) * bpp;
        let d = row * tile_stride;
        tile[d..d + tile_stride].copy_from_slice(&contents[s..s + tile_stride]);
    }
    tile
}

fn encode_tile(
    buf: &mut BytesMut,
    tile: &[u8],
    tw: u16,
    th: u16,
    bpp: usize,
    bg: &mut Option<Vec<u8>>,
    fg: &mut Option<Vec<u8>>,
) {
    let pixel_count = usize::from(tw) * usize::from(th);

    // Classify the tile: one color, two colors, or more.
    let first = &tile[0..bpp];
    let mut second: Option<&[u8]> = None;
    let mut first_count = 0usize;
    let mut multicolor = false;
    for i in 0..pixel_count {
        let p = &tile[i * bpp..(i + 1) * bpp];
        if p == first {
            first_count += 1;
        } else {
            match second {
                None => second = Some(p),
                Some(s) if s == p => {}
                Some(_) => {
                    multicolor = true;
                    break;
                }
            }
        }
    }

    if multicolor {
        emit_raw(buf, tile, bg, fg);
        return;
    }

    let Some(second) = second else {
        // Solid tile.
        if bg.as_deref() == Some(first) {
            buf.put_u8(0);
        } else {
            buf.put_u8(HEXTILE_BACKGROUND_SPECIFIED);
            buf.put_slice(first);
            *bg = Some(first.to_vec());
        }
        return;
    };

    // Two colors: the more frequent becomes the background.
    let (bg_color, fg_color) = if first_count * 2 >= pixel_count {
        (first, second)
    } else {
        (second, first)
    };

    // Horizontal runs of the foreground color, one subrect per run.
    let mut runs: Vec<(u16, u16, u16)> = Vec::new();
    for y in 0..th {
        let mut x = 0u16;
        while x < tw {
            let i = (usize::from(y) * usize::from(tw) + usize::from(x)) * bpp;
            if &tile[i..i + bpp] == fg_color {
                let run_start = x;
                while x < tw {
                    let j = (usize::from(y) * usize::from(tw) + usize::from(x)) * bpp;
                    if &tile[j..j + bpp] != fg_color {
                        break;
                    }
                    x += 1;
                }
                runs.push((run_start, y, x - run_start));
            } else {
                x += 1;
            }
        }
    }

    // The subrect count field is one byte.
    if runs.len() > 255 {
        emit_raw(buf, tile, bg, fg);
        return;
    }

    let mut flags = HEXTILE_ANY_SUBRECTS;
    if bg.as_deref() != Some(bg_color) {
        flags |= HEXTILE_BACKGROUND_SPECIFIED;
    }
    if fg.as_deref() != Some(fg_color) {
        flags |= HEXTILE_FOREGROUND_SPECIFIED;
    }
    buf.put_u8(flags);
    if flags & HEXTILE_BACKGROUND_SPECIFIED != 0 {
        buf.put_slice(bg_color);
        *bg = Some(bg_color.to_vec());
    }
    if flags & HEXTILE_FOREGROUND_SPECIFIED != 0 {
        buf.put_slice(fg_color);
        *fg = Some(fg_color.to_vec());
    }
    buf.put_u8(runs.len() as u8);
    for (x, y, w) in runs {
        buf.put_u8((x << 4) as u8 | y as u8);
        buf.put_u8(((w - 1) << 4) as u8); // height - 1 is 0 for row runs
    }
}

fn emit_raw(buf: &mut BytesMut, tile: &[u8], bg: &mut Option<Vec<u8>>, fg: &mut Option<Vec<u8>>) {
    buf.put_u8(HEXTILE_RAW);
    buf.put_slice(tile);
    // Raw tiles leave the persisted colors undefined per the protocol.
    *bg = None;
    *fg = None;
}

/// Consumes one Hextile rectangle from the wire and applies its in-range
/// portion to `framebuffer`.
pub async fn decode<R: AsyncRead + Unpin>(
    reader: &mut RfbReader<R>,
    framebuffer: &Framebuffer,
    region: Rectangle,
) -> Result<()> {
    let format = *framebuffer.pixel_format();
    let bpp = format.bytes_per_pixel();
    let mut bg = vec![0u8; bpp];
    let mut fg = vec![0u8; bpp];

    let mut ty = 0u16;
    while ty < region.height {
        let th = SUBTILE.min(region.height - ty);
        let mut tx = 0u16;
        while tx < region.width {
            let tw = SUBTILE.min(region.width - tx);
            let tile_stride = usize::from(tw) * bpp;
            let mut tile = vec![0u8; tile_stride * usize::from(th)];

            let sub = reader.receive_byte().await?;
            if sub & HEXTILE_RAW != 0 {
                reader.receive(&mut tile).await?;
            } else {
                if sub & HEXTILE_BACKGROUND_SPECIFIED != 0 {
                    reader.receive(&mut bg).await?;
                }
                if sub & HEXTILE_FOREGROUND_SPECIFIED != 0 {
                    reader.receive(&mut fg).await?;
                }
                for chunk in tile.chunks_exact_mut(bpp) {
                    chunk.copy_from_slice(&bg);
                }
                if sub & HEXTILE_ANY_SUBRECTS != 0 {
                    let count = reader.receive_byte().await?;
                    let mut color = fg.clone();
                    for _ in 0..count {
                        if sub & HEXTILE_SUBRECTS_COLOURED != 0 {
                            reader.receive(&mut color).await?;
                        } else {
                            color.copy_from_slice(&fg);
                        }
                        let xy = reader.receive_byte().await?;
                        let wh = reader.receive_byte().await?;
                        let sx = u16::from(xy >> 4);
                        let sy = u16::from(xy & 0xf);
                        let sw = u16::from(wh >> 4) + 1;
                        let sh = u16::from(wh & 0xf) + 1;
                        // Clip inside the tile; a peer could claim a run
                        // past the tile edge.
                        for y in sy..(sy + sh).min(th) {
                            for x in sx..(sx + sw).min(tw) {
                                let o = usize::from(y) * tile_stride + usize::from(x) * bpp;
                                tile[o..o + bpp].copy_from_slice(&color);
                            }
                        }
                    }
                }
            }

            apply_tile(framebuffer, &format, region, tx, ty, tw, th, &tile).await;
            tx += SUBTILE;
        }
        ty += SUBTILE;
    }
    Ok(())
}

/// Writes a decoded tile into the framebuffer, discarding any out-of-range
/// portion.
#[allow(clippy::too_many_arguments)]
async fn apply_tile(
    framebuffer: &Framebuffer,
    format: &PixelFormat,
    region: Rectangle,
    tx: u16,
    ty: u16,
    tw: u16,
    th: u16,
    tile: &[u8],
) {
    let global = Rectangle::new(region.x + tx, region.y + ty, tw, th);
    let visible = global.intersect(&framebuffer.bounds());
    if visible.is_empty() {
        return;
    }
    let source = Rectangle::new(
        visible.x - global.x,
        visible.y - global.y,
        visible.width,
        visible.height,
    );
    let bpp = format.bytes_per_pixel();
    let mut pixels = framebuffer.pixels_mut().await;
    PixelFormat::copy(
        tile,
        usize::from(tw) * bpp,
        format,
        source,
        &mut pixels,
        framebuffer.stride(),
        format,
        usize::from(visible.x),
        usize::from(visible.y),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn round_trip(region: Rectangle, contents: &[u8]) -> Framebuffer {
        let mut encoder = HextileEncoder;
        let mut buf = BytesMut::new();
        encoder
            .send(&mut buf, &PixelFormat::rgb32(), region, contents)
            .unwrap();
        let fb = Framebuffer::new(
            "t",
            region.x + region.width,
            region.y + region.height,
            PixelFormat::rgb32(),
        );
        let mut reader = RfbReader::new(&buf[..]);
        decode(&mut reader, &fb, region).await.unwrap();
        fb
    }

    fn pixel(r: u8, g: u8, b: u8) -> [u8; 4] {
        [b, g, r, 0]
    }

    #[tokio::test]
    async fn solid_rectangle_round_trips_compactly() {
        let region = Rectangle::new(0, 0, 48, 32);
        let mut contents = Vec::new();
        for _ in 0..region.area() {
            contents.extend_from_slice(&pixel(10, 20, 30));
        }

        let mut encoder = HextileEncoder;
        let mut buf = BytesMut::new();
        encoder
            .send(&mut buf, &PixelFormat::rgb32(), region, &contents)
            .unwrap();
        // First tile specifies the background, the remaining five reuse it.
        assert_eq!(buf.len(), (1 + 4) + 5);

        let fb = round_trip(region, &contents).await;
        assert_eq!(fb.get_rect(region, fb.pixel_format()).await, contents);
    }

    #[tokio::test]
    async fn two_color_rectangle_round_trips() {
        let region = Rectangle::new(0, 0, 32, 16);
        let bg = pixel(0, 0, 0);
        let fg = pixel(255, 255, 255);
        let mut contents = Vec::new();
        for y in 0..region.height {
            for x in 0..region.width {
                if (x / 4 + y / 4) % 2 == 0 {
                    contents.extend_from_slice(&fg);
                } else {
                    contents.extend_from_slice(&bg);
                }
            }
        }
        let fb = round_trip(region, &contents).await;
        assert_eq!(fb.get_rect(region, fb.pixel_format()).await, contents);
    }

    #[tokio::test]
    async fn multicolor_rectangle_round_trips_raw() {
        let region = Rectangle::new(0, 0, 20, 20);
        let mut contents = Vec::new();
        for i in 0..region.area() {
            contents.extend_from_slice(&pixel(i as u8, (i / 3) as u8, (i / 7) as u8));
        }
        let fb = round_trip(region, &contents).await;
        assert_eq!(fb.get_rect(region, fb.pixel_format()).await, contents);
    }

    #[tokio::test]
    async fn offset_region_round_trips() {
        let region = Rectangle::new(5, 9, 17, 13);
        let mut contents = Vec::new();
        for i in 0..region.area() {
            if i % 3 == 0 {
                contents.extend_from_slice(&pixel(1, 2, 3));
            } else {
                contents.extend_from_slice(&pixel(9, 8, 7));
            }
        }
        let fb = round_trip(region, &contents).await;
        assert_eq!(fb.get_rect(region, fb.pixel_format()).await, contents);
    }

    #[tokio::test]
    async fn decode_discards_out_of_range_tiles() {
        let region = Rectangle::new(0, 0, 32, 16);
        let mut contents = Vec::new();
        for _ in 0..region.area() {
            contents.extend_from_slice(&pixel(40, 50, 60));
        }
        let mut encoder = HextileEncoder;
        let mut buf = BytesMut::new();
        encoder
            .send(&mut buf, &PixelFormat::rgb32(), region, &contents)
            .unwrap();
        buf.put_u8(0xee); // sentinel after the payload

        // Framebuffer only covers the left half of the rectangle.
        let fb = Framebuffer::new("t", 16, 16, PixelFormat::rgb32());
        let mut reader = RfbReader::new(&buf[..]);
        decode(&mut reader, &fb, region).await.unwrap();
        assert_eq!(reader.receive_byte().await.unwrap(), 0xee);

        let half = Rectangle::new(0, 0, 16, 16);
        let expected: Vec<u8> = std::iter::repeat(pixel(40, 50, 60))
            .take(16 * 16)
            .flatten()
            .collect();
        assert_eq!(fb.get_rect(half, fb.pixel_format()).await, expected);
    }
}
