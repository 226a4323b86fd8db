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

//! Framebuffer change tracking.
//!
//! The server discovers what changed between updates by hashing the
//! framebuffer in 32x32-pixel tiles and comparing against the previous
//! pass. A cache instance is bound to one framebuffer; the session builds a
//! fresh cache whenever the framebuffer handle is replaced (desktop resize).

use sha2::{Digest, Sha256};

use crate::framebuffer::Framebuffer;
use crate::pixel_format::PixelFormat;
use crate::protocol::UpdateRequest;
use crate::rect::Rectangle;

/// Edge length of the hash tiles, in pixels.
pub const TILE_SIZE: u16 = 32;

type TileHash = [u8; 32];

/// Per-tile hash grid over one framebuffer.
pub struct FramebufferCache {
    framebuffer: Framebuffer,
    hashes: Vec<Option<TileHash>>,
    tiles_x: usize,
    scratch: Vec<u8>,
}

impl FramebufferCache {
    /// Builds an empty cache for `framebuffer`. All tiles start unhashed,
    /// so the first scan reports everything as changed.
    pub fn new(framebuffer: Framebuffer) -> Self {
        let tiles_x = usize::from(framebuffer.width().div_ceil(TILE_SIZE));
        let tiles_y = usize::from(framebuffer.height().div_ceil(TILE_SIZE));
        let scratch_len = usize::from(TILE_SIZE)
            * usize::from(TILE_SIZE)
            * framebuffer.pixel_format().bytes_per_pixel();
        Self {
            framebuffer,
            hashes: vec![None; tiles_x * tiles_y],
            tiles_x,
            scratch: vec![0u8; scratch_len],
        }
    }

    /// The framebuffer this cache tracks.
    pub fn framebuffer(&self) -> &Framebuffer {
        &self.framebuffer
    }

    /// Scans the requested region and returns the rectangles to send.
    ///
    /// The scan is bounded to the intersection of the request with the
    /// framebuffer. Every covered tile is re-hashed and the stored hash
    /// refreshed. For an incremental request the changed tiles are returned;
    /// for a non-incremental request the whole (clipped) region is returned
    /// regardless, while the hashes still pick up the current contents so a
    /// following incremental request reports nothing stale.
    ///
    /// Holds the framebuffer's read lock for the duration of the pass.
    pub async fn scan(&mut self, request: &UpdateRequest) -> Vec<Rectangle> {
        let region = request.region.intersect(&self.framebuffer.bounds());
        if region.is_empty() {
            return Vec::new();
        }

        let format = *self.framebuffer.pixel_format();
        let stride = self.framebuffer.stride();
        let bpp = format.bytes_per_pixel();
        let mut changed = Vec::new();

        let pixels = self.framebuffer.pixels().await;

        let x0 = region.x / TILE_SIZE * TILE_SIZE;
        let y0 = region.y / TILE_SIZE * TILE_SIZE;
        let mut ty = y0;
        while u32::from(ty) < region.bottom() {
            let tile_h = TILE_SIZE.min(self.framebuffer.height() - ty);
            let mut tx = x0;
            while u32::from(tx) < region.right() {
                let tile_w = TILE_SIZE.min(self.framebuffer.width() - tx);
                let tile = Rectangle::new(tx, ty, tile_w, tile_h);

                let tile_stride = usize::from(tile_w) * bpp;
                PixelFormat::copy(
                    &pixels,
                    stride,
                    &format,
                    tile,
                    &mut self.scratch,
                    tile_stride,
                    &format,
                    0,
                    0,
                );
                let hash: TileHash = Sha256::digest(
                    &self.scratch[..tile_stride * usize::from(tile_h)],
                )
                .into();

                let index = usize::from(ty / TILE_SIZE) * self.tiles_x
                    + usize::from(tx / TILE_SIZE);
                let slot = &mut self.hashes[index];
                if *slot != Some(hash) {
                    *slot = Some(hash);
                    if request.incremental {
                        changed.push(tile);
                    }
                }

                tx += TILE_SIZE;
            }
            ty += TILE_SIZE;
        }

        if request.incremental {
            changed
        } else {
            vec![region]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_request(fb: &Framebuffer, incremental: bool) -> UpdateRequest {
        UpdateRequest {
            incremental,
            region: fb.bounds(),
        }
    }

    #[tokio::test]
    async fn first_incremental_scan_reports_everything() {
        let fb = Framebuffer::new("t", 64, 64, PixelFormat::rgb32());
        let mut cache = FramebufferCache::new(fb.clone());
        let rects = cache.scan(&full_request(&fb, true)).await;
        assert_eq!(rects.len(), 4); // 2x2 grid of 32x32 tiles
    }

    #[tokio::test]
    async fn unchanged_rescan_reports_nothing() {
        let fb = Framebuffer::new("t", 64, 64, PixelFormat::rgb32());
        let mut cache = FramebufferCache::new(fb.clone());
        cache.scan(&full_request(&fb, true)).await;
        let rects = cache.scan(&full_request(&fb, true)).await;
        assert!(rects.is_empty());
    }

    #[tokio::test]
    async fn single_pixel_change_reports_one_tile() {
        let fb = Framebuffer::new("t", 96, 96, PixelFormat::rgb32());
        let mut cache = FramebufferCache::new(fb.clone());
        cache.scan(&full_request(&fb, true)).await;

        fb.set_pixel(40, 70, &[0xff, 0x00, 0x00, 0x00]).await;
        let rects = cache.scan(&full_request(&fb, true)).await;
        assert_eq!(rects, vec![Rectangle::new(32, 64, 32, 32)]);
    }

    #[tokio::test]
    async fn edge_tiles_are_clipped() {
        let fb = Framebuffer::new("t", 40, 40, PixelFormat::rgb32());
        let mut cache = FramebufferCache::new(fb.clone());
        let rects = cache.scan(&full_request(&fb, true)).await;
        assert!(rects.contains(&Rectangle::new(32, 32, 8, 8)));
        assert!(rects.contains(&Rectangle::new(0, 0, 32, 32)));
        assert_eq!(rects.len(), 4);
    }

    #[tokio::test]
    async fn non_incremental_reports_region_and_refreshes_hashes() {
        let fb = Framebuffer::new("t", 64, 64, PixelFormat::rgb32());
        let mut cache = FramebufferCache::new(fb.clone());
        fb.set_pixel(0, 0, &[1, 2, 3, 0]).await;

        let rects = cache.scan(&full_request(&fb, false)).await;
        assert_eq!(rects, vec![fb.bounds()]);

        // The non-incremental pass consumed the change.
        let rects = cache.scan(&full_request(&fb, true)).await;
        assert!(rects.is_empty());
    }

    #[tokio::test]
    async fn oversized_request_is_clipped() {
        let fb = Framebuffer::new("t", 32, 32, PixelFormat::rgb32());
        let mut cache = FramebufferCache::new(fb.clone());
        let request = UpdateRequest {
            incremental: false,
            region: Rectangle::new(0, 0, 500, 500),
        };
        assert_eq!(cache.scan(&request).await, vec![fb.bounds()]);
    }
}
