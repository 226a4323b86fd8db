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

//! Shared framebuffer storage.
//!
//! A [`Framebuffer`] is a cheaply cloneable handle to one screen's worth of
//! pixels. Metadata (name, dimensions, format, stride) is immutable for the
//! lifetime of the buffer; only the pixel bytes change, under the buffer's
//! own read-write lock. A desktop resize never mutates a framebuffer in
//! place, it replaces the handle with a new one, which is how the tile cache
//! and the client detect the change ([`Framebuffer::same_as`]).

use std::sync::Arc;

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::pixel_format::PixelFormat;
use crate::rect::Rectangle;

struct Inner {
    name: String,
    width: u16,
    height: u16,
    stride: usize,
    pixel_format: PixelFormat,
    pixels: RwLock<Vec<u8>>,
}

/// One screen's worth of pixels plus metadata. Clones share storage.
#[derive(Clone)]
pub struct Framebuffer {
    inner: Arc<Inner>,
}

impl Framebuffer {
    /// Allocates a zeroed framebuffer. Rows are packed: the stride is
    /// exactly `width * bytes_per_pixel`.
    pub fn new(name: &str, width: u16, height: u16, pixel_format: PixelFormat) -> Self {
        let stride = usize::from(width) * pixel_format.bytes_per_pixel();
        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                width,
                height,
                stride,
                pixel_format,
                pixels: RwLock::new(vec![0u8; stride * usize::from(height)]),
            }),
        }
    }

    /// The desktop name announced during initialization.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Width in pixels.
    pub fn width(&self) -> u16 {
        self.inner.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u16 {
        self.inner.height
    }

    /// Row stride in bytes.
    pub fn stride(&self) -> usize {
        self.inner.stride
    }

    /// The buffer's native pixel format.
    pub fn pixel_format(&self) -> &PixelFormat {
        &self.inner.pixel_format
    }

    /// The rectangle covering the whole buffer.
    pub fn bounds(&self) -> Rectangle {
        Rectangle::new(0, 0, self.inner.width, self.inner.height)
    }

    /// True when both handles refer to the same storage. Used to detect
    /// framebuffer replacement across captures.
    pub fn same_as(&self, other: &Framebuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Takes the pixel read lock.
    pub async fn pixels(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.inner.pixels.read().await
    }

    /// Takes the pixel write lock.
    pub async fn pixels_mut(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.inner.pixels.write().await
    }

    /// Overwrites one pixel with `value` bytes in the buffer's native
    /// format. Out-of-range coordinates are ignored.
    pub async fn set_pixel(&self, x: u16, y: u16, value: &[u8]) {
        if x >= self.inner.width || y >= self.inner.height {
            return;
        }
        let bpp = self.inner.pixel_format.bytes_per_pixel();
        let offset = usize::from(y) * self.inner.stride + usize::from(x) * bpp;
        let mut pixels = self.pixels_mut().await;
        pixels[offset..offset + bpp].copy_from_slice(&value[..bpp]);
    }

    /// Copies `region` out of the buffer into a fresh packed buffer in
    /// `format`, converting when it differs from the native format. The
    /// region must lie within the buffer.
    pub async fn get_rect(&self, region: Rectangle, format: &PixelFormat) -> Vec<u8> {
        let bpp = format.bytes_per_pixel();
        let dst_stride = usize::from(region.width) * bpp;
        let mut out = vec![0u8; dst_stride * usize::from(region.height)];
        let pixels = self.pixels().await;
        PixelFormat::copy(
            &pixels,
            self.inner.stride,
            &self.inner.pixel_format,
            region,
            &mut out,
            dst_stride,
            format,
            0,
            0,
        );
        out
    }

    /// Copies a packed buffer in `format` into `region` of the buffer,
    /// converting when needed. The region must lie within the buffer.
    pub async fn put_rect(&self, region: Rectangle, data: &[u8], format: &PixelFormat) {
        let src_stride = usize::from(region.width) * format.bytes_per_pixel();
        let source = Rectangle::new(0, 0, region.width, region.height);
        let mut pixels = self.pixels_mut().await;
        PixelFormat::copy(
            data,
            src_stride,
            format,
            source,
            &mut pixels,
            self.inner.stride,
            &self.inner.pixel_format,
            usize::from(region.x),
            usize::from(region.y),
        );
    }

    /// Copies the region at `(src_x, src_y)` with `region`'s dimensions to
    /// `region`'s position, within this buffer. Overlap-safe. Both regions
    /// must lie within the buffer.
    pub async fn copy_within(&self, src_x: u16, src_y: u16, region: Rectangle) {
        if region.is_empty() {
            return;
        }
        let source = Rectangle::new(src_x, src_y, region.width, region.height);
        // Staging copy keeps overlapping moves correct.
        let staged = self.get_rect(source, &self.inner.pixel_format).await;
        self.put_rect(region, &staged, &self.inner.pixel_format).await;
    }
}

/// Supplies framebuffer contents to a server session.
///
/// The scheduler calls [`capture`](FramebufferSource::capture) before every
/// update pass. Returning a different `Framebuffer` handle (by identity)
/// signals a desktop resize; returning `None` means nothing to serve yet.
pub trait FramebufferSource: Send {
    /// Returns the current framebuffer, refreshed as the embedder sees fit.
    fn capture(&mut self) -> Option<Framebuffer>;
}

impl FramebufferSource for Framebuffer {
    fn capture(&mut self) -> Option<Framebuffer> {
        Some(self.clone())
    }
}
