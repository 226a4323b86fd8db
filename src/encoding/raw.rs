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

//! Raw encoding: pixels verbatim in the negotiated format.
//!
//! The baseline every client must support and the fallback when nothing
//! better was negotiated.

use bytes::{BufMut, BytesMut};
use tokio::io::AsyncRead;

use crate::error::Result;
use crate::framebuffer::Framebuffer;
use crate::pixel_format::PixelFormat;
use crate::protocol::ENCODING_RAW;
use crate::rect::Rectangle;
use crate::stream::RfbReader;

use super::Encoder;

/// Emits rectangle contents unmodified.
pub struct RawEncoder;

impl Encoder for RawEncoder {
    fn encoding(&self) -> i32 {
        ENCODING_RAW
    }

    fn send(
        &mut self,
        buf: &mut BytesMut,
        _pixel_format: &PixelFormat,
        _region: Rectangle,
        contents: &[u8],
    ) -> Result<usize> {
        buf.put_slice(contents);
        Ok(contents.len())
    }
}

/// Consumes one raw rectangle from the wire and applies its in-range
/// portion to `framebuffer`.
pub async fn decode<R: AsyncRead + Unpin>(
    reader: &mut RfbReader<R>,
    framebuffer: &Framebuffer,
    region: Rectangle,
) -> Result<()> {
    let format = *framebuffer.pixel_format();
    let bpp = format.bytes_per_pixel();
    let wire_stride = usize::from(region.width) * bpp;
    let mut payload = vec![0u8; wire_stride * usize::from(region.height)];
    reader.receive(&mut payload).await?;

    let visible = region.intersect(&framebuffer.bounds());
    if visible.is_empty() {
        return Ok(());
    }
    // Source coordinates within the payload buffer.
    let source = Rectangle::new(
        visible.x - region.x,
        visible.y - region.y,
        visible.width,
        visible.height,
    );
    let mut pixels = framebuffer.pixels_mut().await;
    PixelFormat::copy(
        &payload,
        wire_stride,
        &format,
        source,
        &mut pixels,
        framebuffer.stride(),
        &format,
        usize::from(visible.x),
        usize::from(visible.y),
    );
    Ok(())
}
