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

//! RFB protocol constants and small wire structures.
//!
//! The constants here follow RFC 6143: message type tags for both
//! directions, encoding identifiers (including the pseudo-encoding ranges
//! used by Tight for compression and quality hints), security types, and the
//! handshake structures exchanged during initialization.
//!
//! # Protocol Overview
//!
//! An RFB connection passes through the following phases:
//! 1. **Protocol Version** - both sides exchange 12-byte version strings
//! 2. **Security Handshake** - authentication method selection and execution
//! 3. **Initialization** - `ClientInit` / `ServerInit` exchange
//! 4. **Normal Operation** - input events, update requests, and updates

use bytes::{BufMut, BytesMut};

use crate::pixel_format::PixelFormat;
use crate::rect::Rectangle;

/// The RFB protocol version string both roles speak.
///
/// This implementation requires protocol version 3.8 on both ends. The
/// version string is exactly 12 bytes including the trailing newline.
pub const PROTOCOL_VERSION: &str = "RFB 003.008\n";

/// Highest rectangle count a single `FramebufferUpdate` may carry before the
/// batch is flushed early. The protocol field is a u16 and 0xFFFF is
/// reserved by some extensions, so batches cap out just below it.
pub const MAX_RECTANGLES_PER_UPDATE: usize = 65_534;

// Client-to-Server Message Types

/// Message type: client requests a different pixel format for updates.
pub const CLIENT_MSG_SET_PIXEL_FORMAT: u8 = 0;

/// Message type: client declares its supported encodings, ordered by
/// preference. The server uses the first mutually supported encoding.
pub const CLIENT_MSG_SET_ENCODINGS: u8 = 2;

/// Message type: client requests a framebuffer update, either incremental
/// (changes only) or a full refresh of the requested region.
pub const CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST: u8 = 3;

/// Message type: client sends a keyboard event (keysym plus press state).
pub const CLIENT_MSG_KEY_EVENT: u8 = 4;

/// Message type: client sends a pointer event (position plus button mask).
pub const CLIENT_MSG_POINTER_EVENT: u8 = 5;

/// Message type: client transfers clipboard contents to the server.
pub const CLIENT_MSG_CLIENT_CUT_TEXT: u8 = 6;

// Server-to-Client Message Types

/// Message type: server sends a framebuffer update containing one or more
/// encoded rectangles.
pub const SERVER_MSG_FRAMEBUFFER_UPDATE: u8 = 0;

/// Message type: server sets colour map entries for indexed color modes.
/// Consumed but not applied by the client in this true-color engine.
pub const SERVER_MSG_SET_COLOUR_MAP_ENTRIES: u8 = 1;

/// Message type: server rings the bell.
pub const SERVER_MSG_BELL: u8 = 2;

/// Message type: server transfers clipboard contents to the client.
pub const SERVER_MSG_SERVER_CUT_TEXT: u8 = 3;

// Encoding Types

/// Encoding type: raw pixel data in the negotiated format.
pub const ENCODING_RAW: i32 = 0;

/// Encoding type: copy a region already present on the client's screen.
/// Carries only a 4-byte source position, no pixel data.
pub const ENCODING_COPYRECT: i32 = 1;

/// Encoding type: Hextile, 16x16 sub-tiles with per-tile sub-encodings.
pub const ENCODING_HEXTILE: i32 = 5;

/// Encoding type: Zlib, raw pixels deflated through one persistent
/// per-connection stream.
pub const ENCODING_ZLIB: i32 = 6;

/// Encoding type: Tight, control-byte driven compression over four
/// independent persistent zlib streams.
pub const ENCODING_TIGHT: i32 = 7;

/// Pseudo-encoding: client accepts desktop-size change notifications.
pub const ENCODING_PSEUDO_DESKTOP_SIZE: i32 = -223;

/// Pseudo-encoding range start: Tight compression level 0 (fastest).
pub const ENCODING_COMPRESS_LEVEL_0: i32 = -256;

/// Pseudo-encoding range end: Tight compression level 9 (densest).
pub const ENCODING_COMPRESS_LEVEL_9: i32 = -247;

/// Pseudo-encoding range start: JPEG quality level 0 (lowest).
pub const ENCODING_QUALITY_LEVEL_0: i32 = -32;

/// Pseudo-encoding range end: JPEG quality level 9 (highest).
pub const ENCODING_QUALITY_LEVEL_9: i32 = -23;

// Hextile subencoding flags

/// Hextile flag: the sub-tile is raw pixel data.
pub const HEXTILE_RAW: u8 = 1;

/// Hextile flag: a new background color precedes the sub-tile.
pub const HEXTILE_BACKGROUND_SPECIFIED: u8 = 2;

/// Hextile flag: a new foreground color precedes the sub-tile.
pub const HEXTILE_FOREGROUND_SPECIFIED: u8 = 4;

/// Hextile flag: the sub-tile carries a subrectangle list.
pub const HEXTILE_ANY_SUBRECTS: u8 = 8;

/// Hextile flag: each subrectangle carries its own color.
pub const HEXTILE_SUBRECTS_COLOURED: u8 = 16;

// Tight control-byte values

/// Tight control byte: basic (zlib) compression, stream selected by bits 4-5.
pub const TIGHT_BASIC: u8 = 0x00;

/// Tight control byte: solid fill, one pixel value follows.
pub const TIGHT_FILL: u8 = 0x80;

/// Tight control byte: JPEG-compressed rectangle.
pub const TIGHT_JPEG: u8 = 0x90;

// Security Types

/// Security type: invalid. A zero-length security list signals refusal.
pub const SECURITY_TYPE_INVALID: u8 = 0;

/// Security type: no authentication.
pub const SECURITY_TYPE_NONE: u8 = 1;

/// Security type: VNC authentication (DES challenge-response).
pub const SECURITY_TYPE_VNC_AUTH: u8 = 2;

// Security Results

/// Security result: handshake succeeded.
pub const SECURITY_RESULT_OK: u32 = 0;

/// Security result: handshake failed; a reason string follows (RFB 3.8).
pub const SECURITY_RESULT_FAILED: u32 = 1;

/// The `ServerInit` message sent once security negotiation completes,
/// carrying the framebuffer dimensions, native pixel format, and desktop
/// name.
#[derive(Debug, Clone)]
pub struct ServerInit {
    /// The width of the framebuffer in pixels.
    pub framebuffer_width: u16,
    /// The height of the framebuffer in pixels.
    pub framebuffer_height: u16,
    /// The pixel format used by the framebuffer.
    pub pixel_format: PixelFormat,
    /// The name of the desktop.
    pub name: String,
}

impl ServerInit {
    /// Serializes the `ServerInit` message: width, height, 16-byte pixel
    /// format, 4-byte name length, name bytes.
    #[allow(clippy::cast_possible_truncation)] // Desktop name length limited to u32 per VNC protocol
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u16(self.framebuffer_width);
        buf.put_u16(self.framebuffer_height);
        self.pixel_format.write_to(buf);

        let name_bytes = crate::stream::encode_latin1(&self.name);
        buf.put_u32(name_bytes.len() as u32);
        buf.put_slice(&name_bytes);
    }
}

/// A pending `FramebufferUpdateRequest` from the client.
///
/// The server keeps at most one of these per session; a newer request
/// overwrites an unserved one.
#[derive(Debug, Clone, Copy)]
pub struct UpdateRequest {
    /// If true, only changed tiles are sent; if false, the whole region is
    /// resent regardless of change state.
    pub incremental: bool,
    /// The screen region the client is interested in.
    pub region: Rectangle,
}

/// Writes a rectangle header: position, dimensions, and the encoding of the
/// payload that follows.
pub fn write_rectangle_header(buf: &mut BytesMut, region: Rectangle, encoding: i32) {
    // VNC protocol requires big-endian (network byte order) for all
    // multi-byte integers.
    buf.put_u16(region.x);
    buf.put_u16(region.y);
    buf.put_u16(region.width);
    buf.put_u16(region.height);
    buf.put_i32(encoding);
}
