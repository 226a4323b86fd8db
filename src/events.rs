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

//! Session events delivered to the embedding application.
//!
//! Both session roles hand back an unbounded receiver at construction.
//! Lifecycle events are exactly-once: `Connected` fires after a successful
//! handshake, `ConnectionFailed` if and only if the handshake failed, and
//! `Closed` once when the session ends for any reason after connecting.

use crate::rect::Rectangle;

/// Events emitted by a client session.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The handshake completed and the session entered normal operation.
    Connected,

    /// The handshake failed; the session never reached normal operation.
    ConnectionFailed,

    /// The session ended after having connected.
    Closed,

    /// A framebuffer update was applied. The rectangles are in local
    /// framebuffer coordinates; desktop-size changes are not listed here.
    FramebufferChanged {
        /// Regions the update touched.
        rectangles: Vec<Rectangle>,
    },

    /// The server rang the bell.
    Bell,

    /// The server pushed new clipboard contents.
    RemoteClipboardChanged {
        /// Clipboard text content.
        text: String,
    },
}

/// Events emitted by a server session.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// The handshake completed and the session entered normal operation.
    Connected,

    /// The handshake failed; the session never reached normal operation.
    ConnectionFailed,

    /// The session ended after having connected.
    Closed,

    /// Key press or release from the client.
    KeyChanged {
        /// Key symbol (X11 keysym).
        keysym: u32,
        /// True if pressed, false if released.
        pressed: bool,
    },

    /// Pointer movement or button change from the client.
    PointerChanged {
        /// X coordinate.
        x: u16,
        /// Y coordinate.
        y: u16,
        /// Button mask (bit 0 = left, bit 1 = middle, bit 2 = right).
        button_mask: u8,
    },

    /// Clipboard text received from the client.
    RemoteClipboardChanged {
        /// Clipboard text content.
        text: String,
    },
}
