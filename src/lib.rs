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

//! An async RFB (VNC) protocol engine for both sides of the wire.
//!
//! This crate speaks RFB 3.8 (RFC 6143) over any `AsyncRead + AsyncWrite`
//! stream. It takes no position on transport or display: the embedder
//! accepts sockets, renders pixels, and injects input; the crate handles
//! the handshake, the encodings, and the update machinery.
//!
//! # Server
//!
//! Implement [`FramebufferSource`] (or just hand over a [`Framebuffer`]),
//! then run a [`ServerSession`] per accepted connection:
//!
//! ```no_run
//! # async fn serve(socket: tokio::net::TcpStream) -> rfbkit::Result<()> {
//! use rfbkit::{Framebuffer, PixelFormat, ServerSession, ServerSessionOptions};
//!
//! let fb = Framebuffer::new("my desktop", 1280, 800, PixelFormat::rgb32());
//! let (session, mut events) =
//!     ServerSession::new(socket, Box::new(fb.clone()), ServerSessionOptions::default());
//! let handle = session.handle();
//! tokio::spawn(async move { while events.recv().await.is_some() {} });
//! // ... draw into `fb`, call `handle.framebuffer_changed()` ...
//! session.run().await
//! # }
//! ```
//!
//! Updates are produced by a rate-bounded scheduler: each pass captures the
//! source, diffs it tile-by-tile against the last state sent, and flushes
//! the changed rectangles in the best encoding the client declared.
//!
//! # Client
//!
//! A [`ClientSession`] connects, maintains a local [`Framebuffer`] mirror,
//! and reports everything observable through [`ClientEvent`]s:
//!
//! ```no_run
//! # async fn view(socket: tokio::net::TcpStream) -> rfbkit::Result<()> {
//! use rfbkit::{ClientConnectOptions, ClientSession};
//!
//! let (mut session, mut events) =
//!     ClientSession::new(socket, ClientConnectOptions::default());
//! session.connect().await?;
//! let handle = session.handle();
//! tokio::spawn(async move { while events.recv().await.is_some() {} });
//! // ... `handle.send_key_event(...)`, read `handle.framebuffer()` ...
//! session.run().await
//! # }
//! ```

pub mod auth;
pub mod cache;
pub mod client;
pub mod encoding;
pub mod error;
pub mod events;
pub mod framebuffer;
pub mod pixel_format;
pub mod protocol;
pub mod rect;
pub mod scheduler;
pub mod server;
pub mod stream;

pub use auth::{Authenticator, PasswordAuthenticator};
pub use client::{ClientConnectOptions, ClientSession, ClientSessionHandle};
pub use error::{Result, VncError};
pub use events::{ClientEvent, ServerEvent};
pub use framebuffer::{Framebuffer, FramebufferSource};
pub use pixel_format::PixelFormat;
pub use rect::Rectangle;
pub use server::{
    AuthenticationMethod, ServerSession, ServerSessionHandle, ServerSessionOptions, UpdateBatch,
    UpdateHook,
};
