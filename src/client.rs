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

//! Client-side RFB session.
//!
//! A [`ClientSession`] drives one connection to an RFB server: the
//! version/security/initialization handshake, then a receive loop decoding
//! framebuffer updates into a local [`Framebuffer`] while a background
//! requester asks for incremental updates at a bounded rate. Input events
//! and clipboard pushes go out through a cloneable [`ClientSessionHandle`].
//!
//! Lifecycle: construct with [`ClientSession::new`], run the handshake with
//! [`ClientSession::connect`], then hand the session to
//! [`ClientSession::run`] (typically inside `tokio::spawn`). Events arrive
//! on the receiver returned from `new`.

use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;

use crate::auth;
use crate::encoding::{hextile, raw, ZlibDecoder};
use crate::error::{require, Result, VncError};
use crate::events::ClientEvent;
use crate::framebuffer::Framebuffer;
use crate::protocol::*;
use crate::rect::Rectangle;
use crate::scheduler::UpdateScheduler;
use crate::stream::{
    encode_latin1, RfbReader, RfbWriter, MAX_CUT_TEXT_LENGTH, MAX_STRING_LENGTH,
};

/// Upper bound on screen dimensions accepted from the peer.
const MAX_DIMENSION: u16 = 0x8000 - 1;

/// Callback producing a password when the server demands authentication and
/// none was configured up front.
pub type PasswordProvider = Box<dyn Fn() -> Option<String> + Send + Sync>;

/// Connection options for a client session.
pub struct ClientConnectOptions {
    /// Whether to leave other clients connected (the `ClientInit` share
    /// flag).
    pub share_desktop: bool,
    /// Password for VNC authentication, if known up front.
    pub password: Option<String>,
    /// Invoked when the server demands a password and `password` is unset.
    pub password_provider: Option<PasswordProvider>,
    /// Ceiling on incremental update requests per second.
    pub max_update_rate: u32,
}

impl Default for ClientConnectOptions {
    fn default() -> Self {
        Self {
            share_desktop: true,
            password: None,
            password_provider: None,
            max_update_rate: 15,
        }
    }
}

/// Encodings advertised to the server, in preference order, plus the
/// desktop-size pseudo-encoding.
const ADVERTISED_ENCODINGS: [i32; 5] = [
    ENCODING_ZLIB,
    ENCODING_HEXTILE,
    ENCODING_COPYRECT,
    ENCODING_RAW,
    ENCODING_PSEUDO_DESKTOP_SIZE,
];

type SharedFramebuffer = Arc<RwLock<Option<Framebuffer>>>;

/// One client-side RFB connection.
pub struct ClientSession<S> {
    reader: RfbReader<ReadHalf<S>>,
    writer: RfbWriter,
    framebuffer: SharedFramebuffer,
    events: UnboundedSender<ClientEvent>,
    options: ClientConnectOptions,
    zlib: ZlibDecoder,
    connected: bool,
}

/// Cloneable handle for sending input and inspecting the session from
/// outside the receive loop.
#[derive(Clone)]
pub struct ClientSessionHandle {
    writer: RfbWriter,
    framebuffer: SharedFramebuffer,
}

impl<S> ClientSession<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wraps a connected stream. No protocol traffic happens yet; call
    /// [`connect`](Self::connect) next.
    pub fn new(stream: S, options: ClientConnectOptions) -> (Self, UnboundedReceiver<ClientEvent>) {
        let (read_half, write_half) = tokio::io::split(stream);
        let (events, receiver) = unbounded_channel();
        (
            Self {
                reader: RfbReader::new(read_half),
                writer: RfbWriter::new(write_half),
                framebuffer: Arc::new(RwLock::new(None)),
                events,
                options,
                zlib: ZlibDecoder::new(),
                connected: false,
            },
            receiver,
        )
    }

    /// Returns the input/teardown handle. Valid at any point in the
    /// lifecycle; sends fail once the connection is gone.
    pub fn handle(&self) -> ClientSessionHandle {
        ClientSessionHandle {
            writer: self.writer.clone(),
            framebuffer: Arc::clone(&self.framebuffer),
        }
    }

    /// Performs the full handshake: version, security, initialization,
    /// encoding advertisement, and the initial full-frame update request.
    ///
    /// Emits `Connected` on success and `ConnectionFailed` on any failure.
    pub async fn connect(&mut self) -> Result<()> {
        match self.handshake().await {
            Ok(()) => {
                self.connected = true;
                let _ = self.events.send(ClientEvent::Connected);
                Ok(())
            }
            Err(e) => {
                log::warn!("handshake failed: {e}");
                let _ = self.events.send(ClientEvent::ConnectionFailed);
                Err(e)
            }
        }
    }

    async fn handshake(&mut self) -> Result<()> {
        let (major, minor) = self.reader.receive_version().await?;
        if major != 3 || minor < 8 {
            return Err(VncError::UnsupportedProtocolVersion);
        }
        self.writer.send(PROTOCOL_VERSION.as_bytes()).await?;

        self.negotiate_security().await?;

        // ClientInit: the share flag.
        self.writer
            .send(&[u8::from(self.options.share_desktop)])
            .await?;

        // ServerInit.
        let width = self.reader.receive_u16().await?;
        let height = self.reader.receive_u16().await?;
        require(
            width > 0 && height > 0 && width <= MAX_DIMENSION && height <= MAX_DIMENSION,
            "framebuffer dimensions",
        )?;
        let pixel_format = self.reader.receive_pixel_format().await?;
        if pixel_format.palettized {
            return Err(VncError::UnsupportedPixelFormat);
        }
        let name = self.reader.receive_string(MAX_STRING_LENGTH).await?;
        log::info!("connected to \"{name}\": {width}x{height}");

        let framebuffer = Framebuffer::new(&name, width, height, pixel_format);
        *self.framebuffer.write().await = Some(framebuffer);

        // SetEncodings.
        let mut buf = BytesMut::new();
        buf.put_u8(CLIENT_MSG_SET_ENCODINGS);
        buf.put_u8(0);
        buf.put_u16(ADVERTISED_ENCODINGS.len() as u16);
        for encoding in ADVERTISED_ENCODINGS {
            buf.put_i32(encoding);
        }
        self.writer.send(&buf).await?;

        // Initial full-frame refresh.
        self.send_update_request(false, Rectangle::new(0, 0, width, height))
            .await?;
        Ok(())
    }

    async fn negotiate_security(&mut self) -> Result<()> {
        let count = self.reader.receive_byte().await?;
        if count == 0 {
            let reason = self.reader.receive_string(MAX_STRING_LENGTH).await?;
            return Err(VncError::ServerOfferedNoAuthenticationMethods(reason));
        }
        let mut offered = vec![0u8; usize::from(count)];
        self.reader.receive(&mut offered).await?;

        if offered.contains(&SECURITY_TYPE_NONE) {
            self.writer.send(&[SECURITY_TYPE_NONE]).await?;
        } else if offered.contains(&SECURITY_TYPE_VNC_AUTH) {
            let password = match self.options.password.clone() {
                Some(p) => p,
                None => self
                    .options
                    .password_provider
                    .as_ref()
                    .and_then(|provider| provider())
                    .ok_or(VncError::PasswordRequired)?,
            };
            self.writer.send(&[SECURITY_TYPE_VNC_AUTH]).await?;
            let mut challenge = [0u8; 16];
            self.reader.receive(&mut challenge).await?;
            let response = auth::challenge_response(&password, &challenge);
            self.writer.send(&response).await?;
        } else {
            return Err(VncError::NoSupportedAuthenticationMethods);
        }

        // RFB 3.8 sends a result even for the None type.
        let result = self.reader.receive_u32().await?;
        if result != SECURITY_RESULT_OK {
            let reason = self
                .reader
                .receive_string(MAX_STRING_LENGTH)
                .await
                .unwrap_or_default();
            return Err(VncError::AuthenticationFailed(reason));
        }
        Ok(())
    }

    async fn send_update_request(&self, incremental: bool, region: Rectangle) -> Result<()> {
        let mut buf = BytesMut::with_capacity(10);
        buf.put_u8(CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST);
        buf.put_u8(u8::from(incremental));
        buf.put_u16(region.x);
        buf.put_u16(region.y);
        buf.put_u16(region.width);
        buf.put_u16(region.height);
        self.writer.send(&buf).await
    }

    /// Runs the receive loop until the server disconnects, the handle
    /// closes the session, or a protocol error occurs. Emits `Closed`
    /// exactly once on exit.
    pub async fn run(mut self) -> Result<()> {
        debug_assert!(self.connected, "run() before connect()");

        // Requester: asks for incremental updates, woken after each applied
        // update and bounded to the configured rate.
        let writer = self.writer.clone();
        let shared_fb = Arc::clone(&self.framebuffer);
        let requester = UpdateScheduler::start(self.options.max_update_rate, true, move || {
            let writer = writer.clone();
            let shared_fb = Arc::clone(&shared_fb);
            async move {
                let Some(fb) = shared_fb.read().await.clone() else {
                    return true;
                };
                let mut buf = BytesMut::with_capacity(10);
                buf.put_u8(CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST);
                buf.put_u8(1);
                buf.put_u16(0);
                buf.put_u16(0);
                buf.put_u16(fb.width());
                buf.put_u16(fb.height());
                writer.send(&buf).await.is_ok()
            }
        });
        let request_signal = requester.signal_handle();

        let outcome = loop {
            let tag = match self.reader.receive_byte().await {
                Ok(tag) => tag,
                Err(e) if e.is_disconnect() => break Ok(()),
                Err(e) => break Err(e),
            };
            let result = match tag {
                SERVER_MSG_FRAMEBUFFER_UPDATE => match self.handle_update().await {
                    Ok(()) => {
                        request_signal.signal();
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
                SERVER_MSG_SET_COLOUR_MAP_ENTRIES => self.handle_colour_map().await,
                SERVER_MSG_BELL => {
                    let _ = self.events.send(ClientEvent::Bell);
                    Ok(())
                }
                SERVER_MSG_SERVER_CUT_TEXT => self.handle_cut_text().await,
                _ => Err(VncError::UnrecognizedProtocolElement("server message")),
            };
            match result {
                Ok(()) => {}
                Err(e) if e.is_disconnect() => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        requester.stop().await;
        self.writer.shutdown().await;
        if let Err(e) = &outcome {
            log::error!("client session failed: {e}");
        }
        let _ = self.events.send(ClientEvent::Closed);
        outcome
    }

    async fn handle_update(&mut self) -> Result<()> {
        let _padding = self.reader.receive_byte().await?;
        let count = self.reader.receive_u16().await?;
        let mut changed = Vec::new();

        for _ in 0..count {
            let region = self.reader.receive_rectangle().await?;
            let encoding = self.reader.receive_i32().await?;
            require(
                region.width <= MAX_DIMENSION && region.height <= MAX_DIMENSION,
                "rectangle dimensions",
            )?;

            let fb = self
                .framebuffer
                .read()
                .await
                .clone()
                .ok_or(VncError::UnrecognizedProtocolElement("update before init"))?;

            match encoding {
                ENCODING_RAW => {
                    raw::decode(&mut self.reader, &fb, region).await?;
                    changed.push(region);
                }
                ENCODING_COPYRECT => {
                    let src_x = self.reader.receive_u16().await?;
                    let src_y = self.reader.receive_u16().await?;
                    self.apply_copy_rect(&fb, src_x, src_y, region).await;
                    changed.push(region);
                }
                ENCODING_HEXTILE => {
                    hextile::decode(&mut self.reader, &fb, region).await?;
                    changed.push(region);
                }
                ENCODING_ZLIB => {
                    self.apply_zlib(&fb, region).await?;
                    changed.push(region);
                }
                ENCODING_PSEUDO_DESKTOP_SIZE => {
                    require(
                        region.width > 0 && region.height > 0,
                        "framebuffer dimensions",
                    )?;
                    log::info!(
                        "desktop resized to {}x{}",
                        region.width,
                        region.height
                    );
                    let resized = Framebuffer::new(
                        fb.name(),
                        region.width,
                        region.height,
                        *fb.pixel_format(),
                    );
                    *self.framebuffer.write().await = Some(resized);
                }
                _ => return Err(VncError::UnrecognizedProtocolElement("encoding")),
            }
        }

        let _ = self
            .events
            .send(ClientEvent::FramebufferChanged { rectangles: changed });
        Ok(())
    }

    /// CopyRect: both regions are clipped to the framebuffer before the
    /// move; a fully out-of-range copy is discarded.
    async fn apply_copy_rect(&self, fb: &Framebuffer, src_x: u16, src_y: u16, region: Rectangle) {
        let bounds = fb.bounds();
        let dst = region.intersect(&bounds);
        if dst.is_empty() {
            return;
        }
        let sx = u32::from(src_x) + u32::from(dst.x - region.x);
        let sy = u32::from(src_y) + u32::from(dst.y - region.y);
        if sx > u32::from(u16::MAX) || sy > u32::from(u16::MAX) {
            return;
        }
        let src =
            Rectangle::new(sx as u16, sy as u16, dst.width, dst.height).intersect(&bounds);
        if src.is_empty() {
            return;
        }
        let span = Rectangle::new(dst.x, dst.y, src.width, src.height);
        fb.copy_within(src.x, src.y, span).await;
    }

    async fn apply_zlib(&mut self, fb: &Framebuffer, region: Rectangle) -> Result<()> {
        let len = self.reader.receive_u32().await? as usize;
        require(
            len < crate::encoding::zlib::MAX_ZLIB_PAYLOAD,
            "zlib payload length",
        )?;
        let mut payload = vec![0u8; len];
        self.reader.receive(&mut payload).await?;

        let bpp = fb.pixel_format().bytes_per_pixel();
        let expected =
            usize::from(region.width) * usize::from(region.height) * bpp;
        let pixels = self.zlib.decode(&payload, expected)?;

        let visible = region.intersect(&fb.bounds());
        if visible.is_empty() {
            return Ok(());
        }
        let source = Rectangle::new(
            visible.x - region.x,
            visible.y - region.y,
            visible.width,
            visible.height,
        );
        let format = *fb.pixel_format();
        let mut target = fb.pixels_mut().await;
        crate::pixel_format::PixelFormat::copy(
            &pixels,
            usize::from(region.width) * bpp,
            &format,
            source,
            &mut target,
            fb.stride(),
            &format,
            usize::from(visible.x),
            usize::from(visible.y),
        );
        Ok(())
    }

    async fn handle_colour_map(&mut self) -> Result<()> {
        let _padding = self.reader.receive_byte().await?;
        let _first_colour = self.reader.receive_u16().await?;
        let count = self.reader.receive_u16().await?;
        // Consumed but not applied; this engine is true-color only.
        let mut entries = vec![0u8; usize::from(count) * 6];
        self.reader.receive(&mut entries).await
    }

    async fn handle_cut_text(&mut self) -> Result<()> {
        let mut padding = [0u8; 3];
        self.reader.receive(&mut padding).await?;
        let text = self.reader.receive_string(MAX_CUT_TEXT_LENGTH).await?;
        let _ = self
            .events
            .send(ClientEvent::RemoteClipboardChanged { text });
        Ok(())
    }
}

impl ClientSessionHandle {
    /// The current local framebuffer, if the handshake has completed.
    pub async fn framebuffer(&self) -> Option<Framebuffer> {
        self.framebuffer.read().await.clone()
    }

    /// Sends a key press or release.
    pub async fn send_key_event(&self, keysym: u32, pressed: bool) -> Result<()> {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_u8(CLIENT_MSG_KEY_EVENT);
        buf.put_u8(u8::from(pressed));
        buf.put_u16(0);
        buf.put_u32(keysym);
        self.writer.send(&buf).await
    }

    /// Sends a pointer position and button state.
    pub async fn send_pointer_event(&self, x: u16, y: u16, button_mask: u8) -> Result<()> {
        let mut buf = BytesMut::with_capacity(6);
        buf.put_u8(CLIENT_MSG_POINTER_EVENT);
        buf.put_u8(button_mask);
        buf.put_u16(x);
        buf.put_u16(y);
        self.writer.send(&buf).await
    }

    /// Pushes local clipboard contents to the server.
    pub async fn send_clipboard(&self, text: &str) -> Result<()> {
        let bytes = encode_latin1(text);
        let mut buf = BytesMut::with_capacity(8 + bytes.len());
        buf.put_u8(CLIENT_MSG_CLIENT_CUT_TEXT);
        buf.put_slice(&[0u8; 3]);
        buf.put_u32(bytes.len() as u32);
        buf.put_slice(&bytes);
        self.writer.send(&buf).await
    }

    /// Tears the connection down. The receive loop observes the resulting
    /// EOF and finishes cleanly.
    pub async fn close(&self) {
        self.writer.shutdown().await;
    }
}
