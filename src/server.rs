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

//! Server-side RFB session.
//!
//! A [`ServerSession`] serves one connected client: it negotiates the
//! handshake, then splits into a receive loop (input events, update
//! requests, encoding changes) and a scheduler-driven update producer that
//! captures the framebuffer, finds changed tiles through the
//! [`FramebufferCache`], and flushes encoded `FramebufferUpdate` messages.
//!
//! All mutable session state shared between the two tasks lives in one
//! update-domain mutex. Lock order is update state before framebuffer
//! pixels; the send path serializes whole messages before taking the write
//! lock.
//!
//! Accepting sockets is the embedder's job; hand each accepted stream its
//! own session.

use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;

use crate::auth::{self, Authenticator};
use crate::cache::FramebufferCache;
use crate::encoding::tight::levels_from_encodings;
use crate::encoding::{raw::RawEncoder, Encoder, TightEncoder, ZlibEncoder};
use crate::encoding::hextile::HextileEncoder;
use crate::error::{require, Result, VncError};
use crate::events::ServerEvent;
use crate::framebuffer::{Framebuffer, FramebufferSource};
use crate::pixel_format::PixelFormat;
use crate::protocol::*;
use crate::rect::Rectangle;
use crate::scheduler::{SchedulerSignal, UpdateScheduler};
use crate::stream::{
    encode_latin1, RfbReader, RfbWriter, MAX_CUT_TEXT_LENGTH,
};

/// Upper bound on screen dimensions accepted from or served to a peer.
const MAX_DIMENSION: u16 = 0x8000 - 1;

/// Sanity bound on the client's declared encoding count.
const MAX_ENCODING_COUNT: u16 = 0x1ff;

/// How a server session authenticates clients.
#[derive(Clone)]
pub enum AuthenticationMethod {
    /// No authentication; the connection proceeds directly.
    None,
    /// VNC authentication through the given [`Authenticator`].
    Password(Arc<dyn Authenticator>),
}

/// Callback that takes over one update pass.
///
/// Runs under the update lock with a fresh capture already done. Returning
/// true means the hook queued whatever rectangles it wants sent and the
/// tile scan is skipped for this pass; returning false falls back to the
/// automatic scan.
pub type UpdateHook = Box<dyn FnMut(&mut UpdateBatch<'_>) -> bool + Send>;

/// Options for a server session.
pub struct ServerSessionOptions {
    /// Client authentication requirement.
    pub authentication: AuthenticationMethod,
    /// Ceiling on update passes per second.
    pub max_update_rate: u32,
    /// Optional manual update producer; see [`UpdateHook`].
    pub update_hook: Option<UpdateHook>,
}

impl Default for ServerSessionOptions {
    fn default() -> Self {
        Self {
            authentication: AuthenticationMethod::None,
            max_update_rate: 15,
            update_hook: None,
        }
    }
}

/// A rectangle queued for the next flush.
enum Pending {
    /// Re-send this region's pixels.
    Damage(Rectangle),
    /// Tell the client to copy from `(src_x, src_y)` to `dst`.
    Copy { src_x: u16, src_y: u16, dst: Rectangle },
}

/// The encoder instances for one session.
///
/// Stateful encoders are created once and kept for the connection; a later
/// `SetEncodings` re-selects among them without resetting their streams,
/// which would desynchronize the client's inflater.
struct EncoderSet {
    selected: i32,
    tight: Option<TightEncoder>,
    zlib: Option<ZlibEncoder>,
    hextile: HextileEncoder,
    raw: RawEncoder,
}

impl EncoderSet {
    fn new() -> Self {
        Self {
            selected: ENCODING_RAW,
            tight: None,
            zlib: None,
            hextile: HextileEncoder,
            raw: RawEncoder,
        }
    }

    /// Picks the first declared encoding with a matching encoder, in the
    /// client's preference order. Raw when nothing matches.
    fn select(&mut self, encodings: &[i32]) {
        self.selected = ENCODING_RAW;
        for &encoding in encodings {
            match encoding {
                ENCODING_TIGHT => {
                    if self.tight.is_none() {
                        let (level, quality) = levels_from_encodings(encodings);
                        self.tight = Some(TightEncoder::new(level, quality));
                    }
                }
                ENCODING_ZLIB => {
                    if self.zlib.is_none() {
                        self.zlib = Some(ZlibEncoder::default());
                    }
                }
                ENCODING_HEXTILE => {}
                _ => continue,
            }
            self.selected = encoding;
            break;
        }
        log::debug!("framebuffer encoder: encoding {}", self.selected);
    }

    fn current_mut(&mut self) -> &mut dyn Encoder {
        match self.selected {
            ENCODING_TIGHT => match self.tight.as_mut() {
                Some(encoder) => encoder,
                None => &mut self.raw,
            },
            ENCODING_ZLIB => match self.zlib.as_mut() {
                Some(encoder) => encoder,
                None => &mut self.raw,
            },
            ENCODING_HEXTILE => &mut self.hextile,
            _ => &mut self.raw,
        }
    }
}

/// Everything the receive loop and the update producer share.
struct UpdateState {
    source: Box<dyn FramebufferSource>,
    framebuffer: Option<Framebuffer>,
    cache: Option<FramebufferCache>,
    request: Option<UpdateRequest>,
    pending: Vec<Pending>,
    client_format: PixelFormat,
    client_encodings: Vec<i32>,
    client_width: u16,
    client_height: u16,
    encoders: EncoderSet,
    hook: Option<UpdateHook>,
    connected: bool,
}

type SharedUpdate = Arc<Mutex<UpdateState>>;

/// Queues rectangles for the update being produced.
///
/// Handed to the [`UpdateHook`] during a manual update pass.
pub struct UpdateBatch<'a> {
    state: &'a mut UpdateState,
}

impl UpdateBatch<'_> {
    /// The client's pending update request.
    pub fn request(&self) -> Option<UpdateRequest> {
        self.state.request
    }

    /// Queues a region for re-sending. Clipped to the dimensions the client
    /// currently knows; empty results are dropped.
    pub fn invalidate(&mut self, region: Rectangle) {
        invalidate(self.state, region);
    }

    /// Queues a screen-to-screen copy. Emitted as a CopyRect when the
    /// client declared support; otherwise degrades to invalidating either
    /// the union of source and destination or both separately, whichever
    /// covers less area.
    pub fn copy_region(&mut self, src_x: u16, src_y: u16, dst: Rectangle) {
        copy_region(self.state, src_x, src_y, dst);
    }
}

fn invalidate(state: &mut UpdateState, region: Rectangle) {
    let bounds = Rectangle::new(0, 0, state.client_width, state.client_height);
    let clipped = region.intersect(&bounds);
    if !clipped.is_empty() {
        state.pending.push(Pending::Damage(clipped));
    }
}

fn copy_region(state: &mut UpdateState, src_x: u16, src_y: u16, dst: Rectangle) {
    if state.client_encodings.contains(&ENCODING_COPYRECT) {
        let bounds = Rectangle::new(0, 0, state.client_width, state.client_height);
        let clipped = dst.intersect(&bounds);
        if clipped.is_empty() {
            return;
        }
        let sx = u32::from(src_x) + u32::from(clipped.x - dst.x);
        let sy = u32::from(src_y) + u32::from(clipped.y - dst.y);
        if sx > u32::from(u16::MAX) || sy > u32::from(u16::MAX) {
            return;
        }
        state.pending.push(Pending::Copy {
            src_x: sx as u16,
            src_y: sy as u16,
            dst: clipped,
        });
    } else {
        let src = Rectangle::new(src_x, src_y, dst.width, dst.height);
        let union = src.union(&dst);
        if union.area() <= src.area() + dst.area() {
            invalidate(state, union);
        } else {
            invalidate(state, src);
            invalidate(state, dst);
        }
    }
}

/// One server-side RFB connection.
pub struct ServerSession<S> {
    reader: RfbReader<ReadHalf<S>>,
    writer: RfbWriter,
    update: SharedUpdate,
    events: UnboundedSender<ServerEvent>,
    authentication: AuthenticationMethod,
    scheduler: Option<UpdateScheduler>,
    signal: SchedulerSignal,
}

/// Cloneable handle for server-to-client messages and update nudging.
#[derive(Clone)]
pub struct ServerSessionHandle {
    writer: RfbWriter,
    signal: SchedulerSignal,
}

impl<S> ServerSession<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wraps an accepted stream and starts the update producer (idle until
    /// the handshake completes and a request arrives). No protocol traffic
    /// happens yet; call [`run`](Self::run) next.
    pub fn new(
        stream: S,
        source: Box<dyn FramebufferSource>,
        options: ServerSessionOptions,
    ) -> (Self, UnboundedReceiver<ServerEvent>) {
        let (read_half, write_half) = tokio::io::split(stream);
        let (events, receiver) = unbounded_channel();
        let writer = RfbWriter::new(write_half);

        let update: SharedUpdate = Arc::new(Mutex::new(UpdateState {
            source,
            framebuffer: None,
            cache: None,
            request: None,
            pending: Vec::new(),
            client_format: PixelFormat::rgb32(),
            client_encodings: Vec::new(),
            client_width: 0,
            client_height: 0,
            encoders: EncoderSet::new(),
            hook: options.update_hook,
            connected: false,
        }));

        let tick_update = Arc::clone(&update);
        let tick_writer = writer.clone();
        let scheduler = UpdateScheduler::start(options.max_update_rate, false, move || {
            let update = Arc::clone(&tick_update);
            let writer = tick_writer.clone();
            async move {
                let mut state = update.lock().await;
                match produce_update(&mut state, &writer).await {
                    Ok(()) => true,
                    Err(e) => {
                        if !e.is_disconnect() {
                            log::debug!("update pass failed: {e}");
                        }
                        false
                    }
                }
            }
        });

        let signal = scheduler.signal_handle();
        (
            Self {
                reader: RfbReader::new(read_half),
                writer,
                update,
                events,
                authentication: options.authentication,
                scheduler: Some(scheduler),
                signal,
            },
            receiver,
        )
    }

    /// Returns the outgoing-message handle.
    pub fn handle(&self) -> ServerSessionHandle {
        ServerSessionHandle {
            writer: self.writer.clone(),
            signal: self.signal.clone(),
        }
    }

    /// Negotiates the handshake and serves the client until disconnect or
    /// a protocol error. Emits `Connected`/`ConnectionFailed` for the
    /// handshake and `Closed` exactly once after a connected session ends.
    pub async fn run(mut self) -> Result<()> {
        if let Err(e) = self.handshake().await {
            log::warn!("client handshake failed: {e}");
            let _ = self.events.send(ServerEvent::ConnectionFailed);
            self.teardown().await;
            return Err(e);
        }
        let _ = self.events.send(ServerEvent::Connected);

        let outcome = self.message_loop().await;
        self.teardown().await;
        if let Err(e) = &outcome {
            log::error!("server session failed: {e}");
        }
        let _ = self.events.send(ServerEvent::Closed);
        outcome
    }

    async fn teardown(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.stop().await;
        }
        self.writer.shutdown().await;
    }

    async fn handshake(&mut self) -> Result<()> {
        self.writer.send(PROTOCOL_VERSION.as_bytes()).await?;
        let (major, minor) = self.reader.receive_version().await?;
        if major != 3 || minor < 8 {
            self.refuse("unsupported protocol version").await;
            return Err(VncError::UnsupportedProtocolVersion);
        }

        let security_type = match &self.authentication {
            AuthenticationMethod::None => SECURITY_TYPE_NONE,
            AuthenticationMethod::Password(_) => SECURITY_TYPE_VNC_AUTH,
        };
        self.writer.send(&[1, security_type]).await?;
        let chosen = self.reader.receive_byte().await?;
        if chosen != security_type {
            return Err(VncError::UnrecognizedProtocolElement("security type"));
        }

        if let AuthenticationMethod::Password(authenticator) = &self.authentication {
            let challenge = auth::generate_challenge();
            self.writer.send(&challenge).await?;
            let mut response = [0u8; 16];
            self.reader.receive(&mut response).await?;
            if !authenticator.authenticate(&challenge, &response) {
                let mut buf = BytesMut::new();
                buf.put_u32(SECURITY_RESULT_FAILED);
                let reason = encode_latin1("authentication failed");
                buf.put_u32(reason.len() as u32);
                buf.put_slice(&reason);
                let _ = self.writer.send(&buf).await;
                return Err(VncError::AuthenticationFailed(
                    "invalid response".to_string(),
                ));
            }
        }
        self.writer
            .send(&SECURITY_RESULT_OK.to_be_bytes())
            .await?;

        // ClientInit. Multi-client fan-out is the embedder's concern, so
        // the share flag is only logged.
        let share = self.reader.receive_byte().await?;
        log::debug!("client share flag: {share}");

        let mut state = self.update.lock().await;
        let framebuffer = state
            .source
            .capture()
            .ok_or(VncError::SanityCheckFailed("no framebuffer to serve"))?;
        require(
            framebuffer.width() > 0
                && framebuffer.height() > 0
                && framebuffer.width() <= MAX_DIMENSION
                && framebuffer.height() <= MAX_DIMENSION,
            "framebuffer dimensions",
        )?;

        let mut buf = BytesMut::new();
        ServerInit {
            framebuffer_width: framebuffer.width(),
            framebuffer_height: framebuffer.height(),
            pixel_format: *framebuffer.pixel_format(),
            name: framebuffer.name().to_string(),
        }
        .write_to(&mut buf);
        self.writer.send(&buf).await?;

        log::info!(
            "client connected: \"{}\" {}x{}",
            framebuffer.name(),
            framebuffer.width(),
            framebuffer.height()
        );
        state.client_format = *framebuffer.pixel_format();
        state.client_width = framebuffer.width();
        state.client_height = framebuffer.height();
        state.cache = Some(FramebufferCache::new(framebuffer.clone()));
        state.framebuffer = Some(framebuffer);
        state.connected = true;
        Ok(())
    }

    /// Refuses the connection with a zero-length security list and a
    /// reason string, as RFB 3.8 prescribes. Send errors are moot here.
    async fn refuse(&self, reason: &str) {
        let mut buf = BytesMut::new();
        buf.put_u8(0);
        let bytes = encode_latin1(reason);
        buf.put_u32(bytes.len() as u32);
        buf.put_slice(&bytes);
        let _ = self.writer.send(&buf).await;
    }

    async fn message_loop(&mut self) -> Result<()> {
        loop {
            let tag = match self.reader.receive_byte().await {
                Ok(tag) => tag,
                Err(e) if e.is_disconnect() => return Ok(()),
                Err(e) => return Err(e),
            };
            let result = match tag {
                CLIENT_MSG_SET_PIXEL_FORMAT => self.handle_set_pixel_format().await,
                CLIENT_MSG_SET_ENCODINGS => self.handle_set_encodings().await,
                CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST => self.handle_update_request().await,
                CLIENT_MSG_KEY_EVENT => self.handle_key_event().await,
                CLIENT_MSG_POINTER_EVENT => self.handle_pointer_event().await,
                CLIENT_MSG_CLIENT_CUT_TEXT => self.handle_cut_text().await,
                _ => Err(VncError::UnrecognizedProtocolElement("client message")),
            };
            match result {
                Ok(()) => {}
                Err(e) if e.is_disconnect() => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    async fn handle_set_pixel_format(&mut self) -> Result<()> {
        let mut padding = [0u8; 3];
        self.reader.receive(&mut padding).await?;
        let format = self.reader.receive_pixel_format().await?;
        if format.palettized {
            // True-color only; a palettized client cannot be served.
            return Err(VncError::UnsupportedPixelFormat);
        }
        log::debug!(
            "client pixel format: {}bpp depth {}",
            format.bits_per_pixel,
            format.bit_depth
        );
        let mut state = self.update.lock().await;
        state.client_format = format;
        let encodings = std::mem::take(&mut state.client_encodings);
        state.encoders.select(&encodings);
        state.client_encodings = encodings;
        Ok(())
    }

    async fn handle_set_encodings(&mut self) -> Result<()> {
        let _padding = self.reader.receive_byte().await?;
        let count = self.reader.receive_u16().await?;
        require(count <= MAX_ENCODING_COUNT, "encoding count")?;
        let mut encodings = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            encodings.push(self.reader.receive_i32().await?);
        }
        let mut state = self.update.lock().await;
        state.encoders.select(&encodings);
        state.client_encodings = encodings;
        Ok(())
    }

    async fn handle_update_request(&mut self) -> Result<()> {
        let incremental = self.reader.receive_byte().await? != 0;
        let region = self.reader.receive_rectangle().await?;
        require(
            region.width <= MAX_DIMENSION && region.height <= MAX_DIMENSION,
            "update request dimensions",
        )?;
        // A newer request overwrites an unserved one.
        self.update.lock().await.request = Some(UpdateRequest {
            incremental,
            region,
        });
        self.signal.signal();
        Ok(())
    }

    async fn handle_key_event(&mut self) -> Result<()> {
        let pressed = self.reader.receive_byte().await? != 0;
        let _padding = self.reader.receive_u16().await?;
        let keysym = self.reader.receive_u32().await?;
        let _ = self.events.send(ServerEvent::KeyChanged { keysym, pressed });
        Ok(())
    }

    async fn handle_pointer_event(&mut self) -> Result<()> {
        let button_mask = self.reader.receive_byte().await?;
        let x = self.reader.receive_u16().await?;
        let y = self.reader.receive_u16().await?;
        let _ = self
            .events
            .send(ServerEvent::PointerChanged { x, y, button_mask });
        Ok(())
    }

    async fn handle_cut_text(&mut self) -> Result<()> {
        let mut padding = [0u8; 3];
        self.reader.receive(&mut padding).await?;
        let text = self.reader.receive_string(MAX_CUT_TEXT_LENGTH).await?;
        let _ = self
            .events
            .send(ServerEvent::RemoteClipboardChanged { text });
        Ok(())
    }
}

/// One update pass: capture, change discovery, encode, flush.
///
/// Runs under the update lock. A pass with no pending request, no capture,
/// or nothing changed sends nothing and leaves the request pending.
async fn produce_update(state: &mut UpdateState, writer: &RfbWriter) -> Result<()> {
    if !state.connected {
        return Ok(());
    }
    let Some(request) = state.request else {
        return Ok(());
    };
    let Some(fresh) = state.source.capture() else {
        return Ok(());
    };

    let replaced = match &state.framebuffer {
        Some(current) => !current.same_as(&fresh),
        None => true,
    };
    if replaced {
        state.cache = Some(FramebufferCache::new(fresh.clone()));
        state.framebuffer = Some(fresh);
    }

    // A manual producer may take over the pass entirely.
    let mut hook = state.hook.take();
    let handled = match hook.as_mut() {
        Some(hook) => hook(&mut UpdateBatch { state: &mut *state }),
        None => false,
    };
    state.hook = hook;

    if !handled {
        let changed = match state.cache.as_mut() {
            Some(cache) => cache.scan(&request).await,
            None => Vec::new(),
        };
        for region in changed {
            invalidate(state, region);
        }
    }

    flush(state, writer).await
}

/// Serializes and sends the queued rectangles as one or more
/// `FramebufferUpdate` messages, appending a desktop-size pseudo-rectangle
/// when the framebuffer dimensions no longer match what the client knows.
async fn flush(state: &mut UpdateState, writer: &RfbWriter) -> Result<()> {
    let Some(framebuffer) = state.framebuffer.clone() else {
        return Ok(());
    };
    let client_format = state.client_format;
    let size_changed = framebuffer.width() != state.client_width
        || framebuffer.height() != state.client_height;
    let announce_resize = size_changed
        && state
            .client_encodings
            .contains(&ENCODING_PSEUDO_DESKTOP_SIZE);

    // Resolve pending damage against the current framebuffer; a replaced,
    // smaller framebuffer can shrink queued rectangles to nothing.
    let queued = std::mem::take(&mut state.pending);
    let mut items = Vec::with_capacity(queued.len());
    for item in queued {
        match item {
            Pending::Damage(region) => {
                let clipped = region.intersect(&framebuffer.bounds());
                if !clipped.is_empty() {
                    items.push(Pending::Damage(clipped));
                }
            }
            copy @ Pending::Copy { .. } => items.push(copy),
        }
    }

    if items.is_empty() && !announce_resize {
        return Ok(());
    }

    let encoder = state.encoders.current_mut();
    let mut remaining = &items[..];
    loop {
        let take = remaining.len().min(MAX_RECTANGLES_PER_UPDATE);
        let last = take == remaining.len();
        let chunk = &remaining[..take];
        remaining = &remaining[take..];

        let resize_here = last && announce_resize;
        let mut buf = BytesMut::new();
        buf.put_u8(SERVER_MSG_FRAMEBUFFER_UPDATE);
        buf.put_u8(0);
        buf.put_u16((chunk.len() + usize::from(resize_here)) as u16);

        for item in chunk {
            match item {
                Pending::Damage(region) => {
                    let contents = framebuffer.get_rect(*region, &client_format).await;
                    write_rectangle_header(&mut buf, *region, encoder.encoding());
                    encoder.send(&mut buf, &client_format, *region, &contents)?;
                }
                Pending::Copy { src_x, src_y, dst } => {
                    write_rectangle_header(&mut buf, *dst, ENCODING_COPYRECT);
                    buf.put_u16(*src_x);
                    buf.put_u16(*src_y);
                }
            }
        }
        if resize_here {
            write_rectangle_header(
                &mut buf,
                Rectangle::new(0, 0, framebuffer.width(), framebuffer.height()),
                ENCODING_PSEUDO_DESKTOP_SIZE,
            );
        }

        writer.send(&buf).await?;
        if last {
            break;
        }
    }

    if announce_resize {
        state.client_width = framebuffer.width();
        state.client_height = framebuffer.height();
    }
    // Something went out, so the request has been served.
    state.request = None;
    Ok(())
}

impl ServerSessionHandle {
    /// Rings the client's bell.
    pub async fn bell(&self) -> Result<()> {
        self.writer.send(&[SERVER_MSG_BELL]).await
    }

    /// Pushes clipboard contents to the client.
    pub async fn send_clipboard(&self, text: &str) -> Result<()> {
        let bytes = encode_latin1(text);
        let mut buf = BytesMut::with_capacity(8 + bytes.len());
        buf.put_u8(SERVER_MSG_SERVER_CUT_TEXT);
        buf.put_slice(&[0u8; 3]);
        buf.put_u32(bytes.len() as u32);
        buf.put_slice(&bytes);
        self.writer.send(&buf).await
    }

    /// Hints that the framebuffer content changed. The update producer
    /// runs at its own rate regardless; this only stores a wakeup for it.
    pub fn framebuffer_changed(&self) {
        self.signal.signal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state(width: u16, height: u16) -> UpdateState {
        let fb = Framebuffer::new("t", width, height, PixelFormat::rgb32());
        UpdateState {
            source: Box::new(fb.clone()),
            framebuffer: Some(fb.clone()),
            cache: Some(FramebufferCache::new(fb)),
            request: None,
            pending: Vec::new(),
            client_format: PixelFormat::rgb32(),
            client_encodings: Vec::new(),
            client_width: width,
            client_height: height,
            encoders: EncoderSet::new(),
            hook: None,
            connected: true,
        }
    }

    #[test]
    fn invalidate_clips_to_client_dimensions() {
        let mut state = test_state(100, 100);
        invalidate(&mut state, Rectangle::new(90, 90, 50, 50));
        match &state.pending[..] {
            [Pending::Damage(r)] => assert_eq!(*r, Rectangle::new(90, 90, 10, 10)),
            other => panic!("unexpected pending: {}", other.len()),
        }

        invalidate(&mut state, Rectangle::new(200, 200, 10, 10));
        assert_eq!(state.pending.len(), 1); // fully outside, dropped
    }

    #[test]
    fn copy_region_uses_copyrect_when_declared() {
        let mut state = test_state(100, 100);
        state.client_encodings = vec![ENCODING_COPYRECT, ENCODING_RAW];
        copy_region(&mut state, 0, 0, Rectangle::new(10, 10, 20, 20));
        match &state.pending[..] {
            [Pending::Copy { src_x, src_y, dst }] => {
                assert_eq!((*src_x, *src_y), (0, 0));
                assert_eq!(*dst, Rectangle::new(10, 10, 20, 20));
            }
            _ => panic!("expected a copy entry"),
        }
    }

    #[test]
    fn copy_region_falls_back_to_union_for_overlapping_move() {
        let mut state = test_state(100, 100);
        // Small scroll: union is cheaper than two separate rectangles.
        copy_region(&mut state, 0, 0, Rectangle::new(0, 2, 50, 50));
        match &state.pending[..] {
            [Pending::Damage(r)] => assert_eq!(*r, Rectangle::new(0, 0, 50, 52)),
            _ => panic!("expected one damage entry"),
        }
    }

    #[test]
    fn copy_region_falls_back_to_two_rects_for_distant_move() {
        let mut state = test_state(1000, 1000);
        state.client_width = 1000;
        state.client_height = 1000;
        // Far apart: the union would cover almost the whole screen.
        copy_region(&mut state, 0, 0, Rectangle::new(900, 900, 10, 10));
        assert_eq!(state.pending.len(), 2);
    }

    #[test]
    fn encoder_selection_prefers_client_order() {
        let mut set = EncoderSet::new();
        assert_eq!(set.current_mut().encoding(), ENCODING_RAW);

        set.select(&[ENCODING_HEXTILE, ENCODING_ZLIB]);
        assert_eq!(set.current_mut().encoding(), ENCODING_HEXTILE);

        set.select(&[ENCODING_PSEUDO_DESKTOP_SIZE, ENCODING_TIGHT, ENCODING_HEXTILE]);
        assert_eq!(set.current_mut().encoding(), ENCODING_TIGHT);

        set.select(&[ENCODING_PSEUDO_DESKTOP_SIZE]);
        assert_eq!(set.current_mut().encoding(), ENCODING_RAW);
    }

    #[tokio::test]
    async fn produce_update_waits_for_request() {
        let (a, _b) = tokio::io::duplex(1 << 16);
        let (_read, write) = tokio::io::split(a);
        let writer = RfbWriter::new(write);
        let mut state = test_state(64, 64);
        produce_update(&mut state, &writer).await.unwrap();
        assert!(state.request.is_none());
        assert!(state.pending.is_empty());
    }

    #[tokio::test]
    async fn unchanged_incremental_request_stays_pending() {
        let (a, _b) = tokio::io::duplex(1 << 16);
        let (_read, write) = tokio::io::split(a);
        let writer = RfbWriter::new(write);
        let mut state = test_state(64, 64);
        let request = UpdateRequest {
            incremental: true,
            region: Rectangle::new(0, 0, 64, 64),
        };

        // First pass: everything is new, the update goes out.
        state.request = Some(request);
        produce_update(&mut state, &writer).await.unwrap();
        assert!(state.request.is_none());

        // Second pass: nothing changed, the request survives.
        state.request = Some(request);
        produce_update(&mut state, &writer).await.unwrap();
        assert!(state.request.is_some());
    }

    #[tokio::test]
    async fn hook_takes_over_the_pass() {
        let (a, _b) = tokio::io::duplex(1 << 16);
        let (_read, write) = tokio::io::split(a);
        let writer = RfbWriter::new(write);
        let mut state = test_state(64, 64);
        state.hook = Some(Box::new(|batch: &mut UpdateBatch<'_>| {
            batch.invalidate(Rectangle::new(0, 0, 8, 8));
            true
        }));
        state.request = Some(UpdateRequest {
            incremental: true,
            region: Rectangle::new(0, 0, 64, 64),
        });
        produce_update(&mut state, &writer).await.unwrap();
        // The hook's single rectangle was flushed; the tile scan never ran,
        // so the cache still reports everything changed next time.
        assert!(state.request.is_none());
        let rects = state
            .cache
            .as_mut()
            .unwrap()
            .scan(&UpdateRequest {
                incremental: true,
                region: Rectangle::new(0, 0, 64, 64),
            })
            .await;
        assert_eq!(rects.len(), 4);
    }
}
