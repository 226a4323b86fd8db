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

//! Wire primitives for the RFB protocol.
//!
//! [`RfbReader`] wraps the read half of a connection and provides the typed
//! receive operations both session roles are built from: exact-count reads,
//! big-endian integers, length-prefixed ISO-8859-1 strings, the 12-byte
//! version line, and rectangle headers. Every length that arrives from the
//! peer is checked against a sanity bound before allocation.
//!
//! [`RfbWriter`] is a cloneable handle over the write half. One `send` call
//! writes one complete, pre-assembled message under a single lock
//! acquisition, which is what keeps concurrently produced messages from
//! interleaving on the wire.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::{require, Result, VncError};
use crate::pixel_format::{PixelFormat, PIXEL_FORMAT_WIRE_SIZE};
use crate::rect::Rectangle;

/// Sanity bound for ordinary protocol strings (desktop names, reason
/// strings).
pub const MAX_STRING_LENGTH: usize = 0xfff;

/// Sanity bound for clipboard transfers, which are allowed to be larger.
pub const MAX_CUT_TEXT_LENGTH: usize = 0xff_ffff;

/// Encodes a string as ISO-8859-1 bytes. Characters outside Latin-1 become
/// `?`, matching how the protocol's 8-bit strings degrade.
pub fn encode_latin1(s: &str) -> Vec<u8> {
    s.chars()
        .map(|c| {
            let code = u32::from(c);
            if code <= 0xff {
                code as u8
            } else {
                b'?'
            }
        })
        .collect()
}

/// Decodes ISO-8859-1 bytes into a string. Every byte value is a valid
/// Latin-1 character, so this cannot fail.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Typed reader over the receive half of an RFB connection.
pub struct RfbReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> RfbReader<R> {
    /// Wraps the read half of a connection.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Reads exactly `buf.len()` bytes. A short read or EOF surfaces as
    /// [`VncError::Network`].
    pub async fn receive(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner.read_exact(buf).await?;
        Ok(())
    }

    /// Reads one byte.
    pub async fn receive_byte(&mut self) -> Result<u8> {
        Ok(self.inner.read_u8().await?)
    }

    /// Reads a big-endian u16.
    pub async fn receive_u16(&mut self) -> Result<u16> {
        Ok(self.inner.read_u16().await?)
    }

    /// Reads a big-endian u32.
    pub async fn receive_u32(&mut self) -> Result<u32> {
        Ok(self.inner.read_u32().await?)
    }

    /// Reads a big-endian i32.
    pub async fn receive_i32(&mut self) -> Result<i32> {
        Ok(self.inner.read_i32().await?)
    }

    /// Reads a 4-byte length followed by that many ISO-8859-1 bytes.
    ///
    /// # Errors
    ///
    /// [`VncError::SanityCheckFailed`] when the announced length exceeds
    /// `max`.
    pub async fn receive_string(&mut self, max: usize) -> Result<String> {
        let len = self.receive_u32().await? as usize;
        require(len <= max, "string length")?;
        let mut bytes = vec![0u8; len];
        self.receive(&mut bytes).await?;
        Ok(decode_latin1(&bytes))
    }

    /// Reads the 12-byte version line and returns the (major, minor) pair.
    ///
    /// # Errors
    ///
    /// [`VncError::WrongKindOfServer`] when the line does not match
    /// `RFB ddd.ddd\n`.
    pub async fn receive_version(&mut self) -> Result<(u32, u32)> {
        let mut line = [0u8; 12];
        self.receive(&mut line).await?;
        if &line[0..4] != b"RFB " || line[7] != b'.' || line[11] != b'\n' {
            return Err(VncError::WrongKindOfServer);
        }
        let digits = |b: &[u8]| -> Result<u32> {
            let mut value = 0u32;
            for &d in b {
                if !d.is_ascii_digit() {
                    return Err(VncError::WrongKindOfServer);
                }
                value = value * 10 + u32::from(d - b'0');
            }
            Ok(value)
        };
        Ok((digits(&line[4..7])?, digits(&line[8..11])?))
    }

    /// Reads an 8-byte rectangle header (x, y, width, height).
    pub async fn receive_rectangle(&mut self) -> Result<Rectangle> {
        Ok(Rectangle {
            x: self.receive_u16().await?,
            y: self.receive_u16().await?,
            width: self.receive_u16().await?,
            height: self.receive_u16().await?,
        })
    }

    /// Reads and validates a 16-byte pixel format record.
    pub async fn receive_pixel_format(&mut self) -> Result<PixelFormat> {
        let mut record = [0u8; PIXEL_FORMAT_WIRE_SIZE];
        self.receive(&mut record).await?;
        PixelFormat::decode(&record)
    }
}

type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Cloneable handle over the send half of an RFB connection.
///
/// The shared mutex is the session's send-exclusion lock: whoever composes a
/// message serializes it fully into a buffer first, then writes it through
/// [`RfbWriter::send`] in one critical section.
#[derive(Clone)]
pub struct RfbWriter {
    inner: Arc<Mutex<BoxedWrite>>,
}

impl RfbWriter {
    /// Wraps the write half of a connection.
    pub fn new<W: AsyncWrite + Send + Unpin + 'static>(inner: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(inner))),
        }
    }

    /// Writes one complete message and flushes it, holding the send lock for
    /// the whole operation.
    pub async fn send(&self, message: &[u8]) -> Result<()> {
        let mut writer = self.inner.lock().await;
        writer.write_all(message).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Shuts down the write half, signalling EOF to the peer. Errors are
    /// ignored; the connection may already be gone.
    pub async fn shutdown(&self) {
        let mut writer = self.inner.lock().await;
        let _ = writer.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn version_line_round_trip() {
        let mut reader = RfbReader::new(&b"RFB 003.008\n"[..]);
        assert_eq!(reader.receive_version().await.unwrap(), (3, 8));

        let mut reader = RfbReader::new(&b"SSH-2.0-Open"[..]);
        assert!(matches!(
            reader.receive_version().await,
            Err(VncError::WrongKindOfServer)
        ));
    }

    #[tokio::test]
    async fn string_length_is_bounded() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&0x2000u32.to_be_bytes());
        wire.resize(wire.len() + 0x2000, b'a');
        let mut reader = RfbReader::new(&wire[..]);
        assert!(matches!(
            reader.receive_string(MAX_STRING_LENGTH).await,
            Err(VncError::SanityCheckFailed(_))
        ));
    }

    #[tokio::test]
    async fn string_decodes_latin1() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&3u32.to_be_bytes());
        wire.extend_from_slice(&[b'a', 0xe9, b'z']); // "aéz" in Latin-1
        let mut reader = RfbReader::new(&wire[..]);
        assert_eq!(
            reader.receive_string(MAX_STRING_LENGTH).await.unwrap(),
            "a\u{e9}z"
        );
    }

    #[tokio::test]
    async fn short_read_is_network_error() {
        let mut reader = RfbReader::new(&b"RF"[..]);
        assert!(matches!(
            reader.receive_version().await,
            Err(VncError::Network(_))
        ));
    }

    #[test]
    fn latin1_encode_replaces_wide_chars() {
        assert_eq!(encode_latin1("a\u{e9}\u{4e2d}"), vec![b'a', 0xe9, b'?']);
        assert_eq!(decode_latin1(&[0x41, 0xff]), "A\u{ff}");
    }
}
