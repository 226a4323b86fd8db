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

//! Error types for RFB protocol sessions.
//!
//! Every fallible operation in this crate returns [`VncError`]. The variants
//! mirror the distinct ways an RFB session can fail: handshake mismatches,
//! authentication problems, malformed protocol data, and plain I/O trouble.
//! A remote peer closing the connection is not a failure; see
//! [`VncError::is_disconnect`].

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, VncError>;

/// Reasons an RFB session can fail.
#[derive(Debug, Error)]
pub enum VncError {
    /// The remote endpoint did not speak the RFB protocol at all.
    #[error("remote endpoint is not an RFB server")]
    WrongKindOfServer,

    /// The remote endpoint speaks an RFB version older than 3.8.
    #[error("unsupported protocol version")]
    UnsupportedProtocolVersion,

    /// The server sent an empty security-type list, refusing the connection.
    /// Carries the human-readable reason string the server supplied.
    #[error("server offered no authentication methods: {0}")]
    ServerOfferedNoAuthenticationMethods(String),

    /// The server offered security types, but none this client supports.
    #[error("no supported authentication methods")]
    NoSupportedAuthenticationMethods,

    /// The server requires VNC authentication and no password was available.
    #[error("password required")]
    PasswordRequired,

    /// The challenge-response exchange failed. Carries the server's reason
    /// string when one was sent, empty otherwise.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A pixel format on the wire was malformed (for example a channel
    /// maximum that is not one less than a power of two).
    #[error("unsupported pixel format")]
    UnsupportedPixelFormat,

    /// An underlying socket operation failed.
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// A length, count, or dimension on the wire exceeded its sanity bound.
    #[error("sanity check failed: {0}")]
    SanityCheckFailed(&'static str),

    /// The peer sent a message type, encoding, or field value this
    /// implementation does not recognize. Unrecoverable; the session ends.
    #[error("unrecognized protocol element: {0}")]
    UnrecognizedProtocolElement(&'static str),
}

impl VncError {
    /// Returns true when this error represents the peer closing the
    /// connection rather than a protocol fault. Session loops treat a
    /// disconnect as normal termination.
    pub fn is_disconnect(&self) -> bool {
        match self {
            VncError::Network(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

/// Fails with [`VncError::SanityCheckFailed`] unless `condition` holds.
///
/// Used at every point where the protocol carries a length or dimension that
/// could otherwise drive an unbounded allocation.
pub fn require(condition: bool, what: &'static str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(VncError::SanityCheckFailed(what))
    }
}
