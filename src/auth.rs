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

//! VNC authentication (security type 2).
//!
//! Implements the DES challenge-response handshake from RFC 6143 Section
//! 7.2.2, including the historical quirk of bit-reversing each password byte
//! before using it as the DES key. Both roles use the same primitive: the
//! client computes a response to the server's challenge, the server
//! re-computes it for comparison.
//!
//! # Security Note
//!
//! VNC Authentication is a legacy scheme with an 8-byte effective password
//! and no transport protection. Use it only on trusted networks or through
//! an encrypted tunnel.

use des::cipher::{BlockEncrypt, KeyInit};
use des::Des;
use rand::Rng;

/// Generates a cryptographically random 16-byte challenge.
pub fn generate_challenge() -> [u8; 16] {
    let mut challenge = [0u8; 16];
    rand::thread_rng().fill(&mut challenge);
    challenge
}

/// Computes the response to `challenge` for `password`.
///
/// The key is built from the password's first 8 ISO-8859-1 bytes (zero
/// padded), each byte bit-reversed, and the challenge is encrypted as two
/// DES-ECB blocks. Key material and intermediate buffers are zeroed before
/// returning.
pub fn challenge_response(password: &str, challenge: &[u8; 16]) -> [u8; 16] {
    let mut pw_bytes = crate::stream::encode_latin1(password);
    let mut key = [0u8; 8];
    for (i, &byte) in pw_bytes.iter().take(8).enumerate() {
        key[i] = reverse_bits(byte);
    }

    // Fixed 8-byte key, cannot fail.
    let cipher = Des::new_from_slice(&key).expect("8-byte key");

    let mut response = [0u8; 16];
    for (i, half) in challenge.chunks_exact(8).enumerate() {
        let mut block_bytes = [0u8; 8];
        block_bytes.copy_from_slice(half);
        let mut block = block_bytes.into();
        cipher.encrypt_block(&mut block);
        response[i * 8..i * 8 + 8].copy_from_slice(&block);
        block_bytes.fill(0);
    }

    key.fill(0);
    pw_bytes.fill(0);
    response
}

/// Verifies a client's response against the challenge and password.
pub fn verify_response(password: &str, challenge: &[u8; 16], response: &[u8]) -> bool {
    response == challenge_response(password, challenge)
}

/// Decides whether a client's challenge response is acceptable.
///
/// The server session hands the raw challenge and response to the embedder,
/// which typically delegates to [`verify_response`] with whatever password
/// store it keeps. [`PasswordAuthenticator`] covers the fixed-password case.
pub trait Authenticator: Send + Sync {
    /// Returns true when the response authenticates the client.
    fn authenticate(&self, challenge: &[u8; 16], response: &[u8; 16]) -> bool;
}

/// [`Authenticator`] for a single fixed password.
pub struct PasswordAuthenticator {
    password: String,
}

impl PasswordAuthenticator {
    /// Creates an authenticator accepting exactly `password`.
    pub fn new(password: &str) -> Self {
        Self {
            password: password.to_string(),
        }
    }
}

impl Authenticator for PasswordAuthenticator {
    fn authenticate(&self, challenge: &[u8; 16], response: &[u8; 16]) -> bool {
        verify_response(&self.password, challenge, response)
    }
}

/// Reverses the bits within a single byte.
///
/// VNC-specific quirk: password bytes have their bits reversed before being
/// used as a DES key.
fn reverse_bits(byte: u8) -> u8 {
    let mut result = 0u8;
    for i in 0..8 {
        if byte & (1 << i) != 0 {
            result |= 1 << (7 - i);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_bits_examples() {
        assert_eq!(reverse_bits(0b1000_0000), 0b0000_0001);
        assert_eq!(reverse_bits(0b1011_0001), 0b1000_1101);
        assert_eq!(reverse_bits(0x00), 0x00);
        assert_eq!(reverse_bits(0xff), 0xff);
    }

    #[test]
    fn response_is_deterministic() {
        let challenge = [7u8; 16];
        let a = challenge_response("secret", &challenge);
        let b = challenge_response("secret", &challenge);
        assert_eq!(a, b);
    }

    #[test]
    fn response_depends_on_password_and_challenge() {
        let challenge = [7u8; 16];
        let base = challenge_response("secret", &challenge);
        assert_ne!(base, challenge_response("Secret", &challenge));
        assert_ne!(base, challenge_response("secret", &[8u8; 16]));
    }

    #[test]
    fn distinct_random_passwords_give_distinct_responses() {
        use rand::Rng;

        let mut rng = rand::thread_rng();
        let mut random_password = move || -> String {
            (0..8).map(|_| char::from(rng.gen_range(b'a'..=b'z'))).collect()
        };

        for _ in 0..32 {
            let challenge = generate_challenge();
            let a = random_password();
            let b = random_password();
            if a == b {
                continue;
            }
            assert_ne!(
                challenge_response(&a, &challenge),
                challenge_response(&b, &challenge),
                "passwords {a:?} and {b:?} collided"
            );
            assert_eq!(
                challenge_response(&a, &challenge),
                challenge_response(&a, &challenge)
            );
        }
    }

    #[test]
    fn password_truncates_at_eight_bytes() {
        let challenge = generate_challenge();
        assert_eq!(
            challenge_response("12345678", &challenge),
            challenge_response("12345678extra", &challenge)
        );
    }

    #[test]
    fn verify_round_trip() {
        let challenge = generate_challenge();
        let response = challenge_response("hunter2", &challenge);
        assert!(verify_response("hunter2", &challenge, &response));
        assert!(!verify_response("hunter3", &challenge, &response));
    }

    #[test]
    fn authenticator_delegates() {
        let auth = PasswordAuthenticator::new("pw");
        let challenge = generate_challenge();
        let response = challenge_response("pw", &challenge);
        assert!(auth.authenticate(&challenge, &response));
        assert!(!auth.authenticate(&challenge, &[0u8; 16]));
    }
}
