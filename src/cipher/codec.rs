//! Per-chunk XChaCha20-Poly1305 sealing bound to chunk order.
//!
//! # Frame Format
//!
//! `[Nonce (24 bytes)] || [Ciphertext] || [Auth Tag (16 bytes)]`
//!
//! The associated data of every frame is the decimal form of a per-session
//! counter that both ends advance once per chunk. Swapping, dropping or
//! splicing frames therefore breaks authentication even though each frame
//! carries its own random nonce.

use std::fmt;
use std::sync::Arc;

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};

use crate::cipher::{KeyDeriver, RandomPool};
use crate::config::CHACHA_NONCE_SIZE;
use crate::error::{Error, Result};

/// Position of the next chunk in the stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Counter(u64);

impl Counter {
    #[inline]
    pub fn value(self) -> u64 {
        self.0
    }

    #[inline]
    fn advance(&mut self) {
        self.0 += 1;
    }

    /// Associated data bound into the AEAD call for this position.
    #[inline]
    pub fn associated_data(self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub struct AeadCodec {
    deriver: Arc<KeyDeriver>,
    nonces: Option<Arc<RandomPool>>,
    cipher: Option<XChaCha20Poly1305>,
    counter: Counter,
}

impl AeadCodec {
    /// Codec able to seal; nonces come from `nonces`.
    pub fn sealing(deriver: Arc<KeyDeriver>, nonces: Arc<RandomPool>) -> Self {
        Self { deriver, nonces: Some(nonces), cipher: None, counter: Counter::default() }
    }

    /// Codec that only opens frames.
    pub fn opening(deriver: Arc<KeyDeriver>) -> Self {
        Self { deriver, nonces: None, cipher: None, counter: Counter::default() }
    }

    #[inline]
    pub fn counter(&self) -> Counter {
        self.counter
    }

    /// Seals one chunk and advances the counter.
    ///
    /// Blocks on the first call until the session key is derived.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyDerivation`] or [`Error::RandomSource`] when the
    /// key or a nonce cannot be produced.
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.ensure_cipher()?;
        let nonces = self.nonces.as_ref().ok_or_else(|| Error::RandomSource("codec was opened without a nonce source".into()))?;
        let nonce = nonces.take(CHACHA_NONCE_SIZE)?;
        let cipher = self.cipher.as_ref().ok_or_else(|| Error::KeyDerivation("cipher is not initialized".into()))?;

        let aad = self.counter.associated_data();
        let sealed = cipher
            .encrypt(XNonce::from_slice(&nonce), Payload { msg: plaintext, aad: aad.as_bytes() })
            .map_err(|e| Error::AuthenticationFailure(format!("failed to seal chunk {}: {e}", self.counter)))?;

        let mut frame = Vec::with_capacity(nonce.len() + sealed.len());
        frame.extend_from_slice(&nonce);
        frame.extend_from_slice(&sealed);

        self.counter.advance();
        Ok(frame)
    }

    /// Verifies and decrypts one frame and advances the counter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthenticationFailure`] if the frame is shorter than a
    /// nonce or fails verification under the current counter.
    pub fn open(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        if frame.len() < CHACHA_NONCE_SIZE {
            return Err(Error::AuthenticationFailure(format!("chunk {} is {} bytes, shorter than its nonce", self.counter, frame.len())));
        }
        self.ensure_cipher()?;
        let cipher = self.cipher.as_ref().ok_or_else(|| Error::KeyDerivation("cipher is not initialized".into()))?;

        let (nonce, data) = frame.split_at(CHACHA_NONCE_SIZE);
        let aad = self.counter.associated_data();
        let plaintext = cipher
            .decrypt(XNonce::from_slice(nonce), Payload { msg: data, aad: aad.as_bytes() })
            .map_err(|_| Error::AuthenticationFailure(format!("chunk {} failed verification (wrong password or corrupted data)", self.counter)))?;

        self.counter.advance();
        Ok(plaintext)
    }

    fn ensure_cipher(&mut self) -> Result<()> {
        if self.cipher.is_none() {
            let key = self.deriver.get()?;
            let cipher = XChaCha20Poly1305::new_from_slice(key.expose_secret()).map_err(|_| Error::KeyDerivation(format!("derived key has the wrong length ({} bytes)", key.len())))?;
            self.cipher = Some(cipher);
        }
        Ok(())
    }
}
