//! # Key Derivation with Argon2id
//!
//! One key per session, derived from the password and the container salt.
//! Derivation is intentionally expensive, so it starts on its own thread the
//! moment the salt is known (written on encrypt, read on decrypt) and overlaps
//! with archiver start-up. The result crosses a single-slot channel exactly
//! once and is cached; every later [`KeyDeriver::get`] returns immediately.
//!
//! ## Parameter Selection
//!
//! - **Memory**: Argon2 memory cost in KiB
//! - **Time**: number of passes
//! - **Parallelism**: number of lanes
//! - **Output Length**: 32 bytes, the XChaCha20-Poly1305 key size

use std::sync::OnceLock;
use std::thread;

use argon2::Algorithm::Argon2id;
use argon2::Version::V0x13;
use argon2::{Argon2, Params};
use flume::Receiver;
use tracing::debug;

use crate::config::{EncryptionConfig, KEY_SIZE};
use crate::error::{Error, Result};
use crate::secret::SecretBytes;

/// Single-use gate in front of a background Argon2id derivation.
pub struct KeyDeriver {
    gate: Receiver<Result<SecretBytes>>,
    key: OnceLock<Result<SecretBytes>>,
}

impl KeyDeriver {
    /// Starts deriving the session key in the background.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyDerivation`] if the Argon2 parameters are out of
    /// range or the worker thread cannot be spawned.
    pub fn derive_async(password: SecretBytes, salt: Vec<u8>, config: &EncryptionConfig) -> Result<Self> {
        let params = Params::new(config.kdf_memory, config.kdf_time, config.kdf_parallelism, Some(KEY_SIZE)).map_err(|e| Error::KeyDerivation(format!("invalid argon2 parameter: {e}")))?;

        let (tx, rx) = flume::bounded(1);
        thread::Builder::new()
            .name("key-deriver".into())
            .spawn(move || {
                let _ = tx.send(derive_key(&password, &salt, params));
            })
            .map_err(|e| Error::KeyDerivation(format!("failed to spawn key derivation: {e}")))?;

        Ok(Self { gate: rx, key: OnceLock::new() })
    }

    /// Blocks until the key is ready and returns it.
    ///
    /// Concurrent callers all wait on the same derivation; a failure is cached
    /// and returned to every caller.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyDerivation`] if Argon2 failed or its thread died.
    pub fn get(&self) -> Result<&SecretBytes> {
        let key = self.key.get_or_init(|| match self.gate.recv() {
            Ok(key) => key,
            Err(_) => Err(Error::KeyDerivation("derivation thread exited without a key".into())),
        });
        key.as_ref().map_err(Clone::clone)
    }

    /// True once [`KeyDeriver::get`] has observed the result.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.key.get().is_some()
    }
}

fn derive_key(password: &SecretBytes, salt: &[u8], params: Params) -> Result<SecretBytes> {
    let argon2 = Argon2::new(Argon2id, V0x13, params);
    let mut key = vec![0u8; KEY_SIZE];
    argon2.hash_password_into(password.expose_secret(), salt, &mut key).map_err(|e| Error::KeyDerivation(e.to_string()))?;
    debug!("session key derived");
    Ok(SecretBytes::from_vec(key))
}
