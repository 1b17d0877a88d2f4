//! Global Configuration Constants
//!
//! This module holds every tunable parameter of the container format and the
//! encryption engine, plus [`EncryptionConfig`], the immutable bundle of those
//! values a single session runs with.
//!
//! ## Design Philosophy
//!
//! - **Security First**: key derivation parameters are memory-hard and salts are never shorter than Argon2 accepts
//! - **Bounded Memory**: every buffer and queue has a fixed upper size independent of the input size
//! - **Self Describing**: the container stores its own chunk ledger, so no format constant is needed to read it back
//!   other than the salt length and the header ratio

use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::Compression;

/// File extension appended to containers named without one.
pub const FILE_EXTENSION: &str = ".sbx";

// === Argon2 Key Derivation Parameters ===
// Defaults cost roughly tens of milliseconds and tens of megabytes on current hardware.

/// Argon2 time cost parameter (number of passes over memory).
pub const ARGON_TIME: u32 = 2;

/// Argon2 memory cost parameter in KiB.
///
/// 32 MiB keeps derivation memory-hard enough to hamper GPU/ASIC attacks while
/// staying well inside what a command-line tool may allocate.
pub const ARGON_MEMORY: u32 = 32 * 1024;

/// Argon2 parallelism parameter (number of lanes).
pub const ARGON_THREADS: u32 = 4;

/// Length of the random salt written at the start of every container.
///
/// Argon2 refuses salts shorter than 8 bytes.
pub const ARGON_SALT_LEN: usize = 16;

/// Shortest salt Argon2 accepts.
pub const ARGON_SALT_MIN_LEN: usize = 8;

// === AEAD Parameters (XChaCha20-Poly1305) ===

/// Size of the derived symmetric key in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of the extended XChaCha20 nonce in bytes.
///
/// 192 bits make random nonces safe: collisions are negligible even across
/// billions of chunks under one key.
pub const CHACHA_NONCE_SIZE: usize = 24;

/// Size of the Poly1305 authentication tag appended to every sealed chunk.
pub const TAG_SIZE: usize = 16;

// === Container Parameters ===

/// Marker opening the block-size trailer.
pub const TRAILER_TAG: &str = "BS";

/// Separator between trailer tokens.
pub const TRAILER_SEPARATOR: char = ';';

/// Default ratio between the container size and its trailer size.
///
/// The trailer never shrinks below this many bytes and grows roughly by one
/// byte per `HEADER_RATIO` bytes of payload beyond `HEADER_RATIO²`.
pub const HEADER_RATIO: u64 = 1024;

/// Smallest header ratio the format accepts.
pub const HEADER_RATIO_MIN: u64 = 16;

// === Processing and Buffering Parameters ===

/// Size of the plaintext chunks handed to the frame writer.
///
/// The archiver output is buffered up to this size before it is sealed, so
/// this also bounds the per-chunk overhead of nonce, tag and ledger entry.
pub const CHUNK_SIZE: usize = 256 * 1024;

/// Number of random blocks buffered ahead of the codec.
pub const RANDOM_POOL_CAPACITY: usize = 500;

/// Number of status events buffered per subscriber before new ones are dropped.
pub const STATUS_QUEUE_CAPACITY: usize = 1024;

/// Interval between two progress updates.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Compression level applied to the archive stream; valid for both zstd and gzip.
pub const COMPRESSION_LEVEL: i32 = 3;

/// Highest level gzip accepts.
pub const GZIP_LEVEL_MAX: i32 = 9;

/// Prefix of the staging directories and files created next to an output.
pub const TEMP_PREFIX: &str = ".strongbox-";

// === User Interface Limits ===

/// Minimum password length in bytes.
pub const PASSWORD_MIN_LENGTH: usize = 8;

/// Immutable parameters of one encryption or decryption session.
///
/// Every field has a sensible default; tests and callers with special needs
/// (fast derivation, tiny trailers) override individual fields with struct
/// update syntax and call [`EncryptionConfig::validate`] before use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionConfig {
    /// Argon2 passes over memory.
    pub kdf_time: u32,

    /// Argon2 memory cost in KiB.
    pub kdf_memory: u32,

    /// Argon2 lanes.
    pub kdf_parallelism: u32,

    /// Bytes of salt stored at the start of the container.
    pub salt_length: usize,

    /// Shortest password accepted, in bytes.
    pub min_password_length: usize,

    /// Ratio driving the trailer size.
    pub header_ratio: u64,

    /// Random blocks buffered by the random pool.
    pub random_pool_capacity: usize,

    /// Codec wrapped around the archive stream. Decryption must use the one the container was written with.
    pub compression: Compression,

    /// Level passed to the compression codec.
    pub compression_level: i32,

    /// Interval between progress updates.
    pub progress_interval: Duration,
}

impl EncryptionConfig {
    /// AEAD nonce length in bytes.
    pub const NONCE_LENGTH: usize = CHACHA_NONCE_SIZE;

    /// Checks that every parameter is inside the range the format and Argon2 accept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.salt_length < ARGON_SALT_MIN_LEN {
            return Err(Error::InvalidConfig(format!("salt length must be at least {ARGON_SALT_MIN_LEN} bytes, got {}", self.salt_length)));
        }
        if self.header_ratio < HEADER_RATIO_MIN {
            return Err(Error::InvalidConfig(format!("header ratio must be at least {HEADER_RATIO_MIN}, got {}", self.header_ratio)));
        }
        if self.random_pool_capacity == 0 {
            return Err(Error::InvalidConfig("random pool capacity must be positive".into()));
        }
        if self.kdf_time == 0 || self.kdf_parallelism == 0 {
            return Err(Error::InvalidConfig("argon2 time and parallelism must be positive".into()));
        }
        // Argon2 needs at least 8 KiB per lane.
        if self.kdf_memory < 8 * self.kdf_parallelism {
            return Err(Error::InvalidConfig(format!("argon2 memory must be at least {} KiB for {} lanes", 8 * self.kdf_parallelism, self.kdf_parallelism)));
        }
        let levels = match self.compression {
            Compression::Zstd => zstd::compression_level_range(),
            Compression::Gzip => 0..=GZIP_LEVEL_MAX,
        };
        if !levels.contains(&self.compression_level) {
            return Err(Error::InvalidConfig(format!("{} level must be within {}..={}, got {}", self.compression, levels.start(), levels.end(), self.compression_level)));
        }
        if self.progress_interval.is_zero() {
            return Err(Error::InvalidConfig("progress interval must be positive".into()));
        }
        Ok(())
    }

    /// Size of the blocks produced by the random pool: large enough for a salt or a nonce.
    #[inline]
    pub fn random_block_size(&self) -> usize {
        self.salt_length.max(Self::NONCE_LENGTH)
    }
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            kdf_time: ARGON_TIME,
            kdf_memory: ARGON_MEMORY,
            kdf_parallelism: ARGON_THREADS,
            salt_length: ARGON_SALT_LEN,
            min_password_length: PASSWORD_MIN_LENGTH,
            header_ratio: HEADER_RATIO,
            random_pool_capacity: RANDOM_POOL_CAPACITY,
            compression: Compression::default(),
            compression_level: COMPRESSION_LEVEL,
            progress_interval: PROGRESS_INTERVAL,
        }
    }
}

#[cfg(test)]
pub(crate) fn fast_config() -> EncryptionConfig {
    EncryptionConfig { kdf_time: 1, kdf_memory: 64, kdf_parallelism: 1, header_ratio: 64, random_pool_capacity: 16, progress_interval: Duration::from_millis(5), ..EncryptionConfig::default() }
}
