//! Strongbox - streaming authenticated encryption of files and directories.
//!
//! Inputs are archived with tar, compressed with zstd or gzip and cut into chunks,
//! each sealed with XChaCha20-Poly1305 under an Argon2id key:
//! - a random salt leads the container
//! - every chunk carries its own nonce and authenticates its position
//! - a zero-padded trailer records the sealed length of every chunk
//!
//! [`Processor`] drives whole encrypt and decrypt sessions; [`frame`] exposes
//! the chunked stream on its own.

pub mod archive;
pub mod cipher;
pub mod config;
pub mod error;
pub mod file;
pub mod frame;
pub mod processor;
pub mod secret;
pub mod session;
pub mod status;
pub mod types;

pub use config::EncryptionConfig;
pub use error::{Error, Result};
pub use processor::Processor;
pub use secret::Password;
pub use status::{Status, StatusBus};
pub use tokio_util::sync::CancellationToken;
