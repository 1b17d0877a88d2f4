//! Error taxonomy shared by every stage of a session.
//!
//! Errors are `Clone` so a frame can latch the first failure and re-raise it on
//! every later call, while the same value travels to the session controller.
//! I/O errors are therefore held behind an [`Arc`].

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("invalid input path {}: {reason}", .path.display())]
    InvalidInputPath { path: PathBuf, reason: &'static str },

    #[error("invalid output path {}: {reason}", .path.display())]
    InvalidOutputPath { path: PathBuf, reason: &'static str },

    #[error("password must be at least {min} bytes long, got {len}")]
    InvalidPasswordLength { len: usize, min: usize },

    /// Wrong password, tampered or reordered chunk, or a chunk too short to hold its nonce.
    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),

    /// Missing or unparseable block-size trailer.
    #[error("corrupt container header: {0}")]
    CorruptHeader(String),

    /// Every chunk in the ledger has been served.
    #[error("end of encrypted stream")]
    EndOfStream,

    #[error("random source failure: {0}")]
    RandomSource(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("operation canceled")]
    Canceled,

    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    #[error("background task failed: {0}")]
    Task(String),

    #[error("I/O error: {0}")]
    Io(#[source] Arc<io::Error>),
}

impl Error {
    /// Wraps the error so it can cross an [`io::Read`]/[`io::Write`] boundary.
    ///
    /// The original value is recovered by `From<io::Error>` on the other side.
    pub fn into_io(self) -> io::Error {
        io::Error::other(self)
    }

    /// True for the outcomes caused by the caller rather than by the data.
    #[inline]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Canceled | Self::DeadlineExceeded)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.get_ref().and_then(|inner| inner.downcast_ref::<Self>()) {
            Some(own) => own.clone(),
            None => Self::Io(Arc::new(err)),
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() { Self::Canceled } else { Self::Task(err.to_string()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_survives_io_round_trip() {
        let err = Error::AuthenticationFailure("chunk 3".into());
        let back = Error::from(err.into_io());
        assert!(matches!(back, Error::AuthenticationFailure(msg) if msg == "chunk 3"));
    }

    #[test]
    fn test_plain_io_error_is_wrapped() {
        let err = Error::from(io::Error::new(io::ErrorKind::NotFound, "missing"));
        assert!(matches!(err, Error::Io(ref inner) if inner.kind() == io::ErrorKind::NotFound));
    }

    #[test]
    fn test_canceled_is_not_retried_by_std() {
        // `Interrupted` would make `write_all`/`read_exact` loop forever.
        assert_ne!(Error::Canceled.into_io().kind(), io::ErrorKind::Interrupted);
    }

    #[test]
    fn test_password_length_message() {
        let err = Error::InvalidPasswordLength { len: 3, min: 8 };
        assert_eq!(err.to_string(), "password must be at least 8 bytes long, got 3");
    }
}
