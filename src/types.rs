//! Common type definitions.
//!
//! - [`Processing`]: which direction a session runs in
//! - [`Stage`]: the states a session moves through
//! - [`Compression`]: the codec around the archive stream

use std::fmt::{Display, Formatter, Result};

use strum::{Display as StrumDisplay, EnumString};

/// Represents a processing operation in progress.
///
/// Provides display labels for progress indicators and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processing {
    /// Inputs are archived, compressed and sealed into a container.
    Encryption,

    /// A container is opened, decompressed and extracted.
    Decryption,
}

impl Processing {
    /// Returns a progress label for the operation.
    #[inline]
    pub fn label(self) -> &'static str {
        match self {
            Self::Encryption => "Encrypting...",
            Self::Decryption => "Decrypting...",
        }
    }

    /// Past-tense verb used in completion messages.
    #[inline]
    pub fn done_label(self) -> &'static str {
        match self {
            Self::Encryption => "encrypted",
            Self::Decryption => "decrypted",
        }
    }
}

impl Display for Processing {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.write_str(self.label())
    }
}

/// Lifecycle of a session.
///
/// `Validating → Preparing → Transferring → Finalizing → Done`, with
/// `Aborted` reachable from every stage but `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay)]
#[strum(serialize_all = "lowercase")]
pub enum Stage {
    Validating,
    Preparing,
    Transferring,
    Finalizing,
    Done,
    Aborted,
}

impl Stage {
    /// True once the session can no longer change stage.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_enter(self, next: Self) -> bool {
        match (self, next) {
            (Self::Validating, Self::Preparing) | (Self::Preparing, Self::Transferring) | (Self::Transferring, Self::Finalizing) | (Self::Finalizing, Self::Done) => true,
            (current, Self::Aborted) => !current.is_terminal(),
            _ => false,
        }
    }
}

/// Compression applied to the tar stream before it is chunked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, StrumDisplay, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Compression {
    #[default]
    Zstd,
    Gzip,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_happy_path() {
        let path = [Stage::Validating, Stage::Preparing, Stage::Transferring, Stage::Finalizing, Stage::Done];
        for pair in path.windows(2) {
            assert!(pair[0].can_enter(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_stage_abort_rules() {
        assert!(Stage::Validating.can_enter(Stage::Aborted));
        assert!(Stage::Finalizing.can_enter(Stage::Aborted));
        assert!(!Stage::Done.can_enter(Stage::Aborted));
        assert!(!Stage::Aborted.can_enter(Stage::Aborted));
        assert!(!Stage::Validating.can_enter(Stage::Transferring));
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Transferring.to_string(), "transferring");
        assert_eq!(Processing::Decryption.to_string(), "Decrypting...");
    }

    #[test]
    fn test_compression_names() {
        assert_eq!(Compression::default(), Compression::Zstd);
        assert_eq!(Compression::Gzip.to_string(), "gzip");
        assert_eq!("GZIP".parse::<Compression>().unwrap(), Compression::Gzip);
        assert!("brotli".parse::<Compression>().is_err());
    }
}
