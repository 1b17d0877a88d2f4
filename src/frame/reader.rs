use std::collections::VecDeque;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use tracing::debug;

use crate::cipher::{AeadCodec, KeyDeriver};
use crate::config::{EncryptionConfig, TRAILER_SEPARATOR, TRAILER_TAG};
use crate::error::{Error, Result};
use crate::frame::{candidate_sizes, decode_ledger};
use crate::secret::Password;
use crate::session::Scope;
use crate::status::ProgressTracker;

/// Serves the decrypted stream of a container through [`Read`].
///
/// The caller's read sizes are independent of chunk boundaries: whatever part
/// of a decrypted chunk does not fit into the caller's buffer is kept as
/// overflow and served first by the next read.
pub struct FrameReader<R: Read + Seek> {
    source: R,
    codec: AeadCodec,
    ledger: VecDeque<u64>,
    overflow: Vec<u8>,
    overflow_pos: usize,
    /// First byte after the salt.
    data_start: u64,
    progress: Option<ProgressTracker>,
    scope: Scope,
    failure: Option<Error>,
}

impl<R: Read + Seek> FrameReader<R> {
    /// Reads the salt, starts deriving the key, then locates and parses the trailer.
    ///
    /// A container made of its salt alone is an empty stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptHeader`] if the container is shorter than its
    /// salt or no valid trailer can be found, and I/O errors from `source`.
    pub fn open(mut source: R, config: &EncryptionConfig, password: &Password, scope: Scope) -> Result<Self> {
        let salt_length = config.salt_length as u64;
        let total = source.seek(SeekFrom::End(0))?;
        if total < salt_length {
            return Err(Error::CorruptHeader(format!("container is {total} bytes, shorter than its {salt_length}-byte salt")));
        }

        source.seek(SeekFrom::Start(0))?;
        let mut salt = vec![0u8; config.salt_length];
        source.read_exact(&mut salt)?;
        let deriver = Arc::new(KeyDeriver::derive_async(password.to_bytes(), salt, config)?);

        let ledger = if total == salt_length { VecDeque::new() } else { locate_ledger(&mut source, salt_length, total, config.header_ratio)? };
        debug!(chunks = ledger.len(), "container opened");

        source.seek(SeekFrom::Start(salt_length))?;
        Ok(Self { source, codec: AeadCodec::opening(deriver), ledger, overflow: Vec::new(), overflow_pos: 0, data_start: salt_length, progress: None, scope, failure: None })
    }

    /// Advances `tracker` by the sealed size of every chunk consumed.
    #[must_use]
    pub fn with_progress(mut self, tracker: ProgressTracker) -> Self {
        self.progress = Some(tracker);
        self
    }

    /// Chunks not yet decrypted.
    #[inline]
    pub fn remaining_chunks(&self) -> usize {
        self.ledger.len()
    }

    /// Offset of the first sealed chunk.
    #[inline]
    pub fn data_start(&self) -> u64 {
        self.data_start
    }

    /// Decrypts the next chunk whole, ignoring any overflow.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EndOfStream`] once the ledger is exhausted, a latched
    /// error if an earlier call failed, [`Error::Canceled`] once the session is
    /// cancelled, and [`Error::AuthenticationFailure`] for a chunk that does
    /// not verify.
    pub fn next_chunk(&mut self) -> Result<Vec<u8>> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        if let Err(err) = self.scope.check() {
            self.failure = Some(err.clone());
            return Err(err);
        }
        let Some(len) = self.ledger.pop_front() else {
            return Err(Error::EndOfStream);
        };

        match self.read_and_open(len) {
            Ok(plaintext) => Ok(plaintext),
            Err(err) => Err(self.fail(err)),
        }
    }

    pub fn into_inner(self) -> R {
        self.source
    }

    fn read_and_open(&mut self, len: u64) -> Result<Vec<u8>> {
        let len = usize::try_from(len).map_err(|_| Error::CorruptHeader(format!("chunk of {len} bytes does not fit in memory")))?;
        let mut sealed = vec![0u8; len];
        self.source.read_exact(&mut sealed)?;
        let plaintext = self.codec.open(&sealed)?;
        if let Some(progress) = &self.progress {
            progress.advance(len as u64);
        }
        Ok(plaintext)
    }

    fn fail(&mut self, err: Error) -> Error {
        self.failure = Some(err.clone());
        if !err.is_cancellation() {
            self.scope.fail(err.clone());
        }
        err
    }

    fn drain_overflow(&mut self, buf: &mut [u8]) -> usize {
        let pending = &self.overflow[self.overflow_pos..];
        let n = pending.len().min(buf.len());
        buf[..n].copy_from_slice(&pending[..n]);
        self.overflow_pos += n;
        if self.overflow_pos == self.overflow.len() {
            self.overflow.clear();
            self.overflow_pos = 0;
        }
        n
    }
}

impl<R: Read + Seek> Read for FrameReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut served = self.drain_overflow(buf);
        if served == buf.len() {
            return Ok(served);
        }

        match self.next_chunk() {
            Ok(plaintext) => {
                let n = plaintext.len().min(buf.len() - served);
                buf[served..served + n].copy_from_slice(&plaintext[..n]);
                served += n;
                if n < plaintext.len() {
                    self.overflow = plaintext;
                    self.overflow_pos = n;
                }
                Ok(served)
            }
            Err(Error::EndOfStream) => Ok(served),
            // Bytes already copied out are still valid; the error resurfaces on the next call.
            Err(_) if served > 0 => Ok(served),
            Err(err) => Err(err.into_io()),
        }
    }
}

/// Finds the trailer of a `total`-byte container and returns its ledger.
fn locate_ledger<R: Read + Seek>(source: &mut R, salt_length: u64, total: u64, ratio: u64) -> Result<VecDeque<u64>> {
    let tag = format!("{TRAILER_TAG}{TRAILER_SEPARATOR}");
    let mut head = vec![0u8; tag.len()];

    for size in candidate_sizes(ratio, total - salt_length) {
        let start = total - size;
        source.seek(SeekFrom::Start(start))?;
        source.read_exact(&mut head)?;
        if head != tag.as_bytes() {
            continue;
        }

        let mut trailer = vec![0u8; usize::try_from(size).map_err(|_| Error::CorruptHeader(format!("trailer of {size} bytes does not fit in memory")))?];
        source.seek(SeekFrom::Start(start))?;
        source.read_exact(&mut trailer)?;
        let Ok(ledger) = decode_ledger(&trailer) else {
            continue;
        };

        let chunks = ledger.iter().try_fold(0u64, |sum, len| sum.checked_add(*len));
        if chunks.and_then(|sum| sum.checked_add(salt_length + size)) == Some(total) {
            debug!(trailer = size, "trailer located");
            return Ok(ledger);
        }
    }

    Err(Error::CorruptHeader("no block-size trailer matches the container size".into()))
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use super::*;
    use crate::config::fast_config;
    use crate::frame::FrameWriter;

    const PASSWORD: &str = "password1";

    fn seal(config: &EncryptionConfig, chunks: &[&[u8]]) -> Vec<u8> {
        let mut writer = FrameWriter::new(Cursor::new(Vec::new()), config, &Password::new(PASSWORD), Scope::detached()).unwrap();
        for chunk in chunks {
            writer.write_all(chunk).unwrap();
        }
        writer.finalize().unwrap();
        writer.into_inner().into_inner()
    }

    fn open(config: &EncryptionConfig, container: Vec<u8>, password: &str) -> Result<FrameReader<Cursor<Vec<u8>>>> {
        FrameReader::open(Cursor::new(container), config, &Password::new(password), Scope::detached())
    }

    fn read_all(reader: &mut impl Read) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn test_roundtrip_with_small_reads() {
        let config = fast_config();
        let container = seal(&config, &[b"Hello, ", b"chunked ", b"world!"]);
        let mut reader = open(&config, container, PASSWORD).unwrap();
        assert_eq!(reader.data_start(), config.salt_length as u64);

        let mut out = Vec::new();
        let mut buf = [0u8; 3];
        loop {
            let n = reader.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, b"Hello, chunked world!");
    }

    #[test]
    fn test_roundtrip_with_large_reads() {
        let config = fast_config();
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        let chunks: Vec<&[u8]> = data.chunks(4096).collect();
        let container = seal(&config, &chunks);

        let mut reader = open(&config, container, PASSWORD).unwrap();
        assert_eq!(read_all(&mut reader).unwrap(), data);
    }

    #[test]
    fn test_next_chunk_ends_with_end_of_stream() {
        let config = fast_config();
        let container = seal(&config, &[b"one", b"two"]);
        let mut reader = open(&config, container, PASSWORD).unwrap();
        assert_eq!(reader.remaining_chunks(), 2);
        assert_eq!(reader.next_chunk().unwrap(), b"one");
        assert_eq!(reader.next_chunk().unwrap(), b"two");
        assert!(matches!(reader.next_chunk(), Err(Error::EndOfStream)));
    }

    #[test]
    fn test_salt_only_container_is_empty() {
        let config = fast_config();
        let container = seal(&config, &[]);
        assert_eq!(container.len(), config.salt_length);

        let mut reader = open(&config, container, PASSWORD).unwrap();
        assert!(read_all(&mut reader).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_container_is_corrupt() {
        let config = fast_config();
        assert!(matches!(open(&config, Vec::new(), PASSWORD), Err(Error::CorruptHeader(_))));

        let mut container = seal(&config, &[b"some payload"]);
        container.truncate(container.len() - 10);
        assert!(matches!(open(&config, container, PASSWORD), Err(Error::CorruptHeader(_))));
    }

    #[test]
    fn test_wrong_password_fails_authentication() {
        let config = fast_config();
        let container = seal(&config, &[b"Secret"]);
        let mut reader = open(&config, container, "password2").unwrap();
        let err = read_all(&mut reader).unwrap_err();
        assert!(matches!(Error::from(err), Error::AuthenticationFailure(_)));
    }

    #[test]
    fn test_every_bit_flip_in_chunks_is_detected() {
        let config = fast_config();
        let container = seal(&config, &[b"abc", b"defgh"]);
        let reader = open(&config, container.clone(), PASSWORD).unwrap();
        let body_end = usize::try_from(reader.data_start()).unwrap() + (3 + 5 + 2 * 40);

        for index in config.salt_length..body_end {
            for bit in 0..8 {
                let mut tampered = container.clone();
                tampered[index] ^= 1 << bit;
                let mut reader = open(&config, tampered, PASSWORD).unwrap();
                let err = read_all(&mut reader).unwrap_err();
                assert!(matches!(Error::from(err), Error::AuthenticationFailure(_)), "flip at byte {index} bit {bit} not detected");
            }
        }
    }

    #[test]
    fn test_swapped_chunks_are_detected() {
        let config = fast_config();
        let container = seal(&config, &[b"first!", b"second"]);
        let start = config.salt_length;
        let frame = 6 + 40;

        let mut swapped = container.clone();
        swapped[start..start + frame].copy_from_slice(&container[start + frame..start + 2 * frame]);
        swapped[start + frame..start + 2 * frame].copy_from_slice(&container[start..start + frame]);

        let mut reader = open(&config, swapped, PASSWORD).unwrap();
        let err = read_all(&mut reader).unwrap_err();
        assert!(matches!(Error::from(err), Error::AuthenticationFailure(_)));
    }

    #[test]
    fn test_error_is_latched() {
        let config = fast_config();
        let container = seal(&config, &[b"Secret"]);
        let mut reader = open(&config, container, "password2").unwrap();
        assert!(matches!(reader.next_chunk(), Err(Error::AuthenticationFailure(_))));
        assert!(matches!(reader.next_chunk(), Err(Error::AuthenticationFailure(_))));
    }

    #[test]
    fn test_progress_counts_sealed_bytes() {
        let config = fast_config();
        let container = seal(&config, &[b"0123456789"]);
        let tracker = ProgressTracker::new(container.len() as u64, 0.0, 100.0);
        let mut reader = open(&config, container, PASSWORD).unwrap().with_progress(tracker.clone());
        read_all(&mut reader).unwrap();
        assert_eq!(tracker.processed(), 10 + 40);
    }

    #[test]
    fn test_large_ledger_uses_grown_trailer() {
        let config = EncryptionConfig { header_ratio: 16, ..fast_config() };
        let chunks: Vec<Vec<u8>> = (0..40u8).map(|i| vec![i; 3]).collect();
        let refs: Vec<&[u8]> = chunks.iter().map(Vec::as_slice).collect();
        let container = seal(&config, &refs);

        let mut reader = open(&config, container, PASSWORD).unwrap();
        assert_eq!(reader.remaining_chunks(), 40);
        assert_eq!(read_all(&mut reader).unwrap(), chunks.concat());
    }
}
