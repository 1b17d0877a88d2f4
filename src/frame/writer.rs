use std::io::{self, Write};
use std::sync::Arc;

use tracing::debug;

use crate::cipher::{AeadCodec, KeyDeriver, RandomPool};
use crate::config::EncryptionConfig;
use crate::error::{Error, Result};
use crate::frame::{encode_ledger, trailer_size};
use crate::secret::Password;
use crate::session::Scope;

/// Seals every chunk written into it and appends the ledger trailer on [`FrameWriter::finalize`].
///
/// Each call to [`Write::write`] becomes exactly one sealed chunk, so callers
/// usually put a [`std::io::BufWriter`] in front of it to control chunk size.
pub struct FrameWriter<W: Write> {
    sink: W,
    codec: AeadCodec,
    nonces: Arc<RandomPool>,
    ledger: Vec<u64>,
    /// Salt plus sealed chunks, i.e. everything before the trailer.
    written: u64,
    header_ratio: u64,
    scope: Scope,
    failure: Option<Error>,
    finalized: bool,
}

impl<W: Write> FrameWriter<W> {
    /// Writes a fresh salt into `sink` and starts deriving the session key from it.
    ///
    /// # Errors
    ///
    /// Returns an error if the random pool or key derivation cannot start, or
    /// the salt cannot be written.
    pub fn new(mut sink: W, config: &EncryptionConfig, password: &Password, scope: Scope) -> Result<Self> {
        let nonces = Arc::new(RandomPool::start(config.random_block_size(), config.random_pool_capacity)?);
        let salt = nonces.take(config.salt_length)?;
        sink.write_all(&salt)?;

        let deriver = Arc::new(KeyDeriver::derive_async(password.to_bytes(), salt, config)?);
        let codec = AeadCodec::sealing(deriver, Arc::clone(&nonces));

        Ok(Self { sink, codec, nonces, ledger: Vec::new(), written: config.salt_length as u64, header_ratio: config.header_ratio, scope, failure: None, finalized: false })
    }

    /// Seals `chunk` and appends it to the sink.
    ///
    /// Empty chunks are ignored. After a failure every call returns the same error.
    ///
    /// # Errors
    ///
    /// Returns the sealing or I/O error, or [`Error::Canceled`] once the session is cancelled.
    pub fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        if self.finalized {
            return Err(Error::Io(Arc::new(io::Error::new(io::ErrorKind::BrokenPipe, "frame writer is finalized"))));
        }
        if let Err(err) = self.scope.check() {
            self.failure = Some(err.clone());
            return Err(err);
        }
        if chunk.is_empty() {
            return Ok(());
        }

        match self.seal_and_write(chunk) {
            Ok(()) => Ok(()),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Stops the random pool and writes the trailer.
    ///
    /// Does nothing but stop the pool when no chunk was written: such a
    /// container holds only its salt and reads back as an empty stream.
    ///
    /// # Errors
    ///
    /// Returns a latched error or the I/O error raised while writing the trailer.
    pub fn finalize(&mut self) -> Result<()> {
        self.nonces.stop();
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;

        if self.ledger.is_empty() {
            debug!("no chunks written, skipping trailer");
            return self.sink.flush().map_err(Error::from);
        }

        let text = encode_ledger(&self.ledger);
        let size = trailer_size(self.written, self.header_ratio, text.len());
        let mut trailer = text.into_bytes();
        trailer.resize(usize::try_from(size).map_err(|_| Error::CorruptHeader(format!("trailer of {size} bytes does not fit in memory")))?, 0);

        let result = self.sink.write_all(&trailer).and_then(|()| self.sink.flush());
        if let Err(e) = result {
            return Err(self.fail(e.into()));
        }
        debug!(chunks = self.ledger.len(), trailer = size, "trailer written");
        Ok(())
    }

    /// Sealed lengths recorded so far.
    #[inline]
    pub fn ledger(&self) -> &[u64] {
        &self.ledger
    }

    /// Bytes written before the trailer: salt plus sealed chunks.
    #[inline]
    pub fn written(&self) -> u64 {
        self.written
    }

    #[inline]
    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    /// Returns the sink. Call [`FrameWriter::finalize`] first or the container has no trailer.
    pub fn into_inner(self) -> W {
        self.sink
    }

    fn seal_and_write(&mut self, chunk: &[u8]) -> Result<()> {
        let sealed = self.codec.seal(chunk)?;
        self.sink.write_all(&sealed)?;
        let len = sealed.len() as u64;
        self.ledger.push(len);
        self.written += len;
        Ok(())
    }

    fn fail(&mut self, err: Error) -> Error {
        self.nonces.stop();
        self.failure = Some(err.clone());
        if !err.is_cancellation() {
            self.scope.fail(err.clone());
        }
        err
    }
}

impl<W: Write> Write for FrameWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_chunk(buf).map(|()| buf.len()).map_err(Error::into_io)
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(err) = &self.failure {
            return Err(err.clone().into_io());
        }
        self.sink.flush()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::config::{CHACHA_NONCE_SIZE, TAG_SIZE, fast_config};
    use crate::frame::decode_ledger;

    fn writer(config: &EncryptionConfig) -> FrameWriter<Cursor<Vec<u8>>> {
        FrameWriter::new(Cursor::new(Vec::new()), config, &Password::new("password1"), Scope::detached()).unwrap()
    }

    #[test]
    fn test_salt_is_written_first() {
        let config = fast_config();
        let writer = writer(&config);
        assert_eq!(writer.get_ref().get_ref().len(), config.salt_length);
        assert_eq!(writer.written(), config.salt_length as u64);
    }

    #[test]
    fn test_ledger_records_sealed_lengths() {
        let config = fast_config();
        let mut writer = writer(&config);
        writer.write_all(b"hello").unwrap();
        writer.write_all(b"").unwrap();
        writer.write_all(b"world!!").unwrap();

        let overhead = (CHACHA_NONCE_SIZE + TAG_SIZE) as u64;
        assert_eq!(writer.ledger(), &[5 + overhead, 7 + overhead]);
    }

    #[test]
    fn test_finalize_appends_padded_trailer() {
        let config = fast_config();
        let mut writer = writer(&config);
        writer.write_all(b"some data").unwrap();
        writer.finalize().unwrap();

        let written = writer.written();
        let ledger = writer.ledger().to_vec();
        let bytes = writer.into_inner().into_inner();
        let trailer = &bytes[usize::try_from(written).unwrap()..];
        assert_eq!(trailer.len() as u64, config.header_ratio);
        assert_eq!(Vec::from(decode_ledger(trailer).unwrap()), ledger);
    }

    #[test]
    fn test_finalize_without_chunks_writes_only_salt() {
        let config = fast_config();
        let mut writer = writer(&config);
        writer.finalize().unwrap();
        assert_eq!(writer.into_inner().into_inner().len(), config.salt_length);
    }

    #[test]
    fn test_write_after_cancel_fails() {
        let config = fast_config();
        let scope = Scope::detached();
        let mut writer = FrameWriter::new(Cursor::new(Vec::new()), &config, &Password::new("password1"), scope.clone()).unwrap();
        scope.cancel();

        let err = writer.write_all(b"late").unwrap_err();
        assert!(matches!(Error::from(err), Error::Canceled));
        assert!(matches!(writer.write_chunk(b"again"), Err(Error::Canceled)));
    }

    #[test]
    fn test_sink_failure_is_latched_and_reported() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                if buf.len() > 32 { Err(io::Error::other("disk full")) } else { Ok(buf.len()) }
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let config = fast_config();
        let (scope, errors) = Scope::new(&tokio_util::sync::CancellationToken::new());
        let mut writer = FrameWriter::new(Broken, &config, &Password::new("password1"), scope.clone()).unwrap();

        assert!(matches!(writer.write_chunk(b"payload"), Err(Error::Io(_))));
        assert!(matches!(writer.write_chunk(b"payload"), Err(Error::Io(_))));
        assert!(matches!(errors.try_recv(), Ok(Error::Io(_))));
        assert!(scope.is_cancelled());
    }
}
