//! Tar archiving with zstd or gzip compression.
//!
//! The archiver only sees a [`Write`] sink and the extractor only a [`Read`]
//! source; where chunk boundaries fall is up to the buffering in front of
//! the frames.

use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use flate2::Compression as GzipLevel;
use flate2::bufread::GzDecoder;
use flate2::write::GzEncoder;
use tar::{Archive, Builder, Entry, EntryType, Header};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::session::Scope;
use crate::status::ProgressTracker;
use crate::types::Compression;

/// Compressing sink the archiver writes into.
pub enum Encoder<W: Write> {
    Zstd(zstd::Encoder<'static, W>),
    Gzip(GzEncoder<W>),
}

impl<W: Write> Encoder<W> {
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a level gzip does not accept, or the zstd setup error.
    pub fn new(sink: W, compression: Compression, level: i32) -> Result<Self> {
        match compression {
            Compression::Zstd => Ok(Self::Zstd(zstd::Encoder::new(sink, level)?)),
            Compression::Gzip => {
                let level = u32::try_from(level).map_err(|_| Error::InvalidConfig(format!("gzip level must not be negative, got {level}")))?;
                Ok(Self::Gzip(GzEncoder::new(sink, GzipLevel::new(level))))
            }
        }
    }

    /// Writes the compressed stream's epilogue and returns the sink.
    ///
    /// # Errors
    ///
    /// Returns the I/O error of the final write.
    pub fn finish(self) -> Result<W> {
        let sink = match self {
            Self::Zstd(encoder) => encoder.finish()?,
            Self::Gzip(encoder) => encoder.finish()?,
        };
        Ok(sink)
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Zstd(encoder) => encoder.write(buf),
            Self::Gzip(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Zstd(encoder) => encoder.flush(),
            Self::Gzip(encoder) => encoder.flush(),
        }
    }
}

/// Decompressed archive stream read by the extractor.
pub enum Decoder<R: Read> {
    Zstd(zstd::Decoder<'static, BufReader<R>>),
    Gzip(GzDecoder<BufReader<R>>),
}

impl<R: Read> Decoder<R> {
    /// # Errors
    ///
    /// Returns the zstd setup error.
    pub fn new(source: R, compression: Compression) -> Result<Self> {
        match compression {
            Compression::Zstd => Ok(Self::Zstd(zstd::Decoder::new(source)?)),
            Compression::Gzip => Ok(Self::Gzip(GzDecoder::new(BufReader::new(source)))),
        }
    }

    /// Reads the compressed stream and then its source to the end, and returns the source.
    ///
    /// Checksums at the end of the compressed stream are verified on the way.
    ///
    /// # Errors
    ///
    /// Returns the first read or decompression error.
    pub fn drain(mut self) -> Result<R> {
        io::copy(&mut self, &mut io::sink())?;
        let mut rest = match self {
            Self::Zstd(decoder) => decoder.finish(),
            Self::Gzip(decoder) => decoder.into_inner(),
        };
        io::copy(&mut rest, &mut io::sink())?;
        Ok(rest.into_inner())
    }
}

impl<R: Read> Read for Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Zstd(decoder) => decoder.read(buf),
            Self::Gzip(decoder) => decoder.read(buf),
        }
    }
}

/// An input root and the name it is stored under.
#[derive(Debug, Clone)]
pub struct Root {
    pub path: PathBuf,
    pub name: OsString,
}

/// Streams every root into `sink` as a compressed tar archive and returns the sink.
///
/// File contents advance `progress` as they are read.
///
/// # Errors
///
/// Returns [`Error::Canceled`] once `scope` is cancelled, or the first I/O error.
pub fn archive<W: Write>(roots: &[Root], sink: W, compression: Compression, level: i32, progress: Option<&ProgressTracker>, scope: &Scope) -> Result<W> {
    let encoder = Encoder::new(sink, compression, level)?;
    let mut builder = Builder::new(encoder);
    builder.follow_symlinks(false);

    for root in roots {
        for item in WalkDir::new(&root.path).follow_links(false).sort_by_file_name() {
            scope.check()?;
            let item = item.map_err(io::Error::from)?;
            let name = match item.path().strip_prefix(&root.path) {
                Ok(relative) if !relative.as_os_str().is_empty() => Path::new(&root.name).join(relative),
                _ => PathBuf::from(&root.name),
            };

            if item.file_type().is_file() {
                append_file(&mut builder, item.path(), &name, progress)?;
            } else {
                builder.append_path_with_name(item.path(), &name)?;
            }
            debug!(entry = %name.display(), "archived");
        }
    }

    builder.into_inner()?.finish()
}

/// Calls `visit` for every entry of the archive in `source`, then reads `source` to its end.
///
/// Draining the source matters for authenticated sources: trailing chunks the
/// archive format does not need are still verified.
///
/// # Errors
///
/// Returns [`Error::Canceled`] once `scope` is cancelled, the first error of
/// `visit`, or the first I/O error.
pub fn for_each_entry<R, F>(source: R, compression: Compression, scope: &Scope, mut visit: F) -> Result<R>
where
    R: Read,
    F: FnMut(&mut Entry<'_, Decoder<R>>) -> Result<()>,
{
    let decoder = Decoder::new(source, compression)?;
    let mut archive = Archive::new(decoder);

    for entry in archive.entries()? {
        scope.check()?;
        let mut entry = entry?;
        visit(&mut entry)?;
    }

    archive.into_inner().drain()
}

/// Unpacks the archive in `source` below `dest`, keeping entry modes.
///
/// Entries that would land outside `dest` are skipped.
///
/// # Errors
///
/// See [`for_each_entry`].
pub fn extract<R: Read>(source: R, dest: &Path, compression: Compression, scope: &Scope) -> Result<R> {
    for_each_entry(source, compression, scope, |entry| {
        let path = entry.path()?.into_owned();
        let kind = entry.header().entry_type();
        let mode = entry.header().mode().ok();
        if entry.unpack_in(dest)? {
            debug!(entry = %path.display(), dir = kind == EntryType::Directory, ?mode, "extracted");
        } else {
            warn!(entry = %path.display(), "skipping archive entry outside the output directory");
        }
        Ok(())
    })
}

fn append_file<W: Write>(builder: &mut Builder<W>, path: &Path, name: &Path, progress: Option<&ProgressTracker>) -> Result<()> {
    let file = File::open(path)?;
    let meta = file.metadata()?;
    let mut header = Header::new_gnu();
    header.set_metadata(&meta);
    // The size in the header is binding; never copy more than it announces.
    let reader = Counting { inner: file.take(meta.len()), progress };
    builder.append_data(&mut header, name, reader).map_err(Error::from)
}

struct Counting<'a, R> {
    inner: R,
    progress: Option<&'a ProgressTracker>,
}

impl<R: Read> Read for Counting<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if let Some(progress) = self.progress {
            progress.advance(n as u64);
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Cursor;

    use super::*;

    fn root(path: &Path) -> Root {
        Root { path: path.to_path_buf(), name: path.file_name().unwrap().to_os_string() }
    }

    #[test]
    fn test_archive_extract_tree() {
        let src = tempfile::tempdir().unwrap();
        let tree = src.path().join("tree");
        fs::create_dir_all(tree.join("nested/deeper")).unwrap();
        fs::write(tree.join("top.txt"), b"top level").unwrap();
        fs::write(tree.join("nested/deeper/leaf.bin"), vec![7u8; 10_000]).unwrap();
        let single = src.path().join("single.txt");
        fs::write(&single, b"alone").unwrap();

        let progress = ProgressTracker::new(10_014, 0.0, 100.0);
        let scope = Scope::detached();
        let bytes = archive(&[root(&tree), root(&single)], Vec::new(), Compression::Zstd, 3, Some(&progress), &scope).unwrap();
        assert_eq!(progress.processed(), 10_014);

        let dest = tempfile::tempdir().unwrap();
        extract(Cursor::new(bytes), dest.path(), Compression::Zstd, &scope).unwrap();
        assert_eq!(fs::read(dest.path().join("tree/top.txt")).unwrap(), b"top level");
        assert_eq!(fs::read(dest.path().join("tree/nested/deeper/leaf.bin")).unwrap(), vec![7u8; 10_000]);
        assert_eq!(fs::read(dest.path().join("single.txt")).unwrap(), b"alone");
    }

    #[test]
    fn test_for_each_entry_lists_names() {
        let src = tempfile::tempdir().unwrap();
        let tree = src.path().join("docs");
        fs::create_dir_all(&tree).unwrap();
        fs::write(tree.join("a.txt"), b"a").unwrap();

        let scope = Scope::detached();
        let bytes = archive(&[root(&tree)], Vec::new(), Compression::Zstd, 1, None, &scope).unwrap();

        let mut names = Vec::new();
        for_each_entry(Cursor::new(bytes), Compression::Zstd, &scope, |entry| {
            names.push(entry.path()?.into_owned());
            Ok(())
        })
        .unwrap();
        assert_eq!(names, vec![PathBuf::from("docs"), PathBuf::from("docs/a.txt")]);
    }

    #[test]
    fn test_empty_file_roundtrip() {
        let src = tempfile::tempdir().unwrap();
        let empty = src.path().join("empty.txt");
        fs::write(&empty, b"").unwrap();

        let scope = Scope::detached();
        let bytes = archive(&[root(&empty)], Vec::new(), Compression::Zstd, 3, None, &scope).unwrap();
        let dest = tempfile::tempdir().unwrap();
        extract(Cursor::new(bytes), dest.path(), Compression::Zstd, &scope).unwrap();
        assert_eq!(fs::read(dest.path().join("empty.txt")).unwrap(), b"");
    }

    #[test]
    fn test_cancelled_scope_stops_archiving() {
        let src = tempfile::tempdir().unwrap();
        let file = src.path().join("data.txt");
        fs::write(&file, b"data").unwrap();

        let scope = Scope::detached();
        scope.cancel();
        assert!(matches!(archive(&[root(&file)], Vec::new(), Compression::Zstd, 3, None, &scope), Err(Error::Canceled)));
    }

    #[test]
    fn test_gzip_archive_roundtrip() {
        let src = tempfile::tempdir().unwrap();
        let tree = src.path().join("logs");
        fs::create_dir_all(&tree).unwrap();
        fs::write(tree.join("app.log"), b"line\n".repeat(2_000)).unwrap();

        let scope = Scope::detached();
        let bytes = archive(&[root(&tree)], Vec::new(), Compression::Gzip, 6, None, &scope).unwrap();
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);

        let dest = tempfile::tempdir().unwrap();
        extract(Cursor::new(bytes), dest.path(), Compression::Gzip, &scope).unwrap();
        assert_eq!(fs::read(dest.path().join("logs/app.log")).unwrap(), b"line\n".repeat(2_000));
    }

    #[test]
    fn test_corrupt_gzip_trailer_is_detected() {
        let src = tempfile::tempdir().unwrap();
        let file = src.path().join("data.txt");
        fs::write(&file, b"checksummed").unwrap();

        let scope = Scope::detached();
        let mut bytes = archive(&[root(&file)], Vec::new(), Compression::Gzip, 6, None, &scope).unwrap();
        let crc = bytes.len() - 8;
        bytes[crc] ^= 0xff;

        let dest = tempfile::tempdir().unwrap();
        assert!(extract(Cursor::new(bytes), dest.path(), Compression::Gzip, &scope).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_mode_survives_roundtrip() {
        use std::os::unix::fs::PermissionsExt;

        let src = tempfile::tempdir().unwrap();
        let script = src.path().join("run.sh");
        fs::write(&script, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o751)).unwrap();

        let scope = Scope::detached();
        let bytes = archive(&[root(&script)], Vec::new(), Compression::Zstd, 3, None, &scope).unwrap();
        let dest = tempfile::tempdir().unwrap();
        extract(Cursor::new(bytes), dest.path(), Compression::Zstd, &scope).unwrap();

        let mode = fs::metadata(dest.path().join("run.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o751);
    }
}
