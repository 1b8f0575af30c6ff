//! Random access to line-oriented text files
//!
//! A [`RecordSource`] reads whole lines starting at a byte offset. Plain files
//! are memory mapped and sliced directly. Compressed files are decoded with
//! niffler; offsets always refer to the decompressed stream, so a read seeks
//! forward by decoding and discarding bytes, and reopens the decoder only when
//! it has to move backwards.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use memchr::memchr;
use memmap2::Mmap;
use niffler::Format;

use crate::error::{ReadError, Result};

/// Buffer capacity used for decoding compressed sources
const DECODE_BUFFER_SIZE: usize = 1 << 16;

/// Opens a decoding reader over `path` and reports the detected compression
///
/// Files too short to carry a compression header are read as plain text.
fn decode(path: &Path) -> Result<(Box<dyn Read>, Format)> {
    match niffler::get_reader(Box::new(File::open(path)?)) {
        Ok(pair) => Ok(pair),
        Err(niffler::Error::FileTooShort) => Ok((Box::new(File::open(path)?), Format::No)),
        Err(e) => Err(e.into()),
    }
}

/// Returns the compression format of `path` as detected by niffler
pub fn compression_format<P: AsRef<Path>>(path: P) -> Result<Format> {
    decode(path.as_ref()).map(|(_, format)| format)
}

/// Returns true if `path` is compressed in a format niffler can decode
pub fn is_compressed<P: AsRef<Path>>(path: P) -> Result<bool> {
    Ok(compression_format(path)? != Format::No)
}

/// Opens a buffered reader over the decompressed contents of `path`
pub fn open_decoded<P: AsRef<Path>>(path: P) -> Result<BufReader<Box<dyn Read>>> {
    let (reader, _format) = decode(path.as_ref())?;
    Ok(BufReader::with_capacity(DECODE_BUFFER_SIZE, reader))
}

/// Calls `f` with the logical byte offset and contents of every line in `path`
///
/// The line passed to `f` has its trailing line terminator removed.
/// This is a single linear pass over the (decompressed) file.
pub fn for_each_line<P, F>(path: P, mut f: F) -> Result<()>
where
    P: AsRef<Path>,
    F: FnMut(u64, &[u8]) -> Result<()>,
{
    let mut reader = open_decoded(path)?;
    let mut line = Vec::new();
    let mut offset = 0u64;
    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            break;
        }
        f(offset, trim_line(&line))?;
        offset += n as u64;
    }
    Ok(())
}

/// Strips a trailing `\n` or `\r\n` from a line
#[must_use]
pub fn trim_line(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// A decoder over a compressed file that tracks its logical position
struct Decoded {
    reader: BufReader<Box<dyn Read>>,
    pos: u64,
    /// Times the decoder was reopened to move backwards
    restarts: usize,
}

enum Inner {
    Mapped(Mmap),
    Decoded(Decoded),
}

/// Random-access line reader over a plain or compressed file
pub struct RecordSource {
    path: PathBuf,
    inner: Inner,
}
impl RecordSource {
    /// Opens `path`, memory mapping it if it is not compressed
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        if !file.metadata()?.is_file() {
            return Err(ReadError::IncompatibleFile.into());
        }

        let inner = match decode(&path)? {
            (_, Format::No) => {
                // Safety: record files are read-only inputs and are not modified while mapped
                Inner::Mapped(unsafe { Mmap::map(&file)? })
            }
            (reader, _) => Inner::Decoded(Decoded {
                reader: BufReader::with_capacity(DECODE_BUFFER_SIZE, reader),
                pos: 0,
                restarts: 0,
            }),
        };
        Ok(Self { path, inner })
    }

    /// Returns the path this source was opened from
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if the source is decoded rather than memory mapped
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        matches!(self.inner, Inner::Decoded(_))
    }

    /// Number of times a compressed source was decoded again from its start
    ///
    /// Always 0 for memory mapped sources.
    #[must_use]
    pub fn restarts(&self) -> usize {
        match &self.inner {
            Inner::Mapped(_) => 0,
            Inner::Decoded(decoded) => decoded.restarts,
        }
    }

    /// Appends up to `n` lines starting at `offset` to `buf`, terminators included
    ///
    /// Returns the number of lines that were read, which is smaller than `n`
    /// only when the end of the source is reached.
    pub fn read_lines_at(&mut self, offset: u64, n: usize, buf: &mut Vec<u8>) -> Result<usize> {
        match &mut self.inner {
            Inner::Mapped(mmap) => Self::read_mapped(mmap, offset, n, buf),
            Inner::Decoded(decoded) => {
                if offset < decoded.pos {
                    decoded.reader = open_decoded(&self.path)?;
                    decoded.pos = 0;
                    decoded.restarts += 1;
                }
                Self::read_decoded(decoded, offset, n, buf)
            }
        }
    }

    fn read_mapped(mmap: &Mmap, offset: u64, n: usize, buf: &mut Vec<u8>) -> Result<usize> {
        let size = mmap.len() as u64;
        if offset > size {
            return Err(ReadError::OffsetOutOfRange(offset, size).into());
        }
        let mut pos = offset as usize;
        let mut lines = 0;
        while lines < n && pos < mmap.len() {
            let end = match memchr(b'\n', &mmap[pos..]) {
                Some(idx) => pos + idx + 1,
                None => mmap.len(),
            };
            buf.extend_from_slice(&mmap[pos..end]);
            pos = end;
            lines += 1;
        }
        Ok(lines)
    }

    fn read_decoded(
        decoded: &mut Decoded,
        offset: u64,
        n: usize,
        buf: &mut Vec<u8>,
    ) -> Result<usize> {
        let skip = offset - decoded.pos;
        if skip > 0 {
            let skipped = io::copy(&mut (&mut decoded.reader).take(skip), &mut io::sink())?;
            decoded.pos += skipped;
            if skipped < skip {
                return Err(ReadError::OffsetOutOfRange(offset, decoded.pos).into());
            }
        }
        let mut lines = 0;
        while lines < n {
            let read = decoded.reader.read_until(b'\n', buf)?;
            if read == 0 {
                break;
            }
            decoded.pos += read as u64;
            lines += 1;
        }
        Ok(lines)
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use anyhow::Result;
    use flate2::{write::GzEncoder, Compression};
    use std::io::Write;

    const TEXT: &[u8] = b"alpha\nbravo\r\ncharlie\ndelta";

    fn write_plain(dir: &Path) -> Result<PathBuf> {
        let path = dir.join("lines.txt");
        std::fs::write(&path, TEXT)?;
        Ok(path)
    }

    fn write_gz(dir: &Path) -> Result<PathBuf> {
        let path = dir.join("lines.txt.gz");
        let mut encoder = GzEncoder::new(File::create(&path)?, Compression::default());
        encoder.write_all(TEXT)?;
        encoder.finish()?;
        Ok(path)
    }

    #[test]
    fn test_detect_compression() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(!is_compressed(write_plain(dir.path())?)?);
        assert!(is_compressed(write_gz(dir.path())?)?);
        assert_eq!(compression_format(write_gz(dir.path())?)?, Format::Gzip);

        let zst = dir.path().join("lines.txt.zst");
        std::fs::write(&zst, zstd::encode_all(TEXT, 3)?)?;
        assert_eq!(compression_format(&zst)?, Format::Zstd);
        let mut source = RecordSource::open(&zst)?;
        assert!(source.is_compressed());
        let mut buf = Vec::new();
        assert_eq!(source.read_lines_at(21, 1, &mut buf)?, 1);
        assert_eq!(buf, b"delta");
        Ok(())
    }

    #[test]
    fn test_short_file_is_plain() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("short.txt");
        std::fs::write(&path, b"a\nb")?;
        assert_eq!(compression_format(&path)?, Format::No);

        let mut source = RecordSource::open(&path)?;
        assert!(!source.is_compressed());
        let mut buf = Vec::new();
        assert_eq!(source.read_lines_at(2, 1, &mut buf)?, 1);
        assert_eq!(buf, b"b");

        let mut lines = Vec::new();
        for_each_line(&path, |_, line| {
            lines.push(line.to_vec());
            Ok(())
        })?;
        assert_eq!(lines, vec![b"a".to_vec(), b"b".to_vec()]);
        Ok(())
    }

    #[test]
    fn test_for_each_line_offsets() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for path in [write_plain(dir.path())?, write_gz(dir.path())?] {
            let mut seen = Vec::new();
            for_each_line(&path, |offset, line| {
                seen.push((offset, line.to_vec()));
                Ok(())
            })?;
            assert_eq!(
                seen,
                vec![
                    (0, b"alpha".to_vec()),
                    (6, b"bravo".to_vec()),
                    (13, b"charlie".to_vec()),
                    (21, b"delta".to_vec()),
                ]
            );
        }
        Ok(())
    }

    #[test]
    fn test_random_access_both_sources() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for path in [write_plain(dir.path())?, write_gz(dir.path())?] {
            let mut source = RecordSource::open(&path)?;

            let mut buf = Vec::new();
            assert_eq!(source.read_lines_at(13, 2, &mut buf)?, 2);
            assert_eq!(buf, b"charlie\ndelta");

            // seeking backwards must work for compressed sources as well
            buf.clear();
            assert_eq!(source.read_lines_at(6, 1, &mut buf)?, 1);
            assert_eq!(buf, b"bravo\r\n");
            assert_eq!(source.restarts(), usize::from(source.is_compressed()));

            buf.clear();
            assert_eq!(source.read_lines_at(0, 10, &mut buf)?, 4);
            assert_eq!(buf, TEXT);
        }
        Ok(())
    }

    #[test]
    fn test_offset_out_of_range() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for path in [write_plain(dir.path())?, write_gz(dir.path())?] {
            let mut source = RecordSource::open(&path)?;
            let mut buf = Vec::new();
            assert!(source.read_lines_at(1_000, 1, &mut buf).is_err());
        }
        Ok(())
    }

    #[test]
    fn test_trim_line() {
        assert_eq!(trim_line(b"abc\r\n"), b"abc");
        assert_eq!(trim_line(b"abc\n"), b"abc");
        assert_eq!(trim_line(b"abc"), b"abc");
    }
}
