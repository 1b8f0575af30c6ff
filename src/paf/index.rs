//! Query-id lookup tables for PAF files
//!
//! An [`AlignmentLookupTable`] maps each query id to the byte offsets of its
//! alignment lines. It is built by one scan and persisted next to the source
//! as `<source>.lookup`, mirroring the batch offset tables of FASTQ sources.
//!
//! Sidecar layout: a 32-byte little-endian header followed by a
//! zstd-compressed body of entries sorted by query id, each entry being
//! `name_len: u32, name: [u8], n_offsets: u32, offsets: [u64]`.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use log::{debug, info, warn};
use memchr::memchr;
use zstd::{Decoder, Encoder};

use crate::error::{Error, IndexError, Result};
use crate::source::{for_each_line, trim_line, RecordSource};
use crate::store::IndexStore;

/// Extension appended to the source path for alignment lookup tables
pub const LOOKUP_INDEX_EXTENSION: &str = "lookup";
/// Size of `LookupHeader` in bytes
pub const LOOKUP_HEADER_SIZE: usize = 32;
/// Magic number to designate an alignment lookup table (RSLOOKUP)
#[allow(clippy::unreadable_literal)]
pub const LOOKUP_INDEX_MAGIC: u64 = 0x50554b4f4f4c5352;
/// Header Block Reservation
pub const LOOKUP_RESERVATION: [u8; 8] = [42; 8];

/// Header for an alignment lookup sidecar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupHeader {
    /// Magic number to designate the table ("RSLOOKUP" in ASCII)
    magic: u64,
    /// Size of the source file in bytes
    bytes: u64,
    /// Number of distinct query ids
    n_entries: u64,
    /// Reserved bytes for future extensions
    reserved: [u8; 8],
}
impl LookupHeader {
    #[must_use]
    pub fn new(bytes: u64, n_entries: u64) -> Self {
        Self {
            magic: LOOKUP_INDEX_MAGIC,
            bytes,
            n_entries,
            reserved: LOOKUP_RESERVATION,
        }
    }

    pub fn from_reader<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buffer = [0; LOOKUP_HEADER_SIZE];
        reader.read_exact(&mut buffer).map_err(|e| -> Error {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                IndexError::Truncated {
                    expected: LOOKUP_HEADER_SIZE,
                    found: 0,
                }
                .into()
            } else {
                e.into()
            }
        })?;
        let magic = LittleEndian::read_u64(&buffer[0..8]);
        if magic != LOOKUP_INDEX_MAGIC {
            return Err(IndexError::InvalidMagicNumber(magic).into());
        }
        Ok(Self {
            magic,
            bytes: LittleEndian::read_u64(&buffer[8..16]),
            n_entries: LittleEndian::read_u64(&buffer[16..24]),
            reserved: LOOKUP_RESERVATION,
        })
    }

    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut buffer = [0; LOOKUP_HEADER_SIZE];
        LittleEndian::write_u64(&mut buffer[0..8], self.magic);
        LittleEndian::write_u64(&mut buffer[8..16], self.bytes);
        LittleEndian::write_u64(&mut buffer[16..24], self.n_entries);
        buffer[24..].copy_from_slice(&self.reserved);
        writer.write_all(&buffer)?;
        Ok(())
    }
}

/// Mapping from query id to the offsets of its alignment lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentLookupTable {
    bytes: u64,
    entries: HashMap<String, Vec<u64>>,
}
impl AlignmentLookupTable {
    /// Scans a PAF file once, recording the offset of every line by query id
    ///
    /// Empty lines are skipped. Lines are not otherwise validated here.
    pub fn scan<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = IndexStore::source_size(path)?;
        let mut entries: HashMap<String, Vec<u64>> = HashMap::new();
        for_each_line(path, |offset, line| {
            if line.is_empty() {
                return Ok(());
            }
            let name = match memchr(b'\t', line) {
                Some(idx) => &line[..idx],
                None => line,
            };
            let name = std::str::from_utf8(name)?;
            match entries.get_mut(name) {
                Some(offsets) => offsets.push(offset),
                None => {
                    entries.insert(name.to_string(), vec![offset]);
                }
            }
            Ok(())
        })?;
        Ok(Self { bytes, entries })
    }

    /// Number of distinct query ids
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Offsets of the alignment lines of `query`, empty if the id is unknown
    #[must_use]
    pub fn offsets(&self, query: &str) -> &[u64] {
        self.entries.get(query).map(Vec::as_slice).unwrap_or_default()
    }

    /// Returns true if `query` has at least one alignment line
    #[must_use]
    pub fn contains(&self, query: &str) -> bool {
        self.entries.contains_key(query)
    }

    /// Serializes the table: header followed by the compressed entries
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        LookupHeader::new(self.bytes, self.entries.len() as u64).write_bytes(writer)?;
        let mut encoder = Encoder::new(writer, 3)?;
        let mut names: Vec<&String> = self.entries.keys().collect();
        names.sort_unstable();
        for name in names {
            let offsets = &self.entries[name];
            encoder.write_u32::<LittleEndian>(name.len() as u32)?;
            encoder.write_all(name.as_bytes())?;
            encoder.write_u32::<LittleEndian>(offsets.len() as u32)?;
            for &offset in offsets {
                encoder.write_u64::<LittleEndian>(offset)?;
            }
        }
        encoder.finish()?;
        Ok(())
    }

    /// Reads a persisted table and checks it against the current source size
    ///
    /// Counts in the sidecar are never trusted for allocation: every entry is
    /// checked against the bytes left in the decoded body, and any mismatch
    /// is reported as a stale index.
    pub fn from_path<P: AsRef<Path>>(path: P, bytes: u64) -> Result<Self> {
        let mut handle = File::open(path).map(BufReader::new)?;
        let header = LookupHeader::from_reader(&mut handle)?;
        if header.bytes != bytes {
            return Err(IndexError::ByteSizeMismatch(bytes, header.bytes).into());
        }

        let body = {
            let mut body = Vec::new();
            Decoder::new(handle)
                .and_then(|mut decoder| decoder.read_to_end(&mut body))
                .map_err(|e| IndexError::Corrupt(e.to_string()))?;
            body
        };

        let mut cursor = body.as_slice();
        let mut entries = HashMap::new();
        for _ in 0..header.n_entries {
            let name_len = LittleEndian::read_u32(take(&mut cursor, 4)?) as usize;
            let name = std::str::from_utf8(take(&mut cursor, name_len)?)
                .map_err(|e| IndexError::Corrupt(e.to_string()))?;
            let n_offsets = LittleEndian::read_u32(take(&mut cursor, 4)?) as usize;
            let offsets = take(&mut cursor, n_offsets.saturating_mul(8))?
                .chunks_exact(8)
                .map(LittleEndian::read_u64)
                .collect();
            if entries.insert(name.to_string(), offsets).is_some() {
                return Err(IndexError::Corrupt(format!("duplicate entry {name}")).into());
            }
        }
        if !cursor.is_empty() {
            return Err(IndexError::Corrupt(format!(
                "{} trailing bytes after {} entries",
                cursor.len(),
                header.n_entries
            ))
            .into());
        }
        Ok(Self { bytes, entries })
    }
}

/// Splits `n` bytes off the front of `cursor`
fn take<'a>(cursor: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if n > cursor.len() {
        return Err(IndexError::Truncated {
            expected: n,
            found: cursor.len(),
        }
        .into());
    }
    let (head, tail) = cursor.split_at(n);
    *cursor = tail;
    Ok(head)
}

/// Builds alignment lookup tables, reusing persisted tables when they are still valid
#[derive(Debug, Clone, Default)]
pub struct AlignmentIndex {
    store: IndexStore,
}
impl AlignmentIndex {
    #[must_use]
    pub fn new(store: IndexStore) -> Self {
        Self { store }
    }

    /// Loads the persisted table of `path`, or scans the source and persists a new one
    ///
    /// # Returns
    ///
    /// The lookup table of `path`. A sidecar that is stale (source size
    /// changed, truncated or corrupt body) is rebuilt with a warning.
    pub fn build_or_load<P: AsRef<Path>>(&self, path: P) -> Result<AlignmentLookupTable> {
        let path = path.as_ref();
        let bytes = IndexStore::source_size(path)?;
        let index_path = self.store.sidecar(path, LOOKUP_INDEX_EXTENSION)?;

        match AlignmentLookupTable::from_path(&index_path, bytes) {
            Ok(table) => {
                debug!(
                    "Loaded alignment lookup for {} from {}",
                    path.display(),
                    index_path.display()
                );
                return Ok(table);
            }
            Err(Error::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(Error::IndexError(e)) if e.is_stale() => {
                warn!("Rebuilding alignment lookup for {}: {e}", path.display());
            }
            Err(e) => return Err(e),
        }

        let table = AlignmentLookupTable::scan(path)?;
        self.store
            .persist(&index_path, |writer| table.write_to(writer))?;
        info!(
            "Indexed alignments of {} queries in {}",
            table.len(),
            path.display()
        );
        Ok(table)
    }

    /// Deletes the persisted table of `path` so the next build rescans the source
    pub fn invalidate<P: AsRef<Path>>(&self, path: P) -> Result<bool> {
        self.store.invalidate(path, LOOKUP_INDEX_EXTENSION)
    }
}

/// Constant-time retrieval of the alignment lines of a query
pub struct AlignmentStore {
    source: RecordSource,
    table: AlignmentLookupTable,
    lbuf: Vec<u8>,
}
impl AlignmentStore {
    /// Opens `path`, building or loading its lookup table
    pub fn open<P: AsRef<Path>>(path: P, store: IndexStore) -> Result<Self> {
        let table = AlignmentIndex::new(store).build_or_load(path.as_ref())?;
        let source = RecordSource::open(path)?;
        Ok(Self {
            source,
            table,
            lbuf: Vec::new(),
        })
    }

    /// The lookup table backing this store
    #[must_use]
    pub fn table(&self) -> &AlignmentLookupTable {
        &self.table
    }

    /// Returns the source the alignment lines are read from
    #[must_use]
    pub fn source(&self) -> &RecordSource {
        &self.source
    }

    /// Reads the line starting at `offset`, without its terminator
    fn read_line(&mut self, offset: u64) -> Result<String> {
        self.lbuf.clear();
        self.source.read_lines_at(offset, 1, &mut self.lbuf)?;
        Ok(std::str::from_utf8(trim_line(&self.lbuf))?.to_string())
    }

    /// Reads the lines at `offsets` in ascending offset order and returns them in input order
    ///
    /// Compressed sources can then be decoded in a single forward pass.
    fn read_lines(&mut self, offsets: &[u64]) -> Result<Vec<String>> {
        let mut order: Vec<usize> = (0..offsets.len()).collect();
        order.sort_by_key(|&i| offsets[i]);

        let mut lines = vec![String::new(); offsets.len()];
        for i in order {
            lines[i] = self.read_line(offsets[i])?;
        }
        Ok(lines)
    }

    /// Returns the alignment lines of `query` without terminators
    ///
    /// An unknown id yields an empty vector.
    pub fn lookup(&mut self, query: &str) -> Result<Vec<String>> {
        let offsets = self.table.offsets(query).to_vec();
        self.read_lines(&offsets)
    }

    /// Looks up every id in order and joins all found lines with newlines
    ///
    /// Ids without alignments contribute nothing; the result is empty if none match.
    /// Lines are fetched in file order whatever the order of `queries`.
    pub fn lookup_joined<S: AsRef<str>>(&mut self, queries: &[S]) -> Result<String> {
        let offsets: Vec<u64> = queries
            .iter()
            .flat_map(|query| self.table.offsets(query.as_ref()))
            .copied()
            .collect();
        Ok(self.read_lines(&offsets)?.join("\n"))
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::paf::testing::{paf_line, write_paf, write_paf_gz};
    use anyhow::Result;

    #[test]
    fn test_scan_groups_by_query() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let lines = vec![
            paf_line("r1", "chr1", 60, 5000),
            paf_line("r2", "chr1", 60, 4000),
            paf_line("r1", "chr2", 10, 3000),
        ];
        let path = write_paf(dir.path(), "aln.paf", &lines)?;
        let table = AlignmentLookupTable::scan(&path)?;
        assert_eq!(table.len(), 2);
        assert_eq!(table.offsets("r1").len(), 2);
        assert_eq!(table.offsets("r1")[0], 0);
        assert_eq!(
            table.offsets("r1")[1],
            (lines[0].len() + lines[1].len() + 2) as u64
        );
        assert!(table.offsets("missing").is_empty());
        assert!(!table.contains("missing"));
        Ok(())
    }

    #[test]
    fn test_build_or_load_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let lines: Vec<String> = (0..50)
            .map(|i| paf_line(&format!("read_{}", i % 20), "chr1", 60, 2000 + i))
            .collect();
        let path = write_paf(dir.path(), "aln.paf", &lines)?;
        let index = AlignmentIndex::default();

        let built = index.build_or_load(&path)?;
        let sidecar = dir.path().join("aln.paf.lookup");
        assert!(sidecar.exists());
        let loaded = AlignmentLookupTable::from_path(&sidecar, IndexStore::source_size(&path)?)?;
        assert_eq!(built, loaded);
        assert_eq!(loaded.len(), 20);

        assert!(index.invalidate(&path)?);
        assert!(!sidecar.exists());
        Ok(())
    }

    #[test]
    fn test_stale_lookup_is_rebuilt() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_paf(dir.path(), "aln.paf", &[paf_line("r1", "chr1", 60, 5000)])?;
        let index = AlignmentIndex::default();
        assert_eq!(index.build_or_load(&path)?.len(), 1);

        let path = write_paf(
            dir.path(),
            "aln.paf",
            &[paf_line("r1", "chr1", 60, 5000), paf_line("r2", "chr1", 60, 5000)],
        )?;
        assert_eq!(index.build_or_load(&path)?.len(), 2);
        Ok(())
    }

    #[test]
    fn test_store_lookup() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let lines = vec![
            paf_line("r1", "chr1", 60, 5000),
            paf_line("r2", "chr1", 60, 4000),
            paf_line("r1", "chr2", 10, 3000),
        ];
        let path = write_paf(dir.path(), "aln.paf", &lines)?;
        let mut store = AlignmentStore::open(&path, IndexStore::colocated())?;

        assert_eq!(store.lookup("r1")?, vec![lines[0].clone(), lines[2].clone()]);
        assert_eq!(store.lookup("r2")?, vec![lines[1].clone()]);
        assert!(store.lookup("unknown")?.is_empty());

        let joined = store.lookup_joined(&["r2", "unknown", "r1"])?;
        assert_eq!(joined, format!("{}\n{}\n{}", lines[1], lines[0], lines[2]));
        assert!(store.lookup_joined(&["unknown"])?.is_empty());
        Ok(())
    }

    #[test]
    fn test_store_lookup_compressed() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let lines: Vec<String> = (0..200)
            .map(|i| paf_line(&format!("read_{i}"), "chr1", 60, 1000 + i))
            .collect();
        let path = write_paf_gz(dir.path(), "aln.paf.gz", &lines)?;
        let mut store = AlignmentStore::open(&path, IndexStore::colocated())?;
        assert!(store.source().is_compressed());
        assert_eq!(store.table().len(), 200);

        let joined = store.lookup_joined(&["read_150", "read_3", "read_199", "read_0"])?;
        let expected = [
            lines[150].as_str(),
            lines[3].as_str(),
            lines[199].as_str(),
            lines[0].as_str(),
        ];
        assert_eq!(joined.lines().collect::<Vec<_>>(), expected);

        // the batch is read in one forward pass over the decoded stream
        assert_eq!(store.source().restarts(), 0);
        Ok(())
    }

    #[test]
    fn test_truncated_lookup_rebuilds() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let lines: Vec<String> = (0..50)
            .map(|i| paf_line(&format!("read_{}", i % 20), "chr1", 60, 2000 + i))
            .collect();
        let path = write_paf(dir.path(), "aln.paf", &lines)?;
        let index = AlignmentIndex::default();
        let built = index.build_or_load(&path)?;

        let sidecar = dir.path().join("aln.paf.lookup");
        let bytes = std::fs::read(&sidecar)?;
        std::fs::write(&sidecar, &bytes[..bytes.len() - 6])?;
        let err = AlignmentLookupTable::from_path(&sidecar, IndexStore::source_size(&path)?)
            .unwrap_err();
        assert!(matches!(err, Error::IndexError(ref e) if e.is_stale()));

        assert_eq!(index.build_or_load(&path)?, built);
        assert_eq!(std::fs::read(&sidecar)?, bytes);
        Ok(())
    }

    #[test]
    fn test_inconsistent_entry_count_rebuilds() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let lines = vec![
            paf_line("r1", "chr1", 60, 5000),
            paf_line("r2", "chr1", 60, 4000),
        ];
        let path = write_paf(dir.path(), "aln.paf", &lines)?;
        let index = AlignmentIndex::default();
        index.build_or_load(&path)?;

        let sidecar = dir.path().join("aln.paf.lookup");
        let size = IndexStore::source_size(&path)?;
        for n_entries in [u64::MAX, 3, 1] {
            let mut bytes = std::fs::read(&sidecar)?;
            LittleEndian::write_u64(&mut bytes[16..24], n_entries);
            std::fs::write(&sidecar, &bytes)?;

            let err = AlignmentLookupTable::from_path(&sidecar, size).unwrap_err();
            assert!(matches!(err, Error::IndexError(ref e) if e.is_stale()));
            assert_eq!(index.build_or_load(&path)?.len(), 2);
        }
        Ok(())
    }

    #[test]
    fn test_missing_alignment_file() {
        let err = AlignmentStore::open("/nonexistent/aln.paf", IndexStore::colocated())
            .err()
            .map(|e| e.is_not_found());
        assert_eq!(err, Some(true));
    }
}
