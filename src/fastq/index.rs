//! Batch offset tables for FASTQ sources
//!
//! A [`BatchOffsetTable`] partitions the byte offsets of a file's records into
//! fixed-size batches. Row 0 is reserved; rows `1..=num_batches` each hold one
//! batch of record-start offsets. Tables are built by a single scan of the
//! source and persisted as a sidecar (`<source>.offsets`) so later runs skip
//! the scan.
//!
//! Sidecar layout: a 48-byte little-endian header followed by a
//! zstd-compressed body of `(num_batches + 1) * batch_size` u64 offsets.

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info, warn};
use rand::{rngs::SmallRng, seq::SliceRandom, SeedableRng};
use zstd::{Decoder, Encoder};

use super::record::LINES_PER_RECORD;
use crate::error::{Error, IndexError, ReadError, Result, SampleError};
use crate::source::for_each_line;
use crate::store::IndexStore;

/// Extension appended to the source path for batch offset tables
pub const BATCH_INDEX_EXTENSION: &str = "offsets";
/// Size of `BatchHeader` in bytes
pub const BATCH_HEADER_SIZE: usize = 48;
/// Magic number to designate a batch offset table (RSBATCHT)
#[allow(clippy::unreadable_literal)]
pub const BATCH_INDEX_MAGIC: u64 = 0x5448435441425352;
/// Header Block Reservation
pub const BATCH_RESERVATION: [u8; 7] = [42; 7];

/// Order in which records are assigned to batches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchOrder {
    /// Batches follow the order of records in the file
    #[default]
    FileOrder,
    /// Records are permuted with a seeded RNG before being grouped
    Shuffled { seed: u64 },
}
impl BatchOrder {
    fn flag(self) -> u8 {
        match self {
            Self::FileOrder => 0,
            Self::Shuffled { .. } => 1,
        }
    }

    fn seed(self) -> u64 {
        match self {
            Self::FileOrder => 0,
            Self::Shuffled { seed } => seed,
        }
    }

    fn from_parts(flag: u8, seed: u64) -> Self {
        if flag == 0 {
            Self::FileOrder
        } else {
            Self::Shuffled { seed }
        }
    }
}

/// Requested shape and ordering of a batch offset table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLayout {
    /// Number of records per batch
    pub batch_size: usize,
    /// Number of batches that can be read
    pub num_batches: usize,
    /// How records are assigned to batches
    pub order: BatchOrder,
}
impl BatchLayout {
    /// Layout of `num_batches` batches of `batch_size` reads each
    #[must_use]
    pub fn new(batch_size: usize, num_batches: usize, order: BatchOrder) -> Self {
        Self {
            batch_size,
            num_batches,
            order,
        }
    }

    /// Total number of records the layout draws from the source
    #[must_use]
    pub fn requested(&self) -> usize {
        self.batch_size.saturating_mul(self.num_batches)
    }

    /// Returns the table shape `(num_batches + 1, batch_size)`
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        (self.num_batches + 1, self.batch_size)
    }

    /// Rejects empty layouts and layouts that need more records than `available`
    pub fn check_capacity(&self, available: usize) -> Result<()> {
        if self.batch_size == 0 || self.num_batches == 0 {
            return Err(SampleError::EmptyLayout {
                batch_size: self.batch_size,
                num_batches: self.num_batches,
            }
            .into());
        }
        if self.requested() > available {
            return Err(SampleError::Capacity {
                requested: self.requested(),
                available,
            }
            .into());
        }
        Ok(())
    }
}

/// Header for a batch offset table sidecar
///
/// The header records the size of the source so a table built for an older
/// version of the file is detected, and the full layout so a table built for
/// a different request is not reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchHeader {
    /// Magic number to designate the table ("RSBATCHT" in ASCII)
    magic: u64,
    /// Size of the source file in bytes
    bytes: u64,
    /// Number of records found in the source
    n_records: u64,
    /// Layout of the table
    layout: BatchLayout,
}
impl BatchHeader {
    #[must_use]
    pub fn new(bytes: u64, n_records: u64, layout: BatchLayout) -> Self {
        Self {
            magic: BATCH_INDEX_MAGIC,
            bytes,
            n_records,
            layout,
        }
    }

    /// Reads a header, validating the magic number
    ///
    /// # Format
    /// - Bytes 0-7: magic number
    /// - Bytes 8-15: source size in bytes
    /// - Bytes 16-23: number of records in the source
    /// - Bytes 24-27: batch size (u32)
    /// - Bytes 28-31: number of batches (u32)
    /// - Byte 32: ordering flag (0 = file order, 1 = shuffled)
    /// - Bytes 33-39: reserved
    /// - Bytes 40-47: shuffle seed
    pub fn from_reader<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buffer = [0; BATCH_HEADER_SIZE];
        reader.read_exact(&mut buffer).map_err(|e| -> Error {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                IndexError::Truncated {
                    expected: BATCH_HEADER_SIZE,
                    found: 0,
                }
                .into()
            } else {
                e.into()
            }
        })?;
        let magic = LittleEndian::read_u64(&buffer[0..8]);
        if magic != BATCH_INDEX_MAGIC {
            return Err(IndexError::InvalidMagicNumber(magic).into());
        }
        let layout = BatchLayout {
            batch_size: LittleEndian::read_u32(&buffer[24..28]) as usize,
            num_batches: LittleEndian::read_u32(&buffer[28..32]) as usize,
            order: BatchOrder::from_parts(buffer[32], LittleEndian::read_u64(&buffer[40..48])),
        };
        Ok(Self {
            magic,
            bytes: LittleEndian::read_u64(&buffer[8..16]),
            n_records: LittleEndian::read_u64(&buffer[16..24]),
            layout,
        })
    }

    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut buffer = [0; BATCH_HEADER_SIZE];
        LittleEndian::write_u64(&mut buffer[0..8], self.magic);
        LittleEndian::write_u64(&mut buffer[8..16], self.bytes);
        LittleEndian::write_u64(&mut buffer[16..24], self.n_records);
        LittleEndian::write_u32(&mut buffer[24..28], self.layout.batch_size as u32);
        LittleEndian::write_u32(&mut buffer[28..32], self.layout.num_batches as u32);
        buffer[32] = self.layout.order.flag();
        buffer[33..40].copy_from_slice(&BATCH_RESERVATION);
        LittleEndian::write_u64(&mut buffer[40..48], self.layout.order.seed());
        writer.write_all(&buffer)?;
        Ok(())
    }
}

/// Immutable table of record-start offsets grouped into batches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOffsetTable {
    header: BatchHeader,
    /// Row-major offsets, including the reserved row 0
    offsets: Vec<u64>,
}
impl BatchOffsetTable {
    /// Groups record offsets into batches according to `layout`
    ///
    /// `record_offsets` must hold the start offset of every record in the
    /// source, in file order. With [`BatchOrder::Shuffled`] the whole set is
    /// permuted before the first `num_batches * batch_size` offsets are taken,
    /// so a shuffled table samples a random subset of the file.
    pub fn from_offsets(
        mut record_offsets: Vec<u64>,
        layout: BatchLayout,
        bytes: u64,
    ) -> Result<Self> {
        let n_records = record_offsets.len();
        layout.check_capacity(n_records)?;

        if let BatchOrder::Shuffled { seed } = layout.order {
            let mut rng = SmallRng::seed_from_u64(seed);
            record_offsets.shuffle(&mut rng);
        }
        record_offsets.truncate(layout.requested());

        let mut offsets = vec![0; layout.batch_size];
        offsets.extend_from_slice(&record_offsets);

        Ok(Self {
            header: BatchHeader::new(bytes, n_records as u64, layout),
            offsets,
        })
    }

    /// Returns the table shape `(num_batches + 1, batch_size)`
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        self.header.layout.shape()
    }

    #[must_use]
    pub fn layout(&self) -> BatchLayout {
        self.header.layout
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.header.layout.batch_size
    }

    #[must_use]
    pub fn num_batches(&self) -> usize {
        self.header.layout.num_batches
    }

    /// Number of records found in the source when the table was built
    #[must_use]
    pub fn n_records(&self) -> usize {
        self.header.n_records as usize
    }

    /// Returns the offsets of one row, or `None` if the row is out of range
    #[must_use]
    pub fn row(&self, row: usize) -> Option<&[u64]> {
        let width = self.batch_size();
        let lbound = row.checked_mul(width)?;
        self.offsets.get(lbound..lbound + width)
    }

    /// Returns a single offset
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> Option<u64> {
        if col >= self.batch_size() {
            return None;
        }
        self.row(row).map(|r| r[col])
    }

    /// Iterates over the batch rows, skipping the reserved row 0
    pub fn batches(&self) -> impl Iterator<Item = &[u64]> {
        self.offsets.chunks_exact(self.batch_size()).skip(1)
    }

    /// Serializes the table: header followed by the compressed offsets
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.header.write_bytes(writer)?;
        let mut encoder = Encoder::new(writer, 3)?;
        let mut buf = [0u8; 8];
        for &offset in &self.offsets {
            LittleEndian::write_u64(&mut buf, offset);
            encoder.write_all(&buf)?;
        }
        encoder.finish()?;
        Ok(())
    }

    /// Reads a persisted table and checks it against the current source and layout
    pub fn from_path<P: AsRef<Path>>(path: P, bytes: u64, layout: BatchLayout) -> Result<Self> {
        let mut handle = File::open(path).map(BufReader::new)?;
        let header = BatchHeader::from_reader(&mut handle)?;
        if header.bytes != bytes {
            return Err(IndexError::ByteSizeMismatch(bytes, header.bytes).into());
        }
        if header.layout != layout {
            return Err(IndexError::LayoutMismatch.into());
        }

        let buffer = {
            let mut buffer = Vec::new();
            Decoder::new(handle)
                .and_then(|mut decoder| decoder.read_to_end(&mut buffer))
                .map_err(|e| IndexError::Corrupt(e.to_string()))?;
            buffer
        };
        let (rows, cols) = layout.shape();
        let expected = rows * cols * 8;
        if buffer.len() != expected {
            return Err(IndexError::Truncated {
                expected,
                found: buffer.len(),
            }
            .into());
        }
        let offsets = buffer.chunks_exact(8).map(LittleEndian::read_u64).collect();

        Ok(Self { header, offsets })
    }
}

/// Builds batch offset tables, reusing persisted tables when they are still valid
#[derive(Debug, Clone, Default)]
pub struct OffsetIndex {
    store: IndexStore,
}
impl OffsetIndex {
    #[must_use]
    pub fn new(store: IndexStore) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// Scans a FASTQ source once and returns the start offset of every record
    ///
    /// Offsets refer to the decompressed stream for compressed sources.
    /// Blank lines at record boundaries are ignored.
    pub fn scan<P: AsRef<Path>>(path: P) -> Result<Vec<u64>> {
        let mut offsets = Vec::new();
        let mut line_in_record = 0;
        let mut record_start = 0;
        for_each_line(path, |offset, line| {
            if line_in_record == 0 {
                if line.is_empty() {
                    return Ok(());
                }
                if !line.starts_with(b"@") {
                    return Err(ReadError::MalformedRecord {
                        offset,
                        reason: "header does not start with '@'",
                    }
                    .into());
                }
                record_start = offset;
            }
            line_in_record += 1;
            if line_in_record == LINES_PER_RECORD {
                offsets.push(record_start);
                line_in_record = 0;
            }
            Ok(())
        })?;
        if line_in_record != 0 {
            return Err(ReadError::MalformedRecord {
                offset: record_start,
                reason: "truncated record at end of file",
            }
            .into());
        }
        Ok(offsets)
    }

    /// Loads the persisted table for `path` if it matches `layout`, else scans and persists
    ///
    /// Fails with a capacity error if the source holds fewer than
    /// `layout.requested()` records.
    pub fn build_or_load<P: AsRef<Path>>(
        &self,
        path: P,
        layout: BatchLayout,
    ) -> Result<BatchOffsetTable> {
        let path = path.as_ref();
        let bytes = IndexStore::source_size(path)?;
        let index_path = self.store.sidecar(path, BATCH_INDEX_EXTENSION)?;

        match BatchOffsetTable::from_path(&index_path, bytes, layout) {
            Ok(table) => {
                debug!(
                    "Loaded batch offsets for {} from {}",
                    path.display(),
                    index_path.display()
                );
                return Ok(table);
            }
            Err(Error::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(Error::IndexError(e)) if e.is_stale() => {
                warn!("Rebuilding batch offsets for {}: {e}", path.display());
            }
            Err(e) => return Err(e),
        }

        let offsets = Self::scan(path)?;
        let table = BatchOffsetTable::from_offsets(offsets, layout, bytes)?;
        self.store
            .persist(&index_path, |writer| table.write_to(writer))?;
        info!(
            "Indexed {} records of {} into {} batches of {}",
            table.n_records(),
            path.display(),
            layout.num_batches,
            layout.batch_size
        );
        Ok(table)
    }

    /// Deletes the persisted table of `path` so the next build rescans the source
    pub fn invalidate<P: AsRef<Path>>(&self, path: P) -> Result<bool> {
        self.store.invalidate(path, BATCH_INDEX_EXTENSION)
    }
}
