use std::path::{Path, PathBuf};

use log::debug;

use super::index::{BatchLayout, BatchOffsetTable, BatchOrder, OffsetIndex};
use super::record::{Record, LINES_PER_RECORD};
use crate::error::{ReadError, Result};
use crate::source::RecordSource;
use crate::store::IndexStore;

/// The records of one batch, in table order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    pub ids: Vec<String>,
    pub sequences: Vec<String>,
    pub qualities: Vec<String>,
    pub lengths: Vec<usize>,
}
impl Batch {
    fn clear(&mut self) {
        self.ids.clear();
        self.sequences.clear();
        self.qualities.clear();
        self.lengths.clear();
    }

    fn push(&mut self, record: Record) {
        self.lengths.push(record.len());
        let (id, seq, qual) = record.into_parts();
        self.ids.push(id);
        self.sequences.push(seq);
        self.qualities.push(qual);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Sum of the sequence lengths in this batch
    #[must_use]
    pub fn bases(&self) -> u64 {
        self.lengths.iter().map(|&l| l as u64).sum()
    }
}

/// Forward-only batch reader over a FASTQ source
///
/// Each call to [`read_batch`](Self::read_batch) reads the records addressed by
/// the current row of the batch offset table and advances the cursor. Reads
/// go straight to the record offsets: memory mapped for plain files, decoded
/// and skipped forward for compressed files.
pub struct RecordStream {
    source: RecordSource,
    index: OffsetIndex,
    table: BatchOffsetTable,
    /// Next row to read; row 0 is reserved
    cursor: usize,
    /// Bases delivered over the lifetime of the stream
    total_bases: u64,
    /// The last batch that was read
    batch: Batch,
    /// Scratch buffer for raw record bytes
    rbuf: Vec<u8>,
}
impl RecordStream {
    /// Opens a stream over `path`, building or loading its batch offset table
    ///
    /// Fails with a capacity error before any batch is read if the source
    /// holds fewer than `layout.requested()` records.
    pub fn open<P: AsRef<Path>>(path: P, layout: BatchLayout, store: IndexStore) -> Result<Self> {
        let index = OffsetIndex::new(store);
        let table = index.build_or_load(path.as_ref(), layout)?;
        let source = RecordSource::open(path)?;
        Ok(Self {
            source,
            index,
            table,
            cursor: 1,
            total_bases: 0,
            batch: Batch::default(),
            rbuf: Vec::new(),
        })
    }

    /// Reads the next batch and advances the cursor
    ///
    /// Returns [`ReadError::Exhausted`] once all batches of the table were
    /// delivered. The cursor and base count only move on success.
    pub fn read_batch(&mut self) -> Result<&Batch> {
        let Some(row) = self
            .table
            .row(self.cursor)
            .filter(|_| self.cursor <= self.table.num_batches())
        else {
            return Err(ReadError::Exhausted {
                delivered: self.table.num_batches(),
            }
            .into());
        };

        // visit offsets in ascending order so compressed sources only seek forward
        let mut order: Vec<usize> = (0..row.len()).collect();
        order.sort_by_key(|&i| row[i]);

        let mut slots: Vec<Option<Record>> = vec![None; row.len()];
        for i in order {
            let offset = row[i];
            self.rbuf.clear();
            let lines = self
                .source
                .read_lines_at(offset, LINES_PER_RECORD, &mut self.rbuf)?;
            if lines < LINES_PER_RECORD {
                return Err(ReadError::MalformedRecord {
                    offset,
                    reason: "record is cut short by the end of the source",
                }
                .into());
            }
            slots[i] = Some(Record::parse(offset, &self.rbuf)?);
        }

        self.batch.clear();
        for record in slots.into_iter().flatten() {
            self.batch.push(record);
        }
        self.total_bases += self.batch.bases();
        self.cursor += 1;
        debug!(
            "Read batch {} of {} from {}",
            self.cursor - 1,
            self.table.num_batches(),
            self.source.path().display()
        );
        Ok(&self.batch)
    }

    /// Rebuilds the offset table with a new ordering and rewinds the cursor
    ///
    /// The shape of the table is kept. The base count is not reset.
    pub fn reload_offsets(&mut self, order: BatchOrder) -> Result<()> {
        let layout = BatchLayout {
            order,
            ..self.table.layout()
        };
        let path: PathBuf = self.source.path().to_path_buf();
        self.table = self.index.build_or_load(&path, layout)?;
        self.cursor = 1;
        Ok(())
    }

    /// The batch offset table driving this stream
    #[must_use]
    pub fn offsets(&self) -> &BatchOffsetTable {
        &self.table
    }

    /// The row that the next call to `read_batch` will read
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of batches that can still be read
    #[must_use]
    pub fn remaining(&self) -> usize {
        (self.table.num_batches() + 1).saturating_sub(self.cursor)
    }

    /// Total bases over every batch read so far
    #[must_use]
    pub fn total_bases(&self) -> u64 {
        self.total_bases
    }

    /// The batch filled by the last call to `read_batch`
    ///
    /// Empty until the first batch is read.
    #[must_use]
    pub fn batch(&self) -> &Batch {
        &self.batch
    }

    /// Read ids of the last batch, in offset table order
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use readsim::{BatchLayout, BatchOrder, IndexStore, RecordStream, Result};
    /// # fn main() -> Result<()> {
    /// let layout = BatchLayout::new(4, 10, BatchOrder::FileOrder);
    /// let mut stream = RecordStream::open("reads.fq", layout, IndexStore::colocated())?;
    /// stream.read_batch()?;
    /// for (id, len) in stream.read_ids().iter().zip(stream.read_lengths()) {
    ///     println!("{id}\t{len}");
    /// }
    /// # Ok(())
    /// # }
    /// ```
    #[must_use]
    pub fn read_ids(&self) -> &[String] {
        &self.batch.ids
    }

    /// Sequences of the last batch, aligned with [`read_ids`](Self::read_ids)
    #[must_use]
    pub fn read_sequences(&self) -> &[String] {
        &self.batch.sequences
    }

    /// Quality strings of the last batch, aligned with [`read_ids`](Self::read_ids)
    #[must_use]
    pub fn read_qualities(&self) -> &[String] {
        &self.batch.qualities
    }

    /// Sequence lengths of the last batch
    ///
    /// # Returns
    ///
    /// One length per read, summing to the bases the last batch added to
    /// [`total_bases`](Self::total_bases).
    #[must_use]
    pub fn read_lengths(&self) -> &[usize] {
        &self.batch.lengths
    }

    /// Path of the FASTQ source
    #[must_use]
    pub fn path(&self) -> &Path {
        self.source.path()
    }
}
