//! # fastq
//!
//! Batch-wise random access to FASTQ files.
//!
//! A FASTQ file is scanned once to find the byte offset of every record. The
//! offsets are grouped into a [`BatchOffsetTable`], which is persisted next to
//! the source, and a [`RecordStream`] then reads one row of the table per call
//! by addressing the records directly.
//!
//! ```rust,no_run
//! use readsim::fastq::{BatchLayout, BatchOrder, RecordStream};
//! use readsim::IndexStore;
//!
//! let layout = BatchLayout::new(50, 100, BatchOrder::Shuffled { seed: 1 });
//! let mut stream = RecordStream::open("reads.fq.gz", layout, IndexStore::colocated()).unwrap();
//! while let Ok(batch) = stream.read_batch() {
//!     println!("{} reads", batch.len());
//! }
//! println!("{} bases", stream.total_bases());
//! ```

mod index;
mod record;
mod stream;

pub use index::{
    BatchHeader, BatchLayout, BatchOffsetTable, BatchOrder, OffsetIndex, BATCH_HEADER_SIZE,
    BATCH_INDEX_EXTENSION, BATCH_INDEX_MAGIC,
};
pub use record::{is_nucleotide, Record, LINES_PER_RECORD};
pub use stream::{Batch, RecordStream};

#[cfg(test)]
pub(crate) mod testing {
    use std::fs::File;
    use std::io::Write;
    use std::path::{Path, PathBuf};

    use anyhow::Result;
    use flate2::{write::GzEncoder, Compression};

    /// Deterministic read length for the `i`-th synthetic read
    pub fn read_length(i: usize) -> usize {
        150 + (i * 37) % 400
    }

    fn render(n: usize) -> (Vec<u8>, Vec<usize>) {
        let mut text = Vec::new();
        let mut lengths = Vec::with_capacity(n);
        for i in 0..n {
            let len = read_length(i);
            let seq: String = "ACGT".chars().cycle().skip(i % 4).take(len).collect();
            let qual = "?".repeat(len);
            text.extend_from_slice(format!("@read_{i}\n{seq}\n+\n{qual}\n").as_bytes());
            lengths.push(len);
        }
        (text, lengths)
    }

    /// Writes `n` synthetic reads named `read_0..read_{n-1}` and returns their lengths
    pub fn write_fastq(dir: &Path, name: &str, n: usize) -> Result<(PathBuf, Vec<usize>)> {
        let path = dir.join(name);
        let (text, lengths) = render(n);
        std::fs::write(&path, text)?;
        Ok((path, lengths))
    }

    /// Same as [`write_fastq`] but gzip compressed
    pub fn write_fastq_gz(dir: &Path, name: &str, n: usize) -> Result<(PathBuf, Vec<usize>)> {
        let path = dir.join(name);
        let (text, lengths) = render(n);
        let mut encoder = GzEncoder::new(File::create(&path)?, Compression::default());
        encoder.write_all(&text)?;
        encoder.finish()?;
        Ok((path, lengths))
    }
}
