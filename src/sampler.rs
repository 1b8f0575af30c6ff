//! Batch sampling of reads together with their alignment ground truth

use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{Result, SampleError};
use crate::fastq::{BatchLayout, BatchOrder, RecordStream};
use crate::paf::AlignmentStore;
use crate::store::IndexStore;

/// Default number of reads per sampled batch
pub const DEFAULT_BATCH_SIZE: usize = 50;
/// Default number of batches a sampler delivers
pub const DEFAULT_MAX_BATCHES: usize = 100;

/// One sampled batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sample {
    pub sequences: Vec<String>,
    pub qualities: Vec<String>,
    /// Newline-joined lines of the full alignment file for the sampled reads
    pub full: String,
    /// Newline-joined lines of the truncated alignment file for the sampled reads
    pub truncated: String,
}

/// The pair of alignment stores used as ground truth
struct GroundTruth {
    full: AlignmentStore,
    truncated: AlignmentStore,
}

/// Builder for creating configured [`Sampler`] instances
///
/// # Examples
///
/// ```no_run
/// # use readsim::{BatchOrder, Result, SamplerBuilder};
/// # fn main() -> Result<()> {
/// let mut sampler = SamplerBuilder::default()
///     .batch_size(100)
///     .max_batches(20)
///     .order(BatchOrder::Shuffled { seed: 7 })
///     .alignments("full.paf", "truncated.paf")
///     .build("reads.fq.gz")?;
/// let sample = sampler.sample()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct SamplerBuilder {
    batch_size: Option<usize>,
    max_batches: Option<usize>,
    order: Option<BatchOrder>,
    full: Option<PathBuf>,
    truncated: Option<PathBuf>,
    store: Option<IndexStore>,
}
impl SamplerBuilder {
    /// Sets the number of reads per batch
    ///
    /// Defaults to [`DEFAULT_BATCH_SIZE`]. Every batch holds exactly this
    /// many reads.
    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Sets how many batches the sampler delivers before it is exhausted
    ///
    /// Defaults to [`DEFAULT_MAX_BATCHES`]. The source must hold at least
    /// `batch_size * max_batches` records or [`build`](Self::build) fails.
    #[must_use]
    pub fn max_batches(mut self, max_batches: usize) -> Self {
        self.max_batches = Some(max_batches);
        self
    }

    /// Sets the order in which batches are delivered
    ///
    /// Defaults to [`BatchOrder::FileOrder`]. A shuffled order is seeded,
    /// so two samplers with the same seed deliver the same batches.
    #[must_use]
    pub fn order(mut self, order: BatchOrder) -> Self {
        self.order = Some(order);
        self
    }

    /// Sets both alignment sources used as ground truth
    #[must_use]
    pub fn alignments<P: AsRef<Path>, Q: AsRef<Path>>(self, full: P, truncated: Q) -> Self {
        self.full_alignments(full).truncated_alignments(truncated)
    }

    /// Sets the alignment source of the full-length reads
    ///
    /// Must be paired with [`truncated_alignments`](Self::truncated_alignments).
    #[must_use]
    pub fn full_alignments<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.full = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets the alignment source of the truncated reads
    ///
    /// Reads without a truncated alignment contribute no lines to
    /// [`Sample::truncated`].
    #[must_use]
    pub fn truncated_alignments<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.truncated = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets where sidecar indices are kept (next to the sources by default)
    #[must_use]
    pub fn store(mut self, store: IndexStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Opens the record source and the alignment stores
    ///
    /// Fails with a capacity error if the source holds fewer than
    /// `batch_size * max_batches` records, and with
    /// [`SampleError::UnpairedAlignments`] if only one alignment source was set.
    pub fn build<P: AsRef<Path>>(self, source: P) -> Result<Sampler> {
        let store = self.store.unwrap_or_default();
        let layout = BatchLayout::new(
            self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            self.max_batches.unwrap_or(DEFAULT_MAX_BATCHES),
            self.order.unwrap_or_default(),
        );

        let alignments = match (self.full, self.truncated) {
            (Some(full), Some(truncated)) => Some(GroundTruth {
                full: AlignmentStore::open(full, store.clone())?,
                truncated: AlignmentStore::open(truncated, store.clone())?,
            }),
            (None, None) => None,
            _ => return Err(SampleError::UnpairedAlignments.into()),
        };
        let stream = RecordStream::open(source, layout, store)?;
        debug!(
            "Sampler ready: {} batches of {} reads from {}",
            layout.num_batches,
            layout.batch_size,
            stream.path().display()
        );
        Ok(Sampler { stream, alignments })
    }
}

/// Delivers batches of reads and the alignment lines recorded for them
///
/// Sampling is forward-only. Once every batch was delivered,
/// [`sample`](Self::sample) fails with an error for which
/// [`Error::is_exhausted`](crate::Error::is_exhausted) is true.
pub struct Sampler {
    stream: RecordStream,
    alignments: Option<GroundTruth>,
}
impl Sampler {
    /// Shorthand for a sampler without alignment ground truth
    pub fn new<P: AsRef<Path>>(source: P, batch_size: usize, max_batches: usize) -> Result<Self> {
        SamplerBuilder::default()
            .batch_size(batch_size)
            .max_batches(max_batches)
            .build(source)
    }

    /// Reads the next batch and looks up its alignments
    pub fn sample(&mut self) -> Result<Sample> {
        let batch = self.stream.read_batch()?;
        let mut sample = Sample {
            sequences: batch.sequences.clone(),
            qualities: batch.qualities.clone(),
            ..Sample::default()
        };
        if let Some(truth) = self.alignments.as_mut() {
            sample.full = truth.full.lookup_joined(&batch.ids)?;
            sample.truncated = truth.truncated.lookup_joined(&batch.ids)?;
        }
        Ok(sample)
    }

    /// Returns true if alignment ground truth is configured
    #[must_use]
    pub fn has_alignments(&self) -> bool {
        self.alignments.is_some()
    }

    /// The underlying stream, for ids, lengths and base totals of the last batch
    #[must_use]
    pub fn stream(&self) -> &RecordStream {
        &self.stream
    }

    /// Number of batches that can still be sampled
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.stream.remaining()
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::fastq::testing::write_fastq;
    use crate::paf::testing::{paf_line, write_paf};
    use anyhow::Result;

    #[test]
    fn test_sample_without_alignments() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (path, lengths) = write_fastq(dir.path(), "reads.fq", 20)?;
        let mut sampler = Sampler::new(&path, 4, 5)?;
        assert!(!sampler.has_alignments());

        let sample = sampler.sample()?;
        assert_eq!(sample.sequences.len(), 4);
        assert_eq!(sample.qualities.len(), 4);
        assert!(sample.full.is_empty());
        assert!(sample.truncated.is_empty());
        assert_eq!(sampler.stream().read_lengths(), &lengths[..4]);
        assert_eq!(sampler.remaining(), 4);
        Ok(())
    }

    #[test]
    fn test_sample_with_alignments() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (path, _) = write_fastq(dir.path(), "reads.fq", 10)?;
        let full = write_paf(
            dir.path(),
            "full.paf",
            &[
                paf_line("read_1", "chr1", 60, 4000),
                paf_line("read_0", "chr1", 60, 5000),
                paf_line("read_0", "chr2", 5, 1200),
            ],
        )?;
        let truncated = write_paf(dir.path(), "trunc.paf", &[paf_line("read_1", "chr1", 60, 800)])?;

        let mut sampler = SamplerBuilder::default()
            .batch_size(2)
            .max_batches(3)
            .alignments(&full, &truncated)
            .build(&path)?;
        assert!(sampler.has_alignments());

        let sample = sampler.sample()?;
        assert_eq!(sampler.stream().read_ids(), ["read_0", "read_1"]);
        let lines: Vec<&str> = sample.full.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("read_0\t"));
        assert!(lines[1].starts_with("read_0\t"));
        assert!(lines[2].starts_with("read_1\t"));
        assert_eq!(sample.truncated, paf_line("read_1", "chr1", 60, 800));

        // reads without alignments yield empty strings
        let sample = sampler.sample()?;
        assert!(sample.full.is_empty());
        assert!(sample.truncated.is_empty());
        Ok(())
    }

    #[test]
    fn test_unpaired_alignments_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (path, _) = write_fastq(dir.path(), "reads.fq", 10)?;
        let full = write_paf(dir.path(), "full.paf", &[paf_line("read_0", "chr1", 60, 5000)])?;
        let err = SamplerBuilder::default()
            .batch_size(2)
            .max_batches(2)
            .full_alignments(&full)
            .build(&path)
            .err();
        assert!(matches!(
            err,
            Some(crate::Error::SampleError(SampleError::UnpairedAlignments))
        ));
        Ok(())
    }

    #[test]
    fn test_missing_alignment_source_fails_at_build() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (path, _) = write_fastq(dir.path(), "reads.fq", 10)?;
        let err = SamplerBuilder::default()
            .batch_size(2)
            .max_batches(2)
            .alignments(dir.path().join("missing.paf"), dir.path().join("missing2.paf"))
            .build(&path)
            .err()
            .ok_or_else(|| anyhow::anyhow!("sampler built without alignment sources"))?;
        assert!(err.is_not_found());
        Ok(())
    }

    #[test]
    fn test_sidecars_in_separate_dir() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let index_dir = tempfile::tempdir()?;
        let (path, _) = write_fastq(dir.path(), "reads.fq", 12)?;
        let mut sampler = SamplerBuilder::default()
            .batch_size(3)
            .max_batches(4)
            .store(IndexStore::in_dir(index_dir.path()))
            .build(&path)?;
        sampler.sample()?;
        assert!(index_dir.path().join("reads.fq.offsets").exists());
        assert!(!dir.path().join("reads.fq.offsets").exists());
        Ok(())
    }
}
