//! # readsim
//!
//! Batch-wise sampling of sequencing reads with alignment ground truth.
//!
//! - [`fastq`]: offset tables and batch streaming over (possibly compressed) FASTQ files
//! - [`paf`]: keyed alignment lookup plus filtering and overlap classification of PAF files
//! - [`Sampler`]: pairs each sampled batch with the alignment lines of its reads
//!
//! Indices are persisted as sidecar files managed by an [`IndexStore`], so
//! every source is scanned at most once.

mod error;
pub mod fastq;
pub mod paf;
mod sampler;
mod source;
mod store;

pub use error::{AlignmentError, Error, IndexError, ReadError, Result, SampleError};
pub use fastq::{Batch, BatchLayout, BatchOrder, OffsetIndex, RecordStream};
pub use paf::{AlignmentClassifier, AlignmentIndex, AlignmentStore, FilterConfig, Parsed};
pub use sampler::{Sample, Sampler, SamplerBuilder, DEFAULT_BATCH_SIZE, DEFAULT_MAX_BATCHES};
pub use source::{is_compressed, RecordSource};
pub use store::IndexStore;
