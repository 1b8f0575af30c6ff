/// Custom Result type for readsim operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the readsim library, encompassing all possible error cases
/// that can occur while indexing, streaming, and sampling reads.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub enum Error {
    /// Errors related to building or loading persisted indices
    IndexError(#[from] IndexError),
    /// Errors that occur while reading records from a stream
    ReadError(#[from] ReadError),
    /// Errors that occur while parsing alignment records
    AlignmentError(#[from] AlignmentError),
    /// Errors raised when configuring a sampler or batch table
    SampleError(#[from] SampleError),
    /// Standard I/O errors from the Rust standard library
    IoError(#[from] std::io::Error),
    /// UTF-8 encoding/decoding errors
    Utf8Error(#[from] std::str::Utf8Error),
    /// Errors from opening a (possibly compressed) source with niffler
    NifflerError(#[from] niffler::Error),
}
impl Error {
    /// Returns true if this error signals that a stream delivered all of its batches.
    ///
    /// This is the normal end-of-simulation signal.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::ReadError(ReadError::Exhausted { .. }))
    }

    /// Returns true if this error signals that more records were requested than exist.
    #[must_use]
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::SampleError(SampleError::Capacity { .. }))
    }

    /// Returns true if this error was caused by a missing file.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::IoError(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Errors specific to persisted index files
#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    /// The magic number in the index header does not match the expected value
    ///
    /// # Arguments
    /// * `u64` - The invalid magic number that was found
    #[error("Invalid magic number: {0:#x}")]
    InvalidMagicNumber(u64),

    /// The index body ended before all declared entries were read
    #[error("Index body is truncated: expected {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },

    /// The source file size does not match the size recorded in the index
    ///
    /// # Arguments
    /// * First `u64` - The current size of the source file
    /// * Second `u64` - The size recorded in the index header
    #[error("Source size ({0}) does not match the size recorded in the index ({1})")]
    ByteSizeMismatch(u64, u64),

    /// The index body could not be decoded or is inconsistent with its header
    #[error("Index body is corrupt: {0}")]
    Corrupt(String),

    /// The index describes a different table shape or ordering than was requested
    #[error("Persisted table does not match the requested layout")]
    LayoutMismatch,

    /// The source path cannot be turned into a sidecar path
    #[error("Cannot derive an index path from source: {0}")]
    InvalidSourcePath(String),
}
impl IndexError {
    /// Returns true if the index is simply out of date and may be rebuilt
    #[must_use]
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            Self::InvalidMagicNumber(_)
                | Self::Truncated { .. }
                | Self::Corrupt(_)
                | Self::ByteSizeMismatch(..)
                | Self::LayoutMismatch
        )
    }
}

/// Errors that can occur while reading sequence records
#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    /// The stream has already delivered its configured number of batches
    #[error("Stream is exhausted after {delivered} batches")]
    Exhausted { delivered: usize },

    /// A record did not have the expected four-line structure
    ///
    /// # Fields
    /// * `offset` - The byte offset of the record start
    /// * `reason` - What was wrong with the record
    #[error("Malformed record at byte {offset}: {reason}")]
    MalformedRecord { offset: u64, reason: &'static str },

    /// The sequence contains characters outside the nucleotide alphabet
    #[error("Invalid nucleotide '{symbol}' in record {id}")]
    InvalidNucleotide { id: String, symbol: char },

    /// The sequence and quality lines differ in length
    #[error("Sequence length ({seq}) does not match quality length ({qual}) in record {id}")]
    QualityLengthMismatch { id: String, seq: usize, qual: usize },

    /// An offset points past the end of the source
    #[error("Offset {0} is beyond the end of the source ({1} bytes)")]
    OffsetOutOfRange(u64, u64),

    /// The file being read is not a regular file (e.g., it might be a directory or special file)
    #[error("File is not regular")]
    IncompatibleFile,
}

/// Errors that can occur while parsing alignment lines
#[derive(thiserror::Error, Debug)]
pub enum AlignmentError {
    /// The line has fewer than the twelve mandatory fields
    #[error("Expected at least 12 fields, found {0}")]
    MissingFields(usize),

    /// A numeric field could not be parsed
    #[error("Invalid {field}: {value}")]
    InvalidField { field: &'static str, value: String },

    /// The strand field is neither '+' nor '-'
    #[error("Invalid strand: {0}")]
    InvalidStrand(String),

    /// Coordinates are inconsistent with the sequence length
    #[error("Invalid {side} interval {start}..{end} for length {len}")]
    InvalidInterval {
        side: &'static str,
        start: u64,
        end: u64,
        len: u64,
    },

    /// An optional field is not of the form TAG:TYPE:VALUE
    #[error("Invalid tag: {0}")]
    InvalidTag(String),

    /// A parse error annotated with the line where it happened
    #[error("Line {line}: {source}")]
    AtLine {
        line: usize,
        #[source]
        source: Box<AlignmentError>,
    },
}

/// Errors raised while configuring batch sampling
#[derive(thiserror::Error, Debug)]
pub enum SampleError {
    /// More records were requested than the source contains
    ///
    /// # Fields
    /// * `requested` - `num_batches * batch_size`
    /// * `available` - The number of records in the source
    #[error("Requested {requested} records but the source only holds {available}")]
    Capacity { requested: usize, available: usize },

    /// A batch size or batch count of zero was requested
    #[error("Batch size and batch count must be positive (got {batch_size} x {num_batches})")]
    EmptyLayout {
        batch_size: usize,
        num_batches: usize,
    },

    /// Only one of the full/truncated alignment sources was provided
    #[error("Both full and truncated alignment sources are required")]
    UnpairedAlignments,
}
