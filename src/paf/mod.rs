//! # paf
//!
//! Pairwise alignment records in PAF format.
//!
//! Two access patterns are supported:
//! - keyed lookup of the raw alignment lines of a read id through an
//!   [`AlignmentStore`], backed by a persisted [`AlignmentLookupTable`],
//! - bulk parsing with filtering, best-mapper resolution and overlap
//!   classification through an [`AlignmentClassifier`].
//!
//! ```rust,no_run
//! use readsim::paf::{AlignmentClassifier, FilterConfig};
//!
//! let classifier = AlignmentClassifier::new(FilterConfig { min_len: 500, ..Default::default() });
//! match classifier.parse_filter_classify("overlaps.paf") {
//!     readsim::paf::Parsed::Available(set) => println!("{} classified", set.records.len()),
//!     readsim::paf::Parsed::Unavailable(e) => eprintln!("no alignment data: {e}"),
//! }
//! ```

mod classify;
mod index;
mod record;

pub use classify::{
    choose_best_mapper, parse_grouped, parse_grouped_reader, parse_path, parse_reader,
    AlignmentClassifier, Classification, ClassifiedRecord, ClassifiedSet, FilterConfig,
    GroupedAlignments, Parsed, Resolution, SkipReason, SkippedRecord,
};
pub use index::{
    AlignmentIndex, AlignmentLookupTable, AlignmentStore, LookupHeader, LOOKUP_HEADER_SIZE,
    LOOKUP_INDEX_EXTENSION, LOOKUP_INDEX_MAGIC,
};
pub use record::{AlignmentRecord, Strand, Tag, TagValue, MAPQ_MISSING, PAF_FIELDS};
