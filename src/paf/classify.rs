//! Filtering and classification of alignment records
//!
//! Records pass through three stages:
//! 1. filters from [`FilterConfig`] (self alignments, rejected targets, length,
//!    identity, chaining score),
//! 2. best-mapper resolution, which keeps one record per query (or per
//!    query/target pair),
//! 3. overlap classification into the closed set of [`Classification`]s.
//!
//! A record that leaves the pipeline at any stage is kept as a
//! [`SkippedRecord`] with its [`SkipReason`], so classified and skipped
//! records always partition the input.

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Display};
use std::io::BufRead;
use std::path::Path;

use log::debug;

use super::record::AlignmentRecord;
use crate::error::{AlignmentError, Error, Result};
use crate::source::open_decoded;

/// Outcome category of a resolved alignment
///
/// Categories describe how the query ("first") and target ("second")
/// sequences relate, given overhangs no longer than `max_hang`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Classification {
    /// Both sequences continue past the alignment on the same side
    InternalMatch = 1,
    /// The query is contained in the target
    FirstContained = 2,
    /// The target is contained in the query
    SecondContained = 3,
    /// The query end overlaps the target start
    FirstOverlap = 4,
    /// The target end overlaps the query start
    SecondOverlap = 5,
    /// A dovetail overlap shorter than `min_overlap`
    ShortOverlap = 6,
    /// An internal match with a long overhang on one end only
    Trim = 7,
}
impl Classification {
    pub const ALL: [Self; 7] = [
        Self::InternalMatch,
        Self::FirstContained,
        Self::SecondContained,
        Self::FirstOverlap,
        Self::SecondOverlap,
        Self::ShortOverlap,
        Self::Trim,
    ];

    /// Numeric code of the category
    #[must_use]
    pub fn code(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }
}
impl Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InternalMatch => "internal-match",
            Self::FirstContained => "first-contained",
            Self::SecondContained => "second-contained",
            Self::FirstOverlap => "first-overlap",
            Self::SecondOverlap => "second-overlap",
            Self::ShortOverlap => "short-overlap",
            Self::Trim => "trim",
        };
        write!(f, "{name}")
    }
}

/// How records are grouped before the best mapper is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resolution {
    /// One record per query id
    #[default]
    Query,
    /// One record per (query id, target id) pair, for all-vs-all mappings
    Pair,
}

/// Why a record did not make it into the classified set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    SelfAlignment,
    RejectedTarget,
    BelowMinLength,
    BelowMinIdentity,
    /// The `s1` chaining score is missing or below the minimum
    BelowMinChainScore,
    /// Another record of the same group was chosen as best mapper
    Superseded,
    /// The record's category is disallowed by configuration
    Disallowed(Classification),
}

/// Filter and classification options, resolved once per classifier
#[derive(Debug, Clone, PartialEq)]
pub struct FilterConfig {
    /// Minimum alignment block length
    pub min_len: u64,
    /// Minimum fraction of matching residues in the block
    pub min_identity: f64,
    /// Minimum chaining score (`s1` tag); disabled when `None`
    pub min_chain_score: Option<i64>,
    /// Targets whose alignments are skipped
    pub reject_targets: Vec<String>,
    /// Skip alignments of a sequence onto itself
    pub skip_self: bool,
    /// Longest overhang tolerated for containments and overlaps
    pub max_hang: u64,
    /// Minimum aligned fraction of the overlapping region
    pub int_frac: f64,
    /// Minimum length of a dovetail overlap
    pub min_overlap: u64,
    /// Grouping used for best-mapper resolution
    pub resolve: Resolution,
    /// Categories that are moved to the skipped set
    pub disallowed: Vec<Classification>,
}
impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_len: 1000,
            min_identity: 0.0,
            min_chain_score: None,
            reject_targets: Vec::new(),
            skip_self: true,
            max_hang: 1000,
            int_frac: 0.8,
            min_overlap: 2000,
            resolve: Resolution::Query,
            disallowed: vec![Classification::InternalMatch, Classification::Trim],
        }
    }
}
impl FilterConfig {
    /// Sets the reject list from a comma-separated list of target ids
    #[must_use]
    pub fn with_reject_list(mut self, list: &str) -> Self {
        self.reject_targets = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedRecord {
    pub record: AlignmentRecord,
    pub class: Classification,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRecord {
    pub record: AlignmentRecord,
    pub reason: SkipReason,
}

/// Classified and skipped records of one alignment source
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassifiedSet {
    /// Surviving records in input order
    pub records: Vec<ClassifiedRecord>,
    pub skipped: Vec<SkippedRecord>,
}
impl ClassifiedSet {
    /// Number of records that were parsed
    #[must_use]
    pub fn parsed(&self) -> usize {
        self.records.len() + self.skipped.len()
    }

    /// Distinct categories present among the classified records
    #[must_use]
    pub fn classes(&self) -> HashSet<Classification> {
        self.records.iter().map(|r| r.class).collect()
    }
}

/// Result of reading an alignment source that may not be available
///
/// A missing or unparsable source is not an error for the caller: it is
/// reported as `Unavailable` so that "no alignment data" stays
/// distinguishable from "every record was filtered out".
#[derive(Debug)]
pub enum Parsed<T> {
    Available(T),
    Unavailable(Error),
}
impl<T> Parsed<T> {
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }

    #[must_use]
    pub fn available(&self) -> Option<&T> {
        match self {
            Self::Available(value) => Some(value),
            Self::Unavailable(_) => None,
        }
    }

    #[must_use]
    pub fn into_available(self) -> Option<T> {
        match self {
            Self::Available(value) => Some(value),
            Self::Unavailable(_) => None,
        }
    }

    /// The error that made the source unavailable
    #[must_use]
    pub fn reason(&self) -> Option<&Error> {
        match self {
            Self::Available(_) => None,
            Self::Unavailable(e) => Some(e),
        }
    }

    fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(value) => Self::Available(value),
            Err(e) => {
                debug!("Alignment source unavailable: {e}");
                Self::Unavailable(e)
            }
        }
    }
}
impl<T: Default> Parsed<T> {
    /// The parsed value, or an empty value when the source was unavailable
    #[must_use]
    pub fn unwrap_or_default(self) -> T {
        self.into_available().unwrap_or_default()
    }
}

/// Alignment records grouped by query id, in order of first appearance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupedAlignments {
    groups: Vec<(String, Vec<AlignmentRecord>)>,
    positions: HashMap<String, usize>,
}
impl GroupedAlignments {
    /// Groups records by query id, dropping records with a block shorter than `min_len`
    #[must_use]
    pub fn from_records(records: Vec<AlignmentRecord>, min_len: u64) -> Self {
        let mut grouped = Self::default();
        for record in records.into_iter().filter(|r| r.block_len >= min_len) {
            match grouped.positions.get(&record.query_name) {
                Some(&pos) => grouped.groups[pos].1.push(record),
                None => {
                    grouped
                        .positions
                        .insert(record.query_name.clone(), grouped.groups.len());
                    grouped.groups.push((record.query_name.clone(), vec![record]));
                }
            }
        }
        grouped
    }

    /// Number of distinct query ids
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total number of records over all groups
    #[must_use]
    pub fn n_records(&self) -> usize {
        self.groups.iter().map(|(_, g)| g.len()).sum()
    }

    #[must_use]
    pub fn get(&self, query: &str) -> Option<&[AlignmentRecord]> {
        self.positions
            .get(query)
            .map(|&pos| self.groups[pos].1.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[AlignmentRecord])> {
        self.groups
            .iter()
            .map(|(name, records)| (name.as_str(), records.as_slice()))
    }
}

/// Picks the single record that best represents a multi-mapped query
///
/// Ranking: highest mapping quality (missing counts as 0), then longest
/// alignment block, then earliest in input order.
#[must_use]
pub fn choose_best_mapper(records: &[AlignmentRecord]) -> Option<&AlignmentRecord> {
    best_position(records.iter()).map(|pos| &records[pos])
}

fn best_position<'a, I>(records: I) -> Option<usize>
where
    I: Iterator<Item = &'a AlignmentRecord>,
{
    let mut best: Option<(usize, (u8, u64))> = None;
    for (pos, record) in records.enumerate() {
        let rank = (record.mapping_quality().unwrap_or(0), record.block_len);
        match best {
            Some((_, top)) if rank <= top => {}
            _ => best = Some((pos, rank)),
        }
    }
    best.map(|(pos, _)| pos)
}

/// Parses every line of a reader into alignment records
///
/// Empty lines are ignored. The first malformed line aborts parsing.
pub fn parse_reader<R: BufRead>(reader: R) -> Result<Vec<AlignmentRecord>> {
    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = AlignmentRecord::parse(&line).map_err(|e| AlignmentError::AtLine {
            line: idx + 1,
            source: Box::new(e),
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Parses a (possibly compressed) PAF file into alignment records
pub fn parse_path<P: AsRef<Path>>(path: P) -> Result<Vec<AlignmentRecord>> {
    parse_reader(open_decoded(path)?)
}

/// Parses a PAF file and groups its records by query id
///
/// Records with a block shorter than `min_len` are dropped.
pub fn parse_grouped<P: AsRef<Path>>(path: P, min_len: u64) -> Parsed<GroupedAlignments> {
    Parsed::from_result(
        parse_path(path).map(|records| GroupedAlignments::from_records(records, min_len)),
    )
}

/// Same as [`parse_grouped`] for an in-memory or streaming source
pub fn parse_grouped_reader<R: BufRead>(reader: R, min_len: u64) -> Parsed<GroupedAlignments> {
    Parsed::from_result(
        parse_reader(reader).map(|records| GroupedAlignments::from_records(records, min_len)),
    )
}

/// Applies a fixed [`FilterConfig`] to alignment sources
#[derive(Debug, Clone)]
pub struct AlignmentClassifier {
    config: FilterConfig,
    reject: HashSet<String>,
}
impl Default for AlignmentClassifier {
    fn default() -> Self {
        Self::new(FilterConfig::default())
    }
}
impl AlignmentClassifier {
    #[must_use]
    pub fn new(config: FilterConfig) -> Self {
        let reject = config.reject_targets.iter().cloned().collect();
        Self { config, reject }
    }

    #[must_use]
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Parses, filters, resolves and classifies all records of a PAF file
    pub fn parse_filter_classify<P: AsRef<Path>>(&self, path: P) -> Parsed<ClassifiedSet> {
        Parsed::from_result(parse_path(path).map(|records| self.classify_records(records)))
    }

    /// Same as [`parse_filter_classify`](Self::parse_filter_classify) for a reader
    pub fn classify_reader<R: BufRead>(&self, reader: R) -> Parsed<ClassifiedSet> {
        Parsed::from_result(parse_reader(reader).map(|records| self.classify_records(records)))
    }

    /// Returns the first filter the record fails, if any
    #[must_use]
    pub fn filter(&self, record: &AlignmentRecord) -> Option<SkipReason> {
        let config = &self.config;
        if config.skip_self && record.is_self_alignment() {
            return Some(SkipReason::SelfAlignment);
        }
        if self.reject.contains(&record.target_name) {
            return Some(SkipReason::RejectedTarget);
        }
        if record.block_len < config.min_len {
            return Some(SkipReason::BelowMinLength);
        }
        if record.identity() < config.min_identity {
            return Some(SkipReason::BelowMinIdentity);
        }
        if let Some(min) = config.min_chain_score {
            if record.int_tag(b"s1").map_or(true, |score| score < min) {
                return Some(SkipReason::BelowMinChainScore);
            }
        }
        None
    }

    /// Assigns the overlap category of a record from its strand-aware overhangs
    #[must_use]
    #[allow(clippy::cast_possible_wrap, clippy::cast_precision_loss)]
    pub fn classify(&self, record: &AlignmentRecord) -> Classification {
        let (ql, qs, qe) = (
            record.query_len as i64,
            record.query_start as i64,
            record.query_end as i64,
        );
        let (tl, ts, te) = (
            record.target_len as i64,
            record.target_start as i64,
            record.target_end as i64,
        );

        // target overhangs as seen from the query strand
        let (tl5, tl3) = if record.strand.is_reverse() {
            (tl - te, ts)
        } else {
            (ts, tl - te)
        };
        let ext5 = qs.min(tl5);
        let ext3 = (ql - qe).min(tl3);
        let aligned = qe - qs;
        let span = aligned + ext5 + ext3;

        let max_hang = self.config.max_hang as i64;
        let long5 = ext5 > max_hang;
        let long3 = ext3 > max_hang;
        let low_frac = (aligned as f64) < span as f64 * self.config.int_frac;
        if long5 || long3 || low_frac {
            if long5 != long3 && !low_frac {
                return Classification::Trim;
            }
            return Classification::InternalMatch;
        }

        let min_overlap = self.config.min_overlap as i64;
        if qs <= tl5 && ql - qe <= tl3 {
            Classification::FirstContained
        } else if qs >= tl5 && ql - qe >= tl3 {
            Classification::SecondContained
        } else if span < min_overlap || (te - ts) + ext5 + ext3 < min_overlap {
            Classification::ShortOverlap
        } else if qs > tl5 {
            Classification::FirstOverlap
        } else {
            Classification::SecondOverlap
        }
    }

    fn group_key<'a>(&self, record: &'a AlignmentRecord) -> (&'a str, Option<&'a str>) {
        match self.config.resolve {
            Resolution::Query => (&record.query_name, None),
            Resolution::Pair => (&record.query_name, Some(&record.target_name)),
        }
    }

    /// Filters, resolves and classifies already parsed records
    #[must_use]
    pub fn classify_records(&self, records: Vec<AlignmentRecord>) -> ClassifiedSet {
        let mut set = ClassifiedSet::default();

        let mut survivors = Vec::with_capacity(records.len());
        for record in records {
            match self.filter(&record) {
                Some(reason) => set.skipped.push(SkippedRecord { record, reason }),
                None => survivors.push(record),
            }
        }

        let mut winner = vec![false; survivors.len()];
        {
            let mut groups: HashMap<(&str, Option<&str>), Vec<usize>> = HashMap::new();
            for (pos, record) in survivors.iter().enumerate() {
                groups.entry(self.group_key(record)).or_default().push(pos);
            }
            for members in groups.values() {
                if let Some(best) = best_position(members.iter().map(|&pos| &survivors[pos])) {
                    winner[members[best]] = true;
                }
            }
        }

        for (record, won) in survivors.into_iter().zip(winner) {
            if !won {
                set.skipped.push(SkippedRecord {
                    record,
                    reason: SkipReason::Superseded,
                });
                continue;
            }
            let class = self.classify(&record);
            if self.config.disallowed.contains(&class) {
                set.skipped.push(SkippedRecord {
                    record,
                    reason: SkipReason::Disallowed(class),
                });
            } else {
                set.records.push(ClassifiedRecord { record, class });
            }
        }
        set
    }
}
