use std::fmt::{self, Display};
use std::str::FromStr;

use crate::error::AlignmentError;

/// Number of mandatory positional fields in a PAF line
pub const PAF_FIELDS: usize = 12;

/// Mapping quality value that means "not available"
pub const MAPQ_MISSING: u8 = 255;

/// Relative orientation of query and target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strand {
    Forward,
    Reverse,
}
impl Strand {
    #[must_use]
    pub fn is_reverse(self) -> bool {
        self == Self::Reverse
    }
}
impl FromStr for Strand {
    type Err = AlignmentError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "+" => Ok(Self::Forward),
            "-" => Ok(Self::Reverse),
            _ => Err(AlignmentError::InvalidStrand(s.to_string())),
        }
    }
}
impl Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => write!(f, "+"),
            Self::Reverse => write!(f, "-"),
        }
    }
}

/// Value of an optional `TAG:TYPE:VALUE` field
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    /// `A`: a single printable character
    Char(char),
    /// `i`: a signed integer
    Int(i64),
    /// `f`: a floating point number
    Float(f64),
    /// `Z`: a printable string
    Str(String),
    /// `H`: a hex-encoded byte array, kept verbatim
    Hex(String),
    /// `B`: a numeric array, kept verbatim including its subtype
    Array(String),
}

/// An optional field of an alignment line
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub key: [u8; 2],
    pub value: TagValue,
}
impl FromStr for Tag {
    type Err = AlignmentError;
    fn from_str(field: &str) -> Result<Self, Self::Err> {
        let invalid = || AlignmentError::InvalidTag(field.to_string());
        let bytes = field.as_bytes();
        if bytes.len() < 5 || bytes[2] != b':' || bytes[4] != b':' {
            return Err(invalid());
        }
        let key = [bytes[0], bytes[1]];
        let raw = &field[5..];
        let value = match bytes[3] {
            b'A' => {
                let mut chars = raw.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => TagValue::Char(c),
                    _ => return Err(invalid()),
                }
            }
            b'i' => TagValue::Int(raw.parse().map_err(|_| invalid())?),
            b'f' => TagValue::Float(raw.parse().map_err(|_| invalid())?),
            b'Z' => TagValue::Str(raw.to_string()),
            b'H' => TagValue::Hex(raw.to_string()),
            b'B' => TagValue::Array(raw.to_string()),
            _ => return Err(invalid()),
        };
        Ok(Self { key, value })
    }
}
impl Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (k0, k1) = (self.key[0] as char, self.key[1] as char);
        match &self.value {
            TagValue::Char(c) => write!(f, "{k0}{k1}:A:{c}"),
            TagValue::Int(v) => write!(f, "{k0}{k1}:i:{v}"),
            TagValue::Float(v) => write!(f, "{k0}{k1}:f:{v}"),
            TagValue::Str(v) => write!(f, "{k0}{k1}:Z:{v}"),
            TagValue::Hex(v) => write!(f, "{k0}{k1}:H:{v}"),
            TagValue::Array(v) => write!(f, "{k0}{k1}:B:{v}"),
        }
    }
}

/// One line of a PAF file: a mapping of a query interval onto a target interval
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentRecord {
    pub query_name: String,
    pub query_len: u64,
    pub query_start: u64,
    pub query_end: u64,
    pub strand: Strand,
    pub target_name: String,
    pub target_len: u64,
    pub target_start: u64,
    pub target_end: u64,
    /// Number of residue matches
    pub matches: u64,
    /// Alignment block length, including gaps
    pub block_len: u64,
    /// Mapping quality (255 if missing)
    pub mapq: u8,
    pub tags: Vec<Tag>,
}
impl AlignmentRecord {
    /// Parses a PAF line; a trailing line terminator is ignored
    pub fn parse(line: &str) -> Result<Self, AlignmentError> {
        line.trim_end_matches(&['\n', '\r'][..]).parse()
    }

    fn parse_u64(field: &str, name: &'static str) -> Result<u64, AlignmentError> {
        field.parse().map_err(|_| AlignmentError::InvalidField {
            field: name,
            value: field.to_string(),
        })
    }

    fn check_interval(
        side: &'static str,
        start: u64,
        end: u64,
        len: u64,
    ) -> Result<(), AlignmentError> {
        if start > end || end > len {
            return Err(AlignmentError::InvalidInterval {
                side,
                start,
                end,
                len,
            });
        }
        Ok(())
    }

    /// Fraction of the alignment block made up of matching residues
    #[must_use]
    pub fn identity(&self) -> f64 {
        if self.block_len == 0 {
            return 0.0;
        }
        self.matches as f64 / self.block_len as f64
    }

    /// Returns the first tag with the given key
    #[must_use]
    pub fn tag(&self, key: &[u8; 2]) -> Option<&TagValue> {
        self.tags.iter().find(|t| &t.key == key).map(|t| &t.value)
    }

    /// Returns an integer tag, e.g. the chaining score `s1`
    #[must_use]
    pub fn int_tag(&self, key: &[u8; 2]) -> Option<i64> {
        match self.tag(key)? {
            TagValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Mapping quality, or `None` when the aligner did not report one
    #[must_use]
    pub fn mapping_quality(&self) -> Option<u8> {
        (self.mapq != MAPQ_MISSING).then_some(self.mapq)
    }

    /// Returns true if query and target are the same sequence
    #[must_use]
    pub fn is_self_alignment(&self) -> bool {
        self.query_name == self.target_name
    }

    /// Length of the aligned query interval
    #[must_use]
    pub fn query_span(&self) -> u64 {
        self.query_end - self.query_start
    }

    /// Length of the aligned target interval
    #[must_use]
    pub fn target_span(&self) -> u64 {
        self.target_end - self.target_start
    }

    /// Renders the record back into a tab-separated PAF line without terminator
    #[must_use]
    pub fn to_line(&self) -> String {
        self.to_string()
    }
}
impl FromStr for AlignmentRecord {
    type Err = AlignmentError;
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < PAF_FIELDS {
            return Err(AlignmentError::MissingFields(fields.len()));
        }

        let record = Self {
            query_name: fields[0].to_string(),
            query_len: Self::parse_u64(fields[1], "query length")?,
            query_start: Self::parse_u64(fields[2], "query start")?,
            query_end: Self::parse_u64(fields[3], "query end")?,
            strand: fields[4].parse()?,
            target_name: fields[5].to_string(),
            target_len: Self::parse_u64(fields[6], "target length")?,
            target_start: Self::parse_u64(fields[7], "target start")?,
            target_end: Self::parse_u64(fields[8], "target end")?,
            matches: Self::parse_u64(fields[9], "residue matches")?,
            block_len: Self::parse_u64(fields[10], "block length")?,
            mapq: fields[11].parse().map_err(|_| AlignmentError::InvalidField {
                field: "mapping quality",
                value: fields[11].to_string(),
            })?,
            tags: fields[PAF_FIELDS..]
                .iter()
                .map(|f| f.parse::<Tag>())
                .collect::<Result<_, _>>()?,
        };
        Self::check_interval("query", record.query_start, record.query_end, record.query_len)?;
        Self::check_interval("target", record.target_start, record.target_end, record.target_len)?;
        Ok(record)
    }
}
impl Display for AlignmentRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.query_name,
            self.query_len,
            self.query_start,
            self.query_end,
            self.strand,
            self.target_name,
            self.target_len,
            self.target_start,
            self.target_end,
            self.matches,
            self.block_len,
            self.mapq
        )?;
        for tag in &self.tags {
            write!(f, "\t{tag}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use anyhow::Result;

    const LINE: &str = "read_7\t9000\t120\t8800\t-\t\
                        NZ_CP041014.1\t2800000\t1000\t9700\t\
                        7900\t8750\t60\t\
                        tp:A:P\tcm:i:812\ts1:i:7711\tdv:f:0.0123\tcg:Z:8750M";

    #[test]
    fn test_parse_line() -> Result<()> {
        let record = AlignmentRecord::parse(&format!("{LINE}\n"))?;
        assert_eq!(record.query_name, "read_7");
        assert_eq!(record.query_len, 9000);
        assert_eq!(record.query_span(), 8680);
        assert_eq!(record.strand, Strand::Reverse);
        assert_eq!(record.target_name, "NZ_CP041014.1");
        assert_eq!(record.target_span(), 8700);
        assert_eq!(record.mapq, 60);
        assert_eq!(record.tags.len(), 5);
        assert_eq!(record.tag(b"tp"), Some(&TagValue::Char('P')));
        assert_eq!(record.int_tag(b"s1"), Some(7711));
        assert_eq!(record.tag(b"dv"), Some(&TagValue::Float(0.0123)));
        assert_eq!(record.int_tag(b"cg"), None);
        assert!((record.identity() - 7900.0 / 8750.0).abs() < 1e-12);
        assert!(!record.is_self_alignment());
        assert_eq!(record.mapping_quality(), Some(60));
        assert_eq!(
            AlignmentRecord::parse(&LINE.replacen("\t60\t", "\t255\t", 1))?.mapping_quality(),
            None
        );
        Ok(())
    }

    #[test]
    fn test_line_is_reproduced() -> Result<()> {
        let record: AlignmentRecord = LINE.parse()?;
        assert_eq!(record.to_line(), LINE);
        Ok(())
    }

    #[test]
    fn test_missing_fields() {
        let err = AlignmentRecord::parse("a\t1\t0\t1\t+").unwrap_err();
        assert!(matches!(err, AlignmentError::MissingFields(5)));
    }

    #[test]
    fn test_invalid_fields() {
        let bad_len = LINE.replacen("9000", "nine", 1);
        assert!(matches!(
            AlignmentRecord::parse(&bad_len),
            Err(AlignmentError::InvalidField { field: "query length", .. })
        ));

        let bad_strand = LINE.replacen("\t-\t", "\t*\t", 1);
        assert!(matches!(
            AlignmentRecord::parse(&bad_strand),
            Err(AlignmentError::InvalidStrand(_))
        ));

        let bad_interval = LINE.replacen("\t8800\t", "\t9800\t", 1);
        assert!(matches!(
            AlignmentRecord::parse(&bad_interval),
            Err(AlignmentError::InvalidInterval { side: "query", .. })
        ));

        let bad_tag = format!("{LINE}\tnotatag");
        assert!(matches!(
            AlignmentRecord::parse(&bad_tag),
            Err(AlignmentError::InvalidTag(_))
        ));
    }

    #[test]
    fn test_tag_parsing() -> Result<()> {
        assert_eq!("NM:i:-3".parse::<Tag>()?.value, TagValue::Int(-3));
        assert_eq!("xy:B:c,1,2".parse::<Tag>()?.value, TagValue::Array("c,1,2".into()));
        assert_eq!("xy:Z:".parse::<Tag>()?.value, TagValue::Str(String::new()));
        assert!("tp:A:PP".parse::<Tag>().is_err());
        assert!("s1:i:abc".parse::<Tag>().is_err());
        assert!("s1:q:1".parse::<Tag>().is_err());
        Ok(())
    }
}
