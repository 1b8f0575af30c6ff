use crate::error::{ReadError, Result};
use crate::source::trim_line;

/// Number of lines occupied by one FASTQ record
pub const LINES_PER_RECORD: usize = 4;

/// Returns true if `symbol` is a nucleotide or IUPAC ambiguity code (case-insensitive)
#[inline]
#[must_use]
pub fn is_nucleotide(symbol: u8) -> bool {
    matches!(
        symbol.to_ascii_uppercase(),
        b'A' | b'C'
            | b'G'
            | b'T'
            | b'U'
            | b'N'
            | b'R'
            | b'Y'
            | b'K'
            | b'M'
            | b'S'
            | b'W'
            | b'B'
            | b'D'
            | b'H'
            | b'V'
    )
}

/// A single sequencing read parsed from a FASTQ record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Read identifier: the first whitespace-delimited token of the header line
    id: String,
    /// Nucleotide sequence
    seq: String,
    /// Quality string, same length as the sequence
    qual: String,
    /// Number of bytes the record occupies in the source
    bytes: usize,
}
impl Record {
    /// Parses a four-line record whose first byte is at `offset` in the source
    ///
    /// `buf` must hold the raw record lines including their terminators.
    pub fn parse(offset: u64, buf: &[u8]) -> Result<Self> {
        let malformed = |reason| ReadError::MalformedRecord { offset, reason };

        let mut lines = buf.split_inclusive(|&b| b == b'\n').map(trim_line);
        let header = lines.next().ok_or_else(|| malformed("missing header line"))?;
        let seq = lines.next().ok_or_else(|| malformed("missing sequence line"))?;
        let sep = lines.next().ok_or_else(|| malformed("missing separator line"))?;
        let qual = lines.next().ok_or_else(|| malformed("missing quality line"))?;

        let Some(header) = header.strip_prefix(b"@") else {
            return Err(malformed("header does not start with '@'").into());
        };
        if !sep.starts_with(b"+") {
            return Err(malformed("separator does not start with '+'").into());
        }

        let header = std::str::from_utf8(header)?;
        let id = header
            .split_ascii_whitespace()
            .next()
            .ok_or_else(|| malformed("empty read identifier"))?
            .to_string();

        if let Some(&symbol) = seq.iter().find(|&&b| !is_nucleotide(b)) {
            return Err(ReadError::InvalidNucleotide {
                id,
                symbol: symbol as char,
            }
            .into());
        }
        if seq.len() != qual.len() {
            return Err(ReadError::QualityLengthMismatch {
                id,
                seq: seq.len(),
                qual: qual.len(),
            }
            .into());
        }

        Ok(Self {
            id,
            seq: std::str::from_utf8(seq)?.to_string(),
            qual: std::str::from_utf8(qual)?.to_string(),
            bytes: buf.len(),
        })
    }

    /// Read id, without the leading `@` and any description
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Nucleotide sequence as it appears in the source
    #[must_use]
    pub fn seq(&self) -> &str {
        &self.seq
    }

    /// Quality string, one symbol per base
    #[must_use]
    pub fn qual(&self) -> &str {
        &self.qual
    }

    /// Sequence length in bases
    #[must_use]
    pub fn len(&self) -> usize {
        self.seq.len()
    }

    /// Returns true if the sequence has no bases
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    /// Number of bytes the record occupies in the (decompressed) source
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.bytes
    }

    /// Consumes the record, returning its id, sequence and quality
    #[must_use]
    pub fn into_parts(self) -> (String, String, String) {
        (self.id, self.seq, self.qual)
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::Error;
    use anyhow::Result;

    #[test]
    fn test_parse_record() -> Result<()> {
        let buf = b"@read_1 runid=abc ch=7\nACGTNnrY\n+\n!!!!####\n";
        let record = Record::parse(0, buf)?;
        assert_eq!(record.id(), "read_1");
        assert_eq!(record.seq(), "ACGTNnrY");
        assert_eq!(record.qual(), "!!!!####");
        assert_eq!(record.len(), 8);
        assert_eq!(record.byte_len(), buf.len());
        Ok(())
    }

    #[test]
    fn test_parse_record_without_final_newline() -> Result<()> {
        let record = Record::parse(10, b"@r\r\nAC\r\n+r\r\nII")?;
        assert_eq!(record.seq(), "AC");
        assert_eq!(record.qual(), "II");
        Ok(())
    }

    #[test]
    fn test_invalid_alphabet() {
        let err = Record::parse(0, b"@r\nACGXT\n+\nIIIII\n").unwrap_err();
        assert!(matches!(
            err,
            Error::ReadError(ReadError::InvalidNucleotide { symbol: 'X', .. })
        ));
    }

    #[test]
    fn test_quality_length_mismatch() {
        let err = Record::parse(0, b"@r\nACGT\n+\nIII\n").unwrap_err();
        assert!(matches!(
            err,
            Error::ReadError(ReadError::QualityLengthMismatch { seq: 4, qual: 3, .. })
        ));
    }

    #[test]
    fn test_malformed_structure() {
        for buf in [
            &b"r\nACGT\n+\nIIII\n"[..],
            &b"@r\nACGT\n-\nIIII\n"[..],
            &b"@r\nACGT\n+\n"[..],
            &b"@\nACGT\n+\nIIII\n"[..],
        ] {
            let err = Record::parse(42, buf).unwrap_err();
            assert!(matches!(
                err,
                Error::ReadError(ReadError::MalformedRecord { offset: 42, .. })
            ));
        }
    }

    #[test]
    fn test_alphabet_is_case_insensitive() {
        assert!(b"acgtACGTnNwWsS".iter().all(|&b| is_nucleotide(b)));
        assert!(!b"XZJ*-".iter().any(|&b| is_nucleotide(b)));
    }
}
