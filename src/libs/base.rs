//! Base/quality pairs and the nucleotide alphabet used throughout collapsing.
//!
//! Confidences are stored as raw Phred scores; FASTQ encoding (offset 33)
//! only appears at the parse and emit boundaries.

use crate::libs::error::CollapseError;

/// No-call symbol.
pub const MISSING: u8 = b'N';
/// Filler used when an alignment is rendered back into flat rows.
pub const INSERTION: u8 = b'-';
/// A modified cytosine.
pub const MODIFIED: u8 = b'M';
/// The complement of [`MODIFIED`], i.e. a guanine opposite a modified cytosine.
pub const MODIFIED_COMPLEMENT: u8 = b'K';

pub const PHRED_OFFSET: u8 = 33;
/// Highest Phred score that still encodes to a printable FASTQ character.
pub const MAX_PHRED: u8 = 93;

/// Symbols that survive [`normalize`].
pub const ALPHABET: [u8; 8] = [
    b'A',
    b'C',
    b'G',
    b'T',
    MISSING,
    INSERTION,
    MODIFIED,
    MODIFIED_COMPLEMENT,
];

const fn build_complement() -> [u8; 256] {
    let mut table = [MISSING; 256];
    table[b'A' as usize] = b'T';
    table[b'T' as usize] = b'A';
    table[b'C' as usize] = b'G';
    table[b'G' as usize] = b'C';
    table[MODIFIED as usize] = MODIFIED_COMPLEMENT;
    table[MODIFIED_COMPLEMENT as usize] = MODIFIED;
    table[INSERTION as usize] = INSERTION;
    table
}

static COMPLEMENT: [u8; 256] = build_complement();

pub fn complement(symbol: u8) -> u8 {
    COMPLEMENT[symbol as usize]
}

/// Upper-cases a raw FASTQ symbol and folds anything outside [`ALPHABET`]
/// (IUPAC ambiguity codes, `.`) into [`MISSING`].
///
/// `M` and `K` are read as a modified cytosine and its complement, as the
/// modification caller writes them, not as the IUPAC codes A/C and G/T.
pub fn normalize(symbol: u8) -> u8 {
    let upper = symbol.to_ascii_uppercase();
    if ALPHABET.contains(&upper) {
        upper
    } else {
        MISSING
    }
}

/// The unmodified base a symbol stands for.
pub fn unmodified(symbol: u8) -> u8 {
    match symbol {
        MODIFIED => b'C',
        MODIFIED_COMPLEMENT => b'G',
        s => s,
    }
}

pub fn is_modified(symbol: u8) -> bool {
    symbol == MODIFIED || symbol == MODIFIED_COMPLEMENT
}

/// Two observed symbols agree when they are equal, or when one is the
/// modified form of the other.
pub fn equivalent(a: u8, b: u8) -> bool {
    a == b || unmodified(a) == unmodified(b)
}

/// Symbol reported for two agreeing observations. A modification seen on
/// either copy wins.
pub fn resolve_agreement(a: u8, b: u8) -> u8 {
    if is_modified(b) && !is_modified(a) {
        b
    } else {
        a
    }
}

pub fn reverse_complement_symbols(seq: &[u8]) -> Vec<u8> {
    seq.iter().rev().map(|&s| complement(s)).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BasePair {
    symbol: u8,
    confidence: u8,
}

impl BasePair {
    pub const fn new(symbol: u8, confidence: u8) -> Self {
        Self { symbol, confidence }
    }

    pub fn symbol(&self) -> u8 {
        self.symbol
    }

    pub fn confidence(&self) -> u8 {
        self.confidence
    }

    pub fn is_missing(&self) -> bool {
        self.symbol == MISSING
    }

    pub fn complement(&self) -> Self {
        Self::new(complement(self.symbol), self.confidence)
    }
}

/// An independently owned reverse complement, never a view.
pub fn reverse_complement(seq: &[BasePair]) -> Vec<BasePair> {
    seq.iter().rev().map(BasePair::complement).collect()
}

/// Builds a sequence from FASTQ sequence and quality lines.
pub fn parse_fastq(name: &[u8], bases: &[u8], qualities: &[u8]) -> anyhow::Result<Vec<BasePair>> {
    if bases.len() != qualities.len() {
        return Err(CollapseError::InvalidRecord {
            name: String::from_utf8_lossy(name).into_owned(),
            message: format!(
                "{} bases but {} quality scores",
                bases.len(),
                qualities.len()
            ),
        }
        .into());
    }

    bases
        .iter()
        .zip(qualities)
        .map(|(&b, &q)| {
            if q < PHRED_OFFSET {
                Err(CollapseError::InvalidRecord {
                    name: String::from_utf8_lossy(name).into_owned(),
                    message: format!("quality character {:?} below '!'", q as char),
                }
                .into())
            } else {
                Ok(BasePair::new(normalize(b), q - PHRED_OFFSET))
            }
        })
        .collect()
}

/// Splits a sequence back into FASTQ sequence and quality lines.
pub fn to_fastq(seq: &[BasePair]) -> (Vec<u8>, Vec<u8>) {
    seq.iter()
        .map(|bp| {
            (
                bp.symbol(),
                bp.confidence().min(MAX_PHRED) + PHRED_OFFSET,
            )
        })
        .unzip()
}

pub fn symbols(seq: &[BasePair]) -> Vec<u8> {
    seq.iter().map(BasePair::symbol).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complement_round_trip() {
        for &s in ALPHABET.iter() {
            for q in [0u8, 2, 30, 60] {
                let bp = BasePair::new(s, q);
                assert_eq!(bp.complement().complement(), bp);
                assert_eq!(bp.complement().confidence(), q);
            }
        }
        assert_eq!(complement(b'A'), b'T');
        assert_eq!(complement(MODIFIED), MODIFIED_COMPLEMENT);
        assert_eq!(complement(MISSING), MISSING);
    }

    #[test]
    fn test_reverse_complement_round_trip() {
        let seq = parse_fastq(b"r", b"ACGTNMK-acgt", b"IIII#III5555").unwrap();
        let rc = reverse_complement(&seq);
        assert_eq!(symbols(&rc), b"ACGT-MKNACGT".to_vec());
        assert_eq!(rc[0].confidence(), 20);
        assert_eq!(reverse_complement(&rc), seq);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(b'a'), b'A');
        assert_eq!(normalize(b'R'), MISSING);
        assert_eq!(normalize(b'.'), MISSING);
        assert_eq!(normalize(b'm'), MODIFIED);
        assert_eq!(normalize(b'k'), MODIFIED_COMPLEMENT);
        // the remaining IUPAC codes carry no call
        for code in *b"RYSWBDHV" {
            assert_eq!(normalize(code), MISSING);
        }
    }

    #[test]
    fn test_equivalent() {
        assert!(equivalent(b'C', MODIFIED));
        assert!(equivalent(MODIFIED, b'C'));
        assert!(equivalent(b'G', MODIFIED_COMPLEMENT));
        assert!(!equivalent(b'G', MODIFIED));
        assert!(!equivalent(b'A', b'T'));
        assert_eq!(resolve_agreement(b'C', MODIFIED), MODIFIED);
        assert_eq!(resolve_agreement(MODIFIED, b'C'), MODIFIED);
        assert_eq!(resolve_agreement(b'T', b'T'), b'T');
    }

    #[test]
    fn test_parse_fastq() {
        let seq = parse_fastq(b"r", b"ACG", b"!+I").unwrap();
        assert_eq!(seq[0], BasePair::new(b'A', 0));
        assert_eq!(seq[1], BasePair::new(b'C', 10));
        assert_eq!(seq[2], BasePair::new(b'G', 40));

        let (bases, quals) = to_fastq(&seq);
        assert_eq!(bases, b"ACG".to_vec());
        assert_eq!(quals, b"!+I".to_vec());

        let err = parse_fastq(b"bad", b"ACG", b"II").unwrap_err();
        assert!(err.to_string().contains("bad"));
    }
}
