//! Per-pair control flow: boundary detection, the two alignments, the
//! merge and the final trim.

use crate::libs::base::{self, BasePair};
use crate::libs::boundary::{self, BoundaryParams, HairpinMatch, ReverseComplementMatch};
use crate::libs::consensus::{self, Column, ConsensusParams, ConsensusResult};
use crate::libs::nw::{Aligner, Alignment, FreeEnds, ScoreParams};
use fxhash::FxHashMap;
use lazy_static::lazy_static;
use noodles::fastq;
use regex::Regex;
use std::fmt;
use std::io::BufRead;

lazy_static! {
    static ref MATE_SUFFIX: Regex = Regex::new(r"/[12]$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CollapseParams {
    pub score: ScoreParams,
    pub boundary: BoundaryParams,
    pub consensus: ConsensusParams,
    /// Fill a [`Diagnostics`] record for every pair
    pub diagnostics: bool,
}

impl CollapseParams {
    /// Rejects unusable settings, warns about ones that make most pairs fail.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.score.validate()?;

        let b = &self.boundary;
        if b.hairpin.is_empty() {
            anyhow::bail!("the hairpin motif is empty");
        }
        if b.min_matches > b.hairpin.len() {
            log::warn!(
                "hairpin match floor {} exceeds the motif length {}; hairpins will never be found",
                b.min_matches,
                b.hairpin.len()
            );
        }
        if b.confident_matches < b.min_matches {
            log::warn!(
                "confident hairpin floor {} is below the match floor {}",
                b.confident_matches,
                b.min_matches
            );
        }
        if self.consensus.min_length < consensus::MIN_RESOLVED_READ_LENGTH {
            log::warn!(
                "minimum resolved length {} is below the usual {}",
                self.consensus.min_length,
                consensus::MIN_RESOLVED_READ_LENGTH
            );
        }
        Ok(())
    }
}

/// Why a pair produced no consensus read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Neither hairpin nor reverse-complement signal gave a boundary
    CutUndetermined,
    /// The reverse-complement anchor lies at or past the cut
    NoReverseOverlap,
    /// No confident span of the minimum length survived trimming
    TooShort,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::CutUndetermined => "cut_undetermined",
            FailureReason::NoReverseOverlap => "no_reverse_overlap",
            FailureReason::TooShort => "too_short",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(fastq::Record),
    Unresolved(FailureReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PairOutcome {
    pub resolution: Resolution,
    pub diagnostics: Option<Diagnostics>,
}

impl PairOutcome {
    pub fn is_resolved(&self) -> bool {
        matches!(self.resolution, Resolution::Resolved(_))
    }

    pub fn record(&self) -> Option<&fastq::Record> {
        match &self.resolution {
            Resolution::Resolved(record) => Some(record),
            Resolution::Unresolved(_) => None,
        }
    }
}

/// One row of the per-pair diagnostics table.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostics {
    pub name: String,
    pub trimmed_length: usize,
    pub hairpin1: HairpinMatch,
    pub hairpin2: HairpinMatch,
    pub rc: Option<ReverseComplementMatch>,
    pub cut_point: i32,
    /// Mismatches between the raw reads over the fragment, no alignment
    pub naive_mismatches: usize,
    /// Mismatched columns of the forward alignment
    pub aligned_mismatches: usize,
    pub forward_gaps: usize,
    pub reverse_gaps: Option<usize>,
    pub merged_length: usize,
    pub bounds: Option<(usize, usize)>,
    pub final_length: usize,
    pub outcome: &'static str,
    pub reference_length: Option<usize>,
    pub reference_identity: Option<f32>,
}

impl Diagnostics {
    pub const HEADER: &'static str = "name\ttrimmed_length\t\
        hairpin1_start\thairpin1_matches\thairpin1_suffix\t\
        hairpin2_start\thairpin2_matches\thairpin2_suffix\t\
        rc_shift\trc_hq_mismatches\trc_hq_proportion\trc_mismatches\trc_proportion\t\
        cut_point\tnaive_mismatches\taligned_mismatches\tforward_gaps\treverse_gaps\t\
        merged_length\tprefix_trim\tsuffix_trim\tfinal_length\toutcome\t\
        reference_length\treference_identity";

    fn new(name: String, trimmed_length: usize) -> Self {
        Self {
            name,
            trimmed_length,
            hairpin1: HairpinMatch::not_found(),
            hairpin2: HairpinMatch::not_found(),
            rc: None,
            cut_point: 0,
            naive_mismatches: 0,
            aligned_mismatches: 0,
            forward_gaps: 0,
            reverse_gaps: None,
            merged_length: 0,
            bounds: None,
            final_length: 0,
            outcome: "",
            reference_length: None,
            reference_identity: None,
        }
    }

    pub fn to_tsv_row(&self) -> String {
        fn opt<T: ToString>(v: Option<T>) -> String {
            v.map_or_else(|| ".".to_string(), |v| v.to_string())
        }

        let mut fields = vec![self.name.clone(), self.trimmed_length.to_string()];
        for h in [&self.hairpin1, &self.hairpin2] {
            fields.push(h.start_index.to_string());
            fields.push(h.match_count.to_string());
            fields.push(h.suffix_match_length.to_string());
        }
        fields.push(opt(self.rc.map(|m| m.shift)));
        fields.push(opt(self.rc.map(|m| m.high_qual_mismatch_count)));
        fields.push(opt(self.rc.map(|m| format!("{:.4}", m.high_qual_mismatch_proportion))));
        fields.push(opt(self.rc.map(|m| m.total_mismatch_count)));
        fields.push(opt(self.rc.map(|m| format!("{:.4}", m.total_mismatch_proportion))));
        fields.push(self.cut_point.to_string());
        fields.push(self.naive_mismatches.to_string());
        fields.push(self.aligned_mismatches.to_string());
        fields.push(self.forward_gaps.to_string());
        fields.push(opt(self.reverse_gaps));
        fields.push(self.merged_length.to_string());
        fields.push(opt(self.bounds.map(|b| b.0)));
        fields.push(opt(self.bounds.map(|b| b.1)));
        fields.push(self.final_length.to_string());
        fields.push(self.outcome.to_string());
        fields.push(opt(self.reference_length));
        fields.push(opt(self.reference_identity.map(|v| format!("{:.4}", v))));

        fields.join("\t")
    }
}

/// Key used to match a read against the reference lookup: the first word of
/// the name without a `/1` or `/2` mate suffix.
pub fn read_key(name: &[u8]) -> String {
    let name = String::from_utf8_lossy(name);
    let word = name.split_whitespace().next().unwrap_or("");
    MATE_SUFFIX.replace(word, "").into_owned()
}

/// Externally resolved reads, keyed by [`read_key`]. Only used for
/// diagnostics.
#[derive(Debug, Clone, Default)]
pub struct ReferenceReads {
    reads: FxHashMap<String, Vec<u8>>,
}

impl ReferenceReads {
    pub fn from_reader<R: BufRead>(reader: R) -> anyhow::Result<Self> {
        let mut fq_in = fastq::io::Reader::new(reader);
        let mut reads = FxHashMap::default();
        let mut record = fastq::Record::default();
        while fq_in.read_record(&mut record)? != 0 {
            let seq = record.sequence().iter().map(|&b| base::normalize(b)).collect();
            reads.insert(read_key(&record.name().to_vec()), seq);
        }
        Ok(Self { reads })
    }

    pub fn from_path(infile: &str) -> anyhow::Result<Self> {
        Self::from_reader(crate::reader(infile)?)
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.reads.get(key).map(|v| v.as_slice())
    }

    pub fn len(&self) -> usize {
        self.reads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }
}

// Bases of `a` and `b` that disagree, position by position.
fn count_mismatches(a: &[BasePair], b: &[BasePair]) -> usize {
    a.iter()
        .zip(b)
        .filter(|(x, y)| {
            !x.is_missing() && !y.is_missing() && !base::equivalent(x.symbol(), y.symbol())
        })
        .count()
}

fn aligned_mismatches(alignment: &Alignment<BasePair>) -> usize {
    alignment
        .path
        .iter()
        .filter(|col| match col {
            (Some(x), Some(y)) => {
                !x.is_missing() && !y.is_missing() && !base::equivalent(x.symbol(), y.symbol())
            }
            _ => false,
        })
        .count()
}

fn identity(consensus: &[BasePair], reference: &[u8]) -> Option<f32> {
    let compared = consensus.len().min(reference.len());
    if compared == 0 {
        return None;
    }
    let matches = consensus
        .iter()
        .zip(reference)
        .filter(|(bp, &r)| base::equivalent(bp.symbol(), r))
        .count();
    Some(matches as f32 / compared as f32)
}

/// Runs the whole pipeline on one read pair.
///
/// Owns an [`Aligner`], so each worker thread needs its own.
pub struct Collapser<'a> {
    params: &'a CollapseParams,
    reference: Option<&'a ReferenceReads>,
    hairpin_rc: Vec<u8>,
    aligner: Aligner,
}

impl<'a> Collapser<'a> {
    pub fn new(params: &'a CollapseParams, reference: Option<&'a ReferenceReads>) -> Self {
        Self {
            params,
            reference,
            hairpin_rc: base::reverse_complement_symbols(&params.boundary.hairpin),
            aligner: Aligner::new(),
        }
    }

    /// Collapses one pair into a consensus record, or explains why not.
    ///
    /// Only malformed records are errors; every other failure is reported
    /// in the returned [`PairOutcome`].
    pub fn process_pair(
        &mut self,
        read1: &fastq::Record,
        read2: &fastq::Record,
    ) -> anyhow::Result<PairOutcome> {
        let params = self.params;
        let name = read1.name().to_vec();
        let full1 = base::parse_fastq(&name, read1.sequence(), read1.quality_scores())?;
        let full2 = base::parse_fastq(
            &read2.name().to_vec(),
            read2.sequence(),
            read2.quality_scores(),
        )?;

        let trimmed = full1.len().min(full2.len());
        let seq1 = &full1[..trimmed];
        let seq2 = &full2[..trimmed];
        let seq1_rc = base::reverse_complement(seq1);
        let seq2_rc = base::reverse_complement(seq2);

        let mut diag = Diagnostics::new(String::from_utf8_lossy(&name).into_owned(), trimmed);

        let bp = &params.boundary;
        let rc = boundary::find_rc_match(seq1, &seq2_rc, bp.hairpin.len(), bp);
        let hairpin1 = boundary::find_hairpin(seq1, &bp.hairpin, bp);
        let hairpin2 = boundary::find_hairpin(seq2, &self.hairpin_rc, bp);
        let cut = boundary::resolve_cut_point(trimmed, &hairpin1, &hairpin2, rc.as_ref(), bp);
        diag.hairpin1 = hairpin1;
        diag.hairpin2 = hairpin2;
        diag.rc = rc;
        diag.cut_point = cut;

        if cut <= 0 {
            return Ok(self.fail(FailureReason::CutUndetermined, diag));
        }
        let cut = cut as usize;

        let scoring = params.score.modc_pairs();

        let forward = self.aligner.approx_align(
            &seq1[..cut],
            &seq2[..cut],
            &scoring,
            &params.score.params(FreeEnds::suffixes()),
        );
        let forward_consensus = consensus::collapse_aligned(
            consensus::without_overhang(&forward.path),
            &params.consensus,
        );
        diag.naive_mismatches = count_mismatches(&seq1[..cut], &seq2[..cut]);
        diag.aligned_mismatches = aligned_mismatches(&forward);
        diag.forward_gaps = forward.gaps();

        // The hairpin-spanning copy of the fragment end. An RC anchor at or
        // past the cut contradicts the boundary.
        let reverse_consensus = match rc {
            Some(m) => {
                let overlap = (cut as i32 - m.shift).min(trimmed as i32);
                if overlap <= 0 {
                    return Ok(self.fail(FailureReason::NoReverseOverlap, diag));
                }
                let len = overlap as usize;
                let reverse = self.aligner.approx_align(
                    &seq2_rc[..len],
                    &seq1_rc[..len],
                    &scoring,
                    &params.score.params(FreeEnds::prefixes()),
                );
                diag.reverse_gaps = Some(reverse.gaps());
                Some(consensus::collapse_aligned(
                    consensus::without_overhang(&reverse.path),
                    &params.consensus,
                ))
            }
            None => None,
        };

        let columns: Vec<Column> = match &reverse_consensus {
            Some(rev) => consensus::zip_from_end(&forward_consensus, rev),
            None => forward_consensus.iter().map(|bp| (Some(*bp), None)).collect(),
        };
        let merged = consensus::collapse_naive(&columns, &params.consensus);
        diag.merged_length = merged.len();

        let result = ConsensusResult::new(merged, &params.consensus);
        diag.bounds = result.bounds;

        let span = match result.clipped() {
            Some(span) => span,
            None => return Ok(self.fail(FailureReason::TooShort, diag)),
        };
        diag.final_length = span.len();
        diag.outcome = "resolved";
        if let Some(reference) = self.reference.and_then(|r| r.get(&read_key(&name))) {
            diag.reference_length = Some(reference.len());
            diag.reference_identity = identity(span, reference);
        }

        let (bases, quals) = base::to_fastq(span);
        let definition = fastq::record::Definition::new(name, read1.description().to_vec());
        let record = fastq::Record::new(definition, bases, quals);

        Ok(PairOutcome {
            resolution: Resolution::Resolved(record),
            diagnostics: params.diagnostics.then_some(diag),
        })
    }

    fn fail(&self, reason: FailureReason, mut diag: Diagnostics) -> PairOutcome {
        log::debug!("{}: unresolved, {}", diag.name, reason);
        diag.outcome = reason.as_str();
        PairOutcome {
            resolution: Resolution::Unresolved(reason),
            diagnostics: self.params.diagnostics.then_some(diag),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Cursor;

    fn record(name: &str, seq: &str, qual: &str) -> fastq::Record {
        fastq::Record::new(fastq::record::Definition::new(name, ""), seq, qual)
    }

    // A 10-base fragment, a 6-base hairpin and the first 4 bases of the
    // reverse complement of the fragment, seen from both ends. The first
    // base of read 2 is a low-quality error.
    fn toy_pair() -> (fastq::Record, fastq::Record) {
        (
            record("frag1/1", "ACGTTGCATGTTAGGCCATG", "-IIIIIIIIIIIIIIIIIII"),
            record("frag1/2", "TCGTTGCATGGCCTAACATG", "&IIIIIIIIIIIIIIIIIII"),
        )
    }

    fn toy_params() -> CollapseParams {
        CollapseParams {
            boundary: BoundaryParams {
                hairpin: b"TTAGGC".to_vec(),
                min_matches: 5,
                max_mismatches: 1,
                confident_matches: 6,
                ..Default::default()
            },
            consensus: ConsensusParams {
                min_length: 5,
                ..Default::default()
            },
            diagnostics: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_toy_pair_resolves() {
        let params = toy_params();
        let mut collapser = Collapser::new(&params, None);
        let (r1, r2) = toy_pair();
        let outcome = collapser.process_pair(&r1, &r2).unwrap();

        let record = outcome.record().unwrap();
        assert_eq!(record.name().to_vec(), b"frag1/1".to_vec());
        assert_eq!(record.sequence(), b"CGTTGCATG");
        assert_eq!(record.quality_scores(), b"]]]]]]]]]");

        let diag = outcome.diagnostics.unwrap();
        assert_eq!(diag.hairpin1.start_index, 10);
        assert_eq!(diag.hairpin2.start_index, 10);
        assert_eq!(diag.rc.unwrap().shift, 6);
        assert_eq!(diag.cut_point, 10);
        assert_eq!(diag.naive_mismatches, 1);
        assert_eq!(diag.aligned_mismatches, 1);
        assert_eq!(diag.forward_gaps, 0);
        assert_eq!(diag.reverse_gaps, Some(0));
        assert_eq!(diag.merged_length, 10);
        assert_eq!(diag.bounds, Some((1, 0)));
        assert_eq!(diag.final_length, 9);
        assert_eq!(diag.outcome, "resolved");
    }

    #[test]
    fn test_forward_consensus_prefers_confident_base() {
        let params = toy_params();
        let (r1, r2) = toy_pair();
        let seq1 = base::parse_fastq(b"r1", r1.sequence(), r1.quality_scores()).unwrap();
        let seq2 = base::parse_fastq(b"r2", r2.sequence(), r2.quality_scores()).unwrap();

        let mut aligner = Aligner::new();
        let forward = aligner.approx_align(
            &seq1[..10],
            &seq2[..10],
            params.score.modc_pairs(),
            &params.score.params(FreeEnds::suffixes()),
        );
        let seq = consensus::collapse_aligned(&forward.path, &params.consensus);

        // A at Q12 against T at Q5
        assert_eq!(seq[0], BasePair::new(b'A', 7));
        assert_eq!(base::symbols(&seq), b"ACGTTGCATG".to_vec());
        assert!(seq[1..].iter().all(|bp| bp.confidence() == 60));
    }

    // A 30-base fragment with its 13th base lost from read 2. The gap leaves
    // one read-2 hairpin base hanging past the cut.
    #[test]
    fn test_indel_pair_keeps_hairpin_out() {
        let params = toy_params();
        let mut collapser = Collapser::new(&params, None);
        let r1 = record(
            "indel/1",
            "ACGTTGCATGCCATAGGATCCAGTCAGTTCTTAGGCGAACTGACTGGA",
            &"I".repeat(48),
        );
        let r2 = record(
            "indel/2",
            "ACGTTGCATGCCTAGGATCCAGTCAGTTCGCCTAAGAACTGACTGGA",
            &"I".repeat(47),
        );
        let outcome = collapser.process_pair(&r1, &r2).unwrap();

        let record = outcome.record().unwrap();
        assert_eq!(record.sequence(), b"TAGGATCCAGTCAGTTC");
        assert_eq!(record.quality_scores(), "]".repeat(17).as_bytes());

        let diag = outcome.diagnostics.unwrap();
        assert_eq!(diag.cut_point, 30);
        assert_eq!(diag.rc.unwrap().shift, 18);
        assert_eq!(diag.forward_gaps, 2);
        assert_eq!(diag.reverse_gaps, Some(2));
        // the merge is the fragment itself, the unconfirmed base at Q0
        assert_eq!(diag.merged_length, 30);
        assert_eq!(diag.bounds, Some((13, 0)));
        assert_eq!(diag.final_length, 17);
    }

    #[test]
    fn test_rc_anchor_past_cut() {
        let params = toy_params();
        let mut collapser = Collapser::new(&params, None);
        // hairpin at 2, read 2 overlays read 1 from offset 8
        let r1 = record("late/1", "GATTAGGCACGTCATGCAGT", "IIIIIIIIIIIIIIIIIIII");
        let r2 = record("late/2", "TCATGATGACTGCATGACGT", "IIIIIIIIIIIIIIIIIIII");
        let outcome = collapser.process_pair(&r1, &r2).unwrap();
        assert_eq!(
            outcome.resolution,
            Resolution::Unresolved(FailureReason::NoReverseOverlap)
        );
        let diag = outcome.diagnostics.unwrap();
        assert_eq!(diag.cut_point, 2);
        assert_eq!(diag.rc.unwrap().shift, 8);
        assert_eq!(diag.outcome, "no_reverse_overlap");
    }

    #[test]
    fn test_toy_pair_too_short() {
        let mut params = toy_params();
        params.consensus.min_length = consensus::MIN_RESOLVED_READ_LENGTH;
        let mut collapser = Collapser::new(&params, None);
        let (r1, r2) = toy_pair();
        let outcome = collapser.process_pair(&r1, &r2).unwrap();
        assert_eq!(
            outcome.resolution,
            Resolution::Unresolved(FailureReason::TooShort)
        );
        assert_eq!(outcome.diagnostics.unwrap().outcome, "too_short");
    }

    #[test]
    fn test_no_boundary_emits_nothing() {
        let params = toy_params();
        let mut collapser = Collapser::new(&params, None);
        let r1 = record("junk/1", "AAAAAAAAAAAAAAAAAAAA", "IIIIIIIIIIIIIIIIIIII");
        let r2 = record("junk/2", "AAAAAAAAAAAAAAAAAAAA", "IIIIIIIIIIIIIIIIIIII");
        let outcome = collapser.process_pair(&r1, &r2).unwrap();
        assert!(!outcome.is_resolved());
        assert!(outcome.record().is_none());
        let diag = outcome.diagnostics.unwrap();
        assert_eq!(diag.cut_point, 0);
        assert_eq!(diag.outcome, "cut_undetermined");
    }

    #[test]
    fn test_invalid_record_is_an_error() {
        let params = toy_params();
        let mut collapser = Collapser::new(&params, None);
        let r1 = record("bad/1", "ACGT", "II");
        let r2 = record("bad/2", "ACGT", "IIII");
        let err = collapser.process_pair(&r1, &r2).unwrap_err();
        assert!(err.to_string().contains("bad/1"));
    }

    #[test]
    fn test_diagnostics_disabled() {
        let params = CollapseParams {
            diagnostics: false,
            ..toy_params()
        };
        let mut collapser = Collapser::new(&params, None);
        let (r1, r2) = toy_pair();
        let outcome = collapser.process_pair(&r1, &r2).unwrap();
        assert!(outcome.is_resolved());
        assert!(outcome.diagnostics.is_none());
    }

    #[test]
    fn test_reference_comparison() {
        let fq = "@frag1/1 extra\nCGTTGCTTG\n+\nIIIIIIIII\n@frag2\nACGT\n+\nIIII\n";
        let reference = ReferenceReads::from_reader(Cursor::new(fq)).unwrap();
        assert_eq!(reference.len(), 2);
        assert_eq!(reference.get("frag1"), Some(&b"CGTTGCTTG"[..]));

        let params = toy_params();
        let mut collapser = Collapser::new(&params, Some(&reference));
        let (r1, r2) = toy_pair();
        let diag = collapser.process_pair(&r1, &r2).unwrap().diagnostics.unwrap();
        assert_eq!(diag.reference_length, Some(9));
        assert_relative_eq!(diag.reference_identity.unwrap(), 8.0 / 9.0);

        let row = diag.to_tsv_row();
        assert_eq!(
            row.split('\t').count(),
            Diagnostics::HEADER.split('\t').count()
        );
        assert!(row.starts_with("frag1/1\t20\t10\t6\t0\t10\t6\t0\t6\t"));
        assert!(row.ends_with("\tresolved\t9\t0.8889"));
    }

    #[test]
    fn test_read_key() {
        assert_eq!(read_key(b"frag1/1"), "frag1");
        assert_eq!(read_key(b"frag1/2 1:N:0:ACGT"), "frag1");
        assert_eq!(read_key(b"frag1/3"), "frag1/3");
        assert_eq!(read_key(b""), "");
    }

    #[test]
    fn test_validate() {
        assert!(CollapseParams::default().validate().is_ok());
        let mut params = CollapseParams::default();
        params.boundary.hairpin.clear();
        assert!(params.validate().is_err());
    }
}
