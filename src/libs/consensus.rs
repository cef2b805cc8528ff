//! Collapsing two observations of one fragment into a single read.

use crate::libs::base::{self, BasePair, MISSING};
use itertools::{EitherOrBoth, Itertools};
use std::fmt;
use std::str::FromStr;

/// Shortest consensus worth emitting.
pub const MIN_RESOLVED_READ_LENGTH: usize = 20;

/// One column of a pairwise alignment or of a naive zip.
pub type Column = (Option<BasePair>, Option<BasePair>);

/// How the naive merge settles two disagreeing bases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CapPolicy {
    /// Keep the first source's base, with its confidence capped
    #[default]
    CapByFirst,
    /// Keep the more confident base (the first on ties), capped
    HigherQuality,
    /// Emit a no-call
    NoCall,
}

impl FromStr for CapPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "cap-by-first" => Ok(CapPolicy::CapByFirst),
            "higher-quality" => Ok(CapPolicy::HigherQuality),
            "no-call" => Ok(CapPolicy::NoCall),
            _ => Err(anyhow::anyhow!("unknown cap policy: {}", s)),
        }
    }
}

impl fmt::Display for CapPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CapPolicy::CapByFirst => "cap-by-first",
            CapPolicy::HigherQuality => "higher-quality",
            CapPolicy::NoCall => "no-call",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsensusParams {
    /// Ceiling on the summed confidence of two agreeing bases
    pub agree_ceiling: u8,
    /// Ceiling on the confidence of a base kept over a disagreement in the merge
    pub disagree_ceiling: u8,
    pub cap_policy: CapPolicy,
    /// Quality floor for end trimming
    pub min_quality: u8,
    pub min_length: usize,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            agree_ceiling: 60,
            disagree_ceiling: 10,
            cap_policy: CapPolicy::CapByFirst,
            min_quality: 10,
            min_length: MIN_RESOLVED_READ_LENGTH,
        }
    }
}

/// A collapsed sequence and, when resolved, how many bases to clip from
/// each end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusResult {
    pub seq: Vec<BasePair>,
    pub bounds: Option<(usize, usize)>,
}

impl ConsensusResult {
    pub fn new(seq: Vec<BasePair>, params: &ConsensusParams) -> Self {
        let bounds = quality_trim(&seq, params);
        Self { seq, bounds }
    }

    pub fn is_resolved(&self) -> bool {
        self.bounds.is_some()
    }

    pub fn clipped(&self) -> Option<&[BasePair]> {
        self.bounds
            .map(|(prefix, suffix)| &self.seq[prefix..self.seq.len() - suffix])
    }
}

enum Sides<'a> {
    Both(&'a BasePair, &'a BasePair),
    Single(Option<BasePair>),
}

// A no-call side carries no information and yields to the other one.
fn sides(col: &Column) -> Sides<'_> {
    match col {
        (Some(a), Some(b)) if a.is_missing() => Sides::Single(Some(*b)),
        (Some(a), Some(b)) if b.is_missing() => Sides::Single(Some(*a)),
        (Some(a), Some(b)) => Sides::Both(a, b),
        (Some(a), None) => Sides::Single(Some(*a)),
        (None, Some(b)) => Sides::Single(Some(*b)),
        (None, None) => Sides::Single(None),
    }
}

/// Methylation-aware collapse of an aligned pair of reads.
///
/// Agreeing bases (a modified cytosine counts as agreeing with cytosine)
/// sum their confidences up to `agree_ceiling`. On disagreement the more
/// confident base survives with the difference of the two confidences;
/// equally confident disagreements become a no-call. A base facing a gap
/// keeps its place with confidence 0, so it survives only if the merge
/// confirms it.
pub fn collapse_aligned(columns: &[Column], params: &ConsensusParams) -> Vec<BasePair> {
    columns
        .iter()
        .filter_map(|col| match (col, sides(col)) {
            ((Some(bp), None) | (None, Some(bp)), _) => Some(BasePair::new(bp.symbol(), 0)),
            (_, Sides::Single(single)) => single,
            (_, Sides::Both(a, b)) => {
                let (qa, qb) = (a.confidence(), b.confidence());
                let bp = if base::equivalent(a.symbol(), b.symbol()) {
                    BasePair::new(
                        base::resolve_agreement(a.symbol(), b.symbol()),
                        qa.saturating_add(qb).min(params.agree_ceiling),
                    )
                } else if qa > qb {
                    BasePair::new(a.symbol(), qa - qb)
                } else if qb > qa {
                    BasePair::new(b.symbol(), qb - qa)
                } else {
                    BasePair::new(MISSING, 0)
                };
                Some(bp)
            }
        })
        .collect()
}

/// Drops the trailing run of gap columns, the part of one read that runs
/// past the end of the other.
pub fn without_overhang(columns: &[Column]) -> &[Column] {
    let end = columns
        .iter()
        .rposition(|col| matches!(col, (Some(_), Some(_))))
        .map_or(0, |i| i + 1);
    &columns[..end]
}

/// Pairs two sequences position by position starting from their ends.
///
/// Leading columns where only `second` has a base are dropped, so the result
/// starts with the first base of `first`.
pub fn zip_from_end(first: &[BasePair], second: &[BasePair]) -> Vec<Column> {
    let mut columns: Vec<Column> = first
        .iter()
        .rev()
        .zip_longest(second.iter().rev())
        .map(|pair| match pair {
            EitherOrBoth::Both(a, b) => (Some(*a), Some(*b)),
            EitherOrBoth::Left(a) => (Some(*a), None),
            EitherOrBoth::Right(b) => (None, Some(*b)),
        })
        .collect();

    while matches!(columns.last(), Some((None, _))) {
        columns.pop();
    }
    columns.reverse();
    columns
}

/// Position-wise merge of two consensus sequences, no indel search.
///
/// Agreeing bases keep the higher confidence. Disagreements follow the
/// configured [`CapPolicy`] and never exceed `disagree_ceiling`.
pub fn collapse_naive(columns: &[Column], params: &ConsensusParams) -> Vec<BasePair> {
    columns
        .iter()
        .filter_map(|col| match sides(col) {
            Sides::Single(single) => single,
            Sides::Both(a, b) => {
                let (qa, qb) = (a.confidence(), b.confidence());
                let bp = if base::equivalent(a.symbol(), b.symbol()) {
                    BasePair::new(base::resolve_agreement(a.symbol(), b.symbol()), qa.max(qb))
                } else {
                    match params.cap_policy {
                        CapPolicy::CapByFirst => {
                            BasePair::new(a.symbol(), qa.min(params.disagree_ceiling))
                        }
                        CapPolicy::HigherQuality => {
                            let kept = if qb > qa { b } else { a };
                            BasePair::new(kept.symbol(), kept.confidence().min(params.disagree_ceiling))
                        }
                        CapPolicy::NoCall => BasePair::new(MISSING, 0),
                    }
                };
                Some(bp)
            }
        })
        .collect()
}

/// Clip bounds `(prefix_trim, suffix_trim)` keeping the longest run of bases
/// at or above the quality floor, the earliest on ties.
///
/// Returns `None` when that run is shorter than `min_length`.
pub fn quality_trim(seq: &[BasePair], params: &ConsensusParams) -> Option<(usize, usize)> {
    let mut best = (0, 0);
    let mut start = None;
    for (i, bp) in seq.iter().enumerate() {
        if bp.confidence() >= params.min_quality {
            start.get_or_insert(i);
        } else if let Some(s) = start.take() {
            if i - s > best.1 - best.0 {
                best = (s, i);
            }
        }
    }
    if let Some(s) = start {
        if seq.len() - s > best.1 - best.0 {
            best = (s, seq.len());
        }
    }

    if best.1 - best.0 < params.min_length.max(1) {
        None
    } else {
        Some((best.0, seq.len() - best.1))
    }
}
