//! Signals for where the fragment ends and the hairpin adapter begins.

use crate::libs::base::{self, BasePair, MISSING};

/// Hairpin motif used when none is configured.
pub const DEFAULT_HAIRPIN: &[u8] = b"ACGCCGGCGGCAAGTG";

#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryParams {
    pub hairpin: Vec<u8>,
    /// Floor on exact matches for a hairpin call
    pub min_matches: usize,
    pub max_mismatches: usize,
    /// A hairpin call at or above this many matches overrides the RC estimate
    pub confident_matches: usize,
    /// Mismatches where either base is at or below this Phred score are low-confidence
    pub quality_cutoff: u8,
    pub max_mismatch_fraction: f32,
    pub max_hq_mismatch_fraction: f32,
}

impl Default for BoundaryParams {
    fn default() -> Self {
        Self {
            hairpin: DEFAULT_HAIRPIN.to_vec(),
            min_matches: 12,
            max_mismatches: 2,
            confident_matches: 14,
            quality_cutoff: 20,
            max_mismatch_fraction: 0.30,
            max_hq_mismatch_fraction: 0.065,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HairpinMatch {
    /// Offset of the motif in the read, `NOT_FOUND` when absent
    pub start_index: i32,
    pub match_count: i32,
    /// Read bases covered by a motif truncated at the read end, 0 when the
    /// whole motif fits
    pub suffix_match_length: i32,
}

impl HairpinMatch {
    pub const NOT_FOUND: i32 = -2;

    pub const fn not_found() -> Self {
        Self {
            start_index: Self::NOT_FOUND,
            match_count: 0,
            suffix_match_length: 0,
        }
    }

    pub fn is_found(&self) -> bool {
        self.start_index >= 0
    }
}

/// Best placement of `motif` in `seq`.
///
/// Every start offset is tried, including ones where the motif runs past
/// the end of the read. No-calls count neither way. Among placements with at
/// most `max_mismatches` mismatches and at least `min_matches` matches the one
/// with the most matches wins, the earliest on ties.
pub fn find_hairpin(seq: &[BasePair], motif: &[u8], params: &BoundaryParams) -> HairpinMatch {
    let mut best = HairpinMatch::not_found();
    if motif.is_empty() {
        return best;
    }

    for start in 0..seq.len() {
        let overlap = motif.len().min(seq.len() - start);
        if overlap < params.min_matches {
            break;
        }

        let mut matches = 0;
        let mut mismatches = 0;
        for (bp, &m) in seq[start..start + overlap].iter().zip(motif) {
            if bp.is_missing() || m == MISSING {
                continue;
            }
            if base::equivalent(bp.symbol(), m) {
                matches += 1;
            } else {
                mismatches += 1;
            }
        }

        if mismatches <= params.max_mismatches
            && matches >= params.min_matches
            && matches as i32 > best.match_count
        {
            best = HairpinMatch {
                start_index: start as i32,
                match_count: matches as i32,
                suffix_match_length: if overlap < motif.len() {
                    overlap as i32
                } else {
                    0
                },
            };
        }
    }

    best
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReverseComplementMatch {
    /// `seq1[i]` faces `seq2_rc[i - shift]`
    pub shift: i32,
    pub high_qual_mismatch_count: i32,
    pub high_qual_mismatch_proportion: f32,
    pub total_mismatch_count: i32,
    pub total_mismatch_proportion: f32,
}

/// Finds the offset at which `seq1` overlays the reverse complement of read 2.
///
/// Shifts run from `-(len(seq1) - hairpin_len + 1)` to `len(seq1) / 2`.
/// A shift survives when fewer than 30% of the compared bases mismatch and
/// fewer than 6.5% mismatch with both qualities above the cutoff (both
/// ceilings are configurable). The survivor with the lowest high-quality
/// mismatch proportion wins; the earliest shift keeps ties.
pub fn find_rc_match(
    seq1: &[BasePair],
    seq2_rc: &[BasePair],
    hairpin_len: usize,
    params: &BoundaryParams,
) -> Option<ReverseComplementMatch> {
    let len1 = seq1.len() as i32;
    let len2 = seq2_rc.len() as i32;
    let first = -(len1 - hairpin_len as i32 + 1);
    let last = len1 / 2;

    let mut best: Option<ReverseComplementMatch> = None;
    for shift in first..=last {
        let from = shift.max(0);
        let to = len1.min(len2 + shift);
        if from >= to {
            continue;
        }

        let mut compared = 0;
        let mut total_mm = 0;
        let mut hq_mm = 0;
        for i in from..to {
            let a = &seq1[i as usize];
            let b = &seq2_rc[(i - shift) as usize];
            if a.is_missing() || b.is_missing() {
                continue;
            }
            compared += 1;
            if !base::equivalent(a.symbol(), b.symbol()) {
                total_mm += 1;
                if a.confidence().min(b.confidence()) > params.quality_cutoff {
                    hq_mm += 1;
                }
            }
        }
        if compared == 0 {
            continue;
        }

        let total_prop = total_mm as f32 / compared as f32;
        let hq_prop = hq_mm as f32 / compared as f32;
        if total_prop >= params.max_mismatch_fraction || hq_prop >= params.max_hq_mismatch_fraction {
            continue;
        }

        if best.map_or(true, |b| hq_prop < b.high_qual_mismatch_proportion) {
            best = Some(ReverseComplementMatch {
                shift,
                high_qual_mismatch_count: hq_mm,
                high_qual_mismatch_proportion: hq_prop,
                total_mismatch_count: total_mm,
                total_mismatch_proportion: total_prop,
            });
        }
    }

    best
}

/// Fragment length implied by an RC shift.
///
/// Read 1 is `fragment + hairpin + rc(fragment tail)`, so the fragment tail
/// seen after the hairpin starts at `shift` and the fragment ends at
/// `(shift + len - hairpin_len) / 2`.
pub fn rc_cut_point(shift: i32, trimmed_length: usize, hairpin_len: usize) -> i32 {
    let len = trimmed_length as i32;
    (shift + len - hairpin_len as i32)
        .div_euclid(2)
        .clamp(0, len)
}

/// Combines both hairpin calls and the RC match into one cut point.
///
/// A confident hairpin call wins; when both reads carry one the higher match
/// count is used, read 1 on ties. Without a confident hairpin the RC shift
/// decides. Returns 0 when neither signal is usable.
pub fn resolve_cut_point(
    trimmed_length: usize,
    hairpin1: &HairpinMatch,
    hairpin2: &HairpinMatch,
    rc: Option<&ReverseComplementMatch>,
    params: &BoundaryParams,
) -> i32 {
    let confident =
        |h: &HairpinMatch| h.is_found() && h.match_count >= params.confident_matches as i32;

    let hairpin = match (confident(hairpin1), confident(hairpin2)) {
        (true, true) if hairpin2.match_count > hairpin1.match_count => Some(hairpin2),
        (true, _) => Some(hairpin1),
        (false, true) => Some(hairpin2),
        (false, false) => None,
    };

    if let Some(h) = hairpin {
        h.start_index.min(trimmed_length as i32)
    } else if let Some(m) = rc {
        rc_cut_point(m.shift, trimmed_length, params.hairpin.len())
    } else {
        0
    }
}
