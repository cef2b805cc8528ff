use super::align::{AlignParams, FreeEnds, GapPenalty};
use crate::libs::base::{self, BasePair, MISSING};

/// Largest absolute value accepted for any score, so that path scores over
/// long reads stay clear of the aligner's unreachable sentinel.
pub const MAX_SCORE_MAGNITUDE: i32 = 10_000;

/// Substitution and gap scores. Gap values are added to the running score,
/// so they are expected to be zero or negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreParams {
    pub match_score: i32,
    pub mismatch_score: i32,
    /// A modified base opposite its unmodified form
    pub modc_score: i32,
    /// Anything opposite a no-call
    pub missing_score: i32,
    pub gap_open: i32,
    pub gap_extend: i32,
}

impl Default for ScoreParams {
    fn default() -> Self {
        Self {
            match_score: 2,
            mismatch_score: -3,
            modc_score: 1,
            missing_score: 0,
            gap_open: -5,
            gap_extend: -2,
        }
    }
}

impl ScoreParams {
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("match", self.match_score),
            ("mismatch", self.mismatch_score),
            ("modc", self.modc_score),
            ("missing", self.missing_score),
            ("gap open", self.gap_open),
            ("gap extend", self.gap_extend),
        ] {
            if value.unsigned_abs() > MAX_SCORE_MAGNITUDE as u32 {
                anyhow::bail!(
                    "{} score {} exceeds the magnitude limit of {}",
                    name,
                    value,
                    MAX_SCORE_MAGNITUDE
                );
            }
        }
        if self.gap_open > 0 || self.gap_extend > 0 {
            anyhow::bail!(
                "gap penalties must not be positive (open {}, extend {})",
                self.gap_open,
                self.gap_extend
            );
        }
        if self.mismatch_score > self.match_score {
            anyhow::bail!("mismatch score exceeds match score");
        }
        Ok(())
    }

    pub fn gap(&self) -> GapPenalty {
        GapPenalty {
            open: self.gap_open,
            extend: self.gap_extend,
        }
    }

    /// Highest value either scoring function can return.
    pub fn ceiling(&self) -> i32 {
        self.match_score
            .max(self.modc_score)
            .max(self.missing_score)
            .max(self.mismatch_score)
    }

    pub fn params(&self, free_ends: FreeEnds) -> AlignParams {
        AlignParams {
            gap: self.gap(),
            free_ends,
            ceiling: self.ceiling(),
        }
    }

    /// Exact symbol identity.
    pub fn plain(&self, a: u8, b: u8) -> i32 {
        if a == MISSING || b == MISSING {
            self.missing_score
        } else if a == b {
            self.match_score
        } else {
            self.mismatch_score
        }
    }

    /// Methylation-aware: a modified base opposite its unmodified form is a
    /// weaker match rather than a mismatch.
    pub fn modc_aware(&self, a: u8, b: u8) -> i32 {
        if a == MISSING || b == MISSING {
            self.missing_score
        } else if a == b {
            self.match_score
        } else if base::equivalent(a, b) {
            self.modc_score
        } else {
            self.mismatch_score
        }
    }

    pub fn modc_pairs(&self) -> impl Fn(&BasePair, &BasePair) -> i32 + '_ {
        move |a: &BasePair, b: &BasePair| self.modc_aware(a.symbol(), b.symbol())
    }

    pub fn plain_pairs(&self) -> impl Fn(&BasePair, &BasePair) -> i32 + '_ {
        move |a: &BasePair, b: &BasePair| self.plain(a.symbol(), b.symbol())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::base::{MODIFIED, MODIFIED_COMPLEMENT};

    #[test]
    fn test_scores() {
        let s = ScoreParams::default();
        assert_eq!(s.plain(b'A', b'A'), 2);
        assert_eq!(s.plain(b'C', MODIFIED), -3);
        assert_eq!(s.modc_aware(b'C', MODIFIED), 1);
        assert_eq!(s.modc_aware(MODIFIED_COMPLEMENT, b'G'), 1);
        assert_eq!(s.modc_aware(b'N', b'G'), 0);
        assert_eq!(s.modc_aware(b'A', b'G'), -3);
        assert_eq!(s.ceiling(), 2);
    }

    #[test]
    fn test_validate() {
        assert!(ScoreParams::default().validate().is_ok());
        let bad = ScoreParams {
            gap_open: 3,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let huge = ScoreParams {
            gap_open: -300_000_000,
            ..Default::default()
        };
        let err = huge.validate().unwrap_err();
        assert!(err.to_string().contains("gap open score"));

        let edge = ScoreParams {
            gap_open: -MAX_SCORE_MAGNITUDE,
            mismatch_score: i32::MIN,
            ..Default::default()
        };
        assert!(edge.validate().is_err());
        assert!(ScoreParams {
            mismatch_score: -MAX_SCORE_MAGNITUDE,
            ..Default::default()
        }
        .validate()
        .is_ok());
    }
}
