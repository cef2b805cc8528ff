pub mod align;
pub mod score;

pub use align::{AlignParams, Aligner, Alignment, FreeEnds, GapPenalty, Track};
pub use score::ScoreParams;
