use std::fmt;

/// Conditions that abort a whole collapsing run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollapseError {
    /// One paired input ran out of records before the other
    Desynchronized {
        /// Number of complete pairs read before the mismatch
        pairs: u64,
        /// Which input (1 or 2) ended first
        exhausted: u8,
    },
    /// A FASTQ record that cannot be turned into a base/quality sequence
    InvalidRecord { name: String, message: String },
    /// A worker thread died, usually from an aligner invariant violation
    WorkerPanicked(String),
}

impl fmt::Display for CollapseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollapseError::Desynchronized { pairs, exhausted } => write!(
                f,
                "paired inputs are desynchronized: read {} ended after {} pairs while read {} has more records",
                exhausted,
                pairs,
                if *exhausted == 1 { 2 } else { 1 }
            ),
            CollapseError::InvalidRecord { name, message } => {
                write!(f, "invalid FASTQ record {}: {}", name, message)
            }
            CollapseError::WorkerPanicked(msg) => write!(f, "worker thread panicked: {}", msg),
        }
    }
}

impl std::error::Error for CollapseError {}
