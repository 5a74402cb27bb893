//!
//! Error taxonomy of the likelihood core
//!
//! Numeric edge cases (probabilities below representable precision) are
//! clamped at the call site and never surface as errors.
//!
use std::fmt;

///
/// Errors raised by parsing, compression and likelihood evaluation.
///
/// An error during evaluation of a *proposed* state is expected to be
/// treated by the caller as a rejection (log-likelihood of negative
/// infinity), not as a crash. Nothing in this crate retries.
///
#[derive(Debug, Clone, PartialEq)]
pub enum PhyloError {
    /// Malformed symbol/state string, wrong field count, or counts
    /// inconsistent with a declared population size.
    DataFormat(String),
    /// Operation between incompatible state spaces or sizes, more than two
    /// alleles committed to a biallelic Pomo model, or a substitution model
    /// whose dimension disagrees with the declared state count.
    ModelConstraint(String),
    /// Out-of-range bit/state/node index. A programming-contract violation,
    /// not a user-input problem.
    Index { index: usize, len: usize },
}

impl fmt::Display for PhyloError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataFormat(msg) => write!(f, "data format error: {}", msg),
            Self::ModelConstraint(msg) => write!(f, "model constraint error: {}", msg),
            Self::Index { index, len } => {
                write!(f, "index {} out of bounds for length {}", index, len)
            }
        }
    }
}

impl std::error::Error for PhyloError {}

pub type Result<T> = std::result::Result<T, PhyloError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let e = PhyloError::DataFormat("bad symbol 'J'".to_string());
        assert_eq!(e.to_string(), "data format error: bad symbol 'J'");
        let e = PhyloError::Index { index: 5, len: 4 };
        assert_eq!(e.to_string(), "index 5 out of bounds for length 4");
    }
}
