//! Error taxonomy shared by every layer of the estimation engine.

use thiserror::Error;

/// Engine error type.
///
/// The first four variants follow the failure classes the pipeline reports:
/// structural input problems ([`Error::Data`]), per-record geometry problems
/// ([`Error::Geometry`]), rank-deficient fixed-effects designs
/// ([`Error::Singularity`]) and work units too small to estimate
/// ([`Error::InsufficientData`]).
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or inconsistent input (unknown species, out-of-range year, ...).
    #[error("Data error: {0}")]
    Data(String),

    /// Invalid or self-intersecting polygon.
    #[error("Geometry error: {0}")]
    Geometry(String),

    /// Rank-deficient design after fixed-effects absorption.
    #[error("Singular design: {0}")]
    Singularity(String),

    /// A fold, cohort, offset or subgroup is below the configured minimum size.
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// Invalid argument or configuration value.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Numerical failure not covered by the classes above.
    #[error("Computation error: {0}")]
    Computation(String),

    /// JSON parsing error (configuration).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// `true` for failures that only affect one unit of work (a fold, cohort,
    /// offset or subgroup) and may be skipped by an aggregating caller.
    pub fn is_sparse_degeneracy(&self) -> bool {
        matches!(self, Error::InsufficientData(_) | Error::Singularity(_))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_degeneracy_classes() {
        assert!(Error::InsufficientData("fold 2".into()).is_sparse_degeneracy());
        assert!(Error::Singularity("cohort 2004".into()).is_sparse_degeneracy());
        assert!(!Error::Data("unknown species".into()).is_sparse_degeneracy());
        assert!(!Error::Validation("k".into()).is_sparse_degeneracy());
    }

    #[test]
    fn display_carries_cause() {
        let e = Error::Data("species 'x' not in roster".into());
        assert_eq!(e.to_string(), "Data error: species 'x' not in roster");
    }
}
