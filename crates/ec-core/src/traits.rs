//! Core traits
//!
//! Nuisance models used by cross-fitting are polymorphic over one capability:
//! fit on a design and predict on another. Estimators depend on these traits,
//! never on concrete learners.

use crate::Result;

/// A regression learner that can be trained on a row-major design matrix.
pub trait Regressor: Send + Sync {
    /// Fit on `x` (row-major, `n × p`) against `y` (length `n`).
    ///
    /// `seed` drives any internal randomness so that fits are reproducible.
    fn fit(&self, x: &[f64], p: usize, y: &[f64], seed: u64) -> Result<Box<dyn FittedRegressor>>;

    /// Learner name (e.g. "linear", "forest").
    fn name(&self) -> &str;
}

/// A trained model.
pub trait FittedRegressor: Send + Sync {
    /// Predict for every row of `x` (row-major, `m × p`).
    fn predict(&self, x: &[f64], p: usize) -> Result<Vec<f64>>;
}
