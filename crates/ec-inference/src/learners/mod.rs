//! Nuisance learners for cross-fitting.

pub mod forest;
pub mod linear;

use ec_core::{LearnerConfig, Regressor};

pub use forest::{ForestParams, ForestRegressor};
pub use linear::RidgeRegressor;

/// Instantiate the learner described by `config`.
pub fn learner_from_config(config: &LearnerConfig) -> Box<dyn Regressor> {
    match *config {
        LearnerConfig::Linear { ridge } => Box::new(RidgeRegressor::new(ridge)),
        LearnerConfig::Forest { n_trees, max_depth, min_samples_leaf, max_features } => {
            Box::new(ForestRegressor::new(ForestParams { n_trees, max_depth, min_samples_leaf, max_features }))
        }
    }
}
