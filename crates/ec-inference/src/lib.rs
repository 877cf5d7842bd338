//! # ec-inference
//!
//! Effect estimators over the analysis panel.
//!
//! - Static two-way fixed effects and the unit-FE event study with
//!   cluster-robust inference ([`econometrics`]).
//! - Staggered-adoption cohort ATTs with clean comparisons
//!   ([`econometrics::staggered`]).
//! - Cross-fitted double machine learning with pluggable nuisance learners
//!   ([`dml`], [`learners`]).
//! - A runner that executes all of them in parallel on one panel ([`study`]).

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Cross-fitted DML estimators.
pub mod dml;
/// Fixed-effects estimators (TWFE, event study, staggered cohorts).
pub mod econometrics;
/// Ridge and random-forest nuisance learners.
pub mod learners;
/// Parallel study runner.
pub mod study;

pub use dml::{CrossFitAudit, DmlEstimate, dml_ate, dml_event_time, dml_subgroups};
pub use econometrics::{EventStudyResult, StaggeredResult, event_study, staggered_att, twfe_static};
pub use learners::{ForestRegressor, RidgeRegressor, learner_from_config};
pub use study::{StudyResults, run_study};
