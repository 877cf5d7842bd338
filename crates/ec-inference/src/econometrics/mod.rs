//! Fixed-effects panel estimators.
//!
//! - [`hdfe`]: absorption of one or more fixed-effect dimensions.
//! - [`ols`]: within least squares with cluster-robust standard errors.
//! - [`twfe`]: static TWFE and the unit-FE event study.
//! - [`staggered`]: cohort-specific ATTs with clean comparisons.

pub mod hdfe;
pub mod ols;
pub mod staggered;
pub mod twfe;

pub use hdfe::FixedEffectsAbsorber;
pub use ols::{WithinFit, cluster_robust_se, within_ols};
pub use staggered::{CohortSample, StaggeredResult, cohort_sample, staggered_att};
pub use twfe::{EventStudyResult, event_study, twfe_static};
