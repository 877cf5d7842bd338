//! # ec-panel
//!
//! Panel construction for disaster/occupancy studies:
//! - sparse (unit, year, species) outcome panel with range filtering,
//! - disaster footprint → (unit, year) treatment panel,
//! - environmental covariate table,
//! - left-join into the analysis panel consumed by the estimators.
//!
//! Builders validate eagerly: structural problems (unknown species, years
//! outside the study period) fail the build, per-record geometry problems are
//! reported and excluded.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Environmental covariates per snapped cell-year.
pub mod covariates;
/// Analysis panel and the outcome/treatment merge.
pub mod merge;
/// Outcome panel builder.
pub mod outcome;
/// Panel construction pipeline.
pub mod pipeline;
/// Input records.
pub mod records;
/// Data-quality warnings.
pub mod report;
/// Treatment assigner.
pub mod treatment;

pub use covariates::{CovariateRequest, CovariateSource, CovariateTable, EnvironmentalCovariates};
pub use merge::{AnalysisPanel, AnalysisPanelRow, PanelSummary, merge_panels};
pub use outcome::{OutcomePanel, PanelRow, build_outcome_panel};
pub use pipeline::{StudyInputs, build_analysis_panel};
pub use records::{DisasterEvent, OccurrenceEvent, RangePolygon};
pub use report::{BuildReport, DataWarning};
pub use treatment::{TreatmentPanel, TreatmentRow, build_treatment_panel};
