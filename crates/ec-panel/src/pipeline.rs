//! End-to-end panel construction: tiling → outcome ‖ treatment → merge.

use ec_core::{Result, SpeciesId, StudyConfig};
use ec_geo::SpatialIndex;

use crate::covariates::CovariateTable;
use crate::merge::{AnalysisPanel, merge_panels};
use crate::outcome::OutcomePanel;
use crate::records::{DisasterEvent, OccurrenceEvent, RangePolygon};
use crate::treatment::TreatmentPanel;

/// Cleaned inputs handed over by the data collaborators.
#[derive(Debug, Clone, Default)]
pub struct StudyInputs {
    /// Declared species roster.
    pub roster: Vec<SpeciesId>,
    /// Occurrence records.
    pub occurrences: Vec<OccurrenceEvent>,
    /// Range polygons, at most one per species.
    pub ranges: Vec<RangePolygon>,
    /// Disaster records.
    pub disasters: Vec<DisasterEvent>,
    /// Optional environmental covariates.
    pub covariates: Option<CovariateTable>,
}

/// Build the analysis panel for one configuration.
///
/// The outcome and treatment panels are built concurrently over the shared,
/// read-only index; either failing aborts the build.
pub fn build_analysis_panel(
    index: &SpatialIndex,
    inputs: &StudyInputs,
    config: &StudyConfig,
) -> Result<AnalysisPanel> {
    config.validate()?;
    let (outcome, treatment) = rayon::join(
        || {
            OutcomePanel::from_config(
                index,
                &inputs.roster,
                &inputs.occurrences,
                &inputs.ranges,
                config,
            )
        },
        || TreatmentPanel::from_config(index, &inputs.disasters, config),
    );
    let panel = merge_panels(&outcome?, &treatment?, index, inputs.covariates.as_ref())?;
    let s = panel.summary();
    log::info!(
        "analysis panel: {} rows, {} units, {} species, {} years, {} treated units in {} cohorts",
        s.n_rows,
        s.n_units,
        s.n_species,
        s.n_years,
        s.n_treated_units,
        s.cohorts.len()
    );
    Ok(panel)
}
