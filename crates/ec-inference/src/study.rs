//! Run every estimator over one immutable analysis panel.

use ec_core::{EffectEstimate, EstimateSet, Result, StudyConfig};
use ec_panel::{AnalysisPanel, PanelSummary};

use crate::dml::{DmlEstimate, dml_ate, dml_event_time, dml_subgroups};
use crate::econometrics::{EventStudyResult, StaggeredResult, event_study, staggered_att, twfe_static};

/// Outcome of each estimator. A failure in one leaves the others intact.
#[derive(Debug)]
pub struct StudyResults {
    /// Panel the estimators ran on.
    pub summary: PanelSummary,
    /// Static TWFE.
    pub twfe: Result<EffectEstimate>,
    /// Dynamic event study.
    pub event_study: Result<EventStudyResult>,
    /// Pooled DML.
    pub dml: Result<DmlEstimate>,
    /// DML per event-time offset.
    pub dml_event_time: Result<EstimateSet>,
    /// DML per species.
    pub dml_subgroups: Result<EstimateSet>,
    /// Staggered cohort ATTs and aggregate.
    pub staggered: Result<StaggeredResult>,
}

impl StudyResults {
    /// Every successful estimate, in a fixed method order.
    pub fn estimates(&self) -> Vec<EffectEstimate> {
        let mut out = Vec::new();
        if let Ok(e) = &self.twfe {
            out.push(e.clone());
        }
        if let Ok(es) = &self.event_study {
            out.extend(es.estimates.iter().cloned());
        }
        if let Ok(d) = &self.dml {
            out.push(d.estimate.clone());
        }
        for set in [&self.dml_event_time, &self.dml_subgroups].into_iter().flatten() {
            out.extend(set.estimates.iter().cloned());
        }
        if let Ok(s) = &self.staggered {
            out.extend(s.cohorts.estimates.iter().cloned());
            out.push(s.aggregate.clone());
        }
        out
    }

    /// `(estimator, error message)` for every estimator that failed.
    pub fn failures(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        let mut note = |name: &'static str, err: Option<String>| {
            if let Some(e) = err {
                out.push((name, e));
            }
        };
        note("twfe", self.twfe.as_ref().err().map(ToString::to_string));
        note("event_study", self.event_study.as_ref().err().map(ToString::to_string));
        note("dml", self.dml.as_ref().err().map(ToString::to_string));
        note("dml_event_time", self.dml_event_time.as_ref().err().map(ToString::to_string));
        note("dml_subgroups", self.dml_subgroups.as_ref().err().map(ToString::to_string));
        note("staggered", self.staggered.as_ref().err().map(ToString::to_string));
        out
    }
}

/// Validate `config` and run all estimators in parallel.
pub fn run_study(panel: &AnalysisPanel, config: &StudyConfig) -> Result<StudyResults> {
    config.validate()?;
    let summary = panel.summary();
    log::info!(
        "study: {} rows, {} units, {} species, {} treated units, cohorts {:?}",
        summary.n_rows,
        summary.n_units,
        summary.n_species,
        summary.n_treated_units,
        summary.cohorts
    );

    let ((twfe, event_study), ((dml, dml_event_time), (dml_subgroups, staggered))) = rayon::join(
        || rayon::join(|| twfe_static(panel, config), || event_study(panel, config)),
        || {
            rayon::join(
                || rayon::join(|| dml_ate(panel, config), || dml_event_time(panel, config)),
                || rayon::join(|| dml_subgroups(panel, config), || staggered_att(panel, config)),
            )
        },
    );

    let results = StudyResults { summary, twfe, event_study, dml, dml_event_time, dml_subgroups, staggered };
    for (name, err) in results.failures() {
        log::warn!("study: {name} failed: {err}");
    }
    Ok(results)
}
