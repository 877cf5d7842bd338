//! Staggered-adoption estimator with clean comparisons.
//!
//! For every treatment cohort `g` (units sharing a first treated year) a
//! separate TWFE regression is fit on:
//!
//! - units of cohort `g`, and
//! - comparison units that are never treated or first treated after `g`
//!   (not yet treated).
//!
//! Units treated before `g` never enter cohort `g`'s sample. When
//! `trim_later_cohorts` is set, rows of later cohorts from their own onset
//! year onward are dropped so that they only contribute not-yet-treated years.
//! Cohort ATTs are aggregated with weights proportional to their number of
//! treated observations.
//!
//! # References
//!
//! - Sun & Abraham (2021), "Estimating dynamic treatment effects in event
//!   studies with heterogeneous treatment effects." *Journal of Econometrics*.
//! - Callaway & Sant'Anna (2021), "Difference-in-Differences with multiple
//!   time periods." *Journal of Econometrics*.

use rayon::prelude::*;

use ec_core::{
    EffectEstimate, EstimateSet, Error, Method, Result, Skipped, StaggeredConfig, StudyConfig, SubKey,
};
use ec_panel::{AnalysisPanel, AnalysisPanelRow};
use serde::{Deserialize, Serialize};

use super::twfe::fit_binary_twfe;

/// Rows selected for one cohort regression.
#[derive(Debug, Clone)]
pub struct CohortSample {
    /// Cohort (first treated year).
    pub cohort: i32,
    /// Indices into `panel.rows`.
    pub row_indices: Vec<usize>,
    /// Treated indicator per selected row (cohort member at or after onset).
    pub treated: Vec<bool>,
}

impl CohortSample {
    /// Rows from comparison units.
    pub fn n_comparison_rows(&self, panel: &AnalysisPanel) -> usize {
        self.row_indices.iter().filter(|&&i| panel.rows[i].first_treated_year != Some(self.cohort)).count()
    }

    /// Treated observations.
    pub fn n_treated(&self) -> usize {
        self.treated.iter().filter(|&&t| t).count()
    }
}

/// Select the estimation sample for cohort `g`.
pub fn cohort_sample(panel: &AnalysisPanel, cohort: i32, config: &StaggeredConfig) -> CohortSample {
    let mut row_indices = Vec::new();
    let mut treated = Vec::new();
    for (i, r) in panel.rows.iter().enumerate() {
        let keep = match r.first_treated_year {
            None => true,
            Some(h) if h == cohort => true,
            Some(h) if h > cohort => !config.trim_later_cohorts || r.year < h,
            Some(_) => false,
        };
        if keep {
            row_indices.push(i);
            treated.push(r.first_treated_year == Some(cohort) && r.year >= cohort);
        }
    }
    CohortSample { cohort, row_indices, treated }
}

/// Cohort-specific estimates plus their aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaggeredResult {
    /// Per-cohort ATTs (sub-key [`SubKey::Cohort`]) and skipped cohorts.
    pub cohorts: EstimateSet,
    /// Treated-observation-weighted aggregate ATT.
    pub aggregate: EffectEstimate,
    /// Normalized aggregation weight per estimated cohort.
    pub weights: Vec<(i32, f64)>,
}

struct CohortFit {
    cohort: i32,
    estimate: EffectEstimate,
    n_treated: usize,
    rows: Vec<usize>,
}

fn fit_cohort(panel: &AnalysisPanel, cohort: i32, config: &StudyConfig) -> Result<CohortFit> {
    let sample = cohort_sample(panel, cohort, &config.staggered);
    if sample.n_comparison_rows(panel) == 0 {
        return Err(Error::InsufficientData("no never-treated or not-yet-treated comparison rows".into()));
    }
    if sample.n_treated() == 0 {
        return Err(Error::InsufficientData("no treated observations in the panel".into()));
    }
    let rows: Vec<&AnalysisPanelRow> = sample.row_indices.iter().map(|&i| &panel.rows[i]).collect();
    let d: Vec<f64> = sample.treated.iter().map(|&t| if t { 1.0 } else { 0.0 }).collect();
    let fit = fit_binary_twfe(&rows, &d, config.fixed_effect_entity)?;
    let estimate = EffectEstimate::normal(
        Method::StaggeredCohort,
        Some(SubKey::Cohort(cohort)),
        fit.estimate,
        fit.std_error,
        fit.n_obs,
        config.confidence_level,
    )?;
    Ok(CohortFit { cohort, estimate, n_treated: fit.n_treated, rows: sample.row_indices })
}

/// Cohort ATTs with clean comparisons and their weighted aggregate.
///
/// Cohorts without a valid comparison group or with a degenerate design are
/// reported in `cohorts.skipped`. Any other failure (invalid configuration,
/// numerical breakdown) aborts the call. Fails with
/// [`Error::InsufficientData`] when no cohort can be estimated.
///
/// The aggregate standard error is `sqrt(Σ_g w_g · se_g²)` with normalized
/// weights. It treats cohort estimates as independent and is conservative
/// relative to `sqrt(Σ_g w_g² · se_g²)` since shared comparison units are
/// ignored.
pub fn staggered_att(panel: &AnalysisPanel, config: &StudyConfig) -> Result<StaggeredResult> {
    config.validate()?;
    let cohorts = panel.cohorts();
    if cohorts.is_empty() {
        return Err(Error::InsufficientData("no treated cohorts in the panel".into()));
    }

    let fits: Vec<(i32, Result<CohortFit>)> =
        cohorts.par_iter().map(|&g| (g, fit_cohort(panel, g, config))).collect();

    let mut set = EstimateSet::default();
    let mut ok: Vec<CohortFit> = Vec::new();
    for (g, fit) in fits {
        match fit {
            Ok(f) => ok.push(f),
            Err(e) if e.is_sparse_degeneracy() => {
                log::warn!("staggered: cohort {g} skipped: {e}");
                set.skipped.push(Skipped { key: SubKey::Cohort(g), reason: e.to_string() });
            }
            Err(e) => return Err(e),
        }
    }
    if ok.is_empty() {
        return Err(Error::InsufficientData(format!(
            "no estimable cohort among {} ({} skipped)",
            cohorts.len(),
            set.skipped.len()
        )));
    }

    let total: f64 = ok.iter().map(|f| f.n_treated as f64).sum();
    let weights: Vec<(i32, f64)> = ok.iter().map(|f| (f.cohort, f.n_treated as f64 / total)).collect();
    let att: f64 = ok.iter().zip(&weights).map(|(f, (_, w))| w * f.estimate.estimate).sum();
    let var: f64 = ok.iter().zip(&weights).map(|(f, (_, w))| w * f.estimate.std_error.powi(2)).sum();

    let mut used = vec![false; panel.len()];
    for f in &ok {
        for &i in &f.rows {
            used[i] = true;
        }
    }
    let n_used = used.iter().filter(|&&u| u).count();

    let aggregate =
        EffectEstimate::normal(Method::StaggeredAggregate, None, att, var.sqrt(), n_used, config.confidence_level)?;
    log::info!(
        "staggered: {} cohorts estimated, {} skipped, aggregate ATT = {:.4} (se {:.4})",
        ok.len(),
        set.skipped.len(),
        aggregate.estimate,
        aggregate.std_error
    );
    set.estimates = ok.into_iter().map(|f| f.estimate).collect();

    Ok(StaggeredResult { cohorts: set, aggregate, weights })
}
