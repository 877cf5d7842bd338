//! Double machine learning on the analysis panel.
//!
//! Partially linear model `y = β·D + g(X) + ε` with `g` and `E[D|X]` learned
//! by cross-fitted nuisance models on spatial, temporal and species identity
//! covariates. Three entry points:
//!
//! - [`dml_ate`]: pooled sample, treatment per the configured definition.
//! - [`dml_event_time`]: one cross-fit per event-time offset with
//!   `1{event_time = k}` as the treatment.
//! - [`dml_subgroups`]: one independent cross-fit per species.
//!
//! Offsets and subgroups that are too small or degenerate are reported as
//! skipped; other failures abort the call.

pub mod crossfit;
pub mod features;
pub mod folds;

use rayon::prelude::*;

use ec_core::{EffectEstimate, EstimateSet, Error, Method, Result, Skipped, StudyConfig, SubKey};
use ec_panel::AnalysisPanel;

pub use crossfit::{CrossFit, CrossFitAudit, PartiallingOut, cross_fit, partialling_out, partially_linear};
pub use features::{FeatureMatrix, FeatureSpace};
pub use folds::{assign_folds, fold_members};

/// Pooled DML estimate with its bookkeeping.
#[derive(Debug, Clone)]
pub struct DmlEstimate {
    /// The effect estimate.
    pub estimate: EffectEstimate,
    /// Rows dropped for missing environmental covariates.
    pub n_excluded: usize,
    /// Cross-fitting audit when `record_audit` is set; indices refer to
    /// positions in the estimation sample.
    pub audit: Option<CrossFitAudit>,
    /// Panel row index of each estimation-sample position.
    pub sample_rows: Vec<usize>,
}

fn stream_seed(seed: u64, stream: u64) -> u64 {
    seed.wrapping_mul(2654435761).wrapping_add(stream)
}

fn run(
    method: Method,
    key: Option<SubKey>,
    m: &FeatureMatrix,
    d: &[f64],
    panel: &AnalysisPanel,
    config: &StudyConfig,
    seed: u64,
) -> Result<DmlEstimate> {
    let y: Vec<f64> = m.rows.iter().map(|&i| panel.rows[i].outcome()).collect();
    let (est, audit) = partially_linear(&m.x, m.p, &y, d, &config.dml, seed)?;
    let estimate = EffectEstimate::normal(method, key, est.beta, est.std_error, est.n_obs, config.confidence_level)?;
    Ok(DmlEstimate { estimate, n_excluded: m.n_excluded, audit, sample_rows: m.rows.clone() })
}

/// Pooled partialling-out ATE of the treatment on occupancy.
pub fn dml_ate(panel: &AnalysisPanel, config: &StudyConfig) -> Result<DmlEstimate> {
    if panel.is_empty() {
        return Err(Error::InsufficientData("DML on an empty panel".into()));
    }
    let space = FeatureSpace::new(panel, &config.dml.features)?;
    let all: Vec<usize> = (0..panel.len()).collect();
    let m = space.matrix(panel, &all);
    let d: Vec<f64> = m
        .rows
        .iter()
        .map(|&i| if panel.rows[i].is_treated(config.treatment_definition) { 1.0 } else { 0.0 })
        .collect();
    let out = run(Method::DmlAte, None, &m, &d, panel, config, config.dml.seed)?;
    log::info!(
        "DML ATE: β = {:.4} (se {:.4}), n = {}, features = {}",
        out.estimate.estimate,
        out.estimate.std_error,
        out.estimate.n_obs,
        space.width()
    );
    Ok(out)
}

fn collect_set(results: Vec<(SubKey, Result<DmlEstimate>)>, what: &str) -> Result<EstimateSet> {
    let mut set = EstimateSet::default();
    for (key, res) in results {
        match res {
            Ok(out) => set.estimates.push(out.estimate),
            Err(e) if e.is_sparse_degeneracy() => {
                log::warn!("DML {what}: {key} skipped: {e}");
                set.skipped.push(Skipped { key, reason: e.to_string() });
            }
            Err(e) => return Err(e),
        }
    }
    Ok(set)
}

/// DML per event-time offset of the configured window (reference excluded).
pub fn dml_event_time(panel: &AnalysisPanel, config: &StudyConfig) -> Result<EstimateSet> {
    config.event_window.validate()?;
    let space = FeatureSpace::new(panel, &config.dml.features)?;
    let all: Vec<usize> = (0..panel.len()).collect();
    let m = space.matrix(panel, &all);

    let results: Vec<(SubKey, Result<DmlEstimate>)> = config
        .event_window
        .offsets()
        .into_par_iter()
        .map(|k| {
            let d: Vec<f64> =
                m.rows.iter().map(|&i| if panel.rows[i].event_time == Some(k) { 1.0 } else { 0.0 }).collect();
            let res = if d.iter().all(|&v| v == 0.0) {
                Err(Error::InsufficientData(format!("no rows at event time {k}")))
            } else {
                run(Method::DmlEventTime, Some(SubKey::Offset(k)), &m, &d, panel, config, config.dml.seed)
            };
            (SubKey::Offset(k), res)
        })
        .collect();
    collect_set(results, "event time")
}

/// Independent DML fit within each species.
///
/// Species with fewer than `min_subgroup_size` rows are skipped. Folds and
/// learner seeds are drawn separately per species.
pub fn dml_subgroups(panel: &AnalysisPanel, config: &StudyConfig) -> Result<EstimateSet> {
    let space = FeatureSpace::new(panel, &config.dml.features)?;
    let species = panel.species();

    let results: Vec<(SubKey, Result<DmlEstimate>)> = species
        .par_iter()
        .enumerate()
        .map(|(s, sp)| {
            let key = SubKey::Subgroup(sp.to_string());
            let rows: Vec<usize> =
                panel.rows.iter().enumerate().filter(|(_, r)| r.species == *sp).map(|(i, _)| i).collect();
            if rows.len() < config.dml.min_subgroup_size {
                let err = Error::InsufficientData(format!(
                    "subgroup has {} rows, minimum is {}",
                    rows.len(),
                    config.dml.min_subgroup_size
                ));
                return (key, Err(err));
            }
            let m = space.matrix(panel, &rows);
            let d: Vec<f64> = m
                .rows
                .iter()
                .map(|&i| if panel.rows[i].is_treated(config.treatment_definition) { 1.0 } else { 0.0 })
                .collect();
            let seed = stream_seed(config.dml.seed, s as u64 + 1);
            (key.clone(), run(Method::DmlSubgroup, Some(key), &m, &d, panel, config, seed))
        })
        .collect();
    collect_set(results, "subgroup")
}
