//! Static two-way fixed effects and the dynamic event study.
//!
//! Static model: `y_it = α_i + λ_t + β·D_it + ε_it`, with `α_i` absorbed per
//! unit (or unit × species) and `λ_t` per year. Dynamic model:
//! `y_it = α_i + Σ_k δ_k·1{event_time = k} + ε_it` with unit effects only and
//! one indicator per non-reference offset in the window. Never-treated rows
//! and rows outside the window carry no indicator.
//!
//! Inference is cluster-robust by unit with absorbed degrees of freedom in
//! the small-sample correction.
//!
//! # References
//!
//! - Angrist & Pischke, *Mostly Harmless Econometrics*, Ch. 5.
//! - Borusyak, Jaravel & Spiess (2024), "Revisiting Event-Study Designs."

use ec_core::{
    EffectEstimate, Error, FixedEffectEntity, Method, Result, SpeciesId, StudyConfig, SubKey, UnitId,
};
use ec_panel::{AnalysisPanel, AnalysisPanelRow};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use super::hdfe::{FixedEffectsAbsorber, dense_levels};
use super::ols::within_ols;

/// Coefficient on a single binary regressor after absorbing entity and year effects.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BinaryFit {
    pub estimate: f64,
    pub std_error: f64,
    pub n_obs: usize,
    pub n_treated: usize,
    pub n_clusters: usize,
}

fn entity_levels(rows: &[&AnalysisPanelRow], entity: FixedEffectEntity) -> Vec<usize> {
    match entity {
        FixedEffectEntity::Unit => dense_levels(&rows.iter().map(|r| r.unit).collect::<Vec<_>>()),
        FixedEffectEntity::UnitSpecies => dense_levels(
            &rows.iter().map(|r| (r.unit, r.species.clone())).collect::<Vec<(UnitId, SpeciesId)>>(),
        ),
    }
}

fn unit_clusters(rows: &[&AnalysisPanelRow]) -> Vec<usize> {
    dense_levels(&rows.iter().map(|r| r.unit).collect::<Vec<_>>())
}

/// Regress the outcome on `d` with entity and year effects absorbed.
pub(crate) fn fit_binary_twfe(
    rows: &[&AnalysisPanelRow],
    d: &[f64],
    entity: FixedEffectEntity,
) -> Result<BinaryFit> {
    let n = rows.len();
    if n == 0 {
        return Err(Error::InsufficientData("no observations".into()));
    }
    let years = dense_levels(&rows.iter().map(|r| r.year).collect::<Vec<_>>());
    let absorber = FixedEffectsAbsorber::new(vec![entity_levels(rows, entity), years])?;

    let y: Vec<f64> = rows.iter().map(|r| r.outcome()).collect();
    let y_dm = absorber.partial_out(&y)?;
    let d_dm = absorber.partial_out(d)?;
    if !absorber.has_within_variation(d, &d_dm) {
        return Err(Error::Singularity(
            "treatment indicator has no variation within entity and year".into(),
        ));
    }

    let x = DMatrix::from_column_slice(n, 1, &d_dm);
    let fit = within_ols(&x, &DVector::from_vec(y_dm), &unit_clusters(rows), absorber.absorbed_dof())?;
    Ok(BinaryFit {
        estimate: fit.coefficients[0],
        std_error: fit.std_errors[0],
        n_obs: fit.n_obs,
        n_treated: d.iter().filter(|&&v| v != 0.0).count(),
        n_clusters: fit.n_clusters,
    })
}

/// Static TWFE estimate of the treatment effect on occupancy.
///
/// Fails with [`Error::Singularity`] when the treatment indicator is
/// collinear with the fixed effects (e.g. every unit treated in the same year
/// or no unit treated).
pub fn twfe_static(panel: &AnalysisPanel, config: &StudyConfig) -> Result<EffectEstimate> {
    let rows: Vec<&AnalysisPanelRow> = panel.rows.iter().collect();
    let d: Vec<f64> =
        rows.iter().map(|r| if r.is_treated(config.treatment_definition) { 1.0 } else { 0.0 }).collect();
    let fit = fit_binary_twfe(&rows, &d, config.fixed_effect_entity)?;
    log::info!(
        "static TWFE: β = {:.4} (se {:.4}), n = {}, treated rows = {}",
        fit.estimate,
        fit.std_error,
        fit.n_obs,
        fit.n_treated
    );
    EffectEstimate::normal(
        Method::TwfeStatic,
        None,
        fit.estimate,
        fit.std_error,
        fit.n_obs,
        config.confidence_level,
    )
}

/// Dynamic event-study coefficients, one per non-reference offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventStudyResult {
    /// Estimates ordered by offset; sub-key is [`SubKey::Offset`].
    pub estimates: Vec<EffectEstimate>,
    /// Omitted reference offset.
    pub reference: i32,
    /// Observations used.
    pub n_obs: usize,
    /// Unit clusters.
    pub n_clusters: usize,
}

impl EventStudyResult {
    /// Estimate at `offset`, if in the window.
    pub fn at(&self, offset: i32) -> Option<&EffectEstimate> {
        self.estimates.iter().find(|e| e.sub_key == Some(SubKey::Offset(offset)))
    }
}

/// Event-study regression with unit fixed effects and event-time indicators.
///
/// Offsets without identifying variation make the design rank-deficient and
/// fail with [`Error::Singularity`] naming them.
pub fn event_study(panel: &AnalysisPanel, config: &StudyConfig) -> Result<EventStudyResult> {
    let window = &config.event_window;
    window.validate()?;
    let rows: Vec<&AnalysisPanelRow> = panel.rows.iter().collect();
    let n = rows.len();
    if n == 0 {
        return Err(Error::InsufficientData("event study on an empty panel".into()));
    }

    let offsets = window.offsets();
    let k = offsets.len();
    let mut cols: Vec<Vec<f64>> = vec![vec![0.0; n]; k];
    for (i, r) in rows.iter().enumerate() {
        if let Some(pos) = r.event_time.and_then(|e| offsets.binary_search(&e).ok()) {
            cols[pos][i] = 1.0;
        }
    }

    let absorber = FixedEffectsAbsorber::new(vec![entity_levels(&rows, config.fixed_effect_entity)])?;
    let y: Vec<f64> = rows.iter().map(|r| r.outcome()).collect();
    let y_dm = absorber.partial_out(&y)?;
    let mut cols_dm = Vec::with_capacity(k);
    let mut unsupported = Vec::new();
    for (col, &offset) in cols.iter().zip(&offsets) {
        let col_dm = absorber.partial_out(col)?;
        if !absorber.has_within_variation(col, &col_dm) {
            unsupported.push(offset);
        }
        cols_dm.push(col_dm);
    }
    if !unsupported.is_empty() {
        return Err(Error::Singularity(format!(
            "event-time offsets {unsupported:?} have no within-unit variation"
        )));
    }

    let mut x = DMatrix::zeros(n, k);
    for (j, col) in cols_dm.iter().enumerate() {
        x.set_column(j, &DVector::from_column_slice(col));
    }
    let fit = within_ols(&x, &DVector::from_vec(y_dm), &unit_clusters(&rows), absorber.absorbed_dof())
        .map_err(|e| match e {
            Error::Singularity(msg) => {
                Error::Singularity(format!("event-time indicators are collinear: {msg}"))
            }
            other => other,
        })?;

    let estimates = offsets
        .iter()
        .enumerate()
        .map(|(j, &offset)| {
            EffectEstimate::normal(
                Method::EventStudy,
                Some(SubKey::Offset(offset)),
                fit.coefficients[j],
                fit.std_errors[j],
                fit.n_obs,
                config.confidence_level,
            )
        })
        .collect::<Result<Vec<_>>>()?;
    log::info!("event study: {k} offsets, n = {}, clusters = {}", fit.n_obs, fit.n_clusters);

    Ok(EventStudyResult { estimates, reference: window.reference, n_obs: fit.n_obs, n_clusters: fit.n_clusters })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ec_core::{EventWindow, TreatmentDefinition};

    fn row(unit: u32, year: i32, occupied: bool, first: Option<i32>) -> AnalysisPanelRow {
        AnalysisPanelRow {
            unit: UnitId::from_row_col(0, unit),
            year,
            species: SpeciesId::new("sp"),
            count: u32::from(occupied),
            occupied,
            treated: first == Some(year),
            intensity: if first == Some(year) { 1.0 } else { 0.0 },
            first_treated_year: first,
            event_time: first.map(|g| year - g),
            lon: f64::from(unit),
            lat: 0.0,
            env: Default::default(),
        }
    }

    fn panel(rows: Vec<AnalysisPanelRow>) -> AnalysisPanel {
        AnalysisPanel::from_rows(rows).unwrap()
    }

    #[test]
    fn all_treated_same_year_is_singular() {
        let mut rows = Vec::new();
        for u in 0..3 {
            for y in 2000..2003 {
                rows.push(row(u, y, y >= 2001, Some(2001)));
            }
        }
        let err = twfe_static(&panel(rows), &StudyConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Singularity(_)));
    }

    #[test]
    fn never_treated_panel_is_singular() {
        let rows = (0..3).flat_map(|u| (2000..2003).map(move |y| row(u, y, u == 1, None))).collect();
        assert!(twfe_static(&panel(rows), &StudyConfig::default()).is_err());
    }

    #[test]
    fn contemporaneous_definition_uses_footprint_years() {
        // Unit 0 treated once in 2001; outcome responds only that year.
        let mut rows = Vec::new();
        for u in 0..4 {
            for y in 2000..2004 {
                let first = (u == 0).then_some(2001);
                rows.push(row(u, y, u == 0 && y == 2001, first));
            }
        }
        let config =
            StudyConfig { treatment_definition: TreatmentDefinition::Contemporaneous, ..Default::default() };
        let est = twfe_static(&panel(rows), &config).unwrap();
        assert!((est.estimate - 1.0).abs() < 1e-6);
    }

    #[test]
    fn unit_species_effects_cluster_by_unit() {
        // Units 0-1 treated from 2001, units 2-3 never treated. In control
        // units species "b" is always present and "a" never is.
        let mut rows = Vec::new();
        for u in 0..4 {
            let first = (u < 2).then_some(2001);
            for y in 2000..2003 {
                for sp in ["a", "b"] {
                    let occupied = match first {
                        Some(g) => y >= g,
                        None => sp == "b",
                    };
                    rows.push(AnalysisPanelRow { species: SpeciesId::new(sp), ..row(u, y, occupied, first) });
                }
            }
        }
        let data = panel(rows);
        let all: Vec<&AnalysisPanelRow> = data.rows.iter().collect();
        let d: Vec<f64> =
            all.iter().map(|r| f64::from(u8::from(r.is_treated(TreatmentDefinition::Absorbing)))).collect();

        let fit = fit_binary_twfe(&all, &d, FixedEffectEntity::UnitSpecies).unwrap();
        assert!((fit.estimate - 1.0).abs() < 1e-6);
        assert_eq!(fit.n_obs, 24);
        assert_eq!(fit.n_clusters, 4);

        let config = StudyConfig { fixed_effect_entity: FixedEffectEntity::UnitSpecies, ..Default::default() };
        let est = twfe_static(&data, &config).unwrap();
        assert!((est.estimate - 1.0).abs() < 1e-6);
        assert!(est.ci_lower > 0.0);
    }

    #[test]
    fn inverted_event_window_is_rejected() {
        let rows = (0..2).flat_map(|u| (2000..2003).map(move |y| row(u, y, false, None))).collect();
        let config = StudyConfig {
            event_window: EventWindow { lower: 2, upper: -2, reference: -1 },
            ..Default::default()
        };
        let err = event_study(&panel(rows), &config).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn event_study_recovers_dynamic_path() {
        // Cohorts 2003 and 2005 plus never-treated units, years 2000..2008.
        // y = 1 exactly one and two years after onset.
        let mut rows = Vec::new();
        for u in 0..9 {
            let first = match u % 3 {
                0 => Some(2003),
                1 => Some(2005),
                _ => None,
            };
            for y in 2000..2009 {
                let e = first.map(|g| y - g);
                rows.push(row(u, y, matches!(e, Some(1) | Some(2)), first));
            }
        }
        let config = StudyConfig {
            event_window: EventWindow { lower: -2, upper: 2, reference: -1 },
            ..Default::default()
        };
        let res = event_study(&panel(rows), &config).unwrap();
        assert_eq!(res.estimates.len(), 4);
        assert_eq!(res.reference, -1);
        assert!(res.at(-1).is_none());
        assert!((res.at(1).unwrap().estimate - 1.0).abs() < 1e-6);
        assert!((res.at(2).unwrap().estimate - 1.0).abs() < 1e-6);
        assert!(res.at(0).unwrap().estimate.abs() < 1e-6);
        assert!(res.at(-2).unwrap().estimate.abs() < 1e-6);
    }

    #[test]
    fn event_study_names_unsupported_offsets() {
        let mut rows = Vec::new();
        for u in 0..4 {
            let first = (u < 2).then_some(2001);
            for y in 2000..2003 {
                rows.push(row(u, y, y >= 2001 && u < 2, first));
            }
        }
        // Offset 3 never occurs in a three-year panel.
        let err = event_study(&panel(rows), &StudyConfig::default()).unwrap_err();
        match err {
            Error::Singularity(msg) => assert!(msg.contains('3')),
            other => panic!("expected singularity, got {other:?}"),
        }
    }
}
