//! Analysis panel: outcome rows left-joined with treatment and unit attributes.

use std::collections::BTreeSet;

use ec_core::{Error, Result, SpeciesId, TreatmentDefinition, UnitId};
use ec_geo::SpatialIndex;
use serde::{Deserialize, Serialize};

use crate::covariates::{CovariateTable, EnvironmentalCovariates};
use crate::outcome::OutcomePanel;
use crate::report::BuildReport;
use crate::treatment::TreatmentPanel;

/// One row of the analysis panel, the canonical intermediate artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisPanelRow {
    /// Spatial unit.
    pub unit: UnitId,
    /// Year.
    pub year: i32,
    /// Species.
    pub species: SpeciesId,
    /// Occurrence count.
    pub count: u32,
    /// Occupancy outcome.
    pub occupied: bool,
    /// Disaster footprint in this unit-year.
    pub treated: bool,
    /// Summed overlap fraction, 0 when untreated.
    pub intensity: f64,
    /// First treated year of the unit; `None` for never-treated units.
    pub first_treated_year: Option<i32>,
    /// `year - first_treated_year`; `None` for never-treated units.
    pub event_time: Option<i32>,
    /// Unit centroid longitude.
    pub lon: f64,
    /// Unit centroid latitude.
    pub lat: f64,
    /// Environmental covariates at the centroid.
    #[serde(default)]
    pub env: EnvironmentalCovariates,
}

impl AnalysisPanelRow {
    /// Outcome as a regression response.
    #[inline]
    pub fn outcome(&self) -> f64 {
        if self.occupied { 1.0 } else { 0.0 }
    }

    /// Binary treatment regressor under the given definition.
    #[inline]
    pub fn is_treated(&self, definition: TreatmentDefinition) -> bool {
        match definition {
            TreatmentDefinition::Absorbing => self.first_treated_year.is_some_and(|g| self.year >= g),
            TreatmentDefinition::Contemporaneous => self.treated,
        }
    }
}

/// Summary counts of an analysis panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelSummary {
    /// Rows.
    pub n_rows: usize,
    /// Distinct units.
    pub n_units: usize,
    /// Distinct species.
    pub n_species: usize,
    /// Distinct years.
    pub n_years: usize,
    /// Units with a first treated year.
    pub n_treated_units: usize,
    /// Distinct first treated years.
    pub cohorts: Vec<i32>,
    /// Share of occupied rows.
    pub occupancy_rate: f64,
}

/// Merged panel consumed by every estimator. Rows sorted by (unit, year, species).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisPanel {
    /// Rows.
    pub rows: Vec<AnalysisPanelRow>,
    /// Warnings carried over from the builders.
    #[serde(default)]
    pub report: BuildReport,
}

impl AnalysisPanel {
    /// Assemble a panel from rows (e.g. reloaded from storage), checking that
    /// event time agrees with the first treated year.
    pub fn from_rows(mut rows: Vec<AnalysisPanelRow>) -> Result<Self> {
        for r in &rows {
            let expected = r.first_treated_year.map(|g| r.year - g);
            if r.event_time != expected {
                return Err(Error::Data(format!(
                    "row ({}, {}, {}): event time {:?} inconsistent with first treated year {:?}",
                    r.unit, r.year, r.species, r.event_time, r.first_treated_year
                )));
            }
            if r.occupied != (r.count > 0) {
                return Err(Error::Data(format!(
                    "row ({}, {}, {}): occupancy disagrees with count {}",
                    r.unit, r.year, r.species, r.count
                )));
            }
        }
        rows.sort_by(|a, b| (a.unit, a.year, &a.species).cmp(&(b.unit, b.year, &b.species)));
        if rows.windows(2).any(|w| (w[0].unit, w[0].year, &w[0].species) == (w[1].unit, w[1].year, &w[1].species)) {
            return Err(Error::Data("duplicate (unit, year, species) key".into()));
        }
        Ok(Self { rows, report: BuildReport::default() })
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// `true` without rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct first treated years present, ascending.
    pub fn cohorts(&self) -> Vec<i32> {
        self.rows.iter().filter_map(|r| r.first_treated_year).collect::<BTreeSet<_>>().into_iter().collect()
    }

    /// Distinct species present, sorted.
    pub fn species(&self) -> Vec<SpeciesId> {
        self.rows.iter().map(|r| r.species.clone()).collect::<BTreeSet<_>>().into_iter().collect()
    }

    /// Summary counts.
    pub fn summary(&self) -> PanelSummary {
        let units: BTreeSet<UnitId> = self.rows.iter().map(|r| r.unit).collect();
        let treated: BTreeSet<UnitId> =
            self.rows.iter().filter(|r| r.first_treated_year.is_some()).map(|r| r.unit).collect();
        let years: BTreeSet<i32> = self.rows.iter().map(|r| r.year).collect();
        let occupied = self.rows.iter().filter(|r| r.occupied).count();
        PanelSummary {
            n_rows: self.rows.len(),
            n_units: units.len(),
            n_species: self.species().len(),
            n_years: years.len(),
            n_treated_units: treated.len(),
            cohorts: self.cohorts(),
            occupancy_rate: if self.rows.is_empty() { 0.0 } else { occupied as f64 / self.rows.len() as f64 },
        }
    }
}

/// Left-join outcome rows with treatment rows on (unit, year).
///
/// Missing treatment rows default to untreated with zero intensity; the
/// first treated year comes from the unit, so untreated years of a treated
/// unit still carry their event time.
pub fn merge_panels(
    outcome: &OutcomePanel,
    treatment: &TreatmentPanel,
    index: &SpatialIndex,
    covariates: Option<&CovariateTable>,
) -> Result<AnalysisPanel> {
    let mut rows = Vec::with_capacity(outcome.rows.len());
    for r in &outcome.rows {
        let unit = index.unit(r.unit).ok_or_else(|| {
            Error::Data(format!("outcome row references unit {} not in the tiling", r.unit))
        })?;
        let (lon, lat) = unit.centroid;
        let trow = treatment.get(r.unit, r.year);
        let first_treated_year = treatment.first_treated_year(r.unit);
        rows.push(AnalysisPanelRow {
            unit: r.unit,
            year: r.year,
            species: r.species.clone(),
            count: r.count,
            occupied: r.occupied,
            treated: trow.is_some_and(|t| t.treated),
            intensity: trow.map_or(0.0, |t| t.intensity),
            first_treated_year,
            event_time: first_treated_year.map(|g| r.year - g),
            lon,
            lat,
            env: covariates.map(|c| c.lookup(lat, lon, r.year)).unwrap_or_default(),
        });
    }
    let mut report = outcome.report.clone();
    report.extend(treatment.report.clone());
    Ok(AnalysisPanel { rows, report })
}
