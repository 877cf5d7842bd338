//! Disaster footprints → (unit, year) treatment panel.
//!
//! Each event is buffered by a fixed radius, intersected with the tiling and
//! its overlap fractions are summed per (unit, year). Contributions are
//! reduced in a canonical order, so the result does not depend on the order
//! of the input events, down to the last bit.

use std::collections::BTreeMap;

use ec_core::{DisasterCategory, Error, Result, StudyConfig, UnitId, YearRange};
use ec_geo::{DEFAULT_BUFFER_SEGMENTS, SpatialIndex, buffer_point};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::records::{DisasterEvent, check_coordinates, check_year};
use crate::report::{BuildReport, DataWarning};

/// Treatment state of one unit-year.
///
/// Intensity is the sum of overlap fractions of every footprint touching the
/// unit in that year and can exceed 1 when several disasters overlap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentRow {
    /// Spatial unit.
    pub unit: UnitId,
    /// Year.
    pub year: i32,
    /// At least one footprint overlaps the unit this year.
    pub treated: bool,
    /// Summed overlap fraction.
    pub intensity: f64,
    /// First year the unit is treated; `None` iff never treated.
    pub first_treated_year: Option<i32>,
}

/// Sparse treatment panel: only treated unit-years carry a row.
#[derive(Debug, Clone, Default)]
pub struct TreatmentPanel {
    /// Treated unit-years, sorted by (unit, year).
    pub rows: Vec<TreatmentRow>,
    /// First treated year per ever-treated unit.
    pub first_treated: BTreeMap<UnitId, i32>,
    /// Data-quality warnings.
    pub report: BuildReport,
}

impl TreatmentPanel {
    /// Build with buffer, period and category filter taken from the configuration.
    pub fn from_config(
        index: &SpatialIndex,
        events: &[DisasterEvent],
        config: &StudyConfig,
    ) -> Result<Self> {
        build_treatment_panel(
            index,
            events,
            config.buffer_radius_km,
            config.time_range,
            config.disaster_categories.as_deref(),
        )
    }

    /// Row for a unit-year, if treated.
    pub fn get(&self, unit: UnitId, year: i32) -> Option<&TreatmentRow> {
        self.rows
            .binary_search_by(|r| (r.unit, r.year).cmp(&(unit, year)))
            .ok()
            .map(|i| &self.rows[i])
    }

    /// First treated year of a unit.
    pub fn first_treated_year(&self, unit: UnitId) -> Option<i32> {
        self.first_treated.get(&unit).copied()
    }
}

/// Build the treatment panel.
///
/// Fails with [`Error::Data`] for events with non-finite coordinates or years
/// outside `time_range`, and with [`Error::Validation`] for a non-positive
/// buffer radius. `categories`, when given, restricts the events considered.
pub fn build_treatment_panel(
    index: &SpatialIndex,
    events: &[DisasterEvent],
    buffer_radius_km: f64,
    time_range: YearRange,
    categories: Option<&[DisasterCategory]>,
) -> Result<TreatmentPanel> {
    if !(buffer_radius_km > 0.0 && buffer_radius_km.is_finite()) {
        return Err(Error::Validation(format!(
            "buffer radius must be > 0 km, got {buffer_radius_km}"
        )));
    }
    for (i, e) in events.iter().enumerate() {
        check_coordinates("disaster", i, e.lon, e.lat)?;
        check_year("disaster", i, e.year, &time_range)?;
    }

    let selected: Vec<(usize, &DisasterEvent)> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| categories.map_or(true, |cats| cats.contains(&e.category)))
        .collect();

    // Footprint overlaps, one independent task per event.
    let footprints: Vec<(usize, Result<BTreeMap<UnitId, f64>>, i32)> = selected
        .par_iter()
        .map(|&(i, e)| {
            let footprint = buffer_point(e.lon, e.lat, buffer_radius_km, DEFAULT_BUFFER_SEGMENTS);
            (i, index.overlap_fraction(&footprint), e.year)
        })
        .collect();

    let mut report = BuildReport::default();
    let mut contributions: Vec<((UnitId, i32), f64)> = Vec::new();
    let mut missed = 0usize;
    for (i, overlaps, year) in footprints {
        match overlaps {
            Ok(fr) if fr.is_empty() => missed += 1,
            Ok(fr) => contributions.extend(fr.into_iter().map(|(unit, f)| ((unit, year), f))),
            Err(e) => report.warn(DataWarning::InvalidFootprint { event: i, reason: e.to_string() }),
        }
    }
    if missed > 0 {
        report.warn(DataWarning::FootprintsOutsideRegion { count: missed });
    }

    // Canonical reduction order: by key, then by value.
    contributions.sort_unstable_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)));
    let mut intensity: BTreeMap<(UnitId, i32), f64> = BTreeMap::new();
    for (key, f) in contributions {
        *intensity.entry(key).or_insert(0.0) += f;
    }

    let mut first_treated: BTreeMap<UnitId, i32> = BTreeMap::new();
    for &(unit, year) in intensity.keys() {
        first_treated.entry(unit).and_modify(|y| *y = (*y).min(year)).or_insert(year);
    }
    let rows: Vec<TreatmentRow> = intensity
        .into_iter()
        .map(|((unit, year), intensity)| TreatmentRow {
            unit,
            year,
            treated: true,
            intensity,
            first_treated_year: first_treated.get(&unit).copied(),
        })
        .collect();
    log::debug!(
        "treatment panel: {} events, {} treated unit-years, {} treated units",
        selected.len(),
        rows.len(),
        first_treated.len()
    );

    Ok(TreatmentPanel { rows, first_treated, report })
}
