//! Sparse (unit, year, species) occupancy panel.
//!
//! Every occurrence is located in its tile and counted per (unit, year,
//! species). With range filtering enabled, a species only gets rows for units
//! its range polygon overlaps; with filtering disabled the valid set is every
//! unit. Both modes run the same code path, so the unfiltered panel is a
//! superset of the filtered one with identical values on shared keys.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use ec_core::{Error, Result, SpeciesId, StudyConfig, UnitId, YearRange};
use ec_geo::SpatialIndex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::records::{OccurrenceEvent, RangePolygon, check_coordinates, check_year};
use crate::report::{BuildReport, DataWarning};

/// One (unit, year, species) cell of the outcome panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelRow {
    /// Spatial unit.
    pub unit: UnitId,
    /// Year.
    pub year: i32,
    /// Species.
    pub species: SpeciesId,
    /// Number of occurrence records.
    pub count: u32,
    /// `count > 0`.
    pub occupied: bool,
}

/// Outcome panel, rows sorted by (unit, year, species).
#[derive(Debug, Clone, Default)]
pub struct OutcomePanel {
    /// Panel rows.
    pub rows: Vec<PanelRow>,
    /// Species roster, sorted.
    pub species: Vec<SpeciesId>,
    /// Data-quality warnings.
    pub report: BuildReport,
}

impl OutcomePanel {
    /// Build with time range and filtering switch taken from the configuration.
    pub fn from_config(
        index: &SpatialIndex,
        roster: &[SpeciesId],
        occurrences: &[OccurrenceEvent],
        ranges: &[RangePolygon],
        config: &StudyConfig,
    ) -> Result<Self> {
        build_outcome_panel(
            index,
            roster,
            occurrences,
            ranges,
            config.time_range,
            config.range_filtering,
        )
    }

    /// Look up a row.
    pub fn get(&self, unit: UnitId, year: i32, species: &SpeciesId) -> Option<&PanelRow> {
        self.rows
            .binary_search_by(|r| (r.unit, r.year, &r.species).cmp(&(unit, year, species)))
            .ok()
            .map(|i| &self.rows[i])
    }
}

/// Build the sparse outcome panel.
///
/// Fails with [`Error::Data`] when an occurrence references a species absent
/// from `roster`, carries non-finite coordinates, or lies outside `time_range`.
/// Missing, invalid or empty ranges only produce warnings.
pub fn build_outcome_panel(
    index: &SpatialIndex,
    roster: &[SpeciesId],
    occurrences: &[OccurrenceEvent],
    ranges: &[RangePolygon],
    time_range: YearRange,
    use_filtering: bool,
) -> Result<OutcomePanel> {
    let species: Vec<SpeciesId> = roster.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();
    if species.len() != roster.len() {
        return Err(Error::Data("species roster contains duplicates".into()));
    }
    let mut range_species: BTreeSet<&SpeciesId> = BTreeSet::new();
    for r in ranges {
        if !range_species.insert(&r.species) {
            return Err(Error::Data(format!("species '{}' has more than one range polygon", r.species)));
        }
    }
    let species_idx: HashMap<&SpeciesId, usize> =
        species.iter().enumerate().map(|(i, s)| (s, i)).collect();
    let mut report = BuildReport::default();

    // (1) + (2): locate and count.
    let mut counts: HashMap<(UnitId, i32, usize), u32> = HashMap::new();
    let mut outside_region = 0usize;
    for (i, occ) in occurrences.iter().enumerate() {
        let Some(&s) = species_idx.get(&occ.species) else {
            return Err(Error::Data(format!(
                "occurrence #{i}: species '{}' is not in the species roster",
                occ.species
            )));
        };
        check_coordinates("occurrence", i, occ.lon, occ.lat)?;
        check_year("occurrence", i, occ.year, &time_range)?;
        match index.locate(occ.lon, occ.lat) {
            Some(unit) => *counts.entry((unit, occ.year, s)).or_insert(0) += 1,
            None => outside_region += 1,
        }
    }
    if outside_region > 0 {
        report.warn(DataWarning::OccurrencesOutsideRegion { count: outside_region });
    }

    // (3): valid unit set per species.
    let all_units: Vec<UnitId> = index.units().iter().map(|u| u.id).collect();
    let valid: Vec<std::result::Result<Vec<UnitId>, DataWarning>> = if use_filtering {
        let by_species: BTreeMap<&SpeciesId, &RangePolygon> =
            ranges.iter().map(|r| (&r.species, r)).collect();
        species
            .par_iter()
            .map(|s| valid_units_from_range(index, s, by_species.get(s).copied()))
            .collect()
    } else {
        species.iter().map(|_| Ok(all_units.clone())).collect()
    };

    // (4): cross product of valid (unit, species) pairs with every year.
    let mut rows = Vec::new();
    for (s, sp) in species.iter().enumerate() {
        let units = match &valid[s] {
            Ok(units) => units,
            Err(w) => {
                report.warn(w.clone());
                continue;
            }
        };
        for &unit in units {
            for year in time_range.years() {
                let count = counts.get(&(unit, year, s)).copied().unwrap_or(0);
                rows.push(PanelRow { unit, year, species: sp.clone(), count, occupied: count > 0 });
            }
        }
        if use_filtering {
            let kept: BTreeSet<UnitId> = units.iter().copied().collect();
            let dropped: u32 = counts
                .iter()
                .filter(|((unit, _, si), _)| *si == s && !kept.contains(unit))
                .map(|(_, &c)| c)
                .sum();
            if dropped > 0 {
                report.warn(DataWarning::OccurrencesOutsideRange {
                    species: sp.clone(),
                    count: dropped as usize,
                });
            }
        }
    }
    rows.sort_unstable_by(|a, b| (a.unit, a.year, &a.species).cmp(&(b.unit, b.year, &b.species)));
    log::debug!(
        "outcome panel: {} rows, {} species, {} occurrences located",
        rows.len(),
        species.len(),
        occurrences.len() - outside_region
    );

    Ok(OutcomePanel { rows, species, report })
}

fn valid_units_from_range(
    index: &SpatialIndex,
    species: &SpeciesId,
    range: Option<&RangePolygon>,
) -> std::result::Result<Vec<UnitId>, DataWarning> {
    let Some(range) = range else {
        return Err(DataWarning::MissingRange { species: species.clone() });
    };
    match index.overlap_fraction(&range.polygon) {
        Ok(fr) if fr.is_empty() => Err(DataWarning::EmptyRange { species: species.clone() }),
        Ok(fr) => Ok(fr.into_iter().filter(|(_, f)| *f > 0.0).map(|(u, _)| u).collect()),
        Err(e) => Err(DataWarning::InvalidRange { species: species.clone(), reason: e.to_string() }),
    }
}
