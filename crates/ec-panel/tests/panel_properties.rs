//! Panel construction properties: sparsity, filtering, order independence.

use std::collections::{BTreeMap, BTreeSet};

use ec_core::{BoundingBox, DisasterCategory, SpeciesId, StudyConfig, UnitId, YearRange};
use ec_geo::SpatialIndex;
use ec_panel::{
    DisasterEvent, OccurrenceEvent, RangePolygon, StudyInputs, build_analysis_panel,
    build_outcome_panel, build_treatment_panel,
};
use geo::polygon;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

fn index() -> SpatialIndex {
    SpatialIndex::build(BoundingBox::new(10.0, 20.0, 16.0, 24.0).unwrap(), 0.5).unwrap()
}

fn roster() -> Vec<SpeciesId> {
    vec![SpeciesId::new("heron"), SpeciesId::new("kite"), SpeciesId::new("lark")]
}

fn ranges() -> Vec<RangePolygon> {
    vec![
        RangePolygon {
            species: SpeciesId::new("heron"),
            polygon: polygon![(x: 10.2, y: 20.2), (x: 13.1, y: 20.2), (x: 13.1, y: 23.3), (x: 10.2, y: 23.3)],
        },
        RangePolygon {
            species: SpeciesId::new("kite"),
            polygon: polygon![(x: 12.0, y: 21.0), (x: 15.9, y: 21.5), (x: 14.0, y: 23.9)],
        },
        // "lark" has no range: zero valid units under filtering.
    ]
}

fn occurrences(seed: u64, n: usize) -> Vec<OccurrenceEvent> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let roster = roster();
    (0..n)
        .map(|_| OccurrenceEvent {
            species: roster[rng.gen_range(0..roster.len())].clone(),
            lon: rng.gen_range(9.5..16.5),
            lat: rng.gen_range(19.5..24.5),
            year: rng.gen_range(2001..=2006),
        })
        .collect()
}

fn disasters(seed: u64, n: usize) -> Vec<DisasterEvent> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| DisasterEvent {
            category: if rng.gen_bool(0.5) { DisasterCategory::Storm } else { DisasterCategory::Flood },
            lon: rng.gen_range(10.0..16.0),
            lat: rng.gen_range(20.0..24.0),
            year: rng.gen_range(2001..=2006),
        })
        .collect()
}

#[test]
fn row_exists_iff_range_overlaps_or_filtering_disabled() {
    let idx = index();
    let yr = YearRange::new(2001, 2006).unwrap();
    let occs = occurrences(7, 2000);
    let rngs = ranges();

    let filtered = build_outcome_panel(&idx, &roster(), &occs, &rngs, yr, true).unwrap();
    let unfiltered = build_outcome_panel(&idx, &roster(), &occs, &rngs, yr, false).unwrap();

    // Unfiltered: dense cross product.
    assert_eq!(unfiltered.rows.len(), idx.len() * roster().len() * yr.len());

    // Filtered: exactly the overlapping units, every year.
    for r in &rngs {
        let overlap = idx.overlap_fraction(&r.polygon).unwrap();
        let units: BTreeSet<UnitId> =
            filtered.rows.iter().filter(|row| row.species == r.species).map(|row| row.unit).collect();
        assert_eq!(units, overlap.keys().copied().collect::<BTreeSet<_>>());
        let n = filtered.rows.iter().filter(|row| row.species == r.species).count();
        assert_eq!(n, overlap.len() * yr.len());
    }
    assert!(filtered.rows.iter().all(|r| r.species.as_str() != "lark"));
    assert!(filtered.rows.iter().chain(&unfiltered.rows).all(|r| yr.contains(r.year)));
}

#[test]
fn filtering_only_removes_rows() {
    // Scenario C: identical values on shared keys.
    let idx = index();
    let yr = YearRange::new(2001, 2006).unwrap();
    let occs = occurrences(11, 3000);
    let filtered = build_outcome_panel(&idx, &roster(), &occs, &ranges(), yr, true).unwrap();
    let unfiltered = build_outcome_panel(&idx, &roster(), &occs, &ranges(), yr, false).unwrap();
    assert!(filtered.rows.len() < unfiltered.rows.len());
    for row in &filtered.rows {
        let other = unfiltered.get(row.unit, row.year, &row.species).unwrap();
        assert_eq!(row.count, other.count);
        assert_eq!(row.occupied, other.occupied);
    }
}

#[test]
fn treatment_is_order_independent() {
    let idx = index();
    let yr = YearRange::new(2001, 2006).unwrap();
    let mut events = disasters(3, 60);
    let base = build_treatment_panel(&idx, &events, 60.0, yr, None).unwrap();
    let mut rng = rand::rngs::StdRng::seed_from_u64(99);
    for _ in 0..5 {
        events.shuffle(&mut rng);
        let other = build_treatment_panel(&idx, &events, 60.0, yr, None).unwrap();
        assert_eq!(other.rows.len(), base.rows.len());
        for (a, b) in other.rows.iter().zip(&base.rows) {
            assert_eq!((a.unit, a.year, a.treated, a.first_treated_year), (b.unit, b.year, b.treated, b.first_treated_year));
            assert_eq!(a.intensity.to_bits(), b.intensity.to_bits());
        }
        assert_eq!(other.first_treated, base.first_treated);
    }
}

#[test]
fn first_treated_year_is_minimum_treated_year() {
    let idx = index();
    let yr = YearRange::new(2001, 2006).unwrap();
    let tp = build_treatment_panel(&idx, &disasters(5, 40), 40.0, yr, None).unwrap();
    let mut min_year: BTreeMap<UnitId, i32> = BTreeMap::new();
    for r in tp.rows.iter().filter(|r| r.treated) {
        let e = min_year.entry(r.unit).or_insert(r.year);
        *e = (*e).min(r.year);
    }
    assert_eq!(min_year, tp.first_treated);
    for u in idx.units() {
        if tp.first_treated_year(u.id).is_none() {
            assert!(tp.rows.iter().all(|r| r.unit != u.id));
        }
    }
}

#[test]
fn pipeline_builds_consistent_analysis_panel() {
    let idx = index();
    let mut config = StudyConfig::default();
    config.region = *idx.region();
    config.resolution_deg = 0.5;
    config.time_range = YearRange::new(2001, 2006).unwrap();
    config.buffer_radius_km = 40.0;
    let inputs = StudyInputs {
        roster: roster(),
        occurrences: occurrences(21, 1500),
        ranges: ranges(),
        disasters: disasters(22, 30),
        covariates: None,
    };
    let panel = build_analysis_panel(&idx, &inputs, &config).unwrap();
    assert!(!panel.is_empty());
    for r in &panel.rows {
        assert_eq!(r.event_time, r.first_treated_year.map(|g| r.year - g));
        if !r.treated {
            assert_eq!(r.intensity, 0.0);
        }
    }
    assert!(panel.report.warnings.iter().any(|w| matches!(
        w,
        ec_panel::DataWarning::MissingRange { species } if species.as_str() == "lark"
    )));

    let mut bad = inputs.clone();
    bad.occurrences.push(OccurrenceEvent { species: SpeciesId::new("owl"), lon: 11.0, lat: 21.0, year: 2002 });
    assert!(matches!(build_analysis_panel(&idx, &bad, &config), Err(ec_core::Error::Data(_))));
}
