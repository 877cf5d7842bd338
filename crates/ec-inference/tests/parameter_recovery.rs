//! Parameter recovery on synthetic data with known effects.

use ec_core::{DmlConfig, LearnerConfig, SpeciesId, StaggeredConfig, StudyConfig, SubKey, UnitId};
use ec_inference::dml::{cross_fit, partially_linear};
use ec_inference::econometrics::cohort_sample;
use ec_inference::{dml_event_time, dml_subgroups, staggered_att};
use ec_panel::{AnalysisPanel, AnalysisPanelRow};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// `y = β·d + 2·x0 − x1 + ε`, `d = 1{x0 + 0.5·u > 0.75}`.
fn plm_data(n: usize, beta: f64, seed: u64) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 1.0).unwrap();
    let mut x = Vec::with_capacity(2 * n);
    let mut y = Vec::with_capacity(n);
    let mut d = Vec::with_capacity(n);
    for _ in 0..n {
        let x0: f64 = rng.gen_range(0.0..1.0);
        let x1: f64 = rng.gen_range(0.0..1.0);
        let di = if x0 + 0.5 * noise.sample(&mut rng) > 0.75 { 1.0 } else { 0.0 };
        x.extend([x0, x1]);
        d.push(di);
        y.push(beta * di + 2.0 * x0 - x1 + noise.sample(&mut rng));
    }
    (x, y, d)
}

fn linear_dml() -> DmlConfig {
    DmlConfig {
        outcome_learner: LearnerConfig::Linear { ridge: 0.0 },
        treatment_learner: LearnerConfig::Linear { ridge: 0.0 },
        ..Default::default()
    }
}

#[test]
fn dml_converges_to_true_beta() {
    let cfg = linear_dml();
    let (x, y, d) = plm_data(500, 0.5, 1);
    let (small, _) = partially_linear(&x, 2, &y, &d, &cfg, 11).unwrap();
    let (x, y, d) = plm_data(8000, 0.5, 2);
    let (large, _) = partially_linear(&x, 2, &y, &d, &cfg, 11).unwrap();
    assert!((large.beta - 0.5).abs() < 0.1, "β̂ = {}", large.beta);
    assert!(large.std_error < small.std_error / 2.0);
    assert_eq!(large.n_obs, 8000);
}

#[test]
fn dml_interval_covers_at_nominal_rate() {
    let cfg = linear_dml();
    let reps = 60;
    let mut covered = 0;
    for r in 0..reps {
        let (x, y, d) = plm_data(400, 0.5, 100 + r);
        let (est, _) = partially_linear(&x, 2, &y, &d, &cfg, r).unwrap();
        let half = 1.959_963_985 * est.std_error;
        if (est.beta - 0.5).abs() <= half {
            covered += 1;
        }
    }
    assert!(covered >= 50, "covered {covered}/{reps}");
}

#[test]
fn dml_with_forest_nuisances() {
    let cfg = DmlConfig {
        outcome_learner: LearnerConfig::Forest { n_trees: 30, max_depth: 6, min_samples_leaf: 5, max_features: 1.0 },
        treatment_learner: LearnerConfig::Forest {
            n_trees: 30,
            max_depth: 6,
            min_samples_leaf: 5,
            max_features: 1.0,
        },
        ..Default::default()
    };
    let (x, y, d) = plm_data(2000, 0.5, 5);
    let (est, _) = partially_linear(&x, 2, &y, &d, &cfg, 3).unwrap();
    assert!((est.beta - 0.5).abs() < 0.25, "β̂ = {}", est.beta);
    // Fixed seed reproduces the estimate exactly.
    let (again, _) = partially_linear(&x, 2, &y, &d, &cfg, 3).unwrap();
    assert_eq!(est.beta.to_bits(), again.beta.to_bits());
}

#[test]
fn no_row_is_predicted_by_a_model_that_saw_it() {
    let cfg = DmlConfig { record_audit: true, ..linear_dml() };
    let (x, y, d) = plm_data(300, 0.5, 9);
    let cf = cross_fit(&x, 2, &y, &d, &cfg, 4).unwrap();
    let audit = cf.audit.unwrap();
    audit.verify().unwrap();
    for (row, &model) in audit.predicted_by.iter().enumerate() {
        assert!(!audit.training_rows[model].contains(&row));
        assert_eq!(audit.training_rows[model].len() + audit.predicted_by.iter().filter(|&&m| m == model).count(), 300);
    }
}

fn row(u: u32, year: i32, occupied: bool, first: Option<i32>, species: &str) -> AnalysisPanelRow {
    AnalysisPanelRow {
        unit: UnitId::from_row_col(u / 10, u % 10),
        year,
        species: SpeciesId::new(species),
        count: u32::from(occupied),
        occupied,
        treated: first == Some(year),
        intensity: if first == Some(year) { 1.0 } else { 0.0 },
        first_treated_year: first,
        event_time: first.map(|g| year - g),
        lon: f64::from(u % 10),
        lat: f64::from(u / 10),
        env: Default::default(),
    }
}

/// Cohort 2002 (units 0-9), cohort 2004 (10-19), never treated (20-29).
/// Occupancy turns on one year after onset.
fn delayed_effect_panel() -> AnalysisPanel {
    let mut rows = Vec::new();
    for u in 0..30 {
        let first = match u / 10 {
            0 => Some(2002),
            1 => Some(2004),
            _ => None,
        };
        for year in 2000..=2005 {
            let on = first.is_some_and(|g| year > g);
            rows.push(row(u, year, on, first, "sp"));
        }
    }
    AnalysisPanel::from_rows(rows).unwrap()
}

#[test]
fn cohort_samples_exclude_already_treated_units() {
    let panel = delayed_effect_panel();
    let cfg = StaggeredConfig::default();
    for g in panel.cohorts() {
        let sample = cohort_sample(&panel, g, &cfg);
        for &i in &sample.row_indices {
            let r = &panel.rows[i];
            assert!(r.first_treated_year.map_or(true, |h| h >= g), "cohort {g} uses row {r:?}");
            if let Some(h) = r.first_treated_year.filter(|&h| h > g) {
                assert!(r.year < h);
            }
        }
    }
}

#[test]
fn late_cohort_matches_clean_difference_in_differences() {
    // Cohort 2004 against never-treated units only: post years 2004 (0) and
    // 2005 (1) give an ATT of 0.5.
    let res = staggered_att(&delayed_effect_panel(), &StudyConfig::default()).unwrap();
    let late = res.cohorts.get(&SubKey::Cohort(2004)).unwrap();
    assert!((late.estimate - 0.5).abs() < 1e-8, "{late:?}");
    assert!(res.cohorts.get(&SubKey::Cohort(2002)).is_some());
    let total: f64 = res.weights.iter().map(|(_, w)| w).sum();
    assert!((total - 1.0).abs() < 1e-12);
}

fn species_panel(seed: u64) -> AnalysisPanel {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut rows = Vec::new();
    for u in 0..60u32 {
        let first = if u % 3 == 0 { Some(2003) } else { None };
        for year in 2000..=2006 {
            for sp in ["big", "small"] {
                let on = first.is_some_and(|g| year >= g);
                let p = if on { 0.7 } else { 0.3 };
                if sp == "small" && u >= 20 {
                    continue;
                }
                rows.push(row(u, year, rng.gen_bool(p), first, sp));
            }
        }
    }
    AnalysisPanel::from_rows(rows).unwrap()
}

fn linear_config() -> StudyConfig {
    StudyConfig { dml: DmlConfig { min_subgroup_size: 200, ..linear_dml() }, ..Default::default() }
}

#[test]
fn small_subgroups_are_skipped_and_labeled() {
    let panel = species_panel(21);
    let set = dml_subgroups(&panel, &linear_config()).unwrap();
    // "big": 60 units × 7 years; "small": 20 units × 7 years.
    assert_eq!(set.estimates.len(), 1);
    let big = set.get(&SubKey::Subgroup("big".into())).unwrap();
    assert!(big.estimate > 0.0);
    assert_eq!(big.n_obs, 420);
    assert_eq!(set.skipped.len(), 1);
    assert_eq!(set.skipped[0].key, SubKey::Subgroup("small".into()));
}

#[test]
fn event_time_variant_labels_each_offset() {
    let panel = species_panel(22);
    let set = dml_event_time(&panel, &linear_config()).unwrap();
    let window = StudyConfig::default().event_window;
    assert_eq!(set.estimates.len() + set.skipped.len(), window.offsets().len());
    for e in &set.estimates {
        assert!(matches!(e.sub_key, Some(SubKey::Offset(k)) if k != window.reference));
    }
}
