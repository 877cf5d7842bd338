//! Covariate matrices for the nuisance models.
//!
//! Columns are fixed per panel so every fold and subgroup sees the same
//! layout. The treatment and the outcome are never encoded.

use std::collections::BTreeSet;

use ec_core::{Error, FeatureConfig, Result, SpeciesId};
use ec_panel::{AnalysisPanel, AnalysisPanelRow};

/// Column layout derived from a panel and a [`FeatureConfig`].
#[derive(Debug, Clone)]
pub struct FeatureSpace {
    config: FeatureConfig,
    species: Vec<SpeciesId>,
    bins: Vec<(u32, u32)>,
    names: Vec<String>,
}

/// Row-major covariate matrix for a subset of panel rows.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    /// Values, `rows.len() × p`.
    pub x: Vec<f64>,
    /// Columns.
    pub p: usize,
    /// Panel row index of each matrix row.
    pub rows: Vec<usize>,
    /// Requested rows dropped for missing environmental covariates.
    pub n_excluded: usize,
}

impl FeatureSpace {
    /// Build the layout; fails if no covariate is enabled.
    pub fn new(panel: &AnalysisPanel, config: &FeatureConfig) -> Result<Self> {
        let mut names = Vec::new();
        if config.coordinates {
            names.extend(["lon".to_string(), "lat".to_string()]);
        }
        if config.year {
            names.push("year".into());
        }
        let species = if config.species { panel.species() } else { Vec::new() };
        names.extend(species.iter().map(|s| format!("species={s}")));
        let bins: Vec<(u32, u32)> = if config.unit_bin_size > 0 {
            let b = config.unit_bin_size;
            panel
                .rows
                .iter()
                .map(|r| (r.unit.row() / b, r.unit.col() / b))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        } else {
            Vec::new()
        };
        names.extend(bins.iter().map(|(r, c)| format!("bin=r{r}c{c}")));
        if config.environmental {
            names.extend(["ndvi".to_string(), "temp_mean_c".to_string(), "precip_sum_mm".to_string()]);
        }
        if names.is_empty() {
            return Err(Error::Validation("no covariates enabled for the nuisance models".into()));
        }
        Ok(Self { config: config.clone(), species, bins, names })
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.names.len()
    }

    /// Column names in order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Append the encoding of `row` to `out`; `false` (and nothing appended)
    /// when a required environmental value is absent.
    pub fn encode(&self, row: &AnalysisPanelRow, out: &mut Vec<f64>) -> bool {
        let env = if self.config.environmental {
            match row.env.complete() {
                Some(v) => Some(v),
                None => return false,
            }
        } else {
            None
        };
        if self.config.coordinates {
            out.extend([row.lon, row.lat]);
        }
        if self.config.year {
            out.push(f64::from(row.year));
        }
        out.extend(self.species.iter().map(|s| if *s == row.species { 1.0 } else { 0.0 }));
        if self.config.unit_bin_size > 0 {
            let b = self.config.unit_bin_size;
            let key = (row.unit.row() / b, row.unit.col() / b);
            out.extend(self.bins.iter().map(|k| if *k == key { 1.0 } else { 0.0 }));
        }
        if let Some(v) = env {
            out.extend(v);
        }
        true
    }

    /// Encode the given panel rows, skipping incomplete ones.
    pub fn matrix(&self, panel: &AnalysisPanel, rows: &[usize]) -> FeatureMatrix {
        let p = self.width();
        let mut x = Vec::with_capacity(rows.len() * p);
        let mut kept = Vec::with_capacity(rows.len());
        for &i in rows {
            if self.encode(&panel.rows[i], &mut x) {
                kept.push(i);
            }
        }
        let n_excluded = rows.len() - kept.len();
        if n_excluded > 0 {
            log::warn!("DML: {n_excluded} rows excluded for missing environmental covariates");
        }
        FeatureMatrix { x, p, rows: kept, n_excluded }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ec_core::UnitId;
    use ec_panel::EnvironmentalCovariates;

    fn row(col: u32, species: &str, env: EnvironmentalCovariates) -> AnalysisPanelRow {
        AnalysisPanelRow {
            unit: UnitId::from_row_col(0, col),
            year: 2001,
            species: SpeciesId::new(species),
            count: 0,
            occupied: false,
            treated: false,
            intensity: 0.0,
            first_treated_year: None,
            event_time: None,
            lon: 1.5,
            lat: 2.5,
            env,
        }
    }

    #[test]
    fn layout_and_encoding() {
        let panel = AnalysisPanel::from_rows(vec![
            row(0, "a", Default::default()),
            row(5, "b", Default::default()),
        ])
        .unwrap();
        let space = FeatureSpace::new(&panel, &FeatureConfig::default()).unwrap();
        // lon, lat, year, 2 species, bins (0,0) and (0,1).
        assert_eq!(space.width(), 7);
        let m = space.matrix(&panel, &[0, 1]);
        assert_eq!(m.rows, vec![0, 1]);
        assert_eq!(&m.x[..7], &[1.5, 2.5, 2001.0, 1.0, 0.0, 1.0, 0.0]);
        assert_eq!(&m.x[7..], &[1.5, 2.5, 2001.0, 0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn incomplete_environment_is_excluded() {
        let full = EnvironmentalCovariates { ndvi: Some(0.4), temp_mean_c: Some(11.0), precip_sum_mm: Some(700.0) };
        let partial = EnvironmentalCovariates { ndvi: Some(0.4), ..Default::default() };
        let panel = AnalysisPanel::from_rows(vec![row(0, "a", full), row(1, "a", partial)]).unwrap();
        let config = FeatureConfig {
            coordinates: false,
            year: false,
            species: false,
            unit_bin_size: 0,
            environmental: true,
        };
        let space = FeatureSpace::new(&panel, &config).unwrap();
        let m = space.matrix(&panel, &[0, 1]);
        assert_eq!(m.rows, vec![0]);
        assert_eq!(m.n_excluded, 1);
        assert_eq!(m.x, vec![0.4, 11.0, 700.0]);
    }

    #[test]
    fn empty_feature_set_rejected() {
        let panel = AnalysisPanel::from_rows(vec![row(0, "a", Default::default())]).unwrap();
        let config = FeatureConfig {
            coordinates: false,
            year: false,
            species: false,
            unit_bin_size: 0,
            environmental: false,
        };
        assert!(FeatureSpace::new(&panel, &config).is_err());
    }
}
