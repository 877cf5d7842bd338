//! Fixed-effects absorption via the Method of Alternating Projections (MAP).
//!
//! One FE dimension is absorbed exactly in a single demeaning pass. With two
//! or more dimensions (unit × year) the absorber sweeps every dimension in
//! turn until the largest remaining group mean drops below a tolerance,
//! which handles the unbalanced panels produced by range filtering.
//!
//! # References
//!
//! - Guimarães & Portugal (2010), "A simple feasible procedure to fit models
//!   with high-dimensional fixed effects." *Stata Journal*.
//! - Correia (2017), "Linear Models with High-Dimensional Fixed Effects."

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use ec_core::{Error, Result};

/// Convergence tolerance on the L∞ norm of group means.
const DEFAULT_TOL: f64 = 1e-10;

/// Upper bound on MAP sweeps.
const DEFAULT_MAX_ITER: usize = 10_000;

/// Relative squared norm under which a partialled-out column counts as
/// having no within variation.
pub(crate) const VARIATION_TOL: f64 = 1e-10;

/// Absorbs one or more fixed-effect dimensions from column vectors.
#[derive(Debug, Clone)]
pub struct FixedEffectsAbsorber {
    n: usize,
    /// `levels[d][i]` = dense level of observation `i` in dimension `d`.
    levels: Vec<Vec<usize>>,
    /// `members[d][g]` = observations in level `g` of dimension `d`.
    members: Vec<Vec<Vec<usize>>>,
    tol: f64,
    max_iter: usize,
}

/// Map arbitrary keys to dense 0-based levels in first-seen order.
pub fn dense_levels<K: Hash + Eq + Clone>(keys: &[K]) -> Vec<usize> {
    let mut map: HashMap<K, usize> = HashMap::new();
    keys.iter()
        .map(|k| {
            let next = map.len();
            *map.entry(k.clone()).or_insert(next)
        })
        .collect()
}

impl FixedEffectsAbsorber {
    /// Build from one dense level vector per dimension, each of length `n`.
    pub fn new(levels: Vec<Vec<usize>>) -> Result<Self> {
        let Some(first) = levels.first() else {
            return Err(Error::Validation("at least one fixed-effect dimension required".into()));
        };
        let n = first.len();
        if n == 0 {
            return Err(Error::Validation("no observations to absorb".into()));
        }
        let mut members = Vec::with_capacity(levels.len());
        for (d, lv) in levels.iter().enumerate() {
            if lv.len() != n {
                return Err(Error::Validation(format!(
                    "fixed-effect dimension {d} has length {}, expected {n}",
                    lv.len()
                )));
            }
            let n_levels = lv.iter().copied().max().map_or(0, |m| m + 1);
            let mut groups: Vec<Vec<usize>> = vec![Vec::new(); n_levels];
            for (i, &g) in lv.iter().enumerate() {
                groups[g].push(i);
            }
            members.push(groups);
        }
        Ok(Self { n, levels, members, tol: DEFAULT_TOL, max_iter: DEFAULT_MAX_ITER })
    }

    /// Set the convergence tolerance.
    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Number of observations.
    pub fn n_obs(&self) -> usize {
        self.n
    }

    /// Number of non-empty levels per dimension.
    pub fn n_levels(&self) -> Vec<usize> {
        self.members.iter().map(|m| m.iter().filter(|g| !g.is_empty()).count()).collect()
    }

    /// Residual of `v` after removing every fixed effect.
    pub fn partial_out(&self, v: &[f64]) -> Result<Vec<f64>> {
        if v.len() != self.n {
            return Err(Error::Validation(format!("column length {} != n {}", v.len(), self.n)));
        }
        let mut r = v.to_vec();
        if self.members.len() == 1 {
            demean(&mut r, &self.members[0]);
            return Ok(r);
        }
        for sweep in 0..self.max_iter {
            for groups in &self.members {
                demean(&mut r, groups);
            }
            if self.max_abs_group_mean(&r) < self.tol {
                return Ok(r);
            }
            if sweep + 1 == self.max_iter {
                log::warn!("fixed-effects absorption stopped after {} sweeps", self.max_iter);
            }
        }
        Ok(r)
    }

    /// `true` if `v` keeps variation after absorption (relative to its raw norm).
    pub fn has_within_variation(&self, v: &[f64], partialled: &[f64]) -> bool {
        let raw: f64 = v.iter().map(|x| x * x).sum();
        let within: f64 = partialled.iter().map(|x| x * x).sum();
        within > VARIATION_TOL * raw.max(1.0)
    }

    /// Degrees of freedom consumed by the fixed effects.
    ///
    /// One dimension: `levels - 1`. Two dimensions: `levels_0 + levels_1 -
    /// components` of the bipartite level graph. More: `Σ levels - 1`.
    pub fn absorbed_dof(&self) -> usize {
        let total: usize = self.n_levels().iter().sum();
        match self.levels.len() {
            1 => total.saturating_sub(1),
            2 => total.saturating_sub(self.connected_components()),
            _ => total.saturating_sub(1),
        }
    }

    fn max_abs_group_mean(&self, v: &[f64]) -> f64 {
        let mut worst = 0.0_f64;
        for groups in &self.members {
            for g in groups.iter().filter(|g| !g.is_empty()) {
                let mean = g.iter().map(|&i| v[i]).sum::<f64>() / g.len() as f64;
                worst = worst.max(mean.abs());
            }
        }
        worst
    }

    fn connected_components(&self) -> usize {
        let offset = self.members[0].len();
        let mut parent: Vec<usize> = (0..offset + self.members[1].len()).collect();
        for i in 0..self.n {
            union(&mut parent, self.levels[0][i], offset + self.levels[1][i]);
        }
        let mut roots = HashSet::new();
        for i in 0..self.n {
            roots.insert(find(&mut parent, self.levels[0][i]));
        }
        roots.len()
    }
}

fn demean(v: &mut [f64], groups: &[Vec<usize>]) {
    for g in groups.iter().filter(|g| !g.is_empty()) {
        let mean = g.iter().map(|&i| v[i]).sum::<f64>() / g.len() as f64;
        for &i in g {
            v[i] -= mean;
        }
    }
}

fn find(parent: &mut [usize], mut x: usize) -> usize {
    while parent[x] != x {
        parent[x] = parent[parent[x]];
        x = parent[x];
    }
    x
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let (ra, rb) = (find(parent, a), find(parent, b));
    if ra != rb {
        parent[ra] = rb;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn dense_levels_first_seen_order() {
        assert_eq!(dense_levels(&["b", "a", "b", "c"]), vec![0, 1, 0, 2]);
    }

    #[test]
    fn one_way_is_exact() {
        let fe = FixedEffectsAbsorber::new(vec![vec![0, 0, 0, 1, 1, 1]]).unwrap();
        let r = fe.partial_out(&[1.0, 2.0, 3.0, 10.0, 20.0, 30.0]).unwrap();
        let expected = [-1.0, 0.0, 1.0, -10.0, 0.0, 10.0];
        for (a, b) in r.iter().zip(expected) {
            assert_relative_eq!(*a, b, epsilon = 1e-12);
        }
        assert_eq!(fe.absorbed_dof(), 1);
    }

    #[test]
    fn two_way_additive_effects_vanish() {
        // 3 units × 4 years, y = unit effect + year effect.
        let unit: Vec<usize> = (0..12).map(|i| i / 4).collect();
        let year: Vec<usize> = (0..12).map(|i| i % 4).collect();
        let y: Vec<f64> = (0..12).map(|i| 5.0 * (i / 4) as f64 + 0.7 * (i % 4) as f64).collect();
        let fe = FixedEffectsAbsorber::new(vec![unit, year]).unwrap();
        for r in fe.partial_out(&y).unwrap() {
            assert!(r.abs() < 1e-8);
        }
        assert_eq!(fe.absorbed_dof(), 3 + 4 - 1);
    }

    #[test]
    fn two_way_unbalanced_group_means_are_zero() {
        let unit = vec![0, 0, 0, 1, 1];
        let year = vec![0, 1, 2, 1, 2];
        let fe = FixedEffectsAbsorber::new(vec![unit, year]).unwrap();
        let r = fe.partial_out(&[10.0, 20.0, 30.0, 25.0, 35.0]).unwrap();
        assert!(((r[0] + r[1] + r[2]) / 3.0).abs() < 1e-8);
        assert!(((r[3] + r[4]) / 2.0).abs() < 1e-8);
        assert!(((r[1] + r[3]) / 2.0).abs() < 1e-8);
        assert!(r[0].abs() < 1e-8);
    }

    #[test]
    fn disconnected_components_dof() {
        let fe = FixedEffectsAbsorber::new(vec![vec![0, 0, 1, 1], vec![0, 1, 2, 3]]).unwrap();
        assert_eq!(fe.absorbed_dof(), 2 + 4 - 2);
    }

    #[test]
    fn detects_absorbed_regressor() {
        // Regressor constant within units: fully absorbed by the unit effect.
        let fe = FixedEffectsAbsorber::new(vec![vec![0, 0, 1, 1]]).unwrap();
        let d = [1.0, 1.0, 0.0, 0.0];
        let d_dm = fe.partial_out(&d).unwrap();
        assert!(!fe.has_within_variation(&d, &d_dm));
        let d = [0.0, 1.0, 0.0, 0.0];
        let d_dm = fe.partial_out(&d).unwrap();
        assert!(fe.has_within_variation(&d, &d_dm));
    }

    #[test]
    fn validation_errors() {
        assert!(FixedEffectsAbsorber::new(vec![]).is_err());
        assert!(FixedEffectsAbsorber::new(vec![vec![]]).is_err());
        assert!(FixedEffectsAbsorber::new(vec![vec![0, 1], vec![0]]).is_err());
        let fe = FixedEffectsAbsorber::new(vec![vec![0, 0, 1]]).unwrap();
        assert!(fe.partial_out(&[1.0]).is_err());
    }
}
