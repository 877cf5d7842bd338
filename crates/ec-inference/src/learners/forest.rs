//! Bagged regression trees (random forest) for nuisance functions.
//!
//! Trees are grown on bootstrap resamples with a random feature subset
//! considered at each split. Splits minimize the summed squared error of the
//! two children. Trees are built in parallel; each tree draws from its own
//! seeded stream so results do not depend on the thread schedule.

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use ec_core::{Error, FittedRegressor, Regressor, Result};

use super::linear::check_design;

/// Forest hyperparameters.
#[derive(Debug, Clone, Copy)]
pub struct ForestParams {
    /// Number of trees.
    pub n_trees: usize,
    /// Maximum depth.
    pub max_depth: usize,
    /// Minimum rows per leaf.
    pub min_samples_leaf: usize,
    /// Share of features tried per split.
    pub max_features: f64,
}

/// Random-forest regressor.
#[derive(Debug, Clone)]
pub struct ForestRegressor {
    params: ForestParams,
}

impl ForestRegressor {
    /// Create with the given hyperparameters.
    pub fn new(params: ForestParams) -> Self {
        Self { params }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf(f64),
    Split { feature: usize, threshold: f64, left: usize, right: usize },
}

/// One regression tree stored as a flat node arena; node 0 is the root.
#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn predict_row(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes[idx] {
                Node::Leaf(v) => return v,
                Node::Split { feature, threshold, left, right } => {
                    idx = if row[feature] <= threshold { left } else { right };
                }
            }
        }
    }
}

struct TreeBuilder<'a> {
    x: &'a [f64],
    y: &'a [f64],
    p: usize,
    n_try: usize,
    params: ForestParams,
    rng: StdRng,
    nodes: Vec<Node>,
}

impl TreeBuilder<'_> {
    fn value(&self, i: usize, j: usize) -> f64 {
        self.x[i * self.p + j]
    }

    fn grow(&mut self, rows: &mut [usize], depth: usize) -> usize {
        let n = rows.len();
        let mean = rows.iter().map(|&i| self.y[i]).sum::<f64>() / n as f64;
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf(mean));

        let leaf = self.params.min_samples_leaf;
        if depth >= self.params.max_depth || n < 2 * leaf {
            return id;
        }
        let Some((feature, threshold)) = self.best_split(rows, leaf) else {
            return id;
        };

        // Partition in place: rows with value <= threshold first.
        let mut mid = 0;
        for k in 0..n {
            if self.value(rows[k], feature) <= threshold {
                rows.swap(k, mid);
                mid += 1;
            }
        }
        let (lo, hi) = rows.split_at_mut(mid);
        let left = self.grow(lo, depth + 1);
        let right = self.grow(hi, depth + 1);
        self.nodes[id] = Node::Split { feature, threshold, left, right };
        id
    }

    fn best_split(&mut self, rows: &[usize], leaf: usize) -> Option<(usize, f64)> {
        let n = rows.len();
        let total: f64 = rows.iter().map(|&i| self.y[i]).sum();
        let total_sq: f64 = rows.iter().map(|&i| self.y[i] * self.y[i]).sum();
        let parent_sse = total_sq - total * total / n as f64;
        if parent_sse <= 1e-12 {
            return None;
        }

        let mut best: Option<(usize, f64, f64)> = None;
        let mut order: Vec<usize> = rows.to_vec();
        for feature in sample(&mut self.rng, self.p, self.n_try).into_iter() {
            order.sort_by(|&a, &b| self.value(a, feature).total_cmp(&self.value(b, feature)));
            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for k in 0..n - 1 {
                let yi = self.y[order[k]];
                left_sum += yi;
                left_sq += yi * yi;
                let n_left = k + 1;
                if n_left < leaf || n - n_left < leaf {
                    continue;
                }
                let (a, b) = (self.value(order[k], feature), self.value(order[k + 1], feature));
                if a == b {
                    continue;
                }
                let right_sum = total - left_sum;
                let right_sq = total_sq - left_sq;
                let sse = (left_sq - left_sum * left_sum / n_left as f64)
                    + (right_sq - right_sum * right_sum / (n - n_left) as f64);
                if best.map_or(true, |(_, _, best_sse)| sse < best_sse) {
                    best = Some((feature, split_threshold(a, b), sse));
                }
            }
        }
        best.filter(|&(_, _, sse)| sse < parent_sse).map(|(f, t, _)| (f, t))
    }
}

/// Threshold between sorted neighbours `a < b` such that `a <= t < b`.
///
/// The midpoint of adjacent floats can round up to `b`, which would leave the
/// right child empty.
fn split_threshold(a: f64, b: f64) -> f64 {
    let mid = 0.5 * (a + b);
    if mid < b { mid } else { a }
}

/// Fitted forest; prediction is the mean over trees.
#[derive(Debug, Clone)]
pub struct ForestModel {
    trees: Vec<Tree>,
    p: usize,
}

fn tree_rng(seed: u64, tree: u64) -> StdRng {
    StdRng::seed_from_u64(seed.wrapping_mul(2654435761).wrapping_add(tree))
}

impl Regressor for ForestRegressor {
    fn fit(&self, x: &[f64], p: usize, y: &[f64], seed: u64) -> Result<Box<dyn FittedRegressor>> {
        let n = y.len();
        check_design(x, p, n)?;
        if n == 0 {
            return Err(Error::InsufficientData("forest fit on zero rows".into()));
        }
        let params = self.params;
        let n_try = ((params.max_features * p as f64).ceil() as usize).clamp(1, p);

        let trees: Vec<Tree> = (0..params.n_trees)
            .into_par_iter()
            .map(|t| {
                let mut rng = tree_rng(seed, t as u64);
                let mut rows: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                let mut builder = TreeBuilder { x, y, p, n_try, params, rng, nodes: Vec::new() };
                builder.grow(&mut rows, 0);
                Tree { nodes: builder.nodes }
            })
            .collect();
        Ok(Box::new(ForestModel { trees, p }))
    }

    fn name(&self) -> &str {
        "forest"
    }
}

impl FittedRegressor for ForestModel {
    fn predict(&self, x: &[f64], p: usize) -> Result<Vec<f64>> {
        if p != self.p || x.len() % p != 0 {
            return Err(Error::Validation(format!("predict with {p} features on a forest fit with {}", self.p)));
        }
        let k = self.trees.len() as f64;
        Ok(x.chunks_exact(p).map(|row| self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / k).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ForestParams {
        ForestParams { n_trees: 20, max_depth: 6, min_samples_leaf: 2, max_features: 1.0 }
    }

    #[test]
    fn learns_step_function() {
        let xs: Vec<f64> = (0..200).map(|i| i as f64 / 200.0).collect();
        let y: Vec<f64> = xs.iter().map(|&v| if v < 0.5 { 0.0 } else { 1.0 }).collect();
        let model = ForestRegressor::new(params()).fit(&xs, 1, &y, 7).unwrap();
        let pred = model.predict(&[0.1, 0.9], 1).unwrap();
        assert!(pred[0] < 0.1);
        assert!(pred[1] > 0.9);
    }

    #[test]
    fn same_seed_same_forest() {
        let x: Vec<f64> = (0..300).map(|i| ((i * 37) % 101) as f64).collect();
        let y: Vec<f64> = x.chunks(3).map(|r| r[0] - 0.5 * r[2]).collect();
        let f = ForestRegressor::new(ForestParams { max_features: 0.5, ..params() });
        let a = f.fit(&x, 3, &y, 11).unwrap().predict(&x, 3).unwrap();
        let b = f.fit(&x, 3, &y, 11).unwrap().predict(&x, 3).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn constant_target_gives_constant_prediction() {
        let x: Vec<f64> = (0..50).map(f64::from).collect();
        let y = vec![0.3; 50];
        let model = ForestRegressor::new(params()).fit(&x, 1, &y, 1).unwrap();
        for v in model.predict(&x, 1).unwrap() {
            assert!((v - 0.3).abs() < 1e-12);
        }
    }

    #[test]
    fn threshold_separates_adjacent_floats() {
        for lo in [1.0_f64, 0.1, 3.7, 1e300] {
            let hi = f64::from_bits(lo.to_bits() + 1);
            let t = split_threshold(lo, hi);
            assert!(lo <= t && t < hi, "{lo} {t} {hi}");
        }
        assert_eq!(split_threshold(1.0, 3.0), 2.0);
    }

    #[test]
    fn adjacent_feature_values_give_finite_predictions() {
        let lo = 0.1_f64;
        let hi = f64::from_bits(lo.to_bits() + 1);
        let x: Vec<f64> = (0..40).map(|i| if i < 20 { lo } else { hi }).collect();
        let y: Vec<f64> = (0..40).map(|i| if i < 20 { 0.0 } else { 1.0 }).collect();
        let model = ForestRegressor::new(params()).fit(&x, 1, &y, 5).unwrap();
        let pred = model.predict(&[lo, hi], 1).unwrap();
        assert!(pred.iter().all(|v| v.is_finite()));
        assert!(pred[0] < pred[1]);
    }

    #[test]
    fn depth_one_tree_is_a_stump() {
        let x: Vec<f64> = (0..10).map(f64::from).collect();
        let y: Vec<f64> = x.clone();
        let stump = ForestRegressor::new(ForestParams {
            n_trees: 1,
            max_depth: 1,
            min_samples_leaf: 1,
            max_features: 1.0,
        });
        let pred = stump.fit(&x, 1, &y, 3).unwrap().predict(&x, 1).unwrap();
        let distinct: std::collections::BTreeSet<u64> = pred.iter().map(|v| v.to_bits()).collect();
        assert!(distinct.len() <= 2);
    }
}
