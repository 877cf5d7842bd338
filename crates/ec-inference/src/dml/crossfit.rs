//! K-fold cross-fitting and the partialling-out estimator.
//!
//! For each fold an outcome model and a treatment model are trained on the
//! other folds and applied to the held-out rows. Every residual therefore
//! comes from a model that never saw its row. Folds are fit in parallel and
//! each row's residual is written exactly once, after the fan-in.
//!
//! # References
//!
//! - Chernozhukov et al. (2018), "Double/debiased machine learning for
//!   treatment and structural parameters." *The Econometrics Journal*.

use rayon::prelude::*;

use ec_core::{DmlConfig, Error, Regressor, Result};

use super::folds::{assign_folds, fold_members};
use crate::learners::learner_from_config;

/// Training sets and prediction provenance of one cross-fit.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossFitAudit {
    /// Fold of each row.
    pub fold_of: Vec<usize>,
    /// Rows used to train fold `f`'s models, ascending.
    pub training_rows: Vec<Vec<usize>>,
    /// Fold whose models produced each row's predictions.
    pub predicted_by: Vec<usize>,
}

impl CrossFitAudit {
    /// Check that no row was predicted by a model trained on it and that
    /// every row was predicted exactly by its own fold's models.
    pub fn verify(&self) -> Result<()> {
        if self.predicted_by.len() != self.fold_of.len() {
            return Err(Error::Computation(format!(
                "audit covers {} predictions for {} rows",
                self.predicted_by.len(),
                self.fold_of.len()
            )));
        }
        for (row, (&model, &fold)) in self.predicted_by.iter().zip(&self.fold_of).enumerate() {
            if model != fold {
                return Err(Error::Computation(format!(
                    "row {row} in fold {fold} predicted by fold {model}'s models"
                )));
            }
            let trained = self.training_rows.get(model).ok_or_else(|| {
                Error::Computation(format!("row {row} predicted by unknown model {model}"))
            })?;
            if trained.binary_search(&row).is_ok() {
                return Err(Error::Computation(format!("row {row} was in the training set of its own model")));
            }
        }
        Ok(())
    }
}

/// Out-of-fold residuals.
#[derive(Debug, Clone)]
pub struct CrossFit {
    /// `y - Ê[y|x]`.
    pub outcome_residuals: Vec<f64>,
    /// `d - Ê[d|x]`.
    pub treatment_residuals: Vec<f64>,
    /// Present when `record_audit` is set.
    pub audit: Option<CrossFitAudit>,
}

struct FoldPrediction {
    fold: usize,
    rows: Vec<usize>,
    y_hat: Vec<f64>,
    d_hat: Vec<f64>,
    training: Vec<usize>,
}

fn gather(x: &[f64], p: usize, rows: &[usize]) -> Vec<f64> {
    let mut out = Vec::with_capacity(rows.len() * p);
    for &i in rows {
        out.extend_from_slice(&x[i * p..(i + 1) * p]);
    }
    out
}

/// Shared, read-only inputs of every fold fit.
struct FoldContext<'a> {
    x: &'a [f64],
    p: usize,
    y: &'a [f64],
    d: &'a [f64],
    fold_of: &'a [usize],
    outcome: &'a dyn Regressor,
    treatment: &'a dyn Regressor,
    seed: u64,
}

impl FoldContext<'_> {
    fn fit_fold(&self, fold: usize, held_out: &[usize]) -> Result<FoldPrediction> {
        let p = self.p;
        let training: Vec<usize> = (0..self.y.len()).filter(|&i| self.fold_of[i] != fold).collect();
        let x_train = gather(self.x, p, &training);
        let y_train: Vec<f64> = training.iter().map(|&i| self.y[i]).collect();
        let d_train: Vec<f64> = training.iter().map(|&i| self.d[i]).collect();
        let x_test = gather(self.x, p, held_out);

        let fold_seed = self.seed.wrapping_mul(2654435761).wrapping_add(fold as u64);
        let y_model = self.outcome.fit(&x_train, p, &y_train, fold_seed)?;
        let d_model = self.treatment.fit(&x_train, p, &d_train, fold_seed ^ 0x9e37_79b9)?;
        let y_hat = y_model.predict(&x_test, p)?;
        // Treatment is binary: keep propensities in [0, 1].
        let d_hat = d_model.predict(&x_test, p)?.into_iter().map(|v| v.clamp(0.0, 1.0)).collect();
        log::debug!("DML fold {fold}: trained on {} rows, predicted {}", training.len(), held_out.len());

        Ok(FoldPrediction { fold, rows: held_out.to_vec(), y_hat, d_hat, training })
    }
}

/// Cross-fit outcome and treatment nuisance models on `x` (row-major, `n × p`).
///
/// Fails with [`Error::InsufficientData`] if any fold holds fewer than
/// `min_fold_size` rows.
pub fn cross_fit(x: &[f64], p: usize, y: &[f64], d: &[f64], config: &DmlConfig, seed: u64) -> Result<CrossFit> {
    let n = y.len();
    if d.len() != n || x.len() != n * p {
        return Err(Error::Validation(format!(
            "cross-fit dimensions: y {n}, d {}, x {} (p = {p})",
            d.len(),
            x.len()
        )));
    }
    let k = config.n_folds;
    if k < 2 {
        return Err(Error::Validation(format!("n_folds must be >= 2, got {k}")));
    }
    if n < k * config.min_fold_size {
        return Err(Error::InsufficientData(format!(
            "{n} rows cannot fill {k} folds of at least {} rows",
            config.min_fold_size
        )));
    }

    let fold_of = assign_folds(n, k, seed);
    let members = fold_members(&fold_of, k);
    if let Some((f, m)) = members.iter().enumerate().find(|(_, m)| m.len() < config.min_fold_size) {
        return Err(Error::InsufficientData(format!(
            "fold {f} has {} rows, minimum is {}",
            m.len(),
            config.min_fold_size
        )));
    }

    let outcome = learner_from_config(&config.outcome_learner);
    let treatment = learner_from_config(&config.treatment_learner);
    let ctx = FoldContext {
        x,
        p,
        y,
        d,
        fold_of: &fold_of,
        outcome: outcome.as_ref(),
        treatment: treatment.as_ref(),
        seed,
    };
    let predictions = members
        .par_iter()
        .enumerate()
        .map(|(f, held_out)| ctx.fit_fold(f, held_out))
        .collect::<Result<Vec<_>>>()?;

    let mut outcome_residuals = vec![f64::NAN; n];
    let mut treatment_residuals = vec![f64::NAN; n];
    let mut predicted_by = vec![usize::MAX; n];
    let mut training_rows = vec![Vec::new(); k];
    for fp in predictions {
        for ((&i, yh), dh) in fp.rows.iter().zip(&fp.y_hat).zip(&fp.d_hat) {
            outcome_residuals[i] = y[i] - yh;
            treatment_residuals[i] = d[i] - dh;
            predicted_by[i] = fp.fold;
        }
        if config.record_audit {
            training_rows[fp.fold] = fp.training;
        }
    }
    if outcome_residuals.iter().chain(&treatment_residuals).any(|v| !v.is_finite()) {
        return Err(Error::Computation("non-finite out-of-fold residual".into()));
    }

    let audit = config.record_audit.then(|| CrossFitAudit { fold_of, training_rows, predicted_by });
    Ok(CrossFit { outcome_residuals, treatment_residuals, audit })
}

/// Partialling-out estimate and its influence-function standard error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartiallingOut {
    /// `mean(ry·rd) / mean(rd²)`.
    pub beta: f64,
    /// `sd(ψ) / √n`.
    pub std_error: f64,
    /// Rows.
    pub n_obs: usize,
}

/// Final-stage estimate from out-of-fold residuals.
///
/// `ψ_i = (ry_i − β·rd_i)·rd_i / mean(rd²)`. Fails with
/// [`Error::Singularity`] when the treatment residuals carry no variation.
pub fn partialling_out(outcome_residuals: &[f64], treatment_residuals: &[f64]) -> Result<PartiallingOut> {
    let n = outcome_residuals.len();
    if n < 2 || treatment_residuals.len() != n {
        return Err(Error::InsufficientData(format!("partialling-out needs >= 2 paired residuals, got {n}")));
    }
    let nf = n as f64;
    let denom = treatment_residuals.iter().map(|r| r * r).sum::<f64>() / nf;
    if denom <= 1e-12 {
        return Err(Error::Singularity("treatment residuals have no variation".into()));
    }
    let numer = outcome_residuals.iter().zip(treatment_residuals).map(|(a, b)| a * b).sum::<f64>() / nf;
    let beta = numer / denom;

    let psi: Vec<f64> = outcome_residuals
        .iter()
        .zip(treatment_residuals)
        .map(|(ry, rd)| (ry - beta * rd) * rd / denom)
        .collect();
    let mean = psi.iter().sum::<f64>() / nf;
    let var = psi.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (nf - 1.0);
    Ok(PartiallingOut { beta, std_error: (var / nf).sqrt(), n_obs: n })
}

/// Cross-fit then estimate.
pub fn partially_linear(
    x: &[f64],
    p: usize,
    y: &[f64],
    d: &[f64],
    config: &DmlConfig,
    seed: u64,
) -> Result<(PartiallingOut, Option<CrossFitAudit>)> {
    let cf = cross_fit(x, p, y, d, config, seed)?;
    let est = partialling_out(&cf.outcome_residuals, &cf.treatment_residuals)?;
    Ok((est, cf.audit))
}
