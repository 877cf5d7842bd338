//! Ridge regression with an unpenalized intercept.

use ec_core::{Error, FittedRegressor, Regressor, Result};
use nalgebra::{DMatrix, DVector};

/// Ridge-regularized least squares. `ridge = 0` gives minimum-norm OLS.
#[derive(Debug, Clone)]
pub struct RidgeRegressor {
    ridge: f64,
}

impl RidgeRegressor {
    /// Create with L2 penalty `ridge`.
    pub fn new(ridge: f64) -> Self {
        Self { ridge }
    }
}

/// Fitted intercept and slopes.
#[derive(Debug, Clone)]
pub struct RidgeModel {
    intercept: f64,
    coef: Vec<f64>,
}

impl RidgeModel {
    /// Intercept.
    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Slopes, one per feature.
    pub fn coefficients(&self) -> &[f64] {
        &self.coef
    }
}

pub(crate) fn check_design(x: &[f64], p: usize, n: usize) -> Result<()> {
    if p == 0 {
        return Err(Error::Validation("feature matrix has no columns".into()));
    }
    if x.len() != n * p {
        return Err(Error::Validation(format!("x has length {}, expected {n} × {p}", x.len())));
    }
    Ok(())
}

impl Regressor for RidgeRegressor {
    fn fit(&self, x: &[f64], p: usize, y: &[f64], _seed: u64) -> Result<Box<dyn FittedRegressor>> {
        let n = y.len();
        check_design(x, p, n)?;
        if n == 0 {
            return Err(Error::InsufficientData("ridge fit on zero rows".into()));
        }

        // Center so the intercept stays out of the penalty.
        let mut x_mean = vec![0.0; p];
        for row in x.chunks_exact(p) {
            for (m, v) in x_mean.iter_mut().zip(row) {
                *m += v;
            }
        }
        x_mean.iter_mut().for_each(|m| *m /= n as f64);
        let y_mean = y.iter().sum::<f64>() / n as f64;

        let mut xtx = DMatrix::<f64>::zeros(p, p);
        let mut xty = DVector::<f64>::zeros(p);
        let mut xc = vec![0.0; p];
        for (row, &yi) in x.chunks_exact(p).zip(y) {
            for j in 0..p {
                xc[j] = row[j] - x_mean[j];
            }
            let yc = yi - y_mean;
            for a in 0..p {
                xty[a] += xc[a] * yc;
                for b in a..p {
                    xtx[(a, b)] += xc[a] * xc[b];
                }
            }
        }
        for a in 0..p {
            for b in 0..a {
                xtx[(a, b)] = xtx[(b, a)];
            }
            xtx[(a, a)] += self.ridge;
        }

        // SVD handles the collinear one-hot blocks when the penalty is zero.
        let coef = xtx
            .svd(true, true)
            .solve(&xty, 1e-10)
            .map_err(|e| Error::Computation(format!("ridge solve failed: {e}")))?;
        let coef: Vec<f64> = coef.iter().copied().collect();
        if coef.iter().any(|c| !c.is_finite()) {
            return Err(Error::Computation("ridge produced non-finite coefficients".into()));
        }
        let intercept = y_mean - coef.iter().zip(&x_mean).map(|(c, m)| c * m).sum::<f64>();
        Ok(Box::new(RidgeModel { intercept, coef }))
    }

    fn name(&self) -> &str {
        "linear"
    }
}

impl FittedRegressor for RidgeModel {
    fn predict(&self, x: &[f64], p: usize) -> Result<Vec<f64>> {
        if p != self.coef.len() || x.len() % p.max(1) != 0 {
            return Err(Error::Validation(format!(
                "predict with {p} features on a model fit with {}",
                self.coef.len()
            )));
        }
        Ok(x.chunks_exact(p)
            .map(|row| self.intercept + row.iter().zip(&self.coef).map(|(v, c)| v * c).sum::<f64>())
            .collect())
    }
}
