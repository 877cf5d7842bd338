//! Least squares on fixed-effect-absorbed data with cluster-robust inference.

use std::collections::HashMap;

use ec_core::{Error, Result};
use nalgebra::{DMatrix, DVector};

/// Result of a least-squares fit on already-demeaned columns.
#[derive(Debug, Clone)]
pub struct WithinFit {
    /// Coefficients, one per regressor column.
    pub coefficients: Vec<f64>,
    /// Cluster-robust standard errors.
    pub std_errors: Vec<f64>,
    /// Number of observations.
    pub n_obs: usize,
    /// Number of distinct clusters.
    pub n_clusters: usize,
    /// Within residuals.
    pub residuals: Vec<f64>,
}

/// OLS of `y` on the columns of `x` (no intercept; data assumed demeaned).
///
/// `df_absorbed` enters the small-sample correction alongside the number of
/// regressors. Returns [`Error::Singularity`] if `X'X` is not invertible.
pub fn within_ols(
    x: &DMatrix<f64>,
    y: &DVector<f64>,
    cluster_ids: &[usize],
    df_absorbed: usize,
) -> Result<WithinFit> {
    let n = x.nrows();
    let p = x.ncols();
    if y.len() != n || cluster_ids.len() != n {
        return Err(Error::Validation(format!(
            "dimension mismatch: x has {n} rows, y has {}, clusters has {}",
            y.len(),
            cluster_ids.len()
        )));
    }
    if p == 0 {
        return Err(Error::Validation("no regressors".into()));
    }
    if n <= p {
        return Err(Error::InsufficientData(format!("{n} observations for {p} regressors")));
    }

    let xt = x.transpose();
    let xtx = &xt * x;
    let xty = &xt * y;
    let xtx_inv = xtx
        .try_inverse()
        .ok_or_else(|| Error::Singularity("X'X is singular after absorbing fixed effects".into()))?;
    let beta = &xtx_inv * xty;
    if beta.iter().any(|b| !b.is_finite()) {
        return Err(Error::Singularity("non-finite coefficients".into()));
    }
    let residuals = y - x * &beta;

    let (std_errors, n_clusters) = cluster_robust_se(x, &residuals, &xtx_inv, cluster_ids, df_absorbed)?;

    Ok(WithinFit {
        coefficients: beta.iter().copied().collect(),
        std_errors,
        n_obs: n,
        n_clusters,
        residuals: residuals.iter().copied().collect(),
    })
}

/// Liang–Zeger sandwich `(X'X)⁻¹ (Σ_g X_g' e_g e_g' X_g) (X'X)⁻¹` with the
/// correction `G/(G-1) · (N-1)/(N-K)`, `K = p + df_absorbed`.
///
/// Returns the standard errors and the number of clusters.
pub fn cluster_robust_se(
    x: &DMatrix<f64>,
    residuals: &DVector<f64>,
    xtx_inv: &DMatrix<f64>,
    cluster_ids: &[usize],
    df_absorbed: usize,
) -> Result<(Vec<f64>, usize)> {
    let n = x.nrows();
    let p = x.ncols();

    let mut scores: HashMap<usize, Vec<f64>> = HashMap::new();
    for (i, &cid) in cluster_ids.iter().enumerate() {
        let s = scores.entry(cid).or_insert_with(|| vec![0.0; p]);
        let e_i = residuals[i];
        for j in 0..p {
            s[j] += x[(i, j)] * e_i;
        }
    }
    let g = scores.len();
    if g < 2 {
        return Err(Error::InsufficientData(format!(
            "cluster-robust variance needs at least 2 clusters, got {g}"
        )));
    }

    // Sum in cluster-id order so the meat is independent of hash order.
    let mut ordered: Vec<(&usize, &Vec<f64>)> = scores.iter().collect();
    ordered.sort_by_key(|(cid, _)| **cid);
    let mut meat = DMatrix::zeros(p, p);
    for (_, s_g) in ordered {
        for a in 0..p {
            for b in 0..p {
                meat[(a, b)] += s_g[a] * s_g[b];
            }
        }
    }

    let g_f = g as f64;
    let n_f = n as f64;
    let k_f = (p + df_absorbed) as f64;
    let correction =
        if n_f > k_f { (g_f / (g_f - 1.0)) * ((n_f - 1.0) / (n_f - k_f)) } else { g_f / (g_f - 1.0) };

    let vcr = (xtx_inv * &meat) * xtx_inv * correction;
    let se = (0..p).map(|j| vcr[(j, j)].max(0.0).sqrt()).collect();
    Ok((se, g))
}
