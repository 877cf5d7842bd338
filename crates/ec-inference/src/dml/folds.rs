//! Seeded K-fold partition.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Assign each of `n` rows to one of `k` folds.
///
/// Rows are shuffled with `seed` and dealt round-robin, so fold sizes differ
/// by at most one.
pub fn assign_folds(n: usize, k: usize, seed: u64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));
    let mut fold = vec![0; n];
    for (pos, &row) in order.iter().enumerate() {
        fold[row] = pos % k.max(1);
    }
    fold
}

/// Row indices of every fold, ascending within each fold.
pub fn fold_members(assignment: &[usize], k: usize) -> Vec<Vec<usize>> {
    let mut members = vec![Vec::new(); k];
    for (row, &f) in assignment.iter().enumerate() {
        members[f].push(row);
    }
    members
}
