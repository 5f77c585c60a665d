//! Rectangular Hungarian (Kuhn-Munkres) assignment.
//!
//! Solves `min Σ cost(i, assign(i))` over one-to-one assignments of rows to
//! columns of a cost matrix with `nrows <= ncols` (wider-than-tall inputs are
//! handled by the caller padding with dummy columns, which is how "no match"
//! slots are usually expressed). Runs in O(n³) using the potential/augmenting
//! path formulation.

use nalgebra::DMatrix;

/// Minimizing assignment: `result[row] = column`.
///
/// Every row is assigned exactly one distinct column. Requires
/// `costs.nrows() <= costs.ncols()`; returns an empty vector for an empty
/// matrix.
pub fn minimize(costs: &DMatrix<f64>) -> Vec<usize> {
    let n = costs.nrows();
    let m = costs.ncols();
    if n == 0 {
        return Vec::new();
    }
    assert!(
        n <= m,
        "cost matrix must have nrows <= ncols (pad with dummy columns)"
    );

    // Potentials over rows and columns; way[j] remembers the augmenting
    // path. Indices are 1-based internally with 0 as the virtual root.
    let mut u = vec![0.0f64; n + 1];
    let mut v = vec![0.0f64; m + 1];
    let mut match_col = vec![0usize; m + 1]; // column -> row (1-based, 0 = free)
    let mut way = vec![0usize; m + 1];

    for i in 1..=n {
        match_col[0] = i;
        let mut j0 = 0usize;
        let mut min_v = vec![f64::INFINITY; m + 1];
        let mut used = vec![false; m + 1];
        loop {
            used[j0] = true;
            let i0 = match_col[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0usize;
            for j in 1..=m {
                if used[j] {
                    continue;
                }
                let cur = costs[(i0 - 1, j - 1)] - u[i0] - v[j];
                if cur < min_v[j] {
                    min_v[j] = cur;
                    way[j] = j0;
                }
                if min_v[j] < delta {
                    delta = min_v[j];
                    j1 = j;
                }
            }
            for j in 0..=m {
                if used[j] {
                    u[match_col[j]] += delta;
                    v[j] -= delta;
                } else {
                    min_v[j] -= delta;
                }
            }
            j0 = j1;
            if match_col[j0] == 0 {
                break;
            }
        }
        // augment along the path
        loop {
            let j1 = way[j0];
            match_col[j0] = match_col[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut assignment = vec![0usize; n];
    for j in 1..=m {
        if match_col[j] > 0 {
            assignment[match_col[j] - 1] = j - 1;
        }
    }
    assignment
}

/// Total cost of an assignment produced by [`minimize`].
pub fn assignment_cost(costs: &DMatrix<f64>, assignment: &[usize]) -> f64 {
    assignment
        .iter()
        .enumerate()
        .map(|(row, &col)| costs[(row, col)])
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn identity_diagonal() {
        let costs = DMatrix::from_row_slice(3, 3, &[1.0, 2.0, 3.0, 2.0, 1.0, 3.0, 3.0, 2.0, 1.0]);
        let assignment = minimize(&costs);
        assert_eq!(assignment, vec![0, 1, 2]);
        assert_relative_eq!(assignment_cost(&costs, &assignment), 3.0);
    }

    #[test]
    fn forced_off_diagonal() {
        // picking the diagonal would cost 3.0; the optimum crosses over
        let costs = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 2.0]);
        let assignment = minimize(&costs);
        assert_eq!(assignment, vec![1, 0]);
        assert_relative_eq!(assignment_cost(&costs, &assignment), 0.0);
    }

    #[test]
    fn rectangular_uses_cheapest_columns() {
        let costs = DMatrix::from_row_slice(2, 4, &[5.0, 1.0, 9.0, 9.0, 5.0, 2.0, 0.5, 9.0]);
        let assignment = minimize(&costs);
        assert_eq!(assignment, vec![1, 2]);
    }

    #[test]
    fn columns_assigned_at_most_once() {
        let costs = DMatrix::from_row_slice(3, 5, &[
            1.0, 1.0, 1.0, 1.0, 1.0, //
            1.0, 1.0, 1.0, 1.0, 1.0, //
            1.0, 1.0, 1.0, 1.0, 1.0,
        ]);
        let assignment = minimize(&costs);
        let mut cols = assignment.clone();
        cols.sort_unstable();
        cols.dedup();
        assert_eq!(cols.len(), 3, "distinct columns");
    }

    #[test]
    fn empty_matrix() {
        let costs = DMatrix::<f64>::zeros(0, 0);
        assert!(minimize(&costs).is_empty());
    }

    #[test]
    fn known_optimum() {
        let costs = DMatrix::from_row_slice(3, 3, &[
            4.0, 1.0, 3.0, //
            2.0, 0.0, 5.0, //
            3.0, 2.0, 2.0,
        ]);
        let assignment = minimize(&costs);
        assert_relative_eq!(assignment_cost(&costs, &assignment), 5.0);
    }
}
