//! Sinkhorn-Knopp budget allocation for the four memory streams.
//!
//! Signal counts per stream feed a 4×4 affinity matrix (self-affinity on
//! the diagonal, fixed semantic adjacency off it). Alternating row/column
//! normalization produces a doubly-stochastic mixing matrix whose diagonal
//! shares become token budgets, reconciled to the exact total by largest
//! remainder.

use serde::{Deserialize, Serialize};

/// The four long-lived memory streams, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Identity,
    Projects,
    Tasks,
    Flow,
}

impl StreamKind {
    pub const ALL: [StreamKind; 4] = [
        StreamKind::Identity,
        StreamKind::Projects,
        StreamKind::Tasks,
        StreamKind::Flow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Projects => "projects",
            Self::Tasks => "tasks",
            Self::Flow => "flow",
        }
    }

    /// Index in canonical order.
    pub fn index(&self) -> usize {
        match self {
            Self::Identity => 0,
            Self::Projects => 1,
            Self::Tasks => 2,
            Self::Flow => 3,
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Iteration cap.
const MAX_ITERATIONS: usize = 200;

/// Convergence tolerance on row/column sums.
const TOLERANCE: f64 = 1e-6;

/// Guard against zero rows/columns before normalization.
const EPSILON: f64 = 1e-9;

/// Semantic adjacency between neighboring streams, strongest along the
/// identity → projects → tasks → flow chain.
const ADJACENCY: [[f64; 4]; 4] = [
    [0.0, 0.5, 0.2, 0.2],
    [0.5, 0.0, 0.6, 0.2],
    [0.2, 0.6, 0.0, 0.7],
    [0.2, 0.2, 0.7, 0.0],
];

/// Outcome of a Sinkhorn run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkhornResult {
    pub matrix: [[f64; 4]; 4],
    pub converged: bool,
    pub iterations: usize,
}

/// Build the affinity matrix from per-stream signal counts.
pub fn affinity_matrix(signal_counts: [f64; 4]) -> [[f64; 4]; 4] {
    let mut matrix = ADJACENCY;
    for (i, row) in matrix.iter_mut().enumerate() {
        row[i] = 1.0 + signal_counts[i].max(0.0);
    }
    matrix
}

/// Alternately normalize rows then columns until doubly stochastic.
///
/// Bails after 200 iterations; the convergence flag records whether the
/// tolerance was reached, but the last matrix is returned either way.
pub fn sinkhorn_normalize(mut matrix: [[f64; 4]; 4]) -> SinkhornResult {
    for iteration in 0..MAX_ITERATIONS {
        // Rows.
        for row in &mut matrix {
            let sum: f64 = row.iter().sum::<f64>() + EPSILON;
            for value in row.iter_mut() {
                *value /= sum;
            }
        }
        // Columns.
        for j in 0..4 {
            let sum: f64 = (0..4).map(|i| matrix[i][j]).sum::<f64>() + EPSILON;
            for i in 0..4 {
                matrix[i][j] /= sum;
            }
        }

        let deviation = max_deviation(&matrix);
        if deviation < TOLERANCE {
            return SinkhornResult {
                matrix,
                converged: true,
                iterations: iteration + 1,
            };
        }
    }
    SinkhornResult {
        matrix,
        converged: false,
        iterations: MAX_ITERATIONS,
    }
}

/// Largest deviation of any row or column sum from 1.
fn max_deviation(matrix: &[[f64; 4]; 4]) -> f64 {
    let mut worst = 0.0f64;
    for row in matrix {
        worst = worst.max((row.iter().sum::<f64>() - 1.0).abs());
    }
    for j in 0..4 {
        let sum: f64 = (0..4).map(|i| matrix[i][j]).sum();
        worst = worst.max((sum - 1.0).abs());
    }
    worst
}

/// Convert the mixing matrix diagonal into token budgets.
///
/// Diagonal entries are normalized into shares; each stream gets the floor
/// of its share, and leftover tokens go to the largest remainders so the
/// budgets sum to `total_budget` exactly.
pub fn token_budgets(matrix: &[[f64; 4]; 4], total_budget: usize) -> [usize; 4] {
    let diagonal: [f64; 4] = [matrix[0][0], matrix[1][1], matrix[2][2], matrix[3][3]];
    let sum: f64 = diagonal.iter().sum();
    let shares: [f64; 4] = if sum > 0.0 {
        [
            diagonal[0] / sum,
            diagonal[1] / sum,
            diagonal[2] / sum,
            diagonal[3] / sum,
        ]
    } else {
        [0.25; 4]
    };

    let mut budgets = [0usize; 4];
    let mut remainders: Vec<(usize, f64)> = Vec::with_capacity(4);
    let mut allocated = 0usize;
    for i in 0..4 {
        let exact = total_budget as f64 * shares[i];
        budgets[i] = exact.floor() as usize;
        allocated += budgets[i];
        remainders.push((i, exact - exact.floor()));
    }

    remainders.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let mut leftover = total_budget.saturating_sub(allocated);
    for (index, _) in remainders {
        if leftover == 0 {
            break;
        }
        budgets[index] += 1;
        leftover -= 1;
    }
    budgets
}

/// Run the full allocation: counts → affinity → Sinkhorn → budgets.
pub fn allocate(signal_counts: [f64; 4], total_budget: usize) -> (SinkhornResult, [usize; 4]) {
    let result = sinkhorn_normalize(affinity_matrix(signal_counts));
    let budgets = token_budgets(&result.matrix, total_budget);
    (result, budgets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_is_doubly_stochastic() {
        let result = sinkhorn_normalize(affinity_matrix([3.0, 10.0, 5.0, 1.0]));
        assert!(result.converged);
        for row in &result.matrix {
            let sum: f64 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-4, "row sum = {sum}");
        }
        for j in 0..4 {
            let sum: f64 = (0..4).map(|i| result.matrix[i][j]).sum();
            assert!((sum - 1.0).abs() < 1e-4, "col sum = {sum}");
        }
    }

    #[test]
    fn zero_signals_still_normalize() {
        let result = sinkhorn_normalize(affinity_matrix([0.0; 4]));
        for row in &result.matrix {
            assert!(row.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn budgets_sum_exactly() {
        for total in [0usize, 1, 7, 1_000, 99_999] {
            let (result, budgets) = allocate([2.0, 8.0, 3.0, 1.0], total);
            assert!(result.iterations <= 200);
            assert_eq!(budgets.iter().sum::<usize>(), total, "total = {total}");
        }
    }

    #[test]
    fn dominant_stream_gets_largest_budget() {
        let (_, budgets) = allocate([0.0, 50.0, 0.0, 0.0], 10_000);
        let projects = budgets[StreamKind::Projects.index()];
        assert!(projects >= budgets[0]);
        assert!(projects >= budgets[2]);
        assert!(projects >= budgets[3]);
    }

    #[test]
    fn equal_signals_give_near_equal_budgets() {
        let (_, budgets) = allocate([5.0; 4], 1_000);
        // Adjacency is not perfectly symmetric, but budgets stay close.
        let max = *budgets.iter().max().unwrap();
        let min = *budgets.iter().min().unwrap();
        assert!(max - min < 100, "budgets = {budgets:?}");
    }

    #[test]
    fn stream_kind_order_is_canonical() {
        for (i, kind) in StreamKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
        assert_eq!(StreamKind::Flow.as_str(), "flow");
    }
}
