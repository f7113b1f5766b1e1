//! # Non-Negative Least Squares Sub-Solver
//!
//! Solves `min ||A c - z||^2` subject to `c >= 0` for the dense systems
//! assembled by the sign-restricted sub-problems. Two algorithm variants are
//! available behind the `NnlsSolver` trait, selected by the `NnlsVariant` tag:
//!
//! - `Pivot`: block principal pivoting (Portugal, Judice, Vicente) with
//!   Murty's single-exchange backup rule, the default.
//! - `ActiveSet`: the Lawson-Hanson active set method, run on the precomputed
//!   normal equations.
//!
//! Both variants are deterministic for a fixed input. They work on the Gram
//! matrix `A'A`, so each inner step is a small symmetric solve over the
//! current passive set. A solver that exhausts its iteration budget reports
//! `NnlsError::Convergence`; callers treat that as recoverable and may retry
//! with the other variant or absorb the failure per search node.

use crate::objective::squared_norm;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use ndarray_linalg::{LeastSquaresSvd, Solve};
use thiserror::Error;

/// Complementary-slackness tolerance shared by both variants.
pub const DUAL_TOLERANCE: f64 = 1e-10;

/// Threshold below which a coefficient is considered to sit on its bound.
const ZERO_TOLERANCE: f64 = 1e-12;

/// Full exchanges allowed without progress before falling back to Murty's rule.
const BACKUP_EXCHANGES: usize = 3;

#[derive(Error, Debug)]
pub enum NnlsError {
    #[error("the {algorithm} NNLS solver did not reach optimality within {iterations} iterations")]
    Convergence {
        algorithm: &'static str,
        iterations: usize,
    },

    #[error("an inner linear solve over the passive set failed: {0}")]
    Singular(#[from] ndarray_linalg::error::LinalgError),

    #[error("design matrix has {rows} rows but the target vector has {len}")]
    TargetLength { rows: usize, len: usize },
}

/// The non-negative solution of one sub-problem.
#[derive(Debug, Clone)]
pub struct NnlsSolution {
    /// The coefficient vector, elementwise non-negative.
    pub coefficients: Array1<f64>,
    /// `||A c - z||^2` at the returned coefficients.
    pub residual_norm_squared: f64,
    /// Pivoting or active-set iterations spent.
    pub iterations: usize,
}

/// Enumerated algorithm choice, the configuration surface for solver selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum NnlsVariant {
    #[default]
    Pivot,
    ActiveSet,
}

impl NnlsVariant {
    pub fn name(self) -> &'static str {
        match self {
            NnlsVariant::Pivot => "pivot",
            NnlsVariant::ActiveSet => "active-set",
        }
    }

    /// Instantiates the selected algorithm with its default iteration budget.
    pub fn solver(self) -> Box<dyn NnlsSolver> {
        match self {
            NnlsVariant::Pivot => Box::new(BlockPivoting::default()),
            NnlsVariant::ActiveSet => Box::new(ActiveSet::default()),
        }
    }
}

/// Capability interface implemented by each concrete algorithm variant.
pub trait NnlsSolver: Send + Sync {
    fn solve(&self, a: ArrayView2<f64>, z: ArrayView1<f64>) -> Result<NnlsSolution, NnlsError>;
}

/// One-shot convenience wrapper around `NnlsVariant::solver`.
pub fn solve_nnls(
    variant: NnlsVariant,
    a: ArrayView2<f64>,
    z: ArrayView1<f64>,
) -> Result<NnlsSolution, NnlsError> {
    variant.solver().solve(a, z)
}

/// Block principal pivoting. Exchanges whole blocks of infeasible indices
/// between the free and bound sets, falling back to single exchanges of the
/// largest infeasible index (Murty's rule) when the infeasibility count stops
/// shrinking, which guarantees finite termination.
pub struct BlockPivoting {
    pub max_iterations: usize,
}

impl Default for BlockPivoting {
    fn default() -> Self {
        Self { max_iterations: 0 }
    }
}

impl NnlsSolver for BlockPivoting {
    fn solve(&self, a: ArrayView2<f64>, z: ArrayView1<f64>) -> Result<NnlsSolution, NnlsError> {
        check_target(a, z)?;
        let p = a.ncols();
        let budget = effective_budget(self.max_iterations, p);
        let (gram, rhs) = normal_equations(a, z);

        let mut free = vec![false; p];
        let mut x = Array1::<f64>::zeros(p);
        let mut dual = -rhs.clone();
        let mut best_infeasible = usize::MAX;
        let mut backup = BACKUP_EXCHANGES;

        for iteration in 1..=budget {
            let infeasible: Vec<usize> = (0..p)
                .filter(|&i| {
                    if free[i] {
                        x[i] < -DUAL_TOLERANCE
                    } else {
                        dual[i] < -DUAL_TOLERANCE
                    }
                })
                .collect();
            if infeasible.is_empty() {
                return Ok(finish(a, z, x, iteration));
            }

            if infeasible.len() < best_infeasible {
                best_infeasible = infeasible.len();
                backup = BACKUP_EXCHANGES;
                for &i in &infeasible {
                    free[i] = !free[i];
                }
            } else if backup > 0 {
                backup -= 1;
                for &i in &infeasible {
                    free[i] = !free[i];
                }
            } else {
                let worst = *infeasible.last().unwrap_or(&0);
                free[worst] = !free[worst];
            }

            let set: Vec<usize> = (0..p).filter(|&i| free[i]).collect();
            x.fill(0.0);
            if set.is_empty() {
                dual = -rhs.clone();
            } else {
                let solution = solve_on_set(&gram, &rhs, &set)?;
                for (i, &column) in set.iter().enumerate() {
                    x[column] = solution[i];
                }
                dual = gram.dot(&x) - &rhs;
                for &column in &set {
                    dual[column] = 0.0;
                }
            }
        }

        Err(NnlsError::Convergence {
            algorithm: "pivot",
            iterations: budget,
        })
    }
}

/// Lawson-Hanson active set, expressed on the normal equations so that the
/// design matrix is touched only once.
pub struct ActiveSet {
    pub max_iterations: usize,
}

impl Default for ActiveSet {
    fn default() -> Self {
        Self { max_iterations: 0 }
    }
}

impl NnlsSolver for ActiveSet {
    fn solve(&self, a: ArrayView2<f64>, z: ArrayView1<f64>) -> Result<NnlsSolution, NnlsError> {
        check_target(a, z)?;
        let p = a.ncols();
        let budget = effective_budget(self.max_iterations, p);
        let (gram, rhs) = normal_equations(a, z);

        let mut passive = vec![false; p];
        let mut x = Array1::<f64>::zeros(p);
        let mut gradient = rhs.clone();
        let mut iterations = 0usize;

        loop {
            iterations += 1;
            if iterations > budget {
                return Err(NnlsError::Convergence {
                    algorithm: "active-set",
                    iterations: budget,
                });
            }

            // Entering column: steepest positive gradient among bound columns.
            let mut entering: Option<usize> = None;
            for i in 0..p {
                if passive[i] || gradient[i] <= DUAL_TOLERANCE {
                    continue;
                }
                match entering {
                    Some(best) if gradient[i] <= gradient[best] => {}
                    _ => entering = Some(i),
                }
            }
            let Some(j) = entering else {
                return Ok(finish(a, z, x, iterations));
            };
            passive[j] = true;

            loop {
                iterations += 1;
                if iterations > budget {
                    return Err(NnlsError::Convergence {
                        algorithm: "active-set",
                        iterations: budget,
                    });
                }

                let set: Vec<usize> = (0..p).filter(|&i| passive[i]).collect();
                let trial = solve_on_set(&gram, &rhs, &set)?;
                if trial.iter().all(|&v| v > ZERO_TOLERANCE) {
                    x.fill(0.0);
                    for (i, &column) in set.iter().enumerate() {
                        x[column] = trial[i];
                    }
                    break;
                }

                // Longest feasible step toward the trial point.
                let mut alpha = f64::INFINITY;
                for (i, &column) in set.iter().enumerate() {
                    if trial[i] <= ZERO_TOLERANCE {
                        let denominator = x[column] - trial[i];
                        if denominator > 0.0 {
                            alpha = alpha.min(x[column] / denominator);
                        }
                    }
                }
                if !alpha.is_finite() {
                    alpha = 0.0;
                }
                for (i, &column) in set.iter().enumerate() {
                    x[column] += alpha * (trial[i] - x[column]);
                }
                for &column in &set {
                    if x[column] <= ZERO_TOLERANCE {
                        x[column] = 0.0;
                        passive[column] = false;
                    }
                }
            }

            gradient = &rhs - &gram.dot(&x);
        }
    }
}

fn check_target(a: ArrayView2<f64>, z: ArrayView1<f64>) -> Result<(), NnlsError> {
    if a.nrows() != z.len() {
        return Err(NnlsError::TargetLength {
            rows: a.nrows(),
            len: z.len(),
        });
    }
    Ok(())
}

fn effective_budget(configured: usize, columns: usize) -> usize {
    if configured > 0 {
        configured
    } else {
        50 + 10 * columns
    }
}

fn normal_equations(a: ArrayView2<f64>, z: ArrayView1<f64>) -> (Array2<f64>, Array1<f64>) {
    (a.t().dot(&a), a.t().dot(&z))
}

/// Solves the normal equations restricted to one index set.
///
/// The right-hand side always lies in the range of the Gram submatrix, so
/// when exactly collinear columns (e.g. a column and its negation at zero
/// regularization) make the direct factorization singular, the minimum-norm
/// least squares solution is still a valid minimizer and the pivoting loop
/// can continue.
fn solve_on_set(
    gram: &Array2<f64>,
    rhs: &Array1<f64>,
    set: &[usize],
) -> Result<Array1<f64>, NnlsError> {
    let k = set.len();
    let mut sub = Array2::<f64>::zeros((k, k));
    let mut sub_rhs = Array1::<f64>::zeros(k);
    for (i, &ci) in set.iter().enumerate() {
        sub_rhs[i] = rhs[ci];
        for (j, &cj) in set.iter().enumerate() {
            sub[[i, j]] = gram[[ci, cj]];
        }
    }
    match sub.solve(&sub_rhs) {
        Ok(solution) => Ok(solution),
        Err(_) => Ok(sub.least_squares(&sub_rhs)?.solution),
    }
}

fn finish(a: ArrayView2<f64>, z: ArrayView1<f64>, x: Array1<f64>, iterations: usize) -> NnlsSolution {
    let coefficients = x.mapv(|v| if v > 0.0 { v } else { 0.0 });
    let residual = &a.dot(&coefficients) - &z;
    NnlsSolution {
        residual_norm_squared: squared_norm(residual.view()),
        coefficients,
        iterations,
    }
}
