//! Assembly of sign-restricted least squares sub-problems.
//!
//! Fixing the sign of every group's scale coefficient collapses the bilinear
//! objective into a convex non-negative least squares problem; leaving a group
//! `Free` relaxes its sign constraint entirely. Both cases are expressed with
//! the same augmented system:
//!
//! - a group fixed to sign `s` contributes one column `s * X_m` per member,
//!   with coefficient `u_m >= 0` and effective weight `w_m = s * u_m`;
//! - a free group contributes a positive and a negated copy of each member
//!   column, so its effective weights `u+ - u-` are unconstrained in sign;
//! - the intercept always enters as a free `+1`/`-1` column pair and is never
//!   penalized;
//! - for `eta > 0`, one extra row per non-empty group carries `sqrt(eta)` in
//!   all of that group's columns against a zero target, so the least squares
//!   value of the augmented system equals `loss + eta * sum_k (sum_m u_m)^2`,
//!   which is exactly `eta * ||b||^2` once the solution is renormalized.
//!
//! Any full-sign completion embeds into a relaxed system with identical
//! objective value (zero out the halves that disagree with the completion's
//! signs), which is what makes the relaxed optimum a valid lower bound.

use crate::data::{Partition, ProblemData};
use crate::nnls::{NnlsError, NnlsSolution, NnlsSolver};
use crate::types::{GroupState, Sign};
use ndarray::{Array1, Array2, ArrayView1};

#[derive(Clone, Copy, Debug)]
enum ColumnRole {
    Attribute { attribute: usize, sign: Sign },
    Intercept { sign: Sign },
}

/// One assembled sub-problem, ready to hand to an NNLS solver.
pub struct Subproblem {
    matrix: Array2<f64>,
    target: Array1<f64>,
    columns: Vec<ColumnRole>,
    attributes: usize,
}

/// The sub-problem's answer, mapped back from augmented coordinates.
#[derive(Debug, Clone)]
pub struct SubproblemSolution {
    /// Effective per-attribute weights `w_m`.
    pub weights: Array1<f64>,
    /// The fitted intercept.
    pub intercept: f64,
    /// Optimal value of the augmented system: the loss plus the group-scale
    /// penalty (relaxed penalty for free groups).
    pub objective: f64,
}

impl Subproblem {
    /// Assembles the augmented system for one per-group constraint choice.
    pub fn build(
        data: &ProblemData,
        partition: &Partition,
        states: &[GroupState],
        eta: f64,
    ) -> Self {
        assert_eq!(states.len(), partition.num_groups());
        let n = data.num_examples();
        let x = data.x();

        let mut columns = Vec::new();
        for (group, &state) in states.iter().enumerate() {
            for &attribute in partition.members(group) {
                match state {
                    GroupState::Fixed(sign) => {
                        columns.push(ColumnRole::Attribute { attribute, sign });
                    }
                    GroupState::Free => {
                        columns.push(ColumnRole::Attribute {
                            attribute,
                            sign: Sign::Positive,
                        });
                        columns.push(ColumnRole::Attribute {
                            attribute,
                            sign: Sign::Negative,
                        });
                    }
                }
            }
        }
        columns.push(ColumnRole::Intercept {
            sign: Sign::Positive,
        });
        columns.push(ColumnRole::Intercept {
            sign: Sign::Negative,
        });

        let penalized_groups: Vec<usize> = if eta > 0.0 {
            (0..partition.num_groups())
                .filter(|&k| !partition.members(k).is_empty())
                .collect()
        } else {
            Vec::new()
        };

        let rows = n + penalized_groups.len();
        let mut matrix = Array2::<f64>::zeros((rows, columns.len()));
        let sqrt_eta = eta.sqrt();
        for (c, role) in columns.iter().enumerate() {
            match *role {
                ColumnRole::Attribute { attribute, sign } => {
                    let factor = sign.factor();
                    for i in 0..n {
                        matrix[[i, c]] = factor * x[[i, attribute]];
                    }
                    let group = partition.group_of(attribute);
                    if let Some(offset) = penalized_groups.iter().position(|&k| k == group) {
                        matrix[[n + offset, c]] = sqrt_eta;
                    }
                }
                ColumnRole::Intercept { sign } => {
                    let factor = sign.factor();
                    for i in 0..n {
                        matrix[[i, c]] = factor;
                    }
                }
            }
        }

        let mut target = Array1::<f64>::zeros(rows);
        target.slice_mut(ndarray::s![..n]).assign(data.y());

        Self {
            matrix,
            target,
            columns,
            attributes: data.num_attributes(),
        }
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_rows(&self) -> usize {
        self.matrix.nrows()
    }

    /// Solves the assembled system and maps the answer back to `(w, t)`.
    pub fn solve(&self, solver: &dyn NnlsSolver) -> Result<SubproblemSolution, NnlsError> {
        let nnls = solver.solve(self.matrix.view(), self.target.view())?;
        Ok(self.interpret(&nnls))
    }

    fn interpret(&self, nnls: &NnlsSolution) -> SubproblemSolution {
        let mut weights = Array1::<f64>::zeros(self.attributes);
        let mut intercept = 0.0;
        for (c, role) in self.columns.iter().enumerate() {
            let value = nnls.coefficients[c];
            match *role {
                ColumnRole::Attribute { attribute, sign } => {
                    weights[attribute] += sign.factor() * value;
                }
                ColumnRole::Intercept { sign } => {
                    intercept += sign.factor() * value;
                }
            }
        }
        SubproblemSolution {
            weights,
            intercept,
            objective: nnls.residual_norm_squared,
        }
    }
}

/// Factors sign-coherent effective weights into the normalized `(a, b)` pair.
///
/// Within a group every non-zero weight shares one sign, so the group sum `s`
/// carries both the sign and the magnitude of the scale coefficient: `b_k = s`
/// and `a_m = w_m / s`, which is non-negative and sums to one. A group whose
/// weights are all zero gets `b_k = 0` and a uniform direction vector.
pub fn factor_weights(
    partition: &Partition,
    weights: ArrayView1<f64>,
) -> (Array1<f64>, Array1<f64>) {
    let mut a = Array1::<f64>::zeros(partition.num_attributes());
    let mut b = Array1::<f64>::zeros(partition.num_groups());
    for group in 0..partition.num_groups() {
        let members = partition.members(group);
        if members.is_empty() {
            continue;
        }
        let scale: f64 = members.iter().map(|&m| weights[m]).sum();
        if scale.abs() > 0.0 {
            b[group] = scale;
            for &m in members {
                a[m] = weights[m] / scale;
            }
        } else {
            let uniform = 1.0 / members.len() as f64;
            for &m in members {
                a[m] = uniform;
            }
        }
    }
    (a, b)
}
