//! Single-shot joint fit via relaxation and sign rounding.
//!
//! The bilinear coupling is relaxed by letting every group's weights take
//! either sign, which turns the whole problem into one convex solve. Each
//! group is then rounded to the sign carrying most of its relaxed weight, and
//! one exact sign-restricted solve produces the returned feasible model. Two
//! solver calls in total, no iteration; the result upper-bounds the exact
//! search and typically lands close to it.

use crate::data::{Partition, ProblemData, check_compatible};
use crate::model::FittedModel;
use crate::nnls::NnlsVariant;
use crate::objective::regularized_objective;
use crate::subproblem::{Subproblem, factor_weights};
use crate::types::{FitError, GroupState, Sign};

/// Configuration for the joint convex fit.
#[derive(Debug, Clone)]
pub struct JointOptions {
    /// Regularization strength applied to the group scales.
    pub eta: f64,
    pub nnls: NnlsVariant,
}

impl Default for JointOptions {
    fn default() -> Self {
        Self {
            eta: 0.0,
            nnls: NnlsVariant::default(),
        }
    }
}

/// Fits one relaxed convex program and rounds it to a feasible model.
pub fn fit(
    data: &ProblemData,
    partition: &Partition,
    options: &JointOptions,
) -> Result<FittedModel, FitError> {
    check_compatible(data, partition)?;
    let solver = options.nnls.solver();
    let groups = partition.num_groups();

    let relaxed_states = vec![GroupState::Free; groups];
    let relaxed = Subproblem::build(data, partition, &relaxed_states, options.eta)
        .solve(solver.as_ref())?;
    log::debug!("relaxed joint solve reached {:.6e}", relaxed.objective);

    let rounded_states: Vec<GroupState> = (0..groups)
        .map(|group| {
            let mass: f64 = partition
                .members(group)
                .iter()
                .map(|&m| relaxed.weights[m])
                .sum();
            GroupState::Fixed(Sign::of(mass))
        })
        .collect();

    let solution =
        Subproblem::build(data, partition, &rounded_states, options.eta).solve(solver.as_ref())?;
    let (a, b) = factor_weights(partition, solution.weights.view());
    let objective = regularized_objective(
        data.x().view(),
        data.y().view(),
        partition,
        a.view(),
        b.view(),
        solution.intercept,
        options.eta,
    );
    log::info!("joint fit objective {objective:.6e}");

    Ok(FittedModel {
        objective,
        a,
        b,
        intercept: solution.intercept,
        partition: partition.clone(),
    })
}
