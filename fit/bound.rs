//! Lower bounds for partially assigned sign patterns.
//!
//! The bound for a prefix of sign decisions is the optimum of the relaxed
//! sub-problem in which every undecided group is left `Free`. Each completion
//! of the prefix embeds into that relaxed feasible set at an identical
//! objective value, so the relaxed optimum can never exceed the optimum of
//! any completion. This validity is what the whole search's correctness
//! rests on; it is exercised directly by property tests rather than guarded
//! at runtime.

use crate::data::{Partition, ProblemData};
use crate::nnls::{NnlsError, NnlsSolver, NnlsVariant};
use crate::subproblem::{Subproblem, SubproblemSolution};
use crate::types::{GroupState, Sign};

pub struct RelaxationBounder<'a> {
    data: &'a ProblemData,
    partition: &'a Partition,
    order: &'a [usize],
    eta: f64,
    solver: Box<dyn NnlsSolver>,
}

impl<'a> RelaxationBounder<'a> {
    /// `order` lists the groups in branch order; `prefix` arguments to
    /// [`bound`](Self::bound) are sign decisions for `order[0..len]`.
    pub fn new(
        data: &'a ProblemData,
        partition: &'a Partition,
        order: &'a [usize],
        eta: f64,
        variant: NnlsVariant,
    ) -> Self {
        Self {
            data,
            partition,
            order,
            eta,
            solver: variant.solver(),
        }
    }

    /// Per-group constraint states implied by a sign prefix.
    pub fn states(&self, prefix: &[Sign]) -> Vec<GroupState> {
        debug_assert!(prefix.len() <= self.order.len());
        let mut states = vec![GroupState::Free; self.partition.num_groups()];
        for (position, &sign) in prefix.iter().enumerate() {
            states[self.order[position]] = GroupState::Fixed(sign);
        }
        states
    }

    /// A lower bound on the objective of every completion of `prefix`.
    ///
    /// A failed relaxed solve yields negative infinity: the node cannot be
    /// pruned on the strength of a bound that was never computed.
    pub fn bound(&self, prefix: &[Sign]) -> f64 {
        let states = self.states(prefix);
        let subproblem = Subproblem::build(self.data, self.partition, &states, self.eta);
        match subproblem.solve(self.solver.as_ref()) {
            Ok(solution) => solution.objective,
            Err(error) => {
                log::debug!(
                    "relaxed bound solve failed at depth {}: {error}; keeping node",
                    prefix.len()
                );
                f64::NEG_INFINITY
            }
        }
    }

    /// Exact solve of a fully assigned leaf.
    pub fn solve_completion(&self, signs: &[Sign]) -> Result<SubproblemSolution, NnlsError> {
        debug_assert_eq!(signs.len(), self.order.len());
        let states = self.states(signs);
        Subproblem::build(self.data, self.partition, &states, self.eta).solve(self.solver.as_ref())
    }
}
