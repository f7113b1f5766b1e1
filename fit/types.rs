use crate::data::DataError;
use crate::nnls::NnlsError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The sign a group's scale coefficient is constrained to during search.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sign {
    Positive,
    Negative,
}

impl Sign {
    pub fn factor(self) -> f64 {
        match self {
            Sign::Positive => 1.0,
            Sign::Negative => -1.0,
        }
    }

    pub fn of(value: f64) -> Self {
        if value < 0.0 { Sign::Negative } else { Sign::Positive }
    }
}

/// Constraint placed on one group when a sign-restricted sub-problem is assembled.
///
/// `Fixed` pins the group's scale to one sign; `Free` leaves it unconstrained,
/// which is the relaxation used to compute lower bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupState {
    Fixed(Sign),
    Free,
}

/// Order in which the search engine branches over groups.
///
/// The order is fixed for the whole run. It never affects which model is
/// returned, only how many nodes the search opens along the way.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BranchOrder {
    /// Groups in their natural index order.
    #[default]
    InOrder,
    /// Groups by descending Frobenius norm of their column block, ties by index.
    InfluenceDescending,
}

/// A comprehensive error type for the model fitting strategies.
#[derive(Error, Debug)]
pub enum FitError {
    #[error("input validation failed: {0}")]
    Data(#[from] DataError),

    #[error("a non-negative least squares sub-solve failed: {0}")]
    Nnls(#[from] NnlsError),

    #[error(
        "the search ended without a feasible incumbent: no sign assignment admitted a finite least-squares solution for this partition"
    )]
    InfeasibleModel,
}
