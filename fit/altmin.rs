//! # Alternating Optimization
//!
//! The alternating heuristic exploits the biconvexity of the partitioned
//! objective: with the direction coefficients `a` held fixed, the scale
//! coefficients `b` and the intercept solve a convex least squares problem,
//! and vice versa. Each half-step goes through the NNLS sub-solver, so every
//! round is guaranteed not to increase the regularized objective; the loop
//! runs for a bounded number of rounds with an early stop once a full round
//! stops improving.
//!
//! The optimizer is resumable: it accepts a caller-supplied checkpoint and
//! hands an updated checkpoint to an observer after every round. How
//! checkpoints are persisted is the caller's concern; TOML helpers are
//! provided on the type.

use crate::data::{Partition, ProblemData, check_compatible};
use crate::model::{FittedModel, ModelError};
use crate::nnls::{NnlsError, NnlsSolver, NnlsVariant};
use crate::objective::regularized_objective;
use crate::types::FitError;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Configuration for the alternating optimizer.
#[derive(Debug, Clone)]
pub struct AltOptions {
    /// Regularization strength applied to the group scales.
    pub eta: f64,
    /// Maximum number of alternating rounds.
    pub rounds: usize,
    /// Stop early once the per-round objective improvement falls below this.
    pub tolerance: f64,
    pub nnls: NnlsVariant,
    /// Optional state to resume from instead of the deterministic start.
    pub resume: Option<Checkpoint>,
}

impl Default for AltOptions {
    fn default() -> Self {
        Self {
            eta: 0.0,
            rounds: 20,
            tolerance: 1e-8,
            nnls: NnlsVariant::default(),
            resume: None,
        }
    }
}

/// Snapshot of the alternating state after a completed round.
///
/// Scalar fields precede the array-valued ones for the TOML serializer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub intercept: f64,
    pub round: usize,
    pub a: Array1<f64>,
    pub b: Array1<f64>,
}

impl Checkpoint {
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let serialized = toml::to_string_pretty(self)?;
        let file = fs::File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(serialized.as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}

/// Fits by alternating convex solves. See [`fit_with_observer`].
pub fn fit(
    data: &ProblemData,
    partition: &Partition,
    options: &AltOptions,
) -> Result<FittedModel, FitError> {
    fit_with_observer(data, partition, options, |_| {})
}

/// Fits by alternating convex solves, reporting a checkpoint after every
/// round. Initialization is deterministic (`b = 1`, `a` uniform within each
/// group) unless a resume checkpoint is supplied.
pub fn fit_with_observer(
    data: &ProblemData,
    partition: &Partition,
    options: &AltOptions,
    mut observer: impl FnMut(&Checkpoint),
) -> Result<FittedModel, FitError> {
    check_compatible(data, partition)?;
    let solver = options.nnls.solver();

    let (mut a, mut b, mut intercept, start_round) = match &options.resume {
        Some(checkpoint) => resume_state(partition, checkpoint)?,
        None => (
            uniform_directions(partition),
            Array1::ones(partition.num_groups()),
            0.0,
            0,
        ),
    };

    let mut objective = regularized_objective(
        data.x().view(),
        data.y().view(),
        partition,
        a.view(),
        b.view(),
        intercept,
        options.eta,
    );
    log::info!(
        "alternating fit over {} groups, {} attributes: starting objective {objective:.6e}",
        partition.num_groups(),
        partition.num_attributes()
    );

    for round in (start_round + 1)..=(start_round + options.rounds) {
        let (scales, shift) = scale_step(data, partition, &a, options.eta, solver.as_ref())?;
        b = scales;
        intercept = shift;

        let refined = direction_step(data, partition, &b, options.eta, solver.as_ref())?;
        a = refined.0;
        b = refined.1;
        intercept = refined.2;

        let next = regularized_objective(
            data.x().view(),
            data.y().view(),
            partition,
            a.view(),
            b.view(),
            intercept,
            options.eta,
        );
        let improvement = objective - next;
        objective = next;
        log::debug!("round {round}: objective {objective:.6e} (improved by {improvement:.3e})");
        observer(&Checkpoint {
            a: a.clone(),
            b: b.clone(),
            intercept,
            round,
        });
        if improvement <= options.tolerance {
            break;
        }
    }

    Ok(FittedModel {
        objective,
        a,
        b,
        intercept,
        partition: partition.clone(),
    })
}

fn resume_state(
    partition: &Partition,
    checkpoint: &Checkpoint,
) -> Result<(Array1<f64>, Array1<f64>, f64, usize), FitError> {
    if checkpoint.a.len() != partition.num_attributes() {
        return Err(crate::data::DataError::DimensionMismatch {
            left_name: "checkpoint directions",
            left: checkpoint.a.len(),
            right_name: "partition",
            right: partition.num_attributes(),
            unit: "attributes",
        }
        .into());
    }
    if checkpoint.b.len() != partition.num_groups() {
        return Err(crate::data::DataError::DimensionMismatch {
            left_name: "checkpoint scales",
            left: checkpoint.b.len(),
            right_name: "partition",
            right: partition.num_groups(),
            unit: "groups",
        }
        .into());
    }
    Ok((
        checkpoint.a.clone(),
        checkpoint.b.clone(),
        checkpoint.intercept,
        checkpoint.round,
    ))
}

fn uniform_directions(partition: &Partition) -> Array1<f64> {
    let mut a = Array1::zeros(partition.num_attributes());
    for group in 0..partition.num_groups() {
        let members = partition.members(group);
        if members.is_empty() {
            continue;
        }
        let uniform = 1.0 / members.len() as f64;
        for &m in members {
            a[m] = uniform;
        }
    }
    a
}

/// Holding `a` fixed, solves for the scales and intercept. The grouped design
/// is `Z = X (P .* a)`; each scale enters as a free split-column pair with a
/// `sqrt(eta)` ridge row, the intercept as an unpenalized pair.
fn scale_step(
    data: &ProblemData,
    partition: &Partition,
    a: &Array1<f64>,
    eta: f64,
    solver: &dyn NnlsSolver,
) -> Result<(Array1<f64>, f64), NnlsError> {
    let n = data.num_examples();
    let k = partition.num_groups();
    let x = data.x();

    let mut grouped = Array2::<f64>::zeros((n, k));
    for m in 0..partition.num_attributes() {
        let group = partition.group_of(m);
        let weight = a[m];
        if weight == 0.0 {
            continue;
        }
        for i in 0..n {
            grouped[[i, group]] += weight * x[[i, m]];
        }
    }

    let penalized: Vec<usize> = if eta > 0.0 {
        (0..k).filter(|&g| !partition.members(g).is_empty()).collect()
    } else {
        Vec::new()
    };
    let rows = n + penalized.len();
    let sqrt_eta = eta.sqrt();

    let mut matrix = Array2::<f64>::zeros((rows, 2 * k + 2));
    for group in 0..k {
        for i in 0..n {
            matrix[[i, 2 * group]] = grouped[[i, group]];
            matrix[[i, 2 * group + 1]] = -grouped[[i, group]];
        }
        if let Some(offset) = penalized.iter().position(|&g| g == group) {
            matrix[[n + offset, 2 * group]] = sqrt_eta;
            matrix[[n + offset, 2 * group + 1]] = sqrt_eta;
        }
    }
    for i in 0..n {
        matrix[[i, 2 * k]] = 1.0;
        matrix[[i, 2 * k + 1]] = -1.0;
    }

    let mut target = Array1::<f64>::zeros(rows);
    target.slice_mut(ndarray::s![..n]).assign(data.y());

    let solution = solver.solve(matrix.view(), target.view())?;
    let c = &solution.coefficients;
    let b = Array1::from_shape_fn(k, |group| c[2 * group] - c[2 * group + 1]);
    let intercept = c[2 * k] - c[2 * k + 1];
    Ok((b, intercept))
}

/// Holding the scales fixed, solves for unnormalized directions against the
/// scaled columns `b_g(m) * X_m`, with `sqrt(eta) * |b_k|` penalty rows so the
/// solve accounts for the renormalization that follows, then renormalizes each
/// group back to unit direction mass.
fn direction_step(
    data: &ProblemData,
    partition: &Partition,
    b: &Array1<f64>,
    eta: f64,
    solver: &dyn NnlsSolver,
) -> Result<(Array1<f64>, Array1<f64>, f64), NnlsError> {
    let n = data.num_examples();
    let m_count = partition.num_attributes();
    let x = data.x();

    let penalized: Vec<usize> = if eta > 0.0 {
        (0..partition.num_groups())
            .filter(|&g| !partition.members(g).is_empty())
            .collect()
    } else {
        Vec::new()
    };
    let rows = n + penalized.len();
    let sqrt_eta = eta.sqrt();

    let mut matrix = Array2::<f64>::zeros((rows, m_count + 2));
    for m in 0..m_count {
        let group = partition.group_of(m);
        let scale = b[group];
        for i in 0..n {
            matrix[[i, m]] = scale * x[[i, m]];
        }
        if let Some(offset) = penalized.iter().position(|&g| g == group) {
            matrix[[n + offset, m]] = sqrt_eta * scale.abs();
        }
    }
    for i in 0..n {
        matrix[[i, m_count]] = 1.0;
        matrix[[i, m_count + 1]] = -1.0;
    }

    let mut target = Array1::<f64>::zeros(rows);
    target.slice_mut(ndarray::s![..n]).assign(data.y());

    let solution = solver.solve(matrix.view(), target.view())?;
    let c = &solution.coefficients;
    let intercept = c[m_count] - c[m_count + 1];

    let mut a = Array1::<f64>::zeros(m_count);
    let mut scales = Array1::<f64>::zeros(partition.num_groups());
    for group in 0..partition.num_groups() {
        let members = partition.members(group);
        if members.is_empty() {
            continue;
        }
        let mass: f64 = members.iter().map(|&m| c[m]).sum();
        if mass > 0.0 && b[group] != 0.0 {
            for &m in members {
                a[m] = c[m] / mass;
            }
            scales[group] = b[group] * mass;
        } else {
            let uniform = 1.0 / members.len() as f64;
            for &m in members {
                a[m] = uniform;
            }
        }
    }
    Ok((a, scales, intercept))
}
