//! Cross-strategy behavior: the exact search must dominate both heuristics and
//! agree with independent computations of the optimum.

use approx::assert_abs_diff_eq;
use ndarray::{Array1, Array2};
use ndarray_linalg::Solve;
use partls::altmin::{self, AltOptions};
use partls::bnb::{self, BnbOptions};
use partls::data::{Partition, ProblemData};
use partls::joint::{self, JointOptions};
use partls::nnls::NnlsVariant;
use partls::objective::{regularized_objective, residuals, squared_norm};
use partls::subproblem::{Subproblem, factor_weights};
use partls::types::{GroupState, Sign};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

fn random_problem(seed: u64, examples: usize, attributes: usize) -> ProblemData {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 1.0).unwrap();
    let x = Array2::from_shape_fn((examples, attributes), |_| noise.sample(&mut rng));
    let weights = Array1::from_shape_fn(attributes, |_| noise.sample(&mut rng));
    let y = x.dot(&weights) + Array1::from_shape_fn(examples, |_| 0.3 * noise.sample(&mut rng));
    ProblemData::new(x, y).unwrap()
}

/// Independent reference: solve every one of the 2^K sign assignments exactly
/// and keep the best regularized objective.
fn brute_force_optimum(data: &ProblemData, partition: &Partition, eta: f64) -> f64 {
    let groups = partition.num_groups();
    let solver = NnlsVariant::Pivot.solver();
    let mut best = f64::INFINITY;
    for mask in 0u32..(1 << groups) {
        let states: Vec<GroupState> = (0..groups)
            .map(|g| {
                GroupState::Fixed(if mask >> g & 1 == 1 {
                    Sign::Negative
                } else {
                    Sign::Positive
                })
            })
            .collect();
        let Ok(solution) = Subproblem::build(data, partition, &states, eta).solve(solver.as_ref())
        else {
            continue;
        };
        let (a, b) = factor_weights(partition, solution.weights.view());
        let objective = regularized_objective(
            data.x().view(),
            data.y().view(),
            partition,
            a.view(),
            b.view(),
            solution.intercept,
            eta,
        );
        best = best.min(objective);
    }
    best
}

#[test]
fn exact_search_matches_brute_force_and_dominates_heuristics() {
    for seed in [7, 23, 91] {
        for eta in [0.0, 0.4] {
            let data = random_problem(seed, 24, 6);
            let partition = Partition::from_assignments(vec![0, 0, 1, 1, 2, 2], 3).unwrap();

            let exact = bnb::fit(
                &data,
                &partition,
                &BnbOptions {
                    eta,
                    ..BnbOptions::default()
                },
            )
            .unwrap();
            assert!(exact.proven_optimal);

            let reference = brute_force_optimum(&data, &partition, eta);
            assert_abs_diff_eq!(exact.model.objective, reference, epsilon = 1e-6);

            let alternating = altmin::fit(
                &data,
                &partition,
                &AltOptions {
                    eta,
                    ..AltOptions::default()
                },
            )
            .unwrap();
            assert!(
                exact.model.objective <= alternating.objective + 1e-7,
                "seed {seed}, eta {eta}: exact {} > alternating {}",
                exact.model.objective,
                alternating.objective
            );

            let rounded = joint::fit(
                &data,
                &partition,
                &JointOptions {
                    eta,
                    nnls: NnlsVariant::Pivot,
                },
            )
            .unwrap();
            assert!(
                exact.model.objective <= rounded.objective + 1e-7,
                "seed {seed}, eta {eta}: exact {} > joint {}",
                exact.model.objective,
                rounded.objective
            );
        }
    }
}

#[test]
fn singleton_groups_reduce_to_ridge_regression() {
    // With every attribute in its own group the direction coefficients are
    // forced to one, so the model is an ordinary ridge fit with a free sign
    // per attribute and an unpenalized intercept.
    let eta = 0.7;
    let data = random_problem(41, 30, 4);
    let partition = Partition::from_assignments(vec![0, 1, 2, 3], 4).unwrap();

    let report = bnb::fit(
        &data,
        &partition,
        &BnbOptions {
            eta,
            ..BnbOptions::default()
        },
    )
    .unwrap();

    let n = data.num_examples();
    let m = data.num_attributes();
    let design = Array2::from_shape_fn((n, m + 1), |(i, j)| {
        if j < m { data.x()[[i, j]] } else { 1.0 }
    });
    let mut normal = design.t().dot(&design);
    for i in 0..m {
        normal[[i, i]] += eta;
    }
    let rhs = design.t().dot(data.y());
    let coefficients = normal.solve(&rhs).unwrap();
    let fitted = design.dot(&coefficients);
    let direct_objective = squared_norm((&fitted - data.y()).view())
        + eta * coefficients.iter().take(m).map(|c| c * c).sum::<f64>();

    assert_abs_diff_eq!(report.model.objective, direct_objective, epsilon = 1e-5);
    for i in 0..m {
        assert_abs_diff_eq!(report.model.a[i], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(report.model.b[i], coefficients[i], epsilon = 1e-5);
    }
}

#[test]
fn single_group_collapses_to_two_leaves() {
    let data = random_problem(5, 16, 3);
    let partition = Partition::from_assignments(vec![0, 0, 0], 1).unwrap();

    let report = bnb::fit(
        &data,
        &partition,
        &BnbOptions {
            warm_start: false,
            ..BnbOptions::default()
        },
    )
    .unwrap();
    assert_eq!(report.nodes_opened, 3);

    let reference = brute_force_optimum(&data, &partition, 0.0);
    assert_abs_diff_eq!(report.model.objective, reference, epsilon = 1e-7);
}

#[test]
fn predictor_reproduces_the_training_residual() {
    let eta = 0.25;
    let data = random_problem(17, 20, 5);
    let partition = Partition::from_assignments(vec![0, 0, 1, 1, 1], 2).unwrap();
    let model = altmin::fit(
        &data,
        &partition,
        &AltOptions {
            eta,
            ..AltOptions::default()
        },
    )
    .unwrap();

    let predictions = model.predict(data.x().view()).unwrap();
    let loss = squared_norm((&predictions - data.y()).view());
    let objective = loss + eta * squared_norm(model.b.view());
    assert_abs_diff_eq!(objective, model.objective, epsilon = 1e-8);

    // The evaluator's residual helper agrees with the predictor.
    let weights =
        partls::objective::effective_weights(&partition, model.a.view(), model.b.view());
    let r = residuals(
        data.x().view(),
        data.y().view(),
        weights.view(),
        model.intercept,
    );
    assert_abs_diff_eq!(squared_norm(r.view()), loss, epsilon = 1e-8);
}

#[test]
fn node_count_stays_within_the_full_tree() {
    let data = random_problem(3, 18, 6);
    let partition = Partition::from_assignments(vec![0, 1, 1, 2, 2, 2], 3).unwrap();
    let report = bnb::fit(
        &data,
        &partition,
        &BnbOptions {
            warm_start: false,
            ..BnbOptions::default()
        },
    )
    .unwrap();
    // Root plus at most two children per interior node of the sign tree.
    assert!(report.nodes_opened >= 3);
    assert!(report.nodes_opened <= (1u64 << (partition.num_groups() + 1)) - 1);
}
