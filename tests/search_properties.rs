//! Properties the search machinery must uphold: bound validity against
//! sampled completions and the anytime behavior under budgets.

use ndarray::{Array1, Array2};
use partls::bnb::{self, BnbOptions};
use partls::bound::RelaxationBounder;
use partls::data::{Partition, ProblemData};
use partls::nnls::NnlsVariant;
use partls::objective::regularized_objective;
use partls::subproblem::factor_weights;
use partls::types::Sign;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

fn random_problem(seed: u64, examples: usize, attributes: usize) -> ProblemData {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 1.0).unwrap();
    let x = Array2::from_shape_fn((examples, attributes), |_| noise.sample(&mut rng));
    let weights = Array1::from_shape_fn(attributes, |_| noise.sample(&mut rng));
    let y = x.dot(&weights) + Array1::from_shape_fn(examples, |_| 0.5 * noise.sample(&mut rng));
    ProblemData::new(x, y).unwrap()
}

fn random_signs(rng: &mut StdRng, len: usize) -> Vec<Sign> {
    (0..len)
        .map(|_| {
            if rng.r#gen::<bool>() {
                Sign::Positive
            } else {
                Sign::Negative
            }
        })
        .collect()
}

#[test]
fn bounds_never_exceed_sampled_completion_objectives() {
    let mut rng = StdRng::seed_from_u64(1234);
    for seed in [11, 42, 77] {
        let data = random_problem(seed, 20, 6);
        let partition = Partition::from_assignments(vec![0, 0, 1, 1, 2, 2], 3).unwrap();
        let order: Vec<usize> = (0..partition.num_groups()).collect();
        for eta in [0.0, 0.3] {
            let bounder =
                RelaxationBounder::new(&data, &partition, &order, eta, NnlsVariant::Pivot);
            for depth in 0..=partition.num_groups() {
                let prefix = random_signs(&mut rng, depth);
                let bound = bounder.bound(&prefix);
                for _ in 0..4 {
                    let mut completion = prefix.clone();
                    completion
                        .extend(random_signs(&mut rng, partition.num_groups() - depth));
                    let leaf = bounder.solve_completion(&completion).unwrap();
                    let (a, b) = factor_weights(&partition, leaf.weights.view());
                    let objective = regularized_objective(
                        data.x().view(),
                        data.y().view(),
                        &partition,
                        a.view(),
                        b.view(),
                        leaf.intercept,
                        eta,
                    );
                    assert!(
                        bound <= objective + 1e-7,
                        "depth {depth}, eta {eta}: bound {bound} exceeds completion {objective}"
                    );
                }
            }
        }
    }
}

#[test]
fn exhausted_search_beats_every_sampled_assignment() {
    let data = random_problem(99, 22, 6);
    let partition = Partition::from_assignments(vec![0, 1, 1, 2, 2, 2], 3).unwrap();
    let report = bnb::fit(&data, &partition, &BnbOptions::default()).unwrap();
    assert!(report.proven_optimal);

    let order: Vec<usize> = (0..partition.num_groups()).collect();
    let bounder = RelaxationBounder::new(&data, &partition, &order, 0.0, NnlsVariant::Pivot);
    let mut rng = StdRng::seed_from_u64(5);
    for _ in 0..8 {
        let signs = random_signs(&mut rng, partition.num_groups());
        let leaf = bounder.solve_completion(&signs).unwrap();
        let (a, b) = factor_weights(&partition, leaf.weights.view());
        let objective = regularized_objective(
            data.x().view(),
            data.y().view(),
            &partition,
            a.view(),
            b.view(),
            leaf.intercept,
            0.0,
        );
        assert!(report.model.objective <= objective + 1e-7);
    }
}

#[test]
fn tight_time_budget_still_returns_a_model() {
    let data = random_problem(55, 20, 6);
    let partition = Partition::from_assignments(vec![0, 0, 1, 1, 2, 2], 3).unwrap();
    let report = bnb::fit(
        &data,
        &partition,
        &BnbOptions {
            time_budget: Some(std::time::Duration::from_secs(0)),
            ..BnbOptions::default()
        },
    )
    .unwrap();
    assert!(!report.proven_optimal);
    assert!(report.model.objective.is_finite());
}

#[test]
fn exact_model_predictions_are_stable() {
    let data = random_problem(8, 15, 4);
    let partition = Partition::from_assignments(vec![0, 0, 1, 1], 2).unwrap();
    let report = bnb::fit(&data, &partition, &BnbOptions::default()).unwrap();
    let first = report.model.predict(data.x().view()).unwrap();
    let second = report.model.predict(data.x().view()).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 15);
}
