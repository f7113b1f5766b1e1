use clap::{Parser, Subcommand, ValueEnum};
use partls::altmin::{self, AltOptions, Checkpoint};
use partls::bnb::{self, BnbOptions};
use partls::data::{ProblemData, load_partition, load_tabular};
use partls::joint::{self, JointOptions};
use partls::model::FittedModel;
use partls::nnls::NnlsVariant;
use partls::types::BranchOrder;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "partls",
    about = "Fit and apply partitioned least squares models",
    long_about = "Fits linear models whose attribute weights factor into per-group direction and \
                 scale coefficients, using an alternating heuristic, a single relaxed convex \
                 solve, or an exact branch-and-bound search."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StrategyArg {
    /// Alternating convex solves, a fast local heuristic
    Alt,
    /// One relaxed joint solve with sign rounding
    Opt,
    /// Exact branch-and-bound search
    Bnb,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum NnlsArg {
    Pivot,
    ActiveSet,
}

impl From<NnlsArg> for NnlsVariant {
    fn from(arg: NnlsArg) -> Self {
        match arg {
            NnlsArg::Pivot => NnlsVariant::Pivot,
            NnlsArg::ActiveSet => NnlsVariant::ActiveSet,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BranchOrderArg {
    InOrder,
    Influence,
}

impl From<BranchOrderArg> for BranchOrder {
    fn from(arg: BranchOrderArg) -> Self {
        match arg {
            BranchOrderArg::InOrder => BranchOrder::InOrder,
            BranchOrderArg::Influence => BranchOrder::InfluenceDescending,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a model from a CSV of attributes and a response column
    #[command(about = "Fit a partitioned model (outputs: model.toml)")]
    Fit {
        /// Training CSV; every column except the response is an attribute
        data: PathBuf,

        /// Name of the response column
        #[arg(long, default_value = "y")]
        response: String,

        /// CSV with a 'group' column holding the 0-based group index of each
        /// attribute, in design-matrix column order
        #[arg(long)]
        partition: PathBuf,

        /// Fitting strategy
        #[arg(long, value_enum, default_value = "bnb")]
        strategy: StrategyArg,

        /// Regularization strength on the group scales
        #[arg(long, default_value_t = 0.0)]
        eta: f64,

        /// Maximum alternating rounds (alt strategy and warm starts)
        #[arg(long, default_value_t = 20)]
        rounds: usize,

        /// Early-stop tolerance on the per-round improvement (alt strategy)
        #[arg(long, default_value_t = 1e-8)]
        tolerance: f64,

        /// NNLS algorithm used for every convex sub-solve
        #[arg(long, value_enum, default_value = "pivot")]
        nnls: NnlsArg,

        /// Group order for the exact search
        #[arg(long, value_enum, default_value = "in-order")]
        branch_order: BranchOrderArg,

        /// Worker threads for the exact search; 0 uses every core
        #[arg(long, default_value_t = 1)]
        workers: usize,

        /// Stop the exact search after this many opened nodes
        #[arg(long)]
        node_budget: Option<u64>,

        /// Stop the exact search after this many seconds
        #[arg(long)]
        time_budget_secs: Option<u64>,

        /// Skip the alternating warm start before the exact search
        #[arg(long)]
        no_warm_start: bool,

        /// Write an alternating checkpoint here after every round
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Resume the alternating strategy from a checkpoint file
        #[arg(long)]
        resume: Option<PathBuf>,

        /// Where to write the fitted model
        #[arg(long, default_value = "model.toml")]
        output: PathBuf,
    },

    /// Apply a trained model to new data
    #[command(about = "Predict responses for new examples (outputs: CSV)")]
    Predict {
        /// A model file written by `fit`
        model: PathBuf,

        /// CSV of attribute columns in training order
        data: PathBuf,

        /// Where to write the predictions
        #[arg(long, default_value = "predictions.csv")]
        output: PathBuf,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(error) = run(cli) {
        eprintln!("error: {error}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Fit {
            data,
            response,
            partition,
            strategy,
            eta,
            rounds,
            tolerance,
            nnls,
            branch_order,
            workers,
            node_budget,
            time_budget_secs,
            no_warm_start,
            checkpoint,
            resume,
            output,
        } => {
            let loaded = load_tabular(&data, Some(&response))?;
            let response_values = loaded.y.expect("response column was requested");
            let problem = ProblemData::new(loaded.x, response_values)?;
            let partition = load_partition(&partition, problem.num_attributes())?;
            log::info!(
                "loaded {} examples over {} attributes in {} groups",
                problem.num_examples(),
                problem.num_attributes(),
                partition.num_groups()
            );

            let model = match strategy {
                StrategyArg::Alt => {
                    let options = AltOptions {
                        eta,
                        rounds,
                        tolerance,
                        nnls: nnls.into(),
                        resume: resume.as_deref().map(Checkpoint::load).transpose()?,
                    };
                    fit_alternating(&problem, &partition, &options, checkpoint.as_deref())?
                }
                StrategyArg::Opt => {
                    let options = JointOptions {
                        eta,
                        nnls: nnls.into(),
                    };
                    joint::fit(&problem, &partition, &options)?
                }
                StrategyArg::Bnb => {
                    let options = BnbOptions {
                        eta,
                        nnls: nnls.into(),
                        branch_order: branch_order.into(),
                        workers,
                        node_budget,
                        time_budget: time_budget_secs.map(Duration::from_secs),
                        warm_start: !no_warm_start,
                    };
                    let report = bnb::fit(&problem, &partition, &options)?;
                    println!(
                        "opened {} nodes ({})",
                        report.nodes_opened,
                        if report.proven_optimal {
                            "proven optimal"
                        } else {
                            "budget exhausted, incumbent not proven optimal"
                        }
                    );
                    report.model
                }
            };

            println!("objective: {:.6e}", model.objective);
            model.save(&output)?;
            println!("model written to {}", output.display());
            Ok(())
        }
        Commands::Predict {
            model,
            data,
            output,
        } => {
            let model = FittedModel::load(&model)?;
            let loaded = load_tabular(&data, None)?;
            let predictions = model.predict(loaded.x.view())?;

            let mut writer = csv::Writer::from_path(&output)?;
            writer.write_record(["prediction"])?;
            for value in &predictions {
                writer.write_record([format!("{value}")])?;
            }
            writer.flush()?;
            println!(
                "{} predictions written to {}",
                predictions.len(),
                output.display()
            );
            Ok(())
        }
    }
}

fn fit_alternating(
    problem: &ProblemData,
    partition: &partls::data::Partition,
    options: &AltOptions,
    checkpoint_path: Option<&Path>,
) -> Result<FittedModel, partls::types::FitError> {
    altmin::fit_with_observer(problem, partition, options, |checkpoint| {
        if let Some(path) = checkpoint_path
            && let Err(error) = checkpoint.save(path)
        {
            log::warn!(
                "failed to write checkpoint after round {}: {error}",
                checkpoint.round
            );
        }
    })
}
