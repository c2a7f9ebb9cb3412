#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use alspca::pca::command::{self, PcaCommand, PcaDriverError};
use alspca::pca::{
    AlsConfig, CancellationToken, FitProgressObserver, FitProgressStage, IterationReport,
    Parallelism, TransformKind,
};

#[derive(Clone, Copy, ValueEnum)]
enum TransformCli {
    None,
    Demean,
    Descale,
    Standardize,
}

impl From<TransformCli> for TransformKind {
    fn from(value: TransformCli) -> Self {
        match value {
            TransformCli::None => TransformKind::None,
            TransformCli::Demean => TransformKind::Demean,
            TransformCli::Descale => TransformKind::Descale,
            TransformCli::Standardize => TransformKind::Standardize,
        }
    }
}

#[derive(Parser)]
#[command(
    name = "alspca",
    version,
    about = "Regularized PCA by alternating least squares over partitioned rows"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a regularized PCA model to a numeric CSV table
    #[command(about = "Fit an ALS PCA model (optionally writes model.toml)")]
    Fit {
        /// CSV file with a header row; empty, NA and NaN cells are missing
        #[arg(value_name = "CSV_PATH")]
        input_path: PathBuf,

        /// TOML configuration; command-line flags override its values
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Rank of the factorization
        #[arg(short = 'k', long, value_name = "N")]
        k: Option<usize>,

        /// Quadratic regularization weight
        #[arg(long)]
        gamma: Option<f64>,

        #[arg(long, value_name = "N")]
        max_iterations: Option<usize>,

        /// Stop once the average per-cell objective change is below this value
        #[arg(long)]
        tolerance: Option<f64>,

        /// Column transform applied before fitting
        #[arg(long, value_enum)]
        transform: Option<TransformCli>,

        /// Seed for the random row initializer
        #[arg(long)]
        seed: Option<u64>,

        /// Worker threads for the dedicated pool; 1 runs every phase sequentially
        #[arg(long, value_name = "N")]
        threads: Option<usize>,

        #[arg(long, value_name = "ROWS")]
        rows_per_partition: Option<usize>,

        /// Where to write the fitted model as TOML
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

/// Draws one tick per completed iteration on stderr.
struct IterationProgress {
    bar: ProgressBar,
}

impl IterationProgress {
    fn new(max_iterations: usize) -> Self {
        let draw_target = if std::io::stderr().is_terminal() {
            ProgressDrawTarget::stderr_with_hz(20)
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(Some(max_iterations as u64), draw_target);
        let style = ProgressStyle::with_template(
            "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} iterations {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");
        bar.set_style(style);
        Self { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl FitProgressObserver for IterationProgress {
    fn on_stage_start(&self, stage: FitProgressStage, _iteration: usize) {
        if matches!(
            stage,
            FitProgressStage::Initialization | FitProgressStage::Recovery
        ) {
            self.bar.set_message(stage.describe().to_string());
        }
    }

    fn on_iteration(&self, report: &IterationReport) {
        self.bar.set_position(report.iteration as u64);
        self.bar.set_message(format!(
            "objective {:.6e}, avg change {:.3e}",
            report.objective, report.avg_change_obj
        ));
    }
}

#[allow(clippy::too_many_arguments)]
fn run_fit(
    input_path: PathBuf,
    config_path: Option<PathBuf>,
    k: Option<usize>,
    gamma: Option<f64>,
    max_iterations: Option<usize>,
    tolerance: Option<f64>,
    transform: Option<TransformCli>,
    seed: Option<u64>,
    threads: Option<usize>,
    rows_per_partition: Option<usize>,
    output: Option<PathBuf>,
) -> Result<(), PcaDriverError> {
    let mut config = match config_path {
        Some(path) => AlsConfig::load(&path)?,
        None => AlsConfig::default(),
    };
    if let Some(k) = k {
        config.k = k;
    }
    if let Some(gamma) = gamma {
        config.gamma = gamma;
    }
    if let Some(max_iterations) = max_iterations {
        config.max_iterations = max_iterations;
    }
    if let Some(tolerance) = tolerance {
        config.tolerance = tolerance;
    }
    if let Some(transform) = transform {
        config.transform = transform.into();
    }
    if seed.is_some() {
        config.seed = seed;
    }
    if let Some(rows) = rows_per_partition {
        config.rows_per_partition = rows;
    }
    match threads {
        Some(1) => config.parallelism = Parallelism::Sequential,
        Some(count) => {
            config.parallelism = Parallelism::Rayon;
            config.threads = Some(count);
        }
        None => {}
    }

    let progress = Arc::new(IterationProgress::new(config.max_iterations));
    let result = command::run(
        PcaCommand::Fit {
            input_path,
            config,
            output_path: output,
        },
        progress.clone(),
        CancellationToken::new(),
    );
    progress.finish();

    let report = result?;
    print!("{}", command::format_summary(&report));
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { command } = Cli::parse();
    let result = match command {
        Some(Commands::Fit {
            input_path,
            config,
            k,
            gamma,
            max_iterations,
            tolerance,
            transform,
            seed,
            threads,
            rows_per_partition,
            output,
        }) => run_fit(
            input_path,
            config,
            k,
            gamma,
            max_iterations,
            tolerance,
            transform,
            seed,
            threads,
            rows_per_partition,
            output,
        ),
        None => {
            if let Err(e) = Cli::command().print_help() {
                eprintln!("Error: {e}");
                process::exit(1);
            }
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
