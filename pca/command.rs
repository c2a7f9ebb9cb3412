use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::config::{AlsConfig, ConfigError};
use super::error::AlsError;
use super::fit::{AlsPca, FitOutcome};
use super::io::{CsvLoadError, read_csv_path};
use super::model::{AlsPcaModel, ModelError};
use super::progress::FitProgressObserver;
use super::runtime::CancellationToken;

/// High-level commands that can be executed by the front end.
#[derive(Debug)]
pub enum PcaCommand {
    Fit {
        input_path: PathBuf,
        config: AlsConfig,
        output_path: Option<PathBuf>,
    },
}

/// Errors that can occur when executing [`PcaCommand`]s.
#[derive(Debug)]
pub enum PcaDriverError {
    Als(AlsError),
    Input(CsvLoadError),
    Config(ConfigError),
    Model(ModelError),
    Cancelled { iterations: usize },
}

impl fmt::Display for PcaDriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Als(err) => write!(f, "factorization error: {err}"),
            Self::Input(err) => write!(f, "input error: {err}"),
            Self::Config(err) => write!(f, "configuration error: {err}"),
            Self::Model(err) => write!(f, "model output error: {err}"),
            Self::Cancelled { iterations } => {
                write!(f, "fit was cancelled after {iterations} iterations")
            }
        }
    }
}

impl std::error::Error for PcaDriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Als(err) => Some(err),
            Self::Input(err) => Some(err),
            Self::Config(err) => Some(err),
            Self::Model(err) => Some(err),
            Self::Cancelled { .. } => None,
        }
    }
}

impl From<AlsError> for PcaDriverError {
    fn from(value: AlsError) -> Self {
        Self::Als(value)
    }
}

impl From<CsvLoadError> for PcaDriverError {
    fn from(value: CsvLoadError) -> Self {
        Self::Input(value)
    }
}

impl From<ConfigError> for PcaDriverError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<ModelError> for PcaDriverError {
    fn from(value: ModelError) -> Self {
        Self::Model(value)
    }
}

/// A fitted model together with the column names it was fitted on.
#[derive(Debug)]
pub struct FitReport {
    pub column_names: Vec<String>,
    pub model: AlsPcaModel,
}

/// Execute the provided [`PcaCommand`].
pub fn run(
    command: PcaCommand,
    progress: Arc<dyn FitProgressObserver>,
    cancellation: CancellationToken,
) -> Result<FitReport, PcaDriverError> {
    match command {
        PcaCommand::Fit {
            input_path,
            config,
            output_path,
        } => run_fit(
            &input_path,
            config,
            output_path.as_deref(),
            progress,
            cancellation,
        ),
    }
}

fn run_fit(
    input_path: &Path,
    config: AlsConfig,
    output_path: Option<&Path>,
    progress: Arc<dyn FitProgressObserver>,
    cancellation: CancellationToken,
) -> Result<FitReport, PcaDriverError> {
    log::info!("Loading {}", input_path.display());
    let loaded = read_csv_path(input_path, config.rows_per_partition, config.transform)?;

    let outcome = AlsPca::new(config)
        .with_progress(progress)
        .with_cancellation(cancellation)
        .fit(&loaded.matrix)?;

    let model = match outcome {
        FitOutcome::Converged(model) => *model,
        FitOutcome::Cancelled { iterations } => {
            return Err(PcaDriverError::Cancelled { iterations });
        }
    };

    if let Some(path) = output_path {
        model.save(path)?;
        log::info!("Model written to {}", path.display());
    }

    Ok(FitReport {
        column_names: loaded.column_names,
        model,
    })
}

/// Renders the importance table and principal directions as plain text.
pub fn format_summary(report: &FitReport) -> String {
    let model = &report.model;
    let table = model.importance();
    let mut out = String::new();

    out.push_str(&format!(
        "Converged after {} iterations ({:?}); avg change in objective {:.3e}\n\n",
        model.iterations(),
        model.stop_reason(),
        model.avg_change_obj()
    ));

    out.push_str(&format!("{:<24}", "Importance of components"));
    for c in 0..model.components() {
        out.push_str(&format!("{:>12}", format!("PC{}", c + 1)));
    }
    out.push('\n');
    let rows: [(&str, &[f64]); 3] = [
        ("Standard deviation", &table.std_deviation),
        ("Proportion of Variance", &table.proportion_of_variance),
        ("Cumulative Proportion", &table.cumulative_proportion),
    ];
    for (label, values) in rows {
        out.push_str(&format!("{label:<24}"));
        for value in values {
            out.push_str(&format!("{value:>12.5}"));
        }
        out.push('\n');
    }

    out.push_str("\nEigenvectors\n");
    let vectors = model.eigenvectors();
    for (j, name) in report.column_names.iter().enumerate() {
        out.push_str(&format!("{name:<24}"));
        for c in 0..vectors.ncols() {
            out.push_str(&format!("{:>12.5}", vectors[(j, c)]));
        }
        out.push('\n');
    }
    out
}
