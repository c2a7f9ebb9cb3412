//! The alternating-least-squares driver.
//!
//! A run moves through `INIT -> ITERATING -> {CONVERGED | CANCELLED}`; any error
//! aborts it without leaving partial state behind. Each outer iteration runs four
//! barrier-separated phases over the row partitions:
//!
//! 1. `G_x = X'X / n + (gamma / n) I`, Cholesky-factored;
//! 2. `Y' = (A'X / n) G_x⁻¹`, one small solve per input column;
//! 3. `G_y = Y'ᵀY' + gamma I`, Cholesky-factored;
//! 4. every row of `X` re-solved in place against `G_y`.
//!
//! Termination is checked before each iteration, never in the middle of one.

use super::cholesky::{CholeskyFactor, RegularizedCholesky};
use super::config::{AlsConfig, InitMode};
use super::error::AlsError;
use super::gram::{GramAccumulator, MatrixProductAccumulator, dense_gram};
use super::init::{ClusterInitializer, InitialCenters, RandomRowInitializer, user_centers};
use super::model::AlsPcaModel;
use super::progress::{FitProgressObserver, FitProgressStage, IterationReport, NoopFitProgress};
use super::recover::EigenRecovery;
use super::runtime::{CancellationToken, PhaseRunner};
use super::solve::{RowSolveSummary, RowWiseSolveTask};
use super::store::{ColumnKind, FactorStore, PartitionedMatrixStore};
use faer::{Mat, MatRef};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Why a run left the iterating state with a model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The average objective change fell below the tolerance.
    Tolerance,
    /// The iteration budget was spent.
    MaxIterations,
}

#[derive(Debug)]
pub enum FitOutcome {
    Converged(Box<AlsPcaModel>),
    /// Cancellation was observed at an iteration boundary; no model is produced.
    Cancelled { iterations: usize },
}

impl FitOutcome {
    pub fn into_model(self) -> Option<AlsPcaModel> {
        match self {
            Self::Converged(model) => Some(*model),
            Self::Cancelled { .. } => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Termination {
    Cancelled,
    Converged(StopReason),
}

/// Convergence bookkeeping owned by the driver.
#[derive(Clone, Copy, Debug)]
struct ConvergenceState {
    iteration: usize,
    residual: f64,
    objective: f64,
    x_norm_sq: f64,
    avg_change_obj: f64,
}

impl ConvergenceState {
    fn new(tolerance: f64, residual: f64, objective: f64, x_norm_sq: f64) -> Self {
        Self {
            iteration: 0,
            residual,
            objective,
            x_norm_sq,
            avg_change_obj: 2.0 * tolerance,
        }
    }

    fn termination(
        &self,
        cancelled: bool,
        max_iterations: usize,
        tolerance: f64,
    ) -> Option<Termination> {
        if cancelled {
            Some(Termination::Cancelled)
        } else if self.iteration >= max_iterations {
            Some(Termination::Converged(StopReason::MaxIterations))
        } else if self.avg_change_obj < tolerance {
            // A negative change (the objective rose) is below any tolerance and stops too.
            Some(Termination::Converged(StopReason::Tolerance))
        } else {
            None
        }
    }
}

/// Regularized PCA by alternating least squares.
pub struct AlsPca {
    config: AlsConfig,
    initializer: Option<Box<dyn ClusterInitializer>>,
    user_points: Option<Mat<f64>>,
    cancellation: CancellationToken,
    progress: Arc<dyn FitProgressObserver>,
}

impl AlsPca {
    pub fn new(config: AlsConfig) -> Self {
        Self {
            config,
            initializer: None,
            user_points: None,
            cancellation: CancellationToken::new(),
            progress: Arc::new(NoopFitProgress),
        }
    }

    /// Replaces the default [`RandomRowInitializer`] used when `init = random_rows`.
    pub fn with_initializer<I>(mut self, initializer: I) -> Self
    where
        I: ClusterInitializer + 'static,
    {
        self.initializer = Some(Box::new(initializer));
        self
    }

    /// Seed points (`k x p`, raw scale) used when `init = user`.
    pub fn with_user_points(mut self, points: Mat<f64>) -> Self {
        self.user_points = Some(points);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn FitProgressObserver>) -> Self {
        self.progress = progress;
        self
    }

    pub fn fit<S>(&self, store: &S) -> Result<FitOutcome, AlsError>
    where
        S: PartitionedMatrixStore,
    {
        self.validate(store)?;

        let config = &self.config;
        let n = store.nrows();
        let p = store.ncols();
        let k = config.k;
        let gamma = config.gamma;
        let cells = (n * p) as f64;
        let runner = PhaseRunner::new(config.parallelism, config.threads)?;
        let cholesky = RegularizedCholesky::new(config.max_cholesky_attempts);

        log::info!(
            "Starting rank-{} ALS factorization of a {}x{} matrix in {} partitions (gamma = {})",
            k,
            n,
            p,
            store.n_partitions(),
            gamma
        );

        // INIT
        self.progress.on_stage_start(FitProgressStage::Initialization, 0);
        let mut y = self.initial_centers(store)?.into_internal(store.transform())?;
        let mut x = FactorStore::zeros_like(store, k);
        let init = self.update_x(&runner, &cholesky, store, &mut x, y.as_ref(), 0)?;
        let x_norm_sq = init.norm_sq_delta;
        let mut y_norm_sq = frobenius_sq(y.as_ref());
        let objective = init.residual + gamma * (x_norm_sq + y_norm_sq);
        self.progress.on_stage_finish(FitProgressStage::Initialization, 0);
        log::info!(
            "Initial residual {:.6e}, objective {:.6e}",
            init.residual,
            objective
        );

        let mut state =
            ConvergenceState::new(config.tolerance, init.residual, objective, x_norm_sq);

        // ITERATING
        let stop_reason = loop {
            match state.termination(
                self.cancellation.is_cancelled(),
                config.max_iterations,
                config.tolerance,
            ) {
                Some(Termination::Cancelled) => {
                    log::info!(
                        "Cancellation observed after {} iterations; discarding factors",
                        state.iteration
                    );
                    return Ok(FitOutcome::Cancelled {
                        iterations: state.iteration,
                    });
                }
                Some(Termination::Converged(reason)) => break reason,
                None => {}
            }

            let iteration = state.iteration + 1;
            let started = Instant::now();

            let x_factor = self.factor_left_gram(&runner, &cholesky, &x, iteration)?;
            let y_new = self.update_y(&runner, store, &x, &x_factor, iteration);
            let summary =
                self.update_x(&runner, &cholesky, store, &mut x, y_new.as_ref(), iteration)?;

            let y_norm_new = frobenius_sq(y_new.as_ref());
            let x_norm_new = state.x_norm_sq + summary.norm_sq_delta;
            let objective_new = summary.residual + gamma * (x_norm_new + y_norm_new);

            // Residual drop plus the gamma-weighted change in both factor norms.
            let correction = gamma * ((state.x_norm_sq - x_norm_new) + (y_norm_sq - y_norm_new));
            state.avg_change_obj = (state.residual - summary.residual + correction) / cells;
            debug_assert!(
                (state.avg_change_obj - (state.objective - objective_new) / cells).abs()
                    <= 1e-9 * (1.0 + state.objective.abs() / cells)
            );

            y = y_new;
            y_norm_sq = y_norm_new;
            state.iteration = iteration;
            state.residual = summary.residual;
            state.objective = objective_new;
            state.x_norm_sq = x_norm_new;

            log::debug!(
                "Iteration {}: residual {:.6e}, objective {:.6e}, |dX|^2 {:.3e}, avg change {:.3e}",
                iteration,
                summary.residual,
                objective_new,
                summary.change_sq,
                state.avg_change_obj
            );
            log::trace!("Iteration {} took {:?}", iteration, started.elapsed());

            self.progress.on_iteration(&IterationReport {
                iteration,
                residual: state.residual,
                objective: state.objective,
                avg_change_obj: state.avg_change_obj,
            });
        };

        // CONVERGED
        log::info!(
            "Stopped after {} iterations ({:?}); avg change in objective {:.3e}",
            state.iteration,
            stop_reason,
            state.avg_change_obj
        );

        self.progress.on_stage_start(FitProgressStage::Recovery, state.iteration);
        let recovery = EigenRecovery::new(&runner, cholesky).recover(&x, y.as_ref())?;
        self.progress.on_stage_finish(FitProgressStage::Recovery, state.iteration);

        Ok(FitOutcome::Converged(Box::new(AlsPcaModel {
            n_rows: n,
            n_cols: p,
            gamma,
            transform: store.transform().clone(),
            eigenvectors: recovery.eigenvectors,
            singular_values: recovery.singular_values,
            importance: recovery.importance,
            x_factor: x.to_mat(),
            y_factor: y,
            iterations: state.iteration,
            avg_change_obj: state.avg_change_obj,
            objective: state.objective,
            residual: state.residual,
            stop_reason,
        })))
    }

    fn validate<S>(&self, store: &S) -> Result<(), AlsError>
    where
        S: PartitionedMatrixStore,
    {
        let config = &self.config;
        let n = store.nrows();
        let p = store.ncols();

        if n < 2 {
            return Err(AlsError::validation(format!(
                "at least two rows are required, found {n}"
            )));
        }
        if p < 2 {
            return Err(AlsError::validation(format!(
                "at least two numeric columns are required, found {p}"
            )));
        }
        if let Some(col) = store
            .column_kinds()
            .iter()
            .position(|kind| *kind != ColumnKind::Numeric)
        {
            return Err(AlsError::validation(format!(
                "column {col} is categorical; only numeric columns are supported"
            )));
        }
        if store.transform().ncols() != p {
            return Err(AlsError::validation(
                "column transform does not match the column count",
            ));
        }
        let max_rank = n.min(p);
        if config.k == 0 || config.k > max_rank {
            return Err(AlsError::validation(format!(
                "k must lie in [1, {max_rank}], got {}",
                config.k
            )));
        }
        if !config.gamma.is_finite() || config.gamma < 0.0 {
            return Err(AlsError::validation(format!(
                "gamma must be finite and non-negative, got {}",
                config.gamma
            )));
        }
        if !config.tolerance.is_finite() || config.tolerance < 0.0 {
            return Err(AlsError::validation(format!(
                "tolerance must be finite and non-negative, got {}",
                config.tolerance
            )));
        }
        if config.max_iterations == 0 {
            return Err(AlsError::validation("max_iterations must be at least 1"));
        }
        if config.max_cholesky_attempts == 0 {
            return Err(AlsError::validation(
                "max_cholesky_attempts must be at least 1",
            ));
        }
        if config.threads == Some(0) {
            return Err(AlsError::validation("threads must be at least 1"));
        }
        match (config.init, self.user_points.is_some()) {
            (InitMode::User, false) => Err(AlsError::validation(
                "init = user requires seed points",
            )),
            (InitMode::RandomRows, true) => Err(AlsError::validation(
                "seed points were supplied but init = random_rows",
            )),
            _ => Ok(()),
        }
    }

    fn initial_centers<S>(&self, store: &S) -> Result<InitialCenters, AlsError>
    where
        S: PartitionedMatrixStore,
    {
        let k = self.config.k;
        let p = store.ncols();
        let centers = match (self.config.init, &self.user_points) {
            (InitMode::User, Some(points)) => user_centers(points.as_ref(), k, p)?,
            _ => {
                let fallback = RandomRowInitializer::new(self.config.seed);
                let initializer: &dyn ClusterInitializer = match &self.initializer {
                    Some(custom) => custom.as_ref(),
                    None => &fallback,
                };
                initializer
                    .initial_centers(store, k)
                    .map_err(AlsError::Initializer)?
            }
        };

        if centers.centers.nrows() != k || centers.centers.ncols() != p {
            return Err(AlsError::validation(format!(
                "initializer returned {}x{} centers, expected {}x{}",
                centers.centers.nrows(),
                centers.centers.ncols(),
                k,
                p
            )));
        }
        Ok(centers)
    }

    /// Phase 1: Cholesky factor of `X'X / n + (gamma / n) I`.
    fn factor_left_gram(
        &self,
        runner: &PhaseRunner,
        cholesky: &RegularizedCholesky,
        x: &FactorStore,
        iteration: usize,
    ) -> Result<CholeskyFactor, AlsError> {
        let n = x.nrows() as f64;
        self.progress.on_stage_start(FitProgressStage::GramMatrix, iteration);
        let mut gram = GramAccumulator::new(runner).factor_gram(x);
        let k = gram.nrows();
        for j in 0..k {
            for i in 0..k {
                gram[(i, j)] /= n;
            }
            gram[(j, j)] += self.config.gamma / n;
        }
        let factor = cholesky.factorize(gram.as_ref());
        self.progress.on_stage_finish(FitProgressStage::GramMatrix, iteration);
        factor
    }

    /// Phase 2: `Y' = (A'X / n) G_x⁻¹`, solved row by row.
    fn update_y<S>(
        &self,
        runner: &PhaseRunner,
        store: &S,
        x: &FactorStore,
        x_factor: &CholeskyFactor,
        iteration: usize,
    ) -> Mat<f64>
    where
        S: PartitionedMatrixStore,
    {
        let n = x.nrows() as f64;
        self.progress.on_stage_start(FitProgressStage::ProductAccumulation, iteration);
        let mut product = MatrixProductAccumulator::new(runner).accumulate(store, x);
        self.progress.on_stage_finish(FitProgressStage::ProductAccumulation, iteration);

        let k = product.ncols();
        let mut rhs = vec![0.0; k];
        for j in 0..product.nrows() {
            for (c, slot) in rhs.iter_mut().enumerate() {
                *slot = product[(j, c)] / n;
            }
            x_factor.solve_in_place(&mut rhs);
            for (c, &value) in rhs.iter().enumerate() {
                product[(j, c)] = value;
            }
        }
        product
    }

    /// Phases 3 and 4: factor `Y'ᵀY' + gamma I` and re-solve every row of `X`.
    fn update_x<S>(
        &self,
        runner: &PhaseRunner,
        cholesky: &RegularizedCholesky,
        store: &S,
        x: &mut FactorStore,
        y: MatRef<'_, f64>,
        iteration: usize,
    ) -> Result<RowSolveSummary, AlsError>
    where
        S: PartitionedMatrixStore,
    {
        let mut gram = dense_gram(y);
        for j in 0..gram.nrows() {
            gram[(j, j)] += self.config.gamma;
        }
        let factor = cholesky.factorize(gram.as_ref())?;

        self.progress.on_stage_start(FitProgressStage::RowSolve, iteration);
        let summary = RowWiseSolveTask::new(y, &factor).run(runner, store, x);
        self.progress.on_stage_finish(FitProgressStage::RowSolve, iteration);
        Ok(summary)
    }
}

fn frobenius_sq(mat: MatRef<'_, f64>) -> f64 {
    let mut total = 0.0;
    for j in 0..mat.ncols() {
        for i in 0..mat.nrows() {
            total += mat[(i, j)] * mat[(i, j)];
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pca::runtime::Parallelism;
    use crate::pca::store::{DensePartitionedMatrix, TransformKind};
    use rand::distributions::Standard;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::Mutex;

    fn noisy_store(nrows: usize, ncols: usize) -> DensePartitionedMatrix {
        let mut rng = StdRng::seed_from_u64(0xA15 + nrows as u64);
        let values = (0..nrows * ncols).map(|_| rng.sample(Standard)).collect();
        DensePartitionedMatrix::from_row_major(values, nrows, ncols, 8, TransformKind::Demean)
            .unwrap()
    }

    fn config(k: usize) -> AlsConfig {
        AlsConfig {
            seed: Some(11),
            ..AlsConfig::with_k(k)
        }
    }

    #[derive(Default)]
    struct Recorder {
        reports: Mutex<Vec<IterationReport>>,
    }

    impl FitProgressObserver for Recorder {
        fn on_iteration(&self, report: &IterationReport) {
            self.reports.lock().unwrap().push(*report);
        }
    }

    #[test]
    fn termination_prefers_cancellation() {
        let mut state = ConvergenceState::new(1e-8, 1.0, 1.0, 1.0);
        assert_eq!(state.termination(false, 5, 1e-8), None);
        assert_eq!(
            state.termination(true, 5, 1e-8),
            Some(Termination::Cancelled)
        );
        state.iteration = 5;
        assert_eq!(
            state.termination(false, 5, 1e-8),
            Some(Termination::Converged(StopReason::MaxIterations))
        );
        state.iteration = 1;
        state.avg_change_obj = 1e-9;
        assert_eq!(
            state.termination(false, 5, 1e-8),
            Some(Termination::Converged(StopReason::Tolerance))
        );
        state.avg_change_obj = -5e-6;
        assert_eq!(
            state.termination(false, 5, 0.0),
            Some(Termination::Converged(StopReason::Tolerance))
        );
    }

    #[test]
    fn rejects_invalid_configuration() {
        let store = noisy_store(10, 4);
        let cases = [
            AlsConfig::with_k(0),
            AlsConfig::with_k(5),
            AlsConfig {
                gamma: -1.0,
                ..AlsConfig::with_k(2)
            },
            AlsConfig {
                tolerance: f64::NAN,
                ..AlsConfig::with_k(2)
            },
            AlsConfig {
                max_iterations: 0,
                ..AlsConfig::with_k(2)
            },
            AlsConfig {
                threads: Some(0),
                ..AlsConfig::with_k(2)
            },
            AlsConfig {
                init: InitMode::User,
                ..AlsConfig::with_k(2)
            },
        ];
        for config in cases {
            let result = AlsPca::new(config.clone()).fit(&store);
            assert!(
                matches!(result, Err(AlsError::Validation(_))),
                "{config:?} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_categorical_and_narrow_inputs() {
        let store = noisy_store(10, 3)
            .with_column_kinds(vec![
                ColumnKind::Numeric,
                ColumnKind::Categorical,
                ColumnKind::Numeric,
            ])
            .unwrap();
        assert!(matches!(
            AlsPca::new(config(1)).fit(&store),
            Err(AlsError::Validation(_))
        ));

        let narrow = DensePartitionedMatrix::from_row_major(
            vec![1.0, 2.0, 3.0],
            3,
            1,
            2,
            TransformKind::None,
        )
        .unwrap();
        assert!(matches!(
            AlsPca::new(config(1)).fit(&narrow),
            Err(AlsError::Validation(_))
        ));
    }

    #[test]
    fn user_points_must_have_k_rows() {
        let store = noisy_store(12, 3);
        let fitter = AlsPca::new(AlsConfig {
            init: InitMode::User,
            ..AlsConfig::with_k(2)
        })
        .with_user_points(Mat::zeros(3, 3));
        assert!(matches!(fitter.fit(&store), Err(AlsError::Validation(_))));
    }

    #[test]
    fn singular_gram_aborts_the_run() {
        let store = noisy_store(12, 3);
        let result = AlsPca::new(AlsConfig {
            init: InitMode::User,
            max_cholesky_attempts: 1,
            ..AlsConfig::with_k(2)
        })
        .with_user_points(Mat::zeros(2, 3))
        .fit(&store);
        assert!(matches!(
            result,
            Err(AlsError::NumericalInstability { attempts: 1, .. })
        ));
    }

    #[test]
    fn runs_exactly_max_iterations_with_zero_tolerance() {
        let store = noisy_store(30, 6);
        let recorder = Arc::new(Recorder::default());
        let outcome = AlsPca::new(AlsConfig {
            tolerance: 0.0,
            max_iterations: 3,
            ..config(2)
        })
        .with_progress(recorder.clone())
        .fit(&store)
        .unwrap();

        let model = outcome.into_model().expect("run was not cancelled");
        assert_eq!(model.iterations(), 3);
        assert_eq!(model.stop_reason(), StopReason::MaxIterations);
        assert_eq!(recorder.reports.lock().unwrap().len(), 3);
    }

    #[test]
    fn cancellation_before_first_iteration_yields_no_model() {
        let store = noisy_store(20, 4);
        let token = CancellationToken::new();
        token.cancel();
        let outcome = AlsPca::new(config(2))
            .with_cancellation(token)
            .fit(&store)
            .unwrap();
        assert!(outcome.is_cancelled());
        assert!(matches!(outcome, FitOutcome::Cancelled { iterations: 0 }));
    }

    #[test]
    fn cancellation_is_observed_at_the_next_boundary() {
        struct CancelAfter {
            token: CancellationToken,
            after: usize,
        }

        impl FitProgressObserver for CancelAfter {
            fn on_iteration(&self, report: &IterationReport) {
                if report.iteration == self.after {
                    self.token.cancel();
                }
            }
        }

        let store = noisy_store(25, 5);
        let token = CancellationToken::new();
        let outcome = AlsPca::new(AlsConfig {
            tolerance: 0.0,
            max_iterations: 50,
            ..config(2)
        })
        .with_cancellation(token.clone())
        .with_progress(Arc::new(CancelAfter { token, after: 2 }))
        .fit(&store)
        .unwrap();
        assert!(matches!(outcome, FitOutcome::Cancelled { iterations: 2 }));
    }

    #[test]
    fn sequential_and_parallel_runs_agree() {
        let store = noisy_store(40, 5);
        let fit = |parallelism| {
            AlsPca::new(AlsConfig {
                parallelism,
                threads: Some(2).filter(|_| parallelism == Parallelism::Rayon),
                max_iterations: 20,
                ..config(2)
            })
            .fit(&store)
            .unwrap()
            .into_model()
            .unwrap()
        };
        let sequential = fit(Parallelism::Sequential);
        let parallel = fit(Parallelism::Rayon);
        assert_eq!(sequential.iterations(), parallel.iterations());
        let scale = 1.0 + sequential.residual();
        assert!((sequential.residual() - parallel.residual()).abs() < 1e-9 * scale);
    }
}
