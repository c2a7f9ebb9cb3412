pub mod cholesky;
pub mod command;
pub mod config;
pub mod error;
pub mod fit;
pub mod gram;
pub mod init;
pub mod io;
pub mod model;
pub mod progress;
pub mod recover;
pub mod runtime;
pub mod solve;
pub mod store;
pub use cholesky::{CholeskyFactor, DEFAULT_MAX_CHOLESKY_ATTEMPTS, RegularizedCholesky};
pub use config::{AlsConfig, ConfigError, InitMode};
pub use error::AlsError;
pub use fit::{AlsPca, FitOutcome, StopReason};
pub use gram::{GramAccumulator, MatrixProductAccumulator};
pub use init::{CenterScaling, ClusterInitializer, InitialCenters, RandomRowInitializer};
pub use model::{AlsPcaModel, ImportanceTable};
pub use progress::{FitProgressObserver, FitProgressStage, IterationReport, NoopFitProgress};
pub use runtime::{CancellationToken, Parallelism, PhaseRunner};
pub use solve::{RowSolveSummary, RowWiseSolveTask};
pub use store::{
    ColumnKind, ColumnTransform, DensePartitionedMatrix, FactorStore, PartitionedMatrixStore,
    RowPartition, StoreError, TransformKind,
};
