use faer::Mat;
use std::error::Error;
use thiserror::Error;

/// Failures that abort a factorization run. None of them leave a usable model.
#[derive(Debug, Error)]
pub enum AlsError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error(
        "matrix of order {} is not positive definite after {attempts} Cholesky attempts with diagonal loading",
        .matrix.nrows()
    )]
    NumericalInstability { matrix: Mat<f64>, attempts: usize },
    #[error("cluster initializer failed: {0}")]
    Initializer(#[source] Box<dyn Error + Send + Sync + 'static>),
    #[error("decomposition failed: {0}")]
    Decomposition(String),
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl AlsError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
