//! Recovery of orthonormal principal directions from converged `X` and `Y'`.
//!
//! With `X'X / n = L L'` the triangular factor of `X` is `R_x = L'·√n`; with the
//! thin QR `Y' = Q_y R_y` the fitted matrix is `X Y'ᵀ = Q_x (R_x R_yᵀ) Q_yᵀ`, so the
//! SVD of the small `k x k` core `M = R_x R_yᵀ = U Σ Vᵀ` yields the principal
//! directions `Q_y V` and the singular values `Σ` of the fit. At `gamma = 0` and
//! true convergence this is exact PCA; for `gamma > 0` it approximates it.

use super::cholesky::RegularizedCholesky;
use super::error::AlsError;
use super::gram::GramAccumulator;
use super::model::ImportanceTable;
use super::runtime::PhaseRunner;
use super::store::FactorStore;
use core::cmp::Ordering;
use faer::linalg::matmul::matmul;
use faer::{Accum, Mat, MatRef, Par};

#[derive(Clone, Debug)]
pub struct Recovery {
    /// Orthonormal `p x k` principal directions, by descending singular value.
    pub eigenvectors: Mat<f64>,
    pub singular_values: Vec<f64>,
    pub importance: ImportanceTable,
}

pub struct EigenRecovery<'r> {
    runner: &'r PhaseRunner,
    cholesky: RegularizedCholesky,
}

impl<'r> EigenRecovery<'r> {
    pub fn new(runner: &'r PhaseRunner, cholesky: RegularizedCholesky) -> Self {
        Self { runner, cholesky }
    }

    pub fn recover(&self, x: &FactorStore, y: MatRef<'_, f64>) -> Result<Recovery, AlsError> {
        let n = x.nrows();
        let k = x.width();
        let p = y.nrows();
        debug_assert_eq!(y.ncols(), k);
        if n < 2 {
            return Err(AlsError::validation(
                "principal direction recovery requires at least two rows",
            ));
        }

        let inv_n = (n as f64).recip();
        let mut gram = GramAccumulator::new(self.runner).factor_gram(x);
        for j in 0..k {
            for i in 0..k {
                gram[(i, j)] *= inv_n;
            }
        }
        let chol = self.cholesky.factorize(gram.as_ref())?;
        let sqrt_n = (n as f64).sqrt();
        let l = chol.lower();
        let r_x = Mat::from_fn(k, k, |i, j| l[(j, i)] * sqrt_n);

        let qr = y.qr();
        let q_y = qr.compute_thin_Q();
        let thin_r = qr.thin_R();
        let r_y = Mat::from_fn(k, k, |i, j| if i <= j { thin_r[(i, j)] } else { 0.0 });

        let mut core = Mat::<f64>::zeros(k, k);
        matmul(
            core.as_mut(),
            Accum::Replace,
            r_x.as_ref(),
            r_y.as_ref().transpose(),
            1.0,
            Par::Seq,
        );

        let svd = core.as_ref().svd().map_err(|err| {
            AlsError::Decomposition(format!("SVD of {k}x{k} core failed: {err:?}"))
        })?;
        let sigma = svd.S();
        let v = svd.V();

        let sigma = sigma.column_vector();
        let mut ordering: Vec<(usize, f64)> = (0..k).map(|idx| (idx, sigma[idx])).collect();
        ordering.sort_by(|lhs, rhs| rhs.1.partial_cmp(&lhs.1).unwrap_or(Ordering::Equal));

        let v_sorted = Mat::from_fn(k, k, |row, col| v[(row, ordering[col].0)]);
        let mut eigenvectors = Mat::<f64>::zeros(p, k);
        matmul(
            eigenvectors.as_mut(),
            Accum::Replace,
            q_y.as_ref(),
            v_sorted.as_ref(),
            1.0,
            Par::Seq,
        );

        let singular_values: Vec<f64> = ordering.iter().map(|&(_, value)| value.max(0.0)).collect();
        let importance = ImportanceTable::from_singular_values(&singular_values, n);
        log::info!(
            "Recovered {} principal directions; standard deviations {:?}",
            k,
            importance.std_deviation
        );

        Ok(Recovery {
            eigenvectors,
            singular_values,
            importance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pca::store::{DensePartitionedMatrix, PartitionedMatrixStore, TransformKind};
    use approx::assert_relative_eq;

    #[test]
    fn recovers_directions_of_explicit_factorization() {
        // Orthogonal X columns of norm 2 against Y' = [3·e0, e2]: singular values 6 and 2.
        let store =
            DensePartitionedMatrix::from_row_major(vec![0.0; 12], 4, 3, 3, TransformKind::None)
                .unwrap();
        let mut x = FactorStore::zeros_like(&store, 2);
        let rows = [[1.0, 1.0], [1.0, -1.0], [-1.0, 1.0], [-1.0, -1.0]];
        for part in x.partitions_mut() {
            for local in 0..part.nrows() {
                let global = part.start() + local;
                part.row_mut(local).copy_from_slice(&rows[global]);
            }
        }
        let y = Mat::from_fn(3, 2, |j, c| match (j, c) {
            (0, 0) => 3.0,
            (2, 1) => 1.0,
            _ => 0.0,
        });

        let runner = PhaseRunner::sequential();
        let recovery = EigenRecovery::new(&runner, RegularizedCholesky::default())
            .recover(&x, y.as_ref())
            .unwrap();

        assert_eq!(store.ncols(), recovery.eigenvectors.nrows());
        assert_eq!(recovery.eigenvectors.ncols(), 2);
        for a in 0..2 {
            for b in 0..2 {
                let dot: f64 = (0..3)
                    .map(|j| recovery.eigenvectors[(j, a)] * recovery.eigenvectors[(j, b)])
                    .sum();
                assert_relative_eq!(dot, if a == b { 1.0 } else { 0.0 }, epsilon = 1e-12);
            }
        }
        assert_relative_eq!(recovery.singular_values[0], 6.0, epsilon = 1e-10);
        assert_relative_eq!(recovery.singular_values[1], 2.0, epsilon = 1e-10);
        assert_relative_eq!(recovery.eigenvectors[(0, 0)].abs(), 1.0, epsilon = 1e-10);
        assert_relative_eq!(recovery.eigenvectors[(2, 1)].abs(), 1.0, epsilon = 1e-10);

        let sd = &recovery.importance.std_deviation;
        assert_relative_eq!(sd[0], 6.0 / 3.0f64.sqrt(), epsilon = 1e-10);
        assert_relative_eq!(
            recovery.importance.cumulative_proportion[1],
            1.0,
            epsilon = 1e-12
        );
    }
}
