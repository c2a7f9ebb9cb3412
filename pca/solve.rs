//! Per-partition update of the left factor `X`.
//!
//! For each row `a` of the normalized input the task solves
//! `(Y'ᵀY' + gamma·I) x = Y'ᵀ a` through the supplied Cholesky factor, records the
//! residual of the new fit, and overwrites the stored row of `X` in place. Rows
//! are owned by exactly one partition, so no two tasks ever write the same row.

use super::cholesky::CholeskyFactor;
use super::runtime::PhaseRunner;
use super::store::{FactorPartition, FactorStore, PartitionedMatrixStore, RowPartition};
use faer::MatRef;
use std::ops::Add;

/// Sums produced by one pass of [`RowWiseSolveTask`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RowSolveSummary {
    /// `||A - X Y||_F^2` over observed cells, after the update.
    pub residual: f64,
    /// `sum ||x_new - x_old||^2` over rows.
    pub change_sq: f64,
    /// `||X_new||_F^2 - ||X_old||_F^2`.
    pub norm_sq_delta: f64,
}

impl Add for RowSolveSummary {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            residual: self.residual + rhs.residual,
            change_sq: self.change_sq + rhs.change_sq,
            norm_sq_delta: self.norm_sq_delta + rhs.norm_sq_delta,
        }
    }
}

pub struct RowWiseSolveTask<'a> {
    y: MatRef<'a, f64>,
    factor: &'a CholeskyFactor,
}

impl<'a> RowWiseSolveTask<'a> {
    /// `y` is the `p x k` right factor `Y'`; `factor` is the Cholesky factor of
    /// `Y'ᵀY' + gamma·I`.
    pub fn new(y: MatRef<'a, f64>, factor: &'a CholeskyFactor) -> Self {
        debug_assert_eq!(y.ncols(), factor.order());
        Self { y, factor }
    }

    pub fn run<S>(&self, runner: &PhaseRunner, store: &S, x: &mut FactorStore) -> RowSolveSummary
    where
        S: PartitionedMatrixStore + ?Sized,
    {
        debug_assert_eq!(store.ncols(), self.y.nrows());
        debug_assert_eq!(x.width(), self.y.ncols());
        runner.map_reduce_mut(
            x.partitions_mut(),
            RowSolveSummary::default,
            |index, x_part| self.solve_partition(store, store.partition(index), x_part),
            |lhs, rhs| lhs + rhs,
        )
    }

    fn solve_partition<S>(
        &self,
        store: &S,
        part: RowPartition<'_>,
        x_part: &mut FactorPartition,
    ) -> RowSolveSummary
    where
        S: PartitionedMatrixStore + ?Sized,
    {
        let ncols = store.ncols();
        let rank = self.y.ncols();
        let transform = store.transform();
        let y = self.y;

        let mut summary = RowSolveSummary::default();
        let mut a_row = vec![0.0; ncols];
        let mut x_new = vec![0.0; rank];

        for local in 0..part.nrows {
            transform.normalize_row(part.row(local, ncols), &mut a_row);

            // Y'ᵀ a over observed cells; an all-missing row solves against zero.
            x_new.fill(0.0);
            for (j, &a) in a_row.iter().enumerate() {
                if a.is_nan() {
                    continue;
                }
                for (c, slot) in x_new.iter_mut().enumerate() {
                    *slot += a * y[(j, c)];
                }
            }
            self.factor.solve_in_place(&mut x_new);

            for (j, &a) in a_row.iter().enumerate() {
                if a.is_nan() {
                    continue;
                }
                let fitted: f64 = x_new.iter().enumerate().map(|(c, &x)| x * y[(j, c)]).sum();
                let diff = a - fitted;
                summary.residual += diff * diff;
            }

            let x_old = x_part.row_mut(local);
            for (old, &new) in x_old.iter_mut().zip(&x_new) {
                let delta = new - *old;
                summary.change_sq += delta * delta;
                summary.norm_sq_delta += new * new - *old * *old;
                *old = new;
            }
        }

        summary
    }
}
