//! Map/reduce accumulation of Gram-type matrices over row partitions.
//!
//! Each partition produces a local partial matrix; partials are merged by plain
//! summation, so the result does not depend on partition order beyond
//! floating-point re-association. Missing cells (NaN) are skipped pairwise: only
//! the scalar products involving a missing operand are dropped, never the row.

use super::runtime::PhaseRunner;
use super::store::{ColumnTransform, FactorStore, PartitionedMatrixStore};
use faer::{Mat, MatRef};

/// Rows of a partitioned matrix as seen by an accumulator.
pub(crate) trait PartitionedRows: Sync {
    fn width(&self) -> usize;
    fn n_partitions(&self) -> usize;
    /// Calls `visit` with every row of partition `index`, on the internal scale.
    fn for_each_row(&self, index: usize, visit: &mut dyn FnMut(&[f64]));
}

/// The input store viewed through its column transform.
pub(crate) struct NormalizedRows<'a, S: ?Sized> {
    store: &'a S,
    transform: &'a ColumnTransform,
}

impl<'a, S> NormalizedRows<'a, S>
where
    S: PartitionedMatrixStore + ?Sized,
{
    pub(crate) fn new(store: &'a S) -> Self {
        Self {
            store,
            transform: store.transform(),
        }
    }
}

impl<S> PartitionedRows for NormalizedRows<'_, S>
where
    S: PartitionedMatrixStore + ?Sized,
{
    fn width(&self) -> usize {
        self.store.ncols()
    }

    fn n_partitions(&self) -> usize {
        self.store.n_partitions()
    }

    fn for_each_row(&self, index: usize, visit: &mut dyn FnMut(&[f64])) {
        let ncols = self.store.ncols();
        let part = self.store.partition(index);
        let mut buffer = vec![0.0; ncols];
        for local in 0..part.nrows {
            self.transform
                .normalize_row(part.row(local, ncols), &mut buffer);
            visit(&buffer);
        }
    }
}

impl PartitionedRows for FactorStore {
    fn width(&self) -> usize {
        FactorStore::width(self)
    }

    fn n_partitions(&self) -> usize {
        self.partitions().len()
    }

    fn for_each_row(&self, index: usize, visit: &mut dyn FnMut(&[f64])) {
        let part = &self.partitions()[index];
        for local in 0..part.nrows() {
            visit(part.row(local));
        }
    }
}

fn add_mats(mut lhs: Mat<f64>, rhs: Mat<f64>) -> Mat<f64> {
    for j in 0..lhs.ncols() {
        for i in 0..lhs.nrows() {
            lhs[(i, j)] += rhs[(i, j)];
        }
    }
    lhs
}

/// Copies the upper triangle onto the lower one so the result is exactly symmetric.
pub(crate) fn mirror_upper(mat: &mut Mat<f64>) {
    let n = mat.nrows();
    for j in 0..n {
        for i in 0..j {
            mat[(j, i)] = mat[(i, j)];
        }
    }
}

/// Accumulates the `C x C` matrix of pairwise column inner products.
pub struct GramAccumulator<'r> {
    runner: &'r PhaseRunner,
}

impl<'r> GramAccumulator<'r> {
    pub fn new(runner: &'r PhaseRunner) -> Self {
        Self { runner }
    }

    pub(crate) fn accumulate<P>(&self, rows: &P) -> Mat<f64>
    where
        P: PartitionedRows + ?Sized,
    {
        let width = rows.width();
        let mut gram = self.runner.map_reduce(
            rows.n_partitions(),
            || Mat::zeros(width, width),
            |index| {
                let mut local = Mat::zeros(width, width);
                rows.for_each_row(index, &mut |row| accumulate_upper(&mut local, row));
                local
            },
            add_mats,
        );
        mirror_upper(&mut gram);
        gram
    }

    /// `X'X` of the co-located factor.
    pub fn factor_gram(&self, factor: &FactorStore) -> Mat<f64> {
        self.accumulate(factor)
    }

    /// `A'A` of the normalized input, with pairwise-available missing handling.
    pub fn store_gram<S>(&self, store: &S) -> Mat<f64>
    where
        S: PartitionedMatrixStore + ?Sized,
    {
        self.accumulate(&NormalizedRows::new(store))
    }
}

fn accumulate_upper(local: &mut Mat<f64>, row: &[f64]) {
    for (j, &vj) in row.iter().enumerate() {
        if vj.is_nan() {
            continue;
        }
        for (i, &vi) in row[..=j].iter().enumerate() {
            if vi.is_nan() {
                continue;
            }
            local[(i, j)] += vi * vj;
        }
    }
}

/// `M'M` of a small, fully replicated matrix such as `Y'`.
pub fn dense_gram(mat: MatRef<'_, f64>) -> Mat<f64> {
    let width = mat.ncols();
    let mut gram = Mat::zeros(width, width);
    for r in 0..mat.nrows() {
        for j in 0..width {
            let vj = mat[(r, j)];
            for i in 0..=j {
                gram[(i, j)] += mat[(r, i)] * vj;
            }
        }
    }
    mirror_upper(&mut gram);
    gram
}

/// Accumulates `A'X` (`p x k`) between the normalized input and the co-located factor.
pub struct MatrixProductAccumulator<'r> {
    runner: &'r PhaseRunner,
}

impl<'r> MatrixProductAccumulator<'r> {
    pub fn new(runner: &'r PhaseRunner) -> Self {
        Self { runner }
    }

    pub fn accumulate<S>(&self, store: &S, factor: &FactorStore) -> Mat<f64>
    where
        S: PartitionedMatrixStore + ?Sized,
    {
        let ncols = store.ncols();
        let width = factor.width();
        let transform = store.transform();
        debug_assert_eq!(store.n_partitions(), factor.partitions().len());

        self.runner.map_reduce(
            store.n_partitions(),
            || Mat::zeros(ncols, width),
            |index| {
                let part = store.partition(index);
                let x_part = &factor.partitions()[index];
                let mut local = Mat::zeros(ncols, width);
                let mut a_row = vec![0.0; ncols];
                for local_row in 0..part.nrows {
                    transform.normalize_row(part.row(local_row, ncols), &mut a_row);
                    let x_row = x_part.row(local_row);
                    for (j, &a) in a_row.iter().enumerate() {
                        if a.is_nan() {
                            continue;
                        }
                        for (c, &x) in x_row.iter().enumerate() {
                            local[(j, c)] += a * x;
                        }
                    }
                }
                local
            },
            add_mats,
        )
    }
}
