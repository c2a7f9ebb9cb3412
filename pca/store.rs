//! Row-partitioned numeric storage.
//!
//! The factorization engine consumes its input through [`PartitionedMatrixStore`]:
//! a read-only matrix cut into contiguous row partitions, with per-column
//! centering and scaling constants and NaN marking a missing cell. The
//! co-located left factor `X` lives in a [`FactorStore`] whose partitions mirror
//! the row ranges of the input exactly.

use faer::Mat;
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use thiserror::Error;

pub const DEFAULT_ROWS_PER_PARTITION: usize = 4_096;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("matrix must have at least one row and one column (got {nrows}x{ncols})")]
    Empty { nrows: usize, ncols: usize },
    #[error("data length {found} does not match {nrows}x{ncols}")]
    LengthMismatch {
        found: usize,
        nrows: usize,
        ncols: usize,
    },
    #[error("rows_per_partition must be positive")]
    ZeroPartitionSize,
    #[error("expected {expected} column kinds, found {found}")]
    ColumnKindCount { expected: usize, found: usize },
    #[error("matrix dimensions overflow usize")]
    Overflow,
    #[error("cell ({row}, {col}) is infinite; only NaN marks a missing value")]
    InfiniteCell { row: usize, col: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Numeric,
    Categorical,
}

/// Which per-column constants are applied before factorization.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    #[default]
    None,
    Demean,
    Descale,
    Standardize,
}

/// Per-column center and multiplier: `normalized = (raw - mean) * multiplier`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnTransform {
    kind: TransformKind,
    means: Vec<f64>,
    multipliers: Vec<f64>,
}

impl ColumnTransform {
    pub fn identity(ncols: usize) -> Self {
        Self {
            kind: TransformKind::None,
            means: vec![0.0; ncols],
            multipliers: vec![1.0; ncols],
        }
    }

    /// Derives the constants for `kind` from row-major `values`, ignoring NaN.
    pub fn fit(kind: TransformKind, values: &[f64], ncols: usize) -> Self {
        let mut sums = vec![0.0f64; ncols];
        let mut counts = vec![0usize; ncols];
        for row in values.chunks_exact(ncols) {
            for (col, &value) in row.iter().enumerate() {
                if !value.is_nan() {
                    sums[col] += value;
                    counts[col] += 1;
                }
            }
        }

        let column_means: Vec<f64> = sums
            .iter()
            .zip(&counts)
            .map(|(&sum, &count)| if count > 0 { sum / count as f64 } else { 0.0 })
            .collect();

        let mut squares = vec![0.0f64; ncols];
        for row in values.chunks_exact(ncols) {
            for (col, &value) in row.iter().enumerate() {
                if !value.is_nan() {
                    let centered = value - column_means[col];
                    squares[col] += centered * centered;
                }
            }
        }

        let inverse_sd: Vec<f64> = squares
            .iter()
            .zip(&counts)
            .map(|(&ss, &count)| {
                if count < 2 {
                    return 1.0;
                }
                let sd = (ss / (count - 1) as f64).sqrt();
                if sd > 0.0 && sd.is_finite() {
                    sd.recip()
                } else {
                    1.0
                }
            })
            .collect();

        let (means, multipliers) = match kind {
            TransformKind::None => (vec![0.0; ncols], vec![1.0; ncols]),
            TransformKind::Demean => (column_means, vec![1.0; ncols]),
            TransformKind::Descale => (vec![0.0; ncols], inverse_sd),
            TransformKind::Standardize => (column_means, inverse_sd),
        };

        Self {
            kind,
            means,
            multipliers,
        }
    }

    pub fn kind(&self) -> TransformKind {
        self.kind
    }

    pub fn means(&self) -> &[f64] {
        &self.means
    }

    pub fn multipliers(&self) -> &[f64] {
        &self.multipliers
    }

    pub fn ncols(&self) -> usize {
        self.means.len()
    }

    /// Maps a raw cell to the internal scale. Missing (NaN) cells stay NaN.
    #[inline]
    pub fn normalize(&self, col: usize, raw: f64) -> f64 {
        (raw - self.means[col]) * self.multipliers[col]
    }

    #[inline]
    pub fn denormalize(&self, col: usize, value: f64) -> f64 {
        value / self.multipliers[col] + self.means[col]
    }

    /// Writes the normalized form of one raw row into `out`.
    #[inline]
    pub fn normalize_row(&self, raw: &[f64], out: &mut [f64]) {
        debug_assert_eq!(raw.len(), out.len());
        for (col, (slot, &value)) in out.iter_mut().zip(raw).enumerate() {
            *slot = self.normalize(col, value);
        }
    }
}

/// A borrowed, row-major slice of consecutive rows.
#[derive(Clone, Copy, Debug)]
pub struct RowPartition<'a> {
    pub start: usize,
    pub nrows: usize,
    pub values: &'a [f64],
}

impl<'a> RowPartition<'a> {
    pub fn rows(&self) -> Range<usize> {
        self.start..self.start + self.nrows
    }

    pub fn row(&self, local: usize, ncols: usize) -> &'a [f64] {
        &self.values[local * ncols..(local + 1) * ncols]
    }
}

/// Read-only row-partitioned matrix consumed by the factorization engine.
pub trait PartitionedMatrixStore: Sync {
    fn nrows(&self) -> usize;
    fn ncols(&self) -> usize;
    fn column_kinds(&self) -> &[ColumnKind];
    fn transform(&self) -> &ColumnTransform;
    fn n_partitions(&self) -> usize;
    fn partition(&self, index: usize) -> RowPartition<'_>;
}

/// In-memory [`PartitionedMatrixStore`] over owned row-major data.
#[derive(Clone, Debug)]
pub struct DensePartitionedMatrix {
    values: Vec<f64>,
    nrows: usize,
    ncols: usize,
    rows_per_partition: usize,
    kinds: Vec<ColumnKind>,
    transform: ColumnTransform,
}

impl DensePartitionedMatrix {
    pub fn from_row_major(
        values: Vec<f64>,
        nrows: usize,
        ncols: usize,
        rows_per_partition: usize,
        transform: TransformKind,
    ) -> Result<Self, StoreError> {
        if nrows == 0 || ncols == 0 {
            return Err(StoreError::Empty { nrows, ncols });
        }
        if rows_per_partition == 0 {
            return Err(StoreError::ZeroPartitionSize);
        }
        let expected = nrows.checked_mul(ncols).ok_or(StoreError::Overflow)?;
        if values.len() != expected {
            return Err(StoreError::LengthMismatch {
                found: values.len(),
                nrows,
                ncols,
            });
        }
        if let Some(index) = values.iter().position(|value| value.is_infinite()) {
            return Err(StoreError::InfiniteCell {
                row: index / ncols,
                col: index % ncols,
            });
        }

        let transform = ColumnTransform::fit(transform, &values, ncols);
        Ok(Self {
            values,
            nrows,
            ncols,
            rows_per_partition,
            kinds: vec![ColumnKind::Numeric; ncols],
            transform,
        })
    }

    pub fn from_array(
        array: ArrayView2<'_, f64>,
        rows_per_partition: usize,
        transform: TransformKind,
    ) -> Result<Self, StoreError> {
        let (nrows, ncols) = array.dim();
        let values: Vec<f64> = array.iter().copied().collect();
        Self::from_row_major(values, nrows, ncols, rows_per_partition, transform)
    }

    /// Flags columns as categorical. Such stores are rejected by the fitter.
    pub fn with_column_kinds(mut self, kinds: Vec<ColumnKind>) -> Result<Self, StoreError> {
        if kinds.len() != self.ncols {
            return Err(StoreError::ColumnKindCount {
                expected: self.ncols,
                found: kinds.len(),
            });
        }
        self.kinds = kinds;
        Ok(self)
    }
}

impl PartitionedMatrixStore for DensePartitionedMatrix {
    fn nrows(&self) -> usize {
        self.nrows
    }

    fn ncols(&self) -> usize {
        self.ncols
    }

    fn column_kinds(&self) -> &[ColumnKind] {
        &self.kinds
    }

    fn transform(&self) -> &ColumnTransform {
        &self.transform
    }

    fn n_partitions(&self) -> usize {
        self.nrows.div_ceil(self.rows_per_partition)
    }

    fn partition(&self, index: usize) -> RowPartition<'_> {
        let start = index * self.rows_per_partition;
        let end = (start + self.rows_per_partition).min(self.nrows);
        RowPartition {
            start,
            nrows: end - start,
            values: &self.values[start * self.ncols..end * self.ncols],
        }
    }
}

/// One partition's slice of the left factor, owned by exactly one task per phase.
#[derive(Clone, Debug)]
pub struct FactorPartition {
    start: usize,
    nrows: usize,
    width: usize,
    values: Vec<f64>,
}

impl FactorPartition {
    pub fn start(&self) -> usize {
        self.start
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn row(&self, local: usize) -> &[f64] {
        &self.values[local * self.width..(local + 1) * self.width]
    }

    pub fn row_mut(&mut self, local: usize) -> &mut [f64] {
        &mut self.values[local * self.width..(local + 1) * self.width]
    }
}

/// The co-located `X` factor: one buffer per input partition, same row ranges.
#[derive(Clone, Debug)]
pub struct FactorStore {
    nrows: usize,
    width: usize,
    partitions: Vec<FactorPartition>,
}

impl FactorStore {
    pub fn zeros_like<S>(store: &S, width: usize) -> Self
    where
        S: PartitionedMatrixStore + ?Sized,
    {
        let partitions = (0..store.n_partitions())
            .map(|index| {
                let part = store.partition(index);
                FactorPartition {
                    start: part.start,
                    nrows: part.nrows,
                    width,
                    values: vec![0.0; part.nrows * width],
                }
            })
            .collect();
        Self {
            nrows: store.nrows(),
            width,
            partitions,
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn partitions(&self) -> &[FactorPartition] {
        &self.partitions
    }

    pub fn partitions_mut(&mut self) -> &mut [FactorPartition] {
        &mut self.partitions
    }

    /// Row `global` of the factor.
    pub fn row(&self, global: usize) -> Option<&[f64]> {
        self.partitions
            .iter()
            .find(|part| global >= part.start && global < part.start + part.nrows)
            .map(|part| part.row(global - part.start))
    }

    /// Gathers the partitions into a dense `nrows x width` matrix.
    pub fn to_mat(&self) -> Mat<f64> {
        let mut out = Mat::zeros(self.nrows, self.width);
        for part in &self.partitions {
            for local in 0..part.nrows {
                let row = part.row(local);
                for (col, &value) in row.iter().enumerate() {
                    out[(part.start + local, col)] = value;
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn partitions_cover_rows_in_order() {
        let values: Vec<f64> = (0..21).map(|v| v as f64).collect();
        let store =
            DensePartitionedMatrix::from_row_major(values, 7, 3, 3, TransformKind::None).unwrap();
        assert_eq!(store.n_partitions(), 3);

        let mut next = 0;
        for index in 0..store.n_partitions() {
            let part = store.partition(index);
            assert_eq!(part.start, next);
            assert_eq!(part.values.len(), part.nrows * 3);
            next += part.nrows;
        }
        assert_eq!(next, 7);
        assert_eq!(store.partition(2).row(0, 3), &[18.0, 19.0, 20.0]);
    }

    #[test]
    fn standardize_ignores_missing_cells() {
        let data = array![[1.0, f64::NAN], [2.0, 4.0], [3.0, 8.0]];
        let store =
            DensePartitionedMatrix::from_array(data.view(), 2, TransformKind::Standardize).unwrap();
        let transform = store.transform();

        assert_relative_eq!(transform.means()[0], 2.0);
        assert_relative_eq!(transform.means()[1], 6.0);
        assert_relative_eq!(transform.multipliers()[0], 1.0);
        assert_relative_eq!(transform.multipliers()[1], 1.0 / 8.0f64.sqrt());
        assert!(transform.normalize(1, f64::NAN).is_nan());
        assert_relative_eq!(transform.denormalize(1, transform.normalize(1, 5.5)), 5.5);
    }

    #[test]
    fn constant_column_keeps_unit_multiplier() {
        let data = array![[1.0, 5.0], [2.0, 5.0], [4.0, 5.0]];
        let store =
            DensePartitionedMatrix::from_array(data.view(), 8, TransformKind::Descale).unwrap();
        assert_eq!(store.transform().multipliers()[1], 1.0);
        assert_eq!(store.transform().means(), &[0.0, 0.0]);
    }

    #[test]
    fn rejects_mismatched_shapes() {
        let err = DensePartitionedMatrix::from_row_major(vec![1.0; 5], 2, 3, 1, TransformKind::None)
            .unwrap_err();
        assert!(matches!(err, StoreError::LengthMismatch { found: 5, .. }));

        let mut values = vec![1.0; 6];
        values[4] = f64::NEG_INFINITY;
        let err = DensePartitionedMatrix::from_row_major(values, 2, 3, 1, TransformKind::None)
            .unwrap_err();
        assert!(matches!(err, StoreError::InfiniteCell { row: 1, col: 1 }));

        let store =
            DensePartitionedMatrix::from_row_major(vec![1.0; 6], 2, 3, 1, TransformKind::None)
                .unwrap();
        assert!(matches!(
            store.with_column_kinds(vec![ColumnKind::Numeric]),
            Err(StoreError::ColumnKindCount { .. })
        ));
    }

    #[test]
    fn factor_store_mirrors_partition_layout() {
        let store =
            DensePartitionedMatrix::from_row_major(vec![0.0; 10], 5, 2, 2, TransformKind::None)
                .unwrap();
        let mut factor = FactorStore::zeros_like(&store, 3);
        assert_eq!(factor.partitions().len(), 3);

        factor.partitions_mut()[2].row_mut(0).copy_from_slice(&[1.0, 2.0, 3.0]);
        assert_eq!(factor.row(4), Some(&[1.0, 2.0, 3.0][..]));
        assert_eq!(factor.row(5), None);

        let dense = factor.to_mat();
        assert_eq!((dense.nrows(), dense.ncols()), (5, 3));
        assert_eq!(dense[(4, 2)], 3.0);
    }
}
