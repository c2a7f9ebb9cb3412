//! Starting points for the right factor `Y'`.

use super::error::AlsError;
use super::store::{ColumnTransform, PartitionedMatrixStore};
use faer::{Mat, MatRef};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use std::error::Error;

/// Coordinate system of the centers returned by an initializer.
#[derive(Clone, Debug, PartialEq)]
pub enum CenterScaling {
    /// Centers are on the raw data scale.
    Raw,
    /// Centers are standardized by the initializer's own constants:
    /// `value = (raw - mean) * multiplier`.
    Standardized {
        means: Vec<f64>,
        multipliers: Vec<f64>,
    },
}

/// `k x p` initial centers as produced by a [`ClusterInitializer`].
#[derive(Clone, Debug)]
pub struct InitialCenters {
    pub centers: Mat<f64>,
    pub scaling: CenterScaling,
}

impl InitialCenters {
    pub fn raw(centers: Mat<f64>) -> Self {
        Self {
            centers,
            scaling: CenterScaling::Raw,
        }
    }

    /// Destandardizes to the raw scale, then restandardizes with `transform`, returning
    /// `Y'` (`p x k`). Missing coordinates become zero on the internal scale.
    pub(crate) fn into_internal(self, transform: &ColumnTransform) -> Result<Mat<f64>, AlsError> {
        let k = self.centers.nrows();
        let p = self.centers.ncols();
        if p != transform.ncols() {
            return Err(AlsError::validation(format!(
                "initial centers have {} columns but the data has {}",
                p,
                transform.ncols()
            )));
        }
        if let CenterScaling::Standardized { means, multipliers } = &self.scaling {
            if means.len() != p || multipliers.len() != p {
                return Err(AlsError::validation(
                    "initializer scaling constants do not match the column count",
                ));
            }
            if multipliers.iter().any(|&m| m == 0.0 || !m.is_finite()) {
                return Err(AlsError::validation(
                    "initializer scaling multipliers must be finite and non-zero",
                ));
            }
        }

        Ok(Mat::from_fn(p, k, |j, c| {
            let value = self.centers[(c, j)];
            let raw = match &self.scaling {
                CenterScaling::Raw => value,
                CenterScaling::Standardized { means, multipliers } => {
                    value / multipliers[j] + means[j]
                }
            };
            let internal = transform.normalize(j, raw);
            if internal.is_nan() { 0.0 } else { internal }
        }))
    }
}

/// Produces `k` initial cluster centers for a store.
pub trait ClusterInitializer: Send + Sync {
    fn initial_centers(
        &self,
        store: &dyn PartitionedMatrixStore,
        k: usize,
    ) -> Result<InitialCenters, Box<dyn Error + Send + Sync + 'static>>;
}

/// Picks `k` distinct rows of the input uniformly at random.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomRowInitializer {
    seed: Option<u64>,
}

impl RandomRowInitializer {
    pub fn new(seed: Option<u64>) -> Self {
        Self { seed }
    }
}

impl ClusterInitializer for RandomRowInitializer {
    fn initial_centers(
        &self,
        store: &dyn PartitionedMatrixStore,
        k: usize,
    ) -> Result<InitialCenters, Box<dyn Error + Send + Sync + 'static>> {
        let nrows = store.nrows();
        let ncols = store.ncols();
        if k > nrows {
            return Err(format!("cannot pick {k} distinct rows from {nrows}").into());
        }

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut picked = sample(&mut rng, nrows, k).into_vec();
        picked.sort_unstable();
        log::debug!("Random row initializer picked rows {picked:?}");

        let mut centers = Mat::zeros(k, ncols);
        let mut next = picked.iter().enumerate().peekable();
        for index in 0..store.n_partitions() {
            let part = store.partition(index);
            while let Some(&(center, &global)) = next.peek() {
                if !part.rows().contains(&global) {
                    break;
                }
                let row = part.row(global - part.start, ncols);
                for (j, &value) in row.iter().enumerate() {
                    centers[(center, j)] = value;
                }
                next.next();
            }
        }

        Ok(InitialCenters::raw(centers))
    }
}

/// Validates user-supplied seed points (`k x p`, raw scale).
pub(crate) fn user_centers(
    points: MatRef<'_, f64>,
    k: usize,
    ncols: usize,
) -> Result<InitialCenters, AlsError> {
    if points.nrows() != k || points.ncols() != ncols {
        return Err(AlsError::validation(format!(
            "user points must be {}x{}, got {}x{}",
            k,
            ncols,
            points.nrows(),
            points.ncols()
        )));
    }
    let finite = (0..ncols).all(|j| (0..k).all(|i| points[(i, j)].is_finite()));
    if !finite {
        return Err(AlsError::validation("user points must be finite"));
    }
    Ok(InitialCenters::raw(points.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pca::store::{DensePartitionedMatrix, TransformKind};
    use approx::assert_relative_eq;

    fn store() -> DensePartitionedMatrix {
        let values: Vec<f64> = (0..20).map(|v| v as f64).collect();
        DensePartitionedMatrix::from_row_major(values, 10, 2, 3, TransformKind::Standardize)
            .unwrap()
    }

    #[test]
    fn seeded_initializer_is_reproducible() {
        let store = store();
        let a = RandomRowInitializer::new(Some(7))
            .initial_centers(&store, 3)
            .unwrap();
        let b = RandomRowInitializer::new(Some(7))
            .initial_centers(&store, 3)
            .unwrap();
        assert_eq!(a.centers, b.centers);
        for c in 0..3 {
            let first = a.centers[(c, 0)];
            assert_eq!(first % 2.0, 0.0);
            assert_eq!(a.centers[(c, 1)], first + 1.0);
        }
    }

    #[test]
    fn standardized_centers_are_rescaled_to_store_transform() {
        let store = store();
        let transform = store.transform().clone();
        let centers = InitialCenters {
            centers: Mat::from_fn(1, 2, |_, j| if j == 0 { 1.0 } else { -1.0 }),
            scaling: CenterScaling::Standardized {
                means: vec![10.0, 20.0],
                multipliers: vec![0.5, 0.25],
            },
        };
        let y = centers.into_internal(&transform).unwrap();
        assert_eq!((y.nrows(), y.ncols()), (2, 1));
        assert_relative_eq!(y[(0, 0)], transform.normalize(0, 12.0), epsilon = 1e-12);
        assert_relative_eq!(y[(1, 0)], transform.normalize(1, 16.0), epsilon = 1e-12);
    }

    #[test]
    fn user_points_must_match_shape() {
        let points = Mat::<f64>::zeros(2, 3);
        assert!(matches!(
            user_centers(points.as_ref(), 2, 2),
            Err(AlsError::Validation(_))
        ));
        assert!(user_centers(points.as_ref(), 2, 3).is_ok());
    }
}
