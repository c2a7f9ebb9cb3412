//! Cholesky factorization with bounded diagonal-loading repair.

use super::error::AlsError;
use faer::{Mat, MatRef, Side};

pub const DEFAULT_MAX_CHOLESKY_ATTEMPTS: usize = 10;
pub const INITIAL_DIAGONAL_LOADING: f64 = 1.0e-5;
const LOADING_GROWTH: f64 = 10.0;

/// Lower-triangular factor `L` with `L L' = G`.
#[derive(Clone, Debug)]
pub struct CholeskyFactor {
    lower: Mat<f64>,
}

impl CholeskyFactor {
    pub fn order(&self) -> usize {
        self.lower.nrows()
    }

    pub fn lower(&self) -> MatRef<'_, f64> {
        self.lower.as_ref()
    }

    /// Solves `L L' x = rhs`, overwriting `rhs` with `x`.
    pub fn solve_in_place(&self, rhs: &mut [f64]) {
        let n = self.order();
        debug_assert_eq!(rhs.len(), n);
        let l = self.lower.as_ref();

        for i in 0..n {
            let mut acc = rhs[i];
            for j in 0..i {
                acc -= l[(i, j)] * rhs[j];
            }
            rhs[i] = acc / l[(i, i)];
        }

        for i in (0..n).rev() {
            let mut acc = rhs[i];
            for j in i + 1..n {
                acc -= l[(j, i)] * rhs[j];
            }
            rhs[i] = acc / l[(i, i)];
        }
    }
}

/// Factorizes symmetric matrices, loading the diagonal until they are positive definite.
///
/// Attempt one factorizes `G` unchanged. Each failure adds the current loading to
/// the diagonal (cumulatively) and multiplies the loading by ten. This repair is
/// separate from the user's `gamma`, which callers add before handing `G` over.
#[derive(Clone, Copy, Debug)]
pub struct RegularizedCholesky {
    max_attempts: usize,
}

impl Default for RegularizedCholesky {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHOLESKY_ATTEMPTS)
    }
}

impl RegularizedCholesky {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn factorize(&self, gram: MatRef<'_, f64>) -> Result<CholeskyFactor, AlsError> {
        let n = gram.nrows();
        if gram.ncols() != n {
            return Err(AlsError::validation(format!(
                "Cholesky input must be square, got {}x{}",
                n,
                gram.ncols()
            )));
        }
        debug_assert!(is_exactly_symmetric(gram), "Cholesky input must be symmetric");

        let finite = (0..n).all(|j| (0..n).all(|i| gram[(i, j)].is_finite()));
        if !finite {
            return Err(AlsError::NumericalInstability {
                matrix: gram.to_owned(),
                attempts: 0,
            });
        }

        let mut working = gram.to_owned();
        let mut loading = INITIAL_DIAGONAL_LOADING;
        let mut applied = 0.0;

        for attempt in 1..=self.max_attempts {
            if let Ok(llt) = working.as_ref().llt(Side::Lower) {
                if applied > 0.0 {
                    log::warn!(
                        "Gram matrix of order {} required diagonal loading {:.3e} after {} attempts",
                        n,
                        applied,
                        attempt
                    );
                }
                return Ok(CholeskyFactor {
                    lower: llt.L().to_owned(),
                });
            }

            if attempt == self.max_attempts {
                break;
            }
            for i in 0..n {
                working[(i, i)] += loading;
            }
            applied += loading;
            log::debug!("Cholesky attempt {attempt} failed; loading diagonal by {loading:.1e}");
            loading *= LOADING_GROWTH;
        }

        log::error!(
            "Cholesky repair exhausted after {} attempts (total loading {:.3e})",
            self.max_attempts,
            applied
        );
        Err(AlsError::NumericalInstability {
            matrix: gram.to_owned(),
            attempts: self.max_attempts,
        })
    }
}

pub(crate) fn is_exactly_symmetric(mat: MatRef<'_, f64>) -> bool {
    let n = mat.nrows();
    (0..n).all(|j| (0..j).all(|i| mat[(i, j)].to_bits() == mat[(j, i)].to_bits()))
}
