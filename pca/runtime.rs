use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// How partition tasks of a phase are dispatched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parallelism {
    Sequential,
    #[default]
    Rayon,
}

/// Cooperative cancellation flag, observed only between outer iterations.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Runs one map/reduce phase over partitions at a time.
///
/// Every call returns only after the reduction has completed, so consecutive
/// phases never overlap.
pub struct PhaseRunner {
    mode: Parallelism,
    pool: Option<ThreadPool>,
}

impl PhaseRunner {
    pub fn new(
        mode: Parallelism,
        threads: Option<usize>,
    ) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = match (mode, threads) {
            (Parallelism::Rayon, Some(count)) => {
                Some(ThreadPoolBuilder::new().num_threads(count).build()?)
            }
            _ => None,
        };
        Ok(Self { mode, pool })
    }

    pub fn sequential() -> Self {
        Self {
            mode: Parallelism::Sequential,
            pool: None,
        }
    }

    fn install<R, F>(&self, op: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    /// Maps `map` over `0..n` and folds the results with the associative `reduce`.
    pub fn map_reduce<T, I, M, R>(&self, n: usize, identity: I, map: M, reduce: R) -> T
    where
        T: Send,
        I: Fn() -> T + Sync + Send,
        M: Fn(usize) -> T + Sync + Send,
        R: Fn(T, T) -> T + Sync + Send,
    {
        match self.mode {
            Parallelism::Sequential => (0..n).map(&map).fold(identity(), &reduce),
            Parallelism::Rayon => {
                self.install(|| (0..n).into_par_iter().map(&map).reduce(&identity, &reduce))
            }
        }
    }

    /// Like [`Self::map_reduce`], handing each task exclusive access to `items[i]`.
    pub fn map_reduce_mut<E, T, I, M, R>(
        &self,
        items: &mut [E],
        identity: I,
        map: M,
        reduce: R,
    ) -> T
    where
        E: Send,
        T: Send,
        I: Fn() -> T + Sync + Send,
        M: Fn(usize, &mut E) -> T + Sync + Send,
        R: Fn(T, T) -> T + Sync + Send,
    {
        match self.mode {
            Parallelism::Sequential => items
                .iter_mut()
                .enumerate()
                .map(|(index, item)| map(index, item))
                .fold(identity(), &reduce),
            Parallelism::Rayon => self.install(|| {
                items
                    .par_iter_mut()
                    .enumerate()
                    .map(|(index, item)| map(index, item))
                    .reduce(&identity, &reduce)
            }),
        }
    }
}
