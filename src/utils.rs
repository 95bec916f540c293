//! Common utilities used across the crate.
//!
//! This module provides the parallelism switch, thread-pool setup, sparse
//! dot products, vector statistics and a weighted semaphore used to bound
//! concurrent file reads.

use std::ops::Range;
use std::sync::{Condvar, Mutex};

use ndarray::Array1;
use rayon::prelude::*;

use crate::features::J;

/// Number of worker threads used by data passes unless overridden.
pub const DEFAULT_WORKERS: usize = 4;

// =============================================================================
// Parallelism Configuration
// =============================================================================

/// Whether parallel execution is allowed.
///
/// Deterministic runs use `Sequential`, which guarantees identical outputs
/// across runs. Components don't manage thread pools - they just respect
/// this flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parallelism {
    Sequential,
    Parallel,
}

impl Parallelism {
    /// Deterministic mode maps to sequential execution.
    #[inline]
    pub fn from_deterministic(deterministic: bool) -> Self {
        if deterministic {
            Parallelism::Sequential
        } else {
            Parallelism::Parallel
        }
    }

    /// Returns `true` if parallel execution is allowed.
    #[inline]
    pub fn is_parallel(self) -> bool {
        matches!(self, Parallelism::Parallel)
    }

    #[inline]
    pub fn maybe_par_for_each<T, I, F>(self, iter: I, f: F)
    where
        T: Send,
        I: IntoIterator<Item = T> + IntoParallelIterator<Item = T>,
        F: Fn(T) + Sync + Send,
    {
        if self.is_parallel() {
            iter.into_par_iter().for_each(f);
        } else {
            iter.into_iter().for_each(f);
        }
    }

    /// Parallel for_each with per-thread initialization.
    ///
    /// The `init` closure is called once per worker thread (in parallel mode)
    /// or once total (in sequential mode). The resulting value is passed to
    /// `f` and reused across iterations on the same thread. Ideal for
    /// thread-local scratch buffers.
    #[inline]
    pub fn maybe_par_for_each_init<T, I, INIT, S, F>(self, iter: I, init: INIT, f: F)
    where
        T: Send,
        I: IntoIterator<Item = T> + IntoParallelIterator<Item = T>,
        INIT: Fn() -> S + Sync + Send,
        F: Fn(&mut S, T) + Sync + Send,
    {
        if self.is_parallel() {
            iter.into_par_iter().for_each_init(init, f);
        } else {
            let mut state = init();
            iter.into_iter().for_each(|item| f(&mut state, item));
        }
    }

    #[inline]
    pub fn maybe_par_map<T, B, I, F>(self, iter: I, f: F) -> Vec<B>
    where
        T: Send,
        B: Send,
        I: IntoIterator<Item = T> + IntoParallelIterator<Item = T>,
        F: Fn(T) -> B + Sync + Send,
    {
        if self.is_parallel() {
            iter.into_par_iter().map(f).collect()
        } else {
            iter.into_iter().map(f).collect()
        }
    }
}

/// Run a closure with the appropriate thread pool.
///
/// Thread count semantics:
/// - `0` = auto (use all available cores)
/// - `1` = sequential (no thread pool)
/// - `n > 1` = use exactly `n` threads
#[inline]
pub fn run_with_threads<T: Send>(
    n_threads: usize,
    f: impl FnOnce(Parallelism) -> T + Send,
) -> T {
    if n_threads == 1 {
        f(Parallelism::Sequential)
    } else {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .build()
            .expect("failed to create thread pool");
        pool.install(|| f(Parallelism::Parallel))
    }
}

/// Split `[0, n)` into `parts` contiguous ranges of near-equal length.
pub fn split_evenly(n: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.max(1);
    (0..parts)
        .map(|i| (i * n / parts)..((i + 1) * n / parts))
        .collect()
}

// =============================================================================
// Sparse / Vector Math
// =============================================================================

/// Dot product of a boolean sparse row with a dense weight vector.
#[inline]
pub fn sparse_dot(js: &[J], w: &Array1<f64>) -> f64 {
    let mut dot = 0.0;
    for &j in js {
        debug_assert!((j as usize) < w.len());
        dot += w[j as usize];
    }
    dot
}

#[inline]
pub fn sign(x: f64) -> f64 {
    ((x > 0.0) as i32 - (x < 0.0) as i32) as f64
}

pub fn l1_norm(v: &Array1<f64>) -> f64 {
    v.iter().map(|d| d.abs()).sum()
}

pub fn l2_norm_squared(v: &Array1<f64>) -> f64 {
    v.iter().map(|d| d * d).sum()
}

pub fn nonzero_count(v: &Array1<f64>) -> u64 {
    v.iter().filter(|&&d| d != 0.0).count() as u64
}

/// Resize a dense vector, preserving the existing prefix and zero-filling
/// the tail.
pub fn resize_dense(v: &mut Array1<f64>, new_len: usize) {
    if v.len() == new_len {
        return;
    }
    let mut out = Array1::<f64>::zeros(new_len);
    let keep = v.len().min(new_len);
    out.slice_mut(ndarray::s![..keep])
        .assign(&v.slice(ndarray::s![..keep]));
    *v = out;
}

/// 64-bit hash of a row id, used for the per-J determinism hash in stats.
///
/// Murmur3 finalizer; good avalanche, stable across runs.
#[inline]
pub fn hash64(mut x: u64) -> u64 {
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51afd7ed558ccd);
    x ^= x >> 33;
    x = x.wrapping_mul(0xc4ceb9fe1a85ec53);
    x ^= x >> 33;
    x
}

// =============================================================================
// Weighted Semaphore
// =============================================================================

/// Counting semaphore bounding concurrent file buffers during data reading.
pub struct WeightedSemaphore {
    available: Mutex<i64>,
    cv: Condvar,
}

impl WeightedSemaphore {
    pub fn new(capacity: u32) -> Self {
        Self {
            available: Mutex::new(i64::from(capacity)),
            cv: Condvar::new(),
        }
    }

    /// Blocks until `weight` units are available, then takes them.
    pub fn acquire(&self, weight: u32) -> SemaphoreGuard<'_> {
        let mut available = self.available.lock().unwrap();
        while *available < i64::from(weight) {
            available = self.cv.wait(available).unwrap();
        }
        *available -= i64::from(weight);
        SemaphoreGuard {
            semaphore: self,
            weight,
        }
    }

    fn release(&self, weight: u32) {
        let mut available = self.available.lock().unwrap();
        *available += i64::from(weight);
        self.cv.notify_all();
    }
}

/// RAII guard releasing semaphore units on drop.
pub struct SemaphoreGuard<'a> {
    semaphore: &'a WeightedSemaphore,
    weight: u32,
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        self.semaphore.release(self.weight);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn parallelism_from_deterministic() {
        assert!(!Parallelism::from_deterministic(true).is_parallel());
        assert!(Parallelism::from_deterministic(false).is_parallel());
    }

    #[test]
    fn maybe_par_map_preserves_order() {
        let out = Parallelism::Parallel.maybe_par_map(0..8usize, |i| i * 2);
        assert_eq!(out, vec![0, 2, 4, 6, 8, 10, 12, 14]);
        let out = Parallelism::Sequential.maybe_par_map(0..8usize, |i| i * 2);
        assert_eq!(out, vec![0, 2, 4, 6, 8, 10, 12, 14]);
    }

    #[test]
    fn split_evenly_covers_range() {
        let ranges = split_evenly(10, 4);
        assert_eq!(ranges.len(), 4);
        assert_eq!(ranges[0].start, 0);
        assert_eq!(ranges[3].end, 10);
        let total: usize = ranges.iter().map(|r| r.len()).sum();
        assert_eq!(total, 10);
    }

    #[test]
    fn sparse_dot_sums_selected_weights() {
        let w = array![0.5, 1.0, 2.0, -0.25];
        assert_eq!(sparse_dot(&[0, 2], &w), 2.5);
        assert_eq!(sparse_dot(&[], &w), 0.0);
    }

    #[test]
    fn sign_convention() {
        assert_eq!(sign(3.0), 1.0);
        assert_eq!(sign(-0.5), -1.0);
        assert_eq!(sign(0.0), 0.0);
    }

    #[test]
    fn resize_dense_preserves_prefix() {
        let mut v = array![1.0, 2.0];
        resize_dense(&mut v, 4);
        assert_eq!(v, array![1.0, 2.0, 0.0, 0.0]);
        resize_dense(&mut v, 1);
        assert_eq!(v, array![1.0]);
    }

    #[test]
    fn semaphore_limits_concurrency() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let sem = Arc::new(WeightedSemaphore::new(2));
        let peak = Arc::new(AtomicU32::new(0));
        let active = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sem = Arc::clone(&sem);
                let peak = Arc::clone(&peak);
                let active = Arc::clone(&active);
                std::thread::spawn(move || {
                    let _guard = sem.acquire(1);
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(5));
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
