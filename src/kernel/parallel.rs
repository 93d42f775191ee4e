//! Data-parallel merge kernel on the CPU.
//!
//! Rows of a band are distributed over a rayon pool. Concurrent writers never
//! touch the label buffer unsynchronized:
//!
//! - under [`UnificationPolicy::MinSwap`] a sweep reads a snapshot of the
//!   previous sweep's labels and lowers `AtomicU32` cells of the next buffer
//!   with `fetch_min`, so the result does not depend on thread scheduling
//! - under [`UnificationPolicy::FullPropagation`] the intensity test runs
//!   lock-free and each unification (including its label re-check) runs under
//!   a `parking_lot::Mutex` guarding the whole buffer; afterwards every merged
//!   class takes the lowest label its cells held before the sweep
//!
//! A sweep only reports "no change" when no label changed during it, so a
//! sweep-to-fixed-point run ends at a true local fixed point.

use crate::core::error::{SegmentError, SegmentResult};
use crate::core::types::{Label, Threshold};
use crate::kernel::policy::UnificationPolicy;
use crate::kernel::{run_sweeps, BandShape, KernelKind, MergeKernel, MergeOutcome, SweepMode, SweepStats};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Data-parallel kernel.
pub struct ParallelKernel {
    threshold: Threshold,
    policy: UnificationPolicy,
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl ParallelKernel {
    /// Create a kernel running on rayon's global pool.
    pub fn new(threshold: Threshold, policy: UnificationPolicy) -> Self {
        Self {
            threshold,
            policy,
            pool: None,
        }
    }

    /// Create a kernel with a dedicated pool of `threads` threads.
    ///
    /// `threads == 0` uses rayon's global pool.
    pub fn with_threads(
        threshold: Threshold,
        policy: UnificationPolicy,
        threads: usize,
    ) -> SegmentResult<Self> {
        let mut kernel = Self::new(threshold, policy);
        if threads > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|i| format!("segmerge-merge-{}", i))
                .build()
                .map_err(|e| SegmentError::Other(format!("Failed to build thread pool: {}", e)))?;
            kernel.pool = Some(Arc::new(pool));
        }
        Ok(kernel)
    }

    /// Number of threads sweeps are spread over.
    pub fn threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }

    fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    fn merge_min_swap(
        &self,
        pixels: &[u8],
        labels: &mut [Label],
        shape: BandShape,
        mode: SweepMode,
    ) -> SegmentResult<MergeOutcome> {
        let threshold = self.threshold;
        let mut current = labels.to_vec();
        let next: Vec<AtomicU32> = current.iter().map(|&l| AtomicU32::new(l)).collect();

        let outcome = self.install(|| {
            run_sweeps(mode, || {
                let stats = sweep_double_buffered(threshold, pixels, &current, &next, shape);
                for (label, cell) in current.iter_mut().zip(&next) {
                    *label = cell.load(Ordering::Relaxed);
                }
                Ok(stats)
            })
        })?;

        labels.copy_from_slice(&current);
        Ok(outcome)
    }

    fn merge_locked(
        &self,
        pixels: &[u8],
        labels: &mut [Label],
        shape: BandShape,
        mode: SweepMode,
    ) -> SegmentResult<MergeOutcome> {
        let unifier = self.policy.unifier();
        let threshold = self.threshold;
        let shared = Mutex::new(labels);

        self.install(|| {
            run_sweeps(mode, || {
                let before = shared.lock().to_vec();
                let unifications: u64 = (0..shape.rows)
                    .into_par_iter()
                    .map(|y| {
                        let mut count = 0u64;
                        for x in 0..shape.width {
                            let idx = y * shape.width + x;
                            for neighbour in neighbours(shape, x, y, idx) {
                                if !threshold.admits(pixels[idx], pixels[neighbour]) {
                                    continue;
                                }
                                let mut guard = shared.lock();
                                if guard[idx] != guard[neighbour]
                                    && unifier.unify(&mut **guard, idx, neighbour)
                                {
                                    count += 1;
                                }
                            }
                        }
                        count
                    })
                    .sum();
                if unifications > 0 {
                    lowest_prior_labels(&before, &mut **shared.lock());
                }
                Ok(SweepStats { unifications })
            })
        })
    }
}

impl std::fmt::Debug for ParallelKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelKernel")
            .field("threshold", &self.threshold)
            .field("policy", &self.policy)
            .field("threads", &self.threads())
            .finish()
    }
}

impl MergeKernel for ParallelKernel {
    fn name(&self) -> &str {
        "parallel"
    }

    fn kind(&self) -> KernelKind {
        KernelKind::Parallel
    }

    fn merge(
        &self,
        pixels: &[u8],
        labels: &mut [Label],
        width: usize,
        mode: SweepMode,
    ) -> SegmentResult<MergeOutcome> {
        let shape = BandShape::of(width, pixels, labels)?;
        if shape.is_empty() {
            return Ok(MergeOutcome {
                sweeps: 1,
                ..MergeOutcome::default()
            });
        }
        match self.policy {
            UnificationPolicy::MinSwap => self.merge_min_swap(pixels, labels, shape, mode),
            UnificationPolicy::FullPropagation => self.merge_locked(pixels, labels, shape, mode),
        }
    }
}

/// Right and down neighbours of `(x, y)` that lie inside the band.
#[inline]
fn neighbours(shape: BandShape, x: usize, y: usize, idx: usize) -> impl Iterator<Item = usize> {
    let right = (x + 1 < shape.width).then_some(idx + 1);
    let down = (y + 1 < shape.rows).then_some(idx + shape.width);
    right.into_iter().chain(down)
}

/// One min-swap sweep that reads `current` and lowers cells of `next`.
///
/// `next` must hold a copy of `current` on entry. On return every cell holds
/// the minimum of its own label and the labels of its admitted neighbours in
/// `current`, whatever order the rows ran in.
pub(crate) fn sweep_double_buffered(
    threshold: Threshold,
    pixels: &[u8],
    current: &[Label],
    next: &[AtomicU32],
    shape: BandShape,
) -> SweepStats {
    let unifications = (0..shape.rows)
        .into_par_iter()
        .map(|y| {
            let mut count = 0u64;
            for x in 0..shape.width {
                let idx = y * shape.width + x;
                for neighbour in neighbours(shape, x, y, idx) {
                    let (a, b) = (current[idx], current[neighbour]);
                    if a == b || !threshold.admits(pixels[idx], pixels[neighbour]) {
                        continue;
                    }
                    let min = a.min(b);
                    next[idx].fetch_min(min, Ordering::Relaxed);
                    next[neighbour].fetch_min(min, Ordering::Relaxed);
                    count += 1;
                }
            }
            count
        })
        .sum();
    SweepStats { unifications }
}

/// Relabel each class of `labels` to the lowest label any of its cells held
/// in `before`.
///
/// Full propagation never splits a class, so distinct classes map to
/// distinct labels and no cell's label grows.
fn lowest_prior_labels(before: &[Label], labels: &mut [Label]) {
    let mut lowest: HashMap<Label, Label> = HashMap::new();
    for (&now, &was) in labels.iter().zip(before) {
        lowest
            .entry(now)
            .and_modify(|l| *l = (*l).min(was))
            .or_insert(was);
    }
    for label in labels.iter_mut() {
        if let Some(&canonical) = lowest.get(label) {
            *label = canonical;
        }
    }
}
