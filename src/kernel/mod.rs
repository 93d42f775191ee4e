//! Local merge kernel.
//!
//! A kernel unifies adjacent cells of one band (owned rows plus halo rows)
//! whose intensities differ by less than the threshold. Every form scans the
//! same adjacencies, the right and down neighbour of each cell in row-major
//! order, and applies the configured [`UnificationPolicy`]:
//!
//! - [`SequentialKernel`]: one cell at a time, exhaustive
//! - [`ParallelKernel`]: rows spread over a rayon pool, shared-memory safe
//! - [`AcceleratorKernel`]: a wgpu compute pass over every cell
//!
//! A *sweep* is one pass over all adjacencies. A band is at its *local fixed
//! point* once a sweep performs no unification.

pub mod accelerator;
pub mod parallel;
pub mod policy;
pub mod sequential;

pub use accelerator::AcceleratorKernel;
pub use parallel::ParallelKernel;
pub use policy::{FullPropagation, MinSwap, UnificationPolicy, Unifier};
pub use sequential::SequentialKernel;

use crate::core::config::SegmentConfig;
use crate::core::error::{PartitionError, SegmentResult};
use crate::core::gpu::GpuAdapter;
use crate::core::types::Label;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which form of the merge kernel runs a band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelKind {
    /// Exhaustive single-threaded sweeps.
    Sequential,
    /// Data-parallel sweeps on the CPU.
    Parallel,
    /// Data-parallel sweeps on the GPU.
    Accelerator,
}

impl fmt::Display for KernelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KernelKind::Sequential => "sequential",
            KernelKind::Parallel => "parallel",
            KernelKind::Accelerator => "accelerator",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for KernelKind {
    type Err = crate::core::error::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(KernelKind::Sequential),
            "parallel" => Ok(KernelKind::Parallel),
            "accelerator" | "gpu" => Ok(KernelKind::Accelerator),
            other => Err(crate::core::error::ConfigError::Parse(format!(
                "unknown kernel '{}'",
                other
            ))),
        }
    }
}

/// How many sweeps one merge call performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SweepMode {
    /// Sweep until a sweep reports no unification.
    #[default]
    ToFixedPoint,
    /// Exactly one sweep.
    Single,
}

/// Outcome of one merge call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeOutcome {
    /// Whether any sweep performed at least one unification.
    pub changed: bool,
    /// Number of sweeps performed.
    pub sweeps: usize,
    /// Number of unification events across all sweeps.
    pub unifications: u64,
}

impl MergeOutcome {
    /// Fold another outcome into this one.
    pub fn absorb(&mut self, other: MergeOutcome) {
        self.changed |= other.changed;
        self.sweeps += other.sweeps;
        self.unifications += other.unifications;
    }
}

/// Shape of a band: `width` columns by `rows` rows, halos included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandShape {
    /// Columns.
    pub width: usize,
    /// Rows, halos included.
    pub rows: usize,
}

impl BandShape {
    /// Validate that pixel and label buffers describe the same band.
    pub fn of(width: usize, pixels: &[u8], labels: &[Label]) -> Result<Self, PartitionError> {
        if labels.len() != pixels.len() {
            return Err(PartitionError::BandSize {
                index: 0,
                expected: pixels.len(),
                actual: labels.len(),
            });
        }
        if width == 0 {
            return Ok(Self { width, rows: 0 });
        }
        if pixels.len() % width != 0 {
            return Err(PartitionError::BandSize {
                index: 0,
                expected: pixels.len() / width * width,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            rows: pixels.len() / width,
        })
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.width * self.rows
    }

    /// Whether the band has no cells.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A form of the local merge kernel.
///
/// Implementations must agree on sweep semantics so that swapping one for
/// another changes cost, never the fixed point reached.
pub trait MergeKernel: Send + Sync {
    /// Short name for logs and reports.
    fn name(&self) -> &str;

    /// Kernel form.
    fn kind(&self) -> KernelKind;

    /// GPU adapter sweeps run on, `None` for CPU kernels.
    fn adapter(&self) -> Option<GpuAdapter> {
        None
    }

    /// Merge one band in place.
    ///
    /// `pixels` and `labels` cover the same `width`-wide band, halo rows
    /// included.
    fn merge(
        &self,
        pixels: &[u8],
        labels: &mut [Label],
        width: usize,
        mode: SweepMode,
    ) -> SegmentResult<MergeOutcome>;
}

/// Result of a single sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepStats {
    /// Unification events performed.
    pub unifications: u64,
}

impl SweepStats {
    /// Whether the sweep unified anything.
    pub fn changed(&self) -> bool {
        self.unifications > 0
    }
}

/// Drive `sweep` according to `mode`.
pub(crate) fn run_sweeps<F>(mode: SweepMode, mut sweep: F) -> SegmentResult<MergeOutcome>
where
    F: FnMut() -> SegmentResult<SweepStats>,
{
    let mut outcome = MergeOutcome::default();
    loop {
        let stats = sweep()?;
        outcome.sweeps += 1;
        outcome.unifications += stats.unifications;
        outcome.changed |= stats.changed();

        if mode == SweepMode::Single || !stats.changed() {
            break;
        }
    }
    log::trace!(
        "merge finished after {} sweep(s), {} unification(s)",
        outcome.sweeps,
        outcome.unifications
    );
    Ok(outcome)
}

/// Build the kernel a configuration asks for.
pub fn build_kernel(config: &SegmentConfig) -> SegmentResult<Box<dyn MergeKernel>> {
    let kernel: Box<dyn MergeKernel> = match config.effective_kernel() {
        KernelKind::Sequential => Box::new(SequentialKernel::new(config.threshold, config.policy)),
        KernelKind::Parallel => Box::new(ParallelKernel::with_threads(
            config.threshold,
            config.policy,
            config.threads,
        )?),
        KernelKind::Accelerator => Box::new(AcceleratorKernel::new(
            config.threshold,
            config.policy,
            config.threads,
        )?),
    };
    log::debug!("using {} merge kernel ({})", kernel.name(), config.policy);
    Ok(kernel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_shape() {
        let shape = BandShape::of(4, &[0; 12], &[0; 12]).unwrap();
        assert_eq!(shape.rows, 3);
        assert_eq!(shape.len(), 12);

        assert!(BandShape::of(4, &[0; 12], &[0; 8]).is_err());
        assert!(BandShape::of(5, &[0; 12], &[0; 12]).is_err());
    }

    #[test]
    fn test_run_sweeps_single() {
        let mut calls = 0;
        let outcome = run_sweeps(SweepMode::Single, || {
            calls += 1;
            Ok(SweepStats { unifications: 3 })
        })
        .unwrap();
        assert_eq!(calls, 1);
        assert!(outcome.changed);
        assert_eq!(outcome.unifications, 3);
    }

    #[test]
    fn test_run_sweeps_to_fixed_point() {
        let mut remaining = 3u64;
        let outcome = run_sweeps(SweepMode::ToFixedPoint, || {
            let stats = SweepStats {
                unifications: remaining,
            };
            remaining = remaining.saturating_sub(1);
            Ok(stats)
        })
        .unwrap();
        assert_eq!(outcome.sweeps, 4);
        assert_eq!(outcome.unifications, 6);
        assert!(outcome.changed);
    }

    #[test]
    fn test_kernel_kind_parse() {
        assert_eq!("gpu".parse::<KernelKind>().unwrap(), KernelKind::Accelerator);
        assert!("cuda".parse::<KernelKind>().is_err());
    }
}
