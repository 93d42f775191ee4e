//! Sequential merge kernel.

use crate::core::error::SegmentResult;
use crate::core::types::{Label, Threshold};
use crate::kernel::policy::{UnificationPolicy, Unifier};
use crate::kernel::{run_sweeps, BandShape, KernelKind, MergeKernel, MergeOutcome, SweepMode, SweepStats};

/// Exhaustive single-threaded kernel.
///
/// Cells are visited in row-major order and each unification is visible to
/// the very next adjacency check.
#[derive(Debug, Clone, Copy)]
pub struct SequentialKernel {
    threshold: Threshold,
    policy: UnificationPolicy,
}

impl SequentialKernel {
    /// Create a sequential kernel.
    pub fn new(threshold: Threshold, policy: UnificationPolicy) -> Self {
        Self { threshold, policy }
    }

    /// Perform exactly one sweep over the band.
    pub fn sweep(&self, pixels: &[u8], labels: &mut [Label], width: usize) -> SegmentResult<SweepStats> {
        let shape = BandShape::of(width, pixels, labels)?;
        Ok(sweep_band(
            self.policy.unifier(),
            self.threshold,
            pixels,
            labels,
            shape,
        ))
    }
}

impl MergeKernel for SequentialKernel {
    fn name(&self) -> &str {
        "sequential"
    }

    fn kind(&self) -> KernelKind {
        KernelKind::Sequential
    }

    fn merge(
        &self,
        pixels: &[u8],
        labels: &mut [Label],
        width: usize,
        mode: SweepMode,
    ) -> SegmentResult<MergeOutcome> {
        let shape = BandShape::of(width, pixels, labels)?;
        let unifier = self.policy.unifier();
        run_sweeps(mode, || {
            Ok(sweep_band(unifier, self.threshold, pixels, labels, shape))
        })
    }
}

/// One row-major sweep checking each cell's right and down neighbour.
pub(crate) fn sweep_band(
    unifier: &dyn Unifier,
    threshold: Threshold,
    pixels: &[u8],
    labels: &mut [Label],
    shape: BandShape,
) -> SweepStats {
    let BandShape { width, rows } = shape;
    let mut stats = SweepStats::default();

    for y in 0..rows {
        for x in 0..width {
            let idx = y * width + x;

            if x + 1 < width {
                let right = idx + 1;
                if labels[idx] != labels[right]
                    && threshold.admits(pixels[idx], pixels[right])
                    && unifier.unify(labels, idx, right)
                {
                    stats.unifications += 1;
                }
            }

            if y + 1 < rows {
                let down = idx + width;
                if labels[idx] != labels[down]
                    && threshold.admits(pixels[idx], pixels[down])
                    && unifier.unify(labels, idx, down)
                {
                    stats.unifications += 1;
                }
            }
        }
    }

    stats
}
