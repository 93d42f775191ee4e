//! Segmentation engine.
//!
//! One entry point for all three backends:
//!
//! - shared memory: a single data-parallel merge to a true fixed point,
//!   no halo exchange and no gather
//! - distributed: one OS thread per worker, each running
//!   [`run_worker`] over a [`ChannelCommunicator`]
//! - hybrid: the distributed loop with the accelerator kernel

use crate::core::codec::{read_raster, write_raster};
use crate::core::config::{Backend, SegmentConfig};
use crate::core::error::{CommError, SegmentError, SegmentResult};
use crate::core::gpu::GpuAdapter;
use crate::core::types::{Label, Raster};
use crate::distributed::comm::{ChannelCommunicator, Communicator};
use crate::distributed::worker::{run_worker, WorkerContext, WorkerReport};
use crate::execution::progress::{ProgressCallback, ProgressTracker, ProgressUpdate};
use crate::execution::projection::project_raster;
use crate::kernel::policy::UnificationPolicy;
use crate::kernel::{build_kernel, KernelKind, MergeKernel, SweepMode};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Statistics of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Backend that ran.
    pub backend: Backend,
    /// Kernel form that ran.
    pub kernel: KernelKind,
    /// Kernel name, showing CPU fallback of the accelerator.
    pub kernel_name: String,
    /// GPU adapter the sweeps were offloaded to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu: Option<GpuAdapter>,
    /// Unification policy.
    pub policy: UnificationPolicy,
    /// Number of workers.
    pub workers: usize,
    /// Rounds run.
    pub rounds: u32,
    /// Sweeps across all workers and rounds.
    pub sweeps: usize,
    /// Unification events across all workers and rounds.
    pub unifications: u64,
    /// Whether the final round changed nothing on any worker.
    pub converged: bool,
    /// Input rows excluded by the remainder policy.
    pub dropped_rows: usize,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl RunStats {
    /// Serialize as pretty JSON.
    pub fn to_json(&self) -> SegmentResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| SegmentError::Other(e.to_string()))
    }
}

/// Result of a segmentation run.
#[derive(Debug, Clone)]
pub struct Segmentation {
    /// Projected, displayable output.
    pub output: Raster,
    /// Canonical region identifiers, row-major, same extent as `output`.
    pub labels: Vec<Label>,
    /// Run statistics.
    pub stats: RunStats,
}

impl Segmentation {
    /// Number of distinct regions.
    pub fn region_count(&self) -> usize {
        crate::validation::region_count(&self.labels)
    }
}

/// The segmentation engine.
pub struct SegmentationEngine {
    config: SegmentConfig,
    progress_callback: Option<Arc<ProgressCallback>>,
}

impl SegmentationEngine {
    /// Create an engine for `config`.
    pub fn new(config: SegmentConfig) -> Self {
        Self {
            config,
            progress_callback: None,
        }
    }

    /// The configuration every backend and worker receives.
    pub fn config(&self) -> &SegmentConfig {
        &self.config
    }

    /// Set progress callback.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(Box::new(callback)));
        self
    }

    /// Segment a raster.
    pub fn run(&self, raster: &Raster) -> SegmentResult<Segmentation> {
        self.config.validate()?;
        raster.ensure_labelable()?;

        let workers = match self.config.backend {
            Backend::SharedMemory => 1,
            _ => self.config.workers,
        };
        let round_limit = match self.config.backend {
            Backend::SharedMemory => Some(1),
            _ => self.config.convergence.round_limit(),
        };
        let mut tracker = ProgressTracker::new(workers, round_limit);
        if let Some(callback) = &self.progress_callback {
            let callback = callback.clone();
            tracker = tracker.with_callback(Box::new(move |update| callback(update)));
        }
        tracker.start(&self.config.backend.to_string());

        let start_time = Instant::now();
        let result = build_kernel(&self.config).and_then(|kernel| match self.config.backend {
            Backend::SharedMemory => self.run_shared(raster, kernel.as_ref(), &tracker),
            Backend::Distributed | Backend::Hybrid => {
                self.run_distributed(raster, kernel.as_ref(), &tracker)
            }
        });

        match result {
            Ok(mut segmentation) => {
                segmentation.stats.duration_ms = start_time.elapsed().as_millis() as u64;
                tracker.complete(segmentation.stats.rounds);
                log::info!(
                    "Segmentation finished in {} ms: {} round(s), {} unification(s), converged: {}",
                    segmentation.stats.duration_ms,
                    segmentation.stats.rounds,
                    segmentation.stats.unifications,
                    segmentation.stats.converged
                );
                Ok(segmentation)
            }
            Err(e) => {
                tracker.report_error(None, e.to_string());
                Err(e)
            }
        }
    }

    fn stats(&self, kernel: &dyn MergeKernel, workers: usize) -> RunStats {
        RunStats {
            backend: self.config.backend,
            kernel: kernel.kind(),
            kernel_name: kernel.name().to_string(),
            gpu: kernel.adapter(),
            policy: self.config.policy,
            workers,
            rounds: 0,
            sweeps: 0,
            unifications: 0,
            converged: false,
            dropped_rows: 0,
            duration_ms: 0,
        }
    }

    fn run_shared(
        &self,
        raster: &Raster,
        kernel: &dyn MergeKernel,
        tracker: &ProgressTracker,
    ) -> SegmentResult<Segmentation> {
        let (width, height) = raster.dimensions();
        log::info!("Segmenting {}x{} in shared memory with the {} kernel", width, height, kernel.name());

        let started = Instant::now();
        let mut labels: Vec<Label> = (0..raster.len() as Label).collect();
        let outcome = kernel.merge(raster.pixels(), &mut labels, width, SweepMode::ToFixedPoint)?;
        tracker.round_completed(0, 1, outcome.changed, started.elapsed().as_millis() as u64);
        tracker.converged(1);

        let output = project_raster(width, height, &labels, self.config.modulus)?;
        let mut stats = self.stats(kernel, 1);
        stats.rounds = 1;
        stats.sweeps = outcome.sweeps;
        stats.unifications = outcome.unifications;
        stats.converged = true;

        Ok(Segmentation {
            output,
            labels,
            stats,
        })
    }

    fn run_distributed(
        &self,
        raster: &Raster,
        kernel: &dyn MergeKernel,
        tracker: &ProgressTracker,
    ) -> SegmentResult<Segmentation> {
        let workers = self.config.workers;
        let ctx = WorkerContext {
            config: &self.config,
            kernel,
            progress: Some(tracker),
        };

        let world = ChannelCommunicator::world(workers);
        let results: Vec<SegmentResult<WorkerReport>> = crossbeam::thread::scope(|s| {
            let mut handles = Vec::with_capacity(workers);
            for comm in world {
                let rank = comm.rank();
                let raster = comm.is_root().then_some(raster);
                let handle = s
                    .builder()
                    .name(format!("segmerge-worker-{}", rank))
                    .spawn(move |_| run_worker(&comm, raster, ctx));
                handles.push((rank, handle));
            }

            handles
                .into_iter()
                .map(|(rank, handle)| match handle {
                    Ok(handle) => handle
                        .join()
                        .unwrap_or(Err(SegmentError::WorkerPanicked { rank })),
                    Err(e) => Err(SegmentError::Io(e)),
                })
                .collect()
        })
        .map_err(|_| SegmentError::Other("Worker scope panicked".to_string()))?;

        let mut reports = Vec::with_capacity(workers);
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(report) => reports.push(report),
                Err(e) => failures.push(e),
            }
        }
        if !failures.is_empty() {
            return Err(root_cause(failures));
        }

        let mut stats = self.stats(kernel, workers);
        for report in &reports {
            stats.sweeps += report.merge.sweeps;
            stats.unifications += report.merge.unifications;
        }

        let root = reports
            .into_iter()
            .find(|r| r.rank == crate::distributed::comm::ROOT)
            .ok_or_else(|| SegmentError::Other("Root worker produced no report".to_string()))?;
        stats.rounds = root.rounds;
        stats.converged = root.converged;
        stats.dropped_rows = root.plan.dropped_rows();

        let output = root
            .output
            .ok_or_else(|| SegmentError::Other("Root worker gathered no output".to_string()))?;
        let labels = root
            .labels
            .ok_or_else(|| SegmentError::Other("Root worker gathered no labels".to_string()))?;

        Ok(Segmentation {
            output,
            labels,
            stats,
        })
    }
}

impl std::fmt::Debug for SegmentationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentationEngine")
            .field("config", &self.config)
            .field("progress_callback", &self.progress_callback.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

/// Pick the error that started a failed run.
///
/// A worker that fails drops its channels, so its peers fail too with
/// `Disconnected`. Those are consequences, not the cause.
fn root_cause(mut failures: Vec<SegmentError>) -> SegmentError {
    let cause = failures
        .iter()
        .position(|e| !matches!(e, SegmentError::Comm(CommError::Disconnected { .. })))
        .unwrap_or(0);
    failures.swap_remove(cause)
}

/// Read `input`, segment it and write the projected output to `output`.
pub fn run_file(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    config: &SegmentConfig,
) -> SegmentResult<Segmentation> {
    let raster = read_raster(input)?;
    let segmentation = SegmentationEngine::new(config.clone()).run(&raster)?;
    write_raster(output, &segmentation.output)?;
    Ok(segmentation)
}
