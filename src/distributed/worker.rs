//! Per-worker loop of the distributed backends.
//!
//! ```text
//! broadcast dims -> scatter band -> pixel halos -> label init
//!   -> loop { merge -> label halo exchange -> convergence check }
//!   -> project -> gather output + canonical labels
//! ```
//!
//! Every step after the broadcast is a collective, so all ranks walk through
//! exactly the same sequence. Any error makes the worker return early and
//! drop its endpoint, which disconnects the peers waiting on it.

use crate::core::config::SegmentConfig;
use crate::core::error::SegmentResult;
use crate::core::types::{Label, Raster};
use crate::distributed::comm::Communicator;
use crate::distributed::convergence::{ConvergenceController, RoundDecision};
use crate::distributed::halo::{exchange_label_halos, exchange_pixel_halos};
use crate::distributed::partition::{assemble, Partition, PartitionPlan};
use crate::execution::progress::ProgressTracker;
use crate::execution::projection::project;
use crate::kernel::{MergeKernel, MergeOutcome};
use std::time::Instant;

/// Shared, read-only inputs of every worker.
#[derive(Clone, Copy)]
pub struct WorkerContext<'a> {
    /// Configuration shared by every rank.
    pub config: &'a SegmentConfig,
    /// Kernel that merges each band.
    pub kernel: &'a dyn MergeKernel,
    /// Round reporting, if anyone listens.
    pub progress: Option<&'a ProgressTracker>,
}

/// What a worker hands back when its loop ends.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    /// Rank of the reporting worker.
    pub rank: usize,
    /// Partition plan every rank derived from the broadcast dimensions.
    pub plan: PartitionPlan,
    /// Rounds run.
    pub rounds: u32,
    /// Whether the last round changed nothing on any worker.
    pub converged: bool,
    /// Merge totals over all rounds of this worker.
    pub merge: MergeOutcome,
    /// Assembled projected output, on the root only.
    pub output: Option<Raster>,
    /// Assembled canonical labels, on the root only.
    pub labels: Option<Vec<Label>>,
}

/// Run one worker to completion.
///
/// The root (rank 0) passes the raster; every other rank passes `None`.
pub fn run_worker<C>(comm: &C, raster: Option<&Raster>, ctx: WorkerContext<'_>) -> SegmentResult<WorkerReport>
where
    C: Communicator + ?Sized,
{
    let rank = comm.rank();
    let config = ctx.config;

    let (width, height) = comm.broadcast_dims(raster.map(Raster::dimensions))?;
    let plan = PartitionPlan::new(width, height, comm.size(), config.remainder)?;
    if comm.is_root() {
        log::info!(
            "Segmenting {}x{} across {} worker(s), {} row(s) each",
            width,
            height,
            plan.workers(),
            plan.rows_per_worker()
        );
        if plan.dropped_rows() > 0 {
            log::warn!(
                "Dropping {} trailing row(s): height {} is not divisible by {} workers",
                plan.dropped_rows(),
                height,
                plan.workers()
            );
        }
    }

    let band = comm.scatter_rows(raster.map(Raster::pixels), plan.band_len())?;
    let mut partition = Partition::from_band(&plan, rank, band)?;
    exchange_pixel_halos(comm, &mut partition)?;

    let pixels = partition.band_pixels();
    let mut grid = partition.initial_labels();
    let sweep = config.effective_sweep();
    let mut controller = ConvergenceController::new(config.convergence);
    let mut merge = MergeOutcome::default();

    let converged = loop {
        let started = Instant::now();
        let outcome = ctx.kernel.merge(&pixels, grid.as_mut_slice(), width, sweep)?;
        merge.absorb(outcome);
        exchange_label_halos(comm, &mut grid)?;

        let round = controller.rounds() + 1;
        if let Some(progress) = ctx.progress {
            progress.round_completed(rank, round, outcome.changed, started.elapsed().as_millis() as u64);
        }

        match controller.end_round(comm, outcome.changed)? {
            RoundDecision::Continue => continue,
            RoundDecision::Stop { converged } => break converged,
        }
    };

    let rounds = controller.rounds();
    if comm.is_root() {
        if converged {
            log::info!("Converged after {} round(s)", rounds);
            if let Some(progress) = ctx.progress {
                progress.converged(rounds);
            }
        } else {
            log::info!("Stopped after {} round(s) without reaching a fixed point", rounds);
        }
    }

    let projected = project(grid.owned(), config.modulus)?;
    let output = comm
        .gather_bytes(projected)?
        .map(|bands| assemble(width, &bands))
        .transpose()?;
    let labels = comm.gather_labels(grid.owned().to_vec())?;

    Ok(WorkerReport {
        rank,
        plan,
        rounds,
        converged,
        merge,
        output,
        labels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Threshold;
    use crate::distributed::comm::ChannelCommunicator;
    use crate::distributed::convergence::ConvergencePolicy;
    use crate::kernel::{SequentialKernel, UnificationPolicy};

    fn run_world(raster: &Raster, config: &SegmentConfig) -> Vec<WorkerReport> {
        let kernel = SequentialKernel::new(config.threshold, config.policy);
        let ctx = WorkerContext {
            config,
            kernel: &kernel,
            progress: None,
        };
        let world = ChannelCommunicator::world(config.workers);
        crossbeam::thread::scope(|s| {
            let handles: Vec<_> = world
                .into_iter()
                .map(|comm| {
                    let raster = comm.is_root().then_some(raster);
                    s.spawn(move |_| run_worker(&comm, raster, ctx).unwrap())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
        .unwrap()
    }

    #[test]
    fn test_uniform_raster_merges_across_workers() {
        let raster = Raster::filled(4, 4, 0);
        let config = SegmentConfig::new().with_workers(2);
        let reports = run_world(&raster, &config);

        let root = &reports[0];
        assert_eq!(root.output, Some(Raster::filled(4, 4, 0)));
        assert_eq!(root.labels.as_deref(), Some(&[0; 16][..]));
        assert_eq!(root.rounds, 5);
        assert!(root.converged);
        assert!(reports[1].output.is_none());
    }

    #[test]
    fn test_change_driven_stops_early() {
        let raster = Raster::filled(3, 8, 9);
        let config = SegmentConfig::new()
            .with_workers(4)
            .with_convergence(ConvergencePolicy::change_driven());
        let reports = run_world(&raster, &config);

        assert!(reports.iter().all(|r| r.converged));
        assert!(reports.iter().all(|r| r.rounds == reports[0].rounds));
        assert_eq!(reports[0].labels.as_deref(), Some(&[0; 24][..]));
    }

    #[test]
    fn test_dropped_rows_shrink_output() {
        let raster = Raster::filled(2, 5, 0);
        let config = SegmentConfig::new()
            .with_workers(2)
            .with_threshold(Threshold::new(4).unwrap())
            .with_policy(UnificationPolicy::FullPropagation);
        let reports = run_world(&raster, &config);

        assert_eq!(reports[0].plan.dropped_rows(), 1);
        assert_eq!(reports[0].output.as_ref().map(Raster::dimensions), Some((2, 4)));
    }
}
