//! # Segmerge - Region-merging Image Segmentation
//!
//! Segmerge labels a grayscale raster by repeatedly merging 4-adjacent
//! pixels whose intensities differ by less than a threshold, until the
//! labeling stops changing or a round budget runs out.
//!
//! ## Features
//!
//! - **Three kernel forms**: sequential, rayon data-parallel, and a wgpu
//!   compute pass, all unifying the same adjacencies
//! - **Domain decomposition**: row bands across message-passing workers with
//!   halo exchange and a convergence vote
//! - **Deterministic output**: min-swap unification yields the minimum pixel
//!   index of each region, whatever the worker or thread count
//! - **PGM in, PGM out**: binary graymaps through the `image` crate
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use segmerge::prelude::*;
//!
//! let raster = read_raster("plate.pgm")?;
//! let config = SegmentConfig::new()
//!     .with_workers(4)
//!     .with_threshold(Threshold::new(12)?)
//!     .with_convergence(ConvergencePolicy::change_driven());
//!
//! let result = SegmentationEngine::new(config).run(&raster)?;
//! println!("{} regions in {} rounds", result.region_count(), result.stats.rounds);
//! write_raster("plate_segmented.pgm", &result.output)?;
//! ```
//!
//! ## Architecture
//!
//! - [`core`]: Raster types, configuration, errors, codec and GPU access
//! - [`kernel`]: The local merge kernel and its unification policies
//! - [`distributed`]: Partitioner, communicator, halo exchange, convergence
//! - [`execution`]: Engine, progress tracking and output projection
//! - [`validation`]: Output comparison

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod core;
pub mod distributed;
pub mod execution;
pub mod kernel;
pub mod validation;

/// Prelude module for convenient imports.
///
/// Import everything commonly needed with:
/// ```rust,ignore
/// use segmerge::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use crate::core::types::{Label, Raster, Threshold};
    pub use crate::core::config::{Backend, SegmentConfig};
    pub use crate::core::codec::{read_raster, write_raster};

    // Errors
    pub use crate::core::error::{
        CommError, ConfigError, GpuError, PartitionError, RasterError, SegmentError, SegmentResult,
    };

    // Kernels
    pub use crate::kernel::{
        AcceleratorKernel, KernelKind, MergeKernel, MergeOutcome, ParallelKernel, SequentialKernel,
        SweepMode, UnificationPolicy,
    };

    // Distributed
    pub use crate::distributed::{
        ChannelCommunicator, Communicator, ConvergencePolicy, PartitionPlan, RemainderPolicy,
    };

    // Execution
    pub use crate::execution::engine::{run_file, RunStats, Segmentation, SegmentationEngine};
    pub use crate::execution::progress::{ProgressCallback, ProgressTracker, ProgressUpdate};

    // Validation
    pub use crate::validation::{compare_rasters, same_partition, Comparison};
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
