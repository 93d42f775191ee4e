//! Execution module.
//!
//! This module drives a run end to end: backend dispatch, progress
//! reporting and the final projection of labels into bytes.

pub mod engine;
pub mod progress;
pub mod projection;

pub use engine::{run_file, RunStats, Segmentation, SegmentationEngine};
pub use progress::{ProgressTracker, ProgressUpdate};
pub use projection::{project, project_raster};
