//! Core types shared by every backend.
//!
//! - Raster, label and threshold types
//! - Run configuration
//! - Error types
//! - PGM codec
//! - GPU device access

pub mod codec;
pub mod config;
pub mod error;
pub mod gpu;
pub mod types;

// Re-export commonly used types
pub use codec::{decode_pgm, encode_pgm, read_raster, write_raster};
pub use config::{Backend, SegmentConfig};
pub use error::{CommError, ConfigError, GpuError, PartitionError, RasterError, SegmentError, SegmentResult};
pub use types::{Label, Raster, Threshold};
