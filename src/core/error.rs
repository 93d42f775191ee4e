//! Error types for Segmerge.
//!
//! Uses thiserror for structured errors with context. Each concern has its
//! own enum so callers can match on the failure they care about, and all of
//! them fold into [`SegmentError`] through `#[from]` conversions.

use thiserror::Error;

/// Top-level error type for Segmerge.
///
/// This enum encompasses all error categories and enables automatic
/// conversion between specific error types.
#[derive(Error, Debug)]
pub enum SegmentError {
    /// Input raster problem.
    #[error("Raster error: {0}")]
    Raster(#[from] RasterError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Row-band split or reassembly failed.
    #[error("Partition error: {0}")]
    Partition(#[from] PartitionError),

    /// Inter-worker transport failed.
    #[error("Communication error: {0}")]
    Comm(#[from] CommError),

    /// GPU offload failed.
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),

    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image codec error.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// A worker thread panicked.
    #[error("Worker {rank} panicked")]
    WorkerPanicked {
        /// Rank of the worker.
        rank: usize,
    },

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

/// Errors raised while decoding, encoding or shaping a raster.
///
/// Decode failures are fatal for the process that hits them: the engine
/// never runs on a partially valid raster.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RasterError {
    /// The file is not a binary graymap.
    #[error("Unsupported file format: expected binary PGM (P5), found {found:?}")]
    BadMagic {
        /// Leading bytes of the file.
        found: String,
    },

    /// The image has more than one channel or more than 8 bits.
    #[error("Raster must be single-channel 8-bit, got {color}")]
    NotGrayscale {
        /// Color type that was decoded.
        color: String,
    },

    /// Pixel buffer length does not match the dimensions.
    #[error("Pixel buffer holds {actual} bytes, expected {expected} for {width}x{height}")]
    SizeMismatch {
        /// Raster width.
        width: usize,
        /// Raster height.
        height: usize,
        /// `width * height`.
        expected: usize,
        /// Bytes supplied.
        actual: usize,
    },

    /// Pixel indices would overflow a label.
    #[error("Raster {width}x{height} has too many pixels for 32-bit labels")]
    TooLarge {
        /// Raster width.
        width: usize,
        /// Raster height.
        height: usize,
    },
}

/// Errors from configuration loading and validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Threshold outside [1, 255].
    #[error("Threshold must be in [1, 255], got {0}")]
    InvalidThreshold(u8),

    /// Modulus outside [1, 256].
    #[error("Modulus must be in [1, 256], got {0}")]
    InvalidModulus(u32),

    /// A round budget of zero.
    #[error("Round budget must be at least 1")]
    NoRounds,

    /// A worker count of zero.
    #[error("Worker count must be at least 1")]
    NoWorkers,

    /// Several workers asked of a single-worker backend.
    #[error("The {backend} backend runs a single worker, {workers} requested")]
    WorkersUnsupported {
        /// Backend name.
        backend: String,
        /// Workers requested.
        workers: usize,
    },

    /// Malformed configuration text or value.
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Errors from splitting a raster into row bands or reassembling them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    /// Fewer rows than workers.
    #[error("Cannot split {height} rows across {workers} workers")]
    TooManyWorkers {
        /// Raster height.
        height: usize,
        /// Worker count.
        workers: usize,
    },

    /// Rows left over under [`RemainderPolicy::Reject`](crate::distributed::RemainderPolicy::Reject).
    #[error("Height {height} is not divisible by {workers} workers ({remainder} rows left over)")]
    Indivisible {
        /// Raster height.
        height: usize,
        /// Worker count.
        workers: usize,
        /// `height % workers`.
        remainder: usize,
    },

    /// A band has the wrong number of values.
    #[error("Band {index} holds {actual} values, expected {expected}")]
    BandSize {
        /// Worker index of the band.
        index: usize,
        /// Values the plan calls for.
        expected: usize,
        /// Values received.
        actual: usize,
    },

    /// A halo row is not one raster row wide.
    #[error("Halo row holds {actual} values, expected {expected}")]
    HaloSize {
        /// Raster width.
        expected: usize,
        /// Values received.
        actual: usize,
    },

    /// A halo was written on a side with no neighbour.
    #[error("Worker {index} has no {side} halo")]
    MissingHalo {
        /// Worker index.
        index: usize,
        /// `"top"` or `"bottom"`.
        side: &'static str,
    },
}

/// Errors from the inter-worker transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommError {
    /// Rank outside the world.
    #[error("Rank {rank} is out of range for a world of {size}")]
    BadRank {
        /// Requested rank.
        rank: usize,
        /// World size.
        size: usize,
    },

    /// The peer's channel closed.
    #[error("Peer {peer} disconnected")]
    Disconnected {
        /// Rank of the peer.
        peer: usize,
    },

    /// A message of the wrong kind arrived.
    #[error("Expected {expected} from rank {peer}, received {received}")]
    UnexpectedMessage {
        /// Sending rank.
        peer: usize,
        /// Kind that was expected.
        expected: &'static str,
        /// Kind that arrived.
        received: &'static str,
    },

    /// The root called a rooted collective without its data.
    #[error("Collective '{operation}' must be called with data on rank 0")]
    MissingRootData {
        /// Collective name.
        operation: &'static str,
    },
}

/// GPU-related errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    /// No usable adapter.
    #[error("GPU not available")]
    NotAvailable,

    /// The adapter refused a device.
    #[error("Failed to create device: {0}")]
    DeviceRequest(String),

    /// A buffer exceeds the binding limit.
    #[error("Buffer of {requested} bytes exceeds the device limit of {limit} bytes")]
    BufferTooLarge {
        /// Bytes requested.
        requested: u64,
        /// Device limit in bytes.
        limit: u64,
    },

    /// Mapping a buffer back to the host failed.
    #[error("Failed to map buffer for readback: {0}")]
    Readback(String),
}

/// Result type alias for Segmerge operations.
pub type SegmentResult<T> = Result<T, SegmentError>;

impl SegmentError {
    /// Whether this error came from the input raster rather than the run itself.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            SegmentError::Raster(_) | SegmentError::Image(_) | SegmentError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_conversions() {
        let err: SegmentError = ConfigError::NoWorkers.into();
        assert!(matches!(err, SegmentError::Config(ConfigError::NoWorkers)));

        let err: SegmentError = CommError::Disconnected { peer: 3 }.into();
        assert!(err.to_string().contains("Peer 3"));
    }

    #[test]
    fn test_input_error_classification() {
        let err: SegmentError = RasterError::BadMagic {
            found: "P6".to_string(),
        }
        .into();
        assert!(err.is_input_error());

        let err: SegmentError = PartitionError::TooManyWorkers {
            height: 2,
            workers: 4,
        }
        .into();
        assert!(!err.is_input_error());
    }
}
