//! Output projection.
//!
//! Maps labels into one displayable byte each by taking `label % modulus`.
//! The mapping is lossy: distinct regions may share a displayed value. Use
//! the canonical labels, never the projection, to identify regions.

use crate::core::config::MAX_MODULUS;
use crate::core::error::{ConfigError, SegmentResult};
use crate::core::types::{Label, Raster};

/// Project labels into bytes.
pub fn project(labels: &[Label], modulus: u32) -> Result<Vec<u8>, ConfigError> {
    if modulus == 0 || modulus > MAX_MODULUS {
        return Err(ConfigError::InvalidModulus(modulus));
    }
    Ok(labels.iter().map(|&label| (label % modulus) as u8).collect())
}

/// Project a full label array into a raster.
pub fn project_raster(width: usize, height: usize, labels: &[Label], modulus: u32) -> SegmentResult<Raster> {
    let pixels = project(labels, modulus)?;
    Ok(Raster::new(width, height, pixels)?)
}
