//! Core value types shared by every backend.
//!
//! - [`Raster`]: the immutable grayscale input (and the projected output)
//! - [`Label`]: a region identifier, one per cell
//! - [`Threshold`]: the intensity-difference bound that admits a unification

use crate::core::error::{ConfigError, RasterError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Region identifier held by every cell of a label array.
///
/// Labels start as global flat pixel indices (`row * width + col`), so they
/// are unique across all workers without any handshake.
pub type Label = u32;

/// Intensity-difference threshold `T`.
///
/// Two adjacent cells may be unified when `|p(a) - p(b)| < T`. The comparison
/// is strict, so `T = 1` only merges cells of identical intensity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Threshold(u8);

impl Threshold {
    /// Create a threshold, rejecting zero (which would never admit anything).
    pub fn new(value: u8) -> Result<Self, ConfigError> {
        if value == 0 {
            return Err(ConfigError::InvalidThreshold(value));
        }
        Ok(Self(value))
    }

    /// Raw threshold value.
    pub fn value(self) -> u8 {
        self.0
    }

    /// Whether two intensities are close enough to belong to one region.
    #[inline]
    pub fn admits(self, a: u8, b: u8) -> bool {
        a.abs_diff(b) < self.0
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Self(10)
    }
}

impl TryFrom<u8> for Threshold {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Threshold> for u8 {
    fn from(threshold: Threshold) -> Self {
        threshold.0
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An 8-bit grayscale raster stored row-major.
///
/// Read-only once loaded: every worker consumes it (or its own band of it)
/// without mutating it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl Raster {
    /// Create a raster from its dimensions and row-major pixel buffer.
    pub fn new(width: usize, height: usize, pixels: Vec<u8>) -> Result<Self, RasterError> {
        let expected = width * height;
        if pixels.len() != expected {
            return Err(RasterError::SizeMismatch {
                width,
                height,
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Create a raster filled with a single intensity.
    pub fn filled(width: usize, height: usize, value: u8) -> Self {
        Self {
            width,
            height,
            pixels: vec![value; width * height],
        }
    }

    /// Create a raster by evaluating `f(col, row)` for every pixel.
    pub fn from_fn<F>(width: usize, height: usize, mut f: F) -> Self
    where
        F: FnMut(usize, usize) -> u8,
    {
        let mut pixels = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                pixels.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// `(width, height)`.
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Total number of pixels.
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    /// Whether the raster has no pixels.
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Row-major pixel buffer.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Consume the raster, returning its pixel buffer.
    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    /// Pixel at `(col, row)`.
    pub fn get(&self, x: usize, y: usize) -> Option<u8> {
        if x < self.width && y < self.height {
            Some(self.pixels[y * self.width + x])
        } else {
            None
        }
    }

    /// One row of pixels.
    pub fn row(&self, y: usize) -> &[u8] {
        &self.pixels[y * self.width..(y + 1) * self.width]
    }

    /// Check that every flat index fits in a [`Label`].
    pub fn ensure_labelable(&self) -> Result<(), RasterError> {
        if self.pixels.len() > Label::MAX as usize {
            return Err(RasterError::TooLarge {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}
