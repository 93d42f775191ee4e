//! Partitioner and assembler.
//!
//! A raster of `height` rows is split into `workers` contiguous row bands of
//! `height / workers` rows each. Rows left over by the floor division are
//! handled by the [`RemainderPolicy`]: dropped from the computation and the
//! output (the default), or rejected up front.
//!
//! Every worker's label array lives in one global coordinate space: each
//! cell, halo rows included, starts with its own global flat index
//! `row * width + col`. That is what lets regions spanning band edges merge
//! without any id negotiation between workers.

use crate::core::error::{PartitionError, SegmentResult};
use crate::core::types::{Label, Raster};
use serde::{Deserialize, Serialize};

/// What to do with rows left over by `height / workers`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RemainderPolicy {
    /// Exclude the trailing rows from computation and output.
    #[default]
    Drop,
    /// Fail when the height is not divisible by the worker count.
    Reject,
}

/// How a raster of known dimensions splits across workers.
///
/// Derived from the broadcast dimensions alone, so every worker computes the
/// identical plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionPlan {
    width: usize,
    height: usize,
    workers: usize,
    rows_per_worker: usize,
}

impl PartitionPlan {
    /// Plan the split of a `width x height` raster across `workers`.
    pub fn new(
        width: usize,
        height: usize,
        workers: usize,
        remainder: RemainderPolicy,
    ) -> Result<Self, PartitionError> {
        if workers == 0 || workers > height {
            return Err(PartitionError::TooManyWorkers { height, workers });
        }
        let rows_per_worker = height / workers;
        let leftover = height % workers;
        if leftover != 0 && remainder == RemainderPolicy::Reject {
            return Err(PartitionError::Indivisible {
                height,
                workers,
                remainder: leftover,
            });
        }
        Ok(Self {
            width,
            height,
            workers,
            rows_per_worker,
        })
    }

    /// Raster width.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Input raster height.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of workers.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Owned rows per worker.
    pub fn rows_per_worker(&self) -> usize {
        self.rows_per_worker
    }

    /// Number of input rows excluded from the computation.
    pub fn dropped_rows(&self) -> usize {
        self.height - self.output_height()
    }

    /// Height of the assembled output.
    pub fn output_height(&self) -> usize {
        self.rows_per_worker * self.workers
    }

    /// Number of pixels in one worker's owned band.
    pub fn band_len(&self) -> usize {
        self.rows_per_worker * self.width
    }

    /// First global row owned by worker `index`.
    pub fn row_offset(&self, index: usize) -> usize {
        index * self.rows_per_worker
    }

    /// Whether worker `index` has a neighbour above.
    pub fn has_top_halo(&self, index: usize) -> bool {
        index > 0
    }

    /// Whether worker `index` has a neighbour below.
    pub fn has_bottom_halo(&self, index: usize) -> bool {
        index + 1 < self.workers
    }
}

/// One worker's share of the raster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    /// Worker index.
    pub index: usize,
    /// First global row owned.
    pub row_offset: usize,
    /// Number of owned rows.
    pub row_count: usize,
    /// Row width.
    pub width: usize,
    /// Owned pixels, `row_count * width` bytes.
    pub pixels: Vec<u8>,
    /// Copy of the row above the band, if any.
    pub halo_top: Option<Vec<u8>>,
    /// Copy of the row below the band, if any.
    pub halo_bottom: Option<Vec<u8>>,
}

impl Partition {
    /// Wrap worker `index`'s owned pixels. Halos start empty.
    pub fn from_band(plan: &PartitionPlan, index: usize, pixels: Vec<u8>) -> Result<Self, PartitionError> {
        if pixels.len() != plan.band_len() {
            return Err(PartitionError::BandSize {
                index,
                expected: plan.band_len(),
                actual: pixels.len(),
            });
        }
        Ok(Self {
            index,
            row_offset: plan.row_offset(index),
            row_count: plan.rows_per_worker(),
            width: plan.width(),
            pixels,
            halo_top: None,
            halo_bottom: None,
        })
    }

    /// First owned pixel row.
    pub fn first_row(&self) -> &[u8] {
        &self.pixels[..self.width]
    }

    /// Last owned pixel row.
    pub fn last_row(&self) -> &[u8] {
        &self.pixels[self.pixels.len() - self.width..]
    }

    /// Store the pixel row of the neighbour above.
    pub fn set_halo_top(&mut self, row: Vec<u8>) -> Result<(), PartitionError> {
        check_row(self.width, row.len())?;
        self.halo_top = Some(row);
        Ok(())
    }

    /// Store the pixel row of the neighbour below.
    pub fn set_halo_bottom(&mut self, row: Vec<u8>) -> Result<(), PartitionError> {
        check_row(self.width, row.len())?;
        self.halo_bottom = Some(row);
        Ok(())
    }

    /// Number of rows the kernel sees, halos included.
    pub fn band_rows(&self) -> usize {
        self.row_count + self.halo_top.is_some() as usize + self.halo_bottom.is_some() as usize
    }

    /// Pixels of the full band: top halo, owned rows, bottom halo.
    pub fn band_pixels(&self) -> Vec<u8> {
        let mut band = Vec::with_capacity(self.band_rows() * self.width);
        if let Some(top) = &self.halo_top {
            band.extend_from_slice(top);
        }
        band.extend_from_slice(&self.pixels);
        if let Some(bottom) = &self.halo_bottom {
            band.extend_from_slice(bottom);
        }
        band
    }

    /// Fresh label array for this partition.
    pub fn initial_labels(&self) -> LabelGrid {
        LabelGrid::new(self)
    }
}

fn check_row(width: usize, actual: usize) -> Result<(), PartitionError> {
    if actual != width {
        return Err(PartitionError::HaloSize {
            expected: width,
            actual,
        });
    }
    Ok(())
}

/// A worker's label array, same extent as its band including halo rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelGrid {
    index: usize,
    width: usize,
    owned_rows: usize,
    has_top: bool,
    has_bottom: bool,
    labels: Vec<Label>,
}

impl LabelGrid {
    /// Label every cell with its global flat index.
    ///
    /// Halo rows get the indices of the neighbour's rows they mirror.
    pub fn new(partition: &Partition) -> Self {
        let has_top = partition.halo_top.is_some();
        let has_bottom = partition.halo_bottom.is_some();
        let first_row = partition.row_offset - has_top as usize;
        let start = (first_row * partition.width) as Label;
        let len = partition.band_rows() * partition.width;
        Self {
            index: partition.index,
            width: partition.width,
            owned_rows: partition.row_count,
            has_top,
            has_bottom,
            labels: (start..start + len as Label).collect(),
        }
    }

    /// Row width.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Every label, halo rows included.
    pub fn as_slice(&self) -> &[Label] {
        &self.labels
    }

    /// Every label, halo rows included, for the merge kernel.
    pub fn as_mut_slice(&mut self) -> &mut [Label] {
        &mut self.labels
    }

    fn owned_range(&self) -> std::ops::Range<usize> {
        let start = self.has_top as usize * self.width;
        start..start + self.owned_rows * self.width
    }

    /// Labels of the owned rows only.
    pub fn owned(&self) -> &[Label] {
        &self.labels[self.owned_range()]
    }

    /// First owned row.
    pub fn first_owned_row(&self) -> &[Label] {
        let start = self.owned_range().start;
        &self.labels[start..start + self.width]
    }

    /// Last owned row.
    pub fn last_owned_row(&self) -> &[Label] {
        let end = self.owned_range().end;
        &self.labels[end - self.width..end]
    }

    /// Top halo row, if any.
    pub fn top_halo(&self) -> Option<&[Label]> {
        self.has_top.then(|| &self.labels[..self.width])
    }

    /// Bottom halo row, if any.
    pub fn bottom_halo(&self) -> Option<&[Label]> {
        let start = self.owned_range().end;
        self.has_bottom.then(|| &self.labels[start..start + self.width])
    }

    /// Overwrite the top halo wholesale.
    pub fn replace_top_halo(&mut self, row: &[Label]) -> Result<(), PartitionError> {
        if !self.has_top {
            return Err(PartitionError::MissingHalo {
                index: self.index,
                side: "top",
            });
        }
        check_row(self.width, row.len())?;
        self.labels[..self.width].copy_from_slice(row);
        Ok(())
    }

    /// Overwrite the bottom halo wholesale.
    pub fn replace_bottom_halo(&mut self, row: &[Label]) -> Result<(), PartitionError> {
        if !self.has_bottom {
            return Err(PartitionError::MissingHalo {
                index: self.index,
                side: "bottom",
            });
        }
        check_row(self.width, row.len())?;
        let start = self.owned_range().end;
        self.labels[start..start + self.width].copy_from_slice(row);
        Ok(())
    }
}

/// Split a raster into partitions with their pixel halos filled in.
///
/// In-memory counterpart of the scatter and pixel halo exchange the
/// distributed workers perform.
pub fn partition(
    raster: &Raster,
    workers: usize,
    remainder: RemainderPolicy,
) -> Result<Vec<Partition>, PartitionError> {
    let plan = PartitionPlan::new(raster.width(), raster.height(), workers, remainder)?;
    let width = plan.width();

    (0..workers)
        .map(|index| {
            let start = plan.row_offset(index) * width;
            let owned = raster.pixels()[start..start + plan.band_len()].to_vec();
            let mut part = Partition::from_band(&plan, index, owned)?;
            if plan.has_top_halo(index) {
                part.set_halo_top(raster.row(plan.row_offset(index) - 1).to_vec())?;
            }
            if plan.has_bottom_halo(index) {
                part.set_halo_bottom(raster.row(plan.row_offset(index + 1)).to_vec())?;
            }
            Ok(part)
        })
        .collect()
}

/// Concatenate output bands in worker order into one raster.
pub fn assemble(width: usize, bands: &[Vec<u8>]) -> SegmentResult<Raster> {
    let rows = bands.first().map(|b| if width == 0 { 0 } else { b.len() / width }).unwrap_or(0);
    let expected = rows * width;
    let mut pixels = Vec::with_capacity(expected * bands.len());
    for (index, band) in bands.iter().enumerate() {
        if band.len() != expected {
            return Err(PartitionError::BandSize {
                index,
                expected,
                actual: band.len(),
            }
            .into());
        }
        pixels.extend_from_slice(band);
    }
    Ok(Raster::new(width, rows * bands.len(), pixels)?)
}
