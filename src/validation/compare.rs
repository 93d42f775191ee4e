//! Raster and labeling comparison.

use crate::core::types::{Label, Raster};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Result of comparing two rasters pixel by pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Comparison {
    /// Dimensions of the first raster.
    pub left: (usize, usize),
    /// Dimensions of the second raster.
    pub right: (usize, usize),
    /// Pixels that differ. Every pixel counts when the dimensions differ.
    pub differing_pixels: usize,
}

impl Comparison {
    /// Whether both rasters have the same shape.
    pub fn same_dimensions(&self) -> bool {
        self.left == self.right
    }

    /// Whether the rasters are byte-identical.
    pub fn passed(&self) -> bool {
        self.same_dimensions() && self.differing_pixels == 0
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.passed() {
            write!(f, "Validation Passed!")
        } else if !self.same_dimensions() {
            write!(
                f,
                "Validation Failed! Dimensions differ: {}x{} vs {}x{}",
                self.left.0, self.left.1, self.right.0, self.right.1
            )
        } else {
            write!(
                f,
                "Validation Failed! {} pixel(s) differ",
                self.differing_pixels
            )
        }
    }
}

/// Compare two rasters pixel by pixel.
pub fn compare_rasters(a: &Raster, b: &Raster) -> Comparison {
    let differing_pixels = if a.dimensions() == b.dimensions() {
        a.pixels()
            .iter()
            .zip(b.pixels())
            .filter(|(x, y)| x != y)
            .count()
    } else {
        a.len().max(b.len())
    };
    Comparison {
        left: a.dimensions(),
        right: b.dimensions(),
        differing_pixels,
    }
}

/// Whether two labelings induce the same partition of the cells.
///
/// True when a one-to-one relabeling maps `a` onto `b`.
pub fn same_partition(a: &[Label], b: &[Label]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut forward: HashMap<Label, Label> = HashMap::new();
    let mut backward: HashMap<Label, Label> = HashMap::new();
    a.iter().zip(b).all(|(&x, &y)| {
        *forward.entry(x).or_insert(y) == y && *backward.entry(y).or_insert(x) == x
    })
}

/// Number of distinct regions in a labeling.
pub fn region_count(labels: &[Label]) -> usize {
    labels.iter().collect::<HashSet<_>>().len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_rasters_pass() {
        let a = Raster::filled(3, 3, 5);
        let comparison = compare_rasters(&a, &a.clone());
        assert!(comparison.passed());
        assert_eq!(comparison.to_string(), "Validation Passed!");
    }

    #[test]
    fn test_counts_differing_pixels() {
        let a = Raster::filled(2, 2, 0);
        let b = Raster::new(2, 2, vec![0, 1, 0, 1]).unwrap();
        let comparison = compare_rasters(&a, &b);
        assert!(!comparison.passed());
        assert_eq!(comparison.differing_pixels, 2);
    }

    #[test]
    fn test_dimension_mismatch_fails() {
        let comparison = compare_rasters(&Raster::filled(2, 2, 0), &Raster::filled(2, 3, 0));
        assert!(!comparison.same_dimensions());
        assert!(comparison.to_string().contains("Dimensions differ"));
    }

    #[test]
    fn test_same_partition_ignores_ids() {
        assert!(same_partition(&[0, 0, 2, 2], &[7, 7, 1, 1]));
        assert!(!same_partition(&[0, 0, 2, 2], &[7, 7, 7, 1]));
        // Merging two regions into one is not a relabeling.
        assert!(!same_partition(&[0, 1], &[3, 3]));
        assert!(!same_partition(&[3, 3], &[0, 1]));
        assert!(!same_partition(&[0], &[0, 0]));
    }

    #[test]
    fn test_region_count() {
        assert_eq!(region_count(&[]), 0);
        assert_eq!(region_count(&[4, 4, 9, 4, 1]), 3);
    }
}
