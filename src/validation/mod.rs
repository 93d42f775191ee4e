//! Output validation.
//!
//! Checks used to compare runs against each other: byte-level equality of
//! projected outputs, and equality of the partitions two label arrays induce
//! regardless of which id each region ended up with.

pub mod compare;

pub use compare::{compare_rasters, region_count, same_partition, Comparison};
