//! Halo exchange.
//!
//! After every merge round each worker swaps boundary rows with its vertical
//! neighbours: its first owned row goes up and lands in the upper worker's
//! bottom halo, its last owned row goes down and lands in the lower worker's
//! top halo. Both directions travel in the same round, so neither side keeps
//! a stale copy of the other.
//!
//! Each swap is a paired send/receive. Sends never block, so a worker that
//! first talks to its upper neighbour and then to its lower one cannot close
//! a wait cycle.

use crate::core::error::SegmentResult;
use crate::distributed::comm::Communicator;
use crate::distributed::partition::{LabelGrid, Partition};

/// Fill a partition's pixel halos from its neighbours.
///
/// Pixels never change, so this runs once right after the scatter.
pub fn exchange_pixel_halos<C>(comm: &C, partition: &mut Partition) -> SegmentResult<()>
where
    C: Communicator + ?Sized,
{
    let rank = comm.rank();
    if rank > 0 {
        let row = comm.exchange_pixels(rank - 1, partition.first_row())?;
        partition.set_halo_top(row)?;
    }
    if rank + 1 < comm.size() {
        let row = comm.exchange_pixels(rank + 1, partition.last_row())?;
        partition.set_halo_bottom(row)?;
    }
    Ok(())
}

/// Refresh a label array's halo rows from its neighbours.
///
/// Halo rows are overwritten wholesale; owned rows are left untouched.
pub fn exchange_label_halos<C>(comm: &C, grid: &mut LabelGrid) -> SegmentResult<()>
where
    C: Communicator + ?Sized,
{
    let rank = comm.rank();
    if rank > 0 {
        let row = comm.exchange_labels(rank - 1, grid.first_owned_row())?;
        grid.replace_top_halo(&row)?;
    }
    if rank + 1 < comm.size() {
        let row = comm.exchange_labels(rank + 1, grid.last_owned_row())?;
        grid.replace_bottom_halo(&row)?;
    }
    log::trace!("rank {} refreshed its label halos", rank);
    Ok(())
}
