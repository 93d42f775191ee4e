//! Domain-decomposed engine.
//!
//! The raster is split into row bands, one per worker. Workers only talk
//! through a [`Communicator`]; each runs merge rounds on its band, swaps
//! boundary rows with its neighbours and votes on convergence, until the
//! [`ConvergenceController`] stops the loop and rank 0 gathers the result.

pub mod comm;
pub mod convergence;
pub mod halo;
pub mod partition;
pub mod worker;

pub use comm::{ChannelCommunicator, Communicator, Message, ROOT};
pub use convergence::{ConvergenceController, ConvergencePolicy, RoundDecision, DEFAULT_ROUNDS};
pub use halo::{exchange_label_halos, exchange_pixel_halos};
pub use partition::{assemble, partition, LabelGrid, Partition, PartitionPlan, RemainderPolicy};
pub use worker::{run_worker, WorkerContext, WorkerReport};
