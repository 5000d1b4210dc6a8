//! Patchwork is the parallel layer of a block-structured adaptive mesh
//! refinement (AMR) code. A level of the mesh is a [`box_array::BoxArray`]:
//! an immutable list of rectangular boxes in index space. A
//! [`distribution::DistributionMapping`] assigns each box to a worker, by
//! round-robin, knapsack bin packing, or a space-filling curve. Work on the
//! boxes is then expressed as a graph of tasks that exchange messages instead
//! of sharing memory, and a scheduler ([`rts::Rts`]) runs each worker's
//! tasks as their inputs arrive, with no global barrier between steps.
//!
//! Numerical kernels are supplied by the caller; see [`mf_iter`] for the
//! stock halo-exchanging box task.

pub mod box_array;
pub mod config;
pub mod distribution;
pub mod error;
pub mod fab;
pub mod graph;
pub mod index_space;
pub mod layout_data;
pub mod message;
pub mod mf_iter;
pub mod rts;
pub mod task;
pub mod thread_pool;

pub use error::{Error, Result};
