#![doc = include_str!("../README.md")]

mod chunk;
mod error;
mod partition;
pub mod pool;
mod scheduler;
mod sequence;
pub mod store;

pub use crate::chunk::*;
pub use crate::error::*;
pub use crate::partition::*;
pub use crate::pool::{
    Assigner, ChunkAssignment, Completion, PoolConfig, TaskId, WorkQueue, WorkerPool,
};
pub use crate::scheduler::*;
pub use crate::sequence::*;
pub use crate::store::ResultStore;
