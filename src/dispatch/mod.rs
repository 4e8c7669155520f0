//! Concurrent batch dispatch over registered image providers.

mod batch;
mod coordinator;
mod task;

pub use batch::{Batch, BatchSnapshot, BatchStatus};
pub use coordinator::{BatchRequest, DispatchCoordinator, DispatchCoordinatorBuilder, ResultSink};
pub use task::{GenerationTask, TaskId, TaskStatus};
