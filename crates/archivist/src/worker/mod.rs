pub mod batch;
pub mod pool;

pub use batch::{guarded, process_batch, Batch};
pub use pool::{DispatchError, WorkerPool};
