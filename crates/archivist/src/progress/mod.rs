pub mod aggregator;

pub use aggregator::{ProgressAggregator, ProgressCounters};
