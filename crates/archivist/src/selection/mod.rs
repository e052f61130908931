//! Turns a job's object selection into a concrete, counted id stream.

pub mod error;
pub mod filter;
pub mod resolver;

pub use error::{IndexError, SelectionError};
pub use filter::{Filter, FilterParameter, Sublist};
pub use resolver::{ObjectIndex, ResolvedSelection, SelectionResolver};
