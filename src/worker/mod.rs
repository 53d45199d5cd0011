//! Background workers.

pub mod pool;

pub use pool::{TaskPool, TaskReport};
