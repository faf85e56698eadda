//! Load generation and the strategy comparison harness.

pub mod contention;
pub mod scenario;
