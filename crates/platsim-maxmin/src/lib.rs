#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

mod system;

#[cfg(test)]
mod tests;

pub use system::{ConstraintId, SharingPolicy, System, VariableId, DEFAULT_PRECISION, UNBOUNDED};
