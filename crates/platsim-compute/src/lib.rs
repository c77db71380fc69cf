#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

mod compute;
pub mod events;
mod model;

#[cfg(test)]
mod tests;

pub use compute::Compute;
pub use model::{CpuModel, HostId};
