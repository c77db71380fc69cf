#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

pub use platsim_compute as compute;
pub use platsim_core as core;
pub use platsim_kernel as kernel;
pub use platsim_maxmin as maxmin;
pub use platsim_network as network;
pub use platsim_storage as storage;
