#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

pub mod events;
mod model;
mod network;


pub use model::{LinkId, NetworkModel, NodeId};
pub use network::Network;
