#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

mod disk;
pub mod events;
mod model;
mod storage;


pub use disk::Disk;
pub use model::{DiskId, DiskModel, OpType};
pub use storage::{Storage, StorageInfo};
