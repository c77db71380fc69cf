//! Abstract storage interface.

use platsim_core::Id;

/// Information about storage, including its capacity and current usage.
#[derive(Debug, PartialEq, Eq)]
pub struct StorageInfo {
    /// Storage capacity. Is equal to `used_space` + `free_space`.
    pub capacity: u64,
    /// Amount of used space. Cannot be greater than `capacity`.
    pub used_space: u64,
    /// Amount of free space. Cannot be greater than `capacity`.
    pub free_space: u64,
}

/// A trait for modeling an abstract storage resource, i.e. any device, system or
/// service for storing data.
///
/// The main operations are reading and writing data. Implementations model the delays
/// associated with these operations and report completion via events.
pub trait Storage {
    /// Submits data read request and returns unique request id.
    ///
    /// The component specified in `requester` receives `DataReadCompleted` upon the
    /// read completion, or `DataReadFailed` immediately if the request is invalid.
    fn read(&mut self, size: u64, requester: Id) -> u64;

    /// Submits data write request and returns unique request id.
    ///
    /// The requested space is reserved upfront. The component specified in `requester`
    /// receives `DataWriteCompleted` upon the write completion, or `DataWriteFailed`
    /// immediately if there is not enough free space.
    fn write(&mut self, size: u64, requester: Id) -> u64;

    /// Marks previously written space as free.
    fn mark_free(&mut self, size: u64) -> Result<(), String>;

    /// Returns the amount of used space.
    fn used_space(&self) -> u64;

    /// Returns the amount of free space.
    fn free_space(&self) -> u64;

    /// Returns the storage capacity.
    fn capacity(&self) -> u64;

    /// Returns the storage information.
    fn info(&self) -> StorageInfo;
}
