//! Events produced by the disk model.

use serde::Serialize;

/// Corresponds to completion of disk read request. Source: disk model, destination: requester.
#[derive(Clone, Serialize)]
pub struct DataReadCompleted {
    /// Request id returned by [`Disk::read()`](crate::Disk::read).
    pub request_id: u64,
    /// Size of data read from disk.
    pub size: u64,
}

/// Corresponds to failure of disk read request. Source: disk model, destination: requester.
#[derive(Clone, Serialize)]
pub struct DataReadFailed {
    /// Request id returned by [`Disk::read()`](crate::Disk::read).
    pub request_id: u64,
    /// Reason of failure.
    pub error: String,
}

/// Corresponds to completion of disk write request. Source: disk model, destination: requester.
#[derive(Clone, Serialize)]
pub struct DataWriteCompleted {
    /// Request id returned by [`Disk::write()`](crate::Disk::write).
    pub request_id: u64,
    /// Size of data written to disk.
    pub size: u64,
}

/// Corresponds to failure of disk write request. Source: disk model, destination: requester.
#[derive(Clone, Serialize)]
pub struct DataWriteFailed {
    /// Request id returned by [`Disk::write()`](crate::Disk::write).
    pub request_id: u64,
    /// Reason of failure.
    pub error: String,
}
