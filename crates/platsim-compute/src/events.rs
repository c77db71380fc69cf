//! Events produced by the CPU model.

use serde::Serialize;

/// Reason for execution failure.
#[derive(Clone, Debug, Serialize)]
pub enum FailReason {
    /// The host running the execution was turned off.
    ResourceDown,
}

/// Execution is started successfully. Source: CPU model, destination: requester.
#[derive(Clone, Serialize)]
pub struct CompStarted {
    /// Id returned by [`Compute::run()`](crate::Compute::run).
    pub id: u64,
}

/// Execution is finished successfully. Source: CPU model, destination: requester.
#[derive(Clone, Serialize)]
pub struct CompFinished {
    /// Id returned by [`Compute::run()`](crate::Compute::run).
    pub id: u64,
}

/// Execution is failed. Source: CPU model, destination: requester.
#[derive(Clone, Serialize)]
pub struct CompFailed {
    /// Id returned by [`Compute::run()`](crate::Compute::run).
    pub id: u64,
    /// Reason for failure.
    pub reason: FailReason,
}
