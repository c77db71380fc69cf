//! Events produced by the network model.

use serde::Serialize;

/// Data transfer is completed. Source: network model, destination: requester.
#[derive(Clone, Serialize)]
pub struct DataTransferCompleted {
    /// Id returned by [`Network::transfer()`](crate::Network::transfer).
    pub id: u64,
}

/// Data transfer is failed because some link on its route was turned off.
/// Source: network model, destination: requester.
#[derive(Clone, Serialize)]
pub struct DataTransferFailed {
    /// Id returned by [`Network::transfer()`](crate::Network::transfer).
    pub id: u64,
}
