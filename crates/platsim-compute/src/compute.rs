//! User-facing surface of one computing host.

use std::cell::RefCell;
use std::rc::Rc;

use platsim_core::Id;

use crate::model::{CpuModel, HostId};

/// Represents one computing host backed by a [`CpuModel`].
///
/// Provides the request surface used by the activity layer: starting executions and
/// sleeps, cancelling them and querying the host parameters. Completion is reported
/// to the requester via [`CompFinished`](crate::events::CompFinished) and
/// [`CompFailed`](crate::events::CompFailed) events.
pub struct Compute {
    model: Rc<RefCell<CpuModel>>,
    host: HostId,
}

impl Compute {
    /// Creates the compute surface for a sealed host.
    pub fn new(model: Rc<RefCell<CpuModel>>, host: HostId) -> Self {
        Self { model, host }
    }

    /// Starts an execution and returns the request id carried by the completion events.
    pub fn run(&mut self, flops: f64, requested_cores: u32, requester: Id) -> u64 {
        self.model
            .borrow_mut()
            .exec_start(self.host, flops, requested_cores, requester)
    }

    /// Starts a sleep and returns the request id.
    pub fn sleep(&mut self, duration: f64, requester: Id) -> u64 {
        self.model.borrow_mut().sleep(self.host, duration, requester)
    }

    /// Cancels a previously started request.
    pub fn cancel(&mut self, request_id: u64) {
        self.model.borrow_mut().cancel(request_id);
    }

    /// Returns the per-core speed of the host.
    pub fn speed(&self) -> f64 {
        self.model.borrow().host_speed(self.host)
    }

    /// Returns the core count of the host.
    pub fn cores(&self) -> u32 {
        self.model.borrow().host_cores(self.host)
    }
}
