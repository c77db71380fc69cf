//! Disk resource model.

use rustc_hash::FxHashMap;

use platsim_core::{log_debug, log_error, Id, SimulationContext};
use platsim_kernel::{ActionId, ActionState, Model, ModelCore, UpdateStrategy};
use platsim_maxmin::{ConstraintId, UNBOUNDED};
use serde::Serialize;

use crate::events::{DataReadCompleted, DataReadFailed, DataWriteCompleted, DataWriteFailed};

/// Identifier of a disk inside a [`DiskModel`].
pub type DiskId = usize;

/// Type of a disk operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum OpType {
    /// Read operation.
    Read,
    /// Write operation.
    Write,
}

struct DiskState {
    name: String,
    read_bw: f64,
    write_bw: f64,
    total_bw: Option<f64>,
    capacity: u64,
    used: u64,
    is_on: bool,
    constraint: Option<ConstraintId>,
    read_constraint: Option<ConstraintId>,
    write_constraint: Option<ConstraintId>,
}

impl DiskState {
    fn aggregate_bound(&self) -> f64 {
        // reads and writes are independent unless a tighter combined cap is configured
        self.total_bw.unwrap_or(self.read_bw + self.write_bw)
    }
}

struct IoInfo {
    op_type: OpType,
    disk: DiskId,
    size: u64,
}

/// Model of disks whose read and write channels are shared max-min fairly among
/// concurrent operations.
///
/// Every operation expands its variable with weight 1.0 on the aggregate throughput
/// constraint of the disk and on the read or write constraint matching its type.
/// Completion prediction for disks is not a pure rate function, so the model always
/// uses the full update strategy.
pub struct DiskModel {
    core: ModelCore,
    disks: Vec<DiskState>,
    io_info: FxHashMap<ActionId, IoInfo>,
    requests: FxHashMap<u64, ActionId>,
    next_request_id: u64,
    ctx: SimulationContext,
}

impl DiskModel {
    /// Creates the model. The model name for the engine is the context name.
    pub fn new(ctx: SimulationContext) -> Self {
        Self {
            core: ModelCore::new(UpdateStrategy::Full),
            disks: Vec::new(),
            io_info: FxHashMap::default(),
            requests: FxHashMap::default(),
            next_request_id: 0,
            ctx,
        }
    }

    /// Creates a disk. Bandwidths must be positive.
    pub fn create_disk(&mut self, name: &str, read_bw: f64, write_bw: f64, capacity: u64) -> DiskId {
        assert!(read_bw > 0., "Disk {} has invalid read bandwidth {}", name, read_bw);
        assert!(write_bw > 0., "Disk {} has invalid write bandwidth {}", name, write_bw);
        self.disks.push(DiskState {
            name: name.to_owned(),
            read_bw,
            write_bw,
            total_bw: None,
            capacity,
            used: 0,
            is_on: true,
            constraint: None,
            read_constraint: None,
            write_constraint: None,
        });
        self.disks.len() - 1
    }

    /// Caps the combined read plus write throughput of the disk.
    /// Must be called before sealing.
    pub fn set_total_bandwidth(&mut self, disk: DiskId, total_bw: f64) {
        assert!(
            self.disks[disk].constraint.is_none(),
            "Cannot change total bandwidth of sealed disk {}",
            self.disks[disk].name
        );
        assert!(total_bw > 0., "Disk {} has invalid total bandwidth {}", self.disks[disk].name, total_bw);
        self.disks[disk].total_bw = Some(total_bw);
    }

    /// Seals the disk, locking its configuration and registering its three
    /// constraints (aggregate, read, write) with the solver.
    pub fn seal_disk(&mut self, disk: DiskId) {
        assert!(
            self.disks[disk].constraint.is_none(),
            "Disk {} is already sealed",
            self.disks[disk].name
        );
        let aggregate = self.disks[disk].aggregate_bound();
        let read_bw = self.disks[disk].read_bw;
        let write_bw = self.disks[disk].write_bw;
        let system = self.core.system_mut();
        let cnst = system.constraint_new(aggregate);
        let read_cnst = system.constraint_new(read_bw);
        let write_cnst = system.constraint_new(write_bw);
        let state = &mut self.disks[disk];
        state.constraint = Some(cnst);
        state.read_constraint = Some(read_cnst);
        state.write_constraint = Some(write_cnst);
        log_debug!(
            self.ctx,
            "Created disk {} with read_bw {} write_bw {}",
            self.disks[disk].name,
            read_bw,
            write_bw
        );
    }

    fn sealed_constraint(&self, disk: DiskId) -> ConstraintId {
        self.disks[disk]
            .constraint
            .unwrap_or_else(|| panic!("Disk {} is not sealed", self.disks[disk].name))
    }

    /// Returns whether the disk currently serves some operation.
    pub fn is_disk_used(&self, disk: DiskId) -> bool {
        self.core.system().constraint_used(self.sealed_constraint(disk))
    }

    /// Returns whether the disk is turned on.
    pub fn is_disk_on(&self, disk: DiskId) -> bool {
        self.disks[disk].is_on
    }

    /// Returns the disk capacity.
    pub fn capacity(&self, disk: DiskId) -> u64 {
        self.disks[disk].capacity
    }

    /// Returns the amount of used disk space.
    pub fn used_space(&self, disk: DiskId) -> u64 {
        self.disks[disk].used
    }

    /// Returns the amount of free disk space.
    pub fn free_space(&self, disk: DiskId) -> u64 {
        self.disks[disk].capacity - self.disks[disk].used
    }

    /// Marks the space of this size as free.
    pub fn mark_free(&mut self, disk: DiskId, size: u64) -> Result<(), String> {
        if size <= self.disks[disk].used {
            self.disks[disk].used -= size;
            return Ok(());
        }
        Err(format!("invalid size: {}", size))
    }

    /// Pushes a sharing-penalty compensation into every operation attached to the
    /// constraint, so that in-flight operations keep a continuous effective rate
    /// when the bandwidth changes under them.
    fn update_penalties(&mut self, cnst: ConstraintId, delta: f64) {
        let mut ids: Vec<ActionId> = self
            .core
            .system()
            .constraint_variables(cnst)
            .into_iter()
            .filter_map(|var| self.core.action_of_variable(var))
            .collect();
        ids.sort_unstable();
        for id in ids {
            let action = self.core.action_mut(id);
            let penalty = action.sharing_penalty() + delta;
            action.set_sharing_penalty(penalty);
            let suspended = action.is_suspended();
            if let Some(var) = self.core.action(id).variable() {
                if !suspended {
                    self.core.system_mut().update_variable_penalty(var, penalty);
                }
            }
        }
    }

    /// Changes the read bandwidth of the disk.
    pub fn set_read_bandwidth(&mut self, disk: DiskId, value: f64) {
        assert!(value > 0., "Disk {} has invalid read bandwidth {}", self.disks[disk].name, value);
        let read_cnst = self.disks[disk].read_constraint.expect("Disk is not sealed");
        let delta = 1.0 / value - 1.0 / self.disks[disk].read_bw;
        self.disks[disk].read_bw = value;
        self.core.system_mut().update_constraint_bound(read_cnst, value);
        let aggregate = self.disks[disk].aggregate_bound();
        let cnst = self.sealed_constraint(disk);
        self.core.system_mut().update_constraint_bound(cnst, aggregate);
        self.update_penalties(read_cnst, delta);
    }

    /// Changes the write bandwidth of the disk.
    pub fn set_write_bandwidth(&mut self, disk: DiskId, value: f64) {
        assert!(value > 0., "Disk {} has invalid write bandwidth {}", self.disks[disk].name, value);
        let write_cnst = self.disks[disk].write_constraint.expect("Disk is not sealed");
        let delta = 1.0 / value - 1.0 / self.disks[disk].write_bw;
        self.disks[disk].write_bw = value;
        self.core.system_mut().update_constraint_bound(write_cnst, value);
        let aggregate = self.disks[disk].aggregate_bound();
        let cnst = self.sealed_constraint(disk);
        self.core.system_mut().update_constraint_bound(cnst, aggregate);
        self.update_penalties(write_cnst, delta);
    }

    /// Turns the disk off, failing every in-flight operation on it.
    pub fn turn_off(&mut self, disk: DiskId) {
        if !self.disks[disk].is_on {
            return;
        }
        self.disks[disk].is_on = false;
        let cnst = self.sealed_constraint(disk);
        // bookkeeping is released when the failed actions are drained
        let failed = self.core.fail_actions_on_constraint(cnst, self.ctx.time());
        log_debug!(
            self.ctx,
            "Disk {} turned off, {} operations failed",
            self.disks[disk].name,
            failed.len()
        );
    }

    /// Turns the disk back on.
    pub fn turn_on(&mut self, disk: DiskId) {
        self.disks[disk].is_on = true;
    }

    fn release_failed_write(&mut self, action: ActionId) {
        if let Some(info) = self.io_info.get(&action) {
            if info.op_type == OpType::Write {
                self.disks[info.disk].used -= info.size;
            }
        }
    }

    fn make_unique_request_id(&mut self) -> u64 {
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        request_id
    }

    /// Submits a read request. The requester receives [`DataReadCompleted`] upon
    /// completion or [`DataReadFailed`] immediately if the request is invalid.
    pub fn read(&mut self, disk: DiskId, size: u64, requester: Id) -> u64 {
        log_debug!(
            self.ctx,
            "Received read request, size: {}, requester: {}",
            size,
            requester
        );
        let request_id = self.make_unique_request_id();
        if size > self.disks[disk].capacity {
            let error = format!(
                "requested read size is {} but only {} is available",
                size, self.disks[disk].capacity
            );
            log_error!(self.ctx, "Failed reading: {}", error);
            self.ctx.emit_now(DataReadFailed { request_id, error }, requester);
        } else {
            self.io_start(disk, size, OpType::Read, requester, request_id);
        }
        request_id
    }

    /// Submits a write request, reserving the disk space upfront. The requester
    /// receives [`DataWriteCompleted`] upon completion or [`DataWriteFailed`]
    /// immediately if there is not enough space.
    pub fn write(&mut self, disk: DiskId, size: u64, requester: Id) -> u64 {
        log_debug!(
            self.ctx,
            "Received write request, size: {}, requester: {}",
            size,
            requester
        );
        let request_id = self.make_unique_request_id();
        let available = self.free_space(disk);
        if available < size {
            let error = format!("requested write size is {} but only {} is available", size, available);
            log_error!(self.ctx, "Failed writing: {}", error);
            self.ctx.emit_now(DataWriteFailed { request_id, error }, requester);
        } else {
            self.disks[disk].used += size;
            self.io_start(disk, size, OpType::Write, requester, request_id);
        }
        request_id
    }

    fn io_start(&mut self, disk: DiskId, size: u64, op_type: OpType, requester: Id, request_id: u64) {
        let now = self.ctx.time();
        let action = self
            .core
            .start_action(size as f64, requester, request_id, 1., UNBOUNDED, 3, now);
        let var = self.core.action(action).variable().unwrap();
        let cnst = self.sealed_constraint(disk);
        let op_cnst = match op_type {
            OpType::Read => self.disks[disk].read_constraint.unwrap(),
            OpType::Write => self.disks[disk].write_constraint.unwrap(),
        };
        self.core.system_mut().expand(cnst, var, 1.);
        self.core.system_mut().expand(op_cnst, var, 1.);
        self.io_info.insert(action, IoInfo { op_type, disk, size });
        self.requests.insert(request_id, action);
        if !self.disks[disk].is_on {
            self.core.finish_action(action, now, ActionState::Failed);
        }
    }

    /// Cancels an operation by its request id, releasing the space reserved by writes.
    pub fn cancel(&mut self, request_id: u64) {
        if let Some(action) = self.requests.remove(&request_id) {
            self.release_failed_write(action);
            self.io_info.remove(&action);
            self.core.cancel_action(action, self.ctx.time());
        }
    }

    /// Access to the shared model core, mainly for tests and tooling.
    pub fn core(&self) -> &ModelCore {
        &self.core
    }
}

impl Model for DiskModel {
    fn name(&self) -> &str {
        self.ctx.name()
    }

    fn next_occurring_event(&mut self, now: f64) -> f64 {
        self.core.next_occurring_event(now)
    }

    fn update_actions_state(&mut self, now: f64, delta: f64) {
        for action in self.core.update_started_full(delta) {
            self.core.finish_action(action, now, ActionState::Finished);
        }
    }

    fn complete_actions(&mut self) {
        while let Some(action) = self.core.pool_mut().extract_done_action() {
            let info = self.io_info.remove(&action.id()).expect("Unknown disk operation");
            self.requests.remove(&action.activity_id());
            match info.op_type {
                OpType::Read => self.ctx.emit_now(
                    DataReadCompleted {
                        request_id: action.activity_id(),
                        size: info.size,
                    },
                    action.requester(),
                ),
                OpType::Write => self.ctx.emit_now(
                    DataWriteCompleted {
                        request_id: action.activity_id(),
                        size: info.size,
                    },
                    action.requester(),
                ),
            };
        }
        while let Some(action) = self.core.pool_mut().extract_failed_action() {
            self.release_failed_write(action.id());
            let info = self.io_info.remove(&action.id()).expect("Unknown disk operation");
            self.requests.remove(&action.activity_id());
            let error = "disk is turned off".to_owned();
            match info.op_type {
                OpType::Read => self.ctx.emit_now(
                    DataReadFailed {
                        request_id: action.activity_id(),
                        error,
                    },
                    action.requester(),
                ),
                OpType::Write => self.ctx.emit_now(
                    DataWriteFailed {
                        request_id: action.activity_id(),
                        error,
                    },
                    action.requester(),
                ),
            };
        }
    }
}
