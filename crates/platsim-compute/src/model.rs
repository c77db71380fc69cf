//! CPU resource model.

use rustc_hash::FxHashMap;

use platsim_core::{log_debug, Id, SimulationContext};
use platsim_kernel::{ActionId, ActionState, Model, ModelCore, UpdateStrategy};
use platsim_maxmin::{ConstraintId, UNBOUNDED};

use crate::events::{CompFailed, CompFinished, CompStarted, FailReason};

/// Identifier of a host inside a [`CpuModel`].
pub type HostId = usize;

struct Host {
    name: String,
    speed: f64,
    cores: u32,
    scale: f64,
    is_on: bool,
    constraint: Option<ConstraintId>,
}

impl Host {
    fn capacity(&self) -> f64 {
        self.speed * self.scale * self.cores as f64
    }

    fn is_sealed(&self) -> bool {
        self.constraint.is_some()
    }
}

/// Model of computing hosts whose capacity is shared max-min fairly among executions.
///
/// A host exposes one constraint with bound `speed * scale * cores`. An execution
/// claims up to `requested_cores` cores: its variable is bounded by
/// `requested_cores * speed * scale` and its sharing penalty is `1 / requested_cores`,
/// so wider executions get proportionally larger shares under contention.
pub struct CpuModel {
    core: ModelCore,
    hosts: Vec<Host>,
    exec_cores: FxHashMap<ActionId, u32>,
    requests: FxHashMap<u64, ActionId>,
    next_request_id: u64,
    ctx: SimulationContext,
}

impl CpuModel {
    /// Creates the model. The model name for the engine is the context name.
    pub fn new(strategy: UpdateStrategy, ctx: SimulationContext) -> Self {
        Self {
            core: ModelCore::new(strategy),
            hosts: Vec::new(),
            exec_cores: FxHashMap::default(),
            requests: FxHashMap::default(),
            next_request_id: 0,
            ctx,
        }
    }

    /// Creates a host. Speed and core count must be positive.
    pub fn create_host(&mut self, name: &str, speed: f64, cores: u32) -> HostId {
        assert!(speed > 0., "Host {} has invalid speed {}", name, speed);
        assert!(cores > 0, "Host {} must have at least one core", name);
        self.hosts.push(Host {
            name: name.to_owned(),
            speed,
            cores,
            scale: 1.,
            is_on: true,
            constraint: None,
        });
        self.hosts.len() - 1
    }

    /// Seals the host, locking its configuration and registering its constraint
    /// with the solver. Sealing twice is a configuration error.
    pub fn seal_host(&mut self, host: HostId) {
        assert!(
            !self.hosts[host].is_sealed(),
            "Host {} is already sealed",
            self.hosts[host].name
        );
        let bound = self.hosts[host].capacity();
        let cnst = self.core.system_mut().constraint_new(bound);
        self.hosts[host].constraint = Some(cnst);
    }

    /// Returns the per-core speed of the host.
    pub fn host_speed(&self, host: HostId) -> f64 {
        self.hosts[host].speed
    }

    /// Returns the core count of the host.
    pub fn host_cores(&self, host: HostId) -> u32 {
        self.hosts[host].cores
    }

    /// Returns whether the host is turned on.
    pub fn is_host_on(&self, host: HostId) -> bool {
        self.hosts[host].is_on
    }

    /// Returns whether the host currently serves some execution.
    pub fn is_host_used(&self, host: HostId) -> bool {
        let cnst = self.sealed_constraint(host);
        self.core.system().constraint_used(cnst)
    }

    fn sealed_constraint(&self, host: HostId) -> ConstraintId {
        self.hosts[host]
            .constraint
            .unwrap_or_else(|| panic!("Host {} is not sealed", self.hosts[host].name))
    }

    /// Changes the availability scale of the host (external load, DVFS and similar).
    ///
    /// The host constraint and the rate caps of all running executions are re-bounded,
    /// so in-flight executions continue from their current progress at the new rate.
    pub fn set_speed_scale(&mut self, host: HostId, scale: f64) {
        assert!(scale > 0., "Speed scale must be positive, got {}", scale);
        let cnst = self.sealed_constraint(host);
        self.hosts[host].scale = scale;
        let capacity = self.hosts[host].capacity();
        self.core.system_mut().update_constraint_bound(cnst, capacity);
        let per_core = self.hosts[host].speed * scale;
        for var in self.core.system().constraint_variables(cnst) {
            let Some(action) = self.core.action_of_variable(var) else {
                continue;
            };
            if let Some(&cores) = self.exec_cores.get(&action) {
                self.core
                    .system_mut()
                    .update_variable_bound(var, cores as f64 * per_core);
            }
        }
        log_debug!(self.ctx, "Host {} speed scale set to {}", self.hosts[host].name, scale);
    }

    fn untrack(&mut self, action: ActionId) {
        self.exec_cores.remove(&action);
        let request_id = self.core.action(action).activity_id();
        self.requests.remove(&request_id);
    }

    /// Turns the host off, failing every in-flight execution on it.
    pub fn turn_off(&mut self, host: HostId) {
        if !self.hosts[host].is_on {
            return;
        }
        self.hosts[host].is_on = false;
        let cnst = self.sealed_constraint(host);
        let failed = self.core.fail_actions_on_constraint(cnst, self.ctx.time());
        for &action in &failed {
            self.untrack(action);
        }
        log_debug!(
            self.ctx,
            "Host {} turned off, {} executions failed",
            self.hosts[host].name,
            failed.len()
        );
    }

    /// Turns the host back on.
    pub fn turn_on(&mut self, host: HostId) {
        self.hosts[host].is_on = true;
    }

    fn make_unique_request_id(&mut self) -> u64 {
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        request_id
    }

    /// Starts an execution of `flops` flops using up to `requested_cores` cores
    /// and returns the request id carried by the completion events.
    ///
    /// The requester receives [`CompStarted`] now and [`CompFinished`] or [`CompFailed`]
    /// upon completion.
    pub fn exec_start(&mut self, host: HostId, flops: f64, requested_cores: u32, requester: Id) -> u64 {
        let cnst = self.sealed_constraint(host);
        assert!(
            requested_cores >= 1 && requested_cores <= self.hosts[host].cores,
            "Invalid core count {} for host {} with {} cores",
            requested_cores,
            self.hosts[host].name,
            self.hosts[host].cores
        );
        let now = self.ctx.time();
        let request_id = self.make_unique_request_id();
        let penalty = 1. / requested_cores as f64;
        let bound = requested_cores as f64 * self.hosts[host].speed * self.hosts[host].scale;
        let action = self
            .core
            .start_action(flops, requester, request_id, penalty, bound, 1, now);
        let var = self.core.action(action).variable().unwrap();
        self.core.system_mut().expand(cnst, var, 1.);
        self.exec_cores.insert(action, requested_cores);
        self.requests.insert(request_id, action);
        if self.hosts[host].is_on {
            self.ctx.emit_now(CompStarted { id: request_id }, requester);
        } else {
            self.core.finish_action(action, now, ActionState::Failed);
            self.untrack(action);
        }
        request_id
    }

    /// Starts a sleep on the host for the given duration, returns the request id.
    ///
    /// Sleeps consume no capacity; an unbounded sleep is not surfaced to the activity
    /// layer until cancelled.
    pub fn sleep(&mut self, host: HostId, duration: f64, requester: Id) -> u64 {
        let cnst = self.sealed_constraint(host);
        let now = self.ctx.time();
        let request_id = self.make_unique_request_id();
        let action = self.core.start_action(1., requester, request_id, 0., UNBOUNDED, 1, now);
        let var = self.core.action(action).variable().unwrap();
        self.core.system_mut().expand(cnst, var, 1.);
        self.requests.insert(request_id, action);
        if duration < 0. {
            self.core.pool_mut().set_state(action, ActionState::Ignored, now);
        } else {
            self.core.action_mut(action).set_max_duration(duration);
            if self.core.is_lazy() {
                self.core.heap_update(action, now);
            }
        }
        request_id
    }

    /// Suspends an execution: it stops consuming the host capacity until resumed,
    /// and the freed share goes to the other executions.
    pub fn preempt(&mut self, request_id: u64) {
        if let Some(&action) = self.requests.get(&request_id) {
            self.core.suspend_action(action, self.ctx.time());
        }
    }

    /// Resumes a previously suspended execution.
    pub fn resume(&mut self, request_id: u64) {
        if let Some(&action) = self.requests.get(&request_id) {
            self.core.resume_action(action, self.ctx.time());
        }
    }

    /// Cancels an execution or a sleep by its request id.
    pub fn cancel(&mut self, request_id: u64) {
        if let Some(action) = self.requests.remove(&request_id) {
            self.exec_cores.remove(&action);
            self.core.cancel_action(action, self.ctx.time());
        }
    }

    /// Access to the shared model core, mainly for tests and tooling.
    pub fn core(&self) -> &ModelCore {
        &self.core
    }
}

impl Model for CpuModel {
    fn name(&self) -> &str {
        self.ctx.name()
    }

    fn next_occurring_event(&mut self, now: f64) -> f64 {
        self.core.next_occurring_event(now)
    }

    fn update_actions_state(&mut self, now: f64, delta: f64) {
        match self.core.strategy() {
            UpdateStrategy::Lazy => {
                for (action, _) in self.core.pop_due_actions(now) {
                    self.core.finish_action(action, now, ActionState::Finished);
                    self.untrack(action);
                }
            }
            UpdateStrategy::Full => {
                for action in self.core.update_started_full(delta) {
                    self.core.finish_action(action, now, ActionState::Finished);
                    self.untrack(action);
                }
            }
        }
    }

    fn complete_actions(&mut self) {
        while let Some(action) = self.core.pool_mut().extract_done_action() {
            self.ctx.emit_now(
                CompFinished {
                    id: action.activity_id(),
                },
                action.requester(),
            );
        }
        while let Some(action) = self.core.pool_mut().extract_failed_action() {
            self.ctx.emit_now(
                CompFailed {
                    id: action.activity_id(),
                    reason: FailReason::ResourceDown,
                },
                action.requester(),
            );
        }
    }
}
