//! Actions and their state machine.

use serde::Serialize;

use platsim_core::Id;
use platsim_maxmin::VariableId;

/// Sentinel for actions without a wall-clock duration cap.
pub const NO_MAX_DURATION: f64 = -1.;

/// Identifier of an action inside its model.
pub type ActionId = u64;

/// State of an action.
///
/// Transitions are driven by the owning model (solve results, resource failures)
/// or by explicit cancellation. Terminal states are `Finished`, `Failed` and `Canceled`;
/// once reached, the action is immutable and awaits extraction by the activity layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ActionState {
    /// Created, not yet consuming the resource.
    Inited,
    /// Running, its variable participates in solving.
    Started,
    /// Completed successfully, remaining work is zero or the duration cap elapsed.
    Finished,
    /// The resource it was using failed.
    Failed,
    /// Cancelled by the user.
    Canceled,
    /// Not surfaced to the activity layer (internal bookkeeping actions).
    Ignored,
}

impl ActionState {
    /// Returns whether the state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionState::Finished | ActionState::Failed | ActionState::Canceled)
    }
}

/// One in-flight claim on a resource: an execution slice, a data transfer or an I/O operation.
///
/// An action owns exactly one solver variable while it is running and tracks the remaining
/// amount of work, which is non-increasing and reaches zero by the end of the round where
/// the action finishes.
#[derive(Debug)]
pub struct Action {
    id: ActionId,
    state: ActionState,
    cost: f64,
    remains: f64,
    max_duration: f64,
    sharing_penalty: f64,
    start_time: f64,
    finish_time: f64,
    variable: Option<VariableId>,
    requester: Id,
    activity_id: u64,
    suspended: bool,
    // lazy update bookkeeping
    last_update: f64,
    last_value: f64,
}

impl Action {
    pub(crate) fn new(id: ActionId, cost: f64, requester: Id, activity_id: u64, now: f64) -> Self {
        Self {
            id,
            state: ActionState::Inited,
            cost,
            remains: cost,
            max_duration: NO_MAX_DURATION,
            sharing_penalty: 1.,
            start_time: now,
            finish_time: -1.,
            variable: None,
            requester,
            activity_id,
            suspended: false,
            last_update: now,
            last_value: 0.,
        }
    }

    /// Returns the action identifier.
    pub fn id(&self) -> ActionId {
        self.id
    }

    /// Returns the current state.
    pub fn state(&self) -> ActionState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ActionState) {
        self.state = state;
    }

    /// Returns the total amount of work.
    pub fn cost(&self) -> f64 {
        self.cost
    }

    /// Returns the remaining amount of work.
    pub fn remains(&self) -> f64 {
        self.remains
    }

    /// Subtracts the performed work from the remaining amount, clamping at zero.
    pub fn update_remains(&mut self, delta_work: f64) {
        self.remains = (self.remains - delta_work).max(0.);
    }

    /// Brings the remaining work up to date using the rate observed at the last update.
    ///
    /// Used by lazily updated models, where remains are recomputed only when the action
    /// value changes instead of on every simulation round.
    pub fn update_remains_lazy(&mut self, now: f64) {
        let delta = now - self.last_update;
        if self.remains > 0. && delta > 0. {
            self.update_remains(self.last_value * delta);
        }
        if self.max_duration != NO_MAX_DURATION && delta > 0. {
            self.update_max_duration(delta);
        }
        self.last_update = now;
    }

    /// Returns the wall-clock duration cap, [`NO_MAX_DURATION`] if none.
    pub fn max_duration(&self) -> f64 {
        self.max_duration
    }

    /// Sets the wall-clock duration cap.
    pub fn set_max_duration(&mut self, duration: f64) {
        self.max_duration = duration;
    }

    /// Subtracts the elapsed time from the duration cap.
    pub fn update_max_duration(&mut self, delta: f64) {
        if self.max_duration != NO_MAX_DURATION {
            self.max_duration = (self.max_duration - delta).max(0.);
        }
    }

    /// Returns the sharing penalty (inverse priority weight) of the action.
    pub fn sharing_penalty(&self) -> f64 {
        self.sharing_penalty
    }

    /// Sets the sharing penalty. The new value takes effect when the owning model
    /// pushes it into the solver.
    pub fn set_sharing_penalty(&mut self, penalty: f64) {
        self.sharing_penalty = penalty;
    }

    /// Returns the time when the action was started.
    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    /// Returns the time when the action reached a terminal state, -1 while running.
    pub fn finish_time(&self) -> f64 {
        self.finish_time
    }

    pub(crate) fn set_finish_time(&mut self, time: f64) {
        self.finish_time = time;
    }

    /// Returns the solver variable owned by this action, if it is still registered.
    pub fn variable(&self) -> Option<VariableId> {
        self.variable
    }

    pub(crate) fn set_variable(&mut self, variable: Option<VariableId>) {
        self.variable = variable;
    }

    /// Returns the component to notify about the action completion.
    pub fn requester(&self) -> Id {
        self.requester
    }

    /// Returns the activity-level identifier assigned by the requesting component.
    pub fn activity_id(&self) -> u64 {
        self.activity_id
    }

    /// Returns whether the action is suspended.
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub(crate) fn set_suspended(&mut self, suspended: bool) {
        self.suspended = suspended;
    }

    /// Returns the time of the last lazy remains update.
    pub fn last_update(&self) -> f64 {
        self.last_update
    }

    /// Returns the action value observed at the last lazy remains update.
    pub fn last_value(&self) -> f64 {
        self.last_value
    }

    pub(crate) fn set_last_value(&mut self, value: f64) {
        self.last_value = value;
    }
}
