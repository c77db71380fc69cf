//! Resource model interface and shared update machinery.

use rustc_hash::FxHashMap;

use platsim_core::{Id, EPSILON};
use platsim_maxmin::{ConstraintId, System, VariableId};

use crate::action::{Action, ActionId, ActionState, NO_MAX_DURATION};
use crate::heap::{ActionHeap, HeapEntryKind};
use crate::pool::ActionPool;

/// How a model keeps the state of its actions up to date.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateStrategy {
    /// Only the actions whose value changed at the last solve are recomputed, the
    /// predicted completion times are kept in the action heap. O(log n) per state
    /// change instead of O(n) per round.
    Lazy,
    /// The remaining work of every started action is recomputed on each round.
    /// Used where predicting completions analytically is unsound.
    Full,
}

/// A model instantiates resources and actions of one resource kind and surfaces
/// the resource-driven events to the engine.
pub trait Model {
    /// Returns the model name.
    fn name(&self) -> &str;

    /// Shares the resources between the actions and returns the delta till the next
    /// action finishes or changes state, -1 if none.
    fn next_occurring_event(&mut self, now: f64) -> f64;

    /// Updates the actions to the current time, finishing those whose remaining work
    /// hit zero or whose duration cap elapsed.
    fn update_actions_state(&mut self, now: f64, delta: f64);

    /// Drains terminal actions and notifies the owning activities.
    fn complete_actions(&mut self);
}

/// The state shared by all model implementations: the solver system, the action pool,
/// the action heap and the variable-to-action index.
pub struct ModelCore {
    system: System,
    pool: ActionPool,
    heap: ActionHeap,
    strategy: UpdateStrategy,
    var_to_action: FxHashMap<VariableId, ActionId>,
}

impl ModelCore {
    /// Creates the model core.
    ///
    /// Lazy update requires selective update in the solver, so the system is created
    /// with selective update enabled; full update also benefits from it.
    pub fn new(strategy: UpdateStrategy) -> Self {
        Self {
            system: System::new(true),
            pool: ActionPool::new(),
            heap: ActionHeap::new(),
            strategy,
            var_to_action: FxHashMap::default(),
        }
    }

    /// Returns the update strategy.
    pub fn strategy(&self) -> UpdateStrategy {
        self.strategy
    }

    /// Returns whether the model is lazily updated.
    pub fn is_lazy(&self) -> bool {
        self.strategy == UpdateStrategy::Lazy
    }

    /// Returns the solver system.
    pub fn system(&self) -> &System {
        &self.system
    }

    /// Returns the solver system for mutation.
    pub fn system_mut(&mut self) -> &mut System {
        &mut self.system
    }

    /// Returns the action pool.
    pub fn pool(&self) -> &ActionPool {
        &self.pool
    }

    /// Returns the action pool for mutation.
    pub fn pool_mut(&mut self) -> &mut ActionPool {
        &mut self.pool
    }

    /// Returns the action heap.
    pub fn heap(&self) -> &ActionHeap {
        &self.heap
    }

    /// Returns the action heap for mutation.
    pub fn heap_mut(&mut self) -> &mut ActionHeap {
        &mut self.heap
    }

    /// Returns a reference to the action.
    pub fn action(&self, id: ActionId) -> &Action {
        self.pool.get(id)
    }

    /// Returns a mutable reference to the action.
    pub fn action_mut(&mut self, id: ActionId) -> &mut Action {
        self.pool.get_mut(id)
    }

    /// Returns the action owning the given variable, if any.
    pub fn action_of_variable(&self, var: VariableId) -> Option<ActionId> {
        self.var_to_action.get(&var).copied()
    }

    /// Creates and starts an action with a fresh solver variable.
    ///
    /// The variable is created with the given penalty and bound and is not attached to
    /// any constraint yet; the caller must expand it on the relevant constraints before
    /// the next solve.
    pub fn start_action(
        &mut self,
        cost: f64,
        requester: Id,
        activity_id: u64,
        penalty: f64,
        bound: f64,
        constraint_count: usize,
        now: f64,
    ) -> ActionId {
        let id = self.pool.add(cost, requester, activity_id, now);
        let var = self.system.variable_new(penalty, bound, constraint_count);
        let action = self.pool.get_mut(id);
        action.set_variable(Some(var));
        if penalty > 0. {
            action.set_sharing_penalty(penalty);
        }
        self.var_to_action.insert(var, id);
        self.pool.set_state(id, ActionState::Started, now);
        id
    }

    /// Transitions the action to a terminal state, withdrawing its variable from the
    /// solver so that the freed capacity is redistributed at the next solve.
    pub fn finish_action(&mut self, id: ActionId, now: f64, state: ActionState) {
        assert!(state.is_terminal(), "finish_action called with non-terminal state");
        self.heap.remove(id);
        if let Some(var) = self.pool.get(id).variable() {
            self.system.remove_variable(var);
            self.var_to_action.remove(&var);
            self.pool.get_mut(id).set_variable(None);
        }
        self.pool.set_state(id, state, now);
    }

    /// Cancels the action and removes it from the pool immediately, without waiting
    /// for the next round boundary. Returns the removed action.
    pub fn cancel_action(&mut self, id: ActionId, now: f64) -> Action {
        self.finish_action(id, now, ActionState::Canceled);
        self.pool.remove(id)
    }

    /// Suspends the action: its variable penalty drops to zero so the freed capacity
    /// goes to the others at the next solve.
    pub fn suspend_action(&mut self, id: ActionId, now: f64) {
        let action = self.pool.get_mut(id);
        action.set_suspended(true);
        action.update_remains_lazy(now);
        action.set_last_value(0.);
        if let Some(var) = self.pool.get(id).variable() {
            self.system.update_variable_penalty(var, 0.);
        }
        self.heap.remove(id);
    }

    /// Resumes a suspended action with its nominal sharing penalty.
    pub fn resume_action(&mut self, id: ActionId, now: f64) {
        let action = self.pool.get_mut(id);
        action.set_suspended(false);
        let penalty = action.sharing_penalty();
        action.update_remains_lazy(now);
        if let Some(var) = self.pool.get(id).variable() {
            self.system.update_variable_penalty(var, penalty);
        }
    }

    /// Fails every action whose variable is attached to the constraint.
    ///
    /// Used when a resource is turned off: this is deterministic (actions fail in
    /// creation order) and not retried.
    pub fn fail_actions_on_constraint(&mut self, cnst: ConstraintId, now: f64) -> Vec<ActionId> {
        let mut ids: Vec<ActionId> = self
            .system
            .constraint_variables(cnst)
            .into_iter()
            .filter_map(|var| self.var_to_action.get(&var).copied())
            .collect();
        ids.sort_unstable();
        for &id in &ids {
            if !self.pool.get(id).state().is_terminal() {
                self.finish_action(id, now, ActionState::Failed);
            }
        }
        ids
    }

    /// Dispatches to the lazy or full share computation according to the strategy.
    pub fn next_occurring_event(&mut self, now: f64) -> f64 {
        match self.strategy {
            UpdateStrategy::Lazy => self.next_occurring_event_lazy(now),
            UpdateStrategy::Full => self.next_occurring_event_full(now),
        }
    }

    /// Solves the system and re-keys the heap entries of the actions whose value
    /// changed. Returns the delta till the earliest predicted event, -1 if none.
    pub fn next_occurring_event_lazy(&mut self, now: f64) -> f64 {
        self.system.solve();
        for var in self.system.take_modified_variables() {
            let Some(&id) = self.var_to_action.get(&var) else {
                continue;
            };
            if self.pool.get(id).state() != ActionState::Started {
                continue;
            }
            let value = self.system.variable_value(var);
            let action = self.pool.get_mut(id);
            action.update_remains_lazy(now);
            action.set_last_value(value);
            self.heap_update(id, now);
        }
        self.heap.top_date().map_or(-1., |t| (t - now).max(0.))
    }

    /// Solves the system and returns the minimum delta over the started actions till
    /// some of them finishes its work or exhausts its duration cap, -1 if none.
    pub fn next_occurring_event_full(&mut self, now: f64) -> f64 {
        self.system.solve();
        self.system.take_modified_variables();
        let mut min_delta = -1.;
        let mut consider = |candidate: f64| {
            if min_delta < 0. || candidate < min_delta {
                min_delta = candidate.max(0.);
            }
        };
        for id in self.pool.started_ids() {
            let action = self.pool.get(id);
            let value = action
                .variable()
                .map_or(0., |var| self.system.variable_value(var));
            if action.remains() <= EPSILON && value > 0. {
                consider(0.);
            } else if value > 0. {
                consider(action.remains() / value);
            }
            if action.max_duration() != NO_MAX_DURATION {
                consider(action.max_duration());
            }
        }
        min_delta
    }

    /// Recomputes the heap entry of the action from its remaining work, current value
    /// and duration cap. The entry is removed and reinserted, never mutated in place.
    ///
    /// Pending latency entries are left untouched, they are managed by the owning model.
    pub fn heap_update(&mut self, id: ActionId, now: f64) {
        if self.heap.kind_of(id) == Some(HeapEntryKind::Latency) {
            return;
        }
        let action = self.pool.get(id);
        let value = action
            .variable()
            .map_or(0., |var| self.system.variable_value(var));
        let mut entry: Option<(f64, HeapEntryKind)> = None;
        if value > 0. {
            entry = Some((now + action.remains() / value, HeapEntryKind::Normal));
        }
        if action.max_duration() != NO_MAX_DURATION {
            let deadline = now + action.max_duration();
            if entry.map_or(true, |(t, _)| deadline < t) {
                entry = Some((deadline, HeapEntryKind::MaxDuration));
            }
        }
        match entry {
            Some((time, kind)) => self.heap.insert(id, time, kind),
            None => self.heap.remove(id),
        }
    }

    /// Pops all heap entries predicted for the current time.
    pub fn pop_due_actions(&mut self, now: f64) -> Vec<(ActionId, HeapEntryKind)> {
        let mut due = Vec::new();
        while let Some(t) = self.heap.top_date() {
            if t > now + EPSILON {
                break;
            }
            let (id, _, kind) = self.heap.pop().unwrap();
            due.push((id, kind));
        }
        due
    }

    /// Applies the elapsed interval to every started action and returns the ids of the
    /// actions that finished during it (remaining work exhausted or duration expired).
    pub fn update_started_full(&mut self, delta: f64) -> Vec<ActionId> {
        let mut done = Vec::new();
        for id in self.pool.started_ids() {
            let (value, penalty) = match self.pool.get(id).variable() {
                Some(var) => (self.system.variable_value(var), self.system.variable_penalty(var)),
                None => (0., 0.),
            };
            let action = self.pool.get_mut(id);
            action.update_remains(value * delta);
            action.update_max_duration(delta);
            let work_done = action.remains() <= EPSILON && penalty > 0.;
            let duration_expired = action.max_duration() != NO_MAX_DURATION && action.max_duration() <= EPSILON;
            if work_done || duration_expired {
                done.push(id);
            }
        }
        done
    }
}
