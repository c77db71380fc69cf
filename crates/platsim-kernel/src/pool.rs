//! Per-model storage of actions with per-state index sets.

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;

use platsim_core::Id;

use crate::action::{Action, ActionId, ActionState};
use crate::signal::Signal;

/// Notification about an action state transition.
#[derive(Clone, Copy, Debug)]
pub struct StateChange {
    /// The action that changed state.
    pub action: ActionId,
    /// Previous state.
    pub old: ActionState,
    /// New state.
    pub new: ActionState,
    /// Time of the transition.
    pub time: f64,
}

/// Owns the actions of one model and indexes them by state.
///
/// Index sets are ordered by action id, so that draining finished or failed actions
/// is a deterministic function of action identity (the reproducibility contract).
#[derive(Default)]
pub struct ActionPool {
    actions: FxHashMap<ActionId, Action>,
    next_id: ActionId,
    inited: BTreeSet<ActionId>,
    started: BTreeSet<ActionId>,
    finished: BTreeSet<ActionId>,
    failed: BTreeSet<ActionId>,
    ignored: BTreeSet<ActionId>,
    on_state_change: Signal<StateChange>,
}

impl ActionPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new action in the `Inited` state and returns its id.
    pub fn add(&mut self, cost: f64, requester: Id, activity_id: u64, now: f64) -> ActionId {
        let id = self.next_id;
        self.next_id += 1;
        self.actions.insert(id, Action::new(id, cost, requester, activity_id, now));
        self.inited.insert(id);
        id
    }

    /// Returns a reference to the action.
    pub fn get(&self, id: ActionId) -> &Action {
        self.actions.get(&id).expect("Unknown action")
    }

    /// Returns a mutable reference to the action.
    pub fn get_mut(&mut self, id: ActionId) -> &mut Action {
        self.actions.get_mut(&id).expect("Unknown action")
    }

    /// Returns whether the pool holds an action with this id.
    pub fn contains(&self, id: ActionId) -> bool {
        self.actions.contains_key(&id)
    }

    fn state_set(&mut self, state: ActionState) -> &mut BTreeSet<ActionId> {
        match state {
            ActionState::Inited => &mut self.inited,
            ActionState::Started => &mut self.started,
            ActionState::Finished => &mut self.finished,
            ActionState::Failed => &mut self.failed,
            ActionState::Ignored => &mut self.ignored,
            ActionState::Canceled => {
                unreachable!("Canceled actions are removed from the pool immediately")
            }
        }
    }

    /// Transitions the action to a new state, firing the state-change signal.
    ///
    /// Terminal transitions stamp the finish time; `Finished` zeroes the remaining work.
    /// Once a terminal state is reached the action is immutable.
    pub fn set_state(&mut self, id: ActionId, state: ActionState, time: f64) {
        let old = self.get(id).state();
        if old == state {
            return;
        }
        assert!(
            !old.is_terminal(),
            "Cannot change state of action {} which is already in terminal state {:?}",
            id,
            old
        );
        self.state_set(old).remove(&id);
        if state != ActionState::Canceled {
            self.state_set(state).insert(id);
        }
        let action = self.get_mut(id);
        action.set_state(state);
        if state.is_terminal() {
            action.set_finish_time(time);
            if state == ActionState::Finished {
                action.update_remains(action.remains());
            }
        }
        self.on_state_change.emit(&StateChange {
            action: id,
            old,
            new: state,
            time,
        });
    }

    /// Removes the action from the pool and returns it.
    pub fn remove(&mut self, id: ActionId) -> Action {
        let action = self.actions.remove(&id).expect("Unknown action");
        if !matches!(action.state(), ActionState::Canceled) {
            self.state_set(action.state()).remove(&id);
        }
        action
    }

    /// Returns the ids of started actions in id order.
    pub fn started_ids(&self) -> Vec<ActionId> {
        self.started.iter().copied().collect()
    }

    /// Returns the number of actions in the started state.
    pub fn started_count(&self) -> usize {
        self.started.len()
    }

    /// Extracts the earliest-created finished action, removing it from the pool.
    pub fn extract_done_action(&mut self) -> Option<Action> {
        let id = self.finished.iter().next().copied()?;
        self.finished.remove(&id);
        Some(self.actions.remove(&id).unwrap())
    }

    /// Extracts the earliest-created failed action, removing it from the pool.
    pub fn extract_failed_action(&mut self) -> Option<Action> {
        let id = self.failed.iter().next().copied()?;
        self.failed.remove(&id);
        Some(self.actions.remove(&id).unwrap())
    }

    /// Access to the state-change signal for subscribing and unsubscribing.
    pub fn on_state_change(&mut self) -> &mut Signal<StateChange> {
        &mut self.on_state_change
    }
}
