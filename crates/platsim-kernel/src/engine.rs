//! Top-level loop advancing the simulated clock across all resource models.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use log::{debug, error};

use platsim_core::{Id, Simulation, EPSILON};

use crate::model::Model;

/// How a simulation run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineOutcome {
    /// All non-daemon actors finished and no event source remains.
    Completed,
    /// No actor was runnable while non-daemon actors were still alive.
    /// The remaining actors have been forcibly killed.
    Deadlock,
}

struct ActorEntry {
    daemon: bool,
    alive: bool,
}

/// Shared handle to the actor registry of the engine.
///
/// Components hold a clone of the registry to report their own completion from
/// within event handlers.
#[derive(Clone, Default)]
pub struct ActorRegistry {
    actors: Rc<RefCell<BTreeMap<Id, ActorEntry>>>,
}

impl ActorRegistry {
    /// Registers a component as a simulated actor.
    ///
    /// Non-daemon actors keep the deadlock detector armed until they are reported
    /// finished; daemons alone never keep the simulation alive.
    pub fn register(&self, id: Id, daemon: bool) {
        self.actors
            .borrow_mut()
            .insert(id, ActorEntry { daemon, alive: true });
    }

    /// Marks the actor as finished.
    pub fn finished(&self, id: Id) {
        if let Some(entry) = self.actors.borrow_mut().get_mut(&id) {
            entry.alive = false;
        }
    }

    /// Returns whether the actor is still alive.
    pub fn is_alive(&self, id: Id) -> bool {
        self.actors.borrow().get(&id).map_or(false, |e| e.alive)
    }

    fn blocked(&self) -> Vec<Id> {
        self.actors
            .borrow()
            .iter()
            .filter(|(_, e)| e.alive && !e.daemon)
            .map(|(&id, _)| id)
            .collect()
    }

    fn kill_all(&self) {
        for entry in self.actors.borrow_mut().values_mut() {
            entry.alive = false;
        }
    }
}

/// Orchestrates the simulation: owns the event queue, the registered resource models
/// and the actor registry.
///
/// Each round the engine (1) delivers every application event scheduled at the current
/// time, (2) asks every model to surface its terminal actions, (3) computes the minimum
/// of the next queued event time and the next resource-driven event time across all
/// models, and (4) advances the clock there, updating the action states when a
/// resource-driven event wins. The loop ends when no event source remains; if non-daemon
/// actors are still alive at that point, the run is reported as a deadlock.
pub struct Engine {
    sim: Simulation,
    models: Vec<(String, Rc<RefCell<dyn Model>>)>,
    actors: ActorRegistry,
}

impl Engine {
    /// Creates an engine with the given simulation seed.
    pub fn new(seed: u64) -> Self {
        Self {
            sim: Simulation::new(seed),
            models: Vec::new(),
            actors: ActorRegistry::default(),
        }
    }

    /// Returns the underlying simulation for registering components and handlers.
    pub fn sim(&mut self) -> &mut Simulation {
        &mut self.sim
    }

    /// Returns the current simulation time.
    pub fn time(&self) -> f64 {
        self.sim.time()
    }

    /// Registers a resource model. Model names must be unique.
    pub fn add_model<M>(&mut self, model: Rc<RefCell<M>>)
    where
        M: Model + 'static,
    {
        let name = model.borrow().name().to_owned();
        assert!(
            self.models.iter().all(|(n, _)| *n != name),
            "Model {} already exists",
            name
        );
        self.models.push((name, model));
    }

    /// Returns a shared handle to the actor registry.
    pub fn actor_registry(&self) -> ActorRegistry {
        self.actors.clone()
    }

    /// Runs the simulation to completion.
    pub fn run(&mut self) -> EngineOutcome {
        loop {
            // Deliver every application event scheduled at the current time.
            loop {
                let now = self.sim.time();
                match self.sim.peek_next_time() {
                    Some(t) if t <= now + EPSILON => {
                        self.sim.step();
                    }
                    _ => break,
                }
            }

            // Surface failed and finished actions; the completion events they emit
            // at the current time are processed before moving the clock.
            for (_, model) in &self.models {
                model.borrow_mut().complete_actions();
            }
            let now = self.sim.time();
            if matches!(self.sim.peek_next_time(), Some(t) if t <= now + EPSILON) {
                continue;
            }

            let next_event = self.sim.peek_next_time();
            let mut next_model: Option<f64> = None;
            for (name, model) in &self.models {
                let delta = model.borrow_mut().next_occurring_event(now);
                if delta >= 0. {
                    let t = now + delta;
                    debug!(target: "engine", "[{:.3}] Next event of model {} at {:.3}", now, name, t);
                    next_model = Some(next_model.map_or(t, |m: f64| m.min(t)));
                }
            }

            // Advance the clock to the earliest of the two event sources. Every model is
            // brought up to date with the elapsed interval on every advance, no matter
            // which source won.
            let (next_time, model_event) = match (next_event, next_model) {
                (None, None) => return self.terminate(),
                (Some(te), None) => (te, false),
                (None, Some(tm)) => (tm, true),
                (Some(te), Some(tm)) => {
                    if tm <= te + EPSILON {
                        (tm, true)
                    } else {
                        (te, false)
                    }
                }
            };
            let delta = next_time - now;
            if model_event {
                self.sim.set_time(next_time);
            }
            for (_, model) in &self.models {
                model.borrow_mut().update_actions_state(next_time, delta);
            }
            if !model_event {
                self.sim.step();
            }
        }
    }

    /// Handles the end of the event flow: a normal completion when no non-daemon actor
    /// remains alive, a deadlock otherwise. Deadlocked actors are logged and killed;
    /// this is a terminal simulated outcome, not an engine crash.
    fn terminate(&mut self) -> EngineOutcome {
        let blocked = self.actors.blocked();
        if blocked.is_empty() {
            self.actors.kill_all();
            return EngineOutcome::Completed;
        }
        error!(
            target: "engine",
            "[{:.3}] Deadlock: {} actors are still alive, waiting for something",
            self.sim.time(),
            blocked.len()
        );
        for id in &blocked {
            error!(
                target: "engine",
                "[{:.3}] Actor {} ({}) is waiting for an activity that will never complete",
                self.sim.time(),
                id,
                self.sim.lookup_name(*id)
            );
        }
        self.actors.kill_all();
        EngineOutcome::Deadlock
    }
}
