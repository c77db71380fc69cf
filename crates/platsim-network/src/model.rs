//! Network resource model.

use rustc_hash::FxHashMap;

use platsim_core::{log_debug, Id, SimulationContext, EPSILON};
use platsim_kernel::{ActionId, ActionState, HeapEntryKind, Model, ModelCore, UpdateStrategy};
use platsim_maxmin::{ConstraintId, SharingPolicy, UNBOUNDED};

use crate::events::{DataTransferCompleted, DataTransferFailed};

/// Identifier of a link inside a [`NetworkModel`].
pub type LinkId = usize;

/// Identifier of a network node.
pub type NodeId = usize;

struct Link {
    name: String,
    bandwidth: f64,
    latency: f64,
    policy: SharingPolicy,
    is_on: bool,
    constraint: Option<ConstraintId>,
}

/// Model of data transfers over a network of links with finite bandwidth.
///
/// A transfer expands its variable on the constraint of every link on its route, so
/// the bottleneck link dictates its rate. The sharing penalty of a transfer equals its
/// accumulated route latency (flows crossing longer routes get smaller shares), and the
/// latency itself is paid before any byte flows: under lazy update through a `Latency`
/// action-heap entry, under full update through a per-action countdown.
pub struct NetworkModel {
    core: ModelCore,
    links: Vec<Link>,
    routes: FxHashMap<(NodeId, NodeId), Vec<LinkId>>,
    node_count: usize,
    // remaining startup latency per action, used by the full update strategy
    pending_latency: FxHashMap<ActionId, f64>,
    requests: FxHashMap<u64, ActionId>,
    next_request_id: u64,
    ctx: SimulationContext,
}

impl NetworkModel {
    /// Creates the model. The model name for the engine is the context name.
    pub fn new(strategy: UpdateStrategy, ctx: SimulationContext) -> Self {
        Self {
            core: ModelCore::new(strategy),
            links: Vec::new(),
            routes: FxHashMap::default(),
            node_count: 0,
            pending_latency: FxHashMap::default(),
            requests: FxHashMap::default(),
            next_request_id: 0,
            ctx,
        }
    }

    /// Adds a network node.
    pub fn add_node(&mut self) -> NodeId {
        self.node_count += 1;
        self.node_count - 1
    }

    /// Creates a link. Bandwidth must be positive, latency non-negative.
    pub fn create_link(&mut self, name: &str, bandwidth: f64, latency: f64) -> LinkId {
        assert!(bandwidth > 0., "Link {} has invalid bandwidth {}", name, bandwidth);
        assert!(latency >= 0., "Link {} has negative latency {}", name, latency);
        self.links.push(Link {
            name: name.to_owned(),
            bandwidth,
            latency,
            policy: SharingPolicy::Shared,
            is_on: true,
            constraint: None,
        });
        self.links.len() - 1
    }

    /// Sets the sharing policy of a link. Must be called before sealing.
    pub fn set_sharing_policy(&mut self, link: LinkId, policy: SharingPolicy) {
        assert!(
            self.links[link].constraint.is_none(),
            "Cannot change sharing policy of sealed link {}",
            self.links[link].name
        );
        self.links[link].policy = policy;
    }

    /// Seals the link, locking its configuration and registering its constraint.
    pub fn seal_link(&mut self, link: LinkId) {
        assert!(
            self.links[link].constraint.is_none(),
            "Link {} is already sealed",
            self.links[link].name
        );
        let cnst = self.core.system_mut().constraint_new(self.links[link].bandwidth);
        if self.links[link].policy == SharingPolicy::FatPipe {
            self.core.system_mut().unshare(cnst);
        }
        self.links[link].constraint = Some(cnst);
    }

    fn sealed_constraint(&self, link: LinkId) -> ConstraintId {
        self.links[link]
            .constraint
            .unwrap_or_else(|| panic!("Link {} is not sealed", self.links[link].name))
    }

    /// Registers the ordered list of links connecting `src` to `dst`.
    pub fn add_route(&mut self, src: NodeId, dst: NodeId, links: Vec<LinkId>) {
        assert!(!links.is_empty(), "Route from {} to {} is empty", src, dst);
        self.routes.insert((src, dst), links);
    }

    /// Returns the accumulated latency of the route between two nodes.
    pub fn latency(&self, src: NodeId, dst: NodeId) -> f64 {
        self.route(src, dst).iter().map(|&l| self.links[l].latency).sum()
    }

    /// Returns the bandwidth of the bottleneck link between two nodes.
    pub fn bandwidth(&self, src: NodeId, dst: NodeId) -> f64 {
        self.route(src, dst)
            .iter()
            .map(|&l| self.links[l].bandwidth)
            .fold(f64::INFINITY, f64::min)
    }

    fn route(&self, src: NodeId, dst: NodeId) -> &[LinkId] {
        self.routes
            .get(&(src, dst))
            .unwrap_or_else(|| panic!("No route between nodes {} and {}", src, dst))
    }

    /// Updates the link bandwidth; in-flight transfers continue from their current
    /// progress at the rates dictated by the new capacity.
    pub fn set_bandwidth(&mut self, link: LinkId, bandwidth: f64) {
        assert!(bandwidth > 0., "Link {} has invalid bandwidth {}", self.links[link].name, bandwidth);
        let cnst = self.sealed_constraint(link);
        self.links[link].bandwidth = bandwidth;
        self.core.system_mut().update_constraint_bound(cnst, bandwidth);
        log_debug!(self.ctx, "Link {} bandwidth set to {}", self.links[link].name, bandwidth);
    }

    /// Updates the link latency. Applies to transfers started afterwards.
    pub fn set_latency(&mut self, link: LinkId, latency: f64) {
        assert!(latency >= 0., "Link {} has negative latency {}", self.links[link].name, latency);
        self.links[link].latency = latency;
    }

    /// Turns the link off, failing every transfer crossing it.
    pub fn turn_off(&mut self, link: LinkId) {
        if !self.links[link].is_on {
            return;
        }
        self.links[link].is_on = false;
        let cnst = self.sealed_constraint(link);
        let failed = self.core.fail_actions_on_constraint(cnst, self.ctx.time());
        for &action in &failed {
            self.untrack(action);
        }
        log_debug!(
            self.ctx,
            "Link {} turned off, {} transfers failed",
            self.links[link].name,
            failed.len()
        );
    }

    /// Turns the link back on.
    pub fn turn_on(&mut self, link: LinkId) {
        self.links[link].is_on = true;
    }

    fn untrack(&mut self, action: ActionId) {
        self.pending_latency.remove(&action);
        let request_id = self.core.action(action).activity_id();
        self.requests.remove(&request_id);
    }

    fn make_unique_request_id(&mut self) -> u64 {
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        request_id
    }

    /// Starts a data transfer of `size` bytes from `src` to `dst` and returns the
    /// request id carried by the completion events.
    ///
    /// `rate_cap` limits the transfer rate regardless of the available bandwidth,
    /// negative for no limit.
    pub fn transfer_start(&mut self, src: NodeId, dst: NodeId, size: f64, rate_cap: f64, requester: Id) -> u64 {
        let now = self.ctx.time();
        let request_id = self.make_unique_request_id();
        let route: Vec<LinkId> = self.route(src, dst).to_vec();
        let latency: f64 = route.iter().map(|&l| self.links[l].latency).sum();
        let failed = route.iter().any(|&l| !self.links[l].is_on);
        let penalty = if latency > 0. { latency } else { 1. };
        let bound = if rate_cap >= 0. { rate_cap } else { UNBOUNDED };

        // while the latency is being paid the variable stays inactive
        let initial_penalty = if latency > 0. { 0. } else { penalty };
        let action = self
            .core
            .start_action(size, requester, request_id, initial_penalty, bound, route.len(), now);
        self.core.action_mut(action).set_sharing_penalty(penalty);
        let var = self.core.action(action).variable().unwrap();
        for &l in &route {
            let cnst = self.sealed_constraint(l);
            self.core.system_mut().expand(cnst, var, 1.);
        }
        self.requests.insert(request_id, action);

        if failed {
            self.core.finish_action(action, now, ActionState::Failed);
            self.untrack(action);
            return request_id;
        }
        if latency > 0. {
            match self.core.strategy() {
                UpdateStrategy::Lazy => {
                    self.core
                        .heap_mut()
                        .insert(action, now + latency, HeapEntryKind::Latency);
                }
                UpdateStrategy::Full => {
                    self.pending_latency.insert(action, latency);
                }
            }
        }
        request_id
    }

    /// Cancels a transfer by its request id.
    pub fn cancel(&mut self, request_id: u64) {
        if let Some(action) = self.requests.remove(&request_id) {
            self.pending_latency.remove(&action);
            self.core.cancel_action(action, self.ctx.time());
        }
    }

    /// The transfer has paid its latency: install the real sharing penalty so the
    /// variable starts competing for bandwidth at the next solve.
    fn activate(&mut self, action: ActionId, now: f64) {
        let penalty = self.core.action(action).sharing_penalty();
        self.core.action_mut(action).update_remains_lazy(now);
        if let Some(var) = self.core.action(action).variable() {
            self.core.system_mut().update_variable_penalty(var, penalty);
        }
    }

    /// Access to the shared model core, mainly for tests and tooling.
    pub fn core(&self) -> &ModelCore {
        &self.core
    }
}

impl Model for NetworkModel {
    fn name(&self) -> &str {
        self.ctx.name()
    }

    fn next_occurring_event(&mut self, now: f64) -> f64 {
        let mut next = self.core.next_occurring_event(now);
        if self.core.strategy() == UpdateStrategy::Full {
            for &latency in self.pending_latency.values() {
                if next < 0. || latency < next {
                    next = latency.max(0.);
                }
            }
        }
        next
    }

    fn update_actions_state(&mut self, now: f64, delta: f64) {
        match self.core.strategy() {
            UpdateStrategy::Lazy => {
                for (action, kind) in self.core.pop_due_actions(now) {
                    match kind {
                        HeapEntryKind::Latency => self.activate(action, now),
                        HeapEntryKind::Normal | HeapEntryKind::MaxDuration => {
                            self.core.finish_action(action, now, ActionState::Finished);
                            self.untrack(action);
                        }
                    }
                }
            }
            UpdateStrategy::Full => {
                let mut activated = Vec::new();
                for (&action, latency) in self.pending_latency.iter_mut() {
                    *latency -= delta;
                    if *latency <= EPSILON {
                        activated.push(action);
                    }
                }
                activated.sort_unstable();
                for action in activated {
                    self.pending_latency.remove(&action);
                    self.activate(action, now);
                }
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
                DataTransferCompleted {
                    id: action.activity_id(),
                },
                action.requester(),
            );
        }
        while let Some(action) = self.core.pool_mut().extract_failed_action() {
            self.ctx.emit_now(
                DataTransferFailed {
                    id: action.activity_id(),
                },
                action.requester(),
            );
        }
    }
}
