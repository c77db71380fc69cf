//! Max-min fairness linear system.

use log::trace;
use rustc_hash::{FxHashMap, FxHashSet};

/// Default precision used to compare floating point values inside the solver.
pub const DEFAULT_PRECISION: f64 = 1e-9;

/// Sentinel for unbounded variables (no upper cap on the variable value).
pub const UNBOUNDED: f64 = -1.;

/// Identifier of a constraint inside a [`System`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstraintId(usize);

/// Identifier of a variable inside a [`System`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableId(usize);

/// Capacity sharing policy of a constraint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SharingPolicy {
    /// The capacity is split among the variables using the constraint (max-min fair sharing).
    Shared,
    /// Every variable may use up to the full capacity independently of the others.
    FatPipe,
}

struct ConstraintElem {
    var: VariableId,
    weight: f64,
}

struct Constraint {
    bound: f64,
    policy: SharingPolicy,
    concurrency_limit: Option<usize>,
    elements: Vec<ConstraintElem>,
    // solver scratch state, meaningful only during solve()
    remaining: f64,
    usage: f64,
    active: bool,
}

struct VariableElem {
    cnst: ConstraintId,
    weight: f64,
}

struct Variable {
    penalty: f64,
    bound: f64,
    value: f64,
    concurrency_share: usize,
    elements: Vec<VariableElem>,
    // solver scratch state
    frozen: bool,
}

impl Variable {
    fn is_active(&self) -> bool {
        self.penalty > 0.
    }
}

/// The max-min fairness linear system.
///
/// Owns the full bipartite graph of constraints and variables. Every mutation marks the
/// affected constraints as modified; [`solve()`](System::solve) then recomputes the fair
/// allocation of the touched connected components (or of the whole system when selective
/// update is disabled). The solution always matches a full re-solve from scratch, selective
/// update is purely an optimization.
pub struct System {
    constraints: Vec<Option<Constraint>>,
    free_constraints: Vec<usize>,
    variables: Vec<Option<Variable>>,
    free_variables: Vec<usize>,
    selective_update: bool,
    modified_constraints: FxHashSet<ConstraintId>,
    modified_variables: Vec<VariableId>,
    precision: f64,
}

impl System {
    /// Creates a new system.
    ///
    /// When `selective_update` is enabled, `solve()` recomputes only the connected
    /// components of the sharing graph affected by mutations since the previous solve.
    pub fn new(selective_update: bool) -> Self {
        Self {
            constraints: Vec::new(),
            free_constraints: Vec::new(),
            variables: Vec::new(),
            free_variables: Vec::new(),
            selective_update,
            modified_constraints: FxHashSet::default(),
            modified_variables: Vec::new(),
            precision: DEFAULT_PRECISION,
        }
    }

    /// Returns whether selective update is enabled.
    pub fn is_selective_update(&self) -> bool {
        self.selective_update
    }

    /// Sets the precision used for floating point comparisons.
    pub fn set_precision(&mut self, precision: f64) {
        assert!(precision > 0., "Precision must be positive");
        self.precision = precision;
    }

    fn cnst(&self, id: ConstraintId) -> &Constraint {
        self.constraints[id.0].as_ref().expect("Constraint was removed")
    }

    fn cnst_mut(&mut self, id: ConstraintId) -> &mut Constraint {
        self.constraints[id.0].as_mut().expect("Constraint was removed")
    }

    fn var(&self, id: VariableId) -> &Variable {
        self.variables[id.0].as_ref().expect("Variable was removed")
    }

    fn var_mut(&mut self, id: VariableId) -> &mut Variable {
        self.variables[id.0].as_mut().expect("Variable was removed")
    }

    fn mark_modified(&mut self, id: ConstraintId) {
        self.modified_constraints.insert(id);
    }

    /// Creates a new constraint with the given capacity bound.
    ///
    /// The bound must be finite and non-negative (zero is legal and models a fully
    /// blocked resource).
    pub fn constraint_new(&mut self, bound: f64) -> ConstraintId {
        assert!(
            bound.is_finite() && bound >= 0.,
            "Constraint bound must be finite and non-negative, got {}",
            bound
        );
        let cnst = Constraint {
            bound,
            policy: SharingPolicy::Shared,
            concurrency_limit: None,
            elements: Vec::new(),
            remaining: 0.,
            usage: 0.,
            active: false,
        };
        let id = if let Some(idx) = self.free_constraints.pop() {
            self.constraints[idx] = Some(cnst);
            ConstraintId(idx)
        } else {
            self.constraints.push(Some(cnst));
            ConstraintId(self.constraints.len() - 1)
        };
        self.mark_modified(id);
        id
    }

    /// Sets the sharing policy of a constraint.
    pub fn set_sharing_policy(&mut self, cnst: ConstraintId, policy: SharingPolicy) {
        self.cnst_mut(cnst).policy = policy;
        self.mark_modified(cnst);
    }

    /// Switches a constraint to the fat-pipe policy.
    pub fn unshare(&mut self, cnst: ConstraintId) {
        self.set_sharing_policy(cnst, SharingPolicy::FatPipe);
    }

    /// Returns the sharing policy of a constraint.
    pub fn sharing_policy(&self, cnst: ConstraintId) -> SharingPolicy {
        self.cnst(cnst).policy
    }

    /// Limits the total concurrency share of variables attached to a constraint.
    pub fn set_concurrency_limit(&mut self, cnst: ConstraintId, limit: Option<usize>) {
        self.cnst_mut(cnst).concurrency_limit = limit;
    }

    /// Returns the number of concurrency slots left on a constraint,
    /// or `None` if the constraint is not concurrency-limited.
    pub fn concurrency_slack(&self, cnst: ConstraintId) -> Option<usize> {
        let cnst = self.cnst(cnst);
        cnst.concurrency_limit.map(|limit| {
            let used: usize = cnst
                .elements
                .iter()
                .filter(|e| self.var(e.var).is_active())
                .map(|e| self.var(e.var).concurrency_share)
                .sum();
            limit.saturating_sub(used)
        })
    }

    /// Returns the capacity bound of a constraint.
    pub fn constraint_bound(&self, cnst: ConstraintId) -> f64 {
        self.cnst(cnst).bound
    }

    /// Updates the capacity bound of a constraint.
    pub fn update_constraint_bound(&mut self, cnst: ConstraintId, bound: f64) {
        assert!(
            bound.is_finite() && bound >= 0.,
            "Constraint bound must be finite and non-negative, got {}",
            bound
        );
        self.cnst_mut(cnst).bound = bound;
        self.mark_modified(cnst);
    }

    /// Returns whether some active variable is attached to the constraint.
    pub fn constraint_used(&self, cnst: ConstraintId) -> bool {
        self.cnst(cnst)
            .elements
            .iter()
            .any(|e| self.var(e.var).is_active())
    }

    /// Returns the solved usage of a constraint
    /// (total consumption for shared constraints, maximum consumption for fat-pipe ones).
    pub fn constraint_usage(&self, cnst: ConstraintId) -> f64 {
        let cnst = self.cnst(cnst);
        let consumptions = cnst.elements.iter().map(|e| e.weight * self.var(e.var).value);
        match cnst.policy {
            SharingPolicy::Shared => consumptions.sum(),
            SharingPolicy::FatPipe => consumptions.fold(0., f64::max),
        }
    }

    /// Returns the variables attached to the constraint.
    pub fn constraint_variables(&self, cnst: ConstraintId) -> Vec<VariableId> {
        self.cnst(cnst).elements.iter().map(|e| e.var).collect()
    }

    /// Creates a new variable.
    ///
    /// A non-positive `penalty` marks the variable inactive: it is excluded from solving and
    /// its value is forced to 0. `bound` is the upper cap on the variable value
    /// ([`UNBOUNDED`] for none). `capacity_hint` is the expected number of constraints the
    /// variable will be attached to.
    pub fn variable_new(&mut self, penalty: f64, bound: f64, capacity_hint: usize) -> VariableId {
        let var = Variable {
            penalty,
            bound,
            value: 0.,
            concurrency_share: 1,
            elements: Vec::with_capacity(capacity_hint),
            frozen: false,
        };
        if let Some(idx) = self.free_variables.pop() {
            self.variables[idx] = Some(var);
            VariableId(idx)
        } else {
            self.variables.push(Some(var));
            VariableId(self.variables.len() - 1)
        }
    }

    /// Attaches a variable to a constraint with the given consumption weight.
    ///
    /// Expanding the same pair again accumulates the weight.
    pub fn expand(&mut self, cnst: ConstraintId, var: VariableId, weight: f64) {
        assert!(weight > 0., "Consumption weight must be positive, got {}", weight);
        if let Some(limit) = self.cnst(cnst).concurrency_limit {
            let share = self.var(var).concurrency_share;
            let slack = self.concurrency_slack(cnst).unwrap();
            assert!(
                share <= slack,
                "Concurrency limit {} of the constraint is exceeded",
                limit
            );
        }
        let existing = self.cnst(cnst).elements.iter().position(|e| e.var == var);
        match existing {
            Some(pos) => {
                self.cnst_mut(cnst).elements[pos].weight += weight;
                let var_mut = self.var_mut(var);
                let elem = var_mut.elements.iter_mut().find(|e| e.cnst == cnst).unwrap();
                elem.weight += weight;
            }
            None => {
                self.cnst_mut(cnst).elements.push(ConstraintElem { var, weight });
                self.var_mut(var).elements.push(VariableElem { cnst, weight });
            }
        }
        self.mark_modified(cnst);
    }

    /// Returns the solved value of a variable (its instantaneous rate).
    pub fn variable_value(&self, var: VariableId) -> f64 {
        self.var(var).value
    }

    /// Returns the sharing penalty of a variable.
    pub fn variable_penalty(&self, var: VariableId) -> f64 {
        self.var(var).penalty
    }

    /// Returns the upper bound of a variable.
    pub fn variable_bound(&self, var: VariableId) -> f64 {
        self.var(var).bound
    }

    /// Sets the concurrency share of a variable
    /// (how many concurrency slots it takes on concurrency-limited constraints).
    pub fn set_concurrency_share(&mut self, var: VariableId, share: usize) {
        self.var_mut(var).concurrency_share = share;
    }

    /// Updates the sharing penalty of a variable.
    ///
    /// Setting a non-positive penalty suspends the variable: its value drops to 0 at the
    /// next solve and the freed capacity is redistributed.
    pub fn update_variable_penalty(&mut self, var: VariableId, penalty: f64) {
        let cnsts: Vec<ConstraintId> = self.var(var).elements.iter().map(|e| e.cnst).collect();
        self.var_mut(var).penalty = penalty;
        for cnst in cnsts {
            self.mark_modified(cnst);
        }
    }

    /// Updates the upper bound of a variable ([`UNBOUNDED`] for none).
    pub fn update_variable_bound(&mut self, var: VariableId, bound: f64) {
        let cnsts: Vec<ConstraintId> = self.var(var).elements.iter().map(|e| e.cnst).collect();
        self.var_mut(var).bound = bound;
        for cnst in cnsts {
            self.mark_modified(cnst);
        }
    }

    /// Detaches a variable from all constraints and releases it.
    ///
    /// The freed capacity is redistributed among the remaining variables at the next solve.
    pub fn remove_variable(&mut self, var: VariableId) {
        let cnsts: Vec<ConstraintId> = self.var(var).elements.iter().map(|e| e.cnst).collect();
        for cnst in cnsts {
            self.cnst_mut(cnst).elements.retain(|e| e.var != var);
            self.mark_modified(cnst);
        }
        self.variables[var.0] = None;
        self.free_variables.push(var.0);
        self.modified_variables.retain(|&v| v != var);
    }

    /// Removes a constraint from the system.
    ///
    /// The constraint must not be used by any variable.
    pub fn remove_constraint(&mut self, cnst: ConstraintId) {
        assert!(
            self.cnst(cnst).elements.is_empty(),
            "Cannot remove a constraint which still has attached variables"
        );
        self.modified_constraints.remove(&cnst);
        self.constraints[cnst.0] = None;
        self.free_constraints.push(cnst.0);
    }

    /// Returns the variables whose values changed during the last solve
    /// and clears the internal modified list.
    pub fn take_modified_variables(&mut self) -> Vec<VariableId> {
        std::mem::take(&mut self.modified_variables)
    }

    /// Computes the max-min fair allocation.
    ///
    /// With selective update enabled, only the connected components of the sharing graph
    /// containing constraints modified since the previous solve are recomputed; the result
    /// is identical to a full re-solve.
    pub fn solve(&mut self) {
        let mut seeds: Vec<ConstraintId> = if self.selective_update {
            self.modified_constraints.drain().collect()
        } else {
            self.constraints
                .iter()
                .enumerate()
                .filter(|(_, c)| c.is_some())
                .map(|(i, _)| ConstraintId(i))
                .collect()
        };
        self.modified_constraints.clear();
        if seeds.is_empty() {
            return;
        }
        seeds.sort();

        let (cnst_set, var_set) = self.collect_component(&seeds);
        trace!(
            "Solving {} constraints and {} variables ({} modified)",
            cnst_set.len(),
            var_set.len(),
            seeds.len()
        );
        self.solve_component(&cnst_set, &var_set);
    }

    /// Expands the seed constraints to the full connected components they belong to.
    fn collect_component(&self, seeds: &[ConstraintId]) -> (Vec<ConstraintId>, Vec<VariableId>) {
        let mut cnst_set = Vec::new();
        let mut var_set = Vec::new();
        let mut seen_cnst: FxHashSet<ConstraintId> = FxHashSet::default();
        let mut seen_var: FxHashSet<VariableId> = FxHashSet::default();
        let mut queue: Vec<ConstraintId> = Vec::new();
        for &seed in seeds {
            if self.constraints[seed.0].is_some() && seen_cnst.insert(seed) {
                queue.push(seed);
            }
        }
        while let Some(cnst) = queue.pop() {
            cnst_set.push(cnst);
            for i in 0..self.cnst(cnst).elements.len() {
                let var = self.cnst(cnst).elements[i].var;
                if seen_var.insert(var) {
                    var_set.push(var);
                    for elem in &self.var(var).elements {
                        if seen_cnst.insert(elem.cnst) {
                            queue.push(elem.cnst);
                        }
                    }
                }
            }
        }
        cnst_set.sort();
        var_set.sort();
        (cnst_set, var_set)
    }

    fn solve_component(&mut self, cnst_set: &[ConstraintId], var_set: &[VariableId]) {
        let precision = self.precision;
        let old_values: FxHashMap<VariableId, f64> =
            var_set.iter().map(|&v| (v, self.var(v).value)).collect();

        // Inactive variables are frozen at 0 from the start.
        for &v in var_set {
            let var = self.var_mut(v);
            debug_assert!(
                var.penalty <= 0. || !var.elements.is_empty(),
                "Active variable is not attached to any constraint"
            );
            var.value = 0.;
            var.frozen = !var.is_active();
        }

        for &c in cnst_set {
            let usage = self.recompute_usage(c);
            let cnst = self.cnst_mut(c);
            cnst.remaining = cnst.bound;
            cnst.usage = usage;
            cnst.active = usage > precision;
        }

        // Water-filling: every round freezes at least one variable, either at the fair
        // share dictated by the most saturated constraint or at its own bound.
        loop {
            let mut min_ratio: Option<f64> = None;
            for &c in cnst_set {
                let cnst = self.cnst(c);
                if cnst.active {
                    let ratio = cnst.remaining.max(0.) / cnst.usage;
                    min_ratio = Some(min_ratio.map_or(ratio, |m: f64| m.min(ratio)));
                }
            }
            let mut min_bound: Option<f64> = None;
            for &v in var_set {
                let var = self.var(v);
                if !var.frozen && var.bound >= 0. {
                    let avail = var.bound * var.penalty;
                    min_bound = Some(min_bound.map_or(avail, |m: f64| m.min(avail)));
                }
            }

            let bound_wins = match (min_ratio, min_bound) {
                (None, None) => break,
                (None, Some(_)) => true,
                (Some(_), None) => false,
                (Some(ratio), Some(bound)) => bound <= ratio + precision,
            };

            let mut frozen_now: Vec<VariableId> = Vec::new();
            if bound_wins {
                // Some variables hit their own bound before any constraint saturates.
                let bound = min_bound.unwrap();
                for &v in var_set {
                    let var = self.var(v);
                    if !var.frozen && var.bound >= 0. && var.bound * var.penalty <= bound + precision {
                        frozen_now.push(v);
                    }
                }
                for &v in &frozen_now {
                    let value = self.var(v).bound;
                    self.freeze(v, value);
                }
            } else {
                // Freeze every variable of the most saturated constraints at its fair share.
                let ratio = min_ratio.unwrap();
                for &c in cnst_set {
                    let cnst = self.cnst(c);
                    if !cnst.active {
                        continue;
                    }
                    if cnst.remaining.max(0.) / cnst.usage <= ratio + precision {
                        for elem in &cnst.elements {
                            let var = self.var(elem.var);
                            if !var.frozen && !frozen_now.contains(&elem.var) {
                                frozen_now.push(elem.var);
                            }
                        }
                    }
                }
                for &v in &frozen_now {
                    let var = self.var(v);
                    let mut value = ratio / var.penalty;
                    if var.bound >= 0. {
                        value = value.min(var.bound);
                    }
                    self.freeze(v, value);
                }
            }

            if frozen_now.is_empty() {
                break;
            }
            for &c in cnst_set {
                let cnst = self.cnst_mut(c);
                if cnst.active && cnst.usage <= precision {
                    cnst.active = false;
                }
            }
        }

        for &v in var_set {
            let value = self.var(v).value;
            if (value - old_values[&v]).abs() > precision {
                self.modified_variables.push(v);
            }
        }
        self.modified_variables.sort();
        self.modified_variables.dedup();
    }

    /// Usage of a constraint over its unfrozen active variables.
    fn recompute_usage(&self, c: ConstraintId) -> f64 {
        let cnst = self.cnst(c);
        let mut usage = 0.;
        for elem in &cnst.elements {
            let var = self.var(elem.var);
            if var.frozen {
                continue;
            }
            let share = elem.weight / var.penalty;
            match cnst.policy {
                SharingPolicy::Shared => usage += share,
                SharingPolicy::FatPipe => usage = usage.max(share),
            }
        }
        usage
    }

    /// Freezes a variable at the given value and withdraws its consumption
    /// from all constraints it is attached to.
    fn freeze(&mut self, v: VariableId, value: f64) {
        let precision = self.precision;
        {
            let var = self.var_mut(v);
            var.value = value;
            var.frozen = true;
        }
        let elems: Vec<(ConstraintId, f64)> = self.var(v).elements.iter().map(|e| (e.cnst, e.weight)).collect();
        let penalty = self.var(v).penalty;
        for (c, weight) in elems {
            match self.cnst(c).policy {
                SharingPolicy::Shared => {
                    let cnst = self.cnst_mut(c);
                    cnst.remaining -= weight * value;
                    cnst.usage -= weight / penalty;
                    if cnst.usage <= precision {
                        cnst.active = false;
                    }
                }
                SharingPolicy::FatPipe => {
                    // The frozen variable does not consume shared capacity,
                    // recompute the maximum over the remaining users.
                    let usage = self.recompute_usage(c);
                    let cnst = self.cnst_mut(c);
                    cnst.usage = usage;
                    if usage <= precision {
                        cnst.active = false;
                    }
                }
            }
        }
    }
}
