//! Transition graph and its executor.
//!
//! A `Graph` owns an arena of actions and an ordered list of synapses that
//! reference the arena by slot. One call to [`Graph::run`] is one pass:
//! counters are recomputed, every unfired synapse is checked for readiness
//! and ready ones are fired through the caller's [`GraphFunctions`].
//! Completions reported later flow back in through [`Graph::update`].

use crate::action::{Action, ActionId, ActionStatus, FailureKind};
use crate::error::{CrmError, Result};
use crate::functions::{FireDecision, GraphFunctions};
use crate::synapse::{Input, Synapse, SynapseStatus};
use crate::types::{ActionType, CompletionAction, PassResult, INFINITY, TASK_FENCE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, error, info, trace, warn};

/// Default slack added to every action timeout, in milliseconds.
pub const DEFAULT_NETWORK_DELAY_MS: i64 = 60_000;

// ---------------------------------------------------------------------------
// PassCounters
// ---------------------------------------------------------------------------

/// Per-pass bookkeeping. Derived state: recomputed at the start of every pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassCounters {
    pub fired: usize,
    pub pending: usize,
    pub skipped: usize,
    pub completed: usize,
    pub incomplete: usize,
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Graph {
    pub id: i32,
    /// Where the graph came from (policy engine input file, ...).
    pub source: String,
    /// Maximum synapses awaiting confirmation at once; `<= 0` is unlimited.
    pub batch_limit: i32,
    /// Maximum concurrent migrations per peer; `<= 0` is unlimited.
    pub migration_limit: i32,
    /// Extra slack added to every action timer, in milliseconds.
    pub network_delay: i64,
    pub stonith_timeout: i64,
    /// Cooldown before recomputing after a restart, in milliseconds.
    pub transition_delay: i64,
    pub abort_priority: i32,
    pub abort_reason: Option<String>,
    pub completion_action: CompletionAction,
    pub complete: bool,
    pub counters: PassCounters,
    synapses: Vec<Synapse>,
    actions: Vec<Action>,
    index: HashMap<ActionId, usize>,
}

impl Graph {
    pub fn new(id: i32) -> Self {
        Self {
            id,
            source: String::new(),
            batch_limit: 0,
            migration_limit: -1,
            network_delay: DEFAULT_NETWORK_DELAY_MS,
            stonith_timeout: DEFAULT_NETWORK_DELAY_MS,
            transition_delay: 0,
            abort_priority: 0,
            abort_reason: None,
            completion_action: CompletionAction::Done,
            complete: false,
            counters: PassCounters::default(),
            synapses: Vec::new(),
            actions: Vec::new(),
            index: HashMap::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    /// Append a synapse and return its position.
    pub fn add_synapse(&mut self, id: i32, priority: i32) -> usize {
        self.synapses.push(Synapse::new(id, priority));
        self.synapses.len() - 1
    }

    /// Give the synapse at `synapse` ownership of a new action.
    pub fn add_action(&mut self, synapse: usize, action: Action) -> Result<()> {
        if self.index.contains_key(&action.id) {
            return Err(CrmError::DuplicateAction(action.id.0));
        }
        let slot = self.actions.len();
        self.index.insert(action.id, slot);
        self.actions.push(action);
        self.synapses[synapse].actions.push(slot);
        Ok(())
    }

    /// Make an already-added action a prerequisite of the synapse at `synapse`.
    pub fn add_input(&mut self, synapse: usize, action: ActionId) -> Result<()> {
        let slot = *self
            .index
            .get(&action)
            .ok_or_else(|| CrmError::UnknownInput {
                synapse: self.synapses[synapse].id,
                action: action.0,
            })?;
        self.synapses[synapse].inputs.push(Input {
            slot,
            satisfied: false,
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn synapses(&self) -> &[Synapse] {
        &self.synapses
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn action(&self, id: ActionId) -> Option<&Action> {
        self.index.get(&id).map(|&slot| &self.actions[slot])
    }

    pub fn action_mut(&mut self, id: ActionId) -> Option<&mut Action> {
        self.index.get(&id).map(|&slot| &mut self.actions[slot])
    }

    /// Action at an arena slot, as referenced by synapses.
    pub fn action_at(&self, slot: usize) -> &Action {
        &self.actions[slot]
    }

    /// The synapse that owns `id`.
    pub fn synapse_of(&self, id: ActionId) -> Option<&Synapse> {
        let slot = *self.index.get(&id)?;
        self.synapses.iter().find(|s| s.actions.contains(&slot))
    }

    // -----------------------------------------------------------------------
    // Status changes used by dispatch handlers
    // -----------------------------------------------------------------------

    /// Mark an action confirmed. Returns false if it already was.
    pub fn confirm_action(&mut self, id: ActionId) -> bool {
        match self.action_mut(id) {
            Some(action) if !action.status.is_confirmed() => {
                action.status = ActionStatus::Confirmed;
                true
            }
            Some(_) => false,
            None => {
                warn!(action = id.0, "cannot confirm unknown action");
                false
            }
        }
    }

    /// Mark an action failed (and therefore confirmed). Returns false if it was
    /// already confirmed.
    pub fn fail_action(&mut self, id: ActionId, kind: FailureKind) -> bool {
        match self.action_mut(id) {
            Some(action) if !action.status.is_confirmed() => {
                action.status = ActionStatus::Failed(kind);
                true
            }
            Some(_) => false,
            None => {
                warn!(action = id.0, "cannot fail unknown action");
                false
            }
        }
    }

    /// Request that the transition stop early.
    ///
    /// Priority and completion action only ever increase; the first reason is
    /// kept until the controller clears it.
    pub fn abort(&mut self, priority: i32, action: CompletionAction, reason: &str) {
        if self.completion_action < action {
            debug!(
                transition = self.id,
                from = %self.completion_action,
                to = %action,
                "raising completion action"
            );
            self.completion_action = action;
        }
        if priority > self.abort_priority {
            debug!(
                transition = self.id,
                from = self.abort_priority,
                to = priority,
                "raising abort priority"
            );
            self.abort_priority = priority;
        }
        if self.abort_reason.is_none() {
            self.abort_reason = Some(reason.to_string());
        }
        info!(
            transition = self.id,
            priority, action = %action, reason, "transition aborted"
        );
    }

    // -----------------------------------------------------------------------
    // Executor: one pass
    // -----------------------------------------------------------------------

    /// Run one pass over the graph.
    pub fn run<F: GraphFunctions + ?Sized>(&mut self, fns: &mut F) -> PassResult {
        let mut fire_failed = false;
        self.counters = PassCounters::default();
        trace!(transition = self.id, "entering graph callback");

        for synapse in &self.synapses {
            if synapse.is_confirmed() {
                self.counters.completed += 1;
            } else if synapse.status == SynapseStatus::Executing {
                self.counters.pending += 1;
            }
        }

        for pos in 0..self.synapses.len() {
            if self.batch_limit > 0 && self.counters.pending >= self.batch_limit as usize {
                debug!(
                    batch_limit = self.batch_limit,
                    "throttling output: batch limit reached"
                );
                break;
            }
            match self.synapses[pos].status {
                SynapseStatus::Failed | SynapseStatus::Skipped => {
                    self.counters.skipped += 1;
                    continue;
                }
                SynapseStatus::Confirmed | SynapseStatus::Executing => continue,
                SynapseStatus::Unfired | SynapseStatus::Ready => {}
            }

            match self.should_fire(pos, fns) {
                FireDecision::Fire => {
                    let id = self.synapses[pos].id;
                    trace!(synapse = id, "synapse fired");
                    self.counters.fired += 1;
                    if !self.fire_synapse(pos, fns) {
                        error!(synapse = id, "synapse failed to fire");
                        fire_failed = true;
                        self.abort_priority = INFINITY;
                        if self.abort_reason.is_none() {
                            self.abort_reason = Some("action initiation failed".to_string());
                        }
                        self.counters.incomplete += 1;
                        self.counters.skipped += 1;
                        self.counters.fired -= 1;
                    }
                    if !self.synapses[pos].is_confirmed() {
                        self.counters.pending += 1;
                    }
                }
                FireDecision::Skip => {
                    self.counters.skipped += 1;
                    self.counters.incomplete += 1;
                }
                FireDecision::Defer => {
                    trace!(synapse = self.synapses[pos].id, "synapse cannot fire");
                    self.counters.incomplete += 1;
                }
            }
        }

        let result = self.classify();
        self.log_pass(result, fire_failed);
        result
    }

    fn classify(&mut self) -> PassResult {
        let c = self.counters;
        if c.pending == 0 && c.fired == 0 {
            self.complete = true;
            if c.incomplete != 0 && self.abort_priority <= 0 {
                PassResult::Terminated
            } else if c.skipped != 0 {
                PassResult::Stopped
            } else {
                PassResult::Complete
            }
        } else if c.fired == 0 {
            PassResult::Pending
        } else {
            PassResult::Active
        }
    }

    fn log_pass(&self, result: PassResult, fire_failed: bool) {
        let c = self.counters;
        let source = self.source.as_str();
        if fire_failed {
            error!(
                transition = self.id,
                complete = c.completed,
                pending = c.pending,
                fired = c.fired,
                skipped = c.skipped,
                incomplete = c.incomplete,
                source,
                "transition {}",
                result
            );
        } else if result == PassResult::Terminated {
            warn!(
                transition = self.id,
                complete = c.completed,
                pending = c.pending,
                fired = c.fired,
                skipped = c.skipped,
                incomplete = c.incomplete,
                source,
                "transition {}",
                result
            );
        } else if result.is_terminal() {
            info!(
                transition = self.id,
                complete = c.completed,
                pending = c.pending,
                fired = c.fired,
                skipped = c.skipped,
                incomplete = c.incomplete,
                source,
                "transition {}",
                result
            );
        } else {
            debug!(
                transition = self.id,
                complete = c.completed,
                pending = c.pending,
                fired = c.fired,
                skipped = c.skipped,
                incomplete = c.incomplete,
                source,
                "transition {}",
                result
            );
        }
    }

    /// Readiness check for an unfired synapse.
    fn should_fire<F: GraphFunctions + ?Sized>(&mut self, pos: usize, fns: &mut F) -> FireDecision {
        let synapse = &self.synapses[pos];
        if synapse.is_executed() || synapse.is_confirmed() {
            error!(
                synapse = synapse.id,
                "readiness check on a synapse that already fired"
            );
            return FireDecision::Defer;
        }

        trace!(synapse = synapse.id, "checking pre-reqs");
        if !self.inputs_satisfied(synapse) {
            return FireDecision::Defer;
        }

        let id = synapse.id;
        let priority = synapse.priority;
        let slots = synapse.actions.clone();
        self.synapses[pos].status = SynapseStatus::Ready;

        for slot in slots {
            let action = &self.actions[slot];
            if action.is_pseudo() {
                continue;
            }
            if priority < self.abort_priority {
                trace!(
                    synapse = id,
                    abort_priority = self.abort_priority,
                    "skipping synapse: abort level"
                );
                self.synapses[pos].status = SynapseStatus::Skipped;
                return FireDecision::Skip;
            }
            let action_id = action.id;
            if !fns.allowed(self, action_id) {
                trace!(synapse = id, action = action_id.0, "deferring synapse: not allowed");
                return FireDecision::Defer;
            }
        }
        FireDecision::Fire
    }

    fn inputs_satisfied(&self, synapse: &Synapse) -> bool {
        for input in &synapse.inputs {
            let prereq = &self.actions[input.slot];
            if !input.satisfied {
                trace!(
                    input = prereq.id.0,
                    synapse = synapse.id,
                    "input not satisfied: not confirmed"
                );
                return false;
            }
            if prereq.status.is_failed() && !prereq.can_fail && synapse.priority < INFINITY {
                trace!(
                    input = prereq.id.0,
                    synapse = synapse.id,
                    "input not satisfied: failed"
                );
                return false;
            }
        }
        true
    }

    /// Fire every action of a ready synapse, failing fast.
    fn fire_synapse<F: GraphFunctions + ?Sized>(&mut self, pos: usize, fns: &mut F) -> bool {
        let synapse = &self.synapses[pos];
        if synapse.is_confirmed() {
            return true;
        }
        if !synapse.is_ready() {
            error!(synapse = synapse.id, "firing a synapse that is not ready");
            return false;
        }

        let id = synapse.id;
        let slots = synapse.actions.clone();
        self.synapses[pos].status = SynapseStatus::Executing;
        for slot in slots {
            if !self.initiate_action(slot, fns) {
                let action = &mut self.actions[slot];
                error!(
                    action = action.id.0,
                    kind = %action.kind,
                    synapse = id,
                    "failed initiating action"
                );
                action.status = ActionStatus::Failed(FailureKind::Initiation);
                self.synapses[pos].status = SynapseStatus::Failed;
                return false;
            }
        }
        true
    }

    fn initiate_action<F: GraphFunctions + ?Sized>(&mut self, slot: usize, fns: &mut F) -> bool {
        let action = &mut self.actions[slot];
        if action.status.is_executed() {
            error!(action = action.id.0, "action initiated twice");
            return false;
        }
        action.status = ActionStatus::Executed;
        let id = action.id;
        let label = action.label();
        let handler = match (action.kind, action.task()) {
            (ActionType::Pseudo, _) => Handler::Pseudo,
            (ActionType::Resource, _) => Handler::Resource,
            (ActionType::ClusterEvent, Some(TASK_FENCE)) => Handler::Fence,
            (ActionType::ClusterEvent, Some(_)) => Handler::CrmEvent,
            (ActionType::ClusterEvent, None) => {
                error!(action = id.0, "cluster event without a task");
                return false;
            }
        };

        match handler {
            Handler::Pseudo => {
                trace!(action = id.0, label, "executing pseudo-event");
                fns.pseudo(self, id)
            }
            Handler::Resource => {
                trace!(action = id.0, label, "executing rsc-event");
                fns.resource(self, id)
            }
            Handler::Fence => {
                trace!(action = id.0, label, "executing fencing event");
                fns.fence(self, id)
            }
            Handler::CrmEvent => {
                trace!(action = id.0, label, "executing crm-event");
                fns.crm_event(self, id)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Executor: completion feedback
    // -----------------------------------------------------------------------

    /// Propagate the completion of `id` through the graph.
    ///
    /// Returns whether anything changed; callers use it to decide whether
    /// another pass is worthwhile.
    pub fn update(&mut self, id: ActionId) -> bool {
        let Some(&slot) = self.index.get(&id) else {
            warn!(action = id.0, "update for unknown action");
            return false;
        };
        let failed = self.actions[slot].status.is_failed();
        let can_fail = self.actions[slot].can_fail;

        let mut updates = false;
        for pos in 0..self.synapses.len() {
            let changed = match self.synapses[pos].status {
                SynapseStatus::Confirmed | SynapseStatus::Failed | SynapseStatus::Skipped => false,
                SynapseStatus::Executing => self.update_synapse_confirmed(pos, slot),
                SynapseStatus::Unfired | SynapseStatus::Ready => {
                    if !failed || can_fail || self.synapses[pos].priority == INFINITY {
                        self.update_synapse_ready(pos, slot)
                    } else {
                        false
                    }
                }
            };
            updates |= changed;
        }

        if updates {
            trace!(action = id.0, "updated graph with completed action");
        }
        updates
    }

    fn update_synapse_ready(&mut self, pos: usize, slot: usize) -> bool {
        let mut updates = false;
        let synapse = &mut self.synapses[pos];
        for input in synapse.inputs.iter_mut() {
            if input.slot == slot && !input.satisfied {
                trace!(
                    input = self.actions[slot].id.0,
                    synapse = synapse.id,
                    "marking input confirmed"
                );
                input.satisfied = true;
                updates = true;
            }
        }

        if updates && self.inputs_satisfied(&self.synapses[pos]) {
            self.synapses[pos].status = SynapseStatus::Ready;
        }
        updates
    }

    fn update_synapse_confirmed(&mut self, pos: usize, slot: usize) -> bool {
        let mut updates = false;
        let mut is_confirmed = true;
        for &member in &self.synapses[pos].actions {
            let action = &mut self.actions[member];
            if member == slot {
                if !action.status.is_confirmed() {
                    trace!(action = action.id.0, synapse = self.synapses[pos].id, "confirmed");
                    action.status = ActionStatus::Confirmed;
                    updates = true;
                }
            } else if !action.status.is_confirmed() {
                is_confirmed = false;
            }
        }

        if is_confirmed {
            trace!(synapse = self.synapses[pos].id, "synapse confirmed");
            self.synapses[pos].status = SynapseStatus::Confirmed;
            updates = true;
        }
        updates
    }
}

/// Which dispatch handler an action goes to.
enum Handler {
    Pseudo,
    Resource,
    CrmEvent,
    Fence,
}
