//! Dry-run execution.
//!
//! The simulator pretends every action completes the moment it is
//! dispatched, so a graph can be walked to its terminal result without a
//! cluster. Failures can be injected by action id or operation key to see
//! how aborts and `can_fail` propagate.

use crate::action::{ActionId, FailureKind};
use crate::controller::{Controller, Notification};
use crate::functions::GraphFunctions;
use crate::graph::{Graph, PassCounters};
use crate::synapse::SynapseStatus;
use crate::types::{ActionType, CompletionAction, PassResult, INFINITY};
use serde::Serialize;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_PASSES: usize = 1_000;

#[derive(Debug, Clone)]
pub struct SimulationOptions {
    /// Actions (by id or operation key) that run but report failure.
    pub fail: Vec<String>,
    /// Actions whose dispatch fails outright.
    pub fail_dispatch: Vec<i32>,
    pub max_passes: usize,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            fail: Vec::new(),
            fail_dispatch: Vec::new(),
            max_passes: DEFAULT_MAX_PASSES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SimOutcome {
    Confirmed,
    Failed,
    /// Failed, but the action may fail.
    Ignored,
    NotDispatched,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutedAction {
    pub pass: usize,
    pub id: i32,
    #[serde(rename = "type")]
    pub kind: ActionType,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub outcome: SimOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub transition: i32,
    pub source: String,
    pub result: PassResult,
    pub passes: usize,
    pub counters: PassCounters,
    pub abort_priority: i32,
    pub notification: Notification,
    pub executed: Vec<ExecutedAction>,
    /// Synapses vetoed by an abort.
    pub skipped: Vec<i32>,
    /// Synapses that never became ready.
    pub blocked: Vec<i32>,
}

impl SimulationReport {
    pub fn failed(&self) -> impl Iterator<Item = &ExecutedAction> {
        self.executed
            .iter()
            .filter(|a| matches!(a.outcome, SimOutcome::Failed | SimOutcome::NotDispatched))
    }
}

pub struct Simulator {
    options: SimulationOptions,
    pass: usize,
    executed: Vec<ExecutedAction>,
}

impl Simulator {
    pub fn new(options: SimulationOptions) -> Self {
        Self {
            options,
            pass: 0,
            executed: Vec::new(),
        }
    }

    /// Walk `graph` to a terminal pass result (or the pass limit).
    pub fn run(mut self, graph: &mut Graph) -> SimulationReport {
        let mut controller = Controller::new();
        controller.begin_transition(graph);

        let mut result = PassResult::Pending;
        while self.pass < self.options.max_passes {
            self.pass += 1;
            result = graph.run(&mut self);
            if result.is_terminal() {
                break;
            }
        }
        if !result.is_terminal() {
            warn!(
                transition = graph.id,
                passes = self.pass,
                "simulation stopped at the pass limit"
            );
        }

        let abort_priority = graph.abort_priority;
        let counters = graph.counters;
        let notification = controller.notify(graph, false);
        let by_status = |status: SynapseStatus| -> Vec<i32> {
            graph
                .synapses()
                .iter()
                .filter(|s| s.status == status)
                .map(|s| s.id)
                .collect()
        };
        let skipped = by_status(SynapseStatus::Skipped);
        let mut blocked = by_status(SynapseStatus::Unfired);
        blocked.extend(by_status(SynapseStatus::Ready));

        info!(
            transition = graph.id,
            result = %result,
            passes = self.pass,
            executed = self.executed.len(),
            "simulation finished"
        );
        SimulationReport {
            transition: graph.id,
            source: graph.source.clone(),
            result,
            passes: self.pass,
            counters,
            abort_priority,
            notification,
            executed: self.executed,
            skipped,
            blocked,
        }
    }

    fn should_fail(&self, graph: &Graph, id: ActionId) -> bool {
        let Some(action) = graph.action(id) else {
            return false;
        };
        let id = id.0.to_string();
        self.options
            .fail
            .iter()
            .any(|f| *f == id || action.op.key.as_deref() == Some(f.as_str()))
    }

    fn execute(&mut self, graph: &mut Graph, id: ActionId) -> bool {
        let Some(action) = graph.action(id) else {
            return false;
        };
        let mut entry = ExecutedAction {
            pass: self.pass,
            id: id.0,
            kind: action.kind,
            label: action.label(),
            target: action.target().map(str::to_string),
            outcome: SimOutcome::Confirmed,
        };
        let can_fail = action.can_fail;

        if self.options.fail_dispatch.contains(&id.0) {
            debug!(action = id.0, "simulating dispatch failure");
            entry.outcome = SimOutcome::NotDispatched;
            self.executed.push(entry);
            return false;
        }

        if !action.is_pseudo() && self.should_fail(graph, id) {
            if can_fail {
                info!(action = id.0, label = %entry.label, "pretending action failed (ignored)");
                entry.outcome = SimOutcome::Ignored;
            } else {
                info!(action = id.0, label = %entry.label, "pretending action failed");
                graph.fail_action(id, FailureKind::Execution);
                graph.abort(INFINITY, CompletionAction::Restart, "Event failed");
                entry.outcome = SimOutcome::Failed;
            }
        } else {
            debug!(action = id.0, label = %entry.label, "pretending action succeeded");
        }

        graph.confirm_action(id);
        graph.update(id);
        self.executed.push(entry);
        true
    }
}

impl GraphFunctions for Simulator {
    fn pseudo(&mut self, graph: &mut Graph, action: ActionId) -> bool {
        self.execute(graph, action)
    }

    fn resource(&mut self, graph: &mut Graph, action: ActionId) -> bool {
        self.execute(graph, action)
    }

    fn crm_event(&mut self, graph: &mut Graph, action: ActionId) -> bool {
        self.execute(graph, action)
    }

    fn fence(&mut self, graph: &mut Graph, action: ActionId) -> bool {
        if let Some(target) = graph.action(action).and_then(|a| a.target()) {
            info!(target, "fencing node");
        }
        self.execute(graph, action)
    }
}
