//! Dispatch capability set used by the graph executor.
//!
//! The executor never knows how an action is carried out. Callers hand it a
//! `GraphFunctions` implementation: the live transition engine sends requests
//! to peers and starts timers, the simulator confirms everything in-process.

use crate::action::ActionId;
use crate::graph::Graph;

/// Handlers the executor dispatches actions through.
///
/// Each dispatch method returns `true` when the action was successfully
/// *initiated*; the real outcome of asynchronous actions arrives later through
/// [`Graph::update`]. `false` means initiation itself failed, which fails the
/// whole synapse immediately.
pub trait GraphFunctions {
    fn pseudo(&mut self, graph: &mut Graph, action: ActionId) -> bool;

    fn resource(&mut self, graph: &mut Graph, action: ActionId) -> bool;

    fn crm_event(&mut self, graph: &mut Graph, action: ActionId) -> bool;

    fn fence(&mut self, graph: &mut Graph, action: ActionId) -> bool;

    /// Policy gate consulted before a non-pseudo action fires. Rejection
    /// defers the synapse to a later pass.
    fn allowed(&mut self, _graph: &Graph, _action: ActionId) -> bool {
        true
    }
}

/// Outcome of a readiness check on an unfired synapse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireDecision {
    Fire,
    /// Not now: inputs unsatisfied or throttled. Try again next pass.
    Defer,
    /// Vetoed by an abort; the synapse will never fire.
    Skip,
}
