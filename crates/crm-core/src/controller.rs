//! What happens after a transition reaches a terminal pass result.
//!
//! The controller owns the coarse state of the resource manager (executing a
//! graph, computing a new one, idle) and turns a finished graph's
//! completion action into the next control event.

use crate::graph::Graph;
use crate::types::CompletionAction;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    /// A graph is being executed.
    TransitionEngine,
    /// A new graph is being computed.
    PolicyEngine,
    Idle,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ControllerState::TransitionEngine => "transition_engine",
            ControllerState::PolicyEngine => "policy_engine",
            ControllerState::Idle => "idle",
        };
        f.write_str(s)
    }
}

/// Event raised towards the surrounding state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "event", content = "after_ms")]
pub enum ControlEvent {
    /// The cluster reached the state the graph described.
    Success,
    /// Compute a new graph now.
    Recompute,
    /// Compute a new graph once the cooldown expires.
    StartCooldown(#[serde(serialize_with = "millis")] Duration),
    InvokePolicyEngine,
    Stop,
    Terminate,
}

fn millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Summary of how a transition ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub transition: i32,
    pub completion: CompletionAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Nothing further to do when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<ControlEvent>,
}

#[derive(Debug, Clone)]
pub struct Controller {
    pub state: ControllerState,
    /// A local shutdown was requested by the administrator.
    pub shutdown_requested: bool,
    in_transition: bool,
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller {
    pub fn new() -> Self {
        Self {
            state: ControllerState::Idle,
            shutdown_requested: false,
            in_transition: false,
        }
    }

    pub fn in_transition(&self) -> bool {
        self.in_transition
    }

    /// Enter the transition-engine state for a freshly loaded graph.
    pub fn begin_transition(&mut self, graph: &Graph) {
        debug!(transition = graph.id, from = %self.state, "beginning transition");
        self.state = ControllerState::TransitionEngine;
        self.in_transition = true;
    }

    /// Decide what follows a finished transition and reset the graph's
    /// completion bookkeeping.
    pub fn notify(&mut self, graph: &mut Graph, too_many_fence_failures: bool) -> Notification {
        let completion = graph.completion_action;
        let reason = graph.abort_reason.take();
        let in_te = self.state == ControllerState::TransitionEngine;

        if !graph.complete {
            error!(transition = graph.id, "notifying about an incomplete transition");
            graph.complete = true;
        }

        let event = match completion {
            CompletionAction::Done | CompletionAction::Stop => {
                in_te.then_some(ControlEvent::Success)
            }
            CompletionAction::Restart => {
                if in_te {
                    if too_many_fence_failures {
                        warn!(
                            transition = graph.id,
                            "too many fencing failures: not recomputing"
                        );
                        Some(ControlEvent::Success)
                    } else if graph.transition_delay > 0 {
                        Some(ControlEvent::StartCooldown(Duration::from_millis(
                            graph.transition_delay as u64,
                        )))
                    } else {
                        Some(ControlEvent::Recompute)
                    }
                } else if self.state == ControllerState::PolicyEngine {
                    Some(ControlEvent::InvokePolicyEngine)
                } else {
                    None
                }
            }
            CompletionAction::Shutdown => {
                if self.shutdown_requested {
                    info!(transition = graph.id, "shutting down");
                    Some(ControlEvent::Stop)
                } else {
                    error!(transition = graph.id, "we didn't ask to be shut down, yet our peers are");
                    Some(ControlEvent::Terminate)
                }
            }
        };

        info!(
            transition = graph.id,
            completion = %completion,
            reason = reason.as_deref().unwrap_or("-"),
            event = ?event,
            "transition finished"
        );

        graph.completion_action = CompletionAction::Done;
        self.in_transition = false;
        if matches!(
            event,
            Some(ControlEvent::Success | ControlEvent::Stop | ControlEvent::Terminate)
        ) {
            self.state = ControllerState::Idle;
        } else if matches!(
            event,
            Some(ControlEvent::Recompute | ControlEvent::StartCooldown(_))
        ) {
            self.state = ControllerState::PolicyEngine;
        }

        Notification {
            transition: graph.id,
            completion,
            reason,
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::INFINITY;

    fn finished(completion: CompletionAction) -> Graph {
        let mut g = Graph::new(3);
        g.complete = true;
        g.abort(INFINITY, completion, "because");
        g
    }

    fn in_te() -> Controller {
        let mut c = Controller::new();
        c.begin_transition(&Graph::new(3));
        c
    }

    #[test]
    fn done_is_success() {
        let mut g = Graph::new(3);
        g.complete = true;
        let mut c = in_te();
        assert!(c.in_transition());
        let n = c.notify(&mut g, false);
        assert_eq!(n.event, Some(ControlEvent::Success));
        assert_eq!(n.reason, None);
        assert!(!c.in_transition());
        assert_eq!(c.state, ControllerState::Idle);
    }

    #[test]
    fn stop_is_success_and_clears_reason() {
        let mut g = finished(CompletionAction::Stop);
        let n = in_te().notify(&mut g, false);
        assert_eq!(n.event, Some(ControlEvent::Success));
        assert_eq!(n.reason.as_deref(), Some("because"));
        assert!(g.abort_reason.is_none());
        assert_eq!(g.completion_action, CompletionAction::Done);
    }

    #[test]
    fn restart_recomputes_or_cools_down() {
        let mut g = finished(CompletionAction::Restart);
        let mut c = in_te();
        assert_eq!(c.notify(&mut g, false).event, Some(ControlEvent::Recompute));
        assert_eq!(c.state, ControllerState::PolicyEngine);

        let mut g = finished(CompletionAction::Restart);
        g.transition_delay = 2_500;
        assert_eq!(
            in_te().notify(&mut g, false).event,
            Some(ControlEvent::StartCooldown(Duration::from_millis(2_500)))
        );
    }

    #[test]
    fn restart_with_excessive_fencing_failures_stops_retrying() {
        let mut g = finished(CompletionAction::Restart);
        assert_eq!(in_te().notify(&mut g, true).event, Some(ControlEvent::Success));
    }

    #[test]
    fn restart_in_policy_engine_state_invokes_it() {
        let mut g = finished(CompletionAction::Restart);
        let mut c = Controller::new();
        c.state = ControllerState::PolicyEngine;
        assert_eq!(
            c.notify(&mut g, false).event,
            Some(ControlEvent::InvokePolicyEngine)
        );
    }

    #[test]
    fn shutdown_depends_on_request() {
        let mut g = finished(CompletionAction::Shutdown);
        let mut c = in_te();
        c.shutdown_requested = true;
        assert_eq!(c.notify(&mut g, false).event, Some(ControlEvent::Stop));
        assert_eq!(c.state, ControllerState::Idle);
        assert!(!c.in_transition());

        let mut g = finished(CompletionAction::Shutdown);
        let mut c = in_te();
        assert_eq!(c.notify(&mut g, false).event, Some(ControlEvent::Terminate));
        assert_eq!(c.state, ControllerState::Idle);
    }

    #[test]
    fn incomplete_graph_is_marked_complete() {
        let mut g = Graph::new(3);
        in_te().notify(&mut g, false);
        assert!(g.complete);
    }

    #[test]
    fn notification_serializes_cooldown_in_millis() {
        let n = Notification {
            transition: 1,
            completion: CompletionAction::Restart,
            reason: None,
            event: Some(ControlEvent::StartCooldown(Duration::from_secs(2))),
        };
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["event"]["event"], "start_cooldown");
        assert_eq!(json["event"]["after_ms"], 2000);
    }
}
