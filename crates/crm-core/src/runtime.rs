//! Tokio event loop driving one transition.
//!
//! ```text
//!  results / fencing / aborts ──► EngineHandle ──┐
//!                                                ▼
//!  TokioTimers (sleep tasks) ──────────► mpsc::UnboundedReceiver<EngineEvent>
//!                                                │
//!                                   TransitionLoop (sole owner of Graph,
//!                                   TransitionEngine and Controller)
//! ```
//!
//! Everything that mutates the graph happens on the loop task; other tasks
//! only post events.

use crate::action::ActionId;
use crate::config::EngineConfig;
use crate::controller::{Controller, Notification};
use crate::engine::{ActionResult, CallId, Cluster, TransitionEngine};
use crate::graph::Graph;
use crate::timer::TimerScheduler;
use crate::types::{CompletionAction, PassResult, INFINITY};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Input to the transition loop.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    ActionResult(ActionResult),
    FencingResult {
        call: CallId,
        outcome: std::result::Result<(), String>,
    },
    Timeout(ActionId),
    Abort {
        priority: i32,
        action: CompletionAction,
        reason: String,
    },
    /// An administrator declared a node safe without fencing.
    NodeConfirmed(String),
    /// The local node was asked to shut down.
    Shutdown,
}

// ---------------------------------------------------------------------------
// TokioTimers
// ---------------------------------------------------------------------------

/// Timer scheduler backed by `tokio::time::sleep` tasks.
pub struct TokioTimers {
    tx: mpsc::UnboundedSender<EngineEvent>,
    handles: HashMap<ActionId, JoinHandle<()>>,
}

impl TokioTimers {
    pub fn new(tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self {
            tx,
            handles: HashMap::new(),
        }
    }

    pub fn active_count(&self) -> usize {
        self.handles.values().filter(|h| !h.is_finished()).count()
    }

    /// Forget a timer whose expiry has been delivered.
    fn expired(&mut self, action: ActionId) {
        self.handles.remove(&action);
    }

    /// Disarm every timer.
    pub fn clear(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }
}

impl TimerScheduler for TokioTimers {
    fn set_timer(&mut self, action: ActionId, after: Duration) {
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(EngineEvent::Timeout(action));
        });
        if let Some(old) = self.handles.insert(action, handle) {
            old.abort();
        }
    }

    fn cancel_timer(&mut self, action: ActionId) -> bool {
        match self.handles.remove(&action) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

impl Drop for TokioTimers {
    fn drop(&mut self) {
        self.clear();
    }
}

// ---------------------------------------------------------------------------
// EngineHandle
// ---------------------------------------------------------------------------

/// Cloneable sender for posting events to a running [`TransitionLoop`].
///
/// Every method returns false once the loop has finished.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EngineHandle {
    pub fn send(&self, event: EngineEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn action_result(&self, result: ActionResult) -> bool {
        self.send(EngineEvent::ActionResult(result))
    }

    pub fn fencing_result(&self, call: CallId, outcome: std::result::Result<(), String>) -> bool {
        self.send(EngineEvent::FencingResult { call, outcome })
    }

    pub fn abort(&self, priority: i32, action: CompletionAction, reason: impl Into<String>) -> bool {
        self.send(EngineEvent::Abort {
            priority,
            action,
            reason: reason.into(),
        })
    }

    pub fn confirm_node(&self, target: impl Into<String>) -> bool {
        self.send(EngineEvent::NodeConfirmed(target.into()))
    }

    pub fn shutdown(&self) -> bool {
        self.send(EngineEvent::Shutdown)
    }
}

// ---------------------------------------------------------------------------
// TransitionLoop
// ---------------------------------------------------------------------------

/// How a transition ended.
pub struct TransitionOutcome<C> {
    pub result: PassResult,
    pub notification: Notification,
    pub graph: Graph,
    pub engine: TransitionEngine<C, TokioTimers>,
}

pub struct TransitionLoop<C> {
    graph: Graph,
    engine: TransitionEngine<C, TokioTimers>,
    controller: Controller,
    rx: mpsc::UnboundedReceiver<EngineEvent>,
}

impl<C: Cluster> TransitionLoop<C> {
    pub fn new(graph: Graph, config: &EngineConfig, cluster: C) -> (Self, EngineHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = TransitionEngine::new(config, cluster, TokioTimers::new(tx.clone()));
        let this = Self {
            graph,
            engine,
            controller: Controller::new(),
            rx,
        };
        (this, EngineHandle { tx })
    }

    pub fn engine(&self) -> &TransitionEngine<C, TokioTimers> {
        &self.engine
    }

    /// Run passes and apply events until the graph reaches a terminal result.
    pub async fn run(mut self) -> TransitionOutcome<C> {
        self.controller.begin_transition(&self.graph);
        self.engine.start_transition(&self.graph);

        loop {
            while self.engine.take_pass_request() {
                let result = self.graph.run(&mut self.engine);
                if result.is_terminal() {
                    return self.finish(result);
                }
            }

            let Some(event) = self.rx.recv().await else {
                // Unreachable while the timers hold a sender, but a closed
                // channel must not spin.
                warn!(transition = self.graph.id, "event channel closed");
                self.graph
                    .abort(INFINITY, CompletionAction::Restart, "event channel closed");
                let result = self.graph.run(&mut self.engine);
                return self.finish(result);
            };
            self.apply(event);
        }
    }

    fn apply(&mut self, event: EngineEvent) {
        debug!(transition = self.graph.id, event = ?event, "engine event");
        match event {
            EngineEvent::ActionResult(result) => {
                if let Err(e) = self.engine.process_result(&mut self.graph, &result) {
                    warn!(key = %result.transition_key, error = %e, "ignoring action result");
                }
            }
            EngineEvent::FencingResult { call, outcome } => {
                if let Err(e) = self.engine.fencing_result(&mut self.graph, call, outcome) {
                    warn!(call, error = %e, "ignoring fencing result");
                }
            }
            EngineEvent::Timeout(action) => {
                self.engine.timers_mut().expired(action);
                self.engine.action_timed_out(&mut self.graph, action);
            }
            EngineEvent::Abort {
                priority,
                action,
                reason,
            } => {
                self.graph.abort(priority, action, &reason);
                self.engine.request_pass();
            }
            EngineEvent::NodeConfirmed(target) => {
                if let Err(e) = self.engine.confirm_node_safe(&mut self.graph, &target) {
                    warn!(target = %target, error = %e, "could not confirm node");
                }
            }
            EngineEvent::Shutdown => {
                info!(transition = self.graph.id, "shutdown requested");
                self.controller.shutdown_requested = true;
                self.graph
                    .abort(INFINITY, CompletionAction::Stop, "Shutdown requested");
                self.engine.request_pass();
            }
        }
    }

    fn finish(mut self, result: PassResult) -> TransitionOutcome<C> {
        self.engine.timers_mut().clear();
        let excessive = self.engine.too_many_fence_failures();
        let notification = self.controller.notify(&mut self.graph, excessive);
        TransitionOutcome {
            result,
            notification,
            graph: self.graph,
            engine: self.engine,
        }
    }
}
