//! Interfaces to the parts of the cluster the engine drives but does not own.

use crate::action::{Action, ActionId, Operation};
use crate::error::Result;
use crate::types::{ActionType, OpStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Handle for an outstanding fencing request.
pub type CallId = u64;

/// Request sent to the node that carries out an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: ActionId,
    #[serde(rename = "type")]
    pub kind: ActionType,
    pub task: String,
    /// Encoded [`TransitionKey`](crate::key::TransitionKey); echoed back with
    /// the result.
    pub transition_key: String,
    /// Node the action runs on.
    pub target: String,
    pub op: Operation,
}

/// Outcome of a dispatched action, as reported by the node that ran it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub transition_key: String,
    pub status: OpStatus,
    pub rc: i32,
}

impl ActionResult {
    pub fn new(transition_key: impl Into<String>, status: OpStatus, rc: i32) -> Self {
        Self {
            transition_key: transition_key.into(),
            status,
            rc,
        }
    }
}

/// Cluster messaging.
pub trait ClusterMessenger {
    /// Deliver `request` to `peer`. Returns false if it could not be sent.
    fn send(&mut self, peer: &str, request: &ActionRequest) -> bool;
}

/// Writes action and node status into the replicated configuration store.
pub trait StatusRecorder {
    /// Record a synthetic operation result (pending or timed out) for a
    /// resource action.
    fn send_status_update(&mut self, action: &Action, status: OpStatus, rc: i32) -> Result<()>;

    /// Record that `target` was fenced at `at`.
    fn record_node_fenced(&mut self, target: &str, uuid: &str, at: DateTime<Utc>) -> Result<()>;
}

/// The fencing subsystem.
pub trait FencingService {
    /// Start fencing `target` with the given flavour (`reboot`, `off`, ...).
    /// The outcome arrives later, tagged with the returned call id.
    fn fence(&mut self, target: &str, kind: &str, timeout: Duration) -> Result<CallId>;

    /// Declare `target` safe without fencing it.
    fn confirm(&mut self, target: &str) -> Result<()>;
}

/// Everything the live engine needs from the rest of the cluster.
pub trait Cluster: ClusterMessenger + StatusRecorder + FencingService {}

impl<T: ClusterMessenger + StatusRecorder + FencingService> Cluster for T {}
