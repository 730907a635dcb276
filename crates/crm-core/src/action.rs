//! Actions: the unit of cluster work in a transition graph.
//!
//! An `Action` pairs an operation descriptor (what to run, where) with an
//! explicit status. Actions are created once when a graph is loaded, owned by
//! the graph's action arena and referenced by synapses through arena slots.

use crate::types::{
    ActionType, META_PREFIX, TASK_CANCEL, TASK_DELETE, TASK_FENCE, TASK_MIGRATE_FROM,
    TASK_MIGRATE_TO,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ActionId
// ---------------------------------------------------------------------------

/// Graph-unique numeric identity of an action, as emitted by the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(pub i32);

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ActionStatus
// ---------------------------------------------------------------------------

/// Why an action ended up failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The dispatch handler could not initiate it.
    Initiation,
    /// It ran and reported an unexpected result.
    Execution,
    /// Its timer expired before a result arrived.
    TimedOut,
}

/// Lifecycle state of an action.
///
/// Transitions: `Pending → Executed → Confirmed | Failed`. Both terminal
/// states imply the action was executed; `Failed` also counts as confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ActionStatus {
    #[default]
    Pending,
    Executed,
    Confirmed,
    Failed(FailureKind),
}

impl ActionStatus {
    pub fn is_executed(self) -> bool {
        !matches!(self, ActionStatus::Pending)
    }

    pub fn is_confirmed(self) -> bool {
        matches!(self, ActionStatus::Confirmed | ActionStatus::Failed(_))
    }

    pub fn is_failed(self) -> bool {
        matches!(self, ActionStatus::Failed(_))
    }
}

// ---------------------------------------------------------------------------
// Operation descriptor
// ---------------------------------------------------------------------------

/// Resource an operation acts on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// What an action does and where it runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Task name, e.g. `start`, `migrate_to`, `stonith`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    /// Operation key, e.g. `db_start_0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_uuid: Option<String>,
    /// Cluster node relaying the operation to a remote node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceRef>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
    /// Effective timeout in milliseconds.
    #[serde(default)]
    pub timeout_ms: i64,
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    #[serde(rename = "type")]
    pub kind: ActionType,
    pub op: Operation,
    #[serde(default)]
    pub status: ActionStatus,
    /// Failure of this action does not block its dependants.
    #[serde(default)]
    pub can_fail: bool,
    /// A status record has been persisted for this action.
    #[serde(default)]
    pub sent_update: bool,
    /// The action currently holds a slot in the peer job ledger.
    #[serde(default)]
    pub counted: bool,
}

impl Action {
    pub fn new(id: i32, kind: ActionType, op: Operation) -> Self {
        Self {
            id: ActionId(id),
            kind,
            op,
            status: ActionStatus::Pending,
            can_fail: false,
            sent_update: false,
            counted: false,
        }
    }

    pub fn is_pseudo(&self) -> bool {
        self.kind == ActionType::Pseudo
    }

    pub fn is_resource_op(&self) -> bool {
        self.kind == ActionType::Resource
    }

    pub fn is_fencing_op(&self) -> bool {
        self.kind == ActionType::ClusterEvent && self.task() == Some(TASK_FENCE)
    }

    pub fn is_migration(&self) -> bool {
        matches!(self.task(), Some(TASK_MIGRATE_TO) | Some(TASK_MIGRATE_FROM))
    }

    pub fn task(&self) -> Option<&str> {
        self.op.task.as_deref().filter(|t| !t.is_empty())
    }

    pub fn target(&self) -> Option<&str> {
        self.op.target.as_deref().filter(|t| !t.is_empty())
    }

    pub fn router(&self) -> Option<&str> {
        self.op.router.as_deref().filter(|t| !t.is_empty())
    }

    /// Node the request is sent to: the router when present, else the target.
    pub fn route(&self) -> Option<&str> {
        self.router().or_else(|| self.target())
    }

    /// Look up a `CRM_meta_<name>` parameter.
    pub fn meta(&self, name: &str) -> Option<&str> {
        self.op
            .params
            .get(&format!("{META_PREFIX}{name}"))
            .map(String::as_str)
    }

    fn meta_flag(&self, name: &str) -> bool {
        self.meta(name).map(is_true).unwrap_or(false)
    }

    /// The caller does not wait for a result.
    pub fn no_wait(&self) -> bool {
        self.meta_flag("op_no_wait")
    }

    /// A pending operation record should be written when it is sent.
    pub fn record_pending(&self) -> bool {
        self.meta_flag("record_pending")
            && !matches!(self.task(), Some(TASK_CANCEL) | Some(TASK_DELETE))
    }

    /// Expected exit code; anything else is a failure.
    pub fn target_rc(&self) -> i32 {
        self.meta("op_target_rc")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn migrate_source(&self) -> Option<&str> {
        self.meta("migrate_source").filter(|v| !v.is_empty())
    }

    pub fn migrate_target(&self) -> Option<&str> {
        self.meta("migrate_target").filter(|v| !v.is_empty())
    }

    /// Fencing flavour requested for a fencing event (`reboot`, `off`, ...).
    pub fn stonith_action(&self) -> Option<&str> {
        self.meta("stonith_action").filter(|v| !v.is_empty())
    }

    /// Short human-readable label for log lines.
    pub fn label(&self) -> String {
        match (self.op.key.as_deref(), self.task()) {
            (Some(key), _) => key.to_string(),
            (None, Some(task)) => task.to_string(),
            (None, None) => format!("action-{}", self.id),
        }
    }
}

/// Cluster boolean parsing: `true`, `yes`, `on`, `y`, `1` (any case).
pub fn is_true(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "on" | "y" | "1"
    )
}
