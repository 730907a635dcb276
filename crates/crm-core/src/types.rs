use serde::{Deserialize, Serialize};
use std::fmt;

/// Cluster score infinity. Synapses at this priority are never vetoed by an
/// abort.
pub const INFINITY: i32 = 1_000_000;

/// Task name of a fencing cluster event.
pub const TASK_FENCE: &str = "stonith";
/// Task name of a node shutdown cluster event.
pub const TASK_SHUTDOWN: &str = "do_shutdown";
pub const TASK_MIGRATE_TO: &str = "migrate_to";
pub const TASK_MIGRATE_FROM: &str = "migrate_from";
pub const TASK_CANCEL: &str = "cancel";
pub const TASK_DELETE: &str = "delete";

/// Prefix of operation meta-parameters in an action's parameter set.
pub const META_PREFIX: &str = "CRM_meta_";

// ---------------------------------------------------------------------------
// ActionType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    /// Ordering marker; confirmed as soon as it fires.
    #[serde(rename = "pseudo_event")]
    Pseudo,
    /// Resource operation executed by a node's local executor.
    #[serde(rename = "rsc_op")]
    Resource,
    /// Cluster control event (shutdown, fencing, ...).
    #[serde(rename = "crm_event")]
    ClusterEvent,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::Pseudo => "pseudo_event",
            ActionType::Resource => "rsc_op",
            ActionType::ClusterEvent => "crm_event",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionType {
    type Err = crate::error::CrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pseudo_event" | "pseudo" => Ok(ActionType::Pseudo),
            "rsc_op" | "resource" => Ok(ActionType::Resource),
            "crm_event" | "cluster_event" => Ok(ActionType::ClusterEvent),
            _ => Err(crate::error::CrmError::InvalidActionType(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// CompletionAction
// ---------------------------------------------------------------------------

/// What the controller should do once the graph finishes.
///
/// Ordered by severity: an abort may only raise it.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CompletionAction {
    #[default]
    Done,
    Stop,
    Restart,
    Shutdown,
}

impl CompletionAction {
    pub fn as_str(self) -> &'static str {
        match self {
            CompletionAction::Done => "done",
            CompletionAction::Stop => "stop",
            CompletionAction::Restart => "restart",
            CompletionAction::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CompletionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CompletionAction {
    type Err = crate::error::CrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "done" => Ok(CompletionAction::Done),
            "stop" => Ok(CompletionAction::Stop),
            "restart" => Ok(CompletionAction::Restart),
            "shutdown" => Ok(CompletionAction::Shutdown),
            _ => Err(crate::error::CrmError::InvalidCompletionAction(
                s.to_string(),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// PassResult
// ---------------------------------------------------------------------------

/// Outcome of one executor pass over the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassResult {
    /// New work was started; more callbacks are expected.
    Active,
    /// Nothing new started but confirmations are outstanding.
    Pending,
    /// Everything that could run has run.
    Complete,
    /// Finished, but some synapses were skipped by an abort or failed.
    Stopped,
    /// Finished with unresolved dependencies and no recorded abort.
    Terminated,
}

impl PassResult {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PassResult::Complete | PassResult::Stopped | PassResult::Terminated
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PassResult::Active => "In-progress",
            PassResult::Pending => "Pending",
            PassResult::Complete => "Complete",
            PassResult::Stopped => "Stopped",
            PassResult::Terminated => "Terminated",
        }
    }
}

impl fmt::Display for PassResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Operation status
// ---------------------------------------------------------------------------

/// Execution status reported for an operation, independent of its exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpStatus {
    Pending,
    Done,
    Cancelled,
    TimedOut,
    NotSupported,
    Error,
}

impl OpStatus {
    pub fn code(self) -> i32 {
        match self {
            OpStatus::Pending => -1,
            OpStatus::Done => 0,
            OpStatus::Cancelled => 1,
            OpStatus::TimedOut => 2,
            OpStatus::NotSupported => 3,
            OpStatus::Error => 4,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(OpStatus::Pending),
            0 => Some(OpStatus::Done),
            1 => Some(OpStatus::Cancelled),
            2 => Some(OpStatus::TimedOut),
            3 => Some(OpStatus::NotSupported),
            4 => Some(OpStatus::Error),
            _ => None,
        }
    }
}

impl fmt::Display for OpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OpStatus::Pending => "pending",
            OpStatus::Done => "complete",
            OpStatus::Cancelled => "cancelled",
            OpStatus::TimedOut => "timed out",
            OpStatus::NotSupported => "not supported",
            OpStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Exit code recorded for an operation whose result is not known yet.
pub const RC_UNKNOWN: i32 = 193;
