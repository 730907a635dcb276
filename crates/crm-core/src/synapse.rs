use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// SynapseStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a synapse.
///
/// Transitions: `Unfired → Ready → Executing → Confirmed | Failed`, and
/// `Unfired | Ready → Skipped` when an abort vetoes it. Never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynapseStatus {
    #[default]
    Unfired,
    /// All inputs satisfied; waiting for throttle budget.
    Ready,
    /// Fired; waiting for its actions to be confirmed.
    Executing,
    Confirmed,
    Failed,
    Skipped,
}

impl SynapseStatus {
    pub fn is_executed(self) -> bool {
        matches!(
            self,
            SynapseStatus::Executing | SynapseStatus::Confirmed | SynapseStatus::Failed
        )
    }

    /// Fire failures confirm the synapse as well as failing it.
    pub fn is_confirmed(self) -> bool {
        matches!(self, SynapseStatus::Confirmed | SynapseStatus::Failed)
    }

    pub fn is_settled(self) -> bool {
        matches!(
            self,
            SynapseStatus::Confirmed | SynapseStatus::Failed | SynapseStatus::Skipped
        )
    }
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// A synapse's view of one prerequisite action in another synapse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Input {
    /// Arena slot of the prerequisite action.
    pub slot: usize,
    /// Completion of the prerequisite has been propagated to this synapse.
    pub satisfied: bool,
}

// ---------------------------------------------------------------------------
// Synapse
// ---------------------------------------------------------------------------

/// A group of actions that fire together once every input is satisfied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Synapse {
    pub id: i32,
    pub priority: i32,
    pub status: SynapseStatus,
    /// Arena slots of the actions owned by this synapse, in firing order.
    pub actions: Vec<usize>,
    pub inputs: Vec<Input>,
}

impl Synapse {
    pub fn new(id: i32, priority: i32) -> Self {
        Self {
            id,
            priority,
            status: SynapseStatus::Unfired,
            actions: Vec::new(),
            inputs: Vec::new(),
        }
    }

    pub fn is_executed(&self) -> bool {
        self.status.is_executed()
    }

    pub fn is_confirmed(&self) -> bool {
        self.status.is_confirmed()
    }

    pub fn is_failed(&self) -> bool {
        self.status == SynapseStatus::Failed
    }

    pub fn is_ready(&self) -> bool {
        self.status == SynapseStatus::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_counts_as_confirmed_and_executed() {
        assert!(SynapseStatus::Failed.is_confirmed());
        assert!(SynapseStatus::Failed.is_executed());
        assert!(!SynapseStatus::Skipped.is_executed());
        assert!(SynapseStatus::Skipped.is_settled());
        assert!(!SynapseStatus::Ready.is_settled());
    }
}
