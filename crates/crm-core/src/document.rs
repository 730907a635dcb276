//! Declarative transition graph documents.
//!
//! The policy engine's output is consumed as a JSON or YAML document:
//!
//! ```yaml
//! transition_id: 12
//! source: pe-input-40
//! batch_limit: 0
//! migration_limit: -1
//! synapses:
//!   - id: 0
//!     priority: 0
//!     actions:
//!       - id: 3
//!         type: rsc_op
//!         task: start
//!         key: db_start_0
//!         target: node1
//!         target_uuid: "1"
//!         params:
//!           CRM_meta_timeout: "20000"
//!     inputs: [2]
//! ```

use crate::action::{Action, ActionId, Operation, ResourceRef};
use crate::config::{EngineConfig, GraphOverrides};
use crate::error::Result;
use crate::graph::Graph;
use crate::types::ActionType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDocument {
    pub transition_id: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(default)]
    pub batch_limit: Option<i32>,
    #[serde(default = "default_migration_limit")]
    pub migration_limit: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_delay: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stonith_timeout: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_delay: Option<i64>,
    #[serde(default)]
    pub synapses: Vec<SynapseDocument>,
}

fn default_migration_limit() -> i32 {
    -1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynapseDocument {
    pub id: i32,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub actions: Vec<ActionDocument>,
    /// Ids of prerequisite actions owned by other synapses.
    #[serde(default)]
    pub inputs: Vec<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDocument {
    pub id: i32,
    #[serde(rename = "type")]
    pub kind: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceRef>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
    /// Explicit timeout in milliseconds; otherwise `CRM_meta_timeout`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i64>,
    #[serde(default)]
    pub can_fail: bool,
}

impl ActionDocument {
    fn meta(&self, name: &str) -> Option<i64> {
        self.params
            .get(&format!("{}{name}", crate::types::META_PREFIX))
            .and_then(|v| v.trim().parse().ok())
    }

    /// Effective timeout: the explicit value or `CRM_meta_timeout`, plus any
    /// `CRM_meta_start_delay`.
    pub fn effective_timeout(&self) -> i64 {
        let base = self.timeout.or_else(|| self.meta("timeout")).unwrap_or(0);
        base.saturating_add(self.meta("start_delay").unwrap_or(0))
    }

    fn to_action(&self) -> Action {
        let mut action = Action::new(
            self.id,
            self.kind,
            Operation {
                task: self.task.clone(),
                key: self.key.clone(),
                target: self.target.clone(),
                target_uuid: self.target_uuid.clone(),
                router: self.router.clone(),
                resource: self.resource.clone(),
                params: self.params.clone(),
                timeout_ms: self.effective_timeout(),
            },
        );
        action.can_fail = self.can_fail;
        action
    }
}

impl GraphDocument {
    pub fn load(path: &Path) -> Result<Self> {
        let mut doc: GraphDocument = crate::io::load_structured(path)?;
        if doc.source.is_empty() {
            doc.source = path.display().to_string();
        }
        Ok(doc)
    }

    /// Which timing values this document sets itself.
    pub fn overrides(&self) -> GraphOverrides {
        GraphOverrides {
            network_delay: self.network_delay.is_some(),
            stonith_timeout: self.stonith_timeout.is_some(),
            transition_delay: self.transition_delay.is_some(),
            batch_limit: self.batch_limit.is_some(),
        }
    }

    /// Build an executable graph.
    ///
    /// Actions are registered before any input is resolved, so an input may
    /// name an action of a later synapse. Duplicate action ids and inputs that
    /// name no action are rejected.
    pub fn into_graph(&self) -> Result<Graph> {
        let mut graph = Graph::new(self.transition_id);
        graph.source = self.source.clone();
        graph.migration_limit = self.migration_limit;
        if let Some(limit) = self.batch_limit {
            graph.batch_limit = limit;
        }
        if let Some(delay) = self.network_delay {
            graph.network_delay = delay;
        }
        if let Some(timeout) = self.stonith_timeout {
            graph.stonith_timeout = timeout;
        }
        if let Some(delay) = self.transition_delay {
            graph.transition_delay = delay;
        }

        let mut positions = Vec::with_capacity(self.synapses.len());
        for synapse in &self.synapses {
            let pos = graph.add_synapse(synapse.id, synapse.priority);
            for action in &synapse.actions {
                graph.add_action(pos, action.to_action())?;
            }
            positions.push(pos);
        }
        for (synapse, pos) in self.synapses.iter().zip(positions) {
            for input in &synapse.inputs {
                graph.add_input(pos, ActionId(*input))?;
            }
        }
        Ok(graph)
    }

    /// Build a graph, taking unset timing values from `config`.
    pub fn into_graph_with(&self, config: &EngineConfig) -> Result<Graph> {
        let mut graph = self.into_graph()?;
        config.apply_defaults(&mut graph, &self.overrides());
        Ok(graph)
    }
}
