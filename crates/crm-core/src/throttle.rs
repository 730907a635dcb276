//! Per-peer job ledger.
//!
//! Caps how many resource operations run at once on a single node,
//! independently of the graph-wide batch limit. Actions on remote nodes are
//! charged to the cluster node routing them; migrations are charged to both
//! their source and target.

use crate::action::Action;
use crate::graph::Graph;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::trace;

/// Supplies the maximum number of concurrent resource operations per node.
pub trait ThrottlePolicy {
    fn job_limit(&self, node: &str) -> i32;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PeerJobs {
    pub jobs: i32,
    pub migrate_jobs: i32,
}

/// In-flight job counts per peer for the current transition.
#[derive(Debug, Clone, Default)]
pub struct PeerLedger {
    peers: BTreeMap<String, PeerJobs>,
}

impl PeerLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node: &str) -> PeerJobs {
        self.peers.get(node).copied().unwrap_or_default()
    }

    pub fn peers(&self) -> impl Iterator<Item = (&str, PeerJobs)> {
        self.peers.iter().map(|(k, v)| (k.as_str(), *v))
    }

    fn entry(&mut self, node: &str) -> &mut PeerJobs {
        self.peers.entry(node.to_string()).or_default()
    }

    /// Adjust a peer's job count, creating the entry on first use.
    pub fn record(&mut self, node: &str, delta: i32, is_migration: bool) {
        let peer = self.entry(node);
        peer.jobs += delta;
        if is_migration {
            peer.migrate_jobs += delta;
        }
        trace!(node, jobs = peer.jobs, migrate_jobs = peer.migrate_jobs, "job count");
    }

    /// Charge (`delta = 1`) or release (`delta = -1`) the peers an action runs on.
    ///
    /// Only resource operations are counted.
    pub fn record_action(&mut self, action: &Action, delta: i32) {
        if !action.is_resource_op() || action.target().is_none() {
            return;
        }
        if let Some(router) = action.router() {
            self.record(router, delta, false);
        } else if action.is_migration() {
            if let Some(source) = action.migrate_source() {
                self.record(source, delta, true);
            }
            if let Some(target) = action.migrate_target() {
                self.record(target, delta, true);
            }
        } else if let Some(target) = action.target() {
            self.record(target, delta, false);
        }
    }

    /// Whether `action` fits within the job limits of every peer it would use.
    pub fn may_fire(&self, graph: &Graph, action: &Action, policy: &dyn ThrottlePolicy) -> bool {
        if !action.is_resource_op() {
            return true;
        }
        if let Some(router) = action.router() {
            return self.may_fire_on(graph, action, Some(router), policy);
        }
        if action.is_migration() {
            return self.may_fire_on(graph, action, action.migrate_source(), policy)
                && self.may_fire_on(graph, action, action.migrate_target(), policy);
        }
        self.may_fire_on(graph, action, action.target(), policy)
    }

    fn may_fire_on(
        &self,
        graph: &Graph,
        action: &Action,
        node: Option<&str>,
        policy: &dyn ThrottlePolicy,
    ) -> bool {
        let Some(node) = node else {
            return true;
        };
        let peer = self.get(node);
        let limit = policy.job_limit(node);

        if peer.jobs >= limit {
            trace!(
                node,
                limit,
                jobs = peer.jobs,
                action = %action.label(),
                "peer is over its job limit: deferring"
            );
            return false;
        }
        if graph.migration_limit > 0
            && action.is_migration()
            && peer.migrate_jobs >= graph.migration_limit
        {
            trace!(
                node,
                limit = graph.migration_limit,
                migrate_jobs = peer.migrate_jobs,
                action = %action.label(),
                "peer is over its migration limit: deferring"
            );
            return false;
        }
        true
    }

    /// Zero every peer at the start of a new transition.
    pub fn reset(&mut self) {
        for peer in self.peers.values_mut() {
            *peer = PeerJobs::default();
        }
    }
}
