//! Live dispatch handlers.
//!
//! `TransitionEngine` is the [`GraphFunctions`] implementation used when a
//! graph is executed for real: resource operations and cluster events are
//! sent to peers with a transition key and guarded by timers, fencing goes to
//! the fencing service, and throttling goes through the per-peer ledger.
//! Results arrive later through [`TransitionEngine::process_result`],
//! [`TransitionEngine::fencing_result`] and
//! [`TransitionEngine::action_timed_out`].

pub mod collaborators;

pub use collaborators::{
    ActionRequest, ActionResult, CallId, Cluster, ClusterMessenger, FencingService,
    StatusRecorder,
};

use crate::action::{Action, ActionId, FailureKind};
use crate::config::EngineConfig;
use crate::error::{CrmError, Result};
use crate::functions::GraphFunctions;
use crate::graph::Graph;
use crate::key::TransitionKey;
use crate::throttle::{PeerLedger, ThrottlePolicy};
use crate::timer::TimerScheduler;
use crate::types::{CompletionAction, OpStatus, INFINITY, RC_UNKNOWN, TASK_SHUTDOWN};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// An outstanding fencing request.
#[derive(Debug, Clone)]
struct FenceCall {
    action: ActionId,
    transition: i32,
    target: String,
    uuid: String,
}

pub struct TransitionEngine<C, T> {
    cluster: C,
    timers: T,
    policy: Box<dyn ThrottlePolicy + Send>,
    ledger: PeerLedger,
    uuid: String,
    local_node: String,
    max_fence_attempts: u32,
    expected_down: BTreeSet<String>,
    fence_calls: HashMap<CallId, FenceCall>,
    fence_failures: BTreeMap<String, u32>,
    pass_requested: bool,
}

impl<C: Cluster, T: TimerScheduler> TransitionEngine<C, T> {
    pub fn new(config: &EngineConfig, cluster: C, timers: T) -> Self {
        Self {
            cluster,
            timers,
            policy: Box::new(config.throttle.clone()),
            ledger: PeerLedger::new(),
            uuid: uuid::Uuid::new_v4().to_string(),
            local_node: config.node.clone(),
            max_fence_attempts: config.fencing.max_attempts,
            expected_down: BTreeSet::new(),
            fence_calls: HashMap::new(),
            fence_failures: BTreeMap::new(),
            pass_requested: false,
        }
    }

    /// Replace the job limit source (defaults to the configured limits).
    pub fn with_policy(mut self, policy: impl ThrottlePolicy + Send + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Identity of this engine instance, embedded in every transition key.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    pub fn cluster_mut(&mut self) -> &mut C {
        &mut self.cluster
    }

    pub fn timers(&self) -> &T {
        &self.timers
    }

    pub fn timers_mut(&mut self) -> &mut T {
        &mut self.timers
    }

    pub fn ledger(&self) -> &PeerLedger {
        &self.ledger
    }

    pub fn is_expected_down(&self, node: &str) -> bool {
        self.expected_down.contains(node)
    }

    pub fn fence_failures(&self, target: &str) -> u32 {
        self.fence_failures.get(target).copied().unwrap_or(0)
    }

    /// Whether some fencing target has failed too often to keep retrying.
    pub fn too_many_fence_failures(&self) -> bool {
        self.fence_failures
            .iter()
            .any(|(_, &count)| count >= self.max_fence_attempts)
    }

    /// Consume a pending request for another executor pass.
    pub fn take_pass_request(&mut self) -> bool {
        std::mem::take(&mut self.pass_requested)
    }

    pub fn request_pass(&mut self) {
        self.pass_requested = true;
    }

    // -----------------------------------------------------------------------
    // Transition lifecycle
    // -----------------------------------------------------------------------

    /// Prepare for executing `graph`: job counts start from zero.
    pub fn start_transition(&mut self, graph: &Graph) {
        info!(
            transition = graph.id,
            source = %graph.source,
            synapses = graph.synapses().len(),
            "starting transition"
        );
        self.ledger.reset();
        self.pass_requested = true;
    }

    /// Mark an action confirmed and give back its job slot, at most once.
    pub fn action_confirmed(&mut self, graph: &mut Graph, id: ActionId) {
        if let Some(action) = graph.action_mut(id) {
            if action.counted {
                self.ledger.record_action(action, -1);
                action.counted = false;
            }
        }
        graph.confirm_action(id);
    }

    fn key_for(&self, graph: &Graph, action: &Action) -> TransitionKey {
        TransitionKey::new(action.id.0, graph.id, action.target_rc(), self.uuid.as_str())
    }

    fn request_for(&self, graph: &Graph, action: &Action, task: &str, target: &str) -> ActionRequest {
        ActionRequest {
            action: action.id,
            kind: action.kind,
            task: task.to_string(),
            transition_key: self.key_for(graph, action).encode(),
            target: target.to_string(),
            op: action.op.clone(),
        }
    }

    /// Coerce a missing timeout and arm the action's timer.
    fn start_action_timer(&mut self, graph: &mut Graph, id: ActionId) {
        let network_delay = graph.network_delay;
        let Some(action) = graph.action_mut(id) else {
            return;
        };
        if action.op.timeout_ms <= 0 {
            warn!(
                action = id.0,
                label = %action.label(),
                timeout_ms = action.op.timeout_ms,
                using_ms = network_delay,
                "action had an invalid timeout"
            );
            action.op.timeout_ms = network_delay;
        }
        let total = action.op.timeout_ms.saturating_add(network_delay).max(0) as u64;
        self.timers.set_timer(id, Duration::from_millis(total));
    }

    // -----------------------------------------------------------------------
    // Results
    // -----------------------------------------------------------------------

    /// Apply the result of a dispatched action.
    ///
    /// Results for another engine instance or another transition are
    /// rejected. Returns whether the graph changed.
    pub fn process_result(&mut self, graph: &mut Graph, result: &ActionResult) -> Result<bool> {
        let key = TransitionKey::decode(&result.transition_key)?;
        if key.uuid != self.uuid {
            return Err(CrmError::ForeignResult {
                expected: self.uuid.clone(),
                got: key.uuid,
            });
        }
        if key.transition != graph.id {
            return Err(CrmError::StaleResult {
                expected: graph.id,
                got: key.transition,
            });
        }
        let id = ActionId(key.action);
        let action = graph
            .action(id)
            .ok_or(CrmError::ActionNotFound(key.action))?;
        if action.status.is_confirmed() {
            debug!(action = id.0, "result for an action that is already confirmed");
            self.timers.cancel_timer(id);
            return Ok(false);
        }

        let target_rc = if key.target_rc >= 0 {
            key.target_rc
        } else {
            action.target_rc()
        };
        let failed = result.status != OpStatus::Done || result.rc != target_rc;
        let can_fail = action.can_fail;
        let label = action.label();
        self.timers.cancel_timer(id);

        if failed && can_fail {
            info!(
                action = id.0,
                label = %label,
                status = %result.status,
                rc = result.rc,
                "ignoring failure of an action that may fail"
            );
        } else if failed {
            warn!(
                action = id.0,
                label = %label,
                status = %result.status,
                rc = result.rc,
                expected_rc = target_rc,
                "action failed"
            );
            graph.fail_action(id, FailureKind::Execution);
            graph.abort(INFINITY, CompletionAction::Restart, "Event failed");
        } else {
            info!(action = id.0, label = %label, rc = result.rc, "action confirmed");
        }

        self.action_confirmed(graph, id);
        graph.update(id);
        self.request_pass();
        Ok(true)
    }

    /// Handle an expired action timer. Returns whether the action was still
    /// waiting for a result.
    pub fn action_timed_out(&mut self, graph: &mut Graph, id: ActionId) -> bool {
        let Some(action) = graph.action(id) else {
            warn!(action = id.0, "timer popped for unknown action");
            return false;
        };
        if action.status.is_confirmed() {
            debug!(action = id.0, "timer popped for a confirmed action");
            return false;
        }
        warn!(
            action = id.0,
            label = %action.label(),
            timeout_ms = action.op.timeout_ms,
            abort_priority = graph.abort_priority,
            "action timed out"
        );

        graph.fail_action(id, FailureKind::TimedOut);
        let needs_update = graph
            .action(id)
            .map(|a| a.is_resource_op() && !a.sent_update)
            .unwrap_or(false);
        if needs_update {
            self.record_status(graph, id, OpStatus::TimedOut, RC_UNKNOWN);
        }
        self.action_confirmed(graph, id);
        graph.update(id);
        self.request_pass();
        true
    }

    fn record_status(&mut self, graph: &mut Graph, id: ActionId, status: OpStatus, rc: i32) {
        let Some(action) = graph.action(id) else {
            return;
        };
        match self.cluster.send_status_update(action, status, rc) {
            Ok(()) => {
                if let Some(action) = graph.action_mut(id) {
                    action.sent_update = true;
                }
            }
            Err(e) => warn!(action = id.0, error = %e, "could not record operation status"),
        }
    }

    /// Apply the outcome of a fencing request.
    pub fn fencing_result(
        &mut self,
        graph: &mut Graph,
        call: CallId,
        outcome: std::result::Result<(), String>,
    ) -> Result<bool> {
        let fence = self
            .fence_calls
            .remove(&call)
            .ok_or(CrmError::UnknownFenceCall(call))?;
        if fence.transition != graph.id {
            return Err(CrmError::StaleResult {
                expected: graph.id,
                got: fence.transition,
            });
        }

        match outcome {
            Ok(()) => self.node_fenced(graph, &fence),
            Err(reason) => {
                let failures = self.fence_failures.entry(fence.target.clone()).or_insert(0);
                *failures += 1;
                error!(
                    target = %fence.target,
                    call,
                    failures = *failures,
                    reason = %reason,
                    "fencing failed"
                );
                graph.fail_action(fence.action, FailureKind::Execution);
                graph.abort(INFINITY, CompletionAction::Restart, "Stonith failed");
                self.action_confirmed(graph, fence.action);
                graph.update(fence.action);
                self.request_pass();
            }
        }
        Ok(true)
    }

    fn node_fenced(&mut self, graph: &mut Graph, fence: &FenceCall) {
        info!(target = %fence.target, action = fence.action.0, "node fenced");
        if let Err(e) = self
            .cluster
            .record_node_fenced(&fence.target, &fence.uuid, Utc::now())
        {
            warn!(target = %fence.target, error = %e, "could not record fencing");
        }
        self.fence_failures.remove(&fence.target);
        self.expected_down.remove(&fence.target);
        self.action_confirmed(graph, fence.action);
        graph.update(fence.action);
        self.request_pass();
    }

    /// Declare `target` safe without fencing it. Outstanding fencing requests
    /// for it in this transition complete as if they had succeeded.
    pub fn confirm_node_safe(&mut self, graph: &mut Graph, target: &str) -> Result<bool> {
        self.cluster.confirm(target)?;
        let calls: Vec<CallId> = self
            .fence_calls
            .iter()
            .filter(|(_, f)| f.target == target && f.transition == graph.id)
            .map(|(&call, _)| call)
            .collect();
        for call in &calls {
            if let Some(fence) = self.fence_calls.remove(call) {
                self.node_fenced(graph, &fence);
            }
        }
        Ok(!calls.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

impl<C: Cluster, T: TimerScheduler> GraphFunctions for TransitionEngine<C, T> {
    fn pseudo(&mut self, graph: &mut Graph, id: ActionId) -> bool {
        debug!(action = id.0, "pseudo action fired and confirmed");
        self.action_confirmed(graph, id);
        graph.update(id);
        self.request_pass();
        true
    }

    fn resource(&mut self, graph: &mut Graph, id: ActionId) -> bool {
        let Some(action) = graph.action(id).cloned() else {
            return false;
        };
        let Some(target) = action.target() else {
            error!(action = id.0, label = %action.label(), "corrupted command: no node");
            return false;
        };
        let route = action.route().unwrap_or(target);
        let is_local = route == self.local_node;
        let no_wait = action.no_wait();
        info!(
            action = id.0,
            task = action.task().unwrap_or_default(),
            label = %action.label(),
            target,
            local = is_local,
            no_wait,
            "initiating action"
        );

        let request = self.request_for(graph, &action, action.task().unwrap_or_default(), target);
        if !self.cluster.send(route, &request) {
            error!(action = id.0, peer = route, "action failed: send");
            return false;
        }

        if no_wait {
            info!(action = id.0, "action confirmed - no wait");
            graph.confirm_action(id);
            graph.update(id);
            self.request_pass();
        } else if graph
            .action(id)
            .map(|a| a.status.is_confirmed())
            .unwrap_or(false)
        {
            debug!(action = id.0, "action was already confirmed");
        } else {
            self.ledger.record_action(&action, 1);
            if let Some(a) = graph.action_mut(id) {
                a.counted = true;
            }
            self.start_action_timer(graph, id);
        }

        if action.record_pending() {
            debug!(action = id.0, label = %action.label(), "recording pending operation");
            self.record_status(graph, id, OpStatus::Pending, RC_UNKNOWN);
        }
        true
    }

    fn crm_event(&mut self, graph: &mut Graph, id: ActionId) -> bool {
        let Some(action) = graph.action(id).cloned() else {
            return false;
        };
        let task = action.task().unwrap_or_default();
        let Some(target) = action.target() else {
            error!(action = id.0, task, "corrupted command: no node");
            return false;
        };
        let route = action.route().unwrap_or(target);
        let is_local = route == self.local_node;
        let no_wait = action.no_wait();
        info!(
            action = id.0,
            task,
            target,
            local = is_local,
            no_wait,
            "executing crm-event"
        );

        if task == TASK_SHUTDOWN {
            if is_local {
                info!(action = id.0, "crm-event is a local shutdown");
                graph.completion_action = CompletionAction::Shutdown;
                graph.abort_reason = Some("local shutdown".to_string());
                self.action_confirmed(graph, id);
                graph.update(id);
                self.request_pass();
                return true;
            }
            self.expected_down.insert(route.to_string());
        }

        let request = self.request_for(graph, &action, task, target);
        if !self.cluster.send(route, &request) {
            error!(action = id.0, peer = route, "action failed: send");
            return false;
        }

        if no_wait {
            self.action_confirmed(graph, id);
            graph.update(id);
            self.request_pass();
        } else {
            self.start_action_timer(graph, id);
        }
        true
    }

    fn fence(&mut self, graph: &mut Graph, id: ActionId) -> bool {
        let Some(action) = graph.action(id) else {
            return false;
        };
        let (Some(target), Some(uuid), Some(kind)) = (
            action.target(),
            action.op.target_uuid.as_deref().filter(|u| !u.is_empty()),
            action.stonith_action(),
        ) else {
            warn!(
                action = id.0,
                target = ?action.target(),
                uuid = ?action.op.target_uuid,
                kind = ?action.stonith_action(),
                "bad fencing action"
            );
            return false;
        };
        let (target, uuid, kind) = (target.to_string(), uuid.to_string(), kind.to_string());
        info!(
            action = id.0,
            kind = %kind,
            target = %target,
            timeout_ms = graph.stonith_timeout,
            "executing fencing operation"
        );

        let timeout = Duration::from_millis(graph.stonith_timeout.max(0) as u64);
        match self.cluster.fence(&target, &kind, timeout) {
            Ok(call) => {
                self.fence_calls.insert(
                    call,
                    FenceCall {
                        action: id,
                        transition: graph.id,
                        target,
                        uuid,
                    },
                );
                true
            }
            Err(e) => {
                error!(action = id.0, target = %target, error = %e, "fencing request rejected");
                false
            }
        }
    }

    fn allowed(&mut self, graph: &Graph, id: ActionId) -> bool {
        match graph.action(id) {
            Some(action) => self.ledger.may_fire(graph, action, self.policy.as_ref()),
            None => false,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::graph::tests::{pseudo, rsc};
    use crate::synapse::SynapseStatus;
    use crate::timer::ManualTimers;
    use crate::types::{ActionType, PassResult};
    use chrono::{DateTime, Utc};
    use std::collections::HashSet;

    /// In-process stand-in for messaging, the status store and fencing.
    #[derive(Default)]
    pub(crate) struct FakeCluster {
        pub sent: Vec<(String, ActionRequest)>,
        pub unreachable: HashSet<String>,
        pub updates: Vec<(ActionId, OpStatus, i32)>,
        pub fenced: Vec<(String, String)>,
        pub fence_requests: Vec<(String, String, Duration)>,
        pub confirmed: Vec<String>,
        next_call: CallId,
    }

    impl ClusterMessenger for FakeCluster {
        fn send(&mut self, peer: &str, request: &ActionRequest) -> bool {
            if self.unreachable.contains(peer) {
                return false;
            }
            self.sent.push((peer.to_string(), request.clone()));
            true
        }
    }

    impl StatusRecorder for FakeCluster {
        fn send_status_update(&mut self, action: &Action, status: OpStatus, rc: i32) -> Result<()> {
            self.updates.push((action.id, status, rc));
            Ok(())
        }

        fn record_node_fenced(&mut self, target: &str, uuid: &str, _at: DateTime<Utc>) -> Result<()> {
            self.fenced.push((target.to_string(), uuid.to_string()));
            Ok(())
        }
    }

    impl FencingService for FakeCluster {
        fn fence(&mut self, target: &str, kind: &str, timeout: Duration) -> Result<CallId> {
            self.next_call += 1;
            self.fence_requests
                .push((target.to_string(), kind.to_string(), timeout));
            Ok(self.next_call)
        }

        fn confirm(&mut self, target: &str) -> Result<()> {
            self.confirmed.push(target.to_string());
            Ok(())
        }
    }

    pub(crate) fn engine() -> TransitionEngine<FakeCluster, ManualTimers> {
        TransitionEngine::new(&EngineConfig::new("n1"), FakeCluster::default(), ManualTimers::new())
    }

    fn single(action: Action) -> Graph {
        let mut g = Graph::new(7);
        let s = g.add_synapse(0, 0);
        g.add_action(s, action).unwrap();
        g
    }

    fn fence_action(id: i32, target: &str) -> Action {
        let mut a = rsc(id, "stonith", target);
        a.kind = ActionType::ClusterEvent;
        a.op
            .params
            .insert("CRM_meta_stonith_action".to_string(), "reboot".to_string());
        a
    }

    fn key_of(engine: &TransitionEngine<FakeCluster, ManualTimers>, i: usize) -> String {
        engine.cluster().sent[i].1.transition_key.clone()
    }

    #[test]
    fn resource_action_is_sent_counted_and_timed() {
        let mut g = single(rsc(1, "start", "n2"));
        g.network_delay = 1_000;
        let mut e = engine();
        e.start_transition(&g);

        assert_eq!(g.run(&mut e), PassResult::Active);
        let (peer, request) = &e.cluster().sent[0];
        assert_eq!(peer, "n2");
        assert_eq!(request.task, "start");
        let key = TransitionKey::decode(&request.transition_key).unwrap();
        assert_eq!((key.action, key.transition, key.target_rc), (1, 7, 0));
        assert_eq!(key.uuid, e.uuid());

        assert_eq!(e.ledger().get("n2").jobs, 1);
        assert!(g.action(ActionId(1)).unwrap().counted);
        assert_eq!(
            e.timers().deadline(ActionId(1)),
            Some(Duration::from_millis(21_000))
        );
    }

    #[test]
    fn oversized_timeout_saturates() {
        let mut a = rsc(1, "start", "n2");
        a.op.timeout_ms = i64::MAX;
        let mut g = single(a);
        g.network_delay = 1_000;
        let mut e = engine();

        assert_eq!(g.run(&mut e), PassResult::Active);
        assert_eq!(
            e.timers().deadline(ActionId(1)),
            Some(Duration::from_millis(i64::MAX as u64))
        );
        assert!(e.timers_mut().advance(Duration::from_secs(3600)).is_empty());
    }

    #[test]
    fn routed_actions_go_to_the_router() {
        let mut a = rsc(1, "start", "remote1");
        a.op.router = Some("n3".to_string());
        let mut g = single(a);
        let mut e = engine();
        g.run(&mut e);
        assert_eq!(e.cluster().sent[0].0, "n3");
        assert_eq!(e.cluster().sent[0].1.target, "remote1");
        assert_eq!(e.ledger().get("n3").jobs, 1);
    }

    #[test]
    fn send_failure_is_an_initiation_failure() {
        let mut g = single(rsc(1, "start", "n2"));
        let mut e = engine();
        e.cluster_mut().unreachable.insert("n2".to_string());
        assert_eq!(g.run(&mut e), PassResult::Stopped);
        assert_eq!(
            g.action(ActionId(1)).unwrap().status,
            crate::action::ActionStatus::Failed(FailureKind::Initiation)
        );
        assert_eq!(g.abort_priority, INFINITY);
        assert_eq!(e.timers().active_count(), 0);
        assert_eq!(e.ledger().get("n2").jobs, 0);
    }

    #[test]
    fn missing_target_fails_dispatch() {
        let mut a = rsc(1, "start", "n2");
        a.op.target = None;
        let mut g = single(a);
        let mut e = engine();
        assert_eq!(g.run(&mut e), PassResult::Stopped);
        assert!(e.cluster().sent.is_empty());
    }

    #[test]
    fn no_wait_confirms_without_a_slot() {
        let mut a = rsc(1, "start", "n2");
        a.op.params
            .insert("CRM_meta_op_no_wait".to_string(), "true".to_string());
        let mut g = single(a);
        let mut e = engine();
        g.run(&mut e);
        assert_eq!(g.synapses()[0].status, SynapseStatus::Confirmed);
        assert_eq!(e.ledger().get("n2").jobs, 0);
        assert_eq!(e.timers().active_count(), 0);
        assert!(e.take_pass_request());
        assert_eq!(g.run(&mut e), PassResult::Complete);
    }

    #[test]
    fn invalid_timeout_is_coerced_to_network_delay() {
        let mut a = rsc(1, "start", "n2");
        a.op.timeout_ms = 0;
        let mut g = single(a);
        g.network_delay = 5_000;
        let mut e = engine();
        g.run(&mut e);
        assert_eq!(g.action(ActionId(1)).unwrap().op.timeout_ms, 5_000);
        assert_eq!(
            e.timers().deadline(ActionId(1)),
            Some(Duration::from_millis(10_000))
        );
    }

    #[test]
    fn record_pending_writes_a_status_entry() {
        let mut a = rsc(1, "start", "n2");
        a.op.params
            .insert("CRM_meta_record_pending".to_string(), "true".to_string());
        let mut g = single(a);
        let mut e = engine();
        g.run(&mut e);
        assert_eq!(
            e.cluster().updates,
            vec![(ActionId(1), OpStatus::Pending, RC_UNKNOWN)]
        );
        assert!(g.action(ActionId(1)).unwrap().sent_update);
    }

    #[test]
    fn successful_result_confirms_and_releases_slot() {
        let mut g = single(rsc(1, "start", "n2"));
        let mut e = engine();
        e.start_transition(&g);
        g.run(&mut e);
        e.take_pass_request();

        let result = ActionResult::new(key_of(&e, 0), OpStatus::Done, 0);
        assert!(e.process_result(&mut g, &result).unwrap());
        assert_eq!(e.ledger().get("n2").jobs, 0);
        assert!(!g.action(ActionId(1)).unwrap().counted);
        assert_eq!(e.timers().active_count(), 0);
        assert!(e.take_pass_request());
        assert_eq!(g.run(&mut e), PassResult::Complete);

        // A duplicate report changes nothing and never double-decrements.
        assert!(!e.process_result(&mut g, &result).unwrap());
        assert_eq!(e.ledger().get("n2").jobs, 0);
    }

    #[test]
    fn unexpected_rc_fails_and_aborts() {
        let mut g = single(rsc(1, "start", "n2"));
        let mut e = engine();
        g.run(&mut e);
        let result = ActionResult::new(key_of(&e, 0), OpStatus::Done, 1);
        e.process_result(&mut g, &result).unwrap();

        let action = g.action(ActionId(1)).unwrap();
        assert_eq!(
            action.status,
            crate::action::ActionStatus::Failed(FailureKind::Execution)
        );
        assert_eq!(g.abort_priority, INFINITY);
        assert_eq!(g.completion_action, CompletionAction::Restart);
        assert_eq!(g.abort_reason.as_deref(), Some("Event failed"));
        assert_eq!(e.ledger().get("n2").jobs, 0);
    }

    #[test]
    fn can_fail_failure_is_ignored() {
        let mut a = rsc(1, "start", "n2");
        a.can_fail = true;
        let mut g = single(a);
        let mut e = engine();
        g.run(&mut e);
        let result = ActionResult::new(key_of(&e, 0), OpStatus::Error, 1);
        e.process_result(&mut g, &result).unwrap();
        assert_eq!(
            g.action(ActionId(1)).unwrap().status,
            crate::action::ActionStatus::Confirmed
        );
        assert_eq!(g.abort_priority, 0);
    }

    #[test]
    fn foreign_and_stale_results_are_rejected() {
        let mut g = single(rsc(1, "start", "n2"));
        let mut e = engine();
        g.run(&mut e);

        let foreign = TransitionKey::new(1, 7, 0, "00000000-0000-0000-0000-000000000000");
        assert!(matches!(
            e.process_result(&mut g, &ActionResult::new(foreign.encode(), OpStatus::Done, 0)),
            Err(CrmError::ForeignResult { .. })
        ));

        let stale = TransitionKey::new(1, 6, 0, e.uuid());
        assert!(matches!(
            e.process_result(&mut g, &ActionResult::new(stale.encode(), OpStatus::Done, 0)),
            Err(CrmError::StaleResult {
                expected: 7,
                got: 6
            })
        ));

        let unknown = TransitionKey::new(99, 7, 0, e.uuid());
        assert!(matches!(
            e.process_result(&mut g, &ActionResult::new(unknown.encode(), OpStatus::Done, 0)),
            Err(CrmError::ActionNotFound(99))
        ));
    }

    #[test]
    fn timeout_fails_action_and_records_status() {
        let mut g = single(rsc(1, "start", "n2"));
        let mut e = engine();
        g.run(&mut e);

        let expired = e.timers_mut().expire_next();
        assert_eq!(expired, vec![ActionId(1)]);
        assert!(e.action_timed_out(&mut g, ActionId(1)));

        let action = g.action(ActionId(1)).unwrap();
        assert_eq!(
            action.status,
            crate::action::ActionStatus::Failed(FailureKind::TimedOut)
        );
        assert!(action.sent_update);
        assert_eq!(
            e.cluster().updates,
            vec![(ActionId(1), OpStatus::TimedOut, RC_UNKNOWN)]
        );
        assert_eq!(e.ledger().get("n2").jobs, 0);
        // Timeouts do not escalate the abort.
        assert_eq!(g.abort_priority, 0);

        // A late result after the timeout is a no-op.
        let late = ActionResult::new(key_of(&e, 0), OpStatus::Done, 0);
        assert!(!e.process_result(&mut g, &late).unwrap());
        assert!(!e.action_timed_out(&mut g, ActionId(1)));
        assert_eq!(e.ledger().get("n2").jobs, 0);
    }

    #[test]
    fn local_shutdown_completes_last() {
        let mut a = rsc(1, "do_shutdown", "n1");
        a.kind = ActionType::ClusterEvent;
        let mut g = single(a);
        let mut e = engine();
        g.run(&mut e);
        assert!(e.cluster().sent.is_empty());
        assert_eq!(g.completion_action, CompletionAction::Shutdown);
        assert_eq!(g.abort_reason.as_deref(), Some("local shutdown"));
        assert_eq!(g.synapses()[0].status, SynapseStatus::Confirmed);
    }

    #[test]
    fn remote_shutdown_marks_peer_expected_down() {
        let mut a = rsc(1, "do_shutdown", "n2");
        a.kind = ActionType::ClusterEvent;
        let mut g = single(a);
        let mut e = engine();
        g.run(&mut e);
        assert!(e.is_expected_down("n2"));
        assert_eq!(e.cluster().sent.len(), 1);
        assert_eq!(e.timers().active_count(), 1);
        // Cluster events never take job slots.
        assert_eq!(e.ledger().get("n2").jobs, 0);
    }

    #[test]
    fn fencing_success_records_the_node() {
        let mut g = single(fence_action(1, "n2"));
        g.stonith_timeout = 30_000;
        let mut e = engine();
        g.run(&mut e);
        assert_eq!(
            e.cluster().fence_requests,
            vec![(
                "n2".to_string(),
                "reboot".to_string(),
                Duration::from_secs(30)
            )]
        );
        assert!(e.fencing_result(&mut g, 1, Ok(())).unwrap());
        assert_eq!(e.cluster().fenced, vec![("n2".to_string(), "n2".to_string())]);
        assert_eq!(g.synapses()[0].status, SynapseStatus::Confirmed);
        assert!(matches!(
            e.fencing_result(&mut g, 1, Ok(())),
            Err(CrmError::UnknownFenceCall(1))
        ));
    }

    #[test]
    fn fencing_failure_aborts_and_counts() {
        let mut g = single(fence_action(1, "n2"));
        let mut e = engine();
        g.run(&mut e);
        e.fencing_result(&mut g, 1, Err("device timeout".to_string()))
            .unwrap();
        assert_eq!(e.fence_failures("n2"), 1);
        assert_eq!(g.abort_reason.as_deref(), Some("Stonith failed"));
        assert!(g.action(ActionId(1)).unwrap().status.is_failed());
        assert!(!e.too_many_fence_failures());
    }

    #[test]
    fn repeated_fencing_failures_become_excessive() {
        let mut config = EngineConfig::new("n1");
        config.fencing.max_attempts = 2;
        let mut e = TransitionEngine::new(&config, FakeCluster::default(), ManualTimers::new());
        for call in 1..=2 {
            let mut g = single(fence_action(1, "n2"));
            g.run(&mut e);
            e.fencing_result(&mut g, call, Err("no route".to_string()))
                .unwrap();
        }
        assert!(e.too_many_fence_failures());
    }

    #[test]
    fn incomplete_fencing_action_is_rejected() {
        let mut a = fence_action(1, "n2");
        a.op.params.clear();
        let mut g = single(a);
        let mut e = engine();
        assert_eq!(g.run(&mut e), PassResult::Stopped);
        assert!(e.cluster().fence_requests.is_empty());
    }

    #[test]
    fn manual_confirmation_completes_fencing() {
        let mut g = single(fence_action(1, "n2"));
        let mut e = engine();
        g.run(&mut e);
        assert!(e.confirm_node_safe(&mut g, "n2").unwrap());
        assert_eq!(e.cluster().confirmed, vec!["n2".to_string()]);
        assert_eq!(g.synapses()[0].status, SynapseStatus::Confirmed);
        assert!(!e.confirm_node_safe(&mut g, "n2").unwrap());
    }

    #[test]
    fn pseudo_actions_use_no_timers() {
        let mut g = single(pseudo(1));
        let mut e = engine();
        g.run(&mut e);
        assert_eq!(g.synapses()[0].status, SynapseStatus::Confirmed);
        assert_eq!(e.timers().active_count(), 0);
        assert!(e.cluster().sent.is_empty());
    }

    #[test]
    fn job_limit_defers_until_a_slot_frees() {
        let mut g = Graph::new(7);
        for i in 0..2 {
            let s = g.add_synapse(i, 0);
            g.add_action(s, rsc(i + 1, "start", "n2")).unwrap();
        }
        let mut config = EngineConfig::new("n1");
        config.throttle.node_limits.insert("n2".to_string(), 1);
        let mut e = TransitionEngine::new(&config, FakeCluster::default(), ManualTimers::new());
        e.start_transition(&g);

        assert_eq!(g.run(&mut e), PassResult::Active);
        assert_eq!(e.cluster().sent.len(), 1);
        assert_eq!(g.synapses()[1].status, SynapseStatus::Ready);

        let result = ActionResult::new(key_of(&e, 0), OpStatus::Done, 0);
        e.process_result(&mut g, &result).unwrap();
        assert_eq!(g.run(&mut e), PassResult::Active);
        assert_eq!(e.cluster().sent.len(), 2);
    }
}
