//! Decision tracing for the inliner
//!
//! Every removal, site failure and narration marker flows through an
//! [`InlinerTracer`]. The tracer counts reasons, keeps an ordered event log
//! and forwards messages to `tracing` once its level allows it. Call-graph
//! dumps are rendered as JSON.

use crate::call_site::{CallGraph, CallSiteId, CallTargetId, TargetState};
use crate::failure::FailureReason;
use crate::guard::VirtualGuardSelection;
use crate::ir::{CallKind, CallNodeId};
use core_types::MethodId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Verbosity of inliner tracing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TraceLevel {
    /// Count reasons only
    #[default]
    Off,
    /// Emit one line per decision
    Heuristic,
    /// Also emit call-graph dumps
    Debug,
}

/// One traced decision
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionEvent {
    /// Call node the decision is about
    pub call_node: CallNodeId,
    /// Method involved: the callee for targets, the selector for sites
    pub method: MethodId,
    /// Inline depth of the call
    pub depth: u32,
    /// Reason or narration marker
    pub reason: FailureReason,
}

#[derive(Debug, Serialize)]
struct TargetDump {
    target: String,
    callee: MethodId,
    name: String,
    guard: Option<VirtualGuardSelection>,
    size: u32,
    weight: u32,
    frequency: f32,
    state: TargetState,
    narration: Option<FailureReason>,
    callees: Vec<SiteDump>,
}

#[derive(Debug, Serialize)]
struct SiteDump {
    site: String,
    caller: MethodId,
    call_node: CallNodeId,
    bytecode_index: u32,
    depth: u32,
    kind: CallKind,
    selector: MethodId,
    visits: u32,
    in_loop: bool,
    always_called: bool,
    failure: Option<FailureReason>,
    targets: Vec<TargetDump>,
    removed: Vec<TargetDump>,
}

/// Records and narrates inlining decisions
#[derive(Debug, Clone)]
pub struct InlinerTracer {
    level: TraceLevel,
    log_id: String,
    counters: BTreeMap<FailureReason, u32>,
    events: Vec<DecisionEvent>,
}

impl InlinerTracer {
    /// Create a tracer
    pub fn new(level: TraceLevel) -> Self {
        Self {
            level,
            log_id: "inliner".to_string(),
            counters: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    /// Start tracing a new compilation
    pub fn begin(&mut self, method: MethodId) {
        self.reset();
        self.log_id = format!("inliner[{}]", method);
    }

    /// Identification prefix of every message
    pub fn log_id(&self) -> &str {
        &self.log_id
    }

    /// Active level
    pub fn level(&self) -> TraceLevel {
        self.level
    }

    /// Count `reason` once for `call`
    pub fn insert_counter(&mut self, reason: FailureReason, call: CallNodeId) {
        *self.counters.entry(reason).or_insert(0) += 1;
        tracing::trace!(
            log_id = %self.log_id,
            counter = %format!("inliner.callSites/{}", reason),
            call = call.0,
            "inliner: counter"
        );
    }

    /// A live target was removed
    pub fn removed(&mut self, call: CallNodeId, callee: MethodId, depth: u32, reason: FailureReason) {
        self.record(call, callee, depth, reason);
        if self.level >= TraceLevel::Heuristic {
            tracing::debug!(
                log_id = %self.log_id,
                call = call.0,
                callee = %callee,
                depth,
                reason = %reason,
                "inliner: removing call target"
            );
        }
    }

    /// A call site was rejected as a whole
    pub fn site_failed(&mut self, call: CallNodeId, selector: MethodId, depth: u32, reason: FailureReason) {
        self.record(call, selector, depth, reason);
        if self.level >= TraceLevel::Heuristic {
            tracing::debug!(
                log_id = %self.log_id,
                call = call.0,
                selector = %selector,
                depth,
                reason = %reason,
                "inliner: call site failed"
            );
        }
    }

    /// An accepted decision, described by a narration marker
    pub fn narrate(&mut self, call: CallNodeId, callee: MethodId, marker: FailureReason) {
        self.record(call, callee, 0, marker);
        if self.level >= TraceLevel::Heuristic {
            tracing::debug!(
                log_id = %self.log_id,
                call = call.0,
                callee = %callee,
                marker = %marker,
                "inliner: accepted"
            );
        }
    }

    fn record(&mut self, call: CallNodeId, method: MethodId, depth: u32, reason: FailureReason) {
        self.insert_counter(reason, call);
        self.events.push(DecisionEvent {
            call_node: call,
            method,
            depth,
            reason,
        });
    }

    /// Times `reason` was recorded
    pub fn counter(&self, reason: FailureReason) -> u32 {
        self.counters.get(&reason).copied().unwrap_or(0)
    }

    /// All non-zero counters
    pub fn counters(&self) -> &BTreeMap<FailureReason, u32> {
        &self.counters
    }

    /// Events in the order they happened
    pub fn events(&self) -> &[DecisionEvent] {
        &self.events
    }

    /// Render one call site, its targets and their nested sites as JSON
    pub fn dump_call_site(&self, graph: &CallGraph, site: CallSiteId, message: &str) -> String {
        let json = to_json(&site_dump(graph, site));
        self.emit(message, &json);
        json
    }

    /// Render one call target and its nested sites as JSON
    pub fn dump_call_target(&self, graph: &CallGraph, target: CallTargetId, message: &str) -> String {
        let json = to_json(&target_dump(graph, target));
        self.emit(message, &json);
        json
    }

    /// Render every root call site as JSON
    pub fn dump_call_graphs(&self, graph: &CallGraph) -> String {
        let roots: Vec<SiteDump> = graph.roots().iter().map(|s| site_dump(graph, *s)).collect();
        let json = to_json(&roots);
        self.emit("call graphs", &json);
        json
    }

    fn emit(&self, message: &str, json: &str) {
        if self.level >= TraceLevel::Debug {
            tracing::debug!(log_id = %self.log_id, dump = %json, "inliner: {}", message);
        }
    }

    /// Forget counters and events
    pub fn reset(&mut self) {
        self.counters.clear();
        self.events.clear();
    }
}

impl Default for InlinerTracer {
    fn default() -> Self {
        Self::new(TraceLevel::Off)
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

fn site_dump(graph: &CallGraph, id: CallSiteId) -> SiteDump {
    let site = graph.site(id);
    SiteDump {
        site: id.to_string(),
        caller: site.caller,
        call_node: site.call_node,
        bytecode_index: site.bytecode_index,
        depth: site.depth,
        kind: site.kind,
        selector: site.selector,
        visits: site.visit_count(),
        in_loop: site.in_loop,
        always_called: site.always_called,
        failure: site.failure_reason(),
        targets: site.targets().iter().map(|t| target_dump(graph, *t)).collect(),
        removed: site.removed_targets().iter().map(|t| target_dump(graph, *t)).collect(),
    }
}

fn target_dump(graph: &CallGraph, id: CallTargetId) -> TargetDump {
    let target = graph.target(id);
    TargetDump {
        target: id.to_string(),
        callee: target.callee.id,
        name: target.callee.signature(),
        guard: target.guard().copied(),
        size: target.size,
        weight: target.weight,
        frequency: target.frequency_adjustment,
        state: target.state(),
        narration: target.narration(),
        callees: target.callees.iter().map(|s| site_dump(graph, *s)).collect(),
    }
}
