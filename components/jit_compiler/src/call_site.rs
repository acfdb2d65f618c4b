//! Call sites and their candidate targets
//!
//! Both live in a per-compilation [`CallGraph`] arena. A [`CallSite`] owns
//! the ids of its targets, split into a live list and a removed list; a
//! removed target is reclassified, never deleted, so diagnostics can still
//! explain it. A [`CallTarget`] refers back to its site by id.

use crate::env::ProfileKey;
use crate::failure::FailureReason;
use crate::guard::{GuardSlot, VirtualGuardSelection};
use crate::ir::{BlockId, CallKind, CallNode, CallNodeId};
use crate::tracer::InlinerTracer;
use core_types::{ClassId, MethodId, MethodInfo};
use memory_manager::{Arena, ArenaError, Id};
use serde::Serialize;
use thiserror::Error;

/// Handle to a call site in the call graph
pub type CallSiteId = Id<CallSite>;

/// Handle to a call target in the call graph
pub type CallTargetId = Id<CallTarget>;

/// A call instruction under consideration
#[derive(Debug, Clone)]
pub struct CallSite {
    /// Method whose bytecode contains the call
    pub caller: MethodId,
    /// Call node in the IR being compiled
    pub call_node: CallNodeId,
    /// Block holding the call when the site was created
    pub block: BlockId,
    /// Bytecode index within `caller`
    pub bytecode_index: u32,
    /// Inline nesting depth; 0 for the method under compilation
    pub depth: u32,
    /// Dispatch kind
    pub kind: CallKind,
    /// Statically referenced method
    pub selector: MethodId,
    /// Receiver-class hint
    pub receiver_class: Option<ClassId>,
    /// Target of a mutable call site
    pub known_target: Option<MethodId>,
    /// Number of arguments, receiver included
    pub arg_count: u32,
    /// Number of constant arguments
    pub const_arg_count: u32,
    /// Frequency of the holding block
    pub block_frequency: u32,
    /// Holding block is inside a loop
    pub in_loop: bool,
    /// Holding block is marked cold
    pub in_cold_block: bool,
    /// Holding block branches backwards
    pub is_back_edge: bool,
    /// Call runs whenever the method under compilation runs
    pub always_called: bool,
    /// Inline regardless of size
    pub force_inline: bool,
    /// Every argument is a constant
    pub all_consts: bool,
    /// Receiver is the enclosing inlined method's own receiver
    pub receiver_preexists: bool,
    /// Target whose inlined body contains this call
    pub parent_target: Option<CallTargetId>,
    visit_count: u32,
    targets: Vec<CallTargetId>,
    removed_targets: Vec<CallTargetId>,
    failure: Option<FailureReason>,
}

impl CallSite {
    /// Describe `call`, found in `block` of a method at `depth`
    pub fn from_call(call: &CallNode, caller: MethodId, block: BlockId, depth: u32) -> Self {
        Self {
            caller,
            call_node: call.id,
            block,
            bytecode_index: call.bytecode_index,
            depth,
            kind: call.kind,
            selector: call.method,
            receiver_class: call.receiver_class,
            known_target: call.known_target,
            arg_count: call.args.len() as u32,
            const_arg_count: call.const_arg_count(),
            block_frequency: 0,
            in_loop: false,
            in_cold_block: false,
            is_back_edge: false,
            always_called: false,
            force_inline: call.force_inline,
            all_consts: call.all_consts(),
            receiver_preexists: call.receiver_preexists,
            parent_target: None,
            visit_count: 0,
            targets: Vec::new(),
            removed_targets: Vec::new(),
            failure: None,
        }
    }

    /// Live targets in discovery order
    pub fn targets(&self) -> &[CallTargetId] {
        &self.targets
    }

    /// Removed targets in removal order
    pub fn removed_targets(&self) -> &[CallTargetId] {
        &self.removed_targets
    }

    /// Number of live targets
    pub fn num_targets(&self) -> usize {
        self.targets.len()
    }

    /// Live plus removed targets
    pub fn total_targets(&self) -> usize {
        self.targets.len() + self.removed_targets.len()
    }

    /// Why the site as a whole was rejected
    pub fn failure_reason(&self) -> Option<FailureReason> {
        self.failure
    }

    /// Count one more visit
    pub fn visit(&mut self) -> u32 {
        self.visit_count += 1;
        self.visit_count
    }

    /// Times the orchestrator attempted this site's targets
    pub fn visit_count(&self) -> u32 {
        self.visit_count
    }

    /// Key for profiling lookups
    pub fn profile_key(&self) -> ProfileKey {
        ProfileKey {
            method: self.caller,
            bytecode_index: self.bytecode_index,
        }
    }
}

/// Lifecycle of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TargetState {
    /// Discovered, not yet decided
    Candidate,
    /// Inlined; immutable from here on
    Committed,
    /// Rejected for exactly one reason
    Removed(FailureReason),
}

/// A concrete implementation considered for a call site
#[derive(Debug, Clone)]
pub struct CallTarget {
    /// Owning call site
    pub site: CallSiteId,
    /// Resolved callee
    pub callee: MethodInfo,
    /// Receiver class the target was resolved for
    pub receiver_class: Option<ClassId>,
    /// Bytecode size estimate
    pub size: u32,
    /// Size after frequency scaling, once computed
    pub weight: u32,
    /// Profiled frequency of this target, 1.0 when not profiled
    pub frequency_adjustment: f32,
    /// Call sites discovered inside this target's inlined body
    pub callees: Vec<CallSiteId>,
    guard: GuardSlot,
    state: TargetState,
    narration: Option<FailureReason>,
}

impl CallTarget {
    /// Selected guard
    pub fn guard(&self) -> Option<&VirtualGuardSelection> {
        self.guard.selection()
    }

    /// Current state
    pub fn state(&self) -> TargetState {
        self.state
    }

    /// Check if the target is still a candidate
    pub fn is_live(&self) -> bool {
        self.state == TargetState::Candidate
    }

    /// Check if the target was inlined
    pub fn is_committed(&self) -> bool {
        self.state == TargetState::Committed
    }

    /// Reason for removal
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self.state {
            TargetState::Removed(reason) => Some(reason),
            _ => None,
        }
    }

    /// Narration marker attached to an accepted target
    pub fn narration(&self) -> Option<FailureReason> {
        self.narration
    }

    /// Weight scaled by how often this target is the receiver
    pub fn call_graph_adjusted_weight(&self) -> f32 {
        self.weight as f32 * self.frequency_adjustment
    }
}

/// Failure to add a target to a call site
#[derive(Debug, Error)]
pub enum AddTargetError {
    /// Candidate method could not be resolved
    #[error("no inlineable target resolved")]
    NoInlineableTargets,
    /// Call-graph arena is full
    #[error(transparent)]
    Arena(#[from] ArenaError),
}

/// Per-compilation store of call sites and targets
#[derive(Debug)]
pub struct CallGraph {
    sites: Arena<CallSite>,
    targets: Arena<CallTarget>,
    roots: Vec<CallSiteId>,
}

impl CallGraph {
    /// Create a graph whose arenas hold at most `limit` objects each
    pub fn new(limit: usize) -> Self {
        Self {
            sites: Arena::with_limit(limit),
            targets: Arena::with_limit(limit),
            roots: Vec::new(),
        }
    }

    /// Store a call site, linking it under its parent target if any
    pub fn create_site(&mut self, site: CallSite) -> Result<CallSiteId, ArenaError> {
        let parent = site.parent_target;
        let id = self.sites.alloc(site)?;
        match parent.and_then(|t| self.targets.get_mut(t)) {
            Some(target) => target.callees.push(id),
            None => self.roots.push(id),
        }
        Ok(id)
    }

    /// Call site by id
    pub fn site(&self, id: CallSiteId) -> &CallSite {
        &self.sites[id]
    }

    /// Mutable call site by id
    pub fn site_mut(&mut self, id: CallSiteId) -> &mut CallSite {
        &mut self.sites[id]
    }

    /// Call target by id
    pub fn target(&self, id: CallTargetId) -> &CallTarget {
        &self.targets[id]
    }

    /// Sites created for calls of the method under compilation
    pub fn roots(&self) -> &[CallSiteId] {
        &self.roots
    }

    /// Every site in creation order
    pub fn sites(&self) -> impl Iterator<Item = (CallSiteId, &CallSite)> {
        self.sites.iter()
    }

    /// Every target in creation order
    pub fn all_targets(&self) -> impl Iterator<Item = (CallTargetId, &CallTarget)> {
        self.targets.iter()
    }

    /// Number of sites
    pub fn site_count(&self) -> usize {
        self.sites.len()
    }

    /// Create a target for `candidate` on `site`.
    ///
    /// Fails with [`AddTargetError::NoInlineableTargets`] when the candidate
    /// did not resolve.
    pub fn add_target(
        &mut self,
        site: CallSiteId,
        candidate: Option<MethodInfo>,
        guard: VirtualGuardSelection,
        receiver_class: Option<ClassId>,
        frequency: f32,
    ) -> Result<CallTargetId, AddTargetError> {
        let callee = candidate.ok_or(AddTargetError::NoInlineableTargets)?;
        let mut slot = GuardSlot::default();
        slot.select(guard);
        let target = CallTarget {
            site,
            size: callee.bytecode_size,
            weight: callee.bytecode_size,
            callee,
            receiver_class,
            frequency_adjustment: frequency,
            callees: Vec::new(),
            guard: slot,
            state: TargetState::Candidate,
            narration: None,
        };
        let id = self.targets.alloc(target)?;
        self.sites[site].targets.push(id);
        Ok(id)
    }

    /// Attach a narration marker to a live target
    pub fn tag_call_target(
        &mut self,
        target: CallTargetId,
        reason: FailureReason,
        tracer: &mut InlinerTracer,
    ) {
        debug_assert!(reason.is_narration(), "{reason} is not a narration marker");
        let call = self.sites[self.targets[target].site].call_node;
        let entry = &mut self.targets[target];
        entry.narration = Some(reason);
        tracer.narrate(call, entry.callee.id, reason);
    }

    /// Move a live target to the removed list.
    ///
    /// Returns false, changing nothing, if the target was already decided.
    pub fn remove_call_target(
        &mut self,
        target: CallTargetId,
        reason: FailureReason,
        tracer: &mut InlinerTracer,
    ) -> bool {
        if !self.targets[target].is_live() {
            return false;
        }
        let site_id = self.targets[target].site;
        let callee = self.targets[target].callee.id;
        self.targets[target].state = TargetState::Removed(reason);

        let site = &mut self.sites[site_id];
        site.targets.retain(|t| *t != target);
        site.removed_targets.push(target);
        tracer.removed(site.call_node, callee, site.depth, reason);
        true
    }

    /// Remove every live target of a site
    pub fn remove_all_targets(
        &mut self,
        site: CallSiteId,
        reason: FailureReason,
        tracer: &mut InlinerTracer,
    ) {
        let live = self.sites[site].targets.clone();
        for target in live {
            self.remove_call_target(target, reason, tracer);
        }
    }

    /// Reject the whole site; the first reason sticks
    pub fn fail_site(&mut self, site: CallSiteId, reason: FailureReason, tracer: &mut InlinerTracer) {
        self.remove_all_targets(site, reason, tracer);
        let entry = &mut self.sites[site];
        if entry.failure.is_none() {
            entry.failure = Some(reason);
            tracer.site_failed(entry.call_node, entry.selector, entry.depth, reason);
        }
    }

    /// Mark a live target as inlined
    pub fn commit_target(&mut self, target: CallTargetId) -> bool {
        let entry = &mut self.targets[target];
        if !entry.is_live() {
            return false;
        }
        entry.state = TargetState::Committed;
        true
    }

    /// Raise the committed target's guard probability
    pub fn mark_guard_high_probability(&mut self, target: CallTargetId) -> bool {
        self.targets[target]
            .guard
            .selection_mut()
            .map_or(false, |g| g.mark_high_probability())
    }

    /// Record the frequency-scaled size of a target
    pub fn set_weight(&mut self, target: CallTargetId, weight: u32) {
        self.targets[target].weight = weight;
    }

    /// Number of removed targets across the graph
    pub fn removed_count(&self) -> usize {
        self.targets
            .iter()
            .filter(|(_, t)| matches!(t.state, TargetState::Removed(_)))
            .count()
    }

    /// Reclaim every site and target
    pub fn reset(&mut self) {
        self.sites.reset();
        self.targets.reset();
        self.roots.clear();
    }
}
