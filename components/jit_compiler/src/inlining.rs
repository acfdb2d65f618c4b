//! Inlining orchestrator
//!
//! This module drives a whole inlining pass:
//! - Inliner: walks every call of the method under compilation
//! - Target discovery, policy filtering and ranking per call site
//! - The per-target gate: policy, cold calls, size, caller budget,
//!   recursion and depth
//! - Splicing of accepted targets, then recursive descent into their bodies
//!
//! Every rejection is recorded on the call graph and never stops the pass.
//! Only arena exhaustion, an unknown method or an invalid configuration
//! end it with an error.

use crate::call_site::{CallGraph, CallSite, CallSiteId, CallTargetId};
use crate::call_stack::CallStack;
use crate::config::InlinerConfig;
use crate::discovery::TargetDiscovery;
use crate::env::{AbortSignal, ClassHierarchy, IlGenError, IlGenerator, NeverAbort, ProfileStore};
use crate::error::{InlinerError, InlinerResult};
use crate::failure::FailureReason;
use crate::guard::{GuardKind, VirtualGuardSelection};
use crate::heuristics::{CallerBudget, SizeHeuristics, SizeQuery};
use crate::ir::{BlockId, CallNode, CallNodeId, MethodIr, TempId};
use crate::parameter_mapper::ParameterMapper;
use crate::policy::{InlinerPolicy, RankedTarget};
use crate::tracer::InlinerTracer;
use crate::transform::{apply_splice, prepare_splice, SplicePlan};
use core_types::MethodInfo;
use serde::Serialize;
use std::collections::VecDeque;

/// Collaborators of one inliner
#[derive(Clone, Copy)]
pub struct InliningEnv<'a> {
    /// Method and class resolution
    pub hierarchy: &'a dyn ClassHierarchy,
    /// Runtime profiles
    pub profiles: &'a dyn ProfileStore,
    /// Callee IR
    pub il_generator: &'a dyn IlGenerator,
    /// Inlineability and ranking rules
    pub policy: &'a dyn InlinerPolicy,
    /// External stop request
    pub abort: &'a dyn AbortSignal,
}

impl<'a> InliningEnv<'a> {
    /// Bundle collaborators; the pass is never aborted
    pub fn new(
        hierarchy: &'a dyn ClassHierarchy,
        profiles: &'a dyn ProfileStore,
        il_generator: &'a dyn IlGenerator,
        policy: &'a dyn InlinerPolicy,
    ) -> Self {
        Self {
            hierarchy,
            profiles,
            il_generator,
            policy,
            abort: &NeverAbort,
        }
    }

    /// Stop the pass when `abort` fires
    pub fn with_abort(mut self, abort: &'a dyn AbortSignal) -> Self {
        self.abort = abort;
        self
    }
}

/// Result of one inlining pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InliningSummary {
    /// Call sites examined
    pub sites_processed: u32,
    /// Call targets inlined
    pub sites_inlined: u32,
    /// Call targets removed
    pub targets_removed: u32,
    /// Node count before the pass
    pub node_count_before: u32,
    /// Node count after the pass
    pub node_count_after: u32,
    /// Nodes synthesized by splicing
    pub synthesized_nodes: u32,
    /// Temporaries added to the method
    pub temps_created: u32,
    /// The pass was cut short by an abort request
    pub aborted: bool,
}

enum InlineAttempt {
    Committed {
        temps: Vec<TempId>,
        slow_call: Option<CallNodeId>,
    },
    Rejected,
}

/// A target that passed every gate, with its splice built
struct PreparedTarget<'f> {
    frame: CallStack<'f>,
    plan: SplicePlan,
    weight: u32,
    self_recursive: bool,
    corroborated: bool,
}

/// Drives inlining over one method at a time
pub struct Inliner<'a> {
    config: InlinerConfig,
    env: InliningEnv<'a>,
    heuristics: SizeHeuristics,
    tracer: InlinerTracer,
    graph: CallGraph,
    budget: CallerBudget,
    summary: InliningSummary,
    caller: Option<MethodInfo>,
    prior_sites: usize,
}

impl<'a> Inliner<'a> {
    /// Create an inliner with the default configuration
    pub fn new(env: InliningEnv<'a>) -> Self {
        Self::with_config(InlinerConfig::default(), env)
    }

    /// Create an inliner with a custom configuration
    pub fn with_config(config: InlinerConfig, env: InliningEnv<'a>) -> Self {
        Self {
            heuristics: SizeHeuristics::new(&config),
            tracer: InlinerTracer::new(config.trace_level),
            graph: CallGraph::new(config.arena_limit),
            budget: CallerBudget::new(&config, 0, 0),
            summary: InliningSummary::default(),
            caller: None,
            prior_sites: 0,
            config,
            env,
        }
    }

    /// Inline calls of `ir` in place.
    ///
    /// The call graph of the pass stays available through
    /// [`Inliner::call_graph`] until the next pass or [`Inliner::reset`].
    pub fn perform_inlining(&mut self, ir: &mut MethodIr) -> InlinerResult<InliningSummary> {
        self.config.validate()?;
        let caller = self
            .env
            .hierarchy
            .method_info(ir.method)
            .ok_or(InlinerError::UnknownMethod(ir.method))?;

        self.graph.reset();
        self.tracer.begin(ir.method);
        let node_count = ir.node_count();
        let temp_count = ir.temp_count;
        self.budget = CallerBudget::new(&self.config, caller.bytecode_size, node_count);
        self.summary = InliningSummary {
            node_count_before: node_count,
            node_count_after: node_count,
            ..InliningSummary::default()
        };
        self.prior_sites = ir.inlined_sites.len();
        self.caller = Some(caller);

        let calls = ir.call_ids();
        if calls.is_empty() {
            return Ok(self.summary.clone());
        }

        tracing::debug!(
            log_id = %self.tracer.log_id(),
            calls = calls.len(),
            nodes = node_count,
            weight_limit = self.budget.weight_limit(),
            "inliner: performing inlining"
        );

        let mut root = CallStack::root(ir.method, ir);
        self.inline_call_sites(ir, &mut root, calls, None)?;
        root.commit();

        self.summary.node_count_after = ir.node_count();
        self.summary.synthesized_nodes = self.budget.node_count().saturating_sub(node_count);
        self.summary.temps_created = ir.temp_count.saturating_sub(temp_count);
        self.summary.targets_removed = self.graph.removed_count() as u32;
        self.tracer.dump_call_graphs(&self.graph);

        tracing::debug!(
            log_id = %self.tracer.log_id(),
            processed = self.summary.sites_processed,
            inlined = self.summary.sites_inlined,
            removed = self.summary.targets_removed,
            aborted = self.summary.aborted,
            "inliner: done"
        );
        Ok(self.summary.clone())
    }

    fn inline_call_sites(
        &mut self,
        ir: &mut MethodIr,
        frame: &mut CallStack<'_>,
        calls: Vec<CallNodeId>,
        parent_target: Option<CallTargetId>,
    ) -> InlinerResult<()> {
        let mut worklist: VecDeque<CallNodeId> = calls.into();
        while let Some(call_id) = worklist.pop_front() {
            let (Some((block, _)), Some(call)) = (ir.find_call(call_id), ir.call(call_id)) else {
                continue;
            };
            frame.update_state(ir, block);
            let site = self.create_call_site(ir, frame, call, block, parent_target)?;
            self.summary.sites_processed += 1;

            if self.env.abort.should_abort() {
                self.summary.aborted = true;
                self.graph.fail_site(site, FailureReason::CompilationAborted, &mut self.tracer);
                continue;
            }
            if let Some(reason) = self.budget.exhausted() {
                self.graph.fail_site(site, reason, &mut self.tracer);
                continue;
            }

            let discovery = TargetDiscovery::new(self.env.hierarchy, self.env.profiles, &self.config);
            if discovery.find_call_site_targets(&mut self.graph, &mut self.tracer, site, frame)? == 0 {
                continue;
            }

            let mut current = call_id;
            for target in self.rank_and_filter_targets(site) {
                if !self.graph.target(target).is_live() {
                    continue;
                }
                self.graph.site_mut(site).visit();
                match self.inline_call_target(ir, frame, site, target, current)? {
                    InlineAttempt::Committed { temps, slow_call } => {
                        frame.adopt_temps(temps);
                        match slow_call {
                            // further targets are tried on the guard's slow path
                            Some(slow_call) => current = slow_call,
                            None => break,
                        }
                    }
                    InlineAttempt::Rejected => {}
                }
            }
        }
        Ok(())
    }

    fn create_call_site(
        &mut self,
        ir: &MethodIr,
        frame: &CallStack<'_>,
        call: &CallNode,
        block: BlockId,
        parent_target: Option<CallTargetId>,
    ) -> InlinerResult<CallSiteId> {
        let mut site = CallSite::from_call(call, ir.owning_method(call), block, frame.depth());
        let holder = &ir.blocks[block];
        site.block_frequency = holder.frequency;
        site.in_cold_block = holder.is_cold;
        site.in_loop = frame.in_a_loop();
        site.always_called = frame.always_called();
        site.is_back_edge = ir.is_back_edge_block(block);
        site.parent_target = parent_target;
        Ok(self.graph.create_site(site)?)
    }

    /// Live targets in policy order; extras are dropped when only one may be tried
    fn rank_and_filter_targets(&mut self, site: CallSiteId) -> Vec<CallTargetId> {
        let mut ranked: Vec<RankedTarget> = self
            .graph
            .site(site)
            .targets()
            .iter()
            .map(|id| {
                let target = self.graph.target(*id);
                RankedTarget {
                    id: *id,
                    callee: target.callee.id,
                    frequency: target.frequency_adjustment,
                    size: target.size,
                }
            })
            .collect();
        self.env.policy.rank_targets(&mut ranked);

        let multiple = self.config.allow_multiple_targets && self.env.policy.supports_multiple_targets();
        if !multiple && ranked.len() > 1 {
            for extra in ranked.split_off(1) {
                self.graph
                    .remove_call_target(extra.id, FailureReason::MultipleTargetsDisabled, &mut self.tracer);
            }
        }
        ranked.into_iter().map(|t| t.id).collect()
    }

    fn inline_call_target(
        &mut self,
        ir: &mut MethodIr,
        frame: &CallStack<'_>,
        site: CallSiteId,
        target: CallTargetId,
        call_id: CallNodeId,
    ) -> InlinerResult<InlineAttempt> {
        let prepared = match self.prepare_target(ir, frame, site, target, call_id) {
            Ok(prepared) => prepared,
            Err(reason) => return Ok(self.reject(target, reason)),
        };
        let PreparedTarget {
            frame: mut child,
            plan,
            weight,
            self_recursive,
            corroborated,
        } = prepared;

        let outcome = match apply_splice(ir, plan) {
            Ok(outcome) => outcome,
            Err(reason) => return Ok(self.reject(target, reason)),
        };
        self.graph.commit_target(target);
        if corroborated {
            self.graph.mark_guard_high_probability(target);
        }
        self.budget.record_inline(weight, outcome.nodes_added, self_recursive);
        self.summary.sites_inlined += 1;

        let callee = self.graph.target(target).callee.id;
        self.tracer.narrate(call_id, callee, FailureReason::InlineableTarget);
        tracing::debug!(
            log_id = %self.tracer.log_id(),
            call = call_id.0,
            callee = %callee,
            depth = child.depth(),
            nodes_added = outcome.nodes_added,
            node_count = self.budget.node_count(),
            "inliner: inlined call target"
        );

        self.inline_call_sites(ir, &mut child, outcome.new_calls, Some(target))?;
        Ok(InlineAttempt::Committed {
            temps: child.commit(),
            slow_call: outcome.slow_call,
        })
    }

    fn reject(&mut self, target: CallTargetId, reason: FailureReason) -> InlineAttempt {
        if reason == FailureReason::CompilationAborted {
            self.summary.aborted = true;
        }
        self.graph.remove_call_target(target, reason, &mut self.tracer);
        InlineAttempt::Rejected
    }

    /// Run every gate for `target` and build its splice
    fn prepare_target<'f>(
        &mut self,
        ir: &MethodIr,
        frame: &'f CallStack<'f>,
        site: CallSiteId,
        target: CallTargetId,
        call_id: CallNodeId,
    ) -> Result<PreparedTarget<'f>, FailureReason> {
        if self.env.abort.should_abort() {
            return Err(FailureReason::CompilationAborted);
        }
        if let Some(reason) = self.budget.exhausted() {
            return Err(reason);
        }

        let s = self.graph.site(site).clone();
        let t = self.graph.target(target);
        let callee = t.callee.clone();
        let receiver_class = t.receiver_class;
        let mut guard = t.guard().copied().unwrap_or_else(VirtualGuardSelection::no_guard);

        let caller = self
            .env
            .hierarchy
            .method_info(s.caller)
            .or_else(|| self.caller.clone())
            .ok_or(FailureReason::NotSane)?;
        let policy = self.env.policy;

        let must_inline = policy.must_be_inlined(&callee, &s);
        if must_inline {
            self.graph.tag_call_target(target, FailureReason::ForcedInlineTarget, &mut self.tracer);
        }
        if let Some(reason) = policy.check_if_target_inlineable(&caller, &callee, &s) {
            return Err(reason);
        }

        let self_recursive = frame.is_currently_on_the_stack(callee.id, 1);
        let weight = if must_inline {
            callee.bytecode_size
        } else {
            self.check_size(&s, target, &callee, self_recursive)?
        };

        let origin = ir.call(call_id).and_then(|c| c.origin);
        if !s.force_inline
            && frame.is_anywhere_on_the_stack(
                callee.id,
                self.config.max_recursive_occurrences,
                &ir.inlined_sites,
                self.prior_sites,
                origin,
            )
        {
            return Err(FailureReason::RecursiveCallee);
        }
        if frame.depth() + 1 > self.config.max_inline_depth {
            return Err(FailureReason::ExceedsMaxDepth);
        }

        let callee_ir = self
            .env
            .il_generator
            .generate_il(&callee)
            .map_err(IlGenError::failure_reason)?;

        // profiling agrees with the guarded class: the slow path is rare
        let corroborated = guard.kind == GuardKind::ProfiledGuard
            && self
                .env
                .profiles
                .dominant_receiver_class(s.profile_key())
                .map_or(false, |(class, frequency)| {
                    Some(class) == receiver_class
                        && frequency >= self.config.min_profiled_call_frequency
                });
        if corroborated {
            guard.mark_high_probability();
        }

        let temp_limit = self.config.max_temps_per_inline;
        let mut child = CallStack::child(frame, callee.id, guard, ir.temp_count);
        let args = ir
            .call(call_id)
            .map(|c| c.args.clone())
            .ok_or(FailureReason::CallNodeNotFound)?;
        let mut mapper = ParameterMapper::initialize(&args, &callee, &callee_ir, &mut child, temp_limit)?;
        let plan = prepare_splice(
            ir,
            call_id,
            &callee_ir,
            &callee,
            guard,
            &mut mapper,
            &mut child,
            temp_limit,
        )?;

        if self.env.abort.should_abort() {
            return Err(FailureReason::CompilationAborted);
        }
        Ok(PreparedTarget {
            frame: child,
            plan,
            weight,
            self_recursive,
            corroborated,
        })
    }

    /// Cold-call, size and caller-budget gates; returns the target's weight
    fn check_size(
        &mut self,
        site: &CallSite,
        target: CallTargetId,
        callee: &MethodInfo,
        self_recursive: bool,
    ) -> Result<u32, FailureReason> {
        if self.env.profiles.call_count(site.profile_key()) == Some(0) {
            return Err(FailureReason::ColdCall);
        }

        let context = self
            .heuristics
            .classify(site.in_loop, site.block_frequency, site.in_cold_block);
        let query = SizeQuery {
            bytecode_size: callee.bytecode_size,
            block_frequency: site.block_frequency,
            context,
            arg_count: site.arg_count,
            const_arg_count: site.const_arg_count,
        };
        let try_to_inline = self.env.policy.try_to_inline(callee, site);
        let weight = match self.heuristics.exceeds_size_threshold(&query) {
            Ok(weight) => {
                if try_to_inline {
                    self.graph.tag_call_target(target, FailureReason::TryToInlineTarget, &mut self.tracer);
                }
                weight
            }
            Err(reason) if try_to_inline && reason != FailureReason::ExceedsByteCodeThreshold => {
                self.graph.tag_call_target(target, FailureReason::OverrideInlineTarget, &mut self.tracer);
                self.heuristics.effective_size(&query)
            }
            Err(reason) => return Err(reason),
        };
        self.graph.set_weight(target, weight);
        self.budget.check_target(weight, self_recursive)?;
        Ok(weight)
    }

    /// Call graph of the last pass
    pub fn call_graph(&self) -> &CallGraph {
        &self.graph
    }

    /// Decision tracer of the last pass
    pub fn tracer(&self) -> &InlinerTracer {
        &self.tracer
    }

    /// Summary of the last pass
    pub fn summary(&self) -> &InliningSummary {
        &self.summary
    }

    /// Caller budget of the last pass
    pub fn budget(&self) -> &CallerBudget {
        &self.budget
    }

    /// Active configuration
    pub fn config(&self) -> &InlinerConfig {
        &self.config
    }

    /// Identification prefix of trace messages
    pub fn log_id(&self) -> &str {
        self.tracer.log_id()
    }

    /// Reclaim the call graph and forget the last pass
    pub fn reset(&mut self) {
        self.graph.reset();
        self.tracer.reset();
        self.summary = InliningSummary::default();
        self.caller = None;
        self.prior_sites = 0;
    }
}
