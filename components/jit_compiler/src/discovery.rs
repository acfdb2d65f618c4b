//! Target discovery for call sites
//!
//! One discovery routine per call kind. Direct calls resolve to their
//! selector. Indirect and interface calls try, in order:
//!
//! 1. The recorded target of a mutable call site
//! 2. A receiver proven to preexist with an exact class
//! 3. A static proof that the selector is not overridden
//! 4. The receiver-class hint, when the method it resolves to is not overridden
//! 5. The single live implementor of the selector
//! 6. Profiled receiver classes (dominant, plus a runner-up)
//!
//! Every static proof comes before profiling, so a site with both is
//! guarded by the hierarchy test.

use crate::call_site::{AddTargetError, CallGraph, CallSiteId, CallTargetId};
use crate::call_stack::CallStack;
use crate::config::InlinerConfig;
use crate::env::{ClassHierarchy, ProfileStore};
use crate::error::InlinerResult;
use crate::failure::FailureReason;
use crate::guard::{DiscoveryPath, GuardSelector};
use crate::ir::CallKind;
use crate::tracer::InlinerTracer;
use core_types::{ClassId, MethodId};

/// Finds candidate targets for call sites
pub struct TargetDiscovery<'a> {
    hierarchy: &'a dyn ClassHierarchy,
    profiles: &'a dyn ProfileStore,
    config: &'a InlinerConfig,
}

impl<'a> TargetDiscovery<'a> {
    /// Create a discovery pass over the given collaborators
    pub fn new(
        hierarchy: &'a dyn ClassHierarchy,
        profiles: &'a dyn ProfileStore,
        config: &'a InlinerConfig,
    ) -> Self {
        Self {
            hierarchy,
            profiles,
            config,
        }
    }

    /// Populate `site` with targets; returns how many are live.
    ///
    /// A site left without targets is failed with the reason for its kind.
    pub fn find_call_site_targets(
        &self,
        graph: &mut CallGraph,
        tracer: &mut InlinerTracer,
        site: CallSiteId,
        frame: &CallStack<'_>,
    ) -> InlinerResult<usize> {
        let kind = graph.site(site).kind;
        let found = match kind {
            CallKind::Direct => self.find_direct_target(graph, tracer, site)?,
            CallKind::Indirect | CallKind::Interface => {
                self.find_virtual_targets(graph, tracer, site, frame)?
            }
        };

        if found == 0 {
            let reason = self.failure_reason(graph, site);
            graph.fail_site(site, reason, tracer);
        }
        Ok(graph.site(site).num_targets())
    }

    fn find_direct_target(
        &self,
        graph: &mut CallGraph,
        tracer: &mut InlinerTracer,
        site: CallSiteId,
    ) -> InlinerResult<usize> {
        let selector = graph.site(site).selector;
        let added = self.add_target(graph, tracer, site, Some(selector), DiscoveryPath::Direct, None, 1.0)?;
        Ok(added.is_some() as usize)
    }

    fn find_virtual_targets(
        &self,
        graph: &mut CallGraph,
        tracer: &mut InlinerTracer,
        site: CallSiteId,
        frame: &CallStack<'_>,
    ) -> InlinerResult<usize> {
        let s = graph.site(site);
        let (kind, selector, hint, known_target, preexists) = (
            s.kind,
            s.selector,
            s.receiver_class,
            s.known_target,
            s.receiver_preexists,
        );

        if kind == CallKind::Indirect {
            if let Some(target) = known_target {
                let path = DiscoveryPath::MutableCallSite;
                if self.add_target(graph, tracer, site, Some(target), path, None, 1.0)?.is_some() {
                    return Ok(1);
                }
            }
        }

        if preexists {
            if let Some(prex) = frame.preexistence() {
                let resolved = self.hierarchy.resolve_method(prex.receiver_class, selector);
                let path = DiscoveryPath::Preexisting;
                let class = Some(prex.receiver_class);
                if self.add_target(graph, tracer, site, resolved, path, class, 1.0)?.is_some() {
                    return Ok(1);
                }
            }
        }

        if kind == CallKind::Indirect && self.is_statically_bound(selector) {
            let path = DiscoveryPath::NotOverridden;
            if self.add_target(graph, tracer, site, Some(selector), path, None, 1.0)?.is_some() {
                return Ok(1);
            }
        }

        if let Some(class) = hint.filter(|c| !self.hierarchy.is_interface(*c)) {
            if let Some(resolved) = self.hierarchy.resolve_method(class, selector) {
                if !self.hierarchy.is_overridden(resolved) {
                    let path = DiscoveryPath::ReceiverHierarchy(class);
                    if self
                        .add_target(graph, tracer, site, Some(resolved), path, Some(class), 1.0)?
                        .is_some()
                    {
                        return Ok(1);
                    }
                }
            }
        }

        if let Some(implementor) = self.hierarchy.single_implementor(selector) {
            let path = match kind {
                CallKind::Interface => DiscoveryPath::SingleInterfaceImplementor,
                _ => DiscoveryPath::SingleVirtualImplementor,
            };
            if self.add_target(graph, tracer, site, Some(implementor), path, None, 1.0)?.is_some() {
                return Ok(1);
            }
        }

        self.find_profiled_targets(graph, tracer, site, selector)
    }

    fn is_statically_bound(&self, selector: MethodId) -> bool {
        self.hierarchy
            .method_info(selector)
            .map_or(false, |m| !m.flags.is_abstract)
            && !self.hierarchy.is_overridden(selector)
    }

    /// Targets for the dominant receiver class and a runner-up.
    ///
    /// The dominant class is accepted at the primary frequency, or at the
    /// runner-up frequency when a second class also reaches it.
    fn find_profiled_targets(
        &self,
        graph: &mut CallGraph,
        tracer: &mut InlinerTracer,
        site: CallSiteId,
        selector: MethodId,
    ) -> InlinerResult<usize> {
        let key = graph.site(site).profile_key();
        let Some(profile) = self.profiles.receiver_profile(key) else {
            return Ok(0);
        };
        let ranked = profile.ranked();
        let Some(&(dominant, frequency)) = ranked.first() else {
            return Ok(0);
        };

        let second_best = self.config.second_best_min_call_frequency;
        let runner_up = ranked.get(1).copied().filter(|(_, f)| *f >= second_best);
        let accepted = frequency >= self.config.min_profiled_call_frequency
            || (frequency >= second_best && runner_up.is_some());
        if !accepted {
            return Ok(0);
        }

        let mut added = 0;
        for (class, frequency) in std::iter::once((dominant, frequency)).chain(runner_up) {
            if self.add_profiled_target(graph, tracer, site, selector, class, frequency)?.is_some() {
                added += 1;
            }
        }
        Ok(added)
    }

    fn add_profiled_target(
        &self,
        graph: &mut CallGraph,
        tracer: &mut InlinerTracer,
        site: CallSiteId,
        selector: MethodId,
        class: ClassId,
        frequency: f32,
    ) -> InlinerResult<Option<CallTargetId>> {
        let resolved = self.hierarchy.resolve_method(class, selector);
        let path = DiscoveryPath::Profiled(class);
        self.add_target(graph, tracer, site, resolved, path, Some(class), frequency)
    }

    #[allow(clippy::too_many_arguments)]
    fn add_target(
        &self,
        graph: &mut CallGraph,
        tracer: &mut InlinerTracer,
        site: CallSiteId,
        candidate: Option<MethodId>,
        path: DiscoveryPath,
        receiver_class: Option<ClassId>,
        frequency: f32,
    ) -> InlinerResult<Option<CallTargetId>> {
        let info = candidate.and_then(|m| self.hierarchy.method_info(m));
        let guard = GuardSelector::select(path);
        match graph.add_target(site, info, guard, receiver_class, frequency) {
            Ok(id) => Ok(Some(id)),
            Err(AddTargetError::NoInlineableTargets) => {
                tracer.insert_counter(FailureReason::UnresolvedCallee, graph.site(site).call_node);
                Ok(None)
            }
            Err(AddTargetError::Arena(e)) => Err(e.into()),
        }
    }

    fn failure_reason(&self, graph: &CallGraph, site: CallSiteId) -> FailureReason {
        let s = graph.site(site);
        match s.kind {
            CallKind::Direct => FailureReason::NoInlineableTargets,
            CallKind::Indirect | CallKind::Interface => {
                let profiled = self
                    .profiles
                    .receiver_profile(s.profile_key())
                    .map_or(false, |p| p.has_samples());
                if profiled {
                    FailureReason::NotProfiledInterfaceCallee
                } else {
                    FailureReason::NoSingleInterfaceCallee
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_site::CallSite;
    use crate::env::ProfileKey;
    use crate::guard::GuardKind;
    use crate::ir::{CallNode, MethodIr, Node};
    use crate::shared::{SharedClassHierarchy, SharedProfileStore};
    use crate::tracer::TraceLevel;
    use core_types::{MethodFlags, MethodInfo};

    const CALLER: MethodId = MethodId(1);
    const RUN: MethodId = MethodId(10);
    const SHAPE: ClassId = ClassId(10);

    /// Interface `SHAPE.run` with implementors in classes 11..=10+n
    fn interface_with(n: u32) -> SharedClassHierarchy {
        let h = SharedClassHierarchy::new();
        h.add_interface(SHAPE);
        let flags = MethodFlags {
            is_abstract: true,
            ..MethodFlags::default()
        };
        h.add_method(MethodInfo::new(RUN, "run", SHAPE, 0, 1).with_flags(flags));
        for i in 1..=n {
            let class = ClassId(10 + i);
            let method = MethodId(10 + i);
            h.add_class(class, None, &[SHAPE]);
            h.add_method(MethodInfo::new(method, "run", class, 20, 1));
            h.add_override(class, RUN, method);
        }
        h
    }

    fn interface_call() -> CallNode {
        let mut ir = MethodIr::new(CALLER, 1);
        ir.make_call(CallKind::Interface, RUN, vec![Node::LoadLocal(0)])
            .at_bytecode_index(7)
    }

    fn key() -> ProfileKey {
        ProfileKey {
            method: CALLER,
            bytecode_index: 7,
        }
    }

    fn discover(
        hierarchy: &SharedClassHierarchy,
        profiles: &SharedProfileStore,
        call: &CallNode,
    ) -> (CallGraph, CallSiteId, InlinerTracer) {
        let config = InlinerConfig::default();
        let ir = MethodIr::new(CALLER, 1);
        let frame = CallStack::root(CALLER, &ir);
        let mut graph = CallGraph::new(64);
        let mut tracer = InlinerTracer::new(TraceLevel::Off);
        let site = graph.create_site(CallSite::from_call(call, CALLER, 0, 0)).unwrap();
        TargetDiscovery::new(hierarchy, profiles, &config)
            .find_call_site_targets(&mut graph, &mut tracer, site, &frame)
            .unwrap();
        (graph, site, tracer)
    }

    fn guard_kinds(graph: &CallGraph, site: CallSiteId) -> Vec<GuardKind> {
        graph
            .site(site)
            .targets()
            .iter()
            .filter_map(|t| graph.target(*t).guard().map(|g| g.kind))
            .collect()
    }

    #[test]
    fn test_direct_call() {
        let h = SharedClassHierarchy::new();
        h.add_method(MethodInfo::new(MethodId(2), "f", ClassId(1), 20, 0));
        let mut ir = MethodIr::new(CALLER, 0);
        let call = ir.make_call(CallKind::Direct, MethodId(2), vec![]);
        let (graph, site, _) = discover(&h, &SharedProfileStore::new(), &call);
        assert_eq!(guard_kinds(&graph, site), vec![GuardKind::NoGuardNeeded]);
    }

    #[test]
    fn test_unresolved_direct_call() {
        let mut ir = MethodIr::new(CALLER, 0);
        let call = ir.make_call(CallKind::Direct, MethodId(2), vec![]);
        let (graph, site, tracer) = discover(&SharedClassHierarchy::new(), &SharedProfileStore::new(), &call);
        assert_eq!(graph.site(site).failure_reason(), Some(FailureReason::NoInlineableTargets));
        assert_eq!(tracer.counter(FailureReason::UnresolvedCallee), 1);
    }

    #[test]
    fn test_dominant_profile() {
        let h = interface_with(3);
        let p = SharedProfileStore::new();
        p.record(key(), ClassId(11), 70);
        p.record(key(), ClassId(12), 20);
        p.record(key(), ClassId(13), 10);
        let (graph, site, _) = discover(&h, &p, &interface_call());
        assert_eq!(guard_kinds(&graph, site), vec![GuardKind::ProfiledGuard]);
        let target = graph.target(graph.site(site).targets()[0]);
        assert_eq!(target.callee.id, MethodId(11));
        assert_eq!(target.receiver_class, Some(ClassId(11)));
    }

    #[test]
    fn test_two_call_profile() {
        let h = interface_with(3);
        let p = SharedProfileStore::new();
        p.record(key(), ClassId(11), 50);
        p.record(key(), ClassId(12), 40);
        p.record(key(), ClassId(13), 10);
        let (graph, site, _) = discover(&h, &p, &interface_call());
        assert_eq!(graph.site(site).num_targets(), 2);
    }

    #[test]
    fn test_flat_profile_fails() {
        let h = interface_with(3);
        let p = SharedProfileStore::new();
        p.record(key(), ClassId(11), 40);
        p.record(key(), ClassId(12), 20);
        p.record(key(), ClassId(13), 20);
        p.record(key(), ClassId(14), 20);
        let (graph, site, _) = discover(&h, &p, &interface_call());
        assert_eq!(
            graph.site(site).failure_reason(),
            Some(FailureReason::NotProfiledInterfaceCallee)
        );
    }

    #[test]
    fn test_single_implementor() {
        let h = interface_with(1);
        let (graph, site, _) = discover(&h, &SharedProfileStore::new(), &interface_call());
        assert_eq!(guard_kinds(&graph, site), vec![GuardKind::InterfaceTest]);
    }

    #[test]
    fn test_no_evidence() {
        let h = interface_with(2);
        let (graph, site, _) = discover(&h, &SharedProfileStore::new(), &interface_call());
        assert_eq!(
            graph.site(site).failure_reason(),
            Some(FailureReason::NoSingleInterfaceCallee)
        );
    }

    #[test]
    fn test_static_proof_before_profile() {
        let h = SharedClassHierarchy::new();
        h.add_class(ClassId(1), None, &[]);
        h.add_method(MethodInfo::new(MethodId(2), "f", ClassId(1), 20, 1));
        let p = SharedProfileStore::new();
        p.record(key(), ClassId(1), 100);

        let mut ir = MethodIr::new(CALLER, 1);
        let call = ir
            .make_call(CallKind::Indirect, MethodId(2), vec![Node::LoadLocal(0)])
            .at_bytecode_index(7);
        let (graph, site, _) = discover(&h, &p, &call);
        assert_eq!(guard_kinds(&graph, site), vec![GuardKind::NonOverriddenTest]);
    }

    #[test]
    fn test_single_implementor_before_profile() {
        let h = interface_with(1);
        let p = SharedProfileStore::new();
        p.record(key(), ClassId(11), 90);
        p.record(key(), ClassId(30), 10);
        let (graph, site, _) = discover(&h, &p, &interface_call());
        assert_eq!(guard_kinds(&graph, site), vec![GuardKind::InterfaceTest]);
    }

    #[test]
    fn test_receiver_hint() {
        let h = SharedClassHierarchy::new();
        h.add_class(ClassId(1), None, &[]);
        h.add_class(ClassId(2), Some(ClassId(1)), &[]);
        h.add_method(MethodInfo::new(MethodId(1), "f", ClassId(1), 20, 1));
        h.add_method(MethodInfo::new(MethodId(2), "f", ClassId(2), 20, 1));
        h.add_override(ClassId(2), MethodId(1), MethodId(2));

        let mut ir = MethodIr::new(CALLER, 1);
        let call = ir
            .make_call(CallKind::Indirect, MethodId(1), vec![Node::LoadLocal(0)])
            .with_receiver_class(ClassId(2));
        let (graph, site, _) = discover(&h, &SharedProfileStore::new(), &call);
        assert_eq!(guard_kinds(&graph, site), vec![GuardKind::HierarchyGuard]);
        assert_eq!(graph.target(graph.site(site).targets()[0]).callee.id, MethodId(2));
    }

    #[test]
    fn test_mutable_call_site() {
        let h = interface_with(2);
        let mut ir = MethodIr::new(CALLER, 1);
        let call = ir
            .make_call(CallKind::Indirect, RUN, vec![Node::LoadLocal(0)])
            .with_known_target(MethodId(12));
        let (graph, site, _) = discover(&h, &SharedProfileStore::new(), &call);
        assert_eq!(guard_kinds(&graph, site), vec![GuardKind::MutableCallSiteGuard]);
    }
}
