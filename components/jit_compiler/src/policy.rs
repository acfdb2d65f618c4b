//! Inlining policy
//!
//! The policy decides which targets are structurally allowed, how the
//! surviving targets are ordered, and which targets bypass the size
//! heuristics. The orchestrator receives it as a trait object, so runtimes
//! can replace the default rules without touching the engine.

use crate::call_site::{CallSite, CallTargetId};
use crate::failure::FailureReason;
use crate::ir::CallKind;
use core_types::{MethodId, MethodInfo};
use std::cmp::Ordering;
use std::collections::HashSet;

/// A live target as seen by ranking
#[derive(Debug, Clone, PartialEq)]
pub struct RankedTarget {
    /// Target handle
    pub id: CallTargetId,
    /// Resolved callee
    pub callee: MethodId,
    /// Profiled frequency, 1.0 when not profiled
    pub frequency: f32,
    /// Bytecode size
    pub size: u32,
}

/// Capability interface injected into the orchestrator
pub trait InlinerPolicy {
    /// Reason `callee` may not be inlined into `caller` at `site`, if any
    fn check_if_target_inlineable(
        &self,
        caller: &MethodInfo,
        callee: &MethodInfo,
        site: &CallSite,
    ) -> Option<FailureReason>;

    /// Order live targets; the first is attempted first
    fn rank_targets(&self, targets: &mut [RankedTarget]) {
        targets.sort_by(|a, b| {
            b.frequency
                .partial_cmp(&a.frequency)
                .unwrap_or(Ordering::Equal)
                .then(a.size.cmp(&b.size))
        });
    }

    /// Whether the target skips size and budget checks
    fn must_be_inlined(&self, _callee: &MethodInfo, site: &CallSite) -> bool {
        site.force_inline
    }

    /// Whether the target is inlined even when it fails the size check
    fn try_to_inline(&self, _callee: &MethodInfo, _site: &CallSite) -> bool {
        false
    }

    /// Whether more than one target per site may be attempted
    fn supports_multiple_targets(&self) -> bool {
        true
    }
}

/// Switches of the default policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyOptions {
    /// Inline indirect and interface calls
    pub inline_virtuals: bool,
    /// Inline direct calls
    pub inline_non_virtuals: bool,
    /// Inline synchronized methods
    pub inline_synchronized: bool,
    /// Inline methods with exception handlers
    pub allow_eh_aware: bool,
    /// Inline methods the code generator recognizes
    pub inline_recognized: bool,
    /// Method entry/exit tracing is on
    pub method_tracing: bool,
}

impl Default for PolicyOptions {
    fn default() -> Self {
        Self {
            inline_virtuals: true,
            inline_non_virtuals: true,
            inline_synchronized: true,
            allow_eh_aware: false,
            inline_recognized: false,
            method_tracing: false,
        }
    }
}

/// Rules applied when the runtime supplies none
#[derive(Debug, Clone, Default)]
pub struct DefaultInlinerPolicy {
    options: PolicyOptions,
    dont_inline: HashSet<MethodId>,
    only_inline: Option<HashSet<MethodId>>,
    try_to_inline: HashSet<MethodId>,
    must_inline: HashSet<MethodId>,
}

impl DefaultInlinerPolicy {
    /// Create a policy with default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a policy with explicit options
    pub fn with_options(options: PolicyOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Never inline `method`
    pub fn dont_inline(mut self, method: MethodId) -> Self {
        self.dont_inline.insert(method);
        self
    }

    /// Inline only methods added this way
    pub fn only_inline(mut self, method: MethodId) -> Self {
        self.only_inline.get_or_insert_with(HashSet::new).insert(method);
        self
    }

    /// Inline `method` even when it looks too large
    pub fn try_inline(mut self, method: MethodId) -> Self {
        self.try_to_inline.insert(method);
        self
    }

    /// Always inline `method`, skipping size checks
    pub fn must_inline(mut self, method: MethodId) -> Self {
        self.must_inline.insert(method);
        self
    }

    /// Active options
    pub fn options(&self) -> &PolicyOptions {
        &self.options
    }
}

impl InlinerPolicy for DefaultInlinerPolicy {
    fn check_if_target_inlineable(
        &self,
        caller: &MethodInfo,
        callee: &MethodInfo,
        site: &CallSite,
    ) -> Option<FailureReason> {
        let flags = &callee.flags;
        if self.options.method_tracing {
            return Some(FailureReason::NeedsMethodTracing);
        }
        if flags.is_abstract {
            return Some(FailureReason::NotSane);
        }
        if flags.is_native {
            return Some(FailureReason::JniCallee);
        }
        if flags.has_decompilation_point {
            return Some(FailureReason::DecompilationPoint);
        }
        if flags.is_recognized && !self.options.inline_recognized {
            return Some(FailureReason::RecognizedCallee);
        }
        match site.kind {
            CallKind::Indirect | CallKind::Interface if !self.options.inline_virtuals => {
                return Some(FailureReason::VirtualInliningDisabled);
            }
            CallKind::Direct if !self.options.inline_non_virtuals => {
                return Some(FailureReason::NonVirtualInliningDisabled);
            }
            _ => {}
        }
        if flags.is_synchronized && !self.options.inline_synchronized {
            return Some(FailureReason::SyncMethodInliningDisabled);
        }
        if callee.is_eh_aware() && !self.options.allow_eh_aware {
            return Some(FailureReason::EhAwareCallee);
        }
        if flags.is_strict_fp && !caller.flags.is_strict_fp {
            return Some(FailureReason::StrictFpCallee);
        }
        if self.dont_inline.contains(&callee.id) {
            return Some(FailureReason::DontInlineCallee);
        }
        if let Some(only) = &self.only_inline {
            if !only.contains(&callee.id) {
                return Some(FailureReason::NotInlineOnlyCallee);
            }
        }
        None
    }

    fn must_be_inlined(&self, callee: &MethodInfo, site: &CallSite) -> bool {
        site.force_inline || self.must_inline.contains(&callee.id)
    }

    fn try_to_inline(&self, callee: &MethodInfo, _site: &CallSite) -> bool {
        self.try_to_inline.contains(&callee.id)
    }
}
