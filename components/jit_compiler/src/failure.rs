//! Closed taxonomy of inlining decisions
//!
//! Every rejection of a call site or call target is described by exactly one
//! [`FailureReason`]. A few values are not failures at all: they narrate
//! accepted decisions through the same tracing channel.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad class of a [`FailureReason`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Permanent; the same target will never be inlined
    Structural,
    /// Soft; depends on thresholds and on the order of earlier decisions
    Budget,
    /// Found only after IL generation or mapping started
    LateStage,
    /// Not a failure
    Narration,
}

macro_rules! failure_reasons {
    ($( $(#[$doc:meta])* $variant:ident => $text:literal, $kind:ident; )*) => {
        /// Reason attached to a rejected call site or call target
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum FailureReason {
            $( $(#[$doc])* $variant, )*
        }

        impl FailureReason {
            /// Every reason, in declaration order
            pub const ALL: &'static [FailureReason] = &[$(FailureReason::$variant,)*];

            /// Stable text used in traces and counters
            pub fn as_str(self) -> &'static str {
                match self {
                    $(FailureReason::$variant => $text,)*
                }
            }

            /// Category of the reason
            pub fn kind(self) -> FailureKind {
                match self {
                    $(FailureReason::$variant => FailureKind::$kind,)*
                }
            }
        }
    };
}

failure_reasons! {
    /// Target passed every gate and is being inlined
    InlineableTarget => "InlineableTarget", Narration;
    /// Policy asked for this target to be tried first
    TryToInlineTarget => "TryToInlineTarget", Narration;
    /// Policy override let the target past a failed size check
    OverrideInlineTarget => "OverrideInlineTarget", Narration;
    /// Target must be inlined regardless of its size
    ForcedInlineTarget => "ForcedInlineTarget", Narration;

    /// Callee body cannot be inlined at all
    NotSane => "Not_Sane", Structural;
    /// Callee could not be resolved
    UnresolvedCallee => "Unresolved_Callee", Structural;
    /// Callee is handled by the code generator directly
    RecognizedCallee => "Recognized_Callee", Structural;
    /// Callee is native
    JniCallee => "JNI_Callee", Structural;
    /// Callee contains exception handlers
    EhAwareCallee => "EH_Aware_Callee", Structural;
    /// Synchronized callees are not inlined
    SyncMethodInliningDisabled => "Sync_Method_Inlining_Disabled", Structural;
    /// Inlining of virtual calls is disabled
    VirtualInliningDisabled => "Virtual_Inlining_Disabled", Structural;
    /// Inlining of non-virtual calls is disabled
    NonVirtualInliningDisabled => "NonVirtual_Inlining_Disabled", Structural;
    /// Callee is on the do-not-inline list
    DontInlineCallee => "DontInline_Callee", Structural;
    /// An inline-only list exists and the callee is not on it
    NotInlineOnlyCallee => "Not_InlineOnly_Callee", Structural;
    /// Strict-fp callee inside a non strict-fp caller
    StrictFpCallee => "StrictFP_Callee", Structural;
    /// Method entry/exit tracing is active
    NeedsMethodTracing => "Needs_Method_Tracing", Structural;
    /// Callee contains a decompilation point
    DecompilationPoint => "Decompilation_Point", Structural;
    /// Callee IL contains constructs that cannot be inlined
    NonInlineableWCode => "NonInlineable_WCode", Structural;
    /// Discovery produced no target
    NoInlineableTargets => "No_Inlineable_Targets", Structural;
    /// Interface call without a unique implementor or usable profile
    NoSingleInterfaceCallee => "No_Single_Interface_Callee", Structural;
    /// Interface call whose profile has no dominant receiver
    NotProfiledInterfaceCallee => "Not_Profiled_Interface_Callee", Structural;
    /// Secondary target while multiple-target inlining is disabled
    MultipleTargetsDisabled => "Multiple_Targets_Disabled", Structural;

    /// Raw bytecode size is above the hard cap
    ExceedsByteCodeThreshold => "Exceeds_ByteCode_Threshold", Budget;
    /// Frequency-scaled size is above the block's threshold
    ExceedsSizeThreshold => "Exceeds_Size_Threshold", Budget;
    /// Caller weight budget exhausted
    ExceededCallerBudget => "Exceeded_Caller_Budget", Budget;
    /// Caller node-count budget exhausted
    ExceededCallerNodeBudget => "Exceeded_Caller_Node_Budget", Budget;
    /// Maximum number of inlined call sites reached
    ExceededCallerSiteSize => "Exceeded_Caller_SiteSize", Budget;
    /// Self-recursive inlining exhausted its bytecode allowance
    ExceedsRecursiveSizeEstimate => "Exceeds_Recursive_Size_Estimate", Budget;
    /// Callee is already open too many times on the inline stack
    RecursiveCallee => "Recursive_Callee", Budget;
    /// Inline depth limit reached
    ExceedsMaxDepth => "Exceeds_Max_Depth", Budget;
    /// Call site never executed
    ColdCall => "Cold_Call", Budget;
    /// Call site is in a cold block and too large for it
    ColdBlock => "Cold_Block", Budget;
    /// Compilation was asked to stop
    CompilationAborted => "Compilation_Aborted", Budget;

    /// IL generation for the callee failed
    EcsFailed => "ECS_Failed", LateStage;
    /// IL generation hit an unresolved reference
    UnresolvedInEcs => "Unresolved_In_ECS", LateStage;
    /// Arguments cannot be bound to the callee's parameters
    CantMatchParmsToArgs => "Cant_Match_Parms_to_Args", LateStage;
    /// Mapping would need more temporaries than allowed
    WillCreateUnallowedTemps => "Will_Create_Unallowed_Temps", LateStage;
    /// The call node disappeared before the target could be spliced
    CallNodeNotFound => "Call_Node_Not_Found", LateStage;
}

impl FailureReason {
    /// Check if the reason narrates an accepted decision
    pub fn is_narration(self) -> bool {
        self.kind() == FailureKind::Narration
    }

    /// Check if the reason makes the target permanently uninlineable
    pub fn is_permanent(self) -> bool {
        self.kind() == FailureKind::Structural
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
