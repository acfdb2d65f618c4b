//! Collaborators the inliner consumes
//!
//! The class hierarchy, the profiling store and the IL generator belong to
//! the surrounding compiler. They are shared between compilations, so
//! implementations must be safe to read concurrently; the inliner only ever
//! reads through them.

use crate::failure::FailureReason;
use crate::ir::MethodIr;
use core_types::{ClassId, MethodId, MethodInfo, ReceiverProfile};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Method and class resolution
pub trait ClassHierarchy {
    /// Descriptor of a method
    fn method_info(&self, method: MethodId) -> Option<MethodInfo>;

    /// Implementation of `selector` that a receiver of `class` dispatches to
    fn resolve_method(&self, class: ClassId, selector: MethodId) -> Option<MethodId>;

    /// Whether any loaded subclass overrides `method`
    fn is_overridden(&self, method: MethodId) -> bool;

    /// The only loaded implementation of `selector`, if there is exactly one
    fn single_implementor(&self, selector: MethodId) -> Option<MethodId>;

    /// Whether `class` is an interface
    fn is_interface(&self, class: ClassId) -> bool;
}

/// Identifies a profiled call site: a bytecode index within a method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileKey {
    /// Method containing the call
    pub method: MethodId,
    /// Bytecode index of the call
    pub bytecode_index: u32,
}

/// Runtime profiling data
pub trait ProfileStore {
    /// Receiver profile of a call site
    fn receiver_profile(&self, key: ProfileKey) -> Option<ReceiverProfile>;

    /// Most frequent receiver class and its frequency
    fn dominant_receiver_class(&self, key: ProfileKey) -> Option<(ClassId, f32)> {
        self.receiver_profile(key)?.dominant()
    }

    /// Times the call executed, if it was profiled
    fn call_count(&self, key: ProfileKey) -> Option<u64> {
        self.receiver_profile(key).map(|p| p.execution_count)
    }
}

/// Failure to produce IL for a callee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IlGenError {
    /// Generation failed
    #[error("IL generation failed")]
    Failed,
    /// The body contains constructs that cannot be inlined
    #[error("callee contains code that cannot be inlined")]
    NonInlineableCode,
    /// A reference in the body could not be resolved
    #[error("unresolved reference during IL generation")]
    Unresolved,
}

impl IlGenError {
    /// Reason recorded on the target
    pub fn failure_reason(self) -> FailureReason {
        match self {
            IlGenError::Failed => FailureReason::EcsFailed,
            IlGenError::NonInlineableCode => FailureReason::NonInlineableWCode,
            IlGenError::Unresolved => FailureReason::UnresolvedInEcs,
        }
    }
}

/// Produces the IR of a callee
pub trait IlGenerator {
    /// Fresh IR for `callee`
    fn generate_il(&self, callee: &MethodInfo) -> Result<MethodIr, IlGenError>;
}

/// External request to stop compiling
pub trait AbortSignal {
    /// Whether the compilation should stop
    fn should_abort(&self) -> bool;
}

/// Signal that never fires
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverAbort;

impl AbortSignal for NeverAbort {
    fn should_abort(&self) -> bool {
        false
    }
}

/// Signal raised by another thread, for example a compile-time budget
#[derive(Debug, Default)]
pub struct AbortFlag {
    raised: AtomicBool,
}

impl AbortFlag {
    /// Create a lowered flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the compilation to stop
    pub fn raise(&self) {
        self.raised.store(true, Ordering::Release);
    }
}

impl AbortSignal for AbortFlag {
    fn should_abort(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }
}
