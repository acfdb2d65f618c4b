//! Method descriptors consumed by inlining decisions.
//!
//! A [`MethodInfo`] is the resolved view of a method that the class
//! hierarchy hands out: its owning class, its bytecode size estimate,
//! its arity and the flags that make it structurally unsuitable for
//! inlining (native, synchronized, exception handlers, ...).

use crate::ids::{ClassId, MethodId};
use serde::{Deserialize, Serialize};

/// Properties of a method relevant to inlineability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodFlags {
    /// Method has no receiver
    pub is_static: bool,
    /// Method is implemented natively (JNI)
    pub is_native: bool,
    /// Method acquires the receiver's monitor
    pub is_synchronized: bool,
    /// Method requires strict floating-point semantics
    pub is_strict_fp: bool,
    /// Method has no body
    pub is_abstract: bool,
    /// Method is recognized and handled by the code generator directly
    pub is_recognized: bool,
    /// Method contains a decompilation point that cannot be duplicated
    pub has_decompilation_point: bool,
    /// Number of exception handlers in the method body
    pub exception_handler_count: u16,
}

/// Resolved method description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodInfo {
    /// Unique identifier
    pub id: MethodId,
    /// Simple name, used for tracing
    pub name: String,
    /// Declaring class
    pub class: ClassId,
    /// Estimated size in bytecode units
    pub bytecode_size: u32,
    /// Number of formal parameters, receiver included
    pub param_count: u16,
    /// Inlineability flags
    pub flags: MethodFlags,
}

impl MethodInfo {
    /// Create a method description with default flags
    pub fn new(
        id: MethodId,
        name: impl Into<String>,
        class: ClassId,
        bytecode_size: u32,
        param_count: u16,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            class,
            bytecode_size,
            param_count,
            flags: MethodFlags::default(),
        }
    }

    /// Replace the flags
    pub fn with_flags(mut self, flags: MethodFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Whether the first parameter is a receiver
    pub fn has_receiver(&self) -> bool {
        !self.flags.is_static
    }

    /// Whether the method body contains exception handlers
    pub fn is_eh_aware(&self) -> bool {
        self.flags.exception_handler_count > 0
    }

    /// `class.name` form used in traces
    pub fn signature(&self) -> String {
        format!("{}.{}", self.class, self.name)
    }
}
