//! Errors that stop a whole inlining pass
//!
//! Rejections of individual sites and targets are not errors; they are
//! recorded as [`FailureReason`](crate::failure::FailureReason)s on the call
//! graph. Only conditions the pass cannot continue from surface here.

use crate::config::ConfigError;
use core_types::MethodId;
use memory_manager::ArenaError;
use thiserror::Error;

/// Fatal inliner errors
#[derive(Debug, Error)]
pub enum InlinerError {
    /// The call-graph arena is full
    #[error("call graph allocation failed: {0}")]
    Arena(#[from] ArenaError),

    /// The method under compilation is unknown to the class hierarchy
    #[error("unknown method {0}")]
    UnknownMethod(MethodId),

    /// The configuration is unusable
    #[error("invalid inliner configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Result type for inliner operations
pub type InlinerResult<T> = Result<T, InlinerError>;
