//! Arena allocation errors

use thiserror::Error;

/// Failure to allocate from an arena
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArenaError {
    /// The arena's allocation limit has been reached
    #[error("arena exhausted: limit of {limit} allocations reached")]
    Exhausted {
        /// Configured allocation limit
        limit: usize,
    },
}
