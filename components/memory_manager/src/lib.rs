//! Memory Manager - per-compilation arena allocation
//!
//! This component provides:
//! - Typed segmented arenas with bump allocation
//! - Index handles that stay valid for the lifetime of the arena
//! - Bulk reclamation through `reset`, with no per-object free
//! - An optional allocation limit, surfaced as [`ArenaError::Exhausted`]

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod arena;
pub mod error;

// Re-export main types
pub use arena::{Arena, Id};
pub use error::ArenaError;
