//! Shared vocabulary for the inlining engine.
//!
//! This crate provides the identifiers and descriptors that the inliner
//! and the collaborators it consumes (class hierarchy, profiling store,
//! IL generator) exchange.
//!
//! # Overview
//!
//! - [`MethodId`] / [`ClassId`] - Typed identifiers
//! - [`MethodInfo`] - Resolved method with size estimate and flags
//! - [`MethodFlags`] - Properties that make a method hard to inline
//! - [`ReceiverProfile`] - Receiver classes observed at a call site
//!
//! # Examples
//!
//! ```
//! use core_types::{ClassId, MethodId, MethodInfo, ReceiverProfile};
//!
//! let info = MethodInfo::new(MethodId(1), "size", ClassId(3), 12, 1);
//! assert!(info.has_receiver());
//!
//! let mut profile = ReceiverProfile::new();
//! profile.record_receivers(ClassId(3), 7);
//! profile.record_receivers(ClassId(4), 3);
//! assert_eq!(profile.dominant().map(|(c, _)| c), Some(ClassId(3)));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod ids;
mod method;
mod profile;

pub use ids::{ClassId, MethodId};
pub use method::{MethodFlags, MethodInfo};
pub use profile::ReceiverProfile;
