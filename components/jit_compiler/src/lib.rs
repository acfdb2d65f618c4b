//! Inlining decision engine for the optimizing JIT
//!
//! This crate provides:
//! - Call graph: call sites and candidate targets, arena-allocated per compilation
//! - Target discovery: hierarchy proofs, receiver profiles, unique implementors
//! - Guard selection for speculatively devirtualized targets
//! - Size heuristics and caller-wide budgets
//! - Call stack frames: recursion detection, temporaries, preexistence
//! - Parameter mapping and splicing of callee bodies
//! - The orchestrator driving a whole pass, with a closed set of failure reasons
//!
//! # Example
//!
//! ```
//! use core_types::{ClassId, MethodId, MethodInfo};
//! use jit_compiler::ir::{CallKind, MethodIr, Place, TreeTop, Node};
//! use jit_compiler::{
//!     DefaultInlinerPolicy, Inliner, InliningEnv, MethodIlRepository, SharedClassHierarchy,
//!     SharedProfileStore,
//! };
//!
//! let hierarchy = SharedClassHierarchy::new();
//! hierarchy.add_class(ClassId(1), None, &[]);
//! hierarchy.add_method(MethodInfo::new(MethodId(1), "main", ClassId(1), 40, 0));
//! let mut helper = MethodInfo::new(MethodId(2), "helper", ClassId(1), 12, 0);
//! helper.flags.is_static = true;
//! hierarchy.add_method(helper);
//!
//! let bodies = MethodIlRepository::new();
//! let mut body = MethodIr::new(MethodId(2), 0);
//! body.push(0, TreeTop::Return(Some(Node::Const(42))));
//! bodies.insert(body);
//!
//! let mut main = MethodIr::new(MethodId(1), 1);
//! let call = main
//!     .make_call(CallKind::Direct, MethodId(2), vec![])
//!     .with_result(Place::Local(0));
//! main.push(0, TreeTop::Call(call));
//! main.push(0, TreeTop::Return(Some(Node::LoadLocal(0))));
//!
//! let profiles = SharedProfileStore::new();
//! let policy = DefaultInlinerPolicy::new();
//! let mut inliner = Inliner::new(InliningEnv::new(&hierarchy, &profiles, &bodies, &policy));
//! let summary = inliner.perform_inlining(&mut main).unwrap();
//! assert_eq!(summary.sites_inlined, 1);
//! assert_eq!(main.count_calls_to(MethodId(2)), 0);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod call_site;
pub mod call_stack;
pub mod config;
pub mod discovery;
pub mod env;
pub mod error;
pub mod failure;
pub mod guard;
pub mod heuristics;
pub mod inlining;
pub mod ir;
pub mod parameter_mapper;
pub mod policy;
pub mod shared;
pub mod tracer;
pub mod transform;

// Re-export main types at crate root
pub use call_site::{CallGraph, CallSite, CallSiteId, CallTarget, CallTargetId, TargetState};
pub use call_stack::CallStack;
pub use config::{CompilationHotness, ConfigError, InlinerConfig};
pub use env::{AbortFlag, AbortSignal, ClassHierarchy, IlGenError, IlGenerator, NeverAbort, ProfileKey, ProfileStore};
pub use error::{InlinerError, InlinerResult};
pub use failure::{FailureKind, FailureReason};
pub use guard::{GuardKind, GuardSelector, GuardTestType, VirtualGuardSelection};
pub use heuristics::{scale_size_based_on_block_frequency, CallerBudget, SizeHeuristics};
pub use inlining::{Inliner, InliningEnv, InliningSummary};
pub use parameter_mapper::ParameterMapper;
pub use policy::{DefaultInlinerPolicy, InlinerPolicy, PolicyOptions};
pub use shared::{MethodIlRepository, SharedClassHierarchy, SharedProfileStore};
pub use tracer::{InlinerTracer, TraceLevel};
