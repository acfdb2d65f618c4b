//! Virtual guard selection
//!
//! A speculatively devirtualized call needs a runtime check that its
//! assumption still holds. The kind of check depends on how the target was
//! discovered:
//!
//! - Statically bound calls need no guard at all
//! - Hierarchy proofs need a non-overridden test, invalidated on class load
//! - Profiled receivers need a vft test against the profiled class
//! - Unique implementors need an interface or vft test
//!
//! A guard is selected exactly once per target through a [`GuardSlot`].

use core_types::ClassId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of runtime guard protecting an inlined body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GuardKind {
    /// Method has not been overridden
    NonOverriddenTest,
    /// Interface has a single implementor
    InterfaceTest,
    /// Receiver's virtual function table matches a known class
    VftTest,
    /// Receiver matches the profiled class
    ProfiledGuard,
    /// Mutable call site still targets the recorded method
    MutableCallSiteGuard,
    /// Receiver class hint proves the target through the hierarchy
    HierarchyGuard,
    /// Call is statically bound
    NoGuardNeeded,
}

/// The comparison a guard performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GuardTestType {
    /// Patchable no-op, invalidated externally
    DummyTest,
    /// Patchable test on the overridden bit
    NonOverriddenTest,
    /// Compare receiver class
    VftTest,
    /// Compare resolved method
    MethodTest,
}

/// How a target was found, which determines its guard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryPath {
    /// Direct call
    Direct,
    /// Receiver proven to preexist with a known class
    Preexisting,
    /// Selector is not overridden anywhere
    NotOverridden,
    /// Method resolved in the receiver-class hint is not overridden
    ReceiverHierarchy(ClassId),
    /// Receiver class taken from profiling
    Profiled(ClassId),
    /// Only one live implementor of an interface method
    SingleInterfaceImplementor,
    /// Only one live implementor of a virtual method
    SingleVirtualImplementor,
    /// Mutable call site with a known target
    MutableCallSite,
}

/// The chosen guard for one call target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualGuardSelection {
    /// Kind of guard
    pub kind: GuardKind,
    /// Test the guard performs
    pub test_type: GuardTestType,
    /// Class compared against, for class tests
    pub this_class: Option<ClassId>,
    high_probability: bool,
}

impl VirtualGuardSelection {
    /// Create a selection with `high_probability` cleared
    pub fn new(kind: GuardKind, test_type: GuardTestType, this_class: Option<ClassId>) -> Self {
        Self {
            kind,
            test_type,
            this_class,
            high_probability: false,
        }
    }

    /// Guard for statically bound calls
    pub fn no_guard() -> Self {
        Self::new(GuardKind::NoGuardNeeded, GuardTestType::DummyTest, None)
    }

    /// Check if a runtime test will be emitted
    pub fn is_real_guard(&self) -> bool {
        self.kind != GuardKind::NoGuardNeeded
    }

    /// Whether corroborating evidence says the guard almost never fails
    pub fn high_probability(&self) -> bool {
        self.high_probability
    }

    /// Raise `high_probability`. It never goes back to false.
    ///
    /// Only profiled guards carry the flag; returns whether it changed.
    pub fn mark_high_probability(&mut self) -> bool {
        if self.kind != GuardKind::ProfiledGuard || self.high_probability {
            return false;
        }
        self.high_probability = true;
        true
    }

    /// Receiver class the guard pins down exactly, if any.
    ///
    /// A hierarchy guard admits subclasses of `this_class`, so it pins nothing.
    pub fn known_receiver_class(&self) -> Option<ClassId> {
        match self.kind {
            GuardKind::ProfiledGuard | GuardKind::VftTest => self.this_class,
            _ => None,
        }
    }
}

impl fmt::Display for VirtualGuardSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", self.kind, self.test_type)?;
        if let Some(class) = self.this_class {
            write!(f, "[{}]", class)?;
        }
        Ok(())
    }
}

/// Picks the guard for a discovery path
pub struct GuardSelector;

impl GuardSelector {
    /// Guard matching the way a target was discovered
    pub fn select(path: DiscoveryPath) -> VirtualGuardSelection {
        use GuardKind as K;
        use GuardTestType as T;

        match path {
            DiscoveryPath::Direct | DiscoveryPath::Preexisting => VirtualGuardSelection::no_guard(),
            DiscoveryPath::NotOverridden => {
                VirtualGuardSelection::new(K::NonOverriddenTest, T::NonOverriddenTest, None)
            }
            DiscoveryPath::ReceiverHierarchy(class) => {
                VirtualGuardSelection::new(K::HierarchyGuard, T::NonOverriddenTest, Some(class))
            }
            DiscoveryPath::Profiled(class) => {
                VirtualGuardSelection::new(K::ProfiledGuard, T::VftTest, Some(class))
            }
            DiscoveryPath::SingleInterfaceImplementor => {
                VirtualGuardSelection::new(K::InterfaceTest, T::DummyTest, None)
            }
            DiscoveryPath::SingleVirtualImplementor => {
                VirtualGuardSelection::new(K::VftTest, T::MethodTest, None)
            }
            DiscoveryPath::MutableCallSite => {
                VirtualGuardSelection::new(K::MutableCallSiteGuard, T::MethodTest, None)
            }
        }
    }
}

/// One-shot holder for a target's guard
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GuardSlot {
    /// No guard chosen yet
    #[default]
    Unselected,
    /// Guard chosen; it is never replaced
    Selected(VirtualGuardSelection),
}

impl GuardSlot {
    /// Store the guard. Returns false, leaving the slot unchanged, if one
    /// was already selected.
    pub fn select(&mut self, guard: VirtualGuardSelection) -> bool {
        match self {
            GuardSlot::Unselected => {
                *self = GuardSlot::Selected(guard);
                true
            }
            GuardSlot::Selected(_) => false,
        }
    }

    /// The selected guard
    pub fn selection(&self) -> Option<&VirtualGuardSelection> {
        match self {
            GuardSlot::Selected(guard) => Some(guard),
            GuardSlot::Unselected => None,
        }
    }

    /// Mutable access, only for the one-way probability flag
    pub fn selection_mut(&mut self) -> Option<&mut VirtualGuardSelection> {
        match self {
            GuardSlot::Selected(guard) => Some(guard),
            GuardSlot::Unselected => None,
        }
    }
}
