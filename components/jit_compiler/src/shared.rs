//! In-memory collaborators
//!
//! Thread-safe via internal `RwLock`s, so one instance can serve several
//! compilations at once. Used by drivers that load hierarchy and profile
//! data up front, and by the tests.

use crate::env::{ClassHierarchy, IlGenError, IlGenerator, ProfileKey, ProfileStore};
use crate::ir::MethodIr;
use core_types::{ClassId, MethodId, MethodInfo, ReceiverProfile};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
struct HierarchyTables {
    methods: HashMap<MethodId, MethodInfo>,
    superclass: HashMap<ClassId, ClassId>,
    implemented_interfaces: HashMap<ClassId, Vec<ClassId>>,
    interfaces: HashSet<ClassId>,
    /// class -> selector -> implementation declared in that class
    implementations: HashMap<ClassId, HashMap<MethodId, MethodId>>,
}

impl HierarchyTables {
    fn is_subtype(&self, class: ClassId, ancestor: ClassId) -> bool {
        let mut current = Some(class);
        while let Some(c) = current {
            if c == ancestor {
                return true;
            }
            let via_interface = self
                .implemented_interfaces
                .get(&c)
                .map_or(false, |ifaces| ifaces.iter().any(|i| self.is_subtype(*i, ancestor)));
            if via_interface {
                return true;
            }
            current = self.superclass.get(&c).copied();
        }
        false
    }

    /// Selectors `method` implements, itself included
    fn selectors_of(&self, method: MethodId) -> HashSet<MethodId> {
        let mut selectors: HashSet<MethodId> = self
            .implementations
            .values()
            .flat_map(|table| table.iter())
            .filter(|(_, implementation)| **implementation == method)
            .map(|(selector, _)| *selector)
            .collect();
        selectors.insert(method);
        selectors
    }

    fn is_abstract(&self, method: MethodId) -> bool {
        self.methods.get(&method).map_or(true, |m| m.flags.is_abstract)
    }
}

/// Class hierarchy held in memory
#[derive(Debug, Default)]
pub struct SharedClassHierarchy {
    tables: RwLock<HierarchyTables>,
}

impl SharedClassHierarchy {
    /// Create an empty hierarchy
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a class with an optional superclass and the interfaces it implements
    pub fn add_class(&self, class: ClassId, superclass: Option<ClassId>, interfaces: &[ClassId]) {
        let mut tables = self.tables.write();
        if let Some(superclass) = superclass {
            tables.superclass.insert(class, superclass);
        }
        if !interfaces.is_empty() {
            tables.implemented_interfaces.insert(class, interfaces.to_vec());
        }
    }

    /// Load an interface
    pub fn add_interface(&self, interface: ClassId) {
        self.tables.write().interfaces.insert(interface);
    }

    /// Load a method; it implements itself in its declaring class
    pub fn add_method(&self, info: MethodInfo) {
        let mut tables = self.tables.write();
        tables
            .implementations
            .entry(info.class)
            .or_default()
            .insert(info.id, info.id);
        tables.methods.insert(info.id, info);
    }

    /// Record that `class` implements `selector` with `implementation`
    pub fn add_override(&self, class: ClassId, selector: MethodId, implementation: MethodId) {
        self.tables
            .write()
            .implementations
            .entry(class)
            .or_default()
            .insert(selector, implementation);
    }

    /// Number of loaded methods
    pub fn method_count(&self) -> usize {
        self.tables.read().methods.len()
    }
}

impl ClassHierarchy for SharedClassHierarchy {
    fn method_info(&self, method: MethodId) -> Option<MethodInfo> {
        self.tables.read().methods.get(&method).cloned()
    }

    fn resolve_method(&self, class: ClassId, selector: MethodId) -> Option<MethodId> {
        let tables = self.tables.read();
        let mut current = Some(class);
        while let Some(c) = current {
            if let Some(implementation) = tables.implementations.get(&c).and_then(|t| t.get(&selector)) {
                return Some(*implementation);
            }
            current = tables.superclass.get(&c).copied();
        }
        None
    }

    fn is_overridden(&self, method: MethodId) -> bool {
        let tables = self.tables.read();
        let Some(declaring) = tables.methods.get(&method).map(|m| m.class) else {
            return false;
        };
        let selectors = tables.selectors_of(method);
        tables.implementations.iter().any(|(class, table)| {
            *class != declaring
                && tables.is_subtype(*class, declaring)
                && table
                    .iter()
                    .any(|(selector, imp)| selectors.contains(selector) && *imp != method)
        })
    }

    fn single_implementor(&self, selector: MethodId) -> Option<MethodId> {
        let tables = self.tables.read();
        let implementors: HashSet<MethodId> = tables
            .implementations
            .iter()
            .filter(|(class, _)| !tables.interfaces.contains(class))
            .filter_map(|(_, table)| table.get(&selector).copied())
            .filter(|imp| !tables.is_abstract(*imp))
            .collect();
        if implementors.len() == 1 {
            implementors.into_iter().next()
        } else {
            None
        }
    }

    fn is_interface(&self, class: ClassId) -> bool {
        self.tables.read().interfaces.contains(&class)
    }
}

/// Receiver profiles held in memory
#[derive(Debug, Default)]
pub struct SharedProfileStore {
    profiles: RwLock<HashMap<ProfileKey, ReceiverProfile>>,
}

impl SharedProfileStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `count` calls at `key` whose receiver was `class`
    pub fn record(&self, key: ProfileKey, class: ClassId, count: u64) {
        self.profiles
            .write()
            .entry(key)
            .or_default()
            .record_receivers(class, count);
    }

    /// Overwrite the execution count of `key`
    pub fn set_call_count(&self, key: ProfileKey, count: u64) {
        self.profiles.write().entry(key).or_default().execution_count = count;
    }

    /// Number of profiled sites
    pub fn len(&self) -> usize {
        self.profiles.read().len()
    }

    /// Check if nothing was profiled
    pub fn is_empty(&self) -> bool {
        self.profiles.read().is_empty()
    }
}

impl ProfileStore for SharedProfileStore {
    fn receiver_profile(&self, key: ProfileKey) -> Option<ReceiverProfile> {
        self.profiles.read().get(&key).cloned()
    }
}

/// Pre-built callee IR, keyed by method
#[derive(Debug, Default)]
pub struct MethodIlRepository {
    bodies: RwLock<HashMap<MethodId, Result<MethodIr, IlGenError>>>,
}

impl MethodIlRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the IR of a method
    pub fn insert(&self, ir: MethodIr) {
        self.bodies.write().insert(ir.method, Ok(ir));
    }

    /// Make IL generation for `method` fail
    pub fn insert_failure(&self, method: MethodId, error: IlGenError) {
        self.bodies.write().insert(method, Err(error));
    }
}

impl IlGenerator for MethodIlRepository {
    fn generate_il(&self, callee: &MethodInfo) -> Result<MethodIr, IlGenError> {
        self.bodies
            .read()
            .get(&callee.id)
            .cloned()
            .unwrap_or(Err(IlGenError::Unresolved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::MethodFlags;

    fn abstract_flags() -> MethodFlags {
        MethodFlags {
            is_abstract: true,
            ..MethodFlags::default()
        }
    }

    /// A.foo (m1) overridden by B.foo (m2); C extends B without overriding
    fn class_chain() -> SharedClassHierarchy {
        let h = SharedClassHierarchy::new();
        h.add_class(ClassId(1), None, &[]);
        h.add_class(ClassId(2), Some(ClassId(1)), &[]);
        h.add_class(ClassId(3), Some(ClassId(2)), &[]);
        h.add_method(MethodInfo::new(MethodId(1), "foo", ClassId(1), 10, 1));
        h.add_method(MethodInfo::new(MethodId(2), "foo", ClassId(2), 12, 1));
        h.add_override(ClassId(2), MethodId(1), MethodId(2));
        h
    }

    #[test]
    fn test_resolve_walks_superclasses() {
        let h = class_chain();
        assert_eq!(h.resolve_method(ClassId(1), MethodId(1)), Some(MethodId(1)));
        assert_eq!(h.resolve_method(ClassId(2), MethodId(1)), Some(MethodId(2)));
        assert_eq!(h.resolve_method(ClassId(3), MethodId(1)), Some(MethodId(2)));
        assert_eq!(h.resolve_method(ClassId(9), MethodId(1)), None);
    }

    #[test]
    fn test_is_overridden() {
        let h = class_chain();
        assert!(h.is_overridden(MethodId(1)));
        assert!(!h.is_overridden(MethodId(2)));
    }

    #[test]
    fn test_single_implementor_of_interface() {
        let h = SharedClassHierarchy::new();
        h.add_interface(ClassId(10));
        h.add_method(MethodInfo::new(MethodId(10), "run", ClassId(10), 0, 1).with_flags(abstract_flags()));
        h.add_class(ClassId(11), None, &[ClassId(10)]);
        h.add_method(MethodInfo::new(MethodId(11), "run", ClassId(11), 8, 1));
        h.add_override(ClassId(11), MethodId(10), MethodId(11));

        assert!(h.is_interface(ClassId(10)));
        assert_eq!(h.single_implementor(MethodId(10)), Some(MethodId(11)));

        h.add_class(ClassId(12), None, &[ClassId(10)]);
        h.add_method(MethodInfo::new(MethodId(12), "run", ClassId(12), 8, 1));
        h.add_override(ClassId(12), MethodId(10), MethodId(12));
        assert_eq!(h.single_implementor(MethodId(10)), None);
        assert!(h.is_overridden(MethodId(10)));
    }

    #[test]
    fn test_profile_store() {
        let store = SharedProfileStore::new();
        let key = ProfileKey {
            method: MethodId(1),
            bytecode_index: 4,
        };
        store.record(key, ClassId(2), 7);
        store.record(key, ClassId(3), 3);
        assert_eq!(store.dominant_receiver_class(key).map(|(c, _)| c), Some(ClassId(2)));
        assert_eq!(store.call_count(key), Some(10));

        store.set_call_count(key, 0);
        assert_eq!(store.call_count(key), Some(0));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_il_repository() {
        let repo = MethodIlRepository::new();
        let info = MethodInfo::new(MethodId(4), "f", ClassId(1), 5, 0);
        assert_eq!(repo.generate_il(&info), Err(IlGenError::Unresolved));

        repo.insert(MethodIr::new(MethodId(4), 0));
        assert!(repo.generate_il(&info).is_ok());

        repo.insert_failure(MethodId(4), IlGenError::NonInlineableCode);
        assert_eq!(repo.generate_il(&info), Err(IlGenError::NonInlineableCode));
    }
}
