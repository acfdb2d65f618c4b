//! Unit tests for MethodId and ClassId

use core_types::{ClassId, MethodId};
use std::collections::HashSet;

#[test]
fn test_method_id_display() {
    assert_eq!(MethodId(7).to_string(), "m7");
}

#[test]
fn test_class_id_display() {
    assert_eq!(ClassId(12).to_string(), "c12");
}

#[test]
fn test_ids_are_hashable() {
    let set: HashSet<MethodId> = [MethodId(1), MethodId(1), MethodId(2)].into_iter().collect();
    assert_eq!(set.len(), 2);
}

#[test]
fn test_id_serde_is_transparent_number() {
    let json = serde_json::to_string(&ClassId(5)).unwrap();
    assert_eq!(json, "5");
    let back: ClassId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, ClassId(5));
}
