//! Unit tests for ReceiverProfile

use core_types::{ClassId, ReceiverProfile};

#[test]
fn test_empty_profile() {
    let profile = ReceiverProfile::new();
    assert!(!profile.has_samples());
    assert!(profile.dominant().is_none());
    assert_eq!(profile.frequency(ClassId(1)), 0.0);
}

#[test]
fn test_record_receivers_accumulates() {
    let mut profile = ReceiverProfile::new();
    profile.record_receiver(ClassId(1));
    profile.record_receivers(ClassId(1), 2);
    profile.record_receiver(ClassId(2));
    assert_eq!(profile.total_samples(), 4);
    assert_eq!(profile.execution_count, 4);
    assert_eq!(profile.distinct_classes(), 2);
    assert!((profile.frequency(ClassId(1)) - 0.75).abs() < f32::EPSILON);
}

#[test]
fn test_ranked_is_descending() {
    let mut profile = ReceiverProfile::new();
    profile.record_receivers(ClassId(1), 10);
    profile.record_receivers(ClassId(2), 70);
    profile.record_receivers(ClassId(3), 20);
    let ranked = profile.ranked();
    let classes: Vec<ClassId> = ranked.iter().map(|(c, _)| *c).collect();
    assert_eq!(classes, vec![ClassId(2), ClassId(3), ClassId(1)]);
    assert!((ranked[0].1 - 0.70).abs() < 1e-6);
}

#[test]
fn test_ranked_ties_broken_by_class() {
    let mut profile = ReceiverProfile::new();
    profile.record_receivers(ClassId(5), 5);
    profile.record_receivers(ClassId(3), 5);
    assert_eq!(profile.dominant().map(|(c, _)| c), Some(ClassId(3)));
}
