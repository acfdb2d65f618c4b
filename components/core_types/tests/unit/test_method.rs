//! Unit tests for MethodInfo and MethodFlags

use core_types::{ClassId, MethodFlags, MethodId, MethodInfo};

#[test]
fn test_method_info_defaults() {
    let info = MethodInfo::new(MethodId(1), "get", ClassId(2), 20, 1);
    assert_eq!(info.flags, MethodFlags::default());
    assert!(info.has_receiver());
    assert!(!info.is_eh_aware());
}

#[test]
fn test_static_method_has_no_receiver() {
    let info = MethodInfo::new(MethodId(1), "max", ClassId(2), 20, 2).with_flags(MethodFlags {
        is_static: true,
        ..MethodFlags::default()
    });
    assert!(!info.has_receiver());
}

#[test]
fn test_eh_aware() {
    let info = MethodInfo::new(MethodId(1), "run", ClassId(2), 20, 1).with_flags(MethodFlags {
        exception_handler_count: 2,
        ..MethodFlags::default()
    });
    assert!(info.is_eh_aware());
}

#[test]
fn test_signature() {
    let info = MethodInfo::new(MethodId(4), "hashCode", ClassId(9), 8, 1);
    assert_eq!(info.signature(), "c9.hashCode");
}
