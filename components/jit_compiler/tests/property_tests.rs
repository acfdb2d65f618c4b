//! Property tests for size scaling and call-graph bookkeeping

use core_types::{ClassId, MethodId, MethodInfo};
use jit_compiler::ir::{CallKind, MethodIr, Node, Place, TreeTop};
use jit_compiler::{
    scale_size_based_on_block_frequency, DefaultInlinerPolicy, Inliner, InliningEnv, MethodIlRepository,
    SharedClassHierarchy, SharedProfileStore, TargetState,
};
use proptest::prelude::*;

const HOT: u32 = 2500;
const MAX: u32 = 10000;

proptest! {
    #[test]
    fn scaled_size_never_below_floor(
        size in 0u32..5000,
        freq in 0u32..=MAX,
        cold in 0u32..HOT,
    ) {
        prop_assert!(scale_size_based_on_block_frequency(size, freq, HOT, cold, MAX) >= 10);
    }

    #[test]
    fn scaled_size_falls_with_frequency(
        size in 10u32..5000,
        freq in 0u32..=MAX,
        drop in 0u32..=MAX,
    ) {
        let colder = freq.saturating_sub(drop);
        let warm = scale_size_based_on_block_frequency(size, freq, HOT, 0, MAX);
        let cold = scale_size_based_on_block_frequency(size, colder, HOT, 0, MAX);
        prop_assert!(cold <= warm);
    }

    #[test]
    fn hot_blocks_are_not_scaled(size in 10u32..5000, freq in HOT..=MAX) {
        prop_assert_eq!(scale_size_based_on_block_frequency(size, freq, HOT, 0, MAX), size);
    }

    #[test]
    fn every_target_is_decided_exactly_once(
        sizes in proptest::collection::vec(1u32..400, 1..12),
    ) {
        let hierarchy = SharedClassHierarchy::new();
        hierarchy.add_class(ClassId(1), None, &[]);
        let mut main = MethodInfo::new(MethodId(1), "main", ClassId(1), 60, 0);
        main.flags.is_static = true;
        hierarchy.add_method(main);
        let bodies = MethodIlRepository::new();

        let mut ir = MethodIr::new(MethodId(1), sizes.len() as u32);
        for (i, size) in sizes.iter().enumerate() {
            let method = MethodId(i as u32 + 2);
            let mut info = MethodInfo::new(method, "leaf", ClassId(1), *size, 0);
            info.flags.is_static = true;
            hierarchy.add_method(info);
            let mut body = MethodIr::new(method, 0);
            body.push(0, TreeTop::Return(Some(Node::Const(i as i64))));
            bodies.insert(body);

            let call = ir
                .make_call(CallKind::Direct, method, vec![])
                .with_result(Place::Local(i as u32))
                .at_bytecode_index(i as u32);
            ir.push(0, TreeTop::Call(call));
        }
        ir.push(0, TreeTop::Return(None));

        let profiles = SharedProfileStore::new();
        let policy = DefaultInlinerPolicy::new();
        let mut inliner = Inliner::new(InliningEnv::new(&hierarchy, &profiles, &bodies, &policy));
        let summary = inliner.perform_inlining(&mut ir).unwrap();

        let mut committed = 0;
        for (_, target) in inliner.call_graph().all_targets() {
            match target.state() {
                TargetState::Committed => {
                    committed += 1;
                    prop_assert!(target.failure_reason().is_none());
                }
                TargetState::Removed(reason) => {
                    prop_assert_eq!(target.failure_reason(), Some(reason));
                }
                TargetState::Candidate => prop_assert!(false, "undecided target"),
            }
        }
        prop_assert_eq!(committed, summary.sites_inlined);
        prop_assert_eq!(summary.sites_processed as usize, sizes.len());
        prop_assert!(summary.node_count_after >= summary.node_count_before);
    }
}
