//! Substitution of a callee body at a call
//!
//! Splicing happens in two steps. [`prepare_splice`] builds the complete
//! edit without touching the caller: renamed callee blocks, argument
//! stores, the guard and the slow path. [`apply_splice`] then installs it.
//! An attempt abandoned between the two leaves the caller unchanged.
//!
//! Layout after a guarded splice of a call in block `B`:
//!
//! ```text
//! B:     trees before the call, argument stores, guard -> (E, S)
//! E..:   callee blocks, returns rewritten to stores + goto C
//! C:     trees that followed the call
//! S:     original call with materialized arguments, goto C
//! ```

use crate::call_stack::CallStack;
use crate::failure::FailureReason;
use crate::guard::VirtualGuardSelection;
use crate::ir::{
    Block, BlockId, CallKind, CallNode, CallNodeId, InlinedCallSite, MethodIr, Node, Place,
    TempId, TreeTop,
};
use crate::parameter_mapper::ParameterMapper;
use core_types::{MethodId, MethodInfo};
use std::collections::HashMap;

/// A fully built splice, not yet installed
#[derive(Debug, Clone)]
pub struct SplicePlan {
    block: BlockId,
    index: usize,
    base: BlockId,
    continuation: BlockId,
    frequency: u32,
    is_cold: bool,
    guard: VirtualGuardSelection,
    method: MethodId,
    pre_guard: Vec<TreeTop>,
    receiver: Option<Node>,
    blocks: Vec<Block>,
    slow_call: Option<CallNode>,
    new_calls: Vec<CallNodeId>,
    inlined_site: InlinedCallSite,
    next_call_id: u32,
    temp_count: u32,
    nodes_added: u32,
}

impl SplicePlan {
    /// Nodes the splice will add to the caller
    pub fn nodes_added(&self) -> u32 {
        self.nodes_added
    }

    /// Calls of the callee body, renumbered for the caller
    pub fn new_calls(&self) -> &[CallNodeId] {
        &self.new_calls
    }
}

/// What an installed splice produced
#[derive(Debug, Clone, PartialEq)]
pub struct SpliceOutcome {
    /// First block of the inlined body
    pub entry: BlockId,
    /// Block holding the trees that followed the call
    pub continuation: BlockId,
    /// Block holding the preserved call, for guarded splices
    pub slow_path: Option<BlockId>,
    /// The preserved call
    pub slow_call: Option<CallNodeId>,
    /// Calls of the inlined body, in program order
    pub new_calls: Vec<CallNodeId>,
    /// Index of the new entry in [`MethodIr::inlined_sites`]
    pub inlined_site: usize,
    /// Synthesized nodes
    pub nodes_added: u32,
}

struct Renamer<'m> {
    mapper: &'m mut ParameterMapper,
    locals: Vec<TempId>,
    temps: HashMap<TempId, TempId>,
}

impl Renamer<'_> {
    fn node(&mut self, node: &Node) -> Result<Node, FailureReason> {
        node.try_rewrite(&mut |n| {
            Ok(match n {
                Node::LoadParm(p) => Some(self.mapper.map(*p)?),
                Node::ParmAddress(p) => Some(self.mapper.map_address(*p)?),
                Node::LoadLocal(l) => Some(Node::LoadTemp(local(&self.locals, *l)?)),
                Node::LoadTemp(t) => Some(Node::LoadTemp(temp(&self.temps, *t)?)),
                Node::TempAddress(t) => Some(Node::TempAddress(temp(&self.temps, *t)?)),
                _ => None,
            })
        })
    }

    fn place(&self, place: Place) -> Result<Place, FailureReason> {
        Ok(match place {
            Place::Local(l) => Place::Temp(local(&self.locals, l)?),
            Place::Temp(t) => Place::Temp(temp(&self.temps, t)?),
        })
    }
}

fn local(locals: &[TempId], slot: u32) -> Result<TempId, FailureReason> {
    locals.get(slot as usize).copied().ok_or(FailureReason::EcsFailed)
}

fn temp(temps: &HashMap<TempId, TempId>, t: TempId) -> Result<TempId, FailureReason> {
    temps.get(&t).copied().ok_or(FailureReason::EcsFailed)
}

/// Build the splice of `callee_ir` at call `call_id` of `ir`.
///
/// Temporaries are taken from `frame`; nothing in `ir` changes.
#[allow(clippy::too_many_arguments)]
pub fn prepare_splice(
    ir: &MethodIr,
    call_id: CallNodeId,
    callee_ir: &MethodIr,
    callee: &MethodInfo,
    guard: VirtualGuardSelection,
    mapper: &mut ParameterMapper,
    frame: &mut CallStack<'_>,
    temp_limit: u32,
) -> Result<SplicePlan, FailureReason> {
    let (block, index) = ir.find_call(call_id).ok_or(FailureReason::CallNodeNotFound)?;
    let call = ir.call(call_id).ok_or(FailureReason::CallNodeNotFound)?;
    if callee_ir.blocks.is_empty() {
        return Err(FailureReason::EcsFailed);
    }
    let caller_block = &ir.blocks[block];

    let base = ir.blocks.len();
    let continuation = base + callee_ir.blocks.len();
    let guarded = guard.is_real_guard();
    let site_index = ir.inlined_sites.len();

    // the receiver is tested by the guard and read again by body and slow path
    let receiver = if guarded && callee.has_receiver() && !call.args.is_empty() {
        Some(Node::LoadTemp(mapper.ensure_materialized(0, frame, temp_limit)?))
    } else {
        None
    };

    // a receiver the body overwrites is no longer the object the guard tested
    let receiver_intact = callee.has_receiver()
        && mapper
            .find_mapping(0)
            .map_or(false, |m| !m.is_modified && !m.address_taken);

    let locals = (0..callee_ir.local_count)
        .map(|_| frame.try_new_temp(temp_limit))
        .collect::<Result<Vec<_>, _>>()?;
    let temps = (0..callee_ir.temp_count)
        .map(|t| Ok((TempId(t), frame.try_new_temp(temp_limit)?)))
        .collect::<Result<HashMap<_, _>, FailureReason>>()?;
    let mut renamer = Renamer {
        mapper,
        locals,
        temps,
    };

    let entry_frequency = callee_ir.blocks[callee_ir.entry()].frequency.max(1);
    let mut next_call_id = ir.peek_call_id();
    let mut new_calls = Vec::new();
    let mut blocks = Vec::with_capacity(callee_ir.blocks.len());

    for callee_block in &callee_ir.blocks {
        let scaled = callee_block.frequency as u64 * caller_block.frequency as u64 / entry_frequency as u64;
        let mut new_block = Block::new(base + callee_block.id, scaled.min(caller_block.frequency as u64) as u32);
        new_block.is_cold = callee_block.is_cold || caller_block.is_cold;

        for tree in &callee_block.trees {
            match tree {
                TreeTop::Eval(node) => new_block.trees.push(TreeTop::Eval(renamer.node(node)?)),
                TreeTop::Store { place, value } => new_block.trees.push(TreeTop::Store {
                    place: renamer.place(*place)?,
                    value: renamer.node(value)?,
                }),
                TreeTop::StoreParm { parm, value } => {
                    let value = renamer.node(value)?;
                    new_block.trees.push(TreeTop::Store {
                        place: renamer.mapper.store_target(*parm)?,
                        value,
                    });
                }
                TreeTop::Call(nested) => {
                    let mut copy = nested.clone();
                    copy.id = CallNodeId(next_call_id);
                    next_call_id += 1;
                    copy.args = nested
                        .args
                        .iter()
                        .map(|a| renamer.node(a))
                        .collect::<Result<_, _>>()?;
                    copy.result = nested.result.map(|p| renamer.place(p)).transpose()?;
                    copy.origin = Some(site_index);
                    copy.receiver_preexists = receiver_intact
                        && nested.kind != CallKind::Direct
                        && nested.args.first() == Some(&Node::LoadParm(0));
                    new_calls.push(copy.id);
                    new_block.trees.push(TreeTop::Call(copy));
                }
                TreeTop::Goto(target) => new_block.trees.push(TreeTop::Goto(base + target)),
                TreeTop::If {
                    cond,
                    then_block,
                    else_block,
                } => new_block.trees.push(TreeTop::If {
                    cond: renamer.node(cond)?,
                    then_block: base + then_block,
                    else_block: base + else_block,
                }),
                TreeTop::Guard {
                    guard,
                    method,
                    receiver,
                    taken,
                    untaken,
                } => new_block.trees.push(TreeTop::Guard {
                    guard: *guard,
                    method: *method,
                    receiver: receiver.as_ref().map(|r| renamer.node(r)).transpose()?,
                    taken: base + taken,
                    untaken: base + untaken,
                }),
                TreeTop::Return(value) => {
                    match (value, call.result) {
                        (Some(value), Some(place)) => new_block.trees.push(TreeTop::Store {
                            place,
                            value: renamer.node(value)?,
                        }),
                        (Some(value), None) if !value.is_trivial() => {
                            new_block.trees.push(TreeTop::Eval(renamer.node(value)?))
                        }
                        _ => {}
                    }
                    new_block.trees.push(TreeTop::Goto(continuation));
                }
            }
        }
        if !new_block.trees.last().map_or(false, TreeTop::is_terminator) {
            new_block.trees.push(TreeTop::Goto(continuation));
        }
        blocks.push(new_block);
    }

    let slow_call = guarded.then(|| {
        let mut copy = call.clone();
        copy.id = CallNodeId(next_call_id);
        next_call_id += 1;
        renamer.mapper.fix_call_node_args(&mut copy);
        copy
    });

    let pre_guard = renamer.mapper.materializations();
    let dispatch = dispatch_tree(guard, callee.id, receiver.clone(), base, continuation + 1);
    let nodes_added = pre_guard.iter().map(TreeTop::node_count).sum::<u32>()
        + dispatch.node_count()
        + blocks
            .iter()
            .flat_map(|b| b.trees.iter())
            .map(TreeTop::node_count)
            .sum::<u32>()
        + slow_call.as_ref().map_or(0, |c| TreeTop::Call(c.clone()).node_count() + 1);

    Ok(SplicePlan {
        block,
        index,
        base,
        continuation,
        frequency: caller_block.frequency,
        is_cold: caller_block.is_cold,
        guard,
        method: callee.id,
        pre_guard,
        receiver,
        blocks,
        slow_call,
        new_calls,
        inlined_site: InlinedCallSite {
            method: callee.id,
            caller: call.origin,
            bytecode_index: call.bytecode_index,
        },
        next_call_id,
        temp_count: ir.temp_count.max(frame.next_temp()),
        nodes_added,
    })
}

fn dispatch_tree(
    guard: VirtualGuardSelection,
    method: MethodId,
    receiver: Option<Node>,
    entry: BlockId,
    slow_path: BlockId,
) -> TreeTop {
    if guard.is_real_guard() {
        TreeTop::Guard {
            guard,
            method,
            receiver,
            taken: entry,
            untaken: slow_path,
        }
    } else {
        TreeTop::Goto(entry)
    }
}

/// Install a plan built by [`prepare_splice`] against the same `ir`
pub fn apply_splice(ir: &mut MethodIr, plan: SplicePlan) -> Result<SpliceOutcome, FailureReason> {
    let in_place = ir.blocks.len() == plan.base
        && matches!(
            ir.blocks.get(plan.block).and_then(|b| b.trees.get(plan.index)),
            Some(TreeTop::Call(_))
        );
    if !in_place {
        return Err(FailureReason::CallNodeNotFound);
    }

    let slow_path = plan.slow_call.as_ref().map(|_| plan.continuation + 1);
    let dispatch = dispatch_tree(
        plan.guard,
        plan.method,
        plan.receiver,
        plan.base,
        plan.continuation + 1,
    );

    let split = &mut ir.blocks[plan.block];
    let mut rest = split.trees.split_off(plan.index);
    rest.remove(0);
    split.trees.extend(plan.pre_guard);
    split.trees.push(dispatch);

    ir.blocks.extend(plan.blocks);
    let mut continuation = Block::new(plan.continuation, plan.frequency);
    continuation.is_cold = plan.is_cold;
    continuation.trees = rest;
    ir.blocks.push(continuation);

    let slow_call = plan.slow_call.map(|call| {
        let id = call.id;
        let mut slow = Block::new(plan.continuation + 1, plan.frequency);
        slow.is_cold = plan.is_cold;
        if plan.guard.high_probability() {
            slow.frequency = 0;
            slow.is_cold = true;
        }
        slow.trees.push(TreeTop::Call(call));
        slow.trees.push(TreeTop::Goto(plan.continuation));
        ir.blocks.push(slow);
        id
    });

    ir.temp_count = ir.temp_count.max(plan.temp_count);
    let inlined_site = ir.inlined_sites.len();
    ir.inlined_sites.push(plan.inlined_site);
    ir.advance_call_ids(plan.next_call_id);

    Ok(SpliceOutcome {
        entry: plan.base,
        continuation: plan.continuation,
        slow_path,
        slow_call,
        new_calls: plan.new_calls,
        inlined_site,
        nodes_added: plan.nodes_added,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::{DiscoveryPath, GuardSelector};
    use crate::ir::BinaryOp;
    use core_types::ClassId;

    const CALLER: MethodId = MethodId(1);
    const CALLEE: MethodId = MethodId(2);

    /// local1 = callee(local0); return local1
    fn caller() -> (MethodIr, CallNodeId) {
        let mut ir = MethodIr::new(CALLER, 2);
        let call = ir
            .make_call(CallKind::Indirect, CALLEE, vec![Node::LoadLocal(0), Node::Const(5)])
            .with_result(Place::Local(1));
        let id = call.id;
        ir.push(0, TreeTop::Call(call));
        ir.push(0, TreeTop::Return(Some(Node::LoadLocal(1))));
        (ir, id)
    }

    /// return field(p0, 0) + p1, with one local
    fn callee_body() -> MethodIr {
        let mut ir = MethodIr::new(CALLEE, 1);
        ir.push(
            0,
            TreeTop::Store {
                place: Place::Local(0),
                value: Node::field(Node::LoadParm(0), 0),
            },
        );
        ir.push(
            0,
            TreeTop::Return(Some(Node::binary(BinaryOp::Add, Node::LoadLocal(0), Node::LoadParm(1)))),
        );
        ir
    }

    fn callee_info() -> MethodInfo {
        MethodInfo::new(CALLEE, "get", ClassId(3), 12, 2)
    }

    fn splice(guard: VirtualGuardSelection) -> (MethodIr, SpliceOutcome) {
        let (mut ir, call_id) = caller();
        let body = callee_body();
        let info = callee_info();
        let snapshot = ir.clone();
        let root = CallStack::root(CALLER, &snapshot);
        let mut frame = CallStack::child(&root, CALLEE, guard, ir.temp_count);
        let args = ir.call(call_id).unwrap().args.clone();
        let mut mapper = ParameterMapper::initialize(&args, &info, &body, &mut frame, 16).unwrap();
        let plan = prepare_splice(&ir, call_id, &body, &info, guard, &mut mapper, &mut frame, 16).unwrap();
        let outcome = apply_splice(&mut ir, plan).unwrap();
        (ir, outcome)
    }

    #[test]
    fn test_unguarded_splice() {
        let (ir, outcome) = splice(VirtualGuardSelection::no_guard());
        assert_eq!(outcome.entry, 1);
        assert_eq!(outcome.continuation, 2);
        assert_eq!(outcome.slow_call, None);
        assert_eq!(ir.blocks[0].trees, vec![TreeTop::Goto(1)]);
        assert_eq!(ir.blocks[2].trees, vec![TreeTop::Return(Some(Node::LoadLocal(1)))]);
        assert_eq!(ir.count_calls_to(CALLEE), 0);
        assert_eq!(ir.inlined_sites.len(), 1);
        assert!(outcome.nodes_added > 0);
    }

    #[test]
    fn test_body_is_renamed() {
        let (ir, _) = splice(VirtualGuardSelection::no_guard());
        // p0 substituted directly, callee local 0 renamed to a temp
        assert_eq!(
            ir.blocks[1].trees,
            vec![
                TreeTop::Store {
                    place: Place::Temp(TempId(0)),
                    value: Node::field(Node::LoadLocal(0), 0),
                },
                TreeTop::Store {
                    place: Place::Local(1),
                    value: Node::binary(BinaryOp::Add, Node::LoadTemp(TempId(0)), Node::Const(5)),
                },
                TreeTop::Goto(2),
            ]
        );
        assert_eq!(ir.temp_count, 1);
    }

    #[test]
    fn test_guarded_splice() {
        let guard = GuardSelector::select(DiscoveryPath::Profiled(ClassId(3)));
        let (ir, outcome) = splice(guard);
        let slow = outcome.slow_path.unwrap();

        let guards = ir.guards();
        assert_eq!(guards.len(), 1);
        match guards[0].1 {
            TreeTop::Guard { taken, untaken, receiver, .. } => {
                assert_eq!(*taken, outcome.entry);
                assert_eq!(*untaken, slow);
                assert_eq!(receiver, &Some(Node::LoadTemp(TempId(0))));
            }
            other => panic!("unexpected tree {other:?}"),
        }
        let slow_call = ir.call(outcome.slow_call.unwrap()).unwrap();
        assert_eq!(slow_call.method, CALLEE);
        assert_eq!(slow_call.args, vec![Node::LoadTemp(TempId(0)), Node::Const(5)]);
        assert_eq!(ir.find_call(slow_call.id).map(|(b, _)| b), Some(slow));
        assert_eq!(ir.successors(slow), vec![outcome.continuation]);
        assert!(!ir.blocks[slow].is_cold);
    }

    #[test]
    fn test_high_probability_marks_slow_path_cold() {
        let mut guard = GuardSelector::select(DiscoveryPath::Profiled(ClassId(3)));
        guard.mark_high_probability();
        let (ir, outcome) = splice(guard);
        let slow = outcome.slow_path.unwrap();
        assert!(ir.blocks[slow].is_cold);
        assert_eq!(ir.blocks[slow].frequency, 0);
    }

    #[test]
    fn test_failed_prepare_leaves_caller_untouched() {
        let (ir, call_id) = caller();
        let before = ir.clone();
        let body = callee_body();
        let info = callee_info();
        let root = CallStack::root(CALLER, &before);
        let mut frame = CallStack::child(&root, CALLEE, VirtualGuardSelection::no_guard(), 0);
        let args = ir.call(call_id).unwrap().args.clone();
        let mut mapper = ParameterMapper::initialize(&args, &info, &body, &mut frame, 16).unwrap();
        // no room for the callee's local
        let err = prepare_splice(
            &ir,
            call_id,
            &body,
            &info,
            VirtualGuardSelection::no_guard(),
            &mut mapper,
            &mut frame,
            0,
        );
        assert_eq!(err.unwrap_err(), FailureReason::WillCreateUnallowedTemps);
        assert_eq!(ir, before);
    }

    #[test]
    fn test_nested_calls_get_origin() {
        let (mut ir, call_id) = caller();
        let mut body = MethodIr::new(CALLEE, 0);
        let nested = body.make_call(CallKind::Indirect, MethodId(9), vec![Node::LoadParm(0)]);
        body.push(0, TreeTop::Call(nested));
        body.push(0, TreeTop::Return(None));
        let info = callee_info();

        let snapshot = ir.clone();
        let root = CallStack::root(CALLER, &snapshot);
        let mut frame = CallStack::child(&root, CALLEE, VirtualGuardSelection::no_guard(), 0);
        let args = ir.call(call_id).unwrap().args.clone();
        let mut mapper = ParameterMapper::initialize(&args, &info, &body, &mut frame, 16).unwrap();
        let plan = prepare_splice(
            &ir,
            call_id,
            &body,
            &info,
            VirtualGuardSelection::no_guard(),
            &mut mapper,
            &mut frame,
            16,
        )
        .unwrap();
        let outcome = apply_splice(&mut ir, plan).unwrap();

        assert_eq!(outcome.new_calls.len(), 1);
        let call = ir.call(outcome.new_calls[0]).unwrap();
        assert_eq!(call.origin, Some(0));
        assert!(call.receiver_preexists);
        assert_eq!(call.args, vec![Node::LoadLocal(0)]);
        assert_eq!(ir.owning_method(call), CALLEE);
        assert_ne!(call.id, call_id);
    }

    #[test]
    fn test_overwritten_receiver_does_not_preexist() {
        let (mut ir, call_id) = caller();
        let mut body = MethodIr::new(CALLEE, 0);
        body.push(
            0,
            TreeTop::StoreParm {
                parm: 0,
                value: Node::Const(0),
            },
        );
        let nested = body.make_call(CallKind::Indirect, MethodId(9), vec![Node::LoadParm(0)]);
        body.push(0, TreeTop::Call(nested));
        body.push(0, TreeTop::Return(None));
        let info = callee_info();

        let snapshot = ir.clone();
        let root = CallStack::root(CALLER, &snapshot);
        let mut frame = CallStack::child(&root, CALLEE, VirtualGuardSelection::no_guard(), 0);
        let args = ir.call(call_id).unwrap().args.clone();
        let mut mapper = ParameterMapper::initialize(&args, &info, &body, &mut frame, 16).unwrap();
        let plan = prepare_splice(
            &ir,
            call_id,
            &body,
            &info,
            VirtualGuardSelection::no_guard(),
            &mut mapper,
            &mut frame,
            16,
        )
        .unwrap();
        let outcome = apply_splice(&mut ir, plan).unwrap();

        let call = ir.call(outcome.new_calls[0]).unwrap();
        assert!(!call.receiver_preexists);
        // the nested call reads the temporary the store went to
        let temp = mapper.find_mapping(0).and_then(|m| m.temp()).unwrap();
        assert_eq!(call.args, vec![Node::LoadTemp(temp)]);
    }
}
