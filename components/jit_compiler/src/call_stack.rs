//! Frames of the inline attempts in progress
//!
//! Every attempt opens a [`CallStack`] frame linked to the frame of the
//! method it is being inlined into. Frames provide:
//! - Recursion detection over open frames and already-inlined sites
//! - A frame-local temporary pool, merged into the parent only on commit
//! - Per-block control-flow facts (inside a loop, always reached)
//! - Preexistence facts derived lazily from the guard in scope

use crate::failure::FailureReason;
use crate::guard::{GuardKind, VirtualGuardSelection};
use crate::ir::{BlockId, InlinedCallSite, MethodIr, TempId};
use core_types::{ClassId, MethodId};
use std::cell::OnceCell;

/// Control-flow facts for one block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockInfo {
    /// Block lies on a cycle
    pub in_a_loop: bool,
    /// Every path from entry to a return passes through the block
    pub always_reached: bool,
}

/// What a frame knows about its receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreexistenceInfo {
    /// Exact receiver class established by the guard
    pub receiver_class: ClassId,
    /// Guard that established it
    pub guard_kind: GuardKind,
}

/// One open inline attempt
#[derive(Debug)]
pub struct CallStack<'a> {
    parent: Option<&'a CallStack<'a>>,
    method: MethodId,
    depth: u32,
    guard: Option<VirtualGuardSelection>,
    temps: Vec<TempId>,
    next_temp: u32,
    block_info: Vec<BlockInfo>,
    in_a_loop: bool,
    always_called: bool,
    prex: OnceCell<Option<PreexistenceInfo>>,
}

impl<'a> CallStack<'a> {
    /// Frame of the method under compilation
    pub fn root(method: MethodId, ir: &MethodIr) -> Self {
        let mut frame = Self {
            parent: None,
            method,
            depth: 0,
            guard: None,
            temps: Vec::new(),
            next_temp: ir.temp_count,
            block_info: Vec::new(),
            in_a_loop: false,
            always_called: true,
            prex: OnceCell::new(),
        };
        frame.initialize_control_flow_info(ir);
        frame
    }

    /// Frame for inlining `method` under `guard`; temporaries start at `temp_base`
    pub fn child(
        parent: &'a CallStack<'a>,
        method: MethodId,
        guard: VirtualGuardSelection,
        temp_base: u32,
    ) -> Self {
        Self {
            parent: Some(parent),
            method,
            depth: parent.depth + 1,
            guard: Some(guard),
            temps: Vec::new(),
            next_temp: temp_base.max(parent.next_temp),
            block_info: parent.block_info.clone(),
            in_a_loop: parent.in_a_loop,
            always_called: parent.always_called,
            prex: OnceCell::new(),
        }
    }

    /// Method this frame inlines
    pub fn method(&self) -> MethodId {
        self.method
    }

    /// Nesting depth; 0 for the method under compilation
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Enclosing frame
    pub fn parent(&self) -> Option<&CallStack<'a>> {
        self.parent
    }

    /// Guard protecting this frame's body
    pub fn guard(&self) -> Option<&VirtualGuardSelection> {
        self.guard.as_ref()
    }

    fn frames(&self) -> impl Iterator<Item = &CallStack<'a>> {
        std::iter::successors(Some(self), |f| f.parent)
    }

    /// Check whether `method` is open on `occurrences` frames or more
    pub fn is_currently_on_the_stack(&self, method: MethodId, occurrences: u32) -> bool {
        self.open_occurrences(method) >= occurrences
    }

    fn open_occurrences(&self, method: MethodId) -> u32 {
        self.frames().filter(|f| f.method == method).count() as u32
    }

    /// Like [`CallStack::is_currently_on_the_stack`], but also counts
    /// earlier inlined occurrences along `origin`'s chain.
    ///
    /// Only the first `prior_count` entries of `inlined_sites` are
    /// considered; later ones are the current compilation's own frames,
    /// already counted through the stack.
    pub fn is_anywhere_on_the_stack(
        &self,
        method: MethodId,
        occurrences: u32,
        inlined_sites: &[InlinedCallSite],
        prior_count: usize,
        origin: Option<usize>,
    ) -> bool {
        let mut count = self.open_occurrences(method);
        let mut current = origin;
        while let Some(index) = current {
            let Some(site) = inlined_sites.get(index) else {
                break;
            };
            if index < prior_count && site.method == method {
                count += 1;
            }
            current = site.caller;
        }
        count >= occurrences
    }

    /// Compute block facts for the whole method
    pub fn initialize_control_flow_info(&mut self, ir: &MethodIr) {
        let looping = ir.looping_blocks();
        let always = always_reached_blocks(ir);
        self.block_info = looping
            .into_iter()
            .zip(always)
            .map(|(in_a_loop, always_reached)| BlockInfo {
                in_a_loop,
                always_reached,
            })
            .collect();
    }

    /// Facts for a block, if computed
    pub fn block_info(&self, block: BlockId) -> Option<BlockInfo> {
        self.block_info.get(block).copied()
    }

    /// Move the frame's position to `block`, refreshing facts after splices
    pub fn update_state(&mut self, ir: &MethodIr, block: BlockId) {
        if self.block_info.len() != ir.blocks.len() {
            self.initialize_control_flow_info(ir);
        }
        let info = self.block_info(block).unwrap_or_default();
        let (parent_loop, parent_always) = self
            .parent
            .map_or((false, true), |p| (p.in_a_loop, p.always_called));
        self.in_a_loop = parent_loop || info.in_a_loop;
        self.always_called = parent_always && info.always_reached;
    }

    /// Current position is inside a loop
    pub fn in_a_loop(&self) -> bool {
        self.in_a_loop
    }

    /// Current position runs whenever the method runs
    pub fn always_called(&self) -> bool {
        self.always_called
    }

    /// Receiver facts established by this frame's guard
    pub fn preexistence(&self) -> Option<PreexistenceInfo> {
        *self.prex.get_or_init(|| {
            let guard = self.guard?;
            guard.known_receiver_class().map(|receiver_class| PreexistenceInfo {
                receiver_class,
                guard_kind: guard.kind,
            })
        })
    }

    /// Allocate a frame-local temporary
    pub fn new_temp(&mut self) -> TempId {
        let temp = TempId(self.next_temp);
        self.next_temp += 1;
        self.temps.push(temp);
        temp
    }

    /// Allocate a temporary unless the frame already holds `limit`
    pub fn try_new_temp(&mut self, limit: u32) -> Result<TempId, FailureReason> {
        if self.temps.len() as u32 >= limit {
            return Err(FailureReason::WillCreateUnallowedTemps);
        }
        Ok(self.new_temp())
    }

    /// Temporaries owned by this frame
    pub fn temps(&self) -> &[TempId] {
        &self.temps
    }

    /// Number the next temporary will get
    pub fn next_temp(&self) -> u32 {
        self.next_temp
    }

    /// Close a successful attempt, handing its temporaries to the parent
    pub fn commit(self) -> Vec<TempId> {
        self.temps
    }

    /// Take over the temporaries of a committed child
    pub fn adopt_temps(&mut self, temps: Vec<TempId>) {
        if let Some(max) = temps.iter().map(|t| t.0).max() {
            self.next_temp = self.next_temp.max(max + 1);
        }
        self.temps.extend(temps);
    }
}

/// Blocks that dominate every reachable return
///
/// Immediate dominators come from the iterative scheme over reverse
/// postorder; a block is always reached when it sits on the dominator
/// chain of every exit.
fn always_reached_blocks(ir: &MethodIr) -> Vec<bool> {
    const UNDEFINED: usize = usize::MAX;
    let n = ir.blocks.len();
    let entry = ir.entry();
    if entry >= n {
        return vec![false; n];
    }

    let order = reverse_postorder(ir);
    let mut rpo = vec![UNDEFINED; n];
    for (position, block) in order.iter().enumerate() {
        rpo[*block] = position;
    }
    let preds = ir.predecessor_lists();

    let mut idom = vec![UNDEFINED; n];
    idom[entry] = entry;
    let mut changed = true;
    while changed {
        changed = false;
        for &block in order.iter().skip(1) {
            let mut new_idom = UNDEFINED;
            for &pred in preds[block].iter().filter(|p| idom[**p] != UNDEFINED) {
                new_idom = if new_idom == UNDEFINED {
                    pred
                } else {
                    intersect(&idom, &rpo, pred, new_idom)
                };
            }
            if new_idom != UNDEFINED && idom[block] != new_idom {
                idom[block] = new_idom;
                changed = true;
            }
        }
    }

    let exits: Vec<BlockId> = order
        .iter()
        .copied()
        .filter(|b| matches!(ir.blocks[*b].trees.last(), Some(crate::ir::TreeTop::Return(_))))
        .collect();
    let mut hits = vec![0usize; n];
    for &exit in &exits {
        let mut block = exit;
        loop {
            hits[block] += 1;
            if block == entry {
                break;
            }
            block = idom[block];
        }
    }
    hits.into_iter()
        .map(|h| !exits.is_empty() && h == exits.len())
        .collect()
}

/// Walk two dominator chains up to their common ancestor
fn intersect(idom: &[usize], rpo: &[usize], mut a: BlockId, mut b: BlockId) -> BlockId {
    while a != b {
        while rpo[a] > rpo[b] {
            a = idom[a];
        }
        while rpo[b] > rpo[a] {
            b = idom[b];
        }
    }
    a
}

/// Reachable blocks in reverse postorder from the entry
fn reverse_postorder(ir: &MethodIr) -> Vec<BlockId> {
    let n = ir.blocks.len();
    let entry = ir.entry();
    let mut visited = vec![false; n];
    let mut post = Vec::with_capacity(n);
    visited[entry] = true;
    let mut work = vec![(entry, ir.successors(entry), 0usize)];
    while let Some((block, succs, pos)) = work.last_mut() {
        if let Some(&succ) = succs.get(*pos) {
            *pos += 1;
            if succ < n && !visited[succ] {
                visited[succ] = true;
                let next = ir.successors(succ);
                work.push((succ, next, 0));
            }
        } else {
            post.push(*block);
            work.pop();
        }
    }
    post.reverse();
    post
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::{DiscoveryPath, GuardSelector};
    use crate::ir::{BinaryOp, Node, TreeTop};

    fn diamond() -> MethodIr {
        // 0 -> {1, 2} -> 3
        let mut ir = MethodIr::new(MethodId(1), 1);
        let left = ir.add_block(5000);
        let right = ir.add_block(5000);
        let join = ir.add_block(10000);
        ir.push(
            0,
            TreeTop::If {
                cond: Node::binary(BinaryOp::Eq, Node::LoadLocal(0), Node::Const(0)),
                then_block: left,
                else_block: right,
            },
        );
        ir.push(left, TreeTop::Goto(join));
        ir.push(right, TreeTop::Goto(join));
        ir.push(join, TreeTop::Return(None));
        ir
    }

    #[test]
    fn test_always_reached() {
        let ir = diamond();
        let frame = CallStack::root(MethodId(1), &ir);
        let reached: Vec<bool> = (0..4)
            .map(|b| frame.block_info(b).map_or(false, |i| i.always_reached))
            .collect();
        assert_eq!(reached, vec![true, false, false, true]);
    }

    #[test]
    fn test_always_reached_over_chained_diamonds() {
        let mut ir = MethodIr::new(MethodId(1), 1);
        let mut head = ir.entry();
        let mut arms = Vec::new();
        for _ in 0..400 {
            let left = ir.add_block(5000);
            let right = ir.add_block(5000);
            let join = ir.add_block(10000);
            ir.push(
                head,
                TreeTop::If {
                    cond: Node::binary(BinaryOp::Eq, Node::LoadLocal(0), Node::Const(0)),
                    then_block: left,
                    else_block: right,
                },
            );
            ir.push(left, TreeTop::Goto(join));
            ir.push(right, TreeTop::Goto(join));
            arms.extend([left, right]);
            head = join;
        }
        ir.push(head, TreeTop::Return(None));
        let stray = ir.add_block(0);
        ir.push(stray, TreeTop::Goto(head));

        let frame = CallStack::root(MethodId(1), &ir);
        for block in 0..ir.blocks.len() {
            let reached = frame.block_info(block).map_or(false, |i| i.always_reached);
            assert_eq!(reached, block != stray && !arms.contains(&block), "block {block}");
        }
    }

    #[test]
    fn test_only_entry_reaches_split_returns() {
        let mut ir = MethodIr::new(MethodId(1), 1);
        let left = ir.add_block(5000);
        let right = ir.add_block(5000);
        ir.push(
            0,
            TreeTop::If {
                cond: Node::binary(BinaryOp::Eq, Node::LoadLocal(0), Node::Const(0)),
                then_block: left,
                else_block: right,
            },
        );
        ir.push(left, TreeTop::Return(None));
        ir.push(right, TreeTop::Return(Some(Node::Const(1))));
        let frame = CallStack::root(MethodId(1), &ir);
        let reached: Vec<bool> = (0..3)
            .map(|b| frame.block_info(b).map_or(false, |i| i.always_reached))
            .collect();
        assert_eq!(reached, vec![true, false, false]);
    }

    #[test]
    fn test_update_state() {
        let ir = diamond();
        let mut frame = CallStack::root(MethodId(1), &ir);
        frame.update_state(&ir, 1);
        assert!(!frame.always_called());
        assert!(!frame.in_a_loop());
        frame.update_state(&ir, 3);
        assert!(frame.always_called());
    }

    #[test]
    fn test_recursion_counts_open_frames() {
        let ir = MethodIr::new(MethodId(1), 0);
        let root = CallStack::root(MethodId(1), &ir);
        assert!(root.is_currently_on_the_stack(MethodId(1), 1));
        assert!(!root.is_currently_on_the_stack(MethodId(1), 2));

        let child = CallStack::child(&root, MethodId(1), VirtualGuardSelection::no_guard(), 0);
        assert_eq!(child.depth(), 1);
        assert!(child.is_currently_on_the_stack(MethodId(1), 2));
        assert!(!child.is_currently_on_the_stack(MethodId(2), 1));
    }

    #[test]
    fn test_anywhere_counts_prior_inlined_sites() {
        let ir = MethodIr::new(MethodId(1), 0);
        let root = CallStack::root(MethodId(1), &ir);
        let sites = vec![
            InlinedCallSite {
                method: MethodId(5),
                caller: None,
                bytecode_index: 0,
            },
            InlinedCallSite {
                method: MethodId(5),
                caller: Some(0),
                bytecode_index: 3,
            },
        ];
        assert!(root.is_anywhere_on_the_stack(MethodId(5), 2, &sites, 2, Some(1)));
        assert!(!root.is_anywhere_on_the_stack(MethodId(5), 2, &sites, 1, Some(1)));
        assert!(!root.is_anywhere_on_the_stack(MethodId(5), 1, &sites, 2, None));
    }

    #[test]
    fn test_temps_merge_on_commit() {
        let mut ir = MethodIr::new(MethodId(1), 0);
        ir.temp_count = 4;
        let mut root = CallStack::root(MethodId(1), &ir);
        let temps = {
            let mut child = CallStack::child(&root, MethodId(2), VirtualGuardSelection::no_guard(), 4);
            assert_eq!(child.new_temp(), TempId(4));
            assert_eq!(child.try_new_temp(2), Ok(TempId(5)));
            assert_eq!(child.try_new_temp(2), Err(FailureReason::WillCreateUnallowedTemps));
            child.commit()
        };
        root.adopt_temps(temps);
        assert_eq!(root.temps(), &[TempId(4), TempId(5)]);
        assert_eq!(root.next_temp(), 6);
    }

    #[test]
    fn test_failed_attempt_discards_temps() {
        let ir = MethodIr::new(MethodId(1), 0);
        let root = CallStack::root(MethodId(1), &ir);
        {
            let mut child = CallStack::child(&root, MethodId(2), VirtualGuardSelection::no_guard(), 0);
            child.new_temp();
        }
        assert!(root.temps().is_empty());
    }

    #[test]
    fn test_preexistence_from_guard() {
        let ir = MethodIr::new(MethodId(1), 0);
        let root = CallStack::root(MethodId(1), &ir);
        assert_eq!(root.preexistence(), None);

        let guard = GuardSelector::select(DiscoveryPath::Profiled(ClassId(7)));
        let child = CallStack::child(&root, MethodId(2), guard, 0);
        let prex = child.preexistence().unwrap();
        assert_eq!(prex.receiver_class, ClassId(7));
        assert_eq!(prex.guard_kind, GuardKind::ProfiledGuard);

        let guard = GuardSelector::select(DiscoveryPath::NotOverridden);
        let child = CallStack::child(&root, MethodId(2), guard, 0);
        assert_eq!(child.preexistence(), None);
    }
}
