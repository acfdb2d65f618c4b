//! Intermediate representation the inliner operates on
//!
//! A method is a list of blocks; each block is a list of trees ending in
//! an explicit terminator. Block ids are positions in [`MethodIr::blocks`],
//! so splicing only ever appends blocks and never renumbers existing ones.
//!
//! The model is deliberately small: enough expression forms to bind
//! arguments to parameters, rename callee locals, and tell constants from
//! values that must be materialized.

use crate::guard::VirtualGuardSelection;
use core_types::{ClassId, MethodId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Index of a block within its method
pub type BlockId = usize;

/// Compiler temporary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TempId(pub u32);

/// Identifier of a call node, unique within one method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallNodeId(pub u32);

/// How a call is dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallKind {
    /// Statically bound
    Direct,
    /// Virtual dispatch through the receiver's class
    Indirect,
    /// Dispatch through an interface
    Interface,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// Addition
    Add,
    /// Subtraction
    Sub,
    /// Multiplication
    Mul,
    /// Less-than comparison
    Lt,
    /// Equality comparison
    Eq,
}

/// Expression node
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Integer constant
    Const(i64),
    /// Value of a formal parameter
    LoadParm(u32),
    /// Address of a formal parameter
    ParmAddress(u32),
    /// Value of a local slot
    LoadLocal(u32),
    /// Value of a temporary
    LoadTemp(TempId),
    /// Address of a temporary
    TempAddress(TempId),
    /// Field load
    LoadField {
        /// Object the field is read from
        object: Box<Node>,
        /// Field index
        field: u32,
    },
    /// Binary operation
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        lhs: Box<Node>,
        /// Right operand
        rhs: Box<Node>,
    },
}

impl Node {
    /// Build a binary node
    pub fn binary(op: BinaryOp, lhs: Node, rhs: Node) -> Node {
        Node::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Build a field load
    pub fn field(object: Node, field: u32) -> Node {
        Node::LoadField {
            object: Box::new(object),
            field,
        }
    }

    /// Check if the node is a constant
    pub fn is_const(&self) -> bool {
        matches!(self, Node::Const(_))
    }

    /// Check if the node can be duplicated without changing behaviour or cost
    pub fn is_trivial(&self) -> bool {
        matches!(self, Node::Const(_) | Node::LoadLocal(_) | Node::LoadTemp(_))
    }

    /// Number of nodes in the expression
    pub fn node_count(&self) -> u32 {
        match self {
            Node::LoadField { object, .. } => 1 + object.node_count(),
            Node::Binary { lhs, rhs, .. } => 1 + lhs.node_count() + rhs.node_count(),
            _ => 1,
        }
    }

    /// Pre-order walk
    pub fn visit<F: FnMut(&Node)>(&self, f: &mut F) {
        f(self);
        match self {
            Node::LoadField { object, .. } => object.visit(f),
            Node::Binary { lhs, rhs, .. } => {
                lhs.visit(f);
                rhs.visit(f);
            }
            _ => {}
        }
    }

    /// Copy the expression, letting `f` replace subtrees.
    ///
    /// `f` sees each node before its children; returning `Some` replaces
    /// the whole subtree.
    pub fn try_rewrite<E, F>(&self, f: &mut F) -> Result<Node, E>
    where
        F: FnMut(&Node) -> Result<Option<Node>, E>,
    {
        if let Some(replacement) = f(self)? {
            return Ok(replacement);
        }
        Ok(match self {
            Node::LoadField { object, field } => Node::LoadField {
                object: Box::new(object.try_rewrite(f)?),
                field: *field,
            },
            Node::Binary { op, lhs, rhs } => Node::Binary {
                op: *op,
                lhs: Box::new(lhs.try_rewrite(f)?),
                rhs: Box::new(rhs.try_rewrite(f)?),
            },
            leaf => leaf.clone(),
        })
    }
}

/// Storage location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Place {
    /// Method local slot
    Local(u32),
    /// Compiler temporary
    Temp(TempId),
}

/// A call instruction
#[derive(Debug, Clone, PartialEq)]
pub struct CallNode {
    /// Identifier within the method
    pub id: CallNodeId,
    /// Dispatch kind
    pub kind: CallKind,
    /// Statically referenced method (the selector for virtual calls)
    pub method: MethodId,
    /// Actual arguments, receiver first
    pub args: Vec<Node>,
    /// Where the returned value is stored
    pub result: Option<Place>,
    /// Bytecode index in the method the call originally belongs to
    pub bytecode_index: u32,
    /// Inlined call site this call came from; `None` for the method itself
    pub origin: Option<usize>,
    /// Receiver class known from the surrounding code
    pub receiver_class: Option<ClassId>,
    /// Target recorded for a mutable call site
    pub known_target: Option<MethodId>,
    /// Receiver is the enclosing inlined method's own receiver
    pub receiver_preexists: bool,
    /// Inline regardless of size
    pub force_inline: bool,
}

impl CallNode {
    /// Create a call with no result and no hints
    pub fn new(id: CallNodeId, kind: CallKind, method: MethodId, args: Vec<Node>) -> Self {
        Self {
            id,
            kind,
            method,
            args,
            result: None,
            bytecode_index: 0,
            origin: None,
            receiver_class: None,
            known_target: None,
            receiver_preexists: false,
            force_inline: false,
        }
    }

    /// Store the result into `place`
    pub fn with_result(mut self, place: Place) -> Self {
        self.result = Some(place);
        self
    }

    /// Set the bytecode index
    pub fn at_bytecode_index(mut self, bytecode_index: u32) -> Self {
        self.bytecode_index = bytecode_index;
        self
    }

    /// Set the receiver-class hint
    pub fn with_receiver_class(mut self, class: ClassId) -> Self {
        self.receiver_class = Some(class);
        self
    }

    /// Record the current target of a mutable call site
    pub fn with_known_target(mut self, target: MethodId) -> Self {
        self.known_target = Some(target);
        self
    }

    /// Require inlining regardless of size
    pub fn forced(mut self) -> Self {
        self.force_inline = true;
        self
    }

    /// Check if every argument is a constant
    pub fn all_consts(&self) -> bool {
        !self.args.is_empty() && self.args.iter().all(Node::is_const)
    }

    /// Number of constant arguments
    pub fn const_arg_count(&self) -> u32 {
        self.args.iter().filter(|a| a.is_const()).count() as u32
    }

    fn node_count(&self) -> u32 {
        1 + self.args.iter().map(Node::node_count).sum::<u32>()
    }
}

/// Statement at the top of a tree
#[derive(Debug, Clone, PartialEq)]
pub enum TreeTop {
    /// Evaluate an expression for its side effects
    Eval(Node),
    /// Store to a local or temporary
    Store {
        /// Destination
        place: Place,
        /// Stored value
        value: Node,
    },
    /// Store to a formal parameter
    StoreParm {
        /// Parameter index
        parm: u32,
        /// Stored value
        value: Node,
    },
    /// Call
    Call(CallNode),
    /// Unconditional branch
    Goto(BlockId),
    /// Conditional branch
    If {
        /// Condition
        cond: Node,
        /// Target when true
        then_block: BlockId,
        /// Target when false
        else_block: BlockId,
    },
    /// Virtual guard protecting an inlined body
    Guard {
        /// Selected guard
        guard: VirtualGuardSelection,
        /// Method whose body sits on the taken path
        method: MethodId,
        /// Receiver value the guard tests
        receiver: Option<Node>,
        /// Target when the guard holds
        taken: BlockId,
        /// Target when the guard fails
        untaken: BlockId,
    },
    /// Return from the method
    Return(Option<Node>),
}

impl TreeTop {
    /// Number of nodes in the tree
    pub fn node_count(&self) -> u32 {
        match self {
            TreeTop::Eval(node) => 1 + node.node_count(),
            TreeTop::Store { value, .. } | TreeTop::StoreParm { value, .. } => {
                1 + value.node_count()
            }
            TreeTop::Call(call) => call.node_count(),
            TreeTop::Goto(_) => 1,
            TreeTop::If { cond, .. } => 1 + cond.node_count(),
            TreeTop::Guard { receiver, .. } => 1 + receiver.as_ref().map_or(0, Node::node_count),
            TreeTop::Return(value) => 1 + value.as_ref().map_or(0, Node::node_count),
        }
    }

    /// Blocks control can reach directly from this tree
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            TreeTop::Goto(target) => vec![*target],
            TreeTop::If {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            TreeTop::Guard { taken, untaken, .. } => vec![*taken, *untaken],
            _ => Vec::new(),
        }
    }

    /// Walk every expression node held by the tree
    pub fn visit_nodes<F: FnMut(&Node)>(&self, f: &mut F) {
        match self {
            TreeTop::Eval(node) => node.visit(f),
            TreeTop::Store { value, .. } | TreeTop::StoreParm { value, .. } => value.visit(f),
            TreeTop::Call(call) => call.args.iter().for_each(|a| a.visit(f)),
            TreeTop::If { cond, .. } => cond.visit(f),
            TreeTop::Guard { receiver, .. } => {
                if let Some(receiver) = receiver {
                    receiver.visit(f);
                }
            }
            TreeTop::Return(value) => {
                if let Some(value) = value {
                    value.visit(f);
                }
            }
            TreeTop::Goto(_) => {}
        }
    }

    /// Check if the tree ends a block
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            TreeTop::Goto(_) | TreeTop::If { .. } | TreeTop::Guard { .. } | TreeTop::Return(_)
        )
    }
}

/// Basic block
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// Position in the method
    pub id: BlockId,
    /// Observed execution frequency
    pub frequency: u32,
    /// Block is known to be rarely executed
    pub is_cold: bool,
    /// Trees in execution order
    pub trees: Vec<TreeTop>,
}

impl Block {
    /// Frequency assumed for blocks without profiling data
    pub const DEFAULT_FREQUENCY: u32 = 10000;

    /// Create an empty block
    pub fn new(id: BlockId, frequency: u32) -> Self {
        Self {
            id,
            frequency,
            is_cold: false,
            trees: Vec::new(),
        }
    }

    /// Successors, taken from the terminator
    pub fn successors(&self) -> Vec<BlockId> {
        self.trees.last().map(TreeTop::successors).unwrap_or_default()
    }
}

/// Record of a call site whose body has been inlined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlinedCallSite {
    /// Inlined method
    pub method: MethodId,
    /// Inlined call site the call itself came from
    pub caller: Option<usize>,
    /// Bytecode index of the call in its owning method
    pub bytecode_index: u32,
}

/// Method body
#[derive(Debug, Clone, PartialEq)]
pub struct MethodIr {
    /// Method the body belongs to
    pub method: MethodId,
    /// Blocks; block 0 is the entry
    pub blocks: Vec<Block>,
    /// Number of local slots
    pub local_count: u32,
    /// Number of temporaries in use
    pub temp_count: u32,
    /// Call sites inlined so far
    pub inlined_sites: Vec<InlinedCallSite>,
    next_call_id: u32,
}

impl MethodIr {
    /// Create a body with a single empty entry block
    pub fn new(method: MethodId, local_count: u32) -> Self {
        Self {
            method,
            blocks: vec![Block::new(0, Block::DEFAULT_FREQUENCY)],
            local_count,
            temp_count: 0,
            inlined_sites: Vec::new(),
            next_call_id: 0,
        }
    }

    /// Entry block
    pub fn entry(&self) -> BlockId {
        0
    }

    /// Append an empty block
    pub fn add_block(&mut self, frequency: u32) -> BlockId {
        let id = self.blocks.len();
        self.blocks.push(Block::new(id, frequency));
        id
    }

    /// Block by id
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id)
    }

    /// Mutable block by id
    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.get_mut(id)
    }

    /// Append a tree to a block
    pub fn push(&mut self, block: BlockId, tree: TreeTop) {
        if let Some(block) = self.blocks.get_mut(block) {
            block.trees.push(tree);
        }
    }

    /// Fresh call node id
    pub fn next_call_id(&mut self) -> CallNodeId {
        let id = CallNodeId(self.next_call_id);
        self.next_call_id += 1;
        id
    }

    /// Id the next call node will receive
    pub(crate) fn peek_call_id(&self) -> u32 {
        self.next_call_id
    }

    /// Skip ids handed out ahead of time by [`MethodIr::peek_call_id`]
    pub(crate) fn advance_call_ids(&mut self, next: u32) {
        self.next_call_id = self.next_call_id.max(next);
    }

    /// Build a call node with a fresh id
    pub fn make_call(&mut self, kind: CallKind, method: MethodId, args: Vec<Node>) -> CallNode {
        let id = self.next_call_id();
        CallNode::new(id, kind, method, args)
    }

    /// Allocate a temporary
    pub fn new_temp(&mut self) -> TempId {
        let temp = TempId(self.temp_count);
        self.temp_count += 1;
        temp
    }

    /// Total number of nodes
    pub fn node_count(&self) -> u32 {
        self.blocks
            .iter()
            .flat_map(|b| b.trees.iter())
            .map(TreeTop::node_count)
            .sum()
    }

    /// Location of a call node
    pub fn find_call(&self, id: CallNodeId) -> Option<(BlockId, usize)> {
        self.blocks.iter().find_map(|block| {
            block
                .trees
                .iter()
                .position(|t| matches!(t, TreeTop::Call(c) if c.id == id))
                .map(|i| (block.id, i))
        })
    }

    /// Call node by id
    pub fn call(&self, id: CallNodeId) -> Option<&CallNode> {
        let (block, index) = self.find_call(id)?;
        match &self.blocks[block].trees[index] {
            TreeTop::Call(call) => Some(call),
            _ => None,
        }
    }

    /// Every call node id, in block then tree order
    pub fn call_ids(&self) -> Vec<CallNodeId> {
        self.blocks
            .iter()
            .flat_map(|b| b.trees.iter())
            .filter_map(|t| match t {
                TreeTop::Call(call) => Some(call.id),
                _ => None,
            })
            .collect()
    }

    /// Method whose bytecode a call belongs to
    pub fn owning_method(&self, call: &CallNode) -> MethodId {
        call.origin
            .and_then(|i| self.inlined_sites.get(i))
            .map_or(self.method, |site| site.method)
    }

    /// Successors of a block
    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        self.blocks.get(block).map(Block::successors).unwrap_or_default()
    }

    /// Predecessors of a block
    pub fn predecessors(&self, block: BlockId) -> Vec<BlockId> {
        self.blocks
            .iter()
            .filter(|b| b.successors().contains(&block))
            .map(|b| b.id)
            .collect()
    }

    /// Predecessors of every block, gathered in one pass over the edges
    pub fn predecessor_lists(&self) -> Vec<Vec<BlockId>> {
        let n = self.blocks.len();
        let mut preds = vec![Vec::new(); n];
        for block in &self.blocks {
            for succ in block.successors() {
                if succ < n && !preds[succ].contains(&block.id) {
                    preds[succ].push(block.id);
                }
            }
        }
        preds
    }

    /// For every block, whether it lies on a cycle
    ///
    /// One strongly-connected-component pass: a block loops when its
    /// component has more than one member or it branches to itself.
    pub fn looping_blocks(&self) -> Vec<bool> {
        const UNVISITED: usize = usize::MAX;
        let n = self.blocks.len();
        let succs: Vec<Vec<BlockId>> = self
            .blocks
            .iter()
            .map(|b| b.successors().into_iter().filter(|s| *s < n).collect())
            .collect();

        let mut index = vec![UNVISITED; n];
        let mut low = vec![0; n];
        let mut on_stack = vec![false; n];
        let mut stack = Vec::new();
        let mut looping = vec![false; n];
        let mut next_index = 0;

        for root in 0..n {
            if index[root] != UNVISITED {
                continue;
            }
            index[root] = next_index;
            low[root] = next_index;
            next_index += 1;
            stack.push(root);
            on_stack[root] = true;
            // (block, position of the next successor to visit)
            let mut work = vec![(root, 0usize)];

            while let Some(frame) = work.last_mut() {
                let (block, pos) = *frame;
                if let Some(&succ) = succs[block].get(pos) {
                    frame.1 += 1;
                    if index[succ] == UNVISITED {
                        index[succ] = next_index;
                        low[succ] = next_index;
                        next_index += 1;
                        stack.push(succ);
                        on_stack[succ] = true;
                        work.push((succ, 0));
                    } else if on_stack[succ] {
                        low[block] = low[block].min(index[succ]);
                    }
                    continue;
                }

                work.pop();
                if let Some(&(parent, _)) = work.last() {
                    low[parent] = low[parent].min(low[block]);
                }
                if low[block] == index[block] {
                    let mut component = Vec::new();
                    while let Some(member) = stack.pop() {
                        on_stack[member] = false;
                        component.push(member);
                        if member == block {
                            break;
                        }
                    }
                    if component.len() > 1 || succs[block].contains(&block) {
                        for member in component {
                            looping[member] = true;
                        }
                    }
                }
            }
        }
        looping
    }

    /// Check if a block branches backwards
    pub fn is_back_edge_block(&self, block: BlockId) -> bool {
        self.successors(block).iter().any(|s| *s <= block)
    }

    /// Number of surviving calls to `method`
    pub fn count_calls_to(&self, method: MethodId) -> usize {
        self.blocks
            .iter()
            .flat_map(|b| b.trees.iter())
            .filter(|t| matches!(t, TreeTop::Call(c) if c.method == method))
            .count()
    }

    /// Guard trees with the block holding them
    pub fn guards(&self) -> Vec<(BlockId, &TreeTop)> {
        self.blocks
            .iter()
            .flat_map(|b| b.trees.iter().map(move |t| (b.id, t)))
            .filter(|(_, t)| matches!(t, TreeTop::Guard { .. }))
            .collect()
    }

    /// Whether `to` is reachable from `from` through at least one edge
    pub fn reaches(&self, from: BlockId, to: BlockId) -> bool {
        let mut seen = vec![false; self.blocks.len()];
        let mut queue: VecDeque<BlockId> = self.successors(from).into();
        while let Some(block) = queue.pop_front() {
            if block == to {
                return true;
            }
            if block >= seen.len() || seen[block] {
                continue;
            }
            seen[block] = true;
            queue.extend(self.successors(block));
        }
        false
    }
}
