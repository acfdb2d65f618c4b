//! Binding of call arguments to callee parameters
//!
//! Each formal parameter of an inlined callee is mapped to the argument
//! expression at the call. The argument is substituted directly when that
//! is safe, otherwise it is stored once into a temporary before the inlined
//! body and every reference reads the temporary.
//!
//! A temporary is needed when the argument is not trivial, is referenced
//! more than once, or the callee stores to the parameter or takes its
//! address. Constants are always substituted.

use crate::call_stack::CallStack;
use crate::failure::FailureReason;
use crate::ir::{CallNode, MethodIr, Node, Place, TempId, TreeTop};
use arrayvec::ArrayVec;
use core_types::MethodInfo;

/// Replacement temporaries a single parameter may carry
pub const MAX_REPLACEMENT_TEMPS: usize = 3;

/// How one formal parameter is bound
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterMapping {
    /// Parameter index, receiver first
    pub parm: u32,
    /// Argument expression at the call
    pub argument: Node,
    /// References to the parameter in the callee body
    pub reference_count: u32,
    /// The callee stores to the parameter
    pub is_modified: bool,
    /// The callee takes the parameter's address
    pub address_taken: bool,
    /// The argument is a constant
    pub is_const: bool,
    replacement_temps: ArrayVec<TempId, MAX_REPLACEMENT_TEMPS>,
    consumed: bool,
}

impl ParameterMapping {
    fn new(parm: u32, argument: Node) -> Self {
        Self {
            parm,
            is_const: argument.is_const(),
            argument,
            reference_count: 0,
            is_modified: false,
            address_taken: false,
            replacement_temps: ArrayVec::new(),
            consumed: false,
        }
    }

    /// Whether the argument has to be stored to a temporary
    pub fn needs_temp(&self) -> bool {
        self.is_modified
            || self.address_taken
            || (!self.is_const && (!self.argument.is_trivial() || self.reference_count > 1))
    }

    /// Primary temporary, if materialized
    pub fn temp(&self) -> Option<TempId> {
        self.replacement_temps.first().copied()
    }

    /// All temporaries holding the argument
    pub fn replacement_temps(&self) -> &[TempId] {
        &self.replacement_temps
    }
}

/// Parameter bindings for one inline attempt
#[derive(Debug, Clone, Default)]
pub struct ParameterMapper {
    mappings: Vec<ParameterMapping>,
}

impl ParameterMapper {
    /// Bind `args` to the parameters of `callee` whose body is `body`.
    ///
    /// Temporaries come from `frame`, at most `temp_limit` of them.
    pub fn initialize(
        args: &[Node],
        callee: &MethodInfo,
        body: &MethodIr,
        frame: &mut CallStack<'_>,
        temp_limit: u32,
    ) -> Result<Self, FailureReason> {
        if args.len() != callee.param_count as usize {
            return Err(FailureReason::CantMatchParmsToArgs);
        }

        let mut mapper = Self {
            mappings: args
                .iter()
                .enumerate()
                .map(|(i, arg)| ParameterMapping::new(i as u32, arg.clone()))
                .collect(),
        };
        mapper.count_references(body)?;
        mapper.look_for_modified_parameters(body)?;

        for mapping in mapper.mappings.iter_mut().filter(|m| m.needs_temp()) {
            let temp = frame.try_new_temp(temp_limit)?;
            mapping.replacement_temps.push(temp);
        }
        Ok(mapper)
    }

    fn count_references(&mut self, body: &MethodIr) -> Result<(), FailureReason> {
        let mut unmatched = false;
        for tree in body.blocks.iter().flat_map(|b| b.trees.iter()) {
            tree.visit_nodes(&mut |node| {
                let (parm, address) = match node {
                    Node::LoadParm(p) => (*p, false),
                    Node::ParmAddress(p) => (*p, true),
                    _ => return,
                };
                match self.mappings.get_mut(parm as usize) {
                    Some(mapping) => {
                        mapping.reference_count += 1;
                        mapping.address_taken |= address;
                    }
                    None => unmatched = true,
                }
            });
        }
        if unmatched {
            return Err(FailureReason::CantMatchParmsToArgs);
        }
        Ok(())
    }

    /// Flag every parameter the callee stores to
    pub fn look_for_modified_parameters(&mut self, body: &MethodIr) -> Result<(), FailureReason> {
        for tree in body.blocks.iter().flat_map(|b| b.trees.iter()) {
            if let TreeTop::StoreParm { parm, .. } = tree {
                self.mappings
                    .get_mut(*parm as usize)
                    .ok_or(FailureReason::CantMatchParmsToArgs)?
                    .is_modified = true;
            }
        }
        Ok(())
    }

    fn mapping_mut(&mut self, parm: u32) -> Result<&mut ParameterMapping, FailureReason> {
        self.mappings
            .get_mut(parm as usize)
            .ok_or(FailureReason::CantMatchParmsToArgs)
    }

    /// Expression replacing one reference to `parm`
    pub fn map(&mut self, parm: u32) -> Result<Node, FailureReason> {
        let mapping = self.mapping_mut(parm)?;
        if let Some(temp) = mapping.temp() {
            return Ok(Node::LoadTemp(temp));
        }
        if mapping.is_const {
            return Ok(mapping.argument.clone());
        }
        if mapping.consumed {
            return Err(FailureReason::CantMatchParmsToArgs);
        }
        mapping.consumed = true;
        Ok(mapping.argument.clone())
    }

    /// Expression replacing the address of `parm`
    pub fn map_address(&mut self, parm: u32) -> Result<Node, FailureReason> {
        self.mapping_mut(parm)?
            .temp()
            .map(Node::TempAddress)
            .ok_or(FailureReason::CantMatchParmsToArgs)
    }

    /// Place a store to `parm` writes to
    pub fn store_target(&mut self, parm: u32) -> Result<Place, FailureReason> {
        self.mapping_mut(parm)?
            .temp()
            .map(Place::Temp)
            .ok_or(FailureReason::CantMatchParmsToArgs)
    }

    /// Give `parm` another temporary holding its value
    pub fn add_replacement_temp(
        &mut self,
        parm: u32,
        frame: &mut CallStack<'_>,
        temp_limit: u32,
    ) -> Result<TempId, FailureReason> {
        let mapping = self.mapping_mut(parm)?;
        if mapping.replacement_temps.is_full() {
            return Err(FailureReason::WillCreateUnallowedTemps);
        }
        let temp = frame.try_new_temp(temp_limit)?;
        mapping.replacement_temps.push(temp);
        Ok(temp)
    }

    /// Temporary holding `parm`, created if there is none yet
    pub fn ensure_materialized(
        &mut self,
        parm: u32,
        frame: &mut CallStack<'_>,
        temp_limit: u32,
    ) -> Result<TempId, FailureReason> {
        match self.mapping_mut(parm)?.temp() {
            Some(temp) => Ok(temp),
            None => self.add_replacement_temp(parm, frame, temp_limit),
        }
    }

    /// Stores that must run before the inlined body
    pub fn materializations(&self) -> Vec<TreeTop> {
        let mut trees = Vec::new();
        for mapping in &self.mappings {
            let Some((first, rest)) = mapping.replacement_temps.split_first() else {
                continue;
            };
            trees.push(TreeTop::Store {
                place: Place::Temp(*first),
                value: mapping.argument.clone(),
            });
            trees.extend(rest.iter().map(|temp| TreeTop::Store {
                place: Place::Temp(*temp),
                value: Node::LoadTemp(*first),
            }));
        }
        trees
    }

    /// Make `call` read materialized arguments instead of re-evaluating them
    pub fn fix_call_node_args(&self, call: &mut CallNode) {
        for (arg, mapping) in call.args.iter_mut().zip(&self.mappings) {
            if let Some(temp) = mapping.temp() {
                *arg = Node::LoadTemp(temp);
            }
        }
    }

    /// Every mapping, by parameter index
    pub fn mappings(&self) -> &[ParameterMapping] {
        &self.mappings
    }

    /// Mapping of `parm`
    pub fn find_mapping(&self, parm: u32) -> Option<&ParameterMapping> {
        self.mappings.get(parm as usize)
    }
}
