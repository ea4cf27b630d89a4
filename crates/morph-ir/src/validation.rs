//! Validation for modules.
//!
//! [`StructuralValidator`] checks the rules the mutation engine has to
//! preserve: unique and bounded ids, definition order of globals, block
//! layout, SSA dominance, per-opcode typing and call legality.

use crate::analysis::DominatorAnalysis;
use crate::instruction::{Decoration, Id, Instruction, Opcode, Operand, StorageClass};
use crate::module::{DefSite, Function, Module};
use crate::types::{words_for_width, TypeKey};
use morph_core::{Error, Result};
use std::collections::{HashMap, HashSet};
use tracing::trace;

/// Decides whether a module is legal.
pub trait Validator {
    fn validate(&self, module: &Module) -> Result<()>;

    fn validate_bytes(&self, bytes: &[u8]) -> Result<()> {
        let module = Module::from_bytes(bytes)?;
        self.validate(&module)
    }

    fn is_valid(&self, module: &Module) -> bool {
        self.validate(module).is_ok()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralValidator;

impl Validator for StructuralValidator {
    fn validate(&self, module: &Module) -> Result<()> {
        check_ids(module)?;
        check_entry_points(module)?;
        check_annotations(module)?;
        check_globals(module)?;
        check_calls(module)?;
        for function in &module.functions {
            FunctionChecker::new(module, function).check()?;
        }
        trace!(functions = module.functions.len(), "module validated");
        Ok(())
    }
}

fn invalid<T>(message: impl Into<String>) -> Result<T> {
    Err(Error::validation(message))
}

fn check_ids(module: &Module) -> Result<()> {
    let mut seen = HashSet::new();
    let mut define = |id: Id| -> Result<()> {
        if id == 0 || id >= module.id_bound {
            return invalid(format!("id {} is outside the bound {}", id, module.id_bound));
        }
        if !seen.insert(id) {
            return invalid(format!("id {} is defined more than once", id));
        }
        Ok(())
    };

    for inst in &module.globals {
        match inst.result_id {
            Some(id) => define(id)?,
            None => return invalid(format!("global {:?} has no result id", inst.opcode)),
        }
    }
    for function in &module.functions {
        for id in function.defined_ids() {
            define(id)?;
        }
    }
    Ok(())
}

fn check_entry_points(module: &Module) -> Result<()> {
    for entry in &module.entry_points {
        let Some(function) = module.function(entry.function_id) else {
            return invalid(format!("entry point '{}' names no function", entry.name));
        };
        if !module.is_void_type(function.return_type()) || !function.params.is_empty() {
            return invalid(format!("entry point '{}' must take no parameters and return void", entry.name));
        }
    }
    Ok(())
}

fn check_annotations(module: &Module) -> Result<()> {
    for inst in &module.annotations {
        if inst.opcode != Opcode::Decorate {
            return invalid(format!("unexpected annotation {:?}", inst.opcode));
        }
        let target = inst.id_operand(0).unwrap_or(0);
        if module.find_def(target).is_none() {
            return invalid(format!("decoration targets undefined id {}", target));
        }
        if inst.literal_operand(1).and_then(Decoration::from_literal).is_none() {
            return invalid(format!("unknown decoration on id {}", target));
        }
    }
    Ok(())
}

fn check_globals(module: &Module) -> Result<()> {
    let mut seen: HashSet<Id> = HashSet::new();
    for inst in &module.globals {
        let id = inst.result_id.unwrap_or(0);
        if let Some(ty) = inst.result_type {
            if !seen.contains(&ty) {
                return invalid(format!("type {} of global {} is not declared before it", ty, id));
            }
        }
        for operand in inst.id_operands() {
            if !seen.contains(&operand) {
                return invalid(format!("global {} uses {} before its declaration", id, operand));
            }
        }

        match inst.opcode {
            op if op.is_type_declaration() => check_type_declaration(module, inst)?,
            Opcode::ConstantTrue | Opcode::ConstantFalse => {
                if !module.is_bool_type(inst.result_type.unwrap_or(0)) {
                    return invalid(format!("boolean constant {} is not of bool type", id));
                }
            }
            Opcode::Constant => {
                let width = match module.type_key(inst.result_type.unwrap_or(0)) {
                    Some(TypeKey::Int { width, .. }) | Some(TypeKey::Float { width }) => width,
                    _ => return invalid(format!("scalar constant {} has non-numeric type", id)),
                };
                let all_literals = inst.operands.iter().all(|op| op.as_literal().is_some());
                if !all_literals || inst.operands.len() != words_for_width(width) {
                    return invalid(format!("scalar constant {} has the wrong number of words", id));
                }
            }
            Opcode::ConstantComposite => {
                let ty = inst.result_type.unwrap_or(0);
                if inst.id_operands().any(|component| !module.is_constant(component)) {
                    return invalid(format!("composite constant {} has a non-constant component", id));
                }
                check_composite_components(module, ty, &inst.id_operands().collect::<Vec<_>>())
                    .map_err(|_| Error::validation(format!("composite constant {} has mismatched components", id)))?;
            }
            Opcode::ConstantNull | Opcode::Undef => {
                let ty = inst.result_type.unwrap_or(0);
                if !is_value_type(module, ty) {
                    return invalid(format!("{:?} {} has an invalid type", inst.opcode, id));
                }
            }
            Opcode::Variable => {
                let storage = check_variable(module, inst)?;
                if storage == StorageClass::Function {
                    return invalid(format!("global variable {} has function storage", id));
                }
            }
            other => return invalid(format!("{:?} is not allowed at global scope", other)),
        }
        seen.insert(id);
    }
    Ok(())
}

/// Types that values can have.
pub fn is_value_type(module: &Module, ty: Id) -> bool {
    !matches!(
        module.type_key(ty),
        None | Some(TypeKey::Void) | Some(TypeKey::Function { .. })
    )
}

fn check_type_declaration(module: &Module, inst: &Instruction) -> Result<()> {
    let id = inst.result_id.unwrap_or(0);
    match TypeKey::from_instruction(inst) {
        Some(key) if type_is_well_formed(module, &key) => Ok(()),
        Some(_) => invalid(format!("type declaration {} is ill-formed", id)),
        None => invalid(format!("malformed type declaration {}", id)),
    }
}

/// Returns true if a declaration of `key` would be legal given the types
/// already declared in `module`.
pub fn type_is_well_formed(module: &Module, key: &TypeKey) -> bool {
    match key {
        TypeKey::Void | TypeKey::Bool => true,
        TypeKey::Int { width, .. } => matches!(width, 8 | 16 | 32 | 64),
        TypeKey::Float { width } => matches!(width, 16 | 32 | 64),
        TypeKey::Vector { component, count } => {
            (2..=4).contains(count) && module.type_key(*component).is_some_and(|k| k.is_scalar())
        }
        TypeKey::Array { element, length } => *length > 0 && is_value_type(module, *element),
        TypeKey::Struct { members } => members.iter().all(|m| is_value_type(module, *m)),
        TypeKey::Pointer { pointee, .. } => is_value_type(module, *pointee),
        TypeKey::Function { return_type, params } => {
            module.is_type(*return_type)
                && !matches!(module.type_key(*return_type), Some(TypeKey::Function { .. }))
                && params.iter().all(|p| is_value_type(module, *p))
        }
    }
}

/// Checks that `components` can build a value of composite type `ty`.
/// Vectors may be assembled from scalars and smaller vectors.
pub fn check_composite_components(module: &Module, ty: Id, components: &[Id]) -> Result<()> {
    let types: Vec<Option<Id>> = components.iter().map(|c| module.type_of(*c)).collect();
    let ok = match module.type_key(ty) {
        Some(TypeKey::Struct { members }) => {
            members.len() == types.len() && members.iter().zip(&types).all(|(m, t)| Some(*m) == *t)
        }
        Some(TypeKey::Array { element, length }) => {
            length as usize == types.len() && types.iter().all(|t| *t == Some(element))
        }
        Some(TypeKey::Vector { component, count }) => {
            let mut total = 0;
            let mut ok = true;
            for t in &types {
                match t.and_then(|t| module.type_key(t).map(|key| (t, key))) {
                    Some((t, _)) if t == component => total += 1,
                    Some((_, TypeKey::Vector { component: c, count: n })) if c == component => total += n,
                    _ => ok = false,
                }
            }
            ok && total == count
        }
        _ => false,
    };
    if !ok {
        return invalid(format!("components do not match composite type {}", ty));
    }
    Ok(())
}

fn check_variable(module: &Module, inst: &Instruction) -> Result<StorageClass> {
    let id = inst.result_id.unwrap_or(0);
    let Some(storage) = inst.literal_operand(0).and_then(StorageClass::from_literal) else {
        return invalid(format!("variable {} has no storage class", id));
    };
    let Some((pointer_storage, pointee)) = module.pointee_type(inst.result_type.unwrap_or(0)) else {
        return invalid(format!("variable {} is not of pointer type", id));
    };
    if pointer_storage != storage {
        return invalid(format!("variable {} storage class disagrees with its type", id));
    }
    if inst.operands.len() > 2 {
        return invalid(format!("variable {} has too many operands", id));
    }
    if inst.operands.len() == 2 {
        let init = inst.id_operand(1).unwrap_or(0);
        if !module.is_constant(init) || module.type_of(init) != Some(pointee) {
            return invalid(format!("variable {} has a bad initializer", id));
        }
    }
    Ok(storage)
}

fn check_calls(module: &Module) -> Result<()> {
    let mut graph: HashMap<Id, Vec<Id>> = HashMap::new();
    for function in &module.functions {
        let callees = function.callees();
        for callee in &callees {
            if module.function(*callee).is_none() {
                return invalid(format!("function {} calls non-function {}", function.id(), callee));
            }
            if module.is_entry_point(*callee) {
                return invalid(format!("entry point {} is called", callee));
            }
        }
        graph.insert(function.id(), callees);
    }

    // Depth-first search for cycles: 1 = on stack, 2 = finished.
    let mut state: HashMap<Id, u8> = HashMap::new();
    for function in &module.functions {
        let mut stack: Vec<(Id, usize)> = vec![(function.id(), 0)];
        if state.contains_key(&function.id()) {
            continue;
        }
        state.insert(function.id(), 1);
        while let Some((current, next)) = stack.pop() {
            match graph.get(&current).and_then(|callees| callees.get(next)) {
                Some(&callee) => {
                    stack.push((current, next + 1));
                    match state.get(&callee) {
                        Some(1) => return invalid(format!("recursive call to {}", callee)),
                        Some(_) => {}
                        None => {
                            state.insert(callee, 1);
                            stack.push((callee, 0));
                        }
                    }
                }
                None => {
                    state.insert(current, 2);
                }
            }
        }
    }
    Ok(())
}

struct FunctionChecker<'a> {
    module: &'a Module,
    function: &'a Function,
    dominators: DominatorAnalysis,
    labels: HashSet<Id>,
    /// Body definitions: id -> (block label, index)
    locals: HashMap<Id, (Id, usize)>,
    params: HashSet<Id>,
}

impl<'a> FunctionChecker<'a> {
    fn new(module: &'a Module, function: &'a Function) -> Self {
        let mut locals = HashMap::new();
        for block in &function.blocks {
            for (index, inst) in block.instructions.iter().enumerate() {
                if let Some(id) = inst.result_id {
                    locals.insert(id, (block.label, index));
                }
            }
        }
        Self {
            module,
            function,
            dominators: DominatorAnalysis::new(function),
            labels: function.blocks.iter().map(|b| b.label).collect(),
            locals,
            params: function.param_ids().into_iter().collect(),
        }
    }

    fn check(&self) -> Result<()> {
        self.check_signature()?;
        let Some(entry) = self.function.entry_block() else {
            return invalid(format!("function {} has no blocks", self.function.id()));
        };
        if !self.dominators.cfg().predecessors(entry.label).is_empty() {
            return invalid(format!("entry block of function {} has predecessors", self.function.id()));
        }

        let mut merge_targets: HashMap<Id, Id> = HashMap::new();
        for (block_index, block) in self.function.blocks.iter().enumerate() {
            self.check_block_layout(block_index, block)?;
            if let Some(merge) = block.merge_instruction() {
                let target = merge.id_operand(0).unwrap_or(0);
                if target == block.label {
                    return invalid(format!("block {} is its own merge block", block.label));
                }
                if let Some(other) = merge_targets.insert(target, block.label) {
                    return invalid(format!(
                        "block {} is the merge block of both {} and {}",
                        target, other, block.label
                    ));
                }
            }
            for (index, inst) in block.instructions.iter().enumerate() {
                self.check_operands(block.label, index, inst)?;
                self.check_typing(inst)?;
            }
            self.check_phis(block.label, block)?;
        }
        Ok(())
    }

    fn check_signature(&self) -> Result<()> {
        let id = self.function.id();
        if self.function.def.opcode != Opcode::Function {
            return invalid(format!("function {} has a malformed definition", id));
        }
        let control = self.function.control();
        if control & !crate::instruction::function_control::ALL != 0 {
            return invalid(format!("function {} has unknown control bits", id));
        }
        let Some(TypeKey::Function { return_type, params }) =
            self.module.type_key(self.function.function_type())
        else {
            return invalid(format!("function {} is not declared with a function type", id));
        };
        if return_type != self.function.return_type() {
            return invalid(format!("function {} return type disagrees with its type", id));
        }
        if params.len() != self.function.params.len() {
            return invalid(format!("function {} parameter count disagrees with its type", id));
        }
        for (param, expected) in self.function.params.iter().zip(&params) {
            if param.opcode != Opcode::FunctionParameter
                || param.result_type != Some(*expected)
                || param.result_id.is_none()
            {
                return invalid(format!("function {} has a malformed parameter", id));
            }
        }
        Ok(())
    }

    fn check_block_layout(&self, block_index: usize, block: &crate::module::BasicBlock) -> Result<()> {
        let label = block.label;
        let len = block.instructions.len();
        if block.terminator().is_none() {
            return invalid(format!("block {} does not end with a terminator", label));
        }
        let phi_count = block.phi_count();
        let mut in_variables = block_index == 0;
        for (index, inst) in block.instructions.iter().enumerate() {
            let op = inst.opcode;
            if op.is_type_declaration()
                || op.is_constant()
                || matches!(op, Opcode::Undef | Opcode::Decorate | Opcode::Function | Opcode::FunctionParameter)
            {
                return invalid(format!("{:?} is not allowed in block {}", op, label));
            }
            if op.has_result_id() != inst.result_id.is_some()
                || op.has_result_type() != inst.result_type.is_some()
            {
                return invalid(format!("{:?} in block {} has wrong result operands", op, label));
            }
            if op.is_terminator() && index + 1 != len {
                return invalid(format!("terminator in the middle of block {}", label));
            }
            if op.is_merge() && index + 2 != len {
                return invalid(format!("merge instruction not before the terminator in block {}", label));
            }
            if op == Opcode::Phi && index >= phi_count {
                return invalid(format!("phi after non-phi in block {}", label));
            }
            if op == Opcode::Variable {
                if !in_variables {
                    return invalid(format!("variable outside the start of the entry block in {}", label));
                }
                if check_variable(self.module, inst)? != StorageClass::Function {
                    return invalid(format!("local variable in block {} lacks function storage", label));
                }
            } else {
                in_variables = false;
            }
        }
        if let Some(merge) = block.merge_instruction() {
            let terminator = block.instructions[len - 1].opcode;
            let ok = match merge.opcode {
                Opcode::SelectionMerge => terminator == Opcode::BranchConditional,
                _ => matches!(terminator, Opcode::Branch | Opcode::BranchConditional),
            };
            if !ok {
                return invalid(format!("merge instruction in block {} precedes the wrong terminator", label));
            }
        }
        Ok(())
    }

    fn check_operands(&self, label: Id, index: usize, inst: &Instruction) -> Result<()> {
        if let Some(ty) = inst.result_type {
            if !self.module.is_type(ty) {
                return invalid(format!("result type {} in block {} is not a type", ty, label));
            }
        }
        let reachable = self.dominators.is_reachable(label);
        for (k, operand) in inst.operands.iter().enumerate() {
            let Operand::Id(id) = *operand else {
                continue;
            };
            if inst.opcode.is_label_operand(k) {
                if !self.labels.contains(&id) {
                    return invalid(format!("{:?} in block {} targets unknown block {}", inst.opcode, label, id));
                }
                continue;
            }
            if self.params.contains(&id) {
                continue;
            }
            if let Some(&(def_block, def_index)) = self.locals.get(&id) {
                if !reachable {
                    continue;
                }
                let dominated = if inst.opcode == Opcode::Phi {
                    let parent = inst.id_operand(k + 1).unwrap_or(0);
                    !self.dominators.is_reachable(parent) || self.dominators.dominates(def_block, parent)
                } else {
                    self.dominators.instruction_dominates((def_block, def_index), (label, index))
                };
                if !dominated {
                    return invalid(format!("use of {} in block {} is not dominated by its definition", id, label));
                }
                continue;
            }
            match self.module.find_def(id) {
                Some(DefSite::Global(_)) => {}
                Some(DefSite::Function(_)) if inst.opcode == Opcode::FunctionCall && k == 0 => {}
                Some(_) => {
                    return invalid(format!("id {} cannot be used by {:?} in block {}", id, inst.opcode, label))
                }
                None => return invalid(format!("use of undefined id {} in block {}", id, label)),
            }
        }
        Ok(())
    }

    fn type_of(&self, id: Option<Id>) -> Option<Id> {
        id.and_then(|id| self.module.type_of(id))
    }

    fn check_typing(&self, inst: &Instruction) -> Result<()> {
        let module = self.module;
        let result_type = inst.result_type;
        let operand_types: Vec<Option<Id>> = (0..inst.operands.len())
            .map(|k| self.type_of(inst.id_operand(k)))
            .collect();
        let arity = |n: usize| inst.operands.len() == n;
        let all_match_result = operand_types.iter().all(|t| *t == result_type);

        let ok = match inst.opcode {
            Opcode::Load => {
                arity(1)
                    && operand_types[0]
                        .and_then(|t| module.pointee_type(t))
                        .is_some_and(|(_, pointee)| Some(pointee) == result_type)
            }
            Opcode::Store => {
                arity(2)
                    && operand_types[0]
                        .and_then(|t| module.pointee_type(t))
                        .is_some_and(|(storage, pointee)| {
                            !storage.is_read_only() && Some(pointee) == operand_types[1]
                        })
            }
            Opcode::AccessChain => self.access_chain_is_well_typed(inst),
            Opcode::CopyObject => arity(1) && all_match_result,
            Opcode::CompositeConstruct => {
                let components: Vec<Id> = inst.id_operands().collect();
                components.len() == inst.operands.len()
                    && check_composite_components(module, result_type.unwrap_or(0), &components).is_ok()
            }
            Opcode::CompositeExtract => {
                let indices: Option<Vec<u32>> = inst.operands.iter().skip(1).map(Operand::as_literal).collect();
                match (operand_types.first().copied().flatten(), indices) {
                    (Some(ty), Some(indices)) if !indices.is_empty() => {
                        module.walk_composite_type_indices(ty, &indices) == result_type
                    }
                    _ => false,
                }
            }
            Opcode::IAdd | Opcode::ISub | Opcode::IMul => {
                arity(2) && all_match_result && module.is_integer_type(result_type.unwrap_or(0))
            }
            Opcode::SNegate => arity(1) && all_match_result && module.is_integer_type(result_type.unwrap_or(0)),
            Opcode::FAdd | Opcode::FSub | Opcode::FMul => {
                arity(2) && all_match_result && module.is_float_type(result_type.unwrap_or(0))
            }
            Opcode::FNegate => arity(1) && all_match_result && module.is_float_type(result_type.unwrap_or(0)),
            Opcode::LogicalNot => {
                arity(1) && all_match_result && module.is_boolean_type(result_type.unwrap_or(0))
            }
            Opcode::LogicalAnd | Opcode::LogicalOr => {
                arity(2) && all_match_result && module.is_boolean_type(result_type.unwrap_or(0))
            }
            Opcode::IEqual | Opcode::INotEqual | Opcode::SLessThan | Opcode::SGreaterThan => {
                arity(2)
                    && module.is_bool_type(result_type.unwrap_or(0))
                    && operand_types[0] == operand_types[1]
                    && operand_types[0]
                        .is_some_and(|t| matches!(module.type_key(t), Some(TypeKey::Int { .. })))
            }
            Opcode::Select => {
                arity(3)
                    && operand_types[0].is_some_and(|t| module.is_bool_type(t))
                    && operand_types[1] == result_type
                    && operand_types[2] == result_type
            }
            Opcode::FunctionCall => self.call_is_well_typed(inst),
            Opcode::Phi => {
                inst.operands.len() >= 2
                    && inst.operands.len() % 2 == 0
                    && operand_types.iter().step_by(2).all(|t| *t == result_type)
            }
            Opcode::Branch => arity(1),
            Opcode::BranchConditional => {
                let weights_ok = match inst.operands.len() {
                    3 => true,
                    5 => match (inst.literal_operand(3), inst.literal_operand(4)) {
                        (Some(a), Some(b)) => a as u64 + b as u64 > 0,
                        _ => false,
                    },
                    _ => false,
                };
                weights_ok && operand_types[0].is_some_and(|t| module.is_bool_type(t))
            }
            Opcode::SelectionMerge => arity(2) && inst.literal_operand(1).is_some_and(|c| c <= 2),
            Opcode::LoopMerge => arity(3) && inst.literal_operand(2).is_some(),
            Opcode::Return => arity(0) && module.is_void_type(self.function.return_type()),
            Opcode::ReturnValue => {
                arity(1)
                    && !module.is_void_type(self.function.return_type())
                    && operand_types[0] == Some(self.function.return_type())
            }
            Opcode::Variable | Opcode::Kill | Opcode::Unreachable | Opcode::Nop => true,
            other => return invalid(format!("{:?} is not allowed in a function body", other)),
        };
        if !ok {
            return invalid(format!(
                "{:?} {} is ill-typed",
                inst.opcode,
                inst.result_id.map(|id| id.to_string()).unwrap_or_default()
            ));
        }
        Ok(())
    }

    fn access_chain_is_well_typed(&self, inst: &Instruction) -> bool {
        let module = self.module;
        if inst.operands.len() < 2 {
            return false;
        }
        let Some((storage, mut current)) = self
            .type_of(inst.id_operand(0))
            .and_then(|t| module.pointee_type(t))
        else {
            return false;
        };
        for index_id in inst.operands.iter().skip(1) {
            let Some(index_id) = index_id.as_id() else {
                return false;
            };
            let index_is_int = self
                .type_of(Some(index_id))
                .is_some_and(|t| matches!(module.type_key(t), Some(TypeKey::Int { .. })));
            if !index_is_int {
                return false;
            }
            let constant = module.int_constant_value(index_id);
            let next = match (module.type_key(current), constant) {
                (Some(TypeKey::Struct { .. }), Some(value)) => module.walk_composite_type_index(current, value),
                (Some(TypeKey::Struct { .. }), None) => None,
                (Some(TypeKey::Vector { component, count }), value) => {
                    value.map_or(true, |v| v < count).then_some(component)
                }
                (Some(TypeKey::Array { element, length }), value) => {
                    value.map_or(true, |v| v < length).then_some(element)
                }
                _ => None,
            };
            match next {
                Some(next) => current = next,
                None => return false,
            }
        }
        inst.result_type.and_then(|t| module.type_key(t))
            == Some(TypeKey::Pointer {
                storage,
                pointee: current,
            })
    }

    fn call_is_well_typed(&self, inst: &Instruction) -> bool {
        let Some(callee) = inst.id_operand(0).and_then(|id| self.module.function(id)) else {
            return false;
        };
        let args: Vec<Option<Id>> = inst.operands.iter().skip(1).map(Operand::as_id).collect();
        args.len() == callee.params.len()
            && inst.result_type == Some(callee.return_type())
            && args
                .iter()
                .zip(&callee.params)
                .all(|(arg, param)| self.type_of(*arg) == param.result_type)
    }

    fn check_phis(&self, label: Id, block: &crate::module::BasicBlock) -> Result<()> {
        let mut predecessors: Vec<Id> = self.dominators.cfg().predecessors(label).to_vec();
        predecessors.sort_unstable();
        for phi in block.instructions.iter().take(block.phi_count()) {
            let mut parents: Vec<Id> = phi.operands.iter().skip(1).step_by(2).filter_map(Operand::as_id).collect();
            parents.sort_unstable();
            if parents != predecessors {
                return invalid(format!(
                    "phi {} in block {} does not match the block's predecessors",
                    phi.result_id.unwrap_or(0),
                    label
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ModuleBuilder;
    use crate::samples;

    fn validator() -> StructuralValidator {
        StructuralValidator
    }

    #[test]
    fn test_samples_are_valid() {
        validator().validate(&samples::arithmetic_module()).unwrap();
        validator().validate(&samples::control_flow_module()).unwrap();
        validator().validate(&samples::uniform_module()).unwrap();
    }

    #[test]
    fn test_validate_bytes() {
        let bytes = samples::arithmetic_module().to_bytes().unwrap();
        assert!(validator().validate_bytes(&bytes).is_ok());
        assert!(validator().validate_bytes(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut module = samples::arithmetic_module();
        let first = module.globals[0].result_id;
        module.globals[1].result_id = first;
        assert!(validator().validate(&module).is_err());
    }

    #[test]
    fn test_id_bound_enforced() {
        let mut module = samples::arithmetic_module();
        module.id_bound = 2;
        assert!(validator().validate(&module).is_err());
    }

    #[test]
    fn test_use_before_def_rejected() {
        let mut builder = ModuleBuilder::new();
        let void = builder.type_void();
        let int = builder.type_int(32, true);
        let one = builder.constant(int, &[1]);
        let fn_ty = builder.type_function(void, &[]);
        builder.begin_function(void, fn_ty);
        builder.block();
        let later = builder.reserve_id();
        builder.value(Opcode::IAdd, int, &[later, one]);
        builder.emit(Instruction::value(Opcode::IAdd, int, later, &[one, one]));
        builder.emit(Instruction::return_void());
        let module = builder.build();
        assert!(validator().validate(&module).is_err());
    }

    #[test]
    fn test_ill_typed_add_rejected() {
        let mut builder = ModuleBuilder::new();
        let void = builder.type_void();
        let int = builder.type_int(32, true);
        let bool_ty = builder.type_bool();
        let one = builder.constant(int, &[1]);
        let yes = builder.constant_bool(bool_ty, true);
        let fn_ty = builder.type_function(void, &[]);
        builder.begin_function(void, fn_ty);
        builder.block();
        builder.value(Opcode::IAdd, int, &[one, yes]);
        builder.emit(Instruction::return_void());
        let module = builder.build();
        assert!(validator().validate(&module).is_err());
    }

    #[test]
    fn test_recursion_rejected() {
        let mut builder = ModuleBuilder::new();
        let void = builder.type_void();
        let fn_ty = builder.type_function(void, &[]);
        let f = builder.reserve_id();
        let g = builder.begin_function(void, fn_ty);
        builder.block();
        builder.value(Opcode::FunctionCall, void, &[f]);
        builder.emit(Instruction::return_void());
        builder.end_function();
        let mut module = builder.build();
        // Clone g as f calling g back.
        let mut other = module.functions[0].clone();
        other.def.result_id = Some(f);
        other.blocks[0].label = module.id_bound;
        other.blocks[0].instructions[0].result_id = Some(module.id_bound + 1);
        other.blocks[0].instructions[0].operands[0] = Operand::Id(g);
        module.id_bound += 2;
        module.functions.push(other);
        let err = validator().validate(&module).unwrap_err();
        assert!(err.to_string().contains("recursive"));
    }

    #[test]
    fn test_store_to_uniform_rejected() {
        let mut module = samples::uniform_module();
        let int = module.find_type(&TypeKey::Int { width: 32, signed: true }).unwrap();
        let block_var = module.find_uniform_variable(0, 0).unwrap();
        let zero = module.find_scalar_constant(int, &[0]).unwrap();
        let seven = module.find_scalar_constant(int, &[7]).unwrap();
        let ptr_ty = module.find_pointer_type(StorageClass::Uniform, int).unwrap();
        let chain = module.id_bound;
        let loaded = module.id_bound + 1;
        module.id_bound += 2;

        let block = &mut module.functions[0].blocks[0];
        let at = block.len() - 1;
        block
            .instructions
            .insert(at, Instruction::value(Opcode::AccessChain, ptr_ty, chain, &[block_var, zero]));
        block
            .instructions
            .insert(at + 1, Instruction::value(Opcode::Load, int, loaded, &[chain]));
        validator().validate(&module).unwrap();

        let block = &mut module.functions[0].blocks[0];
        let at = block.len() - 1;
        block
            .instructions
            .insert(at, Instruction::new(Opcode::Store).with_id_operands([chain, seven]));
        assert!(validator().validate(&module).is_err());
    }

    #[test]
    fn test_phi_must_match_predecessors() {
        let mut module = samples::control_flow_module();
        let function = &mut module.functions[0];
        let merge = function
            .blocks
            .iter_mut()
            .find(|block| block.phi_count() > 0)
            .unwrap();
        merge.instructions[0].operands.truncate(2);
        assert!(validator().validate(&module).is_err());
    }

    #[test]
    fn test_duplicate_merge_target_rejected() {
        let mut module = samples::control_flow_module();
        let function = &mut module.functions[0];
        let header = function.blocks[0].clone();
        let merge = header.merge_instruction().unwrap().clone();
        // Make the "then" block a second header with the same merge block.
        let then_block = header.successors()[0];
        let block = function.block_mut(then_block).unwrap();
        let terminator = block.instructions.pop().unwrap();
        let cond = header.terminator().unwrap().id_operand(0).unwrap();
        let target = terminator.id_operand(0).unwrap();
        block.instructions.push(merge);
        block.instructions.push(Instruction::branch_conditional(cond, target, target));
        assert!(validator().validate(&module).is_err());
    }
}
