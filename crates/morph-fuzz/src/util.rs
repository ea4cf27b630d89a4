//! Shared checks used by transformation preconditions.

use crate::fact_manager::FactManager;
use morph_ir::{
    DefSite, DominatorAnalysis, Id, Instruction, InstructionPosition, Module, Opcode, TypeKey,
};

/// Returns true if an instruction with `opcode` may be inserted directly
/// before the instruction at `position`.
pub fn can_insert_opcode_before(module: &Module, position: InstructionPosition, opcode: Opcode) -> bool {
    let Some(block) = module.block_at(position.function, position.block) else {
        return false;
    };
    let Some(target) = block.instructions.get(position.index) else {
        return false;
    };
    if position.index > 0 && block.instructions[position.index - 1].opcode.is_merge() {
        return false;
    }
    if opcode.is_terminator() || opcode.is_merge() || matches!(opcode, Opcode::Phi | Opcode::Variable) {
        return false;
    }
    !matches!(target.opcode, Opcode::Phi | Opcode::Variable)
}

/// Returns true if `id` may be used by an instruction inserted at
/// `position`, given the dominator tree of the enclosing function.
pub fn id_is_available_before(
    module: &Module,
    dominators: &DominatorAnalysis,
    position: InstructionPosition,
    id: Id,
) -> bool {
    let Some(block) = module.block_at(position.function, position.block) else {
        return false;
    };
    match module.find_def(id) {
        Some(DefSite::Global(index)) => module.globals[index].result_type.is_some(),
        Some(DefSite::Parameter { function, .. }) => function == position.function,
        Some(DefSite::Body(def)) => {
            if def.function != position.function || !dominators.is_reachable(block.label) {
                return false;
            }
            let Some(def_block) = module.block_at(def.function, def.block) else {
                return false;
            };
            dominators.instruction_dominates((def_block.label, def.index), (block.label, position.index))
        }
        _ => false,
    }
}

/// Like [`id_is_available_before`] but for an existing use: operand
/// `operand_index` of the instruction at `position`. Phi operands need
/// availability at the end of the matching predecessor.
pub fn id_is_available_at_use(
    module: &Module,
    dominators: &DominatorAnalysis,
    position: InstructionPosition,
    operand_index: usize,
    id: Id,
) -> bool {
    let Some(inst) = module.instruction_at(position) else {
        return false;
    };
    if inst.result_id == Some(id) {
        return false;
    }
    if inst.opcode != Opcode::Phi {
        return id_is_available_before(module, dominators, position, id);
    }
    let Some(parent) = inst.id_operand(operand_index + 1) else {
        return false;
    };
    match module.find_def(id) {
        Some(DefSite::Body(def)) => {
            let Some(def_block) = module.block_at(def.function, def.block) else {
                return false;
            };
            def.function == position.function && dominators.dominates(def_block.label, parent)
        }
        _ => id_is_available_before(module, dominators, position, id),
    }
}

/// Convenience wrapper computing dominators for the function at `position`.
pub fn id_is_available_before_instruction(module: &Module, position: InstructionPosition, id: Id) -> bool {
    match module.functions.get(position.function) {
        Some(function) => {
            let dominators = DominatorAnalysis::new(function);
            id_is_available_before(module, &dominators, position, id)
        }
        None => false,
    }
}

/// Returns true if a copy of `inst`'s result could stand in for it: it must
/// be a typed value without decorations, and not a null or undefined
/// pointer.
pub fn can_make_synonym_of(module: &Module, inst: &Instruction) -> bool {
    let (Some(id), Some(ty)) = (inst.result_id, inst.result_type) else {
        return false;
    };
    if inst.opcode == Opcode::Function {
        return false;
    }
    match module.type_key(ty) {
        None | Some(TypeKey::Void) | Some(TypeKey::Function { .. }) => false,
        Some(TypeKey::Pointer { .. }) if matches!(inst.opcode, Opcode::ConstantNull | Opcode::Undef) => false,
        _ => !module.has_decorations(id),
    }
}

/// Returns true if `label` is the merge block or continue target of some
/// header in function `function_index`.
pub fn is_merge_or_continue_target(module: &Module, function_index: usize, label: Id) -> bool {
    module.functions.get(function_index).is_some_and(|function| {
        function.blocks.iter().any(|block| {
            block.merge_instruction().is_some_and(|merge| {
                merge.id_operand(0) == Some(label)
                    || (merge.opcode == Opcode::LoopMerge && merge.id_operand(1) == Some(label))
            })
        })
    })
}

/// The words of a zero scalar of the given type.
pub fn zero_words(module: &Module, type_id: Id) -> Option<Vec<u32>> {
    match module.type_key(type_id)? {
        TypeKey::Int { width, .. } | TypeKey::Float { width } => {
            Some(vec![0; morph_ir::words_for_width(width)])
        }
        _ => None,
    }
}

/// Returns true if the function may be called from a live block: it
/// does not loop, never traps, calls only livesafe functions and only
/// stores through its own local variables.
pub fn function_is_livesafe_candidate(module: &Module, facts: &FactManager, function_id: Id) -> bool {
    let Some(function) = module.function(function_id) else {
        return false;
    };
    if module.is_entry_point(function_id) {
        return false;
    }
    let dominators = DominatorAnalysis::new(function);
    let locals: Vec<Id> = function
        .instructions()
        .filter(|inst| inst.opcode == Opcode::Variable)
        .filter_map(|inst| inst.result_id)
        .collect();
    for block in &function.blocks {
        if block.is_loop_header() {
            return false;
        }
        for successor in block.successors() {
            if dominators.is_back_edge(block.label, successor) {
                return false;
            }
        }
        for inst in &block.instructions {
            match inst.opcode {
                Opcode::Kill | Opcode::Unreachable => return false,
                Opcode::FunctionCall => {
                    let callee = inst.id_operand(0).unwrap_or(0);
                    if !facts.function_is_livesafe(callee) {
                        return false;
                    }
                }
                Opcode::Store => {
                    let pointer = inst.id_operand(0).unwrap_or(0);
                    if !locals.contains(&pointer) {
                        return false;
                    }
                }
                _ => {}
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use morph_ir::samples;

    fn main_position(module: &Module, index: usize) -> InstructionPosition {
        InstructionPosition {
            function: module.functions.len() - 1,
            block: 0,
            index,
        }
    }

    #[test]
    fn test_cannot_insert_before_variable() {
        let module = samples::arithmetic_module();
        assert!(!can_insert_opcode_before(&module, main_position(&module, 0), Opcode::IAdd));
        assert!(can_insert_opcode_before(&module, main_position(&module, 1), Opcode::IAdd));
        assert!(!can_insert_opcode_before(&module, main_position(&module, 1), Opcode::Phi));
    }

    #[test]
    fn test_cannot_insert_between_merge_and_terminator() {
        let module = samples::control_flow_module();
        let function = module.functions.len() - 1;
        let entry = &module.functions[function].blocks[0];
        let last = entry.len() - 1;
        let at = |index| InstructionPosition { function, block: 0, index };
        assert!(!can_insert_opcode_before(&module, at(last), Opcode::IAdd));
        assert!(can_insert_opcode_before(&module, at(last - 1), Opcode::IAdd));
    }

    #[test]
    fn test_availability() {
        let module = samples::arithmetic_module();
        let block = &module.functions[1].blocks[0];
        let x = block.instructions[1].result_id.unwrap();
        let add_param = module.functions[0].param_ids()[0];
        let one = block.instructions[1].id_operand(0).unwrap();

        assert!(!id_is_available_before_instruction(&module, main_position(&module, 1), x));
        assert!(id_is_available_before_instruction(&module, main_position(&module, 2), x));
        assert!(id_is_available_before_instruction(&module, main_position(&module, 1), one));
        assert!(!id_is_available_before_instruction(&module, main_position(&module, 2), add_param));
    }

    #[test]
    fn test_phi_use_availability() {
        let module = samples::control_flow_module();
        let function = module.functions.len() - 1;
        let main = &module.functions[function];
        let (block_index, merge) = main
            .blocks
            .iter()
            .enumerate()
            .find(|(_, block)| block.phi_count() > 0)
            .unwrap();
        let phi = &merge.instructions[0];
        let from_then = phi.id_operand(0).unwrap();
        let from_else = phi.id_operand(2).unwrap();
        let dominators = DominatorAnalysis::new(main);
        let position = InstructionPosition {
            function,
            block: block_index,
            index: 0,
        };
        assert!(id_is_available_at_use(&module, &dominators, position, 0, from_then));
        assert!(!id_is_available_at_use(&module, &dominators, position, 0, from_else));
    }

    #[test]
    fn test_livesafe_candidates() {
        let module = samples::control_flow_module();
        let facts = FactManager::new();
        let helper = module.functions[0].id();
        let main = module.functions[1].id();
        assert!(function_is_livesafe_candidate(&module, &facts, helper));
        assert!(!function_is_livesafe_candidate(&module, &facts, main));
    }
}
