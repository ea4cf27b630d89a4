use super::{all_available_before, ensure_applicable, insertion_point, resolve_for_apply, Transform};
use crate::descriptor::InstructionDescriptor;
use crate::fact_manager::{equation_arity, FactManager};
use morph_core::Result;
use morph_ir::{Id, Instruction, Module, Opcode};
use serde::{Deserialize, Serialize};

/// Inserts `fresh_id = opcode(in_operand_ids)` and records the equation so
/// that the fact manager can derive synonyms from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquationInstruction {
    pub fresh_id: Id,
    pub opcode: Opcode,
    pub in_operand_ids: Vec<Id>,
    pub instruction_to_insert_before: InstructionDescriptor,
}

impl EquationInstruction {
    fn result_type(&self, module: &Module) -> Option<Id> {
        let ty = module.type_of(*self.in_operand_ids.first()?)?;
        let typed = self
            .in_operand_ids
            .iter()
            .all(|id| module.type_of(*id) == Some(ty));
        let ok = match self.opcode {
            Opcode::IAdd | Opcode::ISub | Opcode::SNegate => module.is_integer_type(ty),
            Opcode::LogicalNot => module.is_boolean_type(ty),
            _ => false,
        };
        (typed && ok).then_some(ty)
    }
}

impl Transform for EquationInstruction {
    fn is_applicable(&self, module: &Module, facts: &FactManager) -> bool {
        if !module.is_fresh_id(self.fresh_id) || equation_arity(self.opcode) != Some(self.in_operand_ids.len()) {
            return false;
        }
        if self.in_operand_ids.iter().any(|id| facts.id_is_irrelevant(*id)) {
            return false;
        }
        let Some(position) = insertion_point(module, &self.instruction_to_insert_before, self.opcode) else {
            return false;
        };
        self.result_type(module).is_some() && all_available_before(module, position, &self.in_operand_ids)
    }

    fn apply(&self, module: &mut Module, facts: &mut FactManager) -> Result<()> {
        ensure_applicable(self, module, facts)?;
        let position = resolve_for_apply(&self.instruction_to_insert_before, module)?;
        let ty = self.result_type(module).unwrap_or(0);
        module.insert_instruction(
            position,
            Instruction::value(self.opcode, ty, self.fresh_id, &self.in_operand_ids),
        )?;
        module.update_id_bound(self.fresh_id);
        facts.add_fact_id_equation(self.fresh_id, self.opcode, &self.in_operand_ids, module);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{make_instruction_descriptor, DataDescriptor};
    use morph_ir::{samples, StructuralValidator, Validator};

    #[test]
    fn test_negate_twice_is_synonymous() {
        let mut module = samples::arithmetic_module();
        let mut facts = FactManager::new();
        let main = module.functions.len() - 1;
        let x = module.functions[main].blocks[0].instructions[1].result_id.unwrap();
        let before = make_instruction_descriptor(&module.functions[main].blocks[0], 2).unwrap();
        let neg = module.id_bound;
        let first = EquationInstruction {
            fresh_id: neg,
            opcode: Opcode::SNegate,
            in_operand_ids: vec![x],
            instruction_to_insert_before: before.clone(),
        };
        assert!(first.is_applicable(&module, &facts));
        first.apply(&mut module, &mut facts).unwrap();
        let second = EquationInstruction {
            fresh_id: neg + 1,
            opcode: Opcode::SNegate,
            in_operand_ids: vec![neg],
            instruction_to_insert_before: before,
        };
        assert!(second.is_applicable(&module, &facts));
        second.apply(&mut module, &mut facts).unwrap();
        assert!(facts.is_synonymous(&DataDescriptor::of(x), &DataDescriptor::of(neg + 1)));
        StructuralValidator.validate(&module).unwrap();
    }

    #[test]
    fn test_rejects_wrong_arity_and_types() {
        let module = samples::arithmetic_module();
        let facts = FactManager::new();
        let main = module.functions.len() - 1;
        let block = &module.functions[main].blocks[0];
        let x = block.instructions[1].result_id.unwrap();
        let before = make_instruction_descriptor(block, 2).unwrap();
        let arity = EquationInstruction {
            fresh_id: module.id_bound,
            opcode: Opcode::IAdd,
            in_operand_ids: vec![x],
            instruction_to_insert_before: before.clone(),
        };
        assert!(!arity.is_applicable(&module, &facts));
        let not_int = EquationInstruction {
            fresh_id: module.id_bound,
            opcode: Opcode::LogicalNot,
            in_operand_ids: vec![x],
            instruction_to_insert_before: before,
        };
        assert!(!not_int.is_applicable(&module, &facts));
    }

    #[test]
    fn test_operand_must_be_available() {
        let module = samples::arithmetic_module();
        let facts = FactManager::new();
        let main = module.functions.len() - 1;
        let block = &module.functions[main].blocks[0];
        let x = block.instructions[1].result_id.unwrap();
        // Before x's own definition.
        let before = make_instruction_descriptor(block, 1).unwrap();
        let t = EquationInstruction {
            fresh_id: module.id_bound,
            opcode: Opcode::SNegate,
            in_operand_ids: vec![x],
            instruction_to_insert_before: before,
        };
        assert!(!t.is_applicable(&module, &facts));
    }
}
