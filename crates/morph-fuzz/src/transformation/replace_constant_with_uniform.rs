use super::replace_id_with_synonym::use_can_be_replaced;
use super::{ensure_applicable, Transform};
use crate::descriptor::{DataDescriptor, IdUseDescriptor, UniformBufferElementDescriptor};
use crate::fact_manager::FactManager;
use crate::util::can_insert_opcode_before;
use morph_core::{Error, Result};
use morph_ir::{Id, Instruction, Module, Opcode, Operand, StorageClass, TypeKey};
use serde::{Deserialize, Serialize};

/// Replaces a use of a constant with a load from a uniform buffer element
/// known to hold the same value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaceConstantWithUniform {
    pub id_use_descriptor: IdUseDescriptor,
    pub uniform_descriptor: UniformBufferElementDescriptor,
    pub fresh_id_for_access_chain: Id,
    pub fresh_id_for_load: Id,
}

struct Plan {
    variable: Id,
    element_type: Id,
    pointer_type: Id,
    index_ids: Vec<Id>,
}

impl ReplaceConstantWithUniform {
    fn plan(&self, module: &Module) -> Option<Plan> {
        let (variable, element_type) = self.uniform_descriptor.resolve(module)?;
        let pointer_type = module.find_pointer_type(StorageClass::Uniform, element_type)?;
        let int = module.find_type(&TypeKey::Int { width: 32, signed: true })?;
        let index_ids = self
            .uniform_descriptor
            .index
            .iter()
            .map(|index| module.find_scalar_constant(int, &[*index]))
            .collect::<Option<Vec<_>>>()?;
        Some(Plan {
            variable,
            element_type,
            pointer_type,
            index_ids,
        })
    }
}

impl Transform for ReplaceConstantWithUniform {
    fn is_applicable(&self, module: &Module, facts: &FactManager) -> bool {
        let constant = self.id_use_descriptor.id_of_interest;
        if self.fresh_id_for_access_chain == self.fresh_id_for_load
            || !module.is_fresh_id(self.fresh_id_for_access_chain)
            || !module.is_fresh_id(self.fresh_id_for_load)
        {
            return false;
        }
        let is_scalar_constant = module
            .def_instruction(constant)
            .is_some_and(|inst| inst.opcode == Opcode::Constant);
        if !is_scalar_constant
            || facts.constant_from_uniform_descriptor(module, &self.uniform_descriptor) != Some(constant)
        {
            return false;
        }
        let Some(plan) = self.plan(module) else {
            return false;
        };
        if module.type_of(constant) != Some(plan.element_type) {
            return false;
        }
        let Some(position) = self.id_use_descriptor.resolve(module) else {
            return false;
        };
        let Some(inst) = module.instruction_at(position) else {
            return false;
        };
        inst.opcode != Opcode::Phi
            && use_can_be_replaced(module, inst, self.id_use_descriptor.in_operand_index as usize)
            && can_insert_opcode_before(module, position, Opcode::AccessChain)
    }

    fn apply(&self, module: &mut Module, facts: &mut FactManager) -> Result<()> {
        ensure_applicable(self, module, facts)?;
        let plan = self
            .plan(module)
            .ok_or_else(|| Error::invariant("uniform element no longer resolves"))?;
        let mut position = self
            .id_use_descriptor
            .resolve(module)
            .ok_or_else(|| Error::invariant("id use no longer resolves"))?;

        let mut chain_operands = vec![plan.variable];
        chain_operands.extend(&plan.index_ids);
        module.insert_instruction(
            position,
            Instruction::value(
                Opcode::AccessChain,
                plan.pointer_type,
                self.fresh_id_for_access_chain,
                &chain_operands,
            ),
        )?;
        position.index += 1;
        module.insert_instruction(
            position,
            Instruction::value(
                Opcode::Load,
                plan.element_type,
                self.fresh_id_for_load,
                &[self.fresh_id_for_access_chain],
            ),
        )?;
        position.index += 1;
        let inst = module
            .instruction_at_mut(position)
            .ok_or_else(|| Error::invariant("enclosing instruction vanished"))?;
        inst.operands[self.id_use_descriptor.in_operand_index as usize] = Operand::Id(self.fresh_id_for_load);

        module.update_id_bound(self.fresh_id_for_access_chain);
        module.update_id_bound(self.fresh_id_for_load);
        facts.add_fact_data_synonym(
            &DataDescriptor::of(self.fresh_id_for_load),
            &DataDescriptor::of(self.id_use_descriptor.id_of_interest),
            module,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::make_instruction_descriptor;
    use crate::fact_manager::Fact;
    use morph_ir::{samples, StructuralValidator, Validator};

    fn uniform_fact() -> Fact {
        Fact::ConstantUniform {
            uniform_buffer_element_descriptor: UniformBufferElementDescriptor::new(0, 0, vec![0]),
            constant_words: vec![7],
        }
    }

    #[test]
    fn test_replace_seven_with_uniform_load() {
        let mut module = samples::uniform_module();
        let mut facts = FactManager::new();
        assert!(facts.add_fact(&uniform_fact(), &module));
        let block = &module.functions[0].blocks[0];
        // a = IAdd(7, 1)
        let add = make_instruction_descriptor(block, 1).unwrap();
        let seven = block.instructions[1].id_operand(0).unwrap();
        let t = ReplaceConstantWithUniform {
            id_use_descriptor: IdUseDescriptor::new(seven, add, 0),
            uniform_descriptor: UniformBufferElementDescriptor::new(0, 0, vec![0]),
            fresh_id_for_access_chain: module.id_bound,
            fresh_id_for_load: module.id_bound + 1,
        };
        assert!(t.is_applicable(&module, &facts));
        t.apply(&mut module, &mut facts).unwrap();
        let block = &module.functions[0].blocks[0];
        assert_eq!(block.instructions[1].opcode, Opcode::AccessChain);
        assert_eq!(block.instructions[2].opcode, Opcode::Load);
        assert_eq!(block.instructions[3].id_operand(0), Some(t.fresh_id_for_load));
        assert!(facts.is_synonymous(&DataDescriptor::of(seven), &DataDescriptor::of(t.fresh_id_for_load)));
        StructuralValidator.validate(&module).unwrap();
    }

    #[test]
    fn test_requires_matching_fact() {
        let module = samples::uniform_module();
        let facts = FactManager::new();
        let block = &module.functions[0].blocks[0];
        let add = make_instruction_descriptor(block, 1).unwrap();
        let seven = block.instructions[1].id_operand(0).unwrap();
        let t = ReplaceConstantWithUniform {
            id_use_descriptor: IdUseDescriptor::new(seven, add, 0),
            uniform_descriptor: UniformBufferElementDescriptor::new(0, 0, vec![0]),
            fresh_id_for_access_chain: module.id_bound,
            fresh_id_for_load: module.id_bound + 1,
        };
        assert!(!t.is_applicable(&module, &facts));
    }

    #[test]
    fn test_fresh_ids_must_differ() {
        let module = samples::uniform_module();
        let mut facts = FactManager::new();
        facts.add_fact(&uniform_fact(), &module);
        let block = &module.functions[0].blocks[0];
        let add = make_instruction_descriptor(block, 1).unwrap();
        let seven = block.instructions[1].id_operand(0).unwrap();
        let t = ReplaceConstantWithUniform {
            id_use_descriptor: IdUseDescriptor::new(seven, add, 0),
            uniform_descriptor: UniformBufferElementDescriptor::new(0, 0, vec![0]),
            fresh_id_for_access_chain: module.id_bound,
            fresh_id_for_load: module.id_bound,
        };
        assert!(!t.is_applicable(&module, &facts));
    }
}
