//! Serializable references into a module that are re-resolved against the
//! current module state instead of being held as positions.

use morph_ir::{BasicBlock, Id, InstructionPosition, Module, Opcode, Operand};
use serde::{Deserialize, Serialize};

/// Names an instruction relative to a base: the instruction (or block
/// label) with id `base_instruction_result_id`. Starting at the base, the
/// first `num_opcodes_to_ignore` instructions with opcode
/// `target_instruction_opcode` are skipped and the next one is the target.
///
/// Labels are not instructions, so a descriptor can never resolve to a
/// position "before the label".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstructionDescriptor {
    pub base_instruction_result_id: Id,
    pub target_instruction_opcode: Opcode,
    pub num_opcodes_to_ignore: u32,
}

impl InstructionDescriptor {
    pub fn new(base_instruction_result_id: Id, target_instruction_opcode: Opcode, num_opcodes_to_ignore: u32) -> Self {
        Self {
            base_instruction_result_id,
            target_instruction_opcode,
            num_opcodes_to_ignore,
        }
    }

    /// Finds the described instruction. Resolution never crosses the end of
    /// the block holding the base.
    pub fn resolve(&self, module: &Module) -> Option<InstructionPosition> {
        for (function_index, function) in module.functions.iter().enumerate() {
            for (block_index, block) in function.blocks.iter().enumerate() {
                let mut found_base = block.label == self.base_instruction_result_id;
                let mut num_ignored = 0;
                for (index, inst) in block.instructions.iter().enumerate() {
                    if inst.result_id == Some(self.base_instruction_result_id) {
                        found_base = true;
                    }
                    if found_base && inst.opcode == self.target_instruction_opcode {
                        if num_ignored == self.num_opcodes_to_ignore {
                            return Some(InstructionPosition {
                                function: function_index,
                                block: block_index,
                                index,
                            });
                        }
                        num_ignored += 1;
                    }
                }
                if found_base {
                    return None;
                }
            }
        }
        None
    }
}

/// Describes the instruction at `index` in `block`: the base is the
/// nearest preceding instruction with a result id (or the instruction
/// itself, or the block label), and the skip count is the number of
/// same-opcode instructions between the base and the target.
pub fn make_instruction_descriptor(block: &BasicBlock, index: usize) -> Option<InstructionDescriptor> {
    let target = block.instructions.get(index)?;
    let opcode = target.opcode;
    let mut skip_count = 0;
    for cursor in (0..=index).rev() {
        let inst = &block.instructions[cursor];
        if let Some(id) = inst.result_id {
            return Some(InstructionDescriptor::new(id, opcode, skip_count));
        }
        if cursor != index && inst.opcode == opcode {
            skip_count += 1;
        }
    }
    Some(InstructionDescriptor::new(block.label, opcode, skip_count))
}

/// Descriptor of the instruction currently at `position`.
pub fn descriptor_at(module: &Module, position: InstructionPosition) -> Option<InstructionDescriptor> {
    let block = module.block_at(position.function, position.block)?;
    make_instruction_descriptor(block, position.index)
}

/// A value or one of its (transitive) members: `object` indexed by
/// successive composite indices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataDescriptor {
    pub object: Id,
    pub index: Vec<u32>,
}

impl DataDescriptor {
    pub fn new(object: Id, index: Vec<u32>) -> Self {
        Self { object, index }
    }

    /// The whole of `object`.
    pub fn of(object: Id) -> Self {
        Self::new(object, Vec::new())
    }

    pub fn member(&self, index: u32) -> Self {
        let mut indices = self.index.clone();
        indices.push(index);
        Self::new(self.object, indices)
    }

    /// Type of the described value, if the object exists and the indices
    /// are in range.
    pub fn type_in(&self, module: &Module) -> Option<Id> {
        let object_type = module.type_of(self.object)?;
        module.walk_composite_type_indices(object_type, &self.index)
    }
}

/// One operand slot: operand `in_operand_index` of the enclosing
/// instruction, which must currently hold `id_of_interest`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdUseDescriptor {
    pub id_of_interest: Id,
    pub enclosing_instruction: InstructionDescriptor,
    pub in_operand_index: u32,
}

impl IdUseDescriptor {
    pub fn new(id_of_interest: Id, enclosing_instruction: InstructionDescriptor, in_operand_index: u32) -> Self {
        Self {
            id_of_interest,
            enclosing_instruction,
            in_operand_index,
        }
    }

    pub fn resolve(&self, module: &Module) -> Option<InstructionPosition> {
        let position = self.enclosing_instruction.resolve(module)?;
        let inst = module.instruction_at(position)?;
        (inst.operands.get(self.in_operand_index as usize) == Some(&Operand::Id(self.id_of_interest)))
            .then_some(position)
    }
}

/// An element of a uniform buffer: the variable decorated with
/// `descriptor_set` and `binding`, indexed by `index`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UniformBufferElementDescriptor {
    pub descriptor_set: u32,
    pub binding: u32,
    pub index: Vec<u32>,
}

impl UniformBufferElementDescriptor {
    pub fn new(descriptor_set: u32, binding: u32, index: Vec<u32>) -> Self {
        Self {
            descriptor_set,
            binding,
            index,
        }
    }

    /// The uniform variable and the type of the element it describes.
    pub fn resolve(&self, module: &Module) -> Option<(Id, Id)> {
        let variable = module.find_uniform_variable(self.descriptor_set, self.binding)?;
        let (_, pointee) = module.pointee_type(module.type_of(variable)?)?;
        let element_type = module.walk_composite_type_indices(pointee, &self.index)?;
        Some((variable, element_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use morph_ir::{samples, Instruction};

    #[test]
    fn test_descriptor_round_trip_for_every_instruction() {
        let module = samples::control_flow_module();
        for (f, function) in module.functions.iter().enumerate() {
            for (b, block) in function.blocks.iter().enumerate() {
                for index in 0..block.len() {
                    let descriptor = make_instruction_descriptor(block, index).unwrap();
                    let position = descriptor.resolve(&module).unwrap();
                    assert_eq!(position, InstructionPosition { function: f, block: b, index });
                }
            }
        }
    }

    #[test]
    fn test_label_base_counts_from_block_start() {
        let module = samples::control_flow_module();
        let body = module.functions[1]
            .blocks
            .iter()
            .find(|block| block.len() == 1 && block.instructions[0].opcode == Opcode::Branch)
            .unwrap();
        let descriptor = InstructionDescriptor::new(body.label, Opcode::Branch, 0);
        let position = descriptor.resolve(&module).unwrap();
        assert_eq!(position.index, 0);
        assert!(InstructionDescriptor::new(body.label, Opcode::Branch, 1).resolve(&module).is_none());
        assert!(InstructionDescriptor::new(body.label, Opcode::IAdd, 0).resolve(&module).is_none());
    }

    #[test]
    fn test_descriptor_stable_under_unrelated_insertion() {
        let mut module = samples::arithmetic_module();
        let main = module.functions.len() - 1;
        let block = &module.functions[main].blocks[0];
        let store_index = block
            .instructions
            .iter()
            .rposition(|inst| inst.opcode == Opcode::Store)
            .unwrap();
        let descriptor = make_instruction_descriptor(block, store_index).unwrap();
        let before = module.instruction_at(descriptor.resolve(&module).unwrap()).cloned();

        // Insert before the base, in a different part of the block.
        let operand = block.instructions[1].result_id.unwrap();
        let int = module.type_of(operand).unwrap();
        let fresh = module.id_bound;
        module.update_id_bound(fresh);
        module.functions[main].blocks[0]
            .instructions
            .insert(2, Instruction::value(Opcode::CopyObject, int, fresh, &[operand]));

        let after = module.instruction_at(descriptor.resolve(&module).unwrap()).cloned();
        assert_eq!(before, after);
    }

    #[test]
    fn test_id_use_descriptor() {
        let module = samples::arithmetic_module();
        let main = &module.functions[1];
        let block = &main.blocks[0];
        let add = &block.instructions[1];
        let one = add.id_operand(0).unwrap();
        let enclosing = make_instruction_descriptor(block, 1).unwrap();
        assert!(IdUseDescriptor::new(one, enclosing.clone(), 0).resolve(&module).is_some());
        assert!(IdUseDescriptor::new(one, enclosing, 1).resolve(&module).is_none());
    }

    #[test]
    fn test_data_descriptor_type() {
        let module = samples::uniform_module();
        let uniforms = module.find_uniform_variable(0, 0).unwrap();
        let element = UniformBufferElementDescriptor::new(0, 0, vec![1]);
        let (variable, ty) = element.resolve(&module).unwrap();
        assert_eq!(variable, uniforms);
        assert!(module.is_float_type(ty));
        assert!(UniformBufferElementDescriptor::new(0, 1, vec![0]).resolve(&module).is_none());
        assert_eq!(DataDescriptor::of(uniforms).member(0).index, vec![0]);
    }
}
