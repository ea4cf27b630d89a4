//! Passes that swap uses of ids for equivalent values.

use super::{FuzzerPass, PassContext};
use crate::descriptor::{make_instruction_descriptor, IdUseDescriptor};
use crate::transformation::{
    use_can_be_replaced, CompositeExtract, ComputeDataSynonymFactClosure, ReplaceConstantWithUniform,
    ReplaceIdWithSynonym,
};
use crate::util::{can_insert_opcode_before, id_is_available_before_instruction};
use morph_core::{Chance, Result};
use morph_ir::{Id, Module, Opcode, StorageClass};
use std::collections::BTreeSet;

/// Every replaceable use of an id accepted by `wanted`, described so it
/// survives insertions elsewhere in the block.
fn collect_id_uses(module: &Module, wanted: impl Fn(Id) -> bool) -> Vec<IdUseDescriptor> {
    let mut uses = Vec::new();
    for function in &module.functions {
        for block in &function.blocks {
            for (index, inst) in block.instructions.iter().enumerate() {
                for (operand_index, operand) in inst.operands.iter().enumerate() {
                    let Some(id) = operand.as_id() else {
                        continue;
                    };
                    if !wanted(id) || !use_can_be_replaced(module, inst, operand_index) {
                        continue;
                    }
                    if let Some(enclosing) = make_instruction_descriptor(block, index) {
                        uses.push(IdUseDescriptor::new(id, enclosing, operand_index as u32));
                    }
                }
            }
        }
    }
    uses
}

/// Closes the synonym facts, then replaces uses of ids with synonyms.
/// A synonym that is a member of a composite is first extracted next to
/// the use.
pub struct ApplyIdSynonyms;

impl FuzzerPass for ApplyIdSynonyms {
    fn name(&self) -> &'static str {
        "apply_id_synonyms"
    }

    fn apply(&self, pass: &mut PassContext<'_>) -> Result<()> {
        let maximum_equivalence_class_size =
            u32::try_from(pass.context.max_equivalence_class_size()).unwrap_or(u32::MAX);
        pass.apply_transformation(ComputeDataSynonymFactClosure {
            maximum_equivalence_class_size,
        })?;

        let known: BTreeSet<Id> = pass.facts.ids_for_which_synonyms_are_known().into_iter().collect();
        let uses = collect_id_uses(pass.module, |id| known.contains(&id));
        for id_use in uses {
            if !pass.context.roll(Chance::ReplacingIdWithSynonym) {
                continue;
            }
            let Some(position) = id_use.resolve(pass.module) else {
                continue;
            };
            let Some(is_phi) = pass.module.instruction_at(position).map(|inst| inst.opcode == Opcode::Phi) else {
                continue;
            };
            let id_type = pass.module.type_of(id_use.id_of_interest);
            let synonyms: Vec<_> = pass
                .facts
                .synonyms_for_id(id_use.id_of_interest)
                .into_iter()
                .filter(|synonym| synonym.type_in(pass.module) == id_type)
                .filter(|synonym| synonym.index.is_empty() || !is_phi)
                .collect();
            let Some(synonym) = pass.context.choose(&synonyms).cloned() else {
                continue;
            };

            let synonymous_id = if synonym.index.is_empty() {
                synonym.object
            } else {
                if !can_insert_opcode_before(pass.module, position, Opcode::CompositeExtract)
                    || !id_is_available_before_instruction(pass.module, position, synonym.object)
                {
                    continue;
                }
                let fresh_id = pass.context.fresh_id();
                let extracted = pass.maybe_apply(CompositeExtract {
                    fresh_id,
                    composite_id: synonym.object,
                    index: synonym.index,
                    instruction_to_insert_before: id_use.enclosing_instruction.clone(),
                })?;
                if !extracted {
                    continue;
                }
                fresh_id
            };
            pass.maybe_apply(ReplaceIdWithSynonym {
                id_use_descriptor: id_use,
                synonymous_id,
            })?;
        }
        Ok(())
    }
}

/// Replaces uses of scalar constants with loads from uniform elements
/// known to hold the same value.
pub struct ObfuscateConstants;

impl FuzzerPass for ObfuscateConstants {
    fn name(&self) -> &'static str {
        "obfuscate_constants"
    }

    fn apply(&self, pass: &mut PassContext<'_>) -> Result<()> {
        let uses = {
            let module = &*pass.module;
            let facts = &*pass.facts;
            collect_id_uses(module, |id| {
                module
                    .def_instruction(id)
                    .is_some_and(|inst| inst.opcode == Opcode::Constant)
                    && !facts.uniform_descriptors_for_constant(module, id).is_empty()
            })
        };
        for id_use in uses {
            if !pass.context.roll(Chance::ObfuscatingConstant) {
                continue;
            }
            let descriptors = pass
                .facts
                .uniform_descriptors_for_constant(pass.module, id_use.id_of_interest);
            let Some(uniform_descriptor) = pass.context.choose(&descriptors).cloned() else {
                continue;
            };
            let Some((_, element_type)) = uniform_descriptor.resolve(pass.module) else {
                continue;
            };
            pass.find_or_create_pointer_type(StorageClass::Uniform, element_type)?;
            for index in &uniform_descriptor.index {
                pass.find_or_create_int_constant(32, true, *index)?;
            }
            let fresh_ids = pass.context.fresh_ids(2);
            pass.maybe_apply(ReplaceConstantWithUniform {
                id_use_descriptor: id_use,
                uniform_descriptor,
                fresh_id_for_access_chain: fresh_ids[0],
                fresh_id_for_load: fresh_ids[1],
            })?;
        }
        Ok(())
    }
}
