//! Passes that insert new instructions at program points.

use super::{FuzzerPass, PassContext};
use crate::call_graph::CallGraph;
use crate::transformation::{
    CompositeConstruct, CompositeExtract, CopyObject, EquationInstruction, FunctionCall, Load, Store,
};
use crate::util::{can_insert_opcode_before, can_make_synonym_of};
use morph_core::{Chance, Result};
use morph_ir::{Function, Id, InstructionPosition, Module, Opcode, StorageClass, TypeKey};

/// Whether the pass should try something at `position`: the opcode must be
/// insertable there and the chance must come up.
fn should_insert(pass: &mut PassContext<'_>, position: InstructionPosition, opcode: Opcode, chance: Chance) -> bool {
    can_insert_opcode_before(pass.module, position, opcode) && pass.context.roll(chance)
}

fn block_is_dead(pass: &PassContext<'_>, position: InstructionPosition) -> bool {
    pass.module
        .block_at(position.function, position.block)
        .is_some_and(|block| pass.facts.block_is_dead(block.label))
}

fn pointer_is_dereferenceable(module: &Module, inst: &morph_ir::Instruction) -> bool {
    inst.result_type.is_some_and(|ty| module.is_pointer_type(ty))
        && !matches!(inst.opcode, Opcode::ConstantNull | Opcode::Undef)
}

/// Inserts arithmetic and logical instructions whose results are related
/// to their operands by an id equation.
pub struct AddEquationInstructions;

impl FuzzerPass for AddEquationInstructions {
    fn name(&self) -> &'static str {
        "add_equation_instructions"
    }

    fn apply(&self, pass: &mut PassContext<'_>) -> Result<()> {
        pass.for_each_instruction(|pass, position, descriptor| {
            if !should_insert(pass, position, Opcode::IAdd, Chance::AddingEquationInstruction) {
                return Ok(());
            }
            let opcodes = [Opcode::IAdd, Opcode::ISub, Opcode::SNegate, Opcode::LogicalNot];
            let Some(&opcode) = pass.context.choose(&opcodes) else {
                return Ok(());
            };
            let wants_boolean = opcode == Opcode::LogicalNot;
            let candidates: Vec<Id> = pass
                .available_ids(position, |module, inst| {
                    inst.result_type.is_some_and(|ty| {
                        if wants_boolean {
                            module.is_boolean_type(ty)
                        } else {
                            module.is_integer_type(ty)
                        }
                    })
                })
                .into_iter()
                .filter(|id| !pass.facts.id_is_irrelevant(*id))
                .collect();
            let Some(&first) = pass.context.choose(&candidates) else {
                return Ok(());
            };
            let mut in_operand_ids = vec![first];
            if matches!(opcode, Opcode::IAdd | Opcode::ISub) {
                let first_type = pass.module.type_of(first);
                let same_type: Vec<Id> = candidates
                    .iter()
                    .copied()
                    .filter(|id| pass.module.type_of(*id) == first_type)
                    .collect();
                let Some(&second) = pass.context.choose(&same_type) else {
                    return Ok(());
                };
                in_operand_ids.push(second);
            }
            let fresh_id = pass.context.fresh_id();
            pass.maybe_apply(EquationInstruction {
                fresh_id,
                opcode,
                in_operand_ids,
                instruction_to_insert_before: descriptor,
            })?;
            Ok(())
        })
    }
}

/// Inserts calls. Live code only calls livesafe functions, passing
/// variables whose pointees are irrelevant for pointer parameters.
pub struct AddFunctionCalls;

impl FuzzerPass for AddFunctionCalls {
    fn name(&self) -> &'static str {
        "add_function_calls"
    }

    fn apply(&self, pass: &mut PassContext<'_>) -> Result<()> {
        pass.for_each_instruction(|pass, position, descriptor| {
            if !should_insert(pass, position, Opcode::FunctionCall, Chance::CallingFunction) {
                return Ok(());
            }
            let caller = pass.module.functions[position.function].id();
            let dead = block_is_dead(pass, position);
            let call_graph = CallGraph::new(pass.module);
            let callees: Vec<Id> = pass
                .module
                .functions
                .iter()
                .map(Function::id)
                .filter(|callee| {
                    !pass.module.is_entry_point(*callee)
                        && (dead || pass.facts.function_is_livesafe(*callee))
                        && !call_graph.call_would_recurse(caller, *callee)
                })
                .collect();
            let Some(&callee) = pass.context.choose(&callees) else {
                return Ok(());
            };
            let param_types: Vec<Id> = pass
                .module
                .function(callee)
                .map(|function| function.params.iter().filter_map(|param| param.result_type).collect())
                .unwrap_or_default();
            let available = pass.available_ids(position, |_, _| true);

            let mut argument_ids = Vec::with_capacity(param_types.len());
            for param_type in param_types {
                let matching: Vec<Id> = available
                    .iter()
                    .copied()
                    .filter(|id| pass.module.type_of(*id) == Some(param_type))
                    .collect();
                let argument = match pass.module.pointee_type(param_type) {
                    Some((storage, pointee)) => {
                        let variables: Vec<Id> = matching
                            .into_iter()
                            .filter(|id| {
                                pass.module.def_instruction(*id).is_some_and(|inst| {
                                    matches!(inst.opcode, Opcode::Variable | Opcode::FunctionParameter)
                                }) && (dead || pass.facts.pointee_value_is_irrelevant(*id))
                            })
                            .collect();
                        match pass.context.choose(&variables) {
                            Some(&id) => Some(id),
                            None => match storage {
                                StorageClass::Function => pass.find_or_create_local_variable(caller, pointee)?,
                                StorageClass::Private => pass.find_or_create_global_variable(pointee)?,
                                _ => None,
                            },
                        }
                    }
                    None => match pass.context.choose(&matching) {
                        Some(&id) => Some(id),
                        None => pass.find_or_create_zero_constant(param_type)?,
                    },
                };
                let Some(argument) = argument else {
                    return Ok(());
                };
                argument_ids.push(argument);
            }
            let fresh_id = pass.context.fresh_id();
            pass.maybe_apply(FunctionCall {
                fresh_id,
                callee_id: callee,
                argument_ids,
                instruction_to_insert_before: descriptor,
            })?;
            Ok(())
        })
    }
}

/// Inserts loads through available pointers.
pub struct AddLoads;

impl FuzzerPass for AddLoads {
    fn name(&self) -> &'static str {
        "add_loads"
    }

    fn apply(&self, pass: &mut PassContext<'_>) -> Result<()> {
        pass.for_each_instruction(|pass, position, descriptor| {
            if !should_insert(pass, position, Opcode::Load, Chance::AddingLoad) {
                return Ok(());
            }
            let pointers = pass.available_ids(position, pointer_is_dereferenceable);
            let Some(&pointer_id) = pass.context.choose(&pointers) else {
                return Ok(());
            };
            let fresh_id = pass.context.fresh_id();
            pass.maybe_apply(Load {
                fresh_id,
                pointer_id,
                instruction_to_insert_before: descriptor,
            })?;
            Ok(())
        })
    }
}

/// Inserts stores, either in dead blocks or through pointers whose pointee
/// value is irrelevant.
pub struct AddStores;

impl FuzzerPass for AddStores {
    fn name(&self) -> &'static str {
        "add_stores"
    }

    fn apply(&self, pass: &mut PassContext<'_>) -> Result<()> {
        pass.for_each_instruction(|pass, position, descriptor| {
            if !should_insert(pass, position, Opcode::Store, Chance::AddingStore) {
                return Ok(());
            }
            let dead = block_is_dead(pass, position);
            let pointers: Vec<Id> = pass
                .available_ids(position, |module, inst| {
                    pointer_is_dereferenceable(module, inst)
                        && inst
                            .result_type
                            .and_then(|ty| module.pointee_type(ty))
                            .is_some_and(|(storage, _)| !storage.is_read_only())
                })
                .into_iter()
                .filter(|id| dead || pass.facts.pointee_value_is_irrelevant(*id))
                .collect();
            let Some(&pointer_id) = pass.context.choose(&pointers) else {
                return Ok(());
            };
            let Some((_, pointee)) = pass.module.type_of(pointer_id).and_then(|ty| pass.module.pointee_type(ty)) else {
                return Ok(());
            };
            let values = pass.available_ids(position, |_, inst| inst.result_type == Some(pointee));
            let Some(&value_id) = pass.context.choose(&values) else {
                return Ok(());
            };
            pass.maybe_apply(Store {
                pointer_id,
                value_id,
                instruction_to_insert_before: descriptor,
            })?;
            Ok(())
        })
    }
}

/// Builds composites out of available values of the member types.
pub struct ConstructComposites;

/// Arrays longer than this are never constructed piecewise.
const MAX_CONSTRUCTED_ARRAY_LENGTH: u32 = 16;

impl FuzzerPass for ConstructComposites {
    fn name(&self) -> &'static str {
        "construct_composites"
    }

    fn apply(&self, pass: &mut PassContext<'_>) -> Result<()> {
        pass.for_each_instruction(|pass, position, descriptor| {
            if !should_insert(pass, position, Opcode::CompositeConstruct, Chance::ConstructingComposite) {
                return Ok(());
            }
            let composite_types: Vec<Id> = pass
                .value_types()
                .into_iter()
                .filter(|ty| pass.module.is_composite_type(*ty))
                .collect();
            let Some(&composite_type_id) = pass.context.choose(&composite_types) else {
                return Ok(());
            };
            let member_types = match pass.module.type_key(composite_type_id) {
                Some(TypeKey::Vector { component, count }) => vec![component; count as usize],
                Some(TypeKey::Array { element, length }) if length <= MAX_CONSTRUCTED_ARRAY_LENGTH => {
                    vec![element; length as usize]
                }
                Some(TypeKey::Struct { members }) => members,
                _ => return Ok(()),
            };
            let available = pass.available_ids(position, can_make_synonym_of);
            let mut component_ids = Vec::with_capacity(member_types.len());
            for member_type in member_types {
                let matching: Vec<Id> = available
                    .iter()
                    .copied()
                    .filter(|id| pass.module.type_of(*id) == Some(member_type))
                    .collect();
                let Some(&component) = pass.context.choose(&matching) else {
                    return Ok(());
                };
                component_ids.push(component);
            }
            let fresh_id = pass.context.fresh_id();
            pass.maybe_apply(CompositeConstruct {
                fresh_id,
                composite_type_id,
                component_ids,
                instruction_to_insert_before: descriptor,
            })?;
            Ok(())
        })
    }
}

/// Inserts copies of available values.
pub struct CopyObjects;

impl FuzzerPass for CopyObjects {
    fn name(&self) -> &'static str {
        "copy_objects"
    }

    fn apply(&self, pass: &mut PassContext<'_>) -> Result<()> {
        pass.for_each_instruction(|pass, position, descriptor| {
            if !should_insert(pass, position, Opcode::CopyObject, Chance::CopyingObject) {
                return Ok(());
            }
            let candidates = pass.available_ids(position, can_make_synonym_of);
            let Some(&object) = pass.context.choose(&candidates) else {
                return Ok(());
            };
            let fresh_id = pass.context.fresh_id();
            pass.maybe_apply(CopyObject {
                fresh_id,
                object,
                instruction_to_insert_before: descriptor,
            })?;
            Ok(())
        })
    }
}

/// Extracts (possibly nested) members from available composites.
pub struct ExtractFromComposites;

impl FuzzerPass for ExtractFromComposites {
    fn name(&self) -> &'static str {
        "extract_from_composites"
    }

    fn apply(&self, pass: &mut PassContext<'_>) -> Result<()> {
        pass.for_each_instruction(|pass, position, descriptor| {
            if !should_insert(pass, position, Opcode::CompositeExtract, Chance::ExtractingFromComposite) {
                return Ok(());
            }
            let composites = pass.available_ids(position, |module, inst| {
                inst.result_type.is_some_and(|ty| module.is_composite_type(ty)) && can_make_synonym_of(module, inst)
            });
            let Some(&composite_id) = pass.context.choose(&composites) else {
                return Ok(());
            };
            let mut index = Vec::new();
            let mut current = pass.module.type_of(composite_id);
            while let Some(ty) = current {
                let Some(count) = pass.module.composite_member_count(ty).filter(|count| *count > 0) else {
                    break;
                };
                let member = pass.context.random_u32(count);
                index.push(member);
                current = pass.module.walk_composite_type_index(ty, member);
                if !pass.context.choose_even() {
                    break;
                }
            }
            if index.is_empty() {
                return Ok(());
            }
            let fresh_id = pass.context.fresh_id();
            pass.maybe_apply(CompositeExtract {
                fresh_id,
                composite_id,
                index,
                instruction_to_insert_before: descriptor,
            })?;
            Ok(())
        })
    }
}
