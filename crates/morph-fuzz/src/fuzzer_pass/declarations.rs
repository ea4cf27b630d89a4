use super::{FuzzerPass, PassContext};
use crate::transformation::{AddGlobalVariable, AddLocalVariable};
use morph_core::{Chance, Result};
use morph_ir::{Function, Id, StorageClass, TypeKey};

/// Declares new vector and struct types built from existing types.
pub struct AddCompositeTypes;

impl FuzzerPass for AddCompositeTypes {
    fn name(&self) -> &'static str {
        "add_composite_types"
    }

    fn apply(&self, pass: &mut PassContext<'_>) -> Result<()> {
        while pass.context.roll(Chance::AddingCompositeType) {
            if pass.context.roll(Chance::ChoosingStructTypeVsVectorType) {
                add_struct_type(pass)?;
            } else {
                add_vector_type(pass)?;
            }
        }
        Ok(())
    }
}

fn add_vector_type(pass: &mut PassContext<'_>) -> Result<()> {
    let scalars: Vec<Id> = pass
        .value_types()
        .into_iter()
        .filter(|ty| pass.module.type_key(*ty).is_some_and(|key| key.is_scalar()))
        .collect();
    let Some(&component) = pass.context.choose(&scalars) else {
        return Ok(());
    };
    let count = pass.context.random_between(2, 4);
    pass.find_or_create_type(TypeKey::Vector { component, count })?;
    Ok(())
}

fn add_struct_type(pass: &mut PassContext<'_>) -> Result<()> {
    let candidates = pass.value_types();
    if candidates.is_empty() {
        return Ok(());
    }
    let mut members = Vec::new();
    loop {
        if let Some(&member) = pass.context.choose(&candidates) {
            members.push(member);
        }
        if members.len() >= pass.context.max_struct_members() || !pass.context.roll(Chance::AddingAnotherStructField)
        {
            break;
        }
    }
    pass.find_or_create_type(TypeKey::Struct { members })?;
    Ok(())
}

/// Adds private globals whose values are irrelevant, so later passes can
/// load from and store to them freely.
pub struct AddGlobalVariables;

impl FuzzerPass for AddGlobalVariables {
    fn name(&self) -> &'static str {
        "add_global_variables"
    }

    fn apply(&self, pass: &mut PassContext<'_>) -> Result<()> {
        while pass.context.roll(Chance::AddingGlobalVariable) {
            let types = pass.value_types();
            let Some(&pointee) = pass.context.choose(&types) else {
                return Ok(());
            };
            let pointer_type = pass.find_or_create_pointer_type(StorageClass::Private, pointee)?;
            let Some(initializer) = pass.find_or_create_zero_constant(pointee)? else {
                continue;
            };
            let fresh_id = pass.context.fresh_id();
            pass.apply_transformation(AddGlobalVariable {
                fresh_id,
                type_id: pointer_type,
                initializer_id: Some(initializer),
                value_is_irrelevant: true,
            })?;
        }
        Ok(())
    }
}

/// Adds local variables with irrelevant values to each function.
pub struct AddLocalVariables;

impl FuzzerPass for AddLocalVariables {
    fn name(&self) -> &'static str {
        "add_local_variables"
    }

    fn apply(&self, pass: &mut PassContext<'_>) -> Result<()> {
        let function_ids: Vec<Id> = pass.module.functions.iter().map(Function::id).collect();
        for function_id in function_ids {
            while pass.context.roll(Chance::AddingLocalVariable) {
                let types = pass.value_types();
                let Some(&pointee) = pass.context.choose(&types) else {
                    return Ok(());
                };
                let pointer_type = pass.find_or_create_pointer_type(StorageClass::Function, pointee)?;
                let Some(initializer) = pass.find_or_create_zero_constant(pointee)? else {
                    continue;
                };
                let fresh_id = pass.context.fresh_id();
                pass.apply_transformation(AddLocalVariable {
                    fresh_id,
                    type_id: pointer_type,
                    function_id,
                    initializer_id: Some(initializer),
                    value_is_irrelevant: true,
                })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Harness;
    use super::*;
    use morph_ir::{samples, Opcode, StructuralValidator, Validator};

    #[test]
    fn test_composite_types_are_well_formed() {
        for seed in 0..8 {
            let mut harness = Harness::new(samples::arithmetic_module(), seed, 60);
            harness.run(&AddCompositeTypes);
            StructuralValidator.validate(&harness.module).unwrap();
        }
    }

    #[test]
    fn test_globals_have_irrelevant_pointees() {
        let mut harness = Harness::new(samples::control_flow_module(), 5, 70);
        harness.run(&AddGlobalVariables);
        for t in harness.transformations.iter() {
            if let crate::transformation::Transformation::AddGlobalVariable(global) = t {
                assert!(harness.facts.pointee_value_is_irrelevant(global.fresh_id));
            }
        }
        StructuralValidator.validate(&harness.module).unwrap();
    }

    #[test]
    fn test_locals_go_to_entry_blocks() {
        let mut harness = Harness::new(samples::control_flow_module(), 9, 80);
        harness.run(&AddLocalVariables);
        for function in &harness.module.functions {
            let entry = function.entry_block().unwrap();
            let variables = entry.instructions.iter().filter(|i| i.opcode == Opcode::Variable).count();
            let leading = entry.instructions.iter().take_while(|i| i.opcode == Opcode::Variable).count();
            assert_eq!(variables, leading);
        }
        StructuralValidator.validate(&harness.module).unwrap();
    }
}
