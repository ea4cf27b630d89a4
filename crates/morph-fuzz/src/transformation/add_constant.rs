use super::{ensure_applicable, Transform};
use crate::descriptor::DataDescriptor;
use crate::fact_manager::FactManager;
use morph_core::Result;
use morph_ir::{check_composite_components, words_for_width, Id, Instruction, Module, Opcode, Operand, TypeKey};
use serde::{Deserialize, Serialize};

/// Declares `true` or `false`. Requires the boolean type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddConstantBoolean {
    pub fresh_id: Id,
    pub is_true: bool,
}

impl Transform for AddConstantBoolean {
    fn is_applicable(&self, module: &Module, _facts: &FactManager) -> bool {
        module.is_fresh_id(self.fresh_id) && module.find_type(&TypeKey::Bool).is_some()
    }

    fn apply(&self, module: &mut Module, facts: &mut FactManager) -> Result<()> {
        ensure_applicable(self, module, facts)?;
        let bool_type = module.find_type(&TypeKey::Bool).unwrap_or(0);
        let opcode = if self.is_true {
            Opcode::ConstantTrue
        } else {
            Opcode::ConstantFalse
        };
        module.globals.push(
            Instruction::new(opcode)
                .with_result_type(bool_type)
                .with_result_id(self.fresh_id),
        );
        module.update_id_bound(self.fresh_id);
        Ok(())
    }
}

/// Declares an integer or float constant from its raw words.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddConstantScalar {
    pub fresh_id: Id,
    pub type_id: Id,
    pub words: Vec<u32>,
}

impl Transform for AddConstantScalar {
    fn is_applicable(&self, module: &Module, _facts: &FactManager) -> bool {
        if !module.is_fresh_id(self.fresh_id) {
            return false;
        }
        match module.type_key(self.type_id) {
            Some(TypeKey::Int { width, .. }) | Some(TypeKey::Float { width }) => {
                self.words.len() == words_for_width(width)
            }
            _ => false,
        }
    }

    fn apply(&self, module: &mut Module, facts: &mut FactManager) -> Result<()> {
        ensure_applicable(self, module, facts)?;
        module.globals.push(
            Instruction::new(Opcode::Constant)
                .with_result_type(self.type_id)
                .with_result_id(self.fresh_id)
                .with_operands(self.words.iter().map(|w| Operand::Literal(*w)).collect()),
        );
        module.update_id_bound(self.fresh_id);
        Ok(())
    }
}

/// Declares a composite constant. Records that each member of the new
/// constant is synonymous with the constituent it was built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddConstantComposite {
    pub fresh_id: Id,
    pub type_id: Id,
    pub constituent_ids: Vec<Id>,
}

impl Transform for AddConstantComposite {
    fn is_applicable(&self, module: &Module, _facts: &FactManager) -> bool {
        module.is_fresh_id(self.fresh_id)
            && module.is_composite_type(self.type_id)
            && self.constituent_ids.iter().all(|id| module.is_constant(*id))
            && check_composite_components(module, self.type_id, &self.constituent_ids).is_ok()
    }

    fn apply(&self, module: &mut Module, facts: &mut FactManager) -> Result<()> {
        ensure_applicable(self, module, facts)?;
        module.globals.push(
            Instruction::new(Opcode::ConstantComposite)
                .with_result_type(self.type_id)
                .with_result_id(self.fresh_id)
                .with_id_operands(self.constituent_ids.iter().copied()),
        );
        module.update_id_bound(self.fresh_id);
        record_member_synonyms(module, facts, self.fresh_id, &self.constituent_ids);
        Ok(())
    }
}

/// Records `composite[i] ~ constituent` for every constituent. A vector
/// constituent of a larger vector covers several consecutive members.
pub(crate) fn record_member_synonyms(module: &Module, facts: &mut FactManager, composite: Id, constituents: &[Id]) {
    let composite_type = module.type_of(composite).unwrap_or(0);
    let component_type = match module.type_key(composite_type) {
        Some(TypeKey::Vector { component, .. }) => Some(component),
        _ => None,
    };
    let mut member = 0u32;
    for constituent in constituents {
        if facts.id_is_irrelevant(*constituent) {
            member += constituent_width(module, component_type, *constituent);
            continue;
        }
        let constituent_type = module.type_of(*constituent);
        match (component_type, constituent_type.and_then(|t| module.type_key(t))) {
            (Some(component), Some(TypeKey::Vector { count, .. })) if constituent_type != Some(component) => {
                for k in 0..count {
                    facts.add_fact_data_synonym(
                        &DataDescriptor::new(composite, vec![member + k]),
                        &DataDescriptor::new(*constituent, vec![k]),
                        module,
                    );
                }
                member += count;
            }
            _ => {
                facts.add_fact_data_synonym(
                    &DataDescriptor::new(composite, vec![member]),
                    &DataDescriptor::of(*constituent),
                    module,
                );
                member += 1;
            }
        }
    }
}

fn constituent_width(module: &Module, component_type: Option<Id>, constituent: Id) -> u32 {
    let ty = module.type_of(constituent);
    match (component_type, ty.and_then(|t| module.type_key(t))) {
        (Some(component), Some(TypeKey::Vector { count, .. })) if ty != Some(component) => count,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use morph_ir::{samples, ModuleBuilder, StructuralValidator, Validator};

    #[test]
    fn test_add_boolean_constant_fresh_ids() {
        let mut module = samples::arithmetic_module();
        let mut facts = FactManager::new();
        let first = module.id_bound;
        let t = AddConstantBoolean {
            fresh_id: first,
            is_true: true,
        };
        assert!(t.is_applicable(&module, &facts));
        t.apply(&mut module, &mut facts).unwrap();
        assert!(!t.is_applicable(&module, &facts));
        let next = AddConstantBoolean {
            fresh_id: first + 1,
            is_true: true,
        };
        assert!(next.is_applicable(&module, &facts));
        StructuralValidator.validate(&module).unwrap();
    }

    #[test]
    fn test_boolean_constant_needs_bool_type() {
        let mut b = ModuleBuilder::new();
        b.type_int(32, true);
        let module = b.build();
        let t = AddConstantBoolean {
            fresh_id: module.id_bound,
            is_true: false,
        };
        assert!(!t.is_applicable(&module, &FactManager::new()));
    }

    #[test]
    fn test_scalar_word_count_must_match_width() {
        let module = samples::arithmetic_module();
        let facts = FactManager::new();
        let int = module.find_type(&TypeKey::Int { width: 32, signed: true }).unwrap();
        let good = AddConstantScalar {
            fresh_id: module.id_bound,
            type_id: int,
            words: vec![42],
        };
        let bad = AddConstantScalar {
            words: vec![42, 0],
            ..good.clone()
        };
        assert!(good.is_applicable(&module, &facts));
        assert!(!bad.is_applicable(&module, &facts));
    }

    #[test]
    fn test_composite_records_member_synonyms() {
        let mut b = ModuleBuilder::new();
        let int = b.type_int(32, true);
        let vec2 = b.type_vector(int, 2);
        let one = b.constant(int, &[1]);
        let two = b.constant(int, &[2]);
        let mut module = b.build();
        let mut facts = FactManager::new();
        let t = AddConstantComposite {
            fresh_id: module.id_bound,
            type_id: vec2,
            constituent_ids: vec![one, two],
        };
        assert!(t.is_applicable(&module, &facts));
        t.apply(&mut module, &mut facts).unwrap();
        assert!(facts.is_synonymous(
            &DataDescriptor::new(t.fresh_id, vec![1]),
            &DataDescriptor::of(two)
        ));
        StructuralValidator.validate(&module).unwrap();
    }
}
