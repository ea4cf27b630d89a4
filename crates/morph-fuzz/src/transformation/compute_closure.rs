use super::Transform;
use crate::fact_manager::FactManager;
use morph_core::Result;
use morph_ir::Module;
use serde::{Deserialize, Serialize};

/// Derives the synonyms implied by the composite structure of those
/// already known. Equivalence classes larger than the bound are skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeDataSynonymFactClosure {
    pub maximum_equivalence_class_size: u32,
}

impl Transform for ComputeDataSynonymFactClosure {
    fn is_applicable(&self, _module: &Module, _facts: &FactManager) -> bool {
        true
    }

    fn apply(&self, module: &mut Module, facts: &mut FactManager) -> Result<()> {
        facts.compute_closure_of_facts(module, self.maximum_equivalence_class_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{make_instruction_descriptor, DataDescriptor};
    use crate::transformation::{AddTypeVector, CompositeConstruct};
    use morph_ir::samples;

    #[test]
    fn test_closure_finds_whole_vector_synonym() {
        let mut module = samples::arithmetic_module();
        let mut facts = FactManager::new();
        let int = module.functions[0].return_type();
        let vec2 = module.id_bound;
        AddTypeVector {
            fresh_id: vec2,
            component_type_id: int,
            component_count: 2,
        }
        .apply(&mut module, &mut facts)
        .unwrap();
        let block = &module.functions[1].blocks[0];
        let x = block.instructions[1].result_id.unwrap();
        let y = block.instructions[2].result_id.unwrap();
        let before_call = make_instruction_descriptor(block, 3).unwrap();
        let first = module.id_bound;
        let second = first + 1;
        for fresh_id in [first, second] {
            CompositeConstruct {
                fresh_id,
                composite_type_id: vec2,
                component_ids: vec![x, y],
                instruction_to_insert_before: before_call.clone(),
            }
            .apply(&mut module, &mut facts)
            .unwrap();
        }
        assert!(!facts.is_synonymous(&DataDescriptor::new(first, vec![]), &DataDescriptor::new(second, vec![])));
        ComputeDataSynonymFactClosure {
            maximum_equivalence_class_size: 1000,
        }
        .apply(&mut module, &mut facts)
        .unwrap();
        assert!(facts.is_synonymous(&DataDescriptor::new(first, vec![]), &DataDescriptor::new(second, vec![])));
    }
}
