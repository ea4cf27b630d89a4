//! Store of facts: validated, monotone assertions about the module that
//! later transformations may rely on.

mod constant_uniform_facts;
mod data_synonym_and_id_equation_facts;
mod dead_block_facts;
mod equivalence;
mod irrelevant_value_facts;
mod livesafe_function_facts;

pub use data_synonym_and_id_equation_facts::equation_arity;
pub use equivalence::EquivalenceRelation;

use crate::descriptor::{DataDescriptor, UniformBufferElementDescriptor};
use constant_uniform_facts::ConstantUniformFacts;
use data_synonym_and_id_equation_facts::DataSynonymAndIdEquationFacts;
use dead_block_facts::DeadBlockFacts;
use irrelevant_value_facts::IrrelevantValueFacts;
use livesafe_function_facts::LivesafeFunctionFacts;
use morph_core::Result;
use morph_ir::{Id, Module, Opcode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// A single assertion about a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fact {
    ConstantUniform {
        uniform_buffer_element_descriptor: UniformBufferElementDescriptor,
        constant_words: Vec<u32>,
    },
    DataSynonym {
        data1: DataDescriptor,
        data2: DataDescriptor,
    },
    BlockIsDead {
        block_id: Id,
    },
    FunctionIsLivesafe {
        function_id: Id,
    },
    PointeeValueIsIrrelevant {
        pointer_id: Id,
    },
    IdIsIrrelevant {
        result_id: Id,
    },
    IdEquation {
        lhs_id: Id,
        opcode: Opcode,
        rhs_ids: Vec<Id>,
    },
}

/// Facts supplied alongside an input module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactSequence {
    pub facts: Vec<Fact>,
}

impl FactSequence {
    pub fn new(facts: Vec<Fact>) -> Self {
        Self { facts }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FactManager {
    constant_uniform: ConstantUniformFacts,
    data_synonym_and_id_equation: DataSynonymAndIdEquationFacts,
    dead_block: DeadBlockFacts,
    livesafe_function: LivesafeFunctionFacts,
    irrelevant_value: IrrelevantValueFacts,
}

impl FactManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds seed facts. Facts that do not hold are logged and skipped.
    pub fn add_facts(&mut self, module: &Module, facts: &FactSequence) {
        let mut accepted = 0;
        for fact in &facts.facts {
            if self.add_fact(fact, module) {
                accepted += 1;
            } else {
                warn!(?fact, "Invalid fact encountered; ignoring it");
            }
        }
        debug!(accepted, total = facts.facts.len(), "seed facts added");
    }

    /// Returns false if the fact is ill-formed or contradicts the module;
    /// the fact manager is then unchanged.
    pub fn add_fact(&mut self, fact: &Fact, module: &Module) -> bool {
        match fact {
            Fact::ConstantUniform {
                uniform_buffer_element_descriptor,
                constant_words,
            } => self
                .constant_uniform
                .add_fact(uniform_buffer_element_descriptor, constant_words, module),
            Fact::DataSynonym { data1, data2 } => self.add_fact_data_synonym(data1, data2, module),
            Fact::BlockIsDead { block_id } => self.add_fact_block_is_dead(*block_id, module),
            Fact::FunctionIsLivesafe { function_id } => self.add_fact_function_is_livesafe(*function_id, module),
            Fact::PointeeValueIsIrrelevant { pointer_id } => {
                self.add_fact_value_of_pointee_is_irrelevant(*pointer_id, module)
            }
            Fact::IdIsIrrelevant { result_id } => self.add_fact_id_is_irrelevant(*result_id, module),
            Fact::IdEquation {
                lhs_id,
                opcode,
                rhs_ids,
            } => self.add_fact_id_equation(*lhs_id, *opcode, rhs_ids, module),
        }
    }

    // Constant uniform facts

    pub fn types_for_which_uniform_values_are_known(&self, module: &Module) -> Vec<Id> {
        self.constant_uniform.types_for_which_uniform_values_are_known(module)
    }

    pub fn constants_available_from_uniforms_for_type(&self, module: &Module, type_id: Id) -> Vec<Id> {
        self.constant_uniform
            .constants_available_from_uniforms_for_type(module, type_id)
    }

    pub fn uniform_descriptors_for_constant(&self, module: &Module, constant_id: Id) -> Vec<UniformBufferElementDescriptor> {
        self.constant_uniform
            .uniform_descriptors_for_constant(module, constant_id)
    }

    pub fn constant_from_uniform_descriptor(
        &self,
        module: &Module,
        descriptor: &UniformBufferElementDescriptor,
    ) -> Option<Id> {
        self.constant_uniform
            .constant_from_uniform_descriptor(module, descriptor)
    }

    // Data synonym and id equation facts

    /// Irrelevant ids never take part in synonyms.
    pub fn add_fact_data_synonym(&mut self, data1: &DataDescriptor, data2: &DataDescriptor, module: &Module) -> bool {
        if self.id_is_irrelevant(data1.object) || self.id_is_irrelevant(data2.object) {
            return false;
        }
        self.data_synonym_and_id_equation
            .add_data_synonym(data1, data2, module)
    }

    pub fn add_fact_id_equation(&mut self, lhs_id: Id, opcode: Opcode, rhs_ids: &[Id], module: &Module) -> bool {
        if self.id_is_irrelevant(lhs_id) || rhs_ids.iter().any(|id| self.id_is_irrelevant(*id)) {
            return false;
        }
        self.data_synonym_and_id_equation
            .add_id_equation(lhs_id, opcode, rhs_ids, module)
    }

    pub fn compute_closure_of_facts(&mut self, module: &Module, max_equivalence_class_size: usize) {
        self.data_synonym_and_id_equation
            .compute_closure(module, max_equivalence_class_size);
    }

    pub fn is_synonymous(&self, data1: &DataDescriptor, data2: &DataDescriptor) -> bool {
        self.data_synonym_and_id_equation.is_synonymous(data1, data2)
    }

    pub fn synonyms_for_data_descriptor(&self, data: &DataDescriptor) -> Vec<DataDescriptor> {
        self.data_synonym_and_id_equation.synonyms_for(data)
    }

    /// Synonyms of the whole of `id`, excluding `id` itself.
    pub fn synonyms_for_id(&self, id: Id) -> Vec<DataDescriptor> {
        let own = DataDescriptor::of(id);
        self.data_synonym_and_id_equation
            .synonyms_for(&own)
            .into_iter()
            .filter(|dd| *dd != own)
            .collect()
    }

    pub fn ids_for_which_synonyms_are_known(&self) -> Vec<Id> {
        self.data_synonym_and_id_equation
            .ids_for_which_synonyms_are_known()
    }

    // Dead block facts

    pub fn add_fact_block_is_dead(&mut self, block_id: Id, module: &Module) -> bool {
        self.dead_block.add_fact(block_id, module)
    }

    pub fn block_is_dead(&self, block_id: Id) -> bool {
        self.dead_block.block_is_dead(block_id)
    }

    pub fn dead_blocks(&self) -> Vec<Id> {
        self.dead_block.dead_blocks().collect()
    }

    // Livesafe function facts

    pub fn add_fact_function_is_livesafe(&mut self, function_id: Id, module: &Module) -> bool {
        self.livesafe_function.add_fact(function_id, module)
    }

    pub fn function_is_livesafe(&self, function_id: Id) -> bool {
        self.livesafe_function.function_is_livesafe(function_id)
    }

    // Irrelevant value facts

    /// Ids already involved in synonym facts cannot become irrelevant.
    pub fn add_fact_id_is_irrelevant(&mut self, id: Id, module: &Module) -> bool {
        if self.data_synonym_and_id_equation.mentions_id(id) {
            return false;
        }
        self.irrelevant_value.add_id_is_irrelevant(id, module)
    }

    pub fn add_fact_value_of_pointee_is_irrelevant(&mut self, pointer_id: Id, module: &Module) -> bool {
        self.irrelevant_value
            .add_pointee_value_is_irrelevant(pointer_id, module)
    }

    pub fn id_is_irrelevant(&self, id: Id) -> bool {
        self.irrelevant_value.id_is_irrelevant(id)
    }

    pub fn pointee_value_is_irrelevant(&self, pointer_id: Id) -> bool {
        self.irrelevant_value.pointee_value_is_irrelevant(pointer_id)
    }

    pub fn irrelevant_ids(&self) -> Vec<Id> {
        self.irrelevant_value.irrelevant_ids().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use morph_ir::samples;

    fn main_ids(module: &Module) -> Vec<Id> {
        module.functions[1].blocks[0]
            .instructions
            .iter()
            .filter_map(|inst| inst.result_id)
            .collect()
    }

    #[test]
    fn test_add_facts_skips_invalid() {
        let module = samples::arithmetic_module();
        let ids = main_ids(&module);
        let facts = FactSequence::new(vec![
            Fact::DataSynonym {
                data1: DataDescriptor::of(ids[1]),
                data2: DataDescriptor::of(ids[2]),
            },
            Fact::BlockIsDead { block_id: 9999 },
            Fact::FunctionIsLivesafe {
                function_id: module.functions[0].id(),
            },
        ]);
        let mut manager = FactManager::new();
        manager.add_facts(&module, &facts);
        assert!(manager.is_synonymous(&DataDescriptor::of(ids[1]), &DataDescriptor::of(ids[2])));
        assert!(!manager.block_is_dead(9999));
        assert!(manager.function_is_livesafe(module.functions[0].id()));
    }

    #[test]
    fn test_irrelevant_ids_excluded_from_synonyms() {
        let module = samples::arithmetic_module();
        let ids = main_ids(&module);
        let (x, y, loaded) = (ids[1], ids[2], ids[4]);
        let mut manager = FactManager::new();
        assert!(manager.add_fact_id_is_irrelevant(x, &module));
        assert!(!manager.add_fact_data_synonym(&DataDescriptor::of(x), &DataDescriptor::of(y), &module));

        assert!(manager.add_fact_data_synonym(&DataDescriptor::of(y), &DataDescriptor::of(loaded), &module));
        assert!(!manager.add_fact_id_is_irrelevant(y, &module));
    }

    #[test]
    fn test_pointers_cannot_be_irrelevant_ids() {
        let module = samples::arithmetic_module();
        let local = main_ids(&module)[0];
        let mut manager = FactManager::new();
        assert!(!manager.add_fact_id_is_irrelevant(local, &module));
        assert!(manager.add_fact_value_of_pointee_is_irrelevant(local, &module));
        assert!(manager.pointee_value_is_irrelevant(local));
    }

    #[test]
    fn test_synonyms_for_id_excludes_self() {
        let module = samples::arithmetic_module();
        let ids = main_ids(&module);
        let mut manager = FactManager::new();
        manager.add_fact_data_synonym(&DataDescriptor::of(ids[1]), &DataDescriptor::of(ids[2]), &module);
        assert_eq!(manager.synonyms_for_id(ids[1]), vec![DataDescriptor::of(ids[2])]);
        assert_eq!(manager.ids_for_which_synonyms_are_known().len(), 2);
        assert_eq!(manager.synonyms_for_data_descriptor(&DataDescriptor::of(ids[2])).len(), 2);
    }

    #[test]
    fn test_fact_sequence_json() {
        let facts = FactSequence::new(vec![
            Fact::IdEquation {
                lhs_id: 5,
                opcode: Opcode::IAdd,
                rhs_ids: vec![3, 4],
            },
            Fact::ConstantUniform {
                uniform_buffer_element_descriptor: UniformBufferElementDescriptor::new(0, 0, vec![1]),
                constant_words: vec![7],
            },
        ]);
        let json = facts.to_json().unwrap();
        assert!(json.contains("id_equation"));
        assert_eq!(FactSequence::from_json(&json).unwrap(), facts);
    }
}
