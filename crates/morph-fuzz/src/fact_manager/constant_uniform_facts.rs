//! Facts stating that a uniform buffer element holds a known constant.

use crate::descriptor::UniformBufferElementDescriptor;
use morph_ir::{words_for_width, Id, Module, TypeKey};

#[derive(Debug, Clone, Default)]
pub struct ConstantUniformFacts {
    facts: Vec<(UniformBufferElementDescriptor, Vec<u32>)>,
}

impl ConstantUniformFacts {
    /// Records that `descriptor` holds the scalar with `words`. The
    /// descriptor must name exactly one uniform variable, lead to an int or
    /// float element, and the word count must fit the element's width.
    pub fn add_fact(&mut self, descriptor: &UniformBufferElementDescriptor, words: &[u32], module: &Module) -> bool {
        let Some((_, element_type)) = descriptor.resolve(module) else {
            return false;
        };
        let width = match module.type_key(element_type) {
            Some(TypeKey::Int { width, .. }) => width,
            Some(TypeKey::Float { width }) => {
                if !float_words_are_finite(width, words) {
                    return false;
                }
                width
            }
            _ => return false,
        };
        if words.len() != words_for_width(width) {
            return false;
        }
        self.facts.push((descriptor.clone(), words.to_vec()));
        true
    }

    /// Scalar types for which some uniform element holds a known value.
    pub fn types_for_which_uniform_values_are_known(&self, module: &Module) -> Vec<Id> {
        let mut types: Vec<Id> = self
            .facts
            .iter()
            .filter_map(|(descriptor, _)| descriptor.resolve(module).map(|(_, ty)| ty))
            .collect();
        types.sort_unstable();
        types.dedup();
        types
    }

    /// Declared constants of `type_id` whose values are available from
    /// uniforms.
    pub fn constants_available_from_uniforms_for_type(&self, module: &Module, type_id: Id) -> Vec<Id> {
        let mut constants: Vec<Id> = self
            .facts
            .iter()
            .filter(|(descriptor, _)| descriptor.resolve(module).is_some_and(|(_, ty)| ty == type_id))
            .filter_map(|(_, words)| module.find_scalar_constant(type_id, words))
            .collect();
        constants.sort_unstable();
        constants.dedup();
        constants
    }

    /// Uniform elements known to hold the value of `constant_id`.
    pub fn uniform_descriptors_for_constant(&self, module: &Module, constant_id: Id) -> Vec<UniformBufferElementDescriptor> {
        let (Some(ty), Some(words)) = (module.type_of(constant_id), module.constant_words(constant_id)) else {
            return Vec::new();
        };
        self.facts
            .iter()
            .filter(|(descriptor, fact_words)| {
                *fact_words == words && descriptor.resolve(module).is_some_and(|(_, t)| t == ty)
            })
            .map(|(descriptor, _)| descriptor.clone())
            .collect()
    }

    /// The declared constant holding the value stored at `descriptor`.
    pub fn constant_from_uniform_descriptor(&self, module: &Module, descriptor: &UniformBufferElementDescriptor) -> Option<Id> {
        let (_, ty) = descriptor.resolve(module)?;
        self.facts
            .iter()
            .find(|(d, _)| d == descriptor)
            .and_then(|(_, words)| module.find_scalar_constant(ty, words))
    }
}

fn float_words_are_finite(width: u32, words: &[u32]) -> bool {
    match (width, words) {
        (32, [bits]) => f32::from_bits(*bits).is_finite(),
        (64, [low, high]) => f64::from_bits(((*high as u64) << 32) | *low as u64).is_finite(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use morph_ir::samples;

    #[test]
    fn test_add_and_query() {
        let module = samples::uniform_module();
        let int = module.find_type(&TypeKey::Int { width: 32, signed: true }).unwrap();
        let seven = module.find_scalar_constant(int, &[7]).unwrap();
        let mut facts = ConstantUniformFacts::default();
        let descriptor = UniformBufferElementDescriptor::new(0, 0, vec![0]);
        assert!(facts.add_fact(&descriptor, &[7], &module));

        assert_eq!(facts.types_for_which_uniform_values_are_known(&module), vec![int]);
        assert_eq!(facts.constants_available_from_uniforms_for_type(&module, int), vec![seven]);
        assert_eq!(facts.uniform_descriptors_for_constant(&module, seven), vec![descriptor.clone()]);
        assert_eq!(facts.constant_from_uniform_descriptor(&module, &descriptor), Some(seven));
    }

    #[test]
    fn test_invalid_facts_rejected() {
        let module = samples::uniform_module();
        let mut facts = ConstantUniformFacts::default();
        // No such binding.
        assert!(!facts.add_fact(&UniformBufferElementDescriptor::new(0, 3, vec![0]), &[7], &module));
        // Wrong number of words.
        assert!(!facts.add_fact(&UniformBufferElementDescriptor::new(0, 0, vec![0]), &[7, 0], &module));
        // Not a scalar element.
        assert!(!facts.add_fact(&UniformBufferElementDescriptor::new(0, 0, vec![]), &[7], &module));
        // Infinite float.
        assert!(!facts.add_fact(&UniformBufferElementDescriptor::new(0, 0, vec![1]), &[0x7f80_0000], &module));
        assert!(facts.add_fact(&UniformBufferElementDescriptor::new(0, 0, vec![1]), &[0x4020_0000], &module));
    }
}
