//! Synonym classes of data descriptors and the id equations that derive
//! new synonyms.

use super::equivalence::EquivalenceRelation;
use crate::descriptor::DataDescriptor;
use morph_ir::{ConstantValue, Id, Module, Opcode};
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

/// Composites with more members than this are not split into per-member
/// synonyms.
const MAX_MEMBERS_TO_SPLIT: u32 = 64;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Operation {
    opcode: Opcode,
    operands: Vec<DataDescriptor>,
}

#[derive(Debug, Clone, Default)]
pub struct DataSynonymAndIdEquationFacts {
    synonymous: EquivalenceRelation<DataDescriptor>,
    /// `lhs = operation` for every recorded equation.
    equations: Vec<(DataDescriptor, Operation)>,
}

/// Opcodes an id equation may use, with their arity.
pub fn equation_arity(opcode: Opcode) -> Option<usize> {
    match opcode {
        Opcode::IAdd | Opcode::ISub => Some(2),
        Opcode::SNegate | Opcode::LogicalNot => Some(1),
        _ => None,
    }
}

impl DataSynonymAndIdEquationFacts {
    /// Records `dd1 ~ dd2`. Rejects descriptors that do not resolve, have
    /// different types, or would equate two distinct constants.
    pub fn add_data_synonym(&mut self, dd1: &DataDescriptor, dd2: &DataDescriptor, module: &Module) -> bool {
        let (Some(t1), Some(t2)) = (dd1.type_in(module), dd2.type_in(module)) else {
            return false;
        };
        if t1 != t2 || self.would_merge_distinct_constants(dd1, dd2, module) {
            return false;
        }
        self.synonymous.register(dd1);
        self.synonymous.register(dd2);
        self.merge(dd1, dd2, module);
        true
    }

    /// Records `lhs = opcode(rhs...)` and the synonyms it implies.
    pub fn add_id_equation(&mut self, lhs: Id, opcode: Opcode, rhs: &[Id], module: &Module) -> bool {
        if equation_arity(opcode) != Some(rhs.len()) {
            return false;
        }
        let Some(lhs_type) = module.type_of(lhs) else {
            return false;
        };
        let well_typed = match opcode {
            Opcode::IAdd | Opcode::ISub | Opcode::SNegate => module.is_integer_type(lhs_type),
            _ => module.is_boolean_type(lhs_type),
        } && rhs.iter().all(|id| module.type_of(*id) == Some(lhs_type));
        if !well_typed {
            return false;
        }

        let lhs = DataDescriptor::of(lhs);
        let operation = Operation {
            opcode,
            operands: rhs.iter().copied().map(DataDescriptor::of).collect(),
        };
        self.synonymous.register(&lhs);
        for operand in &operation.operands {
            self.synonymous.register(operand);
        }
        self.equations.push((lhs.clone(), operation.clone()));
        self.derive_from_equation(&lhs, &operation, module);
        true
    }

    pub fn is_synonymous(&self, dd1: &DataDescriptor, dd2: &DataDescriptor) -> bool {
        self.synonymous.is_equivalent(dd1, dd2)
    }

    /// The class of `dd`, including `dd` itself if it is known.
    pub fn synonyms_for(&self, dd: &DataDescriptor) -> Vec<DataDescriptor> {
        self.synonymous.class_of(dd)
    }

    /// Ids that have at least one synonym other than themselves.
    pub fn ids_for_which_synonyms_are_known(&self) -> Vec<Id> {
        self.synonymous
            .values()
            .filter(|dd| dd.index.is_empty() && self.synonymous.class_size(dd) > 1)
            .map(|dd| dd.object)
            .collect()
    }

    pub fn mentions_id(&self, id: Id) -> bool {
        self.synonymous.values().any(|dd| dd.object == id)
    }

    /// Derives synonyms until nothing changes: equation rules are re-run,
    /// and two composites of the same type whose members are pairwise
    /// synonymous become synonymous, as long as neither class has grown
    /// beyond `max_class_size`. Candidates are visited in ascending
    /// (type, descriptor) order.
    pub fn compute_closure(&mut self, module: &Module, max_class_size: usize) {
        loop {
            let mut changed = false;

            for (lhs, operation) in self.equations.clone() {
                changed |= self.derive_from_equation(&lhs, &operation, module);
            }

            // A composite is a candidate once it, or one of its members,
            // is known.
            let mut candidates: BTreeSet<DataDescriptor> = BTreeSet::new();
            for dd in self.synonymous.values() {
                if let Some((_, parent)) = dd.index.split_last() {
                    candidates.insert(DataDescriptor::new(dd.object, parent.to_vec()));
                }
                candidates.insert(dd.clone());
            }
            let mut by_type: BTreeMap<Id, Vec<DataDescriptor>> = BTreeMap::new();
            for candidate in candidates {
                if let Some(ty) = candidate.type_in(module) {
                    if module.is_composite_type(ty) {
                        by_type.entry(ty).or_default().push(candidate);
                    }
                }
            }

            for (ty, candidates) in by_type {
                let Some(member_count) = module.composite_member_count(ty) else {
                    continue;
                };
                for (i, a) in candidates.iter().enumerate() {
                    for b in &candidates[i + 1..] {
                        let class_size = |dd| self.synonymous.class_size(dd).max(1);
                        if self.synonymous.is_equivalent(a, b)
                            || class_size(a) > max_class_size
                            || class_size(b) > max_class_size
                        {
                            continue;
                        }
                        let members_match =
                            (0..member_count).all(|k| self.synonymous.is_equivalent(&a.member(k), &b.member(k)));
                        if members_match && !self.would_merge_distinct_constants(a, b, module) {
                            trace!(?a, ?b, "closure merged composites");
                            changed |= self.merge(a, b, module);
                        }
                    }
                }
            }

            if !changed {
                break;
            }
        }
    }

    /// Merges two classes, then splits composites into per-member synonyms.
    fn merge(&mut self, dd1: &DataDescriptor, dd2: &DataDescriptor, module: &Module) -> bool {
        if self.synonymous.is_equivalent(dd1, dd2) {
            return false;
        }
        if dd1.type_in(module) != dd2.type_in(module) || self.would_merge_distinct_constants(dd1, dd2, module) {
            return false;
        }
        self.synonymous.make_equivalent(dd1, dd2);

        if let Some(ty) = dd1.type_in(module) {
            if let Some(count) = module.composite_member_count(ty) {
                if count <= MAX_MEMBERS_TO_SPLIT {
                    for k in 0..count {
                        self.merge(&dd1.member(k), &dd2.member(k), module);
                    }
                }
            }
        }
        true
    }

    fn constant_in_class(&self, dd: &DataDescriptor, module: &Module) -> Option<ConstantValue> {
        let class = self.synonymous.class_of(dd);
        let members = if class.is_empty() { vec![dd.clone()] } else { class };
        members
            .iter()
            .filter(|member| member.index.is_empty())
            .find_map(|member| module.constant_value(member.object))
    }

    fn would_merge_distinct_constants(&self, dd1: &DataDescriptor, dd2: &DataDescriptor, module: &Module) -> bool {
        match (self.constant_in_class(dd1, module), self.constant_in_class(dd2, module)) {
            (Some(a), Some(b)) => a != b,
            _ => false,
        }
    }

    /// Equations whose left-hand side is synonymous with `dd`.
    fn equations_for(&self, dd: &DataDescriptor) -> Vec<Operation> {
        self.equations
            .iter()
            .filter(|(lhs, _)| self.synonymous.is_equivalent(lhs, dd))
            .map(|(_, operation)| operation.clone())
            .collect()
    }

    fn operations_equivalent(&self, a: &Operation, b: &Operation) -> bool {
        a.opcode == b.opcode
            && a.operands.len() == b.operands.len()
            && a
                .operands
                .iter()
                .zip(&b.operands)
                .all(|(x, y)| self.synonymous.is_equivalent(x, y))
    }

    /// Applies the derivation rules to one equation. Returns true if any
    /// new synonym was recorded.
    fn derive_from_equation(&mut self, lhs: &DataDescriptor, operation: &Operation, module: &Module) -> bool {
        let mut derived: Vec<DataDescriptor> = Vec::new();

        // Congruence: equal operations on equal operands give equal results.
        for (other_lhs, other) in &self.equations {
            if other_lhs != lhs && self.operations_equivalent(operation, other) {
                derived.push(other_lhs.clone());
            }
        }

        match operation.opcode {
            Opcode::LogicalNot | Opcode::SNegate => {
                // lhs = op(op(x))  =>  lhs ~ x
                for inner in self.equations_for(&operation.operands[0]) {
                    if inner.opcode == operation.opcode {
                        derived.push(inner.operands[0].clone());
                    }
                }
            }
            Opcode::IAdd => {
                // lhs = (p - q) + y with q ~ y  =>  lhs ~ p, either way round
                for (first, second) in [(0, 1), (1, 0)] {
                    for inner in self.equations_for(&operation.operands[first]) {
                        if inner.opcode == Opcode::ISub
                            && self.synonymous.is_equivalent(&inner.operands[1], &operation.operands[second])
                        {
                            derived.push(inner.operands[0].clone());
                        }
                    }
                }
            }
            Opcode::ISub => {
                let (x, y) = (&operation.operands[0], &operation.operands[1]);
                for inner in self.equations_for(x) {
                    // lhs = (p + q) - y with q ~ y => lhs ~ p, with p ~ y => lhs ~ q
                    if inner.opcode == Opcode::IAdd {
                        if self.synonymous.is_equivalent(&inner.operands[1], y) {
                            derived.push(inner.operands[0].clone());
                        }
                        if self.synonymous.is_equivalent(&inner.operands[0], y) {
                            derived.push(inner.operands[1].clone());
                        }
                    }
                }
                // lhs = x - (x - q)  =>  lhs ~ q
                for inner in self.equations_for(y) {
                    if inner.opcode == Opcode::ISub && self.synonymous.is_equivalent(&inner.operands[0], x) {
                        derived.push(inner.operands[1].clone());
                    }
                }
            }
            _ => {}
        }

        // Equations that use `lhs` as their operand may now simplify.
        let mut outer_lhs: Vec<DataDescriptor> = Vec::new();
        if matches!(operation.opcode, Opcode::LogicalNot | Opcode::SNegate) {
            for (other_lhs, other) in &self.equations {
                if other.opcode == operation.opcode && self.synonymous.is_equivalent(&other.operands[0], lhs) {
                    outer_lhs.push(other_lhs.clone());
                }
            }
        }

        let mut changed = false;
        for synonym in derived {
            changed |= self.merge(lhs, &synonym, module);
        }
        for other_lhs in outer_lhs {
            changed |= self.merge(&other_lhs, &operation.operands[0], module);
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use morph_ir::{Instruction, ModuleBuilder};

    /// Module with ints a, b, c, plus two copies of an int vector.
    fn module_with_values() -> (Module, Vec<Id>) {
        let mut builder = ModuleBuilder::new();
        let void = builder.type_void();
        let int = builder.type_int(32, true);
        let bool_ty = builder.type_bool();
        let vec2 = builder.type_vector(int, 2);
        let one = builder.constant(int, &[1]);
        let two = builder.constant(int, &[2]);
        let yes = builder.constant_bool(bool_ty, true);
        let fn_ty = builder.type_function(void, &[]);
        builder.begin_function(void, fn_ty);
        builder.block();
        let a = builder.value(Opcode::IAdd, int, &[one, two]);
        let b = builder.value(Opcode::ISub, int, &[a, two]);
        let c = builder.value(Opcode::CopyObject, int, &[a]);
        let v1 = builder.value(Opcode::CompositeConstruct, vec2, &[a, b]);
        let v2 = builder.value(Opcode::CompositeConstruct, vec2, &[c, b]);
        let not_yes = builder.value(Opcode::LogicalNot, bool_ty, &[yes]);
        let not_not_yes = builder.value(Opcode::LogicalNot, bool_ty, &[not_yes]);
        builder.emit(Instruction::return_void());
        let module = builder.build();
        (module, vec![one, two, a, b, c, v1, v2, yes, not_yes, not_not_yes])
    }

    #[test]
    fn test_synonyms_are_transitive() {
        let (module, ids) = module_with_values();
        let (a, b, c) = (ids[2], ids[3], ids[4]);
        let mut facts = DataSynonymAndIdEquationFacts::default();
        assert!(facts.add_data_synonym(&DataDescriptor::of(a), &DataDescriptor::of(c), &module));
        assert!(facts.add_data_synonym(&DataDescriptor::of(c), &DataDescriptor::of(b), &module));
        assert!(facts.is_synonymous(&DataDescriptor::of(a), &DataDescriptor::of(b)));
        let mut known = facts.ids_for_which_synonyms_are_known();
        known.sort_unstable();
        assert_eq!(known, vec![a, b, c]);
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let (module, ids) = module_with_values();
        let mut facts = DataSynonymAndIdEquationFacts::default();
        assert!(!facts.add_data_synonym(&DataDescriptor::of(ids[2]), &DataDescriptor::of(ids[5]), &module));
        assert!(facts.add_data_synonym(&DataDescriptor::new(ids[5], vec![1]), &DataDescriptor::of(ids[3]), &module));
    }

    #[test]
    fn test_distinct_constants_never_merge() {
        let (module, ids) = module_with_values();
        let (one, two, a) = (ids[0], ids[1], ids[2]);
        let mut facts = DataSynonymAndIdEquationFacts::default();
        assert!(facts.add_data_synonym(&DataDescriptor::of(a), &DataDescriptor::of(one), &module));
        assert!(!facts.add_data_synonym(&DataDescriptor::of(a), &DataDescriptor::of(two), &module));
        assert!(!facts.is_synonymous(&DataDescriptor::of(one), &DataDescriptor::of(two)));
    }

    #[test]
    fn test_composite_synonyms_split_into_members() {
        let (module, ids) = module_with_values();
        let (v1, v2) = (ids[5], ids[6]);
        let mut facts = DataSynonymAndIdEquationFacts::default();
        assert!(facts.add_data_synonym(&DataDescriptor::of(v1), &DataDescriptor::of(v2), &module));
        assert!(facts.is_synonymous(&DataDescriptor::new(v1, vec![0]), &DataDescriptor::new(v2, vec![0])));
    }

    #[test]
    fn test_closure_merges_composites_with_synonymous_members() {
        let (module, ids) = module_with_values();
        let (a, b, c, v1, v2) = (ids[2], ids[3], ids[4], ids[5], ids[6]);
        let mut facts = DataSynonymAndIdEquationFacts::default();
        let dd = DataDescriptor::of;
        facts.add_data_synonym(&DataDescriptor::new(v1, vec![0]), &dd(a), &module);
        facts.add_data_synonym(&DataDescriptor::new(v1, vec![1]), &dd(b), &module);
        facts.add_data_synonym(&DataDescriptor::new(v2, vec![0]), &dd(c), &module);
        facts.add_data_synonym(&DataDescriptor::new(v2, vec![1]), &dd(b), &module);
        facts.add_data_synonym(&dd(a), &dd(c), &module);
        // Register the composites themselves.
        facts.add_data_synonym(&dd(v1), &dd(v1), &module);
        facts.add_data_synonym(&dd(v2), &dd(v2), &module);
        assert!(!facts.is_synonymous(&dd(v1), &dd(v2)));

        facts.compute_closure(&module, 1000);
        assert!(facts.is_synonymous(&dd(v1), &dd(v2)));
    }

    #[test]
    fn test_closure_respects_class_bound() {
        let (module, ids) = module_with_values();
        let (a, b, c, v1, v2) = (ids[2], ids[3], ids[4], ids[5], ids[6]);
        let mut facts = DataSynonymAndIdEquationFacts::default();
        let dd = DataDescriptor::of;
        facts.add_data_synonym(&DataDescriptor::new(v1, vec![0]), &dd(a), &module);
        facts.add_data_synonym(&DataDescriptor::new(v1, vec![1]), &dd(b), &module);
        facts.add_data_synonym(&DataDescriptor::new(v2, vec![0]), &dd(c), &module);
        facts.add_data_synonym(&DataDescriptor::new(v2, vec![1]), &dd(b), &module);
        facts.add_data_synonym(&dd(a), &dd(c), &module);
        facts.add_data_synonym(&dd(v1), &dd(v1), &module);
        facts.add_data_synonym(&dd(v2), &dd(v2), &module);

        facts.compute_closure(&module, 0);
        assert!(!facts.is_synonymous(&dd(v1), &dd(v2)));
    }

    #[test]
    fn test_closure_finds_composites_known_only_by_members() {
        let (module, ids) = module_with_values();
        let (a, b, c, v1, v2) = (ids[2], ids[3], ids[4], ids[5], ids[6]);
        let mut facts = DataSynonymAndIdEquationFacts::default();
        let dd = DataDescriptor::of;
        facts.add_data_synonym(&DataDescriptor::new(v1, vec![0]), &dd(a), &module);
        facts.add_data_synonym(&DataDescriptor::new(v1, vec![1]), &dd(b), &module);
        facts.add_data_synonym(&DataDescriptor::new(v2, vec![0]), &dd(c), &module);
        facts.add_data_synonym(&DataDescriptor::new(v2, vec![1]), &dd(b), &module);
        facts.add_data_synonym(&dd(a), &dd(c), &module);

        facts.compute_closure(&module, 1000);
        assert!(facts.is_synonymous(&dd(v1), &dd(v2)));
    }

    #[test]
    fn test_equation_add_then_sub() {
        let (module, ids) = module_with_values();
        let (one, two, a, b) = (ids[0], ids[1], ids[2], ids[3]);
        let mut facts = DataSynonymAndIdEquationFacts::default();
        // a = one + two; b = a - two  =>  b ~ one
        assert!(facts.add_id_equation(a, Opcode::IAdd, &[one, two], &module));
        assert!(facts.add_id_equation(b, Opcode::ISub, &[a, two], &module));
        assert!(facts.is_synonymous(&DataDescriptor::of(b), &DataDescriptor::of(one)));
    }

    #[test]
    fn test_double_negation() {
        let (module, ids) = module_with_values();
        let (yes, not_yes, not_not_yes) = (ids[7], ids[8], ids[9]);
        let mut facts = DataSynonymAndIdEquationFacts::default();
        // Added outermost first; the rule must still fire.
        assert!(facts.add_id_equation(not_not_yes, Opcode::LogicalNot, &[not_yes], &module));
        assert!(facts.add_id_equation(not_yes, Opcode::LogicalNot, &[yes], &module));
        assert!(facts.is_synonymous(&DataDescriptor::of(not_not_yes), &DataDescriptor::of(yes)));
    }

    #[test]
    fn test_ill_typed_equation_rejected() {
        let (module, ids) = module_with_values();
        let mut facts = DataSynonymAndIdEquationFacts::default();
        assert!(!facts.add_id_equation(ids[2], Opcode::LogicalNot, &[ids[0]], &module));
        assert!(!facts.add_id_equation(ids[2], Opcode::IMul, &[ids[0], ids[1]], &module));
        assert!(!facts.add_id_equation(ids[2], Opcode::IAdd, &[ids[0]], &module));
    }
}
