//! Per-run random state: the seeded generator, the fresh id counter and
//! the chances sampled at the start of the run.

use morph_core::{Chance, FuzzerConfig};
use morph_ir::Id;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;

pub struct FuzzerContext {
    rng: ChaCha8Rng,
    next_fresh_id: Id,
    chances: BTreeMap<Chance, u32>,
    max_struct_members: usize,
    max_equivalence_class_size: usize,
}

impl FuzzerContext {
    /// Fresh ids start `id_bound_gap` above `id_bound`, leaving room for
    /// ids added by other tools.
    pub fn new(config: &FuzzerConfig, id_bound: Id) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let chances = Chance::ALL
            .iter()
            .map(|chance| {
                let range = config.chances.range(*chance);
                let (min, max) = (range.min.min(100), range.max.min(100));
                let value = if min >= max { min } else { rng.gen_range(min..=max) };
                (*chance, value)
            })
            .collect();
        Self {
            rng,
            next_fresh_id: id_bound.saturating_add(config.id_bound_gap),
            chances,
            max_struct_members: config.max_struct_members,
            max_equivalence_class_size: config.max_equivalence_class_size,
        }
    }

    pub fn fresh_id(&mut self) -> Id {
        let id = self.next_fresh_id;
        self.next_fresh_id += 1;
        id
    }

    pub fn fresh_ids(&mut self, count: usize) -> Vec<Id> {
        (0..count).map(|_| self.fresh_id()).collect()
    }

    /// Makes sure fresh ids never collide with ids below `id_bound`.
    pub fn reserve_ids_below(&mut self, id_bound: Id) {
        self.next_fresh_id = self.next_fresh_id.max(id_bound);
    }

    pub fn chance(&self, chance: Chance) -> u32 {
        self.chances.get(&chance).copied().unwrap_or(0)
    }

    /// True with probability `percentage` / 100.
    pub fn choose_percentage(&mut self, percentage: u32) -> bool {
        self.rng.gen_range(1..=100) <= percentage
    }

    /// Draws against the sampled chance for `chance`.
    pub fn roll(&mut self, chance: Chance) -> bool {
        let percentage = self.chance(chance);
        self.choose_percentage(percentage)
    }

    pub fn choose_even(&mut self) -> bool {
        self.rng.gen_bool(0.5)
    }

    /// Uniform index in `0..len`. `len` must be non-zero.
    pub fn random_index(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }

    pub fn random_u32(&mut self, bound: u32) -> u32 {
        self.rng.gen_range(0..bound.max(1))
    }

    pub fn random_between(&mut self, min: u32, max: u32) -> u32 {
        if min >= max {
            min
        } else {
            self.rng.gen_range(min..=max)
        }
    }

    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            None
        } else {
            let index = self.random_index(items.len());
            items.get(index)
        }
    }

    /// A random permutation of `0..len`.
    pub fn random_permutation(&mut self, len: usize) -> Vec<u32> {
        let mut permutation: Vec<u32> = (0..len as u32).collect();
        for i in (1..len).rev() {
            let j = self.rng.gen_range(0..=i);
            permutation.swap(i, j);
        }
        permutation
    }

    pub fn max_struct_members(&self) -> usize {
        self.max_struct_members
    }

    pub fn max_equivalence_class_size(&self) -> usize {
        self.max_equivalence_class_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use morph_core::{ChanceRange, ChanceTable};

    #[test]
    fn test_same_seed_same_choices() {
        let config = FuzzerConfig {
            seed: 42,
            ..Default::default()
        };
        let mut a = FuzzerContext::new(&config, 10);
        let mut b = FuzzerContext::new(&config, 10);
        for chance in Chance::ALL {
            assert_eq!(a.chance(chance), b.chance(chance));
        }
        let xs: Vec<usize> = (0..20).map(|_| a.random_index(7)).collect();
        let ys: Vec<usize> = (0..20).map(|_| b.random_index(7)).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn test_fresh_ids_start_above_gap() {
        let config = FuzzerConfig::default();
        let mut context = FuzzerContext::new(&config, 10);
        assert_eq!(context.fresh_id(), 110);
        assert_eq!(context.fresh_ids(2), vec![111, 112]);
        context.reserve_ids_below(500);
        assert_eq!(context.fresh_id(), 500);
    }

    #[test]
    fn test_chances_respect_ranges() {
        let mut chances = ChanceTable::uniform(0);
        chances.set(Chance::AddingLoad, ChanceRange::fixed(100));
        let config = FuzzerConfig {
            chances,
            ..Default::default()
        };
        let mut context = FuzzerContext::new(&config, 1);
        assert_eq!(context.chance(Chance::AddingLoad), 100);
        assert!(context.roll(Chance::AddingLoad));
        assert!(!context.roll(Chance::AddingStore));
    }

    #[test]
    fn test_random_permutation() {
        let mut context = FuzzerContext::new(&FuzzerConfig::default(), 1);
        let mut permutation = context.random_permutation(6);
        permutation.sort_unstable();
        assert_eq!(permutation, vec![0, 1, 2, 3, 4, 5]);
    }
}
