//! Deterministic union-find.

use std::collections::{BTreeMap, BTreeSet};

/// Equivalence classes over ordered values. Every class is represented by
/// its smallest member, so the result of a sequence of merges does not
/// depend on the order they were made in.
#[derive(Debug, Clone)]
pub struct EquivalenceRelation<T: Ord + Clone> {
    representative: BTreeMap<T, T>,
    classes: BTreeMap<T, BTreeSet<T>>,
}

impl<T: Ord + Clone> EquivalenceRelation<T> {
    pub fn new() -> Self {
        Self {
            representative: BTreeMap::new(),
            classes: BTreeMap::new(),
        }
    }

    /// Adds `value` as a singleton class if it is not yet known.
    pub fn register(&mut self, value: &T) {
        if !self.representative.contains_key(value) {
            self.representative.insert(value.clone(), value.clone());
            self.classes.insert(value.clone(), BTreeSet::from([value.clone()]));
        }
    }

    pub fn find(&self, value: &T) -> Option<&T> {
        self.representative.get(value)
    }

    pub fn is_equivalent(&self, a: &T, b: &T) -> bool {
        a == b
            || match (self.find(a), self.find(b)) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
    }

    /// Merges the classes of `a` and `b`, registering them if needed.
    /// Returns false if they were already equivalent.
    pub fn make_equivalent(&mut self, a: &T, b: &T) -> bool {
        self.register(a);
        self.register(b);
        let (ra, rb) = match (self.find(a), self.find(b)) {
            (Some(ra), Some(rb)) => (ra.clone(), rb.clone()),
            _ => return false,
        };
        if ra == rb {
            return false;
        }
        let (keep, absorb) = if ra < rb { (ra, rb) } else { (rb, ra) };
        let absorbed = self.classes.remove(&absorb).unwrap_or_default();
        for member in &absorbed {
            self.representative.insert(member.clone(), keep.clone());
        }
        self.classes.entry(keep).or_default().extend(absorbed);
        true
    }

    /// Members of the class of `value`, in ascending order. Unknown values
    /// have an empty class.
    pub fn class_of(&self, value: &T) -> Vec<T> {
        self.find(value)
            .and_then(|rep| self.classes.get(rep))
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn class_size(&self, value: &T) -> usize {
        self.find(value)
            .and_then(|rep| self.classes.get(rep))
            .map_or(0, BTreeSet::len)
    }

    /// Class representatives in ascending order.
    pub fn representatives(&self) -> impl Iterator<Item = &T> {
        self.classes.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.representative.keys()
    }
}

impl<T: Ord + Clone> Default for EquivalenceRelation<T> {
    fn default() -> Self {
        Self::new()
    }
}
