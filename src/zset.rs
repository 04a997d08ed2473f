//! `ZSet`: a set of field elements keyed by decimal string
//!
//! Membership is decided by `val.to_str_radix(10)` as spec'd, so two `Zp`
//! values compare equal as set members iff their decimal residues match —
//! which coincides with `Zp`'s own `PartialEq` as long as every member
//! shares one `P` (an invariant `ZSet` enforces at insertion).
//!
//! We back the set with a `BTreeMap` rather than a `HashMap` so iteration
//! order is deterministic; the protocol layer depends on that for
//! reproducible message construction in tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use num_bigint::BigUint;

use crate::zp::Zp;

/// A set of `Zp` values sharing one modulus `P`.
#[derive(Clone, Debug, Default)]
pub struct ZSet {
    members: BTreeMap<String, Zp>,
}

impl ZSet {
    /// An empty set. The modulus is fixed by the first inserted element;
    /// an empty `ZSet` has no modulus opinion yet.
    pub fn new() -> Self {
        Self { members: BTreeMap::new() }
    }

    /// Build a set from an iterator of elements (all must share one `P`).
    pub fn from_iter(elems: impl IntoIterator<Item = Zp>) -> Self {
        let mut s = Self::new();
        for e in elems {
            s.add(e);
        }
        s
    }

    /// Number of distinct members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Is the set empty?
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Insert `z`; returns `true` if it was newly inserted.
    pub fn add(&mut self, z: Zp) -> bool {
        if let Some((_, existing)) = self.members.iter().next() {
            assert!(
                existing.modulus() == z.modulus(),
                "ZSet: inserted element's P does not match the set's P"
            );
        }
        self.members.insert(z.to_decimal_string(), z).is_none()
    }

    /// Remove `z` if present; returns `true` if it was present.
    pub fn remove(&mut self, z: &Zp) -> bool {
        self.members.remove(&z.to_decimal_string()).is_some()
    }

    /// Membership test.
    pub fn contains(&self, z: &Zp) -> bool {
        self.members.contains_key(&z.to_decimal_string())
    }

    /// Deterministic (decimal-string-sorted) iteration over members.
    pub fn iter(&self) -> impl Iterator<Item = &Zp> {
        self.members.values()
    }

    /// The set's shared modulus, if non-empty.
    pub fn modulus(&self) -> Option<Arc<BigUint>> {
        self.members.values().next().map(|z| Arc::clone(z.modulus()))
    }

    /// `self ∪ other`, consuming neither.
    pub fn union(&self, other: &ZSet) -> ZSet {
        let mut out = self.clone();
        for z in other.iter() {
            out.add(z.clone());
        }
        out
    }

    /// `self ∖ other` (elements in `self` but not in `other`).
    pub fn difference(&self, other: &ZSet) -> ZSet {
        let mut out = ZSet::new();
        for z in self.iter() {
            if !other.contains(z) {
                out.add(z.clone());
            }
        }
        out
    }
}

impl PartialEq for ZSet {
    fn eq(&self, other: &Self) -> bool {
        self.members.keys().eq(other.members.keys())
    }
}
impl Eq for ZSet {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zp::p_sks;

    #[test]
    fn add_remove_contains() {
        let p = p_sks();
        let mut s = ZSet::new();
        let a = Zp::from_u64(&p, 65537);
        let b = Zp::from_u64(&p, 65539);
        assert!(s.add(a.clone()));
        assert!(!s.add(a.clone())); // already present
        assert!(s.contains(&a));
        assert!(!s.contains(&b));
        assert_eq!(s.len(), 1);
        assert!(!s.remove(&b));
        assert!(s.remove(&a));
        assert!(s.is_empty());
    }

    #[test]
    fn union_and_difference() {
        let p = p_sks();
        let a = ZSet::from_iter([Zp::from_u64(&p, 1), Zp::from_u64(&p, 2)]);
        let b = ZSet::from_iter([Zp::from_u64(&p, 2), Zp::from_u64(&p, 3)]);
        let u = a.union(&b);
        assert_eq!(u.len(), 3);
        let d = a.difference(&b);
        assert_eq!(d.len(), 1);
        assert!(d.contains(&Zp::from_u64(&p, 1)));
    }
}
