// Copyright (c) 2018-2022 The MobileCoin Foundation

//! Ordered-slice sets used by federated-vote bookkeeping.
//!
//! The engine intersects and unions sets of values, ballots, and node ids on
//! every inbound message. Representing these sets as sorted slices keeps
//! iteration order deterministic and makes the merge operations O(n+m).
use crate::core_types::{Ballot, SlotIndex, Value};
use serde::{Deserialize, Deserializer, Serialize};
use std::{fmt, fmt::Display, iter::FromIterator, slice};

/// A set of values, implemented as a sorted slice.
pub type ValueSet<V> = OrdSet<V>;

/// A set of ballots, implemented as a sorted slice.
pub type BallotSet<V> = OrdSet<Ballot<V>>;

/// A set of node identifiers, implemented as a sorted slice.
pub type NodeIdSet<ID> = OrdSet<ID>;

/// A set implemented as a sorted, deduplicated vector.
///
/// Membership tests are binary searches; `union`, `intersection`, and
/// `difference` are sorted merges. Iteration is strictly ascending.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
#[serde(transparent)]
pub struct OrdSet<T: Ord>(Vec<T>);

impl<T: Ord> Default for OrdSet<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T: Ord + Clone> OrdSet<T> {
    /// The empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of elements in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the set contains `item`.
    pub fn contains(&self, item: &T) -> bool {
        self.0.binary_search(item).is_ok()
    }

    /// Insert `item`, keeping the backing slice sorted. Returns true if the
    /// item was not already present.
    pub fn insert(&mut self, item: T) -> bool {
        match self.0.binary_search(&item) {
            Ok(_) => false,
            Err(index) => {
                self.0.insert(index, item);
                true
            }
        }
    }

    /// Remove `item` if present. Returns true if it was present.
    pub fn remove(&mut self, item: &T) -> bool {
        match self.0.binary_search(item) {
            Ok(index) => {
                self.0.remove(index);
                true
            }
            Err(_) => false,
        }
    }

    /// All the members of both sets.
    pub fn union(&self, other: &Self) -> Self {
        let (mut i, mut j) = (0, 0);
        let mut result = Vec::with_capacity(self.len() + other.len());
        while i < self.0.len() && j < other.0.len() {
            match self.0[i].cmp(&other.0[j]) {
                std::cmp::Ordering::Less => {
                    result.push(self.0[i].clone());
                    i += 1;
                }
                std::cmp::Ordering::Greater => {
                    result.push(other.0[j].clone());
                    j += 1;
                }
                std::cmp::Ordering::Equal => {
                    result.push(self.0[i].clone());
                    i += 1;
                    j += 1;
                }
            }
        }
        result.extend_from_slice(&self.0[i..]);
        result.extend_from_slice(&other.0[j..]);
        Self(result)
    }

    /// Only the members present in both sets.
    pub fn intersection(&self, other: &Self) -> Self {
        let (mut i, mut j) = (0, 0);
        let mut result = Vec::new();
        while i < self.0.len() && j < other.0.len() {
            match self.0[i].cmp(&other.0[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    result.push(self.0[i].clone());
                    i += 1;
                    j += 1;
                }
            }
        }
        Self(result)
    }

    /// Only the members of `self` that do not appear in `other`.
    pub fn difference(&self, other: &Self) -> Self {
        let (mut i, mut j) = (0, 0);
        let mut result = Vec::new();
        while i < self.0.len() && j < other.0.len() {
            match self.0[i].cmp(&other.0[j]) {
                std::cmp::Ordering::Less => {
                    result.push(self.0[i].clone());
                    i += 1;
                }
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    i += 1;
                    j += 1;
                }
            }
        }
        result.extend_from_slice(&self.0[i..]);
        Self(result)
    }

    /// Iterate the members in ascending order.
    pub fn iter(&self) -> slice::Iter<T> {
        self.0.iter()
    }

    /// The least member, if any.
    pub fn first(&self) -> Option<&T> {
        self.0.first()
    }

    /// The greatest member, if any.
    pub fn last(&self) -> Option<&T> {
        self.0.last()
    }

    /// Remove the greatest member and return it.
    pub fn pop_last(&mut self) -> Option<T> {
        self.0.pop()
    }

    /// View the members as a sorted slice.
    pub fn as_slice(&self) -> &[T] {
        &self.0
    }
}

impl<V: Value> OrdSet<V> {
    /// Reduce the members to a single value with [`Value::combine`],
    /// iterating in ascending order so that every node holding this set
    /// derives the same value. Returns None for the empty set.
    pub fn combine(&self, slot_index: SlotIndex) -> Option<V> {
        let mut iter = self.0.iter();
        let first = iter.next()?.clone();
        Some(iter.fold(first, |acc, v| acc.combine(v, slot_index)))
    }
}

impl<T: Ord + Clone> FromIterator<T> for OrdSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut result = Self::default();
        for item in iter {
            result.insert(item);
        }
        result
    }
}

impl<T: Ord + Clone> Extend<T> for OrdSet<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for item in iter {
            self.insert(item);
        }
    }
}

impl<T: Ord> IntoIterator for OrdSet<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a, T: Ord> IntoIterator for &'a OrdSet<T> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// Deserialization goes through `from_iter` so that a hostile or buggy peer
// cannot hand us an unsorted backing vector.
impl<'de, T: Ord + Clone + Deserialize<'de>> Deserialize<'de> for OrdSet<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let items = Vec::<T>::deserialize(deserializer)?;
        Ok(items.into_iter().collect())
    }
}

impl<T: Ord + Display> Display for OrdSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[")?;
        for (index, item) in self.0.iter().enumerate() {
            if index > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", item)?;
        }
        write!(f, "]")
    }
}
