// Copyright (c) 2018-2022 The MobileCoin Foundation

//! Core types for the consensus engine.
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    cmp::Ordering,
    fmt,
    fmt::{Debug, Display},
    hash::Hash,
};

/// Slot index.
///
/// Each slot is an instance of consensus that externalizes a single value.
pub type SlotIndex = u64;

/// A generic node identifier.
///
/// Node identities are opaque to the engine; they only need a total order
/// (for stable iteration) and a display form (hashed into per-slot neighbor
/// selection).
pub trait GenericNodeId:
    Clone
    + Debug
    + Display
    + Serialize
    + DeserializeOwned
    + Eq
    + PartialEq
    + Ord
    + PartialOrd
    + Hash
    + Send
    + 'static
{
}

impl<T> GenericNodeId for T where
    T: Clone
        + Debug
        + Display
        + Serialize
        + DeserializeOwned
        + Eq
        + PartialEq
        + Ord
        + PartialOrd
        + Hash
        + Send
        + 'static
{
}

/// The value on which to consense.
///
/// `Ord` supplies the total order required by federated voting. `combine`
/// reduces two values to one and must be deterministic and commutative;
/// it is applied to the full confirmed-nominated set (in ascending order)
/// to derive a single ballot value, so all nodes confirming the same set
/// derive the same ballot.
pub trait Value:
    Clone + Debug + Display + Eq + PartialEq + Ord + PartialOrd + Hash + Send + Serialize + DeserializeOwned + 'static
{
    /// Combine this value with another, producing a third. Must be
    /// deterministic and commutative. The slot index may parameterize the
    /// combination but must not break commutativity.
    fn combine(&self, other: &Self, slot_index: SlotIndex) -> Self;

    /// A byte-string representation of the value, not meant for human
    /// consumption. Feeds the per-slot neighbor-selection hash.
    fn as_bytes(&self) -> Vec<u8>;
}

/// The ballot contains the value on which to consense.
///
/// The balloting protocol centers around successively higher ballots
/// which are moving through the phases of the federated voting.
///
/// Ballots are totally ordered, with "counter" more significant than
/// "value." The zero ballot has a zero counter and no value; a missing
/// value sorts below any present value.
#[derive(Hash, Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Ballot<V: Value> {
    /// Counter.
    pub N: u32,

    /// Value.
    pub X: Option<V>,
}

impl<V: Value> Ballot<V> {
    /// Create a new Ballot with the given counter and value.
    pub fn new(counter: u32, value: V) -> Self {
        Ballot {
            N: counter,
            X: Some(value),
        }
    }

    /// The zero ballot.
    pub fn zero() -> Self {
        Ballot { N: 0, X: None }
    }

    /// Check whether the ballot's counter is 0 and it carries no value.
    pub fn is_zero(&self) -> bool {
        self.N == 0 && self.X.is_none()
    }

    /// A ballot is well formed when it carries a value exactly when its
    /// counter is non-zero.
    pub fn is_well_formed(&self) -> bool {
        (self.N == 0) == self.X.is_none()
    }

    /// Whether accepting this ballot as prepared aborts `other`: `other` has
    /// a lower counter and a different value.
    pub fn aborts(&self, other: &Ballot<V>) -> bool {
        other.N < self.N && other.X != self.X
    }
}

// Ballots are totally ordered with N more significant than X.
impl<V: Value> Ord for Ballot<V> {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.N != other.N {
            return self.N.cmp(&other.N);
        }

        self.X.cmp(&other.X)
    }
}

impl<V: Value> PartialOrd for Ballot<V> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<V: Value> fmt::Display for Ballot<V> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.X {
            Some(value) => write!(f, "<{}, {}>", self.N, value),
            None => write!(f, "<{}, ->", self.N),
        }
    }
}
