// Copyright (c) 2018-2022 The MobileCoin Foundation

//! Quorum sets: the recursive threshold structures through which every node
//! expresses its trust decisions.
//!
//! A quorum set names a threshold and a list of members, each member being a
//! node id or a nested quorum set. Any choice of `threshold` members (with
//! nested sets expanded to one of their own slices) is a *slice*; the node
//! owning the set implicitly belongs to every slice. The two searches at the
//! bottom of this file, [`QuorumSet::findBlockingSet`] and
//! [`QuorumSet::findQuorum`], are what every federated-vote decision in the
//! engine reduces to.
use crate::{
    core_types::{GenericNodeId, Value},
    msg::Msg,
    predicates::Predicate,
    set::NodeIdSet,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    hash::{Hash, Hasher},
};

/// One entry in a quorum set: a trusted node, or a nested set standing in
/// for a group of nodes.
#[derive(Clone, Debug, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "args")]
#[serde(bound = "")]
pub enum QuorumSetMember<ID: GenericNodeId> {
    /// A single trusted entity with an identity.
    Node(ID),

    /// A nested quorum set, counted as satisfied once its own threshold is.
    InnerSet(QuorumSet<ID>),
}

/// The quorum set defining the trusted set of peers.
#[derive(Clone, Debug, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct QuorumSet<ID: GenericNodeId = String> {
    /// How many members must agree before this set is satisfied.
    pub threshold: u32,

    /// Members.
    pub members: Vec<QuorumSetMember<ID>>,
}

// Two quorum sets express the same trust decision regardless of the order
// their members are listed in, so equality and hashing both work on a
// recursively sorted copy.
impl<ID: GenericNodeId> PartialEq for QuorumSet<ID> {
    fn eq(&self, other: &QuorumSet<ID>) -> bool {
        if self.threshold != other.threshold || self.members.len() != other.members.len() {
            return false;
        }
        let mut self_sorted = self.clone();
        let mut other_sorted = other.clone();
        self_sorted.sort();
        other_sorted.sort();
        self_sorted.members == other_sorted.members
    }
}
impl<ID: GenericNodeId> Eq for QuorumSet<ID> {}

impl<ID: GenericNodeId> Hash for QuorumSet<ID> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let mut sorted = self.clone();
        sorted.sort();
        sorted.threshold.hash(state);
        sorted.members.hash(state);
    }
}

impl<ID: GenericNodeId> QuorumSet<ID> {
    /// Create a new quorum set.
    pub fn new(threshold: u32, members: Vec<QuorumSetMember<ID>>) -> Self {
        Self { threshold, members }
    }

    /// Create a new quorum set from the given node IDs.
    pub fn new_with_node_ids(threshold: u32, node_ids: Vec<ID>) -> Self {
        Self::new(
            threshold,
            node_ids.into_iter().map(QuorumSetMember::Node).collect(),
        )
    }

    /// Create a new quorum set from the given inner sets.
    pub fn new_with_inner_sets(threshold: u32, inner_sets: Vec<Self>) -> Self {
        Self::new(
            threshold,
            inner_sets
                .into_iter()
                .map(QuorumSetMember::InnerSet)
                .collect(),
        )
    }

    /// A quorum set with no members and a threshold of 0.
    pub fn empty() -> Self {
        Self::new(0, vec![])
    }

    /// Whether the threshold is satisfiable at every level of the tree.
    pub fn is_valid(&self) -> bool {
        if self.threshold as usize > self.members.len() {
            return false;
        }
        self.members.iter().all(|member| match member {
            QuorumSetMember::Node(_) => true,
            QuorumSetMember::InnerSet(inner) => inner.is_valid(),
        })
    }

    /// Sort the members recursively, producing the canonical order that
    /// equality and hashing rely on.
    pub fn sort(&mut self) {
        for member in self.members.iter_mut() {
            if let QuorumSetMember::InnerSet(inner) = member {
                inner.sort();
            }
        }
        // Inner sets must be sorted before the member list itself: their
        // contents feed into the comparison of the members containing them.
        self.members.sort();
    }

    /// The flattened set of every node id named by this set or any nested
    /// set.
    pub fn nodes(&self) -> NodeIdSet<ID> {
        let mut result = NodeIdSet::default();
        for member in self.members.iter() {
            match member {
                QuorumSetMember::Node(node_id) => {
                    result.insert(node_id.clone());
                }
                QuorumSetMember::InnerSet(inner) => {
                    result.extend(inner.nodes());
                }
            }
        }
        result
    }

    /// The fraction of this set's slices containing `node_id`, as a
    /// `(numerator, denominator)` rational: a top-level member is picked
    /// into `threshold` of every `len` choices, and a node inside a nested
    /// set additionally carries that set's own fraction. Zero if the node
    /// is not named anywhere. Assumes a node appears at most once in the
    /// tree.
    pub fn weight(&self, node_id: &ID) -> (u32, u32) {
        for member in self.members.iter() {
            match member {
                QuorumSetMember::Node(candidate) => {
                    if candidate == node_id {
                        return (self.threshold, self.members.len() as u32);
                    }
                }
                QuorumSetMember::InnerSet(inner) => {
                    let (num, denom) = inner.weight(node_id);
                    if num > 0 {
                        return (self.threshold * num, self.members.len() as u32 * denom);
                    }
                }
            }
        }
        (0, 1)
    }

    /// Enumerate this quorum set's slices, invoking `f` on each. A slice is
    /// any choice of `threshold` members, with inner-set members expanded
    /// recursively to one of their own slices. The node owning the quorum
    /// set belongs to every slice and is not included. Exponential in
    /// general; intended for tests and diagnostics.
    pub fn slices<F: FnMut(&NodeIdSet<ID>)>(&self, f: &mut F) {
        let mut current = NodeIdSet::default();
        Self::slices_helper(self.threshold, &self.members, &mut current, f);
    }

    fn slices_helper(
        needed: u32,
        members: &[QuorumSetMember<ID>],
        current: &mut NodeIdSet<ID>,
        f: &mut dyn FnMut(&NodeIdSet<ID>),
    ) {
        if needed == 0 {
            f(current);
            return;
        }
        if needed as usize > members.len() {
            return;
        }

        // Include the first member, then continue with one fewer needed.
        match &members[0] {
            QuorumSetMember::Node(node_id) => {
                let added = current.insert(node_id.clone());
                Self::slices_helper(needed - 1, &members[1..], current, f);
                if added {
                    current.remove(node_id);
                }
            }
            QuorumSetMember::InnerSet(inner) => {
                let mut inner_slices = Vec::new();
                inner.slices(&mut |slice: &NodeIdSet<ID>| inner_slices.push(slice.clone()));
                for slice in inner_slices {
                    let added: Vec<ID> = slice
                        .iter()
                        .filter(|node_id| !current.contains(node_id))
                        .cloned()
                        .collect();
                    for node_id in &added {
                        current.insert(node_id.clone());
                    }
                    Self::slices_helper(needed - 1, &members[1..], current, f);
                    for node_id in &added {
                        current.remove(node_id);
                    }
                }
            }
        }

        // Skip the first member.
        Self::slices_helper(needed, &members[1..], current, f);
    }

    /// Search for a blocking set whose members all satisfy `pred`: a set of
    /// nodes with at least one member inside every one of this set's
    /// slices. At a threshold of `k` over `n` members that takes `n - k + 1`
    /// satisfying members, applied recursively to inner sets.
    ///
    /// `msgs` holds the newest message from each node. The predicate is
    /// threaded through the satisfying members in order and handed back
    /// with the witness set, which is empty when no blocking set exists.
    pub fn findBlockingSet<V: Value, P: Predicate<V, ID>>(
        &self,
        msgs: &BTreeMap<ID, Msg<V, ID>>,
        pred: P,
    ) -> (NodeIdSet<ID>, P) {
        Self::findBlockingSetHelper(
            self.members.len() as u32 - self.threshold + 1,
            &self.members,
            msgs,
            pred,
            NodeIdSet::default(),
        )
    }

    // Walks `members` left to right looking for `remaining` more satisfying
    // members. Each candidate is tried both ways: included (continuing with
    // the predicate its test returned) and, if that path dead-ends,
    // skipped. The fallback matters because a narrowing predicate can rule
    // out later members along one path while another path still completes.
    fn findBlockingSetHelper<V: Value, P: Predicate<V, ID>>(
        remaining: u32,
        members: &[QuorumSetMember<ID>],
        msgs: &BTreeMap<ID, Msg<V, ID>>,
        pred: P,
        selected: NodeIdSet<ID>,
    ) -> (NodeIdSet<ID>, P) {
        if remaining == 0 {
            return (selected, pred);
        }
        if remaining as usize > members.len() {
            // Not enough members left to complete the set.
            return (NodeIdSet::default(), pred);
        }

        match &members[0] {
            QuorumSetMember::Node(node_id) => {
                if let Some(next_pred) = msgs.get(node_id).and_then(|msg| pred.test(msg)) {
                    let mut with_node = selected.clone();
                    with_node.insert(node_id.clone());
                    let (found, final_pred) = Self::findBlockingSetHelper(
                        remaining - 1,
                        &members[1..],
                        msgs,
                        next_pred,
                        with_node,
                    );
                    if !found.is_empty() {
                        return (found, final_pred);
                    }
                }
            }
            QuorumSetMember::InnerSet(inner) => {
                // A nested set counts once its own blocking threshold is
                // reached.
                let (inner_found, inner_pred) = Self::findBlockingSetHelper(
                    inner.members.len() as u32 - inner.threshold + 1,
                    &inner.members,
                    msgs,
                    pred.clone(),
                    selected.clone(),
                );
                if !inner_found.is_empty() {
                    let (found, final_pred) = Self::findBlockingSetHelper(
                        remaining - 1,
                        &members[1..],
                        msgs,
                        inner_pred,
                        inner_found,
                    );
                    if !found.is_empty() {
                        return (found, final_pred);
                    }
                }
            }
        }

        // Without the first member, with the predicate as it was before
        // testing it.
        Self::findBlockingSetHelper(remaining, &members[1..], msgs, pred, selected)
    }

    /// Search for a quorum containing `node_id` whose members all satisfy
    /// `pred`: a set closed under the rule that every member also has one
    /// of its own slices (read from its stored message's quorum set) inside
    /// the set.
    ///
    /// Returns the witness set, empty when no such quorum exists, along
    /// with the predicate after being threaded through every member.
    pub fn findQuorum<V: Value, P: Predicate<V, ID>>(
        &self,
        node_id: &ID,
        msgs: &BTreeMap<ID, Msg<V, ID>>,
        pred: P,
    ) -> (NodeIdSet<ID>, P) {
        let mut selected = NodeIdSet::default();
        selected.insert(node_id.clone());
        Self::findQuorumHelper(self.threshold, &self.members, msgs, pred, selected)
    }

    // Walks `members` left to right looking for `threshold` more satisfied
    // members. A node member needs a stored message that passes the
    // predicate, after which its own quorum set must be satisfiable within
    // the growing selection (the transitive-closure rule); an inner-set
    // member is recursed into directly. As in the blocking-set search,
    // every choice point falls back to skipping the member, which un-does
    // any predicate narrowing made along the failed path.
    fn findQuorumHelper<V: Value, P: Predicate<V, ID>>(
        threshold: u32,
        members: &[QuorumSetMember<ID>],
        msgs: &BTreeMap<ID, Msg<V, ID>>,
        pred: P,
        selected: NodeIdSet<ID>,
    ) -> (NodeIdSet<ID>, P) {
        if threshold == 0 {
            return (selected, pred);
        }
        if threshold as usize > members.len() {
            return (NodeIdSet::default(), pred);
        }

        match &members[0] {
            QuorumSetMember::Node(node_id) => {
                if selected.contains(node_id) {
                    // Already vouched for earlier in the search.
                    return Self::findQuorumHelper(
                        threshold - 1,
                        &members[1..],
                        msgs,
                        pred,
                        selected,
                    );
                }

                if let Some(msg) = msgs.get(node_id) {
                    if let Some(next_pred) = pred.test(msg) {
                        let mut with_node = selected.clone();
                        with_node.insert(node_id.clone());

                        // The member only counts if its own declared quorum
                        // set can be satisfied too.
                        let (closure, closure_pred) = Self::findQuorumHelper(
                            msg.quorum_set.threshold,
                            &msg.quorum_set.members,
                            msgs,
                            next_pred,
                            with_node,
                        );
                        if !closure.is_empty() {
                            let (found, final_pred) = Self::findQuorumHelper(
                                threshold - 1,
                                &members[1..],
                                msgs,
                                closure_pred,
                                closure,
                            );
                            if !found.is_empty() {
                                return (found, final_pred);
                            }
                        }
                    }
                }
            }
            QuorumSetMember::InnerSet(inner) => {
                let (inner_found, inner_pred) = Self::findQuorumHelper(
                    inner.threshold,
                    &inner.members,
                    msgs,
                    pred.clone(),
                    selected.clone(),
                );
                if !inner_found.is_empty() {
                    let (found, final_pred) = Self::findQuorumHelper(
                        threshold - 1,
                        &members[1..],
                        msgs,
                        inner_pred,
                        inner_found,
                    );
                    if !found.is_empty() {
                        return (found, final_pred);
                    }
                }
            }
        }

        // Without the first member, with the predicate as it was before
        // testing it.
        Self::findQuorumHelper(threshold, &members[1..], msgs, pred, selected)
    }
}
