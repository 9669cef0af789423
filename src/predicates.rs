// Copyright (c) 2018-2022 The MobileCoin Foundation

//! Predicates for use in trust decisions.
//!
//! Quorum and blocking-set searches walk the recursive quorum-set structure
//! testing stored messages against a predicate. A predicate is a plain value:
//! a successful test returns the predicate to use for subsequent nodes, so
//! the search's own stack provides backtracking when a branch fails.
use crate::{
    core_types::{GenericNodeId, Value},
    msg::Msg,
    set::{BallotSet, ValueSet},
};
use std::sync::Arc;

/// An interface for predicates, used for performing searches for quorums and
/// blocking sets. See `findQuorum`, `findBlockingSet`.
pub trait Predicate<V: Value, ID: GenericNodeId = String>: Clone {
    /// The type of result this predicate could return.
    type Result;

    /// Tests whether the predicate is true for a given message.
    /// Returns `Some(Predicate)` if `msg` satisfies the predicate, `None`
    /// otherwise. This allows the predicate to evolve its state as it is
    /// called on more and more messages.
    fn test(&self, msg: &Msg<V, ID>) -> Option<Self>;

    /// Returns the result stored inside the predicate.
    fn result(&self) -> Self::Result;
}

/// A predicate for determining whether a message matches a certain condition.
#[derive(Clone)]
pub struct FuncPredicate<'a, V: Value, ID: GenericNodeId = String> {
    /// The test function to apply for this predicate.
    pub test_fn: &'a dyn Fn(&Msg<V, ID>) -> bool,
}

impl<'a, V: Value, ID: GenericNodeId> Predicate<V, ID> for FuncPredicate<'a, V, ID> {
    type Result = ();

    fn test(&self, msg: &Msg<V, ID>) -> Option<Self> {
        if (self.test_fn)(msg) {
            Some(self.clone())
        } else {
            None
        }
    }

    fn result(&self) -> Self::Result {}
}

/// A predicate for narrowing down a set of values.
#[derive(Clone)]
pub struct ValueSetPredicate<V: Value, ID: GenericNodeId = String> {
    /// The values over which to apply the test function.
    pub values: ValueSet<V>,

    /// The test function to narrow down the values in this predicate.
    #[allow(clippy::type_complexity)]
    pub test_fn: Arc<dyn Fn(&Msg<V, ID>, &ValueSet<V>) -> ValueSet<V>>,
}

impl<V: Value, ID: GenericNodeId> Predicate<V, ID> for ValueSetPredicate<V, ID> {
    type Result = ValueSet<V>;

    fn test(&self, msg: &Msg<V, ID>) -> Option<Self> {
        if self.values.is_empty() {
            return None;
        }

        let next_values = (self.test_fn)(msg, &self.values);
        if next_values.is_empty() {
            return None;
        }

        Some(Self {
            values: next_values,
            test_fn: self.test_fn.clone(),
        })
    }

    fn result(&self) -> Self::Result {
        self.values.clone()
    }
}

/// A predicate for narrowing down a set of ballots.
#[derive(Clone)]
pub struct BallotSetPredicate<V: Value, ID: GenericNodeId = String> {
    /// The ballots to consider for the evaluation of this predicate.
    pub ballots: BallotSet<V>,

    /// The test function to apply to the ballots in this predicate.
    #[allow(clippy::type_complexity)]
    pub test_fn: Arc<dyn Fn(&Msg<V, ID>, &BallotSet<V>) -> BallotSet<V>>,
}

impl<V: Value, ID: GenericNodeId> Predicate<V, ID> for BallotSetPredicate<V, ID> {
    type Result = BallotSet<V>;

    fn test(&self, msg: &Msg<V, ID>) -> Option<Self> {
        if self.ballots.is_empty() {
            return None;
        }

        let next_ballots = (self.test_fn)(msg, &self.ballots);
        if next_ballots.is_empty() {
            return None;
        }

        Some(Self {
            ballots: next_ballots,
            test_fn: self.test_fn.clone(),
        })
    }

    fn result(&self) -> Self::Result {
        self.ballots.clone()
    }
}

/// A predicate for narrowing down a `[min, max]` window of ballot counters.
#[derive(Clone)]
pub struct MinMaxPredicate<V: Value, ID: GenericNodeId = String> {
    /// Lowest counter under consideration.
    pub min: u32,

    /// Highest counter under consideration.
    pub max: u32,

    /// The test function narrowing the window. Returns the narrowed window,
    /// or None if the message says nothing about any counter inside it.
    #[allow(clippy::type_complexity)]
    pub test_fn: Arc<dyn Fn(&Msg<V, ID>, u32, u32) -> Option<(u32, u32)>>,
}

impl<V: Value, ID: GenericNodeId> Predicate<V, ID> for MinMaxPredicate<V, ID> {
    type Result = (u32, u32);

    fn test(&self, msg: &Msg<V, ID>) -> Option<Self> {
        if self.min > self.max {
            return None;
        }

        let (min, max) = (self.test_fn)(msg, self.min, self.max)?;
        Some(Self {
            min,
            max,
            test_fn: self.test_fn.clone(),
        })
    }

    fn result(&self) -> Self::Result {
        (self.min, self.max)
    }
}

#[cfg(test)]
mod predicates_tests {
    use super::*;
    use crate::{
        core_types::Ballot,
        msg::{CommitPayload, NominatePayload, PreparePayload, Topic},
        quorum_set::QuorumSet,
    };
    use std::collections::BTreeMap;

    fn id(name: &str) -> String {
        name.to_string()
    }

    // Every peer's stored quorum set names the local node alone, so any
    // reporter whose message passes the predicate extends a quorum; the
    // predicate mechanics are what these tests exercise.
    fn peer_msg(sender: &str, topic: Topic<String>) -> Msg<String> {
        Msg::new(
            id(sender),
            QuorumSet::new_with_node_ids(1, vec![id("alice")]),
            1,
            topic,
        )
    }

    fn nominate(values: &[&str]) -> Topic<String> {
        Topic::Nominate(NominatePayload {
            X: values.iter().map(|value| value.to_string()).collect(),
            Y: ValueSet::default(),
        })
    }

    fn prepare(counter: u32, value: &str) -> Topic<String> {
        Topic::Prepare(PreparePayload {
            B: Ballot::new(counter, value.to_string()),
            P: Ballot::zero(),
            PP: Ballot::zero(),
            CN: 0,
            HN: 0,
        })
    }

    fn values(names: &[&str]) -> ValueSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    // A function predicate carries no state: a passing test hands back an
    // equivalent predicate, a failing one yields nothing.
    fn func_predicate_is_stateless() {
        let msg = peer_msg("bob", nominate(&["pasta"]));

        let from_bob = FuncPredicate {
            test_fn: &|msg: &Msg<String>| msg.sender_id == id("bob"),
        };
        assert!(from_bob.test(&msg).is_some());

        let future_slot = FuncPredicate {
            test_fn: &|msg: &Msg<String>| msg.slot_index > 1,
        };
        assert!(future_slot.test(&msg).is_none());
    }

    #[test]
    // Threaded through a quorum search, the value-set predicate ends up
    // holding the intersection of everything the quorum nominates; values
    // nobody mentions fall away.
    fn value_set_predicate_narrows_through_a_quorum() {
        let local = QuorumSet::new_with_node_ids(2, vec![id("bob"), id("carol"), id("dave")]);

        let mut msgs = BTreeMap::new();
        msgs.insert(id("bob"), peer_msg("bob", nominate(&["pasta", "pizza", "soup"])));
        msgs.insert(id("carol"), peer_msg("carol", nominate(&["pizza", "soup"])));
        msgs.insert(id("dave"), peer_msg("dave", nominate(&["salads"])));

        let (found, pred) = local.findQuorum(
            &id("alice"),
            &msgs,
            ValueSetPredicate {
                values: values(&["gyros", "pizza", "soup"]),
                test_fn: Arc::new(|msg, values| {
                    values.intersection(&msg.votes_or_accepts_nominated())
                }),
            },
        );
        assert_eq!(
            found,
            [id("alice"), id("bob"), id("carol")].into_iter().collect()
        );
        assert_eq!(pred.result(), values(&["pizza", "soup"]));
    }

    #[test]
    // The same narrowing applies across a blocking set: with a 2-of-3 local
    // set, two reporters block, and only the values both vouch for remain.
    fn value_set_predicate_narrows_through_a_blocking_set() {
        let local = QuorumSet::new_with_node_ids(2, vec![id("bob"), id("carol"), id("dave")]);

        let mut msgs = BTreeMap::new();
        msgs.insert(id("bob"), peer_msg("bob", nominate(&["pasta", "soup"])));
        msgs.insert(id("carol"), peer_msg("carol", nominate(&["soup"])));

        let (found, pred) = local.findBlockingSet(
            &msgs,
            ValueSetPredicate {
                values: values(&["pasta", "soup"]),
                test_fn: Arc::new(|msg, values| {
                    values.intersection(&msg.votes_or_accepts_nominated())
                }),
            },
        );
        assert_eq!(found, [id("bob"), id("carol")].into_iter().collect());
        assert_eq!(pred.result(), values(&["soup"]));
    }

    #[test]
    // Only ballots some traversed message actually vouches for survive the
    // ballot-set predicate.
    fn ballot_set_predicate_keeps_only_vouched_ballots() {
        let local = QuorumSet::new_with_node_ids(1, vec![id("bob")]);

        let mut msgs = BTreeMap::new();
        msgs.insert(id("bob"), peer_msg("bob", prepare(4, "pizza")));

        let candidates: BallotSet<String> = [
            Ballot::new(4, "pizza".to_string()),
            Ballot::new(9, "sushi".to_string()),
        ]
        .into_iter()
        .collect();

        let (found, pred) = local.findQuorum(
            &id("alice"),
            &msgs,
            BallotSetPredicate {
                ballots: candidates,
                test_fn: Arc::new(|msg, ballots| msg.votes_or_accepts_prepared_in(ballots)),
            },
        );
        assert_eq!(found, [id("alice"), id("bob")].into_iter().collect());
        assert_eq!(
            pred.result(),
            [Ballot::new(4, "pizza".to_string())].into_iter().collect()
        );
    }

    #[test]
    // A blocking set over a 1-of-2 local set needs both members, so a
    // common vouched-for ballot must survive both narrowing steps.
    fn ballot_set_predicate_blocking_set_requires_a_common_ballot() {
        let local = QuorumSet::new_with_node_ids(1, vec![id("bob"), id("carol")]);
        let candidates: BallotSet<String> = [
            Ballot::new(4, "pizza".to_string()),
            Ballot::new(9, "sushi".to_string()),
        ]
        .into_iter()
        .collect();
        let intersect = |msg: &Msg<String>, ballots: &BallotSet<String>| {
            msg.votes_or_accepts_prepared_in(ballots)
        };

        // bob and carol prepare different ballots: no common candidate.
        let mut msgs = BTreeMap::new();
        msgs.insert(id("bob"), peer_msg("bob", prepare(4, "pizza")));
        msgs.insert(id("carol"), peer_msg("carol", prepare(9, "sushi")));
        let (found, _) = local.findBlockingSet(
            &msgs,
            BallotSetPredicate {
                ballots: candidates.clone(),
                test_fn: Arc::new(intersect),
            },
        );
        assert!(found.is_empty());

        // Once carol moves to bob's ballot the blocking set forms around it.
        msgs.insert(id("carol"), peer_msg("carol", prepare(4, "pizza")));
        let (found, pred) = local.findBlockingSet(
            &msgs,
            BallotSetPredicate {
                ballots: candidates,
                test_fn: Arc::new(intersect),
            },
        );
        assert_eq!(found, [id("bob"), id("carol")].into_iter().collect());
        assert_eq!(
            pred.result(),
            [Ballot::new(4, "pizza".to_string())].into_iter().collect()
        );
    }

    #[test]
    // The min-max predicate narrows the counter window message by message
    // and fails on a disjoint window, leaving the last good predicate
    // untouched.
    fn min_max_predicate_narrows_the_window() {
        let commit = |sender: &str, cn: u32, hn: u32| {
            peer_msg(
                sender,
                Topic::Commit(CommitPayload {
                    B: Ballot::new(hn, "pizza".to_string()),
                    PN: 0,
                    HN: hn,
                    CN: cn,
                }),
            )
        };

        let pred = MinMaxPredicate::<String> {
            min: 1,
            max: u32::MAX,
            test_fn: Arc::new(|msg, min, max| {
                msg.accepts_commit(&"pizza".to_string(), min, max)
            }),
        };

        let pred = pred.test(&commit("bob", 2, 10)).unwrap();
        assert_eq!(pred.result(), (2, 10));

        let pred = pred.test(&commit("carol", 4, 7)).unwrap();
        assert_eq!(pred.result(), (4, 7));

        // A window that cannot overlap fails without touching the predicate
        // the caller still holds.
        assert!(pred.test(&commit("dave", 20, 30)).is_none());
        assert_eq!(pred.result(), (4, 7));
    }
}
