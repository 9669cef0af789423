// Copyright (c) 2018-2022 The MobileCoin Foundation

//! Messages used by the consensus protocol.
use crate::{
    core_types::{Ballot, GenericNodeId, SlotIndex, Value},
    error::Error,
    quorum_set::QuorumSet,
    set::{BallotSet, ValueSet},
};
use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
};

/// The highest possible ballot counter.
pub const INFINITY: u32 = u32::MAX;

/// Nominate message payload.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct NominatePayload<V: Value> {
    /// Values we vote to nominate.
    pub X: ValueSet<V>,

    /// Values we accept as nominated.
    pub Y: ValueSet<V>,
}

// Nominated value sets only grow, so a message carrying more values is newer
// than a message carrying fewer. Ties break lexicographically to keep the
// order antisymmetric.
impl<V: Value> Ord for NominatePayload<V> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.X.len() + self.Y.len())
            .cmp(&(other.X.len() + other.Y.len()))
            .then_with(|| self.Y.cmp(&other.Y))
            .then_with(|| self.X.cmp(&other.X))
    }
}

impl<V: Value> PartialOrd for NominatePayload<V> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<V: Value> NominatePayload<V> {
    /// Create a new payload voting to nominate `values`.
    pub fn new_with_votes(values: ValueSet<V>) -> Self {
        Self {
            X: values,
            Y: ValueSet::default(),
        }
    }
}

/// Prepare message payload.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct PreparePayload<V: Value> {
    /// Current ballot we are trying to prepare and commit.
    pub B: Ballot<V>,

    /// The highest accepted-prepared ballot, zero if none.
    pub P: Ballot<V>,

    /// The highest accepted-prepared ballot below `P` with a different
    /// value, zero if none.
    pub PP: Ballot<V>,

    /// The counter of the highest confirmed-prepared ballot, 0 if none.
    pub HN: u32,

    /// The lowest counter for which we vote to commit, 0 if none.
    pub CN: u32,
}

/// Commit message payload.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct CommitPayload<V: Value> {
    /// Current ballot, whose value we are committing.
    pub B: Ballot<V>,

    /// The counter of the highest accepted-prepared ballot, carried over
    /// from the prepare phase.
    pub PN: u32,

    /// The highest counter for which we accept commit.
    pub HN: u32,

    /// The lowest counter for which we accept commit.
    pub CN: u32,
}

/// Externalize message payload.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct ExternalizePayload<V: Value> {
    /// The lowest confirmed-committed ballot.
    pub C: Ballot<V>,

    /// The counter of the highest confirmed-committed ballot.
    pub HN: u32,
}

/// The topic of a consensus message: one of the four protocol statements,
/// or the combined nominate-and-prepare statement emitted while a node is
/// still nominating but has begun balloting.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(bound = "")]
pub enum Topic<V: Value> {
    /// Nomination statement.
    Nominate(NominatePayload<V>),

    /// Nomination statement combined with a Prepare statement.
    NominatePrepare(NominatePayload<V>, PreparePayload<V>),

    /// Prepare statement.
    Prepare(PreparePayload<V>),

    /// Commit statement.
    Commit(CommitPayload<V>),

    /// Externalize statement, terminal for its slot.
    Externalize(ExternalizePayload<V>),
}

impl<V: Value> Topic<V> {
    // Rank of the topic kind in the newness order.
    fn rank(&self) -> u8 {
        match self {
            Topic::Nominate(_) => 0,
            Topic::NominatePrepare(_, _) => 1,
            Topic::Prepare(_) => 2,
            Topic::Commit(_) => 3,
            Topic::Externalize(_) => 4,
        }
    }
}

// The "newness" order on topics: later protocol stages are newer, and within
// a stage the payload fields are compared in protocol order. A combined
// nominate-prepare compares by ballot progress before nomination progress.
impl<V: Value> Ord for Topic<V> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Topic::Nominate(a), Topic::Nominate(b)) => a.cmp(b),
            (Topic::NominatePrepare(a_nom, a_prep), Topic::NominatePrepare(b_nom, b_prep)) => {
                a_prep.cmp(b_prep).then_with(|| a_nom.cmp(b_nom))
            }
            (Topic::Prepare(a), Topic::Prepare(b)) => a.cmp(b),
            (Topic::Commit(a), Topic::Commit(b)) => a.cmp(b),
            (Topic::Externalize(a), Topic::Externalize(b)) => {
                a.HN.cmp(&b.HN).then_with(|| a.C.cmp(&b.C))
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl<V: Value> PartialOrd for Topic<V> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<V: Value> fmt::Display for Topic<V> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Topic::Nominate(nom) => write!(f, "NOM X={} Y={}", nom.X, nom.Y),
            Topic::NominatePrepare(nom, prep) => write!(
                f,
                "NOM/PREP X={} Y={} B={} P={} PP={} CN={} HN={}",
                nom.X, nom.Y, prep.B, prep.P, prep.PP, prep.CN, prep.HN
            ),
            Topic::Prepare(prep) => write!(
                f,
                "PREP B={} P={} PP={} CN={} HN={}",
                prep.B, prep.P, prep.PP, prep.CN, prep.HN
            ),
            Topic::Commit(commit) => write!(
                f,
                "COMMIT B={} PN={} CN={} HN={}",
                commit.B, commit.PN, commit.CN, commit.HN
            ),
            Topic::Externalize(ext) => write!(f, "EXT C={} HN={}", ext.C, ext.HN),
        }
    }
}

/// The envelope of a consensus protocol message.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Msg<V: Value, ID: GenericNodeId = String> {
    /// A per-node monotonic tag for tracing. Carries no protocol meaning
    /// and is excluded from equality.
    pub counter: u64,

    /// Id of the node sending this message.
    pub sender_id: ID,

    /// The slot this message is about.
    pub slot_index: SlotIndex,

    /// The quorum set of the node sending this message.
    pub quorum_set: QuorumSet<ID>,

    /// The topic of this message.
    pub topic: Topic<V>,
}

impl<V: Value, ID: GenericNodeId> PartialEq for Msg<V, ID> {
    fn eq(&self, other: &Self) -> bool {
        self.sender_id == other.sender_id
            && self.slot_index == other.slot_index
            && self.quorum_set == other.quorum_set
            && self.topic == other.topic
    }
}
impl<V: Value, ID: GenericNodeId> Eq for Msg<V, ID> {}

impl<V: Value, ID: GenericNodeId> Hash for Msg<V, ID> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sender_id.hash(state);
        self.slot_index.hash(state);
        self.quorum_set.hash(state);
        self.topic.hash(state);
    }
}

impl<V: Value, ID: GenericNodeId> Msg<V, ID> {
    /// Create a new message.
    pub fn new(sender_id: ID, quorum_set: QuorumSet<ID>, slot_index: SlotIndex, topic: Topic<V>) -> Self {
        Self {
            counter: 0,
            sender_id,
            slot_index,
            quorum_set,
            topic,
        }
    }

    /// The sender's current ballot counter: `B.N` for ballot-phase
    /// statements, 0 otherwise.
    pub fn ballot_counter(&self) -> u32 {
        match &self.topic {
            Topic::Nominate(_) | Topic::Externalize(_) => 0,
            Topic::NominatePrepare(_, prep) | Topic::Prepare(prep) => prep.B.N,
            Topic::Commit(commit) => commit.B.N,
        }
    }

    /// Check the structural constraints on the payload. Messages failing
    /// validation are dropped before they can mutate slot state.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.quorum_set.is_valid() {
            return Err(Error::InvalidMessage(format!(
                "quorum set threshold {} exceeds member count",
                self.quorum_set.threshold
            )));
        }
        match &self.topic {
            Topic::Nominate(nom) => {
                Self::validate_nominate(nom)?;
                if nom.X.is_empty() && nom.Y.is_empty() {
                    return Err(Error::InvalidMessage("empty nominate".into()));
                }
                Ok(())
            }
            Topic::NominatePrepare(nom, prep) => {
                Self::validate_nominate(nom)?;
                Self::validate_prepare(prep)
            }
            Topic::Prepare(prep) => Self::validate_prepare(prep),
            Topic::Commit(commit) => {
                if !commit.B.is_well_formed() || commit.B.is_zero() {
                    return Err(Error::InvalidMessage("commit without a ballot".into()));
                }
                if commit.CN > commit.HN {
                    return Err(Error::InvalidMessage(format!(
                        "commit range {}..{} is inverted",
                        commit.CN, commit.HN
                    )));
                }
                Ok(())
            }
            Topic::Externalize(ext) => {
                if !ext.C.is_well_formed() || ext.C.is_zero() {
                    return Err(Error::InvalidMessage("externalize without a ballot".into()));
                }
                if ext.HN < ext.C.N {
                    return Err(Error::InvalidMessage(format!(
                        "externalize HN {} below committed counter {}",
                        ext.HN, ext.C.N
                    )));
                }
                Ok(())
            }
        }
    }

    fn validate_nominate(nom: &NominatePayload<V>) -> Result<(), Error> {
        if !nom.X.intersection(&nom.Y).is_empty() {
            return Err(Error::InvalidMessage(
                "nominate votes and accepts intersect".into(),
            ));
        }
        Ok(())
    }

    fn validate_prepare(prep: &PreparePayload<V>) -> Result<(), Error> {
        // P and PP are exempt from the well-formedness check: the tie-break
        // that keeps P at or below B can legitimately produce a prepared
        // ballot with counter 0 and a value.
        if !prep.B.is_well_formed() || prep.B.is_zero() {
            return Err(Error::InvalidMessage("prepare without a ballot".into()));
        }
        if prep.P.is_zero() {
            if !prep.PP.is_zero() {
                return Err(Error::InvalidMessage("PP set without P".into()));
            }
        } else {
            if prep.B < prep.P {
                return Err(Error::InvalidMessage("prepared ballot above B".into()));
            }
            if !prep.PP.is_zero() {
                if prep.PP >= prep.P {
                    return Err(Error::InvalidMessage("PP not below P".into()));
                }
                if prep.PP.X == prep.P.X {
                    return Err(Error::InvalidMessage("PP has the same value as P".into()));
                }
            }
        }
        if prep.CN > prep.HN || prep.HN > prep.B.N {
            return Err(Error::InvalidMessage(format!(
                "prepare counters CN={} HN={} B.N={} out of order",
                prep.CN, prep.HN, prep.B.N
            )));
        }
        Ok(())
    }

    /// The set of values this message accepts as nominated.
    pub fn accepts_nominated(&self) -> ValueSet<V> {
        match &self.topic {
            Topic::Nominate(nom) | Topic::NominatePrepare(nom, _) => nom.Y.clone(),
            Topic::Prepare(prep) => [&prep.B, &prep.P, &prep.PP]
                .iter()
                .filter_map(|ballot| ballot.X.clone())
                .collect(),
            Topic::Commit(commit) => commit.B.X.iter().cloned().collect(),
            Topic::Externalize(ext) => ext.C.X.iter().cloned().collect(),
        }
    }

    /// The set of values this message votes or accepts as nominated.
    pub fn votes_or_accepts_nominated(&self) -> ValueSet<V> {
        let result = self.accepts_nominated();
        match &self.topic {
            Topic::Nominate(nom) | Topic::NominatePrepare(nom, _) => result.union(&nom.X),
            _ => result,
        }
    }

    /// A finite set of ballots generating everything this message votes or
    /// accepts as prepared. Used to seed the candidate set for the
    /// accepted-prepared search.
    pub fn votes_or_accepts_prepared_set(&self) -> BallotSet<V> {
        let mut result = BallotSet::default();
        match &self.topic {
            Topic::Nominate(_) => {}
            Topic::NominatePrepare(_, prep) | Topic::Prepare(prep) => {
                result = Self::prepare_accepts_set(prep);
                result.insert(prep.B.clone());
            }
            // A Commit statement is generated by the carried-over prepared
            // counter PN, the accepted-commit bound HN, and the unbounded
            // prepare vote at INFINITY; CN contributes nothing beyond these.
            Topic::Commit(commit) => {
                if let Some(value) = &commit.B.X {
                    if commit.PN > 0 {
                        result.insert(Ballot::new(commit.PN, value.clone()));
                    }
                    result.insert(Ballot::new(commit.HN, value.clone()));
                    result.insert(Ballot::new(INFINITY, value.clone()));
                }
            }
            Topic::Externalize(ext) => {
                if let Some(value) = &ext.C.X {
                    result.insert(Ballot::new(INFINITY, value.clone()));
                }
            }
        }
        result
    }

    // The ballots a Prepare statement accepts as prepared:
    // {P, PP, <HN, B.X>}.
    fn prepare_accepts_set(prep: &PreparePayload<V>) -> BallotSet<V> {
        let mut result = BallotSet::default();
        if !prep.P.is_zero() {
            result.insert(prep.P.clone());
            if !prep.PP.is_zero() {
                result.insert(prep.PP.clone());
            }
        }
        if prep.HN > 0 {
            if let Some(value) = &prep.B.X {
                result.insert(Ballot::new(prep.HN, value.clone()));
            }
        }
        result
    }

    /// The subset of `candidates` this message accepts as prepared.
    pub fn accepts_prepared_in(&self, candidates: &BallotSet<V>) -> BallotSet<V> {
        match &self.topic {
            Topic::Nominate(_) => BallotSet::default(),
            Topic::NominatePrepare(_, prep) | Topic::Prepare(prep) => {
                candidates.intersection(&Self::prepare_accepts_set(prep))
            }
            // A Commit statement accepts as prepared every matching-value
            // ballot with counter >= CN, plus exactly PN.
            Topic::Commit(commit) => candidates
                .iter()
                .filter(|b| b.X == commit.B.X && (b.N >= commit.CN || b.N == commit.PN))
                .cloned()
                .collect(),
            // An Externalize statement accepts as prepared every
            // matching-value ballot with counter >= C.N.
            Topic::Externalize(ext) => candidates
                .iter()
                .filter(|b| b.X == ext.C.X && b.N >= ext.C.N)
                .cloned()
                .collect(),
        }
    }

    /// The subset of `candidates` this message votes or accepts as prepared.
    pub fn votes_or_accepts_prepared_in(&self, candidates: &BallotSet<V>) -> BallotSet<V> {
        let mut result = self.accepts_prepared_in(candidates);
        match &self.topic {
            Topic::NominatePrepare(_, prep) | Topic::Prepare(prep) => {
                if candidates.contains(&prep.B) {
                    result.insert(prep.B.clone());
                }
            }
            // Voting to commit <n, B.X> for every n >= CN votes to prepare
            // matching-value ballots at every counter.
            Topic::Commit(commit) => {
                for ballot in candidates.iter().filter(|b| b.X == commit.B.X) {
                    result.insert(ballot.clone());
                }
            }
            _ => {}
        }
        result
    }

    /// Whether this message accepts commit of `<n, value>` for some `n` in
    /// `[min, max]`. On success returns the window narrowed to the overlap.
    pub fn accepts_commit(&self, value: &V, min: u32, max: u32) -> Option<(u32, u32)> {
        match &self.topic {
            Topic::Commit(commit) => {
                if commit.B.X.as_ref() != Some(value) {
                    return None;
                }
                if commit.CN > max || commit.HN < min {
                    return None;
                }
                Some((min.max(commit.CN), max.min(commit.HN)))
            }
            Topic::Externalize(ext) => {
                if ext.C.X.as_ref() != Some(value) {
                    return None;
                }
                if ext.C.N > max {
                    return None;
                }
                Some((min.max(ext.C.N), max))
            }
            _ => None,
        }
    }

    /// Whether this message votes or accepts commit of `<n, value>` for some
    /// `n` in `[min, max]`. On success returns the narrowed window.
    pub fn votes_or_accepts_commit(&self, value: &V, min: u32, max: u32) -> Option<(u32, u32)> {
        if let Some(window) = self.accepts_commit(value, min, max) {
            return Some(window);
        }
        match &self.topic {
            // A Prepare statement with CN > 0 votes to commit its ballot
            // value in [CN, HN].
            Topic::NominatePrepare(_, prep) | Topic::Prepare(prep) => {
                if prep.CN == 0 || prep.B.X.as_ref() != Some(value) {
                    return None;
                }
                if prep.CN > max || prep.HN < min {
                    return None;
                }
                Some((min.max(prep.CN), max.min(prep.HN)))
            }
            // A Commit statement votes to commit for every counter >= CN.
            Topic::Commit(commit) => {
                if commit.B.X.as_ref() != Some(value) {
                    return None;
                }
                if commit.CN > max {
                    return None;
                }
                Some((min.max(commit.CN), max))
            }
            _ => None,
        }
    }
}

impl<V: Value, ID: GenericNodeId> fmt::Display for Msg<V, ID> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "(V={} I={} C={}: {})",
            self.sender_id, self.slot_index, self.counter, self.topic
        )
    }
}

#[cfg(test)]
mod msg_tests {
    use super::*;
    use crate::test_utils::test_node_id;

    fn nominate(x: &[u32], y: &[u32]) -> Topic<u32> {
        Topic::Nominate(NominatePayload {
            X: x.iter().cloned().collect(),
            Y: y.iter().cloned().collect(),
        })
    }

    fn prepare(b: Ballot<u32>, p: Ballot<u32>, pp: Ballot<u32>, cn: u32, hn: u32) -> Topic<u32> {
        Topic::Prepare(PreparePayload {
            B: b,
            P: p,
            PP: pp,
            CN: cn,
            HN: hn,
        })
    }

    fn msg(topic: Topic<u32>) -> Msg<u32> {
        Msg::new(test_node_id(1), QuorumSet::empty(), 1, topic)
    }

    #[test]
    fn topic_ordering_across_kinds() {
        let nom = nominate(&[1], &[]);
        let nom_prep = Topic::NominatePrepare(
            NominatePayload {
                X: ValueSet::default(),
                Y: [1u32].iter().cloned().collect(),
            },
            PreparePayload {
                B: Ballot::new(1, 1),
                P: Ballot::zero(),
                PP: Ballot::zero(),
                CN: 0,
                HN: 0,
            },
        );
        let prep = prepare(Ballot::new(1, 1), Ballot::zero(), Ballot::zero(), 0, 0);
        let commit = Topic::Commit(CommitPayload {
            B: Ballot::new(1, 1u32),
            PN: 1,
            HN: 1,
            CN: 1,
        });
        let ext = Topic::Externalize(ExternalizePayload {
            C: Ballot::new(1, 1u32),
            HN: 1,
        });

        assert!(nom < nom_prep);
        assert!(nom_prep < prep);
        assert!(prep < commit);
        assert!(commit < ext);
    }

    #[test]
    fn topic_ordering_within_kinds() {
        // Nominate: more values is newer.
        assert!(nominate(&[1], &[]) < nominate(&[1], &[2]));
        assert!(nominate(&[1, 2], &[]) < nominate(&[], &[1, 2, 3]));

        // Prepare: ordered by B, then P, then PP, then HN.
        let base = prepare(Ballot::new(1, 5), Ballot::zero(), Ballot::zero(), 0, 0);
        let higher_b = prepare(Ballot::new(2, 5), Ballot::zero(), Ballot::zero(), 0, 0);
        let with_p = prepare(Ballot::new(2, 5), Ballot::new(1, 5), Ballot::zero(), 0, 0);
        assert!(base < higher_b);
        assert!(higher_b < with_p);

        // Externalize: ordered by HN.
        let low = Topic::Externalize(ExternalizePayload {
            C: Ballot::new(1, 5u32),
            HN: 1,
        });
        let high = Topic::Externalize(ExternalizePayload {
            C: Ballot::new(1, 5u32),
            HN: INFINITY,
        });
        assert!(low < high);
    }

    #[test]
    fn topic_ordering_is_antisymmetric() {
        let topics = [
            nominate(&[1], &[]),
            nominate(&[1], &[2]),
            prepare(Ballot::new(1, 5), Ballot::zero(), Ballot::zero(), 0, 0),
            prepare(Ballot::new(2, 5), Ballot::new(1, 5), Ballot::zero(), 0, 1),
        ];
        for a in &topics {
            for b in &topics {
                if a < b {
                    assert!(b > a);
                    assert_ne!(a, b);
                }
            }
        }
    }

    #[test]
    fn validate_nominate() {
        assert!(msg(nominate(&[1, 2], &[3])).validate().is_ok());
        // X and Y must not intersect.
        assert!(msg(nominate(&[1, 2], &[2])).validate().is_err());
        // An empty nominate says nothing.
        assert!(msg(nominate(&[], &[])).validate().is_err());
    }

    #[test]
    fn validate_prepare() {
        // A well-formed prepare.
        assert!(msg(prepare(
            Ballot::new(2, 5),
            Ballot::new(1, 5),
            Ballot::zero(),
            0,
            1
        ))
        .validate()
        .is_ok());

        // B must be set.
        assert!(msg(prepare(Ballot::zero(), Ballot::zero(), Ballot::zero(), 0, 0))
            .validate()
            .is_err());

        // P must not exceed B.
        assert!(msg(prepare(
            Ballot::new(1, 5),
            Ballot::new(2, 5),
            Ballot::zero(),
            0,
            0
        ))
        .validate()
        .is_err());

        // PP requires P.
        assert!(msg(prepare(
            Ballot::new(2, 5),
            Ballot::zero(),
            Ballot::new(1, 6),
            0,
            0
        ))
        .validate()
        .is_err());

        // PP must sit below P with a different value.
        assert!(msg(prepare(
            Ballot::new(3, 5),
            Ballot::new(2, 5),
            Ballot::new(1, 5),
            0,
            0
        ))
        .validate()
        .is_err());

        // CN <= HN <= B.N.
        assert!(msg(prepare(
            Ballot::new(2, 5),
            Ballot::new(2, 5),
            Ballot::zero(),
            2,
            1
        ))
        .validate()
        .is_err());
        assert!(msg(prepare(
            Ballot::new(2, 5),
            Ballot::new(2, 5),
            Ballot::zero(),
            0,
            3
        ))
        .validate()
        .is_err());
    }

    #[test]
    fn validate_commit_and_externalize() {
        assert!(msg(Topic::Commit(CommitPayload {
            B: Ballot::new(1, 5u32),
            PN: 0,
            HN: 2,
            CN: 1,
        }))
        .validate()
        .is_ok());
        assert!(msg(Topic::Commit(CommitPayload {
            B: Ballot::new(1, 5u32),
            PN: 0,
            HN: 1,
            CN: 2,
        }))
        .validate()
        .is_err());
        assert!(msg(Topic::Externalize(ExternalizePayload {
            C: Ballot::new(2, 5u32),
            HN: 2,
        }))
        .validate()
        .is_ok());
        assert!(msg(Topic::Externalize(ExternalizePayload {
            C: Ballot::new(2, 5u32),
            HN: 1,
        }))
        .validate()
        .is_err());
    }

    #[test]
    fn nominated_sets() {
        // A Nominate statement votes X and accepts Y.
        let m = msg(nominate(&[1], &[2]));
        assert_eq!(m.accepts_nominated().as_slice(), &[2]);
        assert_eq!(m.votes_or_accepts_nominated().as_slice(), &[1, 2]);

        // Ballot-phase statements accept their ballot values as nominated.
        let m = msg(prepare(
            Ballot::new(5, 1),
            Ballot::new(4, 2),
            Ballot::new(3, 3),
            0,
            0,
        ));
        assert_eq!(m.accepts_nominated().as_slice(), &[1, 2, 3]);
        assert_eq!(m.votes_or_accepts_nominated().as_slice(), &[1, 2, 3]);

        let m = msg(Topic::Externalize(ExternalizePayload {
            C: Ballot::new(1, 7u32),
            HN: 1,
        }));
        assert_eq!(m.accepts_nominated().as_slice(), &[7]);
    }

    #[test]
    fn prepared_sets() {
        let candidates: BallotSet<u32> = [
            Ballot::new(1, 1),
            Ballot::new(4, 2),
            Ballot::new(5, 1),
            Ballot::new(10, 1),
            Ballot::new(INFINITY, 1),
        ]
        .iter()
        .cloned()
        .collect();

        // Prepare accepts {P, PP, <HN, B.X>} and additionally votes B.
        let m = msg(prepare(
            Ballot::new(10, 1),
            Ballot::new(5, 1),
            Ballot::new(4, 2),
            0,
            10,
        ));
        assert_eq!(
            m.votes_or_accepts_prepared_set().as_slice(),
            &[Ballot::new(4, 2), Ballot::new(5, 1), Ballot::new(10, 1)]
        );
        assert_eq!(
            m.accepts_prepared_in(&candidates).as_slice(),
            &[Ballot::new(4, 2), Ballot::new(5, 1), Ballot::new(10, 1)]
        );

        // A Commit statement generates prepared-vote candidates from PN,
        // HN, and the unbounded vote at INFINITY; CN is not among them.
        let m = msg(Topic::Commit(CommitPayload {
            B: Ballot::new(20, 1u32),
            PN: 15,
            HN: 30,
            CN: 10,
        }));
        assert_eq!(
            m.votes_or_accepts_prepared_set().as_slice(),
            &[
                Ballot::new(15, 1),
                Ballot::new(30, 1),
                Ballot::new(INFINITY, 1)
            ]
        );

        // Commit accepts matching-value counters >= CN, or exactly PN.
        let m = msg(Topic::Commit(CommitPayload {
            B: Ballot::new(20, 1u32),
            PN: 1,
            HN: 20,
            CN: 5,
        }));
        assert_eq!(
            m.accepts_prepared_in(&candidates).as_slice(),
            &[
                Ballot::new(1, 1),
                Ballot::new(5, 1),
                Ballot::new(10, 1),
                Ballot::new(INFINITY, 1)
            ]
        );
        // ... and votes for every matching-value candidate.
        assert!(m
            .votes_or_accepts_prepared_in(&candidates)
            .contains(&Ballot::new(1, 1)));

        // Externalize accepts matching-value counters >= C.N.
        let m = msg(Topic::Externalize(ExternalizePayload {
            C: Ballot::new(5, 1u32),
            HN: 5,
        }));
        assert_eq!(
            m.accepts_prepared_in(&candidates).as_slice(),
            &[Ballot::new(5, 1), Ballot::new(10, 1), Ballot::new(INFINITY, 1)]
        );
    }

    #[test]
    fn commit_windows() {
        let nom = msg(nominate(&[1], &[]));
        assert_eq!(nom.accepts_commit(&1, 1, 10), None);
        assert_eq!(nom.votes_or_accepts_commit(&1, 1, 10), None);

        // A prepare with no commit vote says nothing.
        let m = msg(prepare(Ballot::new(1, 1), Ballot::zero(), Ballot::zero(), 0, 0));
        assert_eq!(m.accepts_commit(&1, 1, 10), None);
        assert_eq!(m.votes_or_accepts_commit(&1, 1, 10), None);

        // A prepare with CN > 0 votes [CN, HN].
        let m = msg(prepare(Ballot::new(7, 1), Ballot::new(7, 1), Ballot::zero(), 3, 7));
        assert_eq!(m.accepts_commit(&1, 1, 10), None);
        assert_eq!(m.votes_or_accepts_commit(&1, 1, 10), Some((3, 7)));
        assert_eq!(m.votes_or_accepts_commit(&1, 5, 10), Some((5, 7)));
        assert_eq!(m.votes_or_accepts_commit(&2, 1, 10), None);

        // A commit accepts [CN, HN] and votes [CN, infinity).
        let m = msg(Topic::Commit(CommitPayload {
            B: Ballot::new(20, 1u32),
            PN: 10,
            HN: 7,
            CN: 1,
        }));
        assert_eq!(m.accepts_commit(&1, 5, 10), Some((5, 7)));
        assert_eq!(m.votes_or_accepts_commit(&1, 5, 10), Some((5, 7)));
        let m = msg(Topic::Commit(CommitPayload {
            B: Ballot::new(20, 1u32),
            PN: 10,
            HN: 4,
            CN: 1,
        }));
        assert_eq!(m.accepts_commit(&1, 5, 10), None);
        assert_eq!(m.votes_or_accepts_commit(&1, 5, 10), Some((5, 10)));
        let m = msg(Topic::Commit(CommitPayload {
            B: Ballot::new(20, 1u32),
            PN: 10,
            HN: 20,
            CN: 15,
        }));
        assert_eq!(m.accepts_commit(&1, 1, 10), None);
        assert_eq!(m.votes_or_accepts_commit(&1, 1, 10), None);

        // Externalize accepts [C.N, infinity).
        let m = msg(Topic::Externalize(ExternalizePayload {
            C: Ballot::new(5, 1u32),
            HN: 5,
        }));
        assert_eq!(m.accepts_commit(&1, 1, 10), Some((5, 10)));
        assert_eq!(m.accepts_commit(&1, 6, 10), Some((6, 10)));
        assert_eq!(m.accepts_commit(&1, 3, 7), Some((5, 7)));
        assert_eq!(m.accepts_commit(&1, 1, 4), None);
        assert_eq!(m.accepts_commit(&2, 1, 10), None);
    }

    #[test]
    fn message_equality_ignores_trace_counter() {
        let mut a = msg(nominate(&[1], &[]));
        let b = msg(nominate(&[1], &[]));
        a.counter = 17;
        assert_eq!(a, b);
    }
}
