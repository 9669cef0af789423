// Copyright (c) 2018-2022 The MobileCoin Foundation

//! The state of a single slot while it is undergoing nomination and
//! balloting.
//!
//! A slot moves through the phases Nominate, NominatePrepare, Prepare,
//! Commit, Externalize. During nomination it echoes values proposed by the
//! current max-priority peers and promotes them through the federated-vote
//! states (voted, accepted, confirmed). Once any value is confirmed
//! nominated (or some ballot is accepted prepared) balloting begins, working
//! through successively higher ballots until a commit is confirmed.
use crate::{
    core_types::{Ballot, GenericNodeId, SlotIndex, Value},
    error::Error,
    msg::{
        CommitPayload, ExternalizePayload, Msg, NominatePayload, PreparePayload, Topic, INFINITY,
    },
    predicates::{BallotSetPredicate, FuncPredicate, MinMaxPredicate, Predicate, ValueSetPredicate},
    quorum_set::QuorumSet,
    set::{BallotSet, NodeIdSet, ValueSet},
    slot_state::SlotState,
};
use mockall::automock;
use serde::{Deserialize, Serialize};
use slog::{debug, o, Logger};
use std::{
    collections::BTreeMap,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

/// The phase of the protocol a slot is in.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Nominating values, no ballot yet.
    Nominate,

    /// Still nominating, but also balloting; emits combined statements.
    NominatePrepare,

    /// Balloting only.
    Prepare,

    /// Some commit statement has been accepted.
    Commit,

    /// Some commit statement has been confirmed. Terminal.
    Externalize,
}

/// A timer expiry reported by a slot. The event loop turns these into
/// commands; timers never mutate slot state directly.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SlotTimeout {
    /// The nomination round timer fired.
    NewRound,

    /// The deferred ballot-counter update timer fired.
    DeferredUpdate,
}

/// The node-facing interface of a slot.
#[automock]
pub trait ScpSlot<V: Value, ID: GenericNodeId>: Send {
    /// The slot's index.
    fn slot_index(&self) -> SlotIndex;

    /// The slot's current protocol phase.
    fn phase(&self) -> Phase;

    /// Handle an incoming message about this slot. Returns the outbound
    /// response, if this message changed what the slot has to say.
    fn handle_message(&mut self, msg: &Msg<V, ID>) -> Result<Option<Msg<V, ID>>, Error>;

    /// Fire a previously armed deferred ballot-counter update. A no-op if
    /// the update was cancelled after its timer expired.
    fn deferred_update(&mut self) -> Option<Msg<V, ID>>;

    /// The message describing the slot's current state, if it has anything
    /// to say yet.
    fn out_msg(&self) -> Option<Msg<V, ID>>;

    /// The newest stored message from each peer (and from the local node,
    /// during nomination).
    fn stored_messages(&self) -> Vec<Msg<V, ID>>;

    /// The nomination round the slot is in, based on its age.
    fn current_round(&self) -> u32;

    /// The latest round for which max-priority peers were computed.
    fn last_round(&self) -> u32;

    /// Record the max-priority peer of `round`, accumulating it into the
    /// set of peers whose nominations the slot echoes.
    fn note_round(&mut self, round: u32, max_priority_peer: Option<ID>);

    /// Whether nomination rounds are still running.
    fn rounds_active(&self) -> bool;

    /// Whether round-1 priorities are still missing (e.g. because the
    /// previous slot had not externalized when the slot was created).
    fn needs_round_init(&self) -> bool;

    /// Schedule the next nomination round tick.
    fn schedule_next_round(&mut self);

    /// The earliest pending timer deadline, if any.
    fn next_deadline(&self) -> Option<Instant>;

    /// Take the timer expiries that are due at `now`, clearing their
    /// deadlines.
    fn due_timeouts(&mut self, now: Instant) -> Vec<SlotTimeout>;

    /// A JSON snapshot of the slot's state, for debugging.
    fn debug_snapshot(&self) -> String;
}

/// A slot undergoing nomination and balloting.
pub struct Slot<V: Value, ID: GenericNodeId = String> {
    /// The slot index.
    pub(crate) slot_index: SlotIndex,

    /// The local node's id.
    pub(crate) node_id: ID,

    /// The local node's quorum set.
    pub(crate) quorum_set: QuorumSet<ID>,

    /// Current phase of the protocol.
    pub(crate) phase: Phase,

    /// The newest message from each sender.
    pub(crate) M: BTreeMap<ID, Msg<V, ID>>,

    /// The topic of the last message we emitted, for duplicate suppression.
    pub(crate) last_sent: Option<Topic<V>>,

    /// When this slot was created, the basis for round timing and the
    /// ballot-counter cap.
    created: Instant,

    /// Values we vote to nominate.
    pub(crate) X: ValueSet<V>,

    /// Values we accept as nominated.
    pub(crate) Y: ValueSet<V>,

    /// Values we confirm as nominated.
    pub(crate) Z: ValueSet<V>,

    /// Peers that have held the max priority in the current or any earlier
    /// nomination round. Only their nominations are echoed.
    pub(crate) max_priority_peers: NodeIdSet<ID>,

    /// Latest round for which `max_priority_peers` was updated.
    pub(crate) last_round: u32,

    /// When the next nomination round begins.
    round_deadline: Option<Instant>,

    /// Set once the slot leaves nomination; rounds never restart.
    rounds_stopped: bool,

    /// Current ballot.
    pub(crate) B: Ballot<V>,

    /// The highest accepted-prepared ballot.
    pub(crate) P: Ballot<V>,

    /// The highest accepted-prepared ballot below `P` with a different
    /// value.
    pub(crate) PP: Ballot<V>,

    /// In Prepare: the lowest ballot we vote to commit, if any.
    /// In Commit: the lowest ballot we accept as committed.
    /// In Externalize: the lowest ballot we confirm as committed.
    pub(crate) C: Ballot<V>,

    /// In Prepare: the highest confirmed-prepared ballot.
    /// In Commit: the highest ballot we accept as committed.
    /// In Externalize: the highest ballot we confirm as committed.
    pub(crate) H: Ballot<V>,

    /// Whether a deferred ballot-counter update is armed.
    upd_armed: bool,

    /// When the armed deferred update fires.
    upd_deadline: Option<Instant>,

    /// Base duration of a nomination round.
    round_interval: Duration,

    /// Base delay of a deferred ballot-counter update.
    update_interval: Duration,

    logger: Logger,
}

// Nomination round N lasts for a duration of (2+N) intervals, and the first
// round is round 1. Via the quadratic formula, after an elapsed time of T
// intervals it is round 1 + (sqrt(8T+25)-5)/2.
pub(crate) fn round_number(interval: Duration, elapsed: Duration) -> u32 {
    let elapsed_intervals = elapsed.as_secs_f64() / interval.as_secs_f64();
    1 + (((8.0 * elapsed_intervals + 25.0).sqrt() - 5.0) / 2.0) as u32
}

/// How long after slot creation the given round begins.
pub(crate) fn round_offset(round: u32, interval: Duration) -> Duration {
    let r = round.saturating_sub(1);
    interval * (r * (r + 5) / 2)
}

impl<V: Value, ID: GenericNodeId> Slot<V, ID> {
    /// Create a new slot. Round-1 priorities are supplied separately via
    /// [`ScpSlot::note_round`] because computing them requires the previous
    /// slot's externalized value, which the node may not have yet.
    pub fn new(
        node_id: ID,
        quorum_set: QuorumSet<ID>,
        slot_index: SlotIndex,
        round_interval: Duration,
        update_interval: Duration,
        logger: Logger,
    ) -> Self {
        let logger = logger.new(o!("slot" => slot_index));
        Self {
            slot_index,
            node_id,
            quorum_set,
            phase: Phase::Nominate,
            M: BTreeMap::new(),
            last_sent: None,
            created: Instant::now(),
            X: ValueSet::default(),
            Y: ValueSet::default(),
            Z: ValueSet::default(),
            max_priority_peers: NodeIdSet::default(),
            last_round: 0,
            round_deadline: None,
            rounds_stopped: false,
            B: Ballot::zero(),
            P: Ballot::zero(),
            PP: Ballot::zero(),
            C: Ballot::zero(),
            H: Ballot::zero(),
            upd_armed: false,
            upd_deadline: None,
            round_interval,
            update_interval,
            logger,
        }
    }

    fn in_nominate_phase(&self) -> bool {
        matches!(self.phase, Phase::Nominate | Phase::NominatePrepare)
    }

    fn in_prepare_phase(&self) -> bool {
        matches!(self.phase, Phase::NominatePrepare | Phase::Prepare)
    }

    // This embodies most of the nomination and balloting protocols. It
    // processes an incoming protocol message and returns an outbound
    // protocol message in response, or None if the incoming message does
    // not change what this slot has to say.
    fn handle(&mut self, msg: &Msg<V, ID>) -> Result<Option<Msg<V, ID>>, Error> {
        if self.node_id == msg.sender_id && !self.in_nominate_phase() {
            // A node doesn't message itself except during nomination.
            return Ok(None);
        }

        msg.validate()?;

        // When we already have a message from this sender that is the same
        // or newer, keep using the stored one. The slot may still react to
        // it, e.g. against newly computed priorities.
        let have_newer = self
            .M
            .get(&msg.sender_id)
            .map_or(false, |stored| stored.topic >= msg.topic);
        let msg = if have_newer {
            self.M[&msg.sender_id].clone()
        } else {
            self.M.insert(msg.sender_id.clone(), msg.clone());
            msg.clone()
        };

        if self.in_nominate_phase() {
            self.do_nominate_phase(&msg);
        }

        if self.in_prepare_phase() {
            self.do_prepare_phase();
        }

        if self.phase == Phase::Commit {
            self.do_commit_phase();
        }

        let resp = self.response();
        if let Some(resp) = &resp {
            debug!(self.logger, "{} -> {}", msg, resp);
        }
        Ok(resp)
    }

    fn do_nominate_phase(&mut self, msg: &Msg<V, ID>) {
        if self.Z.is_empty() && self.max_priority_peers.contains(&msg.sender_id) {
            // "Echo" nominated values by adding them to X.
            if let Topic::Nominate(nom) | Topic::NominatePrepare(nom, _) = &msg.topic {
                self.X = self.X.union(&nom.X).union(&nom.Y);
            }
        }

        // Promote accepted-nominated values from X to Y, and
        // confirmed-nominated values from Y to Z.
        self.update_YZ();

        if self.phase == Phase::Nominate {
            if !self.Z.is_empty() {
                // Some value is confirmed nominated, start balloting.
                self.phase = Phase::NominatePrepare;
                self.B.N = 1;
                self.set_ballot_value();
            } else {
                self.update_P();
                if !self.P.is_zero() {
                    // Some ballot is accepted prepared, start balloting.
                    self.phase = Phase::NominatePrepare;
                    self.B.N = 1;
                    self.set_ballot_value();
                }
            }
        }
    }

    fn do_prepare_phase(&mut self) {
        self.update_P();

        // Update H, the highest confirmed-prepared ballot.
        self.H = Ballot::zero();
        let mut confirm_candidates = BallotSet::default();
        if !self.P.is_zero() {
            confirm_candidates.insert(self.P.clone());
            if !self.PP.is_zero() {
                confirm_candidates.insert(self.PP.clone());
            }
        }
        let (node_ids, pred) = self.quorum_set.findQuorum(
            &self.node_id,
            &self.M,
            BallotSetPredicate {
                ballots: confirm_candidates,
                test_fn: Arc::new(|msg: &Msg<V, ID>, ballots: &BallotSet<V>| {
                    msg.accepts_prepared_in(ballots)
                }),
            },
        );
        if !node_ids.is_empty() {
            if let Some(h) = pred.result().last().cloned() {
                if self.B.X == h.X {
                    self.H = h;
                }
            }
            if self.phase == Phase::NominatePrepare {
                // Some ballot is confirmed prepared, exit nomination.
                self.phase = Phase::Prepare;
                self.cancel_rounds();
            }
        }

        self.update_B();

        // Update C, the lowest ballot we vote to commit.
        if !self.C.is_zero()
            && (self.H.N == 0 || self.P.aborts(&self.C) || self.PP.aborts(&self.C))
        {
            self.C = Ballot::zero();
        }
        if self.C.is_zero() && self.H.N > 0 && self.H.N == self.B.N {
            self.C = self.B.clone();
        }

        // The prepare phase ends at a node when the statement "commit b"
        // reaches the accept state in federated voting for some ballot "b".
        if self.update_accepts_commit_bounds() {
            self.phase = Phase::Commit;
        }
    }

    fn do_commit_phase(&mut self) {
        self.cancel_rounds();
        self.update_P();
        self.update_accepts_commit_bounds();
        self.update_B();

        // As soon as a node confirms "commit b" for any ballot "b", it moves
        // to the externalize phase.
        let value = match self.B.X.clone() {
            Some(value) => value,
            None => return,
        };
        let (node_ids, pred) = self.quorum_set.findQuorum(
            &self.node_id,
            &self.M,
            MinMaxPredicate {
                min: self.C.N,
                max: self.H.N,
                test_fn: Arc::new(move |msg: &Msg<V, ID>, min, max| {
                    msg.accepts_commit(&value, min, max)
                }),
            },
        );
        if !node_ids.is_empty() {
            let (cn, hn) = pred.result();
            self.phase = Phase::Externalize;
            self.C.N = cn;
            self.H.N = hn;
            self.cancel_deferred_update();
            self.cancel_rounds();
        }
    }

    // Try to find either a blocking set that accepts a statement or a quorum
    // that votes for or accepts it; either suffices for this node to accept
    // the statement. Blocking sets are checked first because they are
    // smaller. Returns the narrowed predicate on success.
    fn federated_accept<P, F>(&self, make_pred: F) -> Option<P>
    where
        P: Predicate<V, ID>,
        F: Fn(bool) -> P,
    {
        let (node_ids, pred) = self.quorum_set.findBlockingSet(&self.M, make_pred(false));
        if !node_ids.is_empty() {
            return Some(pred);
        }

        let (node_ids, pred) =
            self.quorum_set
                .findQuorum(&self.node_id, &self.M, make_pred(true));
        if !node_ids.is_empty() {
            return Some(pred);
        }

        None
    }

    fn update_YZ(&mut self) {
        // Look for values to promote from X to Y: a blocking set accepting
        // them as nominated, or a quorum voting for or accepting them.
        let votes = self.X.clone();
        if let Some(pred) = self.federated_accept(|is_quorum| ValueSetPredicate {
            values: votes.clone(),
            test_fn: Arc::new(move |msg: &Msg<V, ID>, values: &ValueSet<V>| {
                let msg_values = if is_quorum {
                    msg.votes_or_accepts_nominated()
                } else {
                    msg.accepts_nominated()
                };
                values.intersection(&msg_values)
            }),
        }) {
            self.Y = self.Y.union(&pred.result());
        }
        self.X = self.X.difference(&self.Y);

        // Look for values in Y to confirm: a quorum accepting them.
        let (node_ids, pred) = self.quorum_set.findQuorum(
            &self.node_id,
            &self.M,
            ValueSetPredicate {
                values: self.Y.clone(),
                test_fn: Arc::new(|msg: &Msg<V, ID>, values: &ValueSet<V>| {
                    values.intersection(&msg.accepts_nominated())
                }),
            },
        );
        if !node_ids.is_empty() {
            self.Z = self.Z.union(&pred.result());
        }
    }

    // Update P and PP, the two highest accepted-prepared ballots with
    // differing values.
    fn update_P(&mut self) {
        self.P = Ballot::zero();
        self.PP = Ballot::zero();

        // Candidate ballots: everything our peers vote or accept as
        // prepared.
        let mut candidates = BallotSet::default();
        for (sender_id, msg) in self.M.iter() {
            if *sender_id == self.node_id {
                continue;
            }
            candidates = candidates.union(&msg.votes_or_accepts_prepared_set());
        }

        let accepted = self.federated_accept(|is_quorum| BallotSetPredicate {
            ballots: candidates.clone(),
            test_fn: Arc::new(move |msg: &Msg<V, ID>, ballots: &BallotSet<V>| {
                if is_quorum {
                    msg.votes_or_accepts_prepared_in(ballots)
                } else {
                    msg.accepts_prepared_in(ballots)
                }
            }),
        });
        let mut accepted_prepared = match accepted {
            Some(pred) => pred.result(),
            None => return,
        };

        if !self.B.is_zero() {
            // Exclude ballots with N > B.N. If B is unset we are still
            // nominating and P can be anything.
            while accepted_prepared.last().map_or(false, |b| b.N > self.B.N) {
                accepted_prepared.pop_last();
            }
        }
        if let Some(p) = accepted_prepared.last().cloned() {
            self.P = p;
            if !self.B.is_zero() && self.P.N == self.B.N && self.B.X < self.P.X {
                // Preserve P <= B.
                self.P.N -= 1;
            }
            if self.phase == Phase::Prepare {
                for ap in accepted_prepared.iter().rev().skip(1) {
                    if ap.N < self.P.N && ap.X != self.P.X {
                        self.PP = ap.clone();
                        break;
                    }
                }
            }
        }
    }

    // Look for commit bounds this node can accept: a blocking set accepting
    // commit, or a quorum voting for or accepting commit, of B's value in
    // some counter window. On success C and H take the narrowed bounds.
    fn update_accepts_commit_bounds(&mut self) -> bool {
        let value = match self.B.X.clone() {
            Some(value) => value,
            None => return false,
        };
        let accepted = self.federated_accept(|is_quorum| {
            let value = value.clone();
            MinMaxPredicate {
                min: 1,
                max: INFINITY,
                test_fn: Arc::new(move |msg: &Msg<V, ID>, min, max| {
                    if is_quorum {
                        msg.votes_or_accepts_commit(&value, min, max)
                    } else {
                        msg.accepts_commit(&value, min, max)
                    }
                }),
            }
        });
        if let Some(pred) = accepted {
            let (cn, hn) = pred.result();
            self.C = Ballot {
                N: cn,
                X: self.B.X.clone(),
            };
            self.H = Ballot {
                N: hn,
                X: self.B.X.clone(),
            };
            return true;
        }
        false
    }

    fn update_B(&mut self) {
        if self.B < self.H {
            // Raise B to the highest confirmed-prepared ballot.
            self.B = self.H.clone();
            self.cancel_deferred_update();
            return;
        }

        self.maybe_schedule_deferred_update();

        // If nodes forming a blocking threshold all have ballot counters
        // greater than ours, immediately raise ours to the lowest value at
        // which that is no longer the case, disabling any pending deferred
        // update along the way.
        let mut raise_value = false;
        let mut target_counter = self.B.N;
        loop {
            let floor = target_counter;
            let above_floor = |msg: &Msg<V, ID>| msg.ballot_counter() > floor;
            let (node_ids, _) = self.quorum_set.findBlockingSet(
                &self.M,
                FuncPredicate {
                    test_fn: &above_floor,
                },
            );
            if node_ids.is_empty() {
                break;
            }

            raise_value = true;
            self.cancel_deferred_update();
            let lowest_reported = node_ids
                .iter()
                .filter_map(|id| self.M.get(id))
                .map(|msg| msg.ballot_counter())
                .min()
                .unwrap_or(floor);
            if lowest_reported <= target_counter {
                break;
            }
            target_counter = lowest_reported;
        }

        if target_counter == self.B.N {
            return;
        }

        // The counter must stay below 1000 plus the slot's age in seconds.
        // If a rule would push it beyond the cap, clamp to the cap, or wait
        // for the cap to advance when already there.
        let age_secs = self.created.elapsed().as_secs();
        let max_counter = 1000u32.saturating_add(age_secs.min(u32::MAX as u64) as u32);
        if target_counter <= max_counter {
            self.B.N = target_counter;
        } else if self.B.N < max_counter {
            debug!(
                self.logger,
                "limiting ballot counter to {} (from {})", max_counter, target_counter
            );
            self.B.N = max_counter;
        } else {
            let target = max_counter.saturating_add(1);
            let ready_at = self.created + Duration::from_secs(u64::from(target - 1000));
            let wait = ready_at.saturating_duration_since(Instant::now());
            debug!(
                self.logger,
                "limiting ballot counter to {} after a {:?} wait", target, wait
            );
            thread::sleep(wait);
            self.B.N = target;
        }

        if raise_value {
            self.set_ballot_value();
            self.maybe_schedule_deferred_update();
        }
    }

    // When a node sees messages from a quorum to which it belongs such that
    // each message's ballot counter is greater than or equal to the local
    // one, it arms a timer to increment the local counter.
    fn maybe_schedule_deferred_update(&mut self) {
        if self.upd_armed {
            return;
        }

        let floor = self.B.N;
        let at_or_above_floor = |msg: &Msg<V, ID>| msg.ballot_counter() >= floor;
        let (node_ids, _) = self.quorum_set.findQuorum(
            &self.node_id,
            &self.M,
            FuncPredicate {
                test_fn: &at_or_above_floor,
            },
        );
        if node_ids.is_empty() {
            return;
        }

        self.upd_armed = true;
        self.upd_deadline =
            Some(Instant::now() + self.update_interval * self.B.N.saturating_add(1));
    }

    fn fire_deferred_update(&mut self) -> Option<Msg<V, ID>> {
        if !self.upd_armed {
            return None;
        }
        self.upd_armed = false;
        self.upd_deadline = None;

        self.B.N = self.B.N.saturating_add(1);
        self.set_ballot_value();

        if self.in_prepare_phase() {
            self.do_prepare_phase();
        }
        if self.phase == Phase::Commit {
            self.do_commit_phase();
        }

        self.response()
    }

    fn cancel_deferred_update(&mut self) {
        self.upd_armed = false;
        self.upd_deadline = None;
    }

    fn cancel_rounds(&mut self) {
        self.round_deadline = None;
        self.rounds_stopped = true;
    }

    // Pick the ballot value: the highest confirmed-prepared value, else the
    // combination of the confirmed-nominated values, else the highest
    // accepted-prepared value.
    fn set_ballot_value(&mut self) {
        if self.phase >= Phase::Commit {
            return;
        }
        if !self.H.is_zero() {
            self.B.X = self.H.X.clone();
        } else if let Some(value) = self.Z.combine(self.slot_index) {
            self.B.X = Some(value);
        } else if !self.P.is_zero() {
            self.B.X = self.P.X.clone();
        }
    }

    fn build_msg(&self) -> Option<Msg<V, ID>> {
        let topic = match self.phase {
            Phase::Nominate => {
                if self.X.is_empty() && self.Y.is_empty() {
                    return None;
                }
                Topic::Nominate(NominatePayload {
                    X: self.X.clone(),
                    Y: self.Y.clone(),
                })
            }
            Phase::NominatePrepare => Topic::NominatePrepare(
                NominatePayload {
                    X: self.X.clone(),
                    Y: self.Y.clone(),
                },
                self.prepare_payload(),
            ),
            Phase::Prepare => Topic::Prepare(self.prepare_payload()),
            Phase::Commit => Topic::Commit(CommitPayload {
                B: self.B.clone(),
                PN: self.P.N,
                HN: self.H.N,
                CN: self.C.N,
            }),
            Phase::Externalize => Topic::Externalize(ExternalizePayload {
                C: self.C.clone(),
                HN: self.H.N,
            }),
        };
        Some(Msg::new(
            self.node_id.clone(),
            self.quorum_set.clone(),
            self.slot_index,
            topic,
        ))
    }

    fn prepare_payload(&self) -> PreparePayload<V> {
        PreparePayload {
            B: self.B.clone(),
            P: self.P.clone(),
            PP: self.PP.clone(),
            HN: self.H.N,
            CN: self.C.N,
        }
    }

    // The outbound message for the slot's current state, suppressed when it
    // would repeat the last one sent.
    fn response(&mut self) -> Option<Msg<V, ID>> {
        let msg = self.build_msg()?;
        if self.last_sent.as_ref() == Some(&msg.topic) {
            return None;
        }
        self.last_sent = Some(msg.topic.clone());
        Some(msg)
    }
}

impl<V: Value, ID: GenericNodeId> ScpSlot<V, ID> for Slot<V, ID> {
    fn slot_index(&self) -> SlotIndex {
        self.slot_index
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn handle_message(&mut self, msg: &Msg<V, ID>) -> Result<Option<Msg<V, ID>>, Error> {
        self.handle(msg)
    }

    fn deferred_update(&mut self) -> Option<Msg<V, ID>> {
        self.fire_deferred_update()
    }

    fn out_msg(&self) -> Option<Msg<V, ID>> {
        self.build_msg()
    }

    fn stored_messages(&self) -> Vec<Msg<V, ID>> {
        self.M.values().cloned().collect()
    }

    fn current_round(&self) -> u32 {
        round_number(self.round_interval, self.created.elapsed())
    }

    fn last_round(&self) -> u32 {
        self.last_round
    }

    fn note_round(&mut self, round: u32, max_priority_peer: Option<ID>) {
        if let Some(peer) = max_priority_peer {
            self.max_priority_peers.insert(peer);
        }
        if round > self.last_round {
            self.last_round = round;
        }
    }

    fn rounds_active(&self) -> bool {
        !self.rounds_stopped
    }

    fn needs_round_init(&self) -> bool {
        self.last_round == 0 && !self.rounds_stopped
    }

    fn schedule_next_round(&mut self) {
        if self.rounds_stopped {
            return;
        }
        self.round_deadline =
            Some(self.created + round_offset(self.last_round + 1, self.round_interval));
    }

    fn next_deadline(&self) -> Option<Instant> {
        [self.round_deadline, self.upd_deadline]
            .iter()
            .flatten()
            .min()
            .copied()
    }

    fn due_timeouts(&mut self, now: Instant) -> Vec<SlotTimeout> {
        let mut timeouts = Vec::new();
        if self.round_deadline.map_or(false, |deadline| deadline <= now) {
            self.round_deadline = None;
            timeouts.push(SlotTimeout::NewRound);
        }
        if self.upd_deadline.map_or(false, |deadline| deadline <= now) {
            // The armed flag stays set: the fire is now in flight as a
            // command and may still be cancelled before it is processed.
            self.upd_deadline = None;
            timeouts.push(SlotTimeout::DeferredUpdate);
        }
        timeouts
    }

    fn debug_snapshot(&self) -> String {
        serde_json::to_string(&SlotState::from(self)).unwrap_or_default()
    }
}
