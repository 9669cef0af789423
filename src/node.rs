// Copyright (c) 2018-2022 The MobileCoin Foundation

//! A node participates in federated voting with the members of its quorum
//! set, one slot at a time.
use crate::{
    core_types::{GenericNodeId, SlotIndex, Value},
    error::Error,
    msg::{ExternalizePayload, Msg, NominatePayload, Topic},
    quorum_set::QuorumSet,
    set::{NodeIdSet, ValueSet},
    slot::{ScpSlot, Slot, SlotTimeout},
};
use sha2::{Digest, Sha256};
use slog::{debug, error, o, warn, Logger};
use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

/// Default duration of a nomination round, per the whitepaper.
pub const DEFAULT_ROUND_INTERVAL: Duration = Duration::from_secs(1);

/// Default base delay of a deferred ballot-counter update.
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(1);

/// A node participates in federated voting.
///
/// This is the synchronous protocol core: every method must be called from a
/// single task. [`crate::runner::NodeRunner`] wraps a `Node` in an event loop
/// that serializes message handling, timer fires, and round ticks through a
/// command queue.
pub struct Node<V: Value, ID: GenericNodeId = String> {
    /// Local node ID.
    pub ID: ID,

    /// Local node quorum set. Does not include the local node, which is
    /// understood to belong to every one of its slices.
    pub Q: QuorumSet<ID>,

    /// Slots currently undergoing nomination and balloting.
    pub(crate) pending: BTreeMap<SlotIndex, Box<dyn ScpSlot<V, ID>>>,

    /// Externalized payloads for slots that have completed balloting.
    pub(crate) externalized: BTreeMap<SlotIndex, ExternalizePayload<V>>,

    /// Trace counter stamped onto outbound messages.
    msg_counter: u64,

    /// Duration of a nomination round. Configure before handling messages.
    pub round_interval: Duration,

    /// Base delay of a deferred ballot-counter update. Configure before
    /// handling messages.
    pub update_interval: Duration,

    /// Optional simulated message drop as a probability `FP / FQ`, applied
    /// by the event loop to non-self inbound messages.
    pub fault_rate: Option<(u32, u32)>,

    logger: Logger,
}

impl<V: Value, ID: GenericNodeId> Node<V, ID> {
    /// Creates a new node.
    ///
    /// # Arguments
    /// * `node_id` - This node's ID.
    /// * `quorum_set` - This node's quorum set, not naming the node itself.
    /// * `externalized` - Previously externalized slots, for a node that is
    ///   rejoining; empty for a fresh node.
    /// * `logger`
    pub fn new(
        node_id: ID,
        quorum_set: QuorumSet<ID>,
        externalized: BTreeMap<SlotIndex, ExternalizePayload<V>>,
        logger: Logger,
    ) -> Self {
        let logger = logger.new(o!("node" => node_id.to_string()));
        Self {
            ID: node_id,
            Q: quorum_set,
            pending: BTreeMap::new(),
            externalized,
            msg_counter: 0,
            round_interval: DEFAULT_ROUND_INTERVAL,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            fault_rate: None,
            logger,
        }
    }

    /// Handle an incoming message. Returns the outbound response, if any.
    ///
    /// A fatal [`Error::ConsensusFailure`] is returned when the message is
    /// an Externalize that disagrees with a value this node has already
    /// externalized for the same slot.
    pub fn handle_msg(&mut self, msg: &Msg<V, ID>) -> Result<Option<Msg<V, ID>>, Error> {
        if let Some(ours) = self.externalized.get(&msg.slot_index) {
            // This node has already externalized a value for the given slot.
            // Resend our Externalize, unless the inbound message is also an
            // Externalize.
            if let Topic::Externalize(theirs) = &msg.topic {
                if theirs.C.X != ours.C.X {
                    return Err(Error::ConsensusFailure(
                        msg.slot_index,
                        ours.C.to_string(),
                        theirs.C.to_string(),
                    ));
                }
                return Ok(None);
            }
            let echo = Msg::new(
                self.ID.clone(),
                self.Q.clone(),
                msg.slot_index,
                Topic::Externalize(ours.clone()),
            );
            return Ok(Some(self.stamp(echo)));
        }

        self.get_or_create_pending_slot(msg.slot_index);
        self.ensure_slot_rounds(msg.slot_index);

        let outbound = self
            .pending
            .get_mut(&msg.slot_index)
            .unwrap()
            .handle_message(msg)?;
        Ok(self.finish_outbound(outbound))
    }

    /// Propose values for this node to nominate for the given slot. The
    /// proposal is only propagated if this node holds the max priority among
    /// its neighbors for the slot's current nomination round.
    pub fn propose(
        &mut self,
        slot_index: SlotIndex,
        values: ValueSet<V>,
    ) -> Result<Option<Msg<V, ID>>, Error> {
        if values.is_empty() {
            error!(self.logger, "propose called with no values");
            return Ok(None);
        }
        let msg = Msg::new(
            self.ID.clone(),
            self.Q.clone(),
            slot_index,
            Topic::Nominate(NominatePayload::new_with_votes(values)),
        );
        self.handle_msg(&msg)
    }

    /// Fire a pending deferred ballot-counter update for a slot.
    pub fn deferred_update(&mut self, slot_index: SlotIndex) -> Option<Msg<V, ID>> {
        let outbound = self.pending.get_mut(&slot_index)?.deferred_update();
        self.finish_outbound(outbound)
    }

    /// Advance a slot's nomination rounds to the current round, extending
    /// its max-priority peers. Returns true when the slot's stored messages
    /// should be re-handled against the updated priorities.
    pub fn new_round(&mut self, slot_index: SlotIndex) -> bool {
        let (active, needs_init, current, last) = match self.pending.get(&slot_index) {
            Some(slot) => (
                slot.rounds_active(),
                slot.needs_round_init(),
                slot.current_round(),
                slot.last_round(),
            ),
            None => return false,
        };
        if !active {
            return false;
        }
        if needs_init {
            self.ensure_slot_rounds(slot_index);
            return self
                .pending
                .get(&slot_index)
                .map_or(false, |slot| !slot.needs_round_init());
        }

        let mut round_peers = Vec::new();
        for round in (last + 1)..=current {
            match self.max_priority_peer(slot_index, round) {
                Ok(peer) => round_peers.push((round, peer)),
                Err(err) => {
                    warn!(
                        self.logger,
                        "slot {}: cannot compute round {} priorities: {}",
                        slot_index,
                        round,
                        err
                    );
                    break;
                }
            }
        }

        match self.pending.get_mut(&slot_index) {
            Some(slot) => {
                for (round, peer) in round_peers {
                    slot.note_round(round, peer);
                }
                slot.schedule_next_round();
                true
            }
            None => false,
        }
    }

    /// Re-handle every stored message for a slot, e.g. after its priorities
    /// changed. Returns the outbound messages produced.
    pub fn rehandle(&mut self, slot_index: SlotIndex) -> Result<Vec<Msg<V, ID>>, Error> {
        let msgs = match self.pending.get(&slot_index) {
            Some(slot) => slot.stored_messages(),
            None => return Ok(Vec::new()),
        };
        let mut outbound = Vec::new();
        for msg in msgs {
            if let Some(out) = self.handle_msg(&msg)? {
                outbound.push(out);
            }
        }
        Ok(outbound)
    }

    /// Re-handle every stored message of every pending slot.
    pub fn ping(&mut self) -> Result<Vec<Msg<V, ID>>, Error> {
        let slot_indexes: Vec<SlotIndex> = self.pending.keys().copied().collect();
        let mut outbound = Vec::new();
        for slot_index in slot_indexes {
            outbound.extend(self.rehandle(slot_index)?);
        }
        Ok(outbound)
    }

    /// The earliest pending timer deadline across all slots.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .filter_map(|slot| slot.next_deadline())
            .min()
    }

    /// Take the timer expiries due at `now` across all slots.
    pub fn due_timeouts(&mut self, now: Instant) -> Vec<(SlotIndex, SlotTimeout)> {
        let mut due = Vec::new();
        for (slot_index, slot) in self.pending.iter_mut() {
            for timeout in slot.due_timeouts(now) {
                due.push((*slot_index, timeout));
            }
        }
        due
    }

    /// A flattened, uniquified list of the node IDs in this node's quorum
    /// slices, not including this node's own ID.
    pub fn peers(&self) -> NodeIdSet<ID> {
        let mut result = self.Q.nodes();
        result.remove(&self.ID);
        result
    }

    /// The complete set of reachable node IDs: this node's peers plus every
    /// node named by a quorum set in a stored message. Excludes this node.
    pub fn all_known(&self) -> NodeIdSet<ID> {
        let mut result = self.peers();
        for slot in self.pending.values() {
            for msg in slot.stored_messages() {
                result = result.union(&msg.quorum_set.nodes());
            }
        }
        result.remove(&self.ID);
        result
    }

    /// The index of the highest slot for which this node has externalized a
    /// value.
    pub fn highest_externalized(&self) -> Option<SlotIndex> {
        self.externalized.keys().next_back().copied()
    }

    /// The externalized payload for a slot, if any.
    pub fn externalized_payload(&self, slot_index: SlotIndex) -> Option<&ExternalizePayload<V>> {
        self.externalized.get(&slot_index)
    }

    /// All this node's current messages with a slot index greater than
    /// `since`: a re-built Externalize per externalized slot, and the
    /// current statement of every pending slot. Used for replication.
    pub fn msgs_since(&self, since: SlotIndex) -> Vec<Msg<V, ID>> {
        let mut result = Vec::new();
        for (slot_index, payload) in self.externalized.range(since + 1..) {
            result.push(Msg::new(
                self.ID.clone(),
                self.Q.clone(),
                *slot_index,
                Topic::Externalize(payload.clone()),
            ));
        }
        for (_, slot) in self.pending.range(since + 1..) {
            if let Some(msg) = slot.out_msg() {
                result.push(msg);
            }
        }
        result
    }

    /// A JSON snapshot of a pending slot's state, for debugging.
    pub fn slot_debug_snapshot(&self, slot_index: SlotIndex) -> Option<String> {
        self.pending
            .get(&slot_index)
            .map(|slot| slot.debug_snapshot())
    }

    /// The fraction of this node's quorum slices containing `node_id`, as a
    /// `(numerator, denominator)` rational. The node itself has weight 1.
    pub fn weight(&self, node_id: &ID) -> (u32, u32) {
        if *node_id == self.ID {
            return (1, 1);
        }
        self.Q.weight(node_id)
    }

    /// A node- and slot-specific 32-byte hash of `m`, seeded with the
    /// previous slot's externalized value. It is an error to call this for
    /// slot i > 1 before this node has externalized a value for slot i-1.
    pub fn slot_hash(&self, slot_index: SlotIndex, m: &[u8]) -> Result<[u8; 32], Error> {
        let mut hasher = Sha256::new();
        hasher.update(slot_index.to_be_bytes());
        if slot_index > 1 {
            let prev = self
                .externalized
                .get(&(slot_index - 1))
                .ok_or(Error::NoPreviousValue(slot_index))?;
            if let Some(value) = &prev.C.X {
                hasher.update(value.as_bytes());
            }
        }
        hasher.update(m);
        Ok(hasher.finalize().into())
    }

    /// A deterministic subset of this node's peers (which may include
    /// itself), specific to a slot and nomination round: the nodes whose
    /// per-round hash falls below their weight-scaled threshold.
    pub fn neighbors(&self, slot_index: SlotIndex, round: u32) -> Result<NodeIdSet<ID>, Error> {
        let mut candidates = self.peers();
        candidates.insert(self.ID.clone());

        let mut result = NodeIdSet::default();
        for node_id in candidates.iter() {
            let (num, denom) = self.weight(node_id);
            let threshold = weight_threshold_bytes(num, denom);
            let hash = self.slot_hash(slot_index, &hash_input(b'N', round, node_id))?;
            if hash < threshold {
                result.insert(node_id.clone());
            }
        }
        Ok(result)
    }

    /// A priority for a peer node, specific to a slot and nomination round:
    /// a 256-bit big-endian integer expressed as 32 bytes.
    pub fn priority(
        &self,
        slot_index: SlotIndex,
        round: u32,
        node_id: &ID,
    ) -> Result<[u8; 32], Error> {
        self.slot_hash(slot_index, &hash_input(b'P', round, node_id))
    }

    /// The neighbor with the lexicographically largest priority for the
    /// given slot and round, if the round has any neighbors.
    pub fn max_priority_peer(
        &self,
        slot_index: SlotIndex,
        round: u32,
    ) -> Result<Option<ID>, Error> {
        let neighbors = self.neighbors(slot_index, round)?;
        let mut best: Option<([u8; 32], ID)> = None;
        for node_id in neighbors.iter() {
            let priority = self.priority(slot_index, round, node_id)?;
            if best
                .as_ref()
                .map_or(true, |(best_priority, _)| priority > *best_priority)
            {
                best = Some((priority, node_id.clone()));
            }
        }
        Ok(best.map(|(_, node_id)| node_id))
    }

    // Create the slot if necessary.
    fn get_or_create_pending_slot(&mut self, slot_index: SlotIndex) {
        if !self.pending.contains_key(&slot_index) {
            let slot = Slot::new(
                self.ID.clone(),
                self.Q.clone(),
                slot_index,
                self.round_interval,
                self.update_interval,
                self.logger.clone(),
            );
            self.pending.insert(slot_index, Box::new(slot));
        }
    }

    // Supply round-1 priorities to a slot that does not have them yet. This
    // can fail (and is retried on later events) when the previous slot has
    // not externalized.
    fn ensure_slot_rounds(&mut self, slot_index: SlotIndex) {
        let needs_init = self
            .pending
            .get(&slot_index)
            .map_or(false, |slot| slot.needs_round_init());
        if !needs_init {
            return;
        }
        match self.max_priority_peer(slot_index, 1) {
            Ok(peer) => {
                let slot = self.pending.get_mut(&slot_index).unwrap();
                slot.note_round(1, peer);
                slot.schedule_next_round();
            }
            Err(err) => {
                debug!(
                    self.logger,
                    "slot {}: round-1 priorities not yet available: {}", slot_index, err
                );
            }
        }
    }

    // Record an externalized slot and stamp the outbound message.
    fn finish_outbound(&mut self, outbound: Option<Msg<V, ID>>) -> Option<Msg<V, ID>> {
        let msg = outbound?;
        if let Topic::Externalize(payload) = &msg.topic {
            debug!(
                self.logger,
                "slot {} externalized {}", msg.slot_index, payload.C
            );
            self.externalized.insert(msg.slot_index, payload.clone());
            self.pending.remove(&msg.slot_index);
        }
        Some(self.stamp(msg))
    }

    fn stamp(&mut self, mut msg: Msg<V, ID>) -> Msg<V, ID> {
        self.msg_counter += 1;
        msg.counter = self.msg_counter;
        msg
    }
}

// The message bytes hashed for neighbor selection ('N') and priorities
// ('P'): the tag, the big-endian round number, and the node id's display
// form.
fn hash_input<ID: GenericNodeId>(tag: u8, round: u32, node_id: &ID) -> Vec<u8> {
    let mut result = vec![tag];
    result.extend_from_slice(&round.to_be_bytes());
    result.extend_from_slice(node_id.to_string().as_bytes());
    result
}

// floor(num * 2^256 / denom) as a 32-byte big-endian integer, computed by
// byte-wise long division; all-ones when num >= denom. A node is a neighbor
// when its per-round hash falls below this threshold.
fn weight_threshold_bytes(num: u32, denom: u32) -> [u8; 32] {
    if denom == 0 || num >= denom {
        return [0xff; 32];
    }
    let mut result = [0u8; 32];
    let mut remainder = u64::from(num);
    for byte in result.iter_mut() {
        let current = remainder * 256;
        *byte = (current / u64::from(denom)) as u8;
        remainder = current % u64::from(denom);
    }
    result
}
