// Copyright (c) 2018-2022 The MobileCoin Foundation

//! A serializable snapshot of the state held by a single slot, used for
//! debugging.

use crate::{
    core_types::{Ballot, GenericNodeId, SlotIndex, Value},
    msg::{Msg, Topic},
    set::{NodeIdSet, ValueSet},
    slot::{Phase, Slot},
};
use serde::{Deserialize, Serialize};

/// Serializable slot state used for debugging purposes.
#[derive(Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct SlotState<V: Value, ID: GenericNodeId = String> {
    /// Current slot number.
    slot_index: SlotIndex,

    /// Local node ID.
    node_id: ID,

    /// List of the newest message from each node. This is not stored as a
    /// map since that simplifies serialization; the node id is part of each
    /// message and can be derived.
    M: Vec<Msg<V, ID>>,

    /// Set of values we have voted to nominate.
    X: ValueSet<V>,

    /// Set of values we have accepted as nominated.
    Y: ValueSet<V>,

    /// Set of values we have confirmed as nominated.
    Z: ValueSet<V>,

    /// Current ballot we are trying to pass.
    B: Ballot<V>,

    /// The highest accepted-prepared ballot, zero if none.
    P: Ballot<V>,

    /// The highest accepted-prepared ballot below P with a different value,
    /// zero if none.
    PP: Ballot<V>,

    /// In Prepare: the lowest ballot that this node votes to commit, if any.
    /// In Commit: the lowest ballot that this node accepts committed, if
    /// any. In Externalize: the lowest ballot that this node confirms
    /// committed.
    C: Ballot<V>,

    /// In Prepare: the highest ballot that this node confirms prepared, if
    /// any. In Commit: the highest ballot that this node accepts committed,
    /// if any. In Externalize: the highest ballot that this node confirms
    /// committed.
    H: Ballot<V>,

    /// Current phase of the protocol.
    phase: Phase,

    /// Topic of the last message sent by us.
    last_sent: Option<Topic<V>>,

    /// Max priority peers - nodes from which we listen to value nominations.
    max_priority_peers: NodeIdSet<ID>,

    /// Latest nomination round for which priorities were computed.
    last_round: u32,
}

impl<V: Value, ID: GenericNodeId> From<&Slot<V, ID>> for SlotState<V, ID> {
    fn from(src: &Slot<V, ID>) -> Self {
        Self {
            slot_index: src.slot_index,
            node_id: src.node_id.clone(),
            M: src.M.values().cloned().collect(),
            X: src.X.clone(),
            Y: src.Y.clone(),
            Z: src.Z.clone(),
            B: src.B.clone(),
            P: src.P.clone(),
            PP: src.PP.clone(),
            C: src.C.clone(),
            H: src.H.clone(),
            phase: src.phase,
            last_sent: src.last_sent.clone(),
            max_priority_peers: src.max_priority_peers.clone(),
            last_round: src.last_round,
        }
    }
}
