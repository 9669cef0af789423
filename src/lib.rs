// Copyright (c) 2018-2022 The MobileCoin Foundation

#![recursion_limit = "1024"]
#![doc = include_str!("../README.md")]
#![allow(non_snake_case)]
#![deny(missing_docs)]

pub mod core_types;
pub mod error;
pub mod msg;
pub mod node;
pub mod predicates;
pub mod quorum_set;
pub mod runner;
pub mod set;
pub mod slot;
pub mod slot_state;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

#[doc(inline)]
pub use self::{
    core_types::{Ballot, GenericNodeId, SlotIndex, Value},
    error::Error,
    msg::{
        CommitPayload, ExternalizePayload, Msg, NominatePayload, PreparePayload, Topic, INFINITY,
    },
    node::Node,
    predicates::{
        BallotSetPredicate, FuncPredicate, MinMaxPredicate, Predicate, ValueSetPredicate,
    },
    quorum_set::{QuorumSet, QuorumSetMember},
    runner::{NodeCommand, NodeRunner, Query, QueryReply},
    set::{BallotSet, NodeIdSet, OrdSet, ValueSet},
    slot::{MockScpSlot, Phase, ScpSlot, Slot, SlotTimeout},
    slot_state::SlotState,
};
