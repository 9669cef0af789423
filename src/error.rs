// Copyright (c) 2018-2022 The MobileCoin Foundation

//! Error types surfaced by the consensus engine.

use crate::core_types::SlotIndex;
use displaydoc::Display;

/// An error encountered while running the consensus protocol.
///
/// Protocol-level errors (malformed messages, missing prerequisites) are
/// recoverable: the engine logs them and drops the offending input. The
/// single fatal condition is [`Error::ConsensusFailure`], which indicates a
/// broken federation topology and aborts the node.
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum Error {
    /// Invalid message: {0}
    InvalidMessage(String),

    /// No externalized value for the slot preceding {0}
    NoPreviousValue(SlotIndex),

    /// Slot {0} externalized {1} but a peer externalized {2}
    ConsensusFailure(SlotIndex, String, String),

    /// The outbound message sink is disconnected
    SinkDisconnected,
}

impl std::error::Error for Error {}
