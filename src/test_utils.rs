// Copyright (c) 2018-2022 The MobileCoin Foundation

//! Utilities for consensus engine tests.

// We allow dead code because not all integration tests use all of the common
// code. https://github.com/rust-lang/rust/issues/46379
#![allow(dead_code)]

use crate::core_types::{SlotIndex, Value};
use slog::{o, Discard, Logger};

/// A deterministic node id for tests.
pub fn test_node_id(n: u32) -> String {
    format!("node{}", n)
}

/// A logger that discards everything. Integration tests that want terminal
/// output build their own drain.
pub fn test_logger() -> Logger {
    Logger::root(Discard, o!())
}

// Test values combine by keeping the smaller of the two, which is
// commutative and makes a divergent nomination collapse to the minimum.

impl Value for u32 {
    fn combine(&self, other: &Self, _slot_index: SlotIndex) -> Self {
        *self.min(other)
    }

    fn as_bytes(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }
}

impl Value for String {
    fn combine(&self, other: &Self, _slot_index: SlotIndex) -> Self {
        self.min(other).clone()
    }

    fn as_bytes(&self) -> Vec<u8> {
        str::as_bytes(self).to_vec()
    }
}
