// Copyright (c) 2018-2022 The MobileCoin Foundation

//! Thread-based simulation for consensus networks.
//!
//! Every node runs on its own event loop; a router thread per node
//! broadcasts its outbound messages to all the other nodes.

use crossbeam_channel::Receiver;
use scp_engine::{ExternalizePayload, Msg, Node, NodeRunner, QuorumSet, ValueSet};
use slog::{o, Drain, Logger};
use std::{
    collections::BTreeMap,
    sync::Arc,
    thread,
    thread::JoinHandle,
    time::{Duration, Instant},
};

/// How long a test waits for every node to externalize a slot.
pub const TEST_DEADLINE: Duration = Duration::from_secs(30);

/// A short timebase so that nomination rounds and deferred updates fire
/// quickly under test.
pub const TEST_TIMEBASE: Duration = Duration::from_millis(50);

/// A network of nodes exchanging consensus messages over threads.
pub struct SCPNetwork {
    names: Vec<String>,
    runners: Arc<Vec<NodeRunner<String, String>>>,
    router_handles: Vec<JoinHandle<()>>,
}

impl SCPNetwork {
    /// Build and start a network from `(node_id, quorum_set)` pairs.
    pub fn new(configs: Vec<(String, QuorumSet<String>)>, logger: Logger) -> Self {
        let mut names = Vec::new();
        let mut runners = Vec::new();
        let mut outboxes: Vec<Receiver<Msg<String, String>>> = Vec::new();

        for (node_id, quorum_set) in configs {
            let mut node = Node::new(
                node_id.clone(),
                quorum_set,
                BTreeMap::new(),
                logger.new(o!()),
            );
            node.round_interval = TEST_TIMEBASE;
            node.update_interval = TEST_TIMEBASE;

            let (sink, outbox) = crossbeam_channel::unbounded();
            names.push(node_id);
            runners.push(NodeRunner::spawn(node, sink, logger.new(o!())));
            outboxes.push(outbox);
        }

        let runners = Arc::new(runners);

        // One router per node: broadcast everything it emits to every other
        // node. The router exits when the node's worker drops its sink.
        let mut router_handles = Vec::new();
        for (index, outbox) in outboxes.into_iter().enumerate() {
            let runners = Arc::clone(&runners);
            router_handles.push(thread::spawn(move || {
                while let Ok(msg) = outbox.recv() {
                    for (peer_index, peer) in runners.iter().enumerate() {
                        if peer_index != index {
                            peer.handle(msg.clone());
                        }
                    }
                }
            }));
        }

        Self {
            names,
            runners,
            router_handles,
        }
    }

    /// Number of nodes in the network.
    pub fn len(&self) -> usize {
        self.runners.len()
    }

    /// Submit values to one node.
    pub fn propose(&self, index: usize, slot_index: u64, values: &[&str]) {
        let values: ValueSet<String> = values.iter().map(|value| value.to_string()).collect();
        self.runners[index].propose(slot_index, values);
    }

    /// The externalized payload of a slot at one node, if any.
    pub fn externalized(&self, index: usize, slot_index: u64) -> Option<ExternalizePayload<String>> {
        self.runners[index].externalized_payload(slot_index)
    }

    /// Wait until every node has externalized the slot, panicking on the
    /// test deadline or on a node failure. Returns one payload per node.
    pub fn wait_for_externalization(&self, slot_index: u64) -> Vec<ExternalizePayload<String>> {
        let deadline = Instant::now() + TEST_DEADLINE;
        loop {
            for (index, runner) in self.runners.iter().enumerate() {
                if let Some(failure) = runner.failure() {
                    panic!("node {} aborted: {}", self.names[index], failure);
                }
            }

            let payloads: Vec<_> = self
                .runners
                .iter()
                .filter_map(|runner| runner.externalized_payload(slot_index))
                .collect();
            if payloads.len() == self.runners.len() {
                return payloads;
            }

            assert!(
                Instant::now() < deadline,
                "slot {} was not externalized everywhere within {:?}",
                slot_index,
                TEST_DEADLINE,
            );
            thread::sleep(Duration::from_millis(20));
        }
    }
}

impl Drop for SCPNetwork {
    fn drop(&mut self) {
        for runner in self.runners.iter() {
            runner.request_stop();
        }
        for handle in self.router_handles.drain(..) {
            let _ = handle.join();
        }
    }
}

/// A full mesh of `n` nodes where each trusts `k` of the `n - 1` others.
pub fn mesh_configs(n: u32, k: u32) -> Vec<(String, QuorumSet<String>)> {
    (0..n)
        .map(|index| {
            let others: Vec<String> = (0..n)
                .filter(|other| *other != index)
                .map(|other| format!("node{}", other))
                .collect();
            (format!("node{}", index), QuorumSet::new_with_node_ids(k, others))
        })
        .collect()
}

/// A logger writing to stderr when `SCP_TEST_LOG` is set, and discarding
/// everything otherwise.
pub fn test_network_logger() -> Logger {
    if std::env::var("SCP_TEST_LOG").is_ok() {
        let decorator = slog_term::PlainSyncDecorator::new(std::io::stderr());
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        Logger::root(drain, o!())
    } else {
        Logger::root(slog::Discard, o!())
    }
}
