// Copyright (c) 2018-2022 The MobileCoin Foundation

//! The event loop that drives a node.
//!
//! A dedicated worker thread owns the [`Node`] and serializes every state
//! mutation through a command queue: inbound messages, value proposals,
//! deferred ballot updates, nomination round ticks, re-handling passes, and
//! read-only queries. Timer expiries are turned into commands by the loop
//! itself, so no timer ever touches slot state directly.
use crate::{
    core_types::{GenericNodeId, SlotIndex, Value},
    error::Error,
    msg::{ExternalizePayload, Msg},
    node::Node,
    quorum_set::QuorumSet,
    set::{NodeIdSet, ValueSet},
    slot::SlotTimeout,
};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use rand::Rng;
use slog::{crit, debug, info, warn, Logger};
use std::{
    sync::{Arc, Mutex},
    thread,
    thread::JoinHandle,
    time::Instant,
};

/// A command processed by a node's event loop.
pub enum NodeCommand<V: Value, ID: GenericNodeId = String> {
    /// An inbound protocol message.
    Incoming(Msg<V, ID>),

    /// Client-submitted values to nominate for a slot.
    Propose(SlotIndex, ValueSet<V>),

    /// A deferred ballot-counter update timer fired for a slot.
    DeferredUpdate(SlotIndex),

    /// A nomination round timer fired for a slot.
    NewRound(SlotIndex),

    /// Re-handle every stored message for a slot.
    Rehandle(SlotIndex),

    /// Re-handle every stored message of every pending slot.
    Ping,

    /// A read-only query, answered on the event loop.
    Query(Query, Sender<QueryReply<V, ID>>),

    /// Stop trigger, used for notifying the worker thread to terminate.
    Stop,
}

/// A read-only question about node state.
#[derive(Clone, Debug)]
pub enum Query {
    /// The externalized payload of a slot, if any.
    ExternalizedPayload(SlotIndex),

    /// The highest externalized slot index.
    HighestExternalized,

    /// Every reachable node id.
    AllKnown,

    /// All current messages above a slot index.
    MsgsSince(SlotIndex),

    /// A JSON snapshot of a pending slot.
    SlotDebugSnapshot(SlotIndex),
}

/// The answer to a [`Query`].
pub enum QueryReply<V: Value, ID: GenericNodeId = String> {
    /// The externalized payload of a slot, if any.
    ExternalizedPayload(Option<ExternalizePayload<V>>),

    /// The highest externalized slot index.
    HighestExternalized(Option<SlotIndex>),

    /// Every reachable node id.
    AllKnown(NodeIdSet<ID>),

    /// All current messages above a slot index.
    MsgsSince(Vec<Msg<V, ID>>),

    /// A JSON snapshot of a pending slot.
    SlotDebugSnapshot(Option<String>),
}

/// Handle to a node running on its own event-loop thread.
///
/// Producers enqueue commands and return immediately; all protocol state is
/// touched only by the worker. Outbound messages are pushed to the sink
/// passed to [`NodeRunner::spawn`].
pub struct NodeRunner<V: Value, ID: GenericNodeId = String> {
    node_id: ID,
    quorum_set: QuorumSet<ID>,
    fault_rate: Option<(u32, u32)>,
    sender: Sender<NodeCommand<V, ID>>,
    join_handle: Option<JoinHandle<()>>,
    failure: Arc<Mutex<Option<Error>>>,
    logger: Logger,
}

impl<V: Value, ID: GenericNodeId> NodeRunner<V, ID> {
    /// Spawn the event loop for `node`, emitting outbound messages on
    /// `sink`.
    pub fn spawn(node: Node<V, ID>, sink: Sender<Msg<V, ID>>, logger: Logger) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let failure = Arc::new(Mutex::new(None));

        let node_id = node.ID.clone();
        let quorum_set = node.Q.clone();
        let fault_rate = node.fault_rate;

        let worker_sender = sender.clone();
        let worker_failure = Arc::clone(&failure);
        let worker_logger = logger.clone();
        let join_handle = thread::Builder::new()
            .name(format!("scp-node-{}", node_id))
            .spawn(move || {
                let mut worker = NodeWorker {
                    node,
                    receiver,
                    sender: worker_sender,
                    sink,
                    logger: worker_logger.clone(),
                };
                if let Err(err) = worker.run() {
                    crit!(worker_logger, "node aborting: {}", err);
                    *worker_failure.lock().expect("failure lock poisoned") = Some(err);
                }
            })
            .expect("failed spawning node worker thread");

        Self {
            node_id,
            quorum_set,
            fault_rate,
            sender,
            join_handle: Some(join_handle),
            failure,
            logger,
        }
    }

    /// Local node ID.
    pub fn node_id(&self) -> &ID {
        &self.node_id
    }

    /// Local node quorum set.
    pub fn quorum_set(&self) -> &QuorumSet<ID> {
        &self.quorum_set
    }

    /// This node's peers: the flattened leaves of its quorum set, excluding
    /// itself.
    pub fn peers(&self) -> NodeIdSet<ID> {
        let mut result = self.quorum_set.nodes();
        result.remove(&self.node_id);
        result
    }

    /// Queue an inbound protocol message. Non-self messages are subject to
    /// the node's configured simulated drop probability.
    pub fn handle(&self, msg: Msg<V, ID>) {
        if msg.sender_id != self.node_id {
            if let Some((fp, fq)) = self.fault_rate {
                if fq > 0 && fp < fq && rand::thread_rng().gen_range(0..fq) < fp {
                    debug!(self.logger, "dropping message {}", msg);
                    return;
                }
            }
        }
        self.send(NodeCommand::Incoming(msg));
    }

    /// Queue values for this node to nominate for a slot.
    pub fn propose(&self, slot_index: SlotIndex, values: ValueSet<V>) {
        self.send(NodeCommand::Propose(slot_index, values));
    }

    /// Queue a re-handling pass over every pending slot.
    pub fn ping(&self) {
        self.send(NodeCommand::Ping);
    }

    /// The externalized payload for a slot, if any.
    pub fn externalized_payload(&self, slot_index: SlotIndex) -> Option<ExternalizePayload<V>> {
        match self.query(Query::ExternalizedPayload(slot_index))? {
            QueryReply::ExternalizedPayload(payload) => payload,
            _ => None,
        }
    }

    /// The index of the highest externalized slot, if any.
    pub fn highest_externalized(&self) -> Option<SlotIndex> {
        match self.query(Query::HighestExternalized)? {
            QueryReply::HighestExternalized(slot_index) => slot_index,
            _ => None,
        }
    }

    /// The complete set of reachable node ids.
    pub fn all_known(&self) -> NodeIdSet<ID> {
        match self.query(Query::AllKnown) {
            Some(QueryReply::AllKnown(nodes)) => nodes,
            _ => NodeIdSet::default(),
        }
    }

    /// All this node's current messages above a slot index.
    pub fn msgs_since(&self, since: SlotIndex) -> Vec<Msg<V, ID>> {
        match self.query(Query::MsgsSince(since)) {
            Some(QueryReply::MsgsSince(msgs)) => msgs,
            _ => Vec::new(),
        }
    }

    /// A JSON snapshot of a pending slot, for debugging.
    pub fn slot_debug_snapshot(&self, slot_index: SlotIndex) -> Option<String> {
        match self.query(Query::SlotDebugSnapshot(slot_index))? {
            QueryReply::SlotDebugSnapshot(snapshot) => snapshot,
            _ => None,
        }
    }

    /// The fatal error that stopped this node, if any.
    pub fn failure(&self) -> Option<Error> {
        self.failure.lock().expect("failure lock poisoned").clone()
    }

    /// Ask the event loop to stop without waiting for it. Useful when one
    /// owner fans a stop out to several nodes before joining any of them.
    pub fn request_stop(&self) {
        let _ = self.sender.send(NodeCommand::Stop);
    }

    /// Stop the event loop and wait for the worker to exit.
    pub fn stop(&mut self) {
        let _ = self.sender.send(NodeCommand::Stop);
        if let Some(join_handle) = self.join_handle.take() {
            if join_handle.join().is_err() {
                warn!(self.logger, "node worker thread panicked");
            }
        }
    }

    fn send(&self, command: NodeCommand<V, ID>) {
        // A send error means the worker has stopped; commands are dropped
        // like messages to a dead peer.
        let _ = self.sender.send(command);
    }

    fn query(&self, query: Query) -> Option<QueryReply<V, ID>> {
        let (reply_sender, reply_receiver) = crossbeam_channel::bounded(1);
        self.send(NodeCommand::Query(query, reply_sender));
        reply_receiver.recv().ok()
    }
}

impl<V: Value, ID: GenericNodeId> Drop for NodeRunner<V, ID> {
    fn drop(&mut self) {
        self.stop();
    }
}

// The worker owning the node. Only `run` ever touches `node`.
struct NodeWorker<V: Value, ID: GenericNodeId> {
    node: Node<V, ID>,
    receiver: Receiver<NodeCommand<V, ID>>,
    sender: Sender<NodeCommand<V, ID>>,
    sink: Sender<Msg<V, ID>>,
    logger: Logger,
}

impl<V: Value, ID: GenericNodeId> NodeWorker<V, ID> {
    fn run(&mut self) -> Result<(), Error> {
        loop {
            let command = match self.node.next_deadline() {
                Some(deadline) => match self.receiver.recv_deadline(deadline) {
                    Ok(command) => Some(command),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => return Ok(()),
                },
                None => match self.receiver.recv() {
                    Ok(command) => Some(command),
                    Err(_) => return Ok(()),
                },
            };

            match command {
                Some(command) => {
                    if !self.dispatch(command)? {
                        info!(self.logger, "stop requested, node worker exiting");
                        return Ok(());
                    }
                }
                None => self.enqueue_due_timeouts(),
            }
        }
    }

    // Turn expired slot timers into commands on our own queue, preserving
    // the single-writer command ordering.
    fn enqueue_due_timeouts(&mut self) {
        for (slot_index, timeout) in self.node.due_timeouts(Instant::now()) {
            let command = match timeout {
                SlotTimeout::NewRound => NodeCommand::NewRound(slot_index),
                SlotTimeout::DeferredUpdate => NodeCommand::DeferredUpdate(slot_index),
            };
            let _ = self.sender.send(command);
        }
    }

    // Process one command. Returns false when the loop should stop.
    fn dispatch(&mut self, command: NodeCommand<V, ID>) -> Result<bool, Error> {
        match command {
            NodeCommand::Incoming(msg) => match self.node.handle_msg(&msg) {
                Ok(outbound) => self.emit(outbound)?,
                Err(err @ Error::ConsensusFailure(..)) => return Err(err),
                Err(err) => warn!(self.logger, "dropping message {}: {}", msg, err),
            },
            NodeCommand::Propose(slot_index, values) => {
                match self.node.propose(slot_index, values) {
                    Ok(outbound) => self.emit(outbound)?,
                    Err(err @ Error::ConsensusFailure(..)) => return Err(err),
                    Err(err) => warn!(self.logger, "dropping proposal: {}", err),
                }
            }
            NodeCommand::DeferredUpdate(slot_index) => {
                let outbound = self.node.deferred_update(slot_index);
                self.emit(outbound)?;
            }
            NodeCommand::NewRound(slot_index) => {
                if self.node.new_round(slot_index) {
                    let _ = self.sender.send(NodeCommand::Rehandle(slot_index));
                }
            }
            NodeCommand::Rehandle(slot_index) => {
                for outbound in self.node.rehandle(slot_index)? {
                    self.emit(Some(outbound))?;
                }
            }
            NodeCommand::Ping => {
                for outbound in self.node.ping()? {
                    self.emit(Some(outbound))?;
                }
            }
            NodeCommand::Query(query, reply) => {
                let _ = reply.send(self.answer(query));
            }
            NodeCommand::Stop => return Ok(false),
        }
        Ok(true)
    }

    fn answer(&self, query: Query) -> QueryReply<V, ID> {
        match query {
            Query::ExternalizedPayload(slot_index) => {
                QueryReply::ExternalizedPayload(self.node.externalized_payload(slot_index).cloned())
            }
            Query::HighestExternalized => {
                QueryReply::HighestExternalized(self.node.highest_externalized())
            }
            Query::AllKnown => QueryReply::AllKnown(self.node.all_known()),
            Query::MsgsSince(since) => QueryReply::MsgsSince(self.node.msgs_since(since)),
            Query::SlotDebugSnapshot(slot_index) => {
                QueryReply::SlotDebugSnapshot(self.node.slot_debug_snapshot(slot_index))
            }
        }
    }

    fn emit(&mut self, outbound: Option<Msg<V, ID>>) -> Result<(), Error> {
        if let Some(msg) = outbound {
            self.sink.send(msg).map_err(|_| Error::SinkDisconnected)?;
        }
        Ok(())
    }
}
