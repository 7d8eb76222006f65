// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ports: logical duplex channels multiplexed over one connection.
//!
//! A positive port id was opened by this side, a negative one by the peer.
//! Each port carries its own inbound request queue and its own ordered
//! list of outstanding calls, so threads talking over different ports never
//! see each other's replies.

use crate::error::RopResult;
use crate::frame::message::{InboundRequest, MessageReader, MessageWriter};
use crate::frame::Continuation;
use crate::value::{Shape, Value};
use parking_lot::Condvar;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::thread::ThreadId;

/// Signed port identifier.
pub type PortId = i32;

/// An outstanding call waiting for its Return.
#[derive(Debug)]
pub struct Expected {
    pub ticket: u64,
    pub results: &'static [Shape],
}

/// Outstanding calls of one port.
///
/// Replies are matched in send order. Serving an inbound request opens a
/// new level: calls issued while serving must be answered before the
/// request being served can be, so they are matched first.
#[derive(Debug, Default)]
pub struct ReturnQueue {
    levels: Vec<VecDeque<Expected>>,
}

impl ReturnQueue {
    /// Append an expectation to the innermost level.
    pub fn push(&mut self, expected: Expected) {
        if self.levels.is_empty() {
            self.levels.push(VecDeque::new());
        }
        if let Some(level) = self.levels.last_mut() {
            level.push_back(expected);
        }
    }

    /// Open a nested level (a request on this port is being served).
    pub fn enter(&mut self) {
        self.levels.push(VecDeque::new());
    }

    /// Close the innermost level.
    pub fn leave(&mut self) {
        if let Some(level) = self.levels.pop() {
            if !level.is_empty() {
                log::warn!(
                    "rop port: {} expectations abandoned when leaving a nested call",
                    level.len()
                );
            }
        }
        while matches!(self.levels.last(), Some(level) if level.is_empty()) {
            self.levels.pop();
        }
    }

    /// Oldest expectation of the innermost non-empty level.
    pub fn claim(&mut self) -> Option<Expected> {
        self.levels
            .iter_mut()
            .rev()
            .find(|level| !level.is_empty())
            .and_then(|level| level.pop_front())
    }

    pub fn len(&self) -> usize {
        self.levels.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(VecDeque::is_empty)
    }
}

/// Partially decoded inbound message.
#[derive(Default)]
pub struct Decoding {
    pub reader: MessageReader,
    pub stack: Continuation,
}

/// One logical channel.
pub struct Port {
    pub id: PortId,
    /// Decoded requests not yet executed, in arrival order
    pub requests: VecDeque<InboundRequest>,
    /// Calls waiting for a Return
    pub returns: ReturnQueue,
    /// Returns that arrived, by ticket
    pub completed: HashMap<u64, RopResult<Value>>,
    /// Messages queued for the wire
    pub outbound: VecDeque<MessageWriter>,
    /// Message being decoded
    pub decoding: Option<Decoding>,
    /// Last request executed here: (skeleton id, method index)
    pub last_request: Option<(i32, u16)>,
    /// Threads blocked on this port, willing to run its requests
    pub waiters: usize,
    /// Requests of this port currently executing
    pub serving: usize,
    /// A thread was started to run this port's requests
    pub processor: bool,
    /// Signalled when a Return or Request lands on this port
    pub wake: Arc<Condvar>,
}

impl Port {
    pub fn new(id: PortId) -> Self {
        Self {
            id,
            requests: VecDeque::new(),
            returns: ReturnQueue::default(),
            completed: HashMap::new(),
            outbound: VecDeque::new(),
            decoding: None,
            last_request: None,
            waiters: 0,
            serving: 0,
            processor: false,
            wake: Arc::new(Condvar::new()),
        }
    }

    /// A waiting thread will run requests queued here.
    pub fn willing_to_serve(&self) -> bool {
        self.waiters > 0
    }

    pub fn is_idle(&self) -> bool {
        self.requests.is_empty()
            && self.returns.is_empty()
            && self.completed.is_empty()
            && self.outbound.is_empty()
            && self.decoding.is_none()
            && self.waiters == 0
            && self.serving == 0
            && !self.processor
    }

    /// One-line state summary for diagnostics.
    pub fn summary(&self) -> String {
        let last = match self.last_request {
            Some((target, method)) => format!("object {} method {}", target, method),
            None => "none".to_string(),
        };
        format!(
            "port {}: {} queued, {} outstanding, last request {}",
            self.id,
            self.requests.len(),
            self.returns.len(),
            last
        )
    }
}

/// All ports of a connection plus thread bindings.
///
/// A thread keeps its own port for as long as it lives, so its calls stay
/// ordered with respect to each other. Once the thread is gone the id goes
/// back to a free pool and is handed to the next thread that calls.
pub struct PortTable {
    ports: BTreeMap<PortId, Port>,
    next_local: PortId,
    next_ticket: u64,
    /// Port each thread opened for its own calls
    defaults: HashMap<ThreadId, PortId>,
    /// Reverse of `defaults`
    owners: HashMap<PortId, ThreadId>,
    /// Local ids no thread holds
    free: BTreeSet<PortId>,
    /// Ports whose requests a thread is executing, innermost last
    serving: HashMap<ThreadId, Vec<PortId>>,
}

impl PortTable {
    pub fn new() -> Self {
        Self {
            ports: BTreeMap::new(),
            next_local: 1,
            next_ticket: 1,
            defaults: HashMap::new(),
            owners: HashMap::new(),
            free: BTreeSet::new(),
            serving: HashMap::new(),
        }
    }

    /// Port `id`, created on first use.
    pub fn activate(&mut self, id: PortId) -> &mut Port {
        self.ports.entry(id).or_insert_with(|| {
            log::trace!("rop port: activated {}", id);
            Port::new(id)
        })
    }

    pub fn get(&self, id: PortId) -> Option<&Port> {
        self.ports.get(&id)
    }

    pub fn get_mut(&mut self, id: PortId) -> Option<&mut Port> {
        self.ports.get_mut(&id)
    }

    /// The port `thread` opened for its own calls.
    pub fn default_for(&mut self, thread: ThreadId) -> PortId {
        if let Some(id) = self.defaults.get(&thread) {
            return *id;
        }
        let id = match self.free.pop_first() {
            Some(id) => id,
            None => {
                let id = self.next_local;
                self.next_local = self.next_local.checked_add(1).unwrap_or(1);
                id
            }
        };
        self.defaults.insert(thread, id);
        self.owners.insert(id, thread);
        self.activate(id);
        id
    }

    /// True once `thread` holds a port of its own.
    pub fn is_bound(&self, thread: ThreadId) -> bool {
        self.defaults.contains_key(&thread)
    }

    /// Forget `thread`: its port is released as soon as nothing refers to it.
    pub fn unbind(&mut self, thread: ThreadId) {
        self.serving.remove(&thread);
        if let Some(id) = self.defaults.remove(&thread) {
            self.owners.remove(&id);
            log::trace!("rop port: {} unbound from its thread", id);
            self.release_if_idle(id);
        }
    }

    /// Port a call from `thread` goes out on: the port of the request it
    /// is serving, so nested calls chain back to the caller, else its own.
    pub fn current_for(&mut self, thread: ThreadId) -> PortId {
        match self.serving.get(&thread).and_then(|stack| stack.last()) {
            Some(id) => *id,
            None => self.default_for(thread),
        }
    }

    pub fn push_serving(&mut self, thread: ThreadId, id: PortId) {
        self.serving.entry(thread).or_default().push(id);
    }

    pub fn pop_serving(&mut self, thread: ThreadId) {
        if let Some(stack) = self.serving.get_mut(&thread) {
            stack.pop();
            if stack.is_empty() {
                self.serving.remove(&thread);
            }
        }
    }

    pub fn next_ticket(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ticket
    }

    /// Queue an outbound expectation on `id`; returns its ticket.
    pub fn expect(&mut self, id: PortId, results: &'static [Shape]) -> u64 {
        let ticket = self.next_ticket();
        self.activate(id).returns.push(Expected { ticket, results });
        ticket
    }

    /// Drop a port no thread holds once nothing refers to it.
    pub fn release_if_idle(&mut self, id: PortId) {
        if self.owners.contains_key(&id) || !self.ports.get(&id).is_some_and(Port::is_idle) {
            return;
        }
        self.ports.remove(&id);
        // Only ids this side handed out go back to the pool.
        if id > 0 && id < self.next_local {
            self.free.insert(id);
        }
        log::trace!("rop port: released {}", id);
    }

    /// Ports with queued requests and nobody executing them.
    pub fn unattended(&self) -> Vec<PortId> {
        self.ports
            .values()
            .filter(|p| {
                !p.requests.is_empty() && p.waiters == 0 && p.serving == 0 && !p.processor
            })
            .map(|p| p.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Port> {
        self.ports.values()
    }
}

impl Default for PortTable {
    fn default() -> Self {
        Self::new()
    }
}
