// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection runtimes.
//!
//! A transport decides who moves bytes and when: which thread drains the
//! socket, how a thread waits for room to write, and what happens to
//! requests nobody is waiting to run. The protocol itself (encoding,
//! decoding, dispatch) lives in [`crate::connection`] and is the same for
//! every transport.
//!
//! # Threads
//!
//! ```text
//! +------------------+      +-------------------------------------+
//! |  calling thread  |      |  driver thread                      |
//! |  flush_port()    |<---->|  poll -> read -> decode -> deliver  |
//! |  wait_port()     | lock |  send releases                      |
//! +------------------+      +-------------------------------------+
//!                              |
//!          SocketTransport:    +-- serves idle ports itself
//!          StreamTransport:    +-- starts a thread per busy port
//! ```

mod byte_stream;
mod reactor;
mod socket;
mod stream;

pub use byte_stream::ByteStream;
pub(crate) use socket::SocketTransport;
pub(crate) use stream::StreamTransport;

use crate::connection::{Directory, Shared};
use crate::error::RopResult;
use crate::frame::message::MessageWriter;
use crate::frame::{Continuation, Fixed};
use crate::port::PortId;
use crate::wire::Buffer;
use parking_lot::MutexGuard;
use std::thread::{self, ThreadId};

/// Runtime policy plugged into a connection.
///
/// Every method that takes the guard may release and re-acquire it; callers
/// must not keep references into the directory across the call.
pub(crate) trait Transport: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Body of the driver thread; returns once the connection is down.
    fn drive(&self, shared: &Shared);

    /// Write every message queued on `port`, in order.
    fn flush_port(
        &self,
        shared: &Shared,
        g: &mut MutexGuard<'_, Directory>,
        port: PortId,
    ) -> RopResult<()>;

    /// Block until something may have landed on `port` (or a timeout).
    fn wait_port(
        &self,
        shared: &Shared,
        g: &mut MutexGuard<'_, Directory>,
        port: PortId,
    ) -> RopResult<()>;

    /// A request is queued on a port with no thread waiting on it.
    fn notify_unhandled_request(
        &self,
        shared: &Shared,
        g: &mut MutexGuard<'_, Directory>,
        port: PortId,
    );

    /// Interrupt a blocking poll. Callable from any thread, lock held or not.
    fn wake(&self);

    /// Stop the driver; pending and future calls fail.
    fn shutdown(&self);
}

/// Message being encoded into the outbound buffer.
pub(crate) struct Encoding {
    pub writer: MessageWriter,
    pub stack: Continuation,
}

/// Byte-level state of the stream, guarded by the connection lock.
pub(crate) struct Wire {
    /// Bytes read and not yet decoded
    pub inbound: Buffer,
    /// Port prefix of the next inbound message
    pub in_prefix: Fixed,
    /// Port the message being decoded belongs to
    pub in_port: Option<PortId>,
    /// Encoded bytes waiting for the socket
    pub outbound: Buffer,
    pub encoding: Option<Encoding>,
    /// A thread owns the send slot
    pub sending: bool,
    /// The connection is going down; no more reads, no blocking writes
    pub closing: bool,
    /// Bumped on every writable event
    pub writable_epoch: u64,
    pub driver: Option<ThreadId>,
}

impl Wire {
    pub fn new(send_buffer: usize) -> Self {
        Self {
            inbound: Buffer::new(),
            in_prefix: Fixed::default(),
            in_port: None,
            outbound: Buffer::with_limit(send_buffer),
            encoding: None,
            sending: false,
            closing: false,
            writable_epoch: 0,
            driver: None,
        }
    }

    /// True on the driver thread.
    pub fn is_driver(&self) -> bool {
        self.driver == Some(thread::current().id())
    }
}
