// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Socket runtime: one driver thread per connection.
//!
//! The driver polls the stream with mio, reads whatever arrives, decodes it
//! and runs requests no other thread is waiting to run. Calling threads
//! write their own messages and sleep on their port's condvar; they never
//! touch the poller. A servant running on the driver that blocks on a
//! nested call keeps the driver pumping from inside that call.

use super::reactor::Reactor;
use super::{ByteStream, Transport};
use crate::config::ConnectionConfig;
use crate::connection::{Directory, Shared};
use crate::error::RopResult;
use crate::port::PortId;
use parking_lot::MutexGuard;
use std::io;

pub(crate) struct SocketTransport {
    io: Reactor,
}

impl SocketTransport {
    pub fn new(stream: Box<dyn ByteStream>, config: &ConnectionConfig) -> io::Result<Self> {
        Ok(Self {
            io: Reactor::new(stream, config)?,
        })
    }

    /// Driver step: poll, read, decode, send pending releases and run
    /// unattended requests.
    fn pump(&self, shared: &Shared, g: &mut MutexGuard<'_, Directory>) -> RopResult<()> {
        self.io.pump_io(shared, g)?;
        shared.send_releases(g)?;
        shared.serve_unattended(g)
    }
}

impl Transport for SocketTransport {
    fn name(&self) -> &'static str {
        "socket"
    }

    fn drive(&self, shared: &Shared) {
        self.io.run(shared, |g| self.pump(shared, g));
    }

    fn flush_port(
        &self,
        shared: &Shared,
        g: &mut MutexGuard<'_, Directory>,
        port: PortId,
    ) -> RopResult<()> {
        self.io.flush_port(shared, g, port)
    }

    fn wait_port(
        &self,
        shared: &Shared,
        g: &mut MutexGuard<'_, Directory>,
        port: PortId,
    ) -> RopResult<()> {
        if g.wire.is_driver() {
            return self.pump(shared, g);
        }
        self.io.wait_on_port(g, port);
        Ok(())
    }

    fn notify_unhandled_request(
        &self,
        _shared: &Shared,
        _g: &mut MutexGuard<'_, Directory>,
        port: PortId,
    ) {
        log::trace!("rop driver: request on port {} left for the driver", port);
    }

    fn wake(&self) {
        self.io.wake();
    }

    fn shutdown(&self) {
        self.io.shutdown();
    }
}
