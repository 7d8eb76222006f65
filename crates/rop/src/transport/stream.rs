// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stream runtime: a reader thread plus one thread per busy port.
//!
//! The reader drains and decodes the stream and sends pending releases,
//! but never runs a servant. A request landing on a port nobody waits on
//! starts a processor thread for that port, which runs the port's requests
//! in arrival order and exits once the queue is empty. A slow servant so
//! only holds up its own port.

use super::reactor::Reactor;
use super::{ByteStream, Transport};
use crate::config::ConnectionConfig;
use crate::connection::{Directory, Shared};
use crate::error::RopResult;
use crate::port::PortId;
use parking_lot::MutexGuard;
use std::io;
use std::sync::Arc;
use std::thread;

pub(crate) struct StreamTransport {
    io: Reactor,
}

impl StreamTransport {
    pub fn new(stream: Box<dyn ByteStream>, config: &ConnectionConfig) -> io::Result<Self> {
        Ok(Self {
            io: Reactor::new(stream, config)?,
        })
    }

    fn pump(&self, shared: &Shared, g: &mut MutexGuard<'_, Directory>) -> RopResult<()> {
        self.io.pump_io(shared, g)?;
        shared.send_releases(g)
    }
}

/// Body of a port's processor thread.
fn process(shared: Arc<Shared>, port: PortId) {
    let mut g = shared.state.lock();
    let mut served = 0usize;
    while g.failure.is_none() {
        match shared.dispatch_one_request(&mut g, port) {
            Ok(true) => served += 1,
            Ok(false) => break,
            Err(e) => {
                log::debug!("rop dispatch: port {} processor stopped: {}", port, e);
                break;
            }
        }
    }
    if let Some(p) = g.ports.get_mut(port) {
        p.processor = false;
    }
    g.ports.release_if_idle(port);
    log::trace!("rop dispatch: port {} processor done ({} requests)", port, served);
}

impl Transport for StreamTransport {
    fn name(&self) -> &'static str {
        "stream"
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
        shared: &Shared,
        g: &mut MutexGuard<'_, Directory>,
        port: PortId,
    ) {
        let idle = g
            .ports
            .get(port)
            .is_some_and(|p| !p.processor && p.serving == 0 && p.waiters == 0);
        if !idle {
            return;
        }
        let Some(owner) = shared.this.upgrade() else {
            return;
        };
        if let Some(p) = g.ports.get_mut(port) {
            p.processor = true;
        }
        let spawned = thread::Builder::new()
            .name(format!("rop-port{}", port))
            .spawn(move || process(owner, port));
        if let Err(e) = spawned {
            log::error!("rop dispatch: cannot start processor for port {}: {}", port, e);
            if let Some(p) = g.ports.get_mut(port) {
                p.processor = false;
            }
        }
    }

    fn wake(&self) {
        self.io.wake();
    }

    fn shutdown(&self) {
        self.io.shutdown();
    }
}
