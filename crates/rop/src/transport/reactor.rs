// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stream I/O shared by every runtime.
//!
//! One thread, the driver, owns the poller: it waits for readiness, reads
//! whatever arrives and decodes it. Any thread may write, one at a time,
//! through the send slot (`Wire::sending`), so messages of different ports
//! never interleave on the wire. The driver never sleeps on a condvar:
//! where another thread would wait, it polls instead, so inbound data keeps
//! flowing even while the driver itself is blocked on a send.

use super::ByteStream;
use crate::config::ConnectionConfig;
use crate::connection::{Directory, Shared};
use crate::error::{RopError, RopResult};
use crate::port::PortId;
use mio::{Events, Interest, Poll, Token, Waker};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Token for the stream
const STREAM_TOKEN: Token = Token(0);

/// Token for the waker
const WAKER_TOKEN: Token = Token(1);

/// Maximum events to process per poll
const MAX_EVENTS: usize = 64;

struct Poller {
    poll: Poll,
    events: Events,
}

pub(crate) struct Reactor {
    stream: Box<dyn ByteStream>,
    poller: Mutex<Poller>,
    waker: Waker,
    /// Signalled when the send slot frees up
    send_done: Condvar,
    /// Signalled on writable events
    writable: Condvar,
    stopping: AtomicBool,
    poll_interval: Duration,
    recv_chunk: usize,
}

impl Reactor {
    pub fn new(mut stream: Box<dyn ByteStream>, config: &ConnectionConfig) -> io::Result<Self> {
        let poll = Poll::new()?;
        poll.registry().register(
            &mut *stream,
            STREAM_TOKEN,
            Interest::READABLE | Interest::WRITABLE,
        )?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;
        Ok(Self {
            stream,
            poller: Mutex::new(Poller {
                poll,
                events: Events::with_capacity(MAX_EVENTS),
            }),
            waker,
            send_done: Condvar::new(),
            writable: Condvar::new(),
            stopping: AtomicBool::new(false),
            poll_interval: config.poll_interval,
            recv_chunk: config.recv_chunk_size,
        })
    }

    /// Driver loop: run `step` until the connection fails, then close the
    /// stream.
    pub fn run<F>(&self, shared: &Shared, mut step: F)
    where
        F: FnMut(&mut MutexGuard<'_, Directory>) -> RopResult<()>,
    {
        let mut g = shared.state.lock();
        g.wire.driver = Some(thread::current().id());
        log::debug!("rop driver: started for {}", shared.peer);

        while g.failure.is_none() {
            if let Err(err) = step(&mut g) {
                shared.fail(&mut g, err);
            }
        }

        g.wire.driver = None;
        g.wire.closing = true;
        drop(g);
        if let Err(e) = self.stream.shutdown() {
            log::trace!("rop driver: stream shutdown: {}", e);
        }
        log::debug!("rop driver: stopped for {}", shared.peer);
    }

    /// One poll round. Returns true if the stream became writable.
    fn poll_once(&self) -> io::Result<bool> {
        let mut poller = self.poller.lock();
        let Poller { poll, events } = &mut *poller;
        match poll.poll(events, Some(self.poll_interval)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(false),
            Err(e) => return Err(e),
        }
        let writable = events
            .iter()
            .any(|ev| ev.token() == STREAM_TOKEN && (ev.is_writable() || ev.is_error()));
        Ok(writable)
    }

    /// Driver step without serving: poll, read, decode.
    pub fn pump_io(&self, shared: &Shared, g: &mut MutexGuard<'_, Directory>) -> RopResult<()> {
        if let Some(err) = &g.failure {
            return Err(err.clone());
        }
        if self.stopping.load(Ordering::Acquire) {
            let err = RopError::closed("connection shut down");
            shared.fail(g, err.clone());
            return Err(err);
        }

        match MutexGuard::unlocked(g, || self.poll_once()) {
            Ok(true) => {
                g.wire.writable_epoch = g.wire.writable_epoch.wrapping_add(1);
                self.writable.notify_all();
            }
            Ok(false) => {}
            Err(e) => {
                log::error!("rop driver: poll error: {}", e);
                let err = RopError::from(e);
                shared.fail(g, err.clone());
                return Err(err);
            }
        }

        if !g.wire.closing {
            if let Err(err) = self.read_available(shared, g) {
                shared.fail(g, err.clone());
                return Err(err);
            }
        }
        Ok(())
    }

    fn read_available(&self, shared: &Shared, g: &mut MutexGuard<'_, Directory>) -> RopResult<()> {
        let mut chunk = vec![0u8; self.recv_chunk];
        loop {
            match self.stream.read_some(&mut chunk) {
                Ok(0) => return Err(RopError::closed("peer closed the stream")),
                Ok(n) => {
                    shared.metrics.record_bytes_received(n);
                    g.wire.inbound.extend(&chunk[..n]);
                    shared.decode_inbound(g)?;
                    if g.wire.closing {
                        return Ok(());
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Take the send slot and write every message queued on `port`.
    pub fn flush_port(
        &self,
        shared: &Shared,
        g: &mut MutexGuard<'_, Directory>,
        port: PortId,
    ) -> RopResult<()> {
        while g.wire.sending {
            if let Some(err) = &g.failure {
                return Err(err.clone());
            }
            if g.wire.is_driver() {
                self.pump_io(shared, g)?;
            } else {
                self.send_done.wait_for(g, self.poll_interval);
            }
        }
        if let Some(err) = &g.failure {
            return Err(err.clone());
        }

        g.wire.sending = true;
        let result = self.drain(shared, g, port);
        g.wire.sending = false;
        self.send_done.notify_all();

        if let Err(err) = &result {
            // A refused fault reply is not what brings the connection down.
            if !g.wire.closing {
                shared.fail(g, err.clone());
            }
        }
        result
    }

    /// Write the outbound buffer, refilling it from `port`, until both are empty.
    fn drain(
        &self,
        shared: &Shared,
        g: &mut MutexGuard<'_, Directory>,
        port: PortId,
    ) -> RopResult<()> {
        loop {
            shared.encode_pending(g, port)?;
            if g.wire.outbound.is_empty() {
                return Ok(());
            }
            let epoch = g.wire.writable_epoch;
            match self.stream.write_some(g.wire.outbound.chunk()) {
                Ok(0) => return Err(RopError::closed("stream accepts no more bytes")),
                Ok(n) => {
                    g.wire.outbound.consume(n);
                    shared.metrics.record_bytes_sent(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    shared.metrics.record_send_blocked();
                    if g.wire.closing {
                        return Err(RopError::closed("peer stopped reading"));
                    }
                    self.wait_writable(shared, g, epoch)?;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn wait_writable(
        &self,
        shared: &Shared,
        g: &mut MutexGuard<'_, Directory>,
        epoch: u64,
    ) -> RopResult<()> {
        if g.wire.is_driver() {
            return self.pump_io(shared, g);
        }
        if g.wire.writable_epoch == epoch {
            self.writable.wait_for(g, self.poll_interval);
        }
        match &g.failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Sleep on `port`'s condvar for at most one poll interval.
    pub fn wait_on_port(&self, g: &mut MutexGuard<'_, Directory>, port: PortId) {
        let wake = match g.ports.get(port) {
            Some(p) => p.wake.clone(),
            None => return,
        };
        wake.wait_for(g, self.poll_interval);
    }

    pub fn wake(&self) {
        if let Err(e) = self.waker.wake() {
            log::trace!("rop driver: wake failed: {}", e);
        }
        self.send_done.notify_all();
        self.writable.notify_all();
    }

    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::Release);
        self.wake();
    }
}
