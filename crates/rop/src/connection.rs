// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection handle and the protocol logic shared by every transport.
//!
//! All per-connection state lives in one [`Directory`] behind one lock:
//! the object registry, the port table and the wire buffers. Calling
//! threads and the driver thread take turns on it; the lock is released
//! only while a servant runs or while a thread sleeps waiting for I/O.
//!
//! # Call flow
//!
//! ```text
//! Stub::call ──> Shared::invoke ──> port.outbound ──> Transport::flush_port
//!                      │
//!                      └──> submit_and_block: wait for the ticket, running
//!                           requests the peer chains onto the same port
//! ```

use crate::config::{ConnectionConfig, Runtime};
use crate::error::{FaultCode, RopError, RopResult};
use crate::frame::message::{Inbound, InboundRequest, MessageWriter, Outbound};
use crate::frame::{clip, AbortReason, Continuation, FrameIo, FrameState, Limits};
use crate::metrics::{ConnectionMetrics, MetricsSnapshot};
use crate::object::{Interface, Method, ObjectRef, Reply, Servant, Stub};
use crate::port::{Decoding, Port, PortId, PortTable};
use crate::registry::{release_args, Registry, DIRECTORY, LOOKUP_METHOD, RELEASE_METHOD};
use crate::transport::{ByteStream, Encoding, SocketTransport, StreamTransport, Transport, Wire};
use crate::value::{Shape, Value};
use crate::wire::{flip, is_oneway, CONTROL_OBJECT, HEAD_ONEWAY, HEAD_REQUEST};
use parking_lot::{Mutex, MutexGuard};
use std::any::Any;
use std::cell::RefCell;
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};

// ============================================================================
// Shared state
// ============================================================================

/// Everything guarded by the connection lock.
pub(crate) struct Directory {
    pub registry: Registry,
    pub ports: PortTable,
    pub wire: Wire,
    /// First fatal error; once set every call fails with it
    pub failure: Option<RopError>,
}

/// State shared by the connection handle, its driver thread and stubs.
pub(crate) struct Shared {
    /// Handle on ourselves, for threads the connection starts
    pub this: Weak<Shared>,
    pub state: Mutex<Directory>,
    pub transport: Box<dyn Transport>,
    pub config: ConnectionConfig,
    pub limits: Limits,
    pub metrics: ConnectionMetrics,
    pub peer: String,
}

type Planned = (&'static Method, u16, Vec<Value>);

impl Shared {
    /// Call `method` on the peer object behind `stub`.
    pub(crate) fn invoke(&self, stub: &Stub, method: u16, args: Vec<Value>) -> RopResult<Value> {
        let mut replies = self.invoke_batch(stub, vec![(method, args)])?;
        replies
            .pop()
            .unwrap_or_else(|| Err(RopError::closed("reply missing")))
    }

    /// Queue every call before waiting, so they share one flush.
    pub(crate) fn invoke_batch(
        &self,
        stub: &Stub,
        calls: Vec<(u16, Vec<Value>)>,
    ) -> RopResult<Vec<RopResult<Value>>> {
        let mut planned = Vec::with_capacity(calls.len());
        for (method, args) in calls {
            let desc = stub
                .interface()
                .method(method)
                .ok_or(RopError::UnknownMethod {
                    object: stub.id(),
                    method,
                })?;
            desc.check_args(&args)?;
            planned.push((desc, method, args));
        }

        let mut g = self.state.lock();
        if !g.registry.owns(stub.handle()) {
            return Err(RopError::ForeignObject);
        }
        self.issue(&mut g, stub.id(), planned)
    }

    /// Look up `name` in the peer's exported-object table.
    pub(crate) fn resolve(&self, name: &str, interface: &'static Interface) -> RopResult<ObjectRef> {
        let desc = DIRECTORY
            .method(LOOKUP_METHOD)
            .ok_or(RopError::UnknownMethod {
                object: CONTROL_OBJECT,
                method: LOOKUP_METHOD,
            })?;
        let reply = {
            let mut g = self.state.lock();
            self.issue(
                &mut g,
                CONTROL_OBJECT,
                vec![(desc, LOOKUP_METHOD, vec![Value::Str(name.to_string())])],
            )?
            .pop()
        };
        match reply {
            Some(Ok(Value::Object(Some(ObjectRef::Remote(stub))))) => {
                Ok(ObjectRef::Remote(stub.rebind(interface)))
            }
            Some(Ok(Value::Object(Some(local)))) => Ok(local),
            Some(Ok(Value::Object(None))) => Err(RopError::NotFound(name.to_string())),
            Some(Err(e)) => Err(e),
            _ => Err(RopError::ShapeMismatch(format!(
                "lookup of '{}' returned a non-object",
                name
            ))),
        }
    }

    fn issue(
        &self,
        g: &mut MutexGuard<'_, Directory>,
        target: i32,
        calls: Vec<Planned>,
    ) -> RopResult<Vec<RopResult<Value>>> {
        if let Some(err) = &g.failure {
            return Err(err.clone());
        }
        for (_, _, args) in &calls {
            for arg in args {
                self.limits.check(arg)?;
                check_owned(&g.registry, arg)?;
            }
        }

        let me = thread::current().id();
        let bound = g.ports.is_bound(me);
        let port = g.ports.current_for(me);
        if !bound && g.ports.is_bound(me) {
            unbind_on_exit(&self.this);
        }
        let mut slots = Vec::with_capacity(calls.len());
        for (desc, method, args) in calls {
            let head = if desc.oneway { HEAD_ONEWAY } else { HEAD_REQUEST };
            slots.push((!desc.oneway).then(|| g.ports.expect(port, desc.results)));
            g.ports
                .activate(port)
                .outbound
                .push_back(MessageWriter::new(
                    port,
                    Outbound::Request {
                        head,
                        target,
                        method,
                        args,
                    },
                ));
            self.metrics.record_call();
        }

        let tickets: Vec<u64> = slots.iter().flatten().copied().collect();
        if tickets.is_empty() {
            self.transport.flush_port(self, g, port)?;
            return Ok(slots.iter().map(|_| Ok(Value::Unit)).collect());
        }
        let mut replies = self.submit_and_block(g, port, &tickets)?.into_iter();
        Ok(slots
            .into_iter()
            .map(|slot| match slot {
                None => Ok(Value::Unit),
                Some(_) => replies
                    .next()
                    .unwrap_or_else(|| Err(RopError::closed("reply missing"))),
            })
            .collect())
    }

    /// Flush `port` and wait for `tickets`, serving requests that arrive on
    /// the same port in the meantime.
    fn submit_and_block(
        &self,
        g: &mut MutexGuard<'_, Directory>,
        port: PortId,
        tickets: &[u64],
    ) -> RopResult<Vec<RopResult<Value>>> {
        self.transport.flush_port(self, g, port)?;
        g.ports.activate(port).waiters += 1;

        let outcome = loop {
            if let Some(p) = g.ports.get_mut(port) {
                if tickets.iter().all(|t| p.completed.contains_key(t)) {
                    break Ok(tickets
                        .iter()
                        .filter_map(|t| p.completed.remove(t))
                        .collect());
                }
            }
            if let Some(err) = &g.failure {
                break Err(err.clone());
            }
            match self.dispatch_one_request(g, port) {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => break Err(e),
            }
            if let Err(e) = self.transport.wait_port(self, g, port) {
                break Err(e);
            }
        };

        let mut leftover = false;
        if let Some(p) = g.ports.get_mut(port) {
            p.waiters -= 1;
            if outcome.is_err() {
                for t in tickets {
                    p.completed.remove(t);
                }
            }
            leftover = p.waiters == 0 && !p.requests.is_empty();
        }
        if leftover && g.failure.is_none() {
            self.transport.notify_unhandled_request(self, g, port);
        }
        outcome
    }

    // ========================================================================
    // Serving
    // ========================================================================

    /// Run the oldest request queued on `port`. Returns false if none.
    pub(crate) fn dispatch_one_request(
        &self,
        g: &mut MutexGuard<'_, Directory>,
        port: PortId,
    ) -> RopResult<bool> {
        let request = match g.ports.get_mut(port).and_then(|p| p.requests.pop_front()) {
            Some(request) => request,
            None => return Ok(false),
        };
        let me = thread::current().id();
        if let Some(p) = g.ports.get_mut(port) {
            p.serving += 1;
            p.returns.enter();
        }
        g.ports.push_serving(me, port);
        self.metrics.record_dispatch();

        let InboundRequest {
            head,
            target,
            method_index,
            method,
            servant,
            args,
        } = request;
        log::trace!(
            "rop dispatch: port {} object {} {}.{} (previous {:?})",
            port,
            target,
            servant.interface().name,
            method.name,
            g.ports.get(port).and_then(|p| p.last_request)
        );

        let outcome = MutexGuard::unlocked(g, || {
            panic::catch_unwind(AssertUnwindSafe(|| servant.dispatch(method_index, args)))
        });

        g.ports.pop_serving(me);
        if let Some(p) = g.ports.get_mut(port) {
            p.serving -= 1;
            p.returns.leave();
            p.last_request = Some((target, method_index));
        }

        if is_oneway(head) {
            match &outcome {
                Ok(Reply::Fault(msg)) => {
                    log::warn!("rop dispatch: one-way {} failed: {}", method.name, msg)
                }
                Err(panic) => log::warn!(
                    "rop dispatch: one-way {} panicked: {}",
                    method.name,
                    panic_message(&**panic)
                ),
                Ok(_) => {}
            }
            g.ports.release_if_idle(port);
            return Ok(true);
        }

        let (variant, payload) = encode_reply(&g.registry, self.limits, method, outcome);
        g.ports
            .activate(port)
            .outbound
            .push_back(MessageWriter::new(port, Outbound::Return { variant, payload }));
        let flushed = self.transport.flush_port(self, g, port);
        g.ports.release_if_idle(port);
        flushed.map(|()| true)
    }

    /// Run requests on ports nobody is waiting on.
    pub(crate) fn serve_unattended(&self, g: &mut MutexGuard<'_, Directory>) -> RopResult<()> {
        loop {
            let ports = g.ports.unattended();
            if ports.is_empty() {
                return Ok(());
            }
            for port in ports {
                // A thread may have started waiting on it meanwhile.
                let free = g
                    .ports
                    .get(port)
                    .is_some_and(|p| p.waiters == 0 && p.serving == 0);
                if free {
                    self.dispatch_one_request(g, port)?;
                }
            }
            if g.failure.is_some() {
                return Ok(());
            }
        }
    }

    /// Tell the peer about remote handles dropped since the last call.
    pub(crate) fn send_releases(&self, g: &mut MutexGuard<'_, Directory>) -> RopResult<()> {
        let released = g.registry.drain_releases();
        if released.is_empty() || g.failure.is_some() {
            return Ok(());
        }
        let port = g.ports.current_for(thread::current().id());
        for (id, count) in released {
            log::debug!("rop registry: releasing remote {} ({} refs)", id, count);
            g.ports
                .activate(port)
                .outbound
                .push_back(MessageWriter::new(
                    port,
                    Outbound::Request {
                        head: HEAD_ONEWAY,
                        target: CONTROL_OBJECT,
                        method: RELEASE_METHOD,
                        args: release_args(id, count),
                    },
                ));
            self.metrics.record_release();
        }
        self.transport.flush_port(self, g, port)
    }

    // ========================================================================
    // Wire
    // ========================================================================

    /// Encode queued messages of `port` into the outbound buffer until it
    /// is full or the port has nothing left.
    pub(crate) fn encode_pending(
        &self,
        g: &mut MutexGuard<'_, Directory>,
        port: PortId,
    ) -> RopResult<()> {
        let dir = &mut **g;
        loop {
            if dir.wire.encoding.is_none() {
                let writer = match dir.ports.get_mut(port).and_then(|p| p.outbound.pop_front()) {
                    Some(writer) => writer,
                    None => return Ok(()),
                };
                dir.wire.encoding = Some(Encoding {
                    writer,
                    stack: Continuation::new(),
                });
            }

            let Directory { wire, registry, .. } = &mut *dir;
            let Wire {
                outbound, encoding, ..
            } = wire;
            let state = match encoding.as_mut() {
                Some(enc) => {
                    let mut io = FrameIo {
                        buf: outbound,
                        registry,
                        limits: self.limits,
                        returns: None,
                    };
                    enc.stack.drive(&mut enc.writer, &mut io)
                }
                None => return Ok(()),
            };
            match state {
                FrameState::NeedMore => return Ok(()),
                FrameState::Complete => {
                    *encoding = None;
                    self.metrics.record_message_sent();
                }
                FrameState::Aborted(reason) => {
                    *encoding = None;
                    log::error!("rop connection: cannot encode on port {}: {}", port, reason);
                    return Err(RopError::Malformed { port, reason });
                }
            }
        }
    }

    /// Decode every complete message sitting in the inbound buffer.
    pub(crate) fn decode_inbound(&self, g: &mut MutexGuard<'_, Directory>) -> RopResult<()> {
        loop {
            let dir = &mut **g;
            let port = match dir.wire.in_port {
                Some(port) => port,
                None => match dir.wire.in_prefix.read_i32(&mut dir.wire.inbound) {
                    Some(raw) => {
                        let port = flip(raw);
                        dir.wire.in_port = Some(port);
                        port
                    }
                    None => return Ok(()),
                },
            };

            let Directory {
                registry,
                ports,
                wire,
                ..
            } = dir;
            let Port {
                decoding, returns, ..
            } = ports.activate(port);
            let state = {
                let slot = decoding.get_or_insert_with(Decoding::default);
                let mut io = FrameIo {
                    buf: &mut wire.inbound,
                    registry,
                    limits: self.limits,
                    returns: Some(returns),
                };
                slot.stack.drive(&mut slot.reader, &mut io)
            };

            match state {
                FrameState::NeedMore => return Ok(()),
                FrameState::Complete => {
                    wire.in_port = None;
                    let inbound = decoding.take().and_then(|d| d.reader.into_inbound());
                    match inbound {
                        Some(inbound) => self.deliver(g, port, inbound),
                        None => {
                            return Err(RopError::Malformed {
                                port,
                                reason: AbortReason::InvalidHead,
                            })
                        }
                    }
                }
                FrameState::Aborted(reason) => {
                    wire.in_port = None;
                    let awaits = decoding.take().is_some_and(|d| d.reader.awaits_reply());
                    self.metrics.record_malformed();
                    log::error!("rop connection: malformed frame on port {}: {}", port, reason);
                    if awaits
                        && matches!(
                            reason,
                            AbortReason::UnknownObject | AbortReason::UnknownMethod
                        )
                    {
                        self.courtesy_fault(g, port, reason);
                    }
                    return Err(RopError::Malformed { port, reason });
                }
            }
        }
    }

    fn deliver(&self, g: &mut MutexGuard<'_, Directory>, port: PortId, inbound: Inbound) {
        self.metrics.record_message_received();
        match inbound {
            Inbound::Request(request) => {
                let p = g.ports.activate(port);
                p.requests.push_back(request);
                if p.willing_to_serve() {
                    p.wake.notify_all();
                } else {
                    self.transport.notify_unhandled_request(self, g, port);
                }
            }
            Inbound::Return { ticket, outcome } => {
                let p = g.ports.activate(port);
                p.completed.insert(ticket, outcome);
                p.wake.notify_all();
            }
        }
    }

    /// Answer a request we cannot decode before the connection goes down,
    /// so the caller sees why.
    fn courtesy_fault(&self, g: &mut MutexGuard<'_, Directory>, port: PortId, reason: AbortReason) {
        if g.wire.sending {
            return;
        }
        g.wire.closing = true;
        let code = match reason {
            AbortReason::UnknownObject => FaultCode::UnknownObject,
            _ => FaultCode::UnknownMethod,
        };
        g.ports
            .activate(port)
            .outbound
            .push_back(MessageWriter::new(
                port,
                Outbound::Return {
                    variant: code.discriminant(),
                    payload: Value::Str(clip(reason.to_string(), self.limits.max_blob_len)),
                },
            ));
        if let Err(e) = self.transport.flush_port(self, g, port) {
            log::debug!("rop connection: fault reply on port {} not sent: {}", port, e);
        }
    }

    /// Record the first fatal error and wake every waiter.
    pub(crate) fn fail(&self, g: &mut MutexGuard<'_, Directory>, err: RopError) {
        if g.failure.is_some() {
            return;
        }
        log::warn!("rop connection: {} failed: {}", self.peer, err);
        g.failure = Some(err);
        for p in g.ports.iter() {
            if !p.returns.is_empty() {
                log::debug!("rop connection: abandoning {}", p.summary());
            }
            p.wake.notify_all();
        }
        self.transport.wake();
    }
}

fn check_owned(registry: &Registry, value: &Value) -> RopResult<()> {
    let mut foreign = false;
    value.for_each_object(&mut |obj: &ObjectRef| {
        if let ObjectRef::Remote(stub) = obj {
            foreign |= !registry.owns(stub.handle());
        }
    });
    if foreign {
        Err(RopError::ForeignObject)
    } else {
        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "servant panicked".to_string()
    }
}

/// Return discriminant and payload for a servant outcome.
///
/// Fault messages are clipped to `limits`; a result that does not fit them
/// is replaced by an `InvalidReply` fault.
fn encode_reply(
    registry: &Registry,
    limits: Limits,
    method: &'static Method,
    outcome: Result<Reply, Box<dyn Any + Send>>,
) -> (i32, Value) {
    let fault = |code: FaultCode, msg: String| {
        (code.discriminant(), Value::Str(clip(msg, limits.max_blob_len)))
    };
    let invalid = |what: String| {
        log::warn!("rop dispatch: {} returned {}", method.name, what);
        fault(FaultCode::InvalidReply, format!("{}: {}", method.name, what))
    };
    match outcome {
        Err(panic) => fault(FaultCode::ServantPanicked, panic_message(&*panic)),
        Ok(Reply::Fault(msg)) => fault(FaultCode::ServantFailed, msg),
        Ok(Reply::Value(value)) => {
            let admitted = method.results.first().is_some_and(|s| s.admits(&value));
            if !admitted {
                invalid(format!(
                    "a value that is not {}",
                    method.results.first().map(Shape::describe).unwrap_or_default()
                ))
            } else if let Err(e) = limits.check(&value) {
                invalid(e.to_string())
            } else if check_owned(registry, &value).is_err() {
                invalid("a foreign object".to_string())
            } else {
                (0, value)
            }
        }
        Ok(Reply::Raise { variant, payload }) => {
            let admitted = variant >= 1
                && method
                    .results
                    .get(variant as usize)
                    .is_some_and(|s| s.admits(&payload));
            if !admitted {
                invalid(format!("undeclared error variant {}", variant))
            } else if let Err(e) = limits.check(&payload) {
                invalid(e.to_string())
            } else if check_owned(registry, &payload).is_err() {
                invalid("a foreign object".to_string())
            } else {
                (variant as i32, payload)
            }
        }
    }
}

// ============================================================================
// Thread bindings
// ============================================================================

/// Connections on which the current thread holds a port of its own.
///
/// Dropped when the thread exits, which hands those ports back.
struct BoundPorts {
    thread: ThreadId,
    connections: RefCell<Vec<Weak<Shared>>>,
}

impl Drop for BoundPorts {
    fn drop(&mut self) {
        for weak in self.connections.get_mut().drain(..) {
            if let Some(shared) = weak.upgrade() {
                shared.state.lock().ports.unbind(self.thread);
            }
        }
    }
}

thread_local! {
    static BOUND_PORTS: BoundPorts = BoundPorts {
        thread: thread::current().id(),
        connections: RefCell::new(Vec::new()),
    };
}

/// Release the current thread's port on `shared` when the thread exits.
fn unbind_on_exit(shared: &Weak<Shared>) {
    let watched = BOUND_PORTS.try_with(|bound| {
        let mut connections = bound.connections.borrow_mut();
        connections.retain(|w| w.strong_count() > 0);
        connections.push(shared.clone());
    });
    if watched.is_err() {
        log::trace!("rop port: thread is exiting, its port stays bound");
    }
}

// ============================================================================
// Public handle
// ============================================================================

/// Directory and port table sizes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DirectoryStats {
    /// Local objects the peer may address, the directory object excluded
    pub skeletons: usize,
    /// Live handles on peer objects
    pub remotes: usize,
    /// Active ports, both directions
    pub ports: usize,
    /// Names in the exported-object table
    pub exported: usize,
}

/// One ROP connection and its driver thread.
///
/// Dropping the connection shuts the stream down and joins the driver.
/// Stubs that outlive it fail with [`RopError::ConnectionClosed`].
pub struct Connection {
    shared: Arc<Shared>,
    driver: Option<JoinHandle<()>>,
}

impl Connection {
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    /// Two connections joined by an in-process socket pair.
    #[cfg(unix)]
    pub fn pair(
        left: ConnectionBuilder,
        right: ConnectionBuilder,
    ) -> RopResult<(Connection, Connection)> {
        let (a, b) = mio::net::UnixStream::pair()?;
        let left = left.over_stream(Box::new(a))?;
        let right = right.over_stream(Box::new(b))?;
        Ok((left, right))
    }

    /// Make `servant` reachable by the peer under `name`.
    pub fn register(&self, name: impl Into<String>, servant: Arc<dyn Servant>) {
        self.shared.state.lock().registry.register(name, servant);
    }

    /// Look up `name` on the peer and view it through `interface`.
    pub fn resolve(&self, name: &str, interface: &'static Interface) -> RopResult<ObjectRef> {
        self.shared.resolve(name, interface)
    }

    /// Like [`Connection::resolve`], for names that must be peer objects.
    pub fn resolve_stub(&self, name: &str, interface: &'static Interface) -> RopResult<Stub> {
        match self.resolve(name, interface)? {
            ObjectRef::Remote(stub) => Ok(stub),
            ObjectRef::Local(_) => Err(RopError::ShapeMismatch(format!(
                "'{}' resolved to a local object",
                name
            ))),
        }
    }

    pub fn stats(&self) -> DirectoryStats {
        let g = self.shared.state.lock();
        let registry = g.registry.stats();
        DirectoryStats {
            skeletons: registry.skeletons,
            remotes: registry.remotes,
            ports: g.ports.len(),
            exported: registry.exported,
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().failure.is_some()
    }

    /// Error that closed the connection, if any.
    pub fn failure(&self) -> Option<RopError> {
        self.shared.state.lock().failure.clone()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    /// Peer description (address or "unix").
    pub fn peer(&self) -> &str {
        &self.shared.peer
    }

    /// Ask the driver to close the stream. Pending calls fail.
    pub fn shutdown(&self) {
        log::debug!("rop connection: shutdown requested ({})", self.shared.peer);
        self.shared.transport.shutdown();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.transport.shutdown();
        if let Some(handle) = self.driver.take() {
            // Dropped from a servant running on the driver: it exits on its own.
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::error!("rop connection: driver thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.shared.peer)
            .field("transport", &self.shared.transport.name())
            .finish()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Connection setup: configuration plus the objects exported from the start.
pub struct ConnectionBuilder {
    config: ConnectionConfig,
    exports: Vec<(String, Arc<dyn Servant>)>,
}

impl ConnectionBuilder {
    pub fn new() -> Self {
        Self {
            config: ConnectionConfig::default(),
            exports: Vec::new(),
        }
    }

    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Pick who runs requests nobody is waiting on.
    pub fn runtime(mut self, runtime: Runtime) -> Self {
        self.config.runtime = runtime;
        self
    }

    /// Register `servant` under `name` before the driver starts.
    pub fn export(mut self, name: impl Into<String>, servant: Arc<dyn Servant>) -> Self {
        self.exports.push((name.into(), servant));
        self
    }

    /// Connect over TCP.
    pub fn connect<A: ToSocketAddrs>(self, addr: A) -> RopResult<Connection> {
        let stream = TcpStream::connect(addr)?;
        self.over_tcp(stream)
    }

    /// Accept one TCP connection from `listener`.
    pub fn accept(self, listener: &TcpListener) -> RopResult<Connection> {
        let (stream, addr) = listener.accept()?;
        log::debug!("rop connection: accepted {}", addr);
        self.over_tcp(stream)
    }

    fn over_tcp(self, stream: TcpStream) -> RopResult<Connection> {
        stream.set_nodelay(self.config.nodelay)?;
        let sock = socket2::SockRef::from(&stream);
        if self.config.socket_send_buffer > 0 {
            sock.set_send_buffer_size(self.config.socket_send_buffer)?;
        }
        if self.config.socket_recv_buffer > 0 {
            sock.set_recv_buffer_size(self.config.socket_recv_buffer)?;
        }
        stream.set_nonblocking(true)?;
        self.over_stream(Box::new(mio::net::TcpStream::from_std(stream)))
    }

    /// Run the protocol over an already connected non-blocking stream.
    pub fn over_stream(self, stream: Box<dyn ByteStream>) -> RopResult<Connection> {
        let ConnectionBuilder { config, exports } = self;
        config
            .validate()
            .map_err(|e| RopError::InvalidConfig(e.to_string()))?;

        let peer = stream.peer_label();
        let transport: Box<dyn Transport> = match config.runtime {
            Runtime::Driver => Box::new(SocketTransport::new(stream, &config)?),
            Runtime::ThreadPerPort => Box::new(StreamTransport::new(stream, &config)?),
        };
        let limits = config.limits();
        let send_buffer = config.send_buffer_size;
        let thread_name = config.driver_thread_name.clone();

        let shared = Arc::new_cyclic(|weak| Shared {
            this: weak.clone(),
            state: Mutex::new(Directory {
                registry: Registry::new(weak.clone()),
                ports: PortTable::new(),
                wire: Wire::new(send_buffer),
                failure: None,
            }),
            transport,
            config,
            limits,
            metrics: ConnectionMetrics::new(),
            peer,
        });
        {
            let mut g = shared.state.lock();
            for (name, servant) in exports {
                g.registry.register(name, servant);
            }
        }

        let driver_shared = Arc::clone(&shared);
        let driver = thread::Builder::new()
            .name(thread_name)
            .spawn(move || driver_shared.transport.drive(&driver_shared))?;
        log::debug!(
            "rop connection: established with {} ({})",
            shared.peer,
            shared.transport.name()
        );

        Ok(Connection {
            shared,
            driver: Some(driver),
        })
    }
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
