// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Interfaces, servants and object references.
//!
//! An [`Interface`] is a static dispatch table: method index to argument
//! shapes and result variants. Variant 0 of `results` is the normal return
//! value, variants 1.. are the exceptions the method may raise.
//!
//! A [`Servant`] implements an interface locally. A [`Stub`] forwards calls
//! to an object owned by the peer. [`ObjectRef`] is either of the two, and
//! is what object-typed arguments and results carry.

use crate::error::{FaultCode, RopError, RopResult};
use crate::registry::RemoteHandle;
use crate::value::{Shape, Value};
use std::fmt;
use std::sync::Arc;

/// Interface with no methods, used where the interface is not known yet.
pub static OPAQUE: Interface = Interface {
    name: "opaque",
    methods: &[],
};

/// Dispatch table of one RPC interface.
#[derive(Debug)]
pub struct Interface {
    pub name: &'static str,
    pub methods: &'static [Method],
}

impl Interface {
    /// Method descriptor by index.
    pub fn method(&self, index: u16) -> Option<&'static Method> {
        self.methods.get(usize::from(index))
    }

    /// Method index by name.
    pub fn method_index(&self, name: &str) -> Option<u16> {
        self.methods
            .iter()
            .position(|m| m.name == name)
            .and_then(|i| u16::try_from(i).ok())
    }
}

/// Argument and result layout of one method.
#[derive(Debug)]
pub struct Method {
    pub name: &'static str,
    pub args: &'static [Shape],
    /// Index 0 is the normal result, 1.. are exception variants
    pub results: &'static [Shape],
    /// No Return is sent; the caller does not wait
    pub oneway: bool,
}

impl Method {
    /// Check argument count and shapes.
    pub fn check_args(&self, args: &[Value]) -> RopResult<()> {
        if args.len() != self.args.len() {
            return Err(RopError::ShapeMismatch(format!(
                "{} takes {} arguments, got {}",
                self.name,
                self.args.len(),
                args.len()
            )));
        }
        for (i, (shape, value)) in self.args.iter().zip(args).enumerate() {
            if !shape.admits(value) {
                return Err(RopError::ShapeMismatch(format!(
                    "{} argument {} expects {}",
                    self.name,
                    i,
                    shape.describe()
                )));
            }
        }
        Ok(())
    }
}

/// Local implementation of an interface.
///
/// `dispatch` runs without the connection lock held and may itself call
/// other remote objects, including objects of the caller.
pub trait Servant: Send + Sync + 'static {
    fn interface(&self) -> &'static Interface;

    fn dispatch(&self, method: u16, args: Vec<Value>) -> Reply;
}

/// What a servant answers.
#[derive(Debug)]
pub enum Reply {
    /// Normal result (variant 0)
    Value(Value),
    /// Declared exception variant (1..)
    Raise { variant: u32, payload: Value },
    /// Failure outside the declared variants
    Fault(String),
}

impl Reply {
    pub fn unit() -> Self {
        Reply::Value(Value::Unit)
    }

    /// Map a nested call result into a reply, passing exception variants through.
    pub fn from_result(result: RopResult<Value>) -> Self {
        match result {
            Ok(value) => Reply::Value(value),
            Err(RopError::Remote { variant, payload }) => Reply::Raise { variant, payload },
            Err(e) => Reply::Fault(e.to_string()),
        }
    }

    /// The result a local caller sees.
    pub fn into_result(self) -> RopResult<Value> {
        match self {
            Reply::Value(value) => Ok(value),
            Reply::Raise { variant, payload } => Err(RopError::Remote { variant, payload }),
            Reply::Fault(message) => Err(RopError::Fault {
                code: FaultCode::ServantFailed,
                message,
            }),
        }
    }
}

/// Reference to an object that is either local or owned by the peer.
#[derive(Clone)]
pub enum ObjectRef {
    Local(Arc<dyn Servant>),
    Remote(Stub),
}

impl ObjectRef {
    pub fn interface(&self) -> &'static Interface {
        match self {
            ObjectRef::Local(servant) => servant.interface(),
            ObjectRef::Remote(stub) => stub.interface(),
        }
    }

    pub fn as_stub(&self) -> Option<&Stub> {
        match self {
            ObjectRef::Remote(stub) => Some(stub),
            ObjectRef::Local(_) => None,
        }
    }

    pub fn as_local(&self) -> Option<&Arc<dyn Servant>> {
        match self {
            ObjectRef::Local(servant) => Some(servant),
            ObjectRef::Remote(_) => None,
        }
    }

    /// Call a method, locally or through the connection.
    pub fn call(&self, method: u16, args: Vec<Value>) -> RopResult<Value> {
        match self {
            ObjectRef::Local(servant) => {
                let iface = servant.interface();
                let desc = iface
                    .method(method)
                    .ok_or(RopError::UnknownMethod { object: 0, method })?;
                desc.check_args(&args)?;
                servant.dispatch(method, args).into_result()
            }
            ObjectRef::Remote(stub) => stub.call(method, args),
        }
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ObjectRef::Local(a), ObjectRef::Local(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            (ObjectRef::Remote(a), ObjectRef::Remote(b)) => Arc::ptr_eq(&a.handle, &b.handle),
            _ => false,
        }
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectRef::Local(servant) => write!(f, "Local({})", servant.interface().name),
            ObjectRef::Remote(stub) => write!(f, "Remote({}, id {})", stub.interface.name, stub.id()),
        }
    }
}

/// Proxy for a peer-owned object.
///
/// Cloning a stub shares its remote handle; the peer is told to release
/// the object once the last stub for it is dropped.
#[derive(Clone)]
pub struct Stub {
    handle: Arc<RemoteHandle>,
    interface: &'static Interface,
}

impl Stub {
    pub(crate) fn new(handle: Arc<RemoteHandle>, interface: &'static Interface) -> Self {
        Self { handle, interface }
    }

    /// Local id of the remote handle (always negative).
    pub fn id(&self) -> i32 {
        self.handle.id()
    }

    pub fn interface(&self) -> &'static Interface {
        self.interface
    }

    pub(crate) fn handle(&self) -> &Arc<RemoteHandle> {
        &self.handle
    }

    /// Same remote object, viewed through another interface.
    pub fn rebind(&self, interface: &'static Interface) -> Stub {
        Stub {
            handle: Arc::clone(&self.handle),
            interface,
        }
    }

    /// Call method `method` and wait for its Return.
    pub fn call(&self, method: u16, args: Vec<Value>) -> RopResult<Value> {
        let shared = self.handle.connection()?;
        shared.invoke(self, method, args)
    }

    /// Call a method by name.
    pub fn call_by_name(&self, name: &str, args: Vec<Value>) -> RopResult<Value> {
        let index = self
            .interface
            .method_index(name)
            .ok_or_else(|| RopError::NotFound(format!("{}.{}", self.interface.name, name)))?;
        self.call(index, args)
    }

    /// Send every call before waiting for any reply.
    ///
    /// Replies are matched to calls in send order. The outer result fails
    /// only when the connection does; per-call failures are in the vector.
    pub fn call_batch(&self, calls: Vec<(u16, Vec<Value>)>) -> RopResult<Vec<RopResult<Value>>> {
        let shared = self.handle.connection()?;
        shared.invoke_batch(self, calls)
    }
}

impl fmt::Debug for Stub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stub")
            .field("id", &self.id())
            .field("interface", &self.interface.name)
            .finish()
    }
}
