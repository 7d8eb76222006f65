// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # ROP - Remote Object Protocol runtime
//!
//! Exposes local objects to a peer process and calls methods on objects the
//! peer owns, over a single byte-stream connection. Remote objects are reached
//! through [`Stub`]s; local objects handed to the peer are wrapped in
//! skeletons that live exactly as long as the peer holds a handle to them.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rop::{Connection, Interface, Method, Reply, RopResult, Servant, Shape, Value};
//! use std::sync::Arc;
//!
//! static CALC: Interface = Interface {
//!     name: "calc",
//!     methods: &[Method {
//!         name: "add",
//!         args: &[Shape::I32, Shape::I32],
//!         results: &[Shape::I32],
//!         oneway: false,
//!     }],
//! };
//!
//! struct Calc;
//!
//! impl Servant for Calc {
//!     fn interface(&self) -> &'static Interface {
//!         &CALC
//!     }
//!
//!     fn dispatch(&self, _method: u16, args: Vec<Value>) -> Reply {
//!         let a = args[0].as_i32().unwrap_or_default();
//!         let b = args[1].as_i32().unwrap_or_default();
//!         Reply::Value(Value::I32(a + b))
//!     }
//! }
//!
//! fn main() -> RopResult<()> {
//!     let (server, client) = Connection::pair(
//!         Connection::builder().export("calc", Arc::new(Calc)),
//!         Connection::builder(),
//!     )?;
//!
//!     let calc = client.resolve_stub("calc", &CALC)?;
//!     let sum = calc.call(0, vec![Value::I32(2), Value::I32(3)])?;
//!     assert_eq!(sum, Value::I32(5));
//!     drop(server);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |   Stub / ObjectRef          (application-facing proxies)            |
//! +---------------------------------------------------------------------+
//! |   Connection: Directory = Registry + PortTable + Wire, one lock     |
//! +---------------------------------------------------------------------+
//! |   Frames: resumable decode/encode driven by a continuation stack    |
//! +---------------------------------------------------------------------+
//! |   Transport: driver thread (Socket) or thread per port (Stream)     |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Wire format
//!
//! Every message is a 4-byte big-endian port id followed by a Request or a
//! Return frame. The receiver negates port and object ids, so a positive id
//! always means "allocated on this side".

/// Connection tuning knobs (buffer sizes, limits, poll interval).
pub mod config;
/// Connection handle, builder and the protocol logic shared by all transports.
pub mod connection;
/// Error types.
pub mod error;
/// Resumable frames: the incremental encode/decode machinery.
pub mod frame;
/// Lock-free connection counters.
pub mod metrics;
/// Interfaces, servants, object references and stubs.
pub mod object;
/// Logical channels multiplexed over one connection.
pub mod port;
/// Skeleton and remote-handle tables plus the release protocol.
pub mod registry;
/// Runtime policies for draining the socket and scheduling calls.
pub mod transport;
/// Wire shapes and dynamic values.
pub mod value;
/// Byte buffer and wire constants.
pub mod wire;

pub use config::{ConnectionConfig, Runtime};
pub use connection::{Connection, ConnectionBuilder, DirectoryStats};
pub use error::{FaultCode, RopError, RopResult};
pub use frame::AbortReason;
pub use metrics::{ConnectionMetrics, MetricsSnapshot};
pub use object::{Interface, Method, ObjectRef, Reply, Servant, Stub, OPAQUE};
pub use port::PortId;
pub use transport::ByteStream;
pub use value::{Shape, Value};
