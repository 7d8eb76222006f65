// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection directory tables.
//!
//! The registry owns every skeleton of a connection (local objects the peer
//! may address by id) and indexes the remote handles it created for peer
//! objects. Skeletons are removed only when the peer says it released them;
//! remote handles tell the peer when their last stub is dropped.
//!
//! # Reference counting
//!
//! Each time a local object is encoded its skeleton's export count grows by
//! one; each time the peer decodes it, the peer's remote handle import count
//! grows by one. A release carries the import count, and the skeleton goes
//! away when its export count drops to zero. A reference still in flight
//! when the last handle dies therefore keeps the skeleton alive.

use crate::connection::Shared;
use crate::error::RopError;
use crate::object::{Interface, Method, Reply, Servant, Stub, OPAQUE};
use crate::value::{Shape, Value};
use crate::wire::{flip, CONTROL_OBJECT};
use crossbeam::queue::SegQueue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

/// Method index of `lookup(name) -> object` on the directory object.
pub const LOOKUP_METHOD: u16 = 0;

/// Method index of one-way `release(skeleton id, count)` on the directory object.
pub const RELEASE_METHOD: u16 = 1;

static LOOKUP_RESULT: [Shape; 1] = [Shape::Object(&OPAQUE)];

/// Interface of skeleton 0, present on every connection.
pub static DIRECTORY: Interface = Interface {
    name: "rop.directory",
    methods: &[
        Method {
            name: "lookup",
            args: &[Shape::Str],
            results: &LOOKUP_RESULT,
            oneway: false,
        },
        Method {
            name: "release",
            args: &[Shape::I32, Shape::I32],
            results: &[Shape::Unit],
            oneway: true,
        },
    ],
};

struct Skeleton {
    servant: Arc<dyn Servant>,
    /// References encoded and not yet released by the peer
    exports: u32,
}

/// Releases queued by dropped remote handles, drained by the driver.
#[derive(Default)]
pub(crate) struct ReleaseSink {
    queue: SegQueue<(i32, u32)>,
}

/// Shared representation of one peer-owned object.
pub struct RemoteHandle {
    id: i32,
    imports: AtomicU32,
    sink: Arc<ReleaseSink>,
    conn: Weak<Shared>,
}

impl RemoteHandle {
    /// Local id (negative).
    pub fn id(&self) -> i32 {
        self.id
    }

    pub(crate) fn connection(&self) -> Result<Arc<Shared>, RopError> {
        self.conn
            .upgrade()
            .ok_or_else(|| RopError::closed("connection dropped"))
    }
}

impl Drop for RemoteHandle {
    fn drop(&mut self) {
        // Must not take the directory lock: handles drop wherever stubs do,
        // including inside locked sections.
        let count = *self.imports.get_mut();
        self.sink.queue.push((self.id, count));
        log::debug!("rop registry: remote {} dropped ({} imports)", self.id, count);
        if let Some(shared) = self.conn.upgrade() {
            shared.transport.wake();
        }
    }
}

/// Table sizes, for introspection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Skeletons, the directory object excluded
    pub skeletons: usize,
    /// Remote handles still alive
    pub remotes: usize,
    /// Names in the exported-object table
    pub exported: usize,
}

/// Per-connection object tables.
pub struct Registry {
    exports: HashMap<String, Arc<dyn Servant>>,
    skeletons: HashMap<i32, Skeleton>,
    by_identity: HashMap<usize, i32>,
    next_skeleton_id: i32,
    remotes: HashMap<i32, Weak<RemoteHandle>>,
    releases: Arc<ReleaseSink>,
    conn: Weak<Shared>,
}

impl Registry {
    pub(crate) fn new(conn: Weak<Shared>) -> Self {
        let mut skeletons = HashMap::new();
        skeletons.insert(
            CONTROL_OBJECT,
            Skeleton {
                servant: Arc::new(DirectoryServant { conn: conn.clone() }) as Arc<dyn Servant>,
                exports: 1,
            },
        );
        Self {
            exports: HashMap::new(),
            skeletons,
            by_identity: HashMap::new(),
            next_skeleton_id: 1,
            remotes: HashMap::new(),
            releases: Arc::new(ReleaseSink::default()),
            conn,
        }
    }

    /// Registry not attached to any connection.
    pub fn detached() -> Self {
        Self::new(Weak::new())
    }

    /// Install `servant` under `name`. Re-registering replaces the entry.
    pub fn register(&mut self, name: impl Into<String>, servant: Arc<dyn Servant>) {
        let name = name.into();
        log::debug!(
            "rop registry: registered '{}' ({})",
            name,
            servant.interface().name
        );
        self.exports.insert(name, servant);
    }

    pub fn exported(&self, name: &str) -> Option<Arc<dyn Servant>> {
        self.exports.get(name).cloned()
    }

    /// Skeleton id for `servant`, created on first use.
    pub fn skeleton_for(&mut self, servant: &Arc<dyn Servant>) -> i32 {
        let key = Arc::as_ptr(servant) as *const () as usize;
        if let Some(id) = self.by_identity.get(&key) {
            return *id;
        }
        let id = self.next_skeleton_id;
        self.next_skeleton_id += 1;
        self.skeletons.insert(
            id,
            Skeleton {
                servant: Arc::clone(servant),
                exports: 0,
            },
        );
        self.by_identity.insert(key, id);
        log::debug!(
            "rop registry: skeleton {} created ({})",
            id,
            servant.interface().name
        );
        id
    }

    /// Skeleton id for `servant`, counting one more reference sent to the peer.
    pub fn export(&mut self, servant: &Arc<dyn Servant>) -> i32 {
        let id = self.skeleton_for(servant);
        if let Some(skeleton) = self.skeletons.get_mut(&id) {
            skeleton.exports = skeleton.exports.saturating_add(1);
        }
        id
    }

    /// Servant behind skeleton `id`.
    pub fn skeleton(&self, id: i32) -> Option<Arc<dyn Servant>> {
        self.skeletons.get(&id).map(|s| Arc::clone(&s.servant))
    }

    /// Stub for peer object `id`, sharing the existing handle if one is alive.
    pub fn remote_for(&mut self, id: i32, interface: &'static Interface) -> Stub {
        if let Some(handle) = self.remotes.get(&id).and_then(Weak::upgrade) {
            handle.imports.fetch_add(1, Ordering::AcqRel);
            return Stub::new(handle, interface);
        }
        let handle = Arc::new(RemoteHandle {
            id,
            imports: AtomicU32::new(1),
            sink: Arc::clone(&self.releases),
            conn: self.conn.clone(),
        });
        self.remotes.insert(id, Arc::downgrade(&handle));
        log::debug!("rop registry: remote {} created ({})", id, interface.name);
        Stub::new(handle, interface)
    }

    /// True if `handle` was created by this registry.
    pub fn owns(&self, handle: &Arc<RemoteHandle>) -> bool {
        Arc::ptr_eq(&handle.sink, &self.releases)
    }

    /// Peer released `count` references to skeleton `id`.
    pub fn release_skeleton(&mut self, id: i32, count: u32) {
        if id == CONTROL_OBJECT {
            return;
        }
        let remaining = match self.skeletons.get_mut(&id) {
            Some(skeleton) => {
                skeleton.exports = skeleton.exports.saturating_sub(count);
                skeleton.exports
            }
            None => {
                log::warn!("rop registry: release of unknown skeleton {}", id);
                return;
            }
        };
        if remaining == 0 {
            if let Some(skeleton) = self.skeletons.remove(&id) {
                let key = Arc::as_ptr(&skeleton.servant) as *const () as usize;
                self.by_identity.remove(&key);
            }
            log::debug!("rop registry: skeleton {} removed", id);
        }
    }

    /// Releases queued since the last call, as (local remote id, count).
    pub fn drain_releases(&mut self) -> Vec<(i32, u32)> {
        let mut out = Vec::new();
        while let Some((id, count)) = self.releases.queue.pop() {
            if self.remotes.get(&id).is_some_and(|w| w.strong_count() == 0) {
                self.remotes.remove(&id);
            }
            out.push((id, count));
        }
        out
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            skeletons: self.skeletons.len() - usize::from(self.skeletons.contains_key(&CONTROL_OBJECT)),
            remotes: self.remotes.values().filter(|w| w.strong_count() > 0).count(),
            exported: self.exports.len(),
        }
    }
}

/// Skeleton 0: name lookup and release notifications.
struct DirectoryServant {
    conn: Weak<Shared>,
}

impl Servant for DirectoryServant {
    fn interface(&self) -> &'static Interface {
        &DIRECTORY
    }

    fn dispatch(&self, method: u16, args: Vec<Value>) -> Reply {
        let shared = match self.conn.upgrade() {
            Some(shared) => shared,
            None => return Reply::Fault("connection dropped".into()),
        };
        let mut state = shared.state.lock();
        match method {
            LOOKUP_METHOD => {
                let name = args.first().and_then(Value::as_str).unwrap_or_default();
                match state.registry.exported(name) {
                    Some(servant) => Reply::Value(Value::object(servant)),
                    None => {
                        log::debug!("rop registry: lookup of unknown name '{}'", name);
                        Reply::Value(Value::Object(None))
                    }
                }
            }
            RELEASE_METHOD => {
                let id = args.first().and_then(Value::as_i32).unwrap_or_default();
                let count = args.get(1).and_then(Value::as_i32).unwrap_or_default();
                state.registry.release_skeleton(id, count.max(0) as u32);
                Reply::unit()
            }
            _ => Reply::Fault(format!("no directory method {}", method)),
        }
    }
}

/// Arguments of a release notification for local remote id `id`.
pub(crate) fn release_args(id: i32, count: u32) -> Vec<Value> {
    vec![
        Value::I32(flip(id)),
        Value::I32(i32::try_from(count).unwrap_or(i32::MAX)),
    ]
}
